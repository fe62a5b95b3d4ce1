use std::fmt;
use std::marker::PhantomData;

/// Opaque handle to a renderable owned by the render thread of one process.
///
/// Only the registry hands these out. Dereferencing happens on the owner
/// thread, which rejects references minted by another process.
pub struct RenderableRef<T> {
    owner: u32,
    id: u64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> RenderableRef<T> {
    pub(crate) fn new(owner: u32, id: u64) -> Self {
        Self {
            owner,
            id,
            _kind: PhantomData,
        }
    }

    /// Process id of the registry that owns the object.
    pub fn owner(&self) -> u32 {
        self.owner
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Clone for RenderableRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RenderableRef<T> {}

impl<T> PartialEq for RenderableRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.id == other.id
    }
}

impl<T> Eq for RenderableRef<T> {}

impl<T> fmt::Debug for RenderableRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderableRef({}:{})", self.owner, self.id)
    }
}
