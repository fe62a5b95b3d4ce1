use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::Renderable;
use super::reference::RenderableRef;

/// Process-local table of live renderables keyed by an incrementing id.
///
/// Lives on the render thread; nothing else touches it.
pub struct RenderRegistry {
    owner: u32,
    next_id: u64,
    objects: FxHashMap<u64, Box<dyn Renderable>>,
}

impl Default for RenderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderRegistry {
    pub fn new() -> Self {
        Self::with_owner(std::process::id())
    }

    pub(crate) fn with_owner(owner: u32) -> Self {
        Self {
            owner,
            next_id: 1,
            objects: FxHashMap::default(),
        }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Store `object` and return a reference to it.
    pub fn insert<T: Renderable>(&mut self, object: T) -> RenderableRef<T> {
        let id = self.insert_boxed(Box::new(object));
        RenderableRef::new(self.owner, id)
    }

    pub(crate) fn insert_boxed(&mut self, object: Box<dyn Renderable>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    /// Look up a live object, checking that the reference belongs here.
    pub fn resolve(&mut self, owner: u32, id: u64) -> Result<&mut (dyn Renderable + 'static)> {
        if owner != self.owner {
            return Err(Error::ForeignReference {
                owner,
                current: self.owner,
            });
        }
        self.objects
            .get_mut(&id)
            .map(|object| object.as_mut())
            .ok_or(Error::UnknownRenderable(id))
    }

    pub fn get<T>(&mut self, reference: &RenderableRef<T>) -> Result<&mut (dyn Renderable + 'static)> {
        self.resolve(reference.owner(), reference.id())
    }

    /// Drop an object.
    pub fn release(&mut self, owner: u32, id: u64) -> Result<()> {
        if owner != self.owner {
            return Err(Error::ForeignReference {
                owner,
                current: self.owner,
            });
        }
        self.objects
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::UnknownRenderable(id))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
