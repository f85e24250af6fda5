//! Generational idle set used for handout order and trimming
//!
//! Returned objects land in the young generation. Each trim pass destroys
//! whatever is still sitting in the old generation, then ages the young one.
//! An object is therefore only evicted after it stayed idle for at least one
//! full trim interval.

use crate::pool::ResourceId;

pub(crate) struct IdleSet<T> {
    young: Vec<(ResourceId, T)>,
    old: Vec<(ResourceId, T)>,
}

impl<T> IdleSet<T> {
    pub fn new() -> Self {
        Self {
            young: Vec::new(),
            old: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.young.len() + self.old.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.young.is_empty() && self.old.is_empty()
    }

    pub fn push(&mut self, id: ResourceId, object: T) {
        self.young.push((id, object));
    }

    /// Most recently returned first; old objects only once the young generation is empty.
    pub fn pop(&mut self) -> Option<(ResourceId, T)> {
        self.young.pop().or_else(|| self.old.pop())
    }

    #[cfg(test)]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.young.iter().chain(self.old.iter()).any(|(idle, _)| *idle == id)
    }

    /// Evict the old generation down to `floor` idle objects and age the young one.
    pub fn trim(&mut self, floor: usize) -> Vec<(ResourceId, T)> {
        let keep_old = floor.saturating_sub(self.young.len()).min(self.old.len());
        let evict = self.old.len() - keep_old;

        // Oldest entries sit at the front.
        let evicted: Vec<_> = self.old.drain(..evict).collect();
        self.old.append(&mut self.young);
        evicted
    }

    pub fn drain(&mut self) -> Vec<(ResourceId, T)> {
        let mut all = std::mem::take(&mut self.old);
        all.append(&mut self.young);
        all
    }
}
