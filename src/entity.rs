use std::collections::VecDeque;
use std::fmt;

pub type EntityIndex = u32;
pub type EntityGen = u32;

/// A generational entity handle.
///
/// The index may be recycled once the entity is destroyed; the generation is
/// bumped when that happens, so an old handle never aliases the new entity.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Entity {
    index: EntityIndex,
    generation: EntityGen,
}

impl Entity {
    pub fn new(index: EntityIndex, generation: EntityGen) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> EntityIndex {
        self.index
    }

    pub fn generation(&self) -> EntityGen {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Hands out entity indices and tracks the live generation of each one.
///
/// Released indices go to the back of a FIFO queue so recycling is spread
/// across slots instead of hammering the most recently freed one. An index
/// whose generation is exhausted is retired for good.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    generations: Vec<EntityGen>,
    alive: Vec<bool>,
    free: VecDeque<EntityIndex>,
    retired: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Entity {
        match self.free.pop_front() {
            Some(index) => {
                // The generation was already bumped on release.
                self.alive[index as usize] = true;
                Entity::new(index, self.generations[index as usize])
            }
            None => {
                let index = self.generations.len() as EntityIndex;
                self.generations.push(0);
                self.alive.push(true);
                Entity::new(index, 0)
            }
        }
    }

    /// Releases `entity`, returning `false` if it was not alive under its
    /// generation.
    pub fn release(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        let slot = entity.index() as usize;
        self.alive[slot] = false;

        match self.generations[slot].checked_add(1) {
            Some(generation) => {
                self.generations[slot] = generation;
                self.free.push_back(entity.index());
            }
            None => self.retired += 1,
        }

        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index() as usize;

        slot < self.generations.len()
            && self.alive[slot]
            && self.generations[slot] == entity.generation()
    }

    pub fn alive_count(&self) -> usize {
        self.generations.len() - self.free.len() - self.retired
    }

    /// Every live entity, in index order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .zip(self.generations.iter())
            .enumerate()
            .filter(|(_, (alive, _))| **alive)
            .map(|(index, (_, &generation))| Entity::new(index as EntityIndex, generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_unique() {
        let mut alloc = EntityAllocator::new();
        let mut indices: Vec<_> = (0..64).map(|_| alloc.allocate().index()).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 64);
    }

    #[test]
    fn recycled_index_gets_new_generation() {
        let mut alloc = EntityAllocator::new();
        let first = alloc.allocate();
        assert!(alloc.release(first));

        let second = alloc.allocate();
        assert_eq!(second.index(), first.index());
        assert_eq!(second.generation(), first.generation() + 1);
        assert!(!alloc.is_alive(first));
        assert!(alloc.is_alive(second));
    }

    #[test]
    fn exhausted_generation_retires_index() {
        let mut alloc = EntityAllocator::new();
        let first = alloc.allocate();
        alloc.generations[first.index() as usize] = EntityGen::MAX;
        let last = Entity::new(first.index(), EntityGen::MAX);

        assert!(alloc.release(last));
        assert_eq!(alloc.alive_count(), 0);

        let next = alloc.allocate();
        assert_ne!(next.index(), last.index());
        assert!(!alloc.is_alive(last));
        assert!(!alloc.release(last));
        assert_eq!(alloc.iter().collect::<Vec<_>>(), vec![next]);
        assert_eq!(alloc.alive_count(), 1);
    }

    #[test]
    fn double_release_fails() {
        let mut alloc = EntityAllocator::new();
        let entity = alloc.allocate();
        assert!(alloc.release(entity));
        assert!(!alloc.release(entity));
    }

    #[test]
    fn iter_skips_released() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        alloc.release(b);

        assert_eq!(alloc.iter().collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(alloc.alive_count(), 2);
    }
}
