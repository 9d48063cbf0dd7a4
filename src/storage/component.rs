use std::{any::Any, collections::HashMap, fmt};

use crate::{
    cell::{AtomicRef, AtomicRefCell, AtomicRefMut},
    component::{Component, ComponentKind},
    entity::{Entity, EntityIndex},
    error::RetrievalError,
};

/// Object-safe view of a `ComponentStorage<T>` for code that does not know `T`.
trait ErasedStorage: Send + Sync {
    fn remove_entity(&mut self, entity: Entity) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStorage for ComponentStorage<T> {
    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn len(&self) -> usize {
        ComponentStorage::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

type StorageCell = AtomicRefCell<Box<dyn ErasedStorage>>;

/// Owns one [`ComponentStorage`] per registered component kind.
///
/// Each store has its own borrow flag, so jobs touching different kinds can
/// hold views at the same time through a shared reference.
#[derive(Default)]
pub struct ComponentStorageAllocator {
    inner: HashMap<ComponentKind, StorageCell>,
}

impl ComponentStorageAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows the storage for `T`. `Ok(None)` means nothing of that kind was
    /// ever stored.
    pub fn get<T: Component>(
        &self,
    ) -> Result<Option<AtomicRef<'_, ComponentStorage<T>>>, RetrievalError> {
        let kind = ComponentKind::of::<T>();
        let cell = match self.inner.get(&kind) {
            Some(cell) => cell,
            None => return Ok(None),
        };

        let borrow = cell.try_borrow().ok_or(RetrievalError::StorageInUse {
            kind: kind.name(),
        })?;

        Ok(AtomicRef::filter_map(borrow, |storage| {
            (**storage).as_any().downcast_ref::<ComponentStorage<T>>()
        })
        .ok())
    }

    pub fn get_mut<T: Component>(
        &self,
    ) -> Result<Option<AtomicRefMut<'_, ComponentStorage<T>>>, RetrievalError> {
        let kind = ComponentKind::of::<T>();
        let cell = match self.inner.get(&kind) {
            Some(cell) => cell,
            None => return Ok(None),
        };

        let borrow = cell.try_borrow_mut().ok_or(RetrievalError::StorageInUse {
            kind: kind.name(),
        })?;

        Ok(AtomicRefMut::filter_map(borrow, |storage| {
            (**storage).as_any_mut().downcast_mut::<ComponentStorage<T>>()
        })
        .ok())
    }

    /// Exclusive access without touching the borrow flag.
    pub fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStorage<T>> {
        self.inner
            .get_mut(&ComponentKind::of::<T>())
            .and_then(|cell| cell.get_mut().as_any_mut().downcast_mut())
    }

    pub fn get_mut_or_register<T: Component>(&mut self) -> &mut ComponentStorage<T> {
        let cell = self
            .inner
            .entry(ComponentKind::of::<T>())
            .or_insert_with(|| AtomicRefCell::new(Box::new(ComponentStorage::<T>::new())));

        // Keyed by the TypeId of `T`, so the downcast cannot fail.
        match cell.get_mut().as_any_mut().downcast_mut() {
            Some(storage) => storage,
            None => unreachable!("storage registered under the wrong kind"),
        }
    }

    /// Removes `entity` from every listed store.
    pub fn remove_components<'k, I>(&mut self, entity: Entity, kinds: I)
    where
        I: IntoIterator<Item = &'k ComponentKind>,
    {
        for kind in kinds {
            if let Some(cell) = self.inner.get_mut(kind) {
                cell.get_mut().remove_entity(entity);
            }
        }
    }
}

impl fmt::Debug for ComponentStorageAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, cell) in &self.inner {
            match cell.try_borrow() {
                Some(storage) => map.entry(kind, &storage.len()),
                None => map.entry(kind, &"<borrowed>"),
            };
        }
        map.finish()
    }
}

/// Dense storage for one component kind.
///
/// `ids[i]` owns `comps[i]`; `slots` maps an entity index to `i`. Removal
/// swaps the last element into the hole and fixes its slot in the same call,
/// so no reader ever sees a slot pointing at the wrong entity.
#[derive(Debug)]
pub struct ComponentStorage<T: Component> {
    ids: Vec<Entity>,
    comps: Vec<T>,
    slots: HashMap<EntityIndex, usize>,
}

impl<T: Component> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ComponentStorage<T> {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            comps: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        let len = self.comps.len();
        debug_assert_eq!(
            self.ids.len(),
            len,
            "ID & Component Vec lengths do not match."
        );

        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot of `entity`, checking the generation as well as the index.
    pub fn slot_of(&self, entity: Entity) -> Option<usize> {
        self.slots
            .get(&entity.index())
            .copied()
            .filter(|&slot| self.ids[slot] == entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.slot_of(entity).is_some()
    }

    /// Stores `value` for `entity`, returning the value it replaced.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        match self.slots.get(&entity.index()).copied() {
            Some(slot) if self.ids[slot] == entity => {
                Some(std::mem::replace(&mut self.comps[slot], value))
            }
            Some(_) => {
                // A dead generation still holds the slot; drop it first.
                self.remove_index(entity.index());
                self.push(entity, value);
                None
            }
            None => {
                self.push(entity, value);
                None
            }
        }
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slot_of(entity).map(|slot| &self.comps[slot])
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = self.slot_of(entity)?;
        self.comps.get_mut(slot)
    }

    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        self.slot_of(entity)?;
        self.remove_index(entity.index())
    }

    pub fn entities(&self) -> &[Entity] {
        &self.ids
    }

    pub fn components_mut(&mut self) -> &mut [T] {
        &mut self.comps
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &'_ T)> {
        self.ids.iter().copied().zip(self.comps.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &'_ mut T)> {
        self.ids.iter().copied().zip(self.comps.iter_mut())
    }

    fn push(&mut self, entity: Entity, value: T) {
        self.slots.insert(entity.index(), self.ids.len());
        self.ids.push(entity);
        self.comps.push(value);
    }

    fn remove_index(&mut self, index: EntityIndex) -> Option<T> {
        let slot = self.slots.remove(&index)?;

        self.ids.swap_remove(slot);
        let value = self.comps.swap_remove(slot);

        if let Some(moved) = self.ids.get(slot) {
            self.slots.insert(moved.index(), slot);
        }

        Some(value)
    }
}
