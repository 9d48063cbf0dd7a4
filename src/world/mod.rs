use tracing::warn;

use crate::{
    cell::AtomicRef,
    component::{Component, ComponentKind, ComponentSet, ComponentTuple},
    entity::{Entity, EntityAllocator},
    error::EcsError,
    storage::{ComponentStorage, ComponentStorageAllocator},
};

pub mod query;

/// Owns every entity and every component store.
///
/// The world does no locking of its own. Outside of setup it lives inside a
/// [`Scheduler`](crate::Scheduler), which only hands it to jobs whose declared
/// access does not conflict.
#[derive(Debug, Default)]
pub struct World {
    entities: EntityAllocator,
    signatures: Vec<ComponentSet>,
    components: ComponentStorageAllocator,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entity with no components.
    pub fn create(&mut self) -> Entity {
        let entity = self.entities.allocate();
        let slot = entity.index() as usize;

        if slot >= self.signatures.len() {
            self.signatures.resize_with(slot + 1, ComponentSet::new);
        }

        entity
    }

    /// Creates an entity carrying every component in `components`.
    pub fn create_with<CT: ComponentTuple>(&mut self, components: CT) -> Entity {
        let entity = self.create();
        let signature = &mut self.signatures[entity.index() as usize];
        components.store(entity, &mut self.components, signature);
        entity
    }

    pub fn create_iter<I, CT>(&mut self, iter: I) -> Vec<Entity>
    where
        I: IntoIterator<Item = CT>,
        CT: ComponentTuple,
    {
        iter.into_iter()
            .map(|components| self.create_with(components))
            .collect()
    }

    /// Destroys `entity` and drops all of its components.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        if !self.entities.release(entity) {
            warn!(%entity, "destroy called on a stale entity");
            return Err(EcsError::StaleEntity { entity });
        }

        let signature = &mut self.signatures[entity.index() as usize];
        self.components.remove_components(entity, signature.iter());
        signature.clear();

        Ok(())
    }

    /// Attaches `value`, returning the value it replaced.
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<Option<T>, EcsError> {
        let slot = self.check(entity).map_err(|err| {
            warn!(%entity, kind = %ComponentKind::of::<T>(), "add_component called on a stale entity");
            err
        })?;

        self.signatures[slot].insert(ComponentKind::of::<T>());
        Ok(self.components.get_mut_or_register::<T>().insert(entity, value))
    }

    pub fn add_components<CT: ComponentTuple>(
        &mut self,
        entity: Entity,
        components: CT,
    ) -> Result<(), EcsError> {
        let slot = self.check(entity).map_err(|err| {
            warn!(%entity, "add_components called on a stale entity");
            err
        })?;

        components.store(entity, &mut self.components, &mut self.signatures[slot]);
        Ok(())
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<Option<T>, EcsError> {
        let slot = self.check(entity)?;

        self.signatures[slot].remove(&ComponentKind::of::<T>());
        Ok(self
            .components
            .storage_mut::<T>()
            .and_then(|storage| storage.remove(entity)))
    }

    /// `false` for stale entities as well as for live ones lacking `T`.
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
            && self.signatures[entity.index() as usize].contains(&ComponentKind::of::<T>())
    }

    /// Reads one component. `Ok(None)` when the entity lacks it.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<Option<AtomicRef<'_, T>>, EcsError> {
        self.check(entity)?;

        let storage = match self.components.get::<T>()? {
            Some(storage) => storage,
            None => return Ok(None),
        };

        Ok(AtomicRef::filter_map(storage, |storage| storage.get(entity)).ok())
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<Option<&mut T>, EcsError> {
        self.check(entity)?;

        Ok(self
            .components
            .storage_mut::<T>()
            .and_then(|storage| storage.get_mut(entity)))
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter()
    }

    /// The kinds `entity` currently carries.
    pub fn signature(&self, entity: Entity) -> Option<&ComponentSet> {
        if self.entities.is_alive(entity) {
            self.signatures.get(entity.index() as usize)
        } else {
            None
        }
    }

    /// Every `T` in the world with its owner, for bulk edits outside of jobs.
    /// Values can change; which entities carry `T` cannot.
    pub fn iter_mut<T: Component>(&mut self) -> impl Iterator<Item = (Entity, &mut T)> + '_ {
        self.components
            .storage_mut::<T>()
            .into_iter()
            .flat_map(|storage| storage.iter_mut())
    }

    pub(crate) fn component_storage(&self) -> &ComponentStorageAllocator {
        &self.components
    }

    fn check(&self, entity: Entity) -> Result<usize, EcsError> {
        if self.entities.is_alive(entity) {
            Ok(entity.index() as usize)
        } else {
            Err(EcsError::StaleEntity { entity })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(f32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Speed(f32);

    #[test]
    fn create_is_empty() {
        let mut world = World::new();
        let entity = world.create();

        assert!(world.is_alive(entity));
        assert!(world.signature(entity).map_or(false, ComponentSet::is_empty));
        assert!(!world.has_component::<Position>(entity));
    }

    #[test]
    fn add_overwrites_and_tracks_signature() {
        let mut world = World::new();
        let entity = world.create();

        assert_eq!(world.add_component(entity, Position(1.0)), Ok(None));
        assert_eq!(world.add_component(entity, Position(2.0)), Ok(Some(Position(1.0))));
        assert!(world.has_component::<Position>(entity));
        assert_eq!(world.signature(entity).map(ComponentSet::len), Some(1));

        let value = world.get::<Position>(entity).expect("live").map(|v| *v);
        assert_eq!(value, Some(Position(2.0)));
    }

    #[test]
    fn missing_component_is_not_an_error() {
        let mut world = World::new();
        let entity = world.create_with((Position(0.0),));

        assert!(matches!(world.get::<Speed>(entity), Ok(None)));
        assert_eq!(world.remove_component::<Speed>(entity), Ok(None));
    }

    #[test]
    fn destroy_clears_every_store() {
        let mut world = World::new();
        let doomed = world.create_with((Position(1.0), Speed(2.0)));
        let survivor = world.create_with((Position(3.0), Speed(4.0)));

        world.destroy(doomed).expect("live entity");

        let positions: Vec<_> = world.iter_mut::<Position>().map(|(e, _)| e).collect();
        assert_eq!(positions, vec![survivor]);
        assert_eq!(world.iter_mut::<Speed>().count(), 1);
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn bulk_edits_keep_signatures_in_sync() {
        let mut world = World::new();
        let moving = world.create_with((Position(1.0), Speed(2.0)));
        let still = world.create_with((Position(5.0),));

        for (_, position) in world.iter_mut::<Position>() {
            position.0 *= 10.0;
        }
        world.remove_component::<Position>(still).expect("live");

        assert!(world.has_component::<Position>(moving));
        assert!(!world.has_component::<Position>(still));
        assert_eq!(world.get_mut::<Position>(moving), Ok(Some(&mut Position(10.0))));

        let query = query::Query::<(query::Read<Position>,)>::new();
        let mut visited = Vec::new();
        query
            .for_each(&world, |entity, _| visited.push(entity))
            .expect("no conflicting borrows");
        assert_eq!(query.matching(&world).collect::<Vec<_>>(), visited);
        assert_eq!(visited, vec![moving]);
    }

    #[test]
    fn iter_mut_over_unknown_kind_is_empty() {
        let mut world = World::new();
        world.create_with((Position(0.0),));
        assert_eq!(world.iter_mut::<Speed>().count(), 0);
    }

    #[test]
    fn stale_entity_fails_everywhere() {
        let mut world = World::new();
        let old = world.create_with((Position(1.0),));
        world.destroy(old).expect("live entity");

        let reused = world.create();
        assert_eq!(reused.index(), old.index());

        let stale = Err(EcsError::StaleEntity { entity: old });
        assert_eq!(world.destroy(old), stale);
        assert_eq!(world.add_component(old, Speed(1.0)).map(|_| ()), stale);
        assert_eq!(world.add_components(old, (Speed(1.0), Position(2.0))), stale);
        assert_eq!(world.remove_component::<Position>(old).map(|_| ()), stale);
        assert_eq!(world.get_mut::<Position>(old).map(|_| ()), stale);
        assert!(world.get::<Position>(old).is_err());
        assert!(!world.has_component::<Position>(old));

        assert!(!world.has_component::<Speed>(reused));
    }

    #[test]
    fn double_destroy() {
        let mut world = World::new();
        let entity = world.create();
        assert_eq!(world.destroy(entity), Ok(()));
        assert_eq!(world.destroy(entity), Err(EcsError::StaleEntity { entity }));
    }
}
