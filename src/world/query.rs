//! Declarative component access.
//!
//! A query is a tuple of [`Read`] and [`Write`] markers. The same type serves
//! two purposes: it tells the scheduler which kinds a job touches, and it
//! borrows the matching stores to hand out per-entity views.

use std::{fmt, marker::PhantomData, ptr};

use rayon::prelude::*;

use crate::{
    access::{AccessDeclaration, AccessSet},
    cell::{AtomicRef, AtomicRefMut},
    component::{Component, ComponentKind, ComponentSet},
    entity::Entity,
    error::RetrievalError,
    storage::{ComponentStorage, ComponentStorageAllocator},
    world::World,
};

/// Shorthand for the per-entity view a query hands out.
pub type QueryItem<'a, Q> = <Q as QueryData>::Item<'a>;

/// A set of component accesses that can be fetched from the world.
///
/// # Safety
///
/// `get` must only hand out `&mut` views into storage that `fetch` borrowed
/// mutably, and two calls for different entities must never alias.
pub unsafe trait QueryData: 'static {
    /// Borrowed stores, shared between the threads of a parallel walk.
    type Fetch<'w>: Sync;
    type Item<'a>;

    fn declare(access: &mut AccessSet);

    fn fetch(storages: &ComponentStorageAllocator) -> Result<Self::Fetch<'_>, RetrievalError>;

    /// Entities worth probing: the smallest store involved.
    fn candidates<'a>(fetch: &'a Self::Fetch<'_>) -> &'a [Entity];

    /// # Safety
    ///
    /// While the returned item is alive, no other item for the same entity
    /// may be obtained from `fetch`.
    unsafe fn get<'a>(fetch: &'a Self::Fetch<'_>, entity: Entity) -> Option<Self::Item<'a>>;
}

/// Shared access to `T`.
pub struct Read<T>(PhantomData<fn() -> T>);

/// Exclusive access to `T`.
pub struct Write<T>(PhantomData<fn() -> T>);

impl<T> fmt::Debug for Read<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Read<{}>", std::any::type_name::<T>())
    }
}

impl<T> fmt::Debug for Write<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Write<{}>", std::any::type_name::<T>())
    }
}

#[derive(Debug)]
pub struct ReadFetch<'w, T: Component> {
    storage: Option<AtomicRef<'w, ComponentStorage<T>>>,
}

pub struct WriteFetch<'w, T: Component> {
    storage: Option<AtomicRefMut<'w, ComponentStorage<T>>>,
    base: *mut T,
}

// SAFETY: `base` points into the mutably borrowed store. Each entity maps to
// one slot, and `QueryData::get` callers never request an entity twice at once.
unsafe impl<T: Component> Sync for WriteFetch<'_, T> {}

impl<T: Component> fmt::Debug for WriteFetch<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteFetch")
            .field("kind", &ComponentKind::of::<T>())
            .field("len", &self.storage.as_deref().map_or(0, ComponentStorage::len))
            .finish()
    }
}

fn entities_of<T: Component>(storage: Option<&ComponentStorage<T>>) -> &[Entity] {
    match storage {
        Some(storage) => storage.entities(),
        None => &[],
    }
}

unsafe impl<T: Component> QueryData for Read<T> {
    type Fetch<'w> = ReadFetch<'w, T>;
    type Item<'a> = &'a T;

    fn declare(access: &mut AccessSet) {
        access.declare(AccessDeclaration::read(ComponentKind::of::<T>()));
    }

    fn fetch(storages: &ComponentStorageAllocator) -> Result<Self::Fetch<'_>, RetrievalError> {
        Ok(ReadFetch {
            storage: storages.get::<T>()?,
        })
    }

    fn candidates<'a>(fetch: &'a Self::Fetch<'_>) -> &'a [Entity] {
        entities_of(fetch.storage.as_deref())
    }

    unsafe fn get<'a>(fetch: &'a Self::Fetch<'_>, entity: Entity) -> Option<&'a T> {
        fetch.storage.as_deref()?.get(entity)
    }
}

unsafe impl<T: Component> QueryData for Write<T> {
    type Fetch<'w> = WriteFetch<'w, T>;
    type Item<'a> = &'a mut T;

    fn declare(access: &mut AccessSet) {
        access.declare(AccessDeclaration::read_write(ComponentKind::of::<T>()));
    }

    fn fetch(storages: &ComponentStorageAllocator) -> Result<Self::Fetch<'_>, RetrievalError> {
        let mut storage = storages.get_mut::<T>()?;
        let base = match storage.as_deref_mut() {
            Some(storage) => storage.components_mut().as_mut_ptr(),
            None => ptr::null_mut(),
        };

        Ok(WriteFetch { storage, base })
    }

    fn candidates<'a>(fetch: &'a Self::Fetch<'_>) -> &'a [Entity] {
        entities_of(fetch.storage.as_deref())
    }

    unsafe fn get<'a>(fetch: &'a Self::Fetch<'_>, entity: Entity) -> Option<&'a mut T> {
        let slot = fetch.storage.as_deref()?.slot_of(entity)?;
        Some(&mut *fetch.base.add(slot))
    }
}

mod impls {
    use super::*;

    macro_rules! impl_qd {
        ($($t:tt),+) => {
            unsafe impl<$($t),+> QueryData for ($($t,)+)
            where
                $(
                    $t: QueryData,
                )+
            {
                type Fetch<'w> = ($(<$t as QueryData>::Fetch<'w>,)+);
                type Item<'a> = ($(<$t as QueryData>::Item<'a>,)+);

                fn declare(access: &mut AccessSet) {
                    $(
                        <$t as QueryData>::declare(access);
                    )+
                }

                fn fetch(
                    storages: &ComponentStorageAllocator
                ) -> Result<Self::Fetch<'_>, RetrievalError> {
                    Ok(($(<$t as QueryData>::fetch(storages)?,)+))
                }

                fn candidates<'a>(fetch: &'a Self::Fetch<'_>) -> &'a [Entity] {
                    #[allow(non_snake_case)]
                    let ($($t,)+) = fetch;

                    [$(<$t as QueryData>::candidates($t)),+]
                        .into_iter()
                        .min_by_key(|ids| ids.len())
                        .unwrap_or_default()
                }

                unsafe fn get<'a>(
                    fetch: &'a Self::Fetch<'_>,
                    entity: Entity
                ) -> Option<Self::Item<'a>> {
                    #[allow(non_snake_case)]
                    let ($($t,)+) = fetch;

                    Some(($(<$t as QueryData>::get($t, entity)?,)+))
                }
            }
        };
    }

    impl_qd!(T0);
    impl_qd!(T0, T1);
    impl_qd!(T0, T1, T2);
    impl_qd!(T0, T1, T2, T3);
    impl_qd!(T0, T1, T2, T3, T4);
    impl_qd!(T0, T1, T2, T3, T4, T5);
    impl_qd!(T0, T1, T2, T3, T4, T5, T6);
    impl_qd!(T0, T1, T2, T3, T4, T5, T6, T7);
}

/// A reusable query over the component signature `Q`.
pub struct Query<Q: QueryData> {
    access: AccessSet,
    kinds: ComponentSet,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: QueryData> Default for Query<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: QueryData> fmt::Debug for Query<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("access", &self.access).finish()
    }
}

impl<Q: QueryData> Query<Q> {
    pub fn new() -> Self {
        let mut access = AccessSet::new();
        Q::declare(&mut access);
        let kinds = access.iter().map(|decl| decl.kind).collect();

        Self {
            access,
            kinds,
            _marker: PhantomData,
        }
    }

    pub fn access(&self) -> &AccessSet {
        &self.access
    }

    pub fn kinds(&self) -> &ComponentSet {
        &self.kinds
    }

    /// Lazily yields every live entity carrying all of the query's kinds.
    /// Each call re-evaluates against the world as it is now.
    pub fn matching<'w>(&'w self, world: &'w World) -> impl Iterator<Item = Entity> + 'w {
        world.entities().filter(move |&entity| {
            world
                .signature(entity)
                .map_or(false, |signature| signature.is_superset(&self.kinds))
        })
    }

    /// Calls `f` once per matching entity, on the calling thread.
    pub fn for_each<F>(&self, world: &World, mut f: F) -> Result<(), RetrievalError>
    where
        F: for<'a> FnMut(Entity, QueryItem<'a, Q>),
    {
        let fetch = Q::fetch(world.component_storage())?;

        for &entity in Q::candidates(&fetch) {
            // SAFETY: candidates are unique and each item dies before the next.
            if let Some(item) = unsafe { Q::get(&fetch, entity) } {
                f(entity, item);
            }
        }

        Ok(())
    }

    /// Calls `f` once per matching entity, spread over the rayon pool.
    pub fn par_for_each<F>(&self, world: &World, f: F) -> Result<(), RetrievalError>
    where
        F: for<'a> Fn(Entity, QueryItem<'a, Q>) + Send + Sync,
    {
        let fetch = Q::fetch(world.component_storage())?;

        Q::candidates(&fetch).par_iter().for_each(|&entity| {
            // SAFETY: candidates are unique, so no two threads share an entity.
            if let Some(item) = unsafe { Q::get(&fetch, entity) } {
                f(entity, item);
            }
        });

        Ok(())
    }
}
