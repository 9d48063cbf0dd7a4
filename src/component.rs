use std::{
    any::{self, TypeId},
    collections::HashSet,
    fmt,
    hash::{Hash, Hasher},
};

use crate::{entity::Entity, storage::ComponentStorageAllocator};

pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Identifies a component type at runtime.
///
/// Equality and hashing only look at the `TypeId`; the name is carried along
/// for logs and error messages.
#[derive(Clone, Copy)]
pub struct ComponentKind {
    id: TypeId,
    name: &'static str,
}

/// Stand-in kind for "which entities exist". Jobs that iterate read it,
/// jobs that create or destroy entities write it.
struct EntityExistence;

impl ComponentKind {
    pub fn of<T: Component>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    pub fn entities() -> Self {
        Self {
            id: TypeId::of::<EntityExistence>(),
            name: "entities",
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentKind {}

impl Hash for ComponentKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name)
    }
}

/// The set of component kinds carried by one entity or requested by a query.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ComponentSet {
    kinds: HashSet<ComponentKind>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ComponentKind) -> bool {
        self.kinds.insert(kind)
    }

    pub fn remove(&mut self, kind: &ComponentKind) -> bool {
        self.kinds.remove(kind)
    }

    pub fn contains(&self, kind: &ComponentKind) -> bool {
        self.kinds.contains(kind)
    }

    pub fn is_superset(&self, other: &ComponentSet) -> bool {
        self.kinds.is_superset(&other.kinds)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn clear(&mut self) {
        self.kinds.clear()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentKind> {
        self.kinds.iter()
    }
}

impl FromIterator<ComponentKind> for ComponentSet {
    fn from_iter<I: IntoIterator<Item = ComponentKind>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

/// A tuple of components that can be attached to an entity in one call.
pub trait ComponentTuple: self::sealed::ComponentTupleSealed + 'static {
    /// Stores every component for `entity`, overwriting existing values,
    /// and records the kinds in `signature`.
    fn store(
        self,
        entity: Entity,
        allocator: &mut ComponentStorageAllocator,
        signature: &mut ComponentSet,
    );
}

mod sealed {
    use super::*;

    pub trait ComponentTupleSealed {}

    // Unit attaches nothing.
    impl ComponentTupleSealed for () {}

    impl ComponentTuple for () {
        fn store(self, _: Entity, _: &mut ComponentStorageAllocator, _: &mut ComponentSet) {}
    }

    macro_rules! impl_ct {
        ($($t:tt),+) => {
            impl<$($t),+> ComponentTupleSealed for ($($t,)+)
            where
                $(
                    $t: Component,
                )+
            {}

            impl<$($t),+> ComponentTuple for ($($t,)+)
            where
                $(
                    $t: Component,
                )+
            {
                fn store(
                    self,
                    entity: Entity,
                    allocator: &mut ComponentStorageAllocator,
                    signature: &mut ComponentSet,
                ) {
                    #[allow(non_snake_case)]
                    let ($($t,)+) = self;

                    $(
                        allocator.get_mut_or_register::<$t>().insert(entity, $t);
                        signature.insert(ComponentKind::of::<$t>());
                    )+
                }
            }
        };
    }

    impl_ct!(T0);
    impl_ct!(T0, T1);
    impl_ct!(T0, T1, T2);
    impl_ct!(T0, T1, T2, T3);
    impl_ct!(T0, T1, T2, T3, T4);
    impl_ct!(T0, T1, T2, T3, T4, T5);
    impl_ct!(T0, T1, T2, T3, T4, T5, T6);
    impl_ct!(T0, T1, T2, T3, T4, T5, T6, T7);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Speed;

    #[test]
    fn kinds_compare_by_type() {
        assert_eq!(ComponentKind::of::<Speed>(), ComponentKind::of::<Speed>());
        assert_ne!(ComponentKind::of::<Speed>(), ComponentKind::of::<u32>());
        assert_ne!(ComponentKind::of::<Speed>(), ComponentKind::entities());
        assert!(ComponentKind::of::<Speed>().name().ends_with("Speed"));
    }

    #[test]
    fn superset_check() {
        let small: ComponentSet = [ComponentKind::of::<u8>()].into_iter().collect();
        let large: ComponentSet = [ComponentKind::of::<u8>(), ComponentKind::of::<u16>()]
            .into_iter()
            .collect();

        assert!(large.is_superset(&small));
        assert!(!small.is_superset(&large));
        assert!(small.is_superset(&ComponentSet::new()));
    }
}
