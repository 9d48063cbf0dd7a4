use std::collections::HashMap;

use crate::component::ComponentKind;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum Access {
    Read,
    ReadWrite,
}

impl Access {
    pub fn is_write(self) -> bool {
        self == Access::ReadWrite
    }
}

/// One component kind and how a job touches it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct AccessDeclaration {
    pub kind: ComponentKind,
    pub access: Access,
}

impl AccessDeclaration {
    pub fn read(kind: ComponentKind) -> Self {
        Self {
            kind,
            access: Access::Read,
        }
    }

    pub fn read_write(kind: ComponentKind) -> Self {
        Self {
            kind,
            access: Access::ReadWrite,
        }
    }

    /// Same kind, and at least one side writes.
    pub fn conflicts_with(&self, other: &AccessDeclaration) -> bool {
        self.kind == other.kind && (self.access.is_write() || other.access.is_write())
    }
}

/// Everything a job declares it will touch. A kind appears at most once;
/// declaring it again keeps the stronger access.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct AccessSet {
    kinds: HashMap<ComponentKind, Access>,
}

impl AccessSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, declaration: AccessDeclaration) {
        let access = self
            .kinds
            .entry(declaration.kind)
            .or_insert(declaration.access);

        if declaration.access > *access {
            *access = declaration.access;
        }
    }

    pub fn with(mut self, declaration: AccessDeclaration) -> Self {
        self.declare(declaration);
        self
    }

    pub fn access_of(&self, kind: &ComponentKind) -> Option<Access> {
        self.kinds.get(kind).copied()
    }

    pub fn conflicts_with(&self, other: &AccessSet) -> bool {
        let (small, large) = if self.kinds.len() <= other.kinds.len() {
            (self, other)
        } else {
            (other, self)
        };

        small.kinds.iter().any(|(kind, access)| {
            large
                .kinds
                .get(kind)
                .map_or(false, |other| access.is_write() || other.is_write())
        })
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = AccessDeclaration> + '_ {
        self.kinds
            .iter()
            .map(|(&kind, &access)| AccessDeclaration { kind, access })
    }
}

impl FromIterator<AccessDeclaration> for AccessSet {
    fn from_iter<I: IntoIterator<Item = AccessDeclaration>>(iter: I) -> Self {
        let mut set = AccessSet::new();
        iter.into_iter().for_each(|decl| set.declare(decl));
        set
    }
}
