use std::io;

use crate::{entity::Entity, job::JobHandle};

/// Errors from entity and component operations on a [`World`](crate::World).
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum EcsError {
    /// The handle's generation no longer matches the live one at its index.
    #[error("entity {entity} does not exist (stale or never allocated)")]
    StaleEntity { entity: Entity },

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

/// Errors from [`Scheduler`](crate::Scheduler) calls.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The dependency was not issued before the job being scheduled, so
    /// waiting on it would mean waiting on the job itself.
    #[error("dependency on {dependency:?} would create a wait cycle")]
    CyclicDependency { dependency: JobHandle },

    #[error("{handle:?} was issued by a different scheduler")]
    ForeignHandle { handle: JobHandle },

    #[error("failed to spawn scheduler worker thread")]
    WorkerSpawn(#[from] io::Error),
}

/// Failure to borrow a component store for a query.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, thiserror::Error)]
pub enum RetrievalError {
    #[error("component storage `{kind}` is already borrowed")]
    StorageInUse { kind: &'static str },
}
