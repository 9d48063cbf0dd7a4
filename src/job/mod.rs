use std::fmt;

use crate::{
    entity::Entity,
    error::EcsError,
    world::{
        query::{QueryData, QueryItem},
        World,
    },
};

pub mod dispatch;
pub mod executor;

/// Per-entity work over the entities matching `Data`.
///
/// Job-local inputs such as the frame's delta time live in the implementing
/// struct. `execute` must be total over valid component views: there is no
/// failure path, and a panic is treated as a defect.
pub trait ForEachJob: Send + Sync + 'static {
    type Data: QueryData;

    fn execute(&self, entity: Entity, data: QueryItem<'_, Self::Data>);
}

/// A job that creates or destroys entities, or adds and removes components.
///
/// Structural jobs get the whole world and never overlap with any other job.
pub trait StructuralJob: Send + 'static {
    fn run(&mut self, world: &mut World) -> Result<(), EcsError>;
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum JobState {
    Scheduled,
    Running,
    Completed,
}

/// Completion token for a scheduled job, used only as a dependency edge.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub(crate) scheduler: u64,
    pub(crate) id: u64,
}

impl JobHandle {
    pub(crate) fn new(scheduler: u64, id: u64) -> Self {
        Self { scheduler, id }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobHandle({}#{})", self.scheduler, self.id)
    }
}
