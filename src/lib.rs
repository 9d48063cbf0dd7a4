#![deny(missing_debug_implementations)]

pub use access::{Access, AccessDeclaration, AccessSet};
pub use component::{Component, ComponentKind, ComponentSet, ComponentTuple};
pub use entity::Entity;
pub use error::{EcsError, RetrievalError, ScheduleError};
pub use job::{
    dispatch::{Scheduler, SchedulerBuilder},
    ForEachJob, JobHandle, JobState, StructuralJob,
};
pub use system::{System, Systems};
pub use world::{
    query::{Query, QueryData, QueryItem, Read, Write},
    World,
};

pub mod access;
pub mod cell;
pub mod component;
pub mod cubes;
pub mod entity;
pub mod error;
pub mod job;
pub mod storage;
pub mod system;
pub mod world;
