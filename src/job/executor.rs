use std::any;

use parking_lot::RwLock;
use tracing::error;

use crate::{
    access::{AccessDeclaration, AccessSet},
    component::ComponentKind,
    job::{ForEachJob, StructuralJob},
    world::{query::Query, World},
};

/// A scheduled job with its concrete type erased.
pub(crate) trait Executor: Send {
    fn name(&self) -> &'static str;

    /// Everything the job touches, including the entity-existence kind.
    fn access(&self) -> AccessSet;

    fn run(self: Box<Self>, world: &RwLock<World>);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Mode {
    /// Entities are spread over the rayon pool.
    Parallel,
    /// Entities are visited in order on the worker that picked up the job.
    Single,
}

pub(crate) struct ForEachExecutor<J> {
    job: J,
    mode: Mode,
}

impl<J: ForEachJob> ForEachExecutor<J> {
    pub(crate) fn new(job: J, mode: Mode) -> Self {
        Self { job, mode }
    }
}

impl<J: ForEachJob> Executor for ForEachExecutor<J> {
    fn name(&self) -> &'static str {
        any::type_name::<J>()
    }

    fn access(&self) -> AccessSet {
        Query::<J::Data>::new()
            .access()
            .clone()
            .with(AccessDeclaration::read(ComponentKind::entities()))
    }

    fn run(self: Box<Self>, world: &RwLock<World>) {
        let world = world.read();
        let query = Query::<J::Data>::new();
        let job = &self.job;

        let result = match self.mode {
            Mode::Parallel => query.par_for_each(&world, |entity, data| job.execute(entity, data)),
            Mode::Single => query.for_each(&world, |entity, data| job.execute(entity, data)),
        };

        if let Err(err) = result {
            error!(job = self.name(), %err, "job could not borrow its components");
        }
    }
}

pub(crate) struct StructuralExecutor<J> {
    job: J,
}

impl<J: StructuralJob> StructuralExecutor<J> {
    pub(crate) fn new(job: J) -> Self {
        Self { job }
    }
}

impl<J: StructuralJob> Executor for StructuralExecutor<J> {
    fn name(&self) -> &'static str {
        any::type_name::<J>()
    }

    fn access(&self) -> AccessSet {
        AccessSet::new().with(AccessDeclaration::read_write(ComponentKind::entities()))
    }

    fn run(mut self: Box<Self>, world: &RwLock<World>) {
        let mut world = world.write();

        if let Err(err) = self.job.run(&mut world) {
            error!(job = self.name(), %err, "structural job failed");
        }
    }
}

/// Touches nothing; completes once its dependencies have.
pub(crate) struct Barrier;

impl Executor for Barrier {
    fn name(&self) -> &'static str {
        "barrier"
    }

    fn access(&self) -> AccessSet {
        AccessSet::new()
    }

    fn run(self: Box<Self>, _: &RwLock<World>) {}
}
