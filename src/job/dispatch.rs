//! The job scheduler.
//!
//! Jobs are admitted with explicit dependency handles and a declared access
//! set. A pending job is dispatched to a worker once
//!
//! - every explicit dependency has completed,
//! - no running job holds a conflicting access, and
//! - no job submitted earlier and still pending conflicts with it.
//!
//! The last rule turns access conflicts into implicit edges in submission
//! order, so two conflicting jobs never overlap and always run in the order
//! they were scheduled. Jobs without a path between them may run in any order.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, trace};

use crate::access::AccessSet;
use crate::error::ScheduleError;
use crate::job::executor::{Barrier, Executor, ForEachExecutor, Mode, StructuralExecutor};
use crate::job::{ForEachJob, JobHandle, JobState, StructuralJob};
use crate::world::World;

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(0);

const DEFAULT_THREAD_NAME: &str = "cubecs-worker";

#[derive(Debug, Default)]
pub struct SchedulerBuilder {
    thread_count: Option<usize>,
    thread_name: Option<String>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of worker threads. Defaults to the number of logical CPUs;
    /// zero is treated as one.
    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = Some(thread_count);
        self
    }

    /// Prefix for worker thread names.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn build(self, world: World) -> Result<Scheduler, ScheduleError> {
        let count = self.thread_count.unwrap_or_else(num_cpus::get).max(1);
        let prefix = self
            .thread_name
            .unwrap_or_else(|| DEFAULT_THREAD_NAME.to_owned());

        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(Shared::new(world, sender));

        let mut scheduler = Scheduler {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            shared,
            workers: Vec::with_capacity(count),
        };

        for index in 0..count {
            let worker = Worker::spawn(
                format!("{}-{}", prefix, index),
                &scheduler.shared,
                receiver.clone(),
            )?;
            scheduler.workers.push(worker);
        }

        info!(
            scheduler = scheduler.id,
            workers = count,
            "scheduler started"
        );

        Ok(scheduler)
    }
}

/// Owns the [`World`] and a pool of worker threads that run jobs against it.
pub struct Scheduler {
    id: u64,
    shared: Arc<Shared>,
    workers: Vec<Worker>,
}

impl Scheduler {
    /// A scheduler with default settings.
    pub fn new(world: World) -> Result<Self, ScheduleError> {
        SchedulerBuilder::new().build(world)
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Schedules `job`, splitting its entities across the rayon pool.
    pub fn schedule<J: ForEachJob>(
        &self,
        job: J,
        deps: &[JobHandle],
    ) -> Result<JobHandle, ScheduleError> {
        self.admit(Box::new(ForEachExecutor::new(job, Mode::Parallel)), deps)
    }

    /// Schedules `job` to visit its entities in order on a single worker.
    pub fn schedule_single<J: ForEachJob>(
        &self,
        job: J,
        deps: &[JobHandle],
    ) -> Result<JobHandle, ScheduleError> {
        self.admit(Box::new(ForEachExecutor::new(job, Mode::Single)), deps)
    }

    /// Schedules a job that needs exclusive access to the whole world.
    pub fn schedule_structural<J: StructuralJob>(
        &self,
        job: J,
        deps: &[JobHandle],
    ) -> Result<JobHandle, ScheduleError> {
        self.admit(Box::new(StructuralExecutor::new(job)), deps)
    }

    /// A handle that completes once every handle in `deps` has.
    pub fn combine(&self, deps: &[JobHandle]) -> Result<JobHandle, ScheduleError> {
        self.admit(Box::new(Barrier), deps)
    }

    /// Blocks until the job behind `handle` has completed.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of any job that panicked since the last call to
    /// `complete` or `complete_all`. Must not be called from inside a job.
    pub fn complete(&self, handle: JobHandle) -> Result<(), ScheduleError> {
        self.check_owner(handle)?;

        let mut state = self.shared.state.lock();
        while state.active.contains_key(&handle.id) {
            self.shared.completed.wait(&mut state);
        }

        resume_panic(state);
        Ok(())
    }

    /// Blocks until no job is scheduled or running.
    ///
    /// # Panics
    ///
    /// See [`Scheduler::complete`].
    pub fn complete_all(&self) {
        resume_panic(self.shared.drain());
    }

    pub fn state(&self, handle: JobHandle) -> Result<JobState, ScheduleError> {
        self.check_owner(handle)?;

        let state = self.shared.state.lock();
        Ok(state
            .active
            .get(&handle.id)
            .copied()
            .unwrap_or(JobState::Completed))
    }

    /// Number of jobs that have completed so far. Never decreases.
    pub fn completed_count(&self) -> u64 {
        self.shared.state.lock().completed
    }

    /// Drains all jobs, then hands out shared access to the world.
    pub fn world(&self) -> RwLockReadGuard<'_, World> {
        self.complete_all();
        self.shared.world.read()
    }

    /// Drains all jobs, then hands out exclusive access to the world.
    pub fn world_mut(&self) -> RwLockWriteGuard<'_, World> {
        self.complete_all();
        self.shared.world.write()
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Drains all jobs, stops the workers and returns the world.
    pub fn shutdown(mut self) -> World {
        self.stop_workers();

        let shared = Arc::clone(&self.shared);
        drop(self);

        match Arc::try_unwrap(shared) {
            Ok(shared) => shared.world.into_inner(),
            Err(shared) => mem::take(&mut *shared.world.write()),
        }
    }

    fn admit(
        &self,
        executor: Box<dyn Executor>,
        deps: &[JobHandle],
    ) -> Result<JobHandle, ScheduleError> {
        let mut state = self.shared.state.lock();
        let id = state.next_id;

        let mut waiting_on = Vec::with_capacity(deps.len());
        for &dep in deps {
            self.check_owner(dep)?;

            if dep.id >= id {
                return Err(ScheduleError::CyclicDependency { dependency: dep });
            }

            if state.active.contains_key(&dep.id) {
                waiting_on.push(dep.id);
            }
        }

        state.next_id += 1;

        debug!(
            job = id,
            name = executor.name(),
            deps = waiting_on.len(),
            "job scheduled"
        );

        state.active.insert(id, JobState::Scheduled);
        state.pending.push_back(Pending {
            id,
            deps: waiting_on,
            access: executor.access(),
            executor,
        });

        self.shared.dispatch_ready(&mut state);

        Ok(JobHandle::new(self.id, id))
    }

    fn check_owner(&self, handle: JobHandle) -> Result<(), ScheduleError> {
        if handle.scheduler == self.id {
            Ok(())
        } else {
            Err(ScheduleError::ForeignHandle { handle })
        }
    }

    fn stop_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        // Panics were either reported through `complete` already or nobody
        // is left to report them to.
        drop(self.shared.drain());

        for _ in &self.workers {
            if self.shared.sender.send(Message::Shutdown).is_err() {
                break;
            }
        }

        self.workers.drain(..).for_each(Worker::join);

        info!(scheduler = self.id, "scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();

        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("workers", &self.workers.len())
            .field("pending", &state.pending.len())
            .field("running", &state.running.len())
            .field("completed", &state.completed)
            .finish()
    }
}

fn resume_panic(mut state: MutexGuard<'_, State>) {
    if let Some(payload) = state.panic.take() {
        drop(state);
        panic::resume_unwind(payload);
    }
}

enum Message {
    Run {
        id: u64,
        executor: Box<dyn Executor>,
    },
    Shutdown,
}

struct Pending {
    id: u64,
    deps: Vec<u64>,
    access: AccessSet,
    executor: Box<dyn Executor>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    pending: VecDeque<Pending>,
    /// Jobs that are scheduled or running. Anything older that is missing
    /// here has completed.
    active: HashMap<u64, JobState>,
    running: Vec<(u64, AccessSet)>,
    completed: u64,
    panic: Option<Box<dyn Any + Send>>,
}

struct Shared {
    world: RwLock<World>,
    state: Mutex<State>,
    completed: Condvar,
    sender: Sender<Message>,
}

impl Shared {
    fn new(world: World, sender: Sender<Message>) -> Self {
        Self {
            world: RwLock::new(world),
            state: Mutex::new(State::default()),
            completed: Condvar::new(),
            sender,
        }
    }

    fn drain(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock();
        while !state.active.is_empty() {
            self.completed.wait(&mut state);
        }
        state
    }

    fn dispatch_ready(&self, state: &mut State) {
        let mut index = 0;

        while index < state.pending.len() {
            let ready = {
                let job = &state.pending[index];

                job.deps.iter().all(|dep| !state.active.contains_key(dep))
                    && !state
                        .running
                        .iter()
                        .any(|(_, access)| access.conflicts_with(&job.access))
                    && !state
                        .pending
                        .iter()
                        .take(index)
                        .any(|earlier| earlier.access.conflicts_with(&job.access))
            };

            if !ready {
                index += 1;
                continue;
            }

            let Pending {
                id,
                access,
                executor,
                ..
            } = match state.pending.remove(index) {
                Some(job) => job,
                None => break,
            };

            state.active.insert(id, JobState::Running);
            state.running.push((id, access));

            trace!(job = id, name = executor.name(), "job dispatched");

            if self.sender.send(Message::Run { id, executor }).is_err() {
                error!(job = id, "no worker left to run job");
            }
        }
    }

    fn finish(&self, id: u64, outcome: thread::Result<()>) {
        let mut state = self.state.lock();

        state.active.remove(&id);
        state.running.retain(|(running, _)| *running != id);
        state.completed += 1;

        if let Err(payload) = outcome {
            if state.panic.is_none() {
                state.panic = Some(payload);
            }
        }

        trace!(job = id, "job completed");

        self.dispatch_ready(&mut state);
        drop(state);

        self.completed.notify_all();
    }
}

#[derive(Debug)]
struct Worker {
    join_handle: thread::JoinHandle<()>,
}

impl Worker {
    fn spawn(
        name: String,
        shared: &Arc<Shared>,
        receiver: Receiver<Message>,
    ) -> Result<Self, ScheduleError> {
        let shared = Arc::clone(shared);
        let join_handle = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(shared, receiver))?;

        Ok(Self { join_handle })
    }

    fn run(shared: Arc<Shared>, receiver: Receiver<Message>) {
        while let Ok(message) = receiver.recv() {
            let (id, executor) = match message {
                Message::Run { id, executor } => (id, executor),
                Message::Shutdown => return,
            };

            let job_name = executor.name();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.run(&shared.world)));

            if let Err(payload) = &outcome {
                error!(
                    job = id,
                    name = job_name,
                    message = %panic_message(payload.as_ref()),
                    "job panicked"
                );
            }

            shared.finish(id, outcome);
        }
    }

    fn join(self) {
        let name = self
            .join_handle
            .thread()
            .name()
            .unwrap_or("<unnamed>")
            .to_owned();

        if let Err(payload) = self.join_handle.join() {
            error!(
                thread = %name,
                message = %panic_message(payload.as_ref()),
                "worker thread panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(&msg) = payload.downcast_ref::<&str>() {
        msg.to_owned()
    } else {
        "Box<dyn Any + Send>".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::world::query::{QueryItem, Read, Write};

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Counter(u32);

    struct Increment;

    impl ForEachJob for Increment {
        type Data = (Write<Counter>,);

        fn execute(&self, _: Entity, (counter,): QueryItem<'_, Self::Data>) {
            counter.0 += 1;
        }
    }

    struct Observe;

    impl ForEachJob for Observe {
        type Data = (Read<Counter>,);

        fn execute(&self, _: Entity, _: QueryItem<'_, Self::Data>) {}
    }

    fn scheduler() -> Scheduler {
        let mut world = World::new();
        world.create_iter((0..8).map(|_| (Counter(0),)));
        SchedulerBuilder::new()
            .with_threads(2)
            .build(world)
            .expect("workers start")
    }

    #[test]
    fn forward_handle_is_a_cycle() {
        let scheduler = scheduler();
        let first = scheduler.schedule(Increment, &[]).expect("admitted");

        let future = JobHandle::new(first.scheduler, first.id + 1);
        assert!(matches!(
            scheduler.schedule(Increment, &[future]),
            Err(ScheduleError::CyclicDependency { dependency }) if dependency == future
        ));

        // The rejected call must not have consumed an id.
        let second = scheduler.schedule(Increment, &[first]).expect("admitted");
        assert_eq!(second, future);
        scheduler.complete(second).expect("own handle");
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let a = scheduler();
        let b = scheduler();
        let handle = a.schedule(Observe, &[]).expect("admitted");

        assert!(matches!(
            b.schedule(Observe, &[handle]),
            Err(ScheduleError::ForeignHandle { .. })
        ));
        assert!(b.complete(handle).is_err());
        a.complete(handle).expect("own handle");
    }

    #[test]
    fn states_end_completed() {
        let scheduler = scheduler();
        let handle = scheduler.schedule_single(Increment, &[]).expect("admitted");
        scheduler.complete(handle).expect("own handle");

        assert_eq!(scheduler.state(handle).expect("own handle"), JobState::Completed);
        assert_eq!(scheduler.completed_count(), 1);
    }

    #[test]
    fn shutdown_returns_world() {
        let scheduler = scheduler();
        for _ in 0..3 {
            scheduler.schedule(Increment, &[]).expect("admitted");
        }

        let world = scheduler.shutdown();
        let mut total = 0;
        crate::world::query::Query::<(Read<Counter>,)>::new()
            .for_each(&world, |_, (counter,)| total += counter.0)
            .expect("no conflicting borrows");
        assert_eq!(total, 8 * 3);
    }

    #[test]
    fn panic_resurfaces_in_complete() {
        struct Boom;

        impl ForEachJob for Boom {
            type Data = (Read<Counter>,);

            fn execute(&self, _: Entity, _: QueryItem<'_, Self::Data>) {
                panic!("boom");
            }
        }

        let scheduler = scheduler();
        let handle = scheduler.schedule_single(Boom, &[]).expect("admitted");

        let caught = panic::catch_unwind(AssertUnwindSafe(|| scheduler.complete(handle)));
        assert!(caught.is_err());

        // The job still completed and the scheduler keeps working.
        assert_eq!(scheduler.state(handle).expect("own handle"), JobState::Completed);
        let next = scheduler.schedule(Increment, &[handle]).expect("admitted");
        scheduler.complete(next).expect("own handle");
    }
}
