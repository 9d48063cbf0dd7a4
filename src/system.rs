use std::{any, fmt};

use tracing::error;

use crate::{error::ScheduleError, job::dispatch::Scheduler, job::JobHandle};

/// Produces a tick's jobs.
///
/// `update` is called once per tick by [`Systems::tick`] with the frame's
/// delta time. It schedules whatever it needs and returns the handle the tick
/// should wait on, or `None` if it scheduled nothing.
pub trait System: Send {
    fn name(&self) -> &'static str {
        any::type_name::<Self>()
    }

    fn update(
        &mut self,
        scheduler: &Scheduler,
        delta_time: f32,
    ) -> Result<Option<JobHandle>, ScheduleError>;
}

/// An ordered list of systems run once per tick.
#[derive(Default)]
pub struct Systems {
    systems: Vec<Box<dyn System>>,
}

impl Systems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system<S: System + 'static>(mut self, system: S) -> Self {
        self.push(system);
        self
    }

    pub fn push<S: System + 'static>(&mut self, system: S) {
        self.systems.push(Box::new(system));
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Runs one tick: every system in order, then waits until all jobs,
    /// including ones the systems did not return handles for, have completed.
    ///
    /// The scheduler is drained even if a system fails to schedule.
    pub fn tick(&mut self, scheduler: &Scheduler, delta_time: f32) -> Result<(), ScheduleError> {
        let mut handles = Vec::with_capacity(self.systems.len());
        let mut failure = None;

        for system in &mut self.systems {
            match system.update(scheduler, delta_time) {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
                Err(err) => {
                    error!(system = system.name(), %err, "system failed to schedule");
                    failure = Some(err);
                    break;
                }
            }
        }

        let combined = scheduler.combine(&handles);
        let waited = combined.and_then(|handle| scheduler.complete(handle));
        scheduler.complete_all();

        match failure {
            Some(err) => Err(err),
            None => waited,
        }
    }
}

impl fmt::Debug for Systems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.systems.iter().map(|system| system.name()))
            .finish()
    }
}
