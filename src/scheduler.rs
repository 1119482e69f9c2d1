//! Cooperative task scheduler
//!
//! The stack runs application code from a small table of tasks. Each task is
//! a function that does some work and returns when it wants to run again.
//! [`Scheduler`] models that table: tasks are identified by a small `Copy`
//! value chosen by the application, added with a [`Schedule`], and handed back
//! by [`Scheduler::poll`] once they are due.
//!
//! Polling is non-blocking. Use it with `nb::block!` in a busy loop, or sleep
//! until [`Scheduler::next_due`] between polls.

use core::convert::Infallible;

use heapless::Vec;
use log::trace;

use crate::{
    time::{Duration, Instant},
    Error,
};


/// When a task wants to run next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// As soon as possible
    Asap,
    /// After the given time has passed
    After(Duration),
    /// Not until it is added again
    Stop,
}

impl Schedule {
    /// Run again after `ms` milliseconds
    pub fn after_ms(ms: u32) -> Self {
        Schedule::After(Duration::from_millis(ms))
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot<T> {
    task: T,
    due:  Instant,
}

/// A fixed-capacity table of up to `N` tasks
#[derive(Debug)]
pub struct Scheduler<T, const N: usize> {
    slots: Vec<Slot<T>, N>,
}

impl<T, const N: usize> Scheduler<T, N>
    where T: Copy + PartialEq + core::fmt::Debug
{
    /// Creates an empty scheduler
    pub const fn new() -> Self {
        Scheduler { slots: Vec::new() }
    }

    /// Adds `task`, or changes when it runs if it is already scheduled
    ///
    /// [`Schedule::Stop`] cancels the task.
    pub fn add_task(&mut self, task: T, schedule: Schedule, now: Instant)
        -> Result<(), Error>
    {
        let due = match schedule {
            Schedule::Asap => now,
            Schedule::After(delay) => now + delay,
            Schedule::Stop => {
                self.cancel_task(task);
                return Ok(());
            }
        };

        trace!("schedule {:?} at {}us", task, due.value());

        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.task == task) {
            slot.due = due;
            return Ok(());
        }

        self.slots
            .push(Slot { task, due })
            .map_err(|_| Error::SchedulerFull)
    }

    /// Removes `task` from the table, if present
    pub fn cancel_task(&mut self, task: T) {
        self.slots.retain(|slot| slot.task != task);
    }

    /// Whether `task` is waiting to run
    pub fn is_scheduled(&self, task: T) -> bool {
        self.slots.iter().any(|slot| slot.task == task)
    }

    /// The earliest time a task is due
    pub fn next_due(&self) -> Option<Instant> {
        self.slots.iter().map(|slot| slot.due).min()
    }

    /// Takes the most overdue task out of the table
    ///
    /// Returns `WouldBlock` if no task is due at `now`. The caller runs the
    /// task and puts it back with the [`Schedule`] it returned.
    pub fn poll(&mut self, now: Instant) -> nb::Result<T, Infallible> {
        let index = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.due <= now)
            .min_by_key(|(_, slot)| slot.due)
            .map(|(index, _)| index)
            .ok_or(nb::Error::<Infallible>::WouldBlock)?;

        // Keep insertion order of the remaining tasks for equal deadlines
        Ok(self.slots.remove(index).task)
    }
}

impl<T, const N: usize> Default for Scheduler<T, N>
    where T: Copy + PartialEq + core::fmt::Debug
{
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Task {
        A,
        B,
        C,
    }

    fn at_ms(ms: u32) -> Instant {
        Instant::default() + Duration::from_millis(ms)
    }

    #[test]
    fn tasks_come_back_in_deadline_order() {
        let mut scheduler = Scheduler::<Task, 4>::new();
        scheduler.add_task(Task::A, Schedule::after_ms(30), at_ms(0)).unwrap();
        scheduler.add_task(Task::B, Schedule::after_ms(10), at_ms(0)).unwrap();
        scheduler.add_task(Task::C, Schedule::after_ms(20), at_ms(0)).unwrap();

        assert_eq!(scheduler.next_due(), Some(at_ms(10)));
        assert_eq!(scheduler.poll(at_ms(5)), Err(nb::Error::WouldBlock));
        assert_eq!(scheduler.poll(at_ms(50)), Ok(Task::B));
        assert_eq!(scheduler.poll(at_ms(50)), Ok(Task::C));
        assert_eq!(scheduler.poll(at_ms(50)), Ok(Task::A));
        assert_eq!(scheduler.poll(at_ms(50)), Err(nb::Error::WouldBlock));
    }

    #[test]
    fn adding_again_reschedules() {
        let mut scheduler = Scheduler::<Task, 1>::new();
        scheduler.add_task(Task::A, Schedule::after_ms(100), at_ms(0)).unwrap();
        scheduler.add_task(Task::A, Schedule::Asap, at_ms(1)).unwrap();

        assert_eq!(scheduler.poll(at_ms(1)), Ok(Task::A));
    }

    #[test]
    fn stop_cancels() {
        let mut scheduler = Scheduler::<Task, 2>::new();
        scheduler.add_task(Task::A, Schedule::Asap, at_ms(0)).unwrap();
        scheduler.add_task(Task::A, Schedule::Stop, at_ms(0)).unwrap();

        assert!(!scheduler.is_scheduled(Task::A));
        assert_eq!(scheduler.next_due(), None);
    }

    #[test]
    fn full_table_is_an_error() {
        let mut scheduler = Scheduler::<Task, 1>::new();
        scheduler.add_task(Task::A, Schedule::Asap, at_ms(0)).unwrap();

        match scheduler.add_task(Task::B, Schedule::Asap, at_ms(0)) {
            Err(Error::SchedulerFull) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
