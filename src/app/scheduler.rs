use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Reschedule,
    Done,
}

/// Periodic work owned by the foreground context.
pub trait ForegroundTask {
    fn interval(&self) -> Duration;
    fn run(&mut self) -> TaskControl;
}

struct Slot<T> {
    task: T,
    next_due: Instant,
}

/// Single-threaded cooperative timer loop, the moral equivalent of a GUI
/// toolkit's `after(ms, callback)`. Tasks run only from `run_due`, so whatever
/// they own never leaves the calling thread.
pub struct ForegroundScheduler<T: ForegroundTask> {
    slots: Vec<Slot<T>>,
}

impl<T: ForegroundTask> ForegroundScheduler<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn schedule(&mut self, task: T, first_due: Instant) {
        self.slots.push(Slot {
            task,
            next_due: first_due,
        });
    }

    /// Runs every task whose deadline has passed. Finished tasks are dropped.
    /// Returns how many tasks ran.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut ran = 0usize;
        let mut index = 0usize;
        while index < self.slots.len() {
            if self.slots[index].next_due > now {
                index += 1;
                continue;
            }
            ran += 1;
            let slot = &mut self.slots[index];
            match slot.task.run() {
                TaskControl::Reschedule => {
                    slot.next_due = now + slot.task.interval();
                    index += 1;
                }
                TaskControl::Done => {
                    self.slots.remove(index);
                }
            }
        }
        ran
    }

    /// Runs every task once regardless of its deadline. Used while tearing down.
    pub fn run_all(&mut self, now: Instant) -> usize {
        for slot in &mut self.slots {
            slot.next_due = now;
        }
        self.run_due(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().map(|slot| slot.next_due).min()
    }

    pub fn find_mut(&mut self, predicate: impl Fn(&T) -> bool) -> Option<&mut T> {
        self.slots
            .iter_mut()
            .map(|slot| &mut slot.task)
            .find(|task| predicate(task))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T: ForegroundTask> Default for ForegroundScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
