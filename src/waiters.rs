//! # Waiter Lists
//!
//! FIFO list of tasks blocked on a semaphore or mutex. Links are threaded
//! through [`Task::next_waiter`], so a list is just a head and a tail index
//! and a task can be on at most one list at a time.

use crate::task::{Task, TaskId, TaskState, TaskStatus};

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WaitList {
    first: Option<TaskId>,
    last: Option<TaskId>,
}

impl WaitList {
    pub(crate) const fn new() -> Self {
        Self { first: None, last: None }
    }

    #[cfg(test)]
    pub(crate) fn first(&self) -> Option<TaskId> {
        self.first
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    pub(crate) fn contains(&self, tasks: &[Task], id: TaskId) -> bool {
        self.iter(tasks).any(|t| t == id)
    }

    pub(crate) fn iter<'a>(&self, tasks: &'a [Task]) -> impl Iterator<Item = TaskId> + 'a {
        let mut cur = self.first;
        core::iter::from_fn(move || {
            let id = cur?;
            cur = tasks[id.index()].next_waiter;
            Some(id)
        })
    }

    /// Append `id` at the tail.
    ///
    /// With `tms == 0` the task is only marked `Timeout` and stays runnable;
    /// the caller must not actually block. Otherwise the task goes to sleep
    /// for `tms` ticks (negative: until woken) with its status pending.
    pub(crate) fn add(&mut self, tasks: &mut [Task], id: TaskId, tms: i32) {
        debug_assert!(!self.contains(tasks, id), "task already waiting");

        match self.last {
            Some(last) if self.first.is_some() => tasks[last.index()].next_waiter = Some(id),
            _ => self.first = Some(id),
        }
        self.last = Some(id);

        let task = &mut tasks[id.index()];
        task.next_waiter = None;
        if tms == 0 {
            task.status = TaskStatus::Timeout;
        } else {
            task.block(tms);
        }
    }

    /// Unlink `id` wherever it is in the list. No-op if it is not queued,
    /// which is the case when a waker already took it off the head.
    pub(crate) fn remove(&mut self, tasks: &mut [Task], id: TaskId) {
        let mut prev: Option<TaskId> = None;
        let mut cur = self.first;

        while let Some(t) = cur {
            let next = tasks[t.index()].next_waiter;
            if t == id {
                match prev {
                    Some(p) => tasks[p.index()].next_waiter = next,
                    None => self.first = next,
                }
                if self.last == Some(id) {
                    self.last = prev;
                }
                tasks[t.index()].next_waiter = None;
                return;
            }
            prev = cur;
            cur = next;
        }
    }

    /// Wake the head of the list if it is still blocked.
    ///
    /// A head that is no longer sleeping (its timeout already fired and it
    /// has not run yet to unlink itself) is left in place and nothing is
    /// woken. Returns the woken task; the caller reschedules.
    pub(crate) fn wake_first(&mut self, tasks: &mut [Task]) -> Option<TaskId> {
        let id = self.first?;
        let task = &mut tasks[id.index()];

        if task.state != TaskState::Sleep {
            return None;
        }

        self.first = task.next_waiter;
        if self.first.is_none() {
            self.last = None;
        }
        task.next_waiter = None;
        task.wake(TaskStatus::Ok);

        Some(id)
    }
}
