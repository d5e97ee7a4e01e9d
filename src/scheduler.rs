//! # Scheduler
//!
//! Fixed-priority preemptive scheduling for BMOS.
//!
//! ## Ready List
//!
//! Every task lives on one singly-linked list ordered by descending
//! priority. A new task is spliced in before the first task of strictly
//! lower priority, so tasks of equal priority keep their creation order.
//! Tasks are never removed; sleeping and exited tasks are skipped.
//!
//! ## Scheduling Decision
//!
//! [`Scheduler::schedule`] walks the list from the head and takes the first
//! runnable task. If the current task is runnable and belongs to that same
//! priority band, the next runnable task after it within the band is
//! preferred instead (wrapping to the band's first runnable task), which
//! gives round-robin among equal-priority tasks without reordering the
//! list. A different choice is recorded as `next` and the port's
//! asynchronous switch is pended; the switch itself happens later in
//! [`Scheduler::switch`].
//!
//! ## Tick
//!
//! [`Scheduler::periodic`] counts down every timed sleep, wakes the tasks
//! whose countdown expires with a `Timeout` status, and reschedules.

use heapless::Vec;

use crate::arch::{Port, StackPtr};
use crate::config::MAX_TASKS;
use crate::task::{Task, TaskId, TaskInfo};

/// Scheduling statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedInfo {
    /// Total µs spent deciding in `schedule()`.
    pub tot: u32,
    /// Longest single `schedule()` call in µs.
    pub max: u32,
    /// Context switches actually performed.
    pub count_switch: u32,
    /// `schedule()` calls.
    pub count_sched: u32,
}

impl SchedInfo {
    const fn new() -> Self {
        Self { tot: 0, max: 0, count_switch: 0, count_sched: 0 }
    }
}

/// Task table, ready list and the current/next pair.
pub struct Scheduler {
    pub(crate) tasks: Vec<Task, MAX_TASKS>,
    /// Head of the ready list.
    pub(crate) ready: Option<TaskId>,
    pub(crate) current: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
    /// Ticks since start.
    pub(crate) ticks: u32,
    pub(crate) info: SchedInfo,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            ready: None,
            current: None,
            next: None,
            ticks: 0,
            info: SchedInfo::new(),
        }
    }

    #[inline]
    pub(crate) fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    #[inline]
    pub(crate) fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id.index()]
    }

    /// The running task. Blocking and ownership checks are meaningless
    /// before `task_start()`, so asking for it earlier is a fatal error.
    pub(crate) fn current_id(&self) -> TaskId {
        match self.current {
            Some(id) => id,
            None => panic!("no current task: scheduler not started"),
        }
    }

    /// Add a task to the table and splice it into the ready list.
    pub(crate) fn add(&mut self, task: Task) -> Result<TaskId, Task> {
        let id = TaskId(self.tasks.len() as u16);
        self.tasks.push(task)?;
        self.insert_ready(id);
        Ok(id)
    }

    fn insert_ready(&mut self, id: TaskId) {
        let prio = self.task(id).priority;
        let mut prev: Option<TaskId> = None;
        let mut cur = self.ready;

        while let Some(c) = cur {
            if prio > self.task(c).priority {
                break;
            }
            prev = cur;
            cur = self.task(c).next;
        }

        self.task_mut(id).next = cur;
        match prev {
            Some(p) => self.task_mut(p).next = Some(id),
            None => self.ready = Some(id),
        }
    }

    /// Tasks in ready-list order.
    pub(crate) fn ready_order(&self) -> impl Iterator<Item = TaskId> + '_ {
        let mut cur = self.ready;
        core::iter::from_fn(move || {
            let id = cur?;
            cur = self.task(id).next;
            Some(id)
        })
    }

    /// Choose the task that should run now.
    fn pick_next(&self) -> Option<TaskId> {
        let first = self.ready_order().find(|&id| self.task(id).is_runnable())?;
        let prio = self.task(first).priority;

        if let Some(cur) = self.current {
            let c = self.task(cur);
            if c.is_runnable() && c.priority == prio {
                let mut n = c.next;
                while let Some(id) = n {
                    let t = self.task(id);
                    if t.priority != prio {
                        break;
                    }
                    if t.is_runnable() {
                        return Some(id);
                    }
                    n = t.next;
                }
            }
        }

        Some(first)
    }

    /// Decide which task runs next and pend a switch if it is not the
    /// current one.
    pub(crate) fn schedule<P: Port>(&mut self, port: &P) {
        let start = port.now_us();

        if let Some(t) = self.pick_next() {
            if Some(t) != self.current {
                self.next = Some(t);
                port.pend_switch();
            } else {
                // A switch pended earlier is no longer wanted.
                self.next = None;
            }
        }

        let diff = port.now_us().wrapping_sub(start);
        self.info.tot = self.info.tot.wrapping_add(diff);
        self.info.max = self.info.max.max(diff);
        self.info.count_sched = self.info.count_sched.wrapping_add(1);
    }

    /// Periodic tick: expire sleep countdowns, then reschedule.
    pub(crate) fn periodic<P: Port>(&mut self, port: &P) {
        self.ticks = self.ticks.wrapping_add(1);

        for task in self.tasks.iter_mut() {
            task.tick();
        }

        self.schedule(port);
    }

    /// Switch hand-off: save the outgoing task's stack pointer, make `next`
    /// current and return its stack pointer. With no switch pending the
    /// current task keeps running.
    pub(crate) fn switch<P: Port>(&mut self, port: &P, sp: StackPtr) -> StackPtr {
        let Some(next) = self.next.take() else {
            return sp;
        };

        let now = port.now_us();
        let next_name = self.task(next).name;

        if let Some(cur) = self.current {
            let t = self.task_mut(cur);
            t.sp = sp;
            t.time = t.time.wrapping_add(now.wrapping_sub(t.start));
            log::trace!("task switch '{}' -> '{}'", t.name, next_name);
        }

        let t = self.task_mut(next);
        t.start = now;
        let sp = t.sp;

        self.current = Some(next);
        self.info.count_switch = self.info.count_switch.wrapping_add(1);

        sp
    }

    pub(crate) fn task_infos(&self) -> Vec<TaskInfo, MAX_TASKS> {
        self.tasks.iter().map(Task::info).collect()
    }

    pub(crate) fn reset_times(&mut self) {
        for task in self.tasks.iter_mut() {
            task.time = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::arch::mock::MockPort;
    use crate::arch::StackRegion;
    use crate::task::{TaskState, TaskStatus};
    use core::ptr::NonNull;
    use quickcheck_macros::quickcheck;
    use std::vec::Vec as StdVec;

    fn task(name: &'static str, priority: u8) -> Task {
        let stack = unsafe { StackRegion::new(NonNull::dangling(), 0) };
        Task::new(name, priority, StackPtr::null(), stack)
    }

    fn add(s: &mut Scheduler, name: &'static str, priority: u8) -> TaskId {
        s.add(task(name, priority)).ok().unwrap()
    }

    fn names(s: &Scheduler) -> StdVec<&'static str> {
        s.ready_order().map(|id| s.task(id).name).collect()
    }

    /// Schedule and immediately take the pended switch, as the port would.
    fn step(s: &mut Scheduler, port: &MockPort) -> TaskId {
        s.schedule(port);
        s.switch(port, StackPtr::null());
        s.current.unwrap()
    }

    #[test]
    fn test_ready_list_order() {
        let mut s = Scheduler::new();
        add(&mut s, "a1", 1);
        add(&mut s, "c5", 5);
        add(&mut s, "b3", 3);
        add(&mut s, "a1'", 1);
        add(&mut s, "c5'", 5);
        add(&mut s, "idle", 0);
        assert_eq!(names(&s), ["c5", "c5'", "b3", "a1", "a1'", "idle"]);
    }

    #[quickcheck]
    fn prop_ready_list_sorted_and_stable(prios: StdVec<u8>) -> bool {
        let mut s = Scheduler::new();
        let prios: StdVec<u8> = prios.into_iter().take(MAX_TASKS).collect();
        for &p in &prios {
            s.add(task("t", p)).ok().unwrap();
        }

        let order: StdVec<TaskId> = s.ready_order().collect();
        if order.len() != prios.len() {
            return false;
        }
        // Non-increasing priority, and creation order within a band.
        order.windows(2).all(|w| {
            let (a, b) = (s.task(w[0]), s.task(w[1]));
            a.priority > b.priority || (a.priority == b.priority && w[0].index() < w[1].index())
        })
    }

    #[test]
    fn test_table_full() {
        let mut s = Scheduler::new();
        for _ in 0..MAX_TASKS {
            add(&mut s, "t", 1);
        }
        assert!(s.add(task("extra", 1)).is_err());
        assert_eq!(s.ready_order().count(), MAX_TASKS);
    }

    #[test]
    fn test_highest_priority_runs() {
        let port = MockPort::default();
        let mut s = Scheduler::new();
        let idle = add(&mut s, "idle", 0);
        let hi = add(&mut s, "hi", 4);
        add(&mut s, "lo", 2);

        s.current = Some(idle);
        assert_eq!(step(&mut s, &port), hi);
        assert_eq!(port.pends.get(), 1);

        // Already running the right task: nothing is pended.
        s.schedule(&port);
        assert_eq!(port.pends.get(), 1);
        assert_eq!(s.next, None);
    }

    #[test]
    fn test_sleeping_tasks_are_skipped() {
        let port = MockPort::default();
        let mut s = Scheduler::new();
        let idle = add(&mut s, "idle", 0);
        let hi = add(&mut s, "hi", 4);
        let lo = add(&mut s, "lo", 2);

        s.current = Some(hi);
        s.task_mut(hi).block(-1);
        assert_eq!(step(&mut s, &port), lo);
        s.task_mut(lo).block(-1);
        assert_eq!(step(&mut s, &port), idle);
    }

    #[test]
    fn test_round_robin_visits_each_task_once() {
        let port = MockPort::default();
        let mut s = Scheduler::new();
        add(&mut s, "idle", 0);
        let band: StdVec<TaskId> = ["a", "b", "c", "d"].iter().map(|n| add(&mut s, *n, 3)).collect();
        add(&mut s, "low", 1);

        s.current = Some(band[0]);
        let mut seen: StdVec<TaskId> = (0..band.len()).map(|_| step(&mut s, &port)).collect();
        assert_eq!(seen, [band[1], band[2], band[3], band[0]]);

        seen.sort_by_key(|id| id.index());
        assert_eq!(seen, band);
    }

    #[test]
    fn test_round_robin_skips_sleeping_peer() {
        let port = MockPort::default();
        let mut s = Scheduler::new();
        let a = add(&mut s, "a", 3);
        let b = add(&mut s, "b", 3);
        let c = add(&mut s, "c", 3);

        s.current = Some(a);
        s.task_mut(b).block(-1);
        assert_eq!(step(&mut s, &port), c);
        assert_eq!(step(&mut s, &port), a);
    }

    #[test]
    fn test_periodic_expires_sleep() {
        let port = MockPort::default();
        let mut s = Scheduler::new();
        let idle = add(&mut s, "idle", 0);
        let t = add(&mut s, "t", 2);

        s.current = Some(idle);
        s.task_mut(t).block(2);

        s.periodic(&port);
        assert_eq!(s.task(t).state, TaskState::Sleep);
        assert_eq!(s.next, None);

        s.periodic(&port);
        assert_eq!(s.task(t).state, TaskState::Run);
        assert_eq!(s.task(t).status, TaskStatus::Timeout);
        assert_eq!(s.next, Some(t));
        assert_eq!(s.ticks, 2);
    }

    #[test]
    fn test_switch_accounting() {
        let port = MockPort::default();
        let mut s = Scheduler::new();
        let idle = add(&mut s, "idle", 0);
        let t = add(&mut s, "t", 2);

        s.current = Some(idle);
        s.task_mut(t).sp = StackPtr(0x2000_1000 as *mut u32);
        s.schedule(&port);

        let sp = s.switch(&port, StackPtr(0x2000_0800 as *mut u32));
        assert_eq!(sp, StackPtr(0x2000_1000 as *mut u32));
        assert_eq!(s.task(idle).sp, StackPtr(0x2000_0800 as *mut u32));
        assert_eq!(s.current, Some(t));
        assert_eq!(s.info.count_switch, 1);
        assert_eq!(s.info.count_sched, 1);

        // Nothing pending: the hand-off keeps the current task.
        let sp = s.switch(&port, StackPtr(0x2000_0f00 as *mut u32));
        assert_eq!(sp, StackPtr(0x2000_0f00 as *mut u32));
        assert_eq!(s.current, Some(t));
        assert_eq!(s.info.count_switch, 1);
    }

    #[test]
    fn test_stale_switch_is_dropped() {
        let port = MockPort::default();
        let mut s = Scheduler::new();
        let idle = add(&mut s, "idle", 0);
        let t = add(&mut s, "t", 2);

        s.current = Some(idle);
        s.schedule(&port);
        assert_eq!(s.next, Some(t));

        // The task goes back to sleep before the switch runs.
        s.task_mut(t).block(-1);
        s.schedule(&port);
        assert_eq!(s.next, None);
        s.switch(&port, StackPtr::null());
        assert_eq!(s.current, Some(idle));
    }
}
