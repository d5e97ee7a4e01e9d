//! # Task Control Block
//!
//! Defines the task model for BMOS. A task has a fixed priority, a run
//! state, the status of its most recent wake-up, and a sleep countdown
//! driven by the periodic tick. Tasks are linked into the global ready list
//! (ordered by descending priority) and into at most one waiter list at a
//! time through index links, so the task table itself never moves a task.

use core::fmt;

use crate::arch::{StackPtr, StackRegion};
use crate::config::MAX_TASK_TLS;

/// Handle of a task. Tasks are never destroyed, so a handle stays valid for
/// the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) u16);

impl TaskId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///             task_delay(n > 0) / blocking wait
///   ┌──────┐ ─────────────────────────────────► ┌───────┐
///   │ Run  │                                    │ Sleep │
///   └──────┘ ◄───────────────────────────────── └───────┘
///      │      tick countdown hits 0 / wake_first / task_wake
///      │
///      │ task function returns
///      ▼
///   ┌──────┐
///   │ Exit │   (terminal, never reclaimed)
///   └──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Exit,
    Run,
    Sleep,
}

impl TaskState {
    /// Single-character rendering used by the task listing.
    pub fn as_char(self) -> char {
        match self {
            TaskState::Exit => 'x',
            TaskState::Run => 'r',
            TaskState::Sleep => 's',
        }
    }
}

/// Meaning of the most recent wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Woken by the resource becoming available.
    Ok,
    /// Woken by the tick countdown, by `task_wake`, or told not to block.
    Timeout,
    /// Blocked, wake-up still pending.
    Invalid,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB).
pub struct Task {
    pub(crate) name: &'static str,
    pub(crate) priority: u8,
    pub(crate) state: TaskState,
    pub(crate) status: TaskStatus,

    /// Remaining ticks of a timed sleep. Negative means "forever": the tick
    /// handler only counts down positive values.
    pub(crate) sleep: i32,

    /// Saved stack pointer, written by the switch hand-off.
    pub(crate) sp: StackPtr,
    pub(crate) stack: StackRegion,

    /// Next task in the ready list (descending priority).
    pub(crate) next: Option<TaskId>,
    /// Next task in whichever waiter list this task is blocked on.
    pub(crate) next_waiter: Option<TaskId>,

    pub(crate) tls: [usize; MAX_TASK_TLS],

    /// Timestamp (µs) of the last switch into this task.
    pub(crate) start: u32,
    /// Accumulated run time in µs.
    pub(crate) time: u32,
}

impl Task {
    pub(crate) fn new(name: &'static str, priority: u8, sp: StackPtr, stack: StackRegion) -> Self {
        Self {
            name,
            priority,
            state: TaskState::Run,
            status: TaskStatus::Ok,
            sleep: 0,
            sp,
            stack,
            next: None,
            next_waiter: None,
            tls: [0; MAX_TASK_TLS],
            start: 0,
            time: 0,
        }
    }

    /// Put the task to sleep for `ticks` ticks (negative: until woken).
    pub(crate) fn block(&mut self, ticks: i32) {
        self.state = TaskState::Sleep;
        self.sleep = ticks;
        self.status = TaskStatus::Invalid;
    }

    /// Make a sleeping task runnable again with the given wake status.
    pub(crate) fn wake(&mut self, status: TaskStatus) {
        self.state = TaskState::Run;
        self.status = status;
    }

    /// Advance the sleep countdown by one tick. Returns `true` if the
    /// countdown expired on this tick.
    pub(crate) fn tick(&mut self) -> bool {
        if self.state == TaskState::Sleep && self.sleep > 0 {
            self.sleep -= 1;
            if self.sleep == 0 {
                self.wake(TaskStatus::Timeout);
                return true;
            }
        }
        false
    }

    #[inline]
    pub(crate) fn is_runnable(&self) -> bool {
        self.state == TaskState::Run
    }

    pub(crate) fn get_tls(&self, n: usize) -> usize {
        assert!(n < MAX_TASK_TLS, "tls index {} out of range", n);
        self.tls[n]
    }

    pub(crate) fn set_tls(&mut self, n: usize, value: usize) {
        assert!(n < MAX_TASK_TLS, "tls index {} out of range", n);
        self.tls[n] = value;
    }

    pub(crate) fn info(&self) -> TaskInfo {
        TaskInfo {
            name: self.name,
            stack: self.stack.base() as usize,
            stack_size: self.stack.size(),
            priority: self.priority,
            state: self.state,
            time_us: self.time,
        }
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// Snapshot of a task for the task listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: &'static str,
    pub stack: usize,
    pub stack_size: usize,
    pub priority: u8,
    pub state: TaskState,
    pub time_us: u32,
}

impl TaskInfo {
    /// Column header matching the `Display` rendering.
    pub const HEADER: &'static str = "name       stack      size prio";
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:#010x} {:4} {:4} {} {:4}.{:06}",
            self.name,
            self.stack,
            self.stack_size,
            self.priority,
            self.state.as_char(),
            self.time_us / 1_000_000,
            self.time_us % 1_000_000,
        )
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
