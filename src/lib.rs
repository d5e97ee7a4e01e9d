//! # BMOS
//!
//! A small priority-scheduled kernel for ARM Cortex-M microcontrollers,
//! with counting semaphores, recursive mutexes and zero-copy message pools.
//!
//! ## Overview
//!
//! Tasks have fixed priorities; the highest-priority runnable task runs,
//! and tasks of equal priority take turns. Everything a task can wait on
//! (a delay, a semaphore, a mutex, a task queue) is built on one
//! suspension point: mark the task sleeping, reschedule, and briefly
//! unmask interrupts so the pended switch can fire.
//!
//! Buffers move between interrupt handlers and tasks as messages. Every
//! message lives in a pool created at startup and is recycled forever;
//! putting a message on a queue hands over ownership, nothing is copied.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │              Application Tasks / Drivers                │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   task_init() · task_start() · task_delay() · tick()    │
//! ├──────────────┬──────────────────┬──────────────────────┤
//! │  Messaging   │  Sync Primitives │  Scheduler           │
//! │  queue.rs    │  sem.rs          │  scheduler.rs        │
//! │  op_msg.rs   │  mutex.rs        │  ─ schedule()        │
//! │              │  waiters.rs      │  ─ periodic()        │
//! ├──────────────┴──────────────────┴──────────────────────┤
//! │       Task Model (task.rs) · Critical Sections (sync.rs)│
//! ├────────────────────────────────────────────────────────┤
//! │   Port trait (arch/mod.rs) · Cortex-M4 (arch/cortex_m4) │
//! │       PendSV · SysTick · Initial Frames · PRIMASK       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - Kernel objects live in fixed-capacity tables sized by [`config`].
//! - Task stacks and pool buffers come from the global allocator (or a
//!   caller-supplied `'static` buffer for stacks) and are never freed.
//! - All kernel state sits behind one interrupt-masked cell; see [`sync`].

#![no_std]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod mutex;
pub mod op_msg;
pub mod queue;
pub mod scheduler;
pub mod sem;
pub mod sync;
pub mod task;
mod waiters;

pub use error::{Error, Status};
pub use kernel::{Kernel, Stack};
pub use mutex::{MutexId, MutexInfo};
pub use op_msg::OpMsg;
pub use queue::{Msg, MsgId, MsgInfo, QueueId, QueueInfo, QueueKind};
pub use scheduler::SchedInfo;
pub use sem::{SemId, SemInfo};
pub use task::{TaskId, TaskInfo, TaskState, TaskStatus};
