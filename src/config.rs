//! # BMOS Configuration
//!
//! Compile-time constants governing the kernel. All object tables are
//! fixed-capacity, so these limits bound the kernel's static footprint;
//! only task stacks and pool payload storage come from the heap.

/// Maximum number of tasks, including the idle task created by
/// `task_start()`.
pub const MAX_TASKS: usize = 16;

/// Number of word-sized thread-local slots carried by every task.
pub const MAX_TASK_TLS: usize = 2;

/// Thread-local slot conventionally holding the task's stdout handle.
pub const TLS_IND_STDOUT: usize = 0;

/// Maximum number of semaphores. Every task-type queue owns one.
pub const MAX_SEMAPHORES: usize = 32;

/// Maximum number of mutexes.
pub const MAX_MUTEXES: usize = 16;

/// Maximum number of queues (pools included).
pub const MAX_QUEUES: usize = 32;

/// Maximum number of message slots across all pools.
pub const MAX_MSGS: usize = 256;

/// Waiter names kept per semaphore or mutex in a listing snapshot.
pub const MAX_INFO_WAITERS: usize = 8;

/// Messages kept per queue or pool in a detailed listing snapshot.
pub const MAX_INFO_MSGS: usize = 32;

/// Stack size of the idle task, in bytes.
pub const IDLE_STACK_SIZE: usize = 256;

/// Suggested stack size for application tasks, in bytes.
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Pool slot sizes are rounded up to a multiple of this many bytes.
pub const POOL_ALIGN: usize = 4;

/// SysTick frequency in Hz. One tick is the unit of every timeout.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Timeout value meaning "poll once, never block".
pub const NO_WAIT: i32 = 0;

/// Timeout value meaning "block until woken". Any negative value behaves
/// the same way: the tick handler never counts it down.
pub const WAIT_FOREVER: i32 = -1;
