//! # Architecture Abstraction Layer
//!
//! The kernel is written against [`Port`], the small set of CPU services it
//! needs from the architecture: interrupt masking, a barrier, initial
//! register frames, and the asynchronous "reschedule" exception. The actual
//! register save/restore lives entirely in the port; the kernel only hands
//! it the next task's saved stack pointer through
//! [`Kernel::switch_context`](crate::kernel::Kernel::switch_context).
//!
//! Currently implements the Cortex-M4 port; extensible to other
//! architectures by adding sibling modules.

use core::ptr::NonNull;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(test)]
pub(crate) mod mock;

/// Task entry point. The argument is the opaque word given to `task_init`.
pub type TaskFn = extern "C" fn(usize);

/// Opaque saved stack pointer of a suspended task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPtr(pub *mut u32);

impl StackPtr {
    pub const fn null() -> Self {
        Self(core::ptr::null_mut())
    }
}

// Safety: only ever dereferenced by the port's switch code, on the single
// hardware thread.
unsafe impl Send for StackPtr {}

/// The memory a task's stack occupies.
#[derive(Debug, Clone, Copy)]
pub struct StackRegion {
    base: NonNull<u8>,
    size: usize,
}

// Safety: a stack region is owned by exactly one task for the lifetime of
// the system and is only written by that task and by the port.
unsafe impl Send for StackRegion {}

impl StackRegion {
    /// # Safety
    /// `base..base + size` must be writable memory that stays reserved for
    /// one task for the rest of the program.
    pub unsafe fn new(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest address of the stack.
    pub fn top(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.size)
    }
}

/// CPU services the kernel depends on.
pub trait Port {
    /// Mask interrupts and return the previous mask state.
    fn interrupt_disable(&self) -> u32;

    /// Restore a mask state previously returned by `interrupt_disable`.
    fn interrupt_enable(&self, saved: u32);

    /// Instruction and compiler barrier used inside the suspension window.
    fn barrier(&self);

    /// Build the initial register frame of a new task at the top of
    /// `stack` and return the stack pointer to save for it.
    ///
    /// The frame must start the task in `entry(arg)` and, should `entry`
    /// return, continue in a routine that calls
    /// [`Kernel::task_exit`](crate::kernel::Kernel::task_exit).
    ///
    /// # Safety
    /// `stack` must be valid, unused memory reserved for the new task.
    unsafe fn init_frame(&self, entry: TaskFn, arg: usize, stack: StackRegion) -> StackPtr;

    /// Pend the asynchronous low-priority reschedule exception. The switch
    /// itself happens once interrupts are unmasked and the exception runs.
    fn pend_switch(&self);

    /// Hand the first task's frame to the CPU and unmask interrupts.
    fn start_first(&self, sp: StackPtr);

    /// Free-running microsecond clock for scheduler statistics.
    fn now_us(&self) -> u32 {
        0
    }

    /// Low-power wait used by the idle task.
    fn wait_for_interrupt();
}
