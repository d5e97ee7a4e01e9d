//! # Interrupt-Masked Critical Sections
//!
//! BMOS runs on a single hardware thread, so every mutation of kernel state
//! is protected by globally masking interrupts for its duration.
//! [`InterruptGuard`] is the scoped form of the port's save/restore pair:
//! creating one masks interrupts, dropping it restores the mask that was in
//! effect before, so guards nest the same way explicit save/restore does.
//!
//! [`IrqLockCell`] holds data that may only be touched while interrupts are
//! masked. Borrowing it requires a mutable borrow of a live guard, and the
//! only way to briefly unmask inside a guard ([`InterruptGuard::open_window`])
//! also needs that mutable borrow, so a reference into the cell can never
//! outlive the masked section it was obtained in.

use core::cell::UnsafeCell;

use crate::arch::Port;

/// Masks interrupts for as long as it is alive.
pub struct InterruptGuard<'a, P: Port> {
    port: &'a P,
    saved: u32,
}

impl<'a, P: Port> InterruptGuard<'a, P> {
    /// Mask interrupts, remembering the previous mask state.
    #[inline]
    pub fn new(port: &'a P) -> Self {
        let saved = port.interrupt_disable();
        Self { port, saved }
    }

    /// The suspension point of every blocking primitive.
    ///
    /// Restores the caller's mask (letting a pended switch fire and other
    /// tasks run), executes a barrier, and masks again. When this returns
    /// the calling task is current again.
    ///
    /// The guard must have been created with interrupts enabled; a blocking
    /// call must never begin with the mask already held.
    #[inline]
    pub fn open_window(&mut self) {
        self.port.interrupt_enable(self.saved);
        self.port.barrier();
        self.saved = self.port.interrupt_disable();
    }
}

impl<P: Port> Drop for InterruptGuard<'_, P> {
    #[inline]
    fn drop(&mut self) {
        self.port.interrupt_enable(self.saved);
    }
}

/// Cell whose contents are only reachable inside an interrupt-masked
/// section.
pub struct IrqLockCell<T>(UnsafeCell<T>);

// Safety: Single hardware thread. The contents are only reached through
// `borrow_mut`, which requires interrupts to be masked, so no interrupt
// handler can observe a partially updated value.
unsafe impl<T: Send> Sync for IrqLockCell<T> {}

impl<T> IrqLockCell<T> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Borrow the contents for the lifetime of the guard borrow.
    ///
    /// Kernel code obtains at most one such borrow per guard and never calls
    /// back into the kernel (or into user callbacks) while holding it, which
    /// is what makes the returned reference unique.
    #[inline]
    pub(crate) fn borrow_mut<'a, P: Port>(&'a self, _guard: &'a mut InterruptGuard<'_, P>) -> &'a mut T {
        // Safety: see above. Interrupts are masked while `_guard` is alive
        // and the mutable borrow of the guard excludes a second borrow
        // through the same guard.
        unsafe { &mut *self.0.get() }
    }
}
