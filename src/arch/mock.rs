//! Host-side port for unit tests. Switches are only recorded; nothing ever
//! runs on the saved stacks.

use core::cell::Cell;

use super::{Port, StackPtr, StackRegion, TaskFn};

#[derive(Default)]
pub(crate) struct MockPort {
    masked: Cell<bool>,
    pub(crate) pends: Cell<u32>,
    pub(crate) started: Cell<bool>,
    /// Whether interrupts were masked when `start_first` ran.
    pub(crate) started_masked: Cell<bool>,
    pub(crate) clock: Cell<u32>,
}

impl MockPort {
    pub(crate) fn is_masked(&self) -> bool {
        self.masked.get()
    }
}

impl Port for MockPort {
    fn interrupt_disable(&self) -> u32 {
        self.masked.replace(true) as u32
    }

    fn interrupt_enable(&self, saved: u32) {
        self.masked.set(saved != 0);
    }

    fn barrier(&self) {}

    unsafe fn init_frame(&self, _entry: TaskFn, _arg: usize, stack: StackRegion) -> StackPtr {
        StackPtr(stack.top().wrapping_sub(64) as *mut u32)
    }

    fn pend_switch(&self) {
        self.pends.set(self.pends.get() + 1);
    }

    fn start_first(&self, _sp: StackPtr) {
        self.started.set(true);
        self.started_masked.set(self.masked.get());
        self.masked.set(false);
    }

    fn now_us(&self) -> u32 {
        // Every reading advances the clock so that timing statistics move.
        let now = self.clock.get();
        self.clock.set(now + 1);
        now
    }

    fn wait_for_interrupt() {}
}
