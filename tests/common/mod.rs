//! Host simulation of the port.
//!
//! The test thread plays whichever task is current. A pended switch is
//! delivered as soon as interrupts are unmasked, exactly like PendSV on
//! hardware: the simulated handler performs the kernel's switch hand-off
//! and then
//!
//! * if the outgoing task is still runnable (it was preempted), returns
//!   at once: the test thread now speaks for the new current task;
//! * if the outgoing task blocked, runs the "world" (by default one tick
//!   per step, plus whatever the test installed) until that task is
//!   current again, then returns into its suspension window.
//!
//! World closures stand in for interrupts and other tasks, so they must
//! not call anything that blocks.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use bmos::arch::{Port, StackPtr, StackRegion, TaskFn};
use bmos::{Kernel, Stack, TaskId, TaskState};

pub type SimKernel = Kernel<SimPort>;

/// Upper bound on world steps per suspension before a test is declared
/// stuck.
const MAX_STEPS: u32 = 10_000;

#[derive(Default)]
pub struct SimPort {
    masked: Cell<bool>,
    pending: Cell<bool>,
    in_handler: Cell<bool>,
    clock: Cell<u32>,
    pendsv: RefCell<Option<Box<dyn FnMut()>>>,
    world: RefCell<Option<Box<dyn FnMut()>>>,
}

impl SimPort {
    fn deliver(&self) {
        if self.in_handler.get() {
            return;
        }
        self.in_handler.set(true);
        while self.pending.replace(false) {
            if let Some(h) = self.pendsv.borrow_mut().as_mut() {
                h();
            }
        }
        self.in_handler.set(false);
    }

    pub fn take_pending(&self) -> bool {
        self.pending.replace(false)
    }

    pub fn is_masked(&self) -> bool {
        self.masked.get()
    }
}

impl Port for SimPort {
    fn interrupt_disable(&self) -> u32 {
        self.masked.replace(true) as u32
    }

    fn interrupt_enable(&self, saved: u32) {
        self.masked.set(saved != 0);
        if saved == 0 {
            self.deliver();
        }
    }

    fn barrier(&self) {}

    unsafe fn init_frame(&self, _entry: TaskFn, _arg: usize, stack: StackRegion) -> StackPtr {
        StackPtr(stack.top() as *mut u32)
    }

    fn pend_switch(&self) {
        self.pending.set(true);
        if !self.masked.get() {
            self.deliver();
        }
    }

    fn start_first(&self, _sp: StackPtr) {
        self.masked.set(false);
        self.deliver();
    }

    fn now_us(&self) -> u32 {
        let now = self.clock.get();
        self.clock.set(now.wrapping_add(1));
        now
    }

    fn wait_for_interrupt() {}
}

/// Simulated PendSV.
fn pendsv(k: &'static SimKernel) {
    let me = k.task_get_current();
    k.switch_context(StackPtr::null());

    let Some(me) = me else { return };
    if k.task_state(me) == TaskState::Run {
        return;
    }

    let mut steps = 0;
    while k.task_get_current() != Some(me) {
        run_world(k);
        if k.port().take_pending() {
            k.switch_context(StackPtr::null());
        }
        steps += 1;
        assert!(steps < MAX_STEPS, "task '{}' never resumed", k.task_name(me));
    }
}

fn run_world(k: &'static SimKernel) {
    let mut world = k.port().world.borrow_mut();
    match world.as_mut() {
        Some(f) => f(),
        None => k.tick(),
    }
}

/// A fresh kernel on the simulated port, leaked for the rest of the test.
pub fn kernel() -> &'static SimKernel {
    let _ = env_logger::builder().is_test(true).try_init();

    let k: &'static SimKernel = Box::leak(Box::new(Kernel::new(SimPort::default())));
    *k.port().pendsv.borrow_mut() = Some(Box::new(move || pendsv(k)));
    k
}

/// Replace what happens while the test's task is blocked.
pub fn set_world(k: &'static SimKernel, f: impl FnMut() + 'static) {
    *k.port().world.borrow_mut() = Some(Box::new(f));
}

pub extern "C" fn nop(_arg: usize) {}

pub fn spawn(k: &SimKernel, name: &'static str, priority: u8) -> TaskId {
    k.task_init(nop, 0, name, priority, Stack::Alloc(256)).unwrap()
}

/// Start the kernel and enter the highest-priority task.
pub fn start(k: &'static SimKernel) -> TaskId {
    k.task_start().unwrap();
    k.schedule();
    k.task_get_current().unwrap()
}
