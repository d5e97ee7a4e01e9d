//! # Cortex-M4 Port Layer
//!
//! [`Port`] implementation for the ARM Cortex-M4 (Thumb-2, soft-float
//! frames).
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by `main()` before start and by
//!   interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack. The PendSV handler saves R4–R11 below that frame,
//! hands the resulting stack pointer to
//! [`Kernel::switch_context`](crate::kernel::Kernel::switch_context) and
//! restores R4–R11 of whichever task it gets back.
//!
//! ```text
//!   high ┌──────────┐
//!        │   xPSR   │ ◄─ thumb bit
//!        │    PC    │ ◄─ task entry
//!        │    LR    │ ◄─ task_return
//!        │ R12,R3-R1│
//!        │    R0    │ ◄─ task argument
//!        ├──────────┤ ◄─ PSP while the task runs
//!        │  R4–R11  │
//!   low  └──────────┘ ◄─ saved StackPtr
//! ```
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority (0xFF) so a switch
//! never preempts an application ISR.
//!
//! ## Startup
//!
//! `task_start()` masks interrupts, pends the first switch with `current`
//! and `next` both set to the idle task, and calls [`Port::start_first`].
//! That points PSP at the idle task's hardware frame and unmasks; PendSV
//! then fires from Thread/MSP and "switches" from idle to idle, which
//! restores the idle frame and returns to Thread/PSP.

use core::arch::naked_asm;
use core::ptr::null_mut;
use core::sync::atomic::{compiler_fence, AtomicPtr, Ordering};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{DWT, SCB, SYST};
use cortex_m::register::{primask, psp};

use super::{Port, StackPtr, StackRegion, TaskFn};
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel::Kernel;

/// Initial xPSR: only the Thumb bit set.
const XPSR_THUMB: u32 = 1 << 24;

/// Words in a full saved context (software R4–R11 + hardware frame).
const FRAME_WORDS: usize = 16;

/// The Cortex-M4 port. Zero-sized; all state lives in the core peripherals.
pub struct CortexM4;

/// The kernel the exception handlers call into, set by [`install`].
static KERNEL: AtomicPtr<Kernel<CortexM4>> = AtomicPtr::new(null_mut());

/// Register the kernel instance used by the SysTick and PendSV handlers
/// and by the exit path of returning tasks. Call once, before
/// `task_start()`.
pub fn install(kernel: &'static Kernel<CortexM4>) {
    KERNEL.store(kernel as *const _ as *mut _, Ordering::Release);
}

fn kernel() -> &'static Kernel<CortexM4> {
    let k = KERNEL.load(Ordering::Acquire);
    assert!(!k.is_null(), "kernel not installed");
    // Safety: only ever set from a `&'static Kernel`.
    unsafe { &*k }
}

/// Configure SysTick to fire at `TICK_HZ` from the core clock.
pub fn configure_systick(syst: &mut SYST) {
    syst.set_reload(SYSTEM_CLOCK_HZ / TICK_HZ - 1);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

impl Port for CortexM4 {
    #[inline]
    fn interrupt_disable(&self) -> u32 {
        let masked = primask::read().is_inactive();
        cortex_m::interrupt::disable();
        compiler_fence(Ordering::SeqCst);
        masked as u32
    }

    #[inline]
    fn interrupt_enable(&self, saved: u32) {
        compiler_fence(Ordering::SeqCst);
        if saved == 0 {
            // Safety: restoring a state we observed in `interrupt_disable`.
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    #[inline]
    fn barrier(&self) {
        cortex_m::asm::isb();
        compiler_fence(Ordering::SeqCst);
    }

    unsafe fn init_frame(&self, entry: TaskFn, arg: usize, stack: StackRegion) -> StackPtr {
        let top = (stack.top() as usize) & !7;
        let frame = (top - FRAME_WORDS * 4) as *mut u32;

        // R4–R11, then R0–R3 and R12.
        for i in 0..13 {
            frame.add(i).write(0);
        }
        frame.add(8).write(arg as u32);
        frame.add(13).write(task_return as usize as u32);
        frame.add(14).write(entry as usize as u32 & !1);
        frame.add(15).write(XPSR_THUMB);

        StackPtr(frame)
    }

    #[inline]
    fn pend_switch(&self) {
        SCB::set_pendsv();
    }

    fn start_first(&self, sp: StackPtr) {
        // Safety: called once from `task_start()` with interrupts masked;
        // nothing else owns the core peripherals at that point.
        unsafe {
            let mut cp = cortex_m::Peripherals::steal();
            cp.SCB.set_priority(SystemHandler::PendSV, 0xFF);
            cp.SCB.set_priority(SystemHandler::SysTick, 0xFF);
            cp.DCB.enable_trace();
            cp.DWT.enable_cycle_counter();
            configure_systick(&mut cp.SYST);

            // Skip the software-saved registers: PSP points at the hardware
            // frame, as if the idle task had just been interrupted.
            psp::write(sp.0.add(8) as u32);
            cortex_m::asm::isb();
            cortex_m::interrupt::enable();
        }

        // The pended switch has fired by now and never comes back here.
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[inline]
    fn now_us(&self) -> u32 {
        DWT::cycle_count() / (SYSTEM_CLOCK_HZ / 1_000_000)
    }

    #[inline]
    fn wait_for_interrupt() {
        cortex_m::asm::wfi();
    }
}

/// Return address of every task.
extern "C" fn task_return() -> ! {
    kernel().task_exit()
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

/// PendSV exception handler: performs the actual context switch.
///
/// # Safety
/// Entered only by the NVIC, following the Cortex-M exception convention.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        // Return to Thread mode on PSP, also for the very first switch
        // which is entered from MSP.
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        switch = sym bmos_switch_context,
    );
}

extern "C" fn bmos_switch_context(sp: *mut u32) -> *mut u32 {
    kernel().switch_context(StackPtr(sp)).0
}

/// SysTick exception handler: the kernel tick.
#[unsafe(no_mangle)]
pub extern "C" fn SysTick() {
    kernel().tick();
}
