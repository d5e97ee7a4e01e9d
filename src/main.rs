//! # BMOS Demo Firmware
//!
//! A sampling pipeline on an STM32F4, exercising every kernel service:
//!
//! | Task       | Priority | Behavior                                            |
//! |------------|----------|-----------------------------------------------------|
//! | `sampler`  | 2        | Takes a buffer from the pool every 5 ticks, fills it, puts it on `work` |
//! | `filter`   | 3        | Blocks on `work`, accumulates under the stats mutex, forwards to `tx` |
//! | `monitor`  | 1        | Once a second snapshots the stats and resets run times |
//! | `idle`     | 0        | Created by `task_start()`                           |
//!
//! `tx` is a driver queue. Its put-callback stands in for a UART transmit
//! interrupt: it drains the queue and returns every buffer to the pool.

#![no_std]
#![no_main]

extern crate alloc;

use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicU32, Ordering};

use alloc::boxed::Box;
use cortex_m_rt::entry;
use embedded_alloc::LlffHeap as Heap;
use panic_halt as _;

use bmos::arch::cortex_m4::{self, CortexM4};
use bmos::config::{DEFAULT_STACK_SIZE, TICK_HZ};
use bmos::{Kernel, MutexId, QueueId, QueueKind, Stack};

#[global_allocator]
static HEAP: Heap = Heap::empty();
const HEAP_SIZE: usize = 32 * 1024;

static KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4);

const OP_SAMPLE: u16 = 1;
const OP_FILTERED: u16 = 2;

/// Handles shared by the demo tasks, passed as their argument word.
struct Shared {
    pool: QueueId,
    work: QueueId,
    tx: QueueId,
    stats: MutexId,
}

static SUM: AtomicU32 = AtomicU32::new(0);
static SAMPLES: AtomicU32 = AtomicU32::new(0);
static SENT: AtomicU32 = AtomicU32::new(0);

fn shared(arg: usize) -> &'static Shared {
    // Safety: `arg` is the leaked `Shared` created in `main`.
    unsafe { &*(arg as *const Shared) }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

extern "C" fn sampler(arg: usize) {
    let s = shared(arg);
    let mut reading: u32 = 0;

    loop {
        if let Some(mut m) = KERNEL.op_msg_wait_ms(s.pool, 10) {
            reading = reading.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            m.data_mut()[..4].copy_from_slice(&reading.to_le_bytes());
            KERNEL.op_msg_put(s.work, m, OP_SAMPLE, 4);
        }
        KERNEL.task_delay(5);
    }
}

extern "C" fn filter(arg: usize) {
    let s = shared(arg);

    loop {
        let Some(m) = KERNEL.op_msg_wait(s.work) else {
            continue;
        };

        let mut b = [0u8; 4];
        b.copy_from_slice(&m.data()[..4]);
        let value = u32::from_le_bytes(b) >> 24;

        KERNEL.mutex_lock(s.stats);
        SUM.fetch_add(value, Ordering::Relaxed);
        SAMPLES.fetch_add(1, Ordering::Relaxed);
        KERNEL.mutex_unlock(s.stats);

        let len = m.len() as u16;
        KERNEL.op_msg_put(s.tx, m, OP_FILTERED, len);
    }
}

extern "C" fn monitor(arg: usize) {
    let s = shared(arg);

    loop {
        KERNEL.task_delay(TICK_HZ as i32);

        KERNEL.mutex_lock(s.stats);
        let samples = SAMPLES.swap(0, Ordering::Relaxed);
        let sum = SUM.swap(0, Ordering::Relaxed);
        KERNEL.mutex_unlock(s.stats);

        log::info!(
            "{} samples, mean {}, {} sent, {} switches",
            samples,
            sum.checked_div(samples).unwrap_or(0),
            SENT.load(Ordering::Relaxed),
            KERNEL.sched_info().count_switch,
        );
        KERNEL.reset_task_times();
    }
}

/// Put-callback of `tx`: pretend to transmit, then recycle.
fn uart_kick(arg: usize) {
    let s = shared(arg);
    while let Some(m) = KERNEL.op_msg_get(s.tx) {
        SENT.fetch_add(1, Ordering::Relaxed);
        KERNEL.op_msg_return(m);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    {
        static mut HEAP_MEM: [u8; HEAP_SIZE] = [0; HEAP_SIZE];
        unsafe {
            HEAP.init(addr_of_mut!(HEAP_MEM) as *mut u8 as usize, HEAP_SIZE);
        }
    }

    cortex_m4::install(&KERNEL);

    let s = Box::leak(Box::new(Shared {
        pool: KERNEL
            .op_msg_pool_create("pool", QueueKind::Task, 8, 16)
            .expect("Failed to create pool"),
        work: KERNEL.queue_create("work", QueueKind::Task).expect("Failed to create work queue"),
        tx: KERNEL.queue_create("tx", QueueKind::Driver).expect("Failed to create tx queue"),
        stats: KERNEL.mutex_create("stats").expect("Failed to create stats mutex"),
    }));
    let arg = s as *const Shared as usize;

    KERNEL
        .queue_set_put_f(s.tx, Some(uart_kick), None, arg)
        .expect("tx is a driver queue");

    KERNEL
        .task_init(sampler, arg, "sampler", 2, Stack::Alloc(DEFAULT_STACK_SIZE))
        .expect("Failed to create sampler");
    KERNEL
        .task_init(filter, arg, "filter", 3, Stack::Alloc(DEFAULT_STACK_SIZE))
        .expect("Failed to create filter");
    KERNEL
        .task_init(monitor, arg, "monitor", 1, Stack::Alloc(DEFAULT_STACK_SIZE))
        .expect("Failed to create monitor");

    // Does not return on hardware.
    let _ = KERNEL.task_start();

    loop {
        cortex_m::asm::wfi();
    }
}
