//! # Kernel
//!
//! Top-level kernel object and task API for BMOS.
//!
//! [`Kernel`] owns all kernel state (task table, ready list, semaphores,
//! mutexes, queues and message headers) in one interrupt-lock cell, plus
//! the architecture [`Port`]. It is const-constructible so firmware can keep
//! it in a `static` and hand a reference to the SysTick and PendSV
//! handlers. Every public operation masks interrupts for exactly as long as
//! it touches that state.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel.task_init()    ← Register tasks (×N)
//!         ├─► kernel.queue_create() / msg_pool_create() / ...
//!         └─► kernel.task_start()   ← Create idle, launch scheduler
//!               ├─► current = next = idle
//!               ├─► pend the first switch
//!               └─► port.start_first() unmasks interrupts
//! ```
//!
//! ## Suspension
//!
//! A task only ever gives up the CPU at one of these points: `task_delay`
//! with a nonzero delay, a semaphore wait on a zero count, a mutex lock on a
//! mutex held by another task, and the idle task's wait-for-interrupt loop.
//! In each case the task records itself as sleeping, calls `schedule()`,
//! and then briefly unmasks interrupts; the pended switch fires in that
//! window and the task resumes there once it has been woken.

use core::ptr::NonNull;

use alloc::vec::Vec as AllocVec;
use heapless::Vec;

use crate::arch::{Port, StackPtr, StackRegion, TaskFn};
use crate::config::{
    IDLE_STACK_SIZE, MAX_INFO_WAITERS, MAX_MSGS, MAX_MUTEXES, MAX_QUEUES, MAX_SEMAPHORES, MAX_TASKS,
};
use crate::error::{Error, Status};
use crate::mutex::{Mutex, MutexId};
use crate::queue::{MsgHeader, Queue};
use crate::scheduler::{SchedInfo, Scheduler};
use crate::sem::{SemId, Semaphore};
use crate::sync::{InterruptGuard, IrqLockCell};
use crate::task::{Task, TaskId, TaskInfo, TaskState, TaskStatus};
use crate::waiters::WaitList;

/// Where a task's stack comes from.
pub enum Stack {
    /// Allocate this many bytes from the heap.
    Alloc(usize),
    /// Adopt a caller-supplied buffer.
    Static(&'static mut [u8]),
}

/// All mutable kernel state. Only reachable with interrupts masked.
pub struct KernelState {
    pub(crate) sched: Scheduler,
    pub(crate) sems: Vec<Semaphore, MAX_SEMAPHORES>,
    pub(crate) mutexes: Vec<Mutex, MAX_MUTEXES>,
    pub(crate) queues: Vec<Queue, MAX_QUEUES>,
    pub(crate) msgs: Vec<MsgHeader, MAX_MSGS>,
}

/// What a blocked task is waiting for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WaitOn {
    Sem(SemId),
    Mutex(MutexId),
}

impl KernelState {
    pub const fn new() -> Self {
        Self {
            sched: Scheduler::new(),
            sems: Vec::new(),
            mutexes: Vec::new(),
            queues: Vec::new(),
            msgs: Vec::new(),
        }
    }

    /// Whether a waiter would be satisfied right now.
    fn available(&self, on: WaitOn) -> bool {
        match on {
            WaitOn::Sem(s) => self.sems[s.index()].count > 0,
            WaitOn::Mutex(m) => self.mutexes[m.index()].count == 0,
        }
    }

    /// Split borrow of the task table and a waiter list.
    pub(crate) fn wait_parts(&mut self, on: WaitOn) -> (&mut [Task], &mut WaitList) {
        let list = match on {
            WaitOn::Sem(s) => &mut self.sems[s.index()].waiters,
            WaitOn::Mutex(m) => &mut self.mutexes[m.index()].waiters,
        };
        (self.sched.tasks.as_mut_slice(), list)
    }

    /// Names of the tasks queued on `on`, longest-waiting first.
    pub(crate) fn waiter_names(&self, on: WaitOn) -> Vec<&'static str, MAX_INFO_WAITERS> {
        let list = match on {
            WaitOn::Sem(s) => &self.sems[s.index()].waiters,
            WaitOn::Mutex(m) => &self.mutexes[m.index()].waiters,
        };
        let tasks = self.sched.tasks.as_slice();
        list.iter(tasks)
            .take(MAX_INFO_WAITERS)
            .map(|t| tasks[t.index()].name)
            .collect()
    }

    /// Wake the first waiter of `on`, if it is still blocked, and
    /// reschedule.
    pub(crate) fn wake_first<P: Port>(&mut self, port: &P, on: WaitOn) {
        let (tasks, list) = self.wait_parts(on);
        if list.wake_first(tasks).is_some() {
            self.sched.schedule(port);
        }
    }
}

/// The BMOS kernel.
pub struct Kernel<P: Port> {
    port: P,
    state: IrqLockCell<KernelState>,
}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            state: IrqLockCell::new(KernelState::new()),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    #[inline]
    pub(crate) fn lock(&self) -> InterruptGuard<'_, P> {
        InterruptGuard::new(&self.port)
    }

    #[inline]
    pub(crate) fn state<'a>(&'a self, guard: &'a mut InterruptGuard<'_, P>) -> &'a mut KernelState {
        self.state.borrow_mut(guard)
    }

    /// Run `f` on the kernel state with interrupts masked.
    #[inline]
    pub(crate) fn critical<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        let mut guard = self.lock();
        f(self.state.borrow_mut(&mut guard))
    }

    /// Block the current task until `on` becomes available, the timeout
    /// expires, or the task is force-woken.
    ///
    /// `tms == 0` never blocks; a negative `tms` waits forever. Returns with
    /// the guard still held. On `Status::Ok` the resource is available and
    /// the caller claims it before releasing the guard; on
    /// `Status::Timeout` the task has been unlinked from the waiter list.
    ///
    /// Claiming after a clean wake-up needs no further check only because
    /// there is a single hardware thread and every kernel mutation happens
    /// with interrupts masked: nothing else can run between the waker
    /// releasing the resource and the woken task resuming here.
    pub(crate) fn block_on(&self, guard: &mut InterruptGuard<'_, P>, on: WaitOn, tms: i32) -> Status {
        let mut status = TaskStatus::Ok;

        loop {
            let st = self.state.borrow_mut(guard);
            if st.available(on) || status == TaskStatus::Timeout {
                break;
            }
            if tms == 0 {
                // Never queued, so there is nothing to unlink and no
                // current task is needed.
                return Status::Timeout;
            }

            let me = st.sched.current_id();
            let (tasks, list) = st.wait_parts(on);
            list.add(tasks, me, tms);
            st.sched.schedule(&self.port);

            loop {
                guard.open_window();
                status = self.state.borrow_mut(guard).sched.task(me).status;
                if status != TaskStatus::Invalid {
                    break;
                }
            }
        }

        if status == TaskStatus::Timeout {
            let st = self.state.borrow_mut(guard);
            let me = st.sched.current_id();
            let (tasks, list) = st.wait_parts(on);
            list.remove(tasks, me);
            return Status::Timeout;
        }

        Status::Ok
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Create a task and add it to the ready list.
    ///
    /// The task starts in `entry(arg)` once the scheduler picks it. Priority
    /// 0 is the idle level; higher values run first. Fails with
    /// `Error::NoMemory` when the task table is full or the stack cannot be
    /// allocated.
    pub fn task_init(
        &self,
        entry: TaskFn,
        arg: usize,
        name: &'static str,
        priority: u8,
        stack: Stack,
    ) -> Result<TaskId, Error> {
        if self.critical(|st| st.sched.tasks.is_full()) {
            log::warn!("no memory for task allocation");
            return Err(Error::NoMemory);
        }

        // Heap stacks are only leaked once the task is registered.
        let mut owned: Option<AllocVec<u8>> = None;
        let region = match stack {
            Stack::Static(buf) => {
                // Safety: the buffer is 'static and exclusively ours.
                unsafe { StackRegion::new(NonNull::from(&mut *buf).cast(), buf.len()) }
            }
            Stack::Alloc(size) => {
                let mut buf = AllocVec::new();
                if buf.try_reserve_exact(size).is_err() {
                    log::warn!("no memory for stack allocation");
                    return Err(Error::NoMemory);
                }
                buf.resize(size, 0u8);
                // Safety: the allocation is kept alive (and finally leaked)
                // for as long as the task exists.
                let region = unsafe { StackRegion::new(NonNull::from(buf.as_mut_slice()).cast(), size) };
                owned = Some(buf);
                region
            }
        };

        // Safety: `region` is unused memory reserved for this task.
        let sp = unsafe { self.port.init_frame(entry, arg, region) };

        let id = self
            .critical(|st| st.sched.add(Task::new(name, priority, sp, region)))
            .map_err(|_| {
                log::warn!("no memory for task allocation");
                Error::NoMemory
            })?;

        if let Some(buf) = owned {
            core::mem::forget(buf);
        }

        log::debug!("task '{}' created, prio {}, stack {} bytes", name, priority, region.size());
        Ok(id)
    }

    /// Create the idle task and start scheduling.
    ///
    /// On hardware this never returns: the calling context is abandoned
    /// once the first switch fires.
    pub fn task_start(&self) -> Result<TaskId, Error> {
        let idle = self.task_init(idle_task::<P>, 0, "idle", 0, Stack::Alloc(IDLE_STACK_SIZE))?;

        let sp = self.critical(|st| {
            st.sched.current = Some(idle);
            st.sched.next = Some(idle);
            st.sched.task(idle).sp
        });

        // Masked until the port has the first frame in place; `start_first`
        // lifts the mask, so this guard is never dropped.
        core::mem::forget(self.lock());
        self.port.pend_switch();
        self.port.start_first(sp);

        Ok(idle)
    }

    /// Sleep for `ticks` ticks. Zero returns immediately without yielding;
    /// a negative delay sleeps until `task_wake`.
    pub fn task_delay(&self, ticks: i32) {
        let mut guard = self.lock();

        if ticks == 0 {
            return;
        }

        let st = self.state.borrow_mut(&mut guard);
        let me = st.sched.current_id();
        st.sched.task_mut(me).block(ticks);
        st.sched.schedule(&self.port);
    }

    /// Force a sleeping task awake with a `Timeout` status. No-op if the
    /// task is not sleeping.
    pub fn task_wake(&self, task: TaskId) {
        self.critical(|st| {
            let t = st.sched.task_mut(task);
            if t.state == TaskState::Sleep {
                t.wake(TaskStatus::Timeout);
                st.sched.schedule(&self.port);
            }
        });
    }

    /// Mark the current task exited and give up the CPU for good.
    ///
    /// Ports rig every task's return address to end up here. The task
    /// control block and stack are never reclaimed.
    pub fn task_exit(&self) -> ! {
        self.exit_current();
        loop {
            P::wait_for_interrupt();
        }
    }

    pub(crate) fn exit_current(&self) {
        self.critical(|st| {
            let me = st.sched.current_id();
            st.sched.task_mut(me).state = TaskState::Exit;
            log::debug!("task '{}' exited", st.sched.task(me).name);
            st.sched.schedule(&self.port);
        });
    }

    pub fn task_get_current(&self) -> Option<TaskId> {
        self.critical(|st| st.sched.current)
    }

    /// Read thread-local slot `n` of the current task.
    pub fn task_get_tls(&self, n: usize) -> usize {
        self.critical(|st| {
            let me = st.sched.current_id();
            st.sched.task(me).get_tls(n)
        })
    }

    /// Write thread-local slot `n` of the current task.
    pub fn task_set_tls(&self, n: usize, value: usize) {
        self.critical(|st| {
            let me = st.sched.current_id();
            st.sched.task_mut(me).set_tls(n, value)
        })
    }

    pub fn task_name(&self, task: TaskId) -> &'static str {
        self.critical(|st| st.sched.task(task).name)
    }

    pub fn task_priority(&self, task: TaskId) -> u8 {
        self.critical(|st| st.sched.task(task).priority)
    }

    pub fn task_state(&self, task: TaskId) -> TaskState {
        self.critical(|st| st.sched.task(task).state)
    }

    /// Meaning of the task's most recent wake-up.
    pub fn task_status(&self, task: TaskId) -> TaskStatus {
        self.critical(|st| st.sched.task(task).status)
    }

    /// Snapshot of every task, in creation order.
    pub fn task_info(&self) -> Vec<TaskInfo, MAX_TASKS> {
        self.critical(|st| st.sched.task_infos())
    }

    /// Tasks in ready-list (scheduling) order.
    pub fn task_order(&self) -> Vec<TaskId, MAX_TASKS> {
        self.critical(|st| st.sched.ready_order().collect())
    }

    /// Zero the accumulated run time of every task.
    pub fn reset_task_times(&self) {
        self.critical(|st| st.sched.reset_times());
    }

    // -----------------------------------------------------------------------
    // Port entry points
    // -----------------------------------------------------------------------

    /// Periodic tick, called from the SysTick handler.
    pub fn tick(&self) {
        self.critical(|st| st.sched.periodic(&self.port));
    }

    /// Ticks since the kernel started counting.
    pub fn ticks(&self) -> u32 {
        self.critical(|st| st.sched.ticks)
    }

    /// Switch hand-off, called by the port's reschedule exception with the
    /// outgoing task's saved stack pointer. Returns the stack pointer to
    /// resume.
    pub fn switch_context(&self, sp: StackPtr) -> StackPtr {
        self.critical(|st| st.sched.switch(&self.port, sp))
    }

    /// Re-run the scheduling decision.
    pub fn schedule(&self) {
        self.critical(|st| st.sched.schedule(&self.port));
    }

    pub fn sched_info(&self) -> SchedInfo {
        self.critical(|st| st.sched.info)
    }
}

extern "C" fn idle_task<P: Port>(_arg: usize) {
    loop {
        P::wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use super::*;
    use crate::arch::mock::MockPort;
    use std::boxed::Box;
    use std::string::ToString;

    pub(crate) extern "C" fn nop(_arg: usize) {}

    pub(crate) fn kernel() -> Box<Kernel<MockPort>> {
        Box::new(Kernel::new(MockPort::default()))
    }

    /// Pretend `task` is running, as if the port had switched to it.
    pub(crate) fn run_as(k: &Kernel<MockPort>, task: TaskId) {
        k.critical(|st| {
            st.sched.current = Some(task);
            st.sched.next = None;
        });
    }

    #[test]
    fn test_task_init_registers_task() {
        let k = kernel();
        let a = k.task_init(nop, 0, "a", 3, Stack::Alloc(512)).unwrap();
        assert_eq!(k.task_name(a), "a");
        assert_eq!(k.task_priority(a), 3);
        assert_eq!(k.task_state(a), TaskState::Run);

        let info = k.task_info();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].stack_size, 512);
        assert!(!k.port().is_masked());
    }

    #[test]
    fn test_task_init_adopts_static_stack() {
        static mut STACK: [u8; 256] = [0; 256];
        let k = kernel();
        let buf = unsafe { &mut *core::ptr::addr_of_mut!(STACK) };
        let base = buf.as_ptr() as usize;
        let a = k.task_init(nop, 0, "s", 1, Stack::Static(buf)).unwrap();

        let info = k.task_info();
        assert_eq!(info[a.index()].stack, base);
        assert_eq!(info[a.index()].stack_size, 256);
    }

    #[test]
    fn test_task_table_exhaustion() {
        let k = kernel();
        for _ in 0..MAX_TASKS {
            k.task_init(nop, 0, "t", 1, Stack::Alloc(64)).unwrap();
        }
        assert_eq!(k.task_init(nop, 0, "x", 1, Stack::Alloc(64)), Err(Error::NoMemory));
    }

    #[test]
    fn test_task_order_follows_priority() {
        let k = kernel();
        let lo = k.task_init(nop, 0, "lo", 1, Stack::Alloc(64)).unwrap();
        let hi = k.task_init(nop, 0, "hi", 7, Stack::Alloc(64)).unwrap();
        let mid = k.task_init(nop, 0, "mid", 4, Stack::Alloc(64)).unwrap();
        assert_eq!(k.task_order().as_slice(), [hi, mid, lo]);
    }

    #[test]
    fn test_task_start_creates_idle() {
        let k = kernel();
        k.task_init(nop, 0, "app", 2, Stack::Alloc(64)).unwrap();
        let idle = k.task_start().unwrap();

        assert!(k.port().started.get());
        assert!(k.port().started_masked.get());
        assert!(!k.port().is_masked());
        assert_eq!(k.task_name(idle), "idle");
        assert_eq!(k.task_priority(idle), 0);
        assert_eq!(k.task_get_current(), Some(idle));
        assert_eq!(k.port().pends.get(), 1);
    }

    #[test]
    fn test_tick_wakes_delayed_task() {
        let k = kernel();
        let idle = k.task_init(nop, 0, "idle", 0, Stack::Alloc(64)).unwrap();
        let t = k.task_init(nop, 0, "t", 2, Stack::Alloc(64)).unwrap();
        run_as(&k, t);

        k.task_delay(3);
        assert_eq!(k.task_state(t), TaskState::Sleep);
        assert_eq!(k.task_status(t), TaskStatus::Invalid);
        k.switch_context(StackPtr::null());
        assert_eq!(k.task_get_current(), Some(idle));

        k.tick();
        k.tick();
        assert_eq!(k.task_state(t), TaskState::Sleep);
        k.tick();
        assert_eq!(k.task_state(t), TaskState::Run);
        assert_eq!(k.task_status(t), TaskStatus::Timeout);

        k.switch_context(StackPtr::null());
        assert_eq!(k.task_get_current(), Some(t));
        assert_eq!(k.ticks(), 3);
    }

    #[test]
    fn test_zero_delay_does_not_yield() {
        let k = kernel();
        let t = k.task_init(nop, 0, "t", 2, Stack::Alloc(64)).unwrap();
        run_as(&k, t);
        k.task_delay(0);
        assert_eq!(k.task_state(t), TaskState::Run);
        assert_eq!(k.port().pends.get(), 0);
        assert_eq!(k.sched_info().count_sched, 0);
    }

    #[test]
    fn test_task_wake() {
        let k = kernel();
        k.task_init(nop, 0, "idle", 0, Stack::Alloc(64)).unwrap();
        let t = k.task_init(nop, 0, "t", 2, Stack::Alloc(64)).unwrap();
        run_as(&k, t);

        // Not sleeping: nothing happens.
        k.task_wake(t);
        assert_eq!(k.task_status(t), TaskStatus::Ok);

        k.task_delay(-1);
        for _ in 0..10 {
            k.tick();
        }
        assert_eq!(k.task_state(t), TaskState::Sleep);

        k.task_wake(t);
        assert_eq!(k.task_state(t), TaskState::Run);
        assert_eq!(k.task_status(t), TaskStatus::Timeout);
    }

    #[test]
    fn test_exit_is_terminal() {
        let k = kernel();
        let idle = k.task_init(nop, 0, "idle", 0, Stack::Alloc(64)).unwrap();
        let t = k.task_init(nop, 0, "t", 2, Stack::Alloc(64)).unwrap();
        run_as(&k, t);

        k.exit_current();
        assert_eq!(k.task_state(t), TaskState::Exit);
        k.switch_context(StackPtr::null());
        assert_eq!(k.task_get_current(), Some(idle));

        k.task_wake(t);
        k.tick();
        assert_eq!(k.task_state(t), TaskState::Exit);
        assert_eq!(k.task_get_current(), Some(idle));
        assert_eq!(k.task_info()[t.index()].to_string().split_whitespace().nth(4), Some("x"));
    }

    #[test]
    fn test_tls_is_per_task() {
        let k = kernel();
        let a = k.task_init(nop, 0, "a", 1, Stack::Alloc(64)).unwrap();
        let b = k.task_init(nop, 0, "b", 1, Stack::Alloc(64)).unwrap();

        run_as(&k, a);
        k.task_set_tls(0, 11);
        run_as(&k, b);
        assert_eq!(k.task_get_tls(0), 0);
        k.task_set_tls(0, 22);
        run_as(&k, a);
        assert_eq!(k.task_get_tls(0), 11);
    }

    #[test]
    fn test_run_time_accounting() {
        let k = kernel();
        let idle = k.task_init(nop, 0, "idle", 0, Stack::Alloc(64)).unwrap();
        let t = k.task_init(nop, 0, "t", 2, Stack::Alloc(64)).unwrap();
        run_as(&k, idle);

        k.schedule();
        k.switch_context(StackPtr::null());
        k.task_delay(1);
        k.switch_context(StackPtr::null());
        assert!(k.task_info()[t.index()].time_us > 0);

        k.reset_task_times();
        assert!(k.task_info().iter().all(|i| i.time_us == 0));
    }

    #[test]
    #[should_panic]
    fn test_blocking_before_start_is_fatal() {
        let k = kernel();
        k.task_init(nop, 0, "t", 2, Stack::Alloc(64)).unwrap();
        k.task_delay(1);
    }
}
