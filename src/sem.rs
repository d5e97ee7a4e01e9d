//! Counting semaphores.
//!
//! A semaphore is a count plus a FIFO waiter list. `sem_post` increments the
//! count and wakes the longest-waiting task; a woken task only claims the
//! count once it actually runs again, so a blocked waiter never holds a
//! claim on `count`.

use core::fmt;

use heapless::Vec;

use crate::arch::Port;
use crate::config::{MAX_INFO_WAITERS, MAX_SEMAPHORES};
use crate::error::{Error, Status};
use crate::kernel::{Kernel, KernelState, WaitOn};
use crate::waiters::WaitList;

/// Handle of a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId(pub(crate) u16);

impl SemId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct Semaphore {
    pub(crate) name: &'static str,
    pub(crate) count: u32,
    pub(crate) waiters: WaitList,
}

/// Snapshot of a semaphore for the semaphore listing.
///
/// The alternate form (`{:#}`) adds one indented line per waiting task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemInfo {
    pub name: &'static str,
    pub count: u32,
    /// Longest-waiting first.
    pub waiters: Vec<&'static str, MAX_INFO_WAITERS>,
}

impl SemInfo {
    pub const HEADER: &'static str = "name       count";
}

impl fmt::Display for SemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {}", self.name, self.count)?;
        if f.alternate() {
            for w in &self.waiters {
                write!(f, "\n  {}", w)?;
            }
        }
        Ok(())
    }
}

impl KernelState {
    pub(crate) fn sem_post<P: Port>(&mut self, port: &P, sem: SemId) {
        let s = &mut self.sems[sem.index()];
        s.count += 1;
        log::trace!("sem post '{}' count {}", s.name, s.count);

        self.wake_first(port, WaitOn::Sem(sem));
    }
}

impl<P: Port> Kernel<P> {
    pub fn sem_create(&self, name: &'static str, count: u32) -> Result<SemId, Error> {
        let id = self.critical(|st| {
            let id = SemId(st.sems.len() as u16);
            st.sems
                .push(Semaphore { name, count, waiters: WaitList::new() })
                .ok()
                .map(|_| id)
        });

        match id {
            Some(id) => {
                log::debug!("sem '{}' created, count {}", name, count);
                Ok(id)
            }
            None => {
                log::warn!("no memory for semaphore '{}'", name);
                Err(Error::NoMemory)
            }
        }
    }

    /// Release one unit and wake the first waiter. Safe from interrupt
    /// context.
    pub fn sem_post(&self, sem: SemId) {
        self.critical(|st| st.sem_post(self.port(), sem));
    }

    /// Wait up to `tms` ticks for a unit. `0` polls, negative waits forever.
    pub fn sem_wait_ms(&self, sem: SemId, tms: i32) -> Status {
        let mut guard = self.lock();
        log::trace!("sem wait '{}' start", self.state(&mut guard).sems[sem.index()].name);

        let status = self.block_on(&mut guard, WaitOn::Sem(sem), tms);
        let s = &mut self.state(&mut guard).sems[sem.index()];
        if status.is_ok() {
            s.count -= 1;
        }

        log::trace!("sem wait '{}' end {:?}", s.name, status);
        status
    }

    /// Wait for a unit with no timeout.
    pub fn sem_wait(&self, sem: SemId) {
        let status = self.sem_wait_ms(sem, crate::config::WAIT_FOREVER);
        debug_assert!(status.is_ok());
    }

    pub fn sem_count(&self, sem: SemId) -> u32 {
        self.critical(|st| st.sems[sem.index()].count)
    }

    pub fn sem_name(&self, sem: SemId) -> &'static str {
        self.critical(|st| st.sems[sem.index()].name)
    }

    /// Snapshot of every semaphore, task-queue semaphores included.
    pub fn sem_info(&self) -> Vec<SemInfo, MAX_SEMAPHORES> {
        self.critical(|st| {
            (0..st.sems.len())
                .map(|i| {
                    let s = &st.sems[i];
                    SemInfo {
                        name: s.name,
                        count: s.count,
                        waiters: st.waiter_names(WaitOn::Sem(SemId(i as u16))),
                    }
                })
                .collect()
        })
    }
}
