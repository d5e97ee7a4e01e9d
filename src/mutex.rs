//! Recursive mutexes.
//!
//! A mutex has an owner, a recursion count and a FIFO waiter list. The
//! owner may lock again without blocking; the mutex is released once every
//! lock has been matched by an unlock. Unlocking hands the mutex to nobody
//! in particular: it clears the owner and wakes the first waiter, which
//! claims ownership when it next runs.
//!
//! There is no priority inheritance.

use core::fmt;

use heapless::Vec;

use crate::arch::Port;
use crate::config::{MAX_INFO_WAITERS, MAX_MUTEXES, WAIT_FOREVER};
use crate::error::{Error, Status};
use crate::kernel::{Kernel, WaitOn};
use crate::task::TaskId;
use crate::waiters::WaitList;

/// Handle of a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) u16);

impl MutexId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct Mutex {
    pub(crate) name: &'static str,
    /// Recursion depth; 0 means free.
    pub(crate) count: u32,
    pub(crate) owner: Option<TaskId>,
    pub(crate) waiters: WaitList,
}

/// Snapshot of a mutex for the mutex listing. `{:#}` adds the waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexInfo {
    pub name: &'static str,
    pub count: u32,
    pub owner: Option<&'static str>,
    pub waiters: Vec<&'static str, MAX_INFO_WAITERS>,
}

impl MutexInfo {
    pub const HEADER: &'static str = "name       count owner";
}

impl fmt::Display for MutexInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {:5} {}", self.name, self.count, self.owner.unwrap_or(""))?;
        if f.alternate() {
            for w in &self.waiters {
                write!(f, "\n  {}", w)?;
            }
        }
        Ok(())
    }
}

impl<P: Port> Kernel<P> {
    pub fn mutex_create(&self, name: &'static str) -> Result<MutexId, Error> {
        let id = self.critical(|st| {
            let id = MutexId(st.mutexes.len() as u16);
            st.mutexes
                .push(Mutex { name, count: 0, owner: None, waiters: WaitList::new() })
                .ok()
                .map(|_| id)
        });

        let Some(id) = id else {
            log::warn!("no memory for mutex '{}'", name);
            return Err(Error::NoMemory);
        };
        log::debug!("mutex '{}' created", name);
        Ok(id)
    }

    /// Lock, waiting up to `tms` ticks if another task holds the mutex.
    pub fn mutex_lock_ms(&self, mutex: MutexId, tms: i32) -> Status {
        let mut guard = self.lock();

        let st = self.state(&mut guard);
        let me = st.sched.current_id();
        let m = &mut st.mutexes[mutex.index()];
        if m.owner == Some(me) {
            m.count += 1;
            return Status::Ok;
        }

        let status = self.block_on(&mut guard, WaitOn::Mutex(mutex), tms);
        if status.is_ok() {
            let m = &mut self.state(&mut guard).mutexes[mutex.index()];
            assert!(m.owner.is_none() && m.count == 0, "mutex '{}' claimed while held", m.name);
            m.owner = Some(me);
            m.count = 1;
        }
        status
    }

    /// Lock, waiting as long as it takes.
    pub fn mutex_lock(&self, mutex: MutexId) {
        let status = self.mutex_lock_ms(mutex, WAIT_FOREVER);
        assert!(status.is_ok(), "mutex wait forever timed out");
    }

    /// Undo one lock. Only the owner may unlock.
    pub fn mutex_unlock(&self, mutex: MutexId) {
        let mut guard = self.lock();
        let st = self.state(&mut guard);
        let me = st.sched.current_id();

        let m = &mut st.mutexes[mutex.index()];
        assert!(m.owner == Some(me), "mutex '{}' unlocked by non-owner", m.name);
        assert!(m.count > 0);

        m.count -= 1;
        if m.count == 0 {
            m.owner = None;
            st.wake_first(self.port(), WaitOn::Mutex(mutex));
        }
    }

    pub fn mutex_owner(&self, mutex: MutexId) -> Option<TaskId> {
        self.critical(|st| st.mutexes[mutex.index()].owner)
    }

    pub fn mutex_info(&self) -> Vec<MutexInfo, MAX_MUTEXES> {
        self.critical(|st| {
            (0..st.mutexes.len())
                .map(|i| {
                    let m = &st.mutexes[i];
                    MutexInfo {
                        name: m.name,
                        count: m.count,
                        owner: m.owner.map(|t| st.sched.task(t).name),
                        waiters: st.waiter_names(WaitOn::Mutex(MutexId(i as u16))),
                    }
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::arch::StackPtr;
    use crate::kernel::tests::{kernel, nop, run_as};
    use crate::kernel::Stack;
    use crate::task::{TaskState, TaskStatus};
    use std::format;
    use std::string::ToString;

    #[test]
    fn test_recursive_lock() {
        let k = kernel();
        let t = k.task_init(nop, 0, "t", 1, Stack::Alloc(64)).unwrap();
        run_as(&k, t);

        let m = k.mutex_create("m").unwrap();
        k.mutex_lock(m);
        k.mutex_lock(m);
        assert_eq!(k.mutex_owner(m), Some(t));

        k.mutex_unlock(m);
        assert_eq!(k.mutex_owner(m), Some(t));
        k.mutex_unlock(m);
        assert_eq!(k.mutex_owner(m), None);
    }

    #[test]
    fn test_poll_held_mutex() {
        let k = kernel();
        let a = k.task_init(nop, 0, "a", 1, Stack::Alloc(64)).unwrap();
        let b = k.task_init(nop, 0, "b", 1, Stack::Alloc(64)).unwrap();
        let m = k.mutex_create("m").unwrap();

        run_as(&k, a);
        k.mutex_lock(m);
        run_as(&k, b);
        assert_eq!(k.mutex_lock_ms(m, 0), Status::Timeout);
        assert_eq!(k.task_state(b), TaskState::Run);
        k.critical(|st| assert!(st.mutexes[m.index()].waiters.is_empty()));
    }

    #[test]
    fn test_final_unlock_wakes_waiter() {
        let k = kernel();
        let a = k.task_init(nop, 0, "a", 1, Stack::Alloc(64)).unwrap();
        let b = k.task_init(nop, 0, "b", 2, Stack::Alloc(64)).unwrap();
        let m = k.mutex_create("m").unwrap();

        run_as(&k, a);
        k.mutex_lock(m);
        k.mutex_lock(m);
        k.critical(|st| {
            let (tasks, list) = st.wait_parts(WaitOn::Mutex(m));
            list.add(tasks, b, -1);
        });

        k.mutex_unlock(m);
        assert_eq!(k.task_state(b), TaskState::Sleep);

        k.mutex_unlock(m);
        assert_eq!(k.task_state(b), TaskState::Run);
        assert_eq!(k.task_status(b), TaskStatus::Ok);
        assert_eq!(k.mutex_owner(m), None);

        k.switch_context(StackPtr::null());
        assert_eq!(k.task_get_current(), Some(b));
    }

    #[test]
    fn test_info_shows_owner_and_waiters() {
        let k = kernel();
        let a = k.task_init(nop, 0, "shell", 1, Stack::Alloc(64)).unwrap();
        let b = k.task_init(nop, 0, "logger", 2, Stack::Alloc(64)).unwrap();
        let m = k.mutex_create("uart").unwrap();
        k.mutex_create("flash").unwrap();

        run_as(&k, a);
        k.mutex_lock(m);
        k.mutex_lock(m);
        k.critical(|st| {
            let (tasks, list) = st.wait_parts(WaitOn::Mutex(m));
            list.add(tasks, b, -1);
        });

        let info = k.mutex_info();
        assert_eq!(info[0].owner, Some("shell"));
        assert_eq!(info[0].to_string(), "uart           2 shell");
        assert_eq!(format!("{:#}", info[0]), "uart           2 shell\n  logger");
        assert_eq!(info[1].to_string(), "flash          0 ");
        assert!(info[1].waiters.is_empty());
    }

    #[test]
    #[should_panic(expected = "unlocked by non-owner")]
    fn test_unlock_by_non_owner_is_fatal() {
        let k = kernel();
        let a = k.task_init(nop, 0, "a", 1, Stack::Alloc(64)).unwrap();
        let b = k.task_init(nop, 0, "b", 1, Stack::Alloc(64)).unwrap();
        let m = k.mutex_create("m").unwrap();

        run_as(&k, a);
        k.mutex_lock(m);
        run_as(&k, b);
        k.mutex_unlock(m);
    }

    #[test]
    #[should_panic]
    fn test_unlock_free_mutex_is_fatal() {
        let k = kernel();
        let a = k.task_init(nop, 0, "a", 1, Stack::Alloc(64)).unwrap();
        let m = k.mutex_create("m").unwrap();
        run_as(&k, a);
        k.mutex_unlock(m);
    }
}
