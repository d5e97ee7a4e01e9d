//! # Messages, Queues and Pools
//!
//! Messages are fixed-size buffers that move between queues without being
//! copied. Every message belongs to a *home* pool, created once by
//! [`Kernel::msg_pool_create`] and recycled forever: acquiring a buffer is
//! a get on the pool, releasing it is [`Kernel::msg_return`].
//!
//! ## Ownership
//!
//! ```text
//!   ┌──────────┐ msg_wait / msg_get  ┌──────────────┐  msg_put   ┌────────────┐
//!   │   pool   │ ──────────────────► │  Msg (held)  │ ─────────► │   queue    │
//!   │ (queue)  │ ◄────────────────── │ owns buffer  │ ◄───────── │            │
//!   └──────────┘     msg_return      └──────────────┘  msg_wait  └────────────┘
//! ```
//!
//! While a message sits on a queue its buffer is parked in the kernel's
//! header table; taking it off a queue hands the buffer back out as a
//! move-only [`Msg`]. A message is therefore on exactly one queue or held by
//! exactly one owner.
//!
//! ## Queue Kinds
//!
//! * [`QueueKind::Task`]: consumers may block. The queue owns a semaphore
//!   whose count mirrors the list length.
//! * [`QueueKind::Driver`]: never blocks, for interrupt-context producers
//!   and consumers. A wait timeout is ignored and the call always polls.
//!   An optional put-callback runs, outside the masked section, after every
//!   enqueue.

use core::fmt;

use alloc::vec::Vec as AllocVec;
use heapless::Vec;

use crate::arch::Port;
use crate::config::{MAX_INFO_MSGS, MAX_MSGS, MAX_QUEUES, NO_WAIT, POOL_ALIGN, WAIT_FOREVER};
use crate::error::Error;
use crate::kernel::{Kernel, KernelState};
use crate::sem::SemId;

/// Handle of a queue or pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub(crate) u16);

impl QueueId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a message slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgId(pub(crate) u16);

impl MsgId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Blocking discipline of a queue, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Task,
    Driver,
}

impl QueueKind {
    pub fn as_char(self) -> char {
        match self {
            QueueKind::Task => 't',
            QueueKind::Driver => 'd',
        }
    }
}

/// Driver queue put-callback. Receives the data word registered with it.
pub type PutFn = fn(data: usize);

/// Driver queue control callback: `(data, control, arg) -> result`.
pub type ControlFn = fn(data: usize, control: u32, arg: usize) -> i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolData {
    /// Number of slots.
    pub count: usize,
    /// Slot size in bytes, after rounding.
    pub size: usize,
}

pub(crate) enum QueueData {
    Task {
        sem: SemId,
    },
    Driver {
        count: u32,
        put: Option<PutFn>,
        control: Option<ControlFn>,
        data: usize,
    },
}

pub(crate) struct Queue {
    pub(crate) name: &'static str,
    first: Option<MsgId>,
    last: Option<MsgId>,
    pub(crate) pool: Option<PoolData>,
    pub(crate) data: QueueData,
}

impl Queue {
    fn kind(&self) -> QueueKind {
        match self.data {
            QueueData::Task { .. } => QueueKind::Task,
            QueueData::Driver { .. } => QueueKind::Driver,
        }
    }

    fn push(&mut self, msgs: &mut [MsgHeader], id: MsgId) {
        match self.last {
            Some(last) if self.first.is_some() => msgs[last.index()].next = Some(id),
            _ => self.first = Some(id),
        }
        self.last = Some(id);
        msgs[id.index()].next = None;
    }

    fn pop(&mut self, msgs: &mut [MsgHeader]) -> Option<MsgId> {
        let id = self.first?;
        self.first = msgs[id.index()].next.take();
        if self.first.is_none() {
            self.last = None;
        }
        Some(id)
    }
}

/// Kernel-side record of a message slot.
pub(crate) struct MsgHeader {
    next: Option<MsgId>,
    pub(crate) home: QueueId,
    /// Queue currently holding the message; `None` while it is held.
    pub(crate) queue: Option<QueueId>,
    /// The payload, parked here while the message is queued.
    buf: Option<&'static mut [u8]>,
}

/// A message held outside any queue.
///
/// Owns its payload buffer until it is put on a queue again. Dropping a
/// `Msg` loses the slot for good, so every message taken from a queue
/// should end in `msg_put` or `msg_return`.
#[must_use = "a dropped message is lost to its pool"]
#[derive(Debug)]
pub struct Msg {
    id: MsgId,
    home: QueueId,
    buf: &'static mut [u8],
}

impl Msg {
    pub fn id(&self) -> MsgId {
        self.id
    }

    /// The pool this message returns to.
    pub fn home(&self) -> QueueId {
        self.home
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &*self.buf
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.buf
    }

    /// Address of the payload; stable for the life of the slot.
    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// Snapshot of a queue for the queue listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: &'static str,
    pub kind: QueueKind,
    pub count: u32,
    pub pool: Option<PoolData>,
}

impl QueueInfo {
    pub const HEADER: &'static str = "name       typ count alloc size";
}

impl fmt::Display for QueueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {}   {:5}", self.name, self.kind.as_char(), self.count)?;
        if let Some(p) = self.pool {
            write!(f, " {:5} {:4}", p.count, p.size)?;
        }
        Ok(())
    }
}

/// Snapshot of one message slot for the detailed queue and pool listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgInfo {
    pub id: MsgId,
    /// Successor on the queue holding the message.
    pub next: Option<MsgId>,
    pub home: &'static str,
    /// Queue holding the message; `None` while someone holds it.
    pub queue: Option<&'static str>,
    pub len: usize,
}

impl MsgInfo {
    pub const HEADER: &'static str = "  msg   next  home       queue        len";
}

impl fmt::Display for MsgInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {:<5} ", self.id.0)?;
        match self.next {
            Some(n) => write!(f, "{:<5} ", n.0)?,
            None => write!(f, "{:<5} ", "-")?,
        }
        write!(f, "{:<10} {:<10} {:5}", self.home, self.queue.unwrap_or("none"), self.len)
    }
}

// ---------------------------------------------------------------------------
// Locked helpers
// ---------------------------------------------------------------------------

impl KernelState {
    fn msg_info(&self, id: MsgId) -> MsgInfo {
        let h = &self.msgs[id.index()];
        let home = &self.queues[h.home.index()];
        MsgInfo {
            id,
            next: h.next,
            home: home.name,
            queue: h.queue.map(|q| self.queues[q.index()].name),
            len: home.pool.map_or(0, |p| p.size),
        }
    }

    fn queue_count(&self, queue: QueueId) -> u32 {
        match self.queues[queue.index()].data {
            QueueData::Task { sem } => self.sems[sem.index()].count,
            QueueData::Driver { count, .. } => count,
        }
    }

    /// Append a held message to `queue`. Returns the put-callback to run
    /// once interrupts are unmasked.
    fn enqueue<P: Port>(&mut self, port: &P, queue: QueueId, msg: Msg) -> Option<(PutFn, usize)> {
        let h = &mut self.msgs[msg.id.index()];
        assert!(h.queue.is_none(), "message already queued");
        debug_assert_eq!(h.home, msg.home);
        h.queue = Some(queue);
        h.buf = Some(msg.buf);

        let q = &mut self.queues[queue.index()];
        q.push(&mut self.msgs, msg.id);

        let sem = match &mut q.data {
            QueueData::Task { sem } => *sem,
            QueueData::Driver { count, put, data, .. } => {
                *count += 1;
                log::trace!("put '{}' msg {}", q.name, msg.id.0);
                return put.map(|f| (f, *data));
            }
        };

        self.sem_post(port, sem);
        None
    }

    /// Take the head of `queue` and hand out its buffer.
    fn dequeue(&mut self, queue: QueueId) -> Option<Msg> {
        let id = self.queues[queue.index()].pop(&mut self.msgs)?;
        let h = &mut self.msgs[id.index()];
        h.queue = None;
        let Some(buf) = h.buf.take() else {
            panic!("queued message {} has no buffer", id.0);
        };
        Some(Msg { id, home: h.home, buf })
    }
}

// ---------------------------------------------------------------------------
// Queue API
// ---------------------------------------------------------------------------

impl<P: Port> Kernel<P> {
    /// Create an empty queue. Task queues also get a semaphore.
    pub fn queue_create(&self, name: &'static str, kind: QueueKind) -> Result<QueueId, Error> {
        if self.critical(|st| st.queues.is_full()) {
            log::warn!("no memory for queue '{}'", name);
            return Err(Error::NoMemory);
        }

        let data = match kind {
            QueueKind::Task => QueueData::Task { sem: self.sem_create(name, 0)? },
            QueueKind::Driver => QueueData::Driver { count: 0, put: None, control: None, data: 0 },
        };

        let queue = Queue { name, first: None, last: None, pool: None, data };
        let id = self.critical(|st| {
            let id = QueueId(st.queues.len() as u16);
            st.queues.push(queue).ok().map(|_| id)
        });

        let Some(id) = id else {
            log::warn!("no memory for queue '{}'", name);
            return Err(Error::NoMemory);
        };
        log::debug!("queue '{}' created, type {}", name, kind.as_char());
        Ok(id)
    }

    /// Install the put- and control-callbacks of a driver queue together
    /// with the data word passed to them.
    pub fn queue_set_put_f(
        &self,
        queue: QueueId,
        put: Option<PutFn>,
        control: Option<ControlFn>,
        data: usize,
    ) -> Result<(), Error> {
        self.critical(|st| match &mut st.queues[queue.index()].data {
            QueueData::Driver { put: p, control: c, data: d, .. } => {
                *p = put;
                *c = control;
                *d = data;
                Ok(())
            }
            QueueData::Task { .. } => Err(Error::WrongQueueKind),
        })
    }

    /// Forward a control request to the driver behind `queue`.
    pub fn queue_control(&self, queue: QueueId, control: u32, arg: usize) -> Result<i32, Error> {
        let (f, data) = self.critical(|st| match st.queues[queue.index()].data {
            QueueData::Driver { control: Some(f), data, .. } => Ok((f, data)),
            QueueData::Driver { control: None, .. } => Err(Error::NoControl),
            QueueData::Task { .. } => Err(Error::WrongQueueKind),
        })?;
        Ok(f(data, control, arg))
    }

    /// Find a queue by name. The first match wins.
    pub fn queue_lookup(&self, name: &str) -> Option<QueueId> {
        self.critical(|st| {
            st.queues
                .iter()
                .position(|q| q.name == name)
                .map(|i| QueueId(i as u16))
        })
    }

    pub fn queue_get_name(&self, queue: QueueId) -> &'static str {
        self.critical(|st| st.queues[queue.index()].name)
    }

    pub fn queue_kind(&self, queue: QueueId) -> QueueKind {
        self.critical(|st| st.queues[queue.index()].kind())
    }

    /// Number of messages on the queue.
    pub fn queue_get_count(&self, queue: QueueId) -> u32 {
        self.critical(|st| st.queue_count(queue))
    }

    pub fn queue_info(&self) -> Vec<QueueInfo, MAX_QUEUES> {
        self.critical(|st| {
            (0..st.queues.len())
                .map(|i| {
                    let q = &st.queues[i];
                    QueueInfo {
                        name: q.name,
                        kind: q.kind(),
                        count: st.queue_count(QueueId(i as u16)),
                        pool: q.pool,
                    }
                })
                .collect()
        })
    }

    /// The messages on `queue`, head first.
    pub fn queue_msgs(&self, queue: QueueId) -> Vec<MsgInfo, MAX_INFO_MSGS> {
        self.critical(|st| {
            let mut cur = st.queues[queue.index()].first;
            core::iter::from_fn(|| {
                let id = cur?;
                cur = st.msgs[id.index()].next;
                Some(st.msg_info(id))
            })
            .take(MAX_INFO_MSGS)
            .collect()
        })
    }

    /// Every slot belonging to `pool`, wherever it currently is. Empty for
    /// a queue that is not a pool.
    pub fn pool_msgs(&self, pool: QueueId) -> Vec<MsgInfo, MAX_INFO_MSGS> {
        self.critical(|st| {
            (0..st.msgs.len())
                .map(|i| MsgId(i as u16))
                .filter(|id| st.msgs[id.index()].home == pool)
                .take(MAX_INFO_MSGS)
                .map(|id| st.msg_info(id))
                .collect()
        })
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Put a message on `queue`.
    ///
    /// Panics if the message is somehow still recorded on a queue.
    pub fn msg_put(&self, queue: QueueId, msg: Msg) {
        let callback = self.critical(|st| st.enqueue(self.port(), queue, msg));

        if let Some((f, data)) = callback {
            f(data);
        }
    }

    /// Take a message from `queue`, waiting up to `tms` ticks on a task
    /// queue. Driver queues ignore `tms` and always poll.
    pub fn msg_wait_ms(&self, queue: QueueId, tms: i32) -> Option<Msg> {
        let sem = self.critical(|st| match st.queues[queue.index()].data {
            QueueData::Task { sem } => Some(sem),
            QueueData::Driver { .. } => None,
        });

        match sem {
            Some(sem) => {
                if !self.sem_wait_ms(sem, tms).is_ok() {
                    return None;
                }
                let msg = self.critical(|st| st.dequeue(queue));
                assert!(msg.is_some(), "task queue count out of step");
                msg
            }
            None => self.critical(|st| {
                let QueueData::Driver { count, .. } = &mut st.queues[queue.index()].data else {
                    unreachable!();
                };
                let msg = if *count > 0 {
                    *count -= 1;
                    let msg = st.dequeue(queue);
                    assert!(msg.is_some(), "driver queue count out of step");
                    msg
                } else {
                    None
                };
                log::trace!("get '{}' msg {:?}", st.queues[queue.index()].name, msg.as_ref().map(|m| m.id.0));
                msg
            }),
        }
    }

    /// Poll `queue` once.
    pub fn msg_get(&self, queue: QueueId) -> Option<Msg> {
        self.msg_wait_ms(queue, NO_WAIT)
    }

    /// Wait for a message without timeout (driver queues still only poll).
    pub fn msg_wait(&self, queue: QueueId) -> Option<Msg> {
        self.msg_wait_ms(queue, WAIT_FOREVER)
    }

    /// Give a message back to its home pool.
    pub fn msg_return(&self, msg: Msg) {
        self.msg_put(msg.home, msg);
    }

    /// Create a pool of `count` messages of `size` bytes each.
    ///
    /// `size` is rounded up to a multiple of 4. The pool is a queue of the
    /// given kind that starts out holding every slot.
    pub fn msg_pool_create(
        &self,
        name: &'static str,
        kind: QueueKind,
        count: usize,
        size: usize,
    ) -> Result<QueueId, Error> {
        let size = size.next_multiple_of(POOL_ALIGN);

        if self.critical(|st| st.msgs.len().saturating_add(count) > MAX_MSGS) {
            log::warn!("no message slots for pool '{}'", name);
            return Err(Error::NoMemory);
        }

        let mut storage = AllocVec::new();
        let total = count.checked_mul(size).ok_or(Error::NoMemory)?;
        if storage.try_reserve_exact(total).is_err() {
            log::warn!("no memory for pool '{}'", name);
            return Err(Error::NoMemory);
        }
        storage.resize(total, 0u8);

        let queue = self.queue_create(name, kind)?;

        let first = self.critical(|st| {
            if st.msgs.len() + count > MAX_MSGS {
                return None;
            }
            st.queues[queue.index()].pool = Some(PoolData { count, size });
            let first = st.msgs.len();
            for _ in 0..count {
                let h = MsgHeader { next: None, home: queue, queue: None, buf: None };
                if st.msgs.push(h).is_err() {
                    return None;
                }
            }
            Some(first)
        });

        let Some(first) = first else {
            log::warn!("no message slots for pool '{}'", name);
            return Err(Error::NoMemory);
        };

        let mut rest: &'static mut [u8] = storage.leak();
        for i in 0..count {
            let (buf, tail) = core::mem::take(&mut rest).split_at_mut(size);
            rest = tail;
            let id = MsgId((first + i) as u16);
            self.msg_put(queue, Msg { id, home: queue, buf });
        }

        log::debug!("pool '{}' created, {} x {} bytes", name, count, size);
        Ok(queue)
    }
}
