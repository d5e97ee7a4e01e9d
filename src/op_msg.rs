//! Op-code messages.
//!
//! An [`OpMsg`] is a raw [`Msg`] whose payload starts with a small header
//! carrying a 16-bit operation code and a 16-bit data length. Several
//! logical streams can then share one physical queue, e.g. two UARTs
//! feeding one shell.
//!
//! ```text
//!   payload: ┌────────┬────────┬──────────────────────────┐
//!            │ op u16 │ len u16│ data (capacity bytes)    │
//!            └────────┴────────┴──────────────────────────┘
//! ```

use crate::arch::Port;
use crate::config::{NO_WAIT, WAIT_FOREVER};
use crate::error::Error;
use crate::kernel::Kernel;
use crate::queue::{Msg, QueueId, QueueKind};

/// Bytes taken by the `{op, len}` header.
pub const OP_HEADER_SIZE: usize = 4;

/// A message with an op-code header.
#[must_use = "a dropped message is lost to its pool"]
#[derive(Debug)]
pub struct OpMsg(Msg);

impl OpMsg {
    /// View a raw message as an op-message.
    ///
    /// Panics if the slot is too small to carry the header.
    pub fn from_msg(msg: Msg) -> Self {
        assert!(msg.len() >= OP_HEADER_SIZE, "message too small for op header");
        Self(msg)
    }

    pub fn into_msg(self) -> Msg {
        self.0
    }

    pub fn op(&self) -> u16 {
        let b = self.0.data();
        u16::from_ne_bytes([b[0], b[1]])
    }

    /// Length of the valid data, as set by the last put.
    pub fn len(&self) -> usize {
        let b = self.0.data();
        u16::from_ne_bytes([b[2], b[3]]) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Room for data after the header.
    pub fn capacity(&self) -> usize {
        self.0.len() - OP_HEADER_SIZE
    }

    /// The valid data.
    pub fn data(&self) -> &[u8] {
        let len = self.len().min(self.capacity());
        &self.0.data()[OP_HEADER_SIZE..OP_HEADER_SIZE + len]
    }

    /// The whole data area, for filling before a put.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.0.data_mut()[OP_HEADER_SIZE..]
    }

    fn set_header(&mut self, op: u16, len: u16) {
        let b = self.0.data_mut();
        b[..2].copy_from_slice(&op.to_ne_bytes());
        b[2..4].copy_from_slice(&len.to_ne_bytes());
    }
}

impl<P: Port> Kernel<P> {
    /// Stamp `op` and `len` into the header and put the message on `queue`.
    pub fn op_msg_put(&self, queue: QueueId, mut msg: OpMsg, op: u16, len: u16) {
        assert!(len as usize <= msg.capacity(), "op message length {} exceeds slot", len);
        msg.set_header(op, len);
        self.msg_put(queue, msg.0);
    }

    pub fn op_msg_wait_ms(&self, queue: QueueId, tms: i32) -> Option<OpMsg> {
        self.msg_wait_ms(queue, tms).map(OpMsg::from_msg)
    }

    pub fn op_msg_get(&self, queue: QueueId) -> Option<OpMsg> {
        self.op_msg_wait_ms(queue, NO_WAIT)
    }

    pub fn op_msg_wait(&self, queue: QueueId) -> Option<OpMsg> {
        self.op_msg_wait_ms(queue, WAIT_FOREVER)
    }

    pub fn op_msg_return(&self, msg: OpMsg) {
        self.msg_return(msg.0);
    }

    /// Create a pool whose slots hold `size` data bytes after the header.
    pub fn op_msg_pool_create(
        &self,
        name: &'static str,
        kind: QueueKind,
        count: usize,
        size: usize,
    ) -> Result<QueueId, Error> {
        self.msg_pool_create(name, kind, count, size + OP_HEADER_SIZE)
    }
}
