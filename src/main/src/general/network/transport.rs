use super::{request::Request, MsgTag, TaskId};
use crate::result::RegResult;

/// A group of cooperating tasks able to exchange tagged byte messages.
///
/// Every method is called by one task on its own handle. Collective calls
/// (`barrier`, `split`, `split_shared`) must be made by every task of the
/// group in the same order.
pub trait Transport: Send + Sync {
    fn num_tasks(&self) -> usize;

    fn task_id(&self) -> TaskId;

    fn is_master(&self) -> bool {
        self.task_id() == 0
    }

    fn barrier(&self) -> RegResult<()>;

    /// Partitions the group by `color`; members of a new group are ranked by
    /// `(key, old task id)`.
    fn split(&self, color: u32, key: i64) -> RegResult<Box<dyn Transport>>;

    /// Subgroup of tasks sharing memory with this one.
    fn split_shared(&self) -> RegResult<Box<dyn Transport>>;

    /// Blocking send; returns once `bytes` may be reused.
    fn send(&self, dest: TaskId, tag: MsgTag, bytes: &[u8]) -> RegResult<()>;

    /// Blocking receive of exactly `dest.len()` bytes.
    fn recv(&self, src: TaskId, tag: MsgTag, dest: &mut [u8]) -> RegResult<()>;

    fn isend(&self, dest: TaskId, tag: MsgTag, bytes: Vec<u8>) -> RegResult<Request>;

    /// The received bytes become the request's output.
    fn irecv(&self, src: TaskId, tag: MsgTag, len: usize) -> RegResult<Request>;

    /// Releases this task's handle; later calls fail with `InvalidHandle`.
    fn finalize(&self) -> RegResult<()>;

    fn is_finalized(&self) -> bool;
}
