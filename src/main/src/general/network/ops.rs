//! Point-to-point helpers callable by every task of a group.
//!
//! Each task passes the same arguments; the operation picks the role of the
//! calling task. The sender reads `src`, the receiver fills `dest`, and other
//! tasks do nothing. A transfer whose source and destination are the same
//! task is a plain local copy.

use super::{check_task_id, request::Request, transport::Transport, MsgTag, TaskId};
use crate::{
    result::{RegHandleErr, RegResult},
    util::copy_bytes,
};

pub fn barrier(comm: &dyn Transport) -> RegResult<()> {
    comm.barrier()
}

fn check_ids(
    comm: &dyn Transport,
    dest_id: TaskId,
    src_id: TaskId,
    op: &'static str,
) -> RegResult<()> {
    check_task_id(comm, dest_id, op)?;
    check_task_id(comm, src_id, op)
}

fn check_src_len(src: &[u8], bytes: usize) -> RegResult<()> {
    if src.len() < bytes {
        return Err(RegHandleErr::ByteRangeOutOfBound {
            offsets: Vec::new(),
            start: 0,
            len: bytes,
            bytes: src.len(),
        }
        .into());
    }
    Ok(())
}

/// Blocking transfer of `dest.len()` bytes from task `src_id` to `dest_id`.
pub fn send_recv(
    comm: &dyn Transport,
    dest: &mut [u8],
    src: &[u8],
    dest_id: TaskId,
    src_id: TaskId,
    tag: MsgTag,
) -> RegResult<()> {
    check_ids(comm, dest_id, src_id, "send_recv")?;
    let me = comm.task_id();
    let bytes = dest.len();
    if src_id == dest_id {
        if me == src_id {
            check_src_len(src, bytes)?;
            // SAFETY: both ranges are `bytes` long; overlap is handled by copy_bytes.
            unsafe { copy_bytes(dest.as_mut_ptr(), src.as_ptr(), bytes) };
        }
        Ok(())
    } else if me == src_id {
        check_src_len(src, bytes)?;
        tracing::debug!("task {} sends {} bytes to {} tag {}", me, bytes, dest_id, tag);
        comm.send(dest_id, tag, &src[..bytes])
    } else if me == dest_id {
        tracing::debug!("task {} receives {} bytes from {} tag {}", me, bytes, src_id, tag);
        comm.recv(src_id, tag, dest)
    } else {
        Ok(())
    }
}

/// Non-blocking form of [`send_recv`]. The receiver's request yields the
/// `bytes` received; a self-to-self transfer completes immediately with a
/// copy of `src`; tasks not involved get an empty request.
pub fn async_send_recv(
    comm: &dyn Transport,
    src: &[u8],
    bytes: usize,
    dest_id: TaskId,
    src_id: TaskId,
    tag: MsgTag,
) -> RegResult<Request> {
    check_ids(comm, dest_id, src_id, "async_send_recv")?;
    let me = comm.task_id();
    if src_id == dest_id {
        if me == src_id {
            check_src_len(src, bytes)?;
            return Ok(Request::ready(Some(src[..bytes].to_vec())));
        }
        Ok(Request::null())
    } else if me == src_id {
        check_src_len(src, bytes)?;
        comm.isend(dest_id, tag, src[..bytes].to_vec())
    } else if me == dest_id {
        comm.irecv(src_id, tag, bytes)
    } else {
        Ok(Request::null())
    }
}
