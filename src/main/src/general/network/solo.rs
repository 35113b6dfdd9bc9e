use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use super::{
    check_task_id,
    mailbox::{check_len, MailboxRecv, Mailboxes},
    request::Request,
    transport::Transport,
    MsgTag, TaskId,
};
use crate::result::{RegHandleErr, RegResult};

/// A group of exactly one task. Barriers return at once and every transfer
/// is self-to-self.
#[derive(Default)]
pub struct SoloComm {
    boxes: Arc<Mailboxes>,
    finalized: AtomicBool,
}

impl SoloComm {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, op: &'static str) -> RegResult<()> {
        if self.finalized.load(Ordering::Acquire) {
            return Err(RegHandleErr::CommFinalized { op }.into());
        }
        Ok(())
    }
}

impl Transport for SoloComm {
    fn num_tasks(&self) -> usize {
        1
    }

    fn task_id(&self) -> TaskId {
        0
    }

    fn barrier(&self) -> RegResult<()> {
        self.live("barrier")
    }

    fn split(&self, _color: u32, _key: i64) -> RegResult<Box<dyn Transport>> {
        self.live("split")?;
        Ok(Box::new(SoloComm::new()))
    }

    fn split_shared(&self) -> RegResult<Box<dyn Transport>> {
        self.split(0, 0)
    }

    fn send(&self, dest: TaskId, tag: MsgTag, bytes: &[u8]) -> RegResult<()> {
        self.live("send")?;
        check_task_id(self, dest, "send")?;
        self.boxes.post((0, 0, tag), bytes.to_vec());
        Ok(())
    }

    /// Blocks until a matching `send` was made, so a receive must follow its send.
    fn recv(&self, src: TaskId, tag: MsgTag, dest: &mut [u8]) -> RegResult<()> {
        self.live("recv")?;
        check_task_id(self, src, "recv")?;
        let route = (0, 0, tag);
        let bytes = self.boxes.take(route);
        check_len(route, dest.len(), &bytes)?;
        dest.copy_from_slice(&bytes);
        Ok(())
    }

    fn isend(&self, dest: TaskId, tag: MsgTag, bytes: Vec<u8>) -> RegResult<Request> {
        self.send(dest, tag, &bytes)?;
        Ok(Request::ready(None))
    }

    fn irecv(&self, src: TaskId, tag: MsgTag, len: usize) -> RegResult<Request> {
        self.live("irecv")?;
        check_task_id(self, src, "irecv")?;
        Ok(Request::transport(Box::new(MailboxRecv::new(
            self.boxes.clone(),
            (0, 0, tag),
            len,
        ))))
    }

    fn finalize(&self) -> RegResult<()> {
        self.finalized.store(true, Ordering::Release);
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }
}
