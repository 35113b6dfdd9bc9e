use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::{Condvar, Mutex};

use super::{
    request::{Payload, TransportHandle},
    MsgTag, TaskId,
};
use crate::result::{RegHandleErr, RegResult};

/// (source, destination, tag)
pub type Route = (TaskId, TaskId, MsgTag);

/// Tagged FIFO queues shared by every task of an in-process group.
#[derive(Default)]
pub struct Mailboxes {
    queues: Mutex<HashMap<Route, VecDeque<Vec<u8>>>>,
    arrived: Condvar,
}

impl Mailboxes {
    pub fn post(&self, route: Route, bytes: Vec<u8>) {
        let mut queues = self.queues.lock();
        queues.entry(route).or_default().push_back(bytes);
        let _ = self.arrived.notify_all();
    }

    pub fn try_take(&self, route: Route) -> Option<Vec<u8>> {
        let mut queues = self.queues.lock();
        Self::pop(&mut queues, route)
    }

    pub fn take(&self, route: Route) -> Vec<u8> {
        let mut queues = self.queues.lock();
        loop {
            if let Some(bytes) = Self::pop(&mut queues, route) {
                return bytes;
            }
            self.arrived.wait(&mut queues);
        }
    }

    fn pop(queues: &mut HashMap<Route, VecDeque<Vec<u8>>>, route: Route) -> Option<Vec<u8>> {
        let queue = queues.get_mut(&route)?;
        let bytes = queue.pop_front();
        if queue.is_empty() {
            let _ = queues.remove(&route);
        }
        bytes
    }

    /// Messages waiting in every queue.
    pub fn pending(&self) -> usize {
        self.queues.lock().values().map(|q| q.len()).sum()
    }
}

pub fn check_len(route: Route, expect: usize, bytes: &[u8]) -> RegResult<()> {
    if bytes.len() != expect {
        return Err(RegHandleErr::RecvLenMismatch {
            src: route.0,
            tag: route.2,
            expect,
            actual: bytes.len(),
        }
        .into());
    }
    Ok(())
}

/// Pending receive, completed by the first matching message.
pub struct MailboxRecv {
    boxes: Arc<Mailboxes>,
    route: Route,
    len: usize,
    got: Option<Vec<u8>>,
}

impl MailboxRecv {
    pub fn new(boxes: Arc<Mailboxes>, route: Route, len: usize) -> Self {
        Self {
            boxes,
            route,
            len,
            got: None,
        }
    }
}

impl TransportHandle for MailboxRecv {
    fn test(&mut self) -> bool {
        if self.got.is_none() {
            self.got = self.boxes.try_take(self.route);
        }
        self.got.is_some()
    }

    fn wait(&mut self) -> RegResult<Payload> {
        let bytes = match self.got.take() {
            Some(bytes) => bytes,
            None => self.boxes.take(self.route),
        };
        check_len(self.route, self.len, &bytes)?;
        Ok(Some(bytes))
    }
}
