//! In-process transport: N tasks, one per thread, sharing tagged mailboxes.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Barrier,
    },
};

use parking_lot::{Condvar, Mutex};

use super::{
    check_task_id,
    mailbox::{check_len, MailboxRecv, Mailboxes},
    request::Request,
    transport::Transport,
    MsgTag, TaskId,
};
use crate::result::{RegHandleErr, RegResult};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(0);

struct SplitRound {
    // (color, key) per old task id
    entries: Vec<Option<(u32, i64)>>,
    groups: HashMap<u32, Arc<Group>>,
    readers: usize,
}

struct Group {
    id: u64,
    size: usize,
    boxes: Arc<Mailboxes>,
    barrier: Barrier,
    rounds: Mutex<HashMap<u64, SplitRound>>,
    round_filled: Condvar,
}

impl Group {
    fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            size,
            boxes: Arc::new(Mailboxes::default()),
            barrier: Barrier::new(size),
            rounds: Mutex::new(HashMap::new()),
            round_filled: Condvar::new(),
        })
    }
}

pub struct Fabric;

impl Fabric {
    /// World handles for `tasks` tasks; hand one to each thread.
    pub fn world(tasks: usize) -> Vec<FabricComm> {
        let group = Group::new(tasks.max(1));
        tracing::debug!("fabric group {} created with {} tasks", group.id, group.size);
        (0..group.size)
            .map(|rank| FabricComm::new(group.clone(), rank as TaskId))
            .collect()
    }
}

pub struct FabricComm {
    group: Arc<Group>,
    rank: TaskId,
    split_epoch: AtomicU64,
    finalized: AtomicBool,
}

impl FabricComm {
    fn new(group: Arc<Group>, rank: TaskId) -> Self {
        Self {
            group,
            rank,
            split_epoch: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
        }
    }

    fn live(&self, op: &'static str) -> RegResult<()> {
        if self.finalized.load(Ordering::Acquire) {
            return Err(RegHandleErr::CommFinalized { op }.into());
        }
        Ok(())
    }

    /// Messages posted to this group and not yet received.
    pub fn pending_messages(&self) -> usize {
        self.group.boxes.pending()
    }
}

impl Transport for FabricComm {
    fn num_tasks(&self) -> usize {
        self.group.size
    }

    fn task_id(&self) -> TaskId {
        self.rank
    }

    fn barrier(&self) -> RegResult<()> {
        self.live("barrier")?;
        let _ = self.group.barrier.wait();
        Ok(())
    }

    fn split(&self, color: u32, key: i64) -> RegResult<Box<dyn Transport>> {
        self.live("split")?;
        let epoch = self.split_epoch.fetch_add(1, Ordering::Relaxed);
        let size = self.group.size;
        let mut rounds = self.group.rounds.lock();
        rounds
            .entry(epoch)
            .or_insert_with(|| SplitRound {
                entries: vec![None; size],
                groups: HashMap::new(),
                readers: 0,
            })
            .entries[self.rank as usize] = Some((color, key));
        let _ = self.group.round_filled.notify_all();

        loop {
            let filled = rounds
                .get(&epoch)
                .map_or(0, |round| round.entries.iter().flatten().count());
            if filled == size {
                break;
            }
            self.group.round_filled.wait(&mut rounds);
        }

        let round = rounds
            .get_mut(&epoch)
            .ok_or(RegHandleErr::CommFinalized { op: "split" })?;
        let mut members: Vec<(i64, TaskId)> = round
            .entries
            .iter()
            .enumerate()
            .filter_map(|(rank, entry)| match entry {
                Some((c, k)) if *c == color => Some((*k, rank as TaskId)),
                _ => None,
            })
            .collect();
        members.sort();
        let new_rank = members
            .iter()
            .position(|(_, rank)| *rank == self.rank)
            .unwrap_or_default() as TaskId;
        let sub = round
            .groups
            .entry(color)
            .or_insert_with(|| Group::new(members.len()))
            .clone();
        round.readers += 1;
        if round.readers == size {
            let _ = rounds.remove(&epoch);
        }
        tracing::debug!(
            "fabric group {} task {} split into group {} as task {} of {}",
            self.group.id,
            self.rank,
            sub.id,
            new_rank,
            sub.size
        );
        Ok(Box::new(FabricComm::new(sub, new_rank)))
    }

    fn split_shared(&self) -> RegResult<Box<dyn Transport>> {
        // every task of the fabric lives in this process
        self.split(0, self.rank as i64)
    }

    fn send(&self, dest: TaskId, tag: MsgTag, bytes: &[u8]) -> RegResult<()> {
        self.live("send")?;
        check_task_id(self, dest, "send")?;
        self.group.boxes.post((self.rank, dest, tag), bytes.to_vec());
        Ok(())
    }

    fn recv(&self, src: TaskId, tag: MsgTag, dest: &mut [u8]) -> RegResult<()> {
        self.live("recv")?;
        check_task_id(self, src, "recv")?;
        let route = (src, self.rank, tag);
        let bytes = self.group.boxes.take(route);
        check_len(route, dest.len(), &bytes)?;
        dest.copy_from_slice(&bytes);
        Ok(())
    }

    fn isend(&self, dest: TaskId, tag: MsgTag, bytes: Vec<u8>) -> RegResult<Request> {
        self.live("isend")?;
        check_task_id(self, dest, "isend")?;
        // sends are buffered, so the request is complete on return
        self.group.boxes.post((self.rank, dest, tag), bytes);
        Ok(Request::ready(None))
    }

    fn irecv(&self, src: TaskId, tag: MsgTag, len: usize) -> RegResult<Request> {
        self.live("irecv")?;
        check_task_id(self, src, "irecv")?;
        Ok(Request::transport(Box::new(MailboxRecv::new(
            self.group.boxes.clone(),
            (src, self.rank, tag),
            len,
        ))))
    }

    fn finalize(&self) -> RegResult<()> {
        if !self.finalized.swap(true, Ordering::AcqRel) {
            tracing::debug!("fabric group {} task {} finalized", self.group.id, self.rank);
        }
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ErrorKind;
    use std::{
        sync::atomic::AtomicUsize,
        thread,
        time::{Duration, Instant},
    };

    fn run_world<F>(tasks: usize, f: F)
    where
        F: Fn(FabricComm) + Send + Sync + Copy + 'static,
    {
        let handles: Vec<_> = Fabric::world(tasks)
            .into_iter()
            .map(|comm| thread::spawn(move || f(comm)))
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_ring_send_recv() {
        run_world(4, |comm| {
            let n = comm.num_tasks() as TaskId;
            let me = comm.task_id();
            comm.send((me + 1) % n, 7, &[me as u8; 16]).unwrap();
            let mut got = [0u8; 16];
            comm.recv((me + n - 1) % n, 7, &mut got).unwrap();
            assert_eq!(got, [((me + n - 1) % n) as u8; 16]);
        });
    }

    #[test]
    fn test_tags_do_not_mix() {
        run_world(2, |comm| {
            if comm.is_master() {
                comm.send(1, 1, b"one").unwrap();
                comm.send(1, 2, b"two").unwrap();
            } else {
                let mut buf = [0u8; 3];
                comm.recv(0, 2, &mut buf).unwrap();
                assert_eq!(&buf, b"two");
                comm.recv(0, 1, &mut buf).unwrap();
                assert_eq!(&buf, b"one");
            }
        });
    }

    #[test]
    fn test_barrier_orders_phases() {
        static ARRIVED: AtomicUsize = AtomicUsize::new(0);
        run_world(4, |comm| {
            let _ = ARRIVED.fetch_add(1, Ordering::SeqCst);
            comm.barrier().unwrap();
            assert_eq!(ARRIVED.load(Ordering::SeqCst), 4);
        });
    }

    #[test]
    fn test_split_even_odd_reversed_keys() {
        run_world(6, |comm| {
            let me = comm.task_id();
            let sub = comm.split(me % 2, -(me as i64)).unwrap();
            assert_eq!(sub.num_tasks(), 3);
            // highest old rank gets the lowest key, hence rank 0
            let expect = match me {
                4 | 5 => 0,
                2 | 3 => 1,
                _ => 2,
            };
            assert_eq!(sub.task_id(), expect);
            sub.barrier().unwrap();

            // messages inside the subgroup use subgroup ranks
            let peer = (sub.task_id() + 1) % 3;
            sub.send(peer, 0, &[me as u8]).unwrap();
            let mut got = [0u8; 1];
            sub.recv((sub.task_id() + 2) % 3, 0, &mut got).unwrap();
            assert_eq!(got[0] % 2, (me % 2) as u8);

            let shared = comm.split_shared().unwrap();
            assert_eq!(shared.num_tasks(), 6);
            assert_eq!(shared.task_id(), me);
        });
    }

    #[test]
    fn test_invalid_rank_and_finalize() {
        let comms = Fabric::world(2);
        let comm = &comms[0];
        assert_eq!(
            comm.send(2, 0, b"x").unwrap_err().kind(),
            ErrorKind::InvalidHandle
        );
        assert_eq!(
            comm.irecv(9, 0, 1).unwrap_err().kind(),
            ErrorKind::InvalidHandle
        );
        comm.finalize().unwrap();
        comm.finalize().unwrap();
        assert!(comm.is_finalized());
        assert_eq!(comm.barrier().unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(comm.send(1, 0, b"x").unwrap_err().kind(), ErrorKind::InvalidHandle);
        // the other task's handle is unaffected
        comms[1].send(0, 0, b"x").unwrap();
        assert_eq!(comms[1].pending_messages(), 1);
    }

    #[test]
    fn test_irecv_polling_and_len_mismatch() {
        let comms = Fabric::world(2);
        let mut req = comms[1].irecv(0, 5, 4).unwrap();
        assert!(req.is_valid());
        assert!(!req.is_complete());
        let sent = comms[0].isend(1, 5, vec![1, 2, 3, 4]).unwrap();
        assert!(!sent.is_valid());
        let start = Instant::now();
        while !req.is_complete() {
            assert!(start.elapsed() < Duration::from_secs(5));
        }
        assert_eq!(req.finalize().unwrap(), Some(vec![1, 2, 3, 4]));

        comms[0].send(1, 6, &[0; 3]).unwrap();
        let mut buf = [0u8; 4];
        let err = comms[1].recv(0, 6, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }
}
