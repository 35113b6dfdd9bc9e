//! File shared by every task of a transport group.
//!
//! Each task holds its own [`SharedFile`] for the same path. Positioned I/O
//! (`read_at`/`write_at` and their collective and async forms) is the way to
//! write disjoint regions from several tasks; `read`/`write` use a per-handle
//! position.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    general::{
        network::{Request, Transport},
        registry::Named,
    },
    result::{RegError, RegFileErr, RegHandleErr, RegIoErr, RegResult},
    util::container::{HierCell, HierLock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// `r`
    Read,
    /// `r+`
    ReadWrite,
    /// `w`, creates or truncates
    Write,
    /// `w+`, creates or truncates
    WriteRead,
}

impl FileMode {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "r" => Some(Self::Read),
            "r+" => Some(Self::ReadWrite),
            "w" => Some(Self::Write),
            "w+" => Some(Self::WriteRead),
            _ => None,
        }
    }

    pub fn creates(self) -> bool {
        matches!(self, Self::Write | Self::WriteRead)
    }

    fn options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        let _ = match self {
            Self::Read => opts.read(true),
            Self::ReadWrite | Self::WriteRead => opts.read(true).write(true),
            Self::Write => opts.write(true),
        };
        opts
    }
}

#[derive(Default)]
struct FileState {
    file: Option<Arc<File>>,
    mode: Option<FileMode>,
    pos: u64,
}

pub struct SharedFile {
    name: String,
    path: PathBuf,
    state: HierCell<FileState>,
}

impl std::fmt::Debug for SharedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFile")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SharedFile {
    /// Handle for `path`, registered under the path itself.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::with_name(path.display().to_string(), path)
    }

    pub fn with_name(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            state: HierCell::new(FileState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.state
            .read("is_open", |st| st.file.is_some())
            .unwrap_or(false)
    }

    pub fn mode(&self) -> Option<FileMode> {
        self.state.read("mode", |st| st.mode).ok().flatten()
    }

    fn io_err(&self, op: &'static str, err: std::io::Error) -> RegError {
        RegIoErr::File {
            path: self.path.clone(),
            op,
            err,
        }
        .into()
    }

    fn closed(&self, op: &'static str) -> RegError {
        RegFileErr::AlreadyClosed {
            name: self.name.clone(),
            op,
        }
        .into()
    }

    fn already_open(&self) -> RegError {
        RegFileErr::AlreadyOpen {
            name: self.name.clone(),
        }
        .into()
    }

    /// Opens the file on every task of `comm`. For `w` and `w+` the master
    /// creates or truncates it first and all tasks meet at a barrier.
    pub fn open(&self, comm: &dyn Transport, mode: &str) -> RegResult<()> {
        let parsed = FileMode::parse(mode).ok_or_else(|| RegHandleErr::BadFileMode {
            name: self.name.clone(),
            mode: mode.to_owned(),
        })?;
        if self.is_open() {
            return Err(self.already_open());
        }
        if parsed.creates() {
            // the master still meets the barrier when creation fails, the
            // other tasks then fail on their own open
            let created = if comm.is_master() {
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&self.path)
                    .map(|_| ())
                    .map_err(|err| self.io_err("create", err))
            } else {
                Ok(())
            };
            comm.barrier()?;
            created?;
        }
        let file = parsed
            .options()
            .open(&self.path)
            .map_err(|err| self.io_err("open", err))?;
        self.state.write("open", |st, _| {
            if st.file.is_some() {
                return Err(self.already_open());
            }
            st.file = Some(Arc::new(file));
            st.mode = Some(parsed);
            st.pos = 0;
            Ok(())
        })??;
        tracing::debug!(
            "task {} opened {} as {}",
            comm.task_id(),
            self.path.display(),
            mode
        );
        Ok(())
    }

    /// Closing a closed file does nothing.
    pub fn close(&self) -> RegResult<()> {
        let file = self.state.write("close", |st, _| {
            st.mode = None;
            st.pos = 0;
            st.file.take()
        })?;
        if file.is_some() {
            tracing::debug!("closed {}", self.path.display());
        }
        Ok(())
    }

    fn handle(&self, op: &'static str) -> RegResult<Arc<File>> {
        self.state
            .read(op, |st| st.file.clone())?
            .ok_or_else(|| self.closed(op))
    }

    pub fn seek(&self, offset: u64) -> RegResult<()> {
        self.state.write("seek", |st, _| {
            if st.file.is_none() {
                return Err(self.closed("seek"));
            }
            st.pos = offset;
            Ok(())
        })?
    }

    pub fn get_pos(&self) -> RegResult<u64> {
        self.state.read("get_pos", |st| {
            st.file.as_ref().map(|_| st.pos).ok_or_else(|| self.closed("get_pos"))
        })?
    }

    /// Reads `buf.len()` bytes at the current position and advances it.
    pub fn read(&self, buf: &mut [u8]) -> RegResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.state.write("read", |st, _| {
            let file = st.file.as_ref().ok_or_else(|| self.closed("read"))?;
            file.read_exact_at(buf, st.pos)
                .map_err(|err| self.io_err("read", err))?;
            st.pos += buf.len() as u64;
            Ok(())
        })?
    }

    /// Writes `buf` at the current position and advances it.
    pub fn write(&self, buf: &[u8]) -> RegResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.state.write("write", |st, _| {
            let file = st.file.as_ref().ok_or_else(|| self.closed("write"))?;
            file.write_all_at(buf, st.pos)
                .map_err(|err| self.io_err("write", err))?;
            st.pos += buf.len() as u64;
            Ok(())
        })?
    }

    /// Positioned read; the handle position is left unchanged.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> RegResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.handle("read_at")?
            .read_exact_at(buf, offset)
            .map_err(|err| self.io_err("read_at", err))
    }

    /// Positioned write; the handle position is left unchanged.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> RegResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.handle("write_at")?
            .write_all_at(buf, offset)
            .map_err(|err| self.io_err("write_at", err))
    }

    /// Collective form of [`SharedFile::read_at`]; every task of the group
    /// calls it. The local provider has no collective buffering.
    pub fn read_at_all(&self, offset: u64, buf: &mut [u8]) -> RegResult<()> {
        self.read_at(offset, buf)
    }

    /// Collective form of [`SharedFile::write_at`].
    pub fn write_at_all(&self, offset: u64, buf: &[u8]) -> RegResult<()> {
        self.write_at(offset, buf)
    }

    fn spawn_read(&self, op: &'static str, offset: u64, len: usize) -> RegResult<Request> {
        if len == 0 {
            return Ok(Request::ready(Some(Vec::new())));
        }
        let file = self.handle(op)?;
        let path = self.path.clone();
        Request::spawn_local(format!("{}:{}", op, self.name), move || {
            let mut buf = vec![0u8; len];
            file.read_exact_at(&mut buf, offset)
                .map_err(|err| RegIoErr::File { path, op, err })?;
            Ok(Some(buf))
        })
    }

    fn spawn_write(&self, op: &'static str, offset: u64, bytes: Vec<u8>) -> RegResult<Request> {
        if bytes.is_empty() {
            return Ok(Request::ready(None));
        }
        let file = self.handle(op)?;
        let path = self.path.clone();
        Request::spawn_local(format!("{}:{}", op, self.name), move || {
            file.write_all_at(&bytes, offset)
                .map_err(|err| RegIoErr::File { path, op, err })?;
            Ok(None)
        })
    }

    /// The request's output holds the `len` bytes read.
    pub fn async_read_at(&self, offset: u64, len: usize) -> RegResult<Request> {
        self.spawn_read("async_read_at", offset, len)
    }

    pub fn async_write_at(&self, offset: u64, bytes: Vec<u8>) -> RegResult<Request> {
        self.spawn_write("async_write_at", offset, bytes)
    }

    pub fn async_read_at_all(&self, offset: u64, len: usize) -> RegResult<Request> {
        self.spawn_read("async_read_at_all", offset, len)
    }

    pub fn async_write_at_all(&self, offset: u64, bytes: Vec<u8>) -> RegResult<Request> {
        self.spawn_write("async_write_at_all", offset, bytes)
    }
}

impl HierLock for SharedFile {
    fn lock(&self) {
        let _ = self.state.acquire();
    }

    fn unlock(&self) -> RegResult<()> {
        self.state.release()
    }
}

impl Named for SharedFile {
    const KIND: &'static str = "file";

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SharedFile {
    fn drop(&mut self) {
        if self.state.get_mut().file.is_some() {
            tracing::debug!("{} dropped while open", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        general::network::{Fabric, SoloComm},
        result::ErrorKind,
    };
    use std::{thread, time::Duration};

    #[test]
    fn test_open_close_modes() {
        let dir = tempfile::tempdir().unwrap();
        let comm = SoloComm::new();
        let file = SharedFile::new(dir.path().join("a.bin"));

        // reading a file that does not exist yet fails, nothing is opened
        assert_eq!(file.open(&comm, "r").unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(file.open(&comm, "rw").unwrap_err().kind(), ErrorKind::InvalidHandle);

        file.open(&comm, "w+").unwrap();
        assert!(file.is_open());
        assert_eq!(file.mode(), Some(FileMode::WriteRead));
        assert_eq!(file.open(&comm, "w").unwrap_err().kind(), ErrorKind::AlreadyOpen);
        file.close().unwrap();
        file.close().unwrap();
        assert!(!file.is_open());

        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).unwrap_err().kind(), ErrorKind::AlreadyClosed);
        assert_eq!(file.write_at(0, &buf).unwrap_err().kind(), ErrorKind::AlreadyClosed);
        assert_eq!(file.get_pos().unwrap_err().kind(), ErrorKind::AlreadyClosed);
        assert_eq!(
            file.async_read_at(0, 4).unwrap_err().kind(),
            ErrorKind::AlreadyClosed
        );
        // zero byte transfers never touch the file
        file.write(&[]).unwrap();
        file.read_at(0, &mut []).unwrap();
    }

    #[test]
    fn test_sequential_and_positioned_io() {
        let dir = tempfile::tempdir().unwrap();
        let comm = SoloComm::new();
        let file = SharedFile::with_name("seq", dir.path().join("seq.bin"));
        file.open(&comm, "w+").unwrap();

        file.write(b"hello ").unwrap();
        file.write(b"world").unwrap();
        assert_eq!(file.get_pos().unwrap(), 11);
        file.write_at(0, b"H").unwrap();
        assert_eq!(file.get_pos().unwrap(), 11);

        file.seek(6).unwrap();
        let mut word = [0u8; 5];
        file.read(&mut word).unwrap();
        assert_eq!(&word, b"world");

        let mut all = [0u8; 11];
        file.read_at_all(0, &mut all).unwrap();
        assert_eq!(&all, b"Hello world");

        let mut past_end = [0u8; 4];
        assert_eq!(file.read_at(10, &mut past_end).unwrap_err().kind(), ErrorKind::Io);
        file.close().unwrap();

        // w truncates on the next open
        file.open(&comm, "r").unwrap();
        file.read_at(0, &mut all).unwrap();
        file.close().unwrap();
        file.open(&comm, "w").unwrap();
        file.close().unwrap();
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_async_io() {
        let dir = tempfile::tempdir().unwrap();
        let comm = SoloComm::new();
        let file = SharedFile::new(dir.path().join("async.bin"));
        file.open(&comm, "w+").unwrap();

        let writes: Vec<_> = (0..4u8)
            .map(|i| file.async_write_at_all(i as u64 * 8, vec![i; 8]).unwrap())
            .collect();
        for w in writes {
            assert_eq!(w.finalize().unwrap(), None);
        }
        let out = file.async_read_at(8, 16).unwrap().finalize().unwrap().unwrap();
        assert_eq!(&out[..8], &[1; 8]);
        assert_eq!(&out[8..], &[2; 8]);
        let out = file.async_read_at_all(24, 8).unwrap().finalize().unwrap();
        assert_eq!(out, Some(vec![3; 8]));

        let empty = file.async_write_at(0, Vec::new()).unwrap();
        assert!(!empty.is_valid());

        let err = file.async_read_at(30, 8).unwrap().finalize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_collective_open_across_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.bin");
        std::fs::write(&path, vec![0xFFu8; 64]).unwrap();

        let handles: Vec<_> = Fabric::world(4)
            .into_iter()
            .map(|comm| {
                let path = path.clone();
                thread::spawn(move || {
                    let file = SharedFile::new(&path);
                    file.open(&comm, "w+").unwrap();
                    let me = comm.task_id() as u8;
                    file.write_at_all(me as u64 * 4, &[me; 4]).unwrap();
                    comm.barrier().unwrap();
                    let mut all = [0u8; 16];
                    file.read_at_all(0, &mut all).unwrap();
                    file.close().unwrap();
                    all
                })
            })
            .collect();
        for h in handles {
            let all = h.join().unwrap();
            assert_eq!(all, [0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
        }
        // the stale tail was truncated by the master
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
    }

    #[test]
    fn test_failed_create_reaches_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing_dir").join("f.bin");
        let (tx, rx) = std::sync::mpsc::channel();
        for comm in Fabric::world(2) {
            let (path, tx) = (path.clone(), tx.clone());
            let _ = thread::spawn(move || {
                let file = SharedFile::new(&path);
                let kind = file.open(&comm, "w").map_err(|e| e.kind());
                // the group is still usable afterwards
                comm.barrier().unwrap();
                tx.send((comm.task_id(), kind, file.is_open())).unwrap();
            });
        }
        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(rx.recv_timeout(Duration::from_secs(10)).unwrap());
        }
        seen.sort_by_key(|(task, _, _)| *task);
        assert_eq!(
            seen,
            vec![(0, Err(ErrorKind::Io), false), (1, Err(ErrorKind::Io), false)]
        );
    }
}
