use std::{fmt::Debug, path::PathBuf, sync::Arc};

use camelpaste::paste;
use thiserror::Error;

use crate::general::{data::Offsets, network::TaskId};

pub type RegResult<T> = Result<T, RegError>;

/// Flat classification of every failure, for callers that only branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AllocationFailure,
    DuplicateKey,
    NotFound,
    InvalidHandle,
    AlreadyOpen,
    AlreadyClosed,
    LockOrderViolation,
    Io,
    Runtime,
    Config,
}

#[derive(Debug)]
pub enum RegDataErr {
    AllocationFailure {
        offsets: Offsets,
        bytes: usize,
        alignment: usize,
        context: String,
    },
    ChunkDuplicateKey {
        data: String,
        offsets: Offsets,
    },
    ChunkNotFound {
        data: String,
        offsets: Offsets,
    },
    EntityDuplicateKey {
        registry: &'static str,
        name: String,
    },
    EntityNotFound {
        registry: &'static str,
        name: String,
    },
}

#[derive(Debug)]
pub enum RegHandleErr {
    InvalidTaskId {
        task_id: TaskId,
        num_tasks: usize,
        op: &'static str,
    },
    CommFinalized {
        op: &'static str,
    },
    ByteRangeOutOfBound {
        offsets: Offsets,
        start: usize,
        len: usize,
        bytes: usize,
    },
    ChunkNotAllocated {
        offsets: Offsets,
    },
    BadFileMode {
        name: String,
        mode: String,
    },
    OffsetsMismatch {
        target: Offsets,
        source: Offsets,
    },
    RecvLenMismatch {
        src: TaskId,
        tag: i32,
        expect: usize,
        actual: usize,
    },
}

#[derive(Debug)]
pub enum RegFileErr {
    AlreadyOpen { name: String },
    AlreadyClosed { name: String, op: &'static str },
}

#[derive(Debug)]
pub enum RegLockErr {
    NotHeldByCurrentThread { target: String },
    MapBorrowed { target: String, op: &'static str },
}

#[derive(Debug)]
pub enum RegIoErr {
    Io(std::io::Error),
    File {
        path: PathBuf,
        op: &'static str,
        err: std::io::Error,
    },
}

#[derive(Debug)]
pub enum RegRuntimeErr {
    TokioJoin {
        err: tokio::task::JoinError,
        context: String,
    },
    ThreadPanicked {
        context: String,
    },
}

#[derive(Debug)]
pub enum RegConfigErr {
    Yaml(serde_yaml::Error),
    Open { path: PathBuf, err: std::io::Error },
    Invalid { reason: String },
}

#[derive(Error, Debug)]
pub enum RegError {
    #[error("ArcWrapper: {0:?}")]
    ArcWrapper(Arc<RegError>),

    #[error("Data error: {0:?}")]
    RegDataErr(RegDataErr),

    #[error("Handle error: {0:?}")]
    RegHandleErr(RegHandleErr),

    #[error("File error: {0:?}")]
    RegFileErr(RegFileErr),

    #[error("Lock error: {0:?}")]
    RegLockErr(RegLockErr),

    #[error("Io error: {0:?}")]
    RegIoErr(RegIoErr),

    #[error("Runtime error: {0:?}")]
    RegRuntimeErr(RegRuntimeErr),

    #[error("Config error: {0:?}")]
    RegConfigErr(RegConfigErr),
}

impl RegError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegError::ArcWrapper(inner) => inner.kind(),
            RegError::RegDataErr(e) => match e {
                RegDataErr::AllocationFailure { .. } => ErrorKind::AllocationFailure,
                RegDataErr::ChunkDuplicateKey { .. } | RegDataErr::EntityDuplicateKey { .. } => {
                    ErrorKind::DuplicateKey
                }
                RegDataErr::ChunkNotFound { .. } | RegDataErr::EntityNotFound { .. } => {
                    ErrorKind::NotFound
                }
            },
            RegError::RegHandleErr(_) => ErrorKind::InvalidHandle,
            RegError::RegFileErr(e) => match e {
                RegFileErr::AlreadyOpen { .. } => ErrorKind::AlreadyOpen,
                RegFileErr::AlreadyClosed { .. } => ErrorKind::AlreadyClosed,
            },
            RegError::RegLockErr(_) => ErrorKind::LockOrderViolation,
            RegError::RegIoErr(_) => ErrorKind::Io,
            RegError::RegRuntimeErr(_) => ErrorKind::Runtime,
            RegError::RegConfigErr(_) => ErrorKind::Config,
        }
    }
}

impl From<std::io::Error> for RegError {
    fn from(e: std::io::Error) -> Self {
        RegError::RegIoErr(RegIoErr::Io(e))
    }
}

impl From<serde_yaml::Error> for RegError {
    fn from(e: serde_yaml::Error) -> Self {
        RegError::RegConfigErr(RegConfigErr::Yaml(e))
    }
}

impl From<RegDataErr> for RegError {
    fn from(e: RegDataErr) -> Self {
        RegError::RegDataErr(e)
    }
}

impl From<RegHandleErr> for RegError {
    fn from(e: RegHandleErr) -> Self {
        RegError::RegHandleErr(e)
    }
}

impl From<RegFileErr> for RegError {
    fn from(e: RegFileErr) -> Self {
        RegError::RegFileErr(e)
    }
}

impl From<RegLockErr> for RegError {
    fn from(e: RegLockErr) -> Self {
        RegError::RegLockErr(e)
    }
}

impl From<RegIoErr> for RegError {
    fn from(e: RegIoErr) -> Self {
        RegError::RegIoErr(e)
    }
}

impl From<RegRuntimeErr> for RegError {
    fn from(e: RegRuntimeErr) -> Self {
        RegError::RegRuntimeErr(e)
    }
}

impl From<RegConfigErr> for RegError {
    fn from(e: RegConfigErr) -> Self {
        RegError::RegConfigErr(e)
    }
}

pub struct ErrCvt<T>(pub T);

macro_rules! impl_err_convertor {
    ($t:ty,$sub_t:ty,$sub_tt:ty) => {
        paste! {
            impl ErrCvt<$t> {
                pub fn [<to_ $sub_t:snake>](self) -> RegError {
                    RegError::$sub_t($sub_t::$sub_tt(self.0))
                }
            }
        }
    };
}

impl_err_convertor!(std::io::Error, RegIoErr, Io);
impl_err_convertor!(serde_yaml::Error, RegConfigErr, Yaml);

pub trait RegResultExt {
    fn todo_handle(&self);
}

impl<T: Debug> RegResultExt for RegResult<T> {
    #[inline]
    fn todo_handle(&self) {
        match self {
            Ok(_ok) => {}
            Err(err) => {
                tracing::warn!("result err: {:?}", err);
            }
        }
    }
}
