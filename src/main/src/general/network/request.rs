//! Handle to one outstanding asynchronous operation.
//!
//! A [`Request`] either wraps a transport-native token ([`TransportHandle`])
//! or a locally scheduled computation ([`LocalTask`]). Both give the same
//! poll/wait contract. Completion output, when an operation produces one
//! (received or read bytes), is kept until [`Request::take_output`].

use std::fmt::Debug;

use crate::result::{RegResult, RegRuntimeErr};

/// Bytes produced by a completed operation, if it produces any.
pub type Payload = Option<Vec<u8>>;

/// Transport-native completion token.
pub trait TransportHandle: Send {
    /// Non-blocking completion check.
    fn test(&mut self) -> bool;

    /// Blocks until the operation completes.
    fn wait(&mut self) -> RegResult<Payload>;
}

pub enum LocalTask {
    Task(tokio::task::JoinHandle<RegResult<Payload>>),
    Thread(std::thread::JoinHandle<RegResult<Payload>>),
}

impl LocalTask {
    fn is_finished(&self) -> bool {
        match self {
            Self::Task(handle) => handle.is_finished(),
            Self::Thread(handle) => handle.is_finished(),
        }
    }

    fn join(self, label: &str) -> RegResult<Payload> {
        match self {
            Self::Task(handle) => futures::executor::block_on(handle).map_err(|err| {
                RegRuntimeErr::TokioJoin {
                    err,
                    context: label.to_owned(),
                }
            })?,
            Self::Thread(handle) => handle.join().map_err(|_| RegRuntimeErr::ThreadPanicked {
                context: label.to_owned(),
            })?,
        }
    }
}

enum State {
    Null,
    Transport(Box<dyn TransportHandle>),
    Local { label: String, task: LocalTask },
    Done(Payload),
}

pub struct Request {
    state: State,
}

impl Default for Request {
    fn default() -> Self {
        Self::null()
    }
}

impl Request {
    /// An empty handle: nothing to wait for.
    pub fn null() -> Self {
        Self { state: State::Null }
    }

    /// An already completed operation.
    pub fn ready(output: Payload) -> Self {
        Self {
            state: State::Done(output),
        }
    }

    pub fn transport(handle: Box<dyn TransportHandle>) -> Self {
        Self {
            state: State::Transport(handle),
        }
    }

    /// Runs `f` concurrently: on the blocking pool of the current tokio
    /// runtime when there is one, else on a dedicated thread.
    pub fn spawn_local<F>(label: impl Into<String>, f: F) -> RegResult<Self>
    where
        F: FnOnce() -> RegResult<Payload> + Send + 'static,
    {
        let label = label.into();
        let task = match tokio::runtime::Handle::try_current() {
            Ok(rt) => LocalTask::Task(rt.spawn_blocking(f)),
            Err(_) => LocalTask::Thread(std::thread::Builder::new().name(label.clone()).spawn(f)?),
        };
        tracing::debug!("local request {} scheduled", label);
        Ok(Self {
            state: State::Local { label, task },
        })
    }

    /// False for an empty handle and once completion has been collected.
    pub fn is_valid(&self) -> bool {
        matches!(self.state, State::Transport(_) | State::Local { .. })
    }

    /// Non-blocking. Empty and collected handles count as complete.
    pub fn is_complete(&mut self) -> bool {
        match &mut self.state {
            State::Null | State::Done(_) => true,
            State::Transport(handle) => handle.test(),
            State::Local { task, .. } => task.is_finished(),
        }
    }

    /// Blocks until completion. Waiting again, or on an empty handle, returns
    /// at once. A failed operation reports its error here, once.
    pub fn wait(&mut self) -> RegResult<()> {
        let outcome = match std::mem::replace(&mut self.state, State::Done(None)) {
            State::Null => {
                self.state = State::Null;
                return Ok(());
            }
            State::Done(output) => Ok(output),
            State::Transport(mut handle) => handle.wait(),
            State::Local { label, task } => {
                let res = task.join(&label);
                tracing::debug!("local request {} joined, ok: {}", label, res.is_ok());
                res
            }
        };
        // on error the state stays Done(None)
        self.state = State::Done(outcome?);
        Ok(())
    }

    /// Output of a completed operation; `None` before `wait()` or if taken.
    pub fn take_output(&mut self) -> Payload {
        match &mut self.state {
            State::Done(output) => output.take(),
            _ => None,
        }
    }

    /// Waits, releases the handle and returns the output.
    pub fn finalize(mut self) -> RegResult<Payload> {
        self.wait()?;
        Ok(self.take_output())
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!("request dropped before completion was collected, waiting");
            if let Err(err) = self.wait() {
                tracing::warn!("dropped request failed: {:?}", err);
            }
        }
    }
}

impl Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Null => "null".to_owned(),
            State::Transport(_) => "transport".to_owned(),
            State::Local { label, .. } => format!("local({})", label),
            State::Done(output) => format!("done({:?} bytes)", output.as_ref().map(|o| o.len())),
        };
        f.debug_struct("Request").field("state", &state).finish()
    }
}
