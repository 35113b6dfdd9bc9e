pub mod fabric;
pub mod mailbox;
pub mod ops;
pub mod request;
pub mod solo;
pub mod transport;

pub use fabric::{Fabric, FabricComm};
pub use request::{Payload, Request, TransportHandle};
pub use solo::SoloComm;
pub use transport::Transport;

use crate::result::{RegHandleErr, RegResult};

/// Rank of a task inside one transport group.
pub type TaskId = u32;

/// Message tag; sends and receives match on (source, destination, tag).
pub type MsgTag = i32;

pub fn check_task_id(comm: &dyn Transport, task_id: TaskId, op: &'static str) -> RegResult<()> {
    if task_id as usize >= comm.num_tasks() {
        return Err(RegHandleErr::InvalidTaskId {
            task_id,
            num_tasks: comm.num_tasks(),
            op,
        }
        .into());
    }
    Ok(())
}
