#![allow(clippy::all)]
#![deny(
    unused_variables,
    unused_mut,
    unused_attributes,
    dead_code,
    clippy::unnecessary_mut_passed,
    unused_results,
    clippy::let_underscore_future,
    unused_must_use,
    unconditional_recursion
)]

use tracing::Level;
use tracing_subscriber::{
    prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, Layer,
};

pub mod config;
pub mod general;
pub mod result;
pub mod sys;
pub mod util;

pub use general::{
    data::{Chunk, ChunkTag, Data, DataManager, DataTag, DataTagManager},
    fs::{Files, SharedFile},
    network::{ops, Request, Transport},
};
pub use result::{ErrorKind, RegError, RegResult};
pub use sys::Sys;

pub fn start_tracing() {
    let my_filter = tracing_subscriber::filter::filter_fn(|v| {
        if let Some(mp) = v.module_path() {
            if mp.contains("tokio") {
                return false;
            }
        }
        v.level() != &Level::TRACE
    });
    let my_layer = tracing_subscriber::fmt::layer();
    let _ = tracing_subscriber::registry()
        .with(my_layer.with_filter(my_filter))
        .try_init();
}
