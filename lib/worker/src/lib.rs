//! Hosts a WebAssembly-compiled storage engine and relays calls into it.
//!
//! A [`WorkerHost`] loads the engine module with `wasmer`, links the
//! `env.isar_opfs_*` imports to an [`isar_vfs_bridge::VfsBridge`] and then
//! answers the JSON message protocol in [`protocol`]: `initialize`, `call`
//! and `ping`. [`Worker`] runs a host on a dedicated thread behind a pair of
//! channels, the way a browser worker sits behind `postMessage`.

mod config;
mod error;
mod host;
pub mod imports;
mod loader;
pub mod protocol;
mod values;
mod worker;

pub use crate::config::{StorageConfig, WorkerConfig};
pub use crate::error::HostError;
pub use crate::host::{HostState, WorkerHost};
pub use crate::loader::{fetch_module, ModuleSource};
pub use crate::protocol::{ProtocolError, Request, Response};
pub use crate::worker::Worker;
