#![deny(unused_imports, unused_variables)]

//! Umbrella crate for the Isar OPFS workspace.
//!
//! Re-exports the VFS bridge and the worker host so the end-to-end tests and
//! embedders can depend on a single crate.

pub use isar_vfs_bridge as vfs;
pub use isar_worker as worker;

pub use isar_vfs_bridge::VfsBridge;
pub use isar_worker::{Response, Worker, WorkerConfig, WorkerHost};
