//! File-I/O substrate for a WebAssembly-compiled storage engine.
//!
//! The engine sees a small POSIX-like surface: it opens paths and gets back
//! integer descriptors, reads and writes at absolute offsets, and receives
//! SQLite-style status codes for every failure. [`VfsBridge`] maps that
//! surface onto a sandboxed storage tree whose files are accessed through
//! exclusive, synchronous handles (see [`storage`]).
//!
//! ```
//! use std::sync::Arc;
//! use isar_vfs_bridge::{storage::mem::MemoryStorage, OpenFlags, VfsBridge};
//!
//! let mut bridge = VfsBridge::new(Arc::new(MemoryStorage::new()));
//! assert!(bridge.initialize());
//!
//! let fd = bridge.open("/db/main.db", OpenFlags::CREATE.bits() as i32);
//! assert_eq!(bridge.write(fd, b"abc", 0), 3);
//! assert_eq!(bridge.file_size(fd), 3);
//! assert_eq!(bridge.close(fd), 0);
//! ```

mod bridge;
mod error;
mod path;
pub mod status;
pub mod storage;

pub use crate::bridge::VfsBridge;
pub use crate::error::{IoOp, VfsError};
pub use crate::path::StoragePath;
pub use crate::status::{
    Fd, OpenFlags, ACCESS_EXISTS, ACCESS_MISSING, SQLITE_CANTOPEN, SQLITE_ERROR, SQLITE_IOERR,
    SQLITE_OK,
};
pub use crate::storage::{StorageError, StorageManager};
