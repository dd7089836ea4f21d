use crate::status::{Fd, SQLITE_CANTOPEN, SQLITE_ERROR, SQLITE_IOERR};
use crate::storage::StorageError;
use std::fmt;
use thiserror::Error;

/// The bridge operation a native failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Close,
    Read,
    Write,
    Truncate,
    Sync,
    Size,
    Delete,
    Access,
}

impl IoOp {
    /// Code reported when the storage layer fails during this operation.
    pub const fn failure_status(self) -> i32 {
        match self {
            IoOp::Read | IoOp::Write | IoOp::Truncate | IoOp::Sync | IoOp::Delete => SQLITE_IOERR,
            IoOp::Open | IoOp::Close | IoOp::Size | IoOp::Access => SQLITE_ERROR,
        }
    }
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOp::Open => "open",
            IoOp::Close => "close",
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Truncate => "truncate",
            IoOp::Sync => "sync",
            IoOp::Size => "file_size",
            IoOp::Delete => "delete",
            IoOp::Access => "access",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum VfsError {
    /// Sandboxed storage was not available when the bridge was initialized
    #[error("sandboxed storage is not available")]
    CapabilityUnavailable,
    /// The path has no file name once normalized
    #[error("{op}: invalid path `{path}`")]
    InvalidPath { op: IoOp, path: String },
    /// The descriptor is not mapped
    #[error("bad file descriptor {0}")]
    BadDescriptor(Fd),
    /// `open` without `create` on a file that doesn't exist
    #[error("`{0}` not found")]
    NotFound(String),
    /// Every positive descriptor value has been handed out
    #[error("no file descriptors left")]
    DescriptorsExhausted,
    /// The storage backend failed
    #[error("{op} failed: {source}")]
    Native {
        op: IoOp,
        #[source]
        source: StorageError,
    },
}

impl VfsError {
    pub(crate) fn native(op: IoOp) -> impl FnOnce(StorageError) -> VfsError {
        move |source| VfsError::Native { op, source }
    }

    /// The fixed status code the engine observes for this error.
    pub fn status(&self) -> i32 {
        match self {
            VfsError::NotFound(_) => SQLITE_CANTOPEN,
            VfsError::InvalidPath { op: IoOp::Open, .. } => SQLITE_CANTOPEN,
            VfsError::Native { op, .. } => op.failure_status(),
            VfsError::CapabilityUnavailable
            | VfsError::InvalidPath { .. }
            | VfsError::BadDescriptor(_)
            | VfsError::DescriptorsExhausted => SQLITE_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(VfsError::CapabilityUnavailable.status(), SQLITE_ERROR);
        assert_eq!(VfsError::BadDescriptor(7).status(), SQLITE_ERROR);
        assert_eq!(VfsError::NotFound("a.db".into()).status(), SQLITE_CANTOPEN);

        let empty = |op| VfsError::InvalidPath {
            op,
            path: "/".into(),
        };
        assert_eq!(empty(IoOp::Open).status(), SQLITE_CANTOPEN);
        assert_eq!(empty(IoOp::Delete).status(), SQLITE_ERROR);

        let read = VfsError::native(IoOp::Read)(StorageError::InvalidState);
        assert_eq!(read.status(), SQLITE_IOERR);
        let open = VfsError::native(IoOp::Open)(StorageError::NoModificationAllowed);
        assert_eq!(open.status(), SQLITE_ERROR);
        assert_eq!(open.to_string(), "open failed: entry is locked by another handle");
    }
}
