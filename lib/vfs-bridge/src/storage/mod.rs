//! The sandboxed storage tree the bridge runs on.
//!
//! The surface mirrors the browser's origin-private file system: a
//! [`StorageManager`] hands out the root [`DirectoryHandle`], directories hand
//! out child directories and [`FileHandle`]s, and a file hands out a single
//! exclusive [`SyncAccessHandle`] that offers blocking positional I/O.
//!
//! Two backends are provided, [`mem::MemoryStorage`] and
//! [`host::HostStorage`], plus [`NoStorage`] for hosts where the capability
//! is absent.

pub mod host;
pub mod mem;

use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type for storage backends, modelled after the DOM exceptions the
/// browser file system raises.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The entry does not exist
    #[error("entry not found")]
    NotFound,
    /// A file was found where a directory was expected, or the reverse
    #[error("entry has the wrong kind")]
    TypeMismatch,
    /// The file already has an open sync access handle
    #[error("entry is locked by another handle")]
    NoModificationAllowed,
    /// Removing a directory that still has children
    #[error("directory is not empty")]
    InvalidModification,
    /// The entry name is not a single valid path segment
    #[error("invalid entry name `{0}`")]
    InvalidName(String),
    /// The handle was already closed
    #[error("handle is closed")]
    InvalidState,
    /// Growing a file would exceed the storage quota
    #[error("storage quota exceeded")]
    QuotaExceeded,
    /// An internal lock was poisoned
    #[error("failed to acquire lock")]
    Lock,
    /// The storage root is not reachable from this host
    #[error("storage is not supported on this host")]
    Unsupported,
    /// Something failed in the host I/O layer
    #[error("io error: {0}")]
    Io(#[source] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}

impl From<io::Error> for StorageError {
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound,
            io::ErrorKind::NotADirectory | io::ErrorKind::IsADirectory => {
                StorageError::TypeMismatch
            }
            io::ErrorKind::DirectoryNotEmpty => StorageError::InvalidModification,
            io::ErrorKind::WouldBlock => StorageError::NoModificationAllowed,
            io::ErrorKind::StorageFull | io::ErrorKind::FileTooLarge => {
                StorageError::QuotaExceeded
            }
            _ => StorageError::Io(io_error),
        }
    }
}

/// Entry point to a storage tree, the equivalent of `navigator.storage`.
pub trait StorageManager: fmt::Debug + Send + Sync {
    /// Returns the root directory, or an error when storage is unavailable.
    fn get_directory(&self) -> Result<Box<dyn DirectoryHandle>>;
}

pub trait DirectoryHandle: fmt::Debug + Send + Sync {
    /// Opens the child directory `name`, creating it when `create` is set.
    fn get_directory_handle(&self, name: &str, create: bool) -> Result<Box<dyn DirectoryHandle>>;

    /// Opens the child file `name`, creating an empty file when `create` is set.
    fn get_file_handle(&self, name: &str, create: bool) -> Result<Box<dyn FileHandle>>;

    /// Removes the child `name`. Directories must be empty and files must not
    /// have an open sync access handle.
    fn remove_entry(&self, name: &str) -> Result<()>;
}

pub trait FileHandle: fmt::Debug + Send + Sync {
    /// Acquires the exclusive handle on this file. Fails with
    /// [`StorageError::NoModificationAllowed`] while another one is open.
    fn create_sync_access_handle(&self) -> Result<Box<dyn SyncAccessHandle>>;
}

/// Blocking, positional access to one file. Exclusive to its opener until it
/// is closed or dropped.
pub trait SyncAccessHandle: fmt::Debug + Send {
    /// Reads into `buf` starting at `at`; returns fewer bytes than requested
    /// at end of file.
    fn read(&mut self, buf: &mut [u8], at: u64) -> Result<usize>;

    /// Writes all of `data` at `at`, growing the file as needed.
    fn write(&mut self, data: &[u8], at: u64) -> Result<usize>;

    fn truncate(&mut self, size: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn get_size(&self) -> Result<u64>;

    /// Releases the exclusivity on the file.
    fn close(&mut self) -> Result<()>;
}

/// A [`StorageManager`] for hosts without sandboxed storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStorage;

impl StorageManager for NoStorage {
    fn get_directory(&self) -> Result<Box<dyn DirectoryHandle>> {
        Err(StorageError::Unsupported)
    }
}

impl<T: StorageManager + ?Sized> StorageManager for Arc<T> {
    fn get_directory(&self) -> Result<Box<dyn DirectoryHandle>> {
        (**self).get_directory()
    }
}

/// Checks that `name` is a single path segment a directory can hold.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("main.db").is_ok());
        assert!(validate_name("journal-wal").is_ok());
        assert!(matches!(validate_name(""), Err(StorageError::InvalidName(_))));
        assert!(matches!(validate_name(".."), Err(StorageError::InvalidName(_))));
        assert!(matches!(validate_name("a/b"), Err(StorageError::InvalidName(_))));
        assert!(matches!(validate_name("a\\b"), Err(StorageError::InvalidName(_))));
    }

    #[test]
    fn test_io_error_conversion() {
        let err: StorageError = io::Error::from(io::ErrorKind::NotFound).into();
        assert!(err.is_not_found());

        let err: StorageError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(err, StorageError::NoModificationAllowed));

        let err: StorageError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn test_no_storage_is_unsupported() {
        assert!(matches!(
            NoStorage.get_directory(),
            Err(StorageError::Unsupported)
        ));
    }
}
