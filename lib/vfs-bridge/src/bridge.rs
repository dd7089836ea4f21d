use crate::error::{IoOp, VfsError};
use crate::path::StoragePath;
use crate::status::{Fd, OpenFlags, ACCESS_EXISTS, ACCESS_MISSING, SQLITE_OK};
use crate::storage::{DirectoryHandle, StorageError, StorageManager, SyncAccessHandle};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, VfsError>;

/// One open file.
struct OpenFile {
    handle: Box<dyn SyncAccessHandle>,
    path: String,
    size: u64,
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

/// The file-I/O substrate the storage engine calls into.
///
/// Every public operation returns the integer the engine sees: a descriptor,
/// a byte count, a size or one of the negative status codes. Failures never
/// leave the bridge any other way.
///
/// The descriptor table is plain owned state. The bridge is driven by one
/// worker that handles a single request at a time, so it takes `&mut self`
/// and does no locking of its own; exclusivity between openers of the same
/// file comes from the storage backend's sync access handles.
pub struct VfsBridge {
    manager: Arc<dyn StorageManager>,
    root: Option<Box<dyn DirectoryHandle>>,
    initialized: bool,
    open_files: HashMap<Fd, OpenFile>,
    next_fd: Fd,
}

impl fmt::Debug for VfsBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VfsBridge")
            .field("manager", &self.manager)
            .field("available", &self.is_available())
            .field("open_files", &self.open_files)
            .finish()
    }
}

impl VfsBridge {
    pub fn new(manager: Arc<dyn StorageManager>) -> Self {
        Self {
            manager,
            root: None,
            initialized: false,
            open_files: HashMap::new(),
            next_fd: 1,
        }
    }

    /// Probes the storage root and records whether it is available. Only the
    /// first call probes; later calls return the recorded answer.
    pub fn initialize(&mut self) -> bool {
        if self.initialized {
            return self.is_available();
        }
        self.initialized = true;

        match self.manager.get_directory() {
            Ok(root) => {
                debug!("sandboxed storage initialized");
                self.root = Some(root);
                true
            }
            Err(err) => {
                warn!(error = %err, "sandboxed storage is not available");
                false
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.root.is_some()
    }

    pub fn open_descriptors(&self) -> usize {
        self.open_files.len()
    }

    /// The normalized path behind `fd`, if it is mapped.
    pub fn path_of(&self, fd: Fd) -> Option<&str> {
        self.open_files.get(&fd).map(|file| file.path.as_str())
    }

    /// Opens `path` and returns a new descriptor, or a negative status.
    pub fn open(&mut self, path: &str, flags: i32) -> i32 {
        let flags = OpenFlags::from_raw(flags);
        self.try_open(path, flags).unwrap_or_else(|err| {
            warn!(path, ?flags, error = %err, "failed to open file");
            err.status()
        })
    }

    fn try_open(&mut self, path: &str, flags: OpenFlags) -> Result<Fd> {
        let root = self.root.as_deref().ok_or(VfsError::CapabilityUnavailable)?;
        let parsed = StoragePath::parse(path).ok_or_else(|| VfsError::InvalidPath {
            op: IoOp::Open,
            path: path.to_string(),
        })?;

        let mut dir = None;
        for part in parsed.parents() {
            let parent: &dyn DirectoryHandle = dir.as_deref().unwrap_or(root);
            let child = parent
                .get_directory_handle(part, true)
                .map_err(VfsError::native(IoOp::Open))?;
            dir = Some(child);
        }
        let parent: &dyn DirectoryHandle = dir.as_deref().unwrap_or(root);

        let file = parent
            .get_file_handle(parsed.file_name(), flags.contains(OpenFlags::CREATE))
            .map_err(|err| match err {
                StorageError::NotFound => VfsError::NotFound(parsed.normalized().to_string()),
                other => VfsError::native(IoOp::Open)(other),
            })?;
        let mut handle = file
            .create_sync_access_handle()
            .map_err(VfsError::native(IoOp::Open))?;

        if flags.contains(OpenFlags::TRUNCATE) {
            handle
                .truncate(0)
                .and_then(|()| handle.flush())
                .map_err(VfsError::native(IoOp::Open))?;
        }
        let size = handle.get_size().map_err(VfsError::native(IoOp::Open))?;

        let fd = self.next_fd;
        self.next_fd = fd.checked_add(1).ok_or(VfsError::DescriptorsExhausted)?;
        self.open_files.insert(
            fd,
            OpenFile {
                handle,
                path: parsed.normalized().to_string(),
                size,
            },
        );
        debug!(fd, path = parsed.normalized(), size, "opened file");
        Ok(fd)
    }

    /// Releases the handle behind `fd` and forgets the descriptor.
    pub fn close(&mut self, fd: Fd) -> i32 {
        let Some(mut file) = self.open_files.remove(&fd) else {
            return VfsError::BadDescriptor(fd).status();
        };
        debug!(fd, path = %file.path, "closing file");
        match file.handle.close() {
            Ok(()) => SQLITE_OK,
            Err(err) => report(fd, VfsError::native(IoOp::Close)(err)),
        }
    }

    /// Reads into `buf` from the absolute `offset`; returns the number of
    /// bytes read, which is short at end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8], offset: u64) -> i32 {
        let result = self.file_mut(fd).and_then(|file| {
            file.handle
                .read(buf, offset)
                .map_err(VfsError::native(IoOp::Read))
        });
        match result {
            Ok(count) => count_status(count),
            Err(err) => report(fd, err),
        }
    }

    /// Writes `data` at the absolute `offset` and flushes it before returning.
    pub fn write(&mut self, fd: Fd, data: &[u8], offset: u64) -> i32 {
        let result = self.file_mut(fd).and_then(|file| {
            let written = file
                .handle
                .write(data, offset)
                .and_then(|written| file.handle.flush().map(|()| written))
                .map_err(VfsError::native(IoOp::Write))?;
            let end = offset.saturating_add(written as u64);
            if end > file.size {
                file.size = end;
            }
            Ok(written)
        });
        match result {
            Ok(written) => count_status(written),
            Err(err) => report(fd, err),
        }
    }

    pub fn truncate(&mut self, fd: Fd, size: u64) -> i32 {
        let result = self.file_mut(fd).and_then(|file| {
            file.handle
                .truncate(size)
                .and_then(|()| file.handle.flush())
                .map_err(VfsError::native(IoOp::Truncate))?;
            file.size = size;
            Ok(())
        });
        status_of(fd, result)
    }

    pub fn sync(&mut self, fd: Fd) -> i32 {
        let result = self.file_mut(fd).and_then(|file| {
            file.handle
                .flush()
                .map_err(VfsError::native(IoOp::Sync))
        });
        status_of(fd, result)
    }

    /// The live length of the file, read from the handle.
    pub fn file_size(&self, fd: Fd) -> i64 {
        let result = self.file(fd).and_then(|file| {
            file.handle
                .get_size()
                .map_err(VfsError::native(IoOp::Size))
        });
        match result {
            Ok(size) => i64::try_from(size).unwrap_or(i64::MAX),
            Err(err) => report(fd, err).into(),
        }
    }

    /// Removes the file at `path`. A file that is already gone counts as
    /// deleted.
    pub fn delete(&mut self, path: &str) -> i32 {
        match self.try_delete(path) {
            Ok(()) => SQLITE_OK,
            Err(err) => {
                warn!(path, error = %err, "failed to delete file");
                err.status()
            }
        }
    }

    fn try_delete(&self, path: &str) -> Result<()> {
        let root = self.root.as_deref().ok_or(VfsError::CapabilityUnavailable)?;
        let parsed = StoragePath::parse(path).ok_or_else(|| VfsError::InvalidPath {
            op: IoOp::Delete,
            path: path.to_string(),
        })?;
        let Some(parent) = lookup_parent(root, &parsed) else {
            return Ok(());
        };
        let parent: &dyn DirectoryHandle = parent.as_deref().unwrap_or(root);
        match parent.remove_entry(parsed.file_name()) {
            Ok(()) => {
                debug!(path = parsed.normalized(), "deleted file");
                Ok(())
            }
            Err(StorageError::NotFound) => Ok(()),
            Err(err) => Err(VfsError::native(IoOp::Delete)(err)),
        }
    }

    /// Returns 1 when a file exists at `path` and 0 when it doesn't.
    pub fn access(&self, path: &str) -> i32 {
        match self.try_access(path) {
            Ok(true) => ACCESS_EXISTS,
            Ok(false) => ACCESS_MISSING,
            Err(err) => {
                warn!(path, error = %err, "failed to check file access");
                err.status()
            }
        }
    }

    fn try_access(&self, path: &str) -> Result<bool> {
        let root = self.root.as_deref().ok_or(VfsError::CapabilityUnavailable)?;
        let Some(parsed) = StoragePath::parse(path) else {
            return Ok(false);
        };
        let Some(parent) = lookup_parent(root, &parsed) else {
            return Ok(false);
        };
        let parent: &dyn DirectoryHandle = parent.as_deref().unwrap_or(root);
        match parent.get_file_handle(parsed.file_name(), false) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound) => Ok(false),
            Err(err) => Err(VfsError::native(IoOp::Access)(err)),
        }
    }

    /// An open handle already grants exclusive access, so locking only
    /// checks the descriptor.
    pub fn lock(&self, fd: Fd, lock_type: i32) -> i32 {
        let _ = lock_type;
        status_of(fd, self.file(fd).map(|_| ()))
    }

    pub fn unlock(&self, fd: Fd, lock_type: i32) -> i32 {
        let _ = lock_type;
        status_of(fd, self.file(fd).map(|_| ()))
    }

    fn file(&self, fd: Fd) -> Result<&OpenFile> {
        self.open_files.get(&fd).ok_or(VfsError::BadDescriptor(fd))
    }

    fn file_mut(&mut self, fd: Fd) -> Result<&mut OpenFile> {
        self.open_files
            .get_mut(&fd)
            .ok_or(VfsError::BadDescriptor(fd))
    }
}

impl Drop for VfsBridge {
    fn drop(&mut self) {
        for (fd, mut file) in self.open_files.drain() {
            if let Err(err) = file.handle.close() {
                warn!(fd, path = %file.path, error = %err, "failed to release file");
            }
        }
    }
}

/// Walks the parent directories of `path` without creating any.
///
/// Returns `None` when one of them can't be reached, which means the file
/// can't exist either. `Some(None)` is the root itself.
fn lookup_parent(
    root: &dyn DirectoryHandle,
    path: &StoragePath<'_>,
) -> Option<Option<Box<dyn DirectoryHandle>>> {
    let mut dir: Option<Box<dyn DirectoryHandle>> = None;
    for part in path.parents() {
        let parent: &dyn DirectoryHandle = dir.as_deref().unwrap_or(root);
        dir = Some(parent.get_directory_handle(part, false).ok()?);
    }
    Some(dir)
}

fn report(fd: Fd, err: VfsError) -> i32 {
    warn!(fd, error = %err, "file operation failed");
    err.status()
}

fn status_of(fd: Fd, result: Result<()>) -> i32 {
    match result {
        Ok(()) => SQLITE_OK,
        Err(err) => report(fd, err),
    }
}

fn count_status(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}
