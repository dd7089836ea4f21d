//! Storage rooted in a directory of the host file system.
//!
//! Sync access handles are exclusive. Inside a process every open handle
//! registers its canonical path in a process-wide table, and the opened file
//! also carries an OS advisory lock (`flock(2)` on Unix, `LockFileEx` on
//! Windows), so bridges in other processes pointed at the same directory
//! can't hold the same file either.

use super::{
    validate_name, DirectoryHandle, FileHandle, Result, StorageError, StorageManager,
    SyncAccessHandle,
};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tracing::trace;

static OPEN_HANDLES: LazyLock<Mutex<HashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

fn acquire(path: &Path) -> Result<()> {
    let mut open = OPEN_HANDLES.lock().map_err(|_| StorageError::Lock)?;
    if !open.insert(path.to_path_buf()) {
        return Err(StorageError::NoModificationAllowed);
    }
    Ok(())
}

fn release(path: &Path) {
    if let Ok(mut open) = OPEN_HANDLES.lock() {
        open.remove(path);
    }
}

fn is_acquired(path: &Path) -> Result<bool> {
    let open = OPEN_HANDLES.lock().map_err(|_| StorageError::Lock)?;
    Ok(open.contains(path))
}

/// Takes the advisory lock on `file` without blocking. A lock held elsewhere
/// reports [`StorageError::NoModificationAllowed`].
fn try_lock(file: &File) -> Result<()> {
    file.try_lock_exclusive().map_err(|err| {
        if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
            StorageError::NoModificationAllowed
        } else {
            err.into()
        }
    })
}

/// A storage manager whose root is a host directory. The directory is
/// created on first use.
#[derive(Debug, Clone)]
pub struct HostStorage {
    root: PathBuf,
}

impl HostStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageManager for HostStorage {
    fn get_directory(&self) -> Result<Box<dyn DirectoryHandle>> {
        fs::create_dir_all(&self.root)?;
        let root = fs::canonicalize(&self.root)?;
        if !root.is_dir() {
            return Err(StorageError::TypeMismatch);
        }
        Ok(Box::new(HostDirectory { path: root }))
    }
}

#[derive(Debug)]
struct HostDirectory {
    path: PathBuf,
}

impl HostDirectory {
    fn child(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.path.join(name))
    }
}

impl DirectoryHandle for HostDirectory {
    fn get_directory_handle(&self, name: &str, create: bool) -> Result<Box<dyn DirectoryHandle>> {
        let path = self.child(name)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(StorageError::TypeMismatch),
            Err(err) if err.kind() == io::ErrorKind::NotFound && create => {
                match fs::create_dir(&path) {
                    Ok(()) => trace!(path = %path.display(), "created directory"),
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(err) => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Box::new(HostDirectory { path }))
    }

    fn get_file_handle(&self, name: &str, create: bool) -> Result<Box<dyn FileHandle>> {
        let path = self.child(name)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(StorageError::TypeMismatch),
            Err(err) if err.kind() == io::ErrorKind::NotFound && create => {
                OpenOptions::new().write(true).create(true).open(&path)?;
                trace!(path = %path.display(), "created file");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Box::new(HostFile { path }))
    }

    fn remove_entry(&self, name: &str) -> Result<()> {
        let path = self.child(name)?;
        let meta = fs::metadata(&path)?;
        if meta.is_dir() {
            fs::remove_dir(&path)?;
        } else {
            if is_acquired(&path)? {
                return Err(StorageError::NoModificationAllowed);
            }
            // Another process may hold the file.
            let file = OpenOptions::new().read(true).open(&path)?;
            try_lock(&file)?;
            drop(file);
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HostFile {
    path: PathBuf,
}

impl FileHandle for HostFile {
    fn create_sync_access_handle(&self) -> Result<Box<dyn SyncAccessHandle>> {
        acquire(&self.path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(StorageError::from)
            .and_then(|file| try_lock(&file).map(|()| file));
        match file {
            Ok(file) => Ok(Box::new(HostSyncAccessHandle {
                file: Some(file),
                path: self.path.clone(),
            })),
            Err(err) => {
                release(&self.path);
                Err(err)
            }
        }
    }
}

#[derive(Debug)]
struct HostSyncAccessHandle {
    file: Option<File>,
    path: PathBuf,
}

impl HostSyncAccessHandle {
    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(StorageError::InvalidState)
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(StorageError::InvalidState)
    }
}

impl SyncAccessHandle for HostSyncAccessHandle {
    fn read(&mut self, buf: &mut [u8], at: u64) -> Result<usize> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(at))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(filled)
    }

    fn write(&mut self, data: &[u8], at: u64) -> Result<usize> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(at))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.file_mut()?.set_len(size)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let file = self.file_mut()?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn get_size(&self) -> Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            let unlocked = FileExt::unlock(&file);
            drop(file);
            release(&self.path);
            unlocked?;
        }
        Ok(())
    }
}

impl Drop for HostSyncAccessHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("opfs").join("origin");
        let storage = HostStorage::new(&root);
        storage.get_directory().unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_root_that_is_a_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("not-a-dir");
        fs::write(&root, b"x").unwrap();
        assert!(HostStorage::new(&root).get_directory().is_err());
    }

    #[test]
    fn test_positional_io() {
        let dir = tempfile::tempdir().unwrap();
        let root = HostStorage::new(dir.path()).get_directory().unwrap();
        let file = root.get_file_handle("main.db", true).unwrap();
        let mut handle = file.create_sync_access_handle().unwrap();

        assert_eq!(handle.write(b"abc", 4).unwrap(), 3);
        handle.flush().unwrap();
        assert_eq!(handle.get_size().unwrap(), 7);

        let mut buf = [0u8; 16];
        assert_eq!(handle.read(&mut buf, 4).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");

        handle.truncate(0).unwrap();
        assert_eq!(handle.get_size().unwrap(), 0);
        handle.close().unwrap();

        assert_eq!(fs::metadata(dir.path().join("main.db")).unwrap().len(), 0);
    }

    #[test]
    fn test_exclusive_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let first = HostStorage::new(dir.path()).get_directory().unwrap();
        let second = HostStorage::new(dir.path()).get_directory().unwrap();

        let _held = first
            .get_file_handle("shared.db", true)
            .unwrap()
            .create_sync_access_handle()
            .unwrap();

        let other = second.get_file_handle("shared.db", false).unwrap();
        assert!(matches!(
            other.create_sync_access_handle(),
            Err(StorageError::NoModificationAllowed)
        ));
        assert!(matches!(
            second.remove_entry("shared.db"),
            Err(StorageError::NoModificationAllowed)
        ));
    }

    #[test]
    fn test_lock_held_by_another_process_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let root = HostStorage::new(dir.path()).get_directory().unwrap();
        let file = root.get_file_handle("main.db", true).unwrap();

        // A separate open file description stands in for another process:
        // the process-wide table knows nothing about it.
        let foreign = File::open(dir.path().join("main.db")).unwrap();
        foreign.try_lock_exclusive().unwrap();

        assert!(matches!(
            file.create_sync_access_handle(),
            Err(StorageError::NoModificationAllowed)
        ));
        assert!(matches!(
            root.remove_entry("main.db"),
            Err(StorageError::NoModificationAllowed)
        ));

        // The failed attempt didn't leave the path registered.
        FileExt::unlock(&foreign).unwrap();
        let mut handle = file.create_sync_access_handle().unwrap();
        assert!(foreign.try_lock_exclusive().is_err());
        handle.close().unwrap();
        foreign.try_lock_exclusive().unwrap();
    }

    #[test]
    fn test_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = HostStorage::new(dir.path()).get_directory().unwrap();
        assert!(root.get_directory_handle("nope", false).unwrap_err().is_not_found());
        assert!(root.get_file_handle("nope", false).unwrap_err().is_not_found());
        assert!(root.remove_entry("nope").unwrap_err().is_not_found());
    }
}
