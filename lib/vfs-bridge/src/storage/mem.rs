//! In-memory storage tree.
//!
//! `MemoryStorage` can be cloned, it's a light copy of the tree (which is
//! behind an `Arc` + `RwLock`). Every handle keeps its own reference to the
//! tree, so files stay reachable while a handle is alive even after the
//! manager itself is dropped.
//!
//! The tree has a byte quota shared by all of its files, like a browser
//! origin. Growing a file past it fails with [`StorageError::QuotaExceeded`].

use super::{
    validate_name, DirectoryHandle, FileHandle, Result, StorageError, StorageManager,
    SyncAccessHandle,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Inode = usize;
const ROOT_INODE: Inode = 0;

/// Quota of a [`MemoryStorage`] built with [`MemoryStorage::new`], 2 GiB.
pub const DEFAULT_QUOTA: u64 = 2 << 30;

#[derive(Debug)]
enum Node {
    File { data: Vec<u8>, locked: bool },
    Directory { children: HashMap<String, Inode> },
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<Inode, Node>,
    // Inodes are never reused, so a stale handle can't alias a new entry.
    next_inode: Inode,
    quota: u64,
    // Sum of the lengths of every file in the tree.
    used: u64,
}

impl Tree {
    fn new(quota: u64) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INODE,
            Node::Directory {
                children: HashMap::new(),
            },
        );
        Self {
            nodes,
            next_inode: ROOT_INODE + 1,
            quota,
            used: 0,
        }
    }

    fn children(&self, inode: Inode) -> Result<&HashMap<String, Inode>> {
        match self.nodes.get(&inode) {
            Some(Node::Directory { children }) => Ok(children),
            Some(Node::File { .. }) => Err(StorageError::TypeMismatch),
            None => Err(StorageError::NotFound),
        }
    }

    fn children_mut(&mut self, inode: Inode) -> Result<&mut HashMap<String, Inode>> {
        match self.nodes.get_mut(&inode) {
            Some(Node::Directory { children }) => Ok(children),
            Some(Node::File { .. }) => Err(StorageError::TypeMismatch),
            None => Err(StorageError::NotFound),
        }
    }

    fn insert_child(&mut self, parent: Inode, name: &str, node: Node) -> Result<Inode> {
        let inode = self.next_inode;
        self.children_mut(parent)?.insert(name.to_string(), inode);
        self.nodes.insert(inode, node);
        self.next_inode += 1;
        Ok(inode)
    }

    /// Looks up `name` under `parent`, creating it with `make` when missing
    /// and `create` is set. `is_kind` tells whether an existing node fits.
    fn lookup_or_create(
        &mut self,
        parent: Inode,
        name: &str,
        create: bool,
        is_kind: fn(&Node) -> bool,
        make: fn() -> Node,
    ) -> Result<Inode> {
        if let Some(inode) = self.children(parent)?.get(name).copied() {
            return match self.nodes.get(&inode) {
                Some(node) if is_kind(node) => Ok(inode),
                Some(_) => Err(StorageError::TypeMismatch),
                None => Err(StorageError::NotFound),
            };
        }
        if !create {
            return Err(StorageError::NotFound);
        }
        self.insert_child(parent, name, make())
    }

    fn file_mut(&mut self, inode: Inode) -> Result<&mut Vec<u8>> {
        match self.nodes.get_mut(&inode) {
            Some(Node::File { data, .. }) => Ok(data),
            Some(Node::Directory { .. }) => Err(StorageError::TypeMismatch),
            None => Err(StorageError::NotFound),
        }
    }

    /// Resizes a file to `len` bytes, zero-filling any growth. Growth is
    /// checked against the quota and reserved fallibly before it happens.
    fn resize_file(&mut self, inode: Inode, len: u64) -> Result<()> {
        let current = self.file(inode)?.len() as u64;
        let used = self.used - current;
        if len > current && used.saturating_add(len) > self.quota {
            return Err(StorageError::QuotaExceeded);
        }
        let new_len = usize::try_from(len).map_err(|_| StorageError::QuotaExceeded)?;
        let data = self.file_mut(inode)?;
        if new_len > data.len() {
            data.try_reserve_exact(new_len - data.len())
                .map_err(|_| StorageError::QuotaExceeded)?;
        }
        data.resize(new_len, 0);
        self.used = used + len;
        Ok(())
    }

    fn file(&self, inode: Inode) -> Result<&Vec<u8>> {
        match self.nodes.get(&inode) {
            Some(Node::File { data, .. }) => Ok(data),
            Some(Node::Directory { .. }) => Err(StorageError::TypeMismatch),
            None => Err(StorageError::NotFound),
        }
    }
}

type SharedTree = Arc<RwLock<Tree>>;

fn read_tree(tree: &SharedTree) -> Result<RwLockReadGuard<'_, Tree>> {
    tree.read().map_err(|_| StorageError::Lock)
}

fn write_tree(tree: &SharedTree) -> Result<RwLockWriteGuard<'_, Tree>> {
    tree.write().map_err(|_| StorageError::Lock)
}

/// The in-memory storage manager. Nothing it holds survives the process.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: SharedTree,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA)
    }

    /// A tree whose files may hold at most `quota` bytes between them.
    pub fn with_quota(quota: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Tree::new(quota))),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManager for MemoryStorage {
    fn get_directory(&self) -> Result<Box<dyn DirectoryHandle>> {
        Ok(Box::new(MemDirectory {
            tree: self.inner.clone(),
            inode: ROOT_INODE,
        }))
    }
}

#[derive(Debug)]
struct MemDirectory {
    tree: SharedTree,
    inode: Inode,
}

impl DirectoryHandle for MemDirectory {
    fn get_directory_handle(&self, name: &str, create: bool) -> Result<Box<dyn DirectoryHandle>> {
        validate_name(name)?;
        let mut tree = write_tree(&self.tree)?;
        let inode = tree.lookup_or_create(
            self.inode,
            name,
            create,
            |node| matches!(node, Node::Directory { .. }),
            || Node::Directory {
                children: HashMap::new(),
            },
        )?;
        Ok(Box::new(MemDirectory {
            tree: self.tree.clone(),
            inode,
        }))
    }

    fn get_file_handle(&self, name: &str, create: bool) -> Result<Box<dyn FileHandle>> {
        validate_name(name)?;
        let mut tree = write_tree(&self.tree)?;
        let inode = tree.lookup_or_create(
            self.inode,
            name,
            create,
            |node| matches!(node, Node::File { .. }),
            || Node::File {
                data: Vec::new(),
                locked: false,
            },
        )?;
        Ok(Box::new(MemFile {
            tree: self.tree.clone(),
            inode,
        }))
    }

    fn remove_entry(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut tree = write_tree(&self.tree)?;
        let inode = tree
            .children(self.inode)?
            .get(name)
            .copied()
            .ok_or(StorageError::NotFound)?;

        match tree.nodes.get(&inode) {
            Some(Node::File { locked: true, .. }) => {
                return Err(StorageError::NoModificationAllowed);
            }
            Some(Node::Directory { children }) if !children.is_empty() => {
                return Err(StorageError::InvalidModification);
            }
            _ => {}
        }

        tree.children_mut(self.inode)?.remove(name);
        if let Some(Node::File { data, .. }) = tree.nodes.remove(&inode) {
            tree.used -= data.len() as u64;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MemFile {
    tree: SharedTree,
    inode: Inode,
}

impl FileHandle for MemFile {
    fn create_sync_access_handle(&self) -> Result<Box<dyn SyncAccessHandle>> {
        let mut tree = write_tree(&self.tree)?;
        match tree.nodes.get_mut(&self.inode) {
            Some(Node::File { locked, .. }) => {
                if *locked {
                    return Err(StorageError::NoModificationAllowed);
                }
                *locked = true;
            }
            Some(Node::Directory { .. }) => return Err(StorageError::TypeMismatch),
            None => return Err(StorageError::NotFound),
        }
        Ok(Box::new(MemSyncAccessHandle {
            tree: self.tree.clone(),
            inode: self.inode,
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct MemSyncAccessHandle {
    tree: SharedTree,
    inode: Inode,
    closed: bool,
}

impl MemSyncAccessHandle {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::InvalidState);
        }
        Ok(())
    }
}

impl SyncAccessHandle for MemSyncAccessHandle {
    fn read(&mut self, buf: &mut [u8], at: u64) -> Result<usize> {
        self.ensure_open()?;
        let tree = read_tree(&self.tree)?;
        let data = tree.file(self.inode)?;
        let start = match usize::try_from(at) {
            Ok(start) if start < data.len() => start,
            _ => return Ok(0),
        };
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok(count)
    }

    fn write(&mut self, bytes: &[u8], at: u64) -> Result<usize> {
        self.ensure_open()?;
        let end = at
            .checked_add(bytes.len() as u64)
            .ok_or(StorageError::QuotaExceeded)?;
        let mut tree = write_tree(&self.tree)?;
        if (tree.file(self.inode)?.len() as u64) < end {
            tree.resize_file(self.inode, end)?;
        }
        // Both fit in usize now that the file is at least `end` bytes long.
        let (start, end) = (at as usize, end as usize);
        tree.file_mut(self.inode)?[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.ensure_open()?;
        let mut tree = write_tree(&self.tree)?;
        tree.resize_file(self.inode, size)
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn get_size(&self) -> Result<u64> {
        self.ensure_open()?;
        let tree = read_tree(&self.tree)?;
        Ok(tree.file(self.inode)?.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut tree = write_tree(&self.tree)?;
        if let Some(Node::File { locked, .. }) = tree.nodes.get_mut(&self.inode) {
            *locked = false;
        }
        Ok(())
    }
}

impl Drop for MemSyncAccessHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
