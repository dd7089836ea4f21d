//! The `env` import namespace the storage engine links against.
//!
//! Every import is a thin shim: it copies arguments out of guest memory,
//! hands them to the [`VfsBridge`] and copies results back. Pointers and
//! lengths arrive as `i32` and are reinterpreted as unsigned. No import ever
//! traps; failures are reported to the guest as negative status codes.

use isar_vfs_bridge::{Fd, VfsBridge, SQLITE_CANTOPEN, SQLITE_ERROR, SQLITE_IOERR};
use thiserror::Error;
use tracing::{instrument, warn};
use wasmer::{
    imports, namespace, Exports, Function, FunctionEnv, FunctionEnvMut, Imports, Memory,
    MemoryAccessError, MemoryView, Store,
};

/// Module name every bridge import is declared under.
pub const IMPORT_NAMESPACE: &str = "env";

/// Names of the bridge imports, in declaration order.
pub const IMPORT_NAMES: [&str; 11] = [
    "isar_opfs_open",
    "isar_opfs_close",
    "isar_opfs_read",
    "isar_opfs_write",
    "isar_opfs_truncate",
    "isar_opfs_sync",
    "isar_opfs_file_size",
    "isar_opfs_delete",
    "isar_opfs_access",
    "isar_opfs_lock",
    "isar_opfs_unlock",
];

/// State shared by the bridge imports of one instance.
#[derive(Debug)]
pub struct BridgeEnv {
    bridge: VfsBridge,
    memory: Option<Memory>,
}

impl BridgeEnv {
    pub fn new(bridge: VfsBridge) -> Self {
        Self {
            bridge,
            memory: None,
        }
    }

    /// Attaches the instance's exported memory. Until this happens every
    /// import that touches guest memory fails with `SQLITE_ERROR`.
    pub fn set_memory(&mut self, memory: Memory) {
        self.memory = Some(memory);
    }

    pub fn memory(&self) -> Option<&Memory> {
        self.memory.as_ref()
    }

    pub fn bridge(&self) -> &VfsBridge {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut VfsBridge {
        &mut self.bridge
    }
}

#[derive(Error, Debug)]
enum GuestMemoryError {
    #[error("module does not export a memory")]
    NoMemory,
    #[error("range {offset:#x}+{len} is outside guest memory")]
    OutOfBounds { offset: u64, len: u64 },
    #[error("path is not valid UTF-8")]
    NonUtf8,
    #[error(transparent)]
    Access(#[from] MemoryAccessError),
}

/// Checks that `ptr..ptr+len` lies inside the view and returns it as an
/// offset and a length.
fn guest_range(
    view: &MemoryView<'_>,
    ptr: i32,
    len: i32,
) -> Result<(u64, usize), GuestMemoryError> {
    let offset = ptr as u32 as u64;
    let len = len as u32 as u64;
    match offset.checked_add(len) {
        Some(end) if end <= view.data_size() => Ok((offset, len as usize)),
        _ => Err(GuestMemoryError::OutOfBounds { offset, len }),
    }
}

fn read_guest_bytes(
    env: &FunctionEnvMut<'_, BridgeEnv>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, GuestMemoryError> {
    let memory = env.data().memory.as_ref().ok_or(GuestMemoryError::NoMemory)?;
    let view = memory.view(env);
    let (offset, len) = guest_range(&view, ptr, len)?;
    let mut bytes = vec![0; len];
    view.read(offset, &mut bytes)?;
    Ok(bytes)
}

fn read_guest_path(
    env: &FunctionEnvMut<'_, BridgeEnv>,
    ptr: i32,
    len: i32,
) -> Result<String, GuestMemoryError> {
    let bytes = read_guest_bytes(env, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| GuestMemoryError::NonUtf8)
}

/// Negative byte offsets and sizes are an I/O error, not a memory fault.
fn non_negative(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

/// ### `isar_opfs_open()`
/// Open a file in the sandboxed storage tree
/// Inputs:
/// - `const char *path`
///     UTF-8 path, not NUL terminated
/// - `u32 path_len`
///     Length of `path` in bytes
/// - `i32 flags`
///     `CREATE=1 | READ=2 | WRITE=4 | EXCLUSIVE=8 | TRUNCATE=16`
/// Output:
/// - A new descriptor (>= 1), `SQLITE_CANTOPEN` or `SQLITE_ERROR`
#[instrument(level = "trace", skip_all, fields(%flags), ret)]
pub fn isar_opfs_open(
    mut env: FunctionEnvMut<'_, BridgeEnv>,
    path_ptr: i32,
    path_len: i32,
    flags: i32,
) -> i32 {
    let path = match read_guest_path(&env, path_ptr, path_len) {
        Ok(path) => path,
        Err(GuestMemoryError::NonUtf8) => return SQLITE_CANTOPEN,
        Err(err) => {
            warn!(error = %err, "isar_opfs_open: cannot read path");
            return SQLITE_ERROR;
        }
    };
    env.data_mut().bridge.open(&path, flags)
}

/// ### `isar_opfs_close()`
/// Close a descriptor and release its exclusive handle
/// Inputs:
/// - `Fd fd`
#[instrument(level = "trace", skip_all, fields(%fd), ret)]
pub fn isar_opfs_close(mut env: FunctionEnvMut<'_, BridgeEnv>, fd: Fd) -> i32 {
    env.data_mut().bridge.close(fd)
}

/// ### `isar_opfs_read()`
/// Read up to `buf_len` bytes at an absolute offset
/// Inputs:
/// - `Fd fd`
/// - `u8 *buf`
///     Destination in guest memory
/// - `u32 buf_len`
/// - `i64 offset`
///     Absolute file offset, must not be negative
/// Output:
/// - The number of bytes read, 0 at end of file, or a negative status
#[instrument(level = "trace", skip_all, fields(%fd, %buf_len, %offset), ret)]
pub fn isar_opfs_read(
    mut env: FunctionEnvMut<'_, BridgeEnv>,
    fd: Fd,
    buf_ptr: i32,
    buf_len: i32,
    offset: i64,
) -> i32 {
    let Some(offset) = non_negative(offset) else {
        return SQLITE_IOERR;
    };
    let Some(memory) = env.data().memory.clone() else {
        warn!("isar_opfs_read: {}", GuestMemoryError::NoMemory);
        return SQLITE_ERROR;
    };
    let (dest, len) = match guest_range(&memory.view(&env), buf_ptr, buf_len) {
        Ok(range) => range,
        Err(err) => {
            warn!(error = %err, "isar_opfs_read: bad destination buffer");
            return SQLITE_ERROR;
        }
    };

    let mut buf = vec![0; len];
    let count = env.data_mut().bridge.read(fd, &mut buf, offset);
    if count > 0 {
        if let Err(err) = memory.view(&env).write(dest, &buf[..count as usize]) {
            warn!(error = %err, "isar_opfs_read: cannot copy into guest memory");
            return SQLITE_ERROR;
        }
    }
    count
}

/// ### `isar_opfs_write()`
/// Write `buf_len` bytes at an absolute offset, extending the file if needed
/// Inputs:
/// - `Fd fd`
/// - `const u8 *buf`
/// - `u32 buf_len`
/// - `i64 offset`
/// Output:
/// - The number of bytes written or a negative status
#[instrument(level = "trace", skip_all, fields(%fd, %buf_len, %offset), ret)]
pub fn isar_opfs_write(
    mut env: FunctionEnvMut<'_, BridgeEnv>,
    fd: Fd,
    buf_ptr: i32,
    buf_len: i32,
    offset: i64,
) -> i32 {
    let Some(offset) = non_negative(offset) else {
        return SQLITE_IOERR;
    };
    let data = match read_guest_bytes(&env, buf_ptr, buf_len) {
        Ok(data) => data,
        Err(err) => {
            warn!(error = %err, "isar_opfs_write: bad source buffer");
            return SQLITE_ERROR;
        }
    };
    env.data_mut().bridge.write(fd, &data, offset)
}

/// ### `isar_opfs_truncate()`
/// Set the file length
/// Inputs:
/// - `Fd fd`
/// - `i64 size`
#[instrument(level = "trace", skip_all, fields(%fd, %size), ret)]
pub fn isar_opfs_truncate(mut env: FunctionEnvMut<'_, BridgeEnv>, fd: Fd, size: i64) -> i32 {
    match non_negative(size) {
        Some(size) => env.data_mut().bridge.truncate(fd, size),
        None => SQLITE_IOERR,
    }
}

/// ### `isar_opfs_sync()`
/// Flush buffered writes of `fd` to durable storage
#[instrument(level = "trace", skip_all, fields(%fd), ret)]
pub fn isar_opfs_sync(mut env: FunctionEnvMut<'_, BridgeEnv>, fd: Fd) -> i32 {
    env.data_mut().bridge.sync(fd)
}

/// ### `isar_opfs_file_size()`
/// Current length of the file behind `fd`, or a negative status
#[instrument(level = "trace", skip_all, fields(%fd), ret)]
pub fn isar_opfs_file_size(env: FunctionEnvMut<'_, BridgeEnv>, fd: Fd) -> i64 {
    env.data().bridge.file_size(fd)
}

/// ### `isar_opfs_delete()`
/// Remove a file. Removing a missing file succeeds
/// Inputs:
/// - `const char *path`
/// - `u32 path_len`
#[instrument(level = "trace", skip_all, ret)]
pub fn isar_opfs_delete(mut env: FunctionEnvMut<'_, BridgeEnv>, path_ptr: i32, path_len: i32) -> i32 {
    match read_guest_path(&env, path_ptr, path_len) {
        Ok(path) => env.data_mut().bridge.delete(&path),
        Err(err) => {
            warn!(error = %err, "isar_opfs_delete: cannot read path");
            SQLITE_ERROR
        }
    }
}

/// ### `isar_opfs_access()`
/// Check whether a file exists
/// Inputs:
/// - `const char *path`
/// - `u32 path_len`
/// Output:
/// - `1` if it exists, `0` if not, or a negative status
#[instrument(level = "trace", skip_all, ret)]
pub fn isar_opfs_access(env: FunctionEnvMut<'_, BridgeEnv>, path_ptr: i32, path_len: i32) -> i32 {
    match read_guest_path(&env, path_ptr, path_len) {
        Ok(path) => env.data().bridge.access(&path),
        Err(err) => {
            warn!(error = %err, "isar_opfs_access: cannot read path");
            SQLITE_ERROR
        }
    }
}

/// ### `isar_opfs_lock()`
/// Advisory lock. Handles are already exclusive, so this only validates `fd`
#[instrument(level = "trace", skip_all, fields(%fd, %lock_type), ret)]
pub fn isar_opfs_lock(env: FunctionEnvMut<'_, BridgeEnv>, fd: Fd, lock_type: i32) -> i32 {
    env.data().bridge.lock(fd, lock_type)
}

/// ### `isar_opfs_unlock()`
#[instrument(level = "trace", skip_all, fields(%fd, %lock_type), ret)]
pub fn isar_opfs_unlock(env: FunctionEnvMut<'_, BridgeEnv>, fd: Fd, lock_type: i32) -> i32 {
    env.data().bridge.unlock(fd, lock_type)
}

/// The bridge imports as an export set, ready to be registered under
/// [`IMPORT_NAMESPACE`].
pub fn bridge_exports(store: &mut Store, env: &FunctionEnv<BridgeEnv>) -> Exports {
    namespace! {
        "isar_opfs_open" => Function::new_typed_with_env(store, env, isar_opfs_open),
        "isar_opfs_close" => Function::new_typed_with_env(store, env, isar_opfs_close),
        "isar_opfs_read" => Function::new_typed_with_env(store, env, isar_opfs_read),
        "isar_opfs_write" => Function::new_typed_with_env(store, env, isar_opfs_write),
        "isar_opfs_truncate" => Function::new_typed_with_env(store, env, isar_opfs_truncate),
        "isar_opfs_sync" => Function::new_typed_with_env(store, env, isar_opfs_sync),
        "isar_opfs_file_size" => Function::new_typed_with_env(store, env, isar_opfs_file_size),
        "isar_opfs_delete" => Function::new_typed_with_env(store, env, isar_opfs_delete),
        "isar_opfs_access" => Function::new_typed_with_env(store, env, isar_opfs_access),
        "isar_opfs_lock" => Function::new_typed_with_env(store, env, isar_opfs_lock),
        "isar_opfs_unlock" => Function::new_typed_with_env(store, env, isar_opfs_unlock),
    }
}

/// Generate the import object for an instance driven by `env`.
pub fn generate_import_object(store: &mut Store, env: &FunctionEnv<BridgeEnv>) -> Imports {
    let exports = bridge_exports(store, env);
    imports! {
        IMPORT_NAMESPACE => exports,
    }
}
