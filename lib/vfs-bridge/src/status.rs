//! Status codes and open flags shared with the storage engine.
//!
//! The codes are the negated primary SQLite result codes the engine's VFS
//! layer already interprets. Byte counts and sizes share the same integer,
//! so any non-negative value is a successful result.

use bitflags::bitflags;

/// File descriptor handed across the WASM boundary.
pub type Fd = i32;

pub const SQLITE_OK: i32 = 0;
pub const SQLITE_ERROR: i32 = -1;
pub const SQLITE_IOERR: i32 = -10;
pub const SQLITE_CANTOPEN: i32 = -14;

/// Result of [`access`](crate::VfsBridge::access) when the file exists.
pub const ACCESS_EXISTS: i32 = 1;
/// Result of [`access`](crate::VfsBridge::access) when it doesn't.
pub const ACCESS_MISSING: i32 = 0;

bitflags! {
    /// The `flags` bitfield of `open`.
    ///
    /// Only `CREATE` and `TRUNCATE` change what `open` does; the remaining
    /// bits are accepted for compatibility with the engine's requests.
    pub struct OpenFlags: u32 {
        const CREATE = 1;
        const READ = 2;
        const WRITE = 4;
        const EXCLUSIVE = 8;
        const TRUNCATE = 16;
    }
}

impl OpenFlags {
    /// Interprets the raw bitfield, ignoring unknown bits.
    pub fn from_raw(raw: i32) -> Self {
        OpenFlags::from_bits_truncate(raw as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_from_raw() {
        let flags = OpenFlags::from_raw(1 | 4 | 16);
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(flags.contains(OpenFlags::WRITE));
        assert!(flags.contains(OpenFlags::TRUNCATE));
        assert!(!flags.contains(OpenFlags::READ));

        assert_eq!(OpenFlags::from_raw(0x100 | 2), OpenFlags::READ);
        assert!(OpenFlags::from_raw(-1).is_all());
    }
}
