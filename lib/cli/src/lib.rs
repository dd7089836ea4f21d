//! The `isar-worker` binary lib

#![deny(
    missing_docs,
    dead_code,
    nonstandard_style,
    unused_mut,
    unused_variables,
    unreachable_patterns
)]

pub mod cli;
pub mod logging;
pub mod serve;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
