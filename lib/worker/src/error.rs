use crate::protocol::ProtocolError;
use std::io;
use thiserror::Error;
use wasmer::{CompileError, InstantiationError, RuntimeError};

#[derive(Error, Debug)]
pub enum HostError {
    #[error("WASM not initialized")]
    NotInitialized,
    #[error("WASM already initialized")]
    AlreadyInitialized,
    /// Initialization failed earlier; the worker has to be replaced
    #[error("worker failed to initialize and must be restarted: {0}")]
    Failed(String),
    #[error("Function {0} not found in WASM exports")]
    MissingExport(String),
    /// The call arguments don't fit the export's signature
    #[error("invalid arguments for {function}: {message}")]
    Argument { function: String, message: String },
    #[error("{function} returned a value that can't be represented: {message}")]
    Result { function: String, message: String },
    #[error("failed to fetch module from `{location}`: {source}")]
    Fetch {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to compile module: {0}")]
    Compile(#[from] CompileError),
    #[error("failed to instantiate module: {0}")]
    Instantiate(#[from] InstantiationError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("worker is disconnected")]
    Disconnected,
}
