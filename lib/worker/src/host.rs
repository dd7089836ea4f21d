use crate::config::WorkerConfig;
use crate::error::HostError;
use crate::imports::{generate_import_object, BridgeEnv};
use crate::loader::fetch_module;
use crate::protocol::{Request, Response};
use crate::values;
use isar_vfs_bridge::VfsBridge;
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::{debug, error, info, warn};
use wasmer::{FunctionEnv, Instance, Module, Store};

/// Lifecycle of a [`WorkerHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostState {
    Uninitialized,
    Initializing,
    Ready,
    /// An export is running.
    Busy,
    /// Initialization failed. Terminal.
    Failed(String),
}

struct Runtime {
    store: Store,
    instance: Instance,
    env: FunctionEnv<BridgeEnv>,
    opfs_available: bool,
}

/// Owns one module instance and dispatches protocol requests to it.
///
/// The host is single threaded: each request runs to completion before the
/// next one is looked at. [`crate::Worker`] puts it on its own thread.
pub struct WorkerHost {
    config: WorkerConfig,
    state: HostState,
    runtime: Option<Runtime>,
}

impl fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHost")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("opfs_available", &self.opfs_available())
            .finish()
    }
}

impl WorkerHost {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            state: HostState::Uninitialized,
            runtime: None,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Whether the storage capability was found, once initialized.
    pub fn opfs_available(&self) -> Option<bool> {
        self.runtime.as_ref().map(|runtime| runtime.opfs_available)
    }

    /// The bridge wired into the running instance.
    pub fn bridge(&self) -> Option<&VfsBridge> {
        self.runtime
            .as_ref()
            .map(|runtime| runtime.env.as_ref(&runtime.store).bridge())
    }

    /// Handles one raw message. Every message gets exactly one response.
    pub fn handle_message(&mut self, message: JsonValue) -> Response {
        match Request::parse(message) {
            Ok(request) => self.handle_request(request),
            Err(err) => {
                warn!(error = %err, "rejecting message");
                err.into_response()
            }
        }
    }

    pub fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::Initialize { id, wasm_url } => match self.initialize(&wasm_url) {
                Ok(opfs_available) => Response::Initialized { opfs_available },
                Err(err @ (HostError::AlreadyInitialized | HostError::Failed(_))) => {
                    Response::error(id, err.to_string())
                }
                Err(err) => Response::error(id, format!("Failed to initialize WASM: {err}")),
            },
            Request::Call {
                id,
                function_name,
                args,
            } => {
                let outcome = self.call(&function_name, &args);
                if let Err(err) = &outcome {
                    debug!(function = %function_name, error = %err, "call failed");
                }
                Response::call_result(id, outcome)
            }
            Request::Ping { id } => Response::Pong { id },
        }
    }

    /// Loads and instantiates the module at `wasm_url`. Returns whether the
    /// storage capability is available.
    pub fn initialize(&mut self, wasm_url: &str) -> Result<bool, HostError> {
        match &self.state {
            HostState::Uninitialized => {}
            HostState::Failed(reason) => return Err(HostError::Failed(reason.clone())),
            HostState::Initializing | HostState::Ready | HostState::Busy => {
                return Err(HostError::AlreadyInitialized)
            }
        }

        self.state = HostState::Initializing;
        match self.instantiate(wasm_url) {
            Ok(runtime) => {
                let opfs_available = runtime.opfs_available;
                info!(wasm_url, opfs_available, "module initialized");
                self.runtime = Some(runtime);
                self.state = HostState::Ready;
                Ok(opfs_available)
            }
            Err(err) => {
                error!(wasm_url, error = %err, "failed to initialize module");
                self.state = HostState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn instantiate(&self, wasm_url: &str) -> Result<Runtime, HostError> {
        let mut bridge = VfsBridge::new(self.config.storage.build());
        let opfs_available = bridge.initialize();

        let mut store = Store::default();
        let env = FunctionEnv::new(&mut store, BridgeEnv::new(bridge));
        let import_object = generate_import_object(&mut store, &env);

        let bytes = fetch_module(wasm_url, self.config.base_dir.as_deref())?;
        let module = Module::new(&store, bytes)?;
        let instance = Instance::new(&mut store, &module, &import_object)?;

        match instance.exports.get_memory("memory") {
            Ok(memory) => env.as_mut(&mut store).set_memory(memory.clone()),
            Err(_) => warn!("module does not export `memory`; pointer arguments will fail"),
        }

        Ok(Runtime {
            store,
            instance,
            env,
            opfs_available,
        })
    }

    /// Calls the export `function_name` with JSON arguments.
    pub fn call(&mut self, function_name: &str, args: &[JsonValue]) -> Result<JsonValue, HostError> {
        match &self.state {
            HostState::Ready => {}
            HostState::Failed(reason) => return Err(HostError::Failed(reason.clone())),
            _ => return Err(HostError::NotInitialized),
        }
        let runtime = self.runtime.as_mut().ok_or(HostError::NotInitialized)?;

        let function = runtime
            .instance
            .exports
            .get_function(function_name)
            .map_err(|_| HostError::MissingExport(function_name.to_string()))?;
        let params = function.ty(&runtime.store).params().to_vec();
        let wasm_args = values::to_wasm_args(function_name, &params, args)?;

        self.state = HostState::Busy;
        let results = function.call(&mut runtime.store, &wasm_args);
        self.state = HostState::Ready;

        values::to_json(function_name, &results?)
    }
}
