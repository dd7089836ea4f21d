//! End-to-end tests: a threaded worker driving an engine module whose exports
//! call straight through to the storage imports.

use isar_opfs_workspace::worker::StorageConfig;
use isar_opfs_workspace::{Response, Worker, WorkerConfig};
use pretty_assertions::assert_eq;
use serde_json::{json, Value as JsonValue};
use std::path::Path;

const ENGINE: &str = r#"
(module
  (import "env" "isar_opfs_open" (func $open (param i32 i32 i32) (result i32)))
  (import "env" "isar_opfs_close" (func $close (param i32) (result i32)))
  (import "env" "isar_opfs_read" (func $read (param i32 i32 i32 i64) (result i32)))
  (import "env" "isar_opfs_write" (func $write (param i32 i32 i32 i64) (result i32)))
  (import "env" "isar_opfs_truncate" (func $truncate (param i32 i64) (result i32)))
  (import "env" "isar_opfs_sync" (func $sync (param i32) (result i32)))
  (import "env" "isar_opfs_file_size" (func $file_size (param i32) (result i64)))
  (import "env" "isar_opfs_delete" (func $delete (param i32 i32) (result i32)))
  (import "env" "isar_opfs_access" (func $access (param i32 i32) (result i32)))
  (import "env" "isar_opfs_lock" (func $lock (param i32 i32) (result i32)))
  (import "env" "isar_opfs_unlock" (func $unlock (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "db/a.isar")
  (data (i32.const 16) "nope/x")
  (data (i32.const 32) "abc")
  (export "open" (func $open))
  (export "close" (func $close))
  (export "read" (func $read))
  (export "write" (func $write))
  (export "truncate" (func $truncate))
  (export "sync" (func $sync))
  (export "file_size" (func $file_size))
  (export "delete" (func $delete))
  (export "access" (func $access))
  (export "lock" (func $lock))
  (export "unlock" (func $unlock))
  (func (export "byte_at") (param i32) (result i32)
    (i32.load8_u (local.get 0)))
)
"#;

const CREATE: i32 = 1;
const TRUNCATE: i32 = 16;

// Offsets and lengths of the data segments above.
const DB_PATH: (i32, i32) = (0, 9);
const MISSING_PARENT: (i32, i32) = (16, 6);
const ABC: (i32, i32) = (32, 3);

struct Session {
    worker: Worker,
    next_id: u64,
}

impl Session {
    fn start(dir: &Path, storage: StorageConfig) -> Self {
        std::fs::write(
            dir.join("engine.wasm"),
            wasmer::wat2wasm(ENGINE.as_bytes()).unwrap(),
        )
        .unwrap();
        let config = WorkerConfig::default()
            .with_base_dir(dir)
            .with_storage(storage);
        let worker = Worker::spawn(config).unwrap();
        assert_eq!(worker.recv().unwrap(), Response::Ready);
        Self { worker, next_id: 0 }
    }

    fn initialize(&mut self) -> Response {
        self.send(json!({ "type": "initialize", "data": { "wasmUrl": "engine.wasm" } }))
    }

    fn send(&mut self, message: JsonValue) -> Response {
        self.worker.post_message(message).unwrap();
        self.worker.recv().unwrap()
    }

    fn call_raw(&mut self, function: &str, args: JsonValue) -> Response {
        self.next_id += 1;
        let id = self.next_id;
        let response = self.send(json!({
            "type": "call",
            "id": id,
            "data": { "functionName": function, "args": args },
        }));
        assert_eq!(response.id(), Some(&json!(id)));
        response
    }

    fn call(&mut self, function: &str, args: JsonValue) -> JsonValue {
        match self.call_raw(function, args) {
            Response::Result {
                success: true,
                result: Some(result),
                ..
            } => result,
            other => panic!("{function} failed: {other:?}"),
        }
    }

    fn open(&mut self, flags: i32) -> i64 {
        self.call("open", json!([DB_PATH.0, DB_PATH.1, flags]))
            .as_i64()
            .unwrap()
    }
}

#[test]
fn write_close_reopen_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(dir.path(), StorageConfig::Memory);
    assert_eq!(
        session.initialize(),
        Response::Initialized {
            opfs_available: true
        }
    );

    let fd = session.open(CREATE);
    assert!(fd > 0);
    assert_eq!(session.call("write", json!([fd, ABC.0, ABC.1, 0])), json!(3));
    assert_eq!(session.call("sync", json!([fd])), json!(0));
    assert_eq!(session.call("close", json!([fd])), json!(0));

    let fd = session.open(0);
    assert_eq!(session.call("file_size", json!([fd])), json!(3));
    assert_eq!(session.call("read", json!([fd, 64, 3, 0])), json!(3));
    let bytes: Vec<JsonValue> = (64..67)
        .map(|offset| session.call("byte_at", json!([offset])))
        .collect();
    assert_eq!(bytes, vec![json!(b'a'), json!(b'b'), json!(b'c')]);
    assert_eq!(session.call("read", json!([fd, 64, 3, 3])), json!(0));
}

#[test]
fn descriptors_and_locks() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(dir.path(), StorageConfig::Memory);
    session.initialize();

    for function in ["close", "sync", "file_size"] {
        assert_eq!(session.call(function, json!([42])), json!(-1), "{function}");
    }
    assert_eq!(session.call("truncate", json!([42, 0])), json!(-1));
    assert_eq!(session.call("read", json!([42, 64, 1, 0])), json!(-1));
    assert_eq!(session.call("write", json!([42, 32, 1, 0])), json!(-1));
    assert_eq!(session.call("lock", json!([42, 1])), json!(-1));
    assert_eq!(session.call("unlock", json!([42, 0])), json!(-1));

    let fd = session.open(CREATE);
    assert_eq!(session.call("lock", json!([fd, 2])), json!(0));
    assert_eq!(session.call("unlock", json!([fd, 0])), json!(0));
    // A second handle on the same file is refused while the first is open.
    assert!(session.open(CREATE) < 0);
    session.call("close", json!([fd]));
    let again = session.open(CREATE);
    assert!(again > fd, "descriptors are not reused");
}

#[test]
fn sizes_follow_writes_and_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(dir.path(), StorageConfig::Memory);
    session.initialize();

    let fd = session.open(CREATE);
    assert_eq!(session.call("write", json!([fd, ABC.0, ABC.1, 10])), json!(3));
    assert_eq!(session.call("file_size", json!([fd])), json!(13));
    assert_eq!(session.call("truncate", json!([fd, 4])), json!(0));
    assert_eq!(session.call("file_size", json!([fd])), json!(4));
    // Growth the storage can't hold is an I/O error, not a dead worker.
    assert_eq!(session.call("truncate", json!([fd, 1i64 << 60])), json!(-10));
    assert_eq!(
        session.call("write", json!([fd, ABC.0, ABC.1, 1i64 << 60])),
        json!(-10)
    );
    assert_eq!(session.call("file_size", json!([fd])), json!(4));
    session.call("close", json!([fd]));

    let fd = session.open(CREATE | TRUNCATE);
    assert_eq!(session.call("file_size", json!([fd])), json!(0));
}

#[test]
fn delete_and_access_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(dir.path(), StorageConfig::Memory);
    session.initialize();

    assert_eq!(session.call("access", json!([DB_PATH.0, DB_PATH.1])), json!(0));
    assert_eq!(session.call("delete", json!([DB_PATH.0, DB_PATH.1])), json!(0));
    assert_eq!(
        session.call("access", json!([MISSING_PARENT.0, MISSING_PARENT.1])),
        json!(0)
    );
    assert_eq!(
        session.call("delete", json!([MISSING_PARENT.0, MISSING_PARENT.1])),
        json!(0)
    );
    // Opening without CREATE doesn't make the file.
    assert_eq!(session.open(0), -14);

    let fd = session.open(CREATE);
    session.call("close", json!([fd]));
    assert_eq!(session.call("access", json!([DB_PATH.0, DB_PATH.1])), json!(1));
    assert_eq!(session.call("delete", json!([DB_PATH.0, DB_PATH.1])), json!(0));
    assert_eq!(session.call("access", json!([DB_PATH.0, DB_PATH.1])), json!(0));
}

#[test]
fn failures_do_not_stop_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(dir.path(), StorageConfig::Memory);

    assert_eq!(
        session.send(json!({ "type": "ping", "id": "before" })),
        Response::Pong {
            id: Some(json!("before"))
        }
    );
    let response = session.call_raw("open", json!([0, 9, 1]));
    assert_eq!(
        serde_json::to_value(&response).unwrap()["error"],
        json!("WASM not initialized")
    );

    session.initialize();
    let response = session.call_raw("compact", json!([]));
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "type": "result",
            "id": 2,
            "success": false,
            "error": "Function compact not found in WASM exports",
        })
    );

    assert_eq!(
        session.send(json!({ "type": "vacuum", "id": 99 })),
        Response::error(Some(json!(99)), "Unknown message type: vacuum")
    );
    assert_eq!(session.open(CREATE), 1);
}

#[test]
fn storage_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(dir.path(), StorageConfig::Disabled);
    assert_eq!(
        session.initialize(),
        Response::Initialized {
            opfs_available: false
        }
    );
    assert_eq!(session.open(CREATE), -1);
    assert_eq!(session.call("access", json!([DB_PATH.0, DB_PATH.1])), json!(-1));
}

#[test]
fn host_directory_outlives_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig::Directory {
        path: dir.path().join("data"),
    };

    let mut first = Session::start(dir.path(), storage.clone());
    first.initialize();
    let fd = first.open(CREATE);
    first.call("write", json!([fd, ABC.0, ABC.1, 0]));
    // Terminating closes the descriptor and releases the handle.
    first.worker.terminate();

    let mut second = Session::start(dir.path(), storage);
    second.initialize();
    let fd = second.open(0);
    assert!(fd > 0);
    assert_eq!(second.call("file_size", json!([fd])), json!(3));
    assert_eq!(
        std::fs::read(dir.path().join("data/db/a.isar")).unwrap(),
        b"abc"
    );
}
