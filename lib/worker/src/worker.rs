use crate::config::WorkerConfig;
use crate::error::HostError;
use crate::host::WorkerHost;
use crate::protocol::Response;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde_json::Value as JsonValue;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info_span};

/// What the worker thread takes off its queue.
#[derive(Debug)]
enum Inbound {
    Message(JsonValue),
    /// Emitted as is, once everything queued before it has been answered.
    Reply(Response),
}

/// A [`WorkerHost`] running on its own thread.
///
/// Messages posted with [`Worker::post_message`] are handled strictly in
/// order; responses come back on [`Worker::responses`]. The first response
/// is always [`Response::Ready`].
#[derive(Debug)]
pub struct Worker {
    requests: Option<Sender<Inbound>>,
    responses: Receiver<Response>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(config: WorkerConfig) -> Result<Self, HostError> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (response_tx, response_rx) = crossbeam_channel::unbounded();

        let thread = thread::Builder::new()
            .name("isar-worker".to_string())
            .spawn(move || run(config, request_rx, response_tx))
            .map_err(HostError::Spawn)?;

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            thread: Some(thread),
        })
    }

    pub fn post_message(&self, message: JsonValue) -> Result<(), HostError> {
        self.enqueue(Inbound::Message(message))
    }

    /// Queues a ready-made `response` behind the messages already posted.
    /// Transports use it to answer input that never reaches the host, such
    /// as a line that isn't JSON, without overtaking earlier responses.
    pub fn post_reply(&self, response: Response) -> Result<(), HostError> {
        self.enqueue(Inbound::Reply(response))
    }

    fn enqueue(&self, inbound: Inbound) -> Result<(), HostError> {
        let requests = self.requests.as_ref().ok_or(HostError::Disconnected)?;
        requests.send(inbound).map_err(|_| HostError::Disconnected)
    }

    /// Blocks until the next response arrives.
    pub fn recv(&self) -> Result<Response, HostError> {
        self.responses.recv().map_err(|_| HostError::Disconnected)
    }

    /// Like [`Worker::recv`], but gives up after `timeout` and returns
    /// `None`. The request keeps running.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Response>, HostError> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(HostError::Disconnected),
        }
    }

    /// The response stream, for callers that want to select over it or
    /// drain it from another thread.
    pub fn responses(&self) -> &Receiver<Response> {
        &self.responses
    }

    /// Stops accepting messages, lets queued ones finish and waits for the
    /// thread to exit.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(config: WorkerConfig, requests: Receiver<Inbound>, responses: Sender<Response>) {
    let span = info_span!("worker");
    let _guard = span.enter();

    if responses.send(Response::Ready).is_err() {
        return;
    }
    let mut host = WorkerHost::new(config);
    for inbound in requests.iter() {
        let response = match inbound {
            Inbound::Message(message) => host.handle_message(message),
            Inbound::Reply(response) => response,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
    debug!("worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_ready_comes_first() {
        let worker = Worker::spawn(WorkerConfig::default()).unwrap();
        worker.post_message(json!({ "type": "ping", "id": 1 })).unwrap();
        assert_eq!(worker.recv().unwrap(), Response::Ready);
        assert_eq!(worker.recv().unwrap(), Response::Pong { id: Some(json!(1)) });
        worker.terminate();
    }

    #[test]
    fn test_responses_keep_request_order() {
        let worker = Worker::spawn(WorkerConfig::default()).unwrap();
        assert_eq!(worker.recv().unwrap(), Response::Ready);
        for id in 0..20 {
            worker.post_message(json!({ "type": "ping", "id": id })).unwrap();
        }
        worker.post_message(json!({ "type": "bogus", "id": 20 })).unwrap();

        for id in 0..20 {
            assert_eq!(worker.recv().unwrap().id(), Some(&json!(id)));
        }
        assert_eq!(
            worker.recv().unwrap(),
            Response::error(Some(json!(20)), "Unknown message type: bogus")
        );
        assert_eq!(
            worker.recv_timeout(Duration::from_millis(20)).unwrap(),
            None
        );
    }

    #[test]
    fn test_replies_wait_their_turn() {
        let worker = Worker::spawn(WorkerConfig::default()).unwrap();
        assert_eq!(worker.recv().unwrap(), Response::Ready);
        worker.post_message(json!({ "type": "ping", "id": 1 })).unwrap();
        worker
            .post_reply(Response::error(None, "rejected"))
            .unwrap();
        worker.post_message(json!({ "type": "ping", "id": 2 })).unwrap();

        assert_eq!(worker.recv().unwrap(), Response::Pong { id: Some(json!(1)) });
        assert_eq!(worker.recv().unwrap(), Response::error(None, "rejected"));
        assert_eq!(worker.recv().unwrap(), Response::Pong { id: Some(json!(2)) });
    }

    #[test]
    fn test_responses_end_after_terminate() {
        let worker = Worker::spawn(WorkerConfig::default()).unwrap();
        let responses = worker.responses().clone();
        worker.terminate();
        assert_eq!(responses.recv().unwrap(), Response::Ready);
        assert!(responses.recv().is_err());
    }
}
