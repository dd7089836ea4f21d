//! JSON-lines transport for a [`Worker`].

use anyhow::{anyhow, Context, Result};
use isar_worker::{Response, Worker, WorkerConfig};
use serde_json::Value as JsonValue;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;

/// Runs a worker that takes one JSON message per line of `input` and writes
/// one JSON response per line to `output`.
///
/// Returns once `input` is exhausted and every queued message has been
/// answered. A line that isn't JSON is answered with an `error` response, in
/// its place among the other responses.
pub fn serve<R, W>(config: WorkerConfig, input: R, output: W) -> Result<()>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let output = Arc::new(Mutex::new(output));
    let worker = Worker::spawn(config)?;

    let writer = {
        let output = Arc::clone(&output);
        let responses = worker.responses().clone();
        thread::Builder::new()
            .name("isar-worker-output".to_string())
            .spawn(move || -> Result<()> {
                for response in responses.iter() {
                    write_response(&output, &response)?;
                }
                Ok(())
            })
            .context("failed to spawn the output thread")?
    };

    for line in input.lines() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonValue>(&line) {
            Ok(message) => worker.post_message(message)?,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring a line that is not JSON");
                worker.post_reply(Response::error(None, format!("Invalid JSON: {err}")))?;
            }
        }
    }

    worker.terminate();
    writer
        .join()
        .map_err(|_| anyhow!("the output thread panicked"))?
}

fn write_response<W: Write>(output: &Mutex<W>, response: &Response) -> Result<()> {
    let mut output = output
        .lock()
        .map_err(|_| anyhow!("output lock poisoned"))?;
    serde_json::to_writer(&mut *output, response)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}
