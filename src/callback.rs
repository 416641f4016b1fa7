// Result sinks - callback objects fed per-host, per-task outcome events

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

/// One outcome event from the runner. The variants are exhaustive over
/// outcome kinds so a sink has to decide what to do with every one of
/// them; nothing is dropped before the sink sees it.
#[derive(Debug, Clone)]
pub enum RunEvent {
    TaskOk {
        host: String,
        task: String,
        payload: Value,
    },
    TaskFailed {
        host: String,
        task: String,
        payload: Value,
    },
    TaskSkipped {
        host: String,
        task: String,
        reason: String,
    },
    Unreachable {
        host: String,
        error: String,
    },
}

impl RunEvent {
    pub fn host(&self) -> &str {
        match self {
            RunEvent::TaskOk { host, .. }
            | RunEvent::TaskFailed { host, .. }
            | RunEvent::TaskSkipped { host, .. }
            | RunEvent::Unreachable { host, .. } => host,
        }
    }
}

/// Sink for outcome events. Called synchronously as results arrive, one
/// event at a time, with no buffering.
pub trait ResultSink: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Prints each successful task as a pretty-printed JSON object whose single
/// top-level key is the host name and whose value is the raw result
/// payload. Non-ok outcomes go to the log on stderr instead of being
/// silently discarded.
pub struct JsonCallback;

impl JsonCallback {
    pub fn new() -> Self {
        JsonCallback
    }
}

impl Default for JsonCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for JsonCallback {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::TaskOk { host, payload, .. } => {
                let mut record = serde_json::Map::new();
                record.insert(host.clone(), payload.clone());
                match serde_json::to_string_pretty(&Value::Object(record)) {
                    Ok(rendered) => println!("{}", rendered),
                    Err(e) => warn!(host = host.as_str(), error = %e, "unprintable result payload"),
                }
            }
            RunEvent::TaskFailed {
                host,
                task,
                payload,
            } => {
                warn!(host = host.as_str(), task = task.as_str(), payload = %payload, "task failed");
            }
            RunEvent::TaskSkipped { host, task, reason } => {
                warn!(host = host.as_str(), task = task.as_str(), reason = reason.as_str(), "task skipped");
            }
            RunEvent::Unreachable { host, error } => {
                warn!(host = host.as_str(), error = error.as_str(), "host unreachable");
            }
        }
    }
}

/// Records every event for later inspection. Test support and a building
/// block for collect-then-process callers.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<RunEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    pub fn ok_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RunEvent::TaskOk { .. }))
            .count()
    }
}

impl ResultSink for MemorySink {
    fn on_event(&self, event: &RunEvent) {
        self.events.lock().push(event.clone());
    }
}
