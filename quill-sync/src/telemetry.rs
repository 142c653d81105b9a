//! Telemetry sink for named engine events.
//!
//! Events carry metadata only — never document content. Emission is
//! fire-and-forget over a bounded channel; a full or closed sink drops the
//! event rather than blocking the pipeline. Resolution events (action taken,
//! outcome) feed the force-save-rate and merge-success-rate monitors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// One named event with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub metadata: Map<String, Value>,
    pub at: DateTime<Utc>,
}

/// Handle for emitting telemetry events.
#[derive(Clone)]
pub struct Telemetry {
    tx: Option<mpsc::Sender<TelemetryEvent>>,
}

impl Telemetry {
    /// Creates a channel-backed sink and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Creates a sink that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emits an event. Never blocks; drops on a full or closed sink.
    pub fn emit(&self, name: &str, metadata: Map<String, Value>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = TelemetryEvent {
            name: name.to_string(),
            metadata,
            at: Utc::now(),
        };
        if tx.try_send(event).is_err() {
            debug!(name, "telemetry sink full or closed, dropping event");
        }
    }
}

/// Builds the metadata map from key/value pairs.
#[macro_export]
macro_rules! telemetry_meta {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = serde_json::Map::new();
        $(map.insert($key.to_string(), serde_json::json!($value));)*
        map
    }};
}
