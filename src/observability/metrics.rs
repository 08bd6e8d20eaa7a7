//! Metrics collection using metrics-rs.
//!
//! Without an installed recorder every call is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{Counter, Unit, counter, gauge};

use crate::element::StateChange;
use crate::flow::FlowError;

/// Whether metrics have been described.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const BUFFERS_PUSHED: &str = "trellis_buffers_pushed";
const BUFFERS_RENDERED: &str = "trellis_buffers_rendered";
const FLOW_ERRORS: &str = "trellis_flow_errors";
const LINKS: &str = "trellis_links";
const NEGOTIATIONS: &str = "trellis_negotiations";
const STATE_CHANGES: &str = "trellis_state_changes";
const STATE_FAILURES: &str = "trellis_state_change_failures";
const BUS_MESSAGES: &str = "trellis_bus_messages";
const PLUGIN_LOADS: &str = "trellis_plugin_loads";
const QUEUE_LEVEL: &str = "trellis_queue_level_buffers";

/// Describe all metrics.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(BUFFERS_PUSHED, Unit::Count, "Buffers pushed across pad links");
    metrics::describe_counter!(BUFFERS_RENDERED, Unit::Count, "Buffers consumed by sinks");
    metrics::describe_counter!(FLOW_ERRORS, Unit::Count, "Non-OK flow returns, by kind");
    metrics::describe_counter!(LINKS, Unit::Count, "Pad links established");
    metrics::describe_counter!(NEGOTIATIONS, Unit::Count, "Caps fixed on a link");
    metrics::describe_counter!(STATE_CHANGES, Unit::Count, "Committed state transitions");
    metrics::describe_counter!(STATE_FAILURES, Unit::Count, "Failed state transitions");
    metrics::describe_counter!(BUS_MESSAGES, Unit::Count, "Messages posted on a bus");
    metrics::describe_counter!(PLUGIN_LOADS, Unit::Count, "Plugin modules loaded");
    metrics::describe_gauge!(QUEUE_LEVEL, Unit::Count, "Buffers held by a queue");
}

/// Record a buffer crossing a push link.
#[inline]
pub fn record_buffer_pushed() {
    counter!(BUFFERS_PUSHED).increment(1);
}

/// Record a non-OK flow return.
#[inline]
pub fn record_flow_error(err: FlowError) {
    let kind = match err {
        FlowError::NotLinked => "not-linked",
        FlowError::NotNegotiated => "not-negotiated",
        FlowError::Eos => "eos",
        FlowError::WrongState => "wrong-state",
        FlowError::Error => "error",
        FlowError::Flushing => "flushing",
        FlowError::NotSupported => "not-supported",
    };
    counter!(FLOW_ERRORS, "kind" => kind).increment(1);
}

/// Record a pad link.
#[inline]
pub fn record_link() {
    counter!(LINKS).increment(1);
}

/// Record a completed negotiation.
#[inline]
pub fn record_negotiation() {
    counter!(NEGOTIATIONS).increment(1);
}

/// Record a committed state transition.
#[inline]
pub fn record_state_change(element: &str, transition: StateChange) {
    counter!(
        STATE_CHANGES,
        "element" => element.to_string(),
        "transition" => transition.to_string()
    )
    .increment(1);
}

/// Record a failed state transition.
#[inline]
pub fn record_state_failure(element: &str) {
    counter!(STATE_FAILURES, "element" => element.to_string()).increment(1);
}

/// Record a bus message.
#[inline]
pub fn record_bus_message(kind: &'static str) {
    counter!(BUS_MESSAGES, "type" => kind).increment(1);
}

/// Record a plugin module load.
#[inline]
pub fn record_plugin_load(plugin: &str) {
    counter!(PLUGIN_LOADS, "plugin" => plugin.to_string()).increment(1);
}

/// Record the fill level of a queue.
#[inline]
pub fn record_queue_level(element: &str, buffers: usize) {
    gauge!(QUEUE_LEVEL, "element" => element.to_string()).set(buffers as f64);
}

/// Pre-labelled counters for one sink element.
#[derive(Clone)]
pub struct SinkMetrics {
    rendered: Counter,
    bytes: Counter,
}

impl SinkMetrics {
    /// Create counters labelled with the element name.
    pub fn new(element: &str) -> Self {
        Self {
            rendered: counter!(BUFFERS_RENDERED, "element" => element.to_string()),
            bytes: counter!("trellis_bytes_rendered", "element" => element.to_string()),
        }
    }

    /// Record one consumed buffer.
    #[inline]
    pub fn record(&self, bytes: usize) {
        self.rendered.increment(1);
        self.bytes.increment(bytes as u64);
    }
}

impl std::fmt::Debug for SinkMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_recording_without_recorder() {
        record_buffer_pushed();
        record_flow_error(FlowError::Flushing);
        record_link();
        record_negotiation();
        record_state_change("sink", StateChange::ReadyToPaused);
        record_state_failure("sink");
        record_bus_message("eos");
        record_plugin_load("coreelements");
        record_queue_level("queue0", 3);
        SinkMetrics::new("sink").record(64);
    }
}
