//! Observability features: metrics and tracing.
//!
//! - **Metrics**: counters and gauges via `metrics-rs`
//! - **Tracing**: spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `trellis_buffers_pushed` | Counter | Buffers pushed across pad links |
//! | `trellis_buffers_rendered` | Counter | Buffers consumed by sinks |
//! | `trellis_flow_errors` | Counter | Non-OK flow returns, labelled by kind |
//! | `trellis_links` | Counter | Pad links established |
//! | `trellis_negotiations` | Counter | Caps fixed on a link |
//! | `trellis_state_changes` | Counter | Committed state transitions |
//! | `trellis_state_change_failures` | Counter | Failed state transitions |
//! | `trellis_bus_messages` | Counter | Bus messages, labelled by type |
//! | `trellis_plugin_loads` | Counter | Plugin modules loaded |
//! | `trellis_queue_level_buffers` | Gauge | Buffers held by a queue |
//!
//! Install any `metrics` exporter to collect them.

pub mod metrics;
mod tracing_support;

pub use metrics::{SinkMetrics, init_metrics};
pub use tracing_support::{span_element, span_pad};
