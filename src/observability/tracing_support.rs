//! Tracing spans for elements and pads.

use tracing::{Level, Span, span};

/// Create a span covering work done on behalf of an element
/// (state changes, streaming loops).
///
/// ```rust
/// use trellis::observability::span_element;
///
/// let span = span_element("queue0", "queue");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_element(element: &str, factory: &str) -> Span {
    span!(Level::INFO, "element", element = %element, factory = %factory)
}

/// Create a span for a pad's streaming thread.
#[inline]
pub fn span_pad(element: &str, pad: &str) -> Span {
    span!(Level::DEBUG, "pad", element = %element, pad = %pad)
}
