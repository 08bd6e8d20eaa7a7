//! Events and queries: out-of-band control that travels alongside buffers.
//!
//! Events are categorized by their flow direction:
//!
//! - **Downstream events**: Flow with data (EOS, segment, stream-start, caps)
//! - **Upstream events**: Flow against data (seek, reconfigure)
//! - **Bidirectional events**: Can flow either way (flush, custom)
//!
//! Serialized events respect buffer ordering and go through queues;
//! flush events bypass them for immediate effect.
//!
//! ```rust
//! use trellis::event::{Event, SeekEvent};
//!
//! let seek = Event::Seek(SeekEvent::bytes(1024).flushing());
//! assert!(seek.is_upstream());
//! assert!(!Event::FlushStart.is_serialized());
//! ```

use crate::caps::{Caps, Structure};
use crate::clock::ClockTime;

/// Units of segment and seek positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Nanoseconds.
    #[default]
    Time,
    /// Bytes.
    Bytes,
    /// Buffers (element-specific default unit).
    Buffers,
}

/// Segment event: the range the following buffers belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position unit.
    pub format: Format,
    /// First position.
    pub start: u64,
    /// Last position, if bounded.
    pub stop: Option<u64>,
    /// Playback rate (1.0 = normal speed).
    pub rate: f64,
}

impl Segment {
    /// An open-ended segment starting at `start`.
    pub fn new(format: Format, start: u64) -> Self {
        Self {
            format,
            start,
            stop: None,
            rate: 1.0,
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new(Format::Bytes, 0)
    }
}

/// Seek request.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekEvent {
    /// Position unit.
    pub format: Format,
    /// Target start position.
    pub start: u64,
    /// Target stop position.
    pub stop: Option<u64>,
    /// Flush the pipeline before seeking.
    pub flush: bool,
}

impl SeekEvent {
    /// Seek to a byte offset.
    pub fn bytes(start: u64) -> Self {
        Self {
            format: Format::Bytes,
            start,
            stop: None,
            flush: false,
        }
    }

    /// Seek to a buffer count.
    pub fn buffers(start: u64) -> Self {
        Self {
            format: Format::Buffers,
            ..Self::bytes(start)
        }
    }

    /// Seek to a time position.
    pub fn time(start: ClockTime) -> Self {
        Self {
            format: Format::Time,
            ..Self::bytes(start.nanos())
        }
    }

    /// Request a flushing seek.
    pub fn flushing(mut self) -> Self {
        self.flush = true;
        self
    }
}

/// Events that flow through the pipeline.
#[derive(Debug, Clone)]
pub enum Event {
    // ========== Downstream Events ==========
    /// Start of a new stream.
    StreamStart(String),

    /// The range the following buffers belong to.
    Segment(Segment),

    /// Upstream's format changed. Invalidates the negotiated caps of the
    /// link so the next buffer renegotiates.
    Caps(Caps),

    /// End of stream - no more data will be produced.
    Eos,

    // ========== Upstream Events ==========
    /// Seek request.
    Seek(SeekEvent),

    /// Downstream wants the link renegotiated.
    Reconfigure,

    // ========== Bidirectional Events ==========
    /// Flush start - discard buffered data and unblock streaming threads.
    FlushStart,

    /// Flush stop - resume normal operation.
    FlushStop,

    /// Custom application event.
    Custom(Structure),
}

impl Event {
    /// Check if this is a downstream event (flows with data).
    pub fn is_downstream(&self) -> bool {
        matches!(
            self,
            Event::StreamStart(_) | Event::Segment(_) | Event::Caps(_) | Event::Eos
        ) || self.is_bidirectional()
    }

    /// Check if this is an upstream event (flows against data).
    pub fn is_upstream(&self) -> bool {
        matches!(self, Event::Seek(_) | Event::Reconfigure) || self.is_bidirectional()
    }

    /// Check if this is a bidirectional event.
    pub fn is_bidirectional(&self) -> bool {
        matches!(self, Event::FlushStart | Event::FlushStop | Event::Custom(_))
    }

    /// Check if this event should be serialized with buffers.
    pub fn is_serialized(&self) -> bool {
        !matches!(
            self,
            Event::FlushStart | Event::FlushStop | Event::Seek(_) | Event::Reconfigure
        )
    }

    /// Get a human-readable name for this event type.
    pub fn name(&self) -> &str {
        match self {
            Event::StreamStart(_) => "stream-start",
            Event::Segment(_) => "segment",
            Event::Caps(_) => "caps",
            Event::Eos => "eos",
            Event::Seek(_) => "seek",
            Event::Reconfigure => "reconfigure",
            Event::FlushStart => "flush-start",
            Event::FlushStop => "flush-stop",
            Event::Custom(s) => s.name(),
        }
    }
}

/// Queries answered synchronously by pads and elements.
///
/// The handler fills in the result field and returns `true`.
#[derive(Debug, Clone)]
pub enum Query {
    /// Current stream position.
    Position {
        /// Requested unit.
        format: Format,
        /// Answer.
        result: Option<u64>,
    },
    /// Total stream length.
    Duration {
        /// Requested unit.
        format: Format,
        /// Answer.
        result: Option<u64>,
    },
    /// Formats a pad can handle, optionally narrowed by a filter.
    Caps {
        /// Caps the answer is intersected with.
        filter: Option<Caps>,
        /// Answer.
        result: Option<Caps>,
    },
    /// Whether a pad accepts a specific format.
    AcceptCaps {
        /// Proposed caps.
        caps: Caps,
        /// Answer.
        result: bool,
    },
    /// Which scheduling modes upstream supports.
    Scheduling {
        /// Upstream can serve pull requests.
        pull: bool,
    },
}

impl Query {
    /// Position query.
    pub fn position(format: Format) -> Self {
        Query::Position {
            format,
            result: None,
        }
    }

    /// Duration query.
    pub fn duration(format: Format) -> Self {
        Query::Duration {
            format,
            result: None,
        }
    }

    /// Caps query.
    pub fn caps(filter: Option<Caps>) -> Self {
        Query::Caps {
            filter,
            result: None,
        }
    }

    /// Query name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Query::Position { .. } => "position",
            Query::Duration { .. } => "duration",
            Query::Caps { .. } => "caps",
            Query::AcceptCaps { .. } => "accept-caps",
            Query::Scheduling { .. } => "scheduling",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_directions() {
        assert!(Event::Eos.is_downstream());
        assert!(!Event::Eos.is_upstream());
        assert!(Event::Reconfigure.is_upstream());
        assert!(Event::FlushStart.is_upstream() && Event::FlushStart.is_downstream());
        assert!(Event::Caps(Caps::new_any()).is_serialized());
        assert!(!Event::FlushStop.is_serialized());
        assert!(!Event::Reconfigure.is_serialized());
        assert!(Event::Eos.is_serialized());
    }

    #[test]
    fn test_seek_builders() {
        let seek = SeekEvent::buffers(3).flushing();
        assert_eq!(seek.format, Format::Buffers);
        assert_eq!(seek.start, 3);
        assert!(seek.flush);
        assert_eq!(SeekEvent::time(ClockTime::from_secs(1)).start, 1_000_000_000);
    }

    #[test]
    fn test_names() {
        assert_eq!(Event::Custom(Structure::new("my-event")).name(), "my-event");
        assert_eq!(Query::caps(None).name(), "caps");
    }
}
