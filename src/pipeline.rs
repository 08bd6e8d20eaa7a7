//! The top-level bin.
//!
//! A [`Pipeline`] is a [`Bin`] that owns the clock. On READY→PAUSED it
//! selects a clock (one provided by a child, else the system clock) and
//! posts `NewClock`; on PAUSED→PLAYING it samples the clock and hands the
//! result to every element as its base time.

use std::ops::Deref;
use std::sync::Arc;

use crate::bin::{Bin, BinImpl};
use crate::bus::Bus;
use crate::clock::{Clock, ClockTime, PipelineClock};
use crate::element::Element;

/// Top-level bin with a bus and a clock.
///
/// ```rust
/// use trellis::prelude::*;
///
/// let pipeline = Pipeline::new("p");
/// assert_eq!(pipeline.set_state(State::Playing), Ok(StateChangeSuccess::Success));
/// assert!(pipeline.running_time().is_some());
/// pipeline.set_state(State::Null).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Pipeline {
    bin: Bin,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        let imp = BinImpl::new(Some(PipelineClock::system()));
        Self {
            bin: Bin::with_impl(name.into(), imp),
        }
    }

    /// View an element as a pipeline, if it is one.
    pub fn from_element(element: &Element) -> Option<Pipeline> {
        element.imp::<BinImpl>()?.pipeline_clock()?;
        Bin::from_element(element).map(|bin| Pipeline { bin })
    }

    /// The pipeline as a bin.
    pub fn as_bin(&self) -> &Bin {
        &self.bin
    }

    /// The bus every message in the pipeline ends up on.
    pub fn bus(&self) -> Bus {
        self.bin.bus()
    }

    fn pipeline_clock(&self) -> Option<&PipelineClock> {
        self.bin.imp::<BinImpl>().and_then(BinImpl::pipeline_clock)
    }

    /// Force a clock. Children that provide a clock are still preferred
    /// at the next READY→PAUSED.
    pub fn use_clock(&self, clock: Arc<dyn Clock>) {
        if let Some(pc) = self.pipeline_clock() {
            pc.set_clock(clock);
        }
    }

    /// The selected clock.
    pub fn pipeline_clock_handle(&self) -> Option<Arc<dyn Clock>> {
        self.pipeline_clock().map(PipelineClock::clock)
    }

    /// Time spent in PLAYING since the last base time distribution, NONE
    /// when not playing.
    pub fn running_time(&self) -> ClockTime {
        self.pipeline_clock()
            .map_or(ClockTime::NONE, PipelineClock::running_time)
    }

    /// Whether pending bus messages are dropped on the way to NULL
    /// (default true).
    pub fn set_auto_flush_bus(&self, flush: bool) {
        self.bin.set_auto_flush_bus(flush);
    }
}

impl Deref for Pipeline {
    type Target = Bin;

    fn deref(&self) -> &Bin {
        &self.bin
    }
}
