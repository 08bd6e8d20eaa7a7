//! The contract every element implementation fulfils.

use std::any::Any;
use std::sync::Arc;

use super::pad::{Pad, PadMode, PadTemplate};
use super::property::PropertyTable;
use super::state::{StateChange, StateChangeResult, StateChangeSuccess};
use super::Element;
use crate::buffer::Buffer;
use crate::bus::Message;
use crate::caps::Caps;
use crate::clock::Clock;
use crate::event::{Event, Query};
use crate::flow::{FlowError, FlowResult};

// ============================================================================
// ElementImpl
// ============================================================================

/// Behaviour of an element.
///
/// The [`Element`] handle owns one boxed implementation and calls into it
/// from whatever thread drives the element. Every method has a default, so
/// an implementation only overrides the hooks it needs:
///
/// - sources implement [`get_range`](Self::get_range) or push from a
///   [`Task`](crate::task::Task) started in [`activate_pad`](Self::activate_pad)
/// - sinks and filters implement [`chain`](Self::chain)
/// - format-aware elements implement [`get_caps`](Self::get_caps) and
///   [`set_caps`](Self::set_caps)
///
/// The element passes itself (`element`) to every hook so implementations
/// can reach their pads and post messages without holding a back-reference.
///
/// # Example
///
/// ```rust
/// use trellis::prelude::*;
///
/// #[derive(Default)]
/// struct Counter(std::sync::atomic::AtomicUsize);
///
/// impl ElementImpl for Counter {
///     fn pad_templates(&self) -> Vec<PadTemplate> {
///         vec![PadTemplate::sink(Caps::new_any())]
///     }
///
///     fn chain(&self, _element: &Element, _pad: &Pad, _buffer: Buffer) -> FlowResult {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         Ok(FlowSuccess::Ok)
///     }
/// }
///
/// let element = Element::new("counter", Counter::default());
/// assert!(element.static_pad("sink").is_some());
/// ```
pub trait ElementImpl: Any + Send + Sync {
    /// Pad templates. `Always` templates become pads at construction.
    fn pad_templates(&self) -> Vec<PadTemplate> {
        Vec::new()
    }

    /// Called once after the always-pads were added.
    fn constructed(&self, _element: &Element) {}

    /// Per-step state transition hook, called under the element's state
    /// lock after the core's own transition work for that step.
    fn change_state(&self, _element: &Element, _transition: StateChange) -> StateChangeResult {
        Ok(StateChangeSuccess::Success)
    }

    /// Handle a downstream event arriving on a sink pad.
    fn sink_event(&self, _element: &Element, pad: &Pad, event: Event) -> bool {
        pad.event_default(event)
    }

    /// Handle an upstream event arriving on a src pad.
    fn src_event(&self, _element: &Element, pad: &Pad, event: Event) -> bool {
        pad.event_default(event)
    }

    /// Answer a query on one of the element's pads.
    fn query(&self, _element: &Element, pad: &Pad, query: &mut Query) -> bool {
        pad.query_default(query)
    }

    /// Caps the pad can currently handle, intersected with `filter`.
    fn get_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        pad.default_caps(filter)
    }

    /// Accept or reject fixed caps negotiated on `pad`. Returning true
    /// commits the element to the format.
    fn set_caps(&self, _element: &Element, _pad: &Pad, _caps: &Caps) -> bool {
        true
    }

    /// Format this sink pad would like fixation to aim for.
    fn ideal_caps(&self, _element: &Element, _pad: &Pad) -> Option<Caps> {
        None
    }

    /// Receive a pushed buffer on a sink pad.
    fn chain(&self, _element: &Element, _pad: &Pad, _buffer: Buffer) -> FlowResult {
        Err(FlowError::NotSupported)
    }

    /// Serve `length` bytes starting at `offset` from a src pad.
    fn get_range(
        &self,
        _element: &Element,
        _pad: &Pad,
        _offset: u64,
        _length: usize,
    ) -> Result<Buffer, FlowError> {
        Err(FlowError::NotSupported)
    }

    /// Scheduling mode a sink pad asks for during READY→PAUSED.
    fn sink_activation_mode(&self, _element: &Element, _pad: &Pad) -> PadMode {
        PadMode::Push
    }

    /// A pad changed scheduling mode. Start or stop streaming tasks here.
    /// Returning false refuses the mode.
    fn activate_pad(&self, _element: &Element, _pad: &Pad, _mode: PadMode) -> bool {
        true
    }

    /// Create a pad from a `Request` template. The element adds it.
    fn request_new_pad(
        &self,
        _element: &Element,
        _template: &PadTemplate,
        _name: Option<&str>,
    ) -> Option<Pad> {
        None
    }

    /// A request pad is about to be removed.
    fn release_pad(&self, _element: &Element, _pad: &Pad) {}

    /// Handle an event sent to the element as a whole.
    fn send_event(&self, element: &Element, event: Event) -> bool {
        element.default_send_event(event)
    }

    /// Answer a query sent to the element as a whole.
    fn element_query(&self, element: &Element, query: &mut Query) -> bool {
        element.default_query(query)
    }

    /// A message posted by a child. Only containers receive these.
    fn handle_message(&self, element: &Element, message: Message) {
        element.post_message(message);
    }

    /// A clock this element can provide to the pipeline.
    fn provide_clock(&self, _element: &Element) -> Option<Arc<dyn Clock>> {
        None
    }

    /// Named property access.
    fn properties(&self) -> Option<&dyn PropertyTable> {
        None
    }
}
