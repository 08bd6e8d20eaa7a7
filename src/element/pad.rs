//! Pads: the directional ports through which buffers, events and queries flow.
//!
//! A pad belongs to exactly one element and holds a weak reference to at
//! most one peer. Linking only checks that the two pads' caps intersect;
//! the concrete format is fixed on the first transfer (push or pull) and
//! cached on both ends until something invalidates it.
//!
//! Every successful negotiation stamps both ends of the link with a fresh
//! epoch. A push carries the epoch it was negotiated under, so a buffer
//! that races a renegotiation is rejected with
//! [`FlowError::NotNegotiated`] instead of being accepted under the wrong
//! format.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{Element, GraphEvent, WeakElement};
use crate::buffer::Buffer;
use crate::caps::{Caps, FixationHints};
use crate::error::LinkError;
use crate::event::{Event, Query};
use crate::flow::{FlowError, FlowResult};
use crate::observability::metrics as m;

static CAPS_EPOCH: AtomicU64 = AtomicU64::new(1);

fn next_epoch() -> u64 {
    CAPS_EPOCH.fetch_add(1, Ordering::Relaxed)
}

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data (pushes downstream, serves pulls).
    Src,
    /// Consumes data (receives pushes, issues pulls).
    Sink,
}

impl PadDirection {
    /// The other direction.
    pub fn opposite(self) -> PadDirection {
        match self {
            PadDirection::Src => PadDirection::Sink,
            PadDirection::Sink => PadDirection::Src,
        }
    }
}

/// Whether a pad is always present or created dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad is always present on the element.
    Always,
    /// Pad appears when the stream is known (demuxers).
    Sometimes,
    /// Pad is created when the application requests it.
    Request,
}

/// Scheduling mode of an active pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Inactive.
    #[default]
    None,
    /// Upstream calls `chain` on the sink pad.
    Push,
    /// Downstream calls `get_range` on the src pad.
    Pull,
}

/// Template for creating pads.
///
/// Declared by the element at registration time; the caps are the set of
/// formats pads created from it can potentially handle.
#[derive(Debug, Clone, PartialEq)]
pub struct PadTemplate {
    name_template: String,
    direction: PadDirection,
    presence: PadPresence,
    caps: Caps,
}

impl PadTemplate {
    /// Create a new pad template.
    pub fn new(
        name_template: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Caps,
    ) -> Self {
        Self {
            name_template: name_template.into(),
            direction,
            presence,
            caps,
        }
    }

    /// An always-present sink pad template named `sink`.
    pub fn sink(caps: Caps) -> Self {
        Self::new("sink", PadDirection::Sink, PadPresence::Always, caps)
    }

    /// An always-present src pad template named `src`.
    pub fn src(caps: Caps) -> Self {
        Self::new("src", PadDirection::Src, PadPresence::Always, caps)
    }

    /// Name or name pattern (`src_%u`).
    pub fn name_template(&self) -> &str {
        &self.name_template
    }

    /// Direction of pads created from this template.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// Presence.
    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    /// Potentially acceptable caps.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }
}

#[derive(Default)]
struct PadState {
    peer: Option<Weak<PadInner>>,
    caps: Option<Caps>,
    epoch: u64,
    mode: PadMode,
    flushing: bool,
    eos: bool,
    filter: Option<Caps>,
}

impl PadState {
    fn peer(&self) -> Option<Pad> {
        self.peer.as_ref().and_then(Weak::upgrade).map(Pad)
    }

    fn check_active(&self, wanted: PadMode) -> Result<(), FlowError> {
        if self.flushing {
            return Err(FlowError::Flushing);
        }
        match self.mode {
            PadMode::None => Err(FlowError::WrongState),
            mode if mode != wanted => Err(FlowError::NotSupported),
            _ => Ok(()),
        }
    }
}

struct PadInner {
    name: String,
    direction: PadDirection,
    template: Option<PadTemplate>,
    parent: Mutex<WeakElement>,
    state: Mutex<PadState>,
    /// Held by the src pad of a link while it negotiates.
    negotiation: Mutex<()>,
}

/// A pad handle. Cloning is cheap and yields the same pad.
#[derive(Clone)]
pub struct Pad(Arc<PadInner>);

/// A non-owning pad reference.
#[derive(Clone, Default)]
pub struct WeakPad(Weak<PadInner>);

impl WeakPad {
    /// Get the pad if it still exists.
    pub fn upgrade(&self) -> Option<Pad> {
        self.0.upgrade().map(Pad)
    }
}

impl Pad {
    fn with_template(name: String, direction: PadDirection, template: Option<PadTemplate>) -> Self {
        Pad(Arc::new(PadInner {
            name,
            direction,
            template,
            parent: Mutex::new(WeakElement::default()),
            state: Mutex::new(PadState::default()),
            negotiation: Mutex::new(()),
        }))
    }

    /// Create a pad without a template (accepts ANY caps).
    pub fn new(name: impl Into<String>, direction: PadDirection) -> Self {
        Self::with_template(name.into(), direction, None)
    }

    /// Create a pad from a template.
    pub fn from_template(template: &PadTemplate, name: impl Into<String>) -> Self {
        Self::with_template(name.into(), template.direction, Some(template.clone()))
    }

    /// Pad name, unique within its element.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Direction.
    pub fn direction(&self) -> PadDirection {
        self.0.direction
    }

    /// Template this pad was created from.
    pub fn template(&self) -> Option<&PadTemplate> {
        self.0.template.as_ref()
    }

    /// Template caps, ANY for template-less pads.
    pub fn template_caps(&self) -> Caps {
        self.0
            .template
            .as_ref()
            .map_or_else(Caps::new_any, |t| t.caps.clone())
    }

    /// Owning element.
    pub fn parent(&self) -> Option<Element> {
        self.0.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, element: &Element) -> bool {
        let mut parent = self.0.parent.lock();
        if parent.upgrade().is_some() {
            return false;
        }
        *parent = element.downgrade();
        true
    }

    pub(crate) fn clear_parent(&self) {
        *self.0.parent.lock() = WeakElement::default();
    }

    /// Linked peer.
    pub fn peer(&self) -> Option<Pad> {
        self.0.state.lock().peer()
    }

    /// Whether the pad has a peer.
    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Negotiated caps, if any.
    pub fn current_caps(&self) -> Option<Caps> {
        self.0.state.lock().caps.clone()
    }

    /// Whether the next transfer has to (re)negotiate.
    pub fn needs_negotiation(&self) -> bool {
        self.0.state.lock().caps.is_none()
    }

    /// Scheduling mode.
    pub fn mode(&self) -> PadMode {
        self.0.state.lock().mode
    }

    /// Whether the pad is active in any mode.
    pub fn is_active(&self) -> bool {
        self.mode() != PadMode::None
    }

    /// Whether transfers are currently being aborted.
    pub fn is_flushing(&self) -> bool {
        self.0.state.lock().flushing
    }

    /// Whether the pad has seen EOS since the last flush.
    pub fn is_eos(&self) -> bool {
        self.0.state.lock().eos
    }

    /// Whether two handles refer to the same pad.
    pub fn ptr_eq(&self, other: &Pad) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Weak reference.
    pub fn downgrade(&self) -> WeakPad {
        WeakPad(Arc::downgrade(&self.0))
    }

    /// Order a pair of pads as (src, sink).
    fn src_sink<'a>(&'a self, other: &'a Pad) -> Result<(&'a Pad, &'a Pad), LinkError> {
        match (self.direction(), other.direction()) {
            (PadDirection::Src, PadDirection::Sink) => Ok((self, other)),
            (PadDirection::Sink, PadDirection::Src) => Ok((other, self)),
            _ => Err(LinkError::IncompatibleDirection),
        }
    }

    // ========================================================================
    // Linking
    // ========================================================================

    /// Link two pads. The order of arguments does not matter.
    pub fn link(&self, other: &Pad) -> Result<(), LinkError> {
        self.link_filtered(other, None)
    }

    /// Link two pads, additionally restricting the link to `filter`.
    pub fn link_filtered(&self, other: &Pad, filter: Option<&Caps>) -> Result<(), LinkError> {
        let (src, sink) = self.src_sink(other)?;
        let common = Self::check_link(src, sink, filter)?;

        {
            let mut src_state = src.0.state.lock();
            let mut sink_state = sink.0.state.lock();
            if src_state.peer().is_some() || sink_state.peer().is_some() {
                return Err(LinkError::AlreadyLinked);
            }
            src_state.peer = Some(Arc::downgrade(&sink.0));
            sink_state.peer = Some(Arc::downgrade(&src.0));
            src_state.filter = filter.cloned();
            src_state.caps = None;
            sink_state.caps = None;
        }

        debug!(src = %src, sink = %sink, caps = %common, "pads linked");
        m::record_link();
        if let Some(element) = src.parent() {
            element.notify_graph(GraphEvent::PadLinked { src, sink });
        }
        Ok(())
    }

    /// Whether [`Pad::link`] would succeed.
    pub fn can_link(&self, other: &Pad) -> bool {
        self.src_sink(other)
            .and_then(|(src, sink)| Self::check_link(src, sink, None))
            .is_ok()
    }

    fn check_link(src: &Pad, sink: &Pad, filter: Option<&Caps>) -> Result<Caps, LinkError> {
        let src_el = src.parent().ok_or(LinkError::NoParent)?;
        let sink_el = sink.parent().ok_or(LinkError::NoParent)?;
        if src_el.ptr_eq(&sink_el) {
            return Err(LinkError::WrongHierarchy);
        }
        if src.is_linked() || sink.is_linked() {
            return Err(LinkError::AlreadyLinked);
        }
        let mut common = src.query_caps(None).intersect(&sink.query_caps(None));
        if let Some(filter) = filter {
            common = common.intersect(filter);
        }
        if common.is_empty() {
            debug!(src = %src, sink = %sink, "no common format");
            return Err(LinkError::NoCommonFormat);
        }
        Ok(common)
    }

    /// Unlink from `other`. Returns false if they were not linked together.
    pub fn unlink(&self, other: &Pad) -> bool {
        let Ok((src, sink)) = self.src_sink(other) else {
            return false;
        };
        {
            let mut src_state = src.0.state.lock();
            let mut sink_state = sink.0.state.lock();
            let linked = src_state.peer().is_some_and(|p| p.ptr_eq(sink))
                && sink_state.peer().is_some_and(|p| p.ptr_eq(src));
            if !linked {
                return false;
            }
            src_state.peer = None;
            sink_state.peer = None;
            src_state.filter = None;
            src_state.caps = None;
            sink_state.caps = None;
        }
        debug!(src = %src, sink = %sink, "pads unlinked");
        true
    }

    /// Unlink from whatever peer this pad has.
    pub fn unlink_peer(&self) -> bool {
        match self.peer() {
            Some(peer) => self.unlink(&peer),
            None => false,
        }
    }

    // ========================================================================
    // Caps
    // ========================================================================

    /// Formats this pad can handle right now, intersected with `filter`.
    pub fn query_caps(&self, filter: Option<&Caps>) -> Caps {
        match self.parent() {
            Some(element) => element.imp_dyn().get_caps(&element, self, filter),
            None => self.default_caps(filter),
        }
    }

    /// Formats the peer can handle, ANY when unlinked.
    pub fn peer_query_caps(&self, filter: Option<&Caps>) -> Caps {
        match self.peer() {
            Some(peer) => peer.query_caps(filter),
            None => filter.cloned().unwrap_or_else(Caps::new_any),
        }
    }

    /// Default caps answer: the negotiated caps if any, else the template.
    pub fn default_caps(&self, filter: Option<&Caps>) -> Caps {
        let base = self.current_caps().unwrap_or_else(|| self.template_caps());
        match filter {
            Some(filter) => base.intersect(filter),
            None => base,
        }
    }

    /// Caps answer for pass-through elements: the template narrowed by what
    /// the peers of the element's opposite-direction pads accept.
    pub fn proxy_caps(&self, filter: Option<&Caps>) -> Caps {
        if let Some(current) = self.current_caps() {
            return match filter {
                Some(filter) => current.intersect(filter),
                None => current,
            };
        }
        let Some(element) = self.parent() else {
            return self.default_caps(filter);
        };
        let mut caps = self.template_caps();
        for pad in element.pads_by_direction(self.direction().opposite()) {
            caps = caps.intersect(&pad.template_caps());
            caps = caps.intersect(&pad.peer_query_caps(filter));
        }
        match filter {
            Some(filter) => caps.intersect(filter),
            None => caps,
        }
    }

    /// Whether this pad accepts exactly `caps`.
    pub fn accept_caps(&self, caps: &Caps) -> bool {
        caps.is_subset(&self.query_caps(None))
    }

    /// Caps both this pad and its peer can handle, `None` when unlinked.
    pub fn allowed_caps(&self) -> Option<Caps> {
        let peer = self.peer()?;
        let ours = self.query_caps(None);
        Some(ours.intersect(&peer.query_caps(None)))
    }

    /// Force a fixed format on this pad (and its peer, when linked).
    ///
    /// The caps must be fixed and within the pad template. The peer's
    /// element is asked first, then this pad's element; both must accept.
    pub fn try_set_caps(&self, caps: &Caps) -> bool {
        if !caps.is_fixed() && !caps.is_any() {
            warn!(pad = %self, caps = %caps, "refusing to set unfixed caps");
            return false;
        }
        if let Some(template) = self.template()
            && !caps.is_subset(template.caps())
        {
            debug!(pad = %self, caps = %caps, "caps outside pad template");
            return false;
        }
        let peer = self.peer();
        if let Some(peer) = &peer {
            if !peer.accept_caps(caps) || !peer.element_set_caps(caps) {
                debug!(pad = %self, peer = %peer, caps = %caps, "peer refused caps");
                return false;
            }
        }
        if !self.element_set_caps(caps) {
            return false;
        }
        let committed = match &peer {
            Some(peer) => match self.src_sink(peer) {
                Ok((src, sink)) => Self::commit_caps(src, sink, caps).is_some(),
                Err(_) => false,
            },
            None => {
                let mut state = self.0.state.lock();
                state.caps = Some(caps.clone());
                state.epoch = next_epoch();
                true
            }
        };
        if committed {
            self.announce_caps(caps);
        }
        committed
    }

    fn element_set_caps(&self, caps: &Caps) -> bool {
        match self.parent() {
            Some(element) => element.imp_dyn().set_caps(&element, self, caps),
            None => true,
        }
    }

    /// Store `caps` on both ends of a link under a fresh epoch.
    fn commit_caps(src: &Pad, sink: &Pad, caps: &Caps) -> Option<u64> {
        let mut src_state = src.0.state.lock();
        let mut sink_state = sink.0.state.lock();
        let still_linked = src_state.peer().is_some_and(|p| p.ptr_eq(sink));
        if !still_linked {
            return None;
        }
        let epoch = next_epoch();
        src_state.caps = Some(caps.clone());
        src_state.epoch = epoch;
        sink_state.caps = Some(caps.clone());
        sink_state.epoch = epoch;
        Some(epoch)
    }

    fn announce_caps(&self, caps: &Caps) {
        m::record_negotiation();
        if let Some(element) = self.parent() {
            element.notify_graph(GraphEvent::CapsNegotiated { pad: self, caps });
        }
    }

    /// Drop the negotiated caps on both ends of this pad's link so the next
    /// transfer renegotiates.
    pub fn mark_reconfigure(&self) {
        let peer = self.peer();
        let pair = peer.as_ref().and_then(|p| self.src_sink(p).ok());
        match pair {
            Some((src, sink)) => {
                let mut src_state = src.0.state.lock();
                let mut sink_state = sink.0.state.lock();
                src_state.caps = None;
                sink_state.caps = None;
            }
            None => self.0.state.lock().caps = None,
        }
        trace!(pad = %self, "negotiated caps invalidated");
    }

    /// Intersect, fixate and commit caps for the link from this src pad to
    /// `sink`. Returns the epoch of the new caps.
    fn negotiate(&self, sink: &Pad) -> Result<u64, FlowError> {
        let _guard = self.0.negotiation.lock();
        {
            let state = self.0.state.lock();
            if state.caps.is_some() && state.peer().is_some_and(|p| p.ptr_eq(sink)) {
                return Ok(state.epoch);
            }
        }
        let filter = self.0.state.lock().filter.clone();
        let src_el = self.parent().ok_or(FlowError::WrongState)?;
        let sink_el = sink.parent().ok_or(FlowError::WrongState)?;

        let mut common = self.query_caps(None).intersect(&sink.query_caps(None));
        if let Some(filter) = &filter {
            common = common.intersect(filter);
        }
        if common.is_empty() {
            warn!(src = %self, sink = %sink, "negotiation failed: no common format");
            m::record_flow_error(FlowError::NotNegotiated);
            return Err(FlowError::NotNegotiated);
        }

        let graph = Self::graph_hint(&[&src_el, &sink_el], &[self, sink]);
        let ideal = sink_el.imp_dyn().ideal_caps(&sink_el, sink);
        let hints = FixationHints {
            graph: graph.as_ref(),
            ideal: ideal.as_ref(),
        };
        let strategy = src_el.fixation_strategy();
        let Some(fixed) = strategy.fixate(&common, &hints) else {
            warn!(src = %self, sink = %sink, caps = %common, "fixation failed");
            return Err(FlowError::NotNegotiated);
        };

        if !sink_el.imp_dyn().set_caps(&sink_el, sink, &fixed) {
            debug!(pad = %sink, caps = %fixed, "downstream refused caps");
            return Err(FlowError::NotNegotiated);
        }
        if !src_el.imp_dyn().set_caps(&src_el, self, &fixed) {
            debug!(pad = %self, caps = %fixed, "upstream refused caps");
            return Err(FlowError::NotNegotiated);
        }
        let epoch = Self::commit_caps(self, sink, &fixed).ok_or(FlowError::NotLinked)?;
        debug!(src = %self, sink = %sink, caps = %fixed, epoch, "link negotiated");
        self.announce_caps(&fixed);
        Ok(epoch)
    }

    /// Caps already negotiated on other pads of the given elements.
    fn graph_hint(elements: &[&Element], exclude: &[&Pad]) -> Option<Caps> {
        let mut hint = Caps::new_empty();
        for element in elements {
            for pad in element.pads() {
                if exclude.iter().any(|p| p.ptr_eq(&pad)) {
                    continue;
                }
                if let Some(caps) = pad.current_caps()
                    && !caps.is_any()
                {
                    hint.merge(caps);
                }
            }
        }
        (!hint.is_empty()).then_some(hint)
    }

    // ========================================================================
    // Data flow
    // ========================================================================

    /// Push a buffer to the peer (src pads in push mode).
    ///
    /// Negotiates the link first if needed.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        if self.direction() != PadDirection::Src {
            return Err(FlowError::NotSupported);
        }
        let (peer, epoch) = {
            let state = self.0.state.lock();
            state.check_active(PadMode::Push)?;
            if state.eos {
                return Err(FlowError::Eos);
            }
            let peer = state.peer().ok_or(FlowError::NotLinked)?;
            let epoch = state.caps.as_ref().map(|_| state.epoch);
            (peer, epoch)
        };
        let epoch = match epoch {
            Some(epoch) => epoch,
            None => self.negotiate(&peer)?,
        };
        m::record_buffer_pushed();
        let result = peer.deliver(buffer, epoch);
        if let Err(err) = result {
            trace!(pad = %self, error = %err, "push returned");
            m::record_flow_error(err);
        }
        result
    }

    /// Hand a buffer to this sink pad's element directly.
    ///
    /// Fails with `NotNegotiated` until caps have been set on the pad.
    pub fn chain(&self, buffer: Buffer) -> FlowResult {
        if self.direction() != PadDirection::Sink {
            return Err(FlowError::NotSupported);
        }
        let epoch = self.0.state.lock().epoch;
        self.deliver(buffer, epoch)
    }

    fn deliver(&self, buffer: Buffer, epoch: u64) -> FlowResult {
        {
            let state = self.0.state.lock();
            state.check_active(PadMode::Push)?;
            if state.eos {
                return Err(FlowError::Eos);
            }
            if state.caps.is_none() {
                return Err(FlowError::NotNegotiated);
            }
            if state.epoch != epoch {
                debug!(pad = %self, "buffer negotiated under stale caps");
                return Err(FlowError::NotNegotiated);
            }
        }
        let element = self.parent().ok_or(FlowError::WrongState)?;
        element.imp_dyn().chain(&element, self, buffer)
    }

    /// Pull a range from the peer (sink pads in pull mode).
    ///
    /// Returns at most `length` bytes; fewer at end of stream.
    pub fn pull_range(&self, offset: u64, length: usize) -> Result<Buffer, FlowError> {
        if self.direction() != PadDirection::Sink {
            return Err(FlowError::NotSupported);
        }
        let (peer, epoch) = {
            let state = self.0.state.lock();
            state.check_active(PadMode::Pull)?;
            let peer = state.peer().ok_or(FlowError::NotLinked)?;
            let epoch = state.caps.as_ref().map(|_| state.epoch);
            (peer, epoch)
        };
        let epoch = match epoch {
            Some(epoch) => epoch,
            None => peer.negotiate(self)?,
        };
        let mut buffer = peer.get_range(offset, length)?;
        if buffer.len() > length {
            warn!(pad = %peer, requested = length, got = buffer.len(), "get_range overshot, truncating");
            buffer.truncate(length);
        }
        let state = self.0.state.lock();
        if state.caps.is_none() || state.epoch != epoch {
            return Err(FlowError::NotNegotiated);
        }
        Ok(buffer)
    }

    /// Serve a pull request from this src pad's element.
    pub fn get_range(&self, offset: u64, length: usize) -> Result<Buffer, FlowError> {
        if self.direction() != PadDirection::Src {
            return Err(FlowError::NotSupported);
        }
        self.0.state.lock().check_active(PadMode::Pull)?;
        let element = self.parent().ok_or(FlowError::WrongState)?;
        element.imp_dyn().get_range(&element, self, offset, length)
    }

    // ========================================================================
    // Events and queries
    // ========================================================================

    /// Deliver an event to this pad, as if it came from the peer.
    ///
    /// Sink pads take downstream events, src pads upstream events.
    pub fn send_event(&self, event: Event) -> bool {
        let accepted_direction = match self.direction() {
            PadDirection::Sink => event.is_downstream(),
            PadDirection::Src => event.is_upstream(),
        };
        if !accepted_direction {
            warn!(pad = %self, event = event.name(), "event sent in the wrong direction");
            return false;
        }

        {
            let mut state = self.0.state.lock();
            match &event {
                Event::FlushStart => state.flushing = true,
                Event::FlushStop => {
                    state.flushing = state.mode == PadMode::None;
                    state.eos = false;
                }
                _ if event.is_serialized() && (state.flushing || state.mode == PadMode::None) => {
                    trace!(pad = %self, event = event.name(), "dropping event on inactive pad");
                    return false;
                }
                Event::Eos if self.direction() == PadDirection::Sink => state.eos = true,
                _ => {}
            }
        }
        if matches!(event, Event::Caps(_) | Event::Reconfigure) {
            self.mark_reconfigure();
        }

        let Some(element) = self.parent() else {
            return false;
        };
        trace!(pad = %self, event = event.name(), "event received");
        match self.direction() {
            PadDirection::Sink => element.imp_dyn().sink_event(&element, self, event),
            PadDirection::Src => element.imp_dyn().src_event(&element, self, event),
        }
    }

    /// Send an event out through this pad to its peer.
    ///
    /// Src pads push downstream events, sink pads push upstream events.
    pub fn push_event(&self, event: Event) -> bool {
        let peer = {
            let mut state = self.0.state.lock();
            match (self.direction(), &event) {
                (PadDirection::Src, e) if !e.is_downstream() => return false,
                (PadDirection::Sink, e) if !e.is_upstream() => return false,
                (PadDirection::Src, Event::Eos) => state.eos = true,
                (PadDirection::Src, Event::FlushStop) => state.eos = false,
                _ => {}
            }
            state.peer()
        };
        match peer {
            Some(peer) => peer.send_event(event),
            None => {
                trace!(pad = %self, event = event.name(), "event dropped on unlinked pad");
                false
            }
        }
    }

    /// Default event handling: forward to every pad of the opposite direction.
    ///
    /// EOS reaching an element without src pads stops here.
    pub fn event_default(&self, event: Event) -> bool {
        let Some(element) = self.parent() else {
            return false;
        };
        let targets = element.pads_by_direction(self.direction().opposite());
        if targets.is_empty() {
            return true;
        }
        let mut any = false;
        for pad in targets {
            any |= pad.push_event(event.clone());
        }
        any
    }

    /// Run a query on this pad.
    pub fn query(&self, query: &mut Query) -> bool {
        match self.parent() {
            Some(element) => element.imp_dyn().query(&element, self, query),
            None => self.query_default(query),
        }
    }

    /// Run a query on the peer.
    pub fn peer_query(&self, query: &mut Query) -> bool {
        self.peer().is_some_and(|peer| peer.query(query))
    }

    /// Default query handling.
    pub fn query_default(&self, query: &mut Query) -> bool {
        match query {
            Query::Caps { filter, result } => {
                *result = Some(self.query_caps(filter.as_ref()));
                true
            }
            Query::AcceptCaps { caps, result } => {
                *result = self.accept_caps(caps);
                true
            }
            Query::Scheduling { .. } => false,
            Query::Position { .. } | Query::Duration { .. } => {
                let Some(element) = self.parent() else {
                    return false;
                };
                element
                    .pads_by_direction(self.direction().opposite())
                    .iter()
                    .any(|pad| pad.peer_query(query))
            }
        }
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// Switch the scheduling mode. Deactivation flushes and drops the
    /// negotiated caps of the link.
    pub fn activate_mode(&self, mode: PadMode) -> bool {
        let old = {
            let mut state = self.0.state.lock();
            if state.mode == mode {
                return true;
            }
            let old = state.mode;
            state.mode = mode;
            state.flushing = mode == PadMode::None;
            state.eos = false;
            old
        };
        if mode == PadMode::None {
            self.mark_reconfigure();
        }
        let accepted = match self.parent() {
            Some(element) => element.imp_dyn().activate_pad(&element, self, mode),
            None => true,
        };
        if !accepted {
            let mut state = self.0.state.lock();
            state.mode = old;
            state.flushing = old == PadMode::None;
            warn!(pad = %self, ?mode, "activation refused");
            return false;
        }
        debug!(pad = %self, ?mode, "pad mode changed");
        true
    }

    /// Activate in the mode the element prefers, or deactivate.
    ///
    /// A sink pad that prefers pull mode activates its peer in pull mode
    /// too, falling back to push when upstream cannot serve pulls.
    pub fn set_active(&self, active: bool) -> bool {
        if !active {
            // Upstream first, so a pulling task blocked in get_range wakes up
            // before this pad's element joins it.
            if self.direction() == PadDirection::Sink
                && self.mode() == PadMode::Pull
                && let Some(peer) = self.peer()
            {
                peer.activate_mode(PadMode::None);
            }
            return self.activate_mode(PadMode::None);
        }
        if self.is_active() {
            return true;
        }
        match self.direction() {
            PadDirection::Src => self.activate_mode(PadMode::Push),
            PadDirection::Sink => {
                let wanted = self
                    .parent()
                    .map_or(PadMode::Push, |el| el.imp_dyn().sink_activation_mode(&el, self));
                if wanted == PadMode::Pull {
                    let mut query = Query::Scheduling { pull: false };
                    let can_pull = self.peer_query(&mut query)
                        && matches!(query, Query::Scheduling { pull: true });
                    if let Some(peer) = self.peer().filter(|_| can_pull)
                        && peer.activate_mode(PadMode::Pull)
                    {
                        return self.activate_mode(PadMode::Pull);
                    }
                    debug!(pad = %self, "upstream cannot serve pulls, using push mode");
                }
                self.activate_mode(PadMode::Push)
            }
        }
    }
}

impl PartialEq for Pad {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Pad {}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent() {
            Some(element) => write!(f, "{}:{}", element.name(), self.name()),
            None => write!(f, "(orphan):{}", self.name()),
        }
    }
}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Pad")
            .field("name", &self.0.name)
            .field("direction", &self.0.direction)
            .field("mode", &state.mode)
            .field("linked", &state.peer.is_some())
            .field("caps", &state.caps.as_ref().map(ToString::to_string))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementImpl;
    use crate::flow::FlowSuccess;

    #[test]
    fn test_orphan_pads_cannot_link() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        assert_eq!(src.link(&sink), Err(LinkError::NoParent));
        assert_eq!(src.link(&src.clone()), Err(LinkError::IncompatibleDirection));
    }

    #[test]
    fn test_template_caps() {
        let caps = Caps::builder("audio/x-raw").field("rate", 44100).build();
        let templ = PadTemplate::src(caps.clone());
        let pad = Pad::from_template(&templ, "src");
        assert_eq!(pad.template_caps(), caps);
        assert_eq!(pad.direction(), PadDirection::Src);
        assert!(Pad::new("x", PadDirection::Sink).template_caps().is_any());
    }

    #[derive(Default)]
    struct Counting {
        chained: AtomicU64,
    }

    impl ElementImpl for Counting {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            let caps = Caps::builder("audio/x-raw").field("rate", 44100).build();
            vec![PadTemplate::src(caps.clone()), PadTemplate::sink(caps)]
        }

        fn chain(&self, _element: &Element, _pad: &Pad, _buffer: Buffer) -> FlowResult {
            self.chained.fetch_add(1, Ordering::SeqCst);
            Ok(FlowSuccess::Ok)
        }
    }

    fn active_link() -> (Element, Element, Pad, Pad) {
        let up = Element::new("up", Counting::default());
        let down = Element::new("down", Counting::default());
        let src = up.static_pad("src").unwrap();
        let sink = down.static_pad("sink").unwrap();
        src.link(&sink).unwrap();
        assert!(sink.activate_mode(PadMode::Push));
        assert!(src.activate_mode(PadMode::Push));
        (up, down, src, sink)
    }

    #[test]
    fn test_buffer_from_previous_negotiation_rejected() {
        let (_up, down, src, sink) = active_link();
        assert_eq!(src.push(Buffer::with_size(4)), Ok(FlowSuccess::Ok));
        let stale = src.0.state.lock().epoch;
        assert_eq!(sink.0.state.lock().epoch, stale);

        src.mark_reconfigure();
        assert_eq!(src.push(Buffer::with_size(4)), Ok(FlowSuccess::Ok));
        let current = sink.0.state.lock().epoch;
        assert_ne!(current, stale);
        assert_eq!(src.0.state.lock().epoch, current);

        let chained = &down.imp::<Counting>().unwrap().chained;
        assert_eq!(chained.load(Ordering::SeqCst), 2);
        assert_eq!(sink.deliver(Buffer::with_size(4), stale), Err(FlowError::NotNegotiated));
        assert_eq!(chained.load(Ordering::SeqCst), 2);
        assert_eq!(sink.deliver(Buffer::with_size(4), current), Ok(FlowSuccess::Ok));
        assert_eq!(chained.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reconfigure_reaches_flushing_pad() {
        let (_up, _down, src, sink) = active_link();
        assert_eq!(src.push(Buffer::with_size(4)), Ok(FlowSuccess::Ok));
        assert!(src.current_caps().is_some());

        src.send_event(Event::FlushStart);
        assert_eq!(src.push(Buffer::with_size(4)), Err(FlowError::Flushing));
        src.send_event(Event::Reconfigure);
        assert!(src.current_caps().is_none());
        assert!(sink.current_caps().is_none());
    }

    #[test]
    fn test_unattached_pad_state() {
        let pad = Pad::new("sink", PadDirection::Sink);
        assert_eq!(pad.mode(), PadMode::None);
        assert!(pad.current_caps().is_none());
        assert_eq!(pad.chain(Buffer::with_size(1)), Err(FlowError::WrongState));
        assert_eq!(pad.push(Buffer::with_size(1)), Err(FlowError::NotSupported));
        assert_eq!(pad.to_string(), "(orphan):sink");
    }
}
