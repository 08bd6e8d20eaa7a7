//! Elements: named graph nodes with pads and a state machine.
//!
//! An [`Element`] is a cheap, clonable handle around a boxed
//! [`ElementImpl`]. The handle owns the element's pads and state; the
//! implementation supplies behaviour through the hooks of the trait.
//!
//! # State machine
//!
//! States are totally ordered (`Null < Ready < Paused < Playing`). A
//! request for a distant state is decomposed into single steps, each of
//! which runs the core's own work (pad activation on READY→PAUSED, pad
//! deactivation on PAUSED→READY) and then [`ElementImpl::change_state`].
//!
//! A step may complete later ([`StateChangeSuccess::Async`]); the element
//! then finishes it with [`Element::continue_state`], which commits the
//! step and carries on toward the requested state. The pending state is
//! cleared only once the requested state is actually reached.
//!
//! All state requests on one element serialize on a re-entrant lock that
//! is held while the hooks run.

mod pad;
mod property;
mod state;
mod traits;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error, info, trace, warn};

pub use pad::{Pad, PadDirection, PadMode, PadPresence, PadTemplate, WeakPad};
pub use property::{PropValue, PropertyKind, PropertySpec, PropertyTable};
pub use state::{State, StateChange, StateChangeResult, StateChangeSuccess};
pub use traits::ElementImpl;

use crate::bin::BinImpl;
use crate::bus::{Message, MessageView};
use crate::caps::{Caps, FixationStrategy, PreferredFixation};
use crate::clock::{Clock, ClockTime};
use crate::error::{ElementError, Error, ErrorDomain, PropertyError, Result, StateChangeError};
use crate::event::{Event, Query};
use crate::observability::{metrics as m, span_element};
use crate::registry::PluginModule;

/// Structural changes reported to [`crate::bin::GraphListener`]s of every
/// ancestor bin.
pub(crate) enum GraphEvent<'a> {
    ElementAdded { bin: &'a Element, element: &'a Element },
    ElementRemoved { bin: &'a Element, element: &'a Element },
    PadAdded { pad: &'a Pad },
    PadRemoved { pad: &'a Pad },
    NoMorePads { element: &'a Element },
    PadLinked { src: &'a Pad, sink: &'a Pad },
    CapsNegotiated { pad: &'a Pad, caps: &'a Caps },
}

struct StateCell {
    current: State,
    /// Equal to `current` while no step is in progress.
    next: State,
    /// Requested final state while a change is in progress.
    pending: Option<State>,
    last_return: StateChangeResult,
    locked: bool,
}

struct ElementInner {
    name: String,
    factory: Option<String>,
    imp: Box<dyn ElementImpl>,
    pads: RwLock<Vec<Pad>>,
    parent: RwLock<WeakElement>,
    state_lock: ReentrantMutex<()>,
    state: Mutex<StateCell>,
    state_cond: Condvar,
    base_time: AtomicU64,
    pad_counter: AtomicU32,
    /// Dropped after `imp`, whose code may live in the plugin.
    _module: Option<PluginModule>,
}

/// Handle to an element. Cloning yields the same element.
#[derive(Clone)]
pub struct Element(Arc<ElementInner>);

/// Non-owning element reference, used for parent and message-source links.
#[derive(Clone, Default)]
pub struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    /// Get the element if it still exists.
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(Element)
    }
}

impl Element {
    /// Create an element around `imp`, adding a pad for every `Always`
    /// template.
    pub fn new(name: impl Into<String>, imp: impl ElementImpl) -> Self {
        Self::from_boxed(name.into(), None, Box::new(imp), None)
    }

    pub(crate) fn from_boxed(
        name: String,
        factory: Option<String>,
        imp: Box<dyn ElementImpl>,
        module: Option<PluginModule>,
    ) -> Self {
        let element = Element(Arc::new(ElementInner {
            name,
            factory,
            imp,
            pads: RwLock::new(Vec::new()),
            parent: RwLock::new(WeakElement::default()),
            state_lock: ReentrantMutex::new(()),
            state: Mutex::new(StateCell {
                current: State::Null,
                next: State::Null,
                pending: None,
                last_return: Ok(StateChangeSuccess::Success),
                locked: false,
            }),
            state_cond: Condvar::new(),
            base_time: AtomicU64::new(0),
            pad_counter: AtomicU32::new(0),
            _module: module,
        }));
        for template in element.pad_templates() {
            if template.presence() == PadPresence::Always {
                let pad = Pad::from_template(&template, template.name_template());
                if let Err(err) = element.add_pad(&pad) {
                    warn!(element = %element.name(), error = %err, "could not add template pad");
                }
            }
        }
        element.0.imp.constructed(&element);
        element
    }

    /// Element name, unique within its parent bin.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Name of the factory that created this element.
    pub fn factory_name(&self) -> Option<&str> {
        self.0.factory.as_deref()
    }

    pub(crate) fn imp_dyn(&self) -> &dyn ElementImpl {
        &*self.0.imp
    }

    /// Downcast the implementation.
    pub fn imp<T: ElementImpl>(&self) -> Option<&T> {
        let imp: &dyn ElementImpl = &*self.0.imp;
        let any: &dyn Any = imp;
        any.downcast_ref::<T>()
    }

    /// Whether two handles refer to the same element.
    pub fn ptr_eq(&self, other: &Element) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Weak reference.
    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Arc::downgrade(&self.0))
    }

    /// Containing bin.
    pub fn parent(&self) -> Option<Element> {
        self.0.parent.read().upgrade()
    }

    /// Set the parent. Fails if the element already has one.
    pub(crate) fn set_parent(&self, parent: &Element) -> bool {
        let mut slot = self.0.parent.write();
        if slot.upgrade().is_some() {
            return false;
        }
        *slot = parent.downgrade();
        true
    }

    pub(crate) fn clear_parent(&self) {
        *self.0.parent.write() = WeakElement::default();
    }

    /// Outermost ancestor (the element itself when unparented).
    pub fn toplevel(&self) -> Element {
        let mut top = self.clone();
        while let Some(parent) = top.parent() {
            top = parent;
        }
        top
    }

    // ========================================================================
    // Pads
    // ========================================================================

    /// The implementation's pad templates.
    pub fn pad_templates(&self) -> Vec<PadTemplate> {
        self.0.imp.pad_templates()
    }

    /// Template by name template (`sink`, `src_%u`).
    pub fn pad_template(&self, name: &str) -> Option<PadTemplate> {
        self.pad_templates()
            .into_iter()
            .find(|t| t.name_template() == name)
    }

    /// Add a pad. Names must be unique within the element.
    pub fn add_pad(&self, pad: &Pad) -> Result<()> {
        {
            let mut pads = self.0.pads.write();
            if pads.iter().any(|p| p.name() == pad.name()) {
                return Err(Error::Hierarchy(format!(
                    "{} already has a pad named {}",
                    self.name(),
                    pad.name()
                )));
            }
            if !pad.set_parent(self) {
                return Err(Error::Hierarchy(format!("pad {} already has a parent", pad.name())));
            }
            pads.push(pad.clone());
        }
        trace!(element = %self.name(), pad = %pad.name(), "pad added");

        // Pads added to a running element start in the element's mode.
        let state = self.current_state();
        if state >= State::Paused {
            pad.set_active(true);
        }
        self.notify_graph(GraphEvent::PadAdded { pad });
        Ok(())
    }

    /// Remove a pad, unlinking it first.
    pub fn remove_pad(&self, pad: &Pad) -> Result<()> {
        let position = self.0.pads.read().iter().position(|p| p.ptr_eq(pad));
        let Some(index) = position else {
            return Err(Error::NotFound(format!("{}:{}", self.name(), pad.name())));
        };
        pad.unlink_peer();
        pad.set_active(false);
        self.notify_graph(GraphEvent::PadRemoved { pad });
        self.0.pads.write().remove(index);
        pad.clear_parent();
        trace!(element = %self.name(), pad = %pad.name(), "pad removed");
        Ok(())
    }

    /// Signal that no more dynamic pads will be added.
    pub fn no_more_pads(&self) {
        self.notify_graph(GraphEvent::NoMorePads { element: self });
    }

    /// Pad by name.
    pub fn static_pad(&self, name: &str) -> Option<Pad> {
        self.0.pads.read().iter().find(|p| p.name() == name).cloned()
    }

    /// All pads in creation order.
    pub fn pads(&self) -> Vec<Pad> {
        self.0.pads.read().clone()
    }

    /// Pads of one direction.
    pub fn pads_by_direction(&self, direction: PadDirection) -> Vec<Pad> {
        self.0
            .pads
            .read()
            .iter()
            .filter(|p| p.direction() == direction)
            .cloned()
            .collect()
    }

    /// Src pads.
    pub fn src_pads(&self) -> Vec<Pad> {
        self.pads_by_direction(PadDirection::Src)
    }

    /// Sink pads.
    pub fn sink_pads(&self) -> Vec<Pad> {
        self.pads_by_direction(PadDirection::Sink)
    }

    /// An element with sink pads and no src pads.
    pub fn is_sink(&self) -> bool {
        if let Some(bin) = self.imp::<BinImpl>() {
            return bin.has_sinks();
        }
        let pads = self.0.pads.read();
        pads.iter().any(|p| p.direction() == PadDirection::Sink)
            && !pads.iter().any(|p| p.direction() == PadDirection::Src)
    }

    /// An element with src pads and no sink pads.
    pub fn is_source(&self) -> bool {
        let pads = self.0.pads.read();
        pads.iter().any(|p| p.direction() == PadDirection::Src)
            && !pads.iter().any(|p| p.direction() == PadDirection::Sink)
    }

    /// Request a pad from a `Request` template.
    pub fn request_pad(&self, template: &str, name: Option<&str>) -> Option<Pad> {
        let template = self.pad_template(template)?;
        if template.presence() != PadPresence::Request {
            warn!(element = %self.name(), template = template.name_template(), "not a request template");
            return None;
        }
        let pad = self.0.imp.request_new_pad(self, &template, name)?;
        match self.add_pad(&pad) {
            Ok(()) => Some(pad),
            Err(err) => {
                warn!(element = %self.name(), error = %err, "requested pad could not be added");
                self.0.imp.release_pad(self, &pad);
                None
            }
        }
    }

    /// Release a pad obtained with [`Element::request_pad`].
    pub fn release_request_pad(&self, pad: &Pad) -> Result<()> {
        self.0.imp.release_pad(self, pad);
        self.remove_pad(pad)
    }

    /// Expand a `%u` name template with a per-element counter.
    pub fn next_pad_name(&self, template: &PadTemplate) -> String {
        let n = self.0.pad_counter.fetch_add(1, Ordering::Relaxed);
        template.name_template().replace("%u", &n.to_string())
    }

    /// Link this element's first unlinked compatible src pad to a sink pad
    /// of `downstream`.
    pub fn link(&self, downstream: &Element) -> Result<()> {
        let mut last_err = None;
        for src in self.src_pads().iter().filter(|p| !p.is_linked()) {
            for sink in downstream.sink_pads().iter().filter(|p| !p.is_linked()) {
                match src.link(sink) {
                    Ok(()) => return Ok(()),
                    Err(err) => last_err = Some(err),
                }
            }
        }
        if let Some(template) = downstream
            .pad_templates()
            .into_iter()
            .find(|t| t.direction() == PadDirection::Sink && t.presence() == PadPresence::Request)
            && let Some(sink) = downstream.request_pad(template.name_template(), None)
            && let Some(src) = self.src_pads().into_iter().find(|p| !p.is_linked())
        {
            return src.link(&sink).map_err(Error::from);
        }
        if let Some(template) = self
            .pad_templates()
            .into_iter()
            .find(|t| t.direction() == PadDirection::Src && t.presence() == PadPresence::Request)
            && let Some(src) = self.request_pad(template.name_template(), None)
            && let Some(sink) = downstream.sink_pads().into_iter().find(|p| !p.is_linked())
        {
            return src.link(&sink).map_err(Error::from);
        }
        Err(last_err.map_or_else(
            || Error::NotFound(format!("no free pads between {} and {}", self.name(), downstream.name())),
            Error::from,
        ))
    }

    /// Link a chain of elements in order.
    pub fn link_many(elements: &[&Element]) -> Result<()> {
        for pair in elements.windows(2) {
            pair[0].link(pair[1])?;
        }
        Ok(())
    }

    fn activate_pads(&self, active: bool) -> bool {
        // Src pads first: a sink pad activating in pull mode may already
        // have claimed the upstream src pad.
        let mut ok = true;
        for pad in self.src_pads().into_iter().chain(self.sink_pads()) {
            if !pad.set_active(active) {
                warn!(pad = %pad, active, "pad activation failed");
                ok = false;
            }
        }
        ok
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Current state.
    pub fn current_state(&self) -> State {
        self.0.state.lock().current
    }

    /// Requested final state while a change is in progress.
    pub fn pending_state(&self) -> Option<State> {
        self.0.state.lock().pending
    }

    /// Result of the most recent state step.
    pub fn last_return(&self) -> StateChangeResult {
        self.0.state.lock().last_return
    }

    /// Request a state, stepping through the intermediate states.
    ///
    /// Returns `Async` when a step will complete later; FAILURE leaves the
    /// element at the last state it reached.
    pub fn set_state(&self, target: State) -> StateChangeResult {
        let _guard = self.0.state_lock.lock();
        let _span = span_element(self.name(), self.factory_name().unwrap_or("")).entered();
        {
            let mut st = self.0.state.lock();
            if st.pending.is_some() && st.next != st.current {
                let busy_async = st.last_return == Ok(StateChangeSuccess::Async);
                if st.next == target || (busy_async && st.next <= target) {
                    debug!(element = %self.name(), %target, "element busy, updating target");
                    st.pending = Some(target);
                    return Ok(StateChangeSuccess::Async);
                }
                if busy_async {
                    // Reverse direction: start from the state being entered.
                    st.current = st.next;
                }
            }
            debug!(element = %self.name(), from = %st.current, to = %target, "setting state");
            st.pending = Some(target);
            st.last_return = Ok(StateChangeSuccess::Success);
        }
        self.run_transitions()
    }

    /// Step toward the pending state until it is reached, a step fails or a
    /// step goes async.
    fn run_transitions(&self) -> StateChangeResult {
        let mut last = StateChangeSuccess::Success;
        loop {
            let transition = {
                let mut st = self.0.state.lock();
                let Some(target) = st.pending else {
                    return Ok(last);
                };
                if st.current == target {
                    st.pending = None;
                    st.next = st.current;
                    st.last_return = Ok(last);
                    self.0.state_cond.notify_all();
                    return Ok(last);
                }
                st.next = st.current.next_toward(target);
                StateChange::new(st.current, st.next)
            };
            let Some(transition) = transition else {
                return Err(StateChangeError);
            };

            match self.change_state(transition) {
                Ok(StateChangeSuccess::Async) => {
                    {
                        let mut st = self.0.state.lock();
                        if st.current == transition.next() && st.next == st.current {
                            // Committed from within the hook.
                            continue;
                        }
                        st.last_return = Ok(StateChangeSuccess::Async);
                    }
                    debug!(element = %self.name(), %transition, "state change will complete asynchronously");
                    self.post_message(Message::new(self, MessageView::AsyncStart));
                    return Ok(StateChangeSuccess::Async);
                }
                Ok(result) => {
                    last = result;
                    self.commit_step(transition, result);
                }
                Err(err) => {
                    error!(element = %self.name(), %transition, "state change failed");
                    m::record_state_failure(self.name());
                    self.abort_state();
                    return Err(err);
                }
            }
        }
    }

    /// Core work for one step around the implementation's hook.
    fn change_state(&self, transition: StateChange) -> StateChangeResult {
        match transition {
            StateChange::ReadyToPaused => {
                if !self.activate_pads(true) {
                    self.activate_pads(false);
                    return Err(StateChangeError);
                }
            }
            StateChange::PausedToReady => {
                self.activate_pads(false);
                self.set_base_time(ClockTime::ZERO);
            }
            _ => {}
        }
        let result = self.0.imp.change_state(self, transition);
        if result.is_err() && transition == StateChange::ReadyToPaused {
            self.activate_pads(false);
        }
        result
    }

    fn commit_step(&self, transition: StateChange, result: StateChangeSuccess) {
        let pending = {
            let mut st = self.0.state.lock();
            st.current = transition.next();
            st.next = st.current;
            st.last_return = Ok(result);
            st.pending.filter(|p| *p != st.current)
        };
        info!(element = %self.name(), %transition, "state changed");
        m::record_state_change(self.name(), transition);
        self.0.state_cond.notify_all();
        self.post_message(Message::new(
            self,
            MessageView::StateChanged {
                old: transition.current(),
                current: transition.next(),
                pending,
            },
        ));
    }

    /// Finish an asynchronous step.
    ///
    /// `Ok` commits the step in progress, posts `AsyncDone` and continues
    /// toward the pending state. `Err` aborts the change and posts an error.
    /// Calls made while no step is in progress are ignored.
    pub fn continue_state(&self, result: StateChangeResult) -> StateChangeResult {
        let _guard = self.0.state_lock.lock();
        let (transition, was_async) = {
            let st = self.0.state.lock();
            if st.next == st.current {
                trace!(element = %self.name(), "nothing to continue");
                return result;
            }
            (
                StateChange::new(st.current, st.next),
                st.last_return == Ok(StateChangeSuccess::Async),
            )
        };
        let Some(transition) = transition else {
            return Err(StateChangeError);
        };
        let success = match result {
            Ok(success) => success,
            Err(err) => {
                self.abort_state();
                self.post_error(ElementError::new(
                    ErrorDomain::Core,
                    format!("{transition} failed asynchronously"),
                ));
                return Err(err);
            }
        };
        let success = if success == StateChangeSuccess::Async {
            StateChangeSuccess::Success
        } else {
            success
        };
        self.commit_step(transition, success);
        if was_async {
            self.post_message(Message::new(self, MessageView::AsyncDone));
        }
        self.run_transitions()
    }

    /// Drop the pending state after a failed or cancelled step.
    pub fn abort_state(&self) {
        let mut st = self.0.state.lock();
        if st.pending.is_none() && st.next == st.current {
            return;
        }
        warn!(element = %self.name(), current = %st.current, next = %st.next, "state change aborted");
        st.pending = None;
        st.next = st.current;
        st.last_return = Err(StateChangeError);
        self.0.state_cond.notify_all();
    }

    /// Wait up to `timeout` (forever for `None`) for a state change in
    /// progress to finish, then report `(result, current, pending)`.
    ///
    /// The result is `Async` when the change is still in progress.
    pub fn state(&self, timeout: Option<Duration>) -> (StateChangeResult, State, Option<State>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = self.0.state.lock();
        while st.pending.is_some() {
            match deadline {
                Some(deadline) => {
                    if self.0.state_cond.wait_until(&mut st, deadline).timed_out() {
                        break;
                    }
                }
                None => self.0.state_cond.wait(&mut st),
            }
        }
        let result = if st.pending.is_some() {
            Ok(StateChangeSuccess::Async)
        } else {
            st.last_return
        };
        (result, st.current, st.pending)
    }

    /// Exclude the element from its bin's state propagation.
    /// Returns whether the flag changed.
    pub fn set_locked_state(&self, locked: bool) -> bool {
        let mut st = self.0.state.lock();
        let changed = st.locked != locked;
        st.locked = locked;
        changed
    }

    /// Whether the element ignores its bin's state changes.
    pub fn is_locked_state(&self) -> bool {
        self.0.state.lock().locked
    }

    /// Bring the element to the state its parent is in or going to.
    pub fn sync_state_with_parent(&self) -> StateChangeResult {
        let Some(parent) = self.parent() else {
            return Err(StateChangeError);
        };
        let target = parent.pending_state().unwrap_or_else(|| parent.current_state());
        debug!(element = %self.name(), parent = %parent.name(), %target, "syncing state with parent");
        self.set_state(target)
    }

    /// Run `func` on a new thread with this element.
    pub fn call_async<F>(&self, func: F)
    where
        F: FnOnce(&Element) + Send + 'static,
    {
        let element = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-async", self.name()))
            .spawn(move || func(&element));
        if let Err(err) = spawned {
            error!(element = %self.name(), error = %err, "could not spawn async call");
        }
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Base time distributed by the pipeline on PAUSED→PLAYING.
    pub fn base_time(&self) -> ClockTime {
        ClockTime::from_nanos(self.0.base_time.load(Ordering::Acquire))
    }

    pub(crate) fn set_base_time(&self, time: ClockTime) {
        self.0.base_time.store(time.nanos(), Ordering::Release);
    }

    /// The clock of the enclosing pipeline.
    pub fn clock(&self) -> Option<Arc<dyn Clock>> {
        let mut ancestor = self.parent();
        while let Some(element) = ancestor {
            if let Some(clock) = element.imp::<BinImpl>().and_then(BinImpl::pipeline_clock) {
                return Some(clock.clock());
            }
            ancestor = element.parent();
        }
        None
    }

    /// A clock this element provides, if any.
    pub fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        self.0.imp.provide_clock(self)
    }

    /// Running time: clock time minus base time. NONE without a clock.
    pub fn running_time(&self) -> ClockTime {
        match self.clock() {
            Some(clock) => clock.now().saturating_sub(self.base_time()),
            None => ClockTime::NONE,
        }
    }

    // ========================================================================
    // Messages, events and queries
    // ========================================================================

    /// Post a message to the parent bin (or own bus at the top level).
    pub fn post_message(&self, message: Message) {
        if let Some(parent) = self.parent() {
            parent.0.imp.handle_message(&parent, message);
        } else if let Some(bin) = self.imp::<BinImpl>() {
            bin.bus().post(message);
        } else {
            trace!(element = %self.name(), "no bus, message dropped");
        }
    }

    /// Post a fatal error message.
    pub fn post_error(&self, err: ElementError) {
        error!(element = %self.name(), error = %err, debug = ?err.debug, "element error");
        self.post_message(Message::new(self, MessageView::Error(err)));
    }

    /// Post a warning message.
    pub fn post_warning(&self, warning: ElementError) {
        warn!(element = %self.name(), warning = %warning, "element warning");
        self.post_message(Message::new(self, MessageView::Warning(warning)));
    }

    /// Post an informational message.
    pub fn post_info(&self, text: impl Into<String>) {
        self.post_message(Message::new(self, MessageView::Info(text.into())));
    }

    /// Send an event to the element.
    pub fn send_event(&self, event: Event) -> bool {
        self.0.imp.send_event(self, event)
    }

    /// Default element event handling: upstream events go out of the sink
    /// pads, downstream events out of the src pads.
    pub fn default_send_event(&self, event: Event) -> bool {
        let pads = if event.is_upstream() {
            self.sink_pads()
        } else {
            self.src_pads()
        };
        let mut any = false;
        for pad in pads {
            any |= pad.push_event(event.clone());
        }
        any
    }

    /// Query the element.
    pub fn query(&self, query: &mut Query) -> bool {
        self.0.imp.element_query(self, query)
    }

    /// Default element query: ask upstream through the sink pads, then
    /// downstream through the src pads.
    pub fn default_query(&self, query: &mut Query) -> bool {
        self.sink_pads()
            .into_iter()
            .chain(self.src_pads())
            .any(|pad| pad.peer_query(query))
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Set a property by name.
    pub fn set_property(
        &self,
        name: &str,
        value: impl Into<PropValue>,
    ) -> std::result::Result<(), PropertyError> {
        let table = self
            .0
            .imp
            .properties()
            .ok_or_else(|| PropertyError::Unknown(name.to_owned()))?;
        table.set_property(name, value.into())?;
        debug!(element = %self.name(), property = name, "property set");
        Ok(())
    }

    /// Read a property by name.
    pub fn property(&self, name: &str) -> std::result::Result<PropValue, PropertyError> {
        self.0
            .imp
            .properties()
            .ok_or_else(|| PropertyError::Unknown(name.to_owned()))?
            .property(name)
    }

    /// Property descriptions.
    pub fn property_specs(&self) -> &'static [PropertySpec] {
        self.0.imp.properties().map_or(&[], |t| t.property_specs())
    }

    // ========================================================================
    // Graph helpers
    // ========================================================================

    /// Fixation strategy of the nearest ancestor bin.
    pub(crate) fn fixation_strategy(&self) -> Arc<dyn FixationStrategy> {
        let mut ancestor = self.parent();
        while let Some(element) = ancestor {
            if let Some(bin) = element.imp::<BinImpl>() {
                return bin.fixation_strategy();
            }
            ancestor = element.parent();
        }
        Arc::new(PreferredFixation)
    }

    /// Report a structural change to the listeners of every ancestor bin.
    pub(crate) fn notify_graph(&self, event: GraphEvent<'_>) {
        let mut ancestor = self.parent();
        while let Some(element) = ancestor {
            if let Some(bin) = element.imp::<BinImpl>() {
                bin.notify_listeners(&event);
            }
            ancestor = element.parent();
        }
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Element {}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.0.state.lock();
        f.debug_struct("Element")
            .field("name", &self.0.name)
            .field("factory", &self.0.factory)
            .field("current", &st.current)
            .field("pending", &st.pending)
            .field("pads", &self.0.pads.read().len())
            .finish()
    }
}
