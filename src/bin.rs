//! Bins: elements that contain other elements.
//!
//! A bin owns its children, drives their state changes and aggregates
//! their messages:
//!
//! - children change state sink-first (a topological order over the pad
//!   links between them), so downstream is ready before upstream produces
//! - the bin's transition is ASYNC while any child is still completing a
//!   step asynchronously, and commits once every such child posted
//!   `AsyncDone`
//! - `Eos` from children is counted; the bin posts its own `Eos` once every
//!   sink child has finished
//! - other messages are forwarded to the parent, or to the bin's bus at the
//!   top level

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use daggy::Dag;
use daggy::petgraph::algo::toposort;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::bus::{Bus, Message, MessageView};
use crate::caps::{Caps, FixationStrategy, PreferredFixation};
use crate::clock::{Clock, ClockTime, PipelineClock};
use crate::element::{
    Element, ElementImpl, GraphEvent, Pad, StateChange, StateChangeResult, StateChangeSuccess,
    WeakElement,
};
use crate::error::{Error, Result};
use crate::event::{Event, Query};

/// Synchronous notifications about the structure of a bin.
///
/// Listeners registered on a bin hear about changes anywhere below it.
/// They run on the thread making the change and must not block.
pub trait GraphListener: Send + Sync {
    /// A child was added to `bin`.
    fn element_added(&self, _bin: &Element, _element: &Element) {}
    /// A child was removed from `bin`.
    fn element_removed(&self, _bin: &Element, _element: &Element) {}
    /// A pad was added to an element.
    fn pad_added(&self, _pad: &Pad) {}
    /// A pad is being removed from an element.
    fn pad_removed(&self, _pad: &Pad) {}
    /// An element announced it will add no more dynamic pads.
    fn no_more_pads(&self, _element: &Element) {}
    /// Two pads were linked.
    fn pad_linked(&self, _src: &Pad, _sink: &Pad) {}
    /// Caps were fixed on a link.
    fn caps_negotiated(&self, _pad: &Pad, _caps: &Caps) {}
}

#[derive(Default)]
struct AsyncTracking {
    pending: Vec<WeakElement>,
    /// The bin returned ASYNC and waits for the pending children.
    waiting: bool,
}

#[derive(Default)]
struct EosTracking {
    done: Vec<WeakElement>,
    posted: bool,
}

struct BinInner {
    children: RwLock<Vec<Element>>,
    bus: Bus,
    listeners: RwLock<Vec<Arc<dyn GraphListener>>>,
    strategy: RwLock<Arc<dyn FixationStrategy>>,
    async_state: Mutex<AsyncTracking>,
    eos: Mutex<EosTracking>,
    clock: Option<PipelineClock>,
    auto_flush_bus: AtomicBool,
}

/// Element implementation shared by [`Bin`] and [`crate::pipeline::Pipeline`].
pub struct BinImpl {
    inner: Arc<BinInner>,
}

impl BinImpl {
    pub(crate) fn new(clock: Option<PipelineClock>) -> Self {
        Self {
            inner: Arc::new(BinInner {
                children: RwLock::new(Vec::new()),
                bus: Bus::new(),
                listeners: RwLock::new(Vec::new()),
                strategy: RwLock::new(Arc::new(PreferredFixation)),
                async_state: Mutex::new(AsyncTracking::default()),
                eos: Mutex::new(EosTracking::default()),
                clock,
                auto_flush_bus: AtomicBool::new(true),
            }),
        }
    }

    /// The bin's bus.
    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Whether any child is a sink (recursively).
    pub fn has_sinks(&self) -> bool {
        self.inner.children.read().iter().any(Element::is_sink)
    }

    /// The pipeline clock, for top-level pipelines.
    pub fn pipeline_clock(&self) -> Option<&PipelineClock> {
        self.inner.clock.as_ref()
    }

    /// The fixation strategy used for links inside this bin.
    pub fn fixation_strategy(&self) -> Arc<dyn FixationStrategy> {
        self.inner.strategy.read().clone()
    }

    pub(crate) fn notify_listeners(&self, event: &GraphEvent<'_>) {
        let listeners = self.inner.listeners.read().clone();
        for listener in &listeners {
            match *event {
                GraphEvent::ElementAdded { bin, element } => listener.element_added(bin, element),
                GraphEvent::ElementRemoved { bin, element } => {
                    listener.element_removed(bin, element)
                }
                GraphEvent::PadAdded { pad } => listener.pad_added(pad),
                GraphEvent::PadRemoved { pad } => listener.pad_removed(pad),
                GraphEvent::NoMorePads { element } => listener.no_more_pads(element),
                GraphEvent::PadLinked { src, sink } => listener.pad_linked(src, sink),
                GraphEvent::CapsNegotiated { pad, caps } => listener.caps_negotiated(pad, caps),
            }
        }
    }
}

impl BinInner {
    fn is_child(&self, element: &Element) -> bool {
        self.children.read().iter().any(|c| c.ptr_eq(element))
    }

    /// The child of this bin that contains (or is) `element`.
    fn child_containing(&self, bin: &Element, element: &Element) -> Option<Element> {
        let mut current = element.clone();
        loop {
            let parent = current.parent()?;
            if parent.ptr_eq(bin) {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Children ordered sink-first.
    fn sorted_children(&self, bin: &Element) -> Vec<Element> {
        let children = self.children.read().clone();
        let mut dag: Dag<usize, ()> = Dag::new();
        let nodes: Vec<_> = (0..children.len()).map(|i| dag.add_node(i)).collect();
        for (i, child) in children.iter().enumerate() {
            for pad in all_src_pads(child) {
                let Some(peer_el) = pad.peer().and_then(|p| p.parent()) else {
                    continue;
                };
                let Some(downstream) = self.child_containing(bin, &peer_el) else {
                    continue;
                };
                if let Some(j) = children.iter().position(|c| c.ptr_eq(&downstream))
                    && i != j
                    && dag.add_edge(nodes[i], nodes[j], ()).is_err()
                {
                    warn!(bin = %bin.name(), "cycle between children, ignoring link");
                }
            }
        }
        match toposort(dag.graph(), None) {
            Ok(order) => order
                .into_iter()
                .rev()
                .map(|n| children[dag[n]].clone())
                .collect(),
            Err(_) => children,
        }
    }

    fn reset_eos(&self) {
        let mut eos = self.eos.lock();
        eos.done.clear();
        eos.posted = false;
    }

    /// Record EOS from `child`. True when the bin itself is now at EOS.
    fn child_eos(&self, child: &Element) -> bool {
        let sinks: Vec<Element> = self
            .children
            .read()
            .iter()
            .filter(|c| c.is_sink())
            .cloned()
            .collect();
        let mut eos = self.eos.lock();
        if !eos.done.iter().any(|w| w.upgrade().is_some_and(|e| e.ptr_eq(child))) {
            eos.done.push(child.downgrade());
        }
        let all_done = !sinks.is_empty()
            && sinks.iter().all(|sink| {
                eos.done
                    .iter()
                    .any(|w| w.upgrade().is_some_and(|e| e.ptr_eq(sink)))
            });
        trace!(child = %child.name(), done = eos.done.len(), sinks = sinks.len(), "sink reached EOS");
        if all_done && !eos.posted {
            eos.posted = true;
            return true;
        }
        false
    }

    fn child_async_start(&self, child: &Element) {
        let mut state = self.async_state.lock();
        if !state.pending.iter().any(|w| w.upgrade().is_some_and(|e| e.ptr_eq(child))) {
            state.pending.push(child.downgrade());
        }
    }

    fn child_async_done(&self, bin: &Element, child: &Element) {
        let resume = {
            let mut state = self.async_state.lock();
            state
                .pending
                .retain(|w| w.upgrade().is_some_and(|e| !e.ptr_eq(child)));
            if state.pending.is_empty() && state.waiting {
                state.waiting = false;
                true
            } else {
                false
            }
        };
        if resume {
            debug!(bin = %bin.name(), "all children completed, committing");
            bin.call_async(|bin| {
                let _ = bin.continue_state(Ok(StateChangeSuccess::Success));
            });
        }
    }

    fn distribute_base_time(&self, base: ClockTime) {
        for child in self.children.read().iter() {
            child.set_base_time(base);
            if let Some(bin) = child.imp::<BinImpl>() {
                bin.inner.distribute_base_time(base);
            }
        }
    }

    fn find_clock(&self) -> Option<Arc<dyn Clock>> {
        self.children.read().iter().find_map(|child| {
            child.provide_clock().or_else(|| {
                child
                    .imp::<BinImpl>()
                    .and_then(|bin| bin.inner.find_clock())
            })
        })
    }
}

fn all_src_pads(element: &Element) -> Vec<Pad> {
    let mut pads = element.src_pads();
    if let Some(bin) = element.imp::<BinImpl>() {
        for child in bin.inner.children.read().iter() {
            pads.extend(all_src_pads(child));
        }
    }
    pads
}

impl ElementImpl for BinImpl {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        let inner = &self.inner;
        match transition {
            StateChange::ReadyToPaused => {
                inner.reset_eos();
                if let Some(clock) = &inner.clock {
                    if let Some(provided) = inner.find_clock() {
                        clock.set_clock(provided);
                    }
                    let name = clock.clock().name().to_owned();
                    info!(pipeline = %element.name(), clock = %name, "clock selected");
                    element.post_message(Message::new(element, MessageView::NewClock(name)));
                }
            }
            StateChange::PausedToPlaying => {
                if let Some(clock) = &inner.clock {
                    let base = clock.start();
                    element.set_base_time(base);
                    inner.distribute_base_time(base);
                    debug!(pipeline = %element.name(), base_time = %base, "base time distributed");
                }
            }
            StateChange::PausedToReady => {
                if let Some(clock) = &inner.clock {
                    clock.reset();
                }
            }
            _ => {}
        }

        {
            let mut state = inner.async_state.lock();
            state.pending.clear();
            state.waiting = false;
        }

        let next = transition.next();
        let mut no_preroll = false;
        for child in inner.sorted_children(element) {
            if child.is_locked_state() {
                trace!(bin = %element.name(), child = %child.name(), "skipping locked child");
                continue;
            }
            match child.set_state(next) {
                Ok(StateChangeSuccess::Success) => {}
                Ok(StateChangeSuccess::Async) => {
                    trace!(bin = %element.name(), child = %child.name(), "child is async");
                }
                Ok(StateChangeSuccess::NoPreroll) => no_preroll = true,
                Err(err) => {
                    warn!(bin = %element.name(), child = %child.name(), %transition, "child failed to change state");
                    return Err(err);
                }
            }
        }

        if transition == StateChange::ReadyToNull && inner.auto_flush_bus.load(Ordering::Acquire) {
            inner.bus.set_flushing(true);
            inner.bus.set_flushing(false);
        }

        let mut state = inner.async_state.lock();
        if no_preroll {
            state.pending.clear();
            return Ok(StateChangeSuccess::NoPreroll);
        }
        if state.pending.is_empty() {
            Ok(StateChangeSuccess::Success)
        } else {
            state.waiting = true;
            debug!(bin = %element.name(), pending = state.pending.len(), "waiting for children");
            Ok(StateChangeSuccess::Async)
        }
    }

    fn handle_message(&self, element: &Element, message: Message) {
        let child = message.source().filter(|src| self.inner.is_child(src));
        match (message.view(), child) {
            (MessageView::AsyncStart, Some(child)) => {
                self.inner.child_async_start(&child);
                return;
            }
            (MessageView::AsyncDone, Some(child)) => {
                self.inner.child_async_done(element, &child);
                return;
            }
            (MessageView::Eos, Some(child)) => {
                if self.inner.child_eos(&child) {
                    info!(bin = %element.name(), "all sinks reached EOS");
                    element.post_message(Message::new(element, MessageView::Eos));
                }
                return;
            }
            _ => {}
        }
        element.post_message(message);
    }

    fn send_event(&self, element: &Element, event: Event) -> bool {
        if matches!(&event, Event::FlushStop)
            || matches!(&event, Event::Seek(seek) if seek.flush)
        {
            self.inner.reset_eos();
        }
        let upstream = event.is_upstream();
        let targets: Vec<Element> = self
            .inner
            .children
            .read()
            .iter()
            .filter(|c| if upstream { c.is_sink() } else { c.is_source() })
            .cloned()
            .collect();
        if targets.is_empty() {
            return element.default_send_event(event);
        }
        let mut any = false;
        for child in targets {
            any |= child.send_event(event.clone());
        }
        any
    }

    fn element_query(&self, _element: &Element, query: &mut Query) -> bool {
        let sinks: Vec<Element> = self
            .inner
            .children
            .read()
            .iter()
            .filter(|c| c.is_sink())
            .cloned()
            .collect();
        sinks.iter().any(|sink| sink.query(query))
    }

    fn provide_clock(&self, _element: &Element) -> Option<Arc<dyn Clock>> {
        self.inner.find_clock()
    }
}

// ============================================================================
// Bin handle
// ============================================================================

/// A container element. Dereferences to [`Element`].
///
/// ```rust
/// use trellis::prelude::*;
///
/// let bin = Bin::new("branch");
/// let inner = Bin::new("inner");
/// bin.add(&inner).unwrap();
/// assert!(bin.by_name("inner").is_some());
/// assert!(bin.add(&inner).is_err());
/// ```
#[derive(Clone)]
pub struct Bin {
    element: Element,
    inner: Arc<BinInner>,
}

impl Bin {
    /// Create an empty bin.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_impl(name.into(), BinImpl::new(None))
    }

    pub(crate) fn with_impl(name: String, imp: BinImpl) -> Self {
        let inner = Arc::clone(&imp.inner);
        let element = Element::from_boxed(name, None, Box::new(imp), None);
        Self { element, inner }
    }

    /// View an element as a bin, if it is one.
    pub fn from_element(element: &Element) -> Option<Bin> {
        let inner = Arc::clone(&element.imp::<BinImpl>()?.inner);
        Some(Self {
            element: element.clone(),
            inner,
        })
    }

    /// The bin as a plain element.
    pub fn as_element(&self) -> &Element {
        &self.element
    }

    /// The bin's bus. Only the top-level bin's bus receives messages.
    pub fn bus(&self) -> Bus {
        self.inner.bus.clone()
    }

    /// Add a child. Names must be unique within the bin and the child must
    /// not have a parent yet.
    pub fn add(&self, child: &Element) -> Result<()> {
        if child.ptr_eq(&self.element) {
            return Err(Error::Hierarchy(format!("cannot add {} to itself", child.name())));
        }
        {
            let mut children = self.inner.children.write();
            if children.iter().any(|c| c.name() == child.name()) {
                return Err(Error::Hierarchy(format!(
                    "{} already contains an element named {}",
                    self.name(),
                    child.name()
                )));
            }
            if !child.set_parent(&self.element) {
                return Err(Error::Hierarchy(format!("{} already has a parent", child.name())));
            }
            children.push(child.clone());
        }
        debug!(bin = %self.name(), child = %child.name(), "element added");
        let event = GraphEvent::ElementAdded {
            bin: &self.element,
            element: child,
        };
        self.notify(event);
        Ok(())
    }

    /// Add several children.
    pub fn add_many(&self, children: &[&Element]) -> Result<()> {
        for child in children {
            self.add(child)?;
        }
        Ok(())
    }

    /// Remove a child, unlinking its pads. The bin drops its reference.
    pub fn remove(&self, child: &Element) -> Result<()> {
        if !self.inner.is_child(child) {
            return Err(Error::NotFound(format!("{} in {}", child.name(), self.name())));
        }
        for pad in child.pads() {
            pad.unlink_peer();
        }
        let event = GraphEvent::ElementRemoved {
            bin: &self.element,
            element: child,
        };
        self.notify(event);
        self.inner.children.write().retain(|c| !c.ptr_eq(child));
        child.clear_parent();
        self.inner
            .async_state
            .lock()
            .pending
            .retain(|w| w.upgrade().is_some_and(|e| !e.ptr_eq(child)));
        debug!(bin = %self.name(), child = %child.name(), "element removed");
        Ok(())
    }

    /// Direct child by name.
    pub fn by_name(&self, name: &str) -> Option<Element> {
        self.inner
            .children
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Descendant by name, searching child bins depth-first.
    pub fn by_name_recurse(&self, name: &str) -> Option<Element> {
        let children = self.children();
        if let Some(found) = children.iter().find(|c| c.name() == name) {
            return Some(found.clone());
        }
        children
            .iter()
            .filter_map(Bin::from_element)
            .find_map(|bin| bin.by_name_recurse(name))
    }

    /// Children in insertion order.
    pub fn children(&self) -> Vec<Element> {
        self.inner.children.read().clone()
    }

    /// Children ordered sink-first, the order state changes use.
    pub fn iterate_sorted(&self) -> Vec<Element> {
        self.inner.sorted_children(&self.element)
    }

    /// Children that are sinks.
    pub fn sinks(&self) -> Vec<Element> {
        self.children().into_iter().filter(Element::is_sink).collect()
    }

    /// Register a structural change listener.
    pub fn add_listener(&self, listener: Arc<dyn GraphListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Replace the fixation policy for links inside this bin.
    pub fn set_fixation_strategy(&self, strategy: Arc<dyn FixationStrategy>) {
        *self.inner.strategy.write() = strategy;
    }

    /// Whether the bus is flushed when the bin goes to NULL (default true).
    pub fn set_auto_flush_bus(&self, flush: bool) {
        self.inner.auto_flush_bus.store(flush, Ordering::Release);
    }

    fn notify(&self, event: GraphEvent<'_>) {
        if let Some(imp) = self.element.imp::<BinImpl>() {
            imp.notify_listeners(&event);
        }
        self.element.notify_graph(event);
    }
}

impl Deref for Bin {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}

impl std::fmt::Debug for Bin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bin")
            .field("name", &self.name())
            .field("children", &self.inner.children.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{PadTemplate, State};

    struct Node {
        src: bool,
        sink: bool,
    }

    impl ElementImpl for Node {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            let mut templates = Vec::new();
            if self.sink {
                templates.push(PadTemplate::sink(Caps::new_any()));
            }
            if self.src {
                templates.push(PadTemplate::src(Caps::new_any()));
            }
            templates
        }
    }

    fn node(name: &str, src: bool, sink: bool) -> Element {
        Element::new(name, Node { src, sink })
    }

    #[test]
    fn test_add_remove() {
        let bin = Bin::new("bin");
        let a = node("a", true, false);
        bin.add(&a).unwrap();
        assert_eq!(a.parent().unwrap(), *bin.as_element());
        assert!(matches!(bin.add(&node("a", true, false)), Err(Error::Hierarchy(_))));

        let other = Bin::new("other");
        assert!(matches!(other.add(&a), Err(Error::Hierarchy(_))));

        bin.remove(&a).unwrap();
        assert!(a.parent().is_none());
        assert!(bin.children().is_empty());
        assert!(matches!(bin.remove(&a), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_sorted_sink_first() {
        let bin = Bin::new("bin");
        let src = node("src", true, false);
        let mid = node("mid", true, true);
        let sink = node("sink", false, true);
        bin.add_many(&[&src, &sink, &mid]).unwrap();
        Element::link_many(&[&src, &mid, &sink]).unwrap();

        let order: Vec<String> = bin
            .iterate_sorted()
            .iter()
            .map(|e| e.name().to_owned())
            .collect();
        assert_eq!(order, ["sink", "mid", "src"]);
    }

    #[test]
    fn test_by_name_recurse() {
        let outer = Bin::new("outer");
        let inner = Bin::new("inner");
        let leaf = node("leaf", false, true);
        inner.add(&leaf).unwrap();
        outer.add(&inner).unwrap();
        assert!(outer.by_name("leaf").is_none());
        assert_eq!(outer.by_name_recurse("leaf").unwrap(), leaf);
        assert!(inner.is_sink());
    }

    #[test]
    fn test_state_propagates_to_children() {
        let bin = Bin::new("bin");
        let src = node("src", true, false);
        let sink = node("sink", false, true);
        bin.add_many(&[&src, &sink]).unwrap();
        src.link(&sink).unwrap();

        assert_eq!(bin.set_state(State::Paused), Ok(StateChangeSuccess::Success));
        assert_eq!(src.current_state(), State::Paused);
        assert_eq!(sink.current_state(), State::Paused);

        sink.set_locked_state(true);
        bin.set_state(State::Null).unwrap();
        assert_eq!(src.current_state(), State::Null);
        assert_eq!(sink.current_state(), State::Paused);
    }

    #[test]
    fn test_eos_needs_every_sink() {
        let bin = Bin::new("bin");
        let a = node("a", false, true);
        let b = node("b", false, true);
        bin.add_many(&[&a, &b]).unwrap();
        let bus = bin.bus();

        a.post_message(Message::new(&a, MessageView::Eos));
        assert!(bus.pop().is_none());
        a.post_message(Message::new(&a, MessageView::Eos));
        assert!(bus.pop().is_none());
        b.post_message(Message::new(&b, MessageView::Eos));
        let msg = bus.pop().unwrap();
        assert!(matches!(msg.view(), MessageView::Eos));
        assert_eq!(msg.src(), "bin");
        b.post_message(Message::new(&b, MessageView::Eos));
        assert!(bus.pop().is_none());
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl GraphListener for Recorder {
        fn element_added(&self, bin: &Element, element: &Element) {
            self.0.lock().push(format!("added {}/{}", bin.name(), element.name()));
        }

        fn pad_linked(&self, src: &Pad, sink: &Pad) {
            self.0.lock().push(format!("linked {src} {sink}"));
        }
    }

    #[test]
    fn test_listeners_hear_nested_changes() {
        let outer = Bin::new("outer");
        let inner = Bin::new("inner");
        outer.add(&inner).unwrap();
        let recorder = Arc::new(Recorder::default());
        outer.add_listener(recorder.clone());

        let src = node("src", true, false);
        let sink = node("sink", false, true);
        inner.add_many(&[&src, &sink]).unwrap();
        src.link(&sink).unwrap();

        let log = recorder.0.lock().clone();
        assert_eq!(
            log,
            [
                "added inner/src",
                "added inner/sink",
                "linked src:src sink:sink",
            ]
        );
    }
}
