//! The bus: an unbounded FIFO of messages from elements to the application.
//!
//! Posting never blocks, so a streaming thread can report errors or EOS
//! without waiting on the application. The application pops messages
//! (blocking, with a timeout, or asynchronously) or installs a sync handler
//! that sees every message on the posting thread.
//!
//! ```rust
//! use trellis::bus::{Bus, Message, MessageType, MessageView};
//! use std::time::Duration;
//!
//! let bus = Bus::new();
//! bus.post(Message::from_name("src", MessageView::Eos));
//! let msg = bus.timed_pop_filtered(Some(Duration::ZERO), &[MessageType::Eos]).unwrap();
//! assert_eq!(msg.src(), "src");
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::trace;

use crate::caps::Structure;
use crate::element::{Element, State, WeakElement};
use crate::error::ElementError;
use crate::observability::metrics as m;

static SEQNUM: AtomicU64 = AtomicU64::new(1);

/// Message payloads.
#[derive(Debug, Clone)]
pub enum MessageView {
    /// An element committed a state step.
    StateChanged {
        /// State before the step.
        old: State,
        /// State after the step.
        current: State,
        /// Final requested state, if still ahead.
        pending: Option<State>,
    },
    /// Fatal element error.
    Error(ElementError),
    /// Non-fatal problem.
    Warning(ElementError),
    /// Informational text.
    Info(String),
    /// End of stream. From a pipeline: every sink reached EOS.
    Eos,
    /// A state step went asynchronous.
    AsyncStart,
    /// An asynchronous state step completed.
    AsyncDone,
    /// The pipeline selected a clock.
    NewClock(String),
    /// Element-specific payload.
    Element(Structure),
    /// The stream duration changed; query it again.
    DurationChanged,
}

/// Message kinds, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// [`MessageView::StateChanged`].
    StateChanged,
    /// [`MessageView::Error`].
    Error,
    /// [`MessageView::Warning`].
    Warning,
    /// [`MessageView::Info`].
    Info,
    /// [`MessageView::Eos`].
    Eos,
    /// [`MessageView::AsyncStart`].
    AsyncStart,
    /// [`MessageView::AsyncDone`].
    AsyncDone,
    /// [`MessageView::NewClock`].
    NewClock,
    /// [`MessageView::Element`].
    Element,
    /// [`MessageView::DurationChanged`].
    DurationChanged,
}

impl MessageType {
    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::StateChanged => "state-changed",
            MessageType::Error => "error",
            MessageType::Warning => "warning",
            MessageType::Info => "info",
            MessageType::Eos => "eos",
            MessageType::AsyncStart => "async-start",
            MessageType::AsyncDone => "async-done",
            MessageType::NewClock => "new-clock",
            MessageType::Element => "element",
            MessageType::DurationChanged => "duration-changed",
        }
    }
}

/// A bus message.
#[derive(Clone)]
pub struct Message {
    seqnum: u64,
    src: String,
    source: WeakElement,
    view: MessageView,
}

impl Message {
    /// Create a message posted by `src`.
    pub fn new(src: &Element, view: MessageView) -> Self {
        Self {
            seqnum: SEQNUM.fetch_add(1, Ordering::Relaxed),
            src: src.name().to_owned(),
            source: src.downgrade(),
            view,
        }
    }

    /// Create a message from a named source that is not an element.
    pub fn from_name(src: impl Into<String>, view: MessageView) -> Self {
        Self {
            seqnum: SEQNUM.fetch_add(1, Ordering::Relaxed),
            src: src.into(),
            source: WeakElement::default(),
            view,
        }
    }

    /// Process-wide, monotonically increasing sequence number.
    pub fn seqnum(&self) -> u64 {
        self.seqnum
    }

    /// Name of the posting element.
    pub fn src(&self) -> &str {
        &self.src
    }

    /// The posting element, if it is still alive.
    pub fn source(&self) -> Option<Element> {
        self.source.upgrade()
    }

    /// Whether `element` posted this message.
    pub fn is_from(&self, element: &Element) -> bool {
        self.source().is_some_and(|s| s.ptr_eq(element))
    }

    /// Payload.
    pub fn view(&self) -> &MessageView {
        &self.view
    }

    /// Kind of message.
    pub fn message_type(&self) -> MessageType {
        match self.view {
            MessageView::StateChanged { .. } => MessageType::StateChanged,
            MessageView::Error(_) => MessageType::Error,
            MessageView::Warning(_) => MessageType::Warning,
            MessageView::Info(_) => MessageType::Info,
            MessageView::Eos => MessageType::Eos,
            MessageView::AsyncStart => MessageType::AsyncStart,
            MessageView::AsyncDone => MessageType::AsyncDone,
            MessageView::NewClock(_) => MessageType::NewClock,
            MessageView::Element(_) => MessageType::Element,
            MessageView::DurationChanged => MessageType::DurationChanged,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("seqnum", &self.seqnum)
            .field("src", &self.src)
            .field("view", &self.view)
            .finish()
    }
}

/// Verdict of a sync handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSyncReply {
    /// Queue the message.
    Pass,
    /// Discard the message.
    Drop,
}

type SyncHandler = Box<dyn Fn(&Message) -> BusSyncReply + Send + Sync>;

struct BusInner {
    tx: kanal::Sender<Message>,
    rx: kanal::Receiver<Message>,
    flushing: AtomicBool,
    sync_handler: RwLock<Option<SyncHandler>>,
}

/// Message bus. Cloning yields the same bus.
#[derive(Clone)]
pub struct Bus(Arc<BusInner>);

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        let (tx, rx) = kanal::unbounded();
        Bus(Arc::new(BusInner {
            tx,
            rx,
            flushing: AtomicBool::new(false),
            sync_handler: RwLock::new(None),
        }))
    }

    /// Post a message. Never blocks. Returns false if the message was
    /// dropped (flushing bus or sync handler).
    pub fn post(&self, message: Message) -> bool {
        if self.0.flushing.load(Ordering::Acquire) {
            trace!(src = message.src(), "bus flushing, message dropped");
            return false;
        }
        if let Some(handler) = self.0.sync_handler.read().as_ref()
            && handler(&message) == BusSyncReply::Drop
        {
            return false;
        }
        m::record_bus_message(message.message_type().name());
        trace!(src = message.src(), kind = message.message_type().name(), seqnum = message.seqnum(), "message posted");
        self.0.tx.send(message).is_ok()
    }

    /// Next message, without waiting.
    pub fn pop(&self) -> Option<Message> {
        match self.0.rx.try_recv() {
            Ok(Some(message)) => Some(message),
            _ => None,
        }
    }

    /// Next message, waiting up to `timeout` (forever for `None`).
    pub fn timed_pop(&self, timeout: Option<Duration>) -> Option<Message> {
        match timeout {
            None => self.0.rx.recv().ok(),
            Some(timeout) if timeout.is_zero() => self.pop(),
            Some(timeout) => self.0.rx.recv_timeout(timeout).ok(),
        }
    }

    /// Next message of one of `types`, waiting up to `timeout`. Messages of
    /// other types are discarded.
    pub fn timed_pop_filtered(
        &self,
        timeout: Option<Duration>,
        types: &[MessageType],
    ) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let message = self.timed_pop(remaining)?;
            if types.contains(&message.message_type()) {
                return Some(message);
            }
        }
    }

    /// Wait for the next message asynchronously.
    pub async fn next_message(&self) -> Option<Message> {
        self.0.rx.as_async().recv().await.ok()
    }

    /// Whether messages are queued.
    pub fn have_pending(&self) -> bool {
        !self.0.rx.is_empty()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.0.rx.len()
    }

    /// Whether no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.0.rx.is_empty()
    }

    /// While flushing, queued messages are discarded and new ones dropped.
    pub fn set_flushing(&self, flushing: bool) {
        self.0.flushing.store(flushing, Ordering::Release);
        if flushing {
            while self.pop().is_some() {}
        }
    }

    /// Install a handler that runs on the posting thread for every message.
    pub fn set_sync_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) -> BusSyncReply + Send + Sync + 'static,
    {
        *self.0.sync_handler.write() = Some(Box::new(handler));
    }

    /// Remove the sync handler.
    pub fn unset_sync_handler(&self) {
        *self.0.sync_handler.write() = None;
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("pending", &self.len())
            .field("flushing", &self.0.flushing.load(Ordering::Relaxed))
            .finish()
    }
}
