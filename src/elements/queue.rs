//! `queue`: a bounded FIFO that hands data to another thread.
//!
//! Upstream pushes into the queue on its own thread and blocks while the
//! queue is full (unless leaky). Downstream is fed either by the queue's
//! own streaming task (push mode) or by pulling from it (pull mode, each
//! `get_range` pops the next buffer and blocks while empty). Serialized
//! events travel through the queue in order with the buffers. Flushing
//! wakes every waiter with `Flushing`.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{
    Element, ElementImpl, Pad, PadDirection, PadMode, PadTemplate, PropValue, PropertyKind,
    PropertySpec, PropertyTable, WeakElement,
};
use crate::error::{ElementError, ErrorDomain, PropertyError};
use crate::event::{Event, Query};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::observability::metrics as m;
use crate::task::{Task, TaskLoop};

/// What happens when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Leaky {
    /// Block upstream until there is room.
    #[default]
    No,
    /// Drop the incoming buffer.
    Upstream,
    /// Drop the oldest queued buffers.
    Downstream,
}

impl Leaky {
    const NICKS: &'static [&'static str] = &["no", "upstream", "downstream"];

    fn nick(self) -> &'static str {
        match self {
            Leaky::No => "no",
            Leaky::Upstream => "upstream",
            Leaky::Downstream => "downstream",
        }
    }

    fn from_nick(nick: &str) -> Option<Self> {
        match nick {
            "no" => Some(Leaky::No),
            "upstream" => Some(Leaky::Upstream),
            "downstream" => Some(Leaky::Downstream),
            _ => None,
        }
    }
}

/// Configuration of a [`Queue`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    /// Maximum queued buffers; 0 disables the limit.
    pub max_size_buffers: usize,
    /// Maximum queued bytes; 0 disables the limit.
    pub max_size_bytes: usize,
    /// Overflow behaviour.
    pub leaky: Leaky,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size_buffers: 200,
            max_size_bytes: 10 * 1024 * 1024,
            leaky: Leaky::No,
        }
    }
}

#[derive(Debug)]
enum QueueItem {
    Buffer(Buffer),
    Event(Event),
}

/// Fill level and counters of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Buffers currently queued.
    pub current_buffers: usize,
    /// Bytes currently queued.
    pub current_bytes: usize,
    /// Buffers accepted since the last flush.
    pub total_pushed: u64,
    /// Buffers handed downstream since the last flush.
    pub total_popped: u64,
    /// Buffers dropped by leaky modes.
    pub total_dropped: u64,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<QueueItem>,
    stats: QueueStats,
    flushing: bool,
    /// Result of the last push downstream, returned to upstream.
    src_result: FlowResult,
}

impl QueueState {
    fn is_full(&self, settings: &QueueSettings) -> bool {
        (settings.max_size_buffers > 0 && self.stats.current_buffers >= settings.max_size_buffers)
            || (settings.max_size_bytes > 0 && self.stats.current_bytes >= settings.max_size_bytes)
    }

    fn clear(&mut self) {
        self.items.clear();
        self.stats.current_buffers = 0;
        self.stats.current_bytes = 0;
    }

    fn take_buffer(&mut self, buffer: &Buffer) {
        self.stats.current_buffers -= 1;
        self.stats.current_bytes = self.stats.current_bytes.saturating_sub(buffer.len());
    }

    /// Drop the oldest buffer, keeping events.
    fn drop_oldest(&mut self) -> bool {
        let Some(index) = self
            .items
            .iter()
            .position(|item| matches!(item, QueueItem::Buffer(_)))
        else {
            return false;
        };
        if let Some(QueueItem::Buffer(old)) = self.items.remove(index) {
            self.take_buffer(&old);
            self.stats.total_dropped += 1;
        }
        true
    }
}

struct Shared {
    name: OnceLock<String>,
    settings: Mutex<QueueSettings>,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Shared {
    fn name(&self) -> &str {
        self.name.get().map_or("queue", String::as_str)
    }

    fn set_flushing(&self, flushing: bool) {
        let mut state = self.state.lock();
        state.flushing = flushing;
        if flushing {
            state.clear();
            self.not_empty.notify_all();
            self.not_full.notify_all();
        } else {
            state.src_result = Ok(FlowSuccess::Ok);
        }
        m::record_queue_level(self.name(), state.stats.current_buffers);
    }

    fn push_buffer(&self, buffer: Buffer) -> FlowResult {
        let settings = self.settings.lock().clone();
        let mut state = self.state.lock();
        if state.flushing {
            return Err(FlowError::Flushing);
        }
        state.src_result?;
        while state.is_full(&settings) {
            match settings.leaky {
                Leaky::No => {
                    trace!(queue = %self.name(), "queue full, blocking upstream");
                    self.not_full.wait(&mut state);
                    if state.flushing {
                        return Err(FlowError::Flushing);
                    }
                    state.src_result?;
                }
                Leaky::Upstream => {
                    state.stats.total_dropped += 1;
                    trace!(queue = %self.name(), "queue full, dropping incoming buffer");
                    return Ok(FlowSuccess::Ok);
                }
                Leaky::Downstream => {
                    if !state.drop_oldest() {
                        break;
                    }
                }
            }
        }
        state.stats.current_buffers += 1;
        state.stats.current_bytes += buffer.len();
        state.stats.total_pushed += 1;
        state.items.push_back(QueueItem::Buffer(buffer));
        m::record_queue_level(self.name(), state.stats.current_buffers);
        self.not_empty.notify_one();
        Ok(FlowSuccess::Ok)
    }

    fn push_event(&self, event: Event) -> bool {
        let mut state = self.state.lock();
        if state.flushing {
            return false;
        }
        state.items.push_back(QueueItem::Event(event));
        self.not_empty.notify_one();
        true
    }

    /// Block until an item is available.
    fn pop(&self) -> Result<QueueItem, FlowError> {
        let mut state = self.state.lock();
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if let Some(item) = state.items.pop_front() {
                if let QueueItem::Buffer(buffer) = &item {
                    state.take_buffer(buffer);
                    state.stats.total_popped += 1;
                    m::record_queue_level(self.name(), state.stats.current_buffers);
                }
                self.not_full.notify_one();
                return Ok(item);
            }
            self.not_empty.wait(&mut state);
        }
    }

    fn set_src_result(&self, result: FlowResult) {
        let mut state = self.state.lock();
        if !state.flushing {
            state.src_result = result;
        }
        // Wake an upstream blocked on a full queue so it sees the result.
        self.not_full.notify_all();
    }
}

fn push_loop(shared: &Shared, weak: &WeakElement, src: &Pad) -> TaskLoop {
    let item = match shared.pop() {
        Ok(item) => item,
        Err(_) => return TaskLoop::Pause,
    };
    match item {
        QueueItem::Event(Event::Eos) => {
            src.push_event(Event::Eos);
            shared.set_src_result(Err(FlowError::Eos));
            TaskLoop::Pause
        }
        QueueItem::Event(event) => {
            src.push_event(event);
            TaskLoop::Continue
        }
        QueueItem::Buffer(buffer) => match src.push(buffer) {
            Ok(_) => TaskLoop::Continue,
            Err(err) => {
                shared.set_src_result(Err(err));
                match err {
                    FlowError::Flushing | FlowError::WrongState => {}
                    FlowError::Eos => debug!(queue = %shared.name(), "downstream is eos"),
                    err => {
                        if let Some(element) = weak.upgrade() {
                            element.post_error(
                                ElementError::new(ErrorDomain::Stream, "Internal data stream error")
                                    .with_debug(format!("streaming stopped, reason {err}")),
                            );
                        }
                        src.push_event(Event::Eos);
                    }
                }
                TaskLoop::Pause
            }
        },
    }
}

/// Thread boundary with a bounded FIFO.
pub struct Queue {
    shared: Arc<Shared>,
    task: Mutex<Option<Task>>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

const PROPERTIES: &[PropertySpec] = &[
    PropertySpec::new(
        "max-size-buffers",
        "Max. number of buffers in the queue (0=disable)",
        PropertyKind::UInt { min: 0, max: u32::MAX as u64 },
    ),
    PropertySpec::new(
        "max-size-bytes",
        "Max. amount of data in the queue (bytes, 0=disable)",
        PropertyKind::UInt { min: 0, max: u32::MAX as u64 },
    ),
    PropertySpec::new("leaky", "Where the queue leaks, if at all", PropertyKind::Enum(Leaky::NICKS)),
    PropertySpec::read_only(
        "current-level-buffers",
        "Current number of buffers in the queue",
        PropertyKind::UInt { min: 0, max: u64::MAX },
    ),
    PropertySpec::read_only(
        "current-level-bytes",
        "Current amount of data in the queue (bytes)",
        PropertyKind::UInt { min: 0, max: u64::MAX },
    ),
];

impl Queue {
    /// Queue with the given limits.
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: OnceLock::new(),
                settings: Mutex::new(settings),
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    stats: QueueStats::default(),
                    flushing: true,
                    src_result: Ok(FlowSuccess::Ok),
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> QueueSettings {
        self.shared.settings.lock().clone()
    }

    /// Replace the settings. Blocked producers re-check the new limits.
    pub fn set_settings(&self, settings: QueueSettings) {
        *self.shared.settings.lock() = settings;
        self.shared.not_full.notify_all();
    }

    /// Fill level and counters.
    pub fn stats(&self) -> QueueStats {
        self.shared.state.lock().stats
    }

    fn start_task(&self, element: &Element, src: &Pad) -> bool {
        let mut slot = self.task.lock();
        if let Some(task) = slot.as_ref() {
            return task.start().is_ok();
        }
        let shared = Arc::clone(&self.shared);
        let weak = element.downgrade();
        let pad = src.clone();
        let task = Task::new(format!("{}:{}", element.name(), src.name()), move || {
            push_loop(&shared, &weak, &pad)
        });
        if let Err(err) = task.start() {
            warn!(element = %element.name(), error = %err, "could not start queue task");
            return false;
        }
        *slot = Some(task);
        true
    }

    fn stop_task(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.join();
        }
    }
}

impl ElementImpl for Queue {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::sink(Caps::new_any()),
            PadTemplate::src(Caps::new_any()),
        ]
    }

    fn constructed(&self, element: &Element) {
        let _ = self.shared.name.set(element.name().to_owned());
    }

    fn get_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        pad.proxy_caps(filter)
    }

    fn chain(&self, _element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.shared.push_buffer(buffer)
    }

    fn get_range(
        &self,
        element: &Element,
        _pad: &Pad,
        _offset: u64,
        _length: usize,
    ) -> Result<Buffer, FlowError> {
        loop {
            match self.shared.pop()? {
                QueueItem::Buffer(buffer) => return Ok(buffer),
                QueueItem::Event(Event::Eos) => {
                    self.shared.set_src_result(Err(FlowError::Eos));
                    return Err(FlowError::Eos);
                }
                QueueItem::Event(event) => {
                    trace!(element = %element.name(), event = event.name(), "event dropped in pull mode");
                }
            }
        }
    }

    fn activate_pad(&self, element: &Element, pad: &Pad, mode: PadMode) -> bool {
        match (pad.direction(), mode) {
            (_, PadMode::None) => {
                self.shared.set_flushing(true);
                if pad.direction() == PadDirection::Src {
                    self.stop_task();
                }
                true
            }
            (PadDirection::Src, PadMode::Push) => {
                self.shared.set_flushing(false);
                self.start_task(element, pad)
            }
            (PadDirection::Src, PadMode::Pull) => {
                self.shared.set_flushing(false);
                true
            }
            (PadDirection::Sink, PadMode::Push) => {
                self.shared.set_flushing(false);
                true
            }
            (PadDirection::Sink, PadMode::Pull) => false,
        }
    }

    fn sink_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        let src = element.static_pad("src");
        match event {
            Event::FlushStart => {
                self.shared.set_flushing(true);
                if let Some(task) = self.task.lock().as_ref() {
                    task.pause();
                }
                if let Some(src) = src {
                    src.push_event(Event::FlushStart);
                }
                true
            }
            Event::FlushStop => {
                if let Some(src) = &src {
                    src.push_event(Event::FlushStop);
                }
                self.shared.set_flushing(false);
                if let Some(src) = src.filter(|src| src.mode() == PadMode::Push) {
                    return self.start_task(element, &src);
                }
                true
            }
            event if event.is_serialized() => {
                if self.shared.push_event(event) {
                    true
                } else {
                    debug!(element = %element.name(), pad = %pad.name(), "event refused while flushing");
                    false
                }
            }
            other => pad.event_default(other),
        }
    }

    fn src_event(&self, _element: &Element, pad: &Pad, event: Event) -> bool {
        // In pull mode the downstream puller may be parked in `pop`.
        let flush = match event {
            Event::FlushStart | Event::FlushStop if pad.mode() == PadMode::Pull => {
                self.shared.set_flushing(matches!(event, Event::FlushStart));
                true
            }
            _ => false,
        };
        pad.event_default(event) || flush
    }

    fn query(&self, _element: &Element, pad: &Pad, query: &mut Query) -> bool {
        match query {
            Query::Scheduling { pull } if pad.direction() == PadDirection::Src => {
                *pull = true;
                true
            }
            _ => pad.query_default(query),
        }
    }

    fn properties(&self) -> Option<&dyn PropertyTable> {
        Some(self)
    }
}

impl PropertyTable for Queue {
    fn property_specs(&self) -> &'static [PropertySpec] {
        PROPERTIES
    }

    fn apply_property(&self, name: &str, value: PropValue) -> Result<(), PropertyError> {
        {
            let mut settings = self.shared.settings.lock();
            match (name, value) {
                ("max-size-buffers", PropValue::UInt(v)) => settings.max_size_buffers = v as usize,
                ("max-size-bytes", PropValue::UInt(v)) => settings.max_size_bytes = v as usize,
                ("leaky", PropValue::Str(v)) => {
                    settings.leaky = Leaky::from_nick(&v)
                        .ok_or_else(|| PropertyError::OutOfRange(name.to_owned()))?;
                }
                (name, _) => return Err(PropertyError::Unknown(name.to_owned())),
            }
        }
        self.shared.not_full.notify_all();
        Ok(())
    }

    fn property(&self, name: &str) -> Result<PropValue, PropertyError> {
        let settings = self.shared.settings.lock().clone();
        let stats = self.stats();
        Ok(match name {
            "max-size-buffers" => PropValue::UInt(settings.max_size_buffers as u64),
            "max-size-bytes" => PropValue::UInt(settings.max_size_bytes as u64),
            "leaky" => PropValue::Str(settings.leaky.nick().to_owned()),
            "current-level-buffers" => PropValue::UInt(stats.current_buffers as u64),
            "current-level-bytes" => PropValue::UInt(stats.current_bytes as u64),
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        })
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.shared.set_flushing(true);
        self.stop_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn ready_queue(settings: QueueSettings) -> Queue {
        let queue = Queue::new(settings);
        queue.shared.set_flushing(false);
        queue
    }

    fn pop_buffer(queue: &Queue) -> Buffer {
        match queue.shared.pop().unwrap() {
            QueueItem::Buffer(buffer) => buffer,
            QueueItem::Event(event) => panic!("unexpected event {event:?}"),
        }
    }

    #[test]
    fn test_fifo_order_with_events() {
        let queue = ready_queue(QueueSettings::default());
        queue.shared.push_buffer(Buffer::from_slice(b"a")).unwrap();
        assert!(queue.shared.push_event(Event::StreamStart("s".into())));
        queue.shared.push_buffer(Buffer::from_slice(b"b")).unwrap();
        assert_eq!(queue.stats().current_buffers, 2);

        assert_eq!(pop_buffer(&queue).data(), b"a");
        assert!(matches!(queue.shared.pop(), Ok(QueueItem::Event(Event::StreamStart(_)))));
        assert_eq!(pop_buffer(&queue).data(), b"b");
        assert_eq!(queue.stats().total_popped, 2);
    }

    #[test]
    fn test_leaky_upstream_drops_incoming() {
        let queue = ready_queue(QueueSettings {
            max_size_buffers: 2,
            leaky: Leaky::Upstream,
            ..QueueSettings::default()
        });
        for byte in [b"0", b"1", b"2"] {
            queue.shared.push_buffer(Buffer::from_slice(byte)).unwrap();
        }
        assert_eq!(queue.stats().current_buffers, 2);
        assert_eq!(queue.stats().total_dropped, 1);
        assert_eq!(pop_buffer(&queue).data(), b"0");
    }

    #[test]
    fn test_leaky_downstream_drops_oldest() {
        let queue = ready_queue(QueueSettings {
            max_size_buffers: 2,
            leaky: Leaky::Downstream,
            ..QueueSettings::default()
        });
        for byte in [b"0", b"1", b"2"] {
            queue.shared.push_buffer(Buffer::from_slice(byte)).unwrap();
        }
        assert_eq!(queue.stats().total_dropped, 1);
        assert_eq!(pop_buffer(&queue).data(), b"1");
    }

    #[test]
    fn test_byte_limit_blocks_until_popped() {
        let queue = Arc::new(ready_queue(QueueSettings {
            max_size_buffers: 0,
            max_size_bytes: 8,
            leaky: Leaky::No,
        }));
        queue.shared.push_buffer(Buffer::with_size(8)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.shared.push_buffer(Buffer::with_size(4)))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.stats().current_buffers, 1);
        pop_buffer(&queue);
        assert_eq!(producer.join().unwrap(), Ok(FlowSuccess::Ok));
        assert_eq!(queue.stats().current_bytes, 4);
    }

    #[test]
    fn test_flush_wakes_blocked_pull() {
        let queue = Element::new("q", Queue::default());
        let sink = queue.static_pad("sink").unwrap();
        let src = queue.static_pad("src").unwrap();
        assert!(sink.activate_mode(PadMode::Push));
        assert!(src.activate_mode(PadMode::Pull));

        let puller = {
            let src = src.clone();
            thread::spawn(move || {
                let result = src.get_range(0, 16);
                (result, Instant::now())
            })
        };
        thread::sleep(Duration::from_millis(50));
        let flushed_at = Instant::now();
        assert!(sink.send_event(Event::FlushStart));
        let (result, returned_at) = puller.join().unwrap();
        assert_eq!(result.unwrap_err(), FlowError::Flushing);
        assert!(returned_at.duration_since(flushed_at) < Duration::from_secs(1));
    }

    #[test]
    fn test_downstream_flush_wakes_blocked_pull() {
        let queue = Element::new("q", Queue::default());
        let sink = queue.static_pad("sink").unwrap();
        let src = queue.static_pad("src").unwrap();
        assert!(sink.activate_mode(PadMode::Push));
        assert!(src.activate_mode(PadMode::Pull));

        let puller = {
            let src = src.clone();
            thread::spawn(move || {
                let result = src.get_range(0, 16);
                (result, Instant::now())
            })
        };
        thread::sleep(Duration::from_millis(50));
        let flushed_at = Instant::now();
        assert!(src.send_event(Event::FlushStart));
        let (result, returned_at) = puller.join().unwrap();
        assert_eq!(result.unwrap_err(), FlowError::Flushing);
        assert!(returned_at.duration_since(flushed_at) < Duration::from_secs(1));

        // Pulling resumes once the flush ends.
        assert!(src.send_event(Event::FlushStop));
        let imp = queue.imp::<Queue>().unwrap();
        imp.shared.push_buffer(Buffer::from_slice(b"after")).unwrap();
        assert_eq!(src.get_range(0, 16).unwrap().data(), b"after");
    }

    #[test]
    fn test_src_answers_scheduling() {
        let queue = Element::new("q", Queue::default());
        let mut query = Query::Scheduling { pull: false };
        assert!(queue.static_pad("src").unwrap().query(&mut query));
        assert!(matches!(query, Query::Scheduling { pull: true }));
        assert!(!queue.static_pad("sink").unwrap().query(&mut Query::Scheduling { pull: false }));
    }

    #[test]
    fn test_level_properties() {
        let queue = Element::new("q", Queue::default());
        queue.set_property("leaky", "downstream").unwrap();
        queue.set_property("max-size-buffers", 5u64).unwrap();
        assert_eq!(queue.property("leaky").unwrap(), PropValue::Str("downstream".into()));
        assert_eq!(queue.property("max-size-buffers").unwrap(), PropValue::UInt(5));
        assert_eq!(queue.property("current-level-buffers").unwrap(), PropValue::UInt(0));
        assert!(queue.set_property("leaky", "sideways").is_err());
    }
}
