//! `fakesink`: swallows buffers.
//!
//! The sink prerolls: READY→PAUSED completes asynchronously once the first
//! buffer (or EOS) arrives, and the streaming thread then waits until the
//! element is PLAYING before rendering further data. Reaching EOS posts an
//! `Eos` message to the bin. With `can-activate-pull` the sink drives the
//! pipeline itself, pulling `blocksize` bytes at a time from upstream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::bus::{Message, MessageView};
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{
    Element, ElementImpl, Pad, PadMode, PadTemplate, PropValue, PropertyKind, PropertySpec,
    PropertyTable, StateChange, StateChangeResult, StateChangeSuccess, WeakElement,
};
use crate::error::{ElementError, ErrorDomain, PropertyError};
use crate::event::Event;
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::observability::SinkMetrics;
use crate::task::{Task, TaskLoop};

/// Called with every rendered buffer.
pub type HandoffFn = Arc<dyn Fn(&Element, &Buffer) + Send + Sync>;

/// Configuration of a [`FakeSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct FakeSinkSettings {
    /// Complete READY→PAUSED only once a buffer arrived.
    pub async_preroll: bool,
    /// Wait for each buffer's running time on the pipeline clock.
    pub sync: bool,
    /// Return EOS after this many buffers; -1 for unlimited.
    pub num_buffers: i64,
    /// Drive the pipeline in pull mode when upstream allows it.
    pub can_activate_pull: bool,
    /// Bytes requested per pull.
    pub blocksize: usize,
}

impl Default for FakeSinkSettings {
    fn default() -> Self {
        Self {
            async_preroll: true,
            sync: false,
            num_buffers: -1,
            can_activate_pull: false,
            blocksize: 4096,
        }
    }
}

#[derive(Debug, Default)]
struct SinkState {
    prerolled: bool,
    playing: bool,
    flushing: bool,
    eos: bool,
}

struct Shared {
    settings: Mutex<FakeSinkSettings>,
    state: Mutex<SinkState>,
    cond: Condvar,
    rendered: AtomicU64,
    bytes: AtomicU64,
    metrics: Mutex<Option<SinkMetrics>>,
    handoff: Mutex<Option<HandoffFn>>,
}

/// Sink that discards everything it receives.
pub struct FakeSink {
    shared: Arc<Shared>,
    task: Mutex<Option<Task>>,
}

impl Default for FakeSink {
    fn default() -> Self {
        Self::new(FakeSinkSettings::default())
    }
}

const PROPERTIES: &[PropertySpec] = &[
    PropertySpec::new("async", "Go asynchronously to PAUSED", PropertyKind::Bool),
    PropertySpec::new("sync", "Sync on the clock", PropertyKind::Bool),
    PropertySpec::new(
        "num-buffers",
        "Number of buffers to accept going EOS (-1 = unlimited)",
        PropertyKind::Int { min: -1, max: i64::MAX },
    ),
    PropertySpec::new(
        "can-activate-pull",
        "Can activate in pull mode",
        PropertyKind::Bool,
    ),
    PropertySpec::new(
        "blocksize",
        "Size in bytes to pull per buffer",
        PropertyKind::UInt { min: 1, max: u32::MAX as u64 },
    ),
    PropertySpec::read_only(
        "buffers-received",
        "Number of buffers rendered",
        PropertyKind::UInt { min: 0, max: u64::MAX },
    ),
];

impl FakeSink {
    /// Sink with the given settings.
    pub fn new(settings: FakeSinkSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings: Mutex::new(settings),
                state: Mutex::new(SinkState {
                    flushing: true,
                    ..SinkState::default()
                }),
                cond: Condvar::new(),
                rendered: AtomicU64::new(0),
                bytes: AtomicU64::new(0),
                metrics: Mutex::new(None),
                handoff: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> FakeSinkSettings {
        self.shared.settings.lock().clone()
    }

    /// Replace the settings.
    pub fn set_settings(&self, settings: FakeSinkSettings) {
        *self.shared.settings.lock() = settings;
    }

    /// Buffers rendered since the last READY→PAUSED.
    pub fn buffer_count(&self) -> u64 {
        self.shared.rendered.load(Ordering::Acquire)
    }

    /// Bytes rendered since the last READY→PAUSED.
    pub fn byte_count(&self) -> u64 {
        self.shared.bytes.load(Ordering::Acquire)
    }

    /// Whether EOS was received since the last flush.
    pub fn is_eos(&self) -> bool {
        self.shared.state.lock().eos
    }

    /// Install a callback run on the streaming thread for every buffer.
    pub fn set_handoff<F>(&self, handoff: F)
    where
        F: Fn(&Element, &Buffer) + Send + Sync + 'static,
    {
        *self.shared.handoff.lock() = Some(Arc::new(handoff));
    }

    fn start_pull_task(&self, element: &Element, pad: &Pad) -> bool {
        let shared = Arc::clone(&self.shared);
        let weak = element.downgrade();
        let pad = pad.clone();
        let mut offset = 0u64;
        let task = Task::new(format!("{}:{}", element.name(), pad.name()), move || {
            pull_loop(&shared, &weak, &pad, &mut offset)
        });
        if let Err(err) = task.start() {
            warn!(element = %element.name(), error = %err, "could not start pull task");
            return false;
        }
        *self.task.lock() = Some(task);
        true
    }

    fn stop_task(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.join();
        }
    }
}

impl Shared {
    fn set_flushing(&self, flushing: bool) {
        let mut st = self.state.lock();
        st.flushing = flushing;
        if flushing {
            st.prerolled = false;
        } else {
            st.eos = false;
        }
        self.cond.notify_all();
    }

    /// Mark the sink prerolled; the first time this happens outside PLAYING
    /// the pending state step is completed from another thread.
    fn commit_preroll(&self, element: &Element, st: &mut SinkState) {
        if st.prerolled {
            return;
        }
        st.prerolled = true;
        if !st.playing {
            debug!(element = %element.name(), "prerolled");
            element.call_async(|el| {
                let _ = el.continue_state(Ok(StateChangeSuccess::Success));
            });
        }
    }

    /// Block while PAUSED.
    fn wait_playing<'a>(
        &self,
        mut st: MutexGuard<'a, SinkState>,
    ) -> Result<MutexGuard<'a, SinkState>, FlowError> {
        while !st.playing && !st.flushing {
            self.cond.wait(&mut st);
        }
        if st.flushing {
            return Err(FlowError::Flushing);
        }
        Ok(st)
    }

    fn wait_clock(&self, element: &Element, pts: ClockTime) -> Result<(), FlowError> {
        let Some(clock) = element.clock() else {
            return Ok(());
        };
        let target = element.base_time() + pts;
        loop {
            let now = clock.now();
            if now >= target {
                return Ok(());
            }
            let mut st = self.state.lock();
            if st.flushing {
                return Err(FlowError::Flushing);
            }
            if !st.playing {
                drop(self.wait_playing(st)?);
                continue;
            }
            let wait: Duration = (target - now).into();
            self.cond.wait_for(&mut st, wait);
        }
    }

    fn render(&self, element: &Element, buffer: Buffer) -> FlowResult {
        let (sync, num_buffers) = {
            let settings = self.settings.lock();
            (settings.sync, settings.num_buffers)
        };
        {
            let mut st = self.state.lock();
            if st.flushing {
                return Err(FlowError::Flushing);
            }
            if st.eos {
                return Err(FlowError::Eos);
            }
            if !st.playing {
                self.commit_preroll(element, &mut st);
                drop(self.wait_playing(st)?);
            } else {
                st.prerolled = true;
            }
        }
        if sync && buffer.pts().is_some() {
            self.wait_clock(element, buffer.pts())?;
        }

        let count = self.rendered.fetch_add(1, Ordering::AcqRel) + 1;
        self.bytes.fetch_add(buffer.len() as u64, Ordering::AcqRel);
        self.metrics
            .lock()
            .get_or_insert_with(|| SinkMetrics::new(element.name()))
            .record(buffer.len());
        trace!(element = %element.name(), count, len = buffer.len(), pts = %buffer.pts(), "rendered");
        let handoff = self.handoff.lock().clone();
        if let Some(handoff) = handoff {
            handoff(element, &buffer);
        }

        if num_buffers >= 0 && count >= num_buffers as u64 {
            debug!(element = %element.name(), count, "buffer limit reached");
            return Err(FlowError::Eos);
        }
        Ok(FlowSuccess::Ok)
    }

    /// EOS counts as preroll; the message is posted once PLAYING.
    fn handle_eos(&self, element: &Element) -> bool {
        {
            let mut st = self.state.lock();
            if st.flushing {
                return false;
            }
            st.eos = true;
            if !st.playing {
                self.commit_preroll(element, &mut st);
            }
            match self.wait_playing(st) {
                Ok(st) => drop(st),
                Err(_) => return false,
            }
        }
        debug!(element = %element.name(), rendered = self.rendered.load(Ordering::Acquire), "eos");
        element.post_message(Message::new(element, MessageView::Eos));
        true
    }
}

fn pull_loop(shared: &Shared, weak: &WeakElement, pad: &Pad, offset: &mut u64) -> TaskLoop {
    let Some(element) = weak.upgrade() else {
        return TaskLoop::Stop;
    };
    let blocksize = shared.settings.lock().blocksize;
    match pad.pull_range(*offset, blocksize) {
        Ok(buffer) => {
            *offset += buffer.len() as u64;
            match shared.render(&element, buffer) {
                Ok(_) => TaskLoop::Continue,
                Err(FlowError::Eos) => {
                    shared.handle_eos(&element);
                    TaskLoop::Pause
                }
                Err(_) => TaskLoop::Pause,
            }
        }
        Err(FlowError::Eos) => {
            shared.handle_eos(&element);
            TaskLoop::Pause
        }
        Err(err @ (FlowError::Flushing | FlowError::WrongState)) => {
            trace!(element = %element.name(), %err, "pull task pausing");
            TaskLoop::Pause
        }
        Err(err) => {
            element.post_error(
                ElementError::new(ErrorDomain::Stream, "Internal data stream error")
                    .with_debug(format!("pull_range returned {err}")),
            );
            TaskLoop::Pause
        }
    }
}

impl ElementImpl for FakeSink {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink(Caps::new_any())]
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeResult {
        let shared = &self.shared;
        match transition {
            StateChange::ReadyToPaused => {
                shared.rendered.store(0, Ordering::Release);
                shared.bytes.store(0, Ordering::Release);
                let async_preroll = shared.settings.lock().async_preroll;
                let st = shared.state.lock();
                if st.prerolled || st.eos || !async_preroll {
                    return Ok(StateChangeSuccess::Success);
                }
                Ok(StateChangeSuccess::Async)
            }
            StateChange::PausedToPlaying => {
                let mut st = shared.state.lock();
                st.playing = true;
                st.prerolled = true;
                shared.cond.notify_all();
                Ok(StateChangeSuccess::Success)
            }
            StateChange::PlayingToPaused => {
                let mut st = shared.state.lock();
                st.playing = false;
                shared.cond.notify_all();
                let async_preroll = shared.settings.lock().async_preroll;
                if st.prerolled || st.eos || !async_preroll {
                    Ok(StateChangeSuccess::Success)
                } else {
                    Ok(StateChangeSuccess::Async)
                }
            }
            StateChange::PausedToReady => {
                let mut st = shared.state.lock();
                st.prerolled = false;
                st.eos = false;
                Ok(StateChangeSuccess::Success)
            }
            _ => Ok(StateChangeSuccess::Success),
        }
    }

    fn sink_activation_mode(&self, _element: &Element, _pad: &Pad) -> PadMode {
        if self.shared.settings.lock().can_activate_pull {
            PadMode::Pull
        } else {
            PadMode::Push
        }
    }

    fn activate_pad(&self, element: &Element, pad: &Pad, mode: PadMode) -> bool {
        match mode {
            PadMode::None => {
                self.shared.set_flushing(true);
                self.stop_task();
                true
            }
            PadMode::Push => {
                self.shared.set_flushing(false);
                true
            }
            PadMode::Pull => {
                self.shared.set_flushing(false);
                self.start_pull_task(element, pad)
            }
        }
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.shared.render(element, buffer)
    }

    fn sink_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        match event {
            Event::Eos => self.shared.handle_eos(element),
            Event::FlushStart => {
                self.shared.set_flushing(true);
                true
            }
            Event::FlushStop => {
                self.shared.set_flushing(false);
                true
            }
            other => pad.event_default(other),
        }
    }

    fn properties(&self) -> Option<&dyn PropertyTable> {
        Some(self)
    }
}

impl PropertyTable for FakeSink {
    fn property_specs(&self) -> &'static [PropertySpec] {
        PROPERTIES
    }

    fn apply_property(&self, name: &str, value: PropValue) -> Result<(), PropertyError> {
        let mut settings = self.shared.settings.lock();
        match (name, value) {
            ("async", PropValue::Bool(v)) => settings.async_preroll = v,
            ("sync", PropValue::Bool(v)) => settings.sync = v,
            ("num-buffers", PropValue::Int(v)) => settings.num_buffers = v,
            ("can-activate-pull", PropValue::Bool(v)) => settings.can_activate_pull = v,
            ("blocksize", PropValue::UInt(v)) => settings.blocksize = v as usize,
            (name, _) => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<PropValue, PropertyError> {
        let settings = self.shared.settings.lock();
        Ok(match name {
            "async" => PropValue::Bool(settings.async_preroll),
            "sync" => PropValue::Bool(settings.sync),
            "num-buffers" => PropValue::Int(settings.num_buffers),
            "can-activate-pull" => PropValue::Bool(settings.can_activate_pull),
            "blocksize" => PropValue::UInt(settings.blocksize as u64),
            "buffers-received" => PropValue::UInt(self.buffer_count()),
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        })
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.shared.set_flushing(true);
        self.stop_task();
    }
}
