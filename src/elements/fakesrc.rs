//! `fakesrc`: produces empty or patterned buffers.
//!
//! In push mode a streaming task pushes `num-buffers` buffers of `size`
//! bytes and then EOS. In pull mode the element answers `get_range` for any
//! offset until `num-buffers` ranges were served. A live source only
//! produces while PLAYING and returns `NoPreroll` when paused.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{
    Element, ElementImpl, Pad, PadMode, PadTemplate, PropValue, PropertyKind, PropertySpec,
    PropertyTable, StateChange, StateChangeResult, StateChangeSuccess, WeakElement,
};
use crate::error::{ElementError, ErrorDomain, PropertyError};
use crate::event::{Event, Format, Query, SeekEvent, Segment};
use crate::flow::FlowError;
use crate::task::{Task, TaskLoop};

/// How buffer memory is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillType {
    /// Zeroed bytes.
    #[default]
    Zero,
    /// Incrementing byte pattern (`offset % 256`).
    Pattern,
}

impl FillType {
    const NICKS: &'static [&'static str] = &["zero", "pattern"];

    fn nick(self) -> &'static str {
        match self {
            FillType::Zero => "zero",
            FillType::Pattern => "pattern",
        }
    }

    fn from_nick(nick: &str) -> Option<Self> {
        match nick {
            "zero" => Some(FillType::Zero),
            "pattern" => Some(FillType::Pattern),
            _ => None,
        }
    }
}

/// Configuration of a [`FakeSrc`].
#[derive(Debug, Clone, PartialEq)]
pub struct FakeSrcSettings {
    /// Buffers to produce before EOS; -1 for unlimited.
    pub num_buffers: i64,
    /// Bytes per pushed buffer.
    pub size: usize,
    /// Fixed output format; ANY when unset.
    pub caps: Option<Caps>,
    /// Buffer contents.
    pub filltype: FillType,
    /// Only produce data in PLAYING, timestamped with running time.
    pub is_live: bool,
    /// Serve pull requests.
    pub can_activate_pull: bool,
    /// Duration stamped on every buffer; NONE leaves buffers untimed.
    pub buffer_duration: ClockTime,
}

impl Default for FakeSrcSettings {
    fn default() -> Self {
        Self {
            num_buffers: -1,
            size: 4096,
            caps: None,
            filltype: FillType::Zero,
            is_live: false,
            can_activate_pull: true,
            buffer_duration: ClockTime::NONE,
        }
    }
}

#[derive(Debug, Default)]
struct Position {
    buffers: u64,
    bytes: u64,
    need_stream_start: bool,
    need_segment: bool,
}

#[derive(Debug, Default)]
struct LiveState {
    playing: bool,
    flushing: bool,
}

struct Shared {
    settings: Mutex<FakeSrcSettings>,
    /// Held by the streaming task for a whole iteration, so a seek can wait
    /// for the iteration in flight to finish.
    stream_lock: Mutex<()>,
    position: Mutex<Position>,
    live: Mutex<LiveState>,
    live_cond: Condvar,
}

/// Source of dummy buffers.
pub struct FakeSrc {
    shared: Arc<Shared>,
    task: Mutex<Option<Task>>,
}

impl Default for FakeSrc {
    fn default() -> Self {
        Self::new(FakeSrcSettings::default())
    }
}

const PROPERTIES: &[PropertySpec] = &[
    PropertySpec::new(
        "num-buffers",
        "Number of buffers to output before sending EOS (-1 = unlimited)",
        PropertyKind::Int { min: -1, max: i64::MAX },
    ),
    PropertySpec::new(
        "size",
        "Size of each pushed buffer in bytes",
        PropertyKind::UInt { min: 0, max: u32::MAX as u64 },
    ),
    PropertySpec::new("caps", "Output format", PropertyKind::Caps),
    PropertySpec::new("filltype", "How to fill the buffers", PropertyKind::Enum(FillType::NICKS)),
    PropertySpec::new("is-live", "Act as a live source", PropertyKind::Bool),
    PropertySpec::new("can-activate-pull", "Can operate in pull mode", PropertyKind::Bool),
    PropertySpec::new(
        "buffer-duration",
        "Duration of each buffer in nanoseconds (u64::MAX = untimed)",
        PropertyKind::UInt { min: 0, max: u64::MAX },
    ),
];

impl FakeSrc {
    /// Source with the given settings.
    pub fn new(settings: FakeSrcSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings: Mutex::new(settings),
                stream_lock: Mutex::new(()),
                position: Mutex::new(Position::default()),
                live: Mutex::new(LiveState {
                    flushing: true,
                    ..LiveState::default()
                }),
                live_cond: Condvar::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> FakeSrcSettings {
        self.shared.settings.lock().clone()
    }

    /// Replace the settings.
    pub fn set_settings(&self, settings: FakeSrcSettings) {
        *self.shared.settings.lock() = settings;
    }

    /// Buffers produced since the last start or seek.
    pub fn buffers_produced(&self) -> u64 {
        self.shared.position.lock().buffers
    }

    fn start_task(&self, element: &Element, pad: &Pad) -> bool {
        let mut slot = self.task.lock();
        if let Some(task) = slot.as_ref() {
            return task.start().is_ok();
        }
        let shared = Arc::clone(&self.shared);
        let weak = element.downgrade();
        let src = pad.clone();
        let task = Task::new(format!("{}:{}", element.name(), pad.name()), move || {
            push_loop(&shared, &weak, &src)
        });
        if let Err(err) = task.start() {
            warn!(element = %element.name(), error = %err, "could not start streaming task");
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

    fn set_flushing(&self, flushing: bool) {
        let mut live = self.shared.live.lock();
        live.flushing = flushing;
        self.shared.live_cond.notify_all();
    }

    fn do_seek(&self, element: &Element, pad: &Pad, seek: SeekEvent) -> bool {
        if !matches!(seek.format, Format::Buffers | Format::Bytes) {
            debug!(element = %element.name(), format = ?seek.format, "unsupported seek format");
            return false;
        }
        if seek.flush {
            pad.push_event(Event::FlushStart);
            self.set_flushing(true);
        }
        // Parked before taking the stream lock, so the iteration in flight
        // cannot pause the task again after the restart below.
        if let Some(task) = self.task.lock().as_ref() {
            task.pause();
        }
        let _stream = self.shared.stream_lock.lock();
        {
            let size = self.shared.settings.lock().size.max(1) as u64;
            let mut pos = self.shared.position.lock();
            let buffers = match seek.format {
                Format::Bytes => seek.start / size,
                _ => seek.start,
            };
            pos.buffers = buffers;
            pos.bytes = buffers * size;
            pos.need_segment = true;
            debug!(element = %element.name(), buffers, "seek");
        }
        if seek.flush {
            self.set_flushing(false);
            pad.push_event(Event::FlushStop);
        }
        if pad.mode() == PadMode::Push {
            return self.start_task(element, pad);
        }
        true
    }
}

impl Shared {
    /// Wait until PLAYING for live sources. False when flushing.
    fn wait_live(&self) -> bool {
        let mut live = self.live.lock();
        while !live.playing && !live.flushing {
            self.live_cond.wait(&mut live);
        }
        !live.flushing
    }

    fn make_buffer(&self, settings: &FakeSrcSettings, offset: u64, size: usize) -> Buffer {
        let mut buffer = Buffer::with_size(size);
        if settings.filltype == FillType::Pattern {
            for (i, byte) in buffer.data_mut().iter_mut().enumerate() {
                *byte = ((offset + i as u64) % 256) as u8;
            }
        }
        buffer.set_offsets(offset, offset + size as u64);
        buffer
    }

    fn exhausted(settings: &FakeSrcSettings, pos: &Position) -> bool {
        settings.num_buffers >= 0 && pos.buffers >= settings.num_buffers as u64
    }
}

fn push_loop(shared: &Shared, weak: &WeakElement, src: &Pad) -> TaskLoop {
    let Some(element) = weak.upgrade() else {
        return TaskLoop::Stop;
    };
    let settings = shared.settings.lock().clone();
    if settings.is_live && !shared.wait_live() {
        return TaskLoop::Pause;
    }

    let _stream = shared.stream_lock.lock();
    let (stream_start, segment, index, offset) = {
        let mut pos = shared.position.lock();
        if Shared::exhausted(&settings, &pos) {
            debug!(element = %element.name(), buffers = pos.buffers, "all buffers produced, sending eos");
            drop(pos);
            src.push_event(Event::Eos);
            return TaskLoop::Pause;
        }
        let stream_start = std::mem::take(&mut pos.need_stream_start);
        let segment = std::mem::take(&mut pos.need_segment);
        let current = (pos.buffers, pos.bytes);
        pos.buffers += 1;
        pos.bytes += settings.size as u64;
        (stream_start, segment, current.0, current.1)
    };
    if stream_start {
        src.push_event(Event::StreamStart(element.name().to_owned()));
    }
    if segment {
        src.push_event(Event::Segment(Segment::new(Format::Bytes, offset)));
    }

    let mut buffer = shared.make_buffer(&settings, offset, settings.size);
    if settings.is_live {
        buffer.set_pts(element.running_time());
    } else if settings.buffer_duration.is_some() {
        buffer.set_pts(ClockTime::from_nanos(
            index.saturating_mul(settings.buffer_duration.nanos()),
        ));
    }
    buffer.set_duration(settings.buffer_duration);

    match src.push(buffer) {
        Ok(_) => TaskLoop::Continue,
        Err(err @ (FlowError::Flushing | FlowError::WrongState)) => {
            trace!(element = %element.name(), %err, "streaming task pausing");
            TaskLoop::Pause
        }
        Err(FlowError::Eos) => {
            debug!(element = %element.name(), "downstream is eos");
            src.push_event(Event::Eos);
            TaskLoop::Pause
        }
        Err(err) => {
            element.post_error(
                ElementError::new(ErrorDomain::Stream, "Internal data stream error")
                    .with_debug(format!("streaming stopped, reason {err}")),
            );
            src.push_event(Event::Eos);
            TaskLoop::Pause
        }
    }
}

impl ElementImpl for FakeSrc {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src(Caps::new_any())]
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeResult {
        let is_live = self.shared.settings.lock().is_live;
        match transition {
            StateChange::ReadyToPaused | StateChange::PlayingToPaused if is_live => {
                self.shared.live.lock().playing = false;
                Ok(StateChangeSuccess::NoPreroll)
            }
            StateChange::PausedToPlaying => {
                let mut live = self.shared.live.lock();
                live.playing = true;
                self.shared.live_cond.notify_all();
                Ok(StateChangeSuccess::Success)
            }
            StateChange::PlayingToPaused => {
                self.shared.live.lock().playing = false;
                Ok(StateChangeSuccess::Success)
            }
            _ => Ok(StateChangeSuccess::Success),
        }
    }

    fn get_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        let fixed = self.shared.settings.lock().caps.clone();
        let caps = match fixed {
            Some(caps) => caps.intersect(&pad.template_caps()),
            None => pad.template_caps(),
        };
        match filter {
            Some(filter) => filter.intersect(&caps),
            None => caps,
        }
    }

    fn activate_pad(&self, element: &Element, pad: &Pad, mode: PadMode) -> bool {
        match mode {
            PadMode::None => {
                self.set_flushing(true);
                self.stop_task();
                true
            }
            PadMode::Push => {
                self.set_flushing(false);
                {
                    let mut pos = self.shared.position.lock();
                    *pos = Position {
                        need_stream_start: true,
                        need_segment: true,
                        ..Position::default()
                    };
                }
                self.start_task(element, pad)
            }
            PadMode::Pull => {
                let can_pull = self.shared.settings.lock().can_activate_pull;
                if can_pull {
                    self.set_flushing(false);
                    *self.shared.position.lock() = Position::default();
                }
                can_pull
            }
        }
    }

    fn get_range(
        &self,
        element: &Element,
        _pad: &Pad,
        offset: u64,
        length: usize,
    ) -> Result<Buffer, FlowError> {
        let settings = self.shared.settings.lock().clone();
        let mut pos = self.shared.position.lock();
        if Shared::exhausted(&settings, &pos) {
            trace!(element = %element.name(), offset, "pull past the last buffer");
            return Err(FlowError::Eos);
        }
        pos.buffers += 1;
        pos.bytes = offset + length as u64;
        Ok(self.shared.make_buffer(&settings, offset, length))
    }

    fn query(&self, _element: &Element, pad: &Pad, query: &mut Query) -> bool {
        let settings = self.shared.settings.lock().clone();
        match query {
            Query::Scheduling { pull } => {
                *pull = settings.can_activate_pull && !settings.is_live;
                true
            }
            Query::Position { format, result } => {
                let pos = self.shared.position.lock();
                *result = match format {
                    Format::Buffers => Some(pos.buffers),
                    Format::Bytes => Some(pos.bytes),
                    Format::Time => None,
                };
                result.is_some()
            }
            Query::Duration { format, result } => {
                let total = u64::try_from(settings.num_buffers).ok();
                *result = match format {
                    Format::Buffers => total,
                    Format::Bytes => total.map(|n| n * settings.size as u64),
                    Format::Time => total
                        .filter(|_| settings.buffer_duration.is_some())
                        .map(|n| n * settings.buffer_duration.nanos()),
                };
                result.is_some()
            }
            _ => pad.query_default(query),
        }
    }

    fn src_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        match event {
            Event::Seek(seek) => self.do_seek(element, pad, seek),
            Event::Reconfigure => true,
            other => {
                trace!(element = %element.name(), event = other.name(), "event ignored");
                false
            }
        }
    }

    fn properties(&self) -> Option<&dyn PropertyTable> {
        Some(self)
    }
}

impl PropertyTable for FakeSrc {
    fn property_specs(&self) -> &'static [PropertySpec] {
        PROPERTIES
    }

    fn apply_property(&self, name: &str, value: PropValue) -> Result<(), PropertyError> {
        let mut settings = self.shared.settings.lock();
        match (name, value) {
            ("num-buffers", PropValue::Int(v)) => settings.num_buffers = v,
            ("size", PropValue::UInt(v)) => settings.size = v as usize,
            ("caps", PropValue::Caps(v)) => settings.caps = Some(v),
            ("filltype", PropValue::Str(v)) => {
                settings.filltype =
                    FillType::from_nick(&v).ok_or_else(|| PropertyError::OutOfRange(name.to_owned()))?;
            }
            ("is-live", PropValue::Bool(v)) => settings.is_live = v,
            ("can-activate-pull", PropValue::Bool(v)) => settings.can_activate_pull = v,
            ("buffer-duration", PropValue::UInt(v)) => {
                settings.buffer_duration = ClockTime::from_nanos(v);
            }
            (name, _) => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<PropValue, PropertyError> {
        let settings = self.shared.settings.lock();
        Ok(match name {
            "num-buffers" => PropValue::Int(settings.num_buffers),
            "size" => PropValue::UInt(settings.size as u64),
            "caps" => PropValue::Caps(settings.caps.clone().unwrap_or_else(Caps::new_any)),
            "filltype" => PropValue::Str(settings.filltype.nick().to_owned()),
            "is-live" => PropValue::Bool(settings.is_live),
            "can-activate-pull" => PropValue::Bool(settings.can_activate_pull),
            "buffer-duration" => PropValue::UInt(settings.buffer_duration.nanos()),
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        })
    }
}

impl Drop for FakeSrc {
    fn drop(&mut self) {
        self.set_flushing(true);
        self.stop_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::State;

    #[test]
    fn test_pull_mode_serves_ranges() {
        let src = Element::new("src", FakeSrc::default());
        src.set_property("num-buffers", 2).unwrap();
        src.set_property("filltype", "pattern").unwrap();
        let pad = src.static_pad("src").unwrap();
        assert!(pad.activate_mode(PadMode::Pull));

        let buf = pad.get_range(10, 4).unwrap();
        assert_eq!(buf.data(), &[10, 11, 12, 13]);
        assert_eq!(buf.offset(), 10);
        assert_eq!(buf.offset_end(), 14);
        assert!(pad.get_range(14, 4).is_ok());
        assert_eq!(pad.get_range(18, 4).unwrap_err(), FlowError::Eos);
        assert!(pad.activate_mode(PadMode::None));
    }

    #[test]
    fn test_pull_refused_when_disabled() {
        let src = Element::new("src", FakeSrc::default());
        src.set_property("can-activate-pull", false).unwrap();
        let pad = src.static_pad("src").unwrap();
        assert!(!pad.activate_mode(PadMode::Pull));
        assert_eq!(pad.mode(), PadMode::None);

        let mut query = Query::Scheduling { pull: true };
        assert!(pad.query(&mut query));
        assert!(matches!(query, Query::Scheduling { pull: false }));
    }

    #[test]
    fn test_fixed_caps_property() {
        let src = Element::new("src", FakeSrc::default());
        let caps = Caps::builder("audio/x-raw").field("rate", 44100).build();
        src.set_property("caps", caps.clone()).unwrap();
        assert_eq!(src.static_pad("src").unwrap().query_caps(None), caps);
    }

    #[test]
    fn test_duration_query() {
        let src = Element::new("src", FakeSrc::default());
        src.set_property("num-buffers", 5).unwrap();
        src.set_property("size", 10u64).unwrap();
        let pad = src.static_pad("src").unwrap();
        let mut query = Query::duration(Format::Bytes);
        assert!(pad.query(&mut query));
        assert!(matches!(query, Query::Duration { result: Some(50), .. }));
    }

    #[test]
    fn test_live_source_does_not_preroll() {
        let src = Element::new("src", FakeSrc::default());
        src.set_property("is-live", true).unwrap();
        assert_eq!(src.set_state(State::Paused), Ok(StateChangeSuccess::NoPreroll));
        assert_eq!(src.set_state(State::Playing), Ok(StateChangeSuccess::Success));
        assert_eq!(src.set_state(State::Paused), Ok(StateChangeSuccess::NoPreroll));
        src.set_state(State::Null).unwrap();
    }
}
