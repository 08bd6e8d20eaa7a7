//! `identity`: passes buffers through unchanged.
//!
//! Proxies caps and queries between its pads, works in push and pull mode,
//! and can be told to fail after a number of buffers to exercise error
//! propagation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{
    Element, ElementImpl, Pad, PadDirection, PadMode, PadTemplate, PropValue, PropertyKind,
    PropertySpec, PropertyTable, StateChange, StateChangeResult, StateChangeSuccess,
};
use crate::error::{ElementError, ErrorDomain, PropertyError};
use crate::event::Query;
use crate::flow::{FlowError, FlowResult};

/// Configuration of an [`Identity`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentitySettings {
    /// Fail with ERROR on this buffer (1-based); -1 never fails.
    pub error_after: i64,
    /// Sleep this long per buffer.
    pub sleep_time: Duration,
    /// Copy every buffer instead of forwarding the reference.
    pub copy: bool,
}

impl IdentitySettings {
    fn new() -> Self {
        Self {
            error_after: -1,
            ..Self::default()
        }
    }
}

/// Pass-through element.
pub struct Identity {
    settings: Mutex<IdentitySettings>,
    processed: AtomicU64,
}

impl Default for Identity {
    fn default() -> Self {
        Self::new(IdentitySettings::new())
    }
}

const PROPERTIES: &[PropertySpec] = &[
    PropertySpec::new(
        "error-after",
        "Error after N buffers (-1 = never)",
        PropertyKind::Int { min: -1, max: i64::MAX },
    ),
    PropertySpec::new(
        "sleep-time",
        "Microseconds to sleep between processing",
        PropertyKind::UInt { min: 0, max: u32::MAX as u64 },
    ),
    PropertySpec::new("copy", "Copy buffers instead of forwarding them", PropertyKind::Bool),
    PropertySpec::read_only(
        "processed",
        "Buffers seen since READY→PAUSED",
        PropertyKind::UInt { min: 0, max: u64::MAX },
    ),
];

impl Identity {
    /// Identity with the given settings.
    pub fn new(settings: IdentitySettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            processed: AtomicU64::new(0),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> IdentitySettings {
        self.settings.lock().clone()
    }

    /// Replace the settings.
    pub fn set_settings(&self, settings: IdentitySettings) {
        *self.settings.lock() = settings;
    }

    /// Buffers handled since the last READY→PAUSED.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    fn other_pad(element: &Element, pad: &Pad) -> Option<Pad> {
        match pad.direction() {
            PadDirection::Sink => element.static_pad("src"),
            PadDirection::Src => element.static_pad("sink"),
        }
    }

    /// Count and delay one buffer; returns it unchanged or copied.
    fn handle(&self, element: &Element, buffer: Buffer) -> Result<Buffer, FlowError> {
        let settings = self.settings.lock().clone();
        let count = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
        if settings.error_after >= 0 && count >= settings.error_after as u64 {
            element.post_error(
                ElementError::new(ErrorDomain::Core, "Failed because of \"error-after\" property")
                    .with_debug(format!("buffer {count}")),
            );
            return Err(FlowError::Error);
        }
        if !settings.sleep_time.is_zero() {
            std::thread::sleep(settings.sleep_time);
        }
        trace!(element = %element.name(), count, len = buffer.len(), "pass-through");
        Ok(if settings.copy { buffer.copy_deep() } else { buffer })
    }
}

impl ElementImpl for Identity {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::sink(Caps::new_any()),
            PadTemplate::src(Caps::new_any()),
        ]
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeResult {
        if transition == StateChange::ReadyToPaused {
            self.processed.store(0, Ordering::Release);
        }
        Ok(StateChangeSuccess::Success)
    }

    fn get_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        pad.proxy_caps(filter)
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        let buffer = self.handle(element, buffer)?;
        let src = element.static_pad("src").ok_or(FlowError::NotLinked)?;
        src.push(buffer)
    }

    fn get_range(
        &self,
        element: &Element,
        _pad: &Pad,
        offset: u64,
        length: usize,
    ) -> Result<Buffer, FlowError> {
        let sink = element.static_pad("sink").ok_or(FlowError::NotLinked)?;
        let buffer = sink.pull_range(offset, length)?;
        self.handle(element, buffer)
    }

    fn sink_activation_mode(&self, _element: &Element, pad: &Pad) -> PadMode {
        // Pull mode was already chosen by downstream through the src pad.
        match pad.parent().and_then(|el| el.static_pad("src")) {
            Some(src) if src.mode() == PadMode::Pull => PadMode::Pull,
            _ => PadMode::Push,
        }
    }

    fn activate_pad(&self, element: &Element, pad: &Pad, mode: PadMode) -> bool {
        if pad.direction() != PadDirection::Src || mode != PadMode::Pull {
            return true;
        }
        // Downstream pulls through us: upstream must serve pulls as well.
        let Some(sink) = element.static_pad("sink") else {
            return false;
        };
        let activated = sink
            .peer()
            .is_some_and(|peer| peer.activate_mode(PadMode::Pull))
            && sink.activate_mode(PadMode::Pull);
        debug!(element = %element.name(), activated, "pull mode through identity");
        activated
    }

    fn query(&self, element: &Element, pad: &Pad, query: &mut Query) -> bool {
        match query {
            Query::Scheduling { .. } => Self::other_pad(element, pad)
                .is_some_and(|other| other.peer_query(query)),
            _ => pad.query_default(query),
        }
    }

    fn properties(&self) -> Option<&dyn PropertyTable> {
        Some(self)
    }
}

impl PropertyTable for Identity {
    fn property_specs(&self) -> &'static [PropertySpec] {
        PROPERTIES
    }

    fn apply_property(&self, name: &str, value: PropValue) -> Result<(), PropertyError> {
        let mut settings = self.settings.lock();
        match (name, value) {
            ("error-after", PropValue::Int(v)) => settings.error_after = v,
            ("sleep-time", PropValue::UInt(v)) => settings.sleep_time = Duration::from_micros(v),
            ("copy", PropValue::Bool(v)) => settings.copy = v,
            (name, _) => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<PropValue, PropertyError> {
        let settings = self.settings.lock();
        Ok(match name {
            "error-after" => PropValue::Int(settings.error_after),
            "sleep-time" => PropValue::UInt(settings.sleep_time.as_micros() as u64),
            "copy" => PropValue::Bool(settings.copy),
            "processed" => PropValue::UInt(self.processed()),
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let identity = Element::new("id", Identity::default());
        assert_eq!(identity.property("error-after").unwrap(), PropValue::Int(-1));
        assert_eq!(identity.property("sleep-time").unwrap(), PropValue::UInt(0));
        identity.set_property("sleep-time", 250u64).unwrap();
        assert_eq!(
            identity.imp::<Identity>().unwrap().settings().sleep_time,
            Duration::from_micros(250)
        );
    }

    #[test]
    fn test_error_after() {
        let identity = Element::new("id", Identity::default());
        identity.set_property("error-after", 2).unwrap();
        let imp = identity.imp::<Identity>().unwrap();
        assert!(imp.handle(&identity, Buffer::with_size(1)).is_ok());
        assert_eq!(
            imp.handle(&identity, Buffer::with_size(1)).unwrap_err(),
            FlowError::Error
        );
    }

    #[test]
    fn test_copy_makes_new_buffer() {
        let identity = Element::new("id", Identity::default());
        identity.set_property("copy", true).unwrap();
        let imp = identity.imp::<Identity>().unwrap();
        let input = Buffer::from_slice(b"abc");
        let output = imp.handle(&identity, input.clone()).unwrap();
        assert!(!output.ptr_eq(&input));
        assert_eq!(output.data(), b"abc");
    }

    #[test]
    fn test_caps_proxied_from_peer() {
        use crate::elements::FakeSrc;

        let src = Element::new("src", FakeSrc::default());
        let caps = Caps::builder("audio/x-raw").field("rate", 8000).build();
        src.set_property("caps", caps.clone()).unwrap();
        let identity = Element::new("id", Identity::default());
        src.link(&identity).unwrap();
        assert_eq!(identity.static_pad("src").unwrap().query_caps(None), caps);
    }
}
