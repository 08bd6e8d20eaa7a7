//! `tee`: fans one stream out to any number of request pads.
//!
//! Every branch receives a reference to the same buffer; branch results are
//! folded with a [`FlowCombiner`] so one unlinked or finished branch does not
//! stop the others.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{
    Element, ElementImpl, Pad, PadDirection, PadPresence, PadTemplate, PropValue, PropertyKind,
    PropertySpec, PropertyTable, StateChange, StateChangeResult, StateChangeSuccess,
};
use crate::error::PropertyError;
use crate::event::Event;
use crate::flow::{FlowCombiner, FlowError, FlowResult, FlowSuccess};

const PROPERTIES: &[PropertySpec] = &[
    PropertySpec::new(
        "allow-not-linked",
        "Return OK even when no branch is linked",
        PropertyKind::Bool,
    ),
    PropertySpec::read_only(
        "num-src-pads",
        "Number of requested src pads",
        PropertyKind::UInt { min: 0, max: u64::MAX },
    ),
    PropertySpec::read_only(
        "buffers-pushed",
        "Buffers fanned out since READY→PAUSED",
        PropertyKind::UInt { min: 0, max: u64::MAX },
    ),
];

/// Fan-out element with `src_%u` request pads.
#[derive(Default)]
pub struct Tee {
    combiner: Mutex<FlowCombiner>,
    allow_not_linked: Mutex<bool>,
    pushed: AtomicU64,
}

impl Tee {
    /// Create a tee with no branches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers handled since the last READY→PAUSED.
    pub fn buffers_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Acquire)
    }
}

impl ElementImpl for Tee {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::sink(Caps::new_any()),
            PadTemplate::new("src_%u", PadDirection::Src, PadPresence::Request, Caps::new_any()),
        ]
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeResult {
        if transition == StateChange::ReadyToPaused {
            self.pushed.store(0, Ordering::Release);
            self.combiner.lock().reset();
        }
        Ok(StateChangeSuccess::Success)
    }

    fn get_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        pad.proxy_caps(filter)
    }

    fn request_new_pad(
        &self,
        element: &Element,
        template: &PadTemplate,
        name: Option<&str>,
    ) -> Option<Pad> {
        let name = name.map_or_else(|| element.next_pad_name(template), str::to_owned);
        if element.static_pad(&name).is_some() {
            return None;
        }
        let pad = Pad::from_template(template, name);
        self.combiner.lock().add_pad(pad.name());
        debug!(element = %element.name(), pad = %pad.name(), "branch requested");
        Some(pad)
    }

    fn release_pad(&self, element: &Element, pad: &Pad) {
        self.combiner.lock().remove_pad(pad.name());
        debug!(element = %element.name(), pad = %pad.name(), "branch released");
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        let branches = element.src_pads();
        let allow_not_linked = *self.allow_not_linked.lock();
        if branches.is_empty() {
            return if allow_not_linked { Ok(FlowSuccess::Ok) } else { Err(FlowError::NotLinked) };
        }
        self.pushed.fetch_add(1, Ordering::AcqRel);

        let mut combined = Ok(FlowSuccess::Ok);
        for branch in &branches {
            let result = branch.push(buffer.clone());
            trace!(element = %element.name(), pad = %branch.name(), ?result, "branch pushed");
            combined = self.combiner.lock().update(branch.name(), result);
            if matches!(combined, Err(err) if err.is_fatal() || err == FlowError::Flushing) {
                return combined;
            }
        }
        match combined {
            Err(FlowError::NotLinked) if allow_not_linked => Ok(FlowSuccess::Ok),
            other => other,
        }
    }

    fn sink_event(&self, _element: &Element, pad: &Pad, event: Event) -> bool {
        if matches!(event, Event::FlushStop) {
            self.combiner.lock().reset();
        }
        pad.event_default(event)
    }

    fn properties(&self) -> Option<&dyn PropertyTable> {
        Some(self)
    }
}

impl PropertyTable for Tee {
    fn property_specs(&self) -> &'static [PropertySpec] {
        PROPERTIES
    }

    fn apply_property(&self, name: &str, value: PropValue) -> Result<(), PropertyError> {
        match (name, value) {
            ("allow-not-linked", PropValue::Bool(v)) => *self.allow_not_linked.lock() = v,
            (name, _) => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<PropValue, PropertyError> {
        Ok(match name {
            "allow-not-linked" => PropValue::Bool(*self.allow_not_linked.lock()),
            "num-src-pads" => PropValue::UInt(self.combiner.lock().len() as u64),
            "buffers-pushed" => PropValue::UInt(self.buffers_pushed()),
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_and_release() {
        let tee = Element::new("tee", Tee::new());
        let a = tee.request_pad("src_%u", None).unwrap();
        let b = tee.request_pad("src_%u", None).unwrap();
        assert_eq!(a.name(), "src_0");
        assert_eq!(b.name(), "src_1");
        assert_eq!(tee.property("num-src-pads").unwrap(), PropValue::UInt(2));

        let named = tee.request_pad("src_%u", Some("src_video")).unwrap();
        assert_eq!(named.name(), "src_video");
        assert!(tee.request_pad("src_%u", Some("src_video")).is_none());

        tee.release_request_pad(&a).unwrap();
        assert!(tee.static_pad("src_0").is_none());
        assert_eq!(tee.src_pads().len(), 2);
        assert_eq!(tee.property("num-src-pads").unwrap(), PropValue::UInt(2));
    }

    #[test]
    fn test_sink_is_not_requestable() {
        let tee = Element::new("tee", Tee::new());
        assert!(tee.request_pad("sink", None).is_none());
    }

    #[test]
    fn test_chain_without_branches() {
        let tee = Element::new("tee", Tee::new());
        let sink = tee.static_pad("sink").unwrap();
        let imp = tee.imp::<Tee>().unwrap();
        assert_eq!(
            imp.chain(&tee, &sink, Buffer::with_size(8)),
            Err(FlowError::NotLinked)
        );

        tee.set_property("allow-not-linked", true).unwrap();
        assert_eq!(imp.chain(&tee, &sink, Buffer::with_size(8)), Ok(FlowSuccess::Ok));
        assert_eq!(imp.buffers_pushed(), 0);
    }
}
