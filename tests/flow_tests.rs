//! Push and pull data flow through the core elements.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use trellis::elements::{FakeSink, FakeSrc, Identity};
use trellis::event::SeekEvent;
use trellis::prelude::*;

use common::TIMEOUT;

fn fakesrc(num_buffers: i64) -> Element {
    let src = Element::new("src", FakeSrc::default());
    src.set_property("num-buffers", num_buffers).unwrap();
    src
}

fn sink_imp(sink: &Element) -> &FakeSink {
    sink.imp::<FakeSink>().unwrap()
}

fn build(elements: &[&Element]) -> Pipeline {
    common::test_log();
    let pipeline = Pipeline::new("p");
    pipeline.add_many(elements).unwrap();
    Element::link_many(elements).unwrap();
    pipeline
}

#[test]
fn test_push_through_identity() {
    let src = fakesrc(20);
    src.set_property("size", 64u64).unwrap();
    let identity = Element::new("id", Identity::default());
    let sink = Element::new("sink", FakeSink::default());
    let pipeline = build(&[&src, &identity, &sink]);

    let seen = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&seen);
    sink_imp(&sink).set_handoff(move |_, buffer| {
        counter.fetch_add(buffer.len() as u64, Ordering::SeqCst);
    });

    pipeline.set_state(State::Playing).unwrap();
    common::wait_for_eos(&pipeline.bus());
    assert_eq!(seen.load(Ordering::SeqCst), 20 * 64);
    assert_eq!(sink_imp(&sink).buffer_count(), 20);
    assert_eq!(sink_imp(&sink).byte_count(), 20 * 64);
    assert_eq!(identity.imp::<Identity>().unwrap().processed(), 20);
    assert_eq!(sink.static_pad("sink").unwrap().mode(), PadMode::Push);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_sink_drives_pull_mode() {
    let src = fakesrc(4);
    let sink = Element::new("sink", FakeSink::default());
    sink.set_property("can-activate-pull", true).unwrap();
    sink.set_property("blocksize", 100u64).unwrap();
    let pipeline = build(&[&src, &sink]);

    pipeline.set_state(State::Playing).unwrap();
    common::wait_for_eos(&pipeline.bus());
    assert_eq!(sink.static_pad("sink").unwrap().mode(), PadMode::Pull);
    assert_eq!(src.static_pad("src").unwrap().mode(), PadMode::Pull);
    assert_eq!(sink_imp(&sink).buffer_count(), 4);
    assert_eq!(sink_imp(&sink).byte_count(), 400);
    pipeline.set_state(State::Null).unwrap();
    assert_eq!(src.static_pad("src").unwrap().mode(), PadMode::None);
}

#[test]
fn test_pull_mode_through_identity() {
    let src = fakesrc(3);
    let identity = Element::new("id", Identity::default());
    let sink = Element::new("sink", FakeSink::default());
    sink.set_property("can-activate-pull", true).unwrap();
    let pipeline = build(&[&src, &identity, &sink]);

    pipeline.set_state(State::Playing).unwrap();
    common::wait_for_eos(&pipeline.bus());
    for pad in [
        src.static_pad("src").unwrap(),
        identity.static_pad("sink").unwrap(),
        identity.static_pad("src").unwrap(),
        sink.static_pad("sink").unwrap(),
    ] {
        assert_eq!(pad.mode(), PadMode::Pull, "{pad}");
    }
    assert_eq!(sink_imp(&sink).buffer_count(), 3);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_pull_falls_back_to_push() {
    let src = fakesrc(5);
    src.set_property("can-activate-pull", false).unwrap();
    let sink = Element::new("sink", FakeSink::default());
    sink.set_property("can-activate-pull", true).unwrap();
    let pipeline = build(&[&src, &sink]);

    pipeline.set_state(State::Playing).unwrap();
    common::wait_for_eos(&pipeline.bus());
    assert_eq!(sink.static_pad("sink").unwrap().mode(), PadMode::Push);
    assert_eq!(sink_imp(&sink).buffer_count(), 5);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_sink_buffer_limit_stops_upstream() {
    let src = fakesrc(-1);
    let sink = Element::new("sink", FakeSink::default());
    sink.set_property("num-buffers", 7).unwrap();
    let pipeline = build(&[&src, &sink]);

    pipeline.set_state(State::Playing).unwrap();
    common::wait_for_eos(&pipeline.bus());
    assert_eq!(sink_imp(&sink).buffer_count(), 7);
    assert!(sink_imp(&sink).is_eos());
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_flushing_seek_while_prerolled() {
    let src = fakesrc(10);
    let sink = Element::new("sink", FakeSink::default());
    let pipeline = build(&[&src, &sink]);

    pipeline.set_state(State::Paused).unwrap();
    let (result, current, _) = pipeline.state(Some(TIMEOUT));
    assert_eq!(result, Ok(StateChangeSuccess::Success));
    assert_eq!(current, State::Paused);

    // The prerolled buffer is flushed away before it is rendered.
    assert!(pipeline.send_event(Event::Seek(SeekEvent::buffers(6).flushing())));

    pipeline.set_state(State::Playing).unwrap();
    common::wait_for_eos(&pipeline.bus());
    assert_eq!(sink_imp(&sink).buffer_count(), 4);

    let mut position = Query::position(Format::Buffers);
    assert!(src.static_pad("src").unwrap().query(&mut position));
    assert!(matches!(position, Query::Position { result: Some(10), .. }));
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_position_and_duration_reach_the_source() {
    let src = fakesrc(8);
    src.set_property("size", 10u64).unwrap();
    let sink = Element::new("sink", FakeSink::default());
    let pipeline = build(&[&src, &sink]);

    pipeline.set_state(State::Playing).unwrap();
    common::wait_for_eos(&pipeline.bus());

    let mut duration = Query::duration(Format::Bytes);
    assert!(pipeline.query(&mut duration));
    assert!(matches!(duration, Query::Duration { result: Some(80), .. }));
    let mut position = Query::position(Format::Buffers);
    assert!(sink.static_pad("sink").unwrap().peer_query(&mut position));
    assert!(matches!(position, Query::Position { result: Some(8), .. }));
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_unlinked_push_is_not_linked() {
    common::test_log();
    let identity = Element::new("id", Identity::default());
    identity.set_state(State::Paused).unwrap();
    let pad = identity.static_pad("src").unwrap();
    assert_eq!(pad.push(Buffer::with_size(1)), Err(FlowError::NotLinked));
    identity.set_state(State::Null).unwrap();
    assert_eq!(pad.push(Buffer::with_size(1)), Err(FlowError::Flushing));
}
