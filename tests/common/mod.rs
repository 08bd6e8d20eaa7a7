//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use trellis::prelude::*;

/// Long enough for any of these pipelines to finish on a loaded machine.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Log to the test output, filtered by `RUST_LOG`.
pub fn test_log() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Wait for the first message of one of `types`.
pub fn wait_for(bus: &Bus, types: &[MessageType]) -> Message {
    match bus.timed_pop_filtered(Some(TIMEOUT), types) {
        Some(message) => message,
        None => panic!("no {types:?} message within {TIMEOUT:?}"),
    }
}

/// Wait for EOS, failing on an error message.
pub fn wait_for_eos(bus: &Bus) {
    let message = wait_for(bus, &[MessageType::Eos, MessageType::Error]);
    if let MessageView::Error(err) = message.view() {
        panic!("{} posted an error: {err}", message.src());
    }
}
