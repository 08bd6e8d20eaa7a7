//! Built-in elements, registered as the `coreelements` plugin.
//!
//! ## Sources
//! - [`FakeSrc`]: produces buffers in push mode or serves ranges in pull mode
//!
//! ## Sinks
//! - [`FakeSink`]: prerolls, counts and discards buffers
//!
//! ## Transforms
//! - [`Identity`]: passes buffers through, optionally failing on demand
//! - [`Queue`]: decouples its sink and src pads with a bounded FIFO
//!
//! ## Routing
//! - [`Tee`]: duplicates buffers to every request pad (1-to-N fanout)

mod fakesink;
mod fakesrc;
mod identity;
mod queue;
mod tee;

// Sources
pub use fakesrc::{FakeSrc, FakeSrcSettings, FillType};

// Sinks
pub use fakesink::{FakeSink, FakeSinkSettings, HandoffFn};

// Transforms
pub use identity::{Identity, IdentitySettings};
pub use queue::{Leaky, Queue, QueueSettings, QueueStats};

// Routing
pub use tee::Tee;

use crate::registry::{PluginDesc, Rank};

/// Name of the built-in plugin.
pub const PLUGIN_NAME: &str = "coreelements";

/// Description of the built-in plugin, ready for
/// [`Registry::register_static_plugin`](crate::registry::Registry::register_static_plugin).
pub fn plugin_desc() -> PluginDesc {
    PluginDesc::new(PLUGIN_NAME, env!("CARGO_PKG_VERSION"), "Standard elements")
        .element(
            "fakesrc",
            "Source",
            "Push or pull source of empty buffers",
            Rank::None,
            FakeSrc::default,
        )
        .element(
            "fakesink",
            "Sink",
            "Black hole for data",
            Rank::None,
            FakeSink::default,
        )
        .element(
            "identity",
            "Generic",
            "Pass data without modification",
            Rank::None,
            Identity::default,
        )
        .element("queue", "Generic", "Simple data queue", Rank::None, Queue::default)
        .element("tee", "Generic", "1-to-N pipe fitting", Rank::None, Tee::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn test_plugin_registers_all_elements() {
        let registry = Registry::new();
        registry.register_static_plugin(plugin_desc()).unwrap();
        for name in ["fakesrc", "fakesink", "identity", "queue", "tee"] {
            let element = registry.make(name, None).unwrap();
            assert_eq!(element.factory_name(), Some(name));
        }
        assert_eq!(registry.factories_by_klass("Generic").len(), 3);
        assert!(registry.plugin(PLUGIN_NAME).unwrap().is_loaded());
    }
}
