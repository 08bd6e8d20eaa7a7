//! # Trellis
//!
//! A streaming media pipeline runtime: elements with typed pads, caps
//! negotiation, push and pull scheduling, a state machine with
//! asynchronous preroll, bins and a pipeline with a message bus, and a
//! registry that loads plugins lazily.
//!
//! ## Features
//!
//! - **Caps negotiation**: typed field values, ranges, lists and fixation
//! - **Push and pull**: chain functions, get-range, per-element tasks
//! - **State machine**: NULL → READY → PAUSED → PLAYING with ASYNC preroll
//! - **Bins and bus**: child ordering, EOS fan-in, unbounded message bus
//! - **Plugins**: in-process or shared libraries, rkyv-persisted index
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trellis::prelude::*;
//!
//! trellis::init(InitConfig::default())?;
//! let pipeline = Pipeline::new("p");
//! let src = trellis::element_make("fakesrc", Some("src"))?;
//! let sink = trellis::element_make("fakesink", Some("sink"))?;
//! src.set_property("num-buffers", 10)?;
//! pipeline.add_many(&[&src, &sink])?;
//! src.link(&sink)?;
//! pipeline.set_state(State::Playing)?;
//! # Ok::<(), trellis::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bin;
pub mod buffer;
pub mod bus;
pub mod caps;
pub mod clock;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod flow;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod task;

use std::env;
use std::path::PathBuf;

use tracing::{debug, info, warn};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bin::Bin;
    pub use crate::buffer::Buffer;
    pub use crate::bus::{Bus, Message, MessageType, MessageView};
    pub use crate::caps::{Caps, Fraction};
    pub use crate::clock::ClockTime;
    pub use crate::element::{
        Element, ElementImpl, Pad, PadDirection, PadMode, PadPresence, PadTemplate, PropValue,
        State, StateChange, StateChangeResult, StateChangeSuccess,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, Format, Query};
    pub use crate::flow::{FlowError, FlowResult, FlowSuccess};
    pub use crate::pipeline::Pipeline;
    pub use crate::registry::Registry;
    pub use crate::InitConfig;
}

pub use error::{Error, Result};

use element::Element;
use registry::{PluginError, Registry};

/// Environment variable listing plugin directories, colon-separated.
pub const ENV_PLUGIN_PATH: &str = "TRELLIS_PLUGIN_PATH";
/// Environment variable naming the persisted registry index.
pub const ENV_REGISTRY: &str = "TRELLIS_REGISTRY";

/// How [`init`] populates the process-wide registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitConfig {
    /// Directories scanned for plugin libraries.
    pub plugin_paths: Vec<PathBuf>,
    /// Persisted index to read before scanning and to update afterwards.
    pub index_path: Option<PathBuf>,
    /// Register the built-in `coreelements` plugin.
    pub load_builtin: bool,
    /// Scan `plugin_paths` when the index is missing or has stale entries.
    /// When false an existing index is trusted as is.
    pub rescan_if_stale: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            plugin_paths: Vec::new(),
            index_path: None,
            load_builtin: true,
            rescan_if_stale: true,
        }
    }
}

impl InitConfig {
    /// Defaults overridden by `TRELLIS_PLUGIN_PATH` and `TRELLIS_REGISTRY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(paths) = env::var_os(ENV_PLUGIN_PATH) {
            config.plugin_paths = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(index) = env::var_os(ENV_REGISTRY).filter(|v| !v.is_empty()) {
            config.index_path = Some(PathBuf::from(index));
        }
        config
    }

    /// Add a plugin directory.
    pub fn plugin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_paths.push(path.into());
        self
    }

    /// Set the index file.
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    /// Whether to register the built-in elements.
    pub fn load_builtin(mut self, load: bool) -> Self {
        self.load_builtin = load;
        self
    }

    /// Whether a stale or missing index triggers a directory scan.
    pub fn rescan_if_stale(mut self, rescan: bool) -> Self {
        self.rescan_if_stale = rescan;
        self
    }
}

/// Populate `registry` according to `config`.
///
/// Reads the index first, scans the plugin directories when the index is
/// missing or stale, then writes the index back if anything was scanned.
/// Calling it again only adds what is new.
pub fn init_registry(registry: &Registry, config: &InitConfig) -> Result<()> {
    if config.load_builtin {
        match registry.register_static_plugin(elements::plugin_desc()) {
            Ok(()) | Err(Error::Plugin(PluginError::Duplicate(_))) => {}
            Err(err) => return Err(err),
        }
    }

    let mut needs_scan = true;
    if let Some(index) = &config.index_path
        && index.exists()
    {
        match registry.load_index(index) {
            Ok(outcome) => needs_scan = outcome.stale > 0 && config.rescan_if_stale,
            Err(err) => warn!(path = %index.display(), error = %err, "ignoring unreadable registry index"),
        }
    }

    if needs_scan {
        let mut scanned = 0;
        for dir in &config.plugin_paths {
            match registry.scan_path(dir) {
                Ok(added) => scanned += added,
                Err(err) => warn!(dir = %dir.display(), error = %err, "cannot scan plugin directory"),
            }
        }
        debug!(scanned, "plugin directories scanned");
        if let Some(index) = &config.index_path {
            registry.save_index(index)?;
        }
    }

    info!(
        plugins = registry.plugins().len(),
        factories = registry.factories().len(),
        "registry initialized"
    );
    Ok(())
}

/// Initialize the process-wide [`Registry::global`] and describe the
/// crate's metrics to any installed recorder.
pub fn init(config: InitConfig) -> Result<()> {
    observability::init_metrics();
    init_registry(Registry::global(), &config)
}

/// Drop every factory and plugin record of the process-wide registry.
/// Live elements keep working.
pub fn deinit() {
    Registry::global().teardown();
}

/// Make an element from the process-wide registry.
pub fn element_make(factory: &str, name: Option<&str>) -> Result<Element> {
    Registry::global().make(factory, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = InitConfig::default()
            .plugin_path("/opt/plugins")
            .index_path("/tmp/registry.bin")
            .load_builtin(false)
            .rescan_if_stale(false);
        assert_eq!(config.plugin_paths, vec![PathBuf::from("/opt/plugins")]);
        assert_eq!(config.index_path, Some(PathBuf::from("/tmp/registry.bin")));
        assert!(!config.load_builtin);
        assert!(!config.rescan_if_stale);
    }

    #[test]
    fn test_init_registry_is_idempotent() {
        let registry = Registry::new();
        init_registry(&registry, &InitConfig::default()).unwrap();
        init_registry(&registry, &InitConfig::default()).unwrap();
        assert_eq!(registry.plugins().len(), 1);
        assert!(registry.find("queue").is_some());
    }

    #[test]
    fn test_init_without_builtin() {
        let registry = Registry::new();
        init_registry(&registry, &InitConfig::default().load_builtin(false)).unwrap();
        assert!(registry.find("fakesrc").is_none());
    }
}
