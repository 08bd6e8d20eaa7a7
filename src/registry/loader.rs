//! Loading plugin code.
//!
//! The registry only ever talks to a [`PluginLoader`]: `inspect` reads a
//! plugin's metadata during a directory scan, `load` makes its constructors
//! available the first time one of its elements is created.
//! [`DylibLoader`] implements both with `libloading`.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use libloading::{Library, Symbol};
use thiserror::Error;
use tracing::{debug, trace};

use super::descriptor::{
    DescriptorInfo, PLUGIN_ENTRY_POINT, PluginDescriptor, element_from_raw,
};
use super::ElementMetadata;
use crate::element::ElementImpl;

/// Builds a fresh element implementation, or `None` when the plugin
/// refused to make one.
pub type ElementConstructor = Arc<dyn Fn() -> Option<Box<dyn ElementImpl>> + Send + Sync>;

/// Handle that keeps a plugin's code resident, shared by every element the
/// plugin made.
pub type PluginModule = Arc<dyn Any + Send + Sync>;

/// Errors from loading plugins or creating their elements.
///
/// Cloned out of the per-plugin load cell, so every variant is owned data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// The shared library could not be opened.
    #[error("failed to load {path}: {reason}")]
    LoadFailed {
        /// Library path.
        path: String,
        /// Loader message.
        reason: String,
    },

    /// The library does not export `trellis_plugin_descriptor`.
    #[error("{0} has no trellis_plugin_descriptor entry point")]
    MissingEntryPoint(String),

    /// The entry point returned null.
    #[error("{0} returned a null descriptor")]
    NullDescriptor(String),

    /// The plugin was built for another descriptor layout.
    #[error("ABI version mismatch: expected {expected}, got {actual}")]
    AbiMismatch {
        /// Host ABI version.
        expected: u32,
        /// Plugin ABI version.
        actual: u32,
    },

    /// The descriptor is malformed.
    #[error("invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),

    /// A plugin with that name is already registered.
    #[error("plugin '{0}' is already registered")]
    Duplicate(String),

    /// The plugin loaded but does not provide the feature.
    #[error("plugin '{plugin}' does not provide '{feature}'")]
    FeatureNotFound {
        /// Plugin name.
        plugin: String,
        /// Element factory name.
        feature: String,
    },

    /// The plugin record has no code attached (index entry without a path).
    #[error("plugin '{0}' cannot be loaded")]
    NotLoadable(String),

    /// The feature's constructor returned nothing.
    #[error("plugin '{plugin}' failed to construct '{feature}'")]
    ConstructorFailed {
        /// Plugin name.
        plugin: String,
        /// Element factory name.
        feature: String,
    },
}

/// Metadata read from a plugin without keeping its code loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginManifest {
    /// Plugin name.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Description.
    pub description: String,
    /// Element features.
    pub features: Vec<ElementMetadata>,
}

impl From<DescriptorInfo> for PluginManifest {
    fn from(info: DescriptorInfo) -> Self {
        Self {
            name: info.name,
            version: info.version,
            description: info.description,
            features: info.features,
        }
    }
}

/// Constructors of a loaded plugin, keyed by feature name.
#[derive(Clone, Default)]
pub struct LoadedPlugin {
    constructors: HashMap<String, ElementConstructor>,
    module: Option<PluginModule>,
}

impl LoadedPlugin {
    /// Empty set of constructors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the handle that keeps the plugin's code loaded. Every element
    /// made from this plugin holds a clone until it is dropped.
    pub fn with_module(mut self, module: PluginModule) -> Self {
        self.module = Some(module);
        self
    }

    /// The code handle, if the plugin has one.
    pub fn module(&self) -> Option<&PluginModule> {
        self.module.as_ref()
    }

    /// Add a constructor.
    pub fn insert(&mut self, feature: impl Into<String>, constructor: ElementConstructor) {
        self.constructors.insert(feature.into(), constructor);
    }

    /// Constructor for a feature.
    pub fn constructor(&self, feature: &str) -> Option<&ElementConstructor> {
        self.constructors.get(feature)
    }

    /// Feature names with constructors.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("features", &self.constructors.keys().collect::<Vec<_>>())
            .field("resident", &self.module.is_some())
            .finish()
    }
}

/// How plugin files are inspected and loaded.
pub trait PluginLoader: Send + Sync {
    /// Whether `path` looks like a plugin this loader handles.
    fn accepts(&self, path: &Path) -> bool;

    /// Read metadata. Must not leave code loaded.
    fn inspect(&self, path: &Path) -> Result<PluginManifest, PluginError>;

    /// Load the code and return constructors.
    fn load(&self, path: &Path) -> Result<LoadedPlugin, PluginError>;
}

/// Loads plugins from shared libraries exporting `trellis_plugin_descriptor`.
///
/// Loading executes the library's initialisers; only point the registry at
/// trusted directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

type EntryPoint = unsafe extern "C" fn() -> *const PluginDescriptor;

impl DylibLoader {
    fn open(path: &Path) -> Result<(Arc<Library>, &'static PluginDescriptor), PluginError> {
        let display = path.display().to_string();
        // SAFETY: loading a library runs its initialisers; plugin
        // directories are trusted.
        let library = unsafe { Library::new(path) }.map_err(|err| PluginError::LoadFailed {
            path: display.clone(),
            reason: err.to_string(),
        })?;
        let library = Arc::new(library);
        let descriptor = {
            // SAFETY: the symbol type matches the declare_plugin! export.
            let entry: Symbol<EntryPoint> = unsafe { library.get(PLUGIN_ENTRY_POINT) }
                .map_err(|_| PluginError::MissingEntryPoint(display.clone()))?;
            // SAFETY: calling the plugin's entry point.
            unsafe { entry() }
        };
        if descriptor.is_null() {
            return Err(PluginError::NullDescriptor(display));
        }
        // SAFETY: the descriptor is static data inside the library, which
        // callers keep alive through the returned Arc.
        let descriptor: &'static PluginDescriptor = unsafe { &*descriptor };
        Ok((library, descriptor))
    }
}

impl PluginLoader for DylibLoader {
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
    }

    fn inspect(&self, path: &Path) -> Result<PluginManifest, PluginError> {
        let (library, descriptor) = Self::open(path)?;
        // SAFETY: descriptor pointers point into the still-loaded library.
        let info = unsafe { descriptor.read() }?;
        drop(library);
        trace!(path = %path.display(), plugin = %info.name, "plugin inspected");
        Ok(info.into())
    }

    fn load(&self, path: &Path) -> Result<LoadedPlugin, PluginError> {
        let (library, descriptor) = Self::open(path)?;
        // SAFETY: as in inspect.
        let info = unsafe { descriptor.read() }?;
        // SAFETY: read() validated the element array.
        let elements = unsafe { descriptor.elements() };

        let mut loaded = LoadedPlugin::new().with_module(library);
        for (feature, element) in info.features.iter().zip(elements) {
            let create = element.create;
            // `create` points into the library, which the LoadedPlugin
            // and every element made from it keep mapped.
            let constructor: ElementConstructor = Arc::new(move || {
                // SAFETY: constructors exported by declare_plugin! return
                // element_to_raw pointers or null.
                unsafe { element_from_raw(create()) }
            });
            loaded.insert(feature.name.clone(), constructor);
        }
        debug!(path = %path.display(), plugin = %info.name, features = info.features.len(), "plugin library loaded");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_platform_extension() {
        let loader = DylibLoader;
        let name = format!("libplugin.{}", std::env::consts::DLL_EXTENSION);
        assert!(loader.accepts(Path::new(&name)));
        assert!(!loader.accepts(Path::new("notes.txt")));
    }

    #[test]
    fn test_missing_library() {
        let err = DylibLoader
            .inspect(Path::new("/nonexistent/libtrellis_missing.so"))
            .unwrap_err();
        assert!(matches!(err, PluginError::LoadFailed { .. }));
    }

    #[test]
    fn test_loaded_plugin_lookup() {
        struct Nop;
        impl ElementImpl for Nop {}

        let mut loaded = LoadedPlugin::new();
        loaded.insert("nop", Arc::new(|| Some(Box::new(Nop) as Box<dyn ElementImpl>)));
        assert!(loaded.constructor("nop").is_some());
        assert!(loaded.constructor("other").is_none());
        assert_eq!(loaded.features().collect::<Vec<_>>(), ["nop"]);
        assert!(loaded.module().is_none());
    }

    #[test]
    fn test_module_shared_by_clones() {
        let module: PluginModule = Arc::new(String::from("code"));
        let loaded = LoadedPlugin::new().with_module(Arc::clone(&module));
        let copy = loaded.clone();
        assert_eq!(Arc::strong_count(&module), 3);
        drop(loaded);
        drop(copy);
        assert_eq!(Arc::strong_count(&module), 1);
    }
}
