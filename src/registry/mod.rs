//! Element factories and plugins.
//!
//! The registry maps factory names to [`ElementFactory`]s. A factory knows
//! its metadata up front but its plugin's code is loaded lazily, at most
//! once, the first time an element is made from it. Plugins come from two
//! places:
//!
//! - static plugins registered in-process with Rust constructors
//!   ([`Registry::register_static_plugin`]), like the built-in
//!   `coreelements`
//! - shared libraries exporting a descriptor ([`declare_plugin!`]) found by
//!   [`Registry::scan_path`] or listed in a persisted index
//!
//! [`declare_plugin!`]: crate::declare_plugin

mod descriptor;
mod index;
mod loader;

pub use descriptor::{
    CreateElementFn, ElementDescriptor, PLUGIN_ENTRY_POINT, PluginDescriptor, TRELLIS_ABI_VERSION,
    element_from_raw, element_to_raw,
};
pub use loader::{
    DylibLoader, ElementConstructor, LoadedPlugin, PluginError, PluginLoader, PluginManifest,
    PluginModule,
};

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::element::{Element, ElementImpl};
use crate::error::{Error, Result};
use crate::observability::metrics as m;

/// Preference among factories of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u32)]
pub enum Rank {
    /// Never chosen automatically.
    #[default]
    None = 0,
    /// Last resort.
    Marginal = 64,
    /// Fallback.
    Secondary = 128,
    /// Preferred.
    Primary = 256,
}

impl Rank {
    /// Rank for a numeric value, rounding down to the nearest named rank.
    pub fn from_value(value: u32) -> Rank {
        match value {
            256.. => Rank::Primary,
            128.. => Rank::Secondary,
            64.. => Rank::Marginal,
            _ => Rank::None,
        }
    }
}

/// Describes what a factory makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementMetadata {
    /// Factory name.
    pub name: String,
    /// Slash-separated classification (`Source`, `Sink/Fake`, `Generic`).
    pub klass: String,
    /// Description.
    pub description: String,
    /// Rank.
    pub rank: Rank,
}

impl ElementMetadata {
    /// Whether one of the klass components equals `klass`.
    pub fn has_klass(&self, klass: &str) -> bool {
        self.klass.split('/').any(|k| k == klass)
    }
}

// ============================================================================
// Static plugins
// ============================================================================

/// An in-process plugin with Rust constructors.
///
/// ```rust
/// use trellis::prelude::*;
/// use trellis::registry::{PluginDesc, Rank, Registry};
///
/// #[derive(Default)]
/// struct Nothing;
/// impl ElementImpl for Nothing {}
///
/// let registry = Registry::new();
/// registry
///     .register_static_plugin(
///         PluginDesc::new("mine", "1.0", "My elements")
///             .element("nothing", "Generic", "Does nothing", Rank::None, || Nothing),
///     )
///     .unwrap();
/// let element = registry.make("nothing", Some("n0")).unwrap();
/// assert_eq!(element.factory_name(), Some("nothing"));
/// ```
pub struct PluginDesc {
    name: String,
    version: String,
    description: String,
    features: Vec<ElementMetadata>,
    loaded: LoadedPlugin,
}

impl PluginDesc {
    /// Start a plugin description.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            features: Vec::new(),
            loaded: LoadedPlugin::new(),
        }
    }

    /// Add an element feature.
    pub fn element<T, F>(
        mut self,
        name: &str,
        klass: &str,
        description: &str,
        rank: Rank,
        constructor: F,
    ) -> Self
    where
        T: ElementImpl,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.features.push(ElementMetadata {
            name: name.to_owned(),
            klass: klass.to_owned(),
            description: description.to_owned(),
            rank,
        });
        self.loaded.insert(
            name,
            Arc::new(move || Some(Box::new(constructor()) as Box<dyn ElementImpl>)),
        );
        self
    }
}

// ============================================================================
// Plugin records
// ============================================================================

enum PluginSource {
    Static(LoadedPlugin),
    File { path: PathBuf, mtime: u64 },
}

/// A known plugin. Its code is loaded on first use.
pub struct PluginRecord {
    name: String,
    version: String,
    description: String,
    features: Vec<ElementMetadata>,
    source: PluginSource,
    loader: Arc<dyn PluginLoader>,
    loaded: OnceLock<std::result::Result<LoadedPlugin, PluginError>>,
}

impl PluginRecord {
    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Library path for file plugins.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            PluginSource::Static(_) => None,
            PluginSource::File { path, .. } => Some(path),
        }
    }

    /// Features the plugin declares.
    pub fn features(&self) -> &[ElementMetadata] {
        &self.features
    }

    /// Whether the plugin's code has been loaded (or failed to load).
    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Load the plugin's code, once. Later calls return the first result.
    pub fn load(&self) -> std::result::Result<&LoadedPlugin, PluginError> {
        self.loaded
            .get_or_init(|| {
                let result = match &self.source {
                    PluginSource::Static(loaded) => Ok(loaded.clone()),
                    PluginSource::File { path, .. } => self.loader.load(path),
                };
                match &result {
                    Ok(_) => {
                        info!(plugin = %self.name, "plugin loaded");
                        m::record_plugin_load(&self.name);
                    }
                    Err(err) => warn!(plugin = %self.name, error = %err, "plugin failed to load"),
                }
                result
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

impl fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("path", &self.path())
            .field("features", &self.features.len())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Creates elements of one kind.
pub struct ElementFactory {
    metadata: ElementMetadata,
    plugin: Arc<PluginRecord>,
    counter: AtomicU32,
}

impl ElementFactory {
    /// Factory name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Metadata.
    pub fn metadata(&self) -> &ElementMetadata {
        &self.metadata
    }

    /// Rank.
    pub fn rank(&self) -> Rank {
        self.metadata.rank
    }

    /// The providing plugin.
    pub fn plugin(&self) -> &Arc<PluginRecord> {
        &self.plugin
    }

    /// Make an element, loading the plugin if needed. Without a name the
    /// element is called `<factory><n>`.
    pub fn create(&self, name: Option<&str>) -> Result<Element> {
        let loaded = self.plugin.load()?;
        let constructor =
            loaded
                .constructor(self.name())
                .ok_or_else(|| PluginError::FeatureNotFound {
                    plugin: self.plugin.name().to_owned(),
                    feature: self.name().to_owned(),
                })?;
        let name = match name {
            Some(name) => name.to_owned(),
            None => format!(
                "{}{}",
                self.name(),
                self.counter.fetch_add(1, Ordering::Relaxed)
            ),
        };
        let imp = constructor().ok_or_else(|| PluginError::ConstructorFailed {
            plugin: self.plugin.name().to_owned(),
            feature: self.name().to_owned(),
        })?;
        let element = Element::from_boxed(
            name,
            Some(self.name().to_owned()),
            imp,
            loaded.module().cloned(),
        );
        debug!(factory = %self.name(), element = %element.name(), "element created");
        Ok(element)
    }
}

impl fmt::Debug for ElementFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementFactory")
            .field("name", &self.metadata.name)
            .field("klass", &self.metadata.klass)
            .field("rank", &self.metadata.rank)
            .field("plugin", &self.plugin.name)
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Outcome of reading a persisted index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexLoad {
    /// Plugins registered from the index.
    pub loaded: usize,
    /// Entries skipped because their file changed or vanished.
    pub stale: usize,
}

#[derive(Default)]
struct RegistryInner {
    plugins: Vec<Arc<PluginRecord>>,
    factories: HashMap<String, Arc<ElementFactory>>,
}

/// Factory and plugin registry.
pub struct Registry {
    inner: RwLock<RegistryInner>,
    loader: Arc<dyn PluginLoader>,
}

impl Registry {
    /// Empty registry loading shared libraries with [`DylibLoader`].
    pub fn new() -> Self {
        Self::with_loader(Arc::new(DylibLoader))
    }

    /// Empty registry with a custom loader.
    pub fn with_loader(loader: Arc<dyn PluginLoader>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            loader,
        }
    }

    /// The process-wide registry used by [`crate::init`].
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    fn add_plugin(
        &self,
        manifest: PluginManifest,
        source: PluginSource,
    ) -> std::result::Result<Arc<PluginRecord>, PluginError> {
        let mut inner = self.inner.write();
        if inner.plugins.iter().any(|p| p.name == manifest.name) {
            return Err(PluginError::Duplicate(manifest.name));
        }
        let record = Arc::new(PluginRecord {
            name: manifest.name,
            version: manifest.version,
            description: manifest.description,
            features: manifest.features,
            source,
            loader: Arc::clone(&self.loader),
            loaded: OnceLock::new(),
        });
        for feature in &record.features {
            if let Some(existing) = inner.factories.get(&feature.name) {
                warn!(
                    factory = %feature.name,
                    plugin = %record.name,
                    existing = %existing.plugin.name,
                    "factory already registered, keeping the first"
                );
                continue;
            }
            inner.factories.insert(
                feature.name.clone(),
                Arc::new(ElementFactory {
                    metadata: feature.clone(),
                    plugin: Arc::clone(&record),
                    counter: AtomicU32::new(0),
                }),
            );
        }
        inner.plugins.push(Arc::clone(&record));
        debug!(plugin = %record.name, features = record.features.len(), "plugin registered");
        Ok(record)
    }

    /// Register an in-process plugin.
    pub fn register_static_plugin(&self, desc: PluginDesc) -> Result<()> {
        let manifest = PluginManifest {
            name: desc.name,
            version: desc.version,
            description: desc.description,
            features: desc.features,
        };
        self.add_plugin(manifest, PluginSource::Static(desc.loaded))?;
        Ok(())
    }

    /// Register every plugin file in `dir` (not recursive) by inspecting
    /// it. Files already registered from the same path are skipped; files
    /// that fail inspection are logged and skipped. Returns the number of
    /// plugins added.
    pub fn scan_path(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && self.loader.accepts(path))
            .collect();
        entries.sort();

        let mut added = 0;
        for path in entries {
            if self.plugin_by_path(&path).is_some() {
                trace!(path = %path.display(), "already registered");
                continue;
            }
            let manifest = match self.loader.inspect(&path) {
                Ok(manifest) => manifest,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping plugin");
                    continue;
                }
            };
            let mtime = index::modification_time(&path).unwrap_or(0);
            match self.add_plugin(manifest, PluginSource::File { path, mtime }) {
                Ok(_) => added += 1,
                Err(err) => warn!(error = %err, "skipping plugin"),
            }
        }
        info!(dir = %dir.display(), added, "plugin directory scanned");
        Ok(added)
    }

    fn plugin_by_path(&self, path: &Path) -> Option<Arc<PluginRecord>> {
        self.inner
            .read()
            .plugins
            .iter()
            .find(|p| p.path() == Some(path))
            .cloned()
    }

    /// Persist every file plugin to `path`.
    pub fn save_index(&self, path: impl AsRef<Path>) -> Result<()> {
        let entries: Vec<index::IndexedPlugin> = self
            .inner
            .read()
            .plugins
            .iter()
            .filter_map(|record| match &record.source {
                PluginSource::File { path, mtime } => Some(index::IndexedPlugin::new(
                    &PluginManifest {
                        name: record.name.clone(),
                        version: record.version.clone(),
                        description: record.description.clone(),
                        features: record.features.clone(),
                    },
                    path,
                    *mtime,
                )),
                PluginSource::Static(_) => None,
            })
            .collect();
        let count = entries.len();
        index::write(path.as_ref(), entries)?;
        info!(path = %path.as_ref().display(), plugins = count, "registry index saved");
        Ok(())
    }

    /// Register the plugins listed in an index without loading them.
    pub fn load_index(&self, path: impl AsRef<Path>) -> Result<IndexLoad> {
        let mut outcome = IndexLoad::default();
        for entry in index::read(path.as_ref())? {
            if !entry.is_current() {
                debug!(plugin = %entry.name, path = %entry.path, "stale index entry");
                outcome.stale += 1;
                continue;
            }
            let source = PluginSource::File {
                path: entry.path(),
                mtime: entry.mtime,
            };
            match self.add_plugin(entry.manifest(), source) {
                Ok(_) => outcome.loaded += 1,
                Err(PluginError::Duplicate(name)) => {
                    trace!(plugin = %name, "already registered");
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!(path = %path.as_ref().display(), loaded = outcome.loaded, stale = outcome.stale, "registry index loaded");
        Ok(outcome)
    }

    /// Factory by name.
    pub fn find(&self, name: &str) -> Option<Arc<ElementFactory>> {
        self.inner.read().factories.get(name).cloned()
    }

    /// Make an element from a factory.
    pub fn make(&self, factory: &str, name: Option<&str>) -> Result<Element> {
        let found = self
            .find(factory)
            .ok_or_else(|| Error::NotFound(format!("element factory '{factory}'")))?;
        found.create(name)
    }

    /// All factories, highest rank first, then by name.
    pub fn factories(&self) -> Vec<Arc<ElementFactory>> {
        let mut factories: Vec<_> = self.inner.read().factories.values().cloned().collect();
        factories.sort_by(|a, b| b.rank().cmp(&a.rank()).then_with(|| a.name().cmp(b.name())));
        factories
    }

    /// Factories whose klass contains the component `klass`, highest rank
    /// first.
    pub fn factories_by_klass(&self, klass: &str) -> Vec<Arc<ElementFactory>> {
        self.factories()
            .into_iter()
            .filter(|f| f.metadata.has_klass(klass))
            .collect()
    }

    /// Registered plugins in registration order.
    pub fn plugins(&self) -> Vec<Arc<PluginRecord>> {
        self.inner.read().plugins.clone()
    }

    /// Plugin by name.
    pub fn plugin(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.inner
            .read()
            .plugins
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Forget every plugin and factory. Elements already made keep working:
    /// each holds its plugin's [`PluginModule`], so shared libraries stay
    /// mapped until the last of their elements is dropped.
    pub fn teardown(&self) {
        let mut inner = self.inner.write();
        inner.factories.clear();
        inner.plugins.clear();
        debug!("registry cleared");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Registry")
            .field("plugins", &inner.plugins.len())
            .field("factories", &inner.factories.len())
            .finish()
    }
}
