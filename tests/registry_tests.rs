//! Plugin scanning, lazy loading and the persisted index, driven through a
//! loader that reads plain-text "plugins".

mod common;

use std::fs;
use std::path::Path;
use std::result::Result as StdResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, SystemTime};

use trellis::elements::Identity;
use trellis::prelude::*;
use trellis::registry::{
    ElementConstructor, LoadedPlugin, PluginError, PluginLoader, PluginManifest, PluginModule,
    Rank,
};
use trellis::{InitConfig, init_registry};

/// Treats every `*.plugin` file as a plugin named after the file stem,
/// providing one identity-like element per line of the file. Features whose
/// name starts with `broken` construct nothing.
#[derive(Default)]
struct TextLoader {
    loads: AtomicUsize,
    unloads: Arc<AtomicUsize>,
}

impl TextLoader {
    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

/// Stands in for a mapped library; counts when it is released.
struct Resident(Arc<AtomicUsize>);

impl Drop for Resident {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn feature_names(path: &Path) -> StdResult<Vec<String>, PluginError> {
    let text = fs::read_to_string(path).map_err(|err| PluginError::LoadFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    Ok(text.lines().map(str::to_owned).collect())
}

impl PluginLoader for TextLoader {
    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "plugin")
    }

    fn inspect(&self, path: &Path) -> StdResult<PluginManifest, PluginError> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| PluginError::InvalidDescriptor("no file name".into()))?;
        let features = feature_names(path)?
            .into_iter()
            .map(|feature| trellis::registry::ElementMetadata {
                name: feature,
                klass: "Filter/Test".into(),
                description: "text plugin element".into(),
                rank: Rank::Marginal,
            })
            .collect();
        Ok(PluginManifest {
            name,
            version: "0.1".into(),
            description: "text plugin".into(),
            features,
        })
    }

    fn load(&self, path: &Path) -> StdResult<LoadedPlugin, PluginError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let features = feature_names(path)?;
        let module: PluginModule = Arc::new(Resident(Arc::clone(&self.unloads)));
        let mut loaded = LoadedPlugin::new().with_module(module);
        for feature in features {
            let constructor: ElementConstructor = if feature.starts_with("broken") {
                Arc::new(|| None)
            } else {
                Arc::new(|| Some(Box::new(Identity::default()) as Box<dyn ElementImpl>))
            };
            loaded.insert(feature, constructor);
        }
        Ok(loaded)
    }
}

fn write_plugin(dir: &Path, name: &str, features: &[&str]) {
    fs::write(dir.join(format!("{name}.plugin")), features.join("\n")).unwrap();
}

fn registry(loader: &Arc<TextLoader>) -> Registry {
    common::test_log();
    Registry::with_loader(Arc::clone(loader) as Arc<dyn PluginLoader>)
}

#[test]
fn test_scan_registers_without_loading() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "alpha", &["alphafilter", "alphamix"]);
    write_plugin(dir.path(), "beta", &["betafilter"]);
    fs::write(dir.path().join("README.txt"), "not a plugin").unwrap();

    let loader = Arc::new(TextLoader::default());
    let registry = registry(&loader);
    assert_eq!(registry.scan_path(dir.path()).unwrap(), 2);
    assert_eq!(registry.factories_by_klass("Test").len(), 3);
    assert_eq!(loader.loads(), 0);
    assert!(!registry.plugin("alpha").unwrap().is_loaded());

    // Rescanning the same directory adds nothing.
    assert_eq!(registry.scan_path(dir.path()).unwrap(), 0);
}

#[test]
fn test_plugin_loads_once_on_first_make() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "alpha", &["alphafilter", "alphamix"]);
    let loader = Arc::new(TextLoader::default());
    let registry = registry(&loader);
    registry.scan_path(dir.path()).unwrap();

    let first = registry.make("alphafilter", None).unwrap();
    let second = registry.make("alphafilter", None).unwrap();
    let mixer = registry.make("alphamix", Some("mixer")).unwrap();
    assert_eq!(loader.loads(), 1);
    assert!(registry.plugin("alpha").unwrap().is_loaded());
    assert_eq!(first.name(), "alphafilter0");
    assert_eq!(second.name(), "alphafilter1");
    assert_eq!(mixer.name(), "mixer");
    assert_eq!(first.factory_name(), Some("alphafilter"));
    assert!(first.imp::<Identity>().is_some());
}

#[test]
fn test_unknown_factory() {
    let registry = registry(&Arc::new(TextLoader::default()));
    assert!(matches!(
        registry.make("nosuchelement", None),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_load_failure_is_remembered() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "gone", &["gonefilter"]);
    let loader = Arc::new(TextLoader::default());
    let registry = registry(&loader);
    registry.scan_path(dir.path()).unwrap();
    fs::remove_file(dir.path().join("gone.plugin")).unwrap();

    let err = registry.make("gonefilter", None).unwrap_err();
    assert!(matches!(err, Error::Plugin(PluginError::LoadFailed { .. })), "{err}");
    assert!(registry.make("gonefilter", None).is_err());
    assert_eq!(loader.loads(), 1);
}

#[test]
fn test_index_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let plugins = dir.path().join("plugins");
    fs::create_dir(&plugins).unwrap();
    write_plugin(&plugins, "alpha", &["alphafilter"]);
    write_plugin(&plugins, "beta", &["betafilter", "betamix"]);
    let index = dir.path().join("cache").join("registry.bin");

    let loader = Arc::new(TextLoader::default());
    let first = registry(&loader);
    first.scan_path(&plugins).unwrap();
    first.save_index(&index).unwrap();

    let second = registry(&loader);
    let outcome = second.load_index(&index).unwrap();
    assert_eq!(outcome.loaded, 2);
    assert_eq!(outcome.stale, 0);
    let beta = second.plugin("beta").unwrap();
    assert_eq!(beta.path(), Some(plugins.join("beta.plugin").as_path()));
    assert_eq!(beta.features().len(), 2);
    assert_eq!(second.find("betamix").unwrap().rank(), Rank::Marginal);
    assert_eq!(loader.loads(), 0);

    second.make("betamix", None).unwrap();
    assert_eq!(loader.loads(), 1);
}

#[test]
fn test_changed_plugin_is_stale() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "alpha", &["alphafilter"]);
    write_plugin(dir.path(), "beta", &["betafilter"]);
    let index = dir.path().join("registry.bin");

    let loader = Arc::new(TextLoader::default());
    let first = registry(&loader);
    first.scan_path(dir.path()).unwrap();
    first.save_index(&index).unwrap();

    let beta = fs::File::options()
        .write(true)
        .open(dir.path().join("beta.plugin"))
        .unwrap();
    beta.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000))
        .unwrap();

    let second = registry(&loader);
    let outcome = second.load_index(&index).unwrap();
    assert_eq!(outcome.loaded, 1);
    assert_eq!(outcome.stale, 1);
    assert!(second.find("betafilter").is_none());
}

#[test]
fn test_corrupt_index_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let index = dir.path().join("registry.bin");
    fs::write(&index, b"definitely not an index").unwrap();
    let registry = registry(&Arc::new(TextLoader::default()));
    assert!(registry.load_index(&index).is_err());
}

#[test]
fn test_init_writes_and_reuses_index() {
    let dir = tempfile::tempdir().unwrap();
    let plugins = dir.path().join("plugins");
    fs::create_dir(&plugins).unwrap();
    write_plugin(&plugins, "alpha", &["alphafilter"]);
    let index = dir.path().join("registry.bin");
    let config = InitConfig::default()
        .plugin_path(&plugins)
        .index_path(&index);

    let loader = Arc::new(TextLoader::default());
    let first = registry(&loader);
    init_registry(&first, &config).unwrap();
    assert!(index.exists());
    assert!(first.find("alphafilter").is_some());
    assert!(first.find("fakesrc").is_some());

    // A fresh registry picks the plugin up from the index alone.
    let index_only = InitConfig::default().index_path(&index);
    let second = registry(&loader);
    init_registry(&second, &index_only).unwrap();
    assert!(second.find("alphafilter").is_some());

    // Once the file is gone its entry is stale and the index is rewritten.
    fs::remove_dir_all(&plugins).unwrap();
    let third = registry(&loader);
    init_registry(&third, &index_only).unwrap();
    assert!(third.find("alphafilter").is_none());
    let fourth = registry(&loader);
    assert_eq!(fourth.load_index(&index).unwrap(), Default::default());
    assert_eq!(loader.loads(), 0);
}

#[test]
fn test_concurrent_makes_load_once() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "alpha", &["alphafilter"]);
    let loader = Arc::new(TextLoader::default());
    let registry = registry(&loader);
    registry.scan_path(dir.path()).unwrap();

    const THREADS: usize = 8;
    let barrier = Barrier::new(THREADS);
    let elements: Vec<Element> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    registry.make("alphafilter", None).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(loader.loads(), 1);
    assert_eq!(elements.len(), THREADS);
    let mut names: Vec<_> = elements.iter().map(|e| e.name().to_owned()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), THREADS);
}

#[test]
fn test_elements_keep_plugin_resident_after_teardown() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "alpha", &["alphafilter"]);
    let loader = Arc::new(TextLoader::default());
    let registry = registry(&loader);
    registry.scan_path(dir.path()).unwrap();

    let first = registry.make("alphafilter", None).unwrap();
    let second = registry.make("alphafilter", None).unwrap();
    registry.teardown();
    assert!(registry.find("alphafilter").is_none());
    assert_eq!(loader.unloads(), 0);

    first.set_state(State::Ready).unwrap();
    first.set_state(State::Null).unwrap();
    drop(first);
    assert_eq!(loader.unloads(), 0);
    drop(second);
    assert_eq!(loader.unloads(), 1);
}

#[test]
fn test_constructor_failure_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "alpha", &["alphafilter", "brokenfilter"]);
    let loader = Arc::new(TextLoader::default());
    let registry = registry(&loader);
    registry.scan_path(dir.path()).unwrap();

    let err = registry.make("brokenfilter", None).unwrap_err();
    assert!(
        matches!(
            &err,
            Error::Plugin(PluginError::ConstructorFailed { plugin, feature })
                if plugin == "alpha" && feature == "brokenfilter"
        ),
        "{err}"
    );
    // The plugin itself stays usable.
    registry.make("alphafilter", None).unwrap();
    assert_eq!(loader.loads(), 1);
}
