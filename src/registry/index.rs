//! Persisted registry index.
//!
//! The index records every dynamically loaded plugin with its file path,
//! modification time and features, so a later process can list and
//! instantiate elements without opening libraries it never uses. It is
//! serialized with rkyv; an entry whose file changed since it was written
//! is stale and ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rkyv::{Archive, Deserialize, Serialize};

use super::{ElementMetadata, PluginManifest, Rank};
use crate::error::{Error, Result};

/// Bumped whenever the layout below changes.
const INDEX_VERSION: u32 = 1;

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub(crate) struct IndexFile {
    pub version: u32,
    pub plugins: Vec<IndexedPlugin>,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub(crate) struct IndexedPlugin {
    pub name: String,
    pub version: String,
    pub description: String,
    pub path: String,
    pub mtime: u64,
    pub features: Vec<IndexedFeature>,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub(crate) struct IndexedFeature {
    pub name: String,
    pub klass: String,
    pub description: String,
    pub rank: u32,
}

impl IndexedPlugin {
    pub(crate) fn new(manifest: &PluginManifest, path: &Path, mtime: u64) -> Self {
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            path: path.to_string_lossy().into_owned(),
            mtime,
            features: manifest
                .features
                .iter()
                .map(|f| IndexedFeature {
                    name: f.name.clone(),
                    klass: f.klass.clone(),
                    description: f.description.clone(),
                    rank: f.rank as u32,
                })
                .collect(),
        }
    }

    pub(crate) fn path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// The file still exists with the recorded modification time.
    pub(crate) fn is_current(&self) -> bool {
        modification_time(&self.path()) == Some(self.mtime)
    }

    pub(crate) fn manifest(&self) -> PluginManifest {
        PluginManifest {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            features: self
                .features
                .iter()
                .map(|f| ElementMetadata {
                    name: f.name.clone(),
                    klass: f.klass.clone(),
                    description: f.description.clone(),
                    rank: Rank::from_value(f.rank),
                })
                .collect(),
        }
    }
}

/// Seconds since the epoch of the file's last modification.
pub(crate) fn modification_time(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_secs())
}

pub(crate) fn write(path: &Path, plugins: Vec<IndexedPlugin>) -> Result<()> {
    let file = IndexFile {
        version: INDEX_VERSION,
        plugins,
    };
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&file)
        .map_err(|err| Error::Index(err.to_string()))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &bytes)?;
    Ok(())
}

pub(crate) fn read(path: &Path) -> Result<Vec<IndexedPlugin>> {
    let raw = fs::read(path)?;
    let mut aligned = rkyv::util::AlignedVec::<16>::new();
    aligned.extend_from_slice(&raw);
    let file = rkyv::from_bytes::<IndexFile, rkyv::rancor::Error>(&aligned)
        .map_err(|err| Error::Index(err.to_string()))?;
    if file.version != INDEX_VERSION {
        return Err(Error::Index(format!(
            "index version {} (expected {INDEX_VERSION})",
            file.version
        )));
    }
    Ok(file.plugins)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> PluginManifest {
        PluginManifest {
            name: "demo".into(),
            version: "1.0".into(),
            description: "Demo plugin".into(),
            features: vec![ElementMetadata {
                name: "demosink".into(),
                klass: "Sink".into(),
                description: "Swallows buffers".into(),
                rank: Rank::Marginal,
            }],
        }
    }

    #[test]
    fn test_round_trip_keeps_features() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libdemo.so");
        fs::write(&lib, b"not really a library").unwrap();
        let mtime = modification_time(&lib).unwrap();

        let index = dir.path().join("registry.bin");
        write(&index, vec![IndexedPlugin::new(&manifest(), &lib, mtime)]).unwrap();

        let plugins = read(&index).unwrap();
        assert_eq!(plugins.len(), 1);
        assert!(plugins[0].is_current());
        assert_eq!(plugins[0].manifest(), manifest());
    }

    #[test]
    fn test_stale_entry_detected() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libdemo.so");
        fs::write(&lib, b"x").unwrap();
        let entry = IndexedPlugin::new(&manifest(), &lib, 1);
        assert!(!entry.is_current());
        fs::remove_file(&lib).unwrap();
        let entry = IndexedPlugin::new(&manifest(), &lib, 0);
        assert!(!entry.is_current());
    }

    #[test]
    fn test_garbage_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("registry.bin");
        fs::write(&index, b"garbage").unwrap();
        assert!(matches!(read(&index), Err(Error::Index(_))));
    }
}
