//! `package.json` parsing and an optional revalidating cache

use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

/// The fields of `package.json` the resolver uses
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PackageManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub main: Option<String>,
}

impl PackageManifest {
    /// Entry point relative to the package directory
    pub fn entry(&self) -> &str {
        match self.main.as_deref().map(str::trim) {
            Some(main) if !main.is_empty() => main,
            _ => "index.js",
        }
    }

    /// Whether `main` was given explicitly
    pub fn has_main(&self) -> bool {
        self.main.as_deref().is_some_and(|m| !m.trim().is_empty())
    }

    pub fn parse(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source.trim_start_matches('\u{feff}'))
    }
}

/// Why a manifest could not be used
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestError {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct CachedManifest {
    len: u64,
    modified: Option<SystemTime>,
    manifest: PackageManifest,
}

/// Reads manifests, optionally caching them keyed by path.
///
/// Cached entries are revalidated against file length and modification time
/// on every lookup, so an edited manifest is never served stale.
#[derive(Debug, Default)]
pub struct ManifestCache {
    enabled: bool,
    entries: RefCell<HashMap<PathBuf, CachedManifest>>,
}

impl ManifestCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// Read `<dir>/package.json`. `Ok(None)` when it does not exist.
    pub fn read(&self, dir: &Path) -> Result<Option<PackageManifest>, ManifestError> {
        let path = dir.join("package.json");
        let Ok(metadata) = fs::metadata(&path) else {
            if self.enabled {
                self.entries.borrow_mut().remove(&path);
            }
            return Ok(None);
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        let modified = metadata.modified().ok();

        if self.enabled {
            if let Some(cached) = self.entries.borrow().get(&path) {
                if cached.len == metadata.len() && cached.modified == modified {
                    trace!(path = %path.display(), "manifest cache hit");
                    return Ok(Some(cached.manifest.clone()));
                }
            }
        }

        let source = fs::read_to_string(&path).map_err(|e| ManifestError {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let manifest = PackageManifest::parse(&source).map_err(|e| ManifestError {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if self.enabled {
            self.entries.borrow_mut().insert(
                path,
                CachedManifest {
                    len: metadata.len(),
                    modified,
                    manifest: manifest.clone(),
                },
            );
        }
        Ok(Some(manifest))
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
