//! Node.js-compatible `require()` resolution
//!
//! Two modes are available:
//! - `Classic` walks the filesystem directly: built-ins, relative/absolute
//!   paths, `node_modules` ascent, `package.json` `main`, extension and index
//!   fallback.
//! - `PackageExports` hands file and package lookup to `oxc_resolver` with
//!   CommonJS conditions, so packages that publish only an `exports` map
//!   resolve too.
//!
//! Both modes check built-in names first and never touch the filesystem for
//! them.

pub mod manifest;

use manifest::{ManifestCache, ManifestError};
use oxc_resolver::{ResolveOptions, Resolver};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// How file and package specifiers are looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    #[default]
    Classic,
    PackageExports,
}

/// Resolver settings
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub mode: ResolutionMode,
    /// Extensions tried after the bare path, in order
    pub extensions: Vec<String>,
    /// Global folders consulted after the `node_modules` ascent
    pub extra_search_paths: Vec<PathBuf>,
    /// Keep symlinked paths instead of canonicalizing them
    pub preserve_symlinks: bool,
    /// Cache parsed manifests (revalidated by size and mtime)
    pub cache_manifests: bool,
    /// Ceiling on `main` indirections followed for one specifier
    pub max_resolution_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mode: ResolutionMode::Classic,
            extensions: vec![".js".into(), ".json".into()],
            extra_search_paths: Vec::new(),
            preserve_symlinks: false,
            cache_manifests: false,
            max_resolution_depth: 32,
        }
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A built-in shim, by its canonical (unprefixed) name
    Builtin(String),
    /// An absolute file path
    File(PathBuf),
}

/// The resolution step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStep {
    Relative,
    Absolute,
    NodeModules,
    PackageEntry,
    ExportsMap,
}

impl fmt::Display for ResolveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Relative => "relative path",
            Self::Absolute => "absolute path",
            Self::NodeModules => "node_modules lookup",
            Self::PackageEntry => "package entry point",
            Self::ExportsMap => "package exports",
        })
    }
}

/// Errors that can occur during module resolution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Cannot find module '{specifier}' from '{}' ({step})", referrer.display())]
    NotFound {
        specifier: String,
        referrer: PathBuf,
        step: ResolveStep,
        tried: Vec<PathBuf>,
    },

    #[error("Invalid package config {}: {reason} (while resolving '{specifier}' from '{}')", manifest.display(), referrer.display())]
    InvalidManifest {
        specifier: String,
        referrer: PathBuf,
        manifest: PathBuf,
        reason: String,
    },

    #[error("No such built-in module: {0}")]
    UnknownBuiltin(String),

    #[error("Resolving '{specifier}' followed more than {limit} package entry points")]
    TooDeep { specifier: String, limit: usize },
}

/// Result type for module resolution operations
pub type ResolverResult<T> = Result<T, ResolveError>;

/// Internal failure of the file/directory step, before the request context is attached
enum Miss {
    NotFound,
    Manifest(ManifestError),
    TooDeep,
}

/// Node.js-compatible module resolver
pub struct ModuleResolver {
    config: ResolverConfig,
    builtins: HashSet<String>,
    manifests: ManifestCache,
    exports_resolver: Option<Resolver>,
}

impl ModuleResolver {
    /// Create a resolver that knows the given built-in names
    pub fn new<I, S>(config: ResolverConfig, builtins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exports_resolver = (config.mode == ResolutionMode::PackageExports).then(|| {
            Resolver::new(ResolveOptions {
                condition_names: vec!["require".into(), "node".into(), "default".into()],
                extensions: config.extensions.clone(),
                main_fields: vec!["main".into()],
                exports_fields: vec![vec!["exports".into()]],
                imports_fields: vec![vec!["imports".into()]],
                modules: std::iter::once("node_modules".to_string())
                    .chain(
                        config
                            .extra_search_paths
                            .iter()
                            .map(|p| p.to_string_lossy().into_owned()),
                    )
                    .collect(),
                symlinks: !config.preserve_symlinks,
                ..ResolveOptions::default()
            })
        });

        Self {
            manifests: ManifestCache::new(config.cache_manifests),
            builtins: builtins.into_iter().map(Into::into).collect(),
            exports_resolver,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Whether `name` (with or without `node:`) names a built-in
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins
            .contains(name.strip_prefix("node:").unwrap_or(name))
    }

    /// Resolve `specifier` as required from the file `referrer`.
    pub fn resolve(&self, specifier: &str, referrer: &Path) -> ResolverResult<Resolution> {
        if let Some(name) = specifier.strip_prefix("node:") {
            return if self.builtins.contains(name) {
                Ok(Resolution::Builtin(name.to_string()))
            } else {
                Err(ResolveError::UnknownBuiltin(specifier.to_string()))
            };
        }
        if self.builtins.contains(specifier) {
            return Ok(Resolution::Builtin(specifier.to_string()));
        }

        let base = referrer.parent().unwrap_or(Path::new("/"));
        let resolved = match &self.exports_resolver {
            Some(resolver) => self.resolve_with_exports(resolver, specifier, base, referrer)?,
            None => self.resolve_classic(specifier, base, referrer)?,
        };

        let resolved = if self.config.preserve_symlinks {
            resolved
        } else {
            std::fs::canonicalize(&resolved).unwrap_or(resolved)
        };
        debug!(specifier, referrer = %referrer.display(), resolved = %resolved.display(), "resolved module");
        Ok(Resolution::File(resolved))
    }

    fn resolve_classic(
        &self,
        specifier: &str,
        base: &Path,
        referrer: &Path,
    ) -> ResolverResult<PathBuf> {
        let mut tried = Vec::new();
        let attach = |miss: Miss, step: ResolveStep, tried: Vec<PathBuf>| match miss {
            Miss::NotFound => ResolveError::NotFound {
                specifier: specifier.to_string(),
                referrer: referrer.to_path_buf(),
                step,
                tried,
            },
            Miss::Manifest(err) => ResolveError::InvalidManifest {
                specifier: specifier.to_string(),
                referrer: referrer.to_path_buf(),
                manifest: err.path,
                reason: err.reason,
            },
            Miss::TooDeep => ResolveError::TooDeep {
                specifier: specifier.to_string(),
                limit: self.config.max_resolution_depth,
            },
        };

        if specifier.starts_with('.') || specifier.starts_with('/') {
            let (candidate, step) = if specifier.starts_with('/') {
                (clean(Path::new(specifier)), ResolveStep::Absolute)
            } else {
                (clean(&base.join(specifier)), ResolveStep::Relative)
            };
            return self
                .resolve_path(&candidate, 0, &mut tried)
                .map_err(|miss| attach(miss, step, tried));
        }

        for dir in node_modules_paths(base)
            .into_iter()
            .chain(self.config.extra_search_paths.iter().cloned())
        {
            let candidate = clean(&dir.join(specifier));
            match self.resolve_path(&candidate, 0, &mut tried) {
                Ok(found) => return Ok(found),
                Err(Miss::NotFound) => continue,
                Err(miss) => return Err(attach(miss, ResolveStep::PackageEntry, tried)),
            }
        }
        Err(attach(Miss::NotFound, ResolveStep::NodeModules, tried))
    }

    /// The file/directory step: exact file, extensions, then directory entry point.
    fn resolve_path(&self, candidate: &Path, depth: usize, tried: &mut Vec<PathBuf>) -> Result<PathBuf, Miss> {
        if let Some(file) = self.resolve_file(candidate, tried) {
            return Ok(file);
        }
        if !candidate.is_dir() {
            return Err(Miss::NotFound);
        }

        let manifest = self.manifests.read(candidate).map_err(Miss::Manifest)?;
        if let Some(manifest) = manifest.filter(|m| m.has_main()) {
            if depth >= self.config.max_resolution_depth {
                return Err(Miss::TooDeep);
            }
            let entry = clean(&candidate.join(manifest.entry()));
            trace!(package = %candidate.display(), entry = %entry.display(), "following package main");
            match self.resolve_path(&entry, depth + 1, tried) {
                Err(Miss::NotFound) => {}
                other => return other,
            }
        }
        self.resolve_file(&candidate.join("index"), tried)
            .ok_or(Miss::NotFound)
    }

    fn resolve_file(&self, candidate: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let exact = std::iter::once(candidate.to_path_buf());
        let with_extensions = self.config.extensions.iter().map(|ext| {
            let mut name = OsString::from(candidate.as_os_str());
            name.push(ext);
            PathBuf::from(name)
        });
        for path in exact.chain(with_extensions) {
            trace!(candidate = %path.display(), "trying candidate");
            if path.is_file() {
                return Some(path);
            }
            tried.push(path);
        }
        None
    }

    fn resolve_with_exports(
        &self,
        resolver: &Resolver,
        specifier: &str,
        base: &Path,
        referrer: &Path,
    ) -> ResolverResult<PathBuf> {
        resolver
            .resolve(base, specifier)
            .map(|resolution| resolution.path().to_path_buf())
            .map_err(|error| {
                debug!(specifier, %error, "exports resolution failed");
                ResolveError::NotFound {
                    specifier: specifier.to_string(),
                    referrer: referrer.to_path_buf(),
                    step: ResolveStep::ExportsMap,
                    tried: Vec::new(),
                }
            })
    }
}

/// `node_modules` directories searched from `dir`, innermost first.
///
/// Directories that are themselves named `node_modules` are skipped, so no
/// `node_modules/node_modules` candidates are produced.
pub fn node_modules_paths(dir: &Path) -> Vec<PathBuf> {
    dir.ancestors()
        .filter(|ancestor| ancestor.file_name().is_none_or(|name| name != "node_modules"))
        .map(|ancestor| ancestor.join("node_modules"))
        .collect()
}

/// Lexically normalize `.` and `..` components.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn resolver() -> ModuleResolver {
        ModuleResolver::new(ResolverConfig::default(), ["fs", "path"])
    }

    #[test]
    fn test_builtins_skip_filesystem() {
        let resolver = resolver();
        let referrer = Path::new("/nonexistent/index.js");
        assert_eq!(
            resolver.resolve("fs", referrer).unwrap(),
            Resolution::Builtin("fs".into())
        );
        assert_eq!(
            resolver.resolve("node:path", referrer).unwrap(),
            Resolution::Builtin("path".into())
        );
        assert!(matches!(
            resolver.resolve("node:nope", referrer),
            Err(ResolveError::UnknownBuiltin(_))
        ));
    }

    #[test]
    fn test_relative_with_extension_fallback() {
        let (_dir, root) = project();
        write(&root.join("lib/util.js"), "");
        write(&root.join("data.json"), "{}");

        let resolver = resolver();
        let referrer = root.join("lib/main.js");
        assert_eq!(
            resolver.resolve("./util", &referrer).unwrap(),
            Resolution::File(root.join("lib/util.js"))
        );
        assert_eq!(
            resolver.resolve("../data", &referrer).unwrap(),
            Resolution::File(root.join("data.json"))
        );
    }

    #[test]
    fn test_manifest_main() {
        let (_dir, root) = project();
        write(
            &root.join("node_modules/pkg/package.json"),
            r#"{"name":"pkg","version":"1.2.3","main":"lib/index.js"}"#,
        );
        write(&root.join("node_modules/pkg/lib/index.js"), "");

        let resolved = resolver().resolve("pkg", &root.join("index.js")).unwrap();
        assert_eq!(
            resolved,
            Resolution::File(root.join("node_modules/pkg/lib/index.js"))
        );
    }

    #[test]
    fn test_main_pointing_at_directory() {
        let (_dir, root) = project();
        write(&root.join("node_modules/pkg/package.json"), r#"{"main":"./dist"}"#);
        write(&root.join("node_modules/pkg/dist/index.js"), "");

        let resolved = resolver().resolve("pkg", &root.join("index.js")).unwrap();
        assert_eq!(
            resolved,
            Resolution::File(root.join("node_modules/pkg/dist/index.js"))
        );
    }

    #[test]
    fn test_missing_main_falls_back_to_index() {
        let (_dir, root) = project();
        write(&root.join("node_modules/pkg/package.json"), r#"{"main":"gone.js"}"#);
        write(&root.join("node_modules/pkg/index.js"), "");

        let resolved = resolver().resolve("pkg", &root.join("index.js")).unwrap();
        assert_eq!(resolved, Resolution::File(root.join("node_modules/pkg/index.js")));
    }

    #[test]
    fn test_ascent_order() {
        let (_dir, root) = project();
        let b = root.join("node_modules/a/node_modules/b");
        assert_eq!(
            &node_modules_paths(&b)[..3],
            &[
                root.join("node_modules/a/node_modules/b/node_modules"),
                root.join("node_modules/a/node_modules"),
                root.join("node_modules"),
            ]
        );

        write(&root.join("node_modules/c/index.js"), "");
        write(&b.join("index.js"), "");
        let referrer = b.join("index.js");
        let resolver = resolver();
        assert_eq!(
            resolver.resolve("c", &referrer).unwrap(),
            Resolution::File(root.join("node_modules/c/index.js"))
        );

        write(&root.join("node_modules/a/node_modules/c/index.js"), "");
        assert_eq!(
            resolver.resolve("c", &referrer).unwrap(),
            Resolution::File(root.join("node_modules/a/node_modules/c/index.js"))
        );
    }

    #[test]
    fn test_scoped_package_subpath() {
        let (_dir, root) = project();
        write(&root.join("node_modules/@scope/name/sub.js"), "");
        let resolved = resolver()
            .resolve("@scope/name/sub", &root.join("index.js"))
            .unwrap();
        assert_eq!(resolved, Resolution::File(root.join("node_modules/@scope/name/sub.js")));
    }

    #[test]
    fn test_not_found_names_specifier_referrer_and_step() {
        let (_dir, root) = project();
        let err = resolver()
            .resolve("definitely-not-a-real-package", &root.join("index.js"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'definitely-not-a-real-package'"));
        assert!(message.contains(&root.display().to_string()));
        assert!(message.contains("node_modules lookup"));
        match err {
            ResolveError::NotFound { tried, .. } => {
                assert!(tried.contains(&root.join("node_modules/definitely-not-a-real-package.js")))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_manifest() {
        let (_dir, root) = project();
        write(&root.join("node_modules/broken/package.json"), "{ nope");
        let err = resolver().resolve("broken", &root.join("index.js")).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidManifest { .. }));
    }

    #[test]
    fn test_determinism() {
        let (_dir, root) = project();
        write(&root.join("node_modules/tiny/index.js"), "");
        let resolver = resolver();
        let referrer = root.join("index.js");
        assert_eq!(
            resolver.resolve("tiny", &referrer).unwrap(),
            resolver.resolve("tiny", &referrer).unwrap()
        );
    }

    #[test]
    fn test_extra_search_paths() {
        let (_dir, root) = project();
        write(&root.join("global/shared/index.js"), "");
        write(&root.join("app/index.js"), "");
        let config = ResolverConfig {
            extra_search_paths: vec![root.join("global")],
            ..ResolverConfig::default()
        };
        let resolved = ModuleResolver::new(config, Vec::<String>::new())
            .resolve("shared", &root.join("app/index.js"))
            .unwrap();
        assert_eq!(resolved, Resolution::File(root.join("global/shared/index.js")));
    }

    #[test]
    fn test_exports_mode() {
        let (_dir, root) = project();
        write(
            &root.join("node_modules/modern/package.json"),
            r#"{"name":"modern","exports":{".":{"require":"./cjs/entry.js","import":"./esm/entry.mjs"}}}"#,
        );
        write(&root.join("node_modules/modern/cjs/entry.js"), "");
        let config = ResolverConfig {
            mode: ResolutionMode::PackageExports,
            ..ResolverConfig::default()
        };
        let resolved = ModuleResolver::new(config, ["fs"])
            .resolve("modern", &root.join("index.js"))
            .unwrap();
        assert_eq!(resolved, Resolution::File(root.join("node_modules/modern/cjs/entry.js")));
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean(Path::new("a/../..")), PathBuf::from(".."));
        assert_eq!(clean(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(clean(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn test_clean_keeps_leading_parent_chain() {
        assert_eq!(clean(Path::new("../..")), PathBuf::from("../.."));
        assert_eq!(clean(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(clean(Path::new("../a/../../b")), PathBuf::from("../../b"));
    }

    #[test]
    fn test_main_cycle_is_too_deep() {
        let (_dir, root) = project();
        write(&root.join("node_modules/x/package.json"), r#"{"main":"../y"}"#);
        write(&root.join("node_modules/y/package.json"), r#"{"main":"../x"}"#);
        let config = ResolverConfig {
            max_resolution_depth: 4,
            ..ResolverConfig::default()
        };
        let err = ModuleResolver::new(config, ["fs"])
            .resolve("x", &root.join("index.js"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::TooDeep { limit: 4, .. }), "{err:?}");
    }
}
