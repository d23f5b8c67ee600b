//! CommonJS module cache and loader
//!
//! One [`ModuleLoader`] exists per runtime and is shared, behind a GC cell,
//! with every `require` function handed to guest code. Records are stored in
//! an append-only arena indexed by resolved path. The loading stack doubles as
//! the cycle detector: requiring a record that is still `Loading` returns its
//! current `module.exports` instead of re-entering it.
//!
//! The loader cell is never borrowed while guest code runs; every borrow is
//! released before compiling or calling into a module.

use boa_engine::{
    Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction,
    Source, js_string,
    object::{FunctionObjectBuilder, ObjectInitializer, builtins::JsArray, builtins::JsFunction},
    property::Attribute,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::builtins::BuiltinRegistry;
use super::error::{
    EvaluationError, codes, define_stack, is_runtime_limit, module_error, synthesize_stack,
};
use crate::fs::sync::fs_error;
use crate::resolver::{ModuleResolver, Resolution, ResolveError, node_modules_paths};

/// The loader as shared with native `require` functions
pub type SharedLoader = Gc<GcRefCell<ModuleLoader>>;

/// Lifecycle of a module record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Ceilings for a single load burst (from the outermost `require` until the stack empties)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadLimits {
    /// Total records a runtime may hold
    pub max_modules: usize,
    /// Nesting of in-progress `require` calls
    pub max_require_depth: usize,
    /// Wall-clock budget for one burst
    pub max_load_time: Option<Duration>,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            max_modules: 10_000,
            max_require_depth: 1_024,
            max_load_time: None,
        }
    }
}

#[derive(Trace, Finalize)]
struct ModuleRecord {
    #[unsafe_ignore_trace]
    path: PathBuf,
    #[unsafe_ignore_trace]
    state: ModuleState,
    module: JsObject,
    exports: JsValue,
    #[unsafe_ignore_trace]
    error: Option<EvaluationError>,
    thrown: JsValue,
}

/// Host-side snapshot of one record
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInfo {
    pub path: PathBuf,
    pub state: ModuleState,
    pub error: Option<EvaluationError>,
}

/// Module cache, require stack and resolver for one runtime
#[derive(Trace, Finalize)]
pub struct ModuleLoader {
    records: Vec<ModuleRecord>,
    #[unsafe_ignore_trace]
    index: HashMap<PathBuf, usize>,
    #[unsafe_ignore_trace]
    stack: Vec<usize>,
    #[unsafe_ignore_trace]
    resolver: ModuleResolver,
    #[unsafe_ignore_trace]
    limits: LoadLimits,
    #[unsafe_ignore_trace]
    burst_started: Option<Instant>,
    builtins: BuiltinRegistry,
    /// Guest-visible `require.cache`
    cache: JsObject,
    main: Option<JsObject>,
}

impl ModuleLoader {
    pub fn new(resolver: ModuleResolver, limits: LoadLimits) -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            stack: Vec::new(),
            resolver,
            limits,
            burst_started: None,
            builtins: BuiltinRegistry::default(),
            cache: JsObject::with_null_proto(),
            main: None,
        }
    }

    pub fn shared(self) -> SharedLoader {
        Gc::new(GcRefCell::new(self))
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    pub fn set_builtins(&mut self, builtins: BuiltinRegistry) {
        self.builtins = builtins;
    }

    pub fn main(&self) -> Option<&JsObject> {
        self.main.as_ref()
    }

    /// Records in first-load order
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.records
            .iter()
            .map(|record| ModuleInfo {
                path: record.path.clone(),
                state: record.state,
                error: record.error.clone(),
            })
            .collect()
    }

    /// Paths of the modules currently loading, innermost first
    fn loading_paths(&self) -> Vec<PathBuf> {
        self.stack
            .iter()
            .rev()
            .map(|&id| self.records[id].path.clone())
            .collect()
    }
}

/// `referrer` followed by the modules that are loading it, without repeats
fn require_stack(loader: &SharedLoader, referrer: &Path) -> Vec<PathBuf> {
    let mut stack = vec![referrer.to_path_buf()];
    for path in loader.borrow().loading_paths() {
        if !stack.contains(&path) {
            stack.push(path);
        }
    }
    stack
}

fn raise(loader: &SharedLoader, code: &str, message: &str, referrer: &Path, context: &mut Context) -> JsError {
    let stack = require_stack(loader, referrer);
    let refs: Vec<&Path> = stack.iter().map(PathBuf::as_path).collect();
    module_error(code, message, &refs, context)
}

fn resolve_failure(loader: &SharedLoader, err: &ResolveError, referrer: &Path, context: &mut Context) -> JsError {
    let code = match err {
        ResolveError::NotFound { .. } => codes::MODULE_NOT_FOUND,
        ResolveError::InvalidManifest { .. } => codes::INVALID_PACKAGE_CONFIG,
        ResolveError::UnknownBuiltin(_) => codes::UNKNOWN_BUILTIN_MODULE,
        ResolveError::TooDeep { .. } => codes::RESOURCE_EXHAUSTED,
    };
    debug!(referrer = %referrer.display(), %err, "require failed to resolve");
    raise(loader, code, &err.to_string(), referrer, context)
}

#[derive(Trace, Finalize)]
struct RequireCaptures {
    loader: SharedLoader,
    #[unsafe_ignore_trace]
    referrer: PathBuf,
    parent: Option<JsObject>,
}

fn specifier_arg(args: &[JsValue]) -> JsResult<String> {
    let Some(specifier) = args.first().and_then(|v| v.as_string().map(|s| s.to_std_string_escaped())) else {
        let received = args
            .first()
            .map(|v| v.type_of().to_string())
            .unwrap_or_else(|| "undefined".to_string());
        return Err(JsNativeError::typ()
            .with_message(format!("The \"id\" argument must be of type string. Received {received}"))
            .into());
    };
    if specifier.is_empty() {
        return Err(JsNativeError::typ()
            .with_message("The argument 'id' must be a non-empty string. Received ''")
            .into());
    }
    Ok(specifier)
}

fn require_native(_this: &JsValue, args: &[JsValue], captures: &RequireCaptures, context: &mut Context) -> JsResult<JsValue> {
    let specifier = specifier_arg(args)?;
    require(
        &captures.loader,
        &specifier,
        &captures.referrer,
        captures.parent.as_ref(),
        context,
    )
}

fn resolve_native(_this: &JsValue, args: &[JsValue], captures: &RequireCaptures, context: &mut Context) -> JsResult<JsValue> {
    let specifier = specifier_arg(args)?;
    let resolution = captures
        .loader
        .borrow()
        .resolver
        .resolve(&specifier, &captures.referrer);
    match resolution {
        Ok(Resolution::Builtin(_)) => Ok(js_string!(specifier).into()),
        Ok(Resolution::File(path)) => Ok(js_string!(path.to_string_lossy().into_owned()).into()),
        Err(err) => Err(resolve_failure(&captures.loader, &err, &captures.referrer, context)),
    }
}

/// Build a `require` function whose relative lookups start at `referrer`.
pub fn create_require(
    loader: &SharedLoader,
    referrer: &Path,
    parent: Option<&JsObject>,
    context: &mut Context,
) -> JsResult<JsFunction> {
    let captures = || RequireCaptures {
        loader: loader.clone(),
        referrer: referrer.to_path_buf(),
        parent: parent.cloned(),
    };

    let require = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(require_native, captures()),
    )
    .name(js_string!("require"))
    .length(1)
    .build();

    let resolve = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(resolve_native, captures()),
    )
    .name(js_string!("resolve"))
    .length(1)
    .build();

    let (cache, main) = {
        let loader = loader.borrow();
        (loader.cache.clone(), loader.main.clone())
    };
    require.set(js_string!("resolve"), resolve, false, context)?;
    require.set(js_string!("cache"), cache, false, context)?;
    require.set(
        js_string!("main"),
        main.map(JsValue::from).unwrap_or_else(JsValue::undefined),
        false,
        context,
    )?;
    Ok(require)
}

/// Resolve and load `specifier` on behalf of `referrer`.
pub fn require(
    loader: &SharedLoader,
    specifier: &str,
    referrer: &Path,
    parent: Option<&JsObject>,
    context: &mut Context,
) -> JsResult<JsValue> {
    let resolution = loader.borrow().resolver.resolve(specifier, referrer);
    match resolution {
        Ok(Resolution::Builtin(name)) => {
            let shim = loader.borrow().builtins.get(&name).cloned();
            match shim {
                Some(shim) => Ok(shim.into()),
                None => Err(raise(
                    loader,
                    codes::UNKNOWN_BUILTIN_MODULE,
                    &format!("No such built-in module: {name}"),
                    referrer,
                    context,
                )),
            }
        }
        Ok(Resolution::File(path)) => load(loader, &path, parent, false, context),
        Err(err) => Err(resolve_failure(loader, &err, referrer, context)),
    }
}

/// Build the `module` object for `path` together with its `require`.
fn create_module_object(
    loader: &SharedLoader,
    path: &Path,
    id: &str,
    parent: Option<&JsObject>,
    is_main: bool,
    context: &mut Context,
) -> JsResult<JsObject> {
    let dir = path.parent().unwrap_or(Path::new("/"));
    let exports = JsObject::with_object_proto(context.intrinsics());
    let children = JsArray::new(context);
    let paths = JsArray::new(context);
    for lookup in node_modules_paths(dir) {
        paths.push(js_string!(lookup.to_string_lossy().into_owned()), context)?;
    }
    let parent_value = parent.cloned().map(JsValue::from).unwrap_or_else(JsValue::undefined);

    let module = ObjectInitializer::new(context)
        .property(js_string!("id"), js_string!(id), Attribute::all())
        .property(
            js_string!("filename"),
            js_string!(path.to_string_lossy().into_owned()),
            Attribute::all(),
        )
        .property(
            js_string!("path"),
            js_string!(dir.to_string_lossy().into_owned()),
            Attribute::all(),
        )
        .property(js_string!("exports"), exports, Attribute::all())
        .property(js_string!("loaded"), false, Attribute::all())
        .property(js_string!("children"), children, Attribute::all())
        .property(js_string!("paths"), paths, Attribute::all())
        .property(js_string!("parent"), parent_value, Attribute::all())
        .build();

    if is_main {
        loader.borrow_mut().main = Some(module.clone());
    }
    let require = create_require(loader, path, Some(&module), context)?;
    module.set(js_string!("require"), require, false, context)?;

    if let Some(parent) = parent {
        if let Some(siblings) = parent.get(js_string!("children"), context)?.as_object() {
            if let Ok(siblings) = JsArray::from_object(siblings.clone()) {
                siblings.push(module.clone(), context)?;
            }
        }
    }
    Ok(module)
}

/// The `module` object backing top-level `evaluate` calls
pub fn create_root_module(loader: &SharedLoader, referrer: &Path, context: &mut Context) -> JsResult<JsObject> {
    create_module_object(loader, referrer, "[eval]", None, false, context)
}

fn check_limits(loader: &SharedLoader, path: &Path, context: &mut Context) -> JsResult<()> {
    let violation = {
        let loader = loader.borrow();
        let limits = &loader.limits;
        if loader.records.len() >= limits.max_modules {
            Some(format!(
                "Module limit of {} exceeded while loading '{}'",
                limits.max_modules,
                path.display()
            ))
        } else if loader.stack.len() >= limits.max_require_depth {
            Some(format!(
                "Require depth limit of {} exceeded while loading '{}'",
                limits.max_require_depth,
                path.display()
            ))
        } else {
            match (limits.max_load_time, loader.burst_started) {
                (Some(budget), Some(started)) if started.elapsed() > budget => Some(format!(
                    "Load time budget of {budget:?} exceeded while loading '{}'",
                    path.display()
                )),
                _ => None,
            }
        }
    };

    match violation {
        Some(message) => {
            warn!(path = %path.display(), "{message}");
            let referrer = loader
                .borrow()
                .loading_paths()
                .first()
                .cloned()
                .unwrap_or_else(|| path.to_path_buf());
            Err(raise(loader, codes::RESOURCE_EXHAUSTED, &message, &referrer, context))
        }
        None => Ok(()),
    }
}

/// Load the file at `path` (already resolved) and return its exports.
pub fn load(
    loader: &SharedLoader,
    path: &Path,
    parent: Option<&JsObject>,
    is_main: bool,
    context: &mut Context,
) -> JsResult<JsValue> {
    let existing = {
        let loader = loader.borrow();
        loader.index.get(path).map(|&id| {
            let record = &loader.records[id];
            (
                record.state,
                record.exports.clone(),
                record.module.clone(),
                record.thrown.clone(),
            )
        })
    };
    if let Some((state, exports, module, thrown)) = existing {
        match state {
            ModuleState::Loaded => {
                trace!(path = %path.display(), "module cache hit");
                return Ok(exports);
            }
            ModuleState::Loading => {
                debug!(path = %path.display(), "circular require, returning partial exports");
                return module.get(js_string!("exports"), context);
            }
            ModuleState::Failed => return Err(JsError::from_opaque(thrown)),
            ModuleState::Unloaded => {}
        }
    }

    check_limits(loader, path, context)?;

    let id_text = if is_main {
        ".".to_string()
    } else {
        path.to_string_lossy().into_owned()
    };
    let module = create_module_object(loader, path, &id_text, parent, is_main, context)?;

    let (id, cache) = {
        let mut loader = loader.borrow_mut();
        let existing = loader.index.get(path).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                loader.records.push(ModuleRecord {
                    path: path.to_path_buf(),
                    state: ModuleState::Unloaded,
                    module: module.clone(),
                    exports: JsValue::undefined(),
                    error: None,
                    thrown: JsValue::undefined(),
                });
                let id = loader.records.len() - 1;
                loader.index.insert(path.to_path_buf(), id);
                id
            }
        };
        let record = &mut loader.records[id];
        record.module = module.clone();
        record.state = ModuleState::Loading;
        if loader.stack.is_empty() {
            loader.burst_started = Some(Instant::now());
        }
        loader.stack.push(id);
        (id, loader.cache.clone())
    };

    let key = JsString::from(path.to_string_lossy().into_owned());
    cache.set(key.clone(), module.clone(), false, context)?;
    debug!(path = %path.display(), "loading module");

    let outcome = execute(path, &module, context);
    finish(loader, id, &key, outcome, context)
}

fn finish(
    loader: &SharedLoader,
    id: usize,
    key: &JsString,
    outcome: JsResult<()>,
    context: &mut Context,
) -> JsResult<JsValue> {
    let (module, path, cache) = {
        let loader = loader.borrow();
        let record = &loader.records[id];
        (record.module.clone(), record.path.clone(), loader.cache.clone())
    };

    let outcome = outcome.and_then(|()| {
        let exports = module.get(js_string!("exports"), context)?;
        module.set(js_string!("loaded"), true, false, context)?;
        Ok(exports)
    });

    let pop = |loader: &mut ModuleLoader| {
        if loader.stack.last() == Some(&id) {
            loader.stack.pop();
        }
        if loader.stack.is_empty() {
            loader.burst_started = None;
        }
    };

    match outcome {
        Ok(exports) => {
            let mut loader = loader.borrow_mut();
            pop(&mut loader);
            let record = &mut loader.records[id];
            record.state = ModuleState::Loaded;
            record.exports = exports.clone();
            debug!(path = %path.display(), "module loaded");
            Ok(exports)
        }
        Err(err) => {
            let thrown = thrown_value(loader, &err, &path, context);
            let info = EvaluationError::from_value(&thrown, context);
            let _ = cache.delete_property_or_throw(key.clone(), context);
            let mut loader = loader.borrow_mut();
            pop(&mut loader);
            let record = &mut loader.records[id];
            record.state = ModuleState::Failed;
            record.error = Some(info);
            record.thrown = thrown.clone();
            debug!(path = %path.display(), "module failed");
            Err(JsError::from_opaque(thrown))
        }
    }
}

/// The value a failed module re-throws on every later `require`.
fn thrown_value(loader: &SharedLoader, err: &JsError, path: &Path, context: &mut Context) -> JsValue {
    if let Some(native) = err.as_native() {
        if is_runtime_limit(native) {
            let message = format!("{} while loading '{}'", native.message(), path.display());
            return raise(loader, codes::RESOURCE_EXHAUSTED, &message, path, context).to_opaque(context);
        }
    }
    err.to_opaque(context)
}

fn strip_bom(source: &str) -> &str {
    source.strip_prefix('\u{feff}').unwrap_or(source)
}

/// Blank out a leading `#!` line, keeping line numbers stable
fn strip_shebang(source: &str) -> &str {
    match source.strip_prefix("#!") {
        Some(rest) => rest.find('\n').map_or("", |idx| &rest[idx..]),
        None => source,
    }
}

/// Wrap CommonJS source in the function Node calls with the module scope bindings
pub fn wrap_source(source: &str) -> String {
    let body = strip_shebang(strip_bom(source));
    format!("(function (exports, require, module, __filename, __dirname) {{{body}\n}})")
}

fn json_error(path: &Path, err: &serde_json::Error, context: &mut Context) -> JsError {
    let message = format!("{}: {err}", path.display());
    if path.file_name().is_some_and(|name| name == "package.json") {
        let message = format!("Invalid package config {message}");
        return module_error(codes::INVALID_PACKAGE_CONFIG, &message, &[path], context);
    }
    let error = JsNativeError::syntax().with_message(message.clone()).to_opaque(context);
    match define_stack(&error, &synthesize_stack("SyntaxError", &message, Some(path)), context) {
        Ok(()) => JsError::from_opaque(error.into()),
        Err(err) => err,
    }
}

fn execute(path: &Path, module: &JsObject, context: &mut Context) -> JsResult<()> {
    let source = std::fs::read_to_string(path).map_err(|e| fs_error(&e, "open", path, context))?;

    if path.extension().is_some_and(|ext| ext == "json") {
        let json: serde_json::Value =
            serde_json::from_str(strip_bom(&source)).map_err(|e| json_error(path, &e, context))?;
        let exports = JsValue::from_json(&json, context)?;
        module.set(js_string!("exports"), exports, false, context)?;
        return Ok(());
    }

    let compiled = context.eval(Source::from_bytes(wrap_source(&source).as_bytes()).with_path(path))?;
    let Some(function) = compiled.as_object().map(|o| o.clone()) else {
        return Err(JsNativeError::typ()
            .with_message(format!("module wrapper for '{}' did not compile to a function", path.display()))
            .into());
    };

    let exports = module.get(js_string!("exports"), context)?;
    let require = module.get(js_string!("require"), context)?;
    let filename = JsValue::from(js_string!(path.to_string_lossy().into_owned()));
    let dirname = JsValue::from(js_string!(
        path.parent().unwrap_or(Path::new("/")).to_string_lossy().into_owned()
    ));
    function.call(
        &exports,
        &[exports.clone(), require, module.clone().into(), filename, dirname],
        context,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_source_strips_shebang_and_bom() {
        let wrapped = wrap_source("\u{feff}#!/usr/bin/env node\nmodule.exports = 1;");
        assert_eq!(
            wrapped,
            "(function (exports, require, module, __filename, __dirname) {\nmodule.exports = 1;\n})"
        );
    }

    #[test]
    fn test_wrap_source_keeps_first_line() {
        let wrapped = wrap_source("'use strict'; exports.a = 1;");
        assert!(wrapped.contains("{'use strict'; exports.a = 1;\n}"));
    }

    #[test]
    fn test_default_limits() {
        let limits = LoadLimits::default();
        assert_eq!(limits.max_modules, 10_000);
        assert_eq!(limits.max_load_time, None);
    }
}
