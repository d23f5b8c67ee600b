//! JavaScript runtime powered by Boa engine
//!
//! A [`Runtime`] owns one engine context. With Node compatibility enabled
//! (the default) it also owns a CommonJS module loader and the built-in
//! shims, and installs the Node-style globals:
//! - `require`, `module`, `exports`, `__filename`, `__dirname`
//! - `process` and `global`
//!
//! Always available, from boa_runtime:
//! - Console API (console.log, console.error, etc.)
//! - URL API (URL, URLSearchParams)
//! - Text encoding (TextEncoder, TextDecoder)
//! - structuredClone
//! - queueMicrotask
//!
//! Pending promise jobs are drained after every top-level call. There is no
//! timer loop.

pub mod builtins;
pub mod console;
pub mod error;
pub mod loader;
pub mod path;
pub mod process;
pub mod vm;

use boa_engine::{
    Context, JsObject, JsResult, JsValue, Source, context::ContextBuilder, js_string,
};
use boa_runtime::{
    extensions::{
        ConsoleExtension, EncodingExtension, MicrotaskExtension, StructuredCloneExtension,
        UrlExtension,
    },
    register_extensions,
};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::resolver::{ModuleResolver, ResolverConfig, clean};
use crate::value::Value;
use builtins::{BUILTIN_NAMES, BuiltinOptions, BuiltinRegistry};
use loader::{ModuleLoader, SharedLoader};

pub use console::ConsoleSink;
pub use error::{ErrorKind, EvaluationError, RuntimeError, RuntimeResult};
pub use loader::{LoadLimits, ModuleInfo, ModuleState};

/// Name Node gives code passed on the command line
const EVAL_NAME: &str = "[eval]";

/// Engine polyfills installed ahead of the Node globals
const PRELUDE: &str = r#"
if (typeof Error.captureStackTrace !== 'function') {
    Error.captureStackTrace = function (targetObject) {
        const name = targetObject.name || 'Error';
        const message = targetObject.message;
        Object.defineProperty(targetObject, 'stack', {
            value: (message ? name + ': ' + message : name) + '\n    at <anonymous>',
            writable: true,
            configurable: true,
        });
    };
}
if (typeof Error.stackTraceLimit === 'undefined') {
    Error.stackTraceLimit = 10;
}
"#;

/// Configuration for a [`Runtime`]
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Install `require`, `module`, `process` and the shims
    pub enable_node_compat: bool,
    /// Working directory for relative requires, `fs` and `process.cwd()`
    pub cwd: PathBuf,
    /// `process.env` snapshot; the host environment when `None`
    pub env: Option<BTreeMap<String, String>>,
    /// `process.argv`
    pub argv: Vec<String>,
    pub resolver: ResolverConfig,
    pub limits: LoadLimits,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    /// Wrap each `evaluate` source in a block so top-level `let`/`const` do not leak
    pub scoped_evaluation: bool,
    pub console: ConsoleSink,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enable_node_compat: true,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            env: None,
            argv: vec!["sidewinder".to_string()],
            resolver: ResolverConfig::default(),
            limits: LoadLimits::default(),
            // Matches Node/V8 closely enough for deep module graphs
            recursion_limit: 16384,
            stack_size_limit: 1024 * 1024,
            scoped_evaluation: true,
            console: ConsoleSink::default(),
        }
    }
}

impl RuntimeConfig {
    /// Create a config rooted at `cwd`
    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            ..Default::default()
        }
    }

    pub fn with_node_compat(mut self, enabled: bool) -> Self {
        self.enable_node_compat = enabled;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }

    pub fn with_limits(mut self, limits: LoadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }
}

/// An embeddable JavaScript context with CommonJS support
pub struct Runtime {
    context: Context,
    config: RuntimeConfig,
    loader: Option<SharedLoader>,
    root_require: Option<JsObject>,
    eval_path: PathBuf,
}

impl Runtime {
    /// Create a new runtime rooted at the host's current directory
    pub fn new() -> RuntimeResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(mut config: RuntimeConfig) -> RuntimeResult<Self> {
        config.cwd = absolute(&config.cwd)?;
        let eval_path = config.cwd.join(EVAL_NAME);

        let mut context = ContextBuilder::default()
            .build()
            .map_err(|e| RuntimeError::JsError(e.to_string()))?;
        context
            .runtime_limits_mut()
            .set_recursion_limit(config.recursion_limit);
        context
            .runtime_limits_mut()
            .set_stack_size_limit(config.stack_size_limit);

        register_extensions(
            (
                ConsoleExtension(console::HostLogger::new(config.console)),
                UrlExtension,
                EncodingExtension,
                StructuredCloneExtension,
                MicrotaskExtension,
            ),
            None,
            &mut context,
        )
        .map_err(|e| RuntimeError::JsError(e.to_string()))?;

        let mut runtime = Self {
            context,
            config,
            loader: None,
            root_require: None,
            eval_path,
        };
        if runtime.config.enable_node_compat {
            runtime
                .install_node_compat()
                .map_err(|e| EvaluationError::from_js(&e, &mut runtime.context))?;
        }
        debug!(
            cwd = %runtime.config.cwd.display(),
            node_compat = runtime.config.enable_node_compat,
            "runtime ready"
        );
        Ok(runtime)
    }

    fn install_node_compat(&mut self) -> JsResult<()> {
        let context = &mut self.context;
        context.eval(Source::from_bytes(PRELUDE))?;

        let resolver = ModuleResolver::new(self.config.resolver.clone(), BUILTIN_NAMES);
        let loader = ModuleLoader::new(resolver, self.config.limits.clone()).shared();

        let options = BuiltinOptions {
            cwd: self.config.cwd.clone(),
            env: self
                .config
                .env
                .clone()
                .unwrap_or_else(|| std::env::vars().collect()),
            argv: self.config.argv.clone(),
        };
        let registry = BuiltinRegistry::populate(&options, &loader, context)?;
        let process = registry.get("process").cloned();
        loader.borrow_mut().set_builtins(registry);

        let global = context.global_object();
        global.set(js_string!("global"), global.clone(), false, context)?;
        if let Some(process) = process {
            global.set(js_string!("process"), process, false, context)?;
        }

        let module = loader::create_root_module(&loader, &self.eval_path, context)?;
        let require = module.get(js_string!("require"), context)?;
        let exports = module.get(js_string!("exports"), context)?;
        global.set(js_string!("require"), require.clone(), false, context)?;
        global.set(js_string!("module"), module, false, context)?;
        global.set(js_string!("exports"), exports, false, context)?;
        global.set(js_string!("__filename"), js_string!(EVAL_NAME), false, context)?;
        global.set(js_string!("__dirname"), js_string!("."), false, context)?;

        self.root_require = require.as_object().map(|o| o.clone());
        self.loader = Some(loader);
        Ok(())
    }

    /// Evaluate a script and marshal its completion value.
    ///
    /// Relative requires inside `source` resolve against the working directory.
    pub fn evaluate(&mut self, source: &str) -> Result<Value, EvaluationError> {
        let code = if self.config.scoped_evaluation {
            Cow::Owned(format!("{{\n{source}\n}}"))
        } else {
            Cow::Borrowed(source)
        };
        let result = self
            .context
            .eval(Source::from_bytes(code.as_bytes()).with_path(&self.eval_path));
        self.complete(result)
    }

    /// Call a global function by name.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
        let global = self.context.global_object();
        let function = global
            .get(js_string!(name), &mut self.context)
            .map_err(|e| EvaluationError::from_js(&e, &mut self.context))?;
        let function = match function.as_object() {
            Some(object) if object.is_callable() => object.clone(),
            _ => {
                return Err(EvaluationError::new(
                    ErrorKind::Evaluation,
                    format!("{name} is not a function"),
                ));
            }
        };
        let args = args
            .iter()
            .map(|arg| arg.to_js(&mut self.context))
            .collect::<JsResult<Vec<_>>>()
            .map_err(|e| EvaluationError::from_js(&e, &mut self.context))?;
        let result = function.call(&JsValue::undefined(), &args, &mut self.context);
        self.complete(result)
    }

    /// Define or replace a global binding.
    pub fn set_global(&mut self, name: &str, value: &Value) -> Result<(), EvaluationError> {
        let global = self.context.global_object();
        value
            .to_js(&mut self.context)
            .and_then(|value| global.set(js_string!(name), value, false, &mut self.context).map(|_| ()))
            .map_err(|e| EvaluationError::from_js(&e, &mut self.context))
    }

    /// `require(specifier)` from the working directory.
    pub fn require(&mut self, specifier: &str) -> Result<Value, EvaluationError> {
        let Some(require) = self.root_require.clone() else {
            return Err(compat_disabled());
        };
        let result = require.call(
            &JsValue::undefined(),
            &[js_string!(specifier).into()],
            &mut self.context,
        );
        self.complete(result)
    }

    /// Load `path` as the main module, so `require.main === module` inside it.
    pub fn run_main(&mut self, path: impl AsRef<Path>) -> Result<Value, EvaluationError> {
        let Some(loader) = self.loader.clone() else {
            return Err(compat_disabled());
        };
        let path = clean(&self.config.cwd.join(path.as_ref()));
        let path = path.canonicalize().map_err(|e| {
            EvaluationError::new(
                ErrorKind::FileNotFound,
                format!("Cannot find module '{}': {e}", path.display()),
            )
        })?;
        debug!(path = %path.display(), "running main module");

        let result = loader::load(&loader, &path, None, true, &mut self.context);
        let main = loader.borrow().main().cloned();
        if let (Some(require), Some(main)) = (&self.root_require, main) {
            let _ = require.set(js_string!("main"), main, false, &mut self.context);
        }
        self.complete(result)
    }

    /// Snapshot of every module record, in first-load order
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.loader
            .as_ref()
            .map(|loader| loader.borrow().modules())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cwd(&self) -> &Path {
        &self.config.cwd
    }

    /// Get mutable reference to the underlying context
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Release the engine and every cached module.
    pub fn dispose(self) {
        debug!(modules = self.modules().len(), "disposing runtime");
        drop(self);
    }

    /// Drain jobs and marshal the outcome of a top-level call
    fn complete(&mut self, result: JsResult<JsValue>) -> Result<Value, EvaluationError> {
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                let err = EvaluationError::from_js(&err, &mut self.context);
                let _ = self.context.run_jobs();
                return Err(err);
            }
        };
        self.context
            .run_jobs()
            .map_err(|e| EvaluationError::from_js(&e, &mut self.context))?;
        Value::from_js(&value, &mut self.context)
            .map_err(|e| EvaluationError::from_js(&e, &mut self.context))
    }
}

fn compat_disabled() -> EvaluationError {
    EvaluationError::new(
        ErrorKind::Evaluation,
        "require is not available: Node compatibility is disabled",
    )
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(clean(path))
    } else {
        Ok(clean(&std::env::current_dir()?.join(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runtime_in(dir: &Path) -> Runtime {
        Runtime::with_config(RuntimeConfig::with_cwd(dir).with_env(BTreeMap::new())).unwrap()
    }

    #[test]
    fn test_runtime_creation() {
        let runtime = Runtime::new();
        assert!(runtime.is_ok());
    }

    #[test]
    fn test_basic_javascript() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_in(dir.path());
        assert_eq!(runtime.evaluate("1 + 1").unwrap(), Value::from(2));
    }

    #[test]
    fn test_scoped_evaluation_does_not_leak_lexicals() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_in(dir.path());
        runtime.evaluate("const x = 1; x").unwrap();
        assert_eq!(runtime.evaluate("const x = 2; x").unwrap(), Value::from(2));
        assert_eq!(runtime.evaluate("typeof x").unwrap(), Value::from("undefined"));
    }

    #[test]
    fn test_call_and_set_global() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_in(dir.path());
        runtime
            .evaluate("globalThis.add = function (a, b) { return a + b; };")
            .unwrap();
        runtime.set_global("base", &Value::from(40)).unwrap();
        assert_eq!(
            runtime.call("add", &[Value::from(2), Value::from(40)]).unwrap(),
            Value::from(42)
        );
        assert_eq!(runtime.evaluate("base + 2").unwrap(), Value::from(42));
        let err = runtime.call("missing", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Evaluation);
    }

    #[test]
    fn test_promises_settle_before_return() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_in(dir.path());
        runtime
            .evaluate("globalThis.out = 0; Promise.resolve(42).then(v => { globalThis.out = v; });")
            .unwrap();
        assert_eq!(runtime.evaluate("out").unwrap(), Value::from(42));
    }

    #[test]
    fn test_thrown_error_is_classified() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_in(dir.path());
        let err = runtime.evaluate("throw new TypeError('bad')").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Evaluation);
        assert_eq!(err.message, "bad");
        assert!(!err.stack.is_empty());

        let err = runtime.evaluate("let = ;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_node_globals() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_in(dir.path());
        assert_eq!(
            runtime
                .evaluate("[typeof require, typeof module, global === globalThis, __filename]")
                .unwrap(),
            Value::from(vec![
                Value::from("function"),
                Value::from("object"),
                Value::Bool(true),
                Value::from("[eval]"),
            ])
        );
    }

    #[test]
    fn test_node_compat_disabled() {
        let dir = TempDir::new().unwrap();
        let config = RuntimeConfig::with_cwd(dir.path()).with_node_compat(false);
        let mut runtime = Runtime::with_config(config).unwrap();
        assert_eq!(
            runtime
                .evaluate("[typeof require, typeof module, typeof process, typeof global]")
                .unwrap(),
            Value::from(vec!["undefined", "undefined", "undefined", "undefined"])
        );
        assert!(runtime.require("fs").is_err());
        assert!(runtime.modules().is_empty());
    }

    #[test]
    fn test_console_and_web_apis() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_in(dir.path());
        assert!(runtime.evaluate("console.log('hello')").is_ok());
        assert_eq!(
            runtime
                .evaluate("new URL('https://example.com/path?q=1').hostname")
                .unwrap(),
            Value::from("example.com")
        );
        assert_eq!(
            runtime.evaluate("new TextEncoder().encode('Hello').length").unwrap(),
            Value::from(5)
        );
    }

    #[test]
    fn test_capture_stack_trace_polyfill() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_in(dir.path());
        assert_eq!(
            runtime
                .evaluate("const o = { name: 'E', message: 'm' }; Error.captureStackTrace(o); typeof o.stack")
                .unwrap(),
            Value::from("string")
        );
    }
}
