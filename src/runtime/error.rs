//! Host-facing error types
//!
//! Guest exceptions never leave the runtime as engine values. At the boundary
//! they are classified into an [`ErrorKind`] and flattened into an
//! [`EvaluationError`] carrying the message and a stack string.

use boa_engine::{
    Context, JsError, JsNativeError, JsObject, JsResult, JsValue, js_string,
    object::builtins::JsArray, property::PropertyDescriptor,
};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Node error codes attached to errors raised by the module layer
pub mod codes {
    pub const MODULE_NOT_FOUND: &str = "MODULE_NOT_FOUND";
    pub const INVALID_PACKAGE_CONFIG: &str = "ERR_INVALID_PACKAGE_CONFIG";
    pub const UNKNOWN_BUILTIN_MODULE: &str = "ERR_UNKNOWN_BUILTIN_MODULE";
    pub const RESOURCE_EXHAUSTED: &str = "ERR_RESOURCE_EXHAUSTED";
    pub const ENOENT: &str = "ENOENT";
}

/// Failure taxonomy shared by the resolver, the loader and `evaluate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A specifier could not be resolved to a file or built-in
    ModuleNotFound,
    /// A `package.json` exists but could not be used
    InvalidManifest,
    /// Guest source failed to compile
    Syntax,
    /// Guest code threw while running
    Evaluation,
    /// A filesystem shim call targeted a missing path
    FileNotFound,
    /// A configured ceiling (modules, depth, time, recursion) was exceeded
    ResourceExhausted,
}

impl ErrorKind {
    /// Classify from a Node `code` property
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            codes::MODULE_NOT_FOUND | codes::UNKNOWN_BUILTIN_MODULE => Some(Self::ModuleNotFound),
            codes::INVALID_PACKAGE_CONFIG => Some(Self::InvalidManifest),
            codes::RESOURCE_EXHAUSTED => Some(Self::ResourceExhausted),
            codes::ENOENT => Some(Self::FileNotFound),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ModuleNotFound => "ModuleNotFound",
            Self::InvalidManifest => "InvalidManifest",
            Self::Syntax => "SyntaxError",
            Self::Evaluation => "EvaluationError",
            Self::FileNotFound => "FileNotFound",
            Self::ResourceExhausted => "ResourceExhausted",
        };
        f.write_str(name)
    }
}

/// A guest failure as seen by the host
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct EvaluationError {
    pub kind: ErrorKind,
    pub message: String,
    /// Guest stack trace; synthesized from name and message when the engine has none
    pub stack: String,
    /// Node-style `code` property, when the guest error carried one
    pub code: Option<String>,
}

impl EvaluationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            stack: format!("{kind}: {message}"),
            message,
            code: None,
        }
    }

    /// Convert an engine error into a host error.
    pub fn from_js(error: &JsError, context: &mut Context) -> Self {
        if let Some(native) = error.as_native() {
            return Self::from_native(native);
        }
        match error.as_opaque() {
            Some(value) => Self::from_value(&value.clone(), context),
            None => Self::new(ErrorKind::Evaluation, error.to_string()),
        }
    }

    fn from_native(native: &JsNativeError) -> Self {
        let text = native.to_string();
        let kind = if is_runtime_limit(native) {
            ErrorKind::ResourceExhausted
        } else if text.starts_with("SyntaxError") {
            ErrorKind::Syntax
        } else {
            ErrorKind::Evaluation
        };
        Self {
            kind,
            message: native.message().to_string(),
            stack: text,
            code: None,
        }
    }

    /// Classify a thrown guest value: `code` first, then `name`.
    pub fn from_value(value: &JsValue, context: &mut Context) -> Self {
        let Some(object) = value.as_object().map(|o| o.clone()) else {
            let message = value
                .to_string(context)
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_else(|_| "uncaught exception".to_string());
            return Self::new(ErrorKind::Evaluation, format!("Uncaught {message}"));
        };

        let name = string_property(&object, "name", context).unwrap_or_else(|| "Error".into());
        let message = string_property(&object, "message", context).unwrap_or_default();
        let code = string_property(&object, "code", context);
        let stack = string_property(&object, "stack", context)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| synthesize_stack(&name, &message, None));

        let kind = code
            .as_deref()
            .and_then(ErrorKind::from_code)
            .unwrap_or(if name == "SyntaxError" {
                ErrorKind::Syntax
            } else {
                ErrorKind::Evaluation
            });

        Self {
            kind,
            message,
            stack,
            code,
        }
    }
}

/// Errors that can occur while constructing or driving a runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("JavaScript error: {0}")]
    JsError(String),

    #[error("{0}")]
    Evaluation(#[from] EvaluationError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for runtime setup operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Engine limit errors cannot be caught by guest code or turned into objects.
pub(crate) fn is_runtime_limit(native: &JsNativeError) -> bool {
    native.to_string().starts_with("RuntimeLimit")
}

fn string_property(object: &JsObject, key: &str, context: &mut Context) -> Option<String> {
    let value = object.get(js_string!(key), context).ok()?;
    if value.is_undefined() || value.is_null() {
        return None;
    }
    value
        .to_string(context)
        .ok()
        .map(|s| s.to_std_string_escaped())
}

pub(crate) fn synthesize_stack(name: &str, message: &str, location: Option<&Path>) -> String {
    let head = if message.is_empty() {
        name.to_string()
    } else {
        format!("{name}: {message}")
    };
    match location {
        Some(path) => format!("{head}\n    at {}", path.display()),
        None => format!("{head}\n    at <anonymous>"),
    }
}

/// Install `stack` as an own, non-enumerable data property.
pub(crate) fn define_stack(object: &JsObject, stack: &str, context: &mut Context) -> JsResult<()> {
    object.define_property_or_throw(
        js_string!("stack"),
        PropertyDescriptor::builder()
            .value(js_string!(stack))
            .writable(true)
            .enumerable(false)
            .configurable(true),
        context,
    )?;
    Ok(())
}

/// Build a Node-style `Error` with a `code`, a `requireStack` and a stack string.
pub(crate) fn module_error(
    code: &str,
    message: &str,
    require_stack: &[&Path],
    context: &mut Context,
) -> JsError {
    let build = |context: &mut Context| -> JsResult<JsObject> {
        let mut full_message = message.to_string();
        if !require_stack.is_empty() {
            full_message.push_str("\nRequire stack:");
            for path in require_stack {
                full_message.push_str(&format!("\n- {}", path.display()));
            }
        }

        let object = JsNativeError::error()
            .with_message(full_message.clone())
            .to_opaque(context);
        object.set(js_string!("code"), js_string!(code), false, context)?;

        let stack = JsArray::new(context);
        for path in require_stack {
            stack.push(js_string!(path.to_string_lossy().into_owned()), context)?;
        }
        object.set(js_string!("requireStack"), stack, false, context)?;

        let trace = synthesize_stack("Error", &full_message, require_stack.first().copied());
        define_stack(&object, &trace, context)?;
        Ok(object)
    };

    match build(context) {
        Ok(object) => JsError::from_opaque(object.into()),
        Err(err) => err,
    }
}
