//! Built-in shim registry
//!
//! Shims are constructed once per runtime and handed out by identity, so
//! `require('fs') === require('node:fs')` and `require('fs/promises') ===
//! require('fs').promises` both hold.

use boa_engine::{
    Context, JsArgs, JsNativeError, JsObject, JsResult, JsValue, NativeFunction, js_string,
    object::ObjectInitializer, object::builtins::JsArray, property::Attribute,
};
use boa_gc::{Finalize, Trace};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::loader::{SharedLoader, create_require};
use super::path::create_path_object;
use super::process::{ProcessInfo, create_process_object};
use super::vm::create_vm_object;
use crate::fs::create_fs_object;

/// Names `require` treats as built-in, with or without the `node:` prefix
pub const BUILTIN_NAMES: [&str; 7] = [
    "fs",
    "fs/promises",
    "module",
    "path",
    "path/posix",
    "process",
    "vm",
];

/// Host values the shims are built from
#[derive(Debug, Clone)]
pub struct BuiltinOptions {
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub argv: Vec<String>,
}

#[derive(Debug, Default, Trace, Finalize)]
pub struct BuiltinRegistry {
    shims: HashMap<String, JsObject>,
}

impl BuiltinRegistry {
    /// Build every shim. `loader` backs `module.createRequire`.
    pub fn populate(options: &BuiltinOptions, loader: &SharedLoader, context: &mut Context) -> JsResult<Self> {
        let cwd = options.cwd.to_string_lossy().into_owned();
        let mut shims = HashMap::new();

        let fs = create_fs_object(&options.cwd, context)?;
        let fs_promises = fs
            .get(js_string!("promises"), context)?
            .as_object()
            .map(|o| o.clone())
            .ok_or_else(|| JsNativeError::typ().with_message("fs shim is missing `promises`"))?;
        shims.insert("fs".to_string(), fs);
        shims.insert("fs/promises".to_string(), fs_promises);

        let path = create_path_object(&cwd, context)?;
        shims.insert("path/posix".to_string(), path.clone());
        shims.insert("path".to_string(), path);

        let info = ProcessInfo {
            cwd: &cwd,
            env: &options.env,
            argv: &options.argv,
        };
        shims.insert("process".to_string(), create_process_object(&info, context)?);
        shims.insert("vm".to_string(), create_vm_object(context)?);
        shims.insert("module".to_string(), create_module_shim(loader, context)?);

        debug!(count = shims.len(), "built-in shims ready");
        Ok(Self { shims })
    }

    /// Look up a shim by bare or `node:`-prefixed name
    pub fn get(&self, name: &str) -> Option<&JsObject> {
        let name = name.strip_prefix("node:").unwrap_or(name);
        self.shims.get(name)
    }

    pub fn len(&self) -> usize {
        self.shims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shims.is_empty()
    }
}

#[derive(Trace, Finalize)]
struct ModuleShimCaptures {
    loader: SharedLoader,
}

fn is_builtin(_this: &JsValue, args: &[JsValue], captures: &ModuleShimCaptures, _context: &mut Context) -> JsResult<JsValue> {
    let found = args
        .get_or_undefined(0)
        .as_string()
        .map(|name| captures.loader.borrow().resolver().is_builtin(&name.to_std_string_escaped()))
        .unwrap_or(false);
    Ok(found.into())
}

/// `module.createRequire(filename)`
fn create_require_from(_this: &JsValue, args: &[JsValue], captures: &ModuleShimCaptures, context: &mut Context) -> JsResult<JsValue> {
    let Some(filename) = args.get_or_undefined(0).as_string().map(|s| s.to_std_string_escaped()) else {
        return Err(JsNativeError::typ()
            .with_message("The argument 'filename' must be a file URL object, file URL string, or absolute path string")
            .into());
    };
    let filename = filename.strip_prefix("file://").unwrap_or(&filename);
    if !filename.starts_with('/') {
        return Err(JsNativeError::typ()
            .with_message(format!(
                "The argument 'filename' must be a file URL object, file URL string, or absolute path string. Received '{filename}'"
            ))
            .into());
    }
    // A trailing slash names a directory; lookups start inside it.
    let referrer = if filename.ends_with('/') {
        Path::new(filename).join("noop.js")
    } else {
        PathBuf::from(filename)
    };
    let require = create_require(&captures.loader, &referrer, None, context)?;
    Ok(require.into())
}

fn create_module_shim(loader: &SharedLoader, context: &mut Context) -> JsResult<JsObject> {
    let names = JsArray::new(context);
    for name in BUILTIN_NAMES {
        names.push(js_string!(name), context)?;
    }

    let is_builtin_fn = NativeFunction::from_copy_closure_with_captures(
        is_builtin,
        ModuleShimCaptures { loader: loader.clone() },
    );
    let create_require_fn = NativeFunction::from_copy_closure_with_captures(
        create_require_from,
        ModuleShimCaptures { loader: loader.clone() },
    );

    Ok(ObjectInitializer::new(context)
        .property(js_string!("builtinModules"), names, Attribute::all())
        .function(is_builtin_fn, js_string!("isBuiltin"), 1)
        .function(create_require_fn, js_string!("createRequire"), 1)
        .build())
}
