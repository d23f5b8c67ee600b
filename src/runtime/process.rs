//! Process API - the subset of Node's `process` object packages look for
//!
//! Provides:
//! - process.cwd() - the runtime's configured working directory
//! - process.env - frozen snapshot taken when the runtime was built
//! - process.argv, process.pid
//! - process.platform, process.arch
//! - process.version, process.versions
//! - process.nextTick(callback, ...args)
//! - process.emitWarning(warning)

use boa_engine::{
    Context, JsArgs, JsObject, JsResult, JsString, JsValue, NativeFunction, Source, js_string,
    object::ObjectInitializer, object::builtins::JsArray, property::Attribute,
};
use std::collections::BTreeMap;
use tracing::warn;

/// Node release line packages see in `process.version`
pub const NODE_COMPAT_VERSION: &str = "20.0.0";

/// Inputs for building the `process` object
#[derive(Debug, Clone)]
pub struct ProcessInfo<'a> {
    pub cwd: &'a str,
    pub env: &'a BTreeMap<String, String>,
    pub argv: &'a [String],
}

pub fn platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "win32"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "freebsd") {
        "freebsd"
    } else if cfg!(target_os = "openbsd") {
        "openbsd"
    } else if cfg!(target_os = "android") {
        "android"
    } else {
        "unknown"
    }
}

pub fn arch() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "x64"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else if cfg!(target_arch = "x86") {
        "ia32"
    } else if cfg!(target_arch = "arm") {
        "arm"
    } else if cfg!(target_arch = "powerpc64") {
        "ppc64"
    } else if cfg!(target_arch = "s390x") {
        "s390x"
    } else {
        "unknown"
    }
}

fn freeze(object: &JsObject, context: &mut Context) -> JsResult<()> {
    let object_ctor = context.intrinsics().constructors().object().constructor();
    let freeze = object_ctor.get(js_string!("freeze"), context)?;
    if let Some(freeze) = freeze.as_object() {
        freeze.call(&JsValue::undefined(), &[object.clone().into()], context)?;
    }
    Ok(())
}

fn emit_warning(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let warning = args.get_or_undefined(0);
    let text = match warning.as_object() {
        Some(obj) => obj
            .get(js_string!("message"), context)?
            .to_string(context)?
            .to_std_string_escaped(),
        None => warning.to_string(context)?.to_std_string_escaped(),
    };
    warn!(target: "sidewinder::guest", "{text}");
    Ok(JsValue::undefined())
}

/// Build the `process` object
pub fn create_process_object(info: &ProcessInfo<'_>, context: &mut Context) -> JsResult<JsObject> {
    let env = JsObject::with_object_proto(context.intrinsics());
    for (key, value) in info.env {
        env.create_data_property_or_throw(js_string!(key.clone()), js_string!(value.clone()), context)?;
    }
    freeze(&env, context)?;

    let argv = JsArray::new(context);
    for arg in info.argv {
        argv.push(js_string!(arg.clone()), context)?;
    }

    let versions = ObjectInitializer::new(context)
        .property(js_string!("node"), js_string!(NODE_COMPAT_VERSION), Attribute::all())
        .property(js_string!("sidewinder"), js_string!(env!("CARGO_PKG_VERSION")), Attribute::all())
        .build();

    let cwd_fn = NativeFunction::from_copy_closure_with_captures(
        |_this, _args, cwd: &JsString, _context| Ok(cwd.clone().into()),
        JsString::from(info.cwd),
    );

    let process = ObjectInitializer::new(context)
        .property(js_string!("title"), js_string!("sidewinder"), Attribute::all())
        .property(js_string!("platform"), js_string!(platform()), Attribute::all())
        .property(js_string!("arch"), js_string!(arch()), Attribute::all())
        .property(js_string!("version"), js_string!(format!("v{NODE_COMPAT_VERSION}")), Attribute::all())
        .property(js_string!("versions"), versions, Attribute::all())
        .property(js_string!("pid"), std::process::id(), Attribute::all())
        .property(js_string!("argv"), argv, Attribute::all())
        .property(js_string!("env"), env, Attribute::READONLY | Attribute::ENUMERABLE)
        .function(cwd_fn, js_string!("cwd"), 0)
        .function(NativeFunction::from_fn_ptr(emit_warning), js_string!("emitWarning"), 1)
        .build();

    let next_tick = context.eval(Source::from_bytes(
        "(function (callback, ...args) { queueMicrotask(() => callback(...args)); })",
    ))?;
    process.set(js_string!("nextTick"), next_tick, false, context)?;

    Ok(process)
}
