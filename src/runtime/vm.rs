//! `vm` shim - evaluate strings in this realm or in a fresh one
//!
//! `runInNewContext`/`runInContext` compile the code in a brand-new engine
//! realm. The sandbox's own enumerable properties are copied onto the new
//! global before running and the new global's enumerable properties are
//! copied back afterwards, so assignments made by the code are visible on
//! the sandbox object.

use boa_engine::{
    Context, JsArgs, JsNativeError, JsObject, JsResult, JsValue, NativeFunction, Source, js_string,
    object::ObjectInitializer,
};
use std::path::PathBuf;
use tracing::trace;

use crate::value::own_enumerable_keys;

const VM_GLUE: &str = r#"
(function (native) {
    const contexts = new WeakSet();

    function filenameOf(options) {
        if (typeof options === 'string') return options;
        return (options && options.filename) || 'evalmachine.<anonymous>';
    }

    function createContext(sandbox = {}) {
        if (sandbox === null || typeof sandbox !== 'object') {
            throw new TypeError('The "contextObject" argument must be of type object');
        }
        contexts.add(sandbox);
        return sandbox;
    }

    function isContext(object) {
        return object !== null && typeof object === 'object' && contexts.has(object);
    }

    function runInContext(code, contextifiedObject, options) {
        if (!isContext(contextifiedObject)) {
            throw new TypeError('The "contextifiedObject" argument must be an vm.Context');
        }
        return native.runInRealm(String(code), contextifiedObject, filenameOf(options));
    }

    function runInNewContext(code, sandbox, options) {
        return native.runInRealm(String(code), createContext(sandbox ?? {}), filenameOf(options));
    }

    function runInThisContext(code, options) {
        return native.runInThisRealm(String(code), filenameOf(options));
    }

    class Script {
        constructor(code, options) {
            this.code = String(code);
            this.filename = filenameOf(options);
        }
        runInThisContext() {
            return runInThisContext(this.code, this.filename);
        }
        runInContext(contextifiedObject) {
            return runInContext(this.code, contextifiedObject, this.filename);
        }
        runInNewContext(sandbox) {
            return runInNewContext(this.code, sandbox, this.filename);
        }
    }

    return { Script, createContext, isContext, runInContext, runInNewContext, runInThisContext };
})
"#;

fn code_and_filename(args: &[JsValue], filename_index: usize, context: &mut Context) -> JsResult<(String, PathBuf)> {
    let code = args.get_or_undefined(0).to_string(context)?.to_std_string_escaped();
    let filename = args
        .get_or_undefined(filename_index)
        .to_string(context)?
        .to_std_string_escaped();
    Ok((code, PathBuf::from(filename)))
}

/// Evaluate in the current realm, as an indirect eval would
fn run_in_this_realm(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let (code, filename) = code_and_filename(args, 1, context)?;
    context.eval(Source::from_bytes(code.as_bytes()).with_path(&filename))
}

/// Evaluate in a fresh realm whose globals mirror `sandbox`
fn run_in_realm(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let (code, filename) = code_and_filename(args, 2, context)?;
    let Some(sandbox) = args.get_or_undefined(1).as_object().map(|o| o.clone()) else {
        return Err(JsNativeError::typ()
            .with_message("vm sandbox must be an object")
            .into());
    };

    let keys = own_enumerable_keys(&sandbox, context)?;
    let realm = context.create_realm()?;
    trace!(filename = %filename.display(), keys = keys.len(), "running code in new realm");

    let previous = context.enter_realm(realm);
    let result = eval_with_sandbox(&code, &filename, &sandbox, &keys, context);
    context.enter_realm(previous);
    result
}

fn eval_with_sandbox(
    code: &str,
    filename: &std::path::Path,
    sandbox: &JsObject,
    keys: &[String],
    context: &mut Context,
) -> JsResult<JsValue> {
    let global = context.global_object();
    for key in keys {
        let value = sandbox.get(js_string!(key.clone()), context)?;
        global.set(js_string!(key.clone()), value, false, context)?;
    }

    let result = context.eval(Source::from_bytes(code.as_bytes()).with_path(filename));

    for key in own_enumerable_keys(&global, context)? {
        let value = global.get(js_string!(key.clone()), context)?;
        sandbox.set(js_string!(key), value, false, context)?;
    }
    result
}

/// Build the `vm` shim
pub fn create_vm_object(context: &mut Context) -> JsResult<JsObject> {
    let native = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(run_in_realm), js_string!("runInRealm"), 3)
        .function(NativeFunction::from_fn_ptr(run_in_this_realm), js_string!("runInThisRealm"), 2)
        .build();

    let glue = context.eval(Source::from_bytes(VM_GLUE))?;
    let Some(glue) = glue.as_object().map(|o| o.clone()) else {
        return Err(JsNativeError::typ().with_message("vm glue did not evaluate to a function").into());
    };
    let vm = glue.call(&JsValue::undefined(), &[native.into()], context)?;
    vm.as_object()
        .map(|o| o.clone())
        .ok_or_else(|| JsNativeError::typ().with_message("vm glue did not return an object").into())
}
