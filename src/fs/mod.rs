//! `fs` shim - read-only, synchronous file system access for guest code
//!
//! The synchronous functions are native (see [`sync`]). Callback and promise
//! flavors are thin JavaScript wrappers around them: they run the sync call
//! immediately and hand back an already-settled promise, or schedule the
//! callback as a microtask. No background I/O happens.

pub mod sync;

use boa_engine::{
    Context, JsObject, JsResult, JsValue, NativeFunction, Source, js_string,
    object::ObjectInitializer, property::Attribute,
};
use std::path::Path;
use sync::FsRoot;

/// Callback and promise wrappers, applied once to the freshly built shim
const ASYNC_WRAPPERS: &str = r#"
(function (fs) {
    function settle(syncFn) {
        return function (...args) {
            return new Promise((resolve, reject) => {
                try {
                    resolve(syncFn(...args));
                } catch (e) {
                    reject(e);
                }
            });
        };
    }

    function withCallback(syncFn) {
        return function (...args) {
            const callback = typeof args[args.length - 1] === 'function' ? args.pop() : null;
            if (!callback) {
                throw new TypeError('The "cb" argument must be of type function');
            }
            let result;
            try {
                result = syncFn(...args);
            } catch (e) {
                queueMicrotask(() => callback(e));
                return;
            }
            queueMicrotask(() => callback(null, result));
        };
    }

    const names = ['readFile', 'stat', 'lstat', 'readdir', 'realpath', 'access'];
    const promises = {};
    for (const name of names) {
        const syncFn = fs[name + 'Sync'];
        fs[name] = withCallback(syncFn);
        promises[name] = settle(syncFn);
    }

    fs.exists = function (path, callback) {
        const exists = fs.existsSync(path);
        queueMicrotask(() => callback(exists));
    };

    promises.constants = fs.constants;
    fs.promises = promises;
})
"#;

type FsNative = fn(&JsValue, &[JsValue], &FsRoot, &mut Context) -> JsResult<JsValue>;

/// Build the `fs` shim rooted at `cwd`. `fs.promises` is a sub-object of it.
pub fn create_fs_object(cwd: &Path, context: &mut Context) -> JsResult<JsObject> {
    let root = FsRoot::new(cwd);

    let constants = ObjectInitializer::new(context)
        .property(js_string!("F_OK"), 0, Attribute::all())
        .property(js_string!("R_OK"), 4, Attribute::all())
        .property(js_string!("W_OK"), 2, Attribute::all())
        .property(js_string!("X_OK"), 1, Attribute::all())
        .build();

    let natives: [(&str, FsNative); 7] = [
        ("existsSync", sync::exists_sync),
        ("readFileSync", sync::read_file_sync),
        ("statSync", sync::stat_sync),
        ("lstatSync", sync::lstat_sync),
        ("readdirSync", sync::readdir_sync),
        ("realpathSync", sync::realpath_sync),
        ("accessSync", sync::access_sync),
    ];

    let fs_obj = JsObject::with_object_proto(context.intrinsics());
    fs_obj.set(js_string!("constants"), constants, false, context)?;
    for (name, native) in natives {
        let function = NativeFunction::from_copy_closure_with_captures(native, root.clone())
            .to_js_function(context.realm());
        fs_obj.set(js_string!(name), function, false, context)?;
    }

    let wrap = context.eval(Source::from_bytes(ASYNC_WRAPPERS))?;
    if let Some(wrap) = wrap.as_object() {
        wrap.call(&JsValue::undefined(), &[fs_obj.clone().into()], context)?;
    }

    Ok(fs_obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Context) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut context = Context::default();
        context
            .eval(Source::from_bytes("globalThis.queueMicrotask = f => Promise.resolve().then(f);"))
            .unwrap();
        let fs = create_fs_object(dir.path(), &mut context).unwrap();
        context
            .global_object()
            .set(js_string!("fs"), fs, false, &mut context)
            .unwrap();
        (dir, context)
    }

    fn eval(context: &mut Context, code: &str) -> Value {
        let value = context.eval(Source::from_bytes(code)).unwrap();
        context.run_jobs().unwrap();
        Value::from_js(&value, context).unwrap()
    }

    #[test]
    fn test_relative_paths_use_runtime_cwd() {
        let (_dir, mut context) = setup();
        assert_eq!(eval(&mut context, "fs.existsSync('hello.txt')"), Value::Bool(true));
        assert_eq!(eval(&mut context, "fs.existsSync('nope.txt')"), Value::Bool(false));
        assert_eq!(
            eval(&mut context, "fs.readFileSync('hello.txt', 'utf8')"),
            Value::from("hello world")
        );
        assert_eq!(
            eval(&mut context, "fs.readFileSync('hello.txt', { encoding: 'base64' })"),
            Value::from("aGVsbG8gd29ybGQ=")
        );
    }

    #[test]
    fn test_bytes_without_encoding() {
        let (_dir, mut context) = setup();
        assert_eq!(
            eval(&mut context, "const b = fs.readFileSync('hello.txt'); [b.length, b[0], b.toString()]"),
            Value::from(vec![Value::from(11), Value::from(104), Value::from("hello world")])
        );
    }

    #[test]
    fn test_missing_file_error() {
        let (_dir, mut context) = setup();
        let value = eval(
            &mut context,
            "try { fs.readFileSync('missing.txt', 'utf8'); 'no error' } catch (e) { [e.code, e.syscall, typeof e.stack] }",
        );
        assert_eq!(
            value,
            Value::from(vec![Value::from("ENOENT"), Value::from("open"), Value::from("string")])
        );
    }

    #[test]
    fn test_stat_and_readdir() {
        let (_dir, mut context) = setup();
        assert_eq!(
            eval(&mut context, "[fs.statSync('sub').isDirectory(), fs.statSync('hello.txt').size]"),
            Value::from(vec![Value::Bool(true), Value::from(11)])
        );
        assert_eq!(
            eval(&mut context, "fs.readdirSync('.')"),
            Value::from(vec!["hello.txt", "sub"])
        );
        assert_eq!(
            eval(&mut context, "fs.statSync('nope', { throwIfNoEntry: false })"),
            Value::Undefined
        );
    }

    #[test]
    fn test_promises_settle_after_jobs() {
        let (_dir, mut context) = setup();
        eval(
            &mut context,
            "var out = []; fs.promises.readFile('hello.txt', 'utf8').then(t => out.push(t)); \
             fs.promises.readFile('missing').catch(e => out.push(e.code));",
        );
        assert_eq!(
            eval(&mut context, "out"),
            Value::from(vec!["hello world", "ENOENT"])
        );
    }

    #[test]
    fn test_callback_flavor() {
        let (_dir, mut context) = setup();
        eval(
            &mut context,
            "var seen = null; fs.readFile('hello.txt', 'utf8', (err, text) => { seen = [err, text]; });",
        );
        assert_eq!(
            eval(&mut context, "seen"),
            Value::from(vec![Value::Null, Value::from("hello world")])
        );
    }
}
