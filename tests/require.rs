use sidewinder::{ErrorKind, LoadLimits, ModuleState, Runtime, RuntimeConfig, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn project() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn runtime(root: &Path) -> Runtime {
    Runtime::with_config(RuntimeConfig::with_cwd(root).with_env(BTreeMap::new())).unwrap()
}

#[test]
fn requires_package_from_node_modules() {
    let (_dir, root) = project();
    write(&root, "node_modules/tiny/index.js", "module.exports = 42;");
    let mut rt = runtime(&root);
    assert_eq!(rt.evaluate("require('tiny')").unwrap(), Value::from(42));
}

#[test]
fn follows_manifest_main() {
    let (_dir, root) = project();
    write(&root, "node_modules/pkg/package.json", r#"{ "name": "pkg", "main": "lib/entry.js" }"#);
    write(&root, "node_modules/pkg/lib/entry.js", "exports.name = 'entry';");
    write(&root, "node_modules/@scope/util/index.js", "module.exports = 'scoped';");
    let mut rt = runtime(&root);
    assert_eq!(rt.evaluate("require('pkg').name").unwrap(), Value::from("entry"));
    assert_eq!(rt.evaluate("require('@scope/util')").unwrap(), Value::from("scoped"));
}

#[test]
fn circular_requires_see_partial_exports() {
    let (_dir, root) = project();
    write(
        &root,
        "a.js",
        "exports.early = 'a'; const b = require('./b'); exports.seen = b.sawA; exports.done = true;",
    );
    write(
        &root,
        "b.js",
        "const a = require('./a'); exports.sawA = a.early; exports.aDone = a.done === true;",
    );
    let mut rt = runtime(&root);
    let a = rt.evaluate("require('./a')").unwrap();
    assert_eq!(a.get("early"), Some(&Value::from("a")));
    assert_eq!(a.get("seen"), Some(&Value::from("a")));
    assert_eq!(a.get("done"), Some(&Value::Bool(true)));
    assert_eq!(rt.evaluate("require('./b').aDone").unwrap(), Value::Bool(false));
}

#[test]
fn module_and_builtin_identity() {
    let (_dir, root) = project();
    write(&root, "a.js", "module.exports = {};");
    let mut rt = runtime(&root);
    assert_eq!(
        rt.evaluate(
            "[require('fs') === require('node:fs'), \
              require('fs/promises') === require('fs').promises, \
              require('path') === require('path/posix'), \
              require('./a') === require('./a.js')]"
        )
        .unwrap(),
        Value::from(vec![true, true, true, true])
    );
}

#[test]
fn requires_json() {
    let (_dir, root) = project();
    write(&root, "package.json", r#"{ "name": "app", "version": "1.2.3" }"#);
    let mut rt = runtime(&root);
    assert_eq!(
        rt.evaluate("require('./package.json').version").unwrap(),
        Value::from("1.2.3")
    );
}

#[test]
fn missing_module_error_shape() {
    let (_dir, root) = project();
    let mut rt = runtime(&root);

    let err = rt.evaluate("require('missing-pkg')").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ModuleNotFound);
    assert_eq!(err.code.as_deref(), Some("MODULE_NOT_FOUND"));
    assert!(err.message.contains("missing-pkg"));
    assert!(!err.stack.is_empty());

    assert_eq!(
        rt.evaluate(
            "try { require('./nope'); } catch (e) { [e.code, Array.isArray(e.requireStack), typeof e.stack] }"
        )
        .unwrap(),
        Value::from(vec![Value::from("MODULE_NOT_FOUND"), Value::Bool(true), Value::from("string")])
    );
}

#[test]
fn unknown_node_prefixed_builtin() {
    let (_dir, root) = project();
    let mut rt = runtime(&root);
    let err = rt.evaluate("require('node:child_process')").unwrap_err();
    assert_eq!(err.code.as_deref(), Some("ERR_UNKNOWN_BUILTIN_MODULE"));
}

#[test]
fn invalid_manifest_is_reported() {
    let (_dir, root) = project();
    write(&root, "node_modules/broken/package.json", r#"{ "main": "#);
    let mut rt = runtime(&root);
    let err = rt.evaluate("require('broken')").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidManifest);
}

#[test]
fn process_and_fs_use_configured_cwd() {
    let (_dir, root) = project();
    write(&root, "node_modules/tiny/index.js", "module.exports = 1;");
    let mut rt = runtime(&root);
    assert_eq!(
        rt.evaluate("process.cwd()").unwrap(),
        Value::from(root.to_string_lossy().into_owned())
    );
    assert_eq!(
        rt.evaluate("require('fs').existsSync('node_modules')").unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn module_scope_bindings() {
    let (_dir, root) = project();
    write(&root, "lib/where.js", "module.exports = [__filename, __dirname, this === exports];");
    let mut rt = runtime(&root);
    let file = root.join("lib/where.js");
    assert_eq!(
        rt.evaluate("require('./lib/where')").unwrap(),
        Value::from(vec![
            Value::from(file.to_string_lossy().into_owned()),
            Value::from(root.join("lib").to_string_lossy().into_owned()),
            Value::Bool(true),
        ])
    );
    assert_eq!(
        rt.evaluate("require.resolve('./lib/where')").unwrap(),
        Value::from(file.to_string_lossy().into_owned())
    );
}

#[test]
fn failed_module_stays_failed() {
    let (_dir, root) = project();
    write(
        &root,
        "bad.js",
        "globalThis.attempts = (globalThis.attempts || 0) + 1; throw new Error('broken');",
    );
    let mut rt = runtime(&root);
    assert_eq!(
        rt.evaluate(
            "let first, second; \
             try { require('./bad'); } catch (e) { first = e; } \
             try { require('./bad'); } catch (e) { second = e; } \
             [first === second, first.message, attempts]"
        )
        .unwrap(),
        Value::from(vec![Value::Bool(true), Value::from("broken"), Value::from(1)])
    );

    let modules = rt.modules();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].state, ModuleState::Failed);
    assert_eq!(modules[0].error.as_ref().map(|e| e.message.as_str()), Some("broken"));
    assert_eq!(
        rt.evaluate("Object.keys(require.cache).length").unwrap(),
        Value::from(0)
    );
}

#[test]
fn syntax_error_in_module() {
    let (_dir, root) = project();
    write(&root, "oops.js", "module.exports = ;");
    let mut rt = runtime(&root);
    let err = rt.evaluate("require('./oops')").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
}

#[test]
fn module_limit_is_resource_exhausted() {
    let (_dir, root) = project();
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "require('./c');");
    write(&root, "c.js", "module.exports = 'c';");
    let config = RuntimeConfig::with_cwd(&root)
        .with_env(BTreeMap::new())
        .with_limits(LoadLimits {
            max_modules: 2,
            ..LoadLimits::default()
        });
    let mut rt = Runtime::with_config(config).unwrap();
    let err = rt.evaluate("require('./a')").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResourceExhausted);
    assert_eq!(err.code.as_deref(), Some("ERR_RESOURCE_EXHAUSTED"));
}

#[test]
fn require_depth_limit_is_resource_exhausted() {
    let (_dir, root) = project();
    write(&root, "x.js", "module.exports = require('./y');");
    write(&root, "y.js", "module.exports = 'y';");
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "require('./c');");
    write(&root, "c.js", "require('./d');");
    write(&root, "d.js", "module.exports = 'd';");
    let config = RuntimeConfig::with_cwd(&root)
        .with_env(BTreeMap::new())
        .with_limits(LoadLimits {
            max_require_depth: 2,
            ..LoadLimits::default()
        });
    let mut rt = Runtime::with_config(config).unwrap();
    assert_eq!(rt.evaluate("require('./x')").unwrap(), Value::from("y"));

    let err = rt.evaluate("require('./a')").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResourceExhausted);
    assert_eq!(err.code.as_deref(), Some("ERR_RESOURCE_EXHAUSTED"));
    assert!(err.message.contains("depth"), "{}", err.message);
}

#[test]
fn load_time_budget_is_resource_exhausted() {
    let (_dir, root) = project();
    write(&root, "a.js", "module.exports = require('./b');");
    write(&root, "b.js", "module.exports = 'b';");
    write(&root, "solo.js", "module.exports = 'solo';");
    let config = RuntimeConfig::with_cwd(&root)
        .with_env(BTreeMap::new())
        .with_limits(LoadLimits {
            max_load_time: Some(Duration::ZERO),
            ..LoadLimits::default()
        });
    let mut rt = Runtime::with_config(config).unwrap();
    assert_eq!(rt.evaluate("require('./solo')").unwrap(), Value::from("solo"));

    let err = rt.evaluate("require('./a')").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResourceExhausted);
    assert_eq!(err.code.as_deref(), Some("ERR_RESOURCE_EXHAUSTED"));
}

#[test]
fn nested_package_ascends_to_outer_node_modules() {
    let (_dir, root) = project();
    write(&root, "node_modules/a/index.js", "module.exports = require('b');");
    write(
        &root,
        "node_modules/a/node_modules/b/index.js",
        "module.exports = { c: require('c') };",
    );
    write(&root, "node_modules/c/index.js", "module.exports = { id: 'c' };");
    write(&root, "lib/other.js", "module.exports = require('c');");
    let mut rt = runtime(&root);
    assert_eq!(rt.evaluate("require('a').c.id").unwrap(), Value::from("c"));
    assert_eq!(
        rt.evaluate(
            "[require('a').c === require('c'),               require('./lib/other') === require('c')]"
        )
        .unwrap(),
        Value::from(vec![true, true])
    );
    assert!(
        rt.modules()
            .iter()
            .any(|m| m.path == root.join("node_modules/c/index.js"))
    );
}

#[test]
fn run_main_sets_require_main() {
    let (_dir, root) = project();
    write(
        &root,
        "main.js",
        "module.exports = { isMain: require.main === module, id: module.id };",
    );
    let mut rt = runtime(&root);
    let exports = rt.run_main("main.js").unwrap();
    assert_eq!(exports.get("isMain"), Some(&Value::Bool(true)));
    assert_eq!(exports.get("id"), Some(&Value::from(".")));
    assert_eq!(rt.modules()[0].state, ModuleState::Loaded);
}

#[test]
fn module_builtin_create_require() {
    let (_dir, root) = project();
    write(&root, "nested/dep.js", "module.exports = 'dep';");
    let mut rt = runtime(&root);
    let dir = root.join("nested");
    let code = format!(
        "const m = require('module'); \
         const r = m.createRequire({:?}); \
         [r('./dep'), m.isBuiltin('node:fs'), m.builtinModules.includes('vm')]",
        format!("{}/", dir.display())
    );
    assert_eq!(
        rt.evaluate(&code).unwrap(),
        Value::from(vec![Value::from("dep"), Value::Bool(true), Value::Bool(true)])
    );
}

#[test]
fn vm_runs_in_fresh_realm() {
    let (_dir, root) = project();
    let mut rt = runtime(&root);
    assert_eq!(
        rt.evaluate("require('vm').runInNewContext('a + 1', { a: 1 })").unwrap(),
        Value::from(2)
    );
}
