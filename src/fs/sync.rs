//! Native synchronous implementations behind the `fs` shim
//!
//! Every function resolves relative paths against the runtime's working
//! directory, never the host process's. Failures are thrown as Node-style
//! errors carrying `code`, `errno`, `syscall` and `path`.

use base64::{Engine, engine::general_purpose::STANDARD};
use boa_engine::{
    Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsValue, NativeFunction,
    js_string,
    object::ObjectInitializer,
    object::builtins::{JsArray, JsUint8Array},
    property::Attribute,
};
use boa_gc::{Finalize, Trace};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::runtime::error::{define_stack, synthesize_stack};

/// Working directory captured by every fs native
#[derive(Debug, Clone, Trace, Finalize)]
pub struct FsRoot {
    #[unsafe_ignore_trace]
    cwd: PathBuf,
}

impl FsRoot {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    fn path_arg(&self, args: &[JsValue], index: usize, context: &mut Context) -> JsResult<PathBuf> {
        let value = args.get_or_undefined(index);
        if !value.is_string() {
            return Err(JsNativeError::typ()
                .with_message("The \"path\" argument must be of type string")
                .into());
        }
        let path = value.to_string(context)?.to_std_string_escaped();
        Ok(self.cwd.join(path))
    }
}

/// Node's code and errno for an I/O failure
fn error_code(err: &io::Error) -> (&'static str, i32, &'static str) {
    match err.kind() {
        io::ErrorKind::NotFound => ("ENOENT", -2, "no such file or directory"),
        io::ErrorKind::PermissionDenied => ("EACCES", -13, "permission denied"),
        io::ErrorKind::NotADirectory => ("ENOTDIR", -20, "not a directory"),
        io::ErrorKind::IsADirectory => ("EISDIR", -21, "illegal operation on a directory"),
        _ => ("EIO", -5, "i/o error"),
    }
}

/// Build the thrown error for a failed `syscall` on `path`.
pub fn fs_error(err: &io::Error, syscall: &str, path: &Path, context: &mut Context) -> JsError {
    let (code, errno, description) = error_code(err);
    let message = format!("{code}: {description}, {syscall} '{}'", path.display());
    let build = |context: &mut Context| -> JsResult<JsObject> {
        let error = JsNativeError::error()
            .with_message(message.clone())
            .to_opaque(context);
        error.set(js_string!("code"), js_string!(code), false, context)?;
        error.set(js_string!("errno"), errno, false, context)?;
        error.set(js_string!("syscall"), js_string!(syscall), false, context)?;
        error.set(
            js_string!("path"),
            js_string!(path.to_string_lossy().into_owned()),
            false,
            context,
        )?;
        define_stack(&error, &synthesize_stack("Error", &message, None), context)?;
        Ok(error)
    };
    match build(context) {
        Ok(error) => JsError::from_opaque(error.into()),
        Err(err) => err,
    }
}

/// Encoding requested through a string or `{ encoding }` options argument
fn encoding_option(options: Option<&JsValue>, context: &mut Context) -> JsResult<Option<String>> {
    let Some(options) = options else {
        return Ok(None);
    };
    if options.is_string() {
        return Ok(Some(options.to_string(context)?.to_std_string_escaped()));
    }
    if let Some(obj) = options.as_object() {
        let encoding = obj.get(js_string!("encoding"), context)?;
        if !encoding.is_undefined() && !encoding.is_null() {
            return Ok(Some(encoding.to_string(context)?.to_std_string_escaped()));
        }
    }
    Ok(None)
}

fn bool_option(options: Option<&JsValue>, key: &str, default: bool, context: &mut Context) -> JsResult<bool> {
    match options.and_then(|o| o.as_object().map(|o| o.clone())) {
        Some(obj) => {
            let value = obj.get(js_string!(key), context)?;
            Ok(if value.is_undefined() { default } else { value.to_boolean() })
        }
        None => Ok(default),
    }
}

/// Decode raw bytes the way `Buffer.prototype.toString(encoding)` would
pub fn decode(bytes: &[u8], encoding: &str) -> JsResult<String> {
    match encoding.to_ascii_lowercase().as_str() {
        "utf8" | "utf-8" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "latin1" | "binary" => Ok(bytes.iter().map(|&b| b as char).collect()),
        "ascii" => Ok(bytes.iter().map(|&b| (b & 0x7f) as char).collect()),
        "base64" => Ok(STANDARD.encode(bytes)),
        "hex" => Ok(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        other => Err(JsNativeError::typ()
            .with_message(format!("Unknown encoding: {other}"))
            .into()),
    }
}

/// `toString(encoding = 'utf8')` installed on byte arrays returned by the shim
fn bytes_to_string(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let Some(array) = this
        .as_object()
        .and_then(|obj| JsUint8Array::from_object(obj.clone()).ok())
    else {
        return Err(JsNativeError::typ()
            .with_message("toString called on a non-Uint8Array")
            .into());
    };
    let encoding = encoding_option(args.first(), context)?.unwrap_or_else(|| "utf8".into());
    let length = array.length(context)?;
    let mut bytes = Vec::with_capacity(length);
    for index in 0..length {
        bytes.push(array.get(index, context)?.to_u32(context)? as u8);
    }
    Ok(js_string!(decode(&bytes, &encoding)?).into())
}

fn create_bytes(bytes: Vec<u8>, context: &mut Context) -> JsResult<JsValue> {
    let array = JsUint8Array::from_iter(bytes, context)?;
    let to_string = NativeFunction::from_fn_ptr(bytes_to_string).to_js_function(context.realm());
    array.set(js_string!("toString"), to_string, false, context)?;
    Ok(array.into())
}

fn millis(time: io::Result<SystemTime>) -> f64 {
    time.ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

fn flag_fn(flag: bool) -> NativeFunction {
    NativeFunction::from_copy_closure_with_captures(|_this, _args, flag: &bool, _context| Ok(JsValue::from(*flag)), flag)
}

fn create_date(ms: f64, context: &mut Context) -> JsResult<JsValue> {
    let date = context.intrinsics().constructors().date().constructor();
    Ok(date.construct(&[JsValue::from(ms)], None, context)?.into())
}

fn create_stats(metadata: &Metadata, context: &mut Context) -> JsResult<JsValue> {
    let file_type = metadata.file_type();
    let mtime_ms = millis(metadata.modified());
    let atime_ms = millis(metadata.accessed());
    let birthtime_ms = match metadata.created() {
        Ok(created) => millis(Ok(created)),
        Err(_) => mtime_ms,
    };
    let mtime = create_date(mtime_ms, context)?;
    let atime = create_date(atime_ms, context)?;
    let birthtime = create_date(birthtime_ms, context)?;
    let mode = mode_bits(metadata);

    let stats = ObjectInitializer::new(context)
        .property(js_string!("size"), metadata.len() as f64, Attribute::all())
        .property(js_string!("mode"), mode, Attribute::all())
        .property(js_string!("mtimeMs"), mtime_ms, Attribute::all())
        .property(js_string!("atimeMs"), atime_ms, Attribute::all())
        .property(js_string!("ctimeMs"), mtime_ms, Attribute::all())
        .property(js_string!("birthtimeMs"), birthtime_ms, Attribute::all())
        .property(js_string!("mtime"), mtime, Attribute::all())
        .property(js_string!("atime"), atime, Attribute::all())
        .property(js_string!("birthtime"), birthtime, Attribute::all())
        .function(flag_fn(file_type.is_file()), js_string!("isFile"), 0)
        .function(flag_fn(file_type.is_dir()), js_string!("isDirectory"), 0)
        .function(flag_fn(file_type.is_symlink()), js_string!("isSymbolicLink"), 0)
        .function(flag_fn(false), js_string!("isFIFO"), 0)
        .function(flag_fn(false), js_string!("isSocket"), 0)
        .function(flag_fn(false), js_string!("isBlockDevice"), 0)
        .function(flag_fn(false), js_string!("isCharacterDevice"), 0)
        .build();
    Ok(stats.into())
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    if metadata.is_dir() { 0o040755 } else { 0o100644 }
}

/// fs.existsSync(path)
pub fn exists_sync(_this: &JsValue, args: &[JsValue], root: &FsRoot, context: &mut Context) -> JsResult<JsValue> {
    Ok(match root.path_arg(args, 0, context) {
        Ok(path) => path.exists().into(),
        Err(_) => false.into(),
    })
}

/// fs.readFileSync(path[, options])
pub fn read_file_sync(_this: &JsValue, args: &[JsValue], root: &FsRoot, context: &mut Context) -> JsResult<JsValue> {
    let path = root.path_arg(args, 0, context)?;
    let encoding = encoding_option(args.get(1), context)?;

    if path.is_dir() {
        let err = io::Error::from(io::ErrorKind::IsADirectory);
        return Err(fs_error(&err, "read", &path, context));
    }
    let bytes = fs::read(&path).map_err(|e| fs_error(&e, "open", &path, context))?;

    match encoding {
        Some(encoding) => Ok(js_string!(decode(&bytes, &encoding)?).into()),
        None => create_bytes(bytes, context),
    }
}

/// fs.statSync(path[, options])
pub fn stat_sync(_this: &JsValue, args: &[JsValue], root: &FsRoot, context: &mut Context) -> JsResult<JsValue> {
    let path = root.path_arg(args, 0, context)?;
    match fs::metadata(&path) {
        Ok(metadata) => create_stats(&metadata, context),
        Err(e) if e.kind() == io::ErrorKind::NotFound
            && !bool_option(args.get(1), "throwIfNoEntry", true, context)? =>
        {
            Ok(JsValue::undefined())
        }
        Err(e) => Err(fs_error(&e, "stat", &path, context)),
    }
}

/// fs.lstatSync(path[, options])
pub fn lstat_sync(_this: &JsValue, args: &[JsValue], root: &FsRoot, context: &mut Context) -> JsResult<JsValue> {
    let path = root.path_arg(args, 0, context)?;
    match fs::symlink_metadata(&path) {
        Ok(metadata) => create_stats(&metadata, context),
        Err(e) if e.kind() == io::ErrorKind::NotFound
            && !bool_option(args.get(1), "throwIfNoEntry", true, context)? =>
        {
            Ok(JsValue::undefined())
        }
        Err(e) => Err(fs_error(&e, "lstat", &path, context)),
    }
}

/// fs.readdirSync(path[, options]); entries are sorted by name
pub fn readdir_sync(_this: &JsValue, args: &[JsValue], root: &FsRoot, context: &mut Context) -> JsResult<JsValue> {
    let path = root.path_arg(args, 0, context)?;
    let with_file_types = bool_option(args.get(1), "withFileTypes", false, context)?;

    let entries = fs::read_dir(&path).map_err(|e| fs_error(&e, "scandir", &path, context))?;
    let mut entries: Vec<_> = entries
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| fs_error(&e, "scandir", &path, context))?;
    entries.sort_by_key(|entry| entry.file_name());

    let result = JsArray::new(context);
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !with_file_types {
            result.push(js_string!(name), context)?;
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|e| fs_error(&e, "scandir", &entry.path(), context))?;
        let parent = js_string!(path.to_string_lossy().into_owned());
        let dirent = ObjectInitializer::new(context)
            .property(js_string!("name"), js_string!(name), Attribute::all())
            .property(js_string!("parentPath"), parent, Attribute::all())
            .function(flag_fn(file_type.is_file()), js_string!("isFile"), 0)
            .function(flag_fn(file_type.is_dir()), js_string!("isDirectory"), 0)
            .function(flag_fn(file_type.is_symlink()), js_string!("isSymbolicLink"), 0)
            .build();
        result.push(dirent, context)?;
    }
    Ok(result.into())
}

/// fs.realpathSync(path)
pub fn realpath_sync(_this: &JsValue, args: &[JsValue], root: &FsRoot, context: &mut Context) -> JsResult<JsValue> {
    let path = root.path_arg(args, 0, context)?;
    let real = fs::canonicalize(&path).map_err(|e| fs_error(&e, "realpath", &path, context))?;
    Ok(js_string!(real.to_string_lossy().into_owned()).into())
}

/// fs.accessSync(path[, mode]); only existence is checked
pub fn access_sync(_this: &JsValue, args: &[JsValue], root: &FsRoot, context: &mut Context) -> JsResult<JsValue> {
    let path = root.path_arg(args, 0, context)?;
    fs::metadata(&path).map_err(|e| fs_error(&e, "access", &path, context))?;
    Ok(JsValue::undefined())
}
