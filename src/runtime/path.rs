//! Path API - Node.js compatible `path` module (POSIX flavor)
//!
//! Pure string functions; no filesystem access. Behaves the same on every
//! host OS. `resolve` and `relative` use the runtime's configured working
//! directory rather than the host process's.
//!
//! Provides:
//! - path.join(...paths), path.resolve(...paths), path.normalize(path)
//! - path.dirname(path), path.basename(path, ext?), path.extname(path)
//! - path.isAbsolute(path), path.relative(from, to)
//! - path.parse(path), path.format(obj)
//! - path.sep, path.delimiter, path.posix

use boa_engine::{
    Context, JsArgs, JsObject, JsResult, JsString, JsValue, NativeFunction, js_string,
    object::ObjectInitializer, property::Attribute,
};

/// Normalize a POSIX path - resolves . and .. segments
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let is_absolute = path.starts_with('/');
    let trailing_slash = path.ends_with('/');

    let mut parts: Vec<&str> = Vec::with_capacity(path.matches('/').count() + 1);
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if !parts.is_empty() && parts.last() != Some(&"..") {
                    parts.pop();
                } else if !is_absolute {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }

    let mut result = String::with_capacity(path.len());
    if is_absolute {
        result.push('/');
    }
    result.push_str(&parts.join("/"));

    if result.is_empty() {
        return ".".to_string();
    }
    if trailing_slash && !result.ends_with('/') {
        result.push('/');
    }
    result
}

/// Join segments with `/` and normalize. Absolute segments do not reset the path.
pub fn join(paths: &[&str]) -> String {
    let joined = paths
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return ".".to_string();
    }
    normalize(&joined)
}

/// Resolve right-to-left until an absolute path is formed, falling back to `cwd`.
pub fn resolve(paths: &[&str], cwd: &str) -> String {
    let mut resolved = String::new();
    for path in paths.iter().rev() {
        if path.is_empty() {
            continue;
        }
        resolved = if resolved.is_empty() {
            (*path).to_string()
        } else {
            format!("{path}/{resolved}")
        };
        if path.starts_with('/') {
            break;
        }
    }

    if !resolved.starts_with('/') {
        resolved = if resolved.is_empty() {
            cwd.to_string()
        } else {
            format!("{cwd}/{resolved}")
        };
    }

    let normalized = normalize(&resolved);
    if normalized.len() > 1 {
        normalized.trim_end_matches('/').to_string()
    } else {
        normalized
    }
}

pub fn dirname(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(idx) => match trimmed[..idx].trim_end_matches('/') {
            "" => "/",
            dir => dir,
        },
        None => ".",
    }
}

pub fn basename<'a>(path: &'a str, ext: Option<&str>) -> &'a str {
    let trimmed = path.trim_end_matches('/');
    let base = match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    match ext {
        Some(ext) if !ext.is_empty() && base != ext => base.strip_suffix(ext).unwrap_or(base),
        _ => base,
    }
}

pub fn extname(path: &str) -> &str {
    let base = basename(path, None);
    if base == ".." {
        return "";
    }
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[idx..],
        _ => "",
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Relative path from `from` to `to`, both resolved against `cwd`
pub fn relative(from: &str, to: &str, cwd: &str) -> String {
    let from_abs = resolve(&[from], cwd);
    let to_abs = resolve(&[to], cwd);
    if from_abs == to_abs {
        return String::new();
    }

    let from_parts: Vec<&str> = from_abs.split('/').filter(|s| !s.is_empty()).collect();
    let to_parts: Vec<&str> = to_abs.split('/').filter(|s| !s.is_empty()).collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = vec![".."; from_parts.len() - common];
    result.extend_from_slice(&to_parts[common..]);
    result.join("/")
}

/// Components of `path` as returned by `path.parse`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPath {
    pub root: String,
    pub dir: String,
    pub base: String,
    pub ext: String,
    pub name: String,
}

pub fn parse(path: &str) -> ParsedPath {
    if path.is_empty() {
        return ParsedPath::default();
    }
    let root = if is_absolute(path) { "/" } else { "" };
    let base = basename(path, None);
    let ext = extname(path);
    let dir = if path.trim_end_matches('/').contains('/') {
        dirname(path)
    } else {
        root
    };
    ParsedPath {
        root: root.to_string(),
        dir: dir.to_string(),
        base: base.to_string(),
        ext: ext.to_string(),
        name: base[..base.len() - ext.len()].to_string(),
    }
}

/// Inverse of [`parse`]: `dir` wins over `root`, `base` over `name` + `ext`.
pub fn format(parts: &ParsedPath) -> String {
    let base = if parts.base.is_empty() {
        let ext = if parts.ext.is_empty() || parts.ext.starts_with('.') {
            parts.ext.clone()
        } else {
            format!(".{}", parts.ext)
        };
        format!("{}{}", parts.name, ext)
    } else {
        parts.base.clone()
    };
    let dir = if parts.dir.is_empty() {
        &parts.root
    } else {
        &parts.dir
    };
    if dir.is_empty() {
        base
    } else if dir == &parts.root {
        format!("{dir}{base}")
    } else {
        format!("{dir}/{base}")
    }
}

fn string_arg(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    Ok(args
        .get_or_undefined(index)
        .to_string(context)?
        .to_std_string_escaped())
}

fn string_args(args: &[JsValue], context: &mut Context) -> JsResult<Vec<String>> {
    args.iter()
        .map(|v| v.to_string(context).map(|s| s.to_std_string_escaped()))
        .collect()
}

fn optional_string_prop(object: &JsObject, key: &str, context: &mut Context) -> JsResult<String> {
    let value = object.get(js_string!(key), context)?;
    if value.is_undefined() || value.is_null() {
        return Ok(String::new());
    }
    Ok(value.to_string(context)?.to_std_string_escaped())
}

/// Build the `path` shim. `cwd` is the runtime's working directory.
pub fn create_path_object(cwd: &str, context: &mut Context) -> JsResult<JsObject> {
    let cwd = JsString::from(cwd);

    let join_fn = NativeFunction::from_fn_ptr(|_this, args, context| {
        let paths = string_args(args, context)?;
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        Ok(js_string!(join(&refs)).into())
    });

    let resolve_fn = NativeFunction::from_copy_closure_with_captures(
        |_this, args, cwd: &JsString, context| {
            let paths = string_args(args, context)?;
            let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            Ok(js_string!(resolve(&refs, &cwd.to_std_string_escaped())).into())
        },
        cwd.clone(),
    );

    let relative_fn = NativeFunction::from_copy_closure_with_captures(
        |_this, args, cwd: &JsString, context| {
            let from = string_arg(args, 0, context)?;
            let to = string_arg(args, 1, context)?;
            Ok(js_string!(relative(&from, &to, &cwd.to_std_string_escaped())).into())
        },
        cwd,
    );

    let normalize_fn = NativeFunction::from_fn_ptr(|_this, args, context| {
        let path = string_arg(args, 0, context)?;
        Ok(js_string!(normalize(&path)).into())
    });

    let dirname_fn = NativeFunction::from_fn_ptr(|_this, args, context| {
        let path = string_arg(args, 0, context)?;
        Ok(js_string!(dirname(&path)).into())
    });

    let basename_fn = NativeFunction::from_fn_ptr(|_this, args, context| {
        let path = string_arg(args, 0, context)?;
        let ext = match args.get(1) {
            Some(v) if !v.is_undefined() => Some(v.to_string(context)?.to_std_string_escaped()),
            _ => None,
        };
        Ok(js_string!(basename(&path, ext.as_deref())).into())
    });

    let extname_fn = NativeFunction::from_fn_ptr(|_this, args, context| {
        let path = string_arg(args, 0, context)?;
        Ok(js_string!(extname(&path)).into())
    });

    let is_absolute_fn = NativeFunction::from_fn_ptr(|_this, args, context| {
        let path = string_arg(args, 0, context)?;
        Ok(JsValue::from(is_absolute(&path)))
    });

    let parse_fn = NativeFunction::from_fn_ptr(|_this, args, context| {
        let parsed = parse(&string_arg(args, 0, context)?);
        let obj = ObjectInitializer::new(context)
            .property(js_string!("root"), js_string!(parsed.root), Attribute::all())
            .property(js_string!("dir"), js_string!(parsed.dir), Attribute::all())
            .property(js_string!("base"), js_string!(parsed.base), Attribute::all())
            .property(js_string!("ext"), js_string!(parsed.ext), Attribute::all())
            .property(js_string!("name"), js_string!(parsed.name), Attribute::all())
            .build();
        Ok(obj.into())
    });

    let format_fn = NativeFunction::from_fn_ptr(|_this, args, context| {
        let Some(obj) = args.get_or_undefined(0).as_object().map(|o| o.clone()) else {
            return Err(boa_engine::JsNativeError::typ()
                .with_message("The \"pathObject\" argument must be of type object")
                .into());
        };
        let parts = ParsedPath {
            root: optional_string_prop(&obj, "root", context)?,
            dir: optional_string_prop(&obj, "dir", context)?,
            base: optional_string_prop(&obj, "base", context)?,
            ext: optional_string_prop(&obj, "ext", context)?,
            name: optional_string_prop(&obj, "name", context)?,
        };
        Ok(js_string!(format(&parts)).into())
    });

    let path = ObjectInitializer::new(context)
        .property(js_string!("sep"), js_string!("/"), Attribute::all())
        .property(js_string!("delimiter"), js_string!(":"), Attribute::all())
        .function(join_fn, js_string!("join"), 0)
        .function(resolve_fn, js_string!("resolve"), 0)
        .function(normalize_fn, js_string!("normalize"), 1)
        .function(dirname_fn, js_string!("dirname"), 1)
        .function(basename_fn, js_string!("basename"), 2)
        .function(extname_fn, js_string!("extname"), 1)
        .function(is_absolute_fn, js_string!("isAbsolute"), 1)
        .function(relative_fn, js_string!("relative"), 2)
        .function(parse_fn, js_string!("parse"), 1)
        .function(format_fn, js_string!("format"), 1)
        .build();

    path.set(js_string!("posix"), path.clone(), false, context)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/foo/bar//baz/asdf/quux/.."), "/foo/bar/baz/asdf");
        assert_eq!(normalize("foo/bar/../baz"), "foo/baz");
        assert_eq!(normalize("./foo/bar"), "foo/bar");
        assert_eq!(normalize(""), ".");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("../.."), "../..");
        assert_eq!(normalize("/.."), "/");
        assert_eq!(normalize("foo/"), "foo/");
    }

    #[test]
    fn test_join() {
        assert_eq!(join(&["/foo", "bar", "baz/asdf", "quux", ".."]), "/foo/bar/baz/asdf");
        assert_eq!(join(&["foo", "bar", "baz"]), "foo/bar/baz");
        assert_eq!(join(&["/a", "/b"]), "/a/b");
        assert_eq!(join(&["", ""]), ".");
        assert_eq!(join(&["/project", "node_modules"]), "/project/node_modules");
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve(&["/foo/bar", "./baz"], "/cwd"), "/foo/bar/baz");
        assert_eq!(resolve(&["/foo/bar", "/tmp/file/"], "/cwd"), "/tmp/file");
        assert_eq!(resolve(&["wwwroot", "static_files/png/", "../gif/image.gif"], "/home/me"),
            "/home/me/wwwroot/static_files/gif/image.gif");
        assert_eq!(resolve(&[], "/cwd"), "/cwd");
    }

    #[test]
    fn test_dirname() {
        assert_eq!(dirname("/foo/bar/baz/asdf/quux"), "/foo/bar/baz/asdf");
        assert_eq!(dirname("/foo"), "/");
        assert_eq!(dirname("foo"), ".");
        assert_eq!(dirname(""), ".");
        assert_eq!(dirname("/a/b/"), "/a");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/foo/bar/baz/asdf/quux.html", None), "quux.html");
        assert_eq!(basename("/foo/bar/baz/asdf/quux.html", Some(".html")), "quux");
        assert_eq!(basename("/foo/bar/baz/asdf/quux.html", Some(".htm")), "quux.html");
        assert_eq!(basename("/a/dir/", None), "dir");
    }

    #[test]
    fn test_extname() {
        assert_eq!(extname("index.html"), ".html");
        assert_eq!(extname("index.coffee.md"), ".md");
        assert_eq!(extname("index."), ".");
        assert_eq!(extname("index"), "");
        assert_eq!(extname(".index"), "");
        assert_eq!(extname(".index.md"), ".md");
    }

    #[test]
    fn test_relative() {
        assert_eq!(
            relative("/data/orandea/test/aaa", "/data/orandea/impl/bbb", "/"),
            "../../impl/bbb"
        );
        assert_eq!(relative("/a", "/a", "/"), "");
        assert_eq!(relative("a", "a/b", "/cwd"), "b");
    }

    #[test]
    fn test_parse_and_format() {
        let parsed = parse("/home/user/dir/file.txt");
        assert_eq!(
            parsed,
            ParsedPath {
                root: "/".into(),
                dir: "/home/user/dir".into(),
                base: "file.txt".into(),
                ext: ".txt".into(),
                name: "file".into(),
            }
        );
        assert_eq!(format(&parsed), "/home/user/dir/file.txt");
        assert_eq!(
            format(&ParsedPath {
                root: "/".into(),
                name: "file".into(),
                ext: "txt".into(),
                ..Default::default()
            }),
            "/file.txt"
        );
    }
}
