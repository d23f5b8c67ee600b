//! Host-side representation of guest values
//!
//! [`Value`] is a tagged variant with total conversions to and from the
//! engine's `JsValue`. Guest objects keep their own-enumerable key order.
//! Functions, symbols, bigints, cyclic references and structures nested
//! deeper than [`MAX_DEPTH`] marshal to placeholders instead of failing,
//! as do arrays longer than [`MAX_ITEMS`].

use boa_engine::{
    Context, JsObject, JsResult, JsValue, js_string,
    object::builtins::JsArray,
};
use indexmap::IndexMap;
use std::fmt;

/// Maximum nesting followed when marshaling guest aggregates
pub const MAX_DEPTH: usize = 64;

/// Maximum array length or key count copied out of a single guest aggregate
pub const MAX_ITEMS: usize = 100_000;

/// A guest value copied into host memory
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    /// A guest function; only its name survives
    Function { name: String },
    /// Anything else: symbols, bigints, cycles, too-deep structures
    Opaque(String),
}

impl Value {
    /// Marshal a guest value into host memory.
    pub fn from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let mut seen = Vec::new();
        Self::from_js_inner(value, context, &mut seen, 0)
    }

    fn from_js_inner(
        value: &JsValue,
        context: &mut Context,
        seen: &mut Vec<JsObject>,
        depth: usize,
    ) -> JsResult<Self> {
        if value.is_undefined() {
            return Ok(Self::Undefined);
        }
        if value.is_null() {
            return Ok(Self::Null);
        }
        if let Some(b) = value.as_boolean() {
            return Ok(Self::Bool(b));
        }
        if let Some(n) = value.as_number() {
            return Ok(Self::Number(n));
        }
        if let Some(s) = value.as_string() {
            return Ok(Self::String(s.to_std_string_escaped()));
        }
        let Some(object) = value.as_object().map(|o| o.clone()) else {
            return Ok(Self::Opaque(value.display().to_string()));
        };

        if object.is_callable() {
            let name = object
                .get(js_string!("name"), context)?
                .as_string()
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_default();
            return Ok(Self::Function { name });
        }
        if seen.iter().any(|o| JsObject::equals(o, &object)) {
            return Ok(Self::Opaque("[Circular]".to_string()));
        }
        if depth >= MAX_DEPTH {
            return Ok(Self::Opaque("[Too deep]".to_string()));
        }

        seen.push(object.clone());
        let result = if object.is_array() {
            let length = object.get(js_string!("length"), context)?.to_length(context)?;
            if length > MAX_ITEMS as u64 {
                Self::Opaque(format!("[Array({length})]"))
            } else {
                let mut items = Vec::new();
                for index in 0..length {
                    let item = object.get(index, context)?;
                    items.push(Self::from_js_inner(&item, context, seen, depth + 1)?);
                }
                Self::Array(items)
            }
        } else {
            let mut map = IndexMap::new();
            for key in own_enumerable_keys(&object, context)? {
                let item = object.get(js_string!(key.clone()), context)?;
                map.insert(key, Self::from_js_inner(&item, context, seen, depth + 1)?);
            }
            Self::Object(map)
        };
        seen.pop();
        Ok(result)
    }

    /// Build a guest value. Functions and opaque values become `undefined`.
    pub fn to_js(&self, context: &mut Context) -> JsResult<JsValue> {
        Ok(match self {
            Self::Undefined | Self::Function { .. } | Self::Opaque(_) => JsValue::undefined(),
            Self::Null => JsValue::null(),
            Self::Bool(b) => JsValue::from(*b),
            Self::Number(n) => JsValue::from(*n),
            Self::String(s) => JsValue::from(js_string!(s.clone())),
            Self::Array(items) => {
                let array = JsArray::new(context);
                for item in items {
                    let item = item.to_js(context)?;
                    array.push(item, context)?;
                }
                array.into()
            }
            Self::Object(map) => {
                let object = JsObject::with_object_proto(context.intrinsics());
                for (key, item) in map {
                    let item = item.to_js(context)?;
                    object.create_data_property_or_throw(js_string!(key.clone()), item, context)?;
                }
                object.into()
            }
        })
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Render as JSON. Placeholders render as strings, `undefined` as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Function { name } => serde_json::Value::String(format!("[Function: {name}]")),
            Self::Opaque(text) => serde_json::Value::String(text.clone()),
        }
    }
}

/// Own enumerable string keys, via the realm's `Object.keys`. At most
/// [`MAX_ITEMS`] keys are returned.
pub(crate) fn own_enumerable_keys(object: &JsObject, context: &mut Context) -> JsResult<Vec<String>> {
    let object_ctor = context.intrinsics().constructors().object().constructor();
    let keys_fn = object_ctor.get(js_string!("keys"), context)?;
    let Some(keys_fn) = keys_fn.as_object().map(|o| o.clone()) else {
        return Ok(Vec::new());
    };
    let keys = keys_fn.call(&JsValue::undefined(), &[object.clone().into()], context)?;
    let Some(keys) = keys.as_object().map(|o| o.clone()) else {
        return Ok(Vec::new());
    };
    let length = keys.get(js_string!("length"), context)?.to_length(context)?;
    let mut out = Vec::new();
    for index in 0..length.min(MAX_ITEMS as u64) {
        let key = keys.get(index, context)?.to_string(context)?;
        out.push(key.to_std_string_escaped());
    }
    Ok(out)
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) => {
                if map.is_empty() {
                    return f.write_str("{}");
                }
                f.write_str("{ ")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                f.write_str(" }")
            }
            Self::Function { name } if name.is_empty() => f.write_str("[Function (anonymous)]"),
            Self::Function { name } => write!(f, "[Function: {name}]"),
            Self::Opaque(text) => f.write_str(text),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}
