//! Dynamically-typed host values.
//!
//! [`HostValue`] is what the reference table stores and what host functions
//! receive and return. Primitive variants are compared by value; reference
//! variants (arrays, objects, functions, errors, owned wrappers and opaque
//! resources) share their payload through `Arc` and compare by identity,
//! the way script objects do.

use crate::closure::GuestClosure;
use crate::owned::OwnedHandle;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Result of a host operation: `Err` carries the thrown value.
pub type Completion = std::result::Result<HostValue, HostValue>;

/// Signature of a native host function: `(this, args) -> completion`.
pub type NativeFn = dyn Fn(&HostValue, &[HostValue]) -> Completion + Send + Sync;

/// Maximum nesting followed when serializing or printing values.
const MAX_DEPTH: usize = 32;

/// Largest length an array may grow to through indexed assignment.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Parse a canonical array index: a `u32` below `2^32 - 1`.
fn array_index(key: &str) -> Option<usize> {
    let index: u32 = key.parse().ok()?;
    if index == u32::MAX || index.to_string() != key {
        return None;
    }
    usize::try_from(index).ok()
}

/// A host value reachable from the guest through a handle.
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    /// `undefined`.
    #[default]
    Undefined,
    /// `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// IEEE-754 double.
    Number(f64),
    /// Arbitrary-size integer, limited to the `i128` range here.
    BigInt(i128),
    /// Immutable text.
    String(Arc<str>),
    /// Shared, growable list.
    Array(ArrayRef),
    /// Shared object with a class name and ordered properties.
    Object(ObjectRef),
    /// Callable value.
    Function(HostFunction),
    /// Error object.
    Error(Arc<ErrorValue>),
    /// Guest-owned resource wrapped on the host side.
    Owned(Arc<OwnedHandle>),
    /// Embedder resource the marshaling layer never inspects.
    Opaque(OpaqueRef),
}

impl HostValue {
    /// Create a string value.
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Arc::from(s.as_ref()))
    }

    /// Create a number value.
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create an `Error` with the default name.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(Arc::new(ErrorValue::new("Error", message)))
    }

    /// Create a `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Error(Arc::new(ErrorValue::new("TypeError", message)))
    }

    /// Create a native function value.
    pub fn native_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HostValue, &[HostValue]) -> Completion + Send + Sync + 'static,
    {
        Self::Function(HostFunction::native(name, f))
    }

    /// Check for `undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Check for `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check for `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Check whether `typeof value === "object"` and the value is not `null`.
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            Self::Array(_) | Self::Object(_) | Self::Error(_) | Self::Owned(_) | Self::Opaque(_)
        )
    }

    /// Check for a callable value.
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    /// Borrow the text of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric payload of a number value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Payload of a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Payload of a bigint value.
    pub fn as_bigint(&self) -> Option<i128> {
        match self {
            Self::BigInt(n) => Some(*n),
            _ => None,
        }
    }

    /// The result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Array(_) | Self::Object(_) | Self::Error(_) | Self::Owned(_) | Self::Opaque(_) => {
                "object"
            }
        }
    }

    /// Finer-grained kind name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Array(_) => "array",
            Self::Error(_) => "error",
            Self::Owned(_) => "owned",
            Self::Opaque(_) => "opaque",
            other => other.type_of(),
        }
    }

    /// Strict equality (`===`).
    pub fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Error(a), Self::Error(b)) => Arc::ptr_eq(a, b),
            (Self::Owned(a), Self::Owned(b)) => Arc::ptr_eq(a, b),
            (Self::Opaque(a), Self::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Loose equality (`==`) for the primitive coercions.
    ///
    /// Objects are only loosely equal to themselves; no `valueOf` or
    /// `toString` conversion is attempted.
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Self::Bool(b), rhs) => Self::Number(if *b { 1.0 } else { 0.0 }).loose_eq(rhs),
            (lhs, Self::Bool(b)) => lhs.loose_eq(&Self::Number(if *b { 1.0 } else { 0.0 })),
            (Self::Number(n), Self::String(s)) | (Self::String(s), Self::Number(n)) => {
                *n == string_to_number(s)
            }
            (Self::BigInt(i), Self::Number(n)) | (Self::Number(n), Self::BigInt(i)) => {
                n.fract() == 0.0 && *n == *i as f64
            }
            (Self::BigInt(i), Self::String(s)) | (Self::String(s), Self::BigInt(i)) => {
                s.trim().parse::<i128>().is_ok_and(|parsed| parsed == *i)
            }
            (a, b) => a.strict_eq(b),
        }
    }

    /// Property lookup (`value[key]`), returning `undefined` when absent.
    pub fn get(&self, key: &str) -> HostValue {
        match self {
            Self::Object(obj) => obj.get(key).unwrap_or_default(),
            Self::Array(arr) => match key {
                "length" => Self::Number(arr.len() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| arr.get(i))
                    .unwrap_or_default(),
            },
            Self::String(s) if key == "length" => Self::Number(s.encode_utf16().count() as f64),
            Self::Error(err) => match key {
                "name" => Self::string(&err.name),
                "message" => Self::string(&err.message),
                _ => Self::Undefined,
            },
            Self::Function(f) if key == "name" => Self::string(f.name()),
            _ => Self::Undefined,
        }
    }

    /// Property membership (`key in value`).
    ///
    /// Returns a `TypeError` for non-object right-hand sides.
    pub fn has(&self, key: &str) -> Completion {
        let found = match self {
            Self::Object(obj) => obj.has(key),
            Self::Array(arr) => {
                key == "length" || key.parse::<usize>().is_ok_and(|i| i < arr.len())
            }
            Self::Error(_) => key == "name" || key == "message",
            Self::Function(_) => key == "name",
            Self::Owned(_) | Self::Opaque(_) => false,
            other => {
                return Err(HostValue::type_error(format!(
                    "cannot use 'in' operator to search for '{key}' in {}",
                    other.debug_string()
                )));
            }
        };
        Ok(Self::Bool(found))
    }

    /// Property assignment (`value[key] = v`).
    ///
    /// Returns `false` when the target does not accept properties.
    pub fn set(&self, key: &str, value: HostValue) -> bool {
        match self {
            Self::Object(obj) => {
                obj.set(key, value);
                true
            }
            Self::Array(arr) => match array_index(key) {
                Some(i) => arr.set(i, value),
                None => false,
            },
            _ => false,
        }
    }

    /// Check `value instanceof class`.
    pub fn instance_of(&self, class: &str) -> bool {
        match self {
            Self::Object(obj) => class == "Object" || obj.is_a(class),
            Self::Array(_) => matches!(class, "Array" | "Object"),
            Self::Error(err) => class == "Error" || class == "Object" || err.name == class,
            Self::Function(_) => matches!(class, "Function" | "Object"),
            Self::Owned(owned) => class == "Object" || owned.class() == class,
            Self::Opaque(opaque) => class == "Object" || opaque.type_name() == class,
            _ => false,
        }
    }

    /// Own enumerable `[key, value]` pairs (`Object.entries`).
    pub fn entries(&self) -> Vec<(String, HostValue)> {
        match self {
            Self::Object(obj) => obj.entries(),
            Self::Array(arr) => arr
                .to_vec()
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            Self::String(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (i.to_string(), Self::string(c.to_string())))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Convert to text the way `String(value)` does for primitives.
    ///
    /// Arrays are joined with `,`. An array already being joined further up
    /// renders as the empty string, as does anything nested past the depth
    /// limit.
    pub fn to_display_string(&self) -> String {
        self.display_string_in(&mut Vec::new())
    }

    fn display_string_in(&self, joining: &mut Vec<ArrayRef>) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::BigInt(i) => i.to_string(),
            Self::String(s) => s.to_string(),
            Self::Array(arr) => {
                if joining.len() >= MAX_DEPTH || joining.iter().any(|a| a.ptr_eq(arr)) {
                    return String::new();
                }
                joining.push(arr.clone());
                let text = arr
                    .to_vec()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.display_string_in(joining)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                joining.pop();
                text
            }
            Self::Error(err) => err.to_string(),
            Self::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
            Self::Object(obj) => format!("[object {}]", obj.class()),
            Self::Owned(owned) => format!("[object {}]", owned.class()),
            Self::Opaque(opaque) => format!("[object {}]", opaque.type_name()),
        }
    }

    /// Diagnostic rendering used by the `debug_string` import.
    pub fn debug_string(&self) -> String {
        self.debug_string_at(0)
    }

    fn debug_string_at(&self, depth: usize) -> String {
        match self {
            Self::Undefined | Self::Null | Self::Bool(_) | Self::Number(_) | Self::BigInt(_) => {
                self.to_display_string()
            }
            Self::String(s) => format!("\"{s}\""),
            Self::Function(f) => {
                if f.name().is_empty() {
                    "Function".to_string()
                } else {
                    format!("Function({})", f.name())
                }
            }
            Self::Array(arr) => {
                if depth >= MAX_DEPTH {
                    return "[...]".to_string();
                }
                let items: Vec<String> = arr
                    .to_vec()
                    .iter()
                    .map(|v| v.debug_string_at(depth + 1))
                    .collect();
                format!("[{}]", items.join(", "))
            }
            Self::Object(obj) if obj.class() == "Object" => match self.to_json() {
                Some(json) => format!("Object({json})"),
                None => "Object".to_string(),
            },
            Self::Object(obj) => obj.class().to_string(),
            Self::Error(err) => err.to_string(),
            Self::Owned(owned) => format!("Owned({})", owned.class()),
            Self::Opaque(opaque) => opaque.type_name().to_string(),
        }
    }

    /// Serialize to JSON following `JSON.stringify` rules.
    ///
    /// Functions and `undefined` are skipped inside objects and become
    /// `null` inside arrays. Returns `None` for values that cannot be
    /// represented (top-level `undefined`, bigints, cycles).
    pub fn to_json(&self) -> Option<JsonValue> {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> Option<JsonValue> {
        if depth > MAX_DEPTH {
            return None;
        }
        match self {
            Self::Undefined | Self::Function(_) => None,
            Self::Null => Some(JsonValue::Null),
            Self::Bool(b) => Some(JsonValue::Bool(*b)),
            Self::Number(n) => Some(
                serde_json::Number::from_f64(*n)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null),
            ),
            Self::BigInt(_) => None,
            Self::String(s) => Some(JsonValue::String(s.to_string())),
            Self::Array(arr) => {
                let mut out = Vec::with_capacity(arr.len());
                for item in arr.to_vec() {
                    match item {
                        Self::Undefined | Self::Function(_) => out.push(JsonValue::Null),
                        other => out.push(other.to_json_at(depth + 1)?),
                    }
                }
                Some(JsonValue::Array(out))
            }
            Self::Object(obj) => {
                let mut map = serde_json::Map::new();
                for (key, value) in obj.entries() {
                    if matches!(value, Self::Undefined | Self::Function(_)) {
                        continue;
                    }
                    map.insert(key, value.to_json_at(depth + 1)?);
                }
                Some(JsonValue::Object(map))
            }
            Self::Error(_) | Self::Owned(_) | Self::Opaque(_) => {
                Some(JsonValue::Object(serde_json::Map::new()))
            }
        }
    }

    /// Build a host value from JSON.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Self::string(s),
            JsonValue::Array(items) => {
                Self::Array(ArrayRef::from_vec(items.iter().map(Self::from_json).collect()))
            }
            JsonValue::Object(map) => {
                let obj = ObjectRef::plain();
                for (key, value) in map {
                    obj.set(key, Self::from_json(value));
                }
                Self::Object(obj)
            }
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<ObjectRef> for HostValue {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl From<ArrayRef> for HostValue {
    fn from(arr: ArrayRef) -> Self {
        Self::Array(arr)
    }
}

impl From<GuestClosure> for HostValue {
    fn from(closure: GuestClosure) -> Self {
        Self::Function(HostFunction::Guest(closure))
    }
}

/// Format a double like `Number.prototype.toString` for common values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    match trimmed {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// Error payload: name and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    /// Constructor name, e.g. `TypeError`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorValue {
    /// Create an error payload.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Shared, interior-mutable list.
#[derive(Clone, Default)]
pub struct ArrayRef(Arc<RwLock<Vec<HostValue>>>);

impl ArrayRef {
    /// Create an empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing vector.
    pub fn from_vec(items: Vec<HostValue>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Check if the array is empty.
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Element at `index`, if present.
    pub fn get(&self, index: usize) -> Option<HostValue> {
        self.0.read().get(index).cloned()
    }

    /// Append an element and return the new length.
    pub fn push(&self, value: HostValue) -> usize {
        let mut items = self.0.write();
        items.push(value);
        items.len()
    }

    /// Store an element, padding with `undefined` when writing past the end.
    ///
    /// Returns `false` without touching the array when the write would grow
    /// it beyond [`MAX_ARRAY_LEN`].
    pub fn set(&self, index: usize, value: HostValue) -> bool {
        let mut items = self.0.write();
        if index >= items.len() {
            match index.checked_add(1) {
                Some(len) if len <= MAX_ARRAY_LEN => items.resize(len, HostValue::Undefined),
                _ => return false,
            }
        }
        items[index] = value;
        true
    }

    /// Snapshot of the elements.
    pub fn to_vec(&self) -> Vec<HostValue> {
        self.0.read().clone()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayRef").field("len", &self.len()).finish()
    }
}

#[derive(Default)]
struct ObjectData {
    /// Own class first, then ancestors.
    classes: Vec<String>,
    props: RwLock<Vec<(String, HostValue)>>,
}

/// Shared object with a class chain and insertion-ordered properties.
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectData>);

impl ObjectRef {
    /// Create a plain `Object`.
    pub fn plain() -> Self {
        Self::with_class("Object")
    }

    /// Create an object of the given class.
    pub fn with_class(class: impl Into<String>) -> Self {
        Self::with_classes(vec![class.into()])
    }

    /// Create an object whose class chain is `classes` (own class first).
    pub fn with_classes(classes: Vec<String>) -> Self {
        Self(Arc::new(ObjectData {
            classes,
            props: RwLock::new(Vec::new()),
        }))
    }

    /// Builder-style property initialization.
    pub fn with(self, key: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.set(&key.into(), value.into());
        self
    }

    /// Builder-style method registration.
    pub fn with_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&HostValue, &[HostValue]) -> Completion + Send + Sync + 'static,
    {
        self.set(name, HostValue::native_fn(name, f));
        self
    }

    /// Own class name.
    pub fn class(&self) -> &str {
        self.0.classes.first().map(String::as_str).unwrap_or("Object")
    }

    /// Check whether `class` appears in the class chain.
    pub fn is_a(&self, class: &str) -> bool {
        self.0.classes.iter().any(|c| c == class)
    }

    /// Read a property.
    pub fn get(&self, key: &str) -> Option<HostValue> {
        self.0
            .props
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Write a property, keeping the original insertion position.
    pub fn set(&self, key: &str, value: HostValue) {
        let mut props = self.0.props.write();
        match props.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => props.push((key.to_string(), value)),
        }
    }

    /// Remove a property, returning its value.
    pub fn remove(&self, key: &str) -> Option<HostValue> {
        let mut props = self.0.props.write();
        let pos = props.iter().position(|(k, _)| k == key)?;
        Some(props.remove(pos).1)
    }

    /// Check for an own property.
    pub fn has(&self, key: &str) -> bool {
        self.0.props.read().iter().any(|(k, _)| k == key)
    }

    /// Snapshot of own properties in insertion order.
    pub fn entries(&self) -> Vec<(String, HostValue)> {
        self.0.props.read().clone()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("class", &self.class())
            .field("props", &self.0.props.read().len())
            .finish()
    }
}

/// A native function implemented by the embedder.
#[derive(Clone)]
pub struct NativeFunction {
    name: Arc<str>,
    f: Arc<NativeFn>,
}

impl NativeFunction {
    /// Invoke with an explicit receiver.
    pub fn call(&self, this: &HostValue, args: &[HostValue]) -> Completion {
        (self.f)(this, args)
    }
}

/// A callable value.
#[derive(Clone)]
pub enum HostFunction {
    /// Implemented in Rust by the embedder.
    Native(NativeFunction),
    /// A guest closure; calling it needs access to the guest store.
    Guest(GuestClosure),
}

impl HostFunction {
    /// Wrap a Rust closure.
    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HostValue, &[HostValue]) -> Completion + Send + Sync + 'static,
    {
        Self::Native(NativeFunction {
            name: Arc::from(name.into()),
            f: Arc::new(f),
        })
    }

    /// Function name (empty for guest closures).
    pub fn name(&self) -> &str {
        match self {
            Self::Native(native) => &native.name,
            Self::Guest(_) => "",
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Native(a), Self::Native(b)) => Arc::ptr_eq(&a.f, &b.f),
            (Self::Guest(a), Self::Guest(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(native) => write!(f, "Native({})", native.name),
            Self::Guest(closure) => write!(f, "Guest({closure:?})"),
        }
    }
}

/// An embedder resource stored behind a handle.
#[derive(Clone)]
pub struct OpaqueRef {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl OpaqueRef {
    /// Wrap a value; `type_name` is used for `instanceof` and diagnostics.
    pub fn new<T: Any + Send + Sync>(type_name: &'static str, value: T) -> Self {
        Self {
            type_name,
            inner: Arc::new(value),
        }
    }

    /// Name given at construction.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for OpaqueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typeof_matches_script_semantics() {
        assert_eq!(HostValue::Null.type_of(), "object");
        assert_eq!(HostValue::Undefined.type_of(), "undefined");
        assert_eq!(HostValue::Array(ArrayRef::new()).type_of(), "object");
        assert_eq!(HostValue::native_fn("f", |_, _| Ok(HostValue::Undefined)).type_of(), "function");
        assert_eq!(HostValue::BigInt(3).type_of(), "bigint");
    }

    #[test]
    fn strict_equality() {
        assert!(HostValue::Number(1.0).strict_eq(&HostValue::Number(1.0)));
        assert!(!HostValue::Number(f64::NAN).strict_eq(&HostValue::Number(f64::NAN)));
        assert!(HostValue::string("a").strict_eq(&HostValue::string("a")));

        let obj = ObjectRef::plain();
        let a = HostValue::Object(obj.clone());
        let b = HostValue::Object(obj);
        assert!(a.strict_eq(&b));
        assert!(!a.strict_eq(&HostValue::Object(ObjectRef::plain())));
    }

    #[test]
    fn loose_equality() {
        assert!(HostValue::Null.loose_eq(&HostValue::Undefined));
        assert!(!HostValue::Null.loose_eq(&HostValue::Number(0.0)));
        assert!(HostValue::Number(1.0).loose_eq(&HostValue::string("1")));
        assert!(HostValue::Bool(true).loose_eq(&HostValue::Number(1.0)));
        assert!(HostValue::string("").loose_eq(&HostValue::Number(0.0)));
        assert!(HostValue::BigInt(2).loose_eq(&HostValue::Number(2.0)));
        assert!(!HostValue::string("abc").loose_eq(&HostValue::Number(0.0)));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }

    #[test]
    fn debug_string_rendering() {
        assert_eq!(HostValue::string("hi").debug_string(), "\"hi\"");
        assert_eq!(HostValue::Undefined.debug_string(), "undefined");

        let arr = ArrayRef::from_vec(vec![HostValue::Number(1.0), HostValue::string("x")]);
        assert_eq!(HostValue::Array(arr).debug_string(), "[1, \"x\"]");

        let obj = ObjectRef::plain().with("a", 1.0);
        assert_eq!(HostValue::Object(obj).debug_string(), "Object({\"a\":1.0})");

        let el = ObjectRef::with_class("HTMLDivElement");
        assert_eq!(HostValue::Object(el).debug_string(), "HTMLDivElement");

        assert_eq!(HostValue::type_error("bad").debug_string(), "TypeError: bad");
        assert_eq!(
            HostValue::native_fn("go", |_, _| Ok(HostValue::Undefined)).debug_string(),
            "Function(go)"
        );
    }

    #[test]
    fn json_conversion_skips_functions() {
        let obj = ObjectRef::plain()
            .with("n", 2.0)
            .with("s", "t")
            .with_method("f", |_, _| Ok(HostValue::Undefined));
        let json = HostValue::Object(obj).to_json().unwrap();
        assert_eq!(json, json!({"n": 2.0, "s": "t"}));

        let back = HostValue::from_json(&json!({"list": [1, null, true]}));
        let list = back.get("list");
        assert_eq!(list.get("length").as_f64(), Some(3.0));
        assert!(list.get("1").is_null());
        assert!(HostValue::BigInt(1).to_json().is_none());
    }

    #[test]
    fn property_access() {
        let obj = ObjectRef::with_classes(vec!["HTMLInputElement".into(), "HTMLElement".into()])
            .with("value", "typed");
        let value = HostValue::Object(obj);
        assert_eq!(value.get("value").as_str(), Some("typed"));
        assert!(value.get("missing").is_undefined());
        assert!(value.instance_of("HTMLElement"));
        assert!(value.instance_of("Object"));
        assert!(!value.instance_of("HTMLFormElement"));

        assert!(value.set("checked", HostValue::Bool(true)));
        assert_eq!(value.has("checked").unwrap().as_bool(), Some(true));
        assert!(HostValue::Number(1.0).has("x").is_err());
    }

    #[test]
    fn entries_keep_insertion_order() {
        let obj = ObjectRef::plain().with("b", 1.0).with("a", 2.0).with("b", 3.0);
        let keys: Vec<String> = obj.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(obj.get("b").and_then(|v| v.as_f64()), Some(3.0));
    }

    #[test]
    fn array_set_pads_with_undefined() {
        let arr = ArrayRef::new();
        assert!(arr.set(2, HostValue::Bool(true)));
        assert_eq!(arr.len(), 3);
        assert!(arr.get(0).unwrap().is_undefined());
    }

    #[test]
    fn array_set_rejects_huge_indexes() {
        let arr = ArrayRef::new();
        assert!(!arr.set(usize::MAX, HostValue::Bool(true)));
        assert!(!arr.set(MAX_ARRAY_LEN, HostValue::Bool(true)));
        assert!(arr.is_empty());
        assert!(arr.set(MAX_ARRAY_LEN - 1, HostValue::Null));
        assert_eq!(arr.len(), MAX_ARRAY_LEN);

        let value = HostValue::Array(ArrayRef::new());
        assert!(!value.set("18446744073709551615", HostValue::Number(1.0)));
        assert!(!value.set("4294967295", HostValue::Number(1.0)));
        assert!(!value.set("4000000000", HostValue::Number(1.0)));
        assert!(!value.set("01", HostValue::Number(1.0)));
        assert!(!value.set("-1", HostValue::Number(1.0)));
        assert!(value.set("1", HostValue::Number(1.0)));
        assert_eq!(value.get("length").as_f64(), Some(2.0));
    }

    #[test]
    fn cyclic_array_displays_as_empty() {
        let arr = ArrayRef::from_vec(vec![HostValue::Number(1.0)]);
        arr.push(HostValue::Array(arr.clone()));
        let value = HostValue::Array(arr.clone());
        assert_eq!(value.to_display_string(), "1,");

        let inner = ArrayRef::from_vec(vec![HostValue::Number(2.0)]);
        let shared = ArrayRef::from_vec(vec![
            HostValue::Array(inner.clone()),
            HostValue::Array(inner),
        ]);
        assert_eq!(HostValue::Array(shared).to_display_string(), "2,2");

        let deep = ArrayRef::from_vec(vec![HostValue::string("x")]);
        let mut outer = deep;
        for _ in 0..(MAX_DEPTH * 2) {
            outer = ArrayRef::from_vec(vec![HostValue::Array(outer)]);
        }
        assert_eq!(HostValue::Array(outer).to_display_string(), "");
    }

    #[test]
    fn opaque_downcast() {
        let opaque = OpaqueRef::new("Counter", 5u32);
        assert_eq!(opaque.downcast_ref::<u32>(), Some(&5));
        assert!(opaque.downcast_ref::<i64>().is_none());
        assert!(HostValue::Opaque(opaque).instance_of("Counter"));
    }
}
