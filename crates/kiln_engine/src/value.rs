//! Runtime values.
//!
//! Values are reference counted and single-threaded: an [`Engine`] and
//! everything it creates stay on one thread.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::{Chunk, FunctionProto};
use crate::engine::Engine;
use crate::error::EngineError;

/// A shared, mutable object.
pub type ObjectRef = Rc<RefCell<Object>>;

/// A shared, mutable array.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Signature of a host function: engine, receiver, arguments.
pub type NativeFn = Rc<dyn Fn(&Engine, Value, &[Value]) -> Result<Value, EngineError>>;

/// A script value.
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`.
    #[default]
    Undefined,
    /// `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An immutable string.
    Str(Rc<str>),
    /// A plain object.
    Object(ObjectRef),
    /// An array.
    Array(ArrayRef),
    /// A script closure or host function.
    Function(Rc<Function>),
}

/// A plain object. Properties keep insertion order.
#[derive(Default)]
pub struct Object {
    properties: Vec<(String, Value)>,
}

impl Object {
    /// Creates an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the property `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Returns `true` if the object has its own property `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets the property `key`, appending it if new.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((key, value)),
        }
    }

    /// Iterates properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A callable value.
pub enum Function {
    /// A function defined by script code.
    Closure(Closure),
    /// A function provided by the host.
    Native {
        /// Name shown by `console.log`.
        name: String,
        /// The implementation.
        func: NativeFn,
    },
}

impl Function {
    /// Returns the function's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Function::Closure(c) => c.proto.name.as_deref(),
            Function::Native { name, .. } => Some(name),
        }
    }
}

/// A script function together with its defining scope.
pub struct Closure {
    pub(crate) proto: Rc<FunctionProto>,
    pub(crate) env: Rc<Scope>,
    /// Source text the function's lazy body spans point into.
    pub(crate) source: Rc<str>,
    /// A lazily compiled body kept across calls.
    pub(crate) compiled: RefCell<Option<Rc<Chunk>>>,
}

/// A function-level scope. The global scope's bindings are the global object.
pub struct Scope {
    pub(crate) bindings: ObjectRef,
    pub(crate) parent: Option<Rc<Scope>>,
}

impl Scope {
    pub(crate) fn global(global: ObjectRef) -> Rc<Self> {
        Rc::new(Self {
            bindings: global,
            parent: None,
        })
    }

    pub(crate) fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            bindings: Rc::new(RefCell::new(Object::new())),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Looks `name` up through the scope chain.
    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Assigns to the nearest binding of `name`, or creates a global.
    pub(crate) fn assign(&self, name: &str, value: Value) {
        if self.bindings.borrow().contains(name) || self.parent.is_none() {
            self.bindings.borrow_mut().set(name, value);
            return;
        }
        if let Some(parent) = &self.parent {
            parent.assign(name, value);
        }
    }

    pub(crate) fn declare(&self, name: &str, value: Value) {
        self.bindings.borrow_mut().set(name, value);
    }
}

impl Value {
    /// Creates a string value.
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// Wraps an object.
    pub fn object(object: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    /// Creates an array value.
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Wraps a host function.
    pub fn native(
        name: impl Into<String>,
        func: impl Fn(&Engine, Value, &[Value]) -> Result<Value, EngineError> + 'static,
    ) -> Self {
        Value::Function(Rc::new(Function::Native {
            name: name.into(),
            func: Rc::new(func),
        }))
    }

    /// Returns the number, if this is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the object, if this is one.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Returns `true` for `undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The `typeof` name.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Array(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// Truthiness as used by conditions and `!`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) | Value::Array(_) | Value::Function(_) => true,
        }
    }

    /// Numeric conversion as used by arithmetic.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let t = s.trim();
                if t.is_empty() {
                    0.0
                } else {
                    t.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(a) => {
                let a = a.borrow();
                match a.as_slice() {
                    [] => 0.0,
                    [only] => only.to_number(),
                    _ => f64::NAN,
                }
            }
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// String conversion as used by `+` and property keys.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Array(a) => a
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Function(f) => format!("function {}() {{ [code] }}", f.name().unwrap_or("")),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            _ if is_primitive(self) && is_primitive(other) && self.type_of() != other.type_of() => {
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    /// Formats the value the way `console.log` prints an argument.
    pub fn inspect(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.inspect_nested(0),
        }
    }

    fn inspect_nested(&self, depth: usize) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\'', "\\'")),
            Value::Function(f) => match f.name() {
                Some(name) => format!("[Function: {name}]"),
                None => "[Function (anonymous)]".to_string(),
            },
            Value::Array(a) => {
                let a = a.borrow();
                if a.is_empty() {
                    return "[]".to_string();
                }
                if depth > 2 {
                    return "[Array]".to_string();
                }
                let items: Vec<_> = a.iter().map(|v| v.inspect_nested(depth + 1)).collect();
                format!("[ {} ]", items.join(", "))
            }
            Value::Object(o) => {
                let o = o.borrow();
                if o.properties.is_empty() {
                    return "{}".to_string();
                }
                if depth > 2 {
                    return "[Object]".to_string();
                }
                let items: Vec<_> = o
                    .iter()
                    .map(|(k, v)| format!("{}: {}", inspect_key(k), v.inspect_nested(depth + 1)))
                    .collect();
                format!("{{ {} }}", items.join(", "))
            }
            other => other.to_display_string(),
        }
    }
}

fn is_primitive(v: &Value) -> bool {
    matches!(v, Value::Number(_) | Value::Str(_) | Value::Bool(_))
}

fn inspect_key(key: &str) -> String {
    let plain = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if plain {
        key.to_string()
    } else {
        format!("'{key}'")
    }
}

/// Formats a number the way scripts print it: `43`, not `43.0`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect_nested(0))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}
