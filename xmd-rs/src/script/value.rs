//! Runtime values for the directive language.
//!
//! [`Value`] is what evaluation produces; [`Variable`] is the shared, counted
//! binding that scopes and containers hold.  Arrays and objects store their
//! elements as `Variable`s behind an `Rc<RefCell<…>>`, so copying a `Value`
//! that holds a container shares the container rather than deep-copying it.
//!
//! Counts are plain `Rc` counts: the model is single-threaded and neither
//! type is `Send`.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Shared backing store of an array value.
pub type ArrayRef = Rc<RefCell<Vec<Variable>>>;

/// Shared backing store of an object value: ordered `(key, Variable)` pairs.
pub type ObjectRef = Rc<RefCell<Vec<(String, Variable)>>>;

/// Field name carrying the class of an instance.  Keys starting with `__`
/// are hidden from display and `keys()`.
pub const CLASS_KEY: &str = "__class__";

/// Nesting depth after which display gives up (self-referential containers).
const DISPLAY_DEPTH: usize = 32;

// ── Value ─────────────────────────────────────────────────────────────────────

/// A dynamically typed runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(ArrayRef),
    Object(ObjectRef),
}

impl Value {
    /// Build an array value from plain values.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        let vars = items.into_iter().map(Variable::new).collect();
        Value::Array(Rc::new(RefCell::new(vars)))
    }

    /// Build an object value from ordered `(key, value)` pairs.
    pub fn object<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Variable::new(v)))
            .collect();
        Value::Object(Rc::new(RefCell::new(fields)))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness: null is false, booleans as-is, numbers are true when
    /// non-zero, strings when non-empty, containers always.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Name of the type, as returned by the `type()` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Numeric view: numbers as-is, booleans as 0/1, strings when they parse.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Equality by type, then value.  Arrays and objects compare by identity
    /// of their backing container.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Look up a named field (objects), `length` (strings, arrays, objects),
    /// or a numeric index given as a key (arrays).  Missing keys yield null.
    pub fn property(&self, key: &str) -> Value {
        match self {
            Value::Object(fields) => {
                let found = fields
                    .borrow()
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.get());
                match found {
                    Some(v) => v,
                    None if key == "length" => Value::Number(self.visible_len() as f64),
                    None => Value::Null,
                }
            }
            Value::Array(items) => {
                if key == "length" {
                    return Value::Number(items.borrow().len() as f64);
                }
                match key.parse::<usize>() {
                    Ok(i) => items.borrow().get(i).map(Variable::get).unwrap_or_default(),
                    Err(_) => Value::Null,
                }
            }
            Value::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Null,
        }
    }

    /// Index with a runtime value: arrays and strings by number, objects by
    /// key.  Out-of-range or mistyped indexes yield null.
    pub fn index(&self, index: &Value) -> Value {
        match (self, index) {
            (Value::Array(items), _) => match index.to_number() {
                Some(n) if n >= 0.0 && n.fract() == 0.0 => items
                    .borrow()
                    .get(n as usize)
                    .map(Variable::get)
                    .unwrap_or_default(),
                _ => Value::Null,
            },
            (Value::String(s), _) => match index.to_number() {
                Some(n) if n >= 0.0 && n.fract() == 0.0 => s
                    .chars()
                    .nth(n as usize)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default(),
                _ => Value::Null,
            },
            (Value::Object(_), key) => self.property(&key.to_string()),
            _ => Value::Null,
        }
    }

    /// Class name of an instance created from a class definition.
    pub fn class_name(&self) -> Option<String> {
        match self.property(CLASS_KEY) {
            Value::String(name) => Some(name),
            _ => None,
        }
    }

    /// Visible object keys, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(fields) => fields
                .borrow()
                .iter()
                .filter(|(k, _)| !k.starts_with("__"))
                .map(|(k, _)| k.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn visible_len(&self) -> usize {
        self.keys().len()
    }

    /// Elements a `for` loop visits: array elements, object keys, nothing
    /// for null, and any other scalar once.
    pub fn iter_items(&self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::Array(items) => items.borrow().iter().map(Variable::get).collect(),
            Value::Object(_) => self.keys().into_iter().map(Value::String).collect(),
            other => vec![other.clone()],
        }
    }

    fn write_nested(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        if depth > DISPLAY_DEPTH {
            return f.write_str("...");
        }
        match self {
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.get().write_nested(f, depth + 1)?;
                }
                f.write_str("]")
            }
            Value::Object(fields) => {
                f.write_str("{")?;
                let fields = fields.borrow();
                let visible = fields.iter().filter(|(k, _)| !k.starts_with("__"));
                for (i, (k, v)) in visible.enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: ")?;
                    v.get().write_nested(f, depth + 1)?;
                }
                f.write_str("}")
            }
            scalar => write!(f, "{scalar}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Array(_) | Value::Object(_) => self.write_nested(f, 0),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Whole numbers print without a fractional part (`30`, not `30.0`).
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ── Variable ──────────────────────────────────────────────────────────────────

/// A counted, mutable binding.  Cloning takes a new reference; dropping the
/// last reference releases the payload, and container payloads release their
/// element `Variable`s in turn.
#[derive(Debug, Clone, Default)]
pub struct Variable(Rc<RefCell<Value>>);

impl Variable {
    pub fn new(value: Value) -> Self {
        Variable(Rc::new(RefCell::new(value)))
    }

    /// Current value.  Containers are shared, not copied.
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    /// Borrow the value in place.
    pub fn borrow(&self) -> Ref<'_, Value> {
        self.0.borrow()
    }

    /// Replace the value, releasing the previous one.
    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }

    /// Number of live references to this binding.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// A non-owning handle, for observing when the binding is released.
    pub fn downgrade(&self) -> WeakVariable {
        WeakVariable(Rc::downgrade(&self.0))
    }
}

impl From<Value> for Variable {
    fn from(value: Value) -> Self {
        Variable::new(value)
    }
}

/// Non-owning counterpart of [`Variable`].
#[derive(Debug, Clone)]
pub struct WeakVariable(Weak<RefCell<Value>>);

impl WeakVariable {
    pub fn is_released(&self) -> bool {
        self.0.strong_count() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
