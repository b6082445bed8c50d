use serde_json::{Map, Number};

pub use serde_json::Value;

/// Declared data kind of a port, property or input node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    String,
    Number,
    Boolean,
    Json,
    Any,
}

impl DataKind {
    /// Unknown names map to `Any`, which leaves values untouched.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => DataKind::String,
            "number" | "integer" | "float" => DataKind::Number,
            "boolean" | "bool" => DataKind::Boolean,
            "json" | "object" | "array" => DataKind::Json,
            _ => DataKind::Any,
        }
    }

    /// Value an input of this kind takes when nothing else is provided.
    pub fn default_value(&self) -> Value {
        match self {
            DataKind::String => Value::String(String::new()),
            DataKind::Number => Value::Number(Number::from(0)),
            DataKind::Boolean => Value::Bool(false),
            DataKind::Json => Value::Object(Map::new()),
            DataKind::Any => Value::Null,
        }
    }
}

/// Coerce `value` into `kind`. Never fails: values that cannot be converted fall back to
/// the kind's default (numbers, booleans) or are kept as they are (JSON).
pub fn coerce(value: Value, kind: DataKind) -> Value {
    match kind {
        DataKind::Any => value,
        DataKind::String => Value::String(value_to_text(&value)),
        DataKind::Number => match &value {
            Value::Number(_) => value,
            Value::String(s) => parse_number(s).unwrap_or_else(|| kind.default_value()),
            Value::Bool(b) => Value::Number(Number::from(u8::from(*b))),
            _ => kind.default_value(),
        },
        DataKind::Boolean => Value::Bool(is_truthy(&value)),
        DataKind::Json => match value {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        },
    }
}

/// Textual rendering: strings verbatim, null as empty, everything else as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            !(s.is_empty() || s == "false" || s == "0" || s == "no" || s == "off")
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Integers stay integers so that `"42"` becomes `42`, not `42.0`.
fn parse_number(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::Number(Number::from(i)));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Walk a dot-separated path (`user.addresses.0.city`) through objects and arrays.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Short type label used in error messages.
pub fn kind_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
