//! Typed configuration options and their change listeners.

use super::error::{describe_value, ConfigError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Value type accepted by an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::String => "string",
            OptionType::Number => "number",
            OptionType::Boolean => "boolean",
            OptionType::Object => "object",
            OptionType::Array => "array",
        }
    }

    /// Check a JSON value against this type (null is handled by the caller).
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            OptionType::String => value.is_string(),
            OptionType::Number => value.is_number(),
            OptionType::Boolean => value.is_boolean(),
            OptionType::Object => value.is_object(),
            OptionType::Array => value.is_array(),
        }
    }

    /// Coerce a raw string (environment variable, command-line argument) into
    /// a value of this type.
    pub fn coerce_str(&self, raw: &str) -> Result<Value, String> {
        match self {
            OptionType::String => Ok(Value::String(raw.to_string())),
            OptionType::Number => {
                let trimmed = raw.trim();
                if let Ok(int) = trimmed.parse::<i64>() {
                    return Ok(Value::from(int));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{raw}' is not a number"))
            }
            OptionType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(format!("'{raw}' is not a boolean")),
            },
            OptionType::Object | OptionType::Array => {
                let parsed: Value =
                    serde_json::from_str(raw).map_err(|e| format!("'{raw}' is not valid JSON: {e}"))?;
                if self.accepts(&parsed) {
                    Ok(parsed)
                } else {
                    Err(format!("'{raw}' is not an {}", self.as_str()))
                }
            }
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom transformation applied to every incoming value before validation.
pub type ValueParser = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Change listener. Receives the new value.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Declaration of an option, consumed by [`ConfigEngine::add_option`](super::ConfigEngine::add_option).
#[derive(Clone)]
pub struct OptionDef {
    pub(crate) name: String,
    pub(crate) kind: OptionType,
    pub(crate) description: String,
    pub(crate) default: Value,
    pub(crate) nullable: bool,
    pub(crate) one_of: Option<Vec<Value>>,
    pub(crate) parser: Option<ValueParser>,
}

impl OptionDef {
    pub fn new(name: impl Into<String>, kind: OptionType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            default: Value::Null,
            nullable: false,
            one_of: None,
            parser: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, OptionType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, OptionType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, OptionType::Boolean)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, OptionType::Object)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, OptionType::Array)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Accept `null` as a value (and as the default when none is given).
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Restrict the option to an explicit list of values.
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.one_of = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Apply the parser and validate a value for the option at `path`.
    pub(crate) fn prepare(&self, path: &str, value: Value) -> Result<Value, ConfigError> {
        let value = match &self.parser {
            Some(parser) => parser(value).map_err(|message| ConfigError::OptionType {
                path: path.to_string(),
                expected: format!("a value accepted by its parser ({message})"),
                received: "an unparsable value".to_string(),
            })?,
            None => value,
        };

        if value.is_null() {
            if self.nullable {
                return Ok(value);
            }
            return Err(ConfigError::type_mismatch(path, &self.kind, &value));
        }

        if !self.kind.accepts(&value) {
            return Err(ConfigError::type_mismatch(path, &self.kind, &value));
        }

        if let Some(allowed) = &self.one_of {
            if !allowed.contains(&value) {
                let allowed = allowed
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ConfigError::OptionType {
                    path: path.to_string(),
                    expected: format!("one of [{allowed}]"),
                    received: describe_value(&value),
                });
            }
        }

        Ok(value)
    }
}

impl fmt::Debug for OptionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("nullable", &self.nullable)
            .field("one_of", &self.one_of)
            .field("parser", &self.parser.is_some())
            .finish()
    }
}

pub(crate) struct OptionInner {
    path: RwLock<String>,
    def: OptionDef,
    value: RwLock<Value>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

/// Handle to a declared option. Cheap to clone; all clones share the value.
#[derive(Clone)]
pub struct ConfigOption {
    inner: Arc<OptionInner>,
}

impl ConfigOption {
    pub(crate) fn new(path: String, def: OptionDef) -> Result<Self, ConfigError> {
        let default = def.prepare(&path, def.default.clone())?;
        Ok(Self {
            inner: Arc::new(OptionInner {
                path: RwLock::new(path),
                def,
                value: RwLock::new(default),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        })
    }

    /// Dotted path of the option, e.g. `mock.collections.selected`.
    pub fn path(&self) -> String {
        self.inner.path.read().clone()
    }

    pub(crate) fn set_path(&self, path: String) {
        *self.inner.path.write() = path;
    }

    pub fn name(&self) -> &str {
        &self.inner.def.name
    }

    pub fn kind(&self) -> OptionType {
        self.inner.def.kind
    }

    pub fn description(&self) -> &str {
        &self.inner.def.description
    }

    pub fn default_value(&self) -> &Value {
        &self.inner.def.default
    }

    pub fn value(&self) -> Value {
        self.inner.value.read().clone()
    }

    pub fn as_string(&self) -> Option<String> {
        self.inner.value.read().as_str().map(str::to_string)
    }

    pub fn as_u64(&self) -> Option<u64> {
        let value = self.inner.value.read();
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.inner.value.read().as_bool()
    }

    /// Validate and store a new value, then notify listeners in registration
    /// order. Returns whether the value changed.
    pub fn set(&self, value: Value) -> Result<bool, ConfigError> {
        let prepared = self.prepare(value)?;
        Ok(self.assign(prepared))
    }

    pub(crate) fn prepare(&self, value: Value) -> Result<Value, ConfigError> {
        self.inner.def.prepare(&self.path(), value)
    }

    /// Store an already validated value.
    pub(crate) fn assign(&self, value: Value) -> bool {
        {
            let mut current = self.inner.value.write();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }

        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&value);
        }
        true
    }

    /// Register a change listener.
    pub fn on_change<F>(&self, listener: F) -> ListenerRemover
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        ListenerRemover {
            option: Arc::downgrade(&self.inner),
            id,
        }
    }
}

impl fmt::Debug for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOption")
            .field("path", &self.path())
            .field("kind", &self.kind())
            .field("value", &self.value())
            .finish()
    }
}

/// Removes the listener it was returned for.
#[derive(Debug)]
pub struct ListenerRemover {
    option: Weak<OptionInner>,
    id: u64,
}

impl ListenerRemover {
    pub fn remove(self) {
        if let Some(inner) = self.option.upgrade() {
            inner.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
