//! Native Function Registry
//!
//! This module provides a registry for native Rust functions that can be called
//! from bytecode via the `CallNative` instruction.
//!
//! # Design
//!
//! Native functions are registered by name and assigned a dense 16-bit
//! [`NativeId`]. The VM calls functions by ID. Every function receives the
//! current input value and its already-evaluated arguments (in the order the
//! VM pops them) and returns a single value or a [`NativeError`].
//!
//! Navigation built-ins additionally declare a [`PathRole`], which tells the
//! path-tracking hook which argument is the navigated subject and which path
//! component the call contributes.
//!
//! # Example
//!
//! ```
//! use filtervm::bytecode::native_registry::{NativeRegistry, NativeError};
//! use filtervm::models::Value;
//!
//! let mut registry = NativeRegistry::new();
//! let id = registry.register("first", 1, |_input, args| match args[0].as_array() {
//!     Some(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
//!     None => Err(NativeError::TypeError {
//!         expected: "array",
//!         got: args[0].type_name().to_string(),
//!     }),
//! });
//!
//! let args = [Value::array([Value::Int(1), Value::Int(2)])];
//! assert_eq!(registry.call(id, &Value::Null, &args).unwrap(), Value::Int(1));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use super::opcodes::NativeId;
use crate::models::Value;

/// Result type for native function calls
pub type NativeResult = Result<Value, NativeError>;

/// Error type for native function calls
#[derive(Debug, Clone, PartialEq)]
pub enum NativeError {
    /// Wrong number of arguments
    ArityMismatch { expected: usize, got: usize },
    /// Type error in arguments
    TypeError { expected: &'static str, got: String },
    /// Runtime error during execution
    RuntimeError(String),
    /// A value raised by the program itself (`error(v)`)
    Thrown(Value),
    /// Non-local exit to the enclosing label of this name
    Break(Arc<str>),
    /// Function not found
    NotFound(u16),
}

impl NativeError {
    /// The value a recovery branch receives for this error
    pub fn catch_value(&self) -> Value {
        match self {
            Self::Thrown(v) => v.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArityMismatch { expected, got } => {
                write!(f, "arity mismatch: expected {}, got {}", expected, got)
            }
            Self::TypeError { expected, got } => {
                write!(f, "type error: expected {}, got {}", expected, got)
            }
            Self::RuntimeError(msg) => write!(f, "runtime error: {}", msg),
            Self::Thrown(Value::String(msg)) => write!(f, "{}", msg),
            Self::Thrown(v) => write!(f, "{} (not a string)", v.preview()),
            Self::Break(label) => write!(f, "break {}", label),
            Self::NotFound(id) => write!(f, "native function {} not found", id),
        }
    }
}

impl std::error::Error for NativeError {}

/// How a native call participates in path tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathRole {
    /// Not a navigation step; ignored while a path is recorded
    #[default]
    None,
    /// Arguments `[subject, key]`; the component is `key`
    Index,
    /// Arguments `[subject, end, start]`; the component is `{"start", "end"}`
    Slice,
}

impl PathRole {
    /// Argument index of the navigated value
    pub fn subject(self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Index | Self::Slice => Some(0),
        }
    }

    /// Path component reported for a call with these arguments
    pub fn component(self, args: &[Value]) -> Option<Value> {
        match (self, args) {
            (Self::Index, [_, key, ..]) => Some(key.clone()),
            (Self::Slice, [_, end, start, ..]) => Some(Value::object([
                ("start", start.clone()),
                ("end", end.clone()),
            ])),
            _ => None,
        }
    }
}

/// Type alias for native function signature
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> NativeResult + Send + Sync>;

/// Registry entry for a native function
struct RegistryEntry {
    name: String,
    arity: usize,
    path_role: PathRole,
    func: NativeFn,
}

/// Registry for native Rust functions callable from bytecode
///
/// Functions are registered by name and assigned sequential IDs starting from 0.
/// The registry is append-only; functions cannot be removed or reassigned.
pub struct NativeRegistry {
    /// Functions stored by ID (index)
    functions: Vec<RegistryEntry>,
    /// Name to ID mapping for registration lookup
    name_to_id: HashMap<String, NativeId>,
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("function_count", &self.functions.len())
            .field("names", &self.name_to_id.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            name_to_id: HashMap::new(),
        }
    }

    /// Create a registry with the core navigation and control built-ins
    pub fn with_core() -> Self {
        let mut registry = Self::new();
        registry.register_core();
        registry
    }

    /// Register a native function, returning its ID
    ///
    /// If a function with this name already exists, returns its existing ID.
    pub fn register<F>(&mut self, name: &str, arity: usize, func: F) -> NativeId
    where
        F: Fn(&Value, &[Value]) -> NativeResult + Send + Sync + 'static,
    {
        self.register_with_role(name, arity, PathRole::None, func)
    }

    /// Register a native function that reports path components
    pub fn register_with_role<F>(
        &mut self,
        name: &str,
        arity: usize,
        path_role: PathRole,
        func: F,
    ) -> NativeId
    where
        F: Fn(&Value, &[Value]) -> NativeResult + Send + Sync + 'static,
    {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }

        let id = NativeId(self.functions.len() as u16);
        self.functions.push(RegistryEntry {
            name: name.to_string(),
            arity,
            path_role,
            func: Arc::new(func),
        });
        self.name_to_id.insert(name.to_string(), id);
        id
    }

    /// Get the ID of a registered function by name
    pub fn get_id(&self, name: &str) -> Option<NativeId> {
        self.name_to_id.get(name).copied()
    }

    /// Get the name of a registered function by ID
    pub fn get_name(&self, id: NativeId) -> Option<&str> {
        self.functions.get(id.0 as usize).map(|e| e.name.as_str())
    }

    /// Get the declared arity of a registered function
    pub fn arity(&self, id: NativeId) -> Option<usize> {
        self.functions.get(id.0 as usize).map(|e| e.arity)
    }

    /// Path-tracking role of a registered function
    pub fn path_role(&self, id: NativeId) -> PathRole {
        self.functions
            .get(id.0 as usize)
            .map_or(PathRole::None, |e| e.path_role)
    }

    /// Call a native function by ID
    pub fn call(&self, id: NativeId, input: &Value, args: &[Value]) -> NativeResult {
        let entry = self
            .functions
            .get(id.0 as usize)
            .ok_or(NativeError::NotFound(id.0))?;

        if args.len() != entry.arity {
            return Err(NativeError::ArityMismatch {
                expected: entry.arity,
                got: args.len(),
            });
        }

        (entry.func)(input, args)
    }

    /// Get the number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn register_core(&mut self) {
        self.register_with_role("_index", 2, PathRole::Index, |_input, args| {
            index_value(&args[0], &args[1])
        });

        self.register_with_role("_slice", 3, PathRole::Slice, |_input, args| {
            slice_value(&args[0], &args[2], &args[1])
        });

        self.register("error", 1, |_input, args| {
            Err(NativeError::Thrown(args[0].clone()))
        });

        self.register("_break", 1, |_input, args| match &args[0] {
            Value::String(label) => Err(NativeError::Break(Arc::from(label.as_str()))),
            other => Err(NativeError::TypeError {
                expected: "string",
                got: other.type_name().to_string(),
            }),
        });

        self.register("type", 0, |input, _args| {
            Ok(Value::from(input.type_name()))
        });
    }
}

/// `subject[key]` with jq semantics for missing entries
fn index_value(subject: &Value, key: &Value) -> NativeResult {
    match (subject, key) {
        (Value::Null, Value::String(_) | Value::Int(_) | Value::Float(_) | Value::Null) => {
            Ok(Value::Null)
        }
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), k) if k.as_index().is_some() => {
            let index = k.as_index().unwrap_or_default();
            Ok(resolve_index(index, items.len())
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null))
        }
        (Value::Array(_), Value::Object(_)) => slice_value(
            subject,
            key.as_object().and_then(|m| m.get("start")).unwrap_or(&Value::Null),
            key.as_object().and_then(|m| m.get("end")).unwrap_or(&Value::Null),
        ),
        _ => Err(NativeError::RuntimeError(format!(
            "expected an object but got: {} ({})",
            subject.type_name(),
            subject.preview()
        ))),
    }
}

/// `subject[start:end]` over arrays and strings
fn slice_value(subject: &Value, start: &Value, end: &Value) -> NativeResult {
    let bound = |v: &Value, default: usize, len: usize| -> Result<usize, NativeError> {
        match v {
            Value::Null => Ok(default),
            v => match v.as_index() {
                Some(i) => Ok(clamp_index(i, len)),
                None => Err(NativeError::TypeError {
                    expected: "number",
                    got: v.type_name().to_string(),
                }),
            },
        }
    };

    match subject {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let len = items.len();
            let (s, e) = (bound(start, 0, len)?, bound(end, len, len)?);
            Ok(Value::array(items[s..e.max(s)].iter().cloned()))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let len = chars.len();
            let (s, e) = (bound(start, 0, len)?, bound(end, len, len)?);
            Ok(Value::String(chars[s..e.max(s)].iter().collect()))
        }
        other => Err(NativeError::RuntimeError(format!(
            "cannot slice {} ({})",
            other.type_name(),
            other.preview()
        ))),
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len } else { index };
    usize::try_from(resolved).ok()
}

fn clamp_index(index: i64, len: usize) -> usize {
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { index + signed_len } else { index };
    resolved.clamp(0, signed_len) as usize
}
