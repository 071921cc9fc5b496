//! Runtime values for the sandboxed script language.
//!
//! `Value` is a closed enumeration of every category the console can hold.
//! Composite values (`Array`, `Map`, `Set`, `Object`) are shared cells so
//! that scripts can build aliases and cycles; identity is the cell pointer.
//! Values never cross the host channel, only their formatted text does.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use tokio::sync::oneshot;

/// A fault raised by script code (or by the runtime on its behalf).
///
/// Faults are script-level data, not host errors: they flow into `Fault`
/// channel events and can also appear as first-class `Value::Fault` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFault {
    /// Fault kind, e.g. `TypeError`, `ReferenceError`, `SyntaxError`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Optional trace text (source position of the raising site).
    pub trace: Option<String>,
}

impl ScriptFault {
    /// Create a fault with the given kind and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Attach trace text describing where the fault was raised.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn reference(name: &str) -> Self {
        Self::new("ReferenceError", format!("{} is not defined", name))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new("SyntaxError", message)
    }

    pub fn range(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }
}

impl fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// The closed set of callable builtins.
///
/// Scripts cannot define their own functions; every callable value is one of
/// these. Dispatch happens in the evaluator, so the enum carries no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ConsoleLog,
    ConsoleInfo,
    ConsoleWarn,
    ConsoleError,
    ConsoleDebug,
    ConsoleTable,
    Sleep,
    Delay,
    FailLater,
    Push,
    Len,
    Keys,
    TypeOf,
    SymbolNew,
    BigIntNew,
    DateNew,
    RegExpNew,
    BytesNew,
    MapNew,
    SetNew,
    ErrorNew,
    TypeErrorNew,
    RangeErrorNew,
}

impl Builtin {
    /// The name shown by the formatter as `[Function <name>]`.
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::ConsoleLog => "log",
            Builtin::ConsoleInfo => "info",
            Builtin::ConsoleWarn => "warn",
            Builtin::ConsoleError => "error",
            Builtin::ConsoleDebug => "debug",
            Builtin::ConsoleTable => "table",
            Builtin::Sleep => "sleep",
            Builtin::Delay => "delay",
            Builtin::FailLater => "failLater",
            Builtin::Push => "push",
            Builtin::Len => "len",
            Builtin::Keys => "keys",
            Builtin::TypeOf => "typeOf",
            Builtin::SymbolNew => "Symbol",
            Builtin::BigIntNew => "BigInt",
            Builtin::DateNew => "Date",
            Builtin::RegExpNew => "RegExp",
            Builtin::BytesNew => "Bytes",
            Builtin::MapNew => "Map",
            Builtin::SetNew => "Set",
            Builtin::ErrorNew => "Error",
            Builtin::TypeErrorNew => "TypeError",
            Builtin::RangeErrorNew => "RangeError",
        }
    }
}

/// Resolution state of a pending (deferred) value.
enum PendingState {
    /// Not yet settled; holds the receiver until someone awaits it.
    Waiting(Option<oneshot::Receiver<Result<Value, ScriptFault>>>),
    /// Settled; the outcome is replayed to every later await.
    Settled(Result<Value, ScriptFault>),
}

/// Handle to a value that settles later.
///
/// The formatter never awaits one of these; only top-level `await` in the
/// execution context does.
#[derive(Clone)]
pub struct PendingHandle {
    state: Arc<Mutex<PendingState>>,
}

impl PendingHandle {
    /// Wrap a oneshot receiver whose sender settles the value.
    pub fn new(rx: oneshot::Receiver<Result<Value, ScriptFault>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PendingState::Waiting(Some(rx)))),
        }
    }

    /// Await settlement. Replays the stored outcome if already settled.
    pub async fn wait(&self) -> Result<Value, ScriptFault> {
        let rx = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(_) => return Err(ScriptFault::new("Error", "pending value poisoned")),
            };
            match &mut *state {
                PendingState::Settled(outcome) => return outcome.clone(),
                PendingState::Waiting(rx) => rx.take(),
            }
        };
        let outcome = match rx {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ScriptFault::new("Error", "pending value abandoned"))),
            // Single-threaded context: a second concurrent await cannot
            // happen through the protocol, but stay total anyway.
            None => Err(ScriptFault::new("Error", "pending value already awaited")),
        };
        if let Ok(mut state) = self.state.lock() {
            *state = PendingState::Settled(outcome.clone());
        }
        outcome
    }

    /// Pointer identity of the underlying cell.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.state) as usize
    }
}

impl fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PendingHandle({:#x})", self.identity())
    }
}

/// A runtime value. One variant per formatter category.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(BigInt),
    Str(String),
    Symbol(String),
    Function(Builtin),
    /// `None` marks an invalid date.
    Date(Option<DateTime<Utc>>),
    /// Regex source text; the console never compiles it.
    Regex(String),
    Fault(ScriptFault),
    /// Fixed-size binary buffer. The formatter shows the length only.
    Bytes(Arc<Vec<u8>>),
    Array(Arc<Mutex<Vec<Value>>>),
    Map(Arc<Mutex<Vec<(Value, Value)>>>),
    Set(Arc<Mutex<Vec<Value>>>),
    Object(Arc<Mutex<Vec<(String, Value)>>>),
    Pending(PendingHandle),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn object(entries: Vec<(String, Value)>) -> Self {
        Value::Object(Arc::new(Mutex::new(entries)))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::Map(Arc::new(Mutex::new(entries)))
    }

    pub fn set(items: Vec<Value>) -> Self {
        Value::Set(Arc::new(Mutex::new(items)))
    }

    /// Category name as reported by `typeOf`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Function(_) => "function",
            Value::Date(_) => "date",
            Value::Regex(_) => "regex",
            Value::Fault(_) => "fault",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Object(_) => "object",
            Value::Pending(_) => "pending",
        }
    }

    /// Truthiness for conditions, JS-flavoured.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::BigInt(n) => *n != BigInt::from(0),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Pointer identity of a composite value, `None` for scalars.
    ///
    /// This is what the formatter's cycle check and the `==` operator use
    /// for reference comparison.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(cell) => Some(Arc::as_ptr(cell) as usize),
            Value::Map(cell) => Some(Arc::as_ptr(cell) as usize),
            Value::Set(cell) => Some(Arc::as_ptr(cell) as usize),
            Value::Object(cell) => Some(Arc::as_ptr(cell) as usize),
            Value::Bytes(cell) => Some(Arc::as_ptr(cell) as usize),
            Value::Pending(handle) => Some(handle.identity()),
            _ => None,
        }
    }

    /// Equality as exposed by the script `==` operator: scalars by value,
    /// composites by identity.
    pub fn eq_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Fault(a), Value::Fault(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
        assert!(Value::Number(-1.5).is_truthy());
    }

    #[test]
    fn test_composite_identity() {
        let a = Value::array(vec![Value::Number(1.0)]);
        let b = a.clone();
        let c = Value::array(vec![Value::Number(1.0)]);
        assert!(a.eq_value(&b), "clones share the cell");
        assert!(!a.eq_value(&c), "structurally equal but distinct cells");
    }

    #[test]
    fn test_scalar_equality() {
        assert!(Value::str("hi").eq_value(&Value::str("hi")));
        assert!(!Value::Number(f64::NAN).eq_value(&Value::Number(f64::NAN)));
        assert!(!Value::Null.eq_value(&Value::Undefined));
    }

    #[tokio::test]
    async fn test_pending_handle_replays_outcome() {
        let (tx, rx) = oneshot::channel();
        let handle = PendingHandle::new(rx);
        tx.send(Ok(Value::Number(7.0))).unwrap();

        let first = handle.wait().await.unwrap();
        let second = handle.wait().await.unwrap();
        assert!(first.eq_value(&Value::Number(7.0)));
        assert!(second.eq_value(&Value::Number(7.0)));
    }

    #[tokio::test]
    async fn test_pending_handle_abandoned_sender() {
        let (tx, rx) = oneshot::channel::<Result<Value, ScriptFault>>();
        let handle = PendingHandle::new(rx);
        drop(tx);

        let outcome = handle.wait().await;
        assert!(outcome.is_err());
    }
}
