//! Tree-walking evaluator for the console script language.
//!
//! The recursive core is synchronous; suspension happens only at the points
//! the protocol allows (top-level `await`), which is why [`Interpreter::run_program`]
//! is the lone async entry point. Cooperative interruption works like the
//! epoch mechanism of a wasm engine: an atomic flag is polled on every
//! evaluation step, so a `reset()` can stop a tight loop without killing a
//! thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use num_bigint::BigInt;
use tokio::sync::{mpsc, oneshot};

use crate::format::{display_text, format_value};
use crate::interp::parser::{BinaryOp, Expr, Stmt, Target, UnaryOp};
use crate::interp::value::{Builtin, PendingHandle, ScriptFault, Value};
use crate::protocol::{ContextMessage, DiagnosticMethod};
use crate::sandbox::console::ConsoleEncoder;

/// Hard bound on evaluation recursion, matching the parser's nesting bound.
/// A pathological AST faults instead of exhausting the task stack.
const MAX_EVAL_DEPTH: usize = 256;

/// Evaluation state for one sandbox instance.
///
/// Globals persist across submissions; the encoder and event sender are the
/// instance's only channels to the outside.
pub struct Interpreter {
    globals: HashMap<String, Value>,
    console: ConsoleEncoder,
    /// Outbound channel used by detached work (scheduled by a submission,
    /// possibly faulting after it completed).
    events: mpsc::UnboundedSender<ContextMessage>,
    interrupt: Arc<AtomicBool>,
    max_steps: Option<u64>,
    steps: u64,
    depth: usize,
}

impl Interpreter {
    pub fn new(
        console: ConsoleEncoder,
        events: mpsc::UnboundedSender<ContextMessage>,
        interrupt: Arc<AtomicBool>,
        max_steps: Option<u64>,
    ) -> Self {
        let mut interp = Self {
            globals: HashMap::new(),
            console,
            events,
            interrupt,
            max_steps,
            steps: 0,
            depth: 0,
        };
        interp.install_globals();
        interp
    }

    fn install_globals(&mut self) {
        let console = Value::object(vec![
            ("log".into(), Value::Function(Builtin::ConsoleLog)),
            ("info".into(), Value::Function(Builtin::ConsoleInfo)),
            ("warn".into(), Value::Function(Builtin::ConsoleWarn)),
            ("error".into(), Value::Function(Builtin::ConsoleError)),
            ("debug".into(), Value::Function(Builtin::ConsoleDebug)),
            ("table".into(), Value::Function(Builtin::ConsoleTable)),
        ]);
        self.globals.insert("console".into(), console);
        for builtin in [
            Builtin::Sleep,
            Builtin::Delay,
            Builtin::FailLater,
            Builtin::Push,
            Builtin::Len,
            Builtin::Keys,
            Builtin::TypeOf,
            Builtin::SymbolNew,
            Builtin::BigIntNew,
            Builtin::DateNew,
            Builtin::RegExpNew,
            Builtin::BytesNew,
            Builtin::MapNew,
            Builtin::SetNew,
            Builtin::ErrorNew,
            Builtin::TypeErrorNew,
            Builtin::RangeErrorNew,
        ] {
            self.globals
                .insert(builtin.name().to_string(), Value::Function(builtin));
        }
    }

    /// Reset the per-submission step counter. The context calls this before
    /// each submission so the optional step limit applies per evaluation.
    pub fn begin_submission(&mut self) {
        self.steps = 0;
        self.depth = 0;
    }

    /// Execute a parsed statement block, suspending at top-level awaits.
    /// The completion value is the value of the last expression statement.
    pub async fn run_program(&mut self, stmts: &[Stmt]) -> Result<Value, ScriptFault> {
        let mut completion = Value::Undefined;
        for stmt in stmts {
            match stmt {
                Stmt::Let {
                    name,
                    init,
                    awaited,
                    ..
                } => {
                    let mut value = self.eval_expr(init)?;
                    if *awaited {
                        value = settle(value).await?;
                    }
                    self.globals.insert(name.clone(), value);
                }
                Stmt::Assign {
                    target,
                    value,
                    awaited,
                    line,
                } => {
                    let mut value = self.eval_expr(value)?;
                    if *awaited {
                        value = settle(value).await?;
                    }
                    self.assign(target, value, *line)?;
                }
                Stmt::Expr { expr, awaited } => {
                    let mut value = self.eval_expr(expr)?;
                    if *awaited {
                        value = settle(value).await?;
                    }
                    completion = value;
                }
                other => {
                    if let Some(value) = self.exec_stmt(other)? {
                        completion = value;
                    }
                }
            }
        }
        Ok(completion)
    }

    /// Execute one statement synchronously (nested blocks take this path;
    /// the parser has already rejected `await` inside them).
    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Option<Value>, ScriptFault> {
        match stmt {
            Stmt::Let { name, init, .. } => {
                let value = self.eval_expr(init)?;
                self.globals.insert(name.clone(), value);
                Ok(None)
            }
            Stmt::Assign {
                target,
                value,
                line,
                ..
            } => {
                let value = self.eval_expr(value)?;
                self.assign(target, value, *line)?;
                Ok(None)
            }
            Stmt::Expr { expr, .. } => Ok(Some(self.eval_expr(expr)?)),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.eval_expr(cond)?.is_truthy() {
                    self.exec_block(then_block)
                } else if let Some(else_block) = else_block {
                    self.exec_block(else_block)
                } else {
                    Ok(None)
                }
            }
            Stmt::While { cond, body } => {
                let mut completion = None;
                while self.eval_expr(cond)?.is_truthy() {
                    self.tick(0)?;
                    if let Some(value) = self.exec_block(body)? {
                        completion = Some(value);
                    }
                }
                Ok(completion)
            }
            Stmt::Throw { expr, line } => {
                let value = self.eval_expr(expr)?;
                Err(match value {
                    Value::Fault(fault) => fault.with_trace(format!("at line {}", line)),
                    other => ScriptFault::new("Error", display_text(&other))
                        .with_trace(format!("at line {}", line)),
                })
            }
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Option<Value>, ScriptFault> {
        let mut completion = None;
        for stmt in stmts {
            if let Some(value) = self.exec_stmt(stmt)? {
                completion = Some(value);
            }
        }
        Ok(completion)
    }

    /// One interruption/step-limit check. Polled on every expression node
    /// and every loop iteration.
    fn tick(&mut self, line: usize) -> Result<(), ScriptFault> {
        if self.interrupt.load(Ordering::Relaxed) {
            return Err(ScriptFault::new("Interrupted", "evaluation interrupted")
                .with_trace(format!("at line {}", line)));
        }
        self.steps += 1;
        if let Some(max) = self.max_steps {
            if self.steps > max {
                return Err(ScriptFault::range(format!(
                    "evaluation exceeded {} steps",
                    max
                )));
            }
        }
        Ok(())
    }

    /// Evaluate one expression. Synchronous and total over the AST.
    pub fn eval_expr(&mut self, expr: &Expr) -> Result<Value, ScriptFault> {
        self.tick(expr_line(expr))?;
        self.depth += 1;
        if self.depth > MAX_EVAL_DEPTH {
            self.depth -= 1;
            return Err(ScriptFault::range("expression nesting is too deep"));
        }
        let result = self.eval_inner(expr);
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Value, ScriptFault> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::BigInt(n) => Ok(Value::BigInt(n.clone())),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name, _) => self
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| ScriptFault::reference(name)),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item)?);
                }
                Ok(Value::array(values))
            }
            Expr::Object(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                for (key, expr) in entries {
                    values.push((key.clone(), self.eval_expr(expr)?));
                }
                Ok(Value::object(values))
            }
            Expr::Unary { op, expr } => {
                let value = self.eval_expr(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        Value::BigInt(n) => Ok(Value::BigInt(-n)),
                        other => Err(ScriptFault::type_error(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs, line } => {
                // Short-circuit forms evaluate the right side conditionally.
                match op {
                    BinaryOp::And => {
                        let left = self.eval_expr(lhs)?;
                        if left.is_truthy() {
                            self.eval_expr(rhs)
                        } else {
                            Ok(left)
                        }
                    }
                    BinaryOp::Or => {
                        let left = self.eval_expr(lhs)?;
                        if left.is_truthy() {
                            Ok(left)
                        } else {
                            self.eval_expr(rhs)
                        }
                    }
                    _ => {
                        let left = self.eval_expr(lhs)?;
                        let right = self.eval_expr(rhs)?;
                        binary_op(*op, left, right, *line)
                    }
                }
            }
            Expr::Member { object, name, line } => {
                let object = self.eval_expr(object)?;
                self.member(&object, name, *line)
            }
            Expr::Index {
                object,
                index,
                line,
            } => {
                let object = self.eval_expr(object)?;
                let index = self.eval_expr(index)?;
                self.index(&object, &index, *line)
            }
            Expr::Call { callee, args, line } => {
                let callee_value = self.eval_expr(callee)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval_expr(arg)?);
                }
                match callee_value {
                    Value::Function(builtin) => self.call_builtin(builtin, arg_values, *line),
                    other => Err(ScriptFault::type_error(format!(
                        "{} is not a function",
                        other.type_name()
                    ))
                    .with_trace(format!("at line {}", line))),
                }
            }
        }
    }

    fn member(&mut self, object: &Value, name: &str, line: usize) -> Result<Value, ScriptFault> {
        match object {
            Value::Object(cell) => {
                let entries = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("object is unreadable"))?;
                Ok(entries
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Value::Undefined))
            }
            Value::Array(cell) if name == "length" => {
                let items = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("array is unreadable"))?;
                Ok(Value::Number(items.len() as f64))
            }
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Map(cell) if name == "size" => {
                let entries = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("map is unreadable"))?;
                Ok(Value::Number(entries.len() as f64))
            }
            Value::Set(cell) if name == "size" => {
                let items = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("set is unreadable"))?;
                Ok(Value::Number(items.len() as f64))
            }
            Value::Bytes(bytes) if name == "byteLength" => {
                Ok(Value::Number(bytes.len() as f64))
            }
            Value::Fault(fault) => match name {
                "kind" => Ok(Value::str(fault.kind.clone())),
                "message" => Ok(Value::str(fault.message.clone())),
                _ => Ok(Value::Undefined),
            },
            Value::Undefined | Value::Null => Err(ScriptFault::type_error(format!(
                "cannot read property '{}' of {}",
                name,
                object.type_name()
            ))
            .with_trace(format!("at line {}", line))),
            _ => Ok(Value::Undefined),
        }
    }

    fn index(&mut self, object: &Value, index: &Value, line: usize) -> Result<Value, ScriptFault> {
        match object {
            Value::Array(cell) => {
                let items = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("array is unreadable"))?;
                Ok(as_element_index(index)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Undefined))
            }
            Value::Str(s) => Ok(as_element_index(index)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.to_string()))
                .unwrap_or(Value::Undefined)),
            Value::Object(_) => match index {
                Value::Str(key) => self.member(object, key, line),
                _ => Ok(Value::Undefined),
            },
            Value::Map(cell) => {
                let entries = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("map is unreadable"))?;
                Ok(entries
                    .iter()
                    .find(|(key, _)| key.eq_value(index))
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Value::Undefined))
            }
            Value::Undefined | Value::Null => Err(ScriptFault::type_error(format!(
                "cannot index {}",
                object.type_name()
            ))
            .with_trace(format!("at line {}", line))),
            _ => Ok(Value::Undefined),
        }
    }

    fn assign(&mut self, target: &Target, value: Value, line: usize) -> Result<(), ScriptFault> {
        match target {
            Target::Ident(name) => {
                if self.globals.contains_key(name) {
                    self.globals.insert(name.clone(), value);
                    Ok(())
                } else {
                    Err(ScriptFault::reference(name).with_trace(format!("at line {}", line)))
                }
            }
            Target::Member { object, name } => {
                let object = self.eval_expr(object)?;
                match object {
                    Value::Object(cell) => {
                        let mut entries = cell
                            .lock()
                            .map_err(|_| ScriptFault::type_error("object is unreadable"))?;
                        if let Some(entry) =
                            entries.iter_mut().find(|(key, _)| key == name)
                        {
                            entry.1 = value;
                        } else {
                            entries.push((name.clone(), value));
                        }
                        Ok(())
                    }
                    other => Err(ScriptFault::type_error(format!(
                        "cannot set property '{}' on {}",
                        name,
                        other.type_name()
                    ))
                    .with_trace(format!("at line {}", line))),
                }
            }
            Target::Index { object, index } => {
                let object = self.eval_expr(object)?;
                let index = self.eval_expr(index)?;
                match &object {
                    Value::Array(cell) => {
                        let mut items = cell
                            .lock()
                            .map_err(|_| ScriptFault::type_error("array is unreadable"))?;
                        match as_element_index(&index) {
                            Some(i) if i < items.len() => {
                                items[i] = value;
                                Ok(())
                            }
                            Some(i) if i == items.len() => {
                                items.push(value);
                                Ok(())
                            }
                            _ => Err(ScriptFault::range(format!(
                                "index {} out of bounds",
                                format_value(&index)
                            ))
                            .with_trace(format!("at line {}", line))),
                        }
                    }
                    Value::Map(cell) => {
                        let mut entries = cell
                            .lock()
                            .map_err(|_| ScriptFault::type_error("map is unreadable"))?;
                        if let Some(entry) =
                            entries.iter_mut().find(|(key, _)| key.eq_value(&index))
                        {
                            entry.1 = value;
                        } else {
                            entries.push((index, value));
                        }
                        Ok(())
                    }
                    Value::Object(cell) => match &index {
                        Value::Str(key) => {
                            let mut entries = cell
                                .lock()
                                .map_err(|_| ScriptFault::type_error("object is unreadable"))?;
                            if let Some(entry) = entries.iter_mut().find(|(k, _)| k == key) {
                                entry.1 = value;
                            } else {
                                entries.push((key.clone(), value));
                            }
                            Ok(())
                        }
                        other => Err(ScriptFault::type_error(format!(
                            "object keys must be strings, got {}",
                            other.type_name()
                        ))),
                    },
                    other => Err(ScriptFault::type_error(format!(
                        "cannot index-assign into {}",
                        other.type_name()
                    ))
                    .with_trace(format!("at line {}", line))),
                }
            }
        }
    }

    fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value, ScriptFault> {
        match builtin {
            Builtin::ConsoleLog => self.diagnostic(DiagnosticMethod::Log, args),
            Builtin::ConsoleInfo => self.diagnostic(DiagnosticMethod::Info, args),
            Builtin::ConsoleWarn => self.diagnostic(DiagnosticMethod::Warn, args),
            Builtin::ConsoleError => self.diagnostic(DiagnosticMethod::Error, args),
            Builtin::ConsoleDebug => self.diagnostic(DiagnosticMethod::Debug, args),
            Builtin::ConsoleTable => {
                let data = args
                    .first()
                    .ok_or_else(|| ScriptFault::type_error("console.table expects data"))?;
                let columns = match args.get(1) {
                    None | Some(Value::Undefined) => None,
                    Some(Value::Array(cell)) => {
                        let items = cell
                            .lock()
                            .map_err(|_| ScriptFault::type_error("columns are unreadable"))?;
                        let mut columns = Vec::with_capacity(items.len());
                        for item in items.iter() {
                            match item {
                                Value::Str(s) => columns.push(s.clone()),
                                other => {
                                    return Err(ScriptFault::type_error(format!(
                                        "column names must be strings, got {}",
                                        other.type_name()
                                    )))
                                }
                            }
                        }
                        Some(columns)
                    }
                    Some(other) => {
                        return Err(ScriptFault::type_error(format!(
                            "columns must be an array, got {}",
                            other.type_name()
                        )))
                    }
                };
                self.console.table(data, columns.as_deref())?;
                Ok(Value::Undefined)
            }
            Builtin::Sleep => {
                let ms = expect_millis(&args, 0, "sleep")?;
                Ok(Value::Pending(spawn_pending(ms, Ok(Value::Undefined))))
            }
            Builtin::Delay => {
                let ms = expect_millis(&args, 0, "delay")?;
                let value = args.get(1).cloned().unwrap_or(Value::Undefined);
                Ok(Value::Pending(spawn_pending(ms, Ok(value))))
            }
            Builtin::FailLater => {
                let ms = expect_millis(&args, 0, "failLater")?;
                let message = args
                    .get(1)
                    .map(display_text)
                    .unwrap_or_else(|| "detached failure".to_string());
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                    let fault = ScriptFault::new("Error", message);
                    // An untargeted fault: the submission that scheduled this
                    // has long since completed.
                    let _ = events.send(ContextMessage::Fault {
                        id: None,
                        formatted_value: format_value(&Value::Fault(fault)),
                        ts: Utc::now(),
                    });
                });
                Ok(Value::Undefined)
            }
            Builtin::Push => {
                let arr = args
                    .first()
                    .ok_or_else(|| ScriptFault::type_error("push expects an array"))?;
                let value = args.get(1).cloned().unwrap_or(Value::Undefined);
                match arr {
                    Value::Array(cell) => {
                        let mut items = cell
                            .lock()
                            .map_err(|_| ScriptFault::type_error("array is unreadable"))?;
                        items.push(value);
                        Ok(Value::Number(items.len() as f64))
                    }
                    other => Err(ScriptFault::type_error(format!(
                        "push expects an array, got {}",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Len => {
                let value = args
                    .first()
                    .ok_or_else(|| ScriptFault::type_error("len expects a value"))?;
                let len = match value {
                    Value::Str(s) => s.chars().count(),
                    Value::Array(cell) => locked_len(cell)?,
                    Value::Set(cell) => locked_len(cell)?,
                    Value::Map(cell) => cell
                        .lock()
                        .map_err(|_| ScriptFault::type_error("map is unreadable"))?
                        .len(),
                    Value::Object(cell) => cell
                        .lock()
                        .map_err(|_| ScriptFault::type_error("object is unreadable"))?
                        .len(),
                    Value::Bytes(bytes) => bytes.len(),
                    other => {
                        return Err(ScriptFault::type_error(format!(
                            "len is not defined for {}",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Number(len as f64))
            }
            Builtin::Keys => {
                let value = args
                    .first()
                    .ok_or_else(|| ScriptFault::type_error("keys expects a value"))?;
                match value {
                    Value::Object(cell) => {
                        let entries = cell
                            .lock()
                            .map_err(|_| ScriptFault::type_error("object is unreadable"))?;
                        Ok(Value::array(
                            entries.iter().map(|(k, _)| Value::str(k.clone())).collect(),
                        ))
                    }
                    Value::Map(cell) => {
                        let entries = cell
                            .lock()
                            .map_err(|_| ScriptFault::type_error("map is unreadable"))?;
                        Ok(Value::array(entries.iter().map(|(k, _)| k.clone()).collect()))
                    }
                    other => Err(ScriptFault::type_error(format!(
                        "keys is not defined for {}",
                        other.type_name()
                    ))),
                }
            }
            Builtin::TypeOf => {
                let value = args.first().cloned().unwrap_or(Value::Undefined);
                Ok(Value::str(value.type_name()))
            }
            Builtin::SymbolNew => {
                let desc = args.first().map(display_text).unwrap_or_default();
                Ok(Value::Symbol(desc))
            }
            Builtin::BigIntNew => match args.first() {
                Some(Value::BigInt(n)) => Ok(Value::BigInt(n.clone())),
                Some(Value::Number(n)) if n.fract() == 0.0 && n.is_finite() => {
                    Ok(Value::BigInt(BigInt::from(*n as i64)))
                }
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<BigInt>()
                    .map(Value::BigInt)
                    .map_err(|_| ScriptFault::syntax(format!("cannot convert \"{}\" to bigint", s))),
                Some(other) => Err(ScriptFault::type_error(format!(
                    "cannot convert {} to bigint",
                    other.type_name()
                ))),
                None => Err(ScriptFault::type_error("BigInt expects a value")),
            },
            Builtin::DateNew => match args.first() {
                None => Ok(Value::Date(Some(Utc::now()))),
                Some(Value::Number(ms)) => {
                    let parsed = if ms.is_finite() {
                        Utc.timestamp_millis_opt(*ms as i64).single()
                    } else {
                        None
                    };
                    Ok(Value::Date(parsed))
                }
                Some(Value::Str(s)) => {
                    let parsed = chrono::DateTime::parse_from_rfc3339(s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok();
                    Ok(Value::Date(parsed))
                }
                Some(other) => Err(ScriptFault::type_error(format!(
                    "Date expects a timestamp or string, got {}",
                    other.type_name()
                ))),
            },
            Builtin::RegExpNew => {
                let source = args.first().map(display_text).unwrap_or_default();
                Ok(Value::Regex(source))
            }
            Builtin::BytesNew => match args.first() {
                Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                    Ok(Value::Bytes(Arc::new(vec![0u8; *n as usize])))
                }
                _ => Err(ScriptFault::range("Bytes expects a non-negative length")),
            },
            Builtin::MapNew => match args.first() {
                None | Some(Value::Undefined) => Ok(Value::map(Vec::new())),
                Some(Value::Array(cell)) => {
                    let items = cell
                        .lock()
                        .map_err(|_| ScriptFault::type_error("entries are unreadable"))?;
                    let mut entries: Vec<(Value, Value)> = Vec::with_capacity(items.len());
                    for item in items.iter() {
                        let pair = match item {
                            Value::Array(pair) => pair
                                .lock()
                                .map_err(|_| ScriptFault::type_error("entry is unreadable"))?
                                .clone(),
                            other => {
                                return Err(ScriptFault::type_error(format!(
                                    "Map entries must be [key, value] pairs, got {}",
                                    other.type_name()
                                )))
                            }
                        };
                        if pair.len() != 2 {
                            return Err(ScriptFault::type_error(
                                "Map entries must be [key, value] pairs",
                            ));
                        }
                        let key = pair[0].clone();
                        let value = pair[1].clone();
                        if let Some(entry) =
                            entries.iter_mut().find(|(k, _)| k.eq_value(&key))
                        {
                            entry.1 = value;
                        } else {
                            entries.push((key, value));
                        }
                    }
                    Ok(Value::map(entries))
                }
                Some(other) => Err(ScriptFault::type_error(format!(
                    "Map expects an array of entries, got {}",
                    other.type_name()
                ))),
            },
            Builtin::SetNew => match args.first() {
                None | Some(Value::Undefined) => Ok(Value::set(Vec::new())),
                Some(Value::Array(cell)) => {
                    let items = cell
                        .lock()
                        .map_err(|_| ScriptFault::type_error("items are unreadable"))?;
                    let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                    for item in items.iter() {
                        if !unique.iter().any(|existing| existing.eq_value(item)) {
                            unique.push(item.clone());
                        }
                    }
                    Ok(Value::set(unique))
                }
                Some(other) => Err(ScriptFault::type_error(format!(
                    "Set expects an array of items, got {}",
                    other.type_name()
                ))),
            },
            Builtin::ErrorNew | Builtin::TypeErrorNew | Builtin::RangeErrorNew => {
                let kind = builtin.name();
                let message = args.first().map(display_text).unwrap_or_default();
                Ok(Value::Fault(
                    ScriptFault::new(kind, message).with_trace(format!("at line {}", line)),
                ))
            }
        }
    }

    fn diagnostic(
        &mut self,
        method: DiagnosticMethod,
        args: Vec<Value>,
    ) -> Result<Value, ScriptFault> {
        self.console.call(method, &args);
        Ok(Value::Undefined)
    }
}

/// Await a pending value; anything already settled passes through.
pub async fn settle(value: Value) -> Result<Value, ScriptFault> {
    match value {
        Value::Pending(handle) => handle.wait().await,
        other => Ok(other),
    }
}

fn spawn_pending(ms: u64, outcome: Result<Value, ScriptFault>) -> PendingHandle {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        let _ = tx.send(outcome);
    });
    PendingHandle::new(rx)
}

fn expect_millis(args: &[Value], pos: usize, what: &str) -> Result<u64, ScriptFault> {
    match args.get(pos) {
        Some(Value::Number(n)) if *n >= 0.0 && n.is_finite() => Ok(*n as u64),
        _ => Err(ScriptFault::type_error(format!(
            "{} expects a non-negative millisecond count",
            what
        ))),
    }
}

fn locked_len(cell: &Arc<std::sync::Mutex<Vec<Value>>>) -> Result<usize, ScriptFault> {
    cell.lock()
        .map(|items| items.len())
        .map_err(|_| ScriptFault::type_error("collection is unreadable"))
}

fn as_element_index(index: &Value) -> Option<usize> {
    match index {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && n.is_finite() => Some(*n as usize),
        _ => None,
    }
}

fn expr_line(expr: &Expr) -> usize {
    match expr {
        Expr::Ident(_, line) => *line,
        Expr::Binary { line, .. }
        | Expr::Member { line, .. }
        | Expr::Index { line, .. }
        | Expr::Call { line, .. } => *line,
        _ => 0,
    }
}

fn binary_op(op: BinaryOp, left: Value, right: Value, line: usize) -> Result<Value, ScriptFault> {
    let fault = |message: String| {
        Err(ScriptFault::type_error(message).with_trace(format!("at line {}", line)))
    };
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left.eq_value(&right))),
        BinaryOp::NotEq => Ok(Value::Bool(!left.eq_value(&right))),
        BinaryOp::Add => match (&left, &right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Ok(Value::str(format!("{}{}", display_text(&left), display_text(&right))))
            }
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::BigInt(a), Value::BigInt(b)) => Ok(Value::BigInt(a + b)),
            _ => fault(format!(
                "cannot add {} and {}",
                left.type_name(),
                right.type_name()
            )),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem | BinaryOp::Pow => {
            match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(match op {
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                    BinaryOp::Pow => a.powf(*b),
                    _ => unreachable!(),
                })),
                (Value::BigInt(a), Value::BigInt(b)) => match op {
                    BinaryOp::Sub => Ok(Value::BigInt(a - b)),
                    BinaryOp::Mul => Ok(Value::BigInt(a * b)),
                    BinaryOp::Div => {
                        if *b == BigInt::from(0) {
                            Err(ScriptFault::range("bigint division by zero")
                                .with_trace(format!("at line {}", line)))
                        } else {
                            Ok(Value::BigInt(a / b))
                        }
                    }
                    BinaryOp::Rem => {
                        if *b == BigInt::from(0) {
                            Err(ScriptFault::range("bigint division by zero")
                                .with_trace(format!("at line {}", line)))
                        } else {
                            Ok(Value::BigInt(a % b))
                        }
                    }
                    BinaryOp::Pow => {
                        let exp = u32::try_from(b.clone()).map_err(|_| {
                            ScriptFault::range("bigint exponent out of range")
                                .with_trace(format!("at line {}", line))
                        })?;
                        Ok(Value::BigInt(a.pow(exp)))
                    }
                    _ => unreachable!(),
                },
                _ => fault(format!(
                    "cannot apply arithmetic to {} and {}",
                    left.type_name(),
                    right.type_name()
                )),
            }
        }
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => {
                    return fault(format!(
                        "cannot compare {} and {}",
                        left.type_name(),
                        right.type_name()
                    ))
                }
            };
            let result = match ordering {
                None => false, // NaN never compares
                Some(ordering) => match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::LtEq => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::GtEq => ordering.is_ge(),
                    _ => unreachable!(),
                },
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit ops handled by caller"),
    }
}
