//! Diagnostic and tabular output encoding.
//!
//! The execution context is handed an explicit diagnostics sink at
//! construction; script code reaches it through the `console` global. There
//! is no process-wide interception anywhere; an embedder that wants custom
//! routing implements [`EventSink`].

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::format::format_value;
use crate::interp::value::{ScriptFault, Value};
use crate::protocol::{DiagnosticEvent, DiagnosticMethod, TableEvent};

/// Synthetic column name for keys of map-like tabular input.
pub const INDEX_COLUMN: &str = "(index)";

/// Column name for rows that are not object-like.
pub const VALUES_COLUMN: &str = "Values";

/// Receiver for encoded diagnostic and tabular events.
pub trait EventSink: Send + Sync {
    fn diagnostic(&self, event: DiagnosticEvent);
    fn table(&self, event: TableEvent);
}

/// A sink that collects events in memory. Useful for tests and embedders
/// that render asynchronously.
#[derive(Default)]
pub struct CaptureSink {
    pub diagnostics: Mutex<Vec<DiagnosticEvent>>,
    pub tables: Mutex<Vec<TableEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for CaptureSink {
    fn diagnostic(&self, event: DiagnosticEvent) {
        self.diagnostics.lock().unwrap().push(event);
    }

    fn table(&self, event: TableEvent) {
        self.tables.lock().unwrap().push(event);
    }
}

/// Encodes console calls into structured events.
#[derive(Clone)]
pub struct ConsoleEncoder {
    sink: Arc<dyn EventSink>,
}

impl ConsoleEncoder {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Encode one diagnostic call. Arguments are formatted at the moment of
    /// the call, never deferred, and joined with single spaces in call order.
    pub fn call(&self, method: DiagnosticMethod, args: &[Value]) {
        let formatted_args = args
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(" ");
        self.sink.diagnostic(DiagnosticEvent {
            method,
            formatted_args,
            ts: Utc::now(),
        });
    }

    /// Emit pre-formatted informational text (module loader progress).
    pub fn info_text(&self, text: impl Into<String>) {
        self.sink.diagnostic(DiagnosticEvent {
            method: DiagnosticMethod::Info,
            formatted_args: text.into(),
            ts: Utc::now(),
        });
    }

    /// Encode a tabular request.
    ///
    /// Accepts an indexed collection of row-like values, or a map-like /
    /// object-like collection whose keys are injected under the synthetic
    /// `(index)` column. Headers come from the explicit column list when
    /// supplied, otherwise from the union of row keys in first-seen order.
    /// Every cell goes through the formatter.
    pub fn table(&self, data: &Value, columns: Option<&[String]>) -> Result<(), ScriptFault> {
        // (formatted key, row value) pairs; the key is None for indexed input.
        let rows: Vec<(Option<String>, Value)> = match data {
            Value::Array(cell) => {
                let items = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("table input is unreadable"))?;
                items.iter().map(|v| (None, v.clone())).collect()
            }
            Value::Set(cell) => {
                let items = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("table input is unreadable"))?;
                items.iter().map(|v| (None, v.clone())).collect()
            }
            Value::Map(cell) => {
                let entries = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("table input is unreadable"))?;
                entries
                    .iter()
                    .map(|(k, v)| (Some(format_value(k)), v.clone()))
                    .collect()
            }
            Value::Object(cell) => {
                let entries = cell
                    .lock()
                    .map_err(|_| ScriptFault::type_error("table input is unreadable"))?;
                entries
                    .iter()
                    .map(|(k, v)| (Some(k.clone()), v.clone()))
                    .collect()
            }
            other => {
                return Err(ScriptFault::type_error(format!(
                    "console.table expects a collection, got {}",
                    other.type_name()
                )))
            }
        };

        let keyed = rows.iter().any(|(key, _)| key.is_some());

        // Column resolution: explicit list verbatim, else first-seen union.
        let mut data_headers: Vec<String> = match columns {
            Some(cols) => cols.to_vec(),
            None => {
                let mut headers = Vec::new();
                for (_, row) in &rows {
                    match row {
                        Value::Object(cell) => {
                            let entries = cell.lock().map_err(|_| {
                                ScriptFault::type_error("table row is unreadable")
                            })?;
                            for (key, _) in entries.iter() {
                                if !headers.contains(key) {
                                    headers.push(key.clone());
                                }
                            }
                        }
                        _ => {
                            if !headers.contains(&VALUES_COLUMN.to_string()) {
                                headers.push(VALUES_COLUMN.to_string());
                            }
                        }
                    }
                }
                headers
            }
        };

        let mut headers = Vec::with_capacity(data_headers.len() + 1);
        if keyed {
            headers.push(INDEX_COLUMN.to_string());
        }
        headers.append(&mut data_headers);

        let mut out_rows = Vec::with_capacity(rows.len());
        for (key, row) in &rows {
            let mut cells = Vec::with_capacity(headers.len());
            for header in &headers {
                if keyed && header == INDEX_COLUMN {
                    cells.push(key.clone().unwrap_or_default());
                } else if header == VALUES_COLUMN && !matches!(row, Value::Object(_)) {
                    cells.push(format_value(row));
                } else {
                    cells.push(Self::object_cell(row, header)?);
                }
            }
            out_rows.push(cells);
        }

        self.sink.table(TableEvent {
            headers,
            rows: out_rows,
            ts: Utc::now(),
        });
        Ok(())
    }

    fn object_cell(row: &Value, key: &str) -> Result<String, ScriptFault> {
        if let Value::Object(cell) = row {
            let entries = cell
                .lock()
                .map_err(|_| ScriptFault::type_error("table row is unreadable"))?;
            for (k, v) in entries.iter() {
                if k == key {
                    return Ok(format_value(v));
                }
            }
        }
        Ok(String::new())
    }
}
