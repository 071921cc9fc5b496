//! Message protocol between the host orchestrator and the execution context.
//!
//! The two sides share no memory. Everything crosses as an owned message on
//! a tokio mpsc channel: reliable, ordered, lossless, non-duplicating.
//! Values are already formatted to text by the time they appear here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque correlation token for one submission.
pub type SubmissionId = Uuid;

/// The closed set of diagnostic methods a script can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticMethod {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl DiagnosticMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticMethod::Log => "log",
            DiagnosticMethod::Info => "info",
            DiagnosticMethod::Warn => "warn",
            DiagnosticMethod::Error => "error",
            DiagnosticMethod::Debug => "debug",
        }
    }
}

/// One diagnostic call, formatted at the moment of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub method: DiagnosticMethod,
    /// Space-joined formatter output of every argument, in call order.
    pub formatted_args: String,
    pub ts: DateTime<Utc>,
}

/// One tabular request, every cell already rendered through the formatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEvent {
    /// Column names, unique, in resolution order.
    pub headers: Vec<String>,
    /// Row-major cell text.
    pub rows: Vec<Vec<String>>,
    pub ts: DateTime<Utc>,
}

/// Messages the host sends to the execution context.
#[derive(Debug, Clone)]
pub enum HostMessage {
    /// Evaluate `code`; exactly one terminal event tagged `id` comes back.
    SubmitEval { id: SubmissionId, code: String },
    /// Resolve, fetch and inject a module into the instance namespace.
    LoadModule { spec: String },
}

/// Messages the execution context sends to the host.
#[derive(Debug, Clone)]
pub enum ContextMessage {
    /// Sent exactly once, when the instance finishes initializing.
    Ready,
    Diagnostic(DiagnosticEvent),
    Table(TableEvent),
    /// Terminal success for a submission.
    Result {
        id: SubmissionId,
        formatted_value: String,
        ts: DateTime<Utc>,
    },
    /// Terminal failure. `id` is absent for untargeted faults (detached
    /// asynchronous work, module load failures, channel-level faults).
    Fault {
        id: Option<SubmissionId>,
        formatted_value: String,
        ts: DateTime<Utc>,
    },
    /// Free-form progress text (module loading, lifecycle notes).
    Status { text: String },
}

impl ContextMessage {
    /// Whether this message terminates a submission.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContextMessage::Result { .. } | ContextMessage::Fault { .. }
        )
    }
}
