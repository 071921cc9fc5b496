//! The sandboxed execution context.
//!
//! One instance owns one interpreter and runs as a spawned task, processing
//! host messages strictly in arrival order. All output leaves through the
//! event channel; the host holds no reference to the interpreter or its
//! values. Exactly one terminal event is emitted per submission.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::format::format_value;
use crate::interp::eval::{settle, Interpreter};
use crate::interp::parser::{parse_expression, parse_program};
use crate::interp::value::{ScriptFault, Value};
use crate::protocol::{ContextMessage, DiagnosticEvent, HostMessage, SubmissionId, TableEvent};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::console::{ConsoleEncoder, EventSink};
use crate::sandbox::loader::{resolve_with_base, ModuleFetcher};

/// Lifecycle state of one instance. `Terminated` is reached only by external
/// destruction, never by an internal fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Initializing,
    Ready,
    Busy,
    Terminated,
}

/// Sink that forwards encoded events onto the context channel.
struct ChannelSink {
    events: mpsc::UnboundedSender<ContextMessage>,
}

impl EventSink for ChannelSink {
    fn diagnostic(&self, event: DiagnosticEvent) {
        let _ = self.events.send(ContextMessage::Diagnostic(event));
    }

    fn table(&self, event: TableEvent) {
        let _ = self.events.send(ContextMessage::Table(event));
    }
}

/// Host-side handle to a live execution context.
///
/// Dropping the handle (or calling [`SandboxInstance::destroy`]) severs the
/// channel: any terminal event the old task would still produce has nowhere
/// to arrive.
pub struct SandboxInstance {
    /// Outbound: submissions and load requests.
    pub tx: mpsc::UnboundedSender<HostMessage>,
    /// Inbound: ready/diagnostic/table/terminal events.
    pub rx: mpsc::UnboundedReceiver<ContextMessage>,
    /// Cooperative interruption flag polled by the evaluator.
    interrupt: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl SandboxInstance {
    /// Create and start a fresh instance. The first event on `rx` is
    /// `Ready`, sent once initialization completes.
    pub fn spawn(config: &SandboxConfig) -> Self {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let interrupt = Arc::new(AtomicBool::new(false));

        let sink = Arc::new(ChannelSink {
            events: event_tx.clone(),
        });
        let console = ConsoleEncoder::new(sink);
        let interp = Interpreter::new(
            console.clone(),
            event_tx.clone(),
            Arc::clone(&interrupt),
            config.max_steps,
        );
        let context = SandboxContext {
            interp,
            console,
            events: event_tx,
            cdn_base: config.cdn_base.clone(),
            fetcher: Arc::clone(&config.fetcher),
            state: InstanceState::Initializing,
        };
        let task = tokio::spawn(context.run(host_rx));

        Self {
            tx: host_tx,
            rx: event_rx,
            interrupt,
            task,
        }
    }

    /// Destroy the instance unconditionally: raise the interrupt flag so a
    /// busy evaluation bails at its next step, then abort the task. There is
    /// no drain and no cancellation acknowledgment.
    pub fn destroy(self) {
        self.interrupt
            .store(true, std::sync::atomic::Ordering::Relaxed);
        self.task.abort();
    }

    /// Whether the context task has stopped (normally or abnormally).
    pub fn is_dead(&self) -> bool {
        self.task.is_finished()
    }
}

struct SandboxContext {
    interp: Interpreter,
    console: ConsoleEncoder,
    events: mpsc::UnboundedSender<ContextMessage>,
    cdn_base: String,
    fetcher: Arc<dyn ModuleFetcher>,
    state: InstanceState,
}

impl SandboxContext {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HostMessage>) {
        self.state = InstanceState::Ready;
        let _ = self.events.send(ContextMessage::Ready);

        // Inbound messages queue while a submission is busy; the channel is
        // the natural one-at-a-time queue the protocol relies on.
        while let Some(message) = rx.recv().await {
            match message {
                HostMessage::SubmitEval { id, code } => {
                    self.handle_submission(id, &code).await;
                }
                HostMessage::LoadModule { spec } => {
                    self.handle_load(&spec).await;
                }
            }
        }
        self.state = InstanceState::Terminated;
        debug!(state = ?self.state, "context loop exited");
    }

    async fn handle_submission(&mut self, id: SubmissionId, code: &str) {
        debug!(%id, "evaluating submission");
        self.state = InstanceState::Busy;
        self.interp.begin_submission();

        let outcome = self.evaluate(code).await;
        let message = match outcome {
            Ok(value) => ContextMessage::Result {
                id,
                formatted_value: format_value(&value),
                ts: Utc::now(),
            },
            Err(fault) => ContextMessage::Fault {
                id: Some(id),
                formatted_value: format_value(&Value::Fault(fault)),
                ts: Utc::now(),
            },
        };
        // After a reset the channel is gone and the terminal event simply
        // has nowhere to arrive.
        let _ = self.events.send(message);
        self.state = InstanceState::Ready;
    }

    /// Expression-first evaluation policy.
    ///
    /// The text is evaluated as a standalone expression when it parses as
    /// one; otherwise, and only for that syntactic reason, it runs as a
    /// block. A runtime fault on the expression path is the real fault and
    /// never triggers a block retry.
    async fn evaluate(&mut self, code: &str) -> Result<Value, ScriptFault> {
        match parse_expression(code) {
            Ok((expr, awaited)) => {
                let value = self.interp.eval_expr(&expr)?;
                if awaited {
                    settle(value).await
                } else {
                    Ok(value)
                }
            }
            Err(_) => match parse_program(code) {
                Ok(stmts) => self.interp.run_program(&stmts).await,
                Err(err) => Err(ScriptFault::syntax(err.message.clone())
                    .with_trace(format!("at line {}", err.line))),
            },
        }
    }

    /// Resolve, fetch and execute a module into the instance namespace.
    /// Subsequent messages are not handled until this completes. Failure is
    /// never fatal to the instance.
    async fn handle_load(&mut self, spec: &str) {
        let url = resolve_with_base(spec, &self.cdn_base);
        debug!(spec, url, "loading module");
        let _ = self.events.send(ContextMessage::Status {
            text: format!("Loading {} …", url),
        });

        let outcome = match self.fetcher.fetch(&url).await {
            Err(err) => Err(ScriptFault::new("LoadError", format!("{:#}", err))),
            Ok(source) => match parse_program(&source) {
                Err(err) => Err(ScriptFault::new(
                    "LoadError",
                    format!("module did not parse: {}", err),
                )),
                Ok(stmts) => self
                    .interp
                    .run_program(&stmts)
                    .await
                    .map_err(|fault| ScriptFault::new("LoadError", fault.to_string())),
            },
        };

        match outcome {
            Ok(_) => self.console.info_text(format!("Loaded {}", url)),
            Err(fault) => {
                let _ = self.events.send(ContextMessage::Fault {
                    id: None,
                    formatted_value: format_value(&Value::Fault(fault)),
                    ts: Utc::now(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DiagnosticMethod;
    use crate::sandbox::loader::StaticFetcher;
    use uuid::Uuid;

    fn test_instance() -> SandboxInstance {
        SandboxInstance::spawn(&SandboxConfig::default())
    }

    async fn next(instance: &mut SandboxInstance) -> ContextMessage {
        tokio::time::timeout(std::time::Duration::from_secs(2), instance.rx.recv())
            .await
            .expect("timed out waiting for context event")
            .expect("context channel closed")
    }

    #[tokio::test]
    async fn test_ready_signaled_once_then_result() {
        let mut instance = test_instance();
        assert!(matches!(next(&mut instance).await, ContextMessage::Ready));

        let id = Uuid::new_v4();
        instance
            .tx
            .send(HostMessage::SubmitEval {
                id,
                code: "2 ** 10".into(),
            })
            .unwrap();

        match next(&mut instance).await {
            ContextMessage::Result {
                id: got,
                formatted_value,
                ..
            } => {
                assert_eq!(got, id);
                assert_eq!(formatted_value, "1024");
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_block_fallback_without_fault() {
        let mut instance = test_instance();
        let _ = next(&mut instance).await; // ready

        let id = Uuid::new_v4();
        instance
            .tx
            .send(HostMessage::SubmitEval {
                id,
                code: "let x = 1; x + 1".into(),
            })
            .unwrap();

        // The discarded expression attempt must not surface anything: the
        // next event is the result itself.
        match next(&mut instance).await {
            ContextMessage::Result {
                formatted_value, ..
            } => assert_eq!(formatted_value, "2"),
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expression_runtime_fault_is_reported_not_retried() {
        let mut instance = test_instance();
        let _ = next(&mut instance).await;

        let id = Uuid::new_v4();
        instance
            .tx
            .send(HostMessage::SubmitEval {
                id,
                code: "missing + 1".into(),
            })
            .unwrap();

        match next(&mut instance).await {
            ContextMessage::Fault {
                id: got,
                formatted_value,
                ..
            } => {
                assert_eq!(got, Some(id));
                assert!(formatted_value.starts_with("ReferenceError"));
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_syntax_fault_when_both_paths_reject() {
        let mut instance = test_instance();
        let _ = next(&mut instance).await;

        instance
            .tx
            .send(HostMessage::SubmitEval {
                id: Uuid::new_v4(),
                code: "2 **".into(),
            })
            .unwrap();

        match next(&mut instance).await {
            ContextMessage::Fault {
                formatted_value, ..
            } => assert!(formatted_value.starts_with("SyntaxError")),
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_diagnostics_precede_terminal_event() {
        let mut instance = test_instance();
        let _ = next(&mut instance).await;

        instance
            .tx
            .send(HostMessage::SubmitEval {
                id: Uuid::new_v4(),
                code: "console.log(\"first\"); console.log(\"second\"); 3".into(),
            })
            .unwrap();

        match next(&mut instance).await {
            ContextMessage::Diagnostic(event) => {
                assert_eq!(event.method, DiagnosticMethod::Log);
                assert_eq!(event.formatted_args, "\"first\"");
            }
            other => panic!("expected diagnostic, got {:?}", other),
        }
        match next(&mut instance).await {
            ContextMessage::Diagnostic(event) => {
                assert_eq!(event.formatted_args, "\"second\"")
            }
            other => panic!("expected diagnostic, got {:?}", other),
        }
        assert!(next(&mut instance).await.is_terminal());
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event_per_submission() {
        let mut instance = test_instance();
        let _ = next(&mut instance).await;

        for code in ["1 + 1", "throw Error(\"boom\")", "let a = 2; a"] {
            instance
                .tx
                .send(HostMessage::SubmitEval {
                    id: Uuid::new_v4(),
                    code: code.into(),
                })
                .unwrap();
        }

        let mut terminals = 0;
        for _ in 0..3 {
            let event = next(&mut instance).await;
            assert!(event.is_terminal());
            terminals += 1;
        }
        assert_eq!(terminals, 3);
    }

    #[tokio::test]
    async fn test_detached_fault_is_untargeted() {
        let mut instance = test_instance();
        let _ = next(&mut instance).await;

        let id = Uuid::new_v4();
        instance
            .tx
            .send(HostMessage::SubmitEval {
                id,
                code: "failLater(10, \"too late\"); \"done\"".into(),
            })
            .unwrap();

        // The submission completes first.
        match next(&mut instance).await {
            ContextMessage::Result {
                id: got,
                formatted_value,
                ..
            } => {
                assert_eq!(got, id);
                assert_eq!(formatted_value, "\"done\"");
            }
            other => panic!("expected result, got {:?}", other),
        }

        // Then the detached work rejects with no submission to blame.
        match next(&mut instance).await {
            ContextMessage::Fault {
                id: None,
                formatted_value,
                ..
            } => assert!(formatted_value.contains("too late")),
            other => panic!("expected untargeted fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_module_injects_namespace() {
        let fetcher = StaticFetcher::new().with_module(
            "https://mirror.local/npm/mini@latest",
            "let answer = 42",
        );
        let config = SandboxConfig::builder()
            .cdn_base("https://mirror.local/npm")
            .fetcher(Arc::new(fetcher))
            .build();
        let mut instance = SandboxInstance::spawn(&config);
        let _ = next(&mut instance).await;

        instance
            .tx
            .send(HostMessage::LoadModule {
                spec: "mini".into(),
            })
            .unwrap();

        assert!(matches!(
            next(&mut instance).await,
            ContextMessage::Status { .. }
        ));
        match next(&mut instance).await {
            ContextMessage::Diagnostic(event) => {
                assert_eq!(event.method, DiagnosticMethod::Info);
                assert!(event.formatted_args.starts_with("Loaded "));
            }
            other => panic!("expected info diagnostic, got {:?}", other),
        }

        // The loaded binding is visible to later submissions.
        instance
            .tx
            .send(HostMessage::SubmitEval {
                id: Uuid::new_v4(),
                code: "answer".into(),
            })
            .unwrap();
        match next(&mut instance).await {
            ContextMessage::Result {
                formatted_value, ..
            } => assert_eq!(formatted_value, "42"),
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_failure_is_untargeted_and_nonfatal() {
        let config = SandboxConfig::builder()
            .fetcher(Arc::new(StaticFetcher::new()))
            .build();
        let mut instance = SandboxInstance::spawn(&config);
        let _ = next(&mut instance).await;

        instance
            .tx
            .send(HostMessage::LoadModule {
                spec: "absent".into(),
            })
            .unwrap();
        let _ = next(&mut instance).await; // status
        match next(&mut instance).await {
            ContextMessage::Fault { id: None, .. } => {}
            other => panic!("expected untargeted fault, got {:?}", other),
        }

        // The instance stays usable.
        instance
            .tx
            .send(HostMessage::SubmitEval {
                id: Uuid::new_v4(),
                code: "1 + 1".into(),
            })
            .unwrap();
        match next(&mut instance).await {
            ContextMessage::Result {
                formatted_value, ..
            } => assert_eq!(formatted_value, "2"),
            other => panic!("expected result, got {:?}", other),
        }
    }
}
