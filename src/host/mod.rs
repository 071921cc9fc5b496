//! Host orchestrator.
//!
//! Owns the channel to the current sandbox instance, correlates terminal
//! events to submissions through an explicit pending map, and manages
//! instance lifecycle. Single logical thread, never blocks on a response:
//! `submit` returns immediately and completion is observed through [`ConsoleHost::recv`].

pub mod command;
pub mod history;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConsoleError, Result};
use crate::protocol::{ContextMessage, DiagnosticMethod, HostMessage, SubmissionId};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::context::SandboxInstance;

use history::History;

/// A correlated event, ready for display.
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    Diagnostic {
        method: DiagnosticMethod,
        text: String,
        ts: DateTime<Utc>,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        ts: DateTime<Utc>,
    },
    /// Successful completion. `elapsed` is present when the id matched a
    /// pending submission.
    Result {
        id: SubmissionId,
        value: String,
        elapsed: Option<Duration>,
        ts: DateTime<Utc>,
    },
    /// Failure. `id` and `elapsed` are absent for untargeted faults and for
    /// terminal events that arrive after their pending entry is gone.
    Fault {
        id: Option<SubmissionId>,
        value: String,
        elapsed: Option<Duration>,
        ts: DateTime<Utc>,
    },
    Status {
        text: String,
    },
}

/// The console host: one current instance, one pending map, one history.
pub struct ConsoleHost {
    config: SandboxConfig,
    instance: Option<SandboxInstance>,
    /// At most one entry per submission id; removed on terminal dispatch,
    /// cleared wholesale on reset.
    pending: HashMap<SubmissionId, Instant>,
    history: History,
}

impl ConsoleHost {
    /// Start a host with a fresh instance, returning once it signals ready.
    pub async fn start(config: SandboxConfig) -> Result<Self> {
        let mut instance = SandboxInstance::spawn(&config);
        Self::await_ready(&mut instance).await?;
        info!("execution context ready");
        let history = History::new(config.history_capacity);
        Ok(Self {
            config,
            instance: Some(instance),
            pending: HashMap::new(),
            history,
        })
    }

    async fn await_ready(instance: &mut SandboxInstance) -> Result<()> {
        match instance.rx.recv().await {
            Some(ContextMessage::Ready) => Ok(()),
            Some(other) => Err(ConsoleError::Startup(format!(
                "expected ready signal, got {:?}",
                other
            ))),
            None => Err(ConsoleError::ChannelClosed),
        }
    }

    /// Submit code for evaluation. Non-blocking: returns the correlation id
    /// immediately; the terminal event arrives later through [`recv`](Self::recv).
    pub fn submit(&mut self, code: &str) -> Result<SubmissionId> {
        let instance = self.instance.as_ref().ok_or(ConsoleError::ChannelClosed)?;
        let id = Uuid::new_v4();
        self.pending.insert(id, Instant::now());
        self.history.push(code);
        instance
            .tx
            .send(HostMessage::SubmitEval {
                id,
                code: code.to_string(),
            })
            .map_err(|_| ConsoleError::ChannelClosed)?;
        debug!(%id, "submitted");
        Ok(id)
    }

    /// Ask the current instance to load a module.
    pub fn load_module(&mut self, spec: &str) -> Result<()> {
        let instance = self.instance.as_ref().ok_or(ConsoleError::ChannelClosed)?;
        instance
            .tx
            .send(HostMessage::LoadModule {
                spec: spec.to_string(),
            })
            .map_err(|_| ConsoleError::ChannelClosed)
    }

    /// Receive the next event from the current instance.
    ///
    /// Terminal events are correlated against the pending map; unmatched
    /// ones are still surfaced, just without timing, as expected after a
    /// reset and for untargeted faults. Returns `None` once the instance is dead
    /// and its channel fault has been reported; only `reset` revives the host.
    pub async fn recv(&mut self) -> Option<ConsoleEvent> {
        let message = {
            let instance = self.instance.as_mut()?;
            instance.rx.recv().await
        };
        match message {
            Some(message) => Some(self.correlate(message)),
            None => {
                // The context task died without us destroying it.
                warn!("execution context terminated abnormally");
                self.instance = None;
                self.pending.clear();
                Some(ConsoleEvent::Fault {
                    id: None,
                    value: "ChannelFault: execution context terminated abnormally; \
                            use .reset to recover"
                        .to_string(),
                    elapsed: None,
                    ts: Utc::now(),
                })
            }
        }
    }

    fn correlate(&mut self, message: ContextMessage) -> ConsoleEvent {
        match message {
            ContextMessage::Ready => ConsoleEvent::Status {
                text: "ready".to_string(),
            },
            ContextMessage::Diagnostic(event) => ConsoleEvent::Diagnostic {
                method: event.method,
                text: event.formatted_args,
                ts: event.ts,
            },
            ContextMessage::Table(event) => ConsoleEvent::Table {
                headers: event.headers,
                rows: event.rows,
                ts: event.ts,
            },
            ContextMessage::Result {
                id,
                formatted_value,
                ts,
            } => {
                let elapsed = self.pending.remove(&id).map(|started| started.elapsed());
                ConsoleEvent::Result {
                    id,
                    value: formatted_value,
                    elapsed,
                    ts,
                }
            }
            ContextMessage::Fault {
                id,
                formatted_value,
                ts,
            } => {
                let elapsed = id.and_then(|id| {
                    self.pending.remove(&id).map(|started| started.elapsed())
                });
                ConsoleEvent::Fault {
                    id,
                    value: formatted_value,
                    elapsed,
                    ts,
                }
            }
            ContextMessage::Status { text } => ConsoleEvent::Status { text },
        }
    }

    /// Destroy the current instance unconditionally and bring up a fresh
    /// one, returning once it signals ready.
    ///
    /// No drain, no cancellation acknowledgment: in-flight submissions are
    /// abandoned, their pending entries dropped, and any terminal event the
    /// old instance would still emit has no channel left to arrive on.
    pub async fn reset(&mut self) -> Result<()> {
        if let Some(old) = self.instance.take() {
            old.destroy();
        }
        let abandoned = self.pending.len();
        self.pending.clear();
        if abandoned > 0 {
            debug!(abandoned, "abandoned pending submissions on reset");
        }

        let mut instance = SandboxInstance::spawn(&self.config);
        Self::await_ready(&mut instance).await?;
        self.instance = Some(instance);
        info!("execution context reset");
        Ok(())
    }

    /// Number of submissions awaiting a terminal event.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::loader::StaticFetcher;
    use std::sync::Arc;

    async fn test_host() -> ConsoleHost {
        let config = SandboxConfig::builder()
            .fetcher(Arc::new(StaticFetcher::new()))
            .build();
        ConsoleHost::start(config).await.unwrap()
    }

    async fn next(host: &mut ConsoleHost) -> ConsoleEvent {
        tokio::time::timeout(std::time::Duration::from_secs(2), host.recv())
            .await
            .expect("timed out waiting for console event")
            .expect("host has no live instance")
    }

    #[tokio::test]
    async fn test_submit_correlates_elapsed() {
        let mut host = test_host().await;
        let id = host.submit("2 ** 10").unwrap();
        assert_eq!(host.pending_count(), 1);

        match next(&mut host).await {
            ConsoleEvent::Result {
                id: got,
                value,
                elapsed,
                ..
            } => {
                assert_eq!(got, id);
                assert_eq!(value, "1024");
                assert!(elapsed.is_some());
            }
            other => panic!("expected result, got {:?}", other),
        }
        assert_eq!(host.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_untargeted_fault_has_no_timing() {
        let mut host = test_host().await;
        host.submit("failLater(5, \"later\"); 1").unwrap();

        match next(&mut host).await {
            ConsoleEvent::Result { .. } => {}
            other => panic!("expected result, got {:?}", other),
        }
        match next(&mut host).await {
            ConsoleEvent::Fault {
                id: None,
                elapsed: None,
                value,
                ..
            } => assert!(value.contains("later")),
            other => panic!("expected untargeted fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reset_abandons_pending_and_comes_back_ready() {
        let mut host = test_host().await;
        // Leave a submission in flight, suspended on a long sleep.
        host.submit("await sleep(60000)").unwrap();
        assert_eq!(host.pending_count(), 1);

        host.reset().await.unwrap();
        assert_eq!(host.pending_count(), 0);

        // The fresh instance has a fresh namespace and answers promptly.
        let id = host.submit("40 + 2").unwrap();
        match next(&mut host).await {
            ConsoleEvent::Result { id: got, value, .. } => {
                assert_eq!(got, id);
                assert_eq!(value, "42");
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reset_clears_namespace() {
        let mut host = test_host().await;
        host.submit("let keep = 7").unwrap();
        let _ = next(&mut host).await;

        host.reset().await.unwrap();
        host.submit("keep").unwrap();
        match next(&mut host).await {
            ConsoleEvent::Fault { value, .. } => {
                assert!(value.starts_with("ReferenceError"))
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_history_records_submissions() {
        let mut host = test_host().await;
        host.submit("1").unwrap();
        host.submit("2").unwrap();
        let entries: Vec<&str> = host.history().entries().collect();
        assert_eq!(entries, vec!["1", "2"]);
    }
}
