//! Best-effort reporting of what happened during `Fit` and `Evaluate`
//! instructions.
//!
//! Reports are handed to a [`Recorder`] once the reply has been sent. The
//! recorder dispatches each of them on a detached task: the session never
//! waits for a sink and a failing sink never affects the session.

mod sinks;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub use self::sinks::{ChannelSink, LogSink};
use crate::{message::InstructionKind, session::SessionId};

/// What happened during one `Fit` or `Evaluate` instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReport {
    pub session_id: SessionId,
    pub kind: InstructionKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Average epoch loss for `Fit`, evaluation loss for `Evaluate`
    pub loss: Option<f32>,
    /// Only set for `Evaluate`
    pub accuracy: Option<f32>,
    pub num_examples: usize,
}

/// A destination for telemetry reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySink: Send + Sync + 'static {
    async fn record(&self, report: TelemetryReport) -> anyhow::Result<()>;
}

/// Dispatches telemetry reports to a [`TelemetrySink`] without blocking the
/// caller.
#[derive(Clone, Default)]
pub struct Recorder {
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

impl Recorder {
    pub fn new(sink: impl TelemetrySink) -> Self {
        Self {
            sink: Some(Arc::new(sink)),
        }
    }

    /// A recorder that drops every report.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Dispatch a report on a detached task. Must be called from within a
    /// tokio runtime.
    pub fn record(&self, report: TelemetryReport) {
        let sink = match &self.sink {
            Some(sink) => sink.clone(),
            None => return,
        };
        debug!(kind = %report.kind, "dispatching telemetry report");
        tokio::spawn(async move {
            if let Err(err) = sink.record(report).await {
                warn!("telemetry sink error: {}", err);
            }
        });
    }
}
