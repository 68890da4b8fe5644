use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use super::{TelemetryReport, TelemetrySink};

/// A sink that writes every report as a log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn record(&self, report: TelemetryReport) -> anyhow::Result<()> {
        let duration = report.finished_at - report.started_at;
        info!(
            session_id = %report.session_id,
            kind = %report.kind,
            started_at = %report.started_at.to_rfc3339(),
            duration_ms = duration.num_milliseconds(),
            loss = ?report.loss,
            accuracy = ?report.accuracy,
            num_examples = report.num_examples,
            "telemetry report"
        );
        Ok(())
    }
}

/// A sink that forwards every report on a channel, for callers that
/// aggregate reports themselves.
#[derive(Debug, Clone)]
pub struct ChannelSink(mpsc::UnboundedSender<TelemetryReport>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TelemetryReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

#[async_trait]
impl TelemetrySink for ChannelSink {
    async fn record(&self, report: TelemetryReport) -> anyhow::Result<()> {
        self.0
            .send(report)
            .map_err(|_| anyhow::anyhow!("telemetry channel closed"))
    }
}
