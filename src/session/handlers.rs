//! Handlers for the instructions that involve the local model.

use chrono::Utc;
use tracing::{debug, info};

use super::{Handled, Session, SessionError};
use crate::{
    message::{local_epochs, ClientMessage, Config, InstructionKind, ParameterSnapshot, ProtocolError},
    model::ModelAdapter,
    notify::Notify,
    telemetry::TelemetryReport,
};

impl<M, N> Session<M, N>
where
    M: ModelAdapter,
    N: Notify + Send,
{
    pub(super) async fn handle_get_parameters(&mut self) -> Result<Handled, SessionError> {
        let parameters = self
            .model
            .current_parameters()
            .await
            .map_err(SessionError::model(InstructionKind::GetParameters))?;
        debug!(tensors = parameters.len(), "replying with the current parameters");
        Ok(Handled::reply(ClientMessage::get_parameters_res(parameters)))
    }

    pub(super) async fn handle_fit(
        &mut self,
        parameters: ParameterSnapshot,
        config: &Config,
    ) -> Result<Handled, SessionError> {
        let started_at = Utc::now();
        self.load_parameters(InstructionKind::Fit, parameters).await?;

        let epochs = local_epochs(config);
        info!(epochs, "starting local training");

        let mut losses = Vec::new();
        let notifier = &mut self.notifier;
        let num_examples = self
            .model
            .fit(epochs, &mut |loss| {
                losses.push(loss);
                notifier.notify_epoch_loss(losses.len(), loss);
            })
            .await
            .map_err(SessionError::model(InstructionKind::Fit))?;

        let average_loss = average(&losses);
        self.notifier.notify_fit_done(average_loss, num_examples);

        let parameters = self
            .model
            .current_parameters()
            .await
            .map_err(SessionError::model(InstructionKind::Fit))?;

        let report = TelemetryReport {
            session_id: self.id,
            kind: InstructionKind::Fit,
            started_at,
            finished_at: Utc::now(),
            loss: average_loss,
            accuracy: None,
            num_examples,
        };
        Ok(Handled::reply(ClientMessage::fit_res(parameters, num_examples)).with_report(report))
    }

    pub(super) async fn handle_evaluate(
        &mut self,
        parameters: ParameterSnapshot,
    ) -> Result<Handled, SessionError> {
        let started_at = Utc::now();
        self.load_parameters(InstructionKind::Evaluate, parameters)
            .await?;

        let evaluation = self
            .model
            .evaluate()
            .await
            .map_err(SessionError::model(InstructionKind::Evaluate))?;
        self.notifier.notify_evaluate_done(
            evaluation.loss,
            evaluation.accuracy,
            evaluation.num_examples,
        );

        let report = TelemetryReport {
            session_id: self.id,
            kind: InstructionKind::Evaluate,
            started_at,
            finished_at: Utc::now(),
            loss: Some(evaluation.loss),
            accuracy: Some(evaluation.accuracy),
            num_examples: evaluation.num_examples,
        };
        Ok(Handled::reply(ClientMessage::evaluate_res(
            evaluation.loss,
            evaluation.num_examples,
        ))
        .with_report(report))
    }

    /// Install a received snapshot into the model, after checking it has one
    /// tensor per layer. The model is left untouched on a mismatch.
    async fn load_parameters(
        &mut self,
        kind: InstructionKind,
        parameters: ParameterSnapshot,
    ) -> Result<(), SessionError> {
        let expected = self.model.layer_count();
        if parameters.len() != expected {
            return Err(ProtocolError::TensorCountMismatch {
                expected,
                actual: parameters.len(),
            }
            .into());
        }
        self.model
            .set_parameters(parameters)
            .await
            .map_err(SessionError::model(kind))
    }
}

fn average(losses: &[f32]) -> Option<f32> {
    if losses.is_empty() {
        None
    } else {
        Some(losses.iter().sum::<f32>() / losses.len() as f32)
    }
}
