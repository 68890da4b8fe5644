use tracing::{error, info};

use crate::{
    message::InstructionKind,
    session::{CloseReason, SessionError},
};

/// A trait used by the [`Session`] to emit human readable status
/// notifications.
///
/// Notifications are emitted synchronously from the session loop and do not
/// influence it: implementations should return quickly.
///
/// [`Session`]: crate::Session
#[cfg_attr(test, mockall::automock)]
pub trait Notify {
    /// Emit a notification when an instruction is about to be handled
    fn notify_handling(&mut self, _kind: InstructionKind) {}
    /// Emit a notification when the loss of a training epoch is known.
    /// Epochs are numbered from 1.
    fn notify_epoch_loss(&mut self, _epoch: usize, _loss: f32) {}
    /// Emit a notification when local training finished. `average_loss` is
    /// `None` if no epoch reported a loss.
    fn notify_fit_done(&mut self, _average_loss: Option<f32>, _num_examples: usize) {}
    /// Emit a notification when local evaluation finished
    fn notify_evaluate_done(&mut self, _loss: f32, _accuracy: f32, _num_examples: usize) {}
    /// Emit a notification when the session closed without error
    fn notify_closed(&mut self, _reason: &CloseReason) {}
    /// Emit a notification when the session hit a fatal error. This is
    /// emitted before the stream is torn down.
    fn notify_error(&mut self, _error: &SessionError) {}
}

/// A notifier that turns every notification into a log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notify for LogNotifier {
    fn notify_handling(&mut self, kind: InstructionKind) {
        info!("Handling {} request from the server.", kind);
    }

    fn notify_epoch_loss(&mut self, epoch: usize, loss: f32) {
        info!("Epoch {}: loss = {}", epoch, loss);
    }

    fn notify_fit_done(&mut self, average_loss: Option<f32>, num_examples: usize) {
        match average_loss {
            Some(loss) => info!("Average loss: {} ({} samples).", loss, num_examples),
            None => info!("Training finished without any epoch ({} samples).", num_examples),
        }
    }

    fn notify_evaluate_done(&mut self, loss: f32, accuracy: f32, num_examples: usize) {
        info!(
            "Test Accuracy after this round = {} (loss = {}, {} samples).",
            accuracy, loss, num_examples
        );
    }

    fn notify_closed(&mut self, reason: &CloseReason) {
        info!("Session closed: {}.", reason);
    }

    fn notify_error(&mut self, error: &SessionError) {
        error!("Session failed: {}.", error);
    }
}
