use async_trait::async_trait;

use crate::message::ParameterSnapshot;

/// Outcome of a local evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    /// Reported to notifications and telemetry only, it is not part of the
    /// reply sent to the server.
    pub accuracy: f32,
    pub num_examples: usize,
}

/// A trait used by the [`Session`] to drive the local model.
///
/// The adapter owns the live model state and all knowledge about its layers.
/// The session only ever compares the number of tensors it receives with
/// [`ModelAdapter::layer_count`], never their shapes.
///
/// Calls are strictly sequential: the session never issues a call while
/// another one is in flight. `fit` and `evaluate` may take as long as local
/// computation requires, the server waits for the reply.
///
/// [`Session`]: crate::Session
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    type Error: ::std::error::Error + Send + Sync + 'static;

    /// Number of tensors a snapshot for this model must contain.
    fn layer_count(&self) -> usize;

    /// Take a snapshot of the current parameters, one tensor per layer in
    /// the model's layer order.
    async fn current_parameters(&self) -> Result<ParameterSnapshot, Self::Error>;

    /// Replace all trainable parameters with the given snapshot. The
    /// snapshot is guaranteed to contain [`ModelAdapter::layer_count`]
    /// tensors.
    async fn set_parameters(&mut self, parameters: ParameterSnapshot) -> Result<(), Self::Error>;

    /// Train for `epochs` epochs, calling `on_epoch_loss` with the loss of
    /// each epoch as soon as it is known. Returns the number of training
    /// samples used.
    ///
    /// `epochs` is forwarded exactly as received from the server and may be
    /// zero or negative.
    async fn fit(
        &mut self,
        epochs: i64,
        on_epoch_loss: &mut (dyn FnMut(f32) + Send),
    ) -> Result<usize, Self::Error>;

    /// Evaluate the current parameters on the local test data.
    async fn evaluate(&mut self) -> Result<Evaluation, Self::Error>;
}
