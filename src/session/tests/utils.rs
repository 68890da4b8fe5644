use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{channel::mpsc, stream, Sink, StreamExt};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    message::{
        ClientMessage,
        Config,
        EvaluateIns,
        FitIns,
        GetParametersIns,
        InstructionKind,
        ParameterSnapshot,
        Parameters,
        ReconnectIns,
        Scalar,
        ServerMessage,
        Tensor,
        TENSOR_TYPE_ND,
    },
    model::{Evaluation, ModelAdapter},
    notify::Notify,
    session::{CloseReason, Session, SessionError},
    transport::{Inbound, Outbound, TransportError},
};

/// Number of layers of the [`FakeModel`].
pub const LAYERS: usize = 3;

/// Number of training samples the [`FakeModel`] reports.
pub const TRAIN_EXAMPLES: usize = 128;

/// Number of test samples the [`FakeModel`] reports.
pub const TEST_EXAMPLES: usize = 32;

/// Build a snapshot of `count` tensors, each holding `tag` followed by its
/// position.
pub fn snapshot(tag: &str, count: usize) -> ParameterSnapshot {
    ParameterSnapshot::new(
        (0..count)
            .map(|i| Tensor::new(Bytes::from(format!("{}-{}", tag, i))))
            .collect(),
    )
}

pub fn parameters(tag: &str, count: usize) -> Parameters {
    snapshot(tag, count).encode()
}

pub fn get_parameters() -> ServerMessage {
    GetParametersIns.into()
}

pub fn fit(tag: &str, count: usize, epochs: Option<i64>) -> ServerMessage {
    let mut config = Config::new();
    if let Some(epochs) = epochs {
        config.insert("local_epochs".to_string(), Scalar::Sint64(epochs));
    }
    FitIns {
        parameters: parameters(tag, count),
        config,
    }
    .into()
}

pub fn evaluate(tag: &str, count: usize) -> ServerMessage {
    EvaluateIns {
        parameters: parameters(tag, count),
        config: Config::new(),
    }
    .into()
}

pub fn reconnect(seconds: Option<u64>) -> ServerMessage {
    ReconnectIns { seconds }.into()
}

/// An inbound stream that yields the given messages, then ends.
pub fn scripted(messages: Vec<ServerMessage>) -> Inbound {
    stream::iter(messages.into_iter().map(Ok)).boxed()
}

/// An inbound stream that yields the given messages, then stays open
/// without yielding anything else.
pub fn scripted_then_pending(messages: Vec<ServerMessage>) -> Inbound {
    stream::iter(messages.into_iter().map(Ok))
        .chain(stream::pending())
        .boxed()
}

/// An inbound stream fed by the test through the returned sender.
pub fn channel() -> (
    mpsc::UnboundedSender<Result<ServerMessage, TransportError>>,
    Inbound,
) {
    let (tx, rx) = mpsc::unbounded();
    (tx, rx.boxed())
}

/// What the [`RecordingSink`] observed.
#[derive(Clone, Default)]
pub struct Wire {
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    closes: Arc<AtomicUsize>,
}

impl Wire {
    pub fn sink(&self) -> Outbound {
        Box::pin(RecordingSink {
            wire: self.clone(),
            fail_sends: false,
        })
    }

    /// A sink that rejects every message.
    pub fn failing_sink(&self) -> Outbound {
        Box::pin(RecordingSink {
            wire: self.clone(),
            fail_sends: true,
        })
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_kinds(&self) -> Vec<InstructionKind> {
        self.sent().iter().map(ClientMessage::kind).collect()
    }

    /// Number of times the sink was closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct RecordingSink {
    wire: Wire,
    fail_sends: bool,
}

impl Sink<ClientMessage> for RecordingSink {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: ClientMessage) -> Result<(), Self::Error> {
        if self.fail_sends {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset",
            )));
        }
        self.wire.sent.lock().unwrap().push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.wire.closes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Error)]
#[error("simulated model failure")]
pub struct FakeModelError;

/// Calls received by a [`FakeModel`].
#[derive(Debug, Default)]
pub struct ModelCalls {
    pub set_parameters: Vec<ParameterSnapshot>,
    pub fit_epochs: Vec<i64>,
    pub evaluations: usize,
}

/// A model with [`LAYERS`] layers that keeps whatever parameters it is given.
///
/// Training reports a loss of `1 / epoch` for each epoch.
pub struct FakeModel {
    parameters: ParameterSnapshot,
    calls: Arc<Mutex<ModelCalls>>,
    fail_on: Option<InstructionKind>,
    fit_gate: Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>,
}

impl FakeModel {
    pub fn new() -> (Self, Arc<Mutex<ModelCalls>>) {
        let calls = Arc::new(Mutex::new(ModelCalls::default()));
        let model = Self {
            parameters: snapshot("initial", LAYERS),
            calls: calls.clone(),
            fail_on: None,
            fit_gate: None,
        };
        (model, calls)
    }

    /// Make every model call issued for `kind` fail.
    pub fn failing_on(mut self, kind: InstructionKind) -> Self {
        self.fail_on = Some(kind);
        self
    }

    /// Block the next training until the returned sender fires. The returned
    /// receiver resolves once training started.
    pub fn gated(mut self) -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.fit_gate = Some((started_tx, release_rx));
        (self, started_rx, release_tx)
    }

    fn check(&self, kind: InstructionKind) -> Result<(), FakeModelError> {
        if self.fail_on == Some(kind) {
            Err(FakeModelError)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ModelAdapter for FakeModel {
    type Error = FakeModelError;

    fn layer_count(&self) -> usize {
        LAYERS
    }

    async fn current_parameters(&self) -> Result<ParameterSnapshot, Self::Error> {
        self.check(InstructionKind::GetParameters)?;
        Ok(self.parameters.clone())
    }

    async fn set_parameters(&mut self, parameters: ParameterSnapshot) -> Result<(), Self::Error> {
        self.calls
            .lock()
            .unwrap()
            .set_parameters
            .push(parameters.clone());
        self.parameters = parameters;
        Ok(())
    }

    async fn fit(
        &mut self,
        epochs: i64,
        on_epoch_loss: &mut (dyn FnMut(f32) + Send),
    ) -> Result<usize, Self::Error> {
        self.calls.lock().unwrap().fit_epochs.push(epochs);
        if let Some((started, release)) = self.fit_gate.take() {
            let _ = started.send(());
            let _ = release.await;
        }
        self.check(InstructionKind::Fit)?;
        for epoch in 1..=epochs.max(0) {
            on_epoch_loss(1.0 / epoch as f32);
        }
        Ok(TRAIN_EXAMPLES)
    }

    async fn evaluate(&mut self) -> Result<Evaluation, Self::Error> {
        self.calls.lock().unwrap().evaluations += 1;
        self.check(InstructionKind::Evaluate)?;
        Ok(Evaluation {
            loss: 0.5,
            accuracy: 0.875,
            num_examples: TEST_EXAMPLES,
        })
    }
}

/// A notification, as seen by the [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Handling(InstructionKind),
    EpochLoss(usize, f32),
    FitDone(Option<f32>, usize),
    EvaluateDone(f32, f32, usize),
    Closed(CloseReason),
    Error(String),
}

/// A notifier that records every notification in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Notify for RecordingNotifier {
    fn notify_handling(&mut self, kind: InstructionKind) {
        self.push(Event::Handling(kind));
    }

    fn notify_epoch_loss(&mut self, epoch: usize, loss: f32) {
        self.push(Event::EpochLoss(epoch, loss));
    }

    fn notify_fit_done(&mut self, average_loss: Option<f32>, num_examples: usize) {
        self.push(Event::FitDone(average_loss, num_examples));
    }

    fn notify_evaluate_done(&mut self, loss: f32, accuracy: f32, num_examples: usize) {
        self.push(Event::EvaluateDone(loss, accuracy, num_examples));
    }

    fn notify_closed(&mut self, reason: &CloseReason) {
        self.push(Event::Closed(*reason));
    }

    fn notify_error(&mut self, error: &SessionError) {
        self.push(Event::Error(error.to_string()));
    }
}

/// Everything a test needs to drive a session and inspect its effects.
pub struct Harness {
    pub session: Session<FakeModel, RecordingNotifier>,
    pub wire: Wire,
    pub calls: Arc<Mutex<ModelCalls>>,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub fn new(inbound: Inbound) -> Self {
        let (model, calls) = FakeModel::new();
        Self::with_model(inbound, model, calls)
    }

    pub fn with_model(inbound: Inbound, model: FakeModel, calls: Arc<Mutex<ModelCalls>>) -> Self {
        let wire = Wire::default();
        let notifier = RecordingNotifier::default();
        let session = Session::new(inbound, wire.sink(), model, notifier.clone());
        Self {
            session,
            wire,
            calls,
            notifier,
        }
    }
}

/// Check that `message` is a reply with the expected tensors.
pub fn assert_tensors(parameters: &Parameters, tag: &str, count: usize) {
    assert_eq!(parameters.tensor_type, TENSOR_TYPE_ND);
    assert_eq!(parameters, &self::parameters(tag, count));
}
