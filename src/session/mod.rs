//! The session state machine.
//!
//! A [`Session`] drives one exchange with the server over a duplex stream:
//!
//! 1. wait for the next [`ServerMessage`]
//! 2. decode it into an [`Instruction`]
//! 3. run the matching local operation against the [`ModelAdapter`]
//! 4. send exactly one [`ClientMessage`] in reply
//! 5. continue with the next instruction, unless the server asked the
//!    client to disconnect
//!
//! Instructions are handled one at a time, in arrival order. The server is
//! expected to wait for a reply before sending its next instruction.
//!
//! The session is closed exactly once, whatever ends it:
//!
//! - a `Reconnect` instruction: the client acknowledges it, then closes the
//!   stream
//! - the server ending its stream: the client closes without sending
//!   anything else
//! - a call to [`SessionHandle::close`]: the client stops at the next
//!   instruction boundary
//! - a fatal [`SessionError`]: nothing is replied, the error is notified and
//!   the stream is closed
//!
//! [`ServerMessage`]: crate::message::ServerMessage

mod error;
mod handlers;
mod stream;
#[cfg(test)]
mod tests;

use derive_more::Display;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use self::error::SessionError;
use self::stream::StreamGuard;
use crate::{
    message::{ClientMessage, Instruction},
    model::ModelAdapter,
    notify::Notify,
    telemetry::{Recorder, TelemetryReport},
    transport::{Inbound, Outbound},
};

#[derive(Eq, PartialEq, Hash, Debug, Copy, Clone, Display)]
/// A unique random session identifier
pub struct SessionId(Uuid);

impl SessionId {
    /// Return a new random session identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a session stream.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Why a session ended without error.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The server sent a `Reconnect` instruction. `seconds` is the delay
    /// after which the server expects the client back, if any.
    #[display(fmt = "server requested a disconnect")]
    Reconnect { seconds: Option<u64> },
    /// The server ended its stream.
    #[display(fmt = "server ended the stream")]
    EndOfStream,
    /// The session was closed through a [`SessionHandle`].
    #[display(fmt = "closed by the client")]
    Local,
}

/// A handle to close a running session from the outside.
#[derive(Clone)]
pub struct SessionHandle {
    guard: StreamGuard,
}

impl SessionHandle {
    /// Close the session stream. The session loop stops before handling
    /// another instruction; an instruction that is being handled runs to
    /// completion but its reply is dropped.
    ///
    /// Returns `true` if this call closed the stream, `false` if it was
    /// already closed.
    pub async fn close(&self) -> bool {
        self.guard.close().await
    }

    pub fn state(&self) -> SessionState {
        self.guard.state()
    }
}

/// What to do after a reply was sent.
#[derive(Debug)]
enum Next {
    Continue,
    Close(CloseReason),
}

/// Result of handling one instruction.
#[derive(Debug)]
struct Handled {
    reply: ClientMessage,
    report: Option<TelemetryReport>,
    next: Next,
}

impl Handled {
    fn reply(reply: ClientMessage) -> Self {
        Self {
            reply,
            report: None,
            next: Next::Continue,
        }
    }

    fn close(reply: ClientMessage, reason: CloseReason) -> Self {
        Self {
            reply,
            report: None,
            next: Next::Close(reason),
        }
    }

    fn with_report(mut self, report: TelemetryReport) -> Self {
        self.report = Some(report);
        self
    }
}

/// A session with the server.
pub struct Session<M, N> {
    id: SessionId,
    inbound: Inbound,
    guard: StreamGuard,
    state: watch::Receiver<SessionState>,
    model: M,
    notifier: N,
    recorder: Recorder,
}

impl<M, N> Session<M, N>
where
    M: ModelAdapter,
    N: Notify + Send,
{
    /// Create a session over the given stream halves.
    ///
    /// # Args
    ///
    /// - `inbound`: messages from the server
    /// - `outbound`: replies to the server
    /// - `model`: the local model the instructions are run against
    /// - `notifier`: receives status notifications
    pub fn new(inbound: Inbound, outbound: Outbound, model: M, notifier: N) -> Self {
        let guard = StreamGuard::new(outbound);
        let state = guard.subscribe();
        Self {
            id: SessionId::new(),
            inbound,
            guard,
            state,
            model,
            notifier,
            recorder: Recorder::disabled(),
        }
    }

    /// Dispatch a telemetry report to `recorder` after each `Fit` and
    /// `Evaluate` reply.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            guard: self.guard.clone(),
        }
    }

    /// Run the session until it is closed.
    ///
    /// # Errors
    /// Returns the fatal error that ended the session. The stream is
    /// already closed when this returns, whatever the outcome.
    pub async fn run(mut self) -> Result<CloseReason, SessionError> {
        let span = info_span!("session", session_id = %self.id);
        async move {
            info!("session started");
            let outcome = self.message_loop().await;
            match &outcome {
                Ok(reason) => {
                    info!("session ended: {}", reason);
                    self.notifier.notify_closed(reason);
                }
                Err(err) => {
                    error!("session failed: {}", err);
                    self.notifier.notify_error(err);
                }
            }
            self.guard.close().await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn message_loop(&mut self) -> Result<CloseReason, SessionError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = closed(&mut self.state) => return Ok(CloseReason::Local),
                next = self.inbound.next() => next,
            };
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(CloseReason::EndOfStream),
            };

            let instruction = Instruction::try_from(message)?;
            let kind = instruction.kind();
            debug!(%kind, "received instruction");
            self.notifier.notify_handling(kind);

            let Handled {
                reply,
                report,
                next,
            } = self.dispatch(instruction).await?;

            match self.guard.send(reply).await {
                Ok(()) => debug!(%kind, "reply sent"),
                Err(SessionError::Closed) => {
                    warn!(%kind, "session closed while handling the instruction, dropping the reply");
                    return Ok(CloseReason::Local);
                }
                Err(err) => return Err(err),
            }

            if let Some(report) = report {
                self.recorder.record(report);
            }

            if let Next::Close(reason) = next {
                return Ok(reason);
            }
        }
    }

    async fn dispatch(&mut self, instruction: Instruction) -> Result<Handled, SessionError> {
        match instruction {
            Instruction::GetParameters => self.handle_get_parameters().await,
            Instruction::Fit { parameters, config } => self.handle_fit(parameters, &config).await,
            Instruction::Evaluate { parameters, .. } => self.handle_evaluate(parameters).await,
            Instruction::Reconnect { seconds } => {
                info!(?seconds, "server requested a disconnect");
                Ok(Handled::close(
                    ClientMessage::disconnect_res(),
                    CloseReason::Reconnect { seconds },
                ))
            }
        }
    }
}

/// Resolve once the session state is `Closed`.
async fn closed(state: &mut watch::Receiver<SessionState>) {
    // the sender lives as long as the session, an error cannot happen here
    let _ = state
        .wait_for(|state| *state == SessionState::Closed)
        .await;
}
