use std::sync::Arc;

use futures::SinkExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::{SessionError, SessionState};
use crate::{message::ClientMessage, transport::Outbound};

/// Owner of the outbound half of a session stream.
///
/// The sink and the session state live behind the same lock, so that
/// sending a reply and closing the stream are serialized: a reply is never
/// sent after the stream was closed, and however many triggers race to
/// close it, the sink is closed exactly once.
#[derive(Clone)]
pub(crate) struct StreamGuard {
    inner: Arc<Inner>,
}

struct Inner {
    sink: Mutex<Option<Outbound>>,
    state: watch::Sender<SessionState>,
}

impl StreamGuard {
    pub fn new(outbound: Outbound) -> Self {
        let (state, _) = watch::channel(SessionState::Open);
        Self {
            inner: Arc::new(Inner {
                sink: Mutex::new(Some(outbound)),
                state,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Get notified of state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Send a reply. Fails with [`SessionError::Closed`] if the stream has
    /// already been closed.
    pub async fn send(&self, message: ClientMessage) -> Result<(), SessionError> {
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => Ok(sink.send(message).await?),
            None => Err(SessionError::Closed),
        }
    }

    /// Transition to [`SessionState::Closed`] and close the sink.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// stream was already closed.
    pub async fn close(&self) -> bool {
        let mut sink = self.inner.sink.lock().await;
        if self.state() == SessionState::Closed {
            debug!("stream already closed");
            return false;
        }
        self.inner.state.send_replace(SessionState::Closed);
        if let Some(mut sink) = sink.take() {
            if let Err(err) = sink.close().await {
                warn!("failed to close the outbound stream: {}", err);
            }
        }
        debug!("stream closed");
        true
    }
}
