use std::error::Error;

use thiserror::Error;

use crate::{
    message::{InstructionKind, ProtocolError},
    transport::TransportError,
};

#[derive(Debug, Error)]
/// A fatal session error. Every variant ends the session.
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("local {kind} operation failed: {source}")]
    Model {
        kind: InstructionKind,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    #[error("the session is closed")]
    Closed,
}

impl SessionError {
    /// Build a mapping from a model adapter error to a [`SessionError`].
    pub(crate) fn model<E>(kind: InstructionKind) -> impl FnOnce(E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        move |err| SessionError::Model {
            kind,
            source: Box::new(err),
        }
    }
}
