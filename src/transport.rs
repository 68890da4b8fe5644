//! The duplex stream a session runs on.
//!
//! A session consumes an [`Inbound`] stream of server messages and an
//! [`Outbound`] sink of client messages. Any transport that can be adapted
//! to these two halves can carry a session. [`connect`] provides one over
//! plain TCP: length-delimited frames holding `bincode` encoded messages.
//! Bytes left in a frame after a message are ignored, so that instructions
//! added by newer servers decode to an empty message.

use std::{io, pin::Pin};

use bincode::{DefaultOptions, Options};
use futures::{stream::BoxStream, Sink, SinkExt, StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_serde::formats::Bincode;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info};

use crate::{
    message::{ClientMessage, ServerMessage},
    settings::ClientSettings,
};

#[derive(Debug, Error)]
/// A failure of the underlying stream.
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// The receiving half of a session stream.
pub type Inbound = BoxStream<'static, Result<ServerMessage, TransportError>>;

/// The sending half of a session stream. Closing it ends the stream for
/// the server.
pub type Outbound = Pin<Box<dyn Sink<ClientMessage, Error = TransportError> + Send>>;

/// Open a plaintext TCP connection to the server at `settings.address`.
///
/// Frames larger than `settings.max_message_size` are rejected in both
/// directions.
pub async fn connect(settings: &ClientSettings) -> Result<(Inbound, Outbound), TransportError> {
    debug!(address = %settings.address, "connecting");
    let stream = TcpStream::connect(&settings.address).await?;
    stream.set_nodelay(true)?;
    info!(address = %settings.address, "connected to the server");
    Ok(framed(stream, settings.max_message_size))
}

/// Split a byte stream into the two message halves a session consumes.
pub fn framed<T>(io: T, max_message_size: usize) -> (Inbound, Outbound)
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let frames = Framed::new(
        io,
        LengthDelimitedCodec::builder()
            .max_frame_length(max_message_size)
            .new_codec(),
    );
    let messages = tokio_serde::Framed::<_, ServerMessage, ClientMessage, _>::new(
        frames,
        Bincode::<ServerMessage, ClientMessage, _>::from(
            DefaultOptions::new().allow_trailing_bytes(),
        ),
    );
    let (sink, stream) = StreamExt::split::<ClientMessage>(messages);
    let inbound = stream.map_err(TransportError::from).boxed();
    let outbound: Outbound = Box::pin(sink.sink_map_err(TransportError::from));
    (inbound, outbound)
}
