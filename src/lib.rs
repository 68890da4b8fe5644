//! This crate provides the client side of a federated learning session.
//!
//! A coordinating server drives each participating client through a
//! long-lived, bidirectional message stream. The server sends
//! instructions, the client executes them against its local model and
//! answers each of them with exactly one reply:
//!
//! - **GetParameters**: reply with the current model parameters
//! - **Fit**: install the global parameters, train locally, reply with the
//!   updated parameters and the number of training samples
//! - **Evaluate**: install the global parameters, evaluate them on local
//!   data, reply with the loss and the number of test samples
//! - **Reconnect**: acknowledge, then close the stream
//!
//! # Running a participant
//!
//! A participant needs three things:
//!
//! - a stream to the server. [`transport::connect`] opens one over TCP, but
//!   any pair of [`transport::Inbound`] and [`transport::Outbound`] halves
//!   will do
//! - a local model. This can be any type that implements [`ModelAdapter`]
//! - a [`Notify`] implementation that is told what the session is doing.
//!   [`LogNotifier`] turns every notification into a log event
//!
//! ```rust,no_run
//! use fedlearn_client::{settings::Settings, transport, LogNotifier, ModelAdapter, Session};
//!
//! async fn participate<M: ModelAdapter>(settings: &Settings, model: M) -> anyhow::Result<()> {
//!     let (inbound, outbound) = transport::connect(&settings.client).await?;
//!     let reason = Session::new(inbound, outbound, model, LogNotifier)
//!         .run()
//!         .await?;
//!     println!("session closed: {}", reason);
//!     Ok(())
//! }
//! ```
//!
//! The session runs until the server asks the client to disconnect, the
//! server ends the stream, the client closes the session through a
//! [`SessionHandle`], or an error occurs. The stream is closed exactly once
//! in every case.
//!
//! Optionally, a [`telemetry::Recorder`] receives a report after every
//! `Fit` and `Evaluate` instruction.

pub mod logging;
pub mod message;
pub mod model;
pub mod notify;
pub mod session;
pub mod settings;
pub mod telemetry;
pub mod transport;

pub use self::{
    model::{Evaluation, ModelAdapter},
    notify::{LogNotifier, Notify},
    session::{CloseReason, Session, SessionError, SessionHandle, SessionId, SessionState},
};
