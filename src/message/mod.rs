//! Messages exchanged with the coordinating server.
//!
//! The server drives the session with [`ServerMessage`]s, each carrying at
//! most one instruction. The client answers every instruction with exactly
//! one [`ClientMessage`]. Decoding an incoming message into an
//! [`Instruction`] is done with [`Instruction::try_from`].

mod instruction;
mod tensor;

use std::{collections::HashMap, fmt};

use bytes::Bytes;
use derive_more::From;
use serde::{
    de::{self, Deserializer, EnumAccess, VariantAccess, Visitor},
    Deserialize,
    Serialize,
};
use tracing::{debug, warn};

pub use self::{
    instruction::{local_epochs, Instruction, InstructionKind, ProtocolError, DEFAULT_LOCAL_EPOCHS},
    tensor::{ParameterSnapshot, Tensor, TENSOR_TYPE_ND},
};

/// Wire form of a parameter snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    pub tensors: Vec<Bytes>,
    /// Layout of the tensors. Always `"ND"` when sent by this crate, not
    /// validated on receipt.
    pub tensor_type: String,
}

/// A configuration value sent along with an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
pub enum Scalar {
    Sint64(i64),
    Double(f64),
    String(String),
    Bytes(Bytes),
    Bool(bool),
}

/// Configuration attached to `Fit` and `Evaluate` instructions. Keys this
/// crate does not interpret are kept but ignored.
pub type Config = HashMap<String, Scalar>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetParametersIns;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitIns {
    pub parameters: Parameters,
    #[serde(default)]
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateIns {
    pub parameters: Parameters,
    #[serde(default)]
    pub config: Config,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconnectIns {
    /// Delay after which the server would like the client to reconnect.
    /// `None` means the server does not expect the client back.
    pub seconds: Option<u64>,
}

/// The instruction variants a server can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
pub enum ServerMsg {
    GetParametersIns(GetParametersIns),
    FitIns(FitIns),
    EvaluateIns(EvaluateIns),
    ReconnectIns(ReconnectIns),
}

/// A message sent by the server.
///
/// `msg` is `None` when the server sent no instruction, or a variant this
/// client does not know about. The payload of an unknown variant is left
/// unread: decoders must accept trailing bytes in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(default, deserialize_with = "deserialize_server_msg")]
    pub msg: Option<ServerMsg>,
}

const SERVER_MSG_VARIANTS: &[&str] = &[
    "GetParametersIns",
    "FitIns",
    "EvaluateIns",
    "ReconnectIns",
];

fn deserialize_server_msg<'de, D>(deserializer: D) -> Result<Option<ServerMsg>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OptionVisitor;

    impl<'de> Visitor<'de> for OptionVisitor {
        type Value = Option<ServerMsg>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "an optional server instruction")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_enum("ServerMsg", SERVER_MSG_VARIANTS, ServerMsgVisitor)
        }
    }

    deserializer.deserialize_option(OptionVisitor)
}

struct ServerMsgVisitor;

impl<'de> Visitor<'de> for ServerMsgVisitor {
    type Value = Option<ServerMsg>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a server instruction")
    }

    fn visit_enum<A>(self, data: A) -> Result<Self::Value, A::Error>
    where
        A: EnumAccess<'de>,
    {
        let (VariantTag(index), variant) = data.variant::<VariantTag>()?;
        let msg: ServerMsg = match index {
            Some(0) => variant.newtype_variant::<GetParametersIns>()?.into(),
            Some(1) => variant.newtype_variant::<FitIns>()?.into(),
            Some(2) => variant.newtype_variant::<EvaluateIns>()?.into(),
            Some(3) => variant.newtype_variant::<ReconnectIns>()?.into(),
            _ => {
                debug!("skipping unknown instruction variant");
                return Ok(None);
            }
        };
        Ok(Some(msg))
    }
}

/// Position of a [`ServerMsg`] variant, `None` for a variant this client
/// does not know about.
struct VariantTag(Option<usize>);

impl<'de> Deserialize<'de> for VariantTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct VariantTagVisitor;

        impl<'de> Visitor<'de> for VariantTagVisitor {
            type Value = VariantTag;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a variant index or name")
            }

            fn visit_u64<E>(self, index: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let index = usize::try_from(index)
                    .ok()
                    .filter(|index| *index < SERVER_MSG_VARIANTS.len());
                Ok(VariantTag(index))
            }

            fn visit_str<E>(self, name: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(VariantTag(
                    SERVER_MSG_VARIANTS.iter().position(|known| *known == name),
                ))
            }
        }

        deserializer.deserialize_identifier(VariantTagVisitor)
    }
}

impl From<ServerMsg> for ServerMessage {
    fn from(msg: ServerMsg) -> Self {
        Self { msg: Some(msg) }
    }
}

macro_rules! impl_server_message_from {
    ($($ins:ty),+ $(,)?) => {
        $(
            impl From<$ins> for ServerMessage {
                fn from(ins: $ins) -> Self {
                    ServerMsg::from(ins).into()
                }
            }
        )+
    };
}

impl_server_message_from!(GetParametersIns, FitIns, EvaluateIns, ReconnectIns);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    Unknown,
    Reconnect,
    Ack,
}

/// A reply sent by the client. Exactly one is sent per instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    GetParametersRes {
        parameters: Parameters,
    },
    FitRes {
        parameters: Parameters,
        num_examples: i64,
    },
    EvaluateRes {
        loss: f32,
        num_examples: i64,
    },
    DisconnectRes {
        reason: DisconnectReason,
    },
}

impl ClientMessage {
    pub fn get_parameters_res(snapshot: ParameterSnapshot) -> Self {
        ClientMessage::GetParametersRes {
            parameters: snapshot.encode(),
        }
    }

    pub fn fit_res(snapshot: ParameterSnapshot, num_examples: usize) -> Self {
        ClientMessage::FitRes {
            parameters: snapshot.encode(),
            num_examples: wire_count(num_examples),
        }
    }

    pub fn evaluate_res(loss: f32, num_examples: usize) -> Self {
        ClientMessage::EvaluateRes {
            loss,
            num_examples: wire_count(num_examples),
        }
    }

    pub fn disconnect_res() -> Self {
        ClientMessage::DisconnectRes {
            reason: DisconnectReason::Ack,
        }
    }

    /// Kind of the instruction this message answers.
    pub fn kind(&self) -> InstructionKind {
        match self {
            ClientMessage::GetParametersRes { .. } => InstructionKind::GetParameters,
            ClientMessage::FitRes { .. } => InstructionKind::Fit,
            ClientMessage::EvaluateRes { .. } => InstructionKind::Evaluate,
            ClientMessage::DisconnectRes { .. } => InstructionKind::Reconnect,
        }
    }
}

fn wire_count(count: usize) -> i64 {
    i64::try_from(count).unwrap_or_else(|_| {
        warn!("sample count {} does not fit the wire, sending {}", count, i64::MAX);
        i64::MAX
    })
}
