use derive_more::Display;
use thiserror::Error;
use tracing::warn;

use super::{Config, ParameterSnapshot, Scalar, ServerMessage, ServerMsg};

/// Number of local epochs used when a `Fit` instruction does not specify
/// any.
pub const DEFAULT_LOCAL_EPOCHS: i64 = 1;

/// Configuration key holding the number of local epochs to train for.
const LOCAL_EPOCHS_KEY: &str = "local_epochs";

#[derive(Debug, Error, PartialEq, Eq)]
/// A violation of the session protocol by the server. Protocol errors are
/// fatal to the session and are never answered.
pub enum ProtocolError {
    #[error("unknown instruction")]
    UnknownInstruction,
    #[error("expected {expected} tensors but received {actual}")]
    TensorCountMismatch { expected: usize, actual: usize },
}

/// The kind of an instruction, without its payload.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    GetParameters,
    Fit,
    Evaluate,
    Reconnect,
}

/// A decoded instruction from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    GetParameters,
    Fit {
        parameters: ParameterSnapshot,
        config: Config,
    },
    Evaluate {
        parameters: ParameterSnapshot,
        config: Config,
    },
    Reconnect {
        seconds: Option<u64>,
    },
}

impl Instruction {
    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::GetParameters => InstructionKind::GetParameters,
            Instruction::Fit { .. } => InstructionKind::Fit,
            Instruction::Evaluate { .. } => InstructionKind::Evaluate,
            Instruction::Reconnect { .. } => InstructionKind::Reconnect,
        }
    }
}

impl TryFrom<ServerMessage> for Instruction {
    type Error = ProtocolError;

    fn try_from(message: ServerMessage) -> Result<Self, Self::Error> {
        let instruction = match message.msg.ok_or(ProtocolError::UnknownInstruction)? {
            ServerMsg::GetParametersIns(_) => Instruction::GetParameters,
            ServerMsg::FitIns(ins) => Instruction::Fit {
                parameters: ins.parameters.into(),
                config: ins.config,
            },
            ServerMsg::EvaluateIns(ins) => Instruction::Evaluate {
                parameters: ins.parameters.into(),
                config: ins.config,
            },
            ServerMsg::ReconnectIns(ins) => Instruction::Reconnect {
                seconds: ins.seconds,
            },
        };
        Ok(instruction)
    }
}

/// Read the number of local epochs from a `Fit` configuration.
///
/// Falls back to [`DEFAULT_LOCAL_EPOCHS`] when the key is missing or does
/// not hold an integer. Zero and negative values are returned as is.
pub fn local_epochs(config: &Config) -> i64 {
    match config.get(LOCAL_EPOCHS_KEY) {
        Some(Scalar::Sint64(epochs)) => *epochs,
        Some(other) => {
            warn!(
                "ignoring `{}` of unexpected type {:?}, using {}",
                LOCAL_EPOCHS_KEY, other, DEFAULT_LOCAL_EPOCHS
            );
            DEFAULT_LOCAL_EPOCHS
        }
        None => DEFAULT_LOCAL_EPOCHS,
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::message::{
        EvaluateIns,
        FitIns,
        GetParametersIns,
        Parameters,
        ReconnectIns,
        TENSOR_TYPE_ND,
    };

    fn parameters() -> Parameters {
        Parameters {
            tensors: vec![Bytes::from_static(b"w"), Bytes::from_static(b"b")],
            tensor_type: TENSOR_TYPE_ND.to_string(),
        }
    }

    fn config(epochs: Scalar) -> Config {
        let mut config = Config::new();
        config.insert("local_epochs".to_string(), epochs);
        config.insert("batch_size".to_string(), Scalar::Sint64(32));
        config
    }

    #[test]
    fn test_classify_every_variant() {
        let cases: Vec<(ServerMessage, InstructionKind)> = vec![
            (GetParametersIns.into(), InstructionKind::GetParameters),
            (
                FitIns {
                    parameters: parameters(),
                    config: Config::new(),
                }
                .into(),
                InstructionKind::Fit,
            ),
            (
                EvaluateIns {
                    parameters: parameters(),
                    config: Config::new(),
                }
                .into(),
                InstructionKind::Evaluate,
            ),
            (
                ReconnectIns { seconds: None }.into(),
                InstructionKind::Reconnect,
            ),
        ];
        for (message, kind) in cases {
            assert_eq!(Instruction::try_from(message).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_classify_empty_message() {
        assert_eq!(
            Instruction::try_from(ServerMessage { msg: None }),
            Err(ProtocolError::UnknownInstruction)
        );
    }

    #[test]
    fn test_fit_keeps_unknown_config_keys() {
        let message: ServerMessage = FitIns {
            parameters: parameters(),
            config: config(Scalar::Sint64(3)),
        }
        .into();
        match Instruction::try_from(message).unwrap() {
            Instruction::Fit { parameters, config } => {
                assert_eq!(parameters.len(), 2);
                assert_eq!(config.get("batch_size"), Some(&Scalar::Sint64(32)));
            }
            other => panic!("not a Fit instruction: {:?}", other),
        }
    }

    #[test]
    fn test_local_epochs_default() {
        assert_eq!(local_epochs(&Config::new()), 1);
    }

    #[test]
    fn test_local_epochs_explicit() {
        assert_eq!(local_epochs(&config(Scalar::Sint64(5))), 5);
    }

    #[test]
    fn test_local_epochs_non_positive_passes_through() {
        assert_eq!(local_epochs(&config(Scalar::Sint64(0))), 0);
        assert_eq!(local_epochs(&config(Scalar::Sint64(-3))), -3);
    }

    #[test]
    fn test_local_epochs_wrong_type() {
        assert_eq!(
            local_epochs(&config(Scalar::String("five".to_string()))),
            DEFAULT_LOCAL_EPOCHS
        );
        assert_eq!(local_epochs(&config(Scalar::Double(5.0))), DEFAULT_LOCAL_EPOCHS);
    }
}
