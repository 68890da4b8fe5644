use std::{path::PathBuf, process};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use fedlearn_client::{
    logging,
    message::{ParameterSnapshot, Tensor},
    settings::Settings,
    telemetry::{LogSink, Recorder},
    transport,
    CloseReason,
    Evaluation,
    LogNotifier,
    ModelAdapter,
    Session,
};
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "participant", about = "A federated learning participant")]
struct Opt {
    /// Path of the configuration file
    #[arg(short, long = "config")]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        client: client_settings,
        log: log_settings,
    } = settings;
    logging::configure(log_settings)?;

    let (inbound, outbound) = transport::connect(&client_settings)
        .await
        .with_context(|| format!("failed to connect to {}", client_settings.address))?;

    let session = Session::new(inbound, outbound, LinearModel::new(), LogNotifier)
        .with_recorder(Recorder::new(LogSink));
    let handle = session.handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("shutting down: interrupted");
            handle.close().await;
        }
    });

    match session.run().await? {
        CloseReason::Reconnect {
            seconds: Some(seconds),
        } => info!("the server expects this participant back in {}s", seconds),
        reason => info!("done: {}", reason),
    }
    Ok(())
}

const LEARNING_RATE: f32 = 0.05;
const TOLERANCE: f32 = 0.1;

#[derive(Debug, Error)]
enum LinearModelError {
    #[error("tensor {index} holds {len} bytes, expected 4")]
    Malformed { index: usize, len: usize },
    #[error("expected 2 tensors, got {0}")]
    LayerCount(usize),
}

/// A one dimensional linear regression `y = weight * x + bias`, fitted on a
/// fixed synthetic dataset drawn from `y = 2x + 1`.
///
/// The model has two layers, each a single little-endian `f32`: the weight,
/// then the bias.
struct LinearModel {
    weight: f32,
    bias: f32,
    train: Vec<(f32, f32)>,
    test: Vec<(f32, f32)>,
}

impl LinearModel {
    fn new() -> Self {
        let sample = |i: usize| {
            let x = i as f32 / 16.0 - 2.0;
            (x, 2.0 * x + 1.0)
        };
        Self {
            weight: 0.0,
            bias: 0.0,
            train: (0..64).map(sample).collect(),
            test: (0..16).map(|i| sample(4 * i + 2)).collect(),
        }
    }

    fn predict(&self, x: f32) -> f32 {
        self.weight * x + self.bias
    }

    fn mse(&self, data: &[(f32, f32)]) -> f32 {
        data.iter()
            .map(|(x, y)| (self.predict(*x) - y).powi(2))
            .sum::<f32>()
            / data.len() as f32
    }

    fn epoch(&mut self) -> f32 {
        let n = self.train.len() as f32;
        let (mut grad_w, mut grad_b) = (0.0, 0.0);
        for (x, y) in &self.train {
            let err = self.predict(*x) - y;
            grad_w += 2.0 * err * x / n;
            grad_b += 2.0 * err / n;
        }
        self.weight -= LEARNING_RATE * grad_w;
        self.bias -= LEARNING_RATE * grad_b;
        self.mse(&self.train)
    }
}

fn encode(value: f32) -> Tensor {
    Tensor::new(Bytes::copy_from_slice(&value.to_le_bytes()))
}

fn decode(index: usize, tensor: &Tensor) -> Result<f32, LinearModelError> {
    let bytes: [u8; 4] = tensor
        .as_bytes()
        .try_into()
        .map_err(|_| LinearModelError::Malformed {
            index,
            len: tensor.as_bytes().len(),
        })?;
    Ok(f32::from_le_bytes(bytes))
}

#[async_trait]
impl ModelAdapter for LinearModel {
    type Error = LinearModelError;

    fn layer_count(&self) -> usize {
        2
    }

    async fn current_parameters(&self) -> Result<ParameterSnapshot, Self::Error> {
        Ok(ParameterSnapshot::new(vec![
            encode(self.weight),
            encode(self.bias),
        ]))
    }

    async fn set_parameters(&mut self, parameters: ParameterSnapshot) -> Result<(), Self::Error> {
        match parameters.tensors() {
            [weight, bias] => {
                let (weight, bias) = (decode(0, weight)?, decode(1, bias)?);
                self.weight = weight;
                self.bias = bias;
                Ok(())
            }
            tensors => Err(LinearModelError::LayerCount(tensors.len())),
        }
    }

    async fn fit(
        &mut self,
        epochs: i64,
        on_epoch_loss: &mut (dyn FnMut(f32) + Send),
    ) -> Result<usize, Self::Error> {
        for _ in 0..epochs.max(0) {
            let loss = self.epoch();
            on_epoch_loss(loss);
        }
        Ok(self.train.len())
    }

    async fn evaluate(&mut self) -> Result<Evaluation, Self::Error> {
        let hits = self
            .test
            .iter()
            .filter(|(x, y)| (self.predict(*x) - y).abs() <= TOLERANCE)
            .count();
        Ok(Evaluation {
            loss: self.mse(&self.test),
            accuracy: hits as f32 / self.test.len() as f32,
            num_examples: self.test.len(),
        })
    }
}
