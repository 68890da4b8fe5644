//! Conversion between the wire representation of model parameters and the
//! in-memory [`ParameterSnapshot`] handed to the local model.
//!
//! Tensors are opaque at this layer: their bytes are never inspected and no
//! shape metadata travels with them. The shape of each tensor is implied by
//! the position it occupies in the snapshot, which must match the layer
//! ordering of the model on both ends of the connection.

use bytes::Bytes;
use derive_more::From;

use super::Parameters;

/// Layout tag stamped on every [`Parameters`] produced by this crate:
/// n-dimensional, row-major.
pub const TENSOR_TYPE_ND: &str = "ND";

/// A single opaque tensor.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub struct Tensor(Bytes);

impl Tensor {
    /// Wrap a byte buffer without copying it.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// An ordered collection of tensors representing the trainable state of a
/// model at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSnapshot(Vec<Tensor>);

impl ParameterSnapshot {
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self(tensors)
    }

    /// Wrap the buffers received from the wire, preserving their order.
    ///
    /// The number of tensors is not checked here, comparing it with the
    /// layer count of the model is the caller's job.
    pub fn decode(tensors: Vec<Bytes>) -> Self {
        Self(tensors.into_iter().map(Tensor).collect())
    }

    /// Turn the snapshot back into its wire form. The layout tag is always
    /// [`TENSOR_TYPE_ND`].
    pub fn encode(self) -> Parameters {
        Parameters {
            tensors: self.0.into_iter().map(Tensor::into_bytes).collect(),
            tensor_type: TENSOR_TYPE_ND.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.0
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        self.0
    }
}

impl From<Vec<Tensor>> for ParameterSnapshot {
    fn from(tensors: Vec<Tensor>) -> Self {
        Self(tensors)
    }
}

impl From<Parameters> for ParameterSnapshot {
    /// The received layout tag is ignored.
    fn from(parameters: Parameters) -> Self {
        Self::decode(parameters.tensors)
    }
}

impl From<ParameterSnapshot> for Parameters {
    fn from(snapshot: ParameterSnapshot) -> Self {
        snapshot.encode()
    }
}
