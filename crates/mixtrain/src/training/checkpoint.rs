//! Trainable-only checkpoint state.
//!
//! Frozen towers (the vision encoder, the text-to-image projection) make up
//! most of a multimodal model's weights and never change during training,
//! so checkpoints keep only parameters that require gradients.

use std::collections::HashMap;
use std::marker::PhantomData;

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::tensor::TensorData;

/// Parameter data keyed by parameter id, frozen parameters excluded.
#[derive(Debug, Clone, Default)]
pub struct TrainableState {
    tensors: HashMap<ParamId, TensorData>,
    frozen: usize,
}

impl TrainableState {
    pub fn get(&self, id: &ParamId) -> Option<&TensorData> {
        self.tensors.get(id)
    }

    pub fn contains(&self, id: &ParamId) -> bool {
        self.tensors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Number of parameters left out because they are frozen.
    pub fn frozen(&self) -> usize {
        self.frozen
    }

    /// Total scalar count of the kept tensors.
    pub fn num_elements(&self) -> usize {
        self.tensors.values().map(|d| d.num_elements()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamId, &TensorData)> {
        self.tensors.iter()
    }

    pub fn into_inner(self) -> HashMap<ParamId, TensorData> {
        self.tensors
    }
}

/// Collect the data of every parameter that requires gradients.
///
/// The module itself is left untouched.
pub fn trainable_state<B: Backend, M: Module<B>>(module: &M) -> TrainableState {
    let mut collector = TrainableCollector::<B> {
        state: TrainableState::default(),
        _backend: PhantomData,
    };
    module.visit(&mut collector);
    tracing::debug!(
        kept = collector.state.len(),
        frozen = collector.state.frozen,
        "Collected trainable parameters"
    );
    collector.state
}

struct TrainableCollector<B: Backend> {
    state: TrainableState,
    _backend: PhantomData<B>,
}

impl<B: Backend> ModuleVisitor<B> for TrainableCollector<B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if tensor.is_require_grad() {
            self.state.tensors.insert(id, tensor.to_data());
        } else {
            self.state.frozen += 1;
        }
    }
}
