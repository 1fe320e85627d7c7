//! Frozen text-to-image feature projection.
//!
//! A single `d → d` linear layer trained offline to map text embeddings into
//! image-embedding space. It is loaded once, before the epoch starts, and
//! never receives gradients.

use std::path::Path;

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::error::TrainError;

/// Embedding width of the CLIP ViT-L/14 towers the mapping was trained for.
pub const MAPPING_DIM: usize = 768;

/// Maps `(rows, D)` text features into image-feature space.
pub trait FeatureProjection<B: Backend> {
    fn project(&self, features: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Linear projection with gradients disabled.
#[derive(Module, Debug)]
pub struct FrozenLinearProjection<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> FrozenLinearProjection<B> {
    /// Wrap an existing linear layer, freezing its parameters.
    pub fn new(linear: Linear<B>) -> Self {
        Self {
            linear: linear.no_grad(),
        }
    }

    /// Load a `dim → dim` projection recorded with `NamedMpkFileRecorder`.
    pub fn load(path: &Path, dim: usize, device: &B::Device) -> Result<Self, TrainError> {
        let linear = LinearConfig::new(dim, dim)
            .init::<B>(device)
            .load_file(
                path,
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
                device,
            )
            .map_err(|e| TrainError::Recorder {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        tracing::info!(path = %path.display(), dim, "Loaded text-to-image projection");
        Ok(Self::new(linear))
    }

    /// Record the projection weights to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        self.linear
            .clone()
            .save_file(path, &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .map_err(|e| anyhow::anyhow!("Failed to save projection to {}: {e}", path.display()))
    }
}

impl<B: Backend> FeatureProjection<B> for FrozenLinearProjection<B> {
    fn project(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(features)
    }
}
