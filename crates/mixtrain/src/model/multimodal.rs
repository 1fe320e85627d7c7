//! Model capability driven by the epoch loop.
//!
//! The architecture is supplied by the caller. The driver only needs a
//! forward pass that returns a loss, and a gradient-free text encoder for the
//! text-only source.

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Vision input of a forward pass.
///
/// Replaces an `is_vision_encoded` flag: raw pixels and pre-encoded features
/// have different ranks, so each gets its own variant.
#[derive(Debug, Clone)]
pub enum VisionInput<B: Backend> {
    /// Raw pixels, `(N, T_img, F, C, H, W)`.
    Pixels(Tensor<B, 6>),
    /// Features already in image-embedding space, `(N, T_img, F, 1, D)`
    /// after the two singleton axes the vision stack expects.
    Encoded(Tensor<B, 5>),
}

impl<B: Backend> VisionInput<B> {
    /// Whether the vision encoder must be skipped.
    pub fn is_vision_encoded(&self) -> bool {
        matches!(self, VisionInput::Encoded(_))
    }

    /// Leading batch dimension.
    pub fn batch_size(&self) -> usize {
        match self {
            VisionInput::Pixels(t) => t.dims()[0],
            VisionInput::Encoded(t) => t.dims()[0],
        }
    }
}

/// Output of a causal-LM forward pass.
#[derive(Debug, Clone)]
pub struct CausalLmOutput<B: Backend> {
    /// Scalar loss, shape `(1,)`.
    pub loss: Tensor<B, 1>,
    /// Next-token logits, `(N, T, vocab)`.
    pub logits: Tensor<B, 3>,
}

/// Text tower of a contrastive vision encoder.
pub trait TextEncoder<B: Backend> {
    /// Pooled text embeddings, `(rows, D)`.
    fn text_features(
        &self,
        input_ids: Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2>;
}

/// A trainable multimodal causal LM.
pub trait MultimodalModel<B: AutodiffBackend>: AutodiffModule<B> {
    /// Gradient-free copy of the vision encoder, on the inner backend.
    type VisionEncoder: TextEncoder<B::InnerBackend>;

    /// The vision encoder, detached from the autodiff graph.
    fn vision_encoder(&self) -> Self::VisionEncoder;

    /// Forward pass. `labels` uses `IGNORE_INDEX` for unsupervised positions.
    fn forward(
        &self,
        vision: VisionInput<B>,
        input_ids: Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        labels: Tensor<B, 2, Int>,
    ) -> CausalLmOutput<B>;
}
