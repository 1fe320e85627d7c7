//! Small stand-ins for the external capabilities the epoch driver needs,
//! for testing without a real multimodal model or tokenizer.

use std::cell::RefCell;
use std::collections::HashMap;

use burn::module::AutodiffModule;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;

use crate::data::batch::{ImageTextBatch, TextOnlyBatch, TokenSequences};
use crate::error::TrainError;
use crate::model::multimodal::{CausalLmOutput, MultimodalModel, TextEncoder, VisionInput};
use crate::model::projection::FeatureProjection;
use crate::precision::{active_autocast, ComputeDType};
use crate::tokenizer::Tokenizer;
use crate::training::loss::masked_lm_loss;
use crate::training::metrics::MetricSink;

// ---------------------------------------------------------------------------
// MockTokenizer
// ---------------------------------------------------------------------------

/// Tokenizer with canned encodings. Encoding unknown text is an error.
#[derive(Debug, Clone)]
pub struct MockTokenizer {
    encodings: HashMap<String, Vec<u32>>,
    pad_token_id: u32,
}

impl MockTokenizer {
    /// Create a tokenizer with no encodings.
    pub fn new(pad_token_id: u32) -> Self {
        Self {
            encodings: HashMap::new(),
            pad_token_id,
        }
    }

    /// Create a tokenizer that knows `media_token` as a single id.
    pub fn with_media_token(pad_token_id: u32, media_token: &str, media_id: u32) -> Self {
        let mut tok = Self::new(pad_token_id);
        tok.add_encoding(media_token, vec![media_id]);
        tok
    }

    /// Add a canned encoding for an exact text match.
    pub fn add_encoding(&mut self, text: &str, ids: Vec<u32>) {
        self.encodings.insert(text.to_string(), ids);
    }
}

impl Tokenizer for MockTokenizer {
    fn encode(&self, text: &str, _add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        self.encodings
            .get(text)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("MockTokenizer: no encoding for {text:?}"))
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

// ---------------------------------------------------------------------------
// RecordingMetricSink
// ---------------------------------------------------------------------------

/// One call made to a [`RecordingMetricSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricCall {
    pub values: Vec<(String, f64)>,
    pub commit: bool,
}

impl MetricCall {
    /// Value logged under `name` in this call.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }
}

/// Metric sink that records every call verbatim.
#[derive(Debug, Default, Clone)]
pub struct RecordingMetricSink {
    pub calls: Vec<MetricCall>,
}

impl RecordingMetricSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricSink for RecordingMetricSink {
    fn log(&mut self, metrics: &[(&str, f64)], commit: bool) -> anyhow::Result<()> {
        self.calls.push(MetricCall {
            values: metrics.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
            commit,
        });
        Ok(())
    }
}

/// Metric sink whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingMetricSink;

impl MetricSink for FailingMetricSink {
    fn log(&mut self, _metrics: &[(&str, f64)], _commit: bool) -> anyhow::Result<()> {
        anyhow::bail!("metrics backend unavailable")
    }
}

// ---------------------------------------------------------------------------
// ScaleProjection
// ---------------------------------------------------------------------------

/// Projection that multiplies features by a constant.
#[derive(Debug, Clone, Copy)]
pub struct ScaleProjection {
    pub factor: f64,
}

impl<B: Backend> FeatureProjection<B> for ScaleProjection {
    fn project(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        features.mul_scalar(self.factor)
    }
}

// ---------------------------------------------------------------------------
// TinyMultimodalModel
// ---------------------------------------------------------------------------

/// Text tower of the tiny model: masked mean of token embeddings.
#[derive(Module, Debug)]
pub struct TinyTextEncoder<B: Backend> {
    embedding: Embedding<B>,
}

impl<B: Backend> TinyTextEncoder<B> {
    /// Embedding table, `(vocab_size, feature_dim)`.
    pub fn weight(&self) -> Tensor<B, 2> {
        self.embedding.weight.val()
    }
}

impl<B: Backend> TextEncoder<B> for TinyTextEncoder<B> {
    fn text_features(
        &self,
        input_ids: Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        let embedded = self.embedding.forward(input_ids); // (M, W, F)
        let mask = attention_mask.float().unsqueeze_dim::<3>(2); // (M, W, 1)
        let summed = (embedded * mask.clone()).sum_dim(1); // (M, 1, F)
        let count = mask.sum_dim(1).clamp_min(1.0); // (M, 1, 1)
        let [rows, _, dim] = summed.dims();
        (summed / count).reshape([rows, dim])
    }
}

/// Configuration for [`TinyMultimodalModel`].
#[derive(Config, Debug)]
pub struct TinyMultimodalConfig {
    #[config(default = 16)]
    pub vocab_size: usize,
    #[config(default = 8)]
    pub d_model: usize,
    /// Width of the text encoder's features.
    #[config(default = 4)]
    pub feature_dim: usize,
    /// Scalars per image, `C * H * W`.
    #[config(default = 12)]
    pub pixels_per_image: usize,
}

impl TinyMultimodalConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TinyMultimodalModel<B> {
        TinyMultimodalModel {
            token_embedding: EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            pixel_proj: LinearConfig::new(self.pixels_per_image, self.d_model).init(device),
            feature_proj: LinearConfig::new(self.feature_dim, self.d_model).init(device),
            lm_head: LinearConfig::new(self.d_model, self.vocab_size).init(device),
            vision_encoder: TinyTextEncoder {
                embedding: EmbeddingConfig::new(self.vocab_size, self.feature_dim).init(device),
            }
            .no_grad(),
        }
    }
}

/// A causal LM conditioned on one pooled vision vector per example.
///
/// The vision context is added to every token embedding. The vision encoder
/// is frozen and only used for text-derived features.
#[derive(Module, Debug)]
pub struct TinyMultimodalModel<B: Backend> {
    token_embedding: Embedding<B>,
    pixel_proj: Linear<B>,
    feature_proj: Linear<B>,
    lm_head: Linear<B>,
    vision_encoder: TinyTextEncoder<B>,
}

impl<B: Backend> TinyMultimodalModel<B> {
    /// Output projection weight, `(d_model, vocab_size)`.
    pub fn lm_head_weight(&self) -> Tensor<B, 2> {
        self.lm_head.weight.val()
    }

    /// Weight mapping encoded features into the model, `(feature_dim, d_model)`.
    pub fn feature_proj_weight(&self) -> Tensor<B, 2> {
        self.feature_proj.weight.val()
    }

    /// Weight mapping raw pixels into the model, `(pixels, d_model)`.
    pub fn pixel_proj_weight(&self) -> Tensor<B, 2> {
        self.pixel_proj.weight.val()
    }

    /// The frozen text tower, still on this model's backend.
    pub fn frozen_encoder(&self) -> &TinyTextEncoder<B> {
        &self.vision_encoder
    }

    /// Pooled vision context, `(N, d_model)`.
    fn vision_context(&self, vision: VisionInput<B>) -> Tensor<B, 2> {
        match vision {
            VisionInput::Pixels(pixels) => {
                let [n, t, f, c, h, w] = pixels.dims();
                self.pixel_proj.forward(pixels.reshape([n, t * f * c * h * w]))
            }
            VisionInput::Encoded(features) => {
                let [n, i, a, b, d] = features.dims();
                let pooled = features
                    .reshape([n, i, a * b * d])
                    .mean_dim(1)
                    .reshape([n, a * b * d]);
                self.feature_proj.forward(pooled)
            }
        }
    }

    pub fn logits(&self, vision: VisionInput<B>, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let context = self.vision_context(vision).unsqueeze_dim::<3>(1); // (N, 1, d)
        let hidden = self.token_embedding.forward(input_ids) + context;
        self.lm_head.forward(hidden)
    }
}

/// What [`TinyMultimodalModel::forward`] saw on one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardObservation {
    /// Autocast dtype active during the call.
    pub autocast: Option<ComputeDType>,
    /// Flattened pixel values for `VisionInput::Pixels`, `None` for encoded
    /// features.
    pub pixels: Option<Vec<f32>>,
}

thread_local! {
    static FORWARD_LOG: RefCell<Vec<ForwardObservation>> = const { RefCell::new(Vec::new()) };
}

/// Drain the forward calls recorded on this thread.
pub fn take_forward_observations() -> Vec<ForwardObservation> {
    FORWARD_LOG.with(|log| std::mem::take(&mut *log.borrow_mut()))
}

impl<B: AutodiffBackend> MultimodalModel<B> for TinyMultimodalModel<B> {
    type VisionEncoder = TinyTextEncoder<B::InnerBackend>;

    fn vision_encoder(&self) -> Self::VisionEncoder {
        self.vision_encoder.valid()
    }

    fn forward(
        &self,
        vision: VisionInput<B>,
        input_ids: Tensor<B, 2, Int>,
        _attention_mask: Tensor<B, 2, Int>,
        labels: Tensor<B, 2, Int>,
    ) -> CausalLmOutput<B> {
        let pixels = match &vision {
            VisionInput::Pixels(pixels) => pixels.to_data().to_vec::<f32>().ok(),
            VisionInput::Encoded(_) => None,
        };
        FORWARD_LOG.with(|log| {
            log.borrow_mut().push(ForwardObservation {
                autocast: active_autocast(),
                pixels,
            })
        });

        let logits = self.logits(vision, input_ids);
        let loss = masked_lm_loss(logits.clone(), labels);
        CausalLmOutput { loss, logits }
    }
}

// ---------------------------------------------------------------------------
// Batch builders
// ---------------------------------------------------------------------------

/// Paired batch with the given caption rows and deterministic pixel values.
///
/// Images are `(rows, channels, height, width)`; pixel `k` of image `n` is
/// `((n + k) % 7) / 7`.
pub fn image_text_batch(
    captions: &[Vec<i64>],
    channels: usize,
    height: usize,
    width: usize,
) -> Result<ImageTextBatch, TrainError> {
    let n = captions.len();
    let per_image = channels * height * width;
    let pixels: Vec<f32> = (0..n * per_image)
        .map(|k| ((k / per_image + k % per_image) % 7) as f32 / 7.0)
        .collect();
    let text = TokenSequences::unmasked(captions)?;
    ImageTextBatch::new(TensorData::new(pixels, [n, channels, height, width]), text)
}

/// Text-only batch: one target row and a clip-text grid per example.
pub fn text_only_batch(
    texts: &[Vec<i64>],
    clip_texts: &[Vec<Vec<i64>>],
) -> Result<TextOnlyBatch, TrainError> {
    let text = texts
        .iter()
        .map(|t| TokenSequences::unmasked(std::slice::from_ref(t)))
        .collect::<Result<Vec<_>, _>>()?;
    let clip_text = clip_texts
        .iter()
        .map(|c| TokenSequences::unmasked(c))
        .collect::<Result<Vec<_>, _>>()?;
    TextOnlyBatch::new(clip_text, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    #[test]
    fn test_mock_tokenizer() {
        let tok = MockTokenizer::with_media_token(0, "<image>", 9);
        assert_eq!(tok.encode("<image>", false).unwrap(), vec![9]);
        assert!(tok.encode("hello", false).is_err());
        assert_eq!(tok.pad_token_id(), 0);
    }

    #[test]
    fn test_recording_sink() {
        let mut sink = RecordingMetricSink::new();
        sink.log(&[("a", 1.0), ("b", 2.0)], false).unwrap();
        sink.log(&[("c", 3.0)], true).unwrap();
        assert_eq!(sink.calls.len(), 2);
        assert_eq!(sink.calls[0].get("b"), Some(2.0));
        assert!(!sink.calls[0].commit);
        assert!(sink.calls[1].commit);
        assert!(FailingMetricSink.log(&[], true).is_err());
    }

    #[test]
    fn test_tiny_encoder_masked_mean() {
        let device = Default::default();
        let model = TinyMultimodalConfig::new().init::<TestBackend>(&device);
        let encoder = model.frozen_encoder();
        let ids = Tensor::<TestBackend, 2, Int>::from_data(TensorData::from([[3_i64, 5], [3, 7]]), &device);
        let mask = Tensor::<TestBackend, 2, Int>::from_data(TensorData::from([[1_i64, 0], [1, 0]]), &device);
        let feats = encoder.text_features(ids, mask);
        assert_eq!(feats.dims(), [2, 4]);
        // Second token masked in both rows: both rows equal embedding of 3.
        let v: Vec<f32> = feats.into_data().to_vec().unwrap();
        for k in 0..4 {
            assert!((v[k] - v[4 + k]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_tiny_model_forward_shapes() {
        let device = Default::default();
        let model = TinyMultimodalConfig::new().init::<TestAutodiffBackend>(&device);
        let ids = Tensor::<TestAutodiffBackend, 2, Int>::from_data(TensorData::from([[1_i64, 2, 3], [4, 5, 6]]), &device);
        let mask = Tensor::<TestAutodiffBackend, 2, Int>::ones([2, 3], &device);
        let labels = ids.clone();

        let pixels = Tensor::<TestAutodiffBackend, 6>::zeros([2, 1, 1, 3, 2, 2], &device);
        let out = model.forward(VisionInput::Pixels(pixels), ids.clone(), mask.clone(), labels.clone());
        assert_eq!(out.logits.dims(), [2, 3, 16]);
        assert_eq!(out.loss.dims(), [1]);

        let features = Tensor::<TestAutodiffBackend, 5>::zeros([2, 3, 1, 1, 4], &device);
        let out = model.forward(VisionInput::Encoded(features), ids, mask, labels);
        assert_eq!(out.logits.dims(), [2, 3, 16]);
    }

    #[test]
    fn test_tiny_model_records_forward_calls() {
        let device = Default::default();
        let model = TinyMultimodalConfig::new().init::<TestAutodiffBackend>(&device);
        let ids = Tensor::<TestAutodiffBackend, 2, Int>::from_data(TensorData::from([[1_i64, 2]]), &device);
        let mask = Tensor::<TestAutodiffBackend, 2, Int>::ones([1, 2], &device);
        take_forward_observations();

        let pixels = Tensor::<TestAutodiffBackend, 6>::ones([1, 1, 1, 3, 2, 2], &device);
        crate::precision::resolve_autocast("amp").run(|| {
            model.forward(VisionInput::Pixels(pixels), ids.clone(), mask.clone(), ids.clone())
        });
        let features = Tensor::<TestAutodiffBackend, 5>::zeros([1, 3, 1, 1, 4], &device);
        model.forward(VisionInput::Encoded(features), ids.clone(), mask, ids);

        let seen = take_forward_observations();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].autocast, Some(ComputeDType::Float16));
        assert_eq!(seen[0].pixels, Some(vec![1.0; 12]));
        assert_eq!(seen[1].autocast, None);
        assert_eq!(seen[1].pixels, None);
        assert!(take_forward_observations().is_empty());
    }

    #[test]
    fn test_tiny_model_vision_encoder_is_frozen() {
        let device = Default::default();
        let model = TinyMultimodalConfig::new().init::<TestAutodiffBackend>(&device);
        assert!(!model.frozen_encoder().weight().is_require_grad());
        assert!(model.lm_head_weight().is_require_grad());
    }

    #[test]
    fn test_batch_builders() {
        let paired = image_text_batch(&[vec![1, 2], vec![3, 4]], 3, 2, 2).unwrap();
        assert_eq!(paired.images.shape, vec![2, 3, 2, 2]);
        assert_eq!(paired.len(), 2);

        let text_only = text_only_batch(
            &[vec![1, 2, 3]],
            &[vec![vec![4, 5], vec![6, 7]]],
        )
        .unwrap();
        let stacked = text_only.stack().unwrap();
        assert_eq!(stacked.texts_per_example, 2);
    }
}
