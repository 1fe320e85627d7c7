//! Text-derived vision features for the text-only source.
//!
//! Clip text is embedded by the vision encoder's text tower and normalized.
//! It can optionally be mapped into image-embedding space. The result is then
//! shaped like the encoded-image input the model expects.

use burn::prelude::*;

use crate::error::TrainError;
use crate::model::multimodal::TextEncoder;
use crate::model::projection::FeatureProjection;

/// L2-normalize each row.
pub fn l2_normalize<B: Backend>(features: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = features.clone().powf_scalar(2.0).sum_dim(1).sqrt();
    features / norm
}

/// Build encoded vision input from flattened clip text.
///
/// `clip_ids` / `clip_mask` are `(examples * per_example, W)`. Returns
/// `(examples, per_example, 1, 1, D)`. Run this on a non-autodiff backend:
/// nothing here should receive gradients.
pub fn text_vision_features<B: Backend, E: TextEncoder<B>>(
    encoder: &E,
    clip_ids: Tensor<B, 2, Int>,
    clip_mask: Tensor<B, 2, Int>,
    projection: Option<&dyn FeatureProjection<B>>,
    examples: usize,
    per_example: usize,
) -> Result<Tensor<B, 5>, TrainError> {
    let features = l2_normalize(encoder.text_features(clip_ids, clip_mask));
    let features = match projection {
        Some(p) => p.project(features),
        None => features,
    };

    let [rows, dim] = features.dims();
    if rows != examples * per_example {
        return Err(TrainError::Shape(format!(
            "text encoder returned {rows} rows, expected {examples} x {per_example}"
        )));
    }

    Ok(features
        .reshape([examples, per_example, dim])
        .unsqueeze_dim::<4>(2)
        .unsqueeze_dim::<5>(2))
}
