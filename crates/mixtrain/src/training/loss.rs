//! Causal-LM loss honoring the ignore sentinel.

use burn::prelude::*;
use burn::tensor::activation::log_softmax;

use crate::data::labels::IGNORE_INDEX;

/// Next-token cross-entropy averaged over supervised positions.
///
/// Logits at position `t` predict the label at `t + 1`. Positions whose
/// shifted label is [`IGNORE_INDEX`] contribute nothing. When no position is
/// supervised the loss is zero, and it stays attached to the graph.
///
/// # Arguments
/// - `logits`: shape `(N, T, vocab)`
/// - `labels`: shape `(N, T)`
///
/// # Returns
/// Scalar loss tensor of shape `(1,)`.
pub fn masked_lm_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [n, t, vocab] = logits.dims();
    if t < 2 {
        return logits.sum().mul_scalar(0.0);
    }

    let shift_logits = logits.slice([0..n, 0..t - 1, 0..vocab]);
    let shift_labels = labels.slice([0..n, 1..t]);

    let ignored = shift_labels.clone().equal_elem(IGNORE_INDEX);
    let weights = ignored.clone().bool_not().float(); // (N, T-1)
    // Ignored positions still need an in-range index for the gather.
    let targets = shift_labels.mask_fill(ignored, 0);

    let log_probs = log_softmax(shift_logits, 2);
    let picked = log_probs
        .gather(2, targets.unsqueeze_dim::<3>(2))
        .reshape([n, t - 1]);

    let nll = picked.neg() * weights.clone();
    let count = weights.sum().clamp_min(1.0);
    nll.sum() / count
}
