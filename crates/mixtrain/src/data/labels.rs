//! Label construction for causal-LM loss.
//!
//! Labels start as a copy of the input ids. Positions that must not
//! contribute to the loss are overwritten with [`IGNORE_INDEX`].

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::data::batch::TokenSequences;

/// Label value excluded from the loss.
pub const IGNORE_INDEX: i64 = -100;

/// Row-major label grid with the same shape as the token grid it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    values: Vec<i64>,
    rows: usize,
    seq_len: usize,
}

impl Labels {
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// Labels of row `i`.
    pub fn row(&self, i: usize) -> &[i64] {
        &self.values[i * self.seq_len..(i + 1) * self.seq_len]
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of positions that contribute to the loss.
    pub fn supervised(&self) -> usize {
        self.values.iter().filter(|&&v| v != IGNORE_INDEX).count()
    }

    /// Upload as a `(rows, seq_len)` Int tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2, Int> {
        Tensor::from_data(
            TensorData::new(self.values.clone(), [self.rows, self.seq_len]),
            device,
        )
    }
}

/// Labels for the paired image-text source.
///
/// Masks padding, the first position of every row, and media placeholders.
pub fn paired_labels(text: &TokenSequences, pad_token_id: i64, media_token_id: i64) -> Labels {
    let mut labels = base_labels(text, pad_token_id);
    mask_token(&mut labels.values, media_token_id);
    labels
}

/// Labels for the text-only source.
///
/// Same as [`paired_labels`], and additionally every position before the
/// first media placeholder in a row. A row without a placeholder is masked
/// entirely.
pub fn text_only_labels(text: &TokenSequences, pad_token_id: i64, media_token_id: i64) -> Labels {
    let mut labels = base_labels(text, pad_token_id);
    let seq_len = labels.seq_len;
    if seq_len > 0 {
        for row in labels.values.chunks_mut(seq_len) {
            // Scans the partially masked row, so a placeholder at position 0
            // (already ignored) does not stop the scan.
            for label in row.iter_mut() {
                if *label == media_token_id {
                    break;
                }
                *label = IGNORE_INDEX;
            }
        }
    }
    mask_token(&mut labels.values, media_token_id);
    labels
}

fn base_labels(text: &TokenSequences, pad_token_id: i64) -> Labels {
    let mut values = text.input_ids().to_vec();
    mask_token(&mut values, pad_token_id);
    if text.seq_len() > 0 {
        for row in values.chunks_mut(text.seq_len()) {
            row[0] = IGNORE_INDEX;
        }
    }
    Labels {
        values,
        rows: text.rows(),
        seq_len: text.seq_len(),
    }
}

fn mask_token(values: &mut [i64], token_id: i64) {
    for v in values.iter_mut().filter(|v| **v == token_id) {
        *v = IGNORE_INDEX;
    }
}
