//! Host-side batch types produced by loaders and consumed by the driver.
//!
//! Token data stays as flat `i64` buffers until the driver uploads it, so
//! label masks can be built with plain index arithmetic.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::TrainError;

/// A row-major grid of token ids with its attention mask, shape `(rows, seq_len)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSequences {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    rows: usize,
    seq_len: usize,
}

impl TokenSequences {
    /// Build a grid from flat buffers.
    pub fn new(
        input_ids: Vec<i64>,
        attention_mask: Vec<i64>,
        rows: usize,
        seq_len: usize,
    ) -> Result<Self, TrainError> {
        let expected = rows * seq_len;
        if input_ids.len() != expected || attention_mask.len() != expected {
            return Err(TrainError::Shape(format!(
                "token grid ({rows}, {seq_len}) needs {expected} values, got {} ids and {} mask values",
                input_ids.len(),
                attention_mask.len()
            )));
        }
        Ok(Self {
            input_ids,
            attention_mask,
            rows,
            seq_len,
        })
    }

    /// Build a grid from per-row vectors. All rows must have the same length.
    pub fn from_rows(ids: &[Vec<i64>], masks: &[Vec<i64>]) -> Result<Self, TrainError> {
        if ids.len() != masks.len() {
            return Err(TrainError::Shape(format!(
                "{} id rows but {} mask rows",
                ids.len(),
                masks.len()
            )));
        }
        let seq_len = ids.first().map_or(0, Vec::len);
        for (i, (id_row, mask_row)) in ids.iter().zip(masks).enumerate() {
            if id_row.len() != seq_len || mask_row.len() != seq_len {
                return Err(TrainError::Shape(format!(
                    "row {i} has {} ids and {} mask values, expected {seq_len}",
                    id_row.len(),
                    mask_row.len()
                )));
            }
        }
        Self::new(ids.concat(), masks.concat(), ids.len(), seq_len)
    }

    /// Build a grid with an all-ones attention mask.
    pub fn unmasked(ids: &[Vec<i64>]) -> Result<Self, TrainError> {
        let masks: Vec<Vec<i64>> = ids.iter().map(|r| vec![1; r.len()]).collect();
        Self::from_rows(ids, &masks)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn input_ids(&self) -> &[i64] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[i64] {
        &self.attention_mask
    }

    /// Token ids of row `i`.
    pub fn row(&self, i: usize) -> &[i64] {
        &self.input_ids[i * self.seq_len..(i + 1) * self.seq_len]
    }

    /// Concatenate grids of identical shape along the row axis.
    ///
    /// Stacking `N` grids of shape `(I, W)` yields `(N * I, W)`: the stacked
    /// `(N, I, W)` tensor with its leading two dimensions already flattened.
    pub fn stack(items: &[TokenSequences]) -> Result<Self, TrainError> {
        let first = items
            .first()
            .ok_or_else(|| TrainError::Shape("cannot stack an empty list of token grids".into()))?;
        let shape = (first.rows, first.seq_len);

        let mut input_ids = Vec::with_capacity(items.len() * first.input_ids.len());
        let mut attention_mask = Vec::with_capacity(items.len() * first.input_ids.len());
        for (i, item) in items.iter().enumerate() {
            if (item.rows, item.seq_len) != shape {
                return Err(TrainError::Shape(format!(
                    "token grid {i} has shape ({}, {}), expected {shape:?}",
                    item.rows, item.seq_len
                )));
            }
            input_ids.extend_from_slice(&item.input_ids);
            attention_mask.extend_from_slice(&item.attention_mask);
        }

        Self::new(input_ids, attention_mask, items.len() * shape.0, shape.1)
    }

    /// Upload ids and mask as `(rows, seq_len)` Int tensors.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2, Int>, Tensor<B, 2, Int>) {
        let shape = [self.rows, self.seq_len];
        let ids = Tensor::from_data(TensorData::new(self.input_ids.clone(), shape), device);
        let mask = Tensor::from_data(TensorData::new(self.attention_mask.clone(), shape), device);
        (ids, mask)
    }
}

/// One batch of the paired image-text source.
#[derive(Debug, Clone)]
pub struct ImageTextBatch {
    /// Image pixels, shape `(N, C, H, W)`, f32.
    pub images: TensorData,
    /// Tokenized captions, shape `(N, T)`.
    pub text: TokenSequences,
}

impl ImageTextBatch {
    /// Build a batch, checking that images and captions line up.
    pub fn new(images: TensorData, text: TokenSequences) -> Result<Self, TrainError> {
        if images.shape.len() != 4 {
            return Err(TrainError::Shape(format!(
                "images must have shape (N, C, H, W), got {:?}",
                images.shape
            )));
        }
        if images.shape[0] != text.rows() {
            return Err(TrainError::Shape(format!(
                "{} images but {} caption rows",
                images.shape[0],
                text.rows()
            )));
        }
        Ok(Self { images, text })
    }

    pub fn len(&self) -> usize {
        self.text.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.text.rows() == 0
    }
}

/// One batch of the text-only source, kept per example as loaders yield it.
#[derive(Debug, Clone)]
pub struct TextOnlyBatch {
    /// Per example: auxiliary clip-text grid `(I, W)` whose embeddings stand
    /// in for images.
    pub clip_text: Vec<TokenSequences>,
    /// Per example: target text grid `(1, T)`.
    pub text: Vec<TokenSequences>,
}

/// A text-only batch stacked into batched grids.
#[derive(Debug, Clone)]
pub struct StackedTextOnly {
    /// Target text, `(N, T)`.
    pub text: TokenSequences,
    /// Clip text flattened to `(N * I, W)`.
    pub clip_text: TokenSequences,
    /// Number of examples `N`.
    pub examples: usize,
    /// Clip-text sequences per example `I`.
    pub texts_per_example: usize,
}

impl TextOnlyBatch {
    pub fn new(clip_text: Vec<TokenSequences>, text: Vec<TokenSequences>) -> Result<Self, TrainError> {
        if clip_text.len() != text.len() {
            return Err(TrainError::Shape(format!(
                "{} clip-text entries but {} text entries",
                clip_text.len(),
                text.len()
            )));
        }
        Ok(Self { clip_text, text })
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Stack per-example grids into batched grids.
    ///
    /// Each target text must be a single row; the row axis is squeezed away.
    pub fn stack(&self) -> Result<StackedTextOnly, TrainError> {
        if let Some(i) = self.text.iter().position(|t| t.rows() != 1) {
            return Err(TrainError::Shape(format!(
                "text entry {i} has {} rows, expected 1",
                self.text[i].rows()
            )));
        }
        let text = TokenSequences::stack(&self.text)?;
        let clip_text = TokenSequences::stack(&self.clip_text)?;
        let examples = self.text.len();
        let texts_per_example = self.clip_text[0].rows();

        Ok(StackedTextOnly {
            text,
            clip_text,
            examples,
            texts_per_example,
        })
    }
}
