//! One epoch of interleaved image-text / text-only training.
//!
//! Each step runs a forward pass on both sources and sums the scaled losses.
//! The gradients go into an accumulation window that is clipped every step.
//! At window boundaries the window is applied with the scheduled learning
//! rate.

use burn::lr_scheduler::LrScheduler;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};

use crate::data::batch::{ImageTextBatch, TextOnlyBatch};
use crate::data::labels::{paired_labels, text_only_labels};
use crate::data::loader::BatchLoader;
use crate::error::TrainError;
use crate::model::features::text_vision_features;
use crate::model::multimodal::{MultimodalModel, VisionInput};
use crate::model::projection::FeatureProjection;
use crate::precision::{resolve_autocast, resolve_compute_dtype, Autocast, ComputeDType};
use crate::tokenizer::{media_token_id, Tokenizer};
use crate::training::config::EpochConfig;
use crate::training::grads::GradientWindow;
use crate::training::metrics::MetricSink;

/// Step index across epochs, used to timestamp metrics.
pub fn global_step(epoch: usize, step: usize, batches_per_epoch: usize) -> usize {
    epoch * batches_per_epoch + step
}

/// What one epoch did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochSummary {
    /// Joint steps executed.
    pub steps: usize,
    /// Optimizer (and scheduler) updates applied.
    pub optimizer_steps: usize,
    /// Mean unscaled paired-source loss.
    pub mean_paired_loss: f64,
    /// Mean unscaled text-only-source loss.
    pub mean_text_only_loss: f64,
    /// Gradient norm before clipping at the last step.
    pub last_grad_norm: f64,
}

/// Token ids the label masks depend on.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    pad: i64,
    media: i64,
}

/// Run one epoch over two equally sized loaders.
///
/// Fails before pulling any batch if the loaders disagree on their batch
/// count or the configuration is inconsistent. Any error after that aborts
/// the epoch; partial windows are not applied.
///
/// # Arguments
/// - `config`: precision, accumulation, rank and mapping settings
/// - `model`: the model to train (consumed and returned updated)
/// - `epoch`: zero-based epoch index, used for global step numbering
/// - `paired_loader` / `text_loader`: the two sources, one batch each per step
/// - `tokenizer`: resolves the media token and pad id
/// - `optimizer` / `scheduler`: stepped together once per accumulation window
/// - `projection`: frozen text-to-image mapping, required iff
///   `config.use_text_to_image_mapping`
/// - `metrics`: receives per-update losses on rank 0 when reporting is on
/// - `device`: where batches are uploaded
#[allow(clippy::too_many_arguments)]
pub fn train_one_epoch<B, M, O, S, LA, LB, T>(
    config: &EpochConfig,
    mut model: M,
    epoch: usize,
    paired_loader: &mut LA,
    text_loader: &mut LB,
    tokenizer: &T,
    optimizer: &mut O,
    scheduler: &mut S,
    projection: Option<&dyn FeatureProjection<B::InnerBackend>>,
    metrics: &mut dyn MetricSink,
    device: &B::Device,
) -> Result<(M, EpochSummary), TrainError>
where
    B: AutodiffBackend,
    M: MultimodalModel<B>,
    O: Optimizer<M, B>,
    S: LrScheduler,
    LA: BatchLoader<Batch = ImageTextBatch>,
    LB: BatchLoader<Batch = TextOnlyBatch>,
    T: Tokenizer + ?Sized,
{
    let num_batches = paired_loader.num_batches();
    let text_batches = text_loader.num_batches();
    if num_batches != text_batches {
        return Err(TrainError::LoaderMismatch {
            paired: num_batches,
            text_only: text_batches,
        });
    }
    config.validate()?;
    let projection = match (config.use_text_to_image_mapping, projection) {
        (true, None) => return Err(TrainError::MissingProjection),
        (true, Some(p)) => Some(p),
        (false, Some(_)) => {
            tracing::warn!("Feature projection supplied but use_text_to_image_mapping is off; ignoring it");
            None
        }
        (false, None) => None,
    };

    let accum = config.gradient_accumulation_steps;
    let autocast = resolve_autocast(&config.precision);
    let dtype = resolve_compute_dtype(&config.precision);
    let tokens = SpecialTokens {
        pad: i64::from(tokenizer.pad_token_id()),
        media: i64::from(media_token_id(tokenizer, &config.media_token)?),
    };

    tracing::info!(
        epoch,
        num_batches,
        accum,
        precision = %config.precision,
        autocast = autocast.is_enabled(),
        mapping = projection.is_some(),
        media_token_id = tokens.media,
        "Starting epoch"
    );

    let pb = progress_bar(num_batches, config.rank);
    let mut window = GradientWindow::<M>::new();
    let mut summary = EpochSummary::default();
    let mut paired_sum = 0.0;
    let mut text_only_sum = 0.0;

    for (step, (paired, text_only)) in paired_loader
        .batches()
        .zip(text_loader.batches())
        .enumerate()
    {
        let paired_loss = paired_loss(&model, paired, tokens, dtype, autocast, device)?;
        let text_only_loss = text_only_loss(&model, text_only, tokens, projection, autocast, device)?;

        let divided_paired = paired_loss.div_scalar(accum as f64);
        let divided_text_only = text_only_loss.div_scalar(accum as f64);

        // Extract scalar values before backward
        let paired_val: f64 = divided_paired.clone().into_scalar().elem();
        let text_only_val: f64 = divided_text_only.clone().into_scalar().elem();
        paired_sum += paired_val * accum as f64;
        text_only_sum += text_only_val * accum as f64;

        let loss = divided_paired + divided_text_only;
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        window.accumulate::<B>(&model, grads);
        let grad_norm = window.clip_norm::<B>(&model, config.max_grad_norm);
        summary.last_grad_norm = grad_norm;

        tracing::debug!(
            step,
            loss_paired = paired_val,
            loss_text_only = text_only_val,
            grad_norm,
            "Micro-step"
        );

        if (step + 1) % accum == 0 || step + 1 == num_batches {
            let step_global = global_step(epoch, step, num_batches);
            let lr = scheduler.step();
            model = optimizer.step(lr, model, window.take());
            summary.optimizer_steps += 1;

            tracing::info!(global_step = step_global, lr, "Optimizer step");

            if config.reports_metrics() {
                let gs = step_global as f64;
                metrics
                    .log(&[("loss_paired", paired_val), ("global_step", gs)], false)
                    .map_err(TrainError::Metrics)?;
                metrics
                    .log(&[("loss_text_only", text_only_val), ("global_step", gs)], true)
                    .map_err(TrainError::Metrics)?;
            }
        }

        summary.steps += 1;
        pb.inc(1);
    }
    pb.finish_and_clear();

    if summary.steps < num_batches {
        tracing::warn!(
            epoch,
            steps = summary.steps,
            num_batches,
            dropped_micro_steps = window.micro_steps(),
            "Loaders ran out before their declared batch count"
        );
    }

    if summary.steps > 0 {
        summary.mean_paired_loss = paired_sum / summary.steps as f64;
        summary.mean_text_only_loss = text_only_sum / summary.steps as f64;
    }

    tracing::info!(
        epoch,
        steps = summary.steps,
        optimizer_steps = summary.optimizer_steps,
        loss_paired = format!("{:.4}", summary.mean_paired_loss),
        loss_text_only = format!("{:.4}", summary.mean_text_only_loss),
        "Epoch finished"
    );

    Ok((model, summary))
}

/// Forward pass on a paired image-text batch. Returns the unscaled loss.
fn paired_loss<B, M>(
    model: &M,
    batch: ImageTextBatch,
    tokens: SpecialTokens,
    dtype: Option<ComputeDType>,
    autocast: Autocast,
    device: &B::Device,
) -> Result<Tensor<B, 1>, TrainError>
where
    B: AutodiffBackend,
    M: MultimodalModel<B>,
{
    let ImageTextBatch { images, text } = batch;
    let images = match dtype {
        Some(d) => d.apply(images),
        None => images,
    };
    // (N, C, H, W) -> (N, 1, 1, C, H, W)
    let images = Tensor::<B, 4>::from_data(images, device)
        .unsqueeze_dim::<5>(1)
        .unsqueeze_dim::<6>(1);
    let (input_ids, attention_mask) = text.to_tensors::<B>(device);
    let labels = paired_labels(&text, tokens.pad, tokens.media).to_tensor::<B>(device);

    let output = autocast.run(|| {
        model.forward(VisionInput::Pixels(images), input_ids, attention_mask, labels)
    });
    Ok(output.loss)
}

/// Forward pass on a text-only batch with text-derived vision features.
/// Returns the unscaled loss.
fn text_only_loss<B, M>(
    model: &M,
    batch: TextOnlyBatch,
    tokens: SpecialTokens,
    projection: Option<&dyn FeatureProjection<B::InnerBackend>>,
    autocast: Autocast,
    device: &B::Device,
) -> Result<Tensor<B, 1>, TrainError>
where
    B: AutodiffBackend,
    M: MultimodalModel<B>,
{
    let stacked = batch.stack()?;
    let (input_ids, attention_mask) = stacked.text.to_tensors::<B>(device);
    let (clip_ids, clip_mask) = stacked.clip_text.to_tensors::<B>(device);

    // Feature extraction runs on the inner backend: no gradients are tracked.
    let encoder = model.vision_encoder();
    let features = text_vision_features(
        &encoder,
        clip_ids.inner(),
        clip_mask.inner(),
        projection,
        stacked.examples,
        stacked.texts_per_example,
    )?;
    let features = Tensor::<B, 5>::from_inner(features);

    let labels = text_only_labels(&stacked.text, tokens.pad, tokens.media).to_tensor::<B>(device);

    let output = autocast.run(|| {
        model.forward(VisionInput::Encoded(features), input_ids, attention_mask, labels)
    });
    Ok(output.loss)
}

fn progress_bar(len: usize, rank: usize) -> ProgressBar {
    if rank != 0 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) Training")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_step() {
        assert_eq!(global_step(0, 0, 100), 0);
        assert_eq!(global_step(0, 99, 100), 99);
        assert_eq!(global_step(1, 0, 100), 100);
        assert_eq!(global_step(3, 7, 10), 37);
        assert_eq!(global_step(5, 0, 0), 0);
    }

    #[test]
    fn test_progress_bar_hidden_off_rank_zero() {
        assert!(progress_bar(10, 1).is_hidden());
        assert_eq!(progress_bar(10, 0).length(), Some(10));
    }
}
