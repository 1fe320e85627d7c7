use std::path::PathBuf;

use crate::error::TrainError;

/// Configuration consumed by one epoch of interleaved training.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct EpochConfig {
    /// Precision tag: `amp`, `amp_bf16`/`amp_bfloat16`, `bf16`, `fp16`, or
    /// anything else for full precision.
    #[serde(default = "default_precision")]
    pub precision: String,

    /// Micro-steps per optimizer update.
    #[serde(default = "default_gradient_accumulation_steps")]
    pub gradient_accumulation_steps: usize,

    /// Process rank; only rank 0 reports metrics and shows progress.
    #[serde(default)]
    pub rank: usize,

    /// Emit per-update losses to the metric sink.
    #[serde(default)]
    pub report_metrics: bool,

    /// Maximum global L2 norm of the accumulated gradients.
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,

    /// Map clip-text features into image space before the forward pass.
    #[serde(default)]
    pub use_text_to_image_mapping: bool,

    /// Recorded weights of the text-to-image projection.
    #[serde(default)]
    pub mapping_matrix_path: Option<PathBuf>,

    /// Literal marking where visual features are spliced into text.
    #[serde(default = "default_media_token")]
    pub media_token: String,
}

fn default_precision() -> String {
    "fp32".to_string()
}
fn default_gradient_accumulation_steps() -> usize {
    1
}
fn default_max_grad_norm() -> f64 {
    1.0
}
fn default_media_token() -> String {
    "<image>".to_string()
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            precision: default_precision(),
            gradient_accumulation_steps: default_gradient_accumulation_steps(),
            rank: 0,
            report_metrics: false,
            max_grad_norm: default_max_grad_norm(),
            use_text_to_image_mapping: false,
            mapping_matrix_path: None,
            media_token: default_media_token(),
        }
    }
}

impl EpochConfig {
    /// Check the preconditions that depend on configuration alone.
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.gradient_accumulation_steps == 0 {
            return Err(TrainError::InvalidConfig(
                "gradient_accumulation_steps must be at least 1".into(),
            ));
        }
        if self.max_grad_norm.is_nan() || self.max_grad_norm <= 0.0 {
            return Err(TrainError::InvalidConfig(format!(
                "max_grad_norm must be positive, got {}",
                self.max_grad_norm
            )));
        }
        if self.use_text_to_image_mapping && self.mapping_matrix_path.is_none() {
            return Err(TrainError::MissingMappingPath);
        }
        Ok(())
    }

    /// Whether this process reports metrics.
    pub fn reports_metrics(&self) -> bool {
        self.rank == 0 && self.report_metrics
    }
}
