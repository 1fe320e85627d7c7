//! Interleaved multimodal training.
//!
//! Runs one epoch over two equally sized sources: paired image-text batches
//! and text-only batches whose vision input is synthesized from CLIP text
//! features. Both losses are summed into one accumulated gradient step.

pub mod data;
pub mod error;
pub mod mocks;
pub mod model;
pub mod precision;
pub mod tokenizer;
pub mod training;

pub use data::batch::{ImageTextBatch, TextOnlyBatch, TokenSequences};
pub use data::labels::{paired_labels, text_only_labels, Labels, IGNORE_INDEX};
pub use data::loader::{BatchLoader, VecLoader};
pub use error::TrainError;
pub use model::multimodal::{CausalLmOutput, MultimodalModel, TextEncoder, VisionInput};
pub use model::projection::{FeatureProjection, FrozenLinearProjection, MAPPING_DIM};
pub use precision::{active_autocast, resolve_autocast, resolve_compute_dtype, Autocast, ComputeDType};
pub use tokenizer::{media_token_id, HfTokenizer, Tokenizer};
pub use training::checkpoint::{trainable_state, TrainableState};
pub use training::config::EpochConfig;
pub use training::driver::{global_step, train_one_epoch, EpochSummary};
pub use training::metrics::{JsonlMetricSink, MetricSink, NullMetricSink, TracingMetricSink};
