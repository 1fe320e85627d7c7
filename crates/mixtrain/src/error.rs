/// Errors that can occur while preparing or running a training epoch.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// The two loaders disagree on how many batches make up an epoch.
    #[error("paired loader has {paired} batches but text-only loader has {text_only}")]
    LoaderMismatch { paired: usize, text_only: usize },

    /// Text-to-image mapping was requested without a weights file.
    #[error("mapping_matrix_path must be set when use_text_to_image_mapping is enabled")]
    MissingMappingPath,

    /// Text-to-image mapping was requested but no projection was passed in.
    #[error("use_text_to_image_mapping is enabled but no feature projection was supplied")]
    MissingProjection,

    /// A configuration value is out of range.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The media placeholder could not be resolved to a token id.
    #[error("Media token {0:?} encodes to no token ids")]
    MediaToken(String),

    /// Error from the tokenizer.
    #[error("Tokenizer error: {0}")]
    Tokenizer(#[source] anyhow::Error),

    /// A batch does not have the shape the driver expects.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Error from the metric sink.
    #[error("Metric sink error: {0}")]
    Metrics(#[source] anyhow::Error),

    /// Failed to load recorded module weights.
    #[error("Failed to load weights from {path}: {message}")]
    Recorder { path: String, message: String },

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
