use thiserror::Error;

/// Errors raised by the dataset stages.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio decoding error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Resampling error: {0}")]
    Resample(String),

    #[error("Storage error at {path}: {message}")]
    Storage { path: String, message: String },

    #[error("Codec error: {0}")]
    Codec(String),

    /// Samples left the [-1, 1] range before integer conversion.
    #[error("Overflow error during audio conversion: max {max} / min {min}")]
    Overflow { max: f32, min: f32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pickle error: {0}")]
    Pickle(#[from] serde_pickle::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl DatasetError {
    pub fn storage(path: impl Into<String>, message: impl ToString) -> Self {
        DatasetError::Storage {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatasetError>;
