use std::path::PathBuf;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the background masking pipeline.
///
/// Every fatal condition aborts the whole run. The only recoverable one, a
/// missing or unparsable frame rate, never reaches this type: it is handled
/// locally by the 30 fps fallback in [`crate::frame_rate`].
#[derive(Error, Debug)]
pub enum SegMaskError {
    #[error("No input selected: {path:?}")]
    InputMissing { path: PathBuf },

    #[error("Frame extraction failed: {message}")]
    ExtractionFailure { message: String },

    #[error("Inference error: {operation} failed")]
    Inference {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Encoding error: {operation} failed")]
    Encoding {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Media tool error: {tool} {operation} failed: {message}")]
    MediaTool {
        tool: String,
        operation: String,
        message: String,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Run cancelled before frame {frame}")]
    Cancelled { frame: usize },
}

pub type Result<T> = std::result::Result<T, SegMaskError>;

impl SegMaskError {
    pub(crate) fn extraction(message: impl Into<String>) -> Self {
        Self::ExtractionFailure {
            message: message.into(),
        }
    }

    pub(crate) fn inference(
        operation: impl Into<String>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        Self::Inference {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub(crate) fn encoding(operation: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::Encoding {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short terminal status shown to the user when a run ends in failure.
    pub fn status_message(&self) -> String {
        match self {
            Self::InputMissing { .. } => "No input file selected.".to_string(),
            Self::ExtractionFailure { .. } => "No frames extracted.".to_string(),
            Self::Inference { .. } => "Segmentation failed.".to_string(),
            Self::Encoding { .. } => "Encoding the output failed.".to_string(),
            Self::MediaTool { operation, .. } => format!("Media {} failed.", operation),
            Self::ImageProcessing { operation, .. } => format!("Image {} failed.", operation),
            Self::FileSystem { .. } => "Could not access the working files.".to_string(),
            Self::Configuration { .. } | Self::Validation { .. } => {
                "Invalid settings.".to_string()
            }
            Self::Cancelled { .. } => "Cancelled.".to_string(),
        }
    }
}

/// Convert anyhow errors to configuration errors, keeping only the message.
///
/// Lets callers that assemble settings with `anyhow` hand them to the library.
impl From<anyhow::Error> for SegMaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Call sites that know the path construct [`SegMaskError::FileSystem`]
/// themselves; this is the fallback for the ones that do not.
impl From<std::io::Error> for SegMaskError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for SegMaskError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for SegMaskError {
    fn from(err: ort::Error) -> Self {
        Self::Inference {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors only come out of tensor construction around inference calls.
impl From<ndarray::ShapeError> for SegMaskError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Inference {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
