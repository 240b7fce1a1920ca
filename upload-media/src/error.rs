//! Error types for the upload queue.

use media_utils::MediaFile;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Convert into the error stored on a cancelled item.
    ///
    /// Typed upload errors pass through untouched; everything else is wrapped
    /// with `code`.
    pub fn into_upload_error(self, code: ErrorCode, file: &MediaFile) -> UploadError {
        match self {
            Error::Upload(err) => err,
            Error::Engine(err) => err.into_upload_error(code, file),
            other => UploadError::new(code, other.to_string(), file.clone()),
        }
    }
}

/// Machine readable reason attached to an [`UploadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MimeTypeNotSupported,
    MimeTypeNotAllowedForUser,
    SizeAboveLimit,
    UploadCancelled,
    UploadCancelledManually,
    MediaTranscodingError,
    VideoTranscodingError,
    AudioTranscodingError,
    ImageTranscodingError,
    VideoMutingError,
    UnknownUploadError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MimeTypeNotSupported => "MIME_TYPE_NOT_SUPPORTED",
            ErrorCode::MimeTypeNotAllowedForUser => "MIME_TYPE_NOT_ALLOWED_FOR_USER",
            ErrorCode::SizeAboveLimit => "SIZE_ABOVE_LIMIT",
            ErrorCode::UploadCancelled => "UPLOAD_CANCELLED",
            ErrorCode::UploadCancelledManually => "UPLOAD_CANCELLED_MANUALLY",
            ErrorCode::MediaTranscodingError => "MEDIA_TRANSCODING_ERROR",
            ErrorCode::VideoTranscodingError => "VIDEO_TRANSCODING_ERROR",
            ErrorCode::AudioTranscodingError => "AUDIO_TRANSCODING_ERROR",
            ErrorCode::ImageTranscodingError => "IMAGE_TRANSCODING_ERROR",
            ErrorCode::VideoMutingError => "VIDEO_MUTING_ERROR",
            ErrorCode::UnknownUploadError => "UNKNOWN_UPLOAD_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried by a cancelled item or a rejected file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct UploadError {
    pub code: ErrorCode,
    pub message: String,
    pub file: MediaFile,
}

impl UploadError {
    pub fn new(code: ErrorCode, message: impl Into<String>, file: MediaFile) -> Self {
        Self {
            code,
            message: message.into(),
            file,
        }
    }

    /// Generic failure of a pipeline step.
    pub fn could_not_upload(code: ErrorCode, file: MediaFile) -> Self {
        Self::new(code, "File could not be uploaded", file)
    }

    pub fn cancelled(file: MediaFile) -> Self {
        Self::new(ErrorCode::UploadCancelled, "File upload was cancelled", file)
    }

    pub fn cancelled_manually(file: MediaFile) -> Self {
        Self::new(
            ErrorCode::UploadCancelledManually,
            "File upload was cancelled",
            file,
        )
    }
}

/// Failure reported by a transcoding or analysis collaborator.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Wrap into an [`UploadError`] keeping the engine's message.
    pub fn into_upload_error(self, code: ErrorCode, file: &MediaFile) -> UploadError {
        UploadError::new(code, self.to_string(), file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> MediaFile {
        MediaFile::new("clip.mp4", "video/mp4", vec![0u8; 4])
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::MimeTypeNotAllowedForUser).unwrap();
        assert_eq!(json, "\"MIME_TYPE_NOT_ALLOWED_FOR_USER\"");
        assert_eq!(ErrorCode::SizeAboveLimit.as_str(), "SIZE_ABOVE_LIMIT");

        let parsed: ErrorCode = serde_json::from_str("\"VIDEO_MUTING_ERROR\"").unwrap();
        assert_eq!(parsed, ErrorCode::VideoMutingError);
    }

    #[test]
    fn test_engine_error_keeps_message() {
        let err = EngineError::failed("ffmpeg exited with 1")
            .into_upload_error(ErrorCode::VideoTranscodingError, &file());
        assert_eq!(err.code, ErrorCode::VideoTranscodingError);
        assert_eq!(err.message, "ffmpeg exited with 1");
        assert_eq!(err.file.name(), "clip.mp4");
    }

    #[test]
    fn test_typed_upload_error_passes_through() {
        let typed = UploadError::cancelled(file());
        let err = Error::from(typed.clone()).into_upload_error(ErrorCode::UnknownUploadError, &file());
        assert_eq!(err, typed);

        let wrapped = Error::transport("connection reset")
            .into_upload_error(ErrorCode::UnknownUploadError, &file());
        assert_eq!(wrapped.code, ErrorCode::UnknownUploadError);
        assert!(wrapped.message.contains("connection reset"));
    }
}
