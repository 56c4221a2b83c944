//! App error type for the wash pipeline and sidecar commands. Implements Display and
//! Serialize so the sidecar can hand it to a frontend verbatim.

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AppError {
    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn invalid_job(reason: impl Into<String>) -> Self {
        Self::InvalidJob(reason.into())
    }

    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    /// One-line description for status messages and logs.
    pub fn summary(&self) -> String {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                parse_ffmpeg_error(stderr, Some(*code)).summary
            }
            _ => self.to_string(),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Cancelled" {
            AppError::Cancelled
        } else {
            AppError::FfmpegFailed {
                code: -1,
                stderr: s,
            }
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
