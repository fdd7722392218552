//! Error taxonomy shared by every pipeline stage.
//!
//! Configuration and degenerate-input errors abort the current run and are
//! never retried. Backend errors are transient and handed back to the caller
//! untouched; the core itself does not retry anything.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or misnamed inputs the user has to fix (AOI, class property,
    /// sensor choice, slider ranges, unset composite).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Date-window string could not be parsed.
    #[error("invalid date windows {input:?}: {reason}")]
    WindowParse { input: String, reason: String },

    /// Inputs are well formed but cannot produce a model (fewer than two
    /// classes, a class with no pixels, an empty feature table).
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Band order at inference does not match the order recorded at training.
    #[error("feature mismatch: classifier trained on {expected:?}, stack has {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Imagery or elevation source failed (unreachable, timed out).
    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateInput(msg.into())
    }

    /// Only backend failures may succeed on a plain re-invocation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_errors_are_retryable() {
        assert!(PipelineError::Backend("timeout".into()).is_retryable());
        assert!(!PipelineError::config("no aoi").is_retryable());
        assert!(!PipelineError::degenerate("one class").is_retryable());
    }

    #[test]
    fn configuration_message_is_verbatim() {
        let e = PipelineError::config("Draw a polygon named \"aoi\"");
        assert_eq!(e.to_string(), "configuration error: Draw a polygon named \"aoi\"");
    }
}
