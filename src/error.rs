//! Error types for the discovery engine.

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Range expression matched none of the accepted forms.
    #[error("invalid range format: {0}")]
    InvalidRangeFormat(String),

    #[error("invalid prefix length: /{0} (must be 0-32)")]
    InvalidPrefixLength(u32),

    #[error("invalid range: start {start} is after end {end}")]
    StartAfterEnd { start: String, end: String },

    #[error("scan not found: {0}")]
    ScanNotFound(String),

    /// A single probe failed; callers recover locally.
    #[error("probe failed: {0}")]
    Probe(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// True for errors caused by bad caller input (range parsing).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ScanError::InvalidRangeFormat(_)
                | ScanError::InvalidPrefixLength(_)
                | ScanError::StartAfterEnd { .. }
        )
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::InvalidRangeFormat(_) => "INVALID_RANGE_FORMAT",
            ScanError::InvalidPrefixLength(_) => "INVALID_PREFIX_LENGTH",
            ScanError::StartAfterEnd { .. } => "START_AFTER_END",
            ScanError::ScanNotFound(_) => "SCAN_NOT_FOUND",
            ScanError::Probe(_) => "PROBE_ERROR",
            ScanError::Http(_) => "HTTP_ERROR",
            ScanError::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_errors_are_input_errors() {
        assert!(ScanError::InvalidRangeFormat("x".into()).is_input_error());
        assert!(ScanError::InvalidPrefixLength(40).is_input_error());
        assert!(ScanError::StartAfterEnd {
            start: "10.0.0.9".into(),
            end: "10.0.0.1".into()
        }
        .is_input_error());
        assert!(!ScanError::ScanNotFound("abc".into()).is_input_error());
    }
}
