//! Error types shared across the workspace.
//!
//! Each crate owns a domain error (`StreamError`, `CorrelationError`, ...) that converts
//! into [`IronstreamError`] so upper layers can propagate with `?`.

/// Ironstream top-level error type
#[derive(Debug, thiserror::Error)]
pub enum IronstreamError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Lifecycle / channel error
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Malformed event
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Stream manager error (backpressure, unknown destination, ...)
    #[error("stream error: {0}")]
    Stream(String),

    /// Correlation engine error (rule validation, rule loading, ...)
    #[error("correlation error: {0}")]
    Correlation(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Config file could not be parsed
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A value is out of range or inconsistent
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Lifecycle and channel errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Channel send failed (receiver gone)
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// Channel receive failed (sender gone)
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// Component failed to initialise
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// `start()` called twice
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// `stop()` called before `start()`
    #[error("pipeline is not running")]
    NotRunning,
}

/// A raw event could not be turned into a canonical event.
///
/// Format errors are local to one event: the event is dropped and logged,
/// and the submitter receives a rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// A required field (timestamp, source, message) is absent or empty
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// The payload does not follow the expected format
    #[error("malformed {format} payload at offset {offset}: {reason}")]
    Malformed {
        format: String,
        offset: usize,
        reason: String,
    },

    /// Payload larger than the configured limit
    #[error("payload too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// No parser recognises the payload
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl FormatError {
    /// Short rejection reason used in metrics labels and submit results.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::Malformed { .. } | Self::UnsupportedFormat(_) => "malformed",
            Self::TooLarge { .. } => "too_large",
        }
    }

    /// Shorthand for [`FormatError::Malformed`].
    pub fn malformed(format: &str, offset: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            format: format.to_owned(),
            offset,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_converts_to_top_level() {
        let err: IronstreamError = FormatError::MissingField("source".to_owned()).into();
        assert!(matches!(err, IronstreamError::Format(_)));
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            FormatError::MissingField("timestamp".to_owned()).reason_code(),
            "missing_field"
        );
        assert_eq!(
            FormatError::malformed("json", 3, "bad token").reason_code(),
            "malformed"
        );
        assert_eq!(
            FormatError::TooLarge { size: 10, max: 5 }.reason_code(),
            "too_large"
        );
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "destinations[0].batch_size".to_owned(),
            reason: "must be 1-100000".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("batch_size"));
        assert!(msg.contains("100000"));
    }
}
