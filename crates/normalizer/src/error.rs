//! Normalizer error types
//!
//! Parse and mapping failures are reported as [`FormatError`](ironstream_core::error::FormatError)
//! from the core crate. [`EnrichError`] covers the best-effort enrichment step and
//! never escapes [`Normalizer::normalize`](crate::Normalizer::normalize).

/// Enrichment failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    /// A field the enricher reads holds an unusable value
    #[error("invalid input in '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    /// The enrichment backend could not answer
    #[error("enrichment source unavailable: {0}")]
    Unavailable(String),
}
