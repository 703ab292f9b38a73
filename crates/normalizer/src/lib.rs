//! Ironstream normalizer -- raw events in, canonical events out, wire formats back.
//!
//! # Modules
//!
//! - [`normalizer`]: [`Normalizer`], the prefix-routing entry point
//! - [`json`]: configurable JSON field mapping
//! - [`format`]: the [`WireFormat`] trait and the CEF, LEEF, ECS and syslog formats
//! - [`enrich`]: best-effort [`Enricher`]s ([`ThreatIntelEnricher`])
//! - [`severity`]: severity ↔ numeric scales
//! - [`error`]: [`EnrichError`]
//!
//! # Flow
//!
//! ```text
//! raw bytes -> Normalizer -> { JsonMapper | EcsFormat | CefFormat | LeefFormat | SyslogFormat }
//!                         -> Enricher (optional) -> CanonicalEvent
//! CanonicalEvent -> FormatKind::wire_format().render() -> bytes for a destination
//! ```

pub mod enrich;
pub mod error;
pub mod format;
pub mod json;
pub mod normalizer;
pub mod severity;

pub use enrich::{Enricher, ThreatIntelEnricher};
pub use error::EnrichError;
pub use format::{FormatKind, WireFormat, render};
pub use json::{FieldMapping, JsonMapper};
pub use normalizer::{Normalizer, NormalizerBuilder};
