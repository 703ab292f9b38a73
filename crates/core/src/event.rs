//! Canonical event: the unit every pipeline stage consumes.
//!
//! A [`CanonicalEvent`] is built once by the normalizer, wrapped in an `Arc`,
//! and then shared read-only between the stream manager and the correlation engine.
//! There are no setters; construction goes through [`CanonicalEventBuilder`].

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::types::{EventRef, Severity};

/// Event type used when the raw event does not carry one.
pub const DEFAULT_EVENT_TYPE: &str = "generic";

/// Canonical field names addressable through [`CanonicalEvent::field`].
pub const CANONICAL_FIELDS: &[&str] = &[
    "id",
    "timestamp",
    "source",
    "event_type",
    "severity",
    "message",
    "user_id",
    "workflow_id",
    "execution_id",
];

/// Optional actor identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl ActorIds {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.workflow_id.is_none() && self.execution_id.is_none()
    }
}

/// Normalized security / audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    id: String,
    timestamp: DateTime<Utc>,
    source: String,
    event_type: String,
    severity: Severity,
    message: String,
    #[serde(default, skip_serializing_if = "ActorIds::is_empty")]
    actors: ActorIds,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    tags: BTreeSet<String>,
}

impl CanonicalEvent {
    /// Starts a builder with the three required fields.
    pub fn builder(
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> CanonicalEventBuilder {
        CanonicalEventBuilder::new(timestamp, source, message)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn actors(&self) -> &ActorIds {
        &self.actors
    }

    pub fn user_id(&self) -> Option<&str> {
        self.actors.user_id.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Looks up a field by path.
    ///
    /// Canonical names (`source`, `severity`, `user_id`, ...) resolve first, then
    /// `metadata.<key>`, then a bare metadata key. `tags` renders comma-joined.
    pub fn field(&self, path: &str) -> Option<Cow<'_, str>> {
        match path {
            "id" => Some(Cow::Borrowed(&self.id)),
            "timestamp" => Some(Cow::Owned(self.timestamp_rfc3339())),
            "source" => Some(Cow::Borrowed(&self.source)),
            "event_type" | "type" => Some(Cow::Borrowed(&self.event_type)),
            "severity" => Some(Cow::Borrowed(self.severity.as_str())),
            "message" => Some(Cow::Borrowed(&self.message)),
            "user_id" => self.actors.user_id.as_deref().map(Cow::Borrowed),
            "workflow_id" => self.actors.workflow_id.as_deref().map(Cow::Borrowed),
            "execution_id" => self.actors.execution_id.as_deref().map(Cow::Borrowed),
            "tags" if !self.tags.is_empty() => Some(Cow::Owned(
                self.tags.iter().cloned().collect::<Vec<_>>().join(","),
            )),
            _ => {
                let key = path.strip_prefix("metadata.").unwrap_or(path);
                self.metadata.get(key).map(|v| Cow::Borrowed(v.as_str()))
            }
        }
    }

    /// RFC 3339 timestamp with millisecond precision and a `Z` suffix.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    /// Rough in-memory size, used for byte-capped buffers.
    pub fn approx_size(&self) -> usize {
        let actors = [
            &self.actors.user_id,
            &self.actors.workflow_id,
            &self.actors.execution_id,
        ]
        .iter()
        .filter_map(|a| a.as_ref().map(String::len))
        .sum::<usize>();
        let metadata: usize = self.metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
        let tags: usize = self.tags.iter().map(String::len).sum();
        std::mem::size_of::<Self>()
            + self.id.len()
            + self.source.len()
            + self.event_type.len()
            + self.message.len()
            + actors
            + metadata
            + tags
    }

    /// Snapshot reference kept on alerts.
    pub fn event_ref(&self) -> EventRef {
        EventRef {
            event_id: self.id.clone(),
            timestamp: self.timestamp,
            event_type: self.event_type.clone(),
        }
    }

    /// Returns a copy with extra metadata merged in. Existing keys are kept.
    ///
    /// Used for enrichment before the event is shared.
    pub fn with_extra_metadata(mut self, extra: BTreeMap<String, String>) -> Self {
        for (key, value) in extra {
            self.metadata.entry(key).or_insert(value);
        }
        self
    }
}

impl fmt::Display for CanonicalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CanonicalEvent[{}] {} {} {} {}: {}",
            self.id.get(..8).unwrap_or(&self.id),
            self.timestamp_rfc3339(),
            self.severity,
            self.source,
            self.event_type,
            self.message,
        )
    }
}

/// Builder for [`CanonicalEvent`]
#[derive(Debug, Clone)]
pub struct CanonicalEventBuilder {
    id: Option<String>,
    timestamp: DateTime<Utc>,
    source: String,
    event_type: Option<String>,
    severity: Severity,
    message: String,
    actors: ActorIds,
    metadata: BTreeMap<String, String>,
    tags: BTreeSet<String>,
}

impl CanonicalEventBuilder {
    pub fn new(
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            source: source.into(),
            event_type: None,
            severity: Severity::default(),
            message: message.into(),
            actors: ActorIds::default(),
            metadata: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Keeps an id carried by the raw event instead of generating one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.actors.user_id = Some(id.into());
        self
    }

    pub fn workflow_id(mut self, id: impl Into<String>) -> Self {
        self.actors.workflow_id = Some(id.into());
        self
    }

    pub fn execution_id(mut self, id: impl Into<String>) -> Self {
        self.actors.execution_id = Some(id.into());
        self
    }

    pub fn actors(mut self, actors: ActorIds) -> Self {
        self.actors = actors;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_map(mut self, map: BTreeMap<String, String>) -> Self {
        self.metadata.extend(map);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builds the event.
    ///
    /// Fails when `source` or `message` is blank. The timestamp is truncated
    /// to millisecond precision; an empty event type becomes `generic`.
    pub fn build(self) -> Result<CanonicalEvent, FormatError> {
        if self.source.trim().is_empty() {
            return Err(FormatError::MissingField("source".to_owned()));
        }
        if self.message.trim().is_empty() {
            return Err(FormatError::MissingField("message".to_owned()));
        }

        let timestamp =
            DateTime::from_timestamp_millis(self.timestamp.timestamp_millis()).unwrap_or(self.timestamp);
        let event_type = self
            .event_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_owned());

        Ok(CanonicalEvent {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            timestamp,
            source: self.source,
            event_type,
            severity: self.severity,
            message: self.message,
            actors: self.actors,
            metadata: self.metadata,
            tags: self.tags,
        })
    }
}
