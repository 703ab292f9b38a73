//! Best-effort event enrichment.
//!
//! An [`Enricher`] looks at a normalized event and returns extra metadata. The
//! normalizer merges the result without overwriting existing keys; a failing
//! enricher is logged and counted, and the event goes through unenriched.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use ironstream_core::event::CanonicalEvent;

use crate::error::EnrichError;

/// Metadata keys read by [`ThreatIntelEnricher`], in order.
pub const IP_FIELDS: &[&str] = &["source_ip", "src_ip"];

/// Set to `"true"` on listed events.
pub const KEY_LISTED: &str = "threat.listed";

/// Name of the list that matched.
pub const KEY_LIST: &str = "threat.list";

/// Adds metadata to a normalized event.
pub trait Enricher: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Returns metadata to merge into the event; empty when nothing applies.
    fn enrich(&self, event: &CanonicalEvent) -> Result<BTreeMap<String, String>, EnrichError>;
}

/// Tags events whose source IP is on a static indicator list
#[derive(Debug, Clone)]
pub struct ThreatIntelEnricher {
    indicators: HashSet<IpAddr>,
    list_name: String,
}

impl ThreatIntelEnricher {
    /// Builds the enricher; entries that are not IP addresses are skipped.
    pub fn new<I, S>(indicators: I, list_name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let indicators = indicators
            .into_iter()
            .filter_map(|s| {
                let s = s.as_ref().trim();
                match s.parse::<IpAddr>() {
                    Ok(ip) => Some(ip),
                    Err(_) => {
                        tracing::warn!(indicator = %s, "skipping threat indicator that is not an IP address");
                        None
                    }
                }
            })
            .collect();
        Self {
            indicators,
            list_name: list_name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

impl Enricher for ThreatIntelEnricher {
    fn name(&self) -> &str {
        "threat_intel"
    }

    fn enrich(&self, event: &CanonicalEvent) -> Result<BTreeMap<String, String>, EnrichError> {
        let Some((field, raw)) = IP_FIELDS
            .iter()
            .find_map(|f| event.metadata().get(*f).map(|v| (*f, v)))
        else {
            return Ok(BTreeMap::new());
        };

        let ip: IpAddr = raw.trim().parse().map_err(|_| EnrichError::InvalidInput {
            field: field.to_owned(),
            reason: format!("'{raw}' is not an IP address"),
        })?;

        let mut out = BTreeMap::new();
        if self.indicators.contains(&ip) {
            out.insert(KEY_LISTED.to_owned(), "true".to_owned());
            out.insert(KEY_LIST.to_owned(), self.list_name.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event_with(key: &str, value: &str) -> CanonicalEvent {
        CanonicalEvent::builder(Utc::now(), "fw", "conn")
            .metadata(key, value)
            .build()
            .unwrap()
    }

    fn enricher() -> ThreatIntelEnricher {
        ThreatIntelEnricher::new(["203.0.113.7", "2001:db8::1", "not-an-ip"], "blocklist")
    }

    #[test]
    fn invalid_indicators_are_skipped() {
        assert_eq!(enricher().len(), 2);
    }

    #[test]
    fn listed_source_ip_is_tagged() {
        let out = enricher()
            .enrich(&event_with("source_ip", "203.0.113.7"))
            .unwrap();
        assert_eq!(out[KEY_LISTED], "true");
        assert_eq!(out[KEY_LIST], "blocklist");

        let out = enricher().enrich(&event_with("src_ip", "2001:db8::1")).unwrap();
        assert_eq!(out[KEY_LISTED], "true");
    }

    #[test]
    fn unlisted_or_absent_ip_adds_nothing() {
        assert!(enricher().enrich(&event_with("source_ip", "10.0.0.1")).unwrap().is_empty());
        assert!(enricher().enrich(&event_with("other", "x")).unwrap().is_empty());
    }

    #[test]
    fn unparseable_ip_is_an_error() {
        let err = enricher()
            .enrich(&event_with("source_ip", "999.1.1.1"))
            .unwrap_err();
        assert!(matches!(err, EnrichError::InvalidInput { ref field, .. } if field == "source_ip"));
    }
}
