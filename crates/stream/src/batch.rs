//! Sealed batches and their rendered form.

use std::sync::Arc;

use bytes::Bytes;
use ironstream_core::event::CanonicalEvent;
use ironstream_normalizer::FormatKind;

/// A sealed, immutable group of events bound for one destination
///
/// `sequence` increases by one per sealed batch, so a receiver can check FIFO order.
#[derive(Debug, Clone)]
pub struct Batch {
    pub destination_id: Arc<str>,
    pub sequence: u64,
    pub events: Arc<[Arc<CanonicalEvent>]>,
    /// Sum of [`CanonicalEvent::approx_size`] over the events
    pub bytes: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Renders every event in `format`.
    pub fn encode(&self, format: FormatKind, compressed: bool) -> EncodedBatch {
        let wire = format.wire_format();
        EncodedBatch {
            destination_id: Arc::clone(&self.destination_id),
            sequence: self.sequence,
            records: self.events.iter().map(|e| wire.render(e)).collect(),
            format,
            compressed,
        }
    }
}

/// One rendered batch handed to a [`Connector`](crate::connector::Connector)
///
/// Each record is one rendered event without framing; connectors add newlines or
/// octet counts. `compressed` is a request, honoured only by connectors that can.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub destination_id: Arc<str>,
    pub sequence: u64,
    pub records: Vec<Bytes>,
    pub format: FormatKind,
    pub compressed: bool,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn payload_bytes(&self) -> usize {
        self.records.iter().map(Bytes::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn batch(n: usize) -> Batch {
        let events: Vec<Arc<CanonicalEvent>> = (0..n)
            .map(|i| {
                Arc::new(
                    CanonicalEvent::builder(
                        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
                        "web-01",
                        format!("request {i}"),
                    )
                    .build()
                    .unwrap(),
                )
            })
            .collect();
        let bytes = events.iter().map(|e| e.approx_size()).sum();
        Batch {
            destination_id: Arc::from("siem"),
            sequence: 4,
            events: events.into(),
            bytes,
        }
    }

    #[test]
    fn encode_renders_one_record_per_event() {
        let encoded = batch(3).encode(FormatKind::Cef, true);
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded.sequence, 4);
        assert!(encoded.compressed);
        assert!(encoded.records.iter().all(|r| r.starts_with(b"CEF:0|")));
        assert!(encoded.payload_bytes() > 0);
    }

    #[test]
    fn encode_is_deterministic() {
        let b = batch(2);
        assert_eq!(
            b.encode(FormatKind::Syslog, false).records,
            b.encode(FormatKind::Syslog, false).records
        );
    }
}
