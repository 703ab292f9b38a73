//! File connector
//!
//! Appends each batch as newline-delimited records. The file is opened per batch in
//! append mode, so external log rotation needs no coordination.

use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use ironstream_core::pipeline::HealthStatus;
use tokio::io::AsyncWriteExt;

use super::{Connector, LastOutcome};
use crate::batch::EncodedBatch;
use crate::error::DeliveryError;

pub struct FileConnector {
    path: PathBuf,
    outcome: LastOutcome,
}

impl FileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            outcome: LastOutcome::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, batch: &EncodedBatch) -> Result<(), DeliveryError> {
        let endpoint = self.path.display().to_string();
        let mut buf = BytesMut::with_capacity(batch.payload_bytes() + batch.len());
        for record in &batch.records {
            buf.put_slice(record);
            buf.put_u8(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| DeliveryError::connect(&endpoint, &e))?;
        file.write_all(&buf)
            .await
            .map_err(|e| DeliveryError::io(&endpoint, &e))?;
        file.flush()
            .await
            .map_err(|e| DeliveryError::io(&endpoint, &e))?;
        Ok(())
    }
}

impl Connector for FileConnector {
    fn name(&self) -> &str {
        "file"
    }

    async fn send(&self, batch: &EncodedBatch) -> Result<(), DeliveryError> {
        let result = self.append(batch).await;
        self.outcome.record(&result);
        result
    }

    fn health(&self) -> HealthStatus {
        self.outcome.health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ironstream_normalizer::FormatKind;
    use std::sync::Arc;

    fn encoded(seq: u64, records: &[&'static str]) -> EncodedBatch {
        EncodedBatch {
            destination_id: Arc::from("file"),
            sequence: seq,
            records: records.iter().map(|r| Bytes::from_static(r.as_bytes())).collect(),
            format: FormatKind::Ecs,
            compressed: false,
        }
    }

    #[tokio::test]
    async fn appends_batches_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let connector = FileConnector::new(&path);

        connector.send(&encoded(0, &["{\"a\":1}", "{\"a\":2}"])).await.unwrap();
        connector.send(&encoded(1, &["{\"a\":3}"])).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n");
        assert!(connector.health().is_healthy());
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FileConnector::new(dir.path().join("nope").join("out.log"));
        let err = connector.send(&encoded(0, &["x"])).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Connect { .. }));
        assert!(connector.health().is_degraded());
    }
}
