//! TCP syslog connector
//!
//! Keeps one connection open between batches. Any connect, write or flush error
//! drops the connection so the next attempt reconnects from scratch.

use bytes::{BufMut, BytesMut};
use ironstream_core::pipeline::HealthStatus;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{Connector, LastOutcome};
use crate::batch::EncodedBatch;
use crate::config::Framing;
use crate::error::DeliveryError;

pub struct TcpSyslogConnector {
    endpoint: String,
    framing: Framing,
    stream: Mutex<Option<TcpStream>>,
    outcome: LastOutcome,
}

impl TcpSyslogConnector {
    pub fn new(endpoint: impl Into<String>, framing: Framing) -> Self {
        Self {
            endpoint: endpoint.into(),
            framing,
            stream: Mutex::new(None),
            outcome: LastOutcome::default(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn write_batch(&self, payload: &[u8]) -> Result<(), DeliveryError> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            let stream = TcpStream::connect(&self.endpoint)
                .await
                .map_err(|e| DeliveryError::connect(&self.endpoint, &e))?;
            // best effort; Nagle only adds latency for small batches
            let _ = stream.set_nodelay(true);
            tracing::debug!(endpoint = %self.endpoint, "tcp connector connected");
            *guard = Some(stream);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(DeliveryError::Rejected("connection unavailable".to_owned()));
        };
        let written = match stream.write_all(payload).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            *guard = None;
            tracing::debug!(endpoint = %self.endpoint, error = %e, "tcp connection dropped");
            return Err(DeliveryError::io(&self.endpoint, &e));
        }
        Ok(())
    }
}

/// Frames every record of `batch` into one contiguous buffer.
pub fn frame_records(batch: &EncodedBatch, framing: Framing) -> BytesMut {
    let mut buf = BytesMut::with_capacity(batch.payload_bytes() + batch.len() * 8);
    for record in &batch.records {
        match framing {
            Framing::Newline => {
                buf.put_slice(record);
                buf.put_u8(b'\n');
            }
            Framing::OctetCounting => {
                buf.put_slice(record.len().to_string().as_bytes());
                buf.put_u8(b' ');
                buf.put_slice(record);
            }
        }
    }
    buf
}

impl Connector for TcpSyslogConnector {
    fn name(&self) -> &str {
        "tcp-syslog"
    }

    async fn send(&self, batch: &EncodedBatch) -> Result<(), DeliveryError> {
        let payload = frame_records(batch, self.framing);
        let result = self.write_batch(&payload).await;
        self.outcome.record(&result);
        result
    }

    fn health(&self) -> HealthStatus {
        self.outcome.health()
    }
}
