//! UDP syslog connector
//!
//! Sends each record as its own datagram. The socket is bound lazily on the first
//! batch and rebuilt after a send error.

use ironstream_core::pipeline::HealthStatus;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use super::{Connector, LastOutcome};
use crate::batch::EncodedBatch;
use crate::error::DeliveryError;

/// Largest payload that fits a single IPv4 UDP datagram.
pub const MAX_DATAGRAM: usize = 65_507;

pub struct UdpSyslogConnector {
    endpoint: String,
    socket: Mutex<Option<UdpSocket>>,
    outcome: LastOutcome,
}

impl UdpSyslogConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            socket: Mutex::new(None),
            outcome: LastOutcome::default(),
        }
    }

    async fn send_records(&self, batch: &EncodedBatch) -> Result<(), DeliveryError> {
        if let Some(oversized) = batch.records.iter().find(|r| r.len() > MAX_DATAGRAM) {
            return Err(DeliveryError::Rejected(format!(
                "record of {} bytes exceeds the {MAX_DATAGRAM} byte datagram limit",
                oversized.len()
            )));
        }

        let mut guard = self.socket.lock().await;
        if guard.is_none() {
            let bind = if self.endpoint.starts_with('[') {
                "[::]:0"
            } else {
                "0.0.0.0:0"
            };
            let socket = UdpSocket::bind(bind)
                .await
                .map_err(|e| DeliveryError::connect(&self.endpoint, &e))?;
            socket
                .connect(&self.endpoint)
                .await
                .map_err(|e| DeliveryError::connect(&self.endpoint, &e))?;
            *guard = Some(socket);
        }
        let Some(socket) = guard.as_ref() else {
            return Err(DeliveryError::Rejected("socket unavailable".to_owned()));
        };
        for record in &batch.records {
            if let Err(e) = socket.send(record).await {
                *guard = None;
                return Err(DeliveryError::io(&self.endpoint, &e));
            }
        }
        Ok(())
    }
}

impl Connector for UdpSyslogConnector {
    fn name(&self) -> &str {
        "udp-syslog"
    }

    async fn send(&self, batch: &EncodedBatch) -> Result<(), DeliveryError> {
        let result = self.send_records(batch).await;
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

    fn encoded(records: Vec<Bytes>) -> EncodedBatch {
        EncodedBatch {
            destination_id: Arc::from("udp"),
            sequence: 0,
            records,
            format: FormatKind::Syslog,
            compressed: false,
        }
    }

    #[tokio::test]
    async fn one_datagram_per_record() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let connector = UdpSyslogConnector::new(addr.to_string());

        connector
            .send(&encoded(vec![
                Bytes::from_static(b"<134>1 first"),
                Bytes::from_static(b"<134>1 second"),
            ]))
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<134>1 first");
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<134>1 second");
        assert!(connector.health().is_healthy());
    }

    #[tokio::test]
    async fn oversized_record_is_rejected() {
        let connector = UdpSyslogConnector::new("127.0.0.1:9");
        let big = Bytes::from(vec![b'x'; MAX_DATAGRAM + 1]);
        let err = connector.send(&encoded(vec![big])).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected(_)));
    }
}
