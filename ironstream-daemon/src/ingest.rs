//! NDJSON TCP ingest listener
//!
//! Each line is one raw event: a JSON object or a single CEF, LEEF or syslog line.
//! Every non-empty line is answered with one JSON line carrying the
//! [`SubmitOutcome`](crate::submission::SubmitOutcome).
//!
//! Connections beyond `max_connections` are closed on accept. A line longer than
//! `max_line_bytes` is rejected and the connection closed, since the stream can no
//! longer be split reliably.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ironstream_core::config::IngestConfig;
use ironstream_core::metrics as m;

use crate::handle::IronstreamHandle;
use crate::submission::{RejectReason, SubmitOutcome};

/// Connections idle for longer than this are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// A bound listener, ready to accept
pub struct IngestListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
    max_line_bytes: usize,
}

impl IngestListener {
    /// Binds `config.bind`. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(config: &IngestConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            max_connections: config.max_connections.max(1),
            max_line_bytes: config.max_line_bytes.max(1),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts until `cancel` fires, then waits for open connections to finish
    /// their current line.
    pub async fn run(self, handle: IronstreamHandle, cancel: CancellationToken) {
        info!(listen_addr = %self.local_addr, "ingest listener accepting");
        let permits = Arc::new(Semaphore::new(self.max_connections));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        warn!(%peer, max = self.max_connections, "connection limit reached, closing");
                        drop(stream);
                        continue;
                    };

                    let handle = handle.clone();
                    let cancel = cancel.clone();
                    let max_line_bytes = self.max_line_bytes;
                    connections.spawn(async move {
                        metrics::gauge!(m::DAEMON_INGEST_CONNECTIONS).increment(1.0);
                        if let Err(e) = serve(stream, peer, handle, max_line_bytes, cancel).await {
                            debug!(%peer, error = %e, "ingest connection ended with error");
                        }
                        metrics::gauge!(m::DAEMON_INGEST_CONNECTIONS).decrement(1.0);
                        drop(permit);
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = cancel.cancelled() => break,
            }
        }

        drop(self.listener);
        while connections.join_next().await.is_some() {}
        info!("ingest listener stopped");
    }
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    handle: IronstreamHandle,
    max_line_bytes: usize,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    debug!(%peer, "ingest connection opened");
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = Vec::new();
    // one extra byte tells an exact-limit line from an oversized one
    let limit = u64::try_from(max_line_bytes)
        .unwrap_or(u64::MAX)
        .saturating_add(1);

    loop {
        line.clear();
        let read = tokio::select! {
            read = timeout(IDLE_TIMEOUT, read_line(&mut reader, &mut line, limit)) => read,
            _ = cancel.cancelled() => break,
        };
        let n = match read {
            Ok(result) => result?,
            Err(_) => {
                debug!(%peer, "ingest connection idle, closing");
                break;
            }
        };
        if n == 0 {
            break;
        }

        let body = line.strip_suffix(b"\n").unwrap_or(&line);
        let body = body.strip_suffix(b"\r").unwrap_or(body);
        if body.len() > max_line_bytes {
            warn!(%peer, max_line_bytes, "line too long, closing connection");
            let outcome = SubmitOutcome::Rejected(RejectReason::Malformed(format!(
                "line exceeds {max_line_bytes} bytes"
            )));
            respond(&mut write, &outcome).await?;
            break;
        }
        if body.trim_ascii().is_empty() {
            continue;
        }

        let outcome = handle.submit(body).await;
        respond(&mut write, &outcome).await?;
    }

    write.shutdown().await.ok();
    debug!(%peer, "ingest connection closed");
    Ok(())
}

async fn read_line(
    reader: &mut BufReader<OwnedReadHalf>,
    line: &mut Vec<u8>,
    limit: u64,
) -> std::io::Result<usize> {
    let mut bounded = (&mut *reader).take(limit);
    bounded.read_until(b'\n', line).await
}

async fn respond(
    write: &mut OwnedWriteHalf,
    outcome: &SubmitOutcome,
) -> std::io::Result<()> {
    let mut reply = serde_json::to_vec(outcome).map_err(std::io::Error::other)?;
    reply.push(b'\n');
    write.write_all(&reply).await
}
