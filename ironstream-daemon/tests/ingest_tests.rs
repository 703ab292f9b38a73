//! NDJSON TCP ingest against a running orchestrator.

use std::time::Duration;

use ironstream_core::config::IronstreamConfig;
use ironstream_daemon::Orchestrator;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn config(max_connections: usize, max_line_bytes: usize) -> IronstreamConfig {
    let mut config = IronstreamConfig::default();
    config.ingest.enabled = true;
    config.ingest.bind = "127.0.0.1:0".to_owned();
    config.ingest.max_connections = max_connections;
    config.ingest.max_line_bytes = max_line_bytes;
    config
}

async fn running(max_connections: usize, max_line_bytes: usize) -> Orchestrator {
    let mut orchestrator = Orchestrator::build_from_config(config(max_connections, max_line_bytes))
        .await
        .unwrap();
    orchestrator.start().await.unwrap();
    orchestrator
}

async fn read_reply(reader: &mut BufReader<TcpStream>) -> Value {
    let mut line = String::new();
    let n = timeout(IO_TIMEOUT, reader.read_line(&mut line))
        .await
        .expect("reply in time")
        .unwrap();
    assert!(n > 0, "connection closed before reply");
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn each_line_gets_one_reply() {
    let mut orchestrator = running(8, 4096).await;
    let addr = orchestrator.ingest_addr().expect("listener bound");

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    reader
        .get_mut()
        .write_all(
            concat!(
                r#"{"timestamp":"2024-05-01T10:00:00Z","source":"sshd","message":"Accepted publickey"}"#,
                "\n",
                "\n",
                "garbage line\r\n",
                "CEF:0|Acme|IDS|1.0|100|Port scan|8|rt=1714557600000 src=10.0.0.5 dvchost=ids-1\n",
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let first = read_reply(&mut reader).await;
    assert_eq!(first["status"], "accepted");
    assert!(first["event_id"].as_str().is_some_and(|id| !id.is_empty()));

    // the blank line is skipped, so the next reply belongs to the garbage line
    let second = read_reply(&mut reader).await;
    assert_eq!(second["status"], "rejected");
    assert_eq!(second["code"], "malformed");

    let third = read_reply(&mut reader).await;
    assert_eq!(third["status"], "accepted");

    drop(reader);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_line_is_rejected_and_connection_closed() {
    let mut orchestrator = running(8, 128).await;
    let addr = orchestrator.ingest_addr().unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    // one byte over the limit, no newline needed for the server to give up
    let payload = vec![b'a'; 129];
    reader.get_mut().write_all(&payload).await.unwrap();

    let reply = read_reply(&mut reader).await;
    assert_eq!(reply["status"], "rejected");
    assert!(reply["detail"].as_str().unwrap().contains("128"));

    let mut rest = Vec::new();
    let closed = timeout(IO_TIMEOUT, reader.read_to_end(&mut rest)).await;
    assert!(closed.is_ok(), "server should close the connection");

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn connections_over_the_limit_are_closed() {
    let mut orchestrator = running(1, 4096).await;
    let addr = orchestrator.ingest_addr().unwrap();

    // hold the only slot, and prove it is being served
    let first = TcpStream::connect(addr).await.unwrap();
    let mut first = BufReader::new(first);
    first
        .get_mut()
        .write_all(b"{\"timestamp\":\"2024-05-01T10:00:00Z\",\"source\":\"a\",\"message\":\"m\"}\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut first).await["status"], "accepted");

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(IO_TIMEOUT, second.read(&mut buf))
        .await
        .expect("second connection should be closed promptly")
        .unwrap_or(0);
    assert_eq!(n, 0);

    drop(first);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let mut orchestrator = running(8, 4096).await;
    let addr = orchestrator.ingest_addr().unwrap();
    let mut idle = TcpStream::connect(addr).await.unwrap();
    // let the listener accept it
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(IO_TIMEOUT, orchestrator.shutdown())
        .await
        .expect("shutdown should not wait for idle clients")
        .unwrap();
    assert!(orchestrator.ingest_addr().is_none());

    let mut buf = [0u8; 8];
    let n = timeout(IO_TIMEOUT, idle.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
}
