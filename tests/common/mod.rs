//! Shared helpers for integration tests.
//!
//! A [`Peer`] is the raw far end of a connection: it reads and writes
//! frames directly so tests can assert on the exact bytes a client sends.

#![allow(dead_code)]

use std::time::Duration;

use jsonrpc_conduit::stream::{encode_frame, read_frame};
use serde_json::Value;
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::time::timeout;

/// Test timeout to prevent hanging tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber; `RUST_LOG` controls the output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Create a connected stream pair: one end for the code under test, one for the peer.
pub fn connection() -> (DuplexStream, Peer) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    (ours, Peer::new(theirs))
}

/// The far end of a connection, speaking raw frames.
pub struct Peer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Read one frame and parse its body.
    pub async fn recv(&mut self) -> Value {
        let body = timeout(TEST_TIMEOUT, read_frame(&mut self.reader, 1 << 20))
            .await
            .expect("Test timed out")
            .expect("Read failed");
        serde_json::from_slice(&body).expect("Peer received invalid JSON")
    }

    /// Read one frame by hand, returning the header block and the raw body.
    pub async fn recv_raw(&mut self) -> (String, Vec<u8>) {
        timeout(TEST_TIMEOUT, async {
            let mut header = String::new();
            let mut length = None;
            loop {
                let mut line = String::new();
                self.reader.read_line(&mut line).await.expect("Read failed");
                header.push_str(&line);
                if line == "\r\n" {
                    break;
                }
                if let Some(value) = line.strip_prefix("Content-Length: ") {
                    length = Some(value.trim().parse::<usize>().expect("Bad length"));
                }
            }
            let mut body = vec![0u8; length.expect("Missing Content-Length")];
            self.reader.read_exact(&mut body).await.expect("Read failed");
            (header, body)
        })
        .await
        .expect("Test timed out")
    }

    /// Frame and send a JSON document.
    pub async fn send(&mut self, message: Value) {
        let body = serde_json::to_vec(&message).unwrap();
        self.send_bytes(&encode_frame(&body)).await;
    }

    /// Send bytes exactly as given, framing included.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("Write failed");
        self.writer.flush().await.expect("Flush failed");
    }

    /// Answer a request with a result, echoing its id.
    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": request["id"].clone(),
            "result": result
        }))
        .await;
    }
}
