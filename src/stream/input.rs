//! Read side of a connection: framed bytes in, JSON documents out.

use tokio::io::{AsyncRead, BufReader};
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::stream::framing::read_frame;
use crate::stream::WIRE_TARGET;

/// Reads Content-Length framed JSON documents from a byte stream.
///
/// Reads are strictly sequential: a caller issues the next
/// [`read_message`](InputStream::read_message) only after the previous one
/// resolved, so frames can never interleave.
pub struct InputStream<R> {
    reader: BufReader<R>,
    config: Config,
}

impl<R> InputStream<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap a readable stream.
    pub fn new(reader: R, config: Config) -> Self {
        Self {
            reader: BufReader::new(reader),
            config,
        }
    }

    /// Read one framed message and parse it as a JSON document.
    ///
    /// # Errors
    ///
    /// - `Error::Io` when the stream fails or reaches EOF
    /// - `Error::Parse` when the header is invalid, the frame is too large,
    ///   or the body is not valid JSON
    pub async fn read_message(&mut self) -> Result<serde_json::Value> {
        let body = read_frame(&mut self.reader, self.config.max_message_size).await?;

        if self.config.echo_wire {
            info!(target: WIRE_TARGET, "<<< {}", String::from_utf8_lossy(&body));
        }

        Ok(serde_json::from_slice(&body)?)
    }

    /// Consume the stream, returning the underlying reader.
    ///
    /// Bytes already buffered but not yet returned as a message are lost.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::stream::framing::encode_frame;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_reads_sequential_messages() {
        let (mut peer, ours) = tokio::io::duplex(4096);
        let mut input = InputStream::new(ours, Config::default());

        peer.write_all(&encode_frame(br#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#))
            .await
            .unwrap();
        peer.write_all(&encode_frame(br#"[1,2,3]"#)).await.unwrap();

        assert_eq!(
            input.read_message().await.unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "result": "pong"})
        );
        assert_eq!(input.read_message().await.unwrap(), json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let (mut peer, ours) = tokio::io::duplex(4096);
        let mut input = InputStream::new(ours, Config::default());

        peer.write_all(&encode_frame(b"{\"jsonrpc\":")).await.unwrap();

        assert!(matches!(input.read_message().await, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_respects_configured_limit() {
        let (mut peer, ours) = tokio::io::duplex(4096);
        let mut input = InputStream::new(ours, Config::default().with_max_message_size(4));

        peer.write_all(&encode_frame(b"[1,2,3]")).await.unwrap();

        assert!(matches!(input.read_message().await, Err(Error::Parse(_))));
    }
}
