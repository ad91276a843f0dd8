//! Content-Length framing shared by both directions of a connection.
//!
//! Each body is preceded by a header block terminated by a blank line. Only
//! `Content-Length` is interpreted; any other header is skipped.
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header names match case-insensitively and bare LF line endings are accepted.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Error, Result};

/// Name of the only header this transport requires.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Build a complete frame: header, blank line, body.
///
/// The declared length is the byte length of `body`, so multi-byte UTF-8
/// content is counted in bytes, not characters.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Read one Content-Length framed body from the stream.
///
/// # Protocol
///
/// 1. Read headers until an empty line (handles both CRLF and LF)
/// 2. Extract Content-Length header (case-insensitive)
/// 3. Read exactly that many bytes for the body
///
/// # Errors
///
/// - `Error::Io` if the stream is closed (EOF) or a read fails
/// - `Error::Parse` if no valid Content-Length header is found or it
///   exceeds `max_message_size`
pub async fn read_frame<R>(reader: &mut R, max_message_size: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;

        // EOF - connection closed
        if bytes_read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Connection closed by peer",
            )
            .into());
        }

        let trimmed = line.trim();

        // Empty line signals end of headers
        if trimmed.is_empty() {
            break;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let value = value.trim();
                content_length = Some(value.parse().map_err(|_| {
                    Error::Parse(format!("Invalid Content-Length value: {}", value))
                })?);
            }
            // Ignore other headers (e.g., Content-Type)
        }
    }

    let size =
        content_length.ok_or_else(|| Error::Parse("Missing Content-Length header".to_string()))?;

    if size > max_message_size {
        return Err(Error::Parse(format!(
            "Message size {} exceeds maximum {} bytes",
            size, max_message_size
        )));
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::time::timeout;

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    const MAX: usize = 1024 * 1024;

    #[test]
    fn test_encode_frame_counts_bytes() {
        let body = r#"{"jsonrpc":"2.0","method":"test"}"#;
        let frame = encode_frame(body.as_bytes());
        let expected = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        assert_eq!(frame, expected.as_bytes());

        // "é" and "漢" are multi-byte in UTF-8
        let body = r#"{"text":"é漢"}"#;
        let frame = encode_frame(body.as_bytes());
        let header = String::from_utf8(frame[..frame.len() - body.len()].to_vec()).unwrap();
        assert_eq!(header, "Content-Length: 16\r\n\r\n");
        assert_eq!(body.len(), 16);
        assert_ne!(body.chars().count(), body.len());
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (mut client, server) = tokio::io::duplex(4096);
        let message = r#"{"jsonrpc":"2.0","method":"test","id":1}"#;

        client
            .write_all(&encode_frame(message.as_bytes()))
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(server);
        let received = timeout(TEST_TIMEOUT, read_frame(&mut reader, MAX))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, message.as_bytes());
    }

    #[tokio::test]
    async fn test_read_missing_content_length() {
        let (mut client, server) = tokio::io::duplex(4096);

        client.write_all(b"Content-Type: x\r\n\r\n").await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let result = timeout(TEST_TIMEOUT, read_frame(&mut reader, MAX))
            .await
            .expect("Test timed out");

        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("Missing Content-Length"),
            "Expected 'Missing Content-Length' error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_read_handles_lf_only() {
        let (mut client, server) = tokio::io::duplex(4096);

        let body = r#"{"test":true}"#;
        let raw = format!("Content-Length: {}\n\n{}", body.len(), body);
        client.write_all(raw.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(server);
        let received = timeout(TEST_TIMEOUT, read_frame(&mut reader, MAX))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, body.as_bytes());
    }

    #[tokio::test]
    async fn test_read_case_insensitive_header() {
        let (mut client, server) = tokio::io::duplex(4096);

        let body = r#"{"test":true}"#;
        let raw = format!(
            "content-length: {}\r\nContent-Type: application/json\r\n\r\n{}",
            body.len(),
            body
        );
        client.write_all(raw.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(server);
        let received = timeout(TEST_TIMEOUT, read_frame(&mut reader, MAX))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, body.as_bytes());
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_message() {
        let (mut client, server) = tokio::io::duplex(4096);

        let raw = format!("Content-Length: {}\r\n\r\n", 65);
        client.write_all(raw.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(server);
        let result = timeout(TEST_TIMEOUT, read_frame(&mut reader, 64))
            .await
            .expect("Test timed out");

        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("exceeds maximum"),
            "Expected size error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_read_rejects_invalid_length() {
        let (mut client, server) = tokio::io::duplex(4096);

        client.write_all(b"Content-Length: ten\r\n\r\n").await.unwrap();

        let mut reader = BufReader::new(server);
        let result = timeout(TEST_TIMEOUT, read_frame(&mut reader, MAX))
            .await
            .expect("Test timed out");

        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_connection_closed_returns_error() {
        let (client, server) = tokio::io::duplex(4096);
        drop(client);

        let mut reader = BufReader::new(server);
        let result = timeout(TEST_TIMEOUT, read_frame(&mut reader, MAX))
            .await
            .expect("Test timed out");

        match result {
            Err(Error::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("Expected EOF error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_body_returns_error() {
        let (mut client, server) = tokio::io::duplex(4096);

        client
            .write_all(b"Content-Length: 20\r\n\r\n{\"short\":1}")
            .await
            .unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let result = timeout(TEST_TIMEOUT, read_frame(&mut reader, MAX))
            .await
            .expect("Test timed out");

        assert!(matches!(result, Err(Error::Io(_))));
    }
}
