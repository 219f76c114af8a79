//! Content-Length framing over async byte streams.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by `N` bytes of JSON. The same
//! functions are used by the host on the child's pipes and by a plugin on its own
//! stdin/stdout.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PluginError, Result};

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one framed JSON message and flush.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;

    tracing::trace!(content_length = json.len(), json = %json, "sent plugin message");
    Ok(())
}

/// Read one framed JSON message.
///
/// Returns `Ok(None)` when the stream ends cleanly before a header starts.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut in_headers = false;

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if in_headers {
                return Err(PluginError::ConnectionClosed);
            }
            return Ok(None);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if in_headers {
                break;
            }
            // Stray blank line between frames.
            continue;
        }
        in_headers = true;

        if let Some(len) = trimmed.strip_prefix("Content-Length:") {
            content_length = Some(
                len.trim()
                    .parse()
                    .map_err(|e| PluginError::protocol(format!("invalid Content-Length: {}", e)))?,
            );
        }
    }

    let content_length =
        content_length.ok_or_else(|| PluginError::protocol("missing Content-Length header"))?;
    if content_length > MAX_FRAME_LEN {
        return Err(PluginError::protocol(format!(
            "frame of {} bytes exceeds limit",
            content_length
        )));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            PluginError::ConnectionClosed
        } else {
            PluginError::Io(e)
        }
    })?;

    tracing::trace!(
        content_length,
        json = %String::from_utf8_lossy(&body),
        "received plugin message"
    );

    Ok(Some(serde_json::from_slice(&body)?))
}
