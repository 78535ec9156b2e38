//! Frame codecs.
//!
//! TCP frames: 4-byte big-endian length prefix followed by the JSON
//! payload. Stdio frames: one UTF-8 JSON message per newline-terminated
//! line, no embedded newlines. Both enforce the configured size cap before
//! allocating.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{TransportError, TransportResult};

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on clean EOF at a frame boundary.
///
/// # Errors
///
/// Returns [`TransportError::MessageSizeExceeded`] when the declared length
/// exceeds `max_bytes`, or an I/O error (a partial frame at EOF surfaces as
/// `UnexpectedEof`).
pub async fn read_length_prefixed<R>(
    reader: &mut R,
    max_bytes: usize,
) -> TransportResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(TransportError::MessageSizeExceeded {
            size: len,
            max: max_bytes,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame.
///
/// # Errors
///
/// Returns an I/O error from the underlying writer.
#[allow(clippy::cast_possible_truncation)]
pub async fn write_length_prefixed<W>(writer: &mut W, payload: &[u8]) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    // Outbound frames are bounded by the response builder, far below u32.
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-terminated frame.
///
/// Returns `Ok(None)` on clean EOF. A non-empty buffer without a trailing
/// newline at EOF is a partial frame and surfaces as `UnexpectedEof`.
///
/// # Errors
///
/// Returns [`TransportError::MessageSizeExceeded`] when the line exceeds
/// `max_bytes`, or an I/O error.
pub async fn read_line_frame<R>(reader: &mut R, max_bytes: usize) -> TransportResult<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    // Cap the read so an unbounded line cannot exhaust memory. The +1
    // leaves room to detect the newline at exactly max_bytes.
    let mut limited = reader.take(max_bytes as u64 + 1);
    let read = limited.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    match line.last() {
        Some(b'\n') => {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > max_bytes {
                return Err(TransportError::MessageSizeExceeded {
                    size: line.len(),
                    max: max_bytes,
                });
            }
            Ok(Some(line))
        },
        _ if read > max_bytes => Err(TransportError::MessageSizeExceeded {
            size: read,
            max: max_bytes,
        }),
        // Partial frame at EOF.
        _ => Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "partial frame at EOF",
        ))),
    }
}

/// Write one newline-terminated frame.
///
/// # Errors
///
/// Returns an I/O error from the underlying writer. The payload must not
/// contain newlines; the JSON serializer upstream guarantees that.
pub async fn write_line_frame<W>(writer: &mut W, payload: &[u8]) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_length_prefixed_roundtrip() {
        let (mut client, server) = tokio::io::duplex(1024);
        let payload = br#"{"jsonrpc":"2.0","id":1}"#;
        write_length_prefixed(&mut client, payload).await.unwrap();
        drop(client);

        let mut server = server;
        let frame = read_length_prefixed(&mut server, 1024).await.unwrap().unwrap();
        assert_eq!(frame, payload);
        assert!(read_length_prefixed(&mut server, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let huge = u32::try_from(2 * 1024 * 1024).unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &huge.to_be_bytes())
            .await
            .unwrap();

        let result = read_length_prefixed(&mut server, 1024 * 1024).await;
        assert!(matches!(
            result,
            Err(TransportError::MessageSizeExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_partial_length_prefixed_frame_is_eof_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let len = 100u32;
        tokio::io::AsyncWriteExt::write_all(&mut client, &len.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, b"only-part")
            .await
            .unwrap();
        drop(client);

        let result = read_length_prefixed(&mut server, 1024).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_line_frame_roundtrip() {
        let (mut client, server) = tokio::io::duplex(1024);
        write_line_frame(&mut client, br#"{"id":1}"#).await.unwrap();
        write_line_frame(&mut client, br#"{"id":2}"#).await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        assert_eq!(
            read_line_frame(&mut reader, 1024).await.unwrap().unwrap(),
            br#"{"id":1}"#
        );
        assert_eq!(
            read_line_frame(&mut reader, 1024).await.unwrap().unwrap(),
            br#"{"id":2}"#
        );
        assert!(read_line_frame(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_line_rejected() {
        let (mut client, server) = tokio::io::duplex(4096);
        let long = vec![b'a'; 200];
        tokio::spawn(async move {
            let _ = write_line_frame(&mut client, &long).await;
        });

        let mut reader = BufReader::new(server);
        let result = read_line_frame(&mut reader, 100).await;
        assert!(matches!(
            result,
            Err(TransportError::MessageSizeExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_partial_line_at_eof() {
        let (mut client, server) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(&mut client, b"no newline")
            .await
            .unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let result = read_line_frame(&mut reader, 1024).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
