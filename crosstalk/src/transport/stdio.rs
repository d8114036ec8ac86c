//! Stdio transport: newline-delimited JSON over stdin/stdout.
//!
//! One JSON document per `\n`-terminated line. The writer flushes after
//! every frame so a peer reading a pipe never waits on a buffered frame.
//! Stderr is never touched here; it belongs to human-readable diagnostics
//! (the tracing subscriber), and protocol frames must not leak into it.
//!
//! The reader enforces a byte limit per line *while reading*: a peer that
//! streams bytes without ever sending a newline cannot make this process
//! allocate without bound. Oversized lines are drained and skipped.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::mpsc;

use crosstalk_core::error::ProtocolError;
use crosstalk_core::jsonrpc::MAX_FRAME_BYTES;

use super::{CloseReason, Connection, FrameSink, Transport, TransportEvent, EVENT_QUEUE_DEPTH};

/// Line-level read failures.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    /// The line exceeded the byte limit before a newline appeared.
    #[error("line exceeds {max_bytes} bytes")]
    TooLong {
        /// The enforced limit.
        max_bytes: usize,
    },
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stdio transport. No configuration beyond the frame size limit.
#[derive(Debug)]
pub struct StdioTransport {
    max_frame_bytes: usize,
}

impl StdioTransport {
    /// Create a stdio transport with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }

    /// Override the frame size limit.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<Connection, ProtocolError> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let max_frame_bytes = self.max_frame_bytes;

        tokio::spawn(async move {
            read_loop(BufReader::new(tokio::io::stdin()), tx, max_frame_bytes).await;
        });

        Ok(Connection {
            sink: Box::new(StdoutSink {
                stdout: tokio::io::stdout(),
                closed: false,
            }),
            events: rx,
        })
    }
}

/// Read NDJSON lines until EOF or an unrecoverable I/O error, pushing each
/// complete line into the event queue.
async fn read_loop<R: AsyncBufRead + Unpin>(
    mut reader: R,
    tx: mpsc::Sender<TransportEvent>,
    max_frame_bytes: usize,
) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match bounded_read_line(&mut reader, &mut buf, max_frame_bytes).await {
            Ok(0) => {
                let _ = tx.send(TransportEvent::Closed(CloseReason::Eof)).await;
                return;
            }
            Ok(_) => {
                // Strip the terminator; blank keep-alive lines carry nothing.
                while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                if buf.is_empty() {
                    continue;
                }
                if tx
                    .send(TransportEvent::Frame(Bytes::copy_from_slice(&buf)))
                    .await
                    .is_err()
                {
                    // Session went away; stop reading.
                    return;
                }
            }
            Err(LineError::TooLong { max_bytes }) => {
                tracing::warn!(max_bytes, "dropping oversized stdin line");
            }
            Err(LineError::Io(e)) => {
                let _ = tx
                    .send(TransportEvent::Closed(CloseReason::ReadError(e.to_string())))
                    .await;
                return;
            }
        }
    }
}

/// Read a single line, enforcing a byte limit.
///
/// Unlike bare `read_until`, this will not accumulate unbounded memory when
/// the peer never sends a newline: once the limit is crossed, the remainder
/// of the line is drained and [`LineError::TooLong`] is returned, leaving
/// the reader positioned at the start of the next line.
///
/// Returns `Ok(0)` at EOF.
///
/// # Errors
///
/// [`LineError::TooLong`] past the limit, [`LineError::Io`] on read failure.
pub async fn bounded_read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, LineError> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total); // EOF
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let take = pos + 1;
                if total + take > max_bytes {
                    reader.consume(take);
                    return Err(LineError::TooLong {
                        max_bytes,
                    });
                }
                buf.extend_from_slice(&available[..take]);
                total += take;
                reader.consume(take);
                return Ok(total);
            }
            None => {
                let len = available.len();
                if total + len > max_bytes {
                    reader.consume(len);
                    drain_until_newline(reader).await?;
                    return Err(LineError::TooLong {
                        max_bytes,
                    });
                }
                buf.extend_from_slice(available);
                total += len;
                reader.consume(len);
            }
        }
    }
}

/// Skip bytes until the next newline or EOF, so the reader recovers at the
/// following line after an oversized one.
async fn drain_until_newline<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<(), LineError> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

struct StdoutSink {
    stdout: Stdout,
    closed: bool,
}

#[async_trait]
impl FrameSink for StdoutSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::TransportClosed);
        }
        let write = async {
            self.stdout.write_all(&frame).await?;
            self.stdout.write_all(b"\n").await?;
            self.stdout.flush().await
        };
        write.await.map_err(|e| ProtocolError::Write {
            details: e.to_string(),
        })
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if !self.closed {
            self.closed = true;
            let _ = self.stdout.flush().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_bounded_read_line_reads_lines() {
        let mut reader = BufReader::new(Cursor::new(b"{\"a\":1}\n{\"b\":2}\n".to_vec()));
        let mut buf = Vec::new();

        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(&buf[..n], b"{\"a\":1}\n");

        buf.clear();
        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(&buf[..n], b"{\"b\":2}\n");

        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bounded_read_line_no_trailing_newline() {
        let mut reader = BufReader::new(Cursor::new(b"{\"a\":1}".to_vec()));
        let mut buf = Vec::new();
        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(&buf[..n], b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_bounded_read_line_oversized_recovers_at_next_line() {
        let mut input = vec![b'x'; 64];
        input.push(b'\n');
        input.extend_from_slice(b"{\"ok\":true}\n");
        let mut reader = BufReader::new(Cursor::new(input));
        let mut buf = Vec::new();

        let err = bounded_read_line(&mut reader, &mut buf, 16).await.unwrap_err();
        assert!(matches!(err, LineError::TooLong { max_bytes: 16 }));

        buf.clear();
        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(&buf[..n], b"{\"ok\":true}\n");
    }

    #[tokio::test]
    async fn test_bounded_read_line_oversized_without_newline_hits_eof() {
        let input = vec![b'x'; 64];
        let mut reader = BufReader::new(Cursor::new(input));
        let mut buf = Vec::new();

        let err = bounded_read_line(&mut reader, &mut buf, 16).await.unwrap_err();
        assert!(matches!(err, LineError::TooLong { .. }));

        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 16).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_loop_pushes_frames_and_eof() {
        let (tx, mut rx) = mpsc::channel(8);
        let reader = BufReader::new(Cursor::new(b"{\"a\":1}\r\n\n{\"b\":2}\n".to_vec()));
        read_loop(reader, tx, 1024).await;

        let Some(TransportEvent::Frame(first)) = rx.recv().await else {
            panic!("expected frame");
        };
        assert_eq!(first.as_ref(), b"{\"a\":1}");

        // The blank line is skipped.
        let Some(TransportEvent::Frame(second)) = rx.recv().await else {
            panic!("expected frame");
        };
        assert_eq!(second.as_ref(), b"{\"b\":2}");

        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Closed(CloseReason::Eof))
        ));
    }
}
