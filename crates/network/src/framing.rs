//! Newline-delimited framing.
//!
//! Bytes arrive in arbitrary chunks: several messages may share one read and
//! a message may be split across reads. [`LineBuffer`] holds the incomplete
//! tail until its terminator shows up.

use berkeley_types::{encode_line, LINE_DELIMITER};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::error::NetworkError;

/// Longest line accepted before the partial data is thrown away.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4 * 1024;

/// Accumulates raw bytes and yields complete lines without their terminator.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_LINE_BYTES && !self.buf.contains(&LINE_DELIMITER) {
            warn!(
                "discarding {} bytes of an oversized line (limit {} bytes)",
                self.buf.len(),
                MAX_LINE_BYTES
            );
            self.buf.clear();
            self.discarding = true;
        }
    }

    /// Next complete, non-empty line. A trailing `\r` is stripped.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let end = self.buf.iter().position(|&b| b == LINE_DELIMITER)?;
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            line.pop();

            if self.discarding {
                // Remainder of an oversized line.
                self.discarding = false;
                continue;
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(line);
        }
    }

    /// Bytes buffered but not yet terminated.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Drives a [`LineBuffer`] from an async byte stream.
pub struct LineReader<R> {
    reader: R,
    buffer: LineBuffer,
    chunk: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: LineBuffer::new(),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Next complete line, or `None` once the peer has closed the stream.
    /// An unterminated fragment left at EOF is dropped.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(line) = self.buffer.next_line() {
                return Ok(Some(line));
            }
            let read = self.reader.read(&mut self.chunk).await?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend(&self.chunk[..read]);
        }
    }
}

/// Encode `message` as one JSON line and flush it to `writer`.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = encode_line(message)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
