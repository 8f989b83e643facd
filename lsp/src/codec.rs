//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! This module provides [`FrameReader`] and [`FrameWriter`] for blocking
//! reading and writing of framed message bodies. Bodies are handled as raw
//! bytes; JSON parsing happens one layer up in the protocol client.

use std::io::{BufRead, Read, Write};

use crate::error::LspError;

/// Default upper bound on a single message body (16 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

/// Reads framed message bodies from a buffered reader.
pub struct FrameReader<R> {
    reader: R,
    limit: usize,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R, limit: usize) -> Self {
        Self { reader, limit }
    }

    /// Read the next message body.
    ///
    /// Returns `Ok(None)` on a clean EOF before any header byte was read.
    /// Blocks until the declared number of body bytes has arrived.
    pub fn read_message(&mut self) -> Result<Option<Vec<u8>>, LspError> {
        let Some(length) = self.read_headers()? else {
            return Ok(None);
        };

        if length > self.limit {
            // Skip the body so the next read starts at a frame boundary.
            std::io::copy(
                &mut (&mut self.reader).take(length as u64),
                &mut std::io::sink(),
            )?;
            return Err(LspError::MessageTooLarge {
                length,
                limit: self.limit,
            });
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                LspError::UnexpectedEof
            } else {
                LspError::Io(e)
            }
        })?;

        Ok(Some(body))
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    fn read_headers(&mut self) -> Result<Option<usize>, LspError> {
        let mut content_length: Option<usize> = None;
        let mut line = Vec::with_capacity(64);
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut line)?;

            if bytes_read == 0 {
                // Clean shutdown only if nothing of this frame was read yet.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(LspError::UnexpectedEof);
            }
            saw_any_header_bytes = true;

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case(CONTENT_LENGTH)
            {
                let value = value.trim();
                let len = value
                    .parse::<usize>()
                    .map_err(|_| LspError::InvalidContentLength(value.to_string()))?;
                content_length = Some(len);
            }
            // Other headers (Content-Type) are ignored.
        }

        content_length.map(Some).ok_or(LspError::MissingContentLength)
    }
}

/// Writes framed message bodies.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write `Content-Length: N\r\n\r\n` followed by exactly `N` body bytes.
    pub fn write_message(&mut self, body: &[u8]) -> std::io::Result<()> {
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes())?;
        self.writer.write_all(body)?;
        self.writer.flush()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}

/// Encode a body into a complete frame.
#[must_use]
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut out = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(body);
    out
}
