use std::time::Duration;

use bytes::{Bytes, BytesMut};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{decode_length, FrameConfig, CODE_SIZE, FAIL, LENGTH_PREFIX_SIZE};
use crate::error::{FrameError, Result};

/// A line matched by [`FrameReader::search_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    /// The full line, without its terminator.
    pub line: String,
    /// Capture groups; index 0 is the whole match.
    pub groups: Vec<Option<String>>,
}

impl LineMatch {
    /// Capture group `index`, if it participated in the match.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }
}

/// Reads protocol primitives from any `AsyncRead` stream.
///
/// Handles partial reads internally. Once the stream ends, any read the
/// buffered bytes cannot satisfy fails with [`FrameError::PrematureEof`]
/// and discards the partial data, so every later read fails the same way.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    ended: bool,
    last_request: Option<String>,
    config: FrameConfig,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(config.chunk_size),
            ended: false,
            last_request: None,
            config,
        }
    }

    /// Pull more bytes into the buffer. Returns `false` once the stream ended.
    ///
    /// Cancel-safe: bytes are only ever appended by a single `read_buf`.
    async fn fill(&mut self) -> Result<bool> {
        if self.ended {
            return Ok(false);
        }
        self.buf.reserve(self.config.chunk_size);
        let read = self.inner.read_buf(&mut self.buf).await?;
        if read == 0 {
            trace!(buffered = self.buf.len(), "stream ended");
            self.ended = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn premature_eof(&mut self, wanted: usize) -> FrameError {
        let missing = wanted.saturating_sub(self.buf.len());
        self.buf.clear();
        FrameError::PrematureEof { missing }
    }

    /// Read exactly `n` bytes.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        while self.buf.len() < n {
            if !self.fill().await? {
                return Err(self.premature_eof(n));
            }
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read exactly `n` bytes and decode them as ASCII text.
    pub async fn read_ascii(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read up to the next `\n`, dropping the terminator and a trailing `\r`.
    ///
    /// Fails with [`FrameError::PayloadTooLarge`] once more than
    /// `max_line_length` bytes arrive without a terminator.
    pub async fn read_line(&mut self) -> Result<Bytes> {
        let mut scanned = 0usize;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(scanned + pos + 1);
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(line.freeze());
            }
            scanned = self.buf.len();
            if scanned > self.config.max_line_length {
                return Err(FrameError::PayloadTooLarge {
                    size: scanned,
                    max: self.config.max_line_length,
                });
            }
            if !self.fill().await? {
                return Err(self.premature_eof(self.buf.len() + 1));
            }
        }
    }

    /// Read lines until one matches `pattern`.
    pub async fn search_line(&mut self, pattern: &Regex) -> Result<LineMatch> {
        loop {
            let raw = self.read_line().await?;
            let line = String::from_utf8_lossy(&raw);
            if let Some(caps) = pattern.captures(&line) {
                let groups = caps
                    .iter()
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect();
                return Ok(LineMatch {
                    line: line.into_owned(),
                    groups,
                });
            }
        }
    }

    /// Read a length-prefixed value (4 ASCII hex digits, then that many bytes).
    pub async fn read_value(&mut self) -> Result<Bytes> {
        let prefix = self.read_bytes(LENGTH_PREFIX_SIZE).await?;
        let len = decode_length(&prefix)?;
        if len > self.config.max_value_length {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.config.max_value_length,
            });
        }
        self.read_bytes(len).await
    }

    /// Relay exactly `n` bytes into `sink` without buffering the whole payload.
    pub async fn read_byte_flow<W>(&mut self, n: usize, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut remaining = n;
        while remaining > 0 {
            if self.buf.is_empty() && !self.fill().await? {
                return Err(self.premature_eof(remaining));
            }
            let take = remaining.min(self.buf.len());
            let chunk = self.buf.split_to(take);
            sink.write_all(&chunk).await?;
            remaining -= take;
        }
        Ok(())
    }

    /// Read whatever is available, up to `max` bytes. `None` at end of stream.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` arm.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>> {
        if self.buf.is_empty() && !self.fill().await? {
            return Ok(None);
        }
        let take = max.min(self.buf.len());
        Ok(Some(self.buf.split_to(take).freeze()))
    }

    /// Drain the stream until it ends naturally.
    pub async fn read_all(&mut self) -> Result<Bytes> {
        while self.fill().await? {}
        Ok(self.buf.split().freeze())
    }

    /// Read a 4-byte reply code that must be one of `expected`.
    ///
    /// A `FAIL` reply that is not itself expected is turned into
    /// [`FrameError::ProtocolFail`] carrying the peer's message.
    pub async fn read_code(&mut self, expected: &[&[u8; 4]]) -> Result<[u8; CODE_SIZE]> {
        let bytes = self.read_bytes(CODE_SIZE).await?;
        let mut code = [0u8; CODE_SIZE];
        code.copy_from_slice(&bytes);

        if expected.iter().any(|e| **e == code) {
            return Ok(code);
        }
        if &code == FAIL {
            return Err(self.read_error().await);
        }
        Err(FrameError::UnexpectedData {
            actual: String::from_utf8_lossy(&code).into_owned(),
            expected: expected
                .iter()
                .map(|e| format!("'{}'", String::from_utf8_lossy(&e[..])))
                .collect::<Vec<_>>()
                .join(" or "),
            request: self.last_request.clone(),
        })
    }

    /// Read the length-prefixed failure text that follows a `FAIL` reply.
    pub async fn read_error(&mut self) -> FrameError {
        match self.read_value().await {
            Ok(message) => FrameError::ProtocolFail {
                message: String::from_utf8_lossy(&message).into_owned(),
            },
            Err(err) => err,
        }
    }

    /// Wait until at least one byte is buffered, the stream ends, or
    /// `timeout` elapses. Returns whether data is available.
    pub async fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if !self.buf.is_empty() {
            return Ok(true);
        }
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.fill()).await {
                Ok(filled) => filled,
                Err(_) => Ok(false),
            },
            None => self.fill().await,
        }
    }

    /// Drain and discard everything left on the stream, then mark it ended.
    pub async fn end(&mut self) -> Result<()> {
        loop {
            self.buf.clear();
            if !self.fill().await? {
                break;
            }
        }
        self.ended = true;
        Ok(())
    }
}

impl<R> FrameReader<R> {
    /// Whether the underlying stream has ended.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Number of bytes read from the stream but not consumed yet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Remember the last request sent on this stream, for diagnostics.
    pub fn set_last_request(&mut self, request: impl Into<String>) {
        self.last_request = Some(request.into());
    }

    /// The last request sent on this stream, if any.
    pub fn last_request(&self) -> Option<&str> {
        self.last_request.as_deref()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
