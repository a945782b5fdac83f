//! Bounded forward-only reader used by the decoders.
//!
//! Holds at most one upstream chunk plus a short carry-over, tracks the
//! absolute offset of the next unread byte, and routes every upstream wait
//! through the invocation deadline.

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::origin::ByteStream;
use bytes::Bytes;
use futures::StreamExt;

pub(crate) struct ScanReader {
    stream: ByteStream,
    deadline: Deadline,
    buf: Vec<u8>,
    start: usize,
    /// Absolute offset of `buf[start]`.
    pos: u64,
    eof: bool,
}

impl ScanReader {
    pub(crate) fn new(stream: ByteStream, deadline: Deadline) -> Self {
        Self {
            stream,
            deadline,
            buf: Vec::new(),
            start: 0,
            pos: 0,
            eof: false,
        }
    }

    /// Offset of the next unread byte.
    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    pub(crate) fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Unread bytes currently buffered.
    pub(crate) fn buffered(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    pub(crate) fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len() - self.start);
        self.start += n;
        self.pos += n as u64;
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.eof {
            return Ok(None);
        }
        let deadline = self.deadline;
        let stream = &mut self.stream;
        let next = deadline
            .run("read origin", async {
                stream.next().await.transpose().map_err(Error::from)
            })
            .await?;
        if next.is_none() {
            self.eof = true;
        }
        Ok(next)
    }

    /// Buffers at least `n` bytes unless the stream ends first.
    ///
    /// Returns the number of bytes buffered.
    pub(crate) async fn ensure(&mut self, n: usize) -> Result<usize> {
        while self.buf.len() - self.start < n {
            let Some(chunk) = self.next_chunk().await? else {
                break;
            };
            if self.start > 0 {
                self.buf.drain(..self.start);
                self.start = 0;
            }
            self.buf.extend_from_slice(&chunk);
        }
        Ok(self.buf.len() - self.start)
    }

    pub(crate) async fn read_u8(&mut self) -> Result<Option<u8>> {
        if self.ensure(1).await? == 0 {
            return Ok(None);
        }
        let byte = self.buf[self.start];
        self.consume(1);
        Ok(Some(byte))
    }

    /// Reads exactly `n` bytes; `n` must be small (header sized).
    pub(crate) async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let available = self.ensure(n).await?;
        if available < n {
            return Err(Error::TruncatedInput {
                offset: self.pos,
                needed: n as u64,
                available: available as u64,
            });
        }
        let bytes = self.buf[self.start..self.start + n].to_vec();
        self.consume(n);
        Ok(bytes)
    }

    /// Copies up to `n` bytes without consuming them.
    pub(crate) async fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        let available = self.ensure(n).await?;
        Ok(self.buf[self.start..self.start + available.min(n)].to_vec())
    }

    /// Discards up to `n` bytes, returning how many were discarded.
    ///
    /// Fewer than `n` means the stream ended.
    pub(crate) async fn skip(&mut self, n: u64) -> Result<u64> {
        let mut remaining = n;
        loop {
            let buffered = (self.buf.len() - self.start) as u64;
            let take = buffered.min(remaining);
            self.consume(take as usize);
            remaining -= take;
            if remaining == 0 {
                return Ok(n);
            }

            self.buf.clear();
            self.start = 0;
            let Some(chunk) = self.next_chunk().await? else {
                return Ok(n - remaining);
            };
            let len = chunk.len() as u64;
            if len <= remaining {
                self.pos += len;
                remaining -= len;
            } else {
                // remaining < len, so it fits in usize
                let keep_from = remaining as usize;
                self.pos += remaining;
                self.buf.extend_from_slice(&chunk[keep_from..]);
                return Ok(n);
            }
            if remaining == 0 {
                return Ok(n);
            }
        }
    }
}
