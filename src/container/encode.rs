//! Lazy re-emission of a (possibly stripped) document.

use super::{ByteRange, ContainerDocument};
use crate::error::{Error, Result};
use crate::origin::ByteStream;
use bytes::{Buf, Bytes};
use futures::{StreamExt, TryStreamExt};
use std::collections::VecDeque;

struct EncodeState {
    source: ByteStream,
    /// Unforwarded bytes of the current upstream chunk.
    pending: Bytes,
    /// Absolute offset of `pending[0]`.
    pos: u64,
    kept: VecDeque<ByteRange>,
}

/// Streams the bytes of every segment in `doc`, in order.
///
/// `source` must stream the object `doc` was decoded from, starting at
/// offset zero. Bytes of removed segments are read and discarded. The
/// returned stream is finite, yields exactly [`ContainerDocument::encoded_len`]
/// bytes, and fails with `UnexpectedEof` if the source ends early.
pub fn encode(doc: &ContainerDocument, source: ByteStream) -> Result<ByteStream> {
    doc.verify_ordered()?;

    // Adjacent kept segments are forwarded as one range.
    let mut kept: VecDeque<ByteRange> = VecDeque::new();
    for segment in doc.segments() {
        match kept.back_mut() {
            Some(last) if last.end() == segment.range.start => last.len += segment.range.len,
            _ if segment.range.is_empty() => {}
            _ => kept.push_back(segment.range),
        }
    }

    let state = EncodeState {
        source,
        pending: Bytes::new(),
        pos: 0,
        kept,
    };

    let stream = futures::stream::try_unfold(state, |mut state| async move {
        loop {
            let Some(range) = state.kept.front().copied() else {
                return Ok::<_, std::io::Error>(None);
            };

            if state.pending.is_empty() {
                match state.source.next().await.transpose()? {
                    Some(chunk) => {
                        state.pending = chunk;
                        continue;
                    }
                    None => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!(
                                "source ended at {} before segment {}..{}",
                                state.pos,
                                range.start,
                                range.end()
                            ),
                        ));
                    }
                }
            }

            let pending_end = state.pos + state.pending.len() as u64;
            if pending_end <= range.start {
                state.pos = pending_end;
                state.pending = Bytes::new();
                continue;
            }
            if state.pos < range.start {
                let skip = (range.start - state.pos) as usize;
                state.pending.advance(skip);
                state.pos = range.start;
            }

            let take = (state.pending.len() as u64).min(range.end() - state.pos) as usize;
            let out = state.pending.split_to(take);
            state.pos += take as u64;
            if state.pos == range.end() {
                state.kept.pop_front();
            }
            return Ok(Some((out, state)));
        }
    });

    Ok(stream.boxed())
}

/// Encodes `doc` into memory. Intended for small objects and tests.
pub async fn encode_to_vec(doc: &ContainerDocument, source: ByteStream) -> Result<Vec<u8>> {
    let capacity = usize::try_from(doc.encoded_len())
        .map_err(|_| Error::Internal("document too large to buffer".to_string()))?;
    let mut out = Vec::with_capacity(capacity);
    let mut stream = encode(doc, source)?;
    while let Some(chunk) = stream.try_next().await? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}
