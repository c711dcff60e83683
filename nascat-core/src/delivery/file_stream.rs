//! Chunked streaming of a byte interval from a file on disk.

use std::io::{self, SeekFrom};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use super::range::ByteRange;

struct ReadState {
    file: File,
    remaining: u64,
    chunk_size: usize,
}

/// Lazy sequence of chunks covering one interval of a file.
///
/// The open file handle lives inside the stream, so it is released when the
/// stream finishes, fails, or is dropped mid-response by a disconnecting
/// client. A file that turns out shorter than the interval ends the stream
/// early without an error.
pub struct FileChunkStream {
    inner: BoxStream<'static, io::Result<Bytes>>,
}

impl FileChunkStream {
    /// Opens `path` and positions it at the start of `range`.
    ///
    /// `None` produces an empty stream, used for zero-length files.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The file could not be opened or seeked
    pub async fn open(
        path: &Path,
        range: Option<ByteRange>,
        chunk_size: usize,
    ) -> io::Result<Self> {
        let Some(range) = range else {
            return Ok(Self::empty());
        };

        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        debug!(
            path = %path.display(),
            start = range.start,
            end = range.end,
            "Opened file stream"
        );

        let state = ReadState {
            file,
            remaining: range.len(),
            chunk_size: chunk_size.max(1),
        };

        Ok(Self {
            inner: Box::pin(stream::unfold(Some(state), read_next_chunk)),
        })
    }

    fn empty() -> Self {
        Self {
            inner: Box::pin(stream::empty()),
        }
    }
}

async fn read_next_chunk(
    state: Option<ReadState>,
) -> Option<(io::Result<Bytes>, Option<ReadState>)> {
    let mut state = state?;
    if state.remaining == 0 {
        return None;
    }

    let want = usize::try_from(state.remaining)
        .map_or(state.chunk_size, |remaining| remaining.min(state.chunk_size));
    let mut buf = BytesMut::zeroed(want);

    let mut filled = 0;
    while filled < want {
        match state.file.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "File read failed mid-stream");
                return Some((Err(e), None));
            }
        }
    }

    if filled == 0 {
        debug!(
            missing = state.remaining,
            "File ended before requested range; truncating stream"
        );
        return None;
    }

    buf.truncate(filled);
    state.remaining -= filled as u64;
    let next = if filled < want { None } else { Some(state) };
    Some((Ok(buf.freeze()), next))
}

impl Stream for FileChunkStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
