//! Chunked file streaming
//!
//! Turns an open file into a stream of fixed-size chunks suitable for a
//! streaming request body. Every chunk read is reported to the progress
//! reporter before it is yielded.

use crate::progress::ProgressReporter;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use std::io;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

struct ChunkReader {
    file: File,
    chunk_size: usize,
    progress: Arc<dyn ProgressReporter>,
}

/// Stream `file` in chunks of at most `chunk_size` bytes.
///
/// The file handle is dropped when the stream ends, errors or is dropped.
pub fn file_chunks(
    file: File,
    chunk_size: usize,
    progress: Arc<dyn ProgressReporter>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let reader = ChunkReader {
        file,
        chunk_size: chunk_size.max(1),
        progress,
    };

    stream::try_unfold(reader, |mut reader| async move {
        let mut buf = BytesMut::zeroed(reader.chunk_size);
        let mut filled = 0;
        // Fill the whole chunk unless EOF comes first
        while filled < buf.len() {
            let n = reader.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }

        buf.truncate(filled);
        reader.progress.object_read(filled as u64);
        Ok::<_, io::Error>(Some((buf.freeze(), reader)))
    })
}
