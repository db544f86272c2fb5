//! Object streams for bodies too large to buffer.
//!
//! # Responsibilities
//! - Allocate a uniquely identified, temp-file backed stream
//! - Give the creating request exclusive write access
//! - Hand the finished stream to exactly one consumer
//! - Expire streams nobody picked up
//!
//! # Design Decisions
//! - A writer dropped before `close` deletes its file (failure path cleanup)
//! - Empty streams are never registered
//! - Readers keep the temp file alive until the byte stream is dropped

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Registry of completed streams awaiting a consumer.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    dir: Option<PathBuf>,
    streams: DashMap<String, ObjectStream>,
}

/// A completed stream.
#[derive(Debug)]
pub struct ObjectStream {
    path: TempPath,
    len: u64,
    created: Instant,
}

/// Exclusive writer for a stream under construction.
#[derive(Debug)]
pub struct StreamWriter {
    id: String,
    file: tokio::fs::File,
    path: TempPath,
    written: u64,
    registry: Arc<StreamRegistry>,
}

impl StreamRegistry {
    /// Streams are spooled to the system temp directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams are spooled to `dir`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            streams: DashMap::new(),
        }
    }

    /// Allocate a new stream and return its writer.
    pub fn create(self: &Arc<Self>) -> io::Result<StreamWriter> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stream-");
        let temp = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = temp.into_parts();

        Ok(StreamWriter {
            id: format!("stream.{}", uuid::Uuid::new_v4().simple()),
            file: tokio::fs::File::from_std(file),
            path,
            written: 0,
            registry: Arc::clone(self),
        })
    }

    /// Remove a completed stream for consumption. Succeeds at most once per id.
    pub fn take(&self, id: &str) -> Option<ObjectStream> {
        self.streams.remove(id).map(|(_, s)| s)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.streams.contains_key(id)
    }

    /// Drop a stream nobody will read.
    pub fn discard(&self, id: &str) {
        if self.streams.remove(id).is_some() {
            tracing::debug!(stream = %id, "Stream discarded");
        }
    }

    /// Drop streams older than `ttl`. Returns how many were removed.
    pub fn expire(&self, ttl: Duration) -> usize {
        let before = self.streams.len();
        self.streams.retain(|_, s| s.created.elapsed() < ttl);
        let removed = before.saturating_sub(self.streams.len());
        if removed > 0 {
            tracing::info!(removed, "Expired unclaimed streams");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl StreamWriter {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Finish the stream. Returns the id when at least one byte was written.
    pub async fn close(mut self) -> io::Result<Option<String>> {
        self.file.flush().await?;
        if self.written == 0 {
            return Ok(None);
        }
        let Self {
            id,
            path,
            written,
            registry,
            ..
        } = self;
        registry.streams.insert(
            id.clone(),
            ObjectStream {
                path,
                len: written,
                created: Instant::now(),
            },
        );
        Ok(Some(id))
    }
}

impl ObjectStream {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the whole stream into memory.
    pub async fn read_all(self) -> io::Result<Bytes> {
        let data = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(data))
    }

    /// Consume the stream as a sequence of byte chunks.
    pub async fn into_byte_stream(self) -> io::Result<impl Stream<Item = io::Result<Bytes>> + Send + 'static> {
        let file = tokio::fs::File::open(&self.path).await?;
        let path = self.path;
        Ok(ReaderStream::new(file).map(move |chunk| {
            let _ = &path;
            chunk
        }))
    }
}
