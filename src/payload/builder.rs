//! Streaming payload archive builder.
//!
//! [`PayloadBuilder::build`] starts a producer on the blocking pool that
//! writes a gzip-compressed tar archive into a [`ChannelWriter`]. The writer
//! ships fixed-size chunks over a bounded [`mpsc`] channel to the returned
//! [`PayloadStream`], so the archive is produced and consumed concurrently
//! and never exists in memory as a whole.
//!
//! ## Stream termination
//!
//! The producer always ends the stream with an explicit marker:
//!
//! | Marker              | Consumer sees                                 |
//! |---------------------|-----------------------------------------------|
//! | `End`               | end of stream (`None`)                        |
//! | `Failed(reason)`    | `Err(HarnessError::Payload(reason))`          |
//! | channel closed only | `Err(HarnessError::Payload("truncated …"))`   |
//!
//! A consumer therefore never mistakes a partial archive for a complete one.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Component, Path};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn};

use crate::payload::descriptor::{PayloadDescriptor, MANIFEST_PATH};
use crate::payload::source::PayloadEntry;
use crate::{HarnessError, Result};

/// Default number of in-flight chunks between producer and consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Default chunk size shipped over the channel: 32 KiB.
pub const DEFAULT_CHUNK_BYTES: usize = 32 * 1024;

/// Unit passed from the producer to the consumer.
#[derive(Debug)]
enum Chunk {
    Data(Bytes),
    End,
    Failed(String),
}

/// Builds payload archives as streams.
#[derive(Debug, Clone, Copy)]
pub struct PayloadBuilder {
    capacity: usize,
    chunk_bytes: usize,
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

impl PayloadBuilder {
    /// Builder with default channel capacity and chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the number of in-flight chunks (minimum 1).
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Override the chunk size (minimum 1 byte).
    #[must_use]
    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    /// Start producing the archive for `entries` described by `descriptor`.
    ///
    /// The manifest is written first. Entries follow in iteration order;
    /// an entry whose name was already written is skipped (keep-first).
    /// The iterator is consumed lazily on the blocking pool, so it may read
    /// files as it goes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build<I>(&self, entries: I, descriptor: &PayloadDescriptor) -> PayloadStream
    where
        I: IntoIterator<Item = Result<PayloadEntry>>,
        I::IntoIter: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.capacity);
        let entries = entries.into_iter();
        let chunk_bytes = self.chunk_bytes;
        let symbolic_name = descriptor.symbolic_name.clone();
        let manifest = descriptor.to_manifest().map(|m| m.render());

        tokio::task::spawn_blocking(move || {
            let span = info_span!("payload_producer", symbolic_name = %symbolic_name);
            let _guard = span.enter();

            let outcome = manifest.and_then(|manifest| {
                let writer = ChannelWriter::new(tx.clone(), chunk_bytes);
                write_archive(writer, &manifest, entries)
            });

            let marker = match outcome {
                Ok(stats) => {
                    info!(
                        entries = stats.written,
                        skipped_duplicates = stats.skipped,
                        "payload archive complete"
                    );
                    Chunk::End
                }
                Err(err) => {
                    warn!(%err, "payload producer failed");
                    Chunk::Failed(err.to_string())
                }
            };

            if tx.blocking_send(marker).is_err() {
                debug!("payload consumer went away before end of stream");
            }
        });

        PayloadStream { rx, done: false }
    }
}

/// Consumer end of a payload archive.
///
/// Yields archive bytes in order. Ends with `None` only after the producer
/// signalled completion; producer failure or truncation yields one `Err`
/// and then ends.
#[derive(Debug)]
pub struct PayloadStream {
    rx: mpsc::Receiver<Chunk>,
    done: bool,
}

impl PayloadStream {
    /// Drain the stream into memory.
    ///
    /// Intended for tests and small payloads; deployment streams the chunks
    /// straight onto the invocation channel instead.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Payload` if the producer failed or the stream
    /// was truncated.
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for PayloadStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Chunk::Data(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(Chunk::End)) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Chunk::Failed(reason))) => {
                self.done = true;
                Poll::Ready(Some(Err(HarnessError::Payload(reason))))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(Some(Err(HarnessError::Payload(
                    "archive stream truncated: producer stopped without completing".into(),
                ))))
            }
        }
    }
}

// ── Producer side ─────────────────────────────────────────────────────────────

/// Counters reported when an archive completes.
#[derive(Debug, Default, Clone, Copy)]
struct ArchiveStats {
    written: usize,
    skipped: usize,
}

/// [`Write`] adapter that forwards buffered chunks over the channel.
///
/// Sending blocks while the channel is full, which is what throttles the
/// producer to the consumer's pace.
struct ChannelWriter {
    tx: mpsc::Sender<Chunk>,
    buf: BytesMut,
    chunk_bytes: usize,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<Chunk>, chunk_bytes: usize) -> Self {
        Self {
            tx,
            buf: BytesMut::with_capacity(chunk_bytes),
            chunk_bytes,
        }
    }

    fn ship(&mut self) -> std::io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx.blocking_send(Chunk::Data(chunk)).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "payload consumer dropped")
        })
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let room = self.chunk_bytes - self.buf.len();
        let take = room.min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        if self.buf.len() >= self.chunk_bytes {
            self.ship()?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.ship()
    }
}

fn write_archive<I>(writer: ChannelWriter, manifest: &str, entries: I) -> Result<ArchiveStats>
where
    I: Iterator<Item = Result<PayloadEntry>>,
{
    let mut tar = tar::Builder::new(GzEncoder::new(writer, Compression::default()));
    let mut seen: HashSet<String> = HashSet::new();
    let mut stats = ArchiveStats::default();

    append_entry(&mut tar, MANIFEST_PATH, manifest.as_bytes())?;
    seen.insert(MANIFEST_PATH.to_owned());

    for entry in entries {
        let entry = entry?;
        let name = archive_name(&entry.name)?;
        if !seen.insert(name.clone()) {
            debug!(name = %entry.name, archived_as = %name, "skipping duplicate payload entry");
            stats.skipped += 1;
            continue;
        }
        append_entry(&mut tar, &name, &entry.data)?;
        stats.written += 1;
    }

    let encoder = tar.into_inner().map_err(archive_error)?;
    let mut writer = encoder.finish().map_err(archive_error)?;
    writer.flush().map_err(archive_error)?;
    Ok(stats)
}

/// Name an entry is stored under: its normal components joined by `/`.
///
/// `./a.txt` and `a.txt` collapse to one name, as do `dir//b.txt` and
/// `dir/b.txt`. Duplicate detection keys on this name.
fn archive_name(raw: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(HarnessError::Payload(format!(
                    "entry name '{raw}' must be a relative path without '..'"
                )));
            }
        }
    }
    if parts.is_empty() {
        return Err(HarnessError::Payload(format!("entry name '{raw}' is empty")));
    }
    Ok(parts.join("/"))
}

fn append_entry<W: Write>(tar: &mut tar::Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    tar.append_data(&mut header, name, data)
        .map_err(|err| HarnessError::Payload(format!("cannot append '{name}': {err}")))
}

fn archive_error(err: std::io::Error) -> HarnessError {
    HarnessError::Payload(format!("cannot finish archive: {err}"))
}
