//! Child stdio forwarding.
//!
//! Each captured pipe is read line by line through a bounded
//! [`LinesCodec`]; every line is logged under the `exam::child` target and,
//! when a sink is attached, sent as an [`OutputLine`].
//!
//! A line longer than [`MAX_OUTPUT_LINE_BYTES`] is dropped and reading
//! resumes after its newline, so the pipe is drained until EOF.

use std::fmt::{Display, Formatter};

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Longest child output line forwarded intact: 64 KiB.
pub const MAX_OUTPUT_LINE_BYTES: usize = 64 * 1024;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Child standard output.
    Stdout,
    /// Child standard error.
    Stderr,
}

impl Display for OutputStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// One line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Child process id.
    pub pid: u32,
    /// Source pipe.
    pub stream: OutputStream,
    /// Line content without the trailing newline.
    pub line: String,
}

/// Frame produced by [`ChildLineCodec`].
#[derive(Debug, PartialEq, Eq)]
enum ChildFrame {
    Line(String),
    Oversized,
}

/// [`LinesCodec`] that reports an over-long line as a frame instead of an
/// error. `FramedRead` ends the stream after any decoder error.
#[derive(Debug)]
struct ChildLineCodec {
    lines: LinesCodec,
}

impl ChildLineCodec {
    fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_OUTPUT_LINE_BYTES),
        }
    }

    fn classify(
        decoded: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<ChildFrame>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(ChildFrame::Line)),
            // The inner codec now discards up to the next newline.
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(ChildFrame::Oversized)),
            Err(err) => Err(err),
        }
    }
}

impl Decoder for ChildLineCodec {
    type Item = ChildFrame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ChildFrame>, LinesCodecError> {
        Self::classify(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<ChildFrame>, LinesCodecError> {
        Self::classify(self.lines.decode_eof(buf))
    }
}

/// Spawn a task forwarding `reader` line by line until EOF.
#[must_use]
pub fn forward_output<R>(
    reader: R,
    pid: u32,
    stream: OutputStream,
    sink: Option<mpsc::UnboundedSender<OutputLine>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, ChildLineCodec::new());

        while let Some(next) = lines.next().await {
            match next {
                Ok(ChildFrame::Line(line)) => {
                    info!(target: "exam::child", pid, stream = %stream, "{line}");
                    if let Some(ref tx) = sink {
                        let _ = tx.send(OutputLine { pid, stream, line });
                    }
                }
                Ok(ChildFrame::Oversized) => {
                    warn!(
                        pid,
                        stream = %stream,
                        max_bytes = MAX_OUTPUT_LINE_BYTES,
                        "child output line too long, discarded"
                    );
                }
                Err(err) => {
                    warn!(pid, stream = %stream, %err, "child output read failed");
                    break;
                }
            }
        }

        debug!(pid, stream = %stream, "child output closed");
    })
}
