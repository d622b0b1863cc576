//! Frame codec for the invocation channel.
//!
//! Wraps [`tokio_util::codec::LengthDelimitedCodec`] with a configurable
//! maximum frame length and a one-byte tag that distinguishes JSON message
//! frames from raw artifact data frames.
//!
//! | Tag | Frame                 | Body                          |
//! |-----|-----------------------|-------------------------------|
//! | `1` | [`Frame::Message`]    | UTF-8 JSON                    |
//! | `2` | [`Frame::Chunk`]      | raw artifact bytes            |
//! | `3` | [`Frame::End`]        | empty                         |
//! | `4` | [`Frame::Abort`]      | UTF-8 reason                  |
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::Framed;
//! use exam_harness::wire::codec::WireCodec;
//!
//! let channel = Framed::new(stream, WireCodec::new());
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{HarnessError, Result};

/// Maximum frame length accepted by the codec: 16 MiB.
///
/// Frames exceeding this limit on the inbound stream cause
/// [`WireCodec::decode`] to return [`HarnessError::Channel`] with
/// `"frame too long"` rather than allocating.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const TAG_MESSAGE: u8 = 1;
const TAG_CHUNK: u8 = 2;
const TAG_END: u8 = 3;
const TAG_ABORT: u8 = 4;

/// One unit on the invocation channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON-encoded request or result.
    Message(Bytes),
    /// Slice of a streamed artifact.
    Chunk(Bytes),
    /// Streamed artifact complete.
    End,
    /// Streamed artifact abandoned by the sender.
    Abort(String),
}

impl Frame {
    /// Encode `value` as a JSON message frame.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Marshal`] if serialization fails.
    pub fn message<T: Serialize>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::Message(Bytes::from(body)))
    }

    /// Decode a JSON message frame into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Channel`] if this is not a message frame, or
    /// [`HarnessError::Marshal`] if the body is not valid JSON for `T`.
    pub fn into_message<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Message(body) => Ok(serde_json::from_slice(&body)?),
            other => Err(HarnessError::Channel(format!(
                "expected message frame, got {}",
                other.label()
            ))),
        }
    }

    /// Short frame-type label for diagnostics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Chunk(_) => "chunk",
            Self::End => "end",
            Self::Abort(_) => "abort",
        }
    }
}

/// Length-delimited codec for [`Frame`]s.
///
/// # Decoder
///
/// Inbound frames longer than [`MAX_FRAME_BYTES`] return
/// [`HarnessError::Channel`]`("frame too long: …")`. Unknown tags and empty
/// frames are protocol errors.
///
/// # Encoder
///
/// Each frame is written as a 4-byte big-endian length, the tag byte and the
/// body.
#[derive(Debug)]
pub struct WireCodec(LengthDelimitedCodec);

impl WireCodec {
    /// Create a new `WireCodec` with the default [`MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(
            LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_BYTES)
                .new_codec(),
        )
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = HarnessError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode(src).map_err(map_codec_error)? {
            Some(body) => parse_frame(body).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for WireCodec {
    type Error = HarnessError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let (tag, body) = match item {
            Frame::Message(body) => (TAG_MESSAGE, body),
            Frame::Chunk(body) => (TAG_CHUNK, body),
            Frame::End => (TAG_END, Bytes::new()),
            Frame::Abort(reason) => (TAG_ABORT, Bytes::from(reason)),
        };

        let mut buf = BytesMut::with_capacity(body.len() + 1);
        buf.put_u8(tag);
        buf.extend_from_slice(&body);
        self.0.encode(buf.freeze(), dst).map_err(map_codec_error)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn parse_frame(mut body: BytesMut) -> Result<Frame> {
    if body.is_empty() {
        return Err(HarnessError::Channel("empty frame".into()));
    }

    let tag = body.get_u8();
    let body = body.freeze();
    match tag {
        TAG_MESSAGE => Ok(Frame::Message(body)),
        TAG_CHUNK => Ok(Frame::Chunk(body)),
        TAG_END => Ok(Frame::End),
        TAG_ABORT => Ok(Frame::Abort(String::from_utf8_lossy(&body).into_owned())),
        other => Err(HarnessError::Channel(format!("unknown frame tag {other}"))),
    }
}

/// Map a length-delimited codec error to a [`HarnessError`].
fn map_codec_error(e: std::io::Error) -> HarnessError {
    if e.kind() == std::io::ErrorKind::InvalidData {
        HarnessError::Channel(format!("frame too long: exceeded {MAX_FRAME_BYTES} bytes"))
    } else {
        HarnessError::Io(e.to_string())
    }
}
