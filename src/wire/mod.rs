//! Invocation channel wire format.
//!
//! - `codec`: length-delimited, tag-prefixed framing ([`codec::WireCodec`]).
//! - `message`: JSON request/result envelopes carried in message frames.

pub mod codec;
pub mod message;
