//! On-the-fly payload packaging.
//!
//! - `descriptor`: the manifest naming the payload's entry point.
//! - `source`: lazy entry sources (in-memory or a directory tree).
//! - `builder`: the producer/consumer archive pipeline.

pub mod builder;
pub mod descriptor;
pub mod source;

pub use builder::{PayloadBuilder, PayloadStream};
pub use descriptor::{Manifest, PayloadDescriptor};
pub use source::{directory_entries, PayloadEntry};
