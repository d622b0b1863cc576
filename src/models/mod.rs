//! Domain model module declarations.

pub mod artifact;
pub mod summary;
