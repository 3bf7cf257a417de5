//! Transformation module.
//!
//! - [`sources`]: table rows to [`SourceRecord`](crate::models::SourceRecord)s
//! - [`pipeline`]: the transform job and its two entry variants

pub mod pipeline;
pub mod sources;

pub use pipeline::*;
pub use sources::*;
