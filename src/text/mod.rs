//! Text handling between the agent stream and the speech queue.
//!
//! - [`segment`]: cursor-based sentence extraction from a growing buffer
//! - [`sanitize`]: markdown/HTML/URL/acronym normalization for speech

pub mod sanitize;
pub mod segment;

pub use sanitize::sanitize;
pub use segment::{Segmented, flush, segment};
