//! Wire protocol: request decoding and reply encoding.
//!
//! The [`decoder`] reads client frames straight off the socket and the
//! [`reply`] module encodes results for the trip back. The two halves are
//! asymmetric: requests are only ever arrays of strings (plus two bare
//! single-string forms), while replies use the full tag set.

pub mod decoder;
pub mod reply;

// Re-export commonly used types for convenience
pub use decoder::{read_command, DecodeError};
pub use reply::Reply;
