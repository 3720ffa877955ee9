//! Command execution layer.
//!
//! Sits between the wire protocol and the store: decoded request in,
//! [`Outcome`] out.

pub mod dispatch;

// Re-export commonly used types
pub use dispatch::{Dispatcher, Outcome};
