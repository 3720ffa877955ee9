//! Client session handling.
//!
//! One task per accepted connection, created by the server's accept loop.

pub mod handler;

// Re-export commonly used types
pub use handler::{serve, ConnectionStats};
