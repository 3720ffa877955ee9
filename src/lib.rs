//! # EmberKV - A Minimal In-Memory Key-Value Server
//!
//! EmberKV is a small Redis-flavored key-value server written in Rust. It
//! speaks a strict subset of the RESP wire protocol and keeps everything in
//! process memory, with optional per-key expiration.
//!
//! ## Features
//!
//! - **RESP subset**: array, bulk string, and simple string request frames
//! - **Sharded storage**: 64 independent `RwLock` shards for concurrent access
//! - **TTL support**: `SET ... EX/PX` with lazy checks plus an active sweeper
//! - **Async I/O**: one Tokio task per connection, pipelining included
//!
//! ## Quick Start
//!
//! ```ignore
//! use emberkv::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::bind(6379).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key value [EX seconds] [PX milliseconds]`
//! - `GET key` / `DEL key` / `EXISTS key`
//! - `KEYS [pattern]` / `DBSIZE` / `FLUSHALL`
//! - `PING [message]` / `ECHO message` / `QUIT`
//!
//! ## Module Overview
//!
//! - [`protocol`]: request decoder and reply encoder
//! - [`storage`]: sharded store and the background expiry sweeper
//! - [`command`]: dispatch from decoded command to reply
//! - [`session`]: per-connection read/execute/write loop
//! - [`server`]: listener, accept loop, and shutdown
//!
//! ## Design Highlights
//!
//! Expiration is enforced twice over. Every read path checks the entry's
//! deadline, so an expired key is invisible the instant it lapses; a
//! background sweeper drains a deadline index so untouched keys are
//! reclaimed too. Each connection is a single task running a sequential
//! read/execute/write loop, which gives pipelined clients their replies in
//! request order for free.

pub mod command;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

// Re-export commonly used types for convenience
pub use command::{Dispatcher, Outcome};
pub use protocol::{DecodeError, Reply};
pub use server::Server;
pub use session::ConnectionStats;
pub use storage::{Store, Sweeper};

/// The default port EmberKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host EmberKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";
