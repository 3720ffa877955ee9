//! In-memory storage: the sharded store and its expiry sweeper.
//!
//! [`Store`] holds the data behind 64 independently locked shards and
//! enforces expiration lazily on every read path. [`Sweeper`] is the active
//! half: a background task that drains the store's deadline index so keys
//! nobody reads are still reclaimed on time.

pub mod store;
pub mod sweeper;

// Re-export commonly used types
pub use store::Store;
pub use sweeper::Sweeper;
