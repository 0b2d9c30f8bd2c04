//! Domain Layer - Core price distribution types.
//!
//! Pure types with no I/O: symbols, the refcounted subscription registry,
//! price updates with their store, feed wire frames, the reconnect
//! backoff policy and the connection status.

/// JSON frames exchanged with the feed server.
pub mod frame;

/// Price updates, the price store and REST quote snapshots.
pub mod price;

/// Linear reconnect backoff.
pub mod reconnect;

/// Connection status of the shared feed.
pub mod status;

/// Refcounted subscription tracking.
pub mod subscription;

/// Normalized instrument symbols.
pub mod symbol;
