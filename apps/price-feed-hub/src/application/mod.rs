//! Application Layer - The distribution hub and its ports.
//!
//! The hub state machine lives here together with the port definitions
//! for the external systems it works alongside.

/// Sans-I/O distribution hub state machine.
pub mod hub;

/// Port interfaces for external systems (REST quote snapshots).
pub mod ports;
