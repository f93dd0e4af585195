//! Core business logic - rule storage, code generation, and counter housekeeping.

/// Wall-clock abstraction used for rule codes and timestamps
pub mod clock;
/// Locked access to per-identity counters
pub mod counter;
/// Code generation: reserving serial ranges and rendering codes
pub mod generator;
/// Background cleanup of obsolete counters
pub mod housekeeper;
/// Pure rendering of serial ranges into codes
pub mod render;
/// Coding rule CRUD and validation
pub mod rule;

pub use clock::{Clock, FixedClock, SystemClock};
pub use generator::CodeGenerator;
pub use housekeeper::{Housekeeper, HousekeeperHandle};
