//! Shared vocabulary of the Berkeley clock synchronization protocol.
//!
//! ## Modules
//! - `messages`: newline-delimited JSON messages exchanged between coordinator and nodes
//! - `sample`: round-trip compensated time samples and per-node adjustments
//! - `wall_clock`: host wall-clock reads and operator-facing timestamp formatting

pub mod messages;
pub mod sample;
pub mod wall_clock;

pub use messages::*;
pub use sample::*;
pub use wall_clock::*;
