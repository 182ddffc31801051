//! Berkeley Network Core
//!
//! Transport and orchestration for coordinator-driven Berkeley clock
//! synchronization over newline-delimited JSON on TCP.
//!
//! ## Modules
//! - `framing`: `\n`-delimited line buffering and message writes
//! - `connection`: per-node connection handle with a single pending-reply slot
//! - `registry`: node identifier to live connection mapping
//! - `exchange`: one request/reply/timeout poll against a node
//! - `scheduler`: periodic rounds, aggregation and adjustment broadcast
//! - `coordinator`: TCP listener and per-connection reader/writer tasks
//! - `applier`: node-side application of received adjustments
//! - `client`: node-side protocol loop
//! - `telemetry`: metric names reported through the `metrics` facade

pub mod applier;
pub mod client;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod exchange;
pub mod framing;
pub mod telemetry;
pub mod registry;
pub mod scheduler;

// ------------------------------------------------------------
// Re-exports for workspace-wide use
// ------------------------------------------------------------

// Coordinator side
pub use connection::{ConnectionId, NodeConnection};
pub use coordinator::{Coordinator, CoordinatorConfig, RunningCoordinator};
pub use exchange::{poll_node, NoReplyReason, PollOutcome, DEFAULT_REPLY_TIMEOUT};
pub use registry::{NodeSession, SessionRegistry};
pub use scheduler::{RoundConfig, RoundReport, RoundScheduler, DEFAULT_ROUND_INTERVAL};

// Node side
pub use applier::AdjustmentApplier;
pub use client::{ClientConfig, NodeClient};

// Shared
pub use error::NetworkError;
pub use framing::{write_message, LineBuffer, LineReader, MAX_LINE_BYTES};
