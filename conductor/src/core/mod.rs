//! Core coordination logic
//!
//! Pure state machines and bookkeeping with no I/O of their own: the
//! process lifecycle table, the registry records, the session router,
//! health derivation, and the daemon counters. Services wrap these with
//! sockets, child processes, and timers.

pub mod health;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod state;

pub use health::AlertLedger;
pub use lifecycle::{ExitDecision, StopIntent};
pub use registry::{LogRing, ProcessRecord};
pub use router::{ClientSession, MessageRouter, TransportKind};
pub use state::DaemonState;
