//! fleet-controller: the control loop.
//!
//! ```text
//! Idle ─► Sampling ─► Deciding ─► Acting ─► Notifying ─► Idle
//!                        │
//!                        └─► Capped   (breach with no launch budget left)
//! ```
//!
//! Each tick reconciles the fleet against the provisioner's running set,
//! samples every monitored instance in parallel, asks the decision engine
//! for actions, executes them one at a time, and sends a single
//! notification covering all of them.

pub mod controller;
pub mod error;
pub mod summary;

pub use controller::{ControlLoop, LedgerRecorder, LoopExit, LoopPhase, LoopSettings, TickOutcome, TickReport};
pub use error::ControllerError;
pub use summary::{Summary, SUBJECT};
