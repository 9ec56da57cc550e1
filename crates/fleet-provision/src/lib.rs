//! fleet-provision: instance lifecycle against a provisioning backend.
//!
//! The [`Provisioner`] trait is the seam the control loop drives:
//!
//! - `list_running()` supplies the fleet snapshot for a tick
//! - `terminate(id)` stops an instance (idempotent)
//! - `launch(count, naming)` creates instances and resolves only once each
//!   one is ready, reporting partial success as a [`LaunchReport`]
//! - `attach_networking(id)` optionally assigns a reachable address
//!
//! [`CommandProvisioner`] drives any cloud CLI through templated shell
//! commands. The [`Ledger`] is an append-only CSV of created instances and
//! their connection details.

pub mod command;
pub mod error;
pub mod ledger;
pub mod provisioner;

pub use command::CommandProvisioner;
pub use error::{ProvisionError, ProvisionResult};
pub use ledger::{Ledger, LedgerEntry, LedgerError};
pub use provisioner::{LaunchReport, LaunchedInstance, NamingContext, ProvisionFuture, Provisioner};
