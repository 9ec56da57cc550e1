//! Provisioner contract.

use std::future::Future;
use std::pin::Pin;

use fleet_core::InstanceId;

use crate::error::{ProvisionError, ProvisionResult};

pub type ProvisionFuture<'a, T> = Pin<Box<dyn Future<Output = ProvisionResult<T>> + Send + 'a>>;

/// Names for instances launched in one call: `{prefix}-{ordinal}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingContext {
    pub prefix: String,
    /// Ordinal of the first instance in this batch.
    pub first_ordinal: u32,
}

impl NamingContext {
    pub fn new(prefix: &str, first_ordinal: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            first_ordinal,
        }
    }

    /// Name of the `index`-th instance of the batch.
    pub fn name_for(&self, index: u32) -> String {
        format!("{}-{}", self.prefix, self.first_ordinal + index)
    }
}

/// A launched instance that has reached the ready state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedInstance {
    pub id: InstanceId,
    pub name: String,
    /// Address reported at creation, if any.
    pub address: Option<String>,
}

/// Result of a launch call. May hold both successes and failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    /// Ready instances, in launch order.
    pub launched: Vec<LaunchedInstance>,
    /// Instances the backend created that never reached the ready state.
    /// They still consume launch budget.
    pub created_unready: Vec<InstanceId>,
    pub failures: Vec<ProvisionError>,
}

impl LaunchReport {
    pub fn ids(&self) -> Vec<InstanceId> {
        self.launched.iter().map(|i| i.id.clone()).collect()
    }

    /// Some instances came up and some did not.
    pub fn is_partial(&self) -> bool {
        !self.launched.is_empty() && !self.failures.is_empty()
    }

    /// Instances the backend actually created, ready or not.
    pub fn created(&self) -> usize {
        self.launched.len() + self.created_unready.len()
    }
}

/// Drives instance lifecycle on a provisioning backend.
pub trait Provisioner: Send + Sync {
    /// Ids of every instance the backend reports as running.
    fn list_running(&self) -> ProvisionFuture<'_, Vec<InstanceId>>;

    /// Stop an instance. Stopping an already-stopped instance succeeds.
    fn terminate<'a>(&'a self, id: &'a str) -> ProvisionFuture<'a, ()>;

    /// Launch `count` instances. Resolves once each returned instance is
    /// ready. Every failure goes to `failures`; an instance that was
    /// created but never became ready also lands in `created_unready`.
    fn launch<'a>(&'a self, count: u32, naming: &'a NamingContext)
        -> ProvisionFuture<'a, LaunchReport>;

    /// Give the instance a reachable address. Backends without a
    /// networking step return `Ok(None)`.
    fn attach_networking<'a>(&'a self, _id: &'a str) -> ProvisionFuture<'a, Option<String>> {
        Box::pin(async { Ok(None) })
    }
}

impl From<ProvisionError> for LaunchReport {
    fn from(error: ProvisionError) -> Self {
        Self {
            failures: vec![error],
            ..Self::default()
        }
    }
}
