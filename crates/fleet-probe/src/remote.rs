//! Remote-exec probe strategy.
//!
//! Opens a session to the instance, runs a fixed inspection command and
//! parses the idle percentage out of its output.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tracing::debug;

use fleet_core::config::HostEntry;
use fleet_core::{epoch_secs, UtilizationSample};

use crate::parser::parse_utilization;
use crate::probe::{ProbeError, ProbeFuture, UtilizationProbe};

/// How to reach one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub username: String,
    pub password: Option<String>,
    /// Transport kind, e.g. `linux`.
    pub transport: String,
}

impl From<&HostEntry> for ConnectionDescriptor {
    fn from(entry: &HostEntry) -> Self {
        Self {
            host: entry.address.clone(),
            username: entry.username.clone(),
            password: entry.password.clone(),
            transport: entry.transport.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The session could not be established.
    #[error("cannot connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    /// The session dropped before the command finished.
    #[error("session to {host} failed: {reason}")]
    Session { host: String, reason: String },
}

pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ExecError>> + Send + 'a>>;

/// Runs one command on a remote host and returns its raw stdout.
pub trait RemoteExec: Send + Sync {
    fn exec<'a>(&'a self, target: &'a ConnectionDescriptor, command: &'a str) -> ExecFuture<'a>;
}

/// Looks up connection details for an instance.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, instance_id: &str) -> Option<ConnectionDescriptor>;
}

/// Fixed instance → host table, usually from `[[probe.hosts]]`.
#[derive(Debug, Clone, Default)]
pub struct StaticHosts {
    hosts: HashMap<String, ConnectionDescriptor>,
}

impl StaticHosts {
    pub fn new(entries: &[HostEntry]) -> Self {
        Self {
            hosts: entries
                .iter()
                .map(|e| (e.instance_id.clone(), ConnectionDescriptor::from(e)))
                .collect(),
        }
    }

    pub fn insert(&mut self, instance_id: &str, descriptor: ConnectionDescriptor) {
        self.hosts.insert(instance_id.to_string(), descriptor);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl HostResolver for StaticHosts {
    fn resolve(&self, instance_id: &str) -> Option<ConnectionDescriptor> {
        self.hosts.get(instance_id).cloned()
    }
}

/// Samples utilization by executing `command` on the instance.
pub struct RemoteExecProbe<T, R> {
    transport: T,
    hosts: R,
    command: String,
}

impl<T: RemoteExec, R: HostResolver> RemoteExecProbe<T, R> {
    pub fn new(transport: T, hosts: R, command: &str) -> Self {
        Self {
            transport,
            hosts,
            command: command.to_string(),
        }
    }
}

impl<T: RemoteExec, R: HostResolver> UtilizationProbe for RemoteExecProbe<T, R> {
    fn name(&self) -> &str {
        "remote_exec"
    }

    fn sample<'a>(&'a self, instance_id: &'a str) -> ProbeFuture<'a> {
        Box::pin(async move {
            let target = self.hosts.resolve(instance_id).ok_or_else(|| {
                ProbeError::ConnectFailure(format!("no connection details for {instance_id}"))
            })?;

            let output = self
                .transport
                .exec(&target, &self.command)
                .await
                .map_err(|e| ProbeError::ConnectFailure(e.to_string()))?;

            let busy = parse_utilization(&output)
                .map_err(|e| ProbeError::ParseFailure(e.to_string()))?;
            debug!(instance = %instance_id, host = %target.host, busy, "remote sample");
            Ok(UtilizationSample::new(instance_id, busy, epoch_secs()))
        })
    }
}
