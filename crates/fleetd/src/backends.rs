//! Builds the loop's probe, provisioner and notifier from fleet.toml.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use fleet_controller::{LedgerRecorder, LoopSettings};
use fleet_core::config::{LedgerConfig, NotifierConfig, ProbeSource};
use fleet_core::{parse_duration, FleetConfig, FleetState};
use fleet_notify::{LogNotifier, Notifier, WebhookNotifier};
use fleet_probe::{
    ConnectionDescriptor, HostResolver, HttpMetricsSource, MetricsProbe, RemoteExecProbe,
    SshTransport, StaticHosts, UtilizationProbe,
};
use fleet_provision::{CommandProvisioner, Ledger, Provisioner};

fn duration(field: &str, value: &str) -> anyhow::Result<std::time::Duration> {
    parse_duration(value).with_context(|| format!("{field}: bad duration {value:?}"))
}

/// Static hosts first, then the newest ledger row for the instance.
///
/// The ledger is re-read on every lookup so instances created since
/// startup resolve without a restart.
pub struct LedgerHosts {
    fixed: StaticHosts,
    ledger: Option<Ledger>,
}

impl LedgerHosts {
    pub fn new(fixed: StaticHosts, ledger: Option<Ledger>) -> Self {
        Self { fixed, ledger }
    }
}

impl HostResolver for LedgerHosts {
    fn resolve(&self, instance_id: &str) -> Option<ConnectionDescriptor> {
        if let Some(found) = self.fixed.resolve(instance_id) {
            return Some(found);
        }
        let ledger = self.ledger.as_ref()?;
        match ledger.find(instance_id) {
            Ok(Some(entry)) if !entry.address.is_empty() => Some(ConnectionDescriptor {
                host: entry.address,
                username: entry.username,
                password: entry.password,
                transport: entry.transport,
            }),
            Ok(_) => None,
            Err(e) => {
                warn!(instance = %instance_id, error = %e, "ledger lookup failed");
                None
            }
        }
    }
}

pub fn build_probe(config: &FleetConfig) -> anyhow::Result<Arc<dyn UtilizationProbe>> {
    match &config.probe.source {
        ProbeSource::Metrics {
            address,
            path,
            window,
            period_secs,
            aggregation,
        } => {
            info!(%address, %path, %window, "using metrics probe");
            let source = HttpMetricsSource::new(address, path);
            Ok(Arc::new(MetricsProbe::new(
                source,
                duration("probe.window", window)?,
                *period_secs,
                aggregation,
            )))
        }
        ProbeSource::RemoteExec {
            command,
            hosts,
            connect_timeout,
        } => {
            info!(hosts = hosts.len(), %command, "using remote-exec probe");
            let transport = SshTransport::new(duration("probe.connect_timeout", connect_timeout)?);
            let resolver = LedgerHosts::new(
                StaticHosts::new(hosts),
                config.ledger.as_ref().map(|l| Ledger::new(&l.path)),
            );
            Ok(Arc::new(RemoteExecProbe::new(transport, resolver, command)))
        }
    }
}

pub fn build_provisioner(config: &FleetConfig) -> anyhow::Result<Arc<dyn Provisioner>> {
    let provisioner = CommandProvisioner::from_config(&config.provisioner)
        .context("failed to configure provisioner")?;
    Ok(Arc::new(provisioner))
}

pub fn build_notifier(config: &NotifierConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match config {
        NotifierConfig::Log => Ok(Arc::new(LogNotifier::new())),
        NotifierConfig::Webhook { url, timeout } => {
            info!(%url, "using webhook notifier");
            let notifier = WebhookNotifier::new(url, duration("notifier.timeout", timeout)?)?;
            Ok(Arc::new(notifier))
        }
    }
}

pub fn build_ledger(config: Option<&LedgerConfig>) -> Option<LedgerRecorder> {
    config.map(|l| LedgerRecorder {
        ledger: Ledger::new(&l.path),
        transport: l.transport.clone(),
        username: l.username.clone(),
        password: l.password.clone(),
    })
}

pub fn loop_settings(config: &FleetConfig) -> anyhow::Result<LoopSettings> {
    Ok(LoopSettings {
        probe_timeout: duration("probe.timeout", &config.probe.timeout)?,
        probe_concurrency: config.probe.concurrency,
        call_timeout: duration("provisioner.call_timeout", &config.provisioner.call_timeout)?,
        launch_timeout: duration("provisioner.launch_timeout", &config.provisioner.launch_timeout)?,
        name_prefix: config.policy.name_prefix.clone(),
    })
}

/// Seed the fleet from `initial_instances`, or from the backend's running
/// set when none are listed.
pub async fn initial_fleet(
    config: &FleetConfig,
    provisioner: &dyn Provisioner,
) -> anyhow::Result<FleetState> {
    let policy = &config.policy;
    let ids = if policy.initial_instances.is_empty() {
        let running = provisioner
            .list_running()
            .await
            .context("failed to discover running instances")?;
        info!(count = running.len(), "discovered running instances");
        running
    } else {
        policy.initial_instances.clone()
    };

    let cap = policy.max_fleet_size as usize;
    if ids.len() > cap {
        anyhow::bail!(
            "{} running instances exceed max_fleet_size {}",
            ids.len(),
            policy.max_fleet_size
        );
    }
    let launched = policy.initial_launched.unwrap_or(ids.len() as u32);
    Ok(FleetState::new(ids, launched))
}
