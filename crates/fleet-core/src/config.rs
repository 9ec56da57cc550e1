//! fleet.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{CapBehavior, Policy, ScalingStrategy};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub policy: PolicyConfig,
    pub probe: ProbeConfig,
    pub provisioner: ProvisionerConfig,
    pub ledger: Option<LedgerConfig>,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub threshold: f64,
    pub max_fleet_size: u32,
    #[serde(default = "default_batch")]
    pub instances_per_breach_batch: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    #[serde(default)]
    pub strategy: ScalingStrategy,
    #[serde(default)]
    pub on_cap: CapBehavior,
    #[serde(default = "default_min_population")]
    pub min_population: usize,
    pub max_monitored: Option<usize>,
    /// Instances managed from the start. Empty means discover from the backend.
    #[serde(default)]
    pub initial_instances: Vec<String>,
    /// Launch counter to resume from, e.g. after a restart.
    pub initial_launched: Option<u32>,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout: String,
    #[serde(default = "default_probe_concurrency")]
    pub concurrency: usize,
    #[serde(flatten)]
    pub source: ProbeSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSource {
    /// Query a metrics endpoint for the trailing window.
    Metrics {
        /// `host:port` of the metrics service.
        address: String,
        #[serde(default = "default_metrics_path")]
        path: String,
        #[serde(default = "default_metrics_window")]
        window: String,
        #[serde(default = "default_metrics_period")]
        period_secs: u64,
        #[serde(default = "default_aggregation")]
        aggregation: String,
    },
    /// Run an inspection command on the instance over SSH.
    RemoteExec {
        #[serde(default = "default_inspect_command")]
        command: String,
        #[serde(default)]
        hosts: Vec<HostEntry>,
        #[serde(default = "default_connect_timeout")]
        connect_timeout: String,
    },
}

/// Static connection descriptor for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostEntry {
    pub instance_id: String,
    pub address: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub username: String,
    pub password: Option<String>,
}

/// Shell command templates driving the provisioning backend.
///
/// Placeholders: `{name}` in `create_cmd`, `{id}` in the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Prints the new instance id on stdout.
    pub create_cmd: String,
    /// Prints the instance state on stdout.
    pub status_cmd: String,
    pub terminate_cmd: String,
    /// Prints one running instance id per line.
    pub list_cmd: String,
    /// Attaches an address and prints it on stdout.
    pub address_cmd: Option<String>,
    #[serde(default = "default_ready_state")]
    pub ready_state: String,
    #[serde(default = "default_status_poll")]
    pub status_poll: String,
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout: String,
    #[serde(default = "default_call_timeout")]
    pub call_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub path: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierConfig {
    #[default]
    Log,
    Webhook {
        /// `http://host:port/path`
        url: String,
        #[serde(default = "default_notify_timeout")]
        timeout: String,
    },
}

fn default_batch() -> u32 {
    1
}
fn default_poll_interval() -> String {
    "40s".to_string()
}
fn default_min_population() -> usize {
    2
}
fn default_name_prefix() -> String {
    "fleet-auto".to_string()
}
fn default_probe_timeout() -> String {
    "10s".to_string()
}
fn default_probe_concurrency() -> usize {
    4
}
fn default_metrics_path() -> String {
    "/metrics/cpu".to_string()
}
fn default_metrics_window() -> String {
    "5m".to_string()
}
fn default_metrics_period() -> u64 {
    300
}
fn default_aggregation() -> String {
    "Average".to_string()
}
fn default_inspect_command() -> String {
    "top -bn1 | grep 'CPU' | head -n1".to_string()
}
fn default_connect_timeout() -> String {
    "5s".to_string()
}
fn default_transport() -> String {
    "linux".to_string()
}
fn default_ready_state() -> String {
    "running".to_string()
}
fn default_status_poll() -> String {
    "5s".to_string()
}
fn default_launch_timeout() -> String {
    "5m".to_string()
}
fn default_call_timeout() -> String {
    "60s".to_string()
}
fn default_notify_timeout() -> String {
    "5s".to_string()
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and that every duration string parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.policy;
        if !(0.0..=100.0).contains(&p.threshold) {
            return Err(ConfigError::Invalid(format!(
                "policy.threshold must be within 0..=100, got {}",
                p.threshold
            )));
        }
        if p.max_fleet_size < 1 {
            return Err(ConfigError::Invalid(
                "policy.max_fleet_size must be at least 1".to_string(),
            ));
        }
        if p.instances_per_breach_batch < 1 {
            return Err(ConfigError::Invalid(
                "policy.instances_per_breach_batch must be at least 1".to_string(),
            ));
        }
        if p.initial_instances.len() > p.max_fleet_size as usize {
            return Err(ConfigError::Invalid(format!(
                "{} initial instances exceed max_fleet_size {}",
                p.initial_instances.len(),
                p.max_fleet_size
            )));
        }
        if self.probe.concurrency < 1 {
            return Err(ConfigError::Invalid(
                "probe.concurrency must be at least 1".to_string(),
            ));
        }

        require_duration("policy.poll_interval", &p.poll_interval)?;
        require_duration("probe.timeout", &self.probe.timeout)?;
        match &self.probe.source {
            ProbeSource::Metrics { window, .. } => require_duration("probe.window", window)?,
            ProbeSource::RemoteExec {
                connect_timeout, ..
            } => require_duration("probe.connect_timeout", connect_timeout)?,
        };
        let prov = &self.provisioner;
        require_duration("provisioner.status_poll", &prov.status_poll)?;
        require_duration("provisioner.launch_timeout", &prov.launch_timeout)?;
        require_duration("provisioner.call_timeout", &prov.call_timeout)?;
        if let NotifierConfig::Webhook { timeout, .. } = &self.notifier {
            require_duration("notifier.timeout", timeout)?;
        }
        Ok(())
    }

    /// Resolve the `[policy]` table into a [`Policy`].
    pub fn policy(&self) -> Result<Policy, ConfigError> {
        let p = &self.policy;
        Ok(Policy {
            threshold: p.threshold,
            max_fleet_size: p.max_fleet_size,
            instances_per_breach_batch: p.instances_per_breach_batch,
            poll_interval: require_duration("policy.poll_interval", &p.poll_interval)?,
            strategy: p.strategy,
            on_cap: p.on_cap,
            min_population: p.min_population,
            max_monitored: p.max_monitored,
        })
    }
}

fn require_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value)
        .ok_or_else(|| ConfigError::Invalid(format!("{field}: bad duration {value:?}")))
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[policy]
threshold = 30
max_fleet_size = 5
poll_interval = "40s"
initial_instances = ["A", "B"]

[probe]
kind = "remote_exec"
timeout = "8s"

[[probe.hosts]]
instance_id = "A"
address = "172.24.4.197"
username = "cirros"
password = "secret"

[provisioner]
create_cmd = "openstack server create {name} -f value -c id"
status_cmd = "openstack server show {id} -f value -c status"
terminate_cmd = "openstack server stop {id}"
list_cmd = "openstack server list --status ACTIVE -f value -c ID"
ready_state = "ACTIVE"

[ledger]
path = "/var/lib/fleet/ledger.csv"
username = "cirros"
"#;

    #[test]
    fn parses_sample_config() {
        let config = FleetConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.policy.max_fleet_size, 5);
        assert_eq!(config.policy.instances_per_breach_batch, 1);
        assert_eq!(config.policy.name_prefix, "fleet-auto");
        assert_eq!(config.probe.concurrency, 4);
        match &config.probe.source {
            ProbeSource::RemoteExec { command, hosts, .. } => {
                assert!(command.starts_with("top -bn1"));
                assert_eq!(hosts.len(), 1);
                assert_eq!(hosts[0].transport, "linux");
            }
            other => panic!("expected remote_exec, got {other:?}"),
        }
        assert!(matches!(config.notifier, NotifierConfig::Log));
        assert_eq!(config.ledger.unwrap().transport, "linux");
    }

    #[test]
    fn resolves_policy() {
        let config = FleetConfig::from_toml(SAMPLE).unwrap();
        let policy = config.policy().unwrap();
        assert_eq!(policy.threshold, 30.0);
        assert_eq!(policy.poll_interval, Duration::from_secs(40));
        assert_eq!(policy.strategy, ScalingStrategy::Replace);
        assert_eq!(policy.on_cap, CapBehavior::Exit);
        assert_eq!(policy.min_population, 2);
    }

    #[test]
    fn parses_metrics_probe_and_webhook() {
        let toml_str = r#"
[policy]
threshold = 5.0
max_fleet_size = 4
strategy = "scale_out"
on_cap = "keep_sampling"

[probe]
kind = "metrics"
address = "127.0.0.1:9090"

[provisioner]
create_cmd = "c {name}"
status_cmd = "s {id}"
terminate_cmd = "t {id}"
list_cmd = "l"

[notifier]
kind = "webhook"
url = "http://127.0.0.1:8080/hooks/fleet"
"#;
        let config = FleetConfig::from_toml(toml_str).unwrap();
        let policy = config.policy().unwrap();
        assert_eq!(policy.strategy, ScalingStrategy::ScaleOut);
        assert_eq!(policy.on_cap, CapBehavior::KeepSampling);
        match config.probe.source {
            ProbeSource::Metrics {
                window,
                period_secs,
                aggregation,
                ..
            } => {
                assert_eq!(window, "5m");
                assert_eq!(period_secs, 300);
                assert_eq!(aggregation, "Average");
            }
            other => panic!("expected metrics, got {other:?}"),
        }
        assert!(matches!(config.notifier, NotifierConfig::Webhook { .. }));
    }

    #[test]
    fn rejects_zero_cap() {
        let bad = SAMPLE.replace("max_fleet_size = 5", "max_fleet_size = 0");
        let err = FleetConfig::from_toml(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_threshold_above_hundred() {
        let bad = SAMPLE.replace("threshold = 30", "threshold = 130");
        assert!(FleetConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn rejects_bad_duration() {
        let bad = SAMPLE.replace("poll_interval = \"40s\"", "poll_interval = \"soon\"");
        let err = FleetConfig::from_toml(&bad).unwrap_err();
        assert!(err.to_string().contains("policy.poll_interval"));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = FleetConfig::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn from_file_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = FleetConfig::from_file(&path).unwrap();
        assert_eq!(config.policy.initial_instances, vec!["A", "B"]);
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("later"), None);
    }
}
