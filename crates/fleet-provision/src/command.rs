//! Command-driven provisioner.
//!
//! Each backend operation is a shell command template from
//! `[provisioner]` in fleet.toml. `{name}` and `{id}` are replaced with
//! shell-quoted values before running the command under `sh -c`.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use fleet_core::config::ProvisionerConfig;
use fleet_core::{parse_duration, InstanceId};

use crate::error::{ProvisionError, ProvisionResult};
use crate::provisioner::{
    LaunchReport, LaunchedInstance, NamingContext, ProvisionFuture, Provisioner,
};

/// States after which an instance will never become ready.
const FAILED_STATES: &[&str] = &["error", "failed", "terminated"];

pub struct CommandProvisioner {
    create_cmd: String,
    status_cmd: String,
    terminate_cmd: String,
    list_cmd: String,
    address_cmd: Option<String>,
    ready_state: String,
    status_poll: Duration,
    launch_timeout: Duration,
    call_timeout: Duration,
    /// Ids already stopped by this process.
    stopped: Mutex<HashSet<InstanceId>>,
}

impl CommandProvisioner {
    pub fn from_config(config: &ProvisionerConfig) -> ProvisionResult<Self> {
        let duration = |field: &str, value: &str| {
            parse_duration(value)
                .ok_or_else(|| ProvisionError::Backend(format!("{field}: bad duration {value:?}")))
        };
        Ok(Self {
            create_cmd: config.create_cmd.clone(),
            status_cmd: config.status_cmd.clone(),
            terminate_cmd: config.terminate_cmd.clone(),
            list_cmd: config.list_cmd.clone(),
            address_cmd: config.address_cmd.clone(),
            ready_state: config.ready_state.clone(),
            status_poll: duration("status_poll", &config.status_poll)?,
            launch_timeout: duration("launch_timeout", &config.launch_timeout)?,
            call_timeout: duration("call_timeout", &config.call_timeout)?,
            stopped: Mutex::new(HashSet::new()),
        })
    }

    /// Run a shell script and return its stdout.
    async fn run(&self, script: &str) -> ProvisionResult<String> {
        debug!(%script, "running provisioner command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.call_timeout, child)
            .await
            .map_err(|_| {
                ProvisionError::Backend(format!(
                    "command timed out after {}s",
                    self.call_timeout.as_secs()
                ))
            })?
            .map_err(|e| ProvisionError::Backend(format!("spawn sh: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProvisionError::Backend(format!(
                "command exited with {}: {stderr}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Create one instance and return the id the backend assigned.
    async fn create(&self, name: &str) -> ProvisionResult<InstanceId> {
        let script = render(&self.create_cmd, "{name}", name);
        let stdout = self
            .run(&script)
            .await
            .map_err(|e| ProvisionError::CreateFailed(format!("{name}: {e}")))?;
        first_line(&stdout).ok_or_else(|| {
            ProvisionError::CreateFailed(format!("{name}: create command printed no id"))
        })
    }

    /// Poll `status_cmd` until the instance reports `ready_state`.
    async fn wait_ready(&self, id: &str) -> ProvisionResult<()> {
        let script = render(&self.status_cmd, "{id}", id);
        let poll = async {
            loop {
                match self.run(&script).await {
                    Ok(out) => {
                        let state = first_line(&out).unwrap_or_default();
                        if state.eq_ignore_ascii_case(&self.ready_state) {
                            return Ok(());
                        }
                        if FAILED_STATES.iter().any(|s| state.eq_ignore_ascii_case(s)) {
                            return Err(ProvisionError::CreateFailed(format!(
                                "{id} entered state {state}"
                            )));
                        }
                        debug!(instance = %id, %state, "instance not ready yet");
                    }
                    Err(e) => debug!(instance = %id, error = %e, "status check failed, retrying"),
                }
                tokio::time::sleep(self.status_poll).await;
            }
        };

        tokio::time::timeout(self.launch_timeout, poll)
            .await
            .map_err(|_| ProvisionError::StateTimeout {
                id: id.to_string(),
                state: self.ready_state.clone(),
            })?
    }
}

impl Provisioner for CommandProvisioner {
    fn list_running(&self) -> ProvisionFuture<'_, Vec<InstanceId>> {
        Box::pin(async move {
            let out = self.run(&self.list_cmd).await?;
            Ok(out
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect())
        })
    }

    fn terminate<'a>(&'a self, id: &'a str) -> ProvisionFuture<'a, ()> {
        Box::pin(async move {
            let already = self
                .stopped
                .lock()
                .map(|s| s.contains(id))
                .unwrap_or(false);
            if already {
                debug!(instance = %id, "already stopped, skipping");
                return Ok(());
            }

            self.run(&render(&self.terminate_cmd, "{id}", id)).await?;
            if let Ok(mut stopped) = self.stopped.lock() {
                stopped.insert(id.to_string());
            }
            warn!(instance = %id, "stopped instance");
            Ok(())
        })
    }

    fn launch<'a>(
        &'a self,
        count: u32,
        naming: &'a NamingContext,
    ) -> ProvisionFuture<'a, LaunchReport> {
        Box::pin(async move {
            let mut report = LaunchReport::default();
            for index in 0..count {
                let name = naming.name_for(index);
                let id = match self.create(&name).await {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(%name, error = %e, "instance launch failed");
                        report.failures.push(e);
                        continue;
                    }
                };

                info!(instance = %id, %name, "instance created, waiting for ready state");
                match self.wait_ready(&id).await {
                    Ok(()) => {
                        info!(instance = %id, %name, "instance ready");
                        report.launched.push(LaunchedInstance {
                            id,
                            name,
                            address: None,
                        });
                    }
                    Err(e) => {
                        warn!(instance = %id, %name, error = %e, "instance never became ready");
                        report.created_unready.push(id);
                        report.failures.push(e);
                    }
                }
            }
            Ok(report)
        })
    }

    fn attach_networking<'a>(&'a self, id: &'a str) -> ProvisionFuture<'a, Option<String>> {
        Box::pin(async move {
            let Some(template) = &self.address_cmd else {
                return Ok(None);
            };
            let out = self.run(&render(template, "{id}", id)).await?;
            match first_line(&out) {
                Some(address) => Ok(Some(address)),
                None => Err(ProvisionError::Backend(format!(
                    "address command printed nothing for {id}"
                ))),
            }
        })
    }
}

/// Replace `placeholder` in `template` with the single-quoted `value`.
fn render(template: &str, placeholder: &str, value: &str) -> String {
    template.replace(placeholder, &shell_quote(value))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn first_line(out: &str) -> Option<String> {
    out.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
