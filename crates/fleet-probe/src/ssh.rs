//! SSH transport backed by the system `ssh` client.
//!
//! When a descriptor carries a password the command is wrapped in
//! `sshpass -e`, with the password passed through `SSHPASS` rather than argv.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::remote::{ConnectionDescriptor, ExecError, ExecFuture, RemoteExec};

/// `ssh` exits with 255 when the connection itself failed.
const SSH_CONNECT_ERROR: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshTransport {
    connect_timeout: Duration,
    program: String,
}

impl SshTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            program: "ssh".to_string(),
        }
    }

    /// Use a different client binary (tests, wrappers).
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    fn build_command(&self, target: &ConnectionDescriptor, command: &str) -> Command {
        let mut ssh_args: Vec<String> = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if target.password.is_none() {
            ssh_args.push("-o".to_string());
            ssh_args.push("BatchMode=yes".to_string());
        }
        ssh_args.push(format!("{}@{}", target.username, target.host));
        ssh_args.push(command.to_string());

        let mut cmd = match &target.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(&self.program).env("SSHPASS", password);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.args(&ssh_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl RemoteExec for SshTransport {
    fn exec<'a>(&'a self, target: &'a ConnectionDescriptor, command: &'a str) -> ExecFuture<'a> {
        Box::pin(async move {
            debug!(host = %target.host, transport = %target.transport, "opening ssh session");
            let output = self
                .build_command(target, command)
                .output()
                .await
                .map_err(|e| ExecError::Connect {
                    host: target.host.clone(),
                    reason: format!("spawn {}: {e}", self.program),
                })?;

            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            match output.status.code() {
                Some(SSH_CONNECT_ERROR) => Err(ExecError::Connect {
                    host: target.host.clone(),
                    reason: stderr,
                }),
                None => Err(ExecError::Session {
                    host: target.host.clone(),
                    reason: "terminated by signal".to_string(),
                }),
                // Non-zero remote exit still yields output worth parsing.
                Some(_) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            }
        })
    }
}
