//! Cloud execution indirection.
//!
//! Reroutes a client command through the provider's run-command facility
//! (`az vm run-command invoke`) driven from the orchestrating host. Each
//! command costs two provider calls: removing the run-command extension to
//! clear any stuck prior invocation, then the invocation itself. The
//! provider wraps the client's streams in a JSON envelope; they are pulled
//! back out from fixed markers:
//!
//! - Linux: `value[0].message` holds `[stdout]\n...\n[stderr]\n...`
//! - Windows: `value[0]` is `ComponentStatus/StdOut/...`, `value[1]` is
//!   `ComponentStatus/StdErr/...`

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::command::CommandLine;
use crate::config::{ClientOs, CloudConfig};
use crate::transport::{RawOutput, Transport, TransportError};

#[derive(Debug, Error)]
pub enum CloudError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("response is missing the {marker} marker")]
    Parse { marker: String, response: String },
}

fn missing(marker: &str, response: &str) -> CloudError {
    CloudError::Parse {
        marker: marker.to_string(),
        response: response.to_string(),
    }
}

/// The VM a run-command is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTarget {
    pub subscription: Option<String>,
    pub resource_group: String,
    pub vm_name: String,
}

impl From<&CloudConfig> for CloudTarget {
    fn from(config: &CloudConfig) -> Self {
        CloudTarget {
            subscription: config.subscription.clone(),
            resource_group: config.resource_group.clone(),
            vm_name: config.vm_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunCommandResponse {
    #[serde(default)]
    value: Vec<StatusEntry>,
}

#[derive(Debug, Deserialize)]
struct StatusEntry {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn extension_name(os: ClientOs) -> &'static str {
    match os {
        ClientOs::Linux => "RunCommandLinux",
        ClientOs::Windows => "RunCommandWindows",
    }
}

fn command_id(os: ClientOs) -> &'static str {
    match os {
        ClientOs::Linux => "RunShellScript",
        ClientOs::Windows => "RunPowerShellScript",
    }
}

/// Recover the client command's streams from a provider response.
pub fn parse_response(response: &str, os: ClientOs) -> Result<RawOutput, CloudError> {
    let parsed: RunCommandResponse =
        serde_json::from_str(response).map_err(|_| missing("value", response))?;
    match os {
        ClientOs::Linux => {
            let message = &parsed
                .value
                .first()
                .ok_or_else(|| missing("value[0]", response))?
                .message;
            let out_at = message
                .find("[stdout]")
                .ok_or_else(|| missing("[stdout]", response))?;
            let err_at = message
                .find("[stderr]")
                .ok_or_else(|| missing("[stderr]", response))?;
            if err_at < out_at {
                return Err(missing("[stdout] before [stderr]", response));
            }
            Ok(RawOutput {
                stdout: message[out_at + "[stdout]".len()..err_at]
                    .trim_matches('\n')
                    .to_string(),
                stderr: message[err_at + "[stderr]".len()..].trim().to_string(),
                exit_code: None,
            })
        }
        ClientOs::Windows => {
            let stdout = parsed
                .value
                .first()
                .filter(|entry| entry.code.contains("StdOut"))
                .ok_or_else(|| missing("StdOut", response))?;
            let stderr = parsed
                .value
                .get(1)
                .filter(|entry| entry.code.contains("StdErr"))
                .ok_or_else(|| missing("StdErr", response))?;
            Ok(RawOutput {
                stdout: stdout.message.clone(),
                stderr: stderr.message.trim().to_string(),
                exit_code: None,
            })
        }
    }
}

/// Sends client commands through the provider CLI on the orchestrating host.
pub struct CloudRelay {
    target: CloudTarget,
    transport: Box<dyn Transport>,
}

impl CloudRelay {
    pub fn new(target: CloudTarget, transport: Box<dyn Transport>) -> Self {
        CloudRelay { target, transport }
    }

    fn with_subscription(&self, command: CommandLine) -> CommandLine {
        match &self.target.subscription {
            Some(subscription) => command.arg("--subscription").value(subscription),
            None => command,
        }
    }

    pub fn clear_command(&self, os: ClientOs) -> CommandLine {
        let command = CommandLine::new("az")
            .arg("vm")
            .arg("extension")
            .arg("delete")
            .arg("--resource-group")
            .value(&self.target.resource_group)
            .arg("--vm-name")
            .value(&self.target.vm_name)
            .arg("--name")
            .arg(extension_name(os));
        self.with_subscription(command)
    }

    pub fn invoke_command(&self, script: &str, os: ClientOs) -> CommandLine {
        let command = CommandLine::new("az")
            .arg("vm")
            .arg("run-command")
            .arg("invoke")
            .arg("--resource-group")
            .value(&self.target.resource_group)
            .arg("--name")
            .value(&self.target.vm_name)
            .arg("--command-id")
            .arg(command_id(os))
            .arg("--scripts")
            .value(script);
        self.with_subscription(command).arg("--output").arg("json")
    }

    /// Run `script` on the VM and return its own stdout/stderr.
    pub fn run(&mut self, script: &str, os: ClientOs, timeout: Duration) -> Result<RawOutput, CloudError> {
        // The provider CLI always runs under the local POSIX shell.
        let clear = self.clear_command(os).render(ClientOs::Linux);
        match self.transport.execute(&clear, timeout) {
            Ok(out) if out.exit_code.unwrap_or(0) != 0 => {
                log::debug!("run-command clear exited non-zero: {}", out.stderr.trim())
            }
            Ok(_) => {}
            Err(e) => log::debug!("run-command clear failed: {}", e),
        }
        let invoke = self.invoke_command(script, os).render(ClientOs::Linux);
        let response = self.transport.execute(&invoke, timeout)?;
        parse_response(&response.stdout, os)
    }
}
