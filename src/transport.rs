//! Remote-execution transports.
//!
//! A [`Transport`] runs one command string, optionally feeding it a stdin
//! payload, and returns its raw stdout and stderr, enforcing a soft timeout
//! on the read. It knows nothing about
//! status markers or reports; that is the executor's job.
//!
//! - [`SshTransport`]: the client session, a multiplexed OpenSSH
//!   ControlMaster connection so every command rides one authenticated channel.
//! - [`LocalTransport`]: `sh -c` on the orchestrating host, used to drive
//!   cloud CLIs.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;

/// Raw streams of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RawOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        RawOutput {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("no output within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("session is closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes one command and drains it before returning.
pub trait Transport: Send {
    /// Run `command`, writing `input` to its stdin and then closing it.
    fn run(&mut self, command: &str, input: Option<&str>, timeout: Duration) -> Result<RawOutput, TransportError>;

    fn execute(&mut self, command: &str, timeout: Duration) -> Result<RawOutput, TransportError> {
        self.run(command, None, timeout)
    }

    /// Release the underlying session. Idempotent.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Run a prepared process to completion or until `timeout` elapses. On
/// timeout the child is abandoned, not killed.
fn run_to_completion(
    runtime: &Runtime,
    mut command: tokio::process::Command,
    program: &str,
    input: Option<&str>,
    timeout: Duration,
) -> Result<RawOutput, TransportError> {
    let stdin = if input.is_some() { Stdio::piped() } else { Stdio::null() };
    command.stdin(stdin).stdout(Stdio::piped()).stderr(Stdio::piped());
    runtime.block_on(async move {
        let mut child = command.spawn().map_err(|e| TransportError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;
        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            // a command that never reads its stdin may exit first
            match stdin.write_all(input.as_bytes()).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(RawOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code(),
                })
            }
            Err(_) => Err(TransportError::Timeout {
                seconds: timeout.as_secs(),
            }),
        }
    })
}

fn current_thread_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// How the SSH session authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Key(PathBuf),
    Password(String),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Key(path) => f.debug_tuple("Key").field(path).finish(),
            AuthMethod::Password(_) => f.write_str("Password(***)"),
        }
    }
}

/// Where to connect and as whom.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
}

impl SshTarget {
    pub fn user_at_host(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

/// OpenSSH client session multiplexed over a ControlMaster socket.
pub struct SshTransport {
    target: SshTarget,
    control_path: PathBuf,
    runtime: Runtime,
    open: bool,
}

impl SshTransport {
    pub fn new(target: SshTarget) -> std::io::Result<Self> {
        let control_path =
            std::env::temp_dir().join(format!("volqa-{}.sock", uuid::Uuid::new_v4().simple()));
        Ok(SshTransport {
            target,
            control_path,
            runtime: current_thread_runtime()?,
            open: true,
        })
    }

    /// Options shared by every invocation on this session.
    pub fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.target.port.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
        ];
        match &self.target.auth {
            AuthMethod::Key(key) => {
                args.push("-i".to_string());
                args.push(key.display().to_string());
                args.push("-o".to_string());
                args.push("BatchMode=yes".to_string());
            }
            AuthMethod::Password(_) => {
                args.push("-o".to_string());
                args.push("PreferredAuthentications=password,keyboard-interactive".to_string());
                args.push("-o".to_string());
                args.push("PubkeyAuthentication=no".to_string());
            }
        }
        args
    }

    /// `ssh`, or `sshpass -e ssh` with the password in `SSHPASS` so it
    /// never appears in argv.
    fn ssh_command(&self) -> (tokio::process::Command, &'static str) {
        match &self.target.auth {
            AuthMethod::Key(_) => (tokio::process::Command::new("ssh"), "ssh"),
            AuthMethod::Password(password) => {
                let mut command = tokio::process::Command::new("sshpass");
                command.env("SSHPASS", password).arg("-e").arg("ssh");
                (command, "sshpass")
            }
        }
    }
}

impl Transport for SshTransport {
    fn run(&mut self, command: &str, input: Option<&str>, timeout: Duration) -> Result<RawOutput, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let (mut ssh, program) = self.ssh_command();
        ssh.args(self.base_args())
            .arg(self.target.user_at_host())
            .arg(command);
        run_to_completion(&self.runtime, ssh, program, input, timeout)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        if !self.control_path.exists() {
            return Ok(());
        }
        let mut ssh = tokio::process::Command::new("ssh");
        ssh.arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(self.target.user_at_host());
        run_to_completion(&self.runtime, ssh, "ssh", None, Duration::from_secs(10))?;
        log::debug!("closed session to {}", self.target.host);
        Ok(())
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::debug!("best-effort close of {} failed: {}", self.target.host, e);
        }
    }
}

/// `sh -c` on the orchestrating host.
pub struct LocalTransport {
    runtime: Runtime,
}

impl LocalTransport {
    pub fn new() -> std::io::Result<Self> {
        Ok(LocalTransport {
            runtime: current_thread_runtime()?,
        })
    }
}

impl Transport for LocalTransport {
    fn run(&mut self, command: &str, input: Option<&str>, timeout: Duration) -> Result<RawOutput, TransportError> {
        let mut sh = tokio::process::Command::new("sh");
        sh.arg("-c").arg(command);
        run_to_completion(&self.runtime, sh, "sh", input, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(auth: AuthMethod) -> SshTarget {
        SshTarget {
            host: "10.0.0.1".to_string(),
            port: 2222,
            username: "qa".to_string(),
            auth,
        }
    }

    #[test]
    fn test_base_args_with_key() {
        let transport = SshTransport::new(target(AuthMethod::Key("/keys/qa_10.0.0.1.pem".into()))).unwrap();
        let args = transport.base_args();
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/keys/qa_10.0.0.1.pem".to_string()));
        assert!(args.contains(&"ControlMaster=auto".to_string()));
        assert!(args.iter().any(|a| a.starts_with("ControlPath=") && a.ends_with(".sock")));
    }

    #[test]
    fn test_base_args_with_password_hide_secret() {
        let transport = SshTransport::new(target(AuthMethod::Password("hunter2".into()))).unwrap();
        let args = transport.base_args();
        assert!(!args.contains(&"-i".to_string()));
        assert!(args.contains(&"PubkeyAuthentication=no".to_string()));
        assert!(args.iter().all(|a| !a.contains("hunter2")));
        assert_eq!(format!("{:?}", transport.target.auth), "Password(***)");
    }

    #[test]
    fn test_closed_session_refuses_commands() {
        let mut transport = SshTransport::new(target(AuthMethod::Key("/nonexistent".into()))).unwrap();
        transport.open = false;
        let err = transport.execute("true", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(transport.close().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_local_transport_captures_streams() {
        let mut local = LocalTransport::new().unwrap();
        let out = local
            .execute("echo hello; echo oops 1>&2", Duration::from_secs(10))
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn test_local_transport_feeds_stdin() {
        let mut local = LocalTransport::new().unwrap();
        let out = local
            .run("read line; echo got $line", Some("pw\n"), Duration::from_secs(10))
            .unwrap();
        assert_eq!(out.stdout.trim(), "got pw");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_transport_times_out() {
        let mut local = LocalTransport::new().unwrap();
        let err = local.execute("sleep 5", Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }
}
