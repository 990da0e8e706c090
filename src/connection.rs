//! Connection manager.
//!
//! Picks an authentication method for the client, opens the one persistent
//! session an orchestrator owns, and closes it. Key material is found
//! deterministically as `<key_dir>/<local-user>_<host>.pem`; a Windows
//! client or a missing key falls back to the configured password.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ClientOs, TargetConfig};
use crate::transport::{AuthMethod, RawOutput, SshTarget, SshTransport, Transport, TransportError};

pub fn key_file_name(local_user: &str, host: &str) -> String {
    format!("{}_{}.pem", local_user, host)
}

pub fn locate_key(key_dir: &Path, local_user: &str, host: &str) -> PathBuf {
    key_dir.join(key_file_name(local_user, host))
}

/// Name of the user running the orchestrator.
#[cfg(unix)]
pub fn local_username() -> Option<String> {
    use nix::unistd::{Uid, User};

    match User::from_uid(Uid::current()) {
        Ok(Some(user)) => Some(user.name),
        Ok(None) => None,
        Err(e) => {
            log::debug!("cannot resolve local user: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
pub fn local_username() -> Option<String> {
    None
}

fn default_key_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh"))
}

/// Choose how to authenticate, or `None` when neither a usable key nor a
/// password is available.
pub fn choose_auth(target: &TargetConfig, local_user: Option<&str>) -> Option<AuthMethod> {
    let password = target.password.clone().map(AuthMethod::Password);
    if target.os == ClientOs::Windows {
        return password;
    }
    if let Some(key) = target.key_path.as_ref().filter(|k| k.is_file()) {
        return Some(AuthMethod::Key(key.clone()));
    }
    let discovered = local_user.and_then(|user| {
        let dir = target.key_dir.clone().or_else(default_key_dir)?;
        let key = locate_key(&dir, user, &target.host);
        if key.is_file() {
            Some(key)
        } else {
            log::debug!("no key at {}", key.display());
            None
        }
    });
    match discovered {
        Some(key) => Some(AuthMethod::Key(key)),
        None => password,
    }
}

/// The single remote session owned by one orchestrator.
pub struct Connection {
    host: String,
    transport: Box<dyn Transport>,
    open: bool,
}

impl Connection {
    /// Open an SSH session to the configured target. `None` when no
    /// authentication method is usable.
    pub fn ssh(target: &TargetConfig) -> std::io::Result<Option<Connection>> {
        let local_user = local_username();
        let Some(auth) = choose_auth(target, local_user.as_deref()) else {
            return Ok(None);
        };
        log::info!(
            "connecting to {}@{}:{} using {}",
            target.username,
            target.host,
            target.port,
            match auth {
                AuthMethod::Key(_) => "key",
                AuthMethod::Password(_) => "password",
            }
        );
        let transport = SshTransport::new(SshTarget {
            host: target.host.clone(),
            port: target.port,
            username: target.username.clone(),
            auth,
        })?;
        Ok(Some(Connection::new(&target.host, Box::new(transport))))
    }

    /// Wrap an already-built transport.
    pub fn new(host: &str, transport: Box<dyn Transport>) -> Self {
        Connection {
            host: host.to_string(),
            transport,
            open: true,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn execute(&mut self, command: &str, timeout: Duration) -> Result<RawOutput, TransportError> {
        self.run(command, None, timeout)
    }

    pub fn run(&mut self, command: &str, input: Option<&str>, timeout: Duration) -> Result<RawOutput, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.transport.run(command, input, timeout)
    }

    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        match self.transport.close() {
            Ok(()) => log::info!("session to {} closed", self.host),
            Err(e) => log::warn!("closing session to {} failed: {}", self.host, e),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
