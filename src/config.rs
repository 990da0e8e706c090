use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logging::LogTimezone;

/// Which storage backend exported the volume under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cloud,
    Onprem,
}

/// Operating-system family of the client machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientOs {
    Linux,
    Windows,
}

impl ClientOs {
    pub fn is_posix(self) -> bool {
        matches!(self, ClientOs::Linux)
    }
}

/// Orchestrator configuration with sensible defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub target: TargetConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub backend: Backend,
    /// Client label, used only in logs
    #[serde(default)]
    pub client: String,
    /// Project label, used only in logs
    #[serde(default)]
    pub project: String,
    pub os: ClientOs,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Explicit private key, bypassing key discovery
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Directory searched for `<local-user>_<host>.pem`
    #[serde(default)]
    pub key_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Route every command through the provider's run-command facility
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub vm_name: String,
}

/// Paths of a companion script on each client OS family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptPaths {
    pub linux: String,
    pub windows: String,
}

impl ScriptPaths {
    pub fn for_os(&self, os: ClientOs) -> &str {
        match os {
            ClientOs::Linux => &self.linux,
            ClientOs::Windows => &self.windows,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Soft timeout applied to commands that don't set their own
    pub command_timeout_secs: u64,
    /// Parent directory for NFS mount points
    pub mount_base_dir: String,
    /// Suffix NFS mount directories with the epoch second
    pub timestamped_mounts: bool,
    /// Tree generation tool on the client
    pub tree_tool: ScriptPaths,
    /// Companion mount/fileops/unmount script
    pub fileops_script: ScriptPaths,
    /// Companion tracker generator script
    pub tracker_script: ScriptPaths,
    pub log_timezone: LogTimezone,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            command_timeout_secs: 300,
            mount_base_dir: "/tmp".to_string(),
            timestamped_mounts: true,
            tree_tool: ScriptPaths {
                linux: "/usr/local/bin/treegen".to_string(),
                windows: "C:\\volqa\\treegen.exe".to_string(),
            },
            fileops_script: ScriptPaths {
                linux: "/opt/volqa/python_fileops.py".to_string(),
                windows: "C:\\volqa\\python_fileops.py".to_string(),
            },
            tracker_script: ScriptPaths {
                linux: "/opt/volqa/GenerateTracker.py".to_string(),
                windows: "C:\\volqa\\GenerateTracker.py".to_string(),
            },
            log_timezone: LogTimezone::Utc,
        }
    }
}

fn default_port() -> u16 {
    22
}

impl Config {
    /// Default configuration for a Linux client against an on-prem backend
    pub fn production() -> Self {
        Config {
            target: TargetConfig {
                backend: Backend::Onprem,
                client: String::new(),
                project: String::new(),
                os: ClientOs::Linux,
                host: String::new(),
                port: default_port(),
                username: "root".to_string(),
                password: None,
                key_path: None,
                key_dir: None,
            },
            cloud: CloudConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }

    /// Testing configuration: a placeholder host and short timeouts
    pub fn testing() -> Self {
        let mut config = Self::production();
        config.target.host = "192.0.2.10".to_string();
        config.target.username = "qa".to_string();
        config.target.password = Some("secret".to_string());
        config.execution.command_timeout_secs = 30;
        config
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load and validate a JSON file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_json(&json)?;
        config
            .validate()
            .map_err(|errors| anyhow::anyhow!("Invalid config: {}", errors.join("; ")))?;
        Ok(config)
    }

    /// Save to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.target.host.trim().is_empty() {
            errors.push("target.host must be set".to_string());
        }

        if self.target.username.trim().is_empty() {
            errors.push("target.username must be set".to_string());
        }

        if self.target.port == 0 {
            errors.push("target.port must be > 0".to_string());
        }

        if self.execution.command_timeout_secs == 0 {
            errors.push("execution.command_timeout_secs must be > 0".to_string());
        }

        if !self.execution.mount_base_dir.starts_with('/') {
            errors.push("execution.mount_base_dir must be an absolute path".to_string());
        }

        if self.cloud.enabled {
            if self.cloud.resource_group.trim().is_empty() {
                errors.push("cloud.resource_group is required when cloud.enabled".to_string());
            }
            if self.cloud.vm_name.trim().is_empty() {
                errors.push("cloud.vm_name is required when cloud.enabled".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.execution.command_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::production()
    }
}

/// Configuration builder for fluent API
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::production(),
        }
    }

    pub fn from_preset(preset: &str) -> Self {
        let config = match preset {
            "testing" => Config::testing(),
            _ => Config::production(),
        };

        ConfigBuilder { config }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.target.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.target.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.target.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.target.password = Some(password.into());
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.target.key_path = Some(path.into());
        self
    }

    pub fn client_os(mut self, os: ClientOs) -> Self {
        self.config.target.os = os;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.target.backend = backend;
        self
    }

    pub fn labels(mut self, client: impl Into<String>, project: impl Into<String>) -> Self {
        self.config.target.client = client.into();
        self.config.target.project = project.into();
        self
    }

    pub fn cloud(mut self, resource_group: impl Into<String>, vm_name: impl Into<String>) -> Self {
        self.config.cloud.enabled = true;
        self.config.cloud.resource_group = resource_group.into();
        self.config.cloud.vm_name = vm_name.into();
        self
    }

    pub fn command_timeout_secs(mut self, secs: u64) -> Self {
        self.config.execution.command_timeout_secs = secs;
        self
    }

    pub fn mount_base_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.execution.mount_base_dir = dir.into();
        self
    }

    pub fn timestamped_mounts(mut self, enable: bool) -> Self {
        self.config.execution.timestamped_mounts = enable;
        self
    }

    pub fn log_timezone(mut self, timezone: LogTimezone) -> Self {
        self.config.execution.log_timezone = timezone;
        self
    }

    pub fn build(self) -> anyhow::Result<Config> {
        match self.config.validate() {
            Ok(()) => Ok(self.config),
            Err(errors) => Err(anyhow::anyhow!("Configuration validation failed: {}", errors.join("; ")))
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_requires_host() {
        let errors = Config::production().validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("target.host")));
    }

    #[test]
    fn test_testing_config() {
        let config = Config::testing();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.command_timeout_secs, 30);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = Config::testing();
        let restored = Config::from_json(&config.to_json()).unwrap();
        assert_eq!(restored.target.host, config.target.host);
        assert_eq!(restored.target.os, ClientOs::Linux);
    }

    #[test]
    fn test_minimal_json_fills_defaults() {
        let json = r#"{
            "target": {
                "backend": "cloud",
                "os": "windows",
                "host": "10.1.2.3",
                "username": "Administrator",
                "password": "pw"
            }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.target.port, 22);
        assert_eq!(config.target.backend, Backend::Cloud);
        assert!(!config.cloud.enabled);
        assert_eq!(config.execution.mount_base_dir, "/tmp");
        assert!(config.execution.timestamped_mounts);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cloud_requires_resource_ids() {
        let mut config = Config::testing();
        config.cloud.enabled = true;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .host("10.0.0.9")
            .username("qa")
            .client_os(ClientOs::Windows)
            .cloud("rg-qa", "vm-client-1")
            .timestamped_mounts(false)
            .build()
            .unwrap();

        assert_eq!(config.target.os, ClientOs::Windows);
        assert!(config.cloud.enabled);
        assert!(!config.execution.timestamped_mounts);
    }

    #[test]
    fn test_builder_rejects_relative_base_dir() {
        let result = ConfigBuilder::from_preset("testing")
            .mount_base_dir("mnt")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_sets_labels() {
        let config = ConfigBuilder::from_preset("testing")
            .labels("acme", "nightly")
            .build()
            .unwrap();
        assert_eq!(config.target.client, "acme");
        assert_eq!(config.target.project, "nightly");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volqa.json");
        std::fs::write(&path, Config::testing().to_json()).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.target.username, "qa");
    }

    #[test]
    fn test_script_paths_per_os() {
        let exec = ExecutionConfig::default();
        assert!(exec.fileops_script.for_os(ClientOs::Linux).ends_with(".py"));
        assert!(exec.fileops_script.for_os(ClientOs::Windows).starts_with("C:\\"));
    }
}
