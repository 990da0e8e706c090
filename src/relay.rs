//! Companion-script relays.
//!
//! Two scripts are assumed to be installed on the client: a fileops script
//! that mounts, exercises and unmounts a volume on its own, and a tracker
//! generator that indexes a tree for later comparison. The relays only build
//! and issue the invocation; interpreter and argument order differ between
//! client OS families.

use std::fmt;
use std::time::Duration;

use crate::command::CommandLine;
use crate::config::ClientOs;
use crate::descriptor::Endpoint;
use crate::error::{Error, Result};
use crate::orchestrator::VolumeOrchestrator;
use crate::registry::TargetOptions;
use crate::result::StatusReport;

/// Phases the fileops script runs, in its fixed order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptMode {
    pub mount: bool,
    pub fileops: bool,
    pub unmount: bool,
}

impl ScriptMode {
    pub const ALL: ScriptMode = ScriptMode {
        mount: true,
        fileops: true,
        unmount: true,
    };

    /// Parse a composition of `m`, `f` and `u`.
    pub fn parse(letters: &str) -> Result<Self> {
        let mut mode = ScriptMode::default();
        for letter in letters.chars() {
            match letter.to_ascii_lowercase() {
                'm' => mode.mount = true,
                'f' => mode.fileops = true,
                'u' => mode.unmount = true,
                other => {
                    return Err(Error::InvalidOption(format!(
                        "unknown script mode letter {:?}",
                        other
                    )))
                }
            }
        }
        if mode == ScriptMode::default() {
            return Err(Error::InvalidOption("script mode is empty".to_string()));
        }
        Ok(mode)
    }
}

impl fmt::Display for ScriptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, letter) in [(self.mount, 'm'), (self.fileops, 'f'), (self.unmount, 'u')] {
            if set {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

/// `-v volume -ip address -p protocol -m mode`, with the first two swapped
/// on Windows.
pub fn fileops_command(
    os: ClientOs,
    script: &str,
    endpoint: &Endpoint,
    protocol: &str,
    mode: ScriptMode,
) -> CommandLine {
    match os {
        ClientOs::Linux => CommandLine::privileged("python3")
            .value(script)
            .arg("-v")
            .value(&endpoint.volume)
            .arg("-ip")
            .value(&endpoint.server)
            .arg("-p")
            .value(protocol)
            .arg("-m")
            .arg(mode.to_string()),
        ClientOs::Windows => CommandLine::new("python")
            .value(script)
            .arg("-ip")
            .value(&endpoint.server)
            .arg("-v")
            .value(&endpoint.volume)
            .arg("-p")
            .value(protocol)
            .arg("-m")
            .arg(mode.to_string()),
    }
}

/// Which index the tracker generator writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Baseline,
    Incremental(u32),
}

impl TrackerKind {
    fn type_name(self) -> &'static str {
        match self {
            TrackerKind::Baseline => "baseline",
            TrackerKind::Incremental(_) => "incremental",
        }
    }
}

pub fn tracker_command(os: ClientOs, script: &str, path: &str, kind: TrackerKind) -> CommandLine {
    let line = match os {
        ClientOs::Linux => CommandLine::new("python2")
            .value(script)
            .arg("--path")
            .value(path)
            .arg("--type")
            .arg(kind.type_name()),
        ClientOs::Windows => CommandLine::new("python")
            .value(script)
            .arg("--type")
            .arg(kind.type_name())
            .arg("--path")
            .value(path),
    };
    match kind {
        TrackerKind::Baseline => line,
        TrackerKind::Incremental(n) => line.arg("--incremental_number").arg(n.to_string()),
    }
}

/// Options for [`VolumeOrchestrator::relay_fileops`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileopsOptions {
    pub protocol: String,
    pub mode: ScriptMode,
    pub timeout: Option<Duration>,
}

impl FileopsOptions {
    pub fn new(protocol: impl Into<String>, mode: ScriptMode) -> Self {
        FileopsOptions {
            protocol: protocol.into(),
            mode,
            timeout: None,
        }
    }
}

/// Options for [`VolumeOrchestrator::relay_tracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerOptions {
    pub kind: TrackerKind,
    pub timeout: Option<Duration>,
    pub target: TargetOptions,
}

impl TrackerOptions {
    pub fn new(kind: TrackerKind) -> Self {
        TrackerOptions {
            kind,
            timeout: None,
            target: TargetOptions::default(),
        }
    }
}

impl VolumeOrchestrator {
    /// Hand a volume to the fileops script. The script manages its own
    /// mount directory, so the registry is left untouched.
    pub fn relay_fileops(&mut self, endpoint: &Endpoint, options: FileopsOptions) -> Result<StatusReport> {
        let protocol = options.protocol.to_ascii_lowercase();
        if !["nfs", "smb", "cifs"].iter().any(|p| protocol.contains(p)) {
            return Err(Error::InvalidOption(format!(
                "fileops script does not understand protocol {:?}",
                options.protocol
            )));
        }
        let os = self.client_os();
        let script = self.config.execution.fileops_script.for_os(os).to_string();
        let line = fileops_command(os, &script, endpoint, &options.protocol, options.mode);

        let mut report = self.begin();
        let mut step = self.step(
            format!("Run fileops script ({}) on {}", options.mode, endpoint.volume),
            &line,
        );
        if let Some(timeout) = options.timeout {
            step = step.timeout(timeout);
        }
        self.run(&mut report, &step)?;
        Ok(report.finish())
    }

    /// Index the tree under a mounted volume.
    pub fn relay_tracker(&mut self, volume: &str, options: TrackerOptions) -> Result<StatusReport> {
        let TrackerOptions {
            kind,
            timeout,
            mut target,
        } = options;
        if kind == TrackerKind::Incremental(0) {
            return Err(Error::InvalidOption("incremental number starts at 1".to_string()));
        }
        let mount = self.registry.resolve_existing(volume, &mut target)?;
        let os = self.client_os();
        let script = self.config.execution.tracker_script.for_os(os).to_string();
        let line = tracker_command(os, &script, &mount.root(), kind);

        let mut report = self.begin();
        let mut step = self.step(format!("Generate {} tracker for {}", kind.type_name(), volume), &line);
        if let Some(timeout) = timeout {
            step = step.timeout(timeout);
        }
        self.run(&mut report, &step)?;
        Ok(report.finish())
    }
}
