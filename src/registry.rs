//! Volume/drive registry.
//!
//! Maps a volume's creation token to where it is mounted on the client: a
//! local directory for NFS or a drive letter for SMB. One registry is owned
//! by each orchestrator; entries exist only between a mount and its unmount.

use std::collections::HashMap;

use crate::command;
use crate::config::ClientOs;
use crate::error::{Error, Result};

/// NFS protocol version selected from a caller string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfsVersion {
    V3,
    V4_1,
}

impl NfsVersion {
    /// `"v3"`, `"nfsv3"` and the like select 3; anything else 4.1.
    pub fn from_protocol(protocol: &str) -> Self {
        if protocol.contains('3') {
            NfsVersion::V3
        } else {
            NfsVersion::V4_1
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NfsVersion::V3 => "3",
            NfsVersion::V4_1 => "4.1",
        }
    }
}

/// File-sharing protocol of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Nfs(NfsVersion),
    Smb,
}

impl Protocol {
    pub fn parse(protocol: &str) -> Self {
        let lower = protocol.to_ascii_lowercase();
        if lower.contains("smb") || lower.contains("cifs") {
            Protocol::Smb
        } else {
            Protocol::Nfs(NfsVersion::from_protocol(&lower))
        }
    }
}

/// Where a volume is mounted on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    Path(String),
    Drive(char),
}

impl MountTarget {
    /// Root directory of the mount as the client sees it.
    pub fn root(&self) -> String {
        match self {
            MountTarget::Path(path) => path.clone(),
            MountTarget::Drive(letter) => format!("{}:\\", letter),
        }
    }

    /// A child path under the mount root.
    pub fn join(&self, name: &str) -> String {
        match self {
            MountTarget::Path(path) => command::join(ClientOs::Linux, path, name),
            MountTarget::Drive(_) => command::join(ClientOs::Windows, &self.root(), name),
        }
    }
}

/// Drive letter request for an SMB mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSelection {
    /// Let Windows pick the next free letter (`net use *`).
    Auto,
    Letter(char),
}

impl DriveSelection {
    /// Accepts `*`, `Z`, `z:` and similar.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim().trim_end_matches(':');
        if trimmed == "*" {
            return Ok(DriveSelection::Auto);
        }
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => {
                Ok(DriveSelection::Letter(c.to_ascii_uppercase()))
            }
            _ => Err(Error::InvalidOption(format!("bad drive letter {:?}", value))),
        }
    }
}

/// Path/drive overrides a caller may pass to any volume operation. Keys are
/// consumed by target resolution and never forwarded further.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetOptions {
    pub path: Option<String>,
    pub drive: Option<DriveSelection>,
}

impl TargetOptions {
    pub fn path(path: impl Into<String>) -> Self {
        TargetOptions {
            path: Some(path.into()),
            drive: None,
        }
    }

    pub fn drive(drive: DriveSelection) -> Self {
        TargetOptions {
            path: None,
            drive: Some(drive),
        }
    }
}

/// How a new NFS mount directory is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountNaming {
    pub base_dir: String,
    pub timestamped: bool,
    /// Epoch seconds used as the suffix when `timestamped`.
    pub epoch: i64,
}

impl MountNaming {
    pub fn directory_for(&self, volume: &str) -> String {
        let name = if self.timestamped {
            format!("{}-{}", volume, self.epoch)
        } else {
            volume.to_string()
        };
        command::join(ClientOs::Linux, &self.base_dir, &name)
    }
}

/// Outcome of resolving a mount target for a mount operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Target(MountTarget),
    /// SMB with an automatic letter; known only after `net use *` runs.
    PendingDrive,
}

#[derive(Debug, Default)]
pub struct MountRegistry {
    entries: HashMap<String, MountTarget>,
}

impl MountRegistry {
    pub fn new() -> Self {
        MountRegistry {
            entries: HashMap::new(),
        }
    }

    pub fn record(&mut self, volume: &str, target: MountTarget) {
        log::debug!("registry: {} -> {:?}", volume, target);
        self.entries.insert(volume.to_string(), target);
    }

    pub fn get(&self, volume: &str) -> Option<&MountTarget> {
        self.entries.get(volume)
    }

    pub fn remove(&mut self, volume: &str) -> Option<MountTarget> {
        let removed = self.entries.remove(volume);
        if removed.is_some() {
            log::debug!("registry: {} removed", volume);
        }
        removed
    }

    pub fn contains(&self, volume: &str) -> bool {
        self.entries.contains_key(volume)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute or create the mount target for a mount operation and record
    /// it. NFS: explicit path, else the recorded path, else a fresh
    /// directory named by `naming`. SMB: explicit letter, else the recorded
    /// letter, else an automatic letter left pending until the mount reports it.
    pub fn resolve_mount_target(
        &mut self,
        volume: &str,
        protocol: Protocol,
        options: &mut TargetOptions,
        naming: &MountNaming,
    ) -> Resolved {
        let explicit_path = options.path.take();
        let explicit_drive = options.drive.take();
        match protocol {
            Protocol::Nfs(_) => {
                let path = match (explicit_path, self.get(volume)) {
                    (Some(path), _) => path,
                    (None, Some(MountTarget::Path(path))) => path.clone(),
                    (None, _) => naming.directory_for(volume),
                };
                let target = MountTarget::Path(path);
                self.record(volume, target.clone());
                Resolved::Target(target)
            }
            Protocol::Smb => {
                let letter = match (explicit_drive, self.get(volume)) {
                    (Some(DriveSelection::Letter(letter)), _) => Some(letter),
                    (Some(DriveSelection::Auto), _) => None,
                    (None, Some(MountTarget::Drive(letter))) => Some(*letter),
                    (None, _) => None,
                };
                match letter {
                    Some(letter) => {
                        let target = MountTarget::Drive(letter);
                        self.record(volume, target.clone());
                        Resolved::Target(target)
                    }
                    None => Resolved::PendingDrive,
                }
            }
        }
    }

    /// Resolve the target of an already-mounted volume for workload and
    /// unmount operations. An explicit override is recorded and wins; a
    /// volume with neither override nor record is an error.
    pub fn resolve_existing(
        &mut self,
        volume: &str,
        options: &mut TargetOptions,
    ) -> Result<MountTarget> {
        let explicit = match (options.path.take(), options.drive.take()) {
            (Some(path), _) => Some(MountTarget::Path(path)),
            (None, Some(DriveSelection::Letter(letter))) => Some(MountTarget::Drive(letter)),
            (None, Some(DriveSelection::Auto)) | (None, None) => None,
        };
        if let Some(target) = explicit {
            self.record(volume, target.clone());
            return Ok(target);
        }
        self.get(volume).cloned().ok_or_else(|| Error::UnknownVolume {
            volume: volume.to_string(),
        })
    }
}
