//! Mount and unmount orchestration.
//!
//! Each protocol runs a fixed, linear sequence of remote steps. Every step's
//! record is appended in call order whether or not an earlier one failed, so
//! a failing report shows the whole attempt.
//!
//! ```text
//! NFS mount:   resolve path -> mkdir -p -> [test -d] -> chmod 777 -> mount
//!              -> [verify in df -h] -> [refresh df -h]
//! SMB mount:   resolve drive -> net use (letter | *) -> [dir Z:\]
//!              -> [refresh net use]
//! NFS unmount: umount -f -> [mountpoint -q, reversed] -> forget
//!              -> [rmdir] -> [refresh df -h]
//! SMB unmount: net use /delete -> [net use Z:, reversed] -> forget
//!              -> [refresh net use]
//! ```
//!
//! Bracketed steps are skipped in quick mode.

use crate::command;
use crate::config::ClientOs;
use crate::descriptor::Endpoint;
use crate::error::{Error, Result};
use crate::orchestrator::VolumeOrchestrator;
use crate::registry::{MountTarget, NfsVersion, Protocol, Resolved, TargetOptions};
use crate::result::{ReportBuilder, StatusReport};

/// Options for [`VolumeOrchestrator::mount`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// `"nfsv3"`, `"nfsv4.1"`, `"smb"`, ...
    pub protocol: String,
    /// Skip verification steps.
    pub quick: bool,
    pub target: TargetOptions,
    /// Overrides `execution.timestamped_mounts` for this call.
    pub timestamped: Option<bool>,
}

impl MountOptions {
    pub fn new(protocol: impl Into<String>) -> Self {
        MountOptions {
            protocol: protocol.into(),
            ..Default::default()
        }
    }

    pub fn quick(mut self) -> Self {
        self.quick = true;
        self
    }

    pub fn target(mut self, target: TargetOptions) -> Self {
        self.target = target;
        self
    }

    pub fn timestamped(mut self, timestamped: bool) -> Self {
        self.timestamped = Some(timestamped);
        self
    }
}

/// Options for [`VolumeOrchestrator::unmount`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmountOptions {
    pub quick: bool,
    pub target: TargetOptions,
}

impl UnmountOptions {
    pub fn quick() -> Self {
        UnmountOptions {
            quick: true,
            ..Default::default()
        }
    }
}

/// True when a `df -h` line shows `server:/volume` mounted on `path`.
fn listed_in_disk_usage(line: &str, volume: &str, path: &str) -> bool {
    let export = format!(":/{}", volume);
    let mut fields = line.split_whitespace();
    let source_matches = fields.next().map_or(false, |source| source.ends_with(&export));
    source_matches && line.split_whitespace().any(|field| field == path)
}

impl VolumeOrchestrator {
    fn check_protocol(&self, protocol: Protocol) -> Result<()> {
        match (protocol, self.client_os()) {
            (Protocol::Nfs(_), ClientOs::Linux) | (Protocol::Smb, ClientOs::Windows) => Ok(()),
            (protocol, os) => Err(Error::InvalidOption(format!(
                "{:?} is not supported on a {:?} client",
                protocol, os
            ))),
        }
    }

    /// Mount `endpoint` on the client.
    pub fn mount(&mut self, endpoint: &Endpoint, options: MountOptions) -> Result<StatusReport> {
        let MountOptions {
            protocol,
            quick,
            mut target,
            timestamped,
        } = options;
        let protocol = Protocol::parse(&protocol);
        self.check_protocol(protocol)?;

        let mut naming = self.naming();
        if let Some(timestamped) = timestamped {
            naming.timestamped = timestamped;
        }
        let resolved = self
            .registry
            .resolve_mount_target(&endpoint.volume, protocol, &mut target, &naming);
        log::info!("mounting {} from {} ({:?})", endpoint.volume, endpoint.server, resolved);

        let mut report = self.begin();
        match (protocol, resolved) {
            (Protocol::Nfs(version), Resolved::Target(MountTarget::Path(path))) => {
                self.mount_nfs(&mut report, endpoint, version, &path, quick)?
            }
            (Protocol::Smb, Resolved::Target(MountTarget::Drive(letter))) => {
                self.mount_smb(&mut report, endpoint, Some(letter), quick)?
            }
            (Protocol::Smb, Resolved::PendingDrive) => {
                self.mount_smb(&mut report, endpoint, None, quick)?
            }
            (protocol, resolved) => {
                return Err(Error::InvalidOption(format!(
                    "{:?} cannot mount onto {:?}",
                    protocol, resolved
                )))
            }
        }
        Ok(report.finish())
    }

    fn mount_nfs(
        &mut self,
        report: &mut ReportBuilder,
        endpoint: &Endpoint,
        version: NfsVersion,
        path: &str,
        quick: bool,
    ) -> Result<()> {
        let step = self.step(format!("Create mount directory {}", path), &command::make_dir(path));
        self.run(report, &step)?;
        if !quick {
            let step = self.step(format!("Check {} exists", path), &command::dir_exists(path));
            self.run(report, &step)?;
        }
        // the mount itself runs as root; workloads write as the session user
        let step = self.step(format!("Open permissions on {}", path), &command::open_permissions(path));
        self.run(report, &step)?;

        let mount = command::nfs_mount(&endpoint.server, &endpoint.volume, path, version);
        let step = self.step(
            format!("Mount {} over NFSv{} at {}", endpoint.volume, version.as_str(), path),
            &mount,
        );
        self.run(report, &step)?;

        if quick {
            return Ok(());
        }
        let step = self.step(
            format!("Verify {} is mounted at {}", endpoint.volume, path),
            &command::disk_usage(),
        );
        // df exiting 0 is not enough; the volume has to be listed at the path
        let listing = self.executor.run(&step)?;
        let found = listing.output().map_or(false, |output| {
            output
                .lines()
                .iter()
                .any(|line| listed_in_disk_usage(line, &endpoint.volume, path))
        });
        let passed = listing.passed() && found;
        report.push(listing.with_verdict(passed, "volume not present in filesystem listing"));

        let step = self.step("Refresh mounted filesystems", &command::disk_usage());
        self.run(report, &step)?;
        Ok(())
    }

    fn mount_smb(
        &mut self,
        report: &mut ReportBuilder,
        endpoint: &Endpoint,
        drive: Option<char>,
        quick: bool,
    ) -> Result<()> {
        let mount = command::smb_mount(&endpoint.server, &endpoint.volume, drive);
        let description = match drive {
            Some(letter) => format!("Map {} to {}:", endpoint.volume, letter),
            None => format!("Map {} to the next free drive", endpoint.volume),
        };
        let step = self.step(description, &mount);
        let result = self.executor.run(&step)?;
        // with `*`, the only record of the letter is net use's own output
        let letter = drive.or_else(|| {
            result
                .output()
                .and_then(|output| command::parse_assigned_drive(output.lines()))
        });
        report.push(result);

        let Some(letter) = letter else {
            let record = self.unissued(
                format!("Resolve drive assigned to {}", endpoint.volume),
                "no drive letter reported by net use",
            );
            report.push(record);
            return Ok(());
        };
        if drive.is_none() {
            self.registry.record(&endpoint.volume, MountTarget::Drive(letter));
        }

        if quick {
            return Ok(());
        }
        let root = format!("{}:\\", letter);
        let step = self.step(format!("Verify {} is readable", root), &command::drive_listing(letter));
        let listing = self.executor.run(&step)?;
        let found = listing
            .output()
            .map_or(false, |output| output.lines().iter().any(|line| line.contains(&root)));
        let passed = listing.passed() && found;
        report.push(listing.with_verdict(passed, "drive listing does not show the share root"));

        let step = self.step("Refresh mapped drives", &command::smb_list());
        self.run(report, &step)?;
        Ok(())
    }

    /// Unmount a previously mounted volume and forget its target.
    pub fn unmount(&mut self, volume: &str, options: UnmountOptions) -> Result<StatusReport> {
        let UnmountOptions { quick, mut target } = options;
        let target = self.registry.resolve_existing(volume, &mut target)?;
        log::info!("unmounting {} from {}", volume, target.root());

        let mut report = self.begin();
        match target {
            MountTarget::Path(path) => {
                let step = self.step(format!("Unmount {} from {}", volume, path), &command::nfs_unmount(&path));
                self.run(&mut report, &step)?;
                if !quick {
                    let step = self
                        .step(format!("Verify {} is no longer a mount point", path), &command::is_mountpoint(&path))
                        .reverse_check();
                    self.run(&mut report, &step)?;
                }
                // forgotten even if the unmount failed
                self.registry.remove(volume);
                if !quick {
                    let step = self.step(format!("Remove mount directory {}", path), &command::remove_dir(&path));
                    self.run(&mut report, &step)?;
                    let step = self.step("Refresh mounted filesystems", &command::disk_usage());
                    self.run(&mut report, &step)?;
                }
            }
            MountTarget::Drive(letter) => {
                let step = self.step(format!("Disconnect {}:", letter), &command::smb_unmount(letter));
                self.run(&mut report, &step)?;
                if !quick {
                    let step = self
                        .step(format!("Verify {}: is disconnected", letter), &command::smb_show(letter))
                        .reverse_check();
                    self.run(&mut report, &step)?;
                }
                self.registry.remove(volume);
                if !quick {
                    let step = self.step("Refresh mapped drives", &command::smb_list());
                    self.run(&mut report, &step)?;
                }
            }
        }
        Ok(report.finish())
    }
}
