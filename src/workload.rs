//! Workload drivers.
//!
//! Data generation against an already-mounted volume: a fixed-shape block
//! copy, a repeated `fio` load, and the external tree generator, plus a
//! digest of everything under the mount for before/after comparison. Every
//! driver resolves its mount target through the registry first, so a volume
//! that was never mounted (and has no explicit override) fails before any
//! command is issued.

use std::time::Duration;

use crate::command::{self, CommandLine};
use crate::config::ClientOs;
use crate::error::{Error, Result};
use crate::executor::Step;
use crate::orchestrator::VolumeOrchestrator;
use crate::registry::{MountTarget, TargetOptions};
use crate::result::{CommandResult, StatusReport};

/// Options for [`VolumeOrchestrator::block_copy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCopyOptions {
    /// Source device on POSIX clients.
    pub source: String,
    pub file_name: String,
    pub block_size: u64,
    pub count: u64,
    pub quick: bool,
    pub target: TargetOptions,
}

impl Default for BlockCopyOptions {
    fn default() -> Self {
        BlockCopyOptions {
            source: "/dev/zero".to_string(),
            file_name: "dd-file.bin".to_string(),
            block_size: 1024,
            count: 1024,
            quick: false,
            target: TargetOptions::default(),
        }
    }
}

/// `dd` on POSIX; Windows has no source device, so the same number of
/// bytes is allocated with `fsutil`.
pub fn block_copy_command(
    os: ClientOs,
    source: &str,
    destination: &str,
    block_size: u64,
    count: u64,
) -> Result<CommandLine> {
    match os {
        ClientOs::Linux => Ok(CommandLine::privileged("dd")
            .value(format!("if={}", source))
            .value(format!("of={}", destination))
            .arg(format!("bs={}", block_size))
            .arg(format!("count={}", count))),
        ClientOs::Windows => {
            let bytes = block_size.checked_mul(count).ok_or_else(|| {
                Error::InvalidOption(format!(
                    "{} blocks of {} bytes overflows the file size",
                    count, block_size
                ))
            })?;
            Ok(CommandLine::new("fsutil")
                .arg("file")
                .arg("createnew")
                .value(destination)
                .arg(bytes.to_string()))
        }
    }
}

/// Ordered `fio` parameters. Later `set` calls replace a key in place so the
/// rendered order stays stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FioParams {
    entries: Vec<(String, String)>,
}

impl FioParams {
    /// Small random read/write job, reported as a group and not time-boxed.
    pub fn defaults(os: ClientOs) -> Self {
        let engine = match os {
            ClientOs::Linux => "libaio",
            ClientOs::Windows => "windowsaio",
        };
        let mut params = FioParams { entries: Vec::new() };
        for (key, value) in [
            ("direct", "1"),
            ("ioengine", engine),
            ("eta-newline", "1"),
            ("fallocate", "none"),
            ("size", "1MB"),
            ("bs", "1K"),
            ("rw", "randrw"),
            ("time_based", "0"),
            ("runtime", "1"),
            ("iodepth", "1"),
            ("numjobs", "1"),
            ("name", "volqa-data"),
            ("group_reporting", "1"),
        ] {
            params.set(key, value);
        }
        params
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn merge(&mut self, overrides: &[(String, String)]) {
        for (key, value) in overrides {
            self.set(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// fio treats `:` in a filename as a separator, so drive paths need it escaped.
fn fio_filename(os: ClientOs, path: &str) -> String {
    match os {
        ClientOs::Linux => path.to_string(),
        ClientOs::Windows => path.replace(':', "\\:"),
    }
}

pub fn io_load_command(os: ClientOs, params: &FioParams) -> CommandLine {
    let mut line = match os {
        ClientOs::Linux => CommandLine::privileged("fio"),
        ClientOs::Windows => CommandLine::new("fio"),
    };
    for (key, value) in params.iter() {
        line = line.value(format!("--{}={}", key, value));
    }
    line
}

/// Options for [`VolumeOrchestrator::io_load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoLoadOptions {
    /// Merged over [`FioParams::defaults`].
    pub overrides: Vec<(String, String)>,
    pub file_name: String,
    pub iteration: u32,
    /// Pause between iterations, taken on the orchestrating host.
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub target: TargetOptions,
}

impl Default for IoLoadOptions {
    fn default() -> Self {
        IoLoadOptions {
            overrides: Vec::new(),
            file_name: "fio-file.bin".to_string(),
            iteration: 1,
            interval: Duration::ZERO,
            timeout: None,
            target: TargetOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOperation {
    Populate,
    Modify,
}

/// Shape of a fresh tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulateShape {
    pub depth: u32,
    pub dirs_per_level: u32,
    pub files_per_dir: u32,
    pub file_size_kb: u64,
}

impl Default for PopulateShape {
    fn default() -> Self {
        PopulateShape {
            depth: 3,
            dirs_per_level: 4,
            files_per_dir: 10,
            file_size_kb: 64,
        }
    }
}

/// One incremental change applied to an existing tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifyShape {
    /// Incremental number, from 1.
    pub increment: u32,
    pub modify_percent: u8,
    pub delete_percent: u8,
    pub new_files: u32,
    pub file_size_kb: u64,
}

impl Default for ModifyShape {
    fn default() -> Self {
        ModifyShape {
            increment: 1,
            modify_percent: 20,
            delete_percent: 10,
            new_files: 10,
            file_size_kb: 64,
        }
    }
}

impl ModifyShape {
    fn validate(&self) -> Result<()> {
        if self.increment == 0 {
            return Err(Error::InvalidOption("incremental number starts at 1".to_string()));
        }
        if self.modify_percent > 100 || self.delete_percent > 100 {
            return Err(Error::InvalidOption("percentages must be within 0..=100".to_string()));
        }
        Ok(())
    }
}

/// Options for [`VolumeOrchestrator::tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOptions {
    pub operation: TreeOperation,
    pub populate: PopulateShape,
    pub modify: ModifyShape,
    pub timeout: Option<Duration>,
    pub target: TargetOptions,
}

impl TreeOptions {
    pub fn populate(shape: PopulateShape) -> Self {
        TreeOptions {
            operation: TreeOperation::Populate,
            populate: shape,
            modify: ModifyShape::default(),
            timeout: None,
            target: TargetOptions::default(),
        }
    }

    pub fn modify(shape: ModifyShape) -> Self {
        TreeOptions {
            operation: TreeOperation::Modify,
            populate: PopulateShape::default(),
            modify: shape,
            timeout: None,
            target: TargetOptions::default(),
        }
    }
}

/// Directory under the mount root the tree generator works in.
pub const TREE_ROOT: &str = "root_dir";

/// Positional contracts:
///
/// ```text
/// <tool> populate <root> <depth> <dirs> <files> <size_kb> <root>/index_file_baseline
/// <tool> modify   <root> <n> <modify%> <delete%> <new_files> <size_kb> <root>/index_file_incremental_<n>
/// ```
pub fn tree_command(
    os: ClientOs,
    tool: &str,
    mount: &MountTarget,
    operation: TreeOperation,
    populate: &PopulateShape,
    modify: &ModifyShape,
) -> CommandLine {
    let root = mount.join(TREE_ROOT);
    let base = match os {
        ClientOs::Linux => CommandLine::privileged(tool),
        ClientOs::Windows => CommandLine::new(tool),
    };
    match operation {
        TreeOperation::Populate => base
            .arg("populate")
            .value(&root)
            .arg(populate.depth.to_string())
            .arg(populate.dirs_per_level.to_string())
            .arg(populate.files_per_dir.to_string())
            .arg(populate.file_size_kb.to_string())
            .value(command::join(os, &root, "index_file_baseline")),
        TreeOperation::Modify => base
            .arg("modify")
            .value(&root)
            .arg(modify.increment.to_string())
            .arg(modify.modify_percent.to_string())
            .arg(modify.delete_percent.to_string())
            .arg(modify.new_files.to_string())
            .arg(modify.file_size_kb.to_string())
            .value(command::join(
                os,
                &root,
                &format!("index_file_incremental_{}", modify.increment),
            )),
    }
}

/// Options for [`VolumeOrchestrator::dir_digest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestOptions {
    /// Fail the step unless the tree hashes to this digest.
    pub expected: Option<String>,
    pub timeout: Option<Duration>,
    pub target: TargetOptions,
}

/// MD5 over the sorted `<md5>  <relative path>` list of every file under
/// `root`. Paths are relative so two mounts of the same data agree.
pub fn dir_digest_command(os: ClientOs, root: &str) -> String {
    match os {
        ClientOs::Linux => format!(
            "cd {} && find . -type f -exec md5sum {{}} + | LC_ALL=C sort -k 2 | md5sum",
            command::quote(root, os)
        ),
        ClientOs::Windows => format!(
            "Set-Location -LiteralPath {}; \
             $sums = Get-ChildItem -Recurse -File | Sort-Object FullName | ForEach-Object {{ \
             (Get-FileHash -Algorithm MD5 -LiteralPath $_.FullName).Hash.ToLower() + '  ' + \
             (Resolve-Path -Relative -LiteralPath $_.FullName) }}; \
             $md5 = [Security.Cryptography.MD5]::Create(); \
             [BitConverter]::ToString($md5.ComputeHash([Text.Encoding]::UTF8.GetBytes(\
             ($sums -join [char]10) + [char]10))).Replace('-', '').ToLower()",
            command::quote(root, os)
        ),
    }
}

/// Leading 32-hex-digit token of `line`, lowercased.
pub fn parse_digest(line: &str) -> Option<String> {
    let token = line.split_whitespace().next()?;
    if token.len() == 32 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(token.to_ascii_lowercase())
    } else {
        None
    }
}

/// The digest a [`VolumeOrchestrator::dir_digest`] step printed.
pub fn recorded_digest(result: &CommandResult) -> Option<String> {
    result
        .output()
        .and_then(|output| output.lines().first().and_then(|line| parse_digest(line)))
}

impl VolumeOrchestrator {
    /// Write `count` blocks of `block_size` bytes into the mount.
    pub fn block_copy(&mut self, volume: &str, options: BlockCopyOptions) -> Result<StatusReport> {
        let BlockCopyOptions {
            source,
            file_name,
            block_size,
            count,
            quick,
            mut target,
        } = options;
        let mount = self.registry.resolve_existing(volume, &mut target)?;
        let os = self.client_os();
        let root = mount.root();
        let destination = mount.join(&file_name);
        // reject an unrepresentable size before anything runs
        let copy = block_copy_command(os, &source, &destination, block_size, count)?;

        let mut report = self.begin();
        if !quick {
            let step = self.step(format!("List {} before copy", root), &command::list_dir(os, &root));
            self.run(&mut report, &step)?;
        }
        let step = self.step(
            format!("Write {} x {} bytes to {}", count, block_size, destination),
            &copy,
        );
        self.run(&mut report, &step)?;
        if !quick {
            let step = self.step(format!("List {} after copy", root), &command::list_dir(os, &root));
            self.run(&mut report, &step)?;
        }
        Ok(report.finish())
    }

    /// Run `fio` against a file in the mount `iteration` times.
    pub fn io_load(&mut self, volume: &str, options: IoLoadOptions) -> Result<StatusReport> {
        let IoLoadOptions {
            overrides,
            file_name,
            iteration,
            interval,
            timeout,
            mut target,
        } = options;
        if iteration == 0 {
            return Err(Error::InvalidOption("iteration must be at least 1".to_string()));
        }
        let mount = self.registry.resolve_existing(volume, &mut target)?;
        let os = self.client_os();

        // caller overrides win, including over the mount-derived filename
        let mut params = FioParams::defaults(os);
        params.set("filename", &fio_filename(os, &mount.join(&file_name)));
        params.merge(&overrides);
        let line = io_load_command(os, &params);

        let mut report = self.begin();
        for run in 1..=iteration {
            let mut step = self.step(format!("fio run {}/{} on {}", run, iteration, volume), &line);
            if let Some(timeout) = timeout {
                step = step.timeout(timeout);
            }
            self.run(&mut report, &step)?;
            // no trailing sleep after the last run
            if run < iteration && !interval.is_zero() {
                log::debug!("sleeping {:?} before fio run {}", interval, run + 1);
                std::thread::sleep(interval);
            }
        }
        Ok(report.finish())
    }

    /// Populate or modify a directory tree with the external generator.
    pub fn tree(&mut self, volume: &str, options: TreeOptions) -> Result<StatusReport> {
        let TreeOptions {
            operation,
            populate,
            modify,
            timeout,
            mut target,
        } = options;
        if operation == TreeOperation::Modify {
            modify.validate()?;
        }
        let mount = self.registry.resolve_existing(volume, &mut target)?;
        let os = self.client_os();
        let tool = self.config.execution.tree_tool.for_os(os).to_string();
        let line = tree_command(os, &tool, &mount, operation, &populate, &modify);

        let description = match operation {
            TreeOperation::Populate => format!("Populate tree on {}", volume),
            TreeOperation::Modify => format!("Apply increment {} to tree on {}", modify.increment, volume),
        };
        let mut report = self.begin();
        let mut step = self.step(description, &line);
        if let Some(timeout) = timeout {
            step = step.timeout(timeout);
        }
        self.run(&mut report, &step)?;
        Ok(report.finish())
    }

    /// Hash every file under a mounted volume. With `expected` set the step
    /// fails on a mismatch; either way the digest is the step's output.
    pub fn dir_digest(&mut self, volume: &str, options: DigestOptions) -> Result<StatusReport> {
        let DigestOptions {
            expected,
            timeout,
            mut target,
        } = options;
        let expected = match expected {
            Some(text) => Some(parse_digest(&text).ok_or_else(|| {
                Error::InvalidOption(format!("{:?} is not an MD5 digest", text))
            })?),
            None => None,
        };
        let mount = self.registry.resolve_existing(volume, &mut target)?;
        let root = mount.root();

        let mut report = self.begin();
        let mut step = Step::new(
            format!("Digest files under {}", root),
            dir_digest_command(self.client_os(), &root),
        );
        if let Some(timeout) = timeout {
            step = step.timeout(timeout);
        }
        let record = self.executor.run(&step)?;
        let record = match (recorded_digest(&record), expected) {
            (None, _) => record.with_verdict(false, "no digest in output"),
            (Some(actual), Some(expected)) if actual != expected => {
                let reason = format!("digest {} does not match expected {}", actual, expected);
                record.with_verdict(false, &reason)
            }
            _ => record,
        };
        report.push(record);
        Ok(report.finish())
    }
}
