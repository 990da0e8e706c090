use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "volqa")]
#[command(about = "Storage volume QA orchestration over a remote client", long_about = None)]
pub struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Client address, overriding the configuration
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Mount-target overrides shared by volume commands
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Local mount directory (NFS)
    #[arg(long)]
    pub path: Option<String>,

    /// Drive letter, or `*` for the next free one (SMB)
    #[arg(long)]
    pub drive: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TreeOp {
    Populate,
    Modify,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mount a volume described by a JSON descriptor
    Mount {
        /// Volume descriptor file
        #[arg(short, long)]
        descriptor: PathBuf,

        /// nfsv3, nfsv4.1 or smb
        #[arg(short, long, default_value = "nfsv3")]
        protocol: String,

        /// Server address, overriding the descriptor
        #[arg(long)]
        server: Option<String>,

        /// Skip verification
        #[arg(short, long)]
        quick: bool,

        /// Name the mount directory without a timestamp suffix
        #[arg(long)]
        no_timestamp: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Unmount a volume
    Unmount {
        /// Volume name (creation token)
        #[arg(long)]
        volume: String,

        /// Skip verification and cleanup
        #[arg(short, long)]
        quick: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write a fixed-size file into a mounted volume
    Dd {
        #[arg(long)]
        volume: String,

        /// File name inside the mount
        #[arg(long, default_value = "dd-file.bin")]
        file: String,

        #[arg(long, default_value_t = 1024)]
        block_size: u64,

        #[arg(long, default_value_t = 1024)]
        count: u64,

        #[arg(short, long)]
        quick: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Run fio against a mounted volume
    Fio {
        #[arg(long)]
        volume: String,

        /// fio parameter override, `key=value` (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        #[arg(long, default_value = "fio-file.bin")]
        file: String,

        #[arg(long, default_value_t = 1)]
        iteration: u32,

        /// Seconds to wait between iterations
        #[arg(long, default_value_t = 0)]
        interval: u64,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Populate or modify a directory tree on a mounted volume
    Tree {
        #[arg(long)]
        volume: String,

        #[arg(long, value_enum)]
        operation: TreeOp,

        #[arg(long, default_value_t = 3)]
        depth: u32,

        #[arg(long, default_value_t = 4)]
        dirs: u32,

        #[arg(long, default_value_t = 10)]
        files: u32,

        #[arg(long, default_value_t = 64)]
        size_kb: u64,

        /// Incremental number (modify)
        #[arg(long, default_value_t = 1)]
        increment: u32,

        #[arg(long, default_value_t = 20)]
        modify_percent: u8,

        #[arg(long, default_value_t = 10)]
        delete_percent: u8,

        #[arg(long, default_value_t = 10)]
        new_files: u32,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Hash every file under a mounted volume
    Digest {
        #[arg(long)]
        volume: String,

        /// Fail unless the tree hashes to this MD5 digest
        #[arg(long)]
        expect: Option<String>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Invoke a companion script on the client
    #[command(subcommand)]
    Relay(RelayCommands),

    /// Mount, write, and unmount in one session
    Cycle {
        #[arg(short, long)]
        descriptor: PathBuf,

        #[arg(short, long, default_value = "nfsv3")]
        protocol: String,

        #[arg(long)]
        server: Option<String>,

        #[arg(short, long)]
        quick: bool,

        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Subcommand)]
pub enum RelayCommands {
    /// Mount/exercise/unmount through the fileops script
    Fileops {
        #[arg(short, long)]
        descriptor: PathBuf,

        #[arg(short, long, default_value = "nfsv3")]
        protocol: String,

        #[arg(long)]
        server: Option<String>,

        /// Any of m, f, u
        #[arg(short, long, default_value = "mfu")]
        mode: String,
    },

    /// Generate a baseline or incremental tracker index
    Tracker {
        #[arg(long)]
        volume: String,

        /// Incremental number; omitted for a baseline
        #[arg(long)]
        incremental: Option<u32>,

        #[command(flatten)]
        target: TargetArgs,
    },
}
