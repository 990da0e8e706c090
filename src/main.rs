mod cli;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::Path;
use std::time::Duration;

use cli::{Cli, Commands, RelayCommands, TargetArgs, TreeOp};
use volqa::config::Config;
use volqa::descriptor::{self, Endpoint};
use volqa::json_output::JsonOutput;
use volqa::logging;
use volqa::mount::{MountOptions, UnmountOptions};
use volqa::registry::{DriveSelection, TargetOptions};
use volqa::relay::{FileopsOptions, ScriptMode, TrackerKind, TrackerOptions};
use volqa::result::StatusReport;
use volqa::workload::{
    BlockCopyOptions, DigestOptions, IoLoadOptions, ModifyShape, PopulateShape, TreeOptions,
};
use volqa::VolumeOrchestrator;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    logging::init(level, config.execution.log_timezone);

    match run(cli.command, config) {
        Ok(report) => {
            if cli.json {
                println!("{}", JsonOutput::report(&report)?);
            } else {
                print_report(&report);
            }
            if !report.passed() {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) if cli.json => {
            let message = format!("{:#}", e);
            match e.downcast_ref::<volqa::Error>().and_then(volqa::Error::record) {
                Some(record) => println!(
                    "{}",
                    JsonOutput::error_with_record(&message, 2, serde_json::to_value(record)?)
                ),
                None => println!("{}", JsonOutput::error(&message, 2)),
            }
            std::process::exit(2);
        }
        Err(e) => Err(e),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::production(),
    };
    if let Some(host) = &cli.host {
        config.target.host = host.clone();
    }
    if let Ok(password) = std::env::var("VOLQA_PASSWORD") {
        config.target.password = Some(password);
    }
    Ok(config)
}

fn read_descriptor(path: &Path, server: Option<&str>) -> Result<Endpoint> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read descriptor {:?}", path))?;
    let endpoint = descriptor::resolve_endpoint_str(&text, server)
        .with_context(|| format!("Failed to resolve descriptor {:?}", path))?;
    Ok(endpoint)
}

fn target_options(args: TargetArgs) -> Result<TargetOptions> {
    let drive = match args.drive {
        Some(drive) => Some(DriveSelection::parse(&drive)?),
        None => None,
    };
    Ok(TargetOptions {
        path: args.path,
        drive,
    })
}

fn parse_overrides(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("fio override {:?} is not key=value", pair))?;
            Ok((key.trim_start_matches('-').to_string(), value.to_string()))
        })
        .collect()
}

fn run(command: Commands, config: Config) -> Result<StatusReport> {
    let mut orchestrator = VolumeOrchestrator::connect(config)?;

    let report = match command {
        Commands::Mount {
            descriptor,
            protocol,
            server,
            quick,
            no_timestamp,
            target,
        } => {
            let endpoint = read_descriptor(&descriptor, server.as_deref())?;
            let mut options = MountOptions::new(protocol).target(target_options(target)?);
            options.quick = quick;
            if no_timestamp {
                options = options.timestamped(false);
            }
            orchestrator.mount(&endpoint, options)?
        }
        Commands::Unmount { volume, quick, target } => {
            let options = UnmountOptions {
                quick,
                target: target_options(target)?,
            };
            orchestrator.unmount(&volume, options)?
        }
        Commands::Dd {
            volume,
            file,
            block_size,
            count,
            quick,
            target,
        } => {
            let options = BlockCopyOptions {
                file_name: file,
                block_size,
                count,
                quick,
                target: target_options(target)?,
                ..Default::default()
            };
            orchestrator.block_copy(&volume, options)?
        }
        Commands::Fio {
            volume,
            overrides,
            file,
            iteration,
            interval,
            target,
        } => {
            let options = IoLoadOptions {
                overrides: parse_overrides(&overrides)?,
                file_name: file,
                iteration,
                interval: Duration::from_secs(interval),
                target: target_options(target)?,
                ..Default::default()
            };
            orchestrator.io_load(&volume, options)?
        }
        Commands::Tree {
            volume,
            operation,
            depth,
            dirs,
            files,
            size_kb,
            increment,
            modify_percent,
            delete_percent,
            new_files,
            target,
        } => {
            let mut options = match operation {
                TreeOp::Populate => TreeOptions::populate(PopulateShape {
                    depth,
                    dirs_per_level: dirs,
                    files_per_dir: files,
                    file_size_kb: size_kb,
                }),
                TreeOp::Modify => TreeOptions::modify(ModifyShape {
                    increment,
                    modify_percent,
                    delete_percent,
                    new_files,
                    file_size_kb: size_kb,
                }),
            };
            options.target = target_options(target)?;
            orchestrator.tree(&volume, options)?
        }
        Commands::Digest { volume, expect, target } => {
            let options = DigestOptions {
                expected: expect,
                target: target_options(target)?,
                ..Default::default()
            };
            orchestrator.dir_digest(&volume, options)?
        }
        Commands::Relay(RelayCommands::Fileops {
            descriptor,
            protocol,
            server,
            mode,
        }) => {
            let endpoint = read_descriptor(&descriptor, server.as_deref())?;
            let options = FileopsOptions::new(protocol, ScriptMode::parse(&mode)?);
            orchestrator.relay_fileops(&endpoint, options)?
        }
        Commands::Relay(RelayCommands::Tracker {
            volume,
            incremental,
            target,
        }) => {
            let kind = match incremental {
                Some(n) => TrackerKind::Incremental(n),
                None => TrackerKind::Baseline,
            };
            let mut options = TrackerOptions::new(kind);
            options.target = target_options(target)?;
            orchestrator.relay_tracker(&volume, options)?
        }
        Commands::Cycle {
            descriptor,
            protocol,
            server,
            quick,
            target,
        } => {
            let endpoint = read_descriptor(&descriptor, server.as_deref())?;
            let mut mount = MountOptions::new(protocol).target(target_options(target)?);
            mount.quick = quick;
            let mounted = orchestrator.mount(&endpoint, mount)?;
            let copied = orchestrator.block_copy(
                &endpoint.volume,
                BlockCopyOptions {
                    quick,
                    ..Default::default()
                },
            )?;
            let unmount = UnmountOptions {
                quick,
                ..Default::default()
            };
            let unmounted = orchestrator.unmount(&endpoint.volume, unmount)?;
            let logs = [mounted, copied, unmounted]
                .into_iter()
                .flat_map(|report| report.logs().to_vec())
                .collect();
            StatusReport::from_results(logs, orchestrator.config().execution.log_timezone)
        }
    };

    orchestrator.close();
    Ok(report)
}

fn print_report(report: &StatusReport) {
    for (i, result) in report.logs().iter().enumerate() {
        println!(
            "  [{}] {} {} ({:.2}s)",
            i,
            if result.passed() { "PASS" } else { "FAIL" },
            result.description(),
            result.elapsed().as_secs_f64()
        );
        if let Some(error) = result.error() {
            println!("      error: {}", error);
        }
    }
    println!("{}", logging::summary(report));
}
