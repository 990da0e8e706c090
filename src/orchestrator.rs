//! The volume orchestrator.
//!
//! Owns the one session, the executor wrapped around it, and the mount
//! registry. Mount/unmount choreography lives in `mount`, workload drivers in
//! `workload`, and companion-script relays in `relay`; all of them are
//! methods on [`VolumeOrchestrator`] and all of them return a single
//! [`StatusReport`].

use crate::cloud::{CloudRelay, CloudTarget};
use crate::command::CommandLine;
use crate::config::{ClientOs, Config};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::executor::{Executor, Step};
use crate::logging;
use crate::registry::{MountNaming, MountRegistry};
use crate::result::{CommandResult, ReportBuilder, StatusReport};
use crate::transport::{LocalTransport, Transport};

pub struct VolumeOrchestrator {
    pub(crate) config: Config,
    pub(crate) executor: Executor,
    pub(crate) registry: MountRegistry,
}

impl VolumeOrchestrator {
    /// Open and authenticate an SSH session to the configured client.
    /// Authentication failure is fatal and returned as
    /// [`Error::Authentication`] carrying the failed record.
    pub fn connect(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| Error::Config(errors.join("; ")))?;
        let session = match Connection::ssh(&config.target)? {
            Some(session) => session,
            None => {
                let record = CommandResult::start(
                    format!("Authenticate to {}", config.target.host),
                    "",
                    config.command_timeout(),
                    config.execution.log_timezone,
                )
                .finish(false, None, Some("no usable private key and no password".to_string()));
                logging::log_result(&record);
                return Err(Error::Authentication {
                    host: config.target.host.clone(),
                    record: Box::new(record),
                });
            }
        };
        let provider: Option<Box<dyn Transport>> = if config.cloud.enabled {
            Some(Box::new(LocalTransport::new()?))
        } else {
            None
        };
        Self::establish(config, session, provider)
    }

    /// Build on caller-supplied transports: the client session and, when
    /// cloud indirection is enabled, the host that runs the provider CLI.
    pub fn with_transports(
        config: Config,
        session: Box<dyn Transport>,
        provider: Option<Box<dyn Transport>>,
    ) -> Result<Self> {
        let session = Connection::new(&config.target.host, session);
        Self::establish(config, session, provider)
    }

    fn establish(
        config: Config,
        session: Connection,
        provider: Option<Box<dyn Transport>>,
    ) -> Result<Self> {
        let mut executor = Executor::new(
            session,
            config.target.os,
            config.execution.log_timezone,
            config.command_timeout(),
        )
        .with_sudo_password(config.target.password.clone());

        if config.cloud.enabled {
            let provider = provider.ok_or_else(|| {
                Error::Config("cloud indirection enabled without a provider transport".to_string())
            })?;
            executor = executor.with_cloud(CloudRelay::new(CloudTarget::from(&config.cloud), provider));
        }

        let check = executor.authenticate();
        if !check.passed() {
            log::error!(
                "authentication to {} failed: {}",
                config.target.host,
                check.error().unwrap_or("unexpected greeting output")
            );
            executor.close();
            return Err(Error::Authentication {
                host: config.target.host.clone(),
                record: Box::new(check),
            });
        }

        log::info!(
            "session ready: host={} os={:?} backend={:?} client={} project={} cloud={}",
            config.target.host,
            config.target.os,
            config.target.backend,
            config.target.client,
            config.target.project,
            executor.is_cloud()
        );

        Ok(VolumeOrchestrator {
            config,
            executor,
            registry: MountRegistry::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &MountRegistry {
        &self.registry
    }

    pub fn client_os(&self) -> ClientOs {
        self.executor.os()
    }

    /// Run one arbitrary command as its own report.
    pub fn execute(&mut self, step: &Step) -> Result<StatusReport> {
        let mut report = self.begin();
        self.run(&mut report, step)?;
        Ok(report.finish())
    }

    /// Close the session. Later operations record `session is closed` failures.
    pub fn close(&mut self) {
        self.executor.close();
    }

    pub(crate) fn begin(&self) -> ReportBuilder {
        ReportBuilder::new(self.executor.clock())
    }

    /// Execute `step` and append its result; returns the verdict.
    pub(crate) fn run(&mut self, report: &mut ReportBuilder, step: &Step) -> Result<bool> {
        let result = self.executor.run(step)?;
        Ok(report.push(result))
    }

    pub(crate) fn step(&self, description: impl Into<String>, line: &CommandLine) -> Step {
        Step::of(description, line, self.client_os())
    }

    /// A failed record for a step that could not be issued at all.
    pub(crate) fn unissued(&self, description: impl Into<String>, reason: &str) -> CommandResult {
        let record = CommandResult::start(description, "", self.config.command_timeout(), self.executor.clock())
            .finish(false, None, Some(reason.to_string()));
        logging::log_result(&record);
        record
    }

    pub(crate) fn naming(&self) -> MountNaming {
        MountNaming {
            base_dir: self.config.execution.mount_base_dir.clone(),
            timestamped: self.config.execution.timestamped_mounts,
            epoch: chrono::Utc::now().timestamp(),
        }
    }
}
