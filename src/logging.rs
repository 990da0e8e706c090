use std::io::Write;

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::result::{CommandResult, StatusReport};

/// Timezone used to stamp command results and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTimezone {
    #[default]
    Utc,
    Local,
}

impl LogTimezone {
    pub fn now(self) -> DateTime<FixedOffset> {
        match self {
            LogTimezone::Utc => Utc::now().with_timezone(&Utc.fix()),
            LogTimezone::Local => {
                let now = Local::now();
                now.with_timezone(now.offset())
            }
        }
    }
}

impl std::fmt::Display for LogTimezone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogTimezone::Utc => write!(f, "utc"),
            LogTimezone::Local => write!(f, "local"),
        }
    }
}

/// Install the process-wide logger. Safe to call more than once.
pub fn init(level: log::LevelFilter, timezone: LogTimezone) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .format(move |buf, record| {
            writeln!(
                buf,
                "[{}] {} {}: {}",
                timezone.now().format("%Y-%m-%d %H:%M:%S%.3f%:z"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}

/// Emit one log line for an executed command.
pub fn log_result(result: &CommandResult) {
    if result.passed() {
        log::info!(
            "PASS {} ({:.2}s): {}",
            result.description(),
            result.elapsed().as_secs_f64(),
            result.command()
        );
    } else {
        log::warn!(
            "FAIL {} ({:.2}s): {}{}",
            result.description(),
            result.elapsed().as_secs_f64(),
            result.command(),
            result
                .error()
                .map(|e| format!(" error={}", e.trim()))
                .unwrap_or_default()
        );
    }
    if let Some(output) = result.output() {
        log::debug!("output: {}", output.lines().join(" | "));
    }
}

/// One-line human summary of a report.
pub fn summary(report: &StatusReport) -> String {
    format!(
        "{} {}/{} steps passed in {:.2}s",
        if report.passed() { "PASSED" } else { "FAILED" },
        report.len() - report.failures().count(),
        report.len(),
        report.elapsed().as_secs_f64()
    )
}
