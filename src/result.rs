//! Command results and the status report that aggregates them.
//!
//! A [`CommandResult`] is the immutable record of one remote command. A
//! [`StatusReport`] folds an ordered sequence of them into the single value
//! every public orchestrator operation returns. Both serialize to the
//! PascalCase JSON contract consumed by the QA harness:
//!
//! ```text
//! { Passed, StartTime, EndTime, Elapsed,
//!   Logs: { Log-0: CommandResult, Log-1: CommandResult, ... } }
//! ```

use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::logging::LogTimezone;

/// Captured stdout of a command, with the status marker line removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Output {
    Line(String),
    Lines(Vec<String>),
}

impl Output {
    /// `None` for no lines, `Line` for exactly one, `Lines` otherwise.
    pub fn from_lines(mut lines: Vec<String>) -> Option<Output> {
        match lines.len() {
            0 => None,
            1 => lines.pop().map(Output::Line),
            _ => Some(Output::Lines(lines)),
        }
    }

    pub fn lines(&self) -> Vec<&str> {
        match self {
            Output::Line(line) => vec![line.as_str()],
            Output::Lines(lines) => lines.iter().map(String::as_str).collect(),
        }
    }
}

fn as_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn as_whole_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

/// Record of one executed command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandResult {
    passed: bool,
    description: String,
    start_time: DateTime<FixedOffset>,
    end_time: DateTime<FixedOffset>,
    #[serde(serialize_with = "as_seconds")]
    elapsed: Duration,
    #[serde(serialize_with = "as_whole_seconds")]
    timeout: Duration,
    command: String,
    output: Option<Output>,
    error: Option<String>,
}

/// A command whose start has been stamped but whose outcome is not known yet.
pub(crate) struct PendingResult {
    description: String,
    command: String,
    timeout: Duration,
    clock: LogTimezone,
    start_time: DateTime<FixedOffset>,
    started: Instant,
}

impl PendingResult {
    pub(crate) fn finish(
        self,
        passed: bool,
        output: Option<Output>,
        error: Option<String>,
    ) -> CommandResult {
        CommandResult {
            passed,
            description: self.description,
            start_time: self.start_time,
            end_time: self.clock.now(),
            elapsed: self.started.elapsed(),
            timeout: self.timeout,
            command: self.command,
            output,
            error,
        }
    }
}

impl CommandResult {
    pub(crate) fn start(
        description: impl Into<String>,
        command: impl Into<String>,
        timeout: Duration,
        clock: LogTimezone,
    ) -> PendingResult {
        PendingResult {
            description: description.into(),
            command: command.into(),
            timeout,
            clock,
            start_time: clock.now(),
            started: Instant::now(),
        }
    }

    /// Re-judge a finished result against a post-condition on its output.
    /// A failing verdict records `reason` unless an error is already present.
    pub(crate) fn with_verdict(mut self, passed: bool, reason: &str) -> CommandResult {
        if !passed && self.error.is_none() {
            self.error = Some(reason.to_string());
        }
        self.passed = passed;
        self
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn start_time(&self) -> DateTime<FixedOffset> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<FixedOffset> {
        self.end_time
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The command text as issued, before credential injection.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Ordered command results plus the aggregate verdict.
#[derive(Debug, Clone)]
pub struct StatusReport {
    passed: bool,
    start_time: DateTime<FixedOffset>,
    end_time: DateTime<FixedOffset>,
    elapsed: Duration,
    logs: Vec<CommandResult>,
}

impl StatusReport {
    /// Fold already-finished results into a report spanning their timings.
    pub fn from_results(logs: Vec<CommandResult>, clock: LogTimezone) -> StatusReport {
        let now = clock.now();
        let start_time = logs.first().map_or(now, CommandResult::start_time);
        let end_time = logs.last().map_or(now, CommandResult::end_time);
        let elapsed = (end_time - start_time).to_std().unwrap_or_default();
        StatusReport {
            passed: logs.iter().all(CommandResult::passed),
            start_time,
            end_time,
            elapsed,
            logs,
        }
    }

    /// `false` iff at least one constituent result failed.
    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn start_time(&self) -> DateTime<FixedOffset> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<FixedOffset> {
        self.end_time
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn logs(&self) -> &[CommandResult] {
        &self.logs
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommandResult> {
        self.logs.iter().filter(|r| !r.passed())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

struct LogMap<'a>(&'a [CommandResult]);

impl Serialize for LogMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, result) in self.0.iter().enumerate() {
            map.serialize_entry(&format!("Log-{}", index), result)?;
        }
        map.end()
    }
}

impl Serialize for StatusReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StatusReport", 5)?;
        state.serialize_field("Passed", &self.passed)?;
        state.serialize_field("StartTime", &self.start_time)?;
        state.serialize_field("EndTime", &self.end_time)?;
        state.serialize_field("Elapsed", &self.elapsed.as_secs_f64())?;
        state.serialize_field("Logs", &LogMap(&self.logs))?;
        state.end()
    }
}

/// Accumulates results for one operation in call order.
pub struct ReportBuilder {
    clock: LogTimezone,
    start_time: DateTime<FixedOffset>,
    started: Instant,
    logs: Vec<CommandResult>,
}

impl ReportBuilder {
    pub fn new(clock: LogTimezone) -> Self {
        ReportBuilder {
            clock,
            start_time: clock.now(),
            started: Instant::now(),
            logs: Vec::new(),
        }
    }

    /// Append a result and hand back its verdict.
    pub fn push(&mut self, result: CommandResult) -> bool {
        let passed = result.passed();
        self.logs.push(result);
        passed
    }

    pub fn finish(self) -> StatusReport {
        StatusReport {
            passed: self.logs.iter().all(CommandResult::passed),
            start_time: self.start_time,
            end_time: self.clock.now(),
            elapsed: self.started.elapsed(),
            logs: self.logs,
        }
    }
}
