//! Command executor.
//!
//! Issues one command over the session (or through cloud indirection) and
//! turns whatever comes back into a [`CommandResult`]. Success is read from
//! a status line the executor appends to every command: the shell prints
//! `True` or `False` last, and that line is stripped from the captured
//! output. Transport faults become data; only a cloud response missing its
//! markers escapes as an error.
//!
//! Windows OpenSSH hands commands to `cmd.exe` by default, so Windows
//! scripts travel wrapped in a `powershell -Command` invocation. A sudo
//! password is written to the session's stdin and never appears in the
//! command text.

use std::time::Duration;

use crate::cloud::{CloudError, CloudRelay};
use crate::command::CommandLine;
use crate::config::ClientOs;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::logging::{self, LogTimezone};
use crate::result::{CommandResult, Output};
use crate::transport::RawOutput;

/// One command to execute, with how to judge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub description: String,
    pub command: String,
    pub timeout: Option<Duration>,
    /// Pass when the command fails, for "assert absence" checks.
    pub reverse_check: bool,
    /// Pass iff the first line of stdout contains this text.
    pub verify: Option<String>,
}

impl Step {
    pub fn new(description: impl Into<String>, command: impl Into<String>) -> Self {
        Step {
            description: description.into(),
            command: command.into(),
            timeout: None,
            reverse_check: false,
            verify: None,
        }
    }

    pub fn of(description: impl Into<String>, line: &CommandLine, os: ClientOs) -> Self {
        Step::new(description, line.render(os))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn reverse_check(mut self) -> Self {
        self.reverse_check = true;
        self
    }

    pub fn verify(mut self, text: impl Into<String>) -> Self {
        self.verify = Some(text.into());
        self
    }
}

/// Shell fragment that prints the preceding command's success last.
pub fn status_suffix(os: ClientOs) -> &'static str {
    match os {
        ClientOs::Linux => "; if [ $? -eq 0 ]; then echo True; else echo False; fi",
        ClientOs::Windows => "; if ($?) { 'True' } else { 'False' }",
    }
}

pub fn with_status_suffix(command: &str, os: ClientOs) -> String {
    format!("{}{}", command, status_suffix(os))
}

/// Make every `sudo` read its password from stdin without prompting.
/// Returns the rewritten command and how many invocations were changed.
pub fn sudo_from_stdin(command: &str) -> (String, usize) {
    const FEED: &str = "sudo -S -p '' ";
    let mut out = String::with_capacity(command.len() + FEED.len());
    let mut fed = 0;
    let mut rest = command;
    while let Some(at) = rest.find("sudo ") {
        let head = &rest[..at];
        let at_boundary = head.is_empty()
            || head.ends_with(|c: char| c.is_whitespace() || matches!(c, ';' | '&' | '|' | '('));
        out.push_str(head);
        if at_boundary {
            out.push_str(FEED);
            fed += 1;
        } else {
            out.push_str("sudo ");
        }
        rest = &rest[at + "sudo ".len()..];
    }
    out.push_str(rest);
    (out, fed)
}

/// `powershell -Command "<script>"`, escaped for the Windows argument
/// parser. Backslashes are literal unless they precede a double quote.
pub fn powershell_command(script: &str) -> String {
    let mut quoted = String::with_capacity(script.len() + 2);
    let mut backslashes = 0;
    for c in script.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.push_str(&"\\".repeat(backslashes * 2 + 1));
                backslashes = 0;
            }
            _ => {
                quoted.push_str(&"\\".repeat(backslashes));
                backslashes = 0;
            }
        }
        if c != '\\' {
            quoted.push(c);
        }
    }
    quoted.push_str(&"\\".repeat(backslashes * 2));
    format!("powershell -NoProfile -NonInteractive -Command \"{}\"", quoted)
}

fn parse_status(line: &str) -> Option<bool> {
    let line = line.trim();
    if line.eq_ignore_ascii_case("true") {
        Some(true)
    } else if line.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Judge raw streams: `(passed, output, error)`.
pub fn interpret(
    raw: &RawOutput,
    reverse_check: bool,
    verify: Option<&str>,
) -> (bool, Option<Output>, Option<String>) {
    // verify reads the literal first line, blank or not
    let first = raw.stdout.lines().next().map(str::trim_end);
    let mut lines: Vec<String> = raw
        .stdout
        .lines()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    // the suffix prints the status line last
    let status = lines.last().and_then(|line| parse_status(line));
    if status.is_some() {
        lines.pop();
    }

    let passed = match verify {
        Some(text) => first.map_or(false, |line| line.contains(text)),
        None => status.map_or(false, |ok| ok != reverse_check),
    };

    let stderr = raw.stderr.trim();
    let error = if !stderr.is_empty() {
        Some(stderr.to_string())
    } else if status.is_none() && verify.is_none() {
        Some("no status line in command output".to_string())
    } else {
        None
    };

    (passed, Output::from_lines(lines), error)
}

pub struct Executor {
    session: Connection,
    cloud: Option<CloudRelay>,
    os: ClientOs,
    sudo_password: Option<String>,
    clock: LogTimezone,
    default_timeout: Duration,
}

impl Executor {
    pub fn new(session: Connection, os: ClientOs, clock: LogTimezone, default_timeout: Duration) -> Self {
        Executor {
            session,
            cloud: None,
            os,
            sudo_password: None,
            clock,
            default_timeout,
        }
    }

    /// Route every command through the provider's run-command facility.
    pub fn with_cloud(mut self, relay: CloudRelay) -> Self {
        self.cloud = Some(relay);
        self
    }

    /// Password fed to `sudo` on POSIX clients outside cloud indirection.
    pub fn with_sudo_password(mut self, password: Option<String>) -> Self {
        self.sudo_password = password;
        self
    }

    pub fn os(&self) -> ClientOs {
        self.os
    }

    pub fn clock(&self) -> LogTimezone {
        self.clock
    }

    pub fn is_cloud(&self) -> bool {
        self.cloud.is_some()
    }

    /// Text actually sent over the session, and what to write to its stdin.
    fn wire_command(&self, command: &str) -> (String, Option<String>) {
        match (self.os, &self.sudo_password) {
            (ClientOs::Linux, Some(password)) => {
                let (command, fed) = sudo_from_stdin(command);
                // one line per sudo so each can read its own
                let input = (fed > 0).then(|| format!("{}\n", password).repeat(fed));
                (with_status_suffix(&command, self.os), input)
            }
            (ClientOs::Linux, None) => (with_status_suffix(command, self.os), None),
            (ClientOs::Windows, _) => (powershell_command(&with_status_suffix(command, self.os)), None),
        }
    }

    /// Execute one step. Only a malformed cloud response is an `Err`.
    pub fn run(&mut self, step: &Step) -> Result<CommandResult> {
        let timeout = step.timeout.unwrap_or(self.default_timeout);
        let pending = CommandResult::start(&step.description, &step.command, timeout, self.clock);
        let raw = match self.cloud.as_mut() {
            // the provider runs the script as root, so no sudo feed
            Some(relay) => {
                let script = with_status_suffix(&step.command, self.os);
                match relay.run(&script, self.os, timeout) {
                    Ok(raw) => Ok(raw),
                    Err(CloudError::Transport(e)) => Err(e),
                    Err(CloudError::Parse { marker, response }) => {
                        log::error!("{}: cloud response lacks {}", step.description, marker);
                        return Err(Error::CloudParse { marker, response });
                    }
                }
            }
            None => {
                let (wire, input) = self.wire_command(&step.command);
                self.session.run(&wire, input.as_deref(), timeout)
            }
        };
        let result = match raw {
            Ok(raw) => {
                let (passed, output, error) = interpret(&raw, step.reverse_check, step.verify.as_deref());
                pending.finish(passed, output, error)
            }
            Err(e) => pending.finish(false, None, Some(e.to_string())),
        };
        logging::log_result(&result);
        Ok(result)
    }

    /// Check the session answers, bypassing cloud indirection.
    pub fn authenticate(&mut self) -> CommandResult {
        let step = Step::new(format!("Authenticate to {}", self.session.host()), "echo connected")
            .verify("connected");
        let pending = CommandResult::start(&step.description, &step.command, self.default_timeout, self.clock);
        let (wire, input) = self.wire_command(&step.command);
        let result = match self.session.run(&wire, input.as_deref(), self.default_timeout) {
            Ok(raw) => {
                let (passed, output, error) = interpret(&raw, false, step.verify.as_deref());
                pending.finish(passed, output, error)
            }
            Err(e) => pending.finish(false, None, Some(e.to_string())),
        };
        logging::log_result(&result);
        result
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudTarget;
    use crate::mock::{MockTransport, Reply};

    fn executor(mock: &MockTransport, os: ClientOs) -> Executor {
        Executor::new(
            Connection::new("10.0.0.1", Box::new(mock.clone())),
            os,
            LogTimezone::Utc,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_passed_follows_status_line() {
        let mock = MockTransport::succeeding();
        mock.push(Reply::status("", false));
        let mut exec = executor(&mock, ClientOs::Linux);
        assert!(!exec.run(&Step::new("fails", "false")).unwrap().passed());
        assert!(exec.run(&Step::new("passes", "true")).unwrap().passed());
    }

    #[test]
    fn test_reverse_check_inverts() {
        let mock = MockTransport::succeeding();
        mock.push(Reply::status("", false));
        let mut exec = executor(&mock, ClientOs::Linux);
        let absent = exec.run(&Step::new("absent", "test -d /gone").reverse_check()).unwrap();
        assert!(absent.passed());
        let present = exec.run(&Step::new("present", "test -d /tmp").reverse_check()).unwrap();
        assert!(!present.passed());
    }

    #[test]
    fn test_suffix_appended_and_stripped() {
        let mock = MockTransport::succeeding().on("uname", Reply::status("Linux", true));
        let mut exec = executor(&mock, ClientOs::Linux);
        let result = exec.run(&Step::new("kernel", "uname")).unwrap();
        assert_eq!(result.output(), Some(&Output::Line("Linux".into())));
        assert_eq!(result.command(), "uname");
        assert_eq!(mock.commands()[0], format!("uname{}", status_suffix(ClientOs::Linux)));
    }

    #[test]
    fn test_verify_overrides_status() {
        let mock = MockTransport::succeeding()
            .on("hostname", Reply::status("client-01\nother", false));
        let mut exec = executor(&mock, ClientOs::Linux);
        let hit = exec.run(&Step::new("name", "hostname").verify("client")).unwrap();
        assert!(hit.passed());
        let miss = exec.run(&Step::new("name", "hostname").verify("other")).unwrap();
        assert!(!miss.passed());
    }

    #[test]
    fn test_verify_reads_literal_first_line() {
        let mock = MockTransport::with_default(Reply::raw("\nconnected\nTrue\n"));
        let mut exec = executor(&mock, ClientOs::Linux);
        let result = exec.run(&Step::new("greet", "echo connected").verify("connected")).unwrap();
        assert!(!result.passed());
        assert_eq!(result.output(), Some(&Output::Line("connected".into())));
    }

    #[test]
    fn test_transport_fault_is_data() {
        let mock = MockTransport::with_default(Reply::Spawn("no such program".into()));
        let mut exec = executor(&mock, ClientOs::Linux);
        let result = exec.run(&Step::new("bogus", "definitely-not-a-command")).unwrap();
        assert!(!result.passed());
        assert!(result.output().is_none());
        assert!(result.error().unwrap().contains("no such program"));
    }

    #[test]
    fn test_unresolvable_command() {
        let mock = MockTransport::with_default(Reply::Output(
            RawOutput::stdout("False\n").with_stderr("sh: 1: frobnicate: not found\n"),
        ));
        let mut exec = executor(&mock, ClientOs::Linux);
        let result = exec.run(&Step::new("bogus", "frobnicate")).unwrap();
        assert!(!result.passed());
        assert!(result.output().is_none());
        assert_eq!(result.error(), Some("sh: 1: frobnicate: not found"));
    }

    #[test]
    fn test_timeout_is_recorded() {
        let mock = MockTransport::with_default(Reply::Timeout);
        let mut exec = executor(&mock, ClientOs::Linux);
        let result = exec
            .run(&Step::new("slow", "sleep 600").timeout(Duration::from_secs(5)))
            .unwrap();
        assert!(!result.passed());
        assert_eq!(result.timeout(), Duration::from_secs(5));
        assert!(result.error().unwrap().contains("5s"));
    }

    #[test]
    fn test_missing_status_line_fails() {
        let mock = MockTransport::with_default(Reply::raw("garbled"));
        let mut exec = executor(&mock, ClientOs::Linux);
        let result = exec.run(&Step::new("odd", "echo")).unwrap();
        assert!(!result.passed());
        assert_eq!(result.output(), Some(&Output::Line("garbled".into())));
    }

    #[test]
    fn test_sudo_password_travels_on_stdin() {
        let mock = MockTransport::succeeding();
        let mut exec = executor(&mock, ClientOs::Linux).with_sudo_password(Some("pw".into()));
        let result = exec.run(&Step::new("mkdir", "sudo mkdir -p /tmp/v")).unwrap();
        assert_eq!(result.command(), "sudo mkdir -p /tmp/v");
        assert!(mock.commands()[0].starts_with("sudo -S -p '' mkdir -p /tmp/v;"));
        assert!(!mock.commands()[0].contains("pw"));
        assert_eq!(mock.inputs()[0].as_deref(), Some("pw\n"));

        exec.run(&Step::new("list", "ls /tmp")).unwrap();
        assert_eq!(mock.inputs()[1], None);
    }

    #[test]
    fn test_sudo_from_stdin_boundaries() {
        let (out, fed) = sudo_from_stdin("sudo a && sudo b; pseudo c");
        assert_eq!(out, "sudo -S -p '' a && sudo -S -p '' b; pseudo c");
        assert_eq!(fed, 2);
    }

    #[test]
    fn test_windows_wire_runs_under_powershell() {
        let mock = MockTransport::succeeding();
        let mut exec = executor(&mock, ClientOs::Windows).with_sudo_password(Some("pw".into()));
        exec.run(&Step::new("list", "net use")).unwrap();
        assert_eq!(
            mock.commands()[0],
            "powershell -NoProfile -NonInteractive -Command \"net use; if ($?) { 'True' } else { 'False' }\""
        );
        assert_eq!(mock.inputs()[0], None);
    }

    #[test]
    fn test_powershell_command_escaping() {
        assert_eq!(
            powershell_command("dir Z:\\; 'x'"),
            "powershell -NoProfile -NonInteractive -Command \"dir Z:\\; 'x'\""
        );
        assert_eq!(
            powershell_command("echo \"a\\\"b\""),
            "powershell -NoProfile -NonInteractive -Command \"echo \\\"a\\\\\\\"b\\\"\""
        );
        assert!(powershell_command("C:\\dir\\").ends_with("C:\\dir\\\\\""));
    }

    fn cloud_response(stdout: &str) -> Reply {
        let message = format!("Enable succeeded: \n[stdout]\n{}\n[stderr]\n", stdout);
        Reply::raw(&serde_json::json!({"value": [{"code": "ProvisioningState/succeeded", "message": message}]}).to_string())
    }

    #[test]
    fn test_cloud_indirection_skips_sudo_and_parses_markers() {
        let session = MockTransport::succeeding();
        let provider = MockTransport::with_default(cloud_response("mounted\nTrue"));
        let relay = CloudRelay::new(
            CloudTarget {
                subscription: None,
                resource_group: "rg".into(),
                vm_name: "vm".into(),
            },
            Box::new(provider.clone()),
        );
        let mut exec = executor(&session, ClientOs::Linux)
            .with_sudo_password(Some("pw".into()))
            .with_cloud(relay);

        let result = exec.run(&Step::new("mount", "sudo mount -a")).unwrap();
        assert!(result.passed());
        assert_eq!(result.output(), Some(&Output::Line("mounted".into())));
        assert!(session.commands().is_empty());
        assert_eq!(provider.commands().len(), 2);
        assert!(!provider.commands()[1].contains("sudo -S"));
    }

    #[test]
    fn test_cloud_parse_failure_escapes() {
        let provider = MockTransport::with_default(Reply::raw("ERROR: (Conflict) Run command extension execution is in progress"));
        let relay = CloudRelay::new(
            CloudTarget {
                subscription: None,
                resource_group: "rg".into(),
                vm_name: "vm".into(),
            },
            Box::new(provider),
        );
        let mut exec = executor(&MockTransport::succeeding(), ClientOs::Linux).with_cloud(relay);
        let err = exec.run(&Step::new("x", "true")).unwrap_err();
        assert!(matches!(err, Error::CloudParse { .. }));
    }

    #[test]
    fn test_authenticate_bypasses_cloud() {
        let session = MockTransport::succeeding().on("echo connected", Reply::status("connected", true));
        let mut exec = executor(&session, ClientOs::Linux);
        assert!(exec.authenticate().passed());
        assert_eq!(session.count_containing("echo connected"), 1);
    }
}
