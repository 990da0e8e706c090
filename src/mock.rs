//! Scriptable transport for testing.
//!
//! Records every command, with any stdin payload, and answers from, in order of precedence: the
//! first matching substring rule, the queue of one-shot responses, then the
//! default response. Clones share state, so a test can keep a handle after
//! moving the transport into an orchestrator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::transport::{RawOutput, Transport, TransportError};

/// Canned reply: either streams or a transport fault.
#[derive(Debug, Clone)]
pub enum Reply {
    Output(RawOutput),
    Timeout,
    Spawn(String),
}

impl Reply {
    /// Stdout followed by the status line a shell would print.
    pub fn status(stdout: &str, success: bool) -> Self {
        let marker = if success { "True" } else { "False" };
        let stdout = if stdout.is_empty() {
            format!("{}\n", marker)
        } else {
            format!("{}\n{}\n", stdout.trim_end(), marker)
        };
        Reply::Output(RawOutput::stdout(stdout))
    }

    pub fn raw(stdout: &str) -> Self {
        Reply::Output(RawOutput::stdout(stdout))
    }

    fn produce(&self, timeout: Duration) -> Result<RawOutput, TransportError> {
        match self {
            Reply::Output(output) => Ok(output.clone()),
            Reply::Timeout => Err(TransportError::Timeout {
                seconds: timeout.as_secs(),
            }),
            Reply::Spawn(reason) => Err(TransportError::Spawn {
                program: "mock".to_string(),
                reason: reason.clone(),
            }),
        }
    }
}

#[derive(Debug)]
struct MockState {
    rules: Vec<(String, Reply)>,
    queue: VecDeque<Reply>,
    default: Reply,
    commands: Vec<String>,
    inputs: Vec<Option<String>>,
    closed: bool,
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Every unmatched command succeeds with no output.
    pub fn succeeding() -> Self {
        Self::with_default(Reply::status("", true))
    }

    /// Every unmatched command fails with no output.
    pub fn failing() -> Self {
        Self::with_default(Reply::status("", false))
    }

    pub fn with_default(default: Reply) -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                rules: Vec::new(),
                queue: VecDeque::new(),
                default,
                commands: Vec::new(),
                inputs: Vec::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer every command containing `needle` with `reply`.
    pub fn on(self, needle: &str, reply: Reply) -> Self {
        self.lock().rules.push((needle.to_string(), reply));
        self
    }

    /// Queue a one-shot reply for the next unmatched command.
    pub fn push(&self, reply: Reply) {
        self.lock().queue.push_back(reply);
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Stdin payloads, one entry per recorded command.
    pub fn inputs(&self) -> Vec<Option<String>> {
        self.lock().inputs.clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.lock().commands.iter().filter(|c| c.contains(needle)).count()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl Transport for MockTransport {
    fn run(&mut self, command: &str, input: Option<&str>, timeout: Duration) -> Result<RawOutput, TransportError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.commands.push(command.to_string());
        state.inputs.push(input.map(str::to_string));
        let ruled = state
            .rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone());
        let reply = match ruled {
            Some(reply) => reply,
            None => match state.queue.pop_front() {
                Some(reply) => reply,
                None => state.default.clone(),
            },
        };
        reply.produce(timeout)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_commands_in_order() {
        let mut mock = MockTransport::succeeding();
        mock.execute("echo a", Duration::from_secs(1)).unwrap();
        mock.execute("echo b", Duration::from_secs(1)).unwrap();
        assert_eq!(mock.commands(), vec!["echo a", "echo b"]);
    }

    #[test]
    fn test_records_stdin_payloads() {
        let mut mock = MockTransport::succeeding();
        mock.run("sudo -S -p '' ls", Some("pw\n"), Duration::from_secs(1)).unwrap();
        mock.execute("ls", Duration::from_secs(1)).unwrap();
        assert_eq!(mock.inputs(), vec![Some("pw\n".to_string()), None]);
    }

    #[test]
    fn test_rule_beats_queue_and_default() {
        let mut mock = MockTransport::failing().on("df", Reply::status("fs", true));
        mock.push(Reply::status("queued", true));
        let df = mock.execute("df -h", Duration::from_secs(1)).unwrap();
        assert_eq!(df.stdout, "fs\nTrue\n");
        let queued = mock.execute("ls", Duration::from_secs(1)).unwrap();
        assert!(queued.stdout.starts_with("queued"));
        let fallback = mock.execute("ls", Duration::from_secs(1)).unwrap();
        assert_eq!(fallback.stdout, "False\n");
    }

    #[test]
    fn test_clones_share_state() {
        let handle = MockTransport::succeeding();
        let mut moved = handle.clone();
        moved.execute("uptime", Duration::from_secs(1)).unwrap();
        moved.close().unwrap();
        assert_eq!(handle.count_containing("uptime"), 1);
        assert!(handle.is_closed());
        assert!(matches!(
            moved.execute("uptime", Duration::from_secs(1)),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_fault_replies() {
        let mut mock = MockTransport::with_default(Reply::Timeout);
        let err = mock.execute("sleep 99", Duration::from_secs(3)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { seconds: 3 }));
    }
}
