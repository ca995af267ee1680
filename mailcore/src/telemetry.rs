//! Telemetry: counters for commands dispatched, auth outcomes, and
//! failures by kind. Plain counters logged via `tracing` rather than a
//! metrics-export crate.

use std::collections::HashMap;
use std::sync::Mutex;

use mail_proto::SessionError;

#[derive(Default)]
pub struct Telemetry {
    commands: Mutex<HashMap<&'static str, u64>>,
    failures: Mutex<HashMap<&'static str, u64>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_command(&self, name: &'static str) {
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        *commands.entry(name).or_insert(0) += 1;
    }

    pub fn record_failure(&self, error: &SessionError) {
        let kind = failure_kind(error);
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        *failures.entry(kind).or_insert(0) += 1;
    }

    /// Logged at shutdown and available for ad-hoc
    /// inspection.
    pub fn snapshot(&self) -> (HashMap<&'static str, u64>, HashMap<&'static str, u64>) {
        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone();
        (commands, failures)
    }

    pub fn log_snapshot(&self) {
        let (commands, failures) = self.snapshot();
        tracing::info!(?commands, ?failures, "telemetry snapshot");
    }
}

fn failure_kind(error: &SessionError) -> &'static str {
    match error {
        SessionError::Parse(_) => "parse",
        SessionError::ProtocolState(_) => "protocol_state",
        SessionError::AuthFailure => "auth_failure",
        SessionError::ResourceLimit(_) => "resource_limit",
        SessionError::Store(_) => "store",
        SessionError::Transport(_) => "transport",
        SessionError::LineTooLong => "line_too_long",
    }
}
