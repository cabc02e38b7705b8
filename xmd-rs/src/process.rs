//! Shell command execution for `exec`.
//!
//! Commands run through `sh -c` on a single-threaded tokio runtime with a
//! wall-clock timeout.  [`Sandbox`] screens them first: with the sandbox on,
//! the program must be whitelisted and the command may not chain, pipe,
//! redirect or substitute.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command '{command}' denied: {reason}")]
    Denied { command: String, reason: String },

    #[error("command timed out after {ms} ms")]
    Timeout { ms: u128 },

    #[error("cannot run command: {0}")]
    Spawn(#[from] std::io::Error),
}

pub trait CommandRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecError>;
}

// ── Sandbox ───────────────────────────────────────────────────────────────────

const INJECTION_PATTERNS: [(&str, &str); 9] = [
    (";", "';'"),
    ("&&", "'&&'"),
    ("||", "'||'"),
    ("|", "'|'"),
    ("`", "backquote"),
    ("$(", "'$('"),
    (">", "'>'"),
    ("<", "'<'"),
    ("\n", "newline"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    pub enabled: bool,
    pub whitelist: Vec<String>,
}

impl Sandbox {
    pub fn new(enabled: bool, whitelist: Vec<String>) -> Self {
        Sandbox { enabled, whitelist }
    }

    pub fn check(&self, command: &str) -> Result<(), ExecError> {
        let deny = |reason: String| ExecError::Denied { command: command.to_owned(), reason };
        let cmd = command.trim();
        if cmd.is_empty() {
            return Err(deny("empty command".to_owned()));
        }
        if !self.enabled {
            return Ok(());
        }
        if let Some((_, what)) = INJECTION_PATTERNS.iter().find(|(p, _)| cmd.contains(p)) {
            return Err(deny(format!("contains {what}")));
        }
        let program = cmd.split_whitespace().next().unwrap_or(cmd);
        let base = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        if !self.whitelist.iter().any(|w| w == base) {
            return Err(deny(format!("'{base}' is not whitelisted")));
        }
        Ok(())
    }
}

// ── ShellRunner ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ShellRunner {
    sandbox: Sandbox,
}

impl ShellRunner {
    pub fn new(sandbox: Sandbox) -> Self {
        ShellRunner { sandbox }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecError> {
        self.sandbox.check(command)?;
        debug!(command, ?timeout, "running command");

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        let output = rt
            .block_on(async { tokio::time::timeout(timeout, cmd.output()).await })
            .map_err(|_| ExecError::Timeout { ms: timeout.as_millis() })??;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Refuses every command; used when no runner is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRunner;

impl CommandRunner for NoRunner {
    fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, ExecError> {
        Err(ExecError::Denied { command: command.to_owned(), reason: "command execution is disabled".to_owned() })
    }
}
