//! Command execution capability.
//!
//! Everything the engine does against a VCS goes through the
//! [`CommandRunner`] trait: [`ProcessRunner`] spawns real subordinate
//! processes, while [`FakeRunner`] replays scripted output and records every
//! request, so the higher layers (lock recovery, sparse application, change
//! aggregation) are testable without an installed `svn` or `git`.
//!
//! Each invocation spawns exactly one process and blocks until it exits.
//! There is no retry and no timeout at this layer; a nonzero exit is
//! reported in the returned [`CommandOutput`], never as an error, unless the
//! caller converts it explicitly via [`CommandOutput::require_success`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::errors::ExecError;

// ---------------------------------------------------------------------------
// Request / output
// ---------------------------------------------------------------------------

/// One command invocation: program, argument vector, working directory and
/// environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Render the full command line for diagnostics and error messages.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout, for scripted responses.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failing output with the given exit code and stderr.
    pub fn err(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Strict mode: convert a nonzero exit into [`ExecError::CommandFailed`]
    /// carrying the argument vector and the captured stderr.
    pub fn require_success(self, request: &CommandRequest) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::CommandFailed {
                command: request.display(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Runner trait + real backend
// ---------------------------------------------------------------------------

/// Abstract command-execution capability.
pub trait CommandRunner: Send + Sync {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput, ExecError>;
}

/// Real-process backend: spawns the program and waits for it to exit.
///
/// Text decoding is lossy; invalid byte sequences are dropped, never fatal.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput, ExecError> {
        debug!(
            cmd = %request.display(),
            cwd = ?request.cwd,
            "running command"
        );

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = request.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecError::BinaryNotFound(request.program.clone())
            } else {
                ExecError::IoError(e)
            }
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if exit_code != 0 {
            warn!(exit_code, cmd = %request.display(), "command exited nonzero");
        }
        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

// ---------------------------------------------------------------------------
// Deterministic fake backend
// ---------------------------------------------------------------------------

/// Scripted, recording backend for tests.
///
/// Responses are matched against the rendered command line (plus working
/// directory) by substring. One-shot responses queued with [`FakeRunner::push`]
/// are consumed in FIFO order; sticky responses installed with
/// [`FakeRunner::on`] answer every remaining match. Unmatched commands
/// succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<FakeRule>>,
    calls: Mutex<Vec<CommandRequest>>,
}

struct FakeRule {
    needle: String,
    queue: VecDeque<CommandOutput>,
    sticky: Option<CommandOutput>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a sticky response for every command line containing `needle`.
    pub fn on(&self, needle: impl Into<String>, output: CommandOutput) {
        self.rules.lock().unwrap().push(FakeRule {
            needle: needle.into(),
            queue: VecDeque::new(),
            sticky: Some(output),
        });
    }

    /// Queue a one-shot response for the next command line containing
    /// `needle`. Repeated pushes with the same needle are consumed in order.
    pub fn push(&self, needle: impl Into<String>, output: CommandOutput) {
        let needle = needle.into();
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules
            .iter_mut()
            .find(|r| r.needle == needle && r.sticky.is_none())
        {
            rule.queue.push_back(output);
            return;
        }
        let mut queue = VecDeque::new();
        queue.push_back(output);
        rules.push(FakeRule {
            needle,
            queue,
            sticky: None,
        });
    }

    /// All requests seen so far, in order.
    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines seen so far, in order.
    pub fn call_lines(&self) -> Vec<String> {
        self.calls().iter().map(|r| r.display()).collect()
    }

    /// Number of recorded calls whose command line contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.call_lines()
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }

    fn haystack(request: &CommandRequest) -> String {
        match request.cwd {
            Some(ref dir) => format!("{} @{}", request.display(), dir.display()),
            None => request.display(),
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(request.clone());

        let haystack = Self::haystack(request);
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if !haystack.contains(&rule.needle) {
                continue;
            }
            if let Some(output) = rule.queue.pop_front() {
                return Ok(output);
            }
            if let Some(ref output) = rule.sticky {
                return Ok(output.clone());
            }
        }
        Ok(CommandOutput::ok(""))
    }
}
