//! Error types for the wcsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Svn(#[from] SvnError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Command execution errors
// ---------------------------------------------------------------------------

/// Errors from spawning and collecting subordinate processes.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The requested binary was not found on `$PATH`.
    #[error("binary not found: {0}")]
    BinaryNotFound(String),

    /// A command exited nonzero and the caller requested strict mode.
    ///
    /// Carries the exact argument vector and the captured stderr.
    #[error("command failed (exit {exit_code}): {command}\n{stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Generic I/O failure while spawning or waiting.
    #[error("command I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// SVN errors
// ---------------------------------------------------------------------------

/// Errors from SVN working-copy operations.
#[derive(Debug, Error)]
pub enum SvnError {
    /// Underlying command execution failure.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The working copy stayed locked through the single recovery attempt.
    #[error("working copy still locked after cleanup and retry: {command}\n{stderr}")]
    LockRecoveryExhausted {
        command: String,
        stderr: String,
    },

    /// Operation invoked against a path that is not in a usable state, or
    /// change aggregation requested before any synchronization occurred.
    #[error("repository state error: {0}")]
    RepositoryState(String),

    /// Could not parse the XML output produced by `svn`.
    #[error("failed to parse svn XML output: {0}")]
    XmlParse(String),

    /// Generic I/O wrapper.
    #[error("svn I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from Git repository synchronization.
#[derive(Debug, Error)]
pub enum GitError {
    /// Underlying command execution failure.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// No SSH key could be resolved from the argument, the environment, or
    /// the default key file locations.
    #[error("no usable SSH key: {0}")]
    NoUsableSshKey(String),

    /// The path exists but is not a Git repository.
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// A `git log` line did not match the expected field-delimited format.
    #[error("failed to parse git log output: {0}")]
    LogParse(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from loading and validating declarative input documents.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Input document not found.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// JSON parse error.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A document field is missing or invalid.
    #[error("invalid value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the document.
    #[error("config I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ExecError::BinaryNotFound("svn".into());
        assert_eq!(err.to_string(), "binary not found: svn");

        let err = SvnError::RepositoryState("update_to() not run".into());
        assert!(err.to_string().contains("repository state"));

        let err = GitError::NoUsableSshKey("checked 2 locations".into());
        assert!(err.to_string().contains("SSH key"));

        let err = ConfigError::InvalidValue {
            field: "projects.px.repo_url".into(),
            detail: "must not be empty".into(),
        };
        assert!(err.to_string().contains("projects.px.repo_url"));
    }

    #[test]
    fn test_command_failed_carries_argv_and_stderr() {
        let err = ExecError::CommandFailed {
            command: "svn update -r 42".into(),
            exit_code: 1,
            stderr: "E155004: run 'svn cleanup'".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("svn update -r 42"));
        assert!(msg.contains("E155004"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let svn_err = SvnError::RepositoryState("x".into());
        let core_err: CoreError = svn_err.into();
        assert!(matches!(core_err, CoreError::Svn(_)));

        let exec_err = ExecError::BinaryNotFound("git".into());
        let core_err: CoreError = exec_err.into();
        assert!(matches!(core_err, CoreError::Exec(_)));
    }
}
