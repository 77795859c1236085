//! Core engine for synchronizing version-controlled workspaces.
//!
//! Wraps the `svn` and `git` command-line tools behind typed engines:
//! [`svn::SvnWorkspace`] manages Subversion working copies (lock recovery,
//! external-aware cleaning, sparse checkouts, change aggregation) and
//! [`git::GitSync`] mirrors Git repositories with submodule and LFS support.
//! All subprocess execution flows through the [`exec::CommandRunner`] trait
//! so every engine can be driven with scripted command outputs in tests.

pub mod errors;
pub mod exec;
pub mod git;
pub mod models;
pub mod svn;

pub use errors::{ConfigError, CoreError, ExecError, GitError, SvnError};
pub use exec::{CommandOutput, CommandRequest, CommandRunner, FakeRunner, ProcessRunner};
pub use models::{
    ChangeSummary, CommitInfo, FileAction, FileChange, GitSyncResult, RepoSync, RevisionChange,
    UpdateResult,
};
