//! Git repository synchronization via the `git` CLI.
//!
//! [`GitSync`] drives `git` as a subordinate process (clone, fetch, pull,
//! submodule + LFS refresh) with `GIT_SSH_COMMAND` pinned to a resolved SSH
//! key, and reports before/after head commits for the main tree and every
//! submodule.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::GitError;
use crate::exec::{CommandRequest, CommandRunner, ProcessRunner};
use crate::models::{CommitInfo, GitSyncResult, RepoSync};

/// Environment variable naming an SSH private key file.
pub const SSH_KEY_ENV: &str = "WCSYNC_SSH_KEY";

/// Field-delimited `git log` format consumed by [`GitSync::commits_between`].
const LOG_FORMAT: &str = "%H|%an|%ae|%ad|%s";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Parameters for one [`GitSync::update_repo`] run.
#[derive(Debug, Clone)]
pub struct GitUpdateOptions {
    pub url: String,
    pub dest: PathBuf,
    /// Branch to check out; `None` keeps the current branch.
    pub branch: Option<String>,
    /// Recurse into submodules (clone `--recursive`, sync/update, reset,
    /// clean, LFS).
    pub recursive: bool,
    /// Refresh large-file content for the main tree and every submodule.
    pub lfs: bool,
    /// Hard-reset the main tree (and submodules when recursive) before
    /// updating. Destructive; off unless explicitly requested.
    pub reset: bool,
    /// Force-clean untracked files (and submodules when recursive) before
    /// updating. Destructive; off unless explicitly requested.
    pub clean: bool,
}

impl GitUpdateOptions {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            branch: None,
            recursive: true,
            lfs: true,
            reset: false,
            clean: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SSH key resolution
// ---------------------------------------------------------------------------

/// Resolution order: explicit argument, `$WCSYNC_SSH_KEY`, then the default
/// key file locations under `~/.ssh`. An explicit key that does not exist is
/// an error; a missing environment key falls through to the defaults.
fn resolve_ssh_key(explicit: Option<&Path>) -> Result<PathBuf, GitError> {
    let env_key = std::env::var_os(SSH_KEY_ENV).map(PathBuf::from);
    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".ssh").join("id_ed25519"));
        candidates.push(home.join(".ssh").join("id_rsa"));
    }
    resolve_ssh_key_from(explicit, env_key, &candidates)
}

fn resolve_ssh_key_from(
    explicit: Option<&Path>,
    env_key: Option<PathBuf>,
    candidates: &[PathBuf],
) -> Result<PathBuf, GitError> {
    if let Some(key) = explicit {
        if key.is_file() {
            return Ok(key.to_path_buf());
        }
        return Err(GitError::NoUsableSshKey(format!(
            "{} does not exist",
            key.display()
        )));
    }
    if let Some(key) = env_key {
        if key.is_file() {
            return Ok(key);
        }
        warn!(
            key = %key.display(),
            "ssh key from {} does not exist, trying defaults", SSH_KEY_ENV
        );
    }
    for key in candidates {
        if key.is_file() {
            return Ok(key.clone());
        }
    }
    Err(GitError::NoUsableSshKey(format!(
        "no key argument, {} unset or stale, and none of {} default locations exist",
        SSH_KEY_ENV,
        candidates.len()
    )))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Git synchronization engine bound to one resolved SSH key.
///
/// Construction fails fast with a configuration error when no usable key
/// exists, before any network operation is attempted.
pub struct GitSync {
    runner: Arc<dyn CommandRunner>,
    ssh_key: PathBuf,
}

impl GitSync {
    /// Engine backed by real `git` subprocesses.
    pub fn new(ssh_key: Option<&Path>) -> Result<Self, GitError> {
        Self::with_runner(Arc::new(ProcessRunner), ssh_key)
    }

    /// Engine backed by an explicit command runner.
    pub fn with_runner(
        runner: Arc<dyn CommandRunner>,
        ssh_key: Option<&Path>,
    ) -> Result<Self, GitError> {
        let ssh_key = resolve_ssh_key(ssh_key)?;
        info!(key = %ssh_key.display(), "resolved ssh key");
        Ok(Self { runner, ssh_key })
    }

    pub fn ssh_key(&self) -> &Path {
        &self.ssh_key
    }

    fn ssh_command(&self) -> String {
        let null_dev = if cfg!(windows) { "NUL" } else { "/dev/null" };
        format!(
            "ssh -i '{}' -o StrictHostKeyChecking=no -o UserKnownHostsFile={}",
            self.ssh_key.display(),
            null_dev
        )
    }

    fn run_git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let mut request =
            CommandRequest::new("git", args).env("GIT_SSH_COMMAND", self.ssh_command());
        if let Some(dir) = cwd {
            request = request.cwd(dir);
        }
        debug!(cmd = %request.display(), cwd = ?cwd, "running git command");
        let output = self.runner.run(&request)?;
        let output = output.require_success(&request).map_err(GitError::from)?;
        Ok(output.stdout.trim().to_string())
    }

    fn ensure_repo(path: &Path) -> Result<(), GitError> {
        // .git may be a file for worktrees and submodules
        if path.join(".git").exists() {
            Ok(())
        } else {
            Err(GitError::NotARepository(path.display().to_string()))
        }
    }

    // -----------------------------------------------------------------------
    // Basic operations
    // -----------------------------------------------------------------------

    pub fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        recursive: bool,
        lfs: bool,
    ) -> Result<(), GitError> {
        info!(url, dest = %dest.display(), "cloning repository");
        let dest_str = dest.display().to_string();
        let mut args = vec!["clone", url, &dest_str];
        if let Some(b) = branch {
            args.push("-b");
            args.push(b);
        }
        if recursive {
            args.push("--recursive");
        }
        self.run_git(None, &args)?;

        if lfs {
            self.lfs_install(dest)?;
            self.lfs_pull(dest)?;
        }
        Ok(())
    }

    pub fn fetch(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["fetch", "--all"])?;
        Ok(())
    }

    pub fn checkout(&self, path: &Path, target: &str) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["checkout", target])?;
        Ok(())
    }

    pub fn pull(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["pull"])?;
        Ok(())
    }

    pub fn submodule_sync(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["submodule", "sync", "--recursive"])?;
        Ok(())
    }

    pub fn submodule_update(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["submodule", "update", "--init", "--recursive"])?;
        Ok(())
    }

    pub fn lfs_install(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["lfs", "install"])?;
        Ok(())
    }

    pub fn lfs_pull(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["lfs", "fetch", "--all"])?;
        self.run_git(Some(path), &["lfs", "pull"])?;
        Ok(())
    }

    pub fn lfs_pull_all_submodules(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(
            Some(path),
            &["submodule", "foreach", "--recursive", "git lfs pull"],
        )?;
        Ok(())
    }

    pub fn reset_hard(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["reset", "--hard", "HEAD"])?;
        Ok(())
    }

    pub fn clean_untracked(&self, path: &Path) -> Result<(), GitError> {
        Self::ensure_repo(path)?;
        self.run_git(Some(path), &["clean", "-fd"])?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Commit hash of HEAD.
    pub fn head(&self, path: &Path) -> Result<String, GitError> {
        self.run_git(Some(path), &["rev-parse", "HEAD"])
    }

    /// Commits in `a..b`, newest first, from the fixed field-delimited log
    /// format.
    pub fn commits_between(
        &self,
        path: &Path,
        a: &str,
        b: &str,
    ) -> Result<Vec<CommitInfo>, GitError> {
        if a == b {
            return Ok(Vec::new());
        }

        let range = format!("{}..{}", a, b);
        let pretty = format!("--pretty=format:{}", LOG_FORMAT);
        let out = self.run_git(Some(path), &["log", &range, &pretty, "--date=iso"])?;

        let mut commits = Vec::new();
        for line in out.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.splitn(5, '|').collect();
            if fields.len() != 5 {
                return Err(GitError::LogParse(format!(
                    "expected 5 '|'-delimited fields, got: {}",
                    line
                )));
            }
            commits.push(CommitInfo {
                commit: fields[0].to_string(),
                author: fields[1].to_string(),
                email: fields[2].to_string(),
                date: fields[3].to_string(),
                message: fields[4].to_string(),
            });
        }
        debug!(count = commits.len(), range = %range, "collected commits");
        Ok(commits)
    }

    /// Current commit of every submodule, keyed by submodule path.
    pub fn submodule_states(&self, path: &Path) -> Result<BTreeMap<String, String>, GitError> {
        let out = self.run_git(Some(path), &["submodule", "status", "--recursive"])?;
        let mut states = BTreeMap::new();
        for line in out.lines() {
            let mut parts = line.split_whitespace();
            let commit = match parts.next() {
                Some(c) => c.trim_start_matches(['+', '-', 'U']).to_string(),
                None => continue,
            };
            if let Some(sub_path) = parts.next() {
                states.insert(sub_path.to_string(), commit);
            }
        }
        Ok(states)
    }

    // -----------------------------------------------------------------------
    // Full update run
    // -----------------------------------------------------------------------

    /// Bring `dest` up to date with its remote and report what moved.
    ///
    /// A missing destination is cloned; an existing one is (optionally
    /// reset/cleaned, then) checked out, fetched, pulled, and its submodules
    /// and LFS content refreshed. Head commits are snapshotted before and
    /// after; every submodule whose commit changed carries its intervening
    /// commit log in the result.
    pub fn update_repo(&self, opts: &GitUpdateOptions) -> Result<GitSyncResult, GitError> {
        let dest = opts.dest.as_path();

        let main_before = if dest.exists() {
            Some(self.head(dest)?)
        } else {
            None
        };
        let subs_before = if main_before.is_some() {
            self.submodule_states(dest)?
        } else {
            BTreeMap::new()
        };

        if main_before.is_none() {
            self.clone_repo(&opts.url, dest, opts.branch.as_deref(), opts.recursive, opts.lfs)?;
        } else {
            if opts.reset {
                warn!(dest = %dest.display(), "hard-resetting main tree");
                self.reset_hard(dest)?;
                if opts.recursive {
                    warn!(dest = %dest.display(), "hard-resetting submodules");
                    self.run_git(
                        Some(dest),
                        &["submodule", "foreach", "--recursive", "git reset --hard HEAD"],
                    )?;
                }
            }
            if opts.clean {
                warn!(dest = %dest.display(), "force-cleaning main tree");
                self.clean_untracked(dest)?;
                if opts.recursive {
                    warn!(dest = %dest.display(), "force-cleaning submodules");
                    self.run_git(
                        Some(dest),
                        &["submodule", "foreach", "--recursive", "git clean -fd"],
                    )?;
                }
            }

            if let Some(ref branch) = opts.branch {
                self.checkout(dest, branch)?;
            }
            self.fetch(dest)?;
            self.pull(dest)?;

            if opts.recursive {
                self.submodule_sync(dest)?;
                self.submodule_update(dest)?;
            }
            if opts.lfs {
                self.lfs_install(dest)?;
                self.lfs_pull(dest)?;
                self.lfs_pull_all_submodules(dest)?;
            }
        }

        let main_after = self.head(dest)?;
        let subs_after = self.submodule_states(dest)?;

        let repo_commits = match main_before {
            Some(ref before) => self.commits_between(dest, before, &main_after)?,
            None => Vec::new(),
        };
        let mut result = GitSyncResult {
            repo: RepoSync {
                path: dest.display().to_string(),
                from: main_before,
                to: main_after,
                commits: repo_commits,
            },
            submodules: Vec::new(),
        };

        for (sub_path, new_commit) in &subs_after {
            let old_commit = match subs_before.get(sub_path) {
                Some(old) if old != new_commit => old,
                _ => continue,
            };
            let full_path = dest.join(sub_path);
            result.submodules.push(RepoSync {
                path: sub_path.clone(),
                from: Some(old_commit.clone()),
                to: new_commit.clone(),
                commits: self.commits_between(&full_path, old_commit, new_commit)?,
            });
        }

        info!(
            dest = %dest.display(),
            to = %result.repo.to,
            changed_submodules = result.submodules.len(),
            "git update completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, FakeRunner};
    use std::fs;

    fn temp_key(dir: &Path) -> PathBuf {
        let key = dir.join("id_test");
        fs::write(&key, "fake key").unwrap();
        key
    }

    fn engine(dir: &Path) -> (GitSync, Arc<FakeRunner>) {
        let key = temp_key(dir);
        let fake = Arc::new(FakeRunner::new());
        let sync = GitSync::with_runner(fake.clone() as Arc<dyn CommandRunner>, Some(&key))
            .unwrap();
        (sync, fake)
    }

    #[test]
    fn test_resolve_ssh_key_explicit_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = temp_key(dir.path());
        let env_key = dir.path().join("env_key");
        fs::write(&env_key, "k").unwrap();

        let key =
            resolve_ssh_key_from(Some(&explicit), Some(env_key), &[]).unwrap();
        assert_eq!(key, explicit);
    }

    #[test]
    fn test_resolve_ssh_key_explicit_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = resolve_ssh_key_from(Some(&missing), None, &[]);
        assert!(matches!(result, Err(GitError::NoUsableSshKey(_))));
    }

    #[test]
    fn test_resolve_ssh_key_stale_env_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("gone");
        let fallback = temp_key(dir.path());

        let key =
            resolve_ssh_key_from(None, Some(stale), &[fallback.clone()]).unwrap();
        assert_eq!(key, fallback);
    }

    #[test]
    fn test_resolve_ssh_key_nothing_usable() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            resolve_ssh_key_from(None, None, &[dir.path().join("absent")]);
        assert!(matches!(result, Err(GitError::NoUsableSshKey(_))));
    }

    #[test]
    fn test_every_git_call_carries_ssh_command() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        let (sync, fake) = engine(dir.path());

        sync.fetch(&repo).unwrap();
        let call = &fake.calls()[0];
        let (key, value) = &call.env[0];
        assert_eq!(key, "GIT_SSH_COMMAND");
        assert!(value.contains("id_test"));
        assert!(value.contains("StrictHostKeyChecking=no"));
    }

    #[test]
    fn test_fetch_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (sync, _fake) = engine(dir.path());
        let result = sync.fetch(&dir.path().join("not-a-repo"));
        assert!(matches!(result, Err(GitError::NotARepository(_))));
    }

    #[test]
    fn test_commits_between_parses_delimited_log() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        let (sync, fake) = engine(dir.path());
        fake.push(
            "log aaa..bbb",
            CommandOutput::ok(
                "bbb|Bob|bob@example.com|2025-01-11 09:00:00 +0000|add feature\n\
                 aaa1|Alice|alice@example.com|2025-01-10 08:00:00 +0000|fix a|b pipe msg",
            ),
        );

        let commits = sync.commits_between(&repo, "aaa", "bbb").unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].commit, "bbb");
        assert_eq!(commits[0].author, "Bob");
        // pipes inside the subject stay in the message field
        assert_eq!(commits[1].message, "fix a|b pipe msg");
    }

    #[test]
    fn test_commits_between_identical_revs_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (sync, fake) = engine(dir.path());
        let commits = sync
            .commits_between(dir.path(), "same", "same")
            .unwrap();
        assert!(commits.is_empty());
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_submodule_states_strips_state_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        let (sync, fake) = engine(dir.path());
        fake.push(
            "submodule status",
            CommandOutput::ok(
                " 1111111 libs/engine (heads/main)\n\
                 +2222222 libs/tools (heads/main)\n\
                 -3333333 libs/data\n",
            ),
        );

        let states = sync.submodule_states(&repo).unwrap();
        assert_eq!(states["libs/engine"], "1111111");
        assert_eq!(states["libs/tools"], "2222222");
        assert_eq!(states["libs/data"], "3333333");
    }

    #[test]
    fn test_update_repo_clones_when_dest_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (sync, fake) = engine(dir.path());
        let dest = dir.path().join("checkout");
        fake.on("rev-parse HEAD", CommandOutput::ok("abc123\n"));

        let mut opts = GitUpdateOptions::new("git@example.com:proj.git", &dest);
        opts.branch = Some("main".into());
        opts.lfs = false;
        let result = sync.update_repo(&opts).unwrap();

        assert!(result.repo.from.is_none());
        assert_eq!(result.repo.to, "abc123");
        assert!(result.repo.commits.is_empty());

        let lines = fake.call_lines();
        assert!(lines
            .iter()
            .any(|l| l.contains("clone") && l.contains("-b main") && l.contains("--recursive")));
        assert_eq!(fake.count_matching("fetch --all"), 0);
    }

    #[test]
    fn test_update_repo_existing_default_is_non_destructive() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("repo");
        fs::create_dir_all(dest.join(".git")).unwrap();
        let (sync, fake) = engine(dir.path());

        fake.push("rev-parse HEAD", CommandOutput::ok("aaa\n"));
        fake.push("rev-parse HEAD", CommandOutput::ok("bbb\n"));
        fake.push(
            "submodule status",
            CommandOutput::ok(" 1111111 libs/engine (heads/main)\n"),
        );
        fake.push(
            "submodule status",
            CommandOutput::ok(" 9999999 libs/engine (heads/main)\n"),
        );
        fake.on(
            "log aaa..bbb",
            CommandOutput::ok("bbb|Bob|b@e.com|2025-01-11 09:00:00 +0000|tip"),
        );
        fake.on(
            "log 1111111..9999999",
            CommandOutput::ok("9999999|Eve|e@e.com|2025-01-11 10:00:00 +0000|sub tip"),
        );

        let mut opts = GitUpdateOptions::new("git@example.com:proj.git", &dest);
        opts.branch = Some("release".into());
        let result = sync.update_repo(&opts).unwrap();

        assert_eq!(result.repo.from.as_deref(), Some("aaa"));
        assert_eq!(result.repo.to, "bbb");
        assert_eq!(result.repo.commits.len(), 1);
        assert_eq!(result.submodules.len(), 1);
        assert_eq!(result.submodules[0].path, "libs/engine");
        assert_eq!(result.submodules[0].commits[0].author, "Eve");

        // destructive steps stay off by default
        assert_eq!(fake.count_matching("reset --hard"), 0);
        assert_eq!(fake.count_matching("clean -fd"), 0);

        let lines = fake.call_lines();
        let pos = |needle: &str| {
            lines
                .iter()
                .position(|l| l.contains(needle))
                .unwrap_or_else(|| panic!("missing call: {}", needle))
        };
        assert!(pos("checkout release") < pos("fetch --all"));
        assert!(pos("fetch --all") < pos("git pull"));
        assert!(pos("submodule sync") < pos("submodule update --init --recursive"));
        assert!(pos("lfs install") < pos("lfs pull"));
    }

    #[test]
    fn test_update_repo_opt_in_reset_and_clean() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("repo");
        fs::create_dir_all(dest.join(".git")).unwrap();
        let (sync, fake) = engine(dir.path());
        fake.on("rev-parse HEAD", CommandOutput::ok("aaa\n"));

        let mut opts = GitUpdateOptions::new("git@example.com:proj.git", &dest);
        opts.reset = true;
        opts.clean = true;
        opts.lfs = false;
        sync.update_repo(&opts).unwrap();

        assert_eq!(fake.count_matching("reset --hard HEAD"), 2);
        assert_eq!(fake.count_matching("clean -fd"), 2);
    }
}
