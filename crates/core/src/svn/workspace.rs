//! SVN working-copy engine.
//!
//! [`SvnWorkspace`] owns one working copy and drives the `svn` binary
//! through a [`CommandRunner`]: state recovery (dirty, locked, partial),
//! recursive external discovery, sparse-profile application, revision and
//! time-range history collection, and change aggregation across the main
//! repository and all externals.
//!
//! All operations are blocking; recursive traversal is strictly sequential
//! depth-first because sibling externals may share a parent working copy.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::errors::SvnError;
use crate::exec::{CommandOutput, CommandRequest, CommandRunner, ProcessRunner};
use crate::models::{truncate_diff, ChangeSummary, RevisionChange, UpdateResult};
use crate::svn::parser;
use crate::svn::profile::{PathRevisionRules, SparseProfile};

/// Stderr signatures of an advisory working-copy lock. A failed command
/// matching one of these gets a single cleanup-and-retry pass.
const LOCK_SIGNATURES: [&str; 3] = ["is locked", "E155004", "run 'svn cleanup'"];

/// Default line cap for per-file diff collection.
pub const DEFAULT_MAX_DIFF_LINES: usize = 200;

/// Knobs for change collection and aggregation.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Attach a line-capped diff to every file of every collected revision.
    pub include_diff: bool,
    /// Line cap applied to each collected diff.
    pub max_diff_lines: usize,
    /// Also collect changes from every discovered external.
    pub include_externals: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            include_diff: false,
            max_diff_lines: DEFAULT_MAX_DIFF_LINES,
            include_externals: true,
        }
    }
}

/// One SVN working copy, identified by its root path.
///
/// `before_update_rev` / `after_update_rev` are recorded by
/// [`update_to`](Self::update_to) and consumed by
/// [`collect_update_result`](Self::collect_update_result); they live only for
/// the current synchronization session.
pub struct SvnWorkspace {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    before_update_rev: Option<String>,
    after_update_rev: Option<String>,
}

impl SvnWorkspace {
    /// Workspace backed by real `svn` subprocesses.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_runner(root, Arc::new(ProcessRunner))
    }

    /// Workspace backed by an explicit command runner.
    pub fn with_runner(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
            before_update_rev: None,
            after_update_rev: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Revision recorded just before the last [`update_to`](Self::update_to).
    pub fn before_update_rev(&self) -> Option<&str> {
        self.before_update_rev.as_deref()
    }

    /// Revision recorded just after the last [`update_to`](Self::update_to).
    pub fn after_update_rev(&self) -> Option<&str> {
        self.after_update_rev.as_deref()
    }

    fn child(&self, root: impl Into<PathBuf>) -> SvnWorkspace {
        SvnWorkspace::with_runner(root, Arc::clone(&self.runner))
    }

    fn request(&self, args: &[&str]) -> CommandRequest {
        CommandRequest::new("svn", args).cwd(&self.root)
    }

    // -----------------------------------------------------------------------
    // Command wrapper + lock recovery
    // -----------------------------------------------------------------------

    fn is_lock_failure(output: &CommandOutput) -> bool {
        !output.success() && LOCK_SIGNATURES.iter().any(|sig| output.stderr.contains(sig))
    }

    /// Run one `svn` command. On a recognized lock failure, run a
    /// non-aggressive cleanup and re-issue the command exactly once.
    /// The returned flag reports whether the retry path was taken.
    fn run_with_lock_recovery(
        &self,
        args: &[&str],
    ) -> Result<(CommandOutput, bool), SvnError> {
        let request = self.request(args);
        let output = self.runner.run(&request).map_err(SvnError::from)?;

        if !Self::is_lock_failure(&output) {
            return Ok((output, false));
        }

        warn!(
            path = %self.root.display(),
            cmd = %request.display(),
            "working copy locked, running cleanup and retrying once"
        );
        self.cleanup(false)?;
        let output = self.runner.run(&request).map_err(SvnError::from)?;
        Ok((output, true))
    }

    /// Non-strict invocation: the output is returned even on nonzero exit.
    pub fn svn(&self, args: &[&str]) -> Result<CommandOutput, SvnError> {
        Ok(self.run_with_lock_recovery(args)?.0)
    }

    /// Strict invocation: nonzero exit becomes a typed error. A failure that
    /// persisted through the lock-recovery retry surfaces as
    /// [`SvnError::LockRecoveryExhausted`].
    pub fn svn_checked(&self, args: &[&str]) -> Result<CommandOutput, SvnError> {
        let (output, retried) = self.run_with_lock_recovery(args)?;
        if output.success() {
            return Ok(output);
        }
        if retried {
            return Err(SvnError::LockRecoveryExhausted {
                command: self.request(args).display(),
                stderr: output.stderr,
            });
        }
        output
            .require_success(&self.request(args))
            .map_err(SvnError::from)
    }

    // -----------------------------------------------------------------------
    // Working-copy state
    // -----------------------------------------------------------------------

    /// Whether the root path is an SVN working copy.
    pub fn is_working_copy(&self) -> bool {
        self.root.join(".svn").is_dir()
    }

    fn require_working_copy(&self) -> Result<(), SvnError> {
        if self.is_working_copy() {
            Ok(())
        } else {
            Err(SvnError::RepositoryState(format!(
                "{} is not an svn working copy",
                self.root.display()
            )))
        }
    }

    /// Revert all local modifications and force-remove unversioned entries.
    ///
    /// Unversioned entries are read from `svn status --xml --no-ignore`;
    /// removal failures are logged and swallowed, they never fail the clean.
    pub fn revert_local_changes(&self) -> Result<(), SvnError> {
        info!(path = %self.root.display(), "reverting local changes");
        self.svn(&["revert", "-R", "."])?;

        let status = self.svn(&["status", "--xml", "--no-ignore"])?;
        if !status.success() {
            warn!(
                path = %self.root.display(),
                stderr = %status.stderr,
                "svn status failed, skipping unversioned removal"
            );
            return Ok(());
        }

        for rel in parser::parse_status_unversioned(&status.stdout) {
            let full = self.root.join(&rel);
            let removed = if full.is_dir() {
                debug!(path = %full.display(), "removing unversioned directory");
                fs::remove_dir_all(&full)
            } else if full.exists() {
                debug!(path = %full.display(), "removing unversioned file");
                fs::remove_file(&full)
            } else {
                continue;
            };
            if let Err(e) = removed {
                warn!(path = %full.display(), error = %e, "failed to remove unversioned entry");
            }
        }
        Ok(())
    }

    /// Run `svn cleanup`; with `aggressive`, additionally remove unversioned
    /// and ignored items. Best-effort: a nonzero exit is logged, not raised.
    pub fn cleanup(&self, aggressive: bool) -> Result<(), SvnError> {
        info!(path = %self.root.display(), aggressive, "running svn cleanup");
        let output = self.runner.run(&self.request(&["cleanup"]))?;
        if !output.success() {
            warn!(stderr = %output.stderr, "svn cleanup exited nonzero");
        }
        if aggressive {
            let output = self.runner.run(&self.request(&[
                "cleanup",
                "--remove-unversioned",
                "--remove-ignored",
            ]))?;
            if !output.success() {
                warn!(stderr = %output.stderr, "aggressive svn cleanup exited nonzero");
            }
        }
        Ok(())
    }

    fn clean_local(&self) -> Result<(), SvnError> {
        self.revert_local_changes()?;
        self.cleanup(false)
    }

    /// Bring the working copy and every discovered external to a clean
    /// state: revert, remove unversioned entries, cleanup. Externals are
    /// discovered once through the cycle-safe resolver, so each physical
    /// path is cleaned exactly once.
    pub fn ensure_clean(&self) -> Result<(), SvnError> {
        self.clean_local()?;
        for path in self.discover_externals()? {
            self.child(path).clean_local()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // External resolver
    // -----------------------------------------------------------------------

    /// Local paths of the externals declared at this working copy,
    /// non-recursive.
    pub fn externals(&self) -> Result<Vec<PathBuf>, SvnError> {
        let output = self.svn(&["propget", "svn:externals", "-R"])?;
        Ok(parser::parse_externals_targets(&output.stdout)
            .into_iter()
            .map(|local| self.root.join(local))
            .collect())
    }

    /// All externals reachable from this working copy, depth-first.
    ///
    /// Every visited physical path goes into a per-traversal visited set
    /// keyed by canonical absolute path, so the walk is finite even for a
    /// cyclic external graph and no path is processed twice. Only targets
    /// that exist as real directories are descended into.
    pub fn discover_externals(&self) -> Result<Vec<PathBuf>, SvnError> {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut discovered = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(path) = stack.pop() {
            let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if !visited.insert(key) {
                continue;
            }
            if path != self.root {
                discovered.push(path.clone());
            }

            let children = self.child(&path).externals()?;
            // Reverse so the stack pops children in declaration order.
            for child in children.into_iter().rev() {
                if child.is_dir() {
                    stack.push(child);
                }
            }
        }

        debug!(
            path = %self.root.display(),
            count = discovered.len(),
            "discovered externals"
        );
        Ok(discovered)
    }

    // -----------------------------------------------------------------------
    // Checkout / sparse profile
    // -----------------------------------------------------------------------

    /// Plain (non-sparse) checkout into the workspace root. Skipped when the
    /// root already is a working copy.
    pub fn checkout(&self, url: &str, revision: Option<&str>) -> Result<(), SvnError> {
        if self.is_working_copy() {
            info!(path = %self.root.display(), "already a working copy, skipping checkout");
            return Ok(());
        }

        let root_str = self.root.display().to_string();
        let mut args = vec!["checkout", url, &root_str];
        if let Some(rev) = revision {
            args.push("-r");
            args.push(rev);
        }

        let base_dir = self.root.parent().unwrap_or(Path::new("."));
        let request = CommandRequest::new("svn", &args).cwd(base_dir);
        let output = self.runner.run(&request)?;
        output.require_success(&request).map_err(SvnError::from)?;
        info!(path = %self.root.display(), url, "checkout completed");
        Ok(())
    }

    /// Apply a multi-project sparse profile against this workspace root.
    ///
    /// Each project is handled independently: checkout of the project root
    /// at its declared depth when missing (reuse otherwise), then one
    /// depth-expanding update per path rule in parent-before-child order.
    /// A failing project leaves earlier projects applied; there is no
    /// rollback.
    pub fn apply_sparse_profile(&self, profile: &SparseProfile) -> Result<(), SvnError> {
        for (name, project) in &profile.projects {
            let project_path = self.root.join(&project.root_path);
            let ws = self.child(&project_path);

            info!(
                project = %name,
                url = %project.repo_url,
                path = %project_path.display(),
                depth = %project.root_depth,
                "applying sparse project"
            );

            if !ws.is_working_copy() {
                fs::create_dir_all(&project_path)?;
                let path_str = project_path.display().to_string();
                ws.svn_checked(&[
                    "checkout",
                    &project.repo_url,
                    &path_str,
                    "--depth",
                    &project.root_depth,
                ])?;
            } else {
                info!(project = %name, "reusing existing working copy");
            }

            for rule in project.sorted_rules() {
                let rel = rule.path.trim_matches('/');
                info!(project = %name, path = rel, depth = %rule.depth, "expanding path");
                ws.svn_checked(&["update", rel, "--depth", &rule.depth])?;
            }
        }
        Ok(())
    }

    /// Pin selected sub-paths to explicit revisions. Rules with an empty
    /// path or revision are skipped with a warning; missing target
    /// directories are created so `svn update` can materialize them.
    pub fn update_paths_to_revision(&self, rules: &PathRevisionRules) -> Result<(), SvnError> {
        for rule in &rules.paths {
            if rule.path.is_empty() || rule.revision.is_empty() {
                warn!(?rule, "skipping invalid path-revision rule");
                continue;
            }

            let full = self.root.join(&rule.path);
            if !full.exists() {
                info!(path = %full.display(), "creating missing directory");
                fs::create_dir_all(&full)?;
            }

            info!(path = %rule.path, revision = %rule.revision, "pinning path");
            self.svn_checked(&[
                "update",
                &rule.path,
                "-r",
                &rule.revision,
                "--depth=infinity",
            ])?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Info queries
    // -----------------------------------------------------------------------

    /// Remote URL this working copy is bound to.
    pub fn current_url(&self) -> Result<String, SvnError> {
        let output = self.svn_checked(&["info", "--show-item", "url"])?;
        Ok(output.stdout.trim().to_string())
    }

    /// Revision of the working copy.
    pub fn current_revision(&self) -> Result<String, SvnError> {
        let output = self.svn_checked(&["info", "--show-item", "revision"])?;
        Ok(output.stdout.trim().to_string())
    }

    /// Latest revision of the bound remote URL.
    pub fn remote_head_revision(&self) -> Result<String, SvnError> {
        let url = self.current_url()?;
        let output = self.svn_checked(&["info", "--show-item", "revision", &url])?;
        Ok(output.stdout.trim().to_string())
    }

    /// Commit timestamp of one revision, used to map revision boundaries to
    /// the time window shared with the externals.
    pub fn rev_timestamp(&self, revision: &str) -> Result<String, SvnError> {
        let output = self.svn_checked(&["log", "--xml", "-r", revision])?;
        let entries = parser::parse_log(&output.stdout)?;
        entries
            .first()
            .map(|e| e.date.clone())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                SvnError::XmlParse(format!("no log entry with a date for revision {}", revision))
            })
    }

    // -----------------------------------------------------------------------
    // Update / switch
    // -----------------------------------------------------------------------

    /// Clean the tree and update it to `target` (default HEAD), recording
    /// the revision before and after for later change aggregation.
    pub fn update_to(&mut self, target: Option<&str>) -> Result<(), SvnError> {
        self.require_working_copy()?;
        self.before_update_rev = Some(self.current_revision()?);

        info!(
            path = %self.root.display(),
            target = target.unwrap_or("HEAD"),
            "updating working copy"
        );
        self.ensure_clean()?;

        match target {
            None => {
                self.svn_checked(&["update"])?;
            }
            Some(t) if t.eq_ignore_ascii_case("head") => {
                self.svn_checked(&["update"])?;
            }
            Some(t) => {
                self.svn_checked(&["update", "-r", t])?;
            }
        }

        self.after_update_rev = Some(self.current_revision()?);
        Ok(())
    }

    /// Switch the working copy to another URL (branch, tag). Skipped when
    /// the URL is unchanged.
    pub fn switch_to(&self, url: &str, revision: Option<&str>) -> Result<(), SvnError> {
        self.require_working_copy()?;
        let current = self.current_url()?;
        if current == url {
            info!(url, "url unchanged, skipping switch");
            return Ok(());
        }

        info!(from = %current, to = %url, "switching working copy");
        self.ensure_clean()?;

        let mut args = vec!["switch", url];
        if let Some(rev) = revision {
            args.push("-r");
            args.push(rev);
        }
        self.svn_checked(&args)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // History collection
    // -----------------------------------------------------------------------

    /// Ordered changes over `from_excl..to_incl`. A missing `from` means
    /// from the beginning of history.
    pub fn revision_changes(
        &self,
        from: Option<&str>,
        to: &str,
    ) -> Result<Vec<RevisionChange>, SvnError> {
        let range = revision_range(from, to);
        let output = self.svn_checked(&["log", "-v", "--xml", "-r", &range])?;
        parser::parse_log(&output.stdout)
    }

    /// Ordered changes within a time window, using the VCS's own
    /// time-to-revision resolution (`{timestamp}` range syntax). Tolerates
    /// repositories with no matching revisions.
    pub fn changes_in_time_range(
        &self,
        t_start: Option<&str>,
        t_end: &str,
    ) -> Result<Vec<RevisionChange>, SvnError> {
        let range = match t_start {
            Some(start) => format!("{{{}}}:{{{}}}", start, t_end),
            None => format!("{{{}}}", t_end),
        };
        let output = self.svn(&["log", "-v", "--xml", "-r", &range])?;
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        parser::parse_log(&output.stdout)
    }

    /// Line-capped diff of one revision, optionally restricted to one path.
    pub fn diff(
        &self,
        revision: &str,
        file_path: Option<&str>,
        max_lines: usize,
    ) -> Result<String, SvnError> {
        let mut args = vec!["diff", "-c", revision];
        if let Some(path) = file_path {
            args.push(path);
        }
        let output = self.svn_checked(&args)?;
        Ok(truncate_diff(&output.stdout, max_lines))
    }

    fn attach_diffs(
        &self,
        changes: &mut [RevisionChange],
        max_lines: usize,
    ) -> Result<(), SvnError> {
        for change in changes.iter_mut() {
            let revision = change.revision.clone();
            for file in &mut change.files {
                file.diff = Some(self.diff(&revision, Some(&file.path), max_lines)?);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Change aggregation
    // -----------------------------------------------------------------------

    /// Collect main-repository and per-external changes over one time
    /// window.
    ///
    /// A missing `start_time` falls back to the timestamp of
    /// `before_update_rev` (an error when no update was run); a missing
    /// `end_time` falls back to now (UTC).
    pub fn collect_change_summary(
        &self,
        start_time: Option<&str>,
        end_time: Option<&str>,
        opts: &CollectOptions,
    ) -> Result<ChangeSummary, SvnError> {
        let start = match start_time {
            Some(s) => s.to_string(),
            None => {
                let before = self.before_update_rev.as_deref().ok_or_else(|| {
                    SvnError::RepositoryState(
                        "change summary requested with no start time and no recorded \
                         before_update_rev; run update_to() first"
                            .into(),
                    )
                })?;
                self.rev_timestamp(before)?
            }
        };
        let end = match end_time {
            Some(e) => e.to_string(),
            None => Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        };

        info!(start = %start, end = %end, "collecting change summary");

        let mut summary = ChangeSummary {
            main: self.changes_in_time_range(Some(&start), &end)?,
            ..Default::default()
        };
        if opts.include_diff {
            self.attach_diffs(&mut summary.main, opts.max_diff_lines)?;
        }

        if opts.include_externals {
            for path in self.discover_externals()? {
                let external = self.child(path);
                let url = external.current_url()?;
                let mut changes = external.changes_in_time_range(Some(&start), &end)?;
                if opts.include_diff {
                    external.attach_diffs(&mut changes, opts.max_diff_lines)?;
                }
                summary.externals.insert(url, changes);
            }
        }

        Ok(summary)
    }

    /// Reduce the changes between the recorded before/after revisions into
    /// one ordered [`UpdateResult`] spanning the main repository and all
    /// externals.
    ///
    /// Fails with [`SvnError::RepositoryState`] unless a prior
    /// [`update_to`](Self::update_to) recorded both revision markers.
    pub fn collect_update_result(&self, opts: &CollectOptions) -> Result<UpdateResult, SvnError> {
        let (before, after) = match (&self.before_update_rev, &self.after_update_rev) {
            (Some(b), Some(a)) => (b.clone(), a.clone()),
            _ => {
                return Err(SvnError::RepositoryState(
                    "collect_update_result called before update_to(); \
                     revision markers are unset"
                        .into(),
                ))
            }
        };

        let t_start = self.rev_timestamp(&before)?;
        let t_end = self.rev_timestamp(&after)?;
        let summary = self.collect_change_summary(Some(&t_start), Some(&t_end), opts)?;

        let mut all_changes = summary.main;
        for (_, changes) in summary.externals {
            all_changes.extend(changes);
        }
        all_changes.sort_by_key(|c| c.sort_key());

        Ok(UpdateResult {
            from_rev: before,
            to_rev: after,
            revision_changes: all_changes,
        })
    }
}

/// Render an exclusive-start, inclusive-end revision range for `svn log`.
/// A non-numeric `from` is passed through unchanged.
fn revision_range(from: Option<&str>, to: &str) -> String {
    match from {
        None => format!("1:{}", to),
        Some(f) => match f.parse::<i64>() {
            Ok(n) => format!("{}:{}", n + 1, to),
            Err(_) => format!("{}:{}", f, to),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::FakeRunner;

    fn workspace(root: &Path) -> (SvnWorkspace, Arc<FakeRunner>) {
        let fake = Arc::new(FakeRunner::new());
        let ws = SvnWorkspace::with_runner(root, fake.clone() as Arc<dyn CommandRunner>);
        (ws, fake)
    }

    fn make_working_copy(root: &Path) {
        fs::create_dir_all(root.join(".svn")).unwrap();
    }

    const LOCKED_STDERR: &str =
        "svn: E155004: Working copy locked; try running 'svn cleanup'";

    #[test]
    fn test_lock_failure_triggers_one_cleanup_and_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, fake) = workspace(dir.path());
        fake.push("update", CommandOutput::err(1, LOCKED_STDERR));

        let output = ws.svn_checked(&["update"]).unwrap();
        assert!(output.success());
        assert_eq!(fake.count_matching("svn update"), 2);
        assert_eq!(fake.count_matching("svn cleanup"), 1);
    }

    #[test]
    fn test_persistent_lock_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, fake) = workspace(dir.path());
        fake.push("update", CommandOutput::err(1, LOCKED_STDERR));
        fake.push("update", CommandOutput::err(1, LOCKED_STDERR));

        let result = ws.svn_checked(&["update"]);
        assert!(matches!(result, Err(SvnError::LockRecoveryExhausted { .. })));
        assert_eq!(fake.count_matching("svn update"), 2);
        assert_eq!(fake.count_matching("svn cleanup"), 1);
    }

    #[test]
    fn test_non_lock_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, fake) = workspace(dir.path());
        fake.push(
            "update",
            CommandOutput::err(1, "svn: E170013: Unable to connect to a repository"),
        );

        let result = ws.svn_checked(&["update"]);
        assert!(matches!(
            result,
            Err(SvnError::Exec(crate::errors::ExecError::CommandFailed { .. }))
        ));
        assert_eq!(fake.count_matching("svn update"), 1);
        assert_eq!(fake.count_matching("svn cleanup"), 0);
    }

    #[test]
    fn test_non_strict_call_returns_failing_output() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, fake) = workspace(dir.path());
        fake.push("propget", CommandOutput::err(1, "W200017: no such property"));

        let output = ws.svn(&["propget", "svn:externals", "-R"]).unwrap();
        assert_eq!(output.exit_code, 1);
    }

    #[test]
    fn test_update_to_records_before_and_after() {
        let dir = tempfile::tempdir().unwrap();
        make_working_copy(dir.path());
        let (mut ws, fake) = workspace(dir.path());
        fake.push("--show-item revision", CommandOutput::ok("100\n"));
        fake.push("--show-item revision", CommandOutput::ok("105\n"));

        ws.update_to(Some("105")).unwrap();
        assert_eq!(ws.before_update_rev(), Some("100"));
        assert_eq!(ws.after_update_rev(), Some("105"));

        let lines = fake.call_lines();
        let update_pos = lines
            .iter()
            .position(|l| l == "svn update -r 105")
            .expect("update call missing");
        let revert_pos = lines
            .iter()
            .position(|l| l.contains("revert"))
            .expect("revert call missing");
        assert!(revert_pos < update_pos);
    }

    #[test]
    fn test_update_to_head_has_no_revision_flag() {
        let dir = tempfile::tempdir().unwrap();
        make_working_copy(dir.path());
        let (mut ws, fake) = workspace(dir.path());
        fake.on("--show-item revision", CommandOutput::ok("7\n"));

        ws.update_to(Some("HEAD")).unwrap();
        assert!(fake.call_lines().iter().any(|l| l == "svn update"));
    }

    #[test]
    fn test_update_to_outside_working_copy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ws, _fake) = workspace(dir.path());
        let result = ws.update_to(None);
        assert!(matches!(result, Err(SvnError::RepositoryState(_))));
    }

    #[test]
    fn test_collect_update_result_before_update_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, _fake) = workspace(dir.path());
        let result = ws.collect_update_result(&CollectOptions::default());
        assert!(matches!(result, Err(SvnError::RepositoryState(_))));
    }

    #[test]
    fn test_discover_externals_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let a = root.join("suba");
        let b = a.join("subb");
        fs::create_dir_all(&b).unwrap();

        let (ws, fake) = workspace(root);
        // root declares a, a declares b, b points back at a
        fake.push("propget", CommandOutput::ok("suba - https://svn.example.com/a suba\n"));
        fake.push("propget", CommandOutput::ok("subb - https://svn.example.com/b subb\n"));
        fake.push("propget", CommandOutput::ok("../../suba - https://svn.example.com/a x\n"));

        let discovered = ws.discover_externals().unwrap();
        assert_eq!(discovered, vec![a, b]);
        // one propget per physical path, despite the cycle
        assert_eq!(fake.count_matching("propget"), 3);
    }

    #[test]
    fn test_ensure_clean_cleans_each_external_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let ext = root.join("ext");
        fs::create_dir_all(&ext).unwrap();

        let (ws, fake) = workspace(root);
        fake.push("propget", CommandOutput::ok("ext - https://svn.example.com/e ext\n"));

        ws.ensure_clean().unwrap();
        assert_eq!(fake.count_matching("revert"), 2);
        let ext_reverts = fake
            .calls()
            .iter()
            .filter(|r| {
                r.args.first().map(String::as_str) == Some("revert")
                    && r.cwd.as_deref() == Some(ext.as_path())
            })
            .count();
        assert_eq!(ext_reverts, 1);
    }

    #[test]
    fn test_sparse_profile_fresh_checkout_no_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, fake) = workspace(dir.path());

        let profile = SparseProfile::from_json_str(
            r#"{
                "projects": {
                    "px": {
                        "repo_url": "https://svn.example.com/px/trunk",
                        "root_path": "px",
                        "root_depth": "immediates"
                    }
                }
            }"#,
        )
        .unwrap();

        ws.apply_sparse_profile(&profile).unwrap();
        assert_eq!(fake.count_matching("checkout"), 1);
        assert_eq!(fake.count_matching("svn update"), 0);
        assert!(fake
            .call_lines()
            .iter()
            .any(|l| l.contains("--depth immediates")));
    }

    #[test]
    fn test_sparse_profile_expands_parent_before_child() {
        let dir = tempfile::tempdir().unwrap();
        make_working_copy(&dir.path().join("px"));
        let (ws, fake) = workspace(dir.path());

        // rules declared child-first on purpose
        let profile = SparseProfile::from_json_str(
            r#"{
                "projects": {
                    "px": {
                        "repo_url": "https://svn.example.com/px/trunk",
                        "root_path": "px",
                        "root_depth": "empty",
                        "paths": [
                            { "path": "a/b", "depth": "infinity" },
                            { "path": "a", "depth": "empty" }
                        ]
                    }
                }
            }"#,
        )
        .unwrap();

        ws.apply_sparse_profile(&profile).unwrap();
        assert_eq!(fake.count_matching("checkout"), 0);

        let updates: Vec<String> = fake
            .call_lines()
            .into_iter()
            .filter(|l| l.contains("svn update"))
            .collect();
        assert_eq!(
            updates,
            vec!["svn update a --depth empty", "svn update a/b --depth infinity"]
        );
    }

    #[test]
    fn test_diff_is_line_capped() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, fake) = workspace(dir.path());
        let long_diff = (1..=10)
            .map(|i| format!("+line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        fake.push("diff -c 42", CommandOutput::ok(long_diff));

        let diff = ws.diff("42", Some("src/main.rs"), 4).unwrap();
        let lines: Vec<&str> = diff.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], "...(6 lines omitted)");
    }

    #[test]
    fn test_update_paths_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, fake) = workspace(dir.path());

        let rules: PathRevisionRules = serde_json::from_str(
            r#"{ "paths": [ { "path": "px-data-output", "revision": "1200" } ] }"#,
        )
        .unwrap();
        ws.update_paths_to_revision(&rules).unwrap();

        assert!(dir.path().join("px-data-output").is_dir());
        assert!(fake
            .call_lines()
            .iter()
            .any(|l| l == "svn update px-data-output -r 1200 --depth=infinity"));
    }

    #[test]
    fn test_switch_skips_when_url_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        make_working_copy(dir.path());
        let (ws, fake) = workspace(dir.path());
        fake.on(
            "--show-item url",
            CommandOutput::ok("https://svn.example.com/trunk\n"),
        );

        ws.switch_to("https://svn.example.com/trunk", None).unwrap();
        assert_eq!(fake.count_matching("switch"), 0);
    }

    #[test]
    fn test_revision_range_formatting() {
        assert_eq!(revision_range(None, "HEAD"), "1:HEAD");
        assert_eq!(revision_range(Some("100"), "105"), "101:105");
        assert_eq!(revision_range(Some("BASE"), "HEAD"), "BASE:HEAD");
    }

    #[test]
    fn test_changes_in_time_range_tolerates_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, fake) = workspace(dir.path());
        fake.push("log -v --xml", CommandOutput::ok(""));

        let changes = ws
            .changes_in_time_range(None, "2025-01-10T08:00:00Z")
            .unwrap();
        assert!(changes.is_empty());
        assert!(fake
            .call_lines()
            .iter()
            .any(|l| l.contains("-r {2025-01-10T08:00:00Z}")));
    }
}
