//! Workspace synchronization command-line tool.
//!
//! Provides subcommands for inspecting and updating Subversion working
//! copies (with external- and sparse-profile support), collecting change
//! summaries, and mirroring Git repositories with submodules and LFS.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wcsync_core::git::{GitSync, GitUpdateOptions};
use wcsync_core::models::{ChangeSummary, GitSyncResult, RepoSync, RevisionChange, UpdateResult};
use wcsync_core::svn::{CollectOptions, PathRevisionRules, SparseProfile, SvnWorkspace};
use wcsync_core::svn::DEFAULT_MAX_DIFF_LINES;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Workspace synchronization tool.
#[derive(Parser, Debug)]
#[command(
    name = "wcsync",
    version,
    about = "Synchronize SVN working copies and Git mirrors"
)]
struct Cli {
    /// Workspace root directory.
    #[arg(short, long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show working copy URL and revision state.
    Info,

    /// Check out a repository URL into the workspace root.
    Checkout {
        /// Repository URL.
        url: String,

        /// Revision to check out (defaults to HEAD).
        #[arg(short = 'R', long)]
        revision: Option<String>,
    },

    /// Build or refresh a sparse workspace from a profile file.
    EnsureWorkspace {
        /// JSON sparse profile describing projects and path depths.
        #[arg(short, long)]
        profile: PathBuf,
    },

    /// Clean the working copy and update it (and its externals' bookkeeping).
    Update {
        /// Target revision (defaults to HEAD).
        #[arg(short = 'R', long)]
        revision: Option<String>,

        /// Print the aggregated changes pulled in by the update.
        #[arg(long)]
        show_changes: bool,

        /// Attach per-file diffs to the printed changes.
        #[arg(long, requires = "show_changes")]
        diff: bool,

        /// Line cap for each attached diff.
        #[arg(long, default_value_t = DEFAULT_MAX_DIFF_LINES)]
        max_diff_lines: usize,

        /// Emit the result as JSON instead of text.
        #[arg(long, requires = "show_changes")]
        json: bool,
    },

    /// Switch the working copy to another URL (branch or tag).
    Switch {
        /// Target URL.
        url: String,

        /// Revision to switch to (defaults to HEAD).
        #[arg(short = 'R', long)]
        revision: Option<String>,
    },

    /// Revert local modifications and remove unversioned files, including
    /// in externals.
    Clean,

    /// Pin sub-paths to explicit revisions from a JSON rules file.
    UpdatePaths {
        /// JSON file listing path/revision pairs.
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// Collect changes over a time window for the main tree and externals.
    Summary {
        /// Window start (ISO 8601); defaults to the last recorded update.
        #[arg(long)]
        start_time: Option<String>,

        /// Window end (ISO 8601); defaults to now.
        #[arg(long)]
        end_time: Option<String>,

        /// Skip external working copies.
        #[arg(long)]
        no_externals: bool,

        /// Attach per-file diffs.
        #[arg(long)]
        diff: bool,

        /// Line cap for each attached diff.
        #[arg(long, default_value_t = DEFAULT_MAX_DIFF_LINES)]
        max_diff_lines: usize,

        /// Emit the summary as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Clone or update a Git repository, including submodules and LFS.
    GitUpdate {
        /// Repository URL.
        #[arg(long)]
        url: String,

        /// Destination directory.
        #[arg(long)]
        dest: PathBuf,

        /// Branch to check out.
        #[arg(short, long)]
        branch: Option<String>,

        /// Skip submodule handling.
        #[arg(long)]
        no_recursive: bool,

        /// Skip large-file (LFS) content.
        #[arg(long)]
        no_lfs: bool,

        /// Hard-reset local modifications before updating (destructive).
        #[arg(long)]
        reset: bool,

        /// Remove untracked files before updating (destructive).
        #[arg(long)]
        clean: bool,

        /// SSH private key to use (overrides WCSYNC_SSH_KEY and defaults).
        #[arg(long)]
        ssh_key: Option<PathBuf>,

        /// Emit the result as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::error!("{}", message);
            // terse single-line report; the full chain goes to the log
            eprintln!("Error: {}", message.lines().next().unwrap_or("unknown"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Info => cmd_info(&cli.repo),
        Commands::Checkout { url, revision } => cmd_checkout(&cli.repo, &url, revision.as_deref()),
        Commands::EnsureWorkspace { profile } => cmd_ensure_workspace(&cli.repo, &profile),
        Commands::Update {
            revision,
            show_changes,
            diff,
            max_diff_lines,
            json,
        } => cmd_update(
            &cli.repo,
            revision.as_deref(),
            show_changes,
            diff,
            max_diff_lines,
            json,
        ),
        Commands::Switch { url, revision } => cmd_switch(&cli.repo, &url, revision.as_deref()),
        Commands::Clean => cmd_clean(&cli.repo),
        Commands::UpdatePaths { rules } => cmd_update_paths(&cli.repo, &rules),
        Commands::Summary {
            start_time,
            end_time,
            no_externals,
            diff,
            max_diff_lines,
            json,
        } => cmd_summary(
            &cli.repo,
            start_time.as_deref(),
            end_time.as_deref(),
            no_externals,
            diff,
            max_diff_lines,
            json,
        ),
        Commands::GitUpdate {
            url,
            dest,
            branch,
            no_recursive,
            no_lfs,
            reset,
            clean,
            ssh_key,
            json,
        } => {
            let mut opts = GitUpdateOptions::new(url, dest);
            opts.branch = branch;
            opts.recursive = !no_recursive;
            opts.lfs = !no_lfs;
            opts.reset = reset;
            opts.clean = clean;
            cmd_git_update(&opts, ssh_key.as_deref(), json)
        }
    }
}

fn open_workspace(repo: &Path) -> Result<SvnWorkspace> {
    if !repo.is_dir() {
        anyhow::bail!("workspace directory does not exist: {}", repo.display());
    }
    Ok(SvnWorkspace::new(repo))
}

// ---------------------------------------------------------------------------
// SVN subcommands
// ---------------------------------------------------------------------------

fn cmd_info(repo: &Path) -> Result<()> {
    let ws = open_workspace(repo)?;
    let url = ws.current_url().context("failed to query working copy")?;
    let revision = ws.current_revision()?;
    let head = ws.remote_head_revision()?;

    println!("Path     : {}", ws.root().display());
    println!("URL      : {}", url);
    println!("Revision : {}", revision);
    println!("HEAD     : {}", head);
    if revision != head {
        println!();
        println!("Working copy is behind HEAD.");
    }
    Ok(())
}

fn cmd_checkout(repo: &Path, url: &str, revision: Option<&str>) -> Result<()> {
    std::fs::create_dir_all(repo)
        .with_context(|| format!("failed to create {}", repo.display()))?;
    let ws = SvnWorkspace::new(repo);
    ws.checkout(url, revision).context("checkout failed")?;
    println!("Checked out {} at {}", url, repo.display());
    Ok(())
}

fn cmd_ensure_workspace(repo: &Path, profile_path: &Path) -> Result<()> {
    let profile = SparseProfile::from_json_file(profile_path)
        .with_context(|| format!("failed to load profile {}", profile_path.display()))?;

    std::fs::create_dir_all(repo)
        .with_context(|| format!("failed to create {}", repo.display()))?;
    let ws = SvnWorkspace::new(repo);
    ws.apply_sparse_profile(&profile)
        .context("failed to apply sparse profile")?;

    println!(
        "Workspace at {} matches profile {} ({} projects)",
        repo.display(),
        profile_path.display(),
        profile.projects.len()
    );
    Ok(())
}

fn cmd_update(
    repo: &Path,
    revision: Option<&str>,
    show_changes: bool,
    diff: bool,
    max_diff_lines: usize,
    json: bool,
) -> Result<()> {
    let mut ws = open_workspace(repo)?;
    ws.update_to(revision).context("update failed")?;

    println!(
        "Updated {} from r{} to r{}",
        ws.root().display(),
        ws.before_update_rev().unwrap_or("?"),
        ws.after_update_rev().unwrap_or("?")
    );

    if show_changes {
        let opts = CollectOptions {
            include_diff: diff,
            max_diff_lines,
            include_externals: true,
        };
        let result = ws
            .collect_update_result(&opts)
            .context("failed to collect changes")?;
        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_update_result(&result);
        }
    }
    Ok(())
}

fn cmd_switch(repo: &Path, url: &str, revision: Option<&str>) -> Result<()> {
    let ws = open_workspace(repo)?;
    ws.switch_to(url, revision).context("switch failed")?;
    println!("Switched {} to {}", ws.root().display(), url);
    Ok(())
}

fn cmd_clean(repo: &Path) -> Result<()> {
    let ws = open_workspace(repo)?;
    ws.ensure_clean().context("clean failed")?;
    println!("Cleaned {} (including externals)", ws.root().display());
    Ok(())
}

fn cmd_update_paths(repo: &Path, rules_path: &Path) -> Result<()> {
    let rules = PathRevisionRules::from_json_file(rules_path)
        .with_context(|| format!("failed to load rules {}", rules_path.display()))?;

    let ws = open_workspace(repo)?;
    ws.update_paths_to_revision(&rules)
        .context("failed to pin paths")?;
    println!("Pinned {} path(s)", rules.paths.len());
    Ok(())
}

fn cmd_summary(
    repo: &Path,
    start_time: Option<&str>,
    end_time: Option<&str>,
    no_externals: bool,
    diff: bool,
    max_diff_lines: usize,
    json: bool,
) -> Result<()> {
    let ws = open_workspace(repo)?;
    let opts = CollectOptions {
        include_diff: diff,
        max_diff_lines,
        include_externals: !no_externals,
    };
    let summary = ws
        .collect_change_summary(start_time, end_time, &opts)
        .context("failed to collect change summary")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_change_summary(&summary);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Git subcommand
// ---------------------------------------------------------------------------

fn cmd_git_update(opts: &GitUpdateOptions, ssh_key: Option<&Path>, json: bool) -> Result<()> {
    let sync = GitSync::new(ssh_key).context("no usable ssh key")?;
    let result = sync.update_repo(opts).context("git update failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_git_result(&result);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Text rendering
// ---------------------------------------------------------------------------

fn print_revision_changes(changes: &[RevisionChange], indent: &str) {
    for change in changes {
        println!(
            "{}r{} | {} | {}",
            indent, change.revision, change.author, change.date
        );
        for line in change.message.lines() {
            println!("{}    {}", indent, line);
        }
        for file in &change.files {
            println!("{}    {} {}", indent, file.action.code(), file.path);
            if let Some(ref diff) = file.diff {
                for line in diff.lines() {
                    println!("{}        {}", indent, line);
                }
            }
        }
    }
}

fn print_update_result(result: &UpdateResult) {
    println!();
    println!(
        "Changes from r{} to r{} ({} revision(s)):",
        result.from_rev,
        result.to_rev,
        result.revision_changes.len()
    );
    print_revision_changes(&result.revision_changes, "  ");
}

fn print_change_summary(summary: &ChangeSummary) {
    println!("Main repository ({} revision(s)):", summary.main.len());
    print_revision_changes(&summary.main, "  ");
    for (url, changes) in &summary.externals {
        println!();
        println!("External {} ({} revision(s)):", url, changes.len());
        print_revision_changes(changes, "  ");
    }
}

fn print_repo_sync(sync: &RepoSync) {
    match sync.from {
        Some(ref from) if from != &sync.to => {
            println!("  {}: {} -> {}", sync.path, from, sync.to);
        }
        Some(_) => {
            println!("  {}: up to date at {}", sync.path, sync.to);
        }
        None => {
            println!("  {}: cloned at {}", sync.path, sync.to);
        }
    }
    for commit in &sync.commits {
        println!("    {} {} ({})", &commit.commit, commit.message, commit.author);
    }
}

fn print_git_result(result: &GitSyncResult) {
    println!("Repository:");
    print_repo_sync(&result.repo);
    if !result.submodules.is_empty() {
        println!("Changed submodules:");
        for sub in &result.submodules {
            print_repo_sync(sub);
        }
    }
}
