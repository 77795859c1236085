//! Domain model types used throughout wcsync.
//!
//! These types bridge the SVN workspace engine, the Git sync engine, and the
//! CLI reporting layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// File-level change
// ---------------------------------------------------------------------------

/// What happened to one path in one revision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Added,
    Modified,
    Deleted,
    Replaced,
    Conflicted,
    Missing,
}

impl FileAction {
    /// Map an SVN per-path action code (`A`, `M`, `D`, `R`, `C`, `!`).
    ///
    /// Unknown codes are logged and treated as a modification rather than
    /// dropping the path from the report.
    pub fn from_code(code: &str) -> Self {
        match code {
            "A" => Self::Added,
            "M" => Self::Modified,
            "D" => Self::Deleted,
            "R" => Self::Replaced,
            "C" => Self::Conflicted,
            "!" => Self::Missing,
            other => {
                warn!(code = other, "unknown svn action code, treating as modified");
                Self::Modified
            }
        }
    }

    /// Short display code, matching what `svn log -v` prints.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Added => "A",
            Self::Modified => "M",
            Self::Deleted => "D",
            Self::Replaced => "R",
            Self::Conflicted => "C",
            Self::Missing => "!",
        }
    }
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A single file-level change within one revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub action: FileAction,
    /// Optional diff text, populated only when diff collection is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl FileChange {
    pub fn new(path: impl Into<String>, action: FileAction) -> Self {
        Self {
            path: path.into(),
            action,
            diff: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Revision-level change
// ---------------------------------------------------------------------------

/// One committed revision: author, time, message and file-level changes.
///
/// `revision` is a VCS-native identifier: numeric for the SVN backend, a
/// hash for the Git backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionChange {
    pub revision: String,
    pub author: String,
    pub date: String,
    pub message: String,
    pub files: Vec<FileChange>,
}

impl RevisionChange {
    /// Best-effort numeric sort key for merged change lists.
    ///
    /// Identifiers that do not parse as integers (Git hashes) sort as the
    /// lowest value. This misorders mixed SVN/Git histories; the behavior is
    /// kept as-is because the intended cross-backend semantics are unclear.
    pub fn sort_key(&self) -> i64 {
        self.revision.parse::<i64>().unwrap_or(0)
    }
}

/// The whole result of one synchronization session: before/after identifiers
/// plus the merged, ascending-ordered change list across the main repository
/// and all externals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub from_rev: String,
    pub to_rev: String,
    pub revision_changes: Vec<RevisionChange>,
}

/// Time-windowed changes, split by origin: the main repository and each
/// external keyed by its resolved remote URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub main: Vec<RevisionChange>,
    pub externals: BTreeMap<String, Vec<RevisionChange>>,
}

// ---------------------------------------------------------------------------
// Git sync results
// ---------------------------------------------------------------------------

/// One Git commit from a `from..to` range log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub commit: String,
    pub author: String,
    pub email: String,
    pub date: String,
    pub message: String,
}

/// Before/after state of one repository tree (main tree or one submodule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSync {
    pub path: String,
    /// `None` when the tree did not exist before this run (fresh clone).
    pub from: Option<String>,
    pub to: String,
    pub commits: Vec<CommitInfo>,
}

/// Full result of one Git sync run: the main tree plus every submodule whose
/// commit changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSyncResult {
    pub repo: RepoSync,
    pub submodules: Vec<RepoSync>,
}

// ---------------------------------------------------------------------------
// Diff truncation
// ---------------------------------------------------------------------------

/// Cap a diff at `max_lines` content lines.
///
/// When the diff is longer, exactly `max_lines` lines are kept and one
/// trailing marker line states how many lines were omitted. Shorter diffs
/// pass through unmodified.
pub fn truncate_diff(diff: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = diff.lines().collect();
    if lines.len() <= max_lines {
        return diff.to_string();
    }
    let omitted = lines.len() - max_lines;
    let mut kept: Vec<&str> = lines[..max_lines].to_vec();
    let marker = format!("...({} lines omitted)", omitted);
    kept.push(&marker);
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes_round_trip() {
        for (code, action) in [
            ("A", FileAction::Added),
            ("M", FileAction::Modified),
            ("D", FileAction::Deleted),
            ("R", FileAction::Replaced),
            ("C", FileAction::Conflicted),
            ("!", FileAction::Missing),
        ] {
            assert_eq!(FileAction::from_code(code), action);
            assert_eq!(action.code(), code);
        }
    }

    #[test]
    fn test_unknown_action_code_is_modified() {
        assert_eq!(FileAction::from_code("X"), FileAction::Modified);
    }

    #[test]
    fn test_sort_key_non_numeric_sorts_lowest() {
        let numeric = RevisionChange {
            revision: "42".into(),
            author: String::new(),
            date: String::new(),
            message: String::new(),
            files: Vec::new(),
        };
        let hash = RevisionChange {
            revision: "3f2a9c1".into(),
            ..numeric.clone()
        };
        assert_eq!(numeric.sort_key(), 42);
        assert_eq!(hash.sort_key(), 0);
    }

    #[test]
    fn test_truncate_diff_over_cap() {
        let diff = (1..=10)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let capped = truncate_diff(&diff, 4);
        let lines: Vec<&str> = capped.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[3], "line 4");
        assert_eq!(lines[4], "...(6 lines omitted)");
    }

    #[test]
    fn test_truncate_diff_under_cap_unmodified() {
        let diff = "a\nb\nc";
        assert_eq!(truncate_diff(diff, 3), diff);
        assert_eq!(truncate_diff(diff, 10), diff);
    }

    #[test]
    fn test_update_result_serializes() {
        let result = UpdateResult {
            from_rev: "100".into(),
            to_rev: "105".into(),
            revision_changes: vec![RevisionChange {
                revision: "105".into(),
                author: "alice".into(),
                date: "2025-01-10T08:00:00.000000Z".into(),
                message: "fix".into(),
                files: vec![FileChange::new("/trunk/main.rs", FileAction::Modified)],
            }],
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"from_rev\":\"100\""));
        assert!(json.contains("\"action\":\"modified\""));
        // absent diff is omitted entirely
        assert!(!json.contains("\"diff\""));
    }
}
