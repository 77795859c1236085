//! Parsers for SVN structured output.
//!
//! `svn` is driven with `--xml` wherever a machine-readable document exists
//! (log, status); the parsers here scan that XML with explicit tag/attribute
//! tokenization instead of positional column slicing of the human-readable
//! output.

use tracing::{debug, warn};

use crate::errors::SvnError;
use crate::models::{FileAction, FileChange, RevisionChange};

// ---------------------------------------------------------------------------
// svn log --xml -v
// ---------------------------------------------------------------------------

/// Parse an `svn log --xml -v` document into ordered [`RevisionChange`]s.
///
/// Entries without a parseable `revision` attribute are skipped with a
/// warning rather than failing the whole document.
pub fn parse_log(xml: &str) -> Result<Vec<RevisionChange>, SvnError> {
    debug!("parsing svn log XML ({} bytes)", xml.len());
    let mut changes = Vec::new();

    for entry_xml in fragments(xml, "<logentry", "</logentry>") {
        let revision = match attr_value(entry_xml, "revision") {
            Some(rev) if !rev.is_empty() => rev,
            _ => {
                warn!("skipping svn log entry with missing revision attribute");
                continue;
            }
        };
        changes.push(RevisionChange {
            revision,
            author: tag_content(entry_xml, "author").unwrap_or_default(),
            date: tag_content(entry_xml, "date").unwrap_or_default(),
            message: tag_content(entry_xml, "msg").unwrap_or_default(),
            files: parse_changed_paths(entry_xml),
        });
    }

    debug!(count = changes.len(), "parsed svn log entries");
    Ok(changes)
}

fn parse_changed_paths(entry_xml: &str) -> Vec<FileChange> {
    let paths_block = match block(entry_xml, "<paths>", "</paths>") {
        Some(b) => b,
        None => return Vec::new(),
    };

    let mut files = Vec::new();
    for fragment in fragments(paths_block, "<path", "</path>") {
        let action = attr_value(fragment, "action").unwrap_or_default();
        let path = element_text(fragment);
        if path.is_empty() {
            continue;
        }
        files.push(FileChange::new(path, FileAction::from_code(&action)));
    }
    files
}

// ---------------------------------------------------------------------------
// svn status --xml --no-ignore
// ---------------------------------------------------------------------------

/// Extract the paths of all unversioned entries from an
/// `svn status --xml --no-ignore` document.
pub fn parse_status_unversioned(xml: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for fragment in fragments(xml, "<entry", "</entry>") {
        let item = block(fragment, "<wc-status", "/>")
            .or_else(|| block(fragment, "<wc-status", ">"))
            .and_then(|status| attr_value(status, "item"))
            .unwrap_or_default();
        if item != "unversioned" {
            continue;
        }
        if let Some(path) = attr_value(fragment, "path") {
            if !path.is_empty() {
                paths.push(path);
            }
        }
    }
    debug!(count = paths.len(), "parsed unversioned status entries");
    paths
}

// ---------------------------------------------------------------------------
// svn propget svn:externals -R
// ---------------------------------------------------------------------------

/// Extract the declared local external targets from
/// `svn propget svn:externals -R` output.
///
/// The recursive propget prefixes each definition block with
/// `<target-dir> - <definition>`; the target directory is the local path the
/// external materializes under, relative to the queried root.
pub fn parse_externals_targets(output: &str) -> Vec<String> {
    let mut targets = Vec::new();
    for line in output.lines() {
        if let Some((local, _definition)) = line.split_once(" - ") {
            let local = local.trim();
            if !local.is_empty() {
                targets.push(local.to_string());
            }
        }
    }
    targets
}

// ---------------------------------------------------------------------------
// XML scanning helpers
// ---------------------------------------------------------------------------

/// Iterate over the inner fragments between repeated `open`/`close` markers.
fn fragments<'a>(xml: &'a str, open: &'a str, close: &'a str) -> impl Iterator<Item = &'a str> {
    xml.split(open)
        .skip(1)
        .map(move |part| match part.find(close) {
            Some(pos) => &part[..pos],
            None => part,
        })
}

/// The region from the first `open` marker up to the following `close`.
fn block<'a>(xml: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = xml.find(open)?;
    let rest = &xml[start + open.len()..];
    let end = rest.find(close)?;
    Some(&rest[..end])
}

/// Content of the first `<tag>...</tag>` occurrence, entity-unescaped.
///
/// A candidate match must be followed by `>` or whitespace so that searching
/// for `<url>` never matches `<urlencoded>`.
fn tag_content(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    while let Some(rel_pos) = xml[search_from..].find(&open) {
        let start_pos = search_from + rel_pos;
        let after_open = &xml[start_pos + open.len()..];
        if let Some(ch) = after_open.chars().next() {
            if ch != '>' && !ch.is_ascii_whitespace() {
                search_from = start_pos + open.len();
                continue;
            }
        }
        let content_start = after_open.find('>')? + 1;
        let content = &after_open[content_start..];
        let end_pos = content.find(&close)?;
        return Some(unescape(content[..end_pos].trim()));
    }
    None
}

/// Value of `attr="..."` (or single-quoted) within an element fragment.
fn attr_value(fragment: &str, attr: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!("{}={}", attr, quote);
        if let Some(pos) = fragment.find(&pattern) {
            let after = &fragment[pos + pattern.len()..];
            let end = after.find(quote)?;
            return Some(unescape(&after[..end]));
        }
    }
    None
}

/// Text content of an element fragment that starts mid-tag (after the
/// element name, attributes still pending), e.g. a `<path ...>text` piece.
fn element_text(fragment: &str) -> String {
    match fragment.find('>') {
        Some(pos) => unescape(fragment[pos + 1..].trim()),
        None => String::new(),
    }
}

/// Unescape standard XML entities.
fn unescape(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}
