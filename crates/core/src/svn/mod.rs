//! Subversion workspace management.

pub mod parser;
pub mod profile;
pub mod workspace;

pub use profile::{PathRevisionRules, SparseProfile};
pub use workspace::{CollectOptions, SvnWorkspace, DEFAULT_MAX_DIFF_LINES};
