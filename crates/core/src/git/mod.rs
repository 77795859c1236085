//! Git synchronization.

pub mod sync;

pub use sync::{GitSync, GitUpdateOptions, SSH_KEY_ENV};
