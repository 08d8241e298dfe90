//! Typed wrappers over the system `git` binary.

pub mod ops;

pub use ops::{find_repo_root, GitError, GitOps, GitOutput};
