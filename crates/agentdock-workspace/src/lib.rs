//! Version-controlled workspace provisioning.
//!
//! Provides:
//! - `Provisioner` - clone, update and branch-switch git working trees
//! - `cleanup` - best-effort directory removal where the primary error wins

pub mod cleanup;
pub mod error;
pub mod provisioner;

pub use error::{GitError, ProvisionError};
pub use provisioner::{Provisioner, RepositoryInfo, UpdateReport};
