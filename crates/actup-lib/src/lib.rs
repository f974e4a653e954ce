//! Keep tag-pinned GitHub Actions references current across every repository
//! of an organization or user.
//!
//! The pipeline clones the repositories, scans their workflows for `uses:`
//! steps, resolves each step to the highest numeric tag of its action, patches
//! the workflow files in place and reconciles the result against the open
//! pull requests of each repository.

pub mod commands;
pub mod config;
pub mod domain;
pub mod infrastructure;
