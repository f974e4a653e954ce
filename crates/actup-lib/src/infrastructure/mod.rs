pub mod git;
pub mod github;
pub mod lists;
pub mod workflow;

pub use git::{GitCli, GitCloneProcess, GitCloneSpawner};
pub use github::{GithubClient, GithubError};
pub use lists::{EXCLUDE_FILE, FileTagRegistry, ListError, REPOS_FILE, TAGS_FILE, read_list};
pub use workflow::{FileWorkflowPatcher, FileWorkflowScanner};
