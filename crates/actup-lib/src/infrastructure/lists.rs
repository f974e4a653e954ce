use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::{DirectoryError, OwnerRepo, TagRegistry};

/// Repository names to process instead of listing the account
pub const REPOS_FILE: &str = "repos.txt";
/// Repository names to skip, replacing `--exclude`
pub const EXCLUDE_FILE: &str = "excluderepos.txt";
/// Offline tag source, one `owner/repo tag` pair per line
pub const TAGS_FILE: &str = "tags.txt";

#[derive(Debug, Error)]
#[error("failed to read {}", path.display())]
pub struct ListError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

fn read_optional(path: &Path) -> Result<Option<String>, ListError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ListError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Trimmed, non-empty lines of `path`, or `None` when the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_list(path: &Path) -> Result<Option<Vec<String>>, ListError> {
    Ok(read_optional(path)?.map(|content| {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }))
}

/// Tags read from a local file instead of the Github API.
#[derive(Debug, Default)]
pub struct FileTagRegistry {
    tags: HashMap<OwnerRepo, Vec<String>>,
}

impl FileTagRegistry {
    /// Parse `owner/repo tag` lines; malformed lines are skipped with a warning.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut tags: HashMap<OwnerRepo, Vec<String>> = HashMap::new();
        for (number, line) in content.lines().enumerate() {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (None, _, _) => {}
                (Some(owner_repo), Some(tag), None) => {
                    tags.entry(OwnerRepo::from(owner_repo))
                        .or_default()
                        .push(tag.to_owned());
                }
                _ => warn!(
                    "{TAGS_FILE}:{}: expected 'owner/repo tag', got '{line}'",
                    number.saturating_add(1)
                ),
            }
        }
        Self { tags }
    }

    /// Load the registry from `path` if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Option<Self>, ListError> {
        Ok(read_optional(path)?.map(|content| {
            let registry = Self::parse(&content);
            debug!(
                "Loaded tags for {} action(s) from {}",
                registry.tags.len(),
                path.display()
            );
            registry
        }))
    }
}

impl TagRegistry for FileTagRegistry {
    fn tags(&self, owner_repo: &OwnerRepo) -> Result<Vec<String>, DirectoryError> {
        Ok(self.tags.get(owner_repo).cloned().unwrap_or_default())
    }
}
