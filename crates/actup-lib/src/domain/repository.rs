use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

use super::DirectoryError;

/// Scheme every clone URL must use.
const HTTPS_SCHEME: &str = "https://";
/// Matches `https://host/owner/name`, capturing owner and name.
const CLONE_URL_PATTERN: &str = r"^https://[^/]+/([^/]+)/([^/]+)";
/// Permission of a team on a repository that cannot push branches.
const READ_ROLE: &str = "read";

/// Whether the configured owner is an organization or a user account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountKind {
    #[default]
    Organization,
    User,
}

/// The organization or user whose repositories are kept current
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub kind: AccountKind,
    pub login: String,
}

impl Account {
    #[must_use]
    pub fn new(kind: AccountKind, login: impl Into<String>) -> Self {
        Self {
            kind,
            login: login.into(),
        }
    }

    /// API path of the account, e.g. `orgs/acme` or `users/octocat`.
    #[must_use]
    pub fn entity_path(&self) -> String {
        let segment = match self.kind {
            AccountKind::Organization => "orgs",
            AccountKind::User => "users",
        };
        format!("{segment}/{}", self.login)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity_path())
    }
}

/// A repository as listed by the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub clone_url: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub fork: bool,
    /// Size in kilobytes as reported by the service
    #[serde(default)]
    pub size: u64,
    /// Team permission, only present in team repository listings
    #[serde(default)]
    pub role_name: Option<String>,
}

impl RepositoryRecord {
    /// Strip a trailing `.git` from the clone URL.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if let Some(stripped) = self.clone_url.strip_suffix(".git") {
            self.clone_url = stripped.to_owned();
        }
        self
    }
}

/// Trait for listing the repositories of an account
pub trait RepositoryDirectory {
    /// List every repository of the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be fetched at all.
    fn repositories(&self, account: &Account) -> Result<Vec<RepositoryRecord>, DirectoryError>;

    /// List the repositories a team of the account has access to.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be fetched at all.
    fn team_repositories(
        &self,
        account: &Account,
        team: &str,
    ) -> Result<Vec<RepositoryRecord>, DirectoryError>;

    /// Fetch a single repository by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be fetched.
    fn repository(&self, account: &Account, name: &str) -> Result<RepositoryRecord, DirectoryError>;
}

/// Merge team listings: drop read-only access and keep the first entry per clone URL.
#[must_use]
pub fn merge_team_repositories(listings: Vec<Vec<RepositoryRecord>>) -> Vec<RepositoryRecord> {
    let mut seen = HashSet::new();
    listings
        .into_iter()
        .flatten()
        .filter(|repo| repo.role_name.as_deref() != Some(READ_ROLE))
        .filter(|repo| seen.insert(repo.clone_url.clone()))
        .collect()
}

/// Decoder for `https://host/owner/name` clone URLs, compiled once per selection.
#[derive(Debug, Clone)]
pub struct CloneUrlDecoder {
    pattern: Regex,
}

impl CloneUrlDecoder {
    /// # Errors
    ///
    /// Returns an error if the clone URL pattern does not compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(CLONE_URL_PATTERN)?,
        })
    }

    /// Owner and name of `clone_url`, or `None` when it is not an HTTPS clone URL.
    #[must_use]
    pub fn decode(&self, clone_url: &str) -> Option<(String, String)> {
        let captures = self.pattern.captures(clone_url)?;
        let owner = captures.get(1)?.as_str();
        let name = captures.get(2)?.as_str();
        Some((owner.to_owned(), name.to_owned()))
    }
}

/// Clone URL with the access token embedded as credentials.
#[must_use]
pub fn authenticated_url(clone_url: &str, token: Option<&str>) -> String {
    match (token, clone_url.strip_prefix(HTTPS_SCHEME)) {
        (Some(token), Some(rest)) if !token.is_empty() => format!("{HTTPS_SCHEME}{token}@{rest}"),
        _ => clone_url.to_owned(),
    }
}

/// Filters applied to the listed repositories, in order.
#[derive(Debug, Clone, Default)]
pub struct RepositoryFilter {
    /// Skip repositories larger than this many kilobytes
    pub max_size_kb: Option<u64>,
    pub skip_forks: bool,
    /// Repository names to leave alone
    pub exclude: Vec<String>,
}

/// Why a repository was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Archived,
    TooBig,
    Fork,
    Excluded,
    InvalidUrl,
}

/// Number of repositories rejected per reason.
///
/// Each repository is counted under the first rule that rejects it, so the
/// counts never overlap and add up to the number of repositories left out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    pub archived: usize,
    pub too_big: usize,
    pub forks: usize,
    pub excluded: usize,
    pub invalid: usize,
}

impl RejectionCounts {
    fn record(&mut self, rejection: Rejection) {
        let counter = match rejection {
            Rejection::Archived => &mut self.archived,
            Rejection::TooBig => &mut self.too_big,
            Rejection::Fork => &mut self.forks,
            Rejection::Excluded => &mut self.excluded,
            Rejection::InvalidUrl => &mut self.invalid,
        };
        *counter = counter.saturating_add(1);
    }
}

/// A repository that survived filtering
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CloneTarget {
    pub clone_url: String,
    /// Folder name under the scratch root, decoded from the clone URL
    pub folder: String,
}

/// Result of filtering a repository listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Surviving repositories, sorted by clone URL
    pub targets: Vec<CloneTarget>,
    pub rejected: RejectionCounts,
    /// Number of repositories before filtering
    pub listed: usize,
}

impl RepositoryFilter {
    /// First attribute rule that rejects `repo`, checked in declaration order.
    ///
    /// The clone URL is only checked by [`RepositoryFilter::select`].
    #[must_use]
    pub fn rejection(&self, repo: &RepositoryRecord) -> Option<Rejection> {
        if repo.archived {
            return Some(Rejection::Archived);
        }
        if self.max_size_kb.is_some_and(|max| repo.size > max) {
            return Some(Rejection::TooBig);
        }
        if self.skip_forks && repo.fork {
            return Some(Rejection::Fork);
        }
        if self.exclude.iter().any(|name| *name == repo.name) {
            return Some(Rejection::Excluded);
        }
        None
    }

    /// Apply all filters and count rejections per reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the clone URL pattern does not compile.
    pub fn select(&self, repos: &[RepositoryRecord]) -> Result<Selection, regex::Error> {
        let decoder = CloneUrlDecoder::new()?;
        let mut selection = Selection {
            listed: repos.len(),
            ..Selection::default()
        };

        for repo in repos {
            let folder = match self.rejection(repo) {
                Some(rejection) => Err(rejection),
                None => decoder
                    .decode(&repo.clone_url)
                    .map(|(_, name)| name)
                    .ok_or(Rejection::InvalidUrl),
            };

            match folder {
                Ok(folder) => selection.targets.push(CloneTarget {
                    clone_url: repo.clone_url.clone(),
                    folder,
                }),
                Err(rejection) => {
                    if rejection == Rejection::InvalidUrl {
                        log::warn!("Ignoring invalid repository URL: '{}'", repo.clone_url);
                    }
                    selection.rejected.record(rejection);
                }
            }
        }

        selection.targets.sort();
        Ok(selection)
    }
}

/// Default number of concurrent clones for a machine with `cores` CPU threads.
///
/// Full core count below 8, a plateau of 8 up to 16, half the cores above.
#[must_use]
pub fn default_parallelism(cores: usize) -> usize {
    match cores {
        0 => 1,
        1..8 => cores,
        8..16 => 8,
        _ => cores / 2,
    }
}
