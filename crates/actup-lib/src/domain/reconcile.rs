use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::workflow::clean_workflow_name;
use super::{DirectoryError, ResolvedUpdate, WorkflowPatcher};

/// Literal prefix of every branch this tool pushes.
pub const BRANCH_PREFIX: &str = "actup-";

/// Errors from running version control commands
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to run `git {command}` in {}", dir.display())]
    Spawn {
        command: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {command}` failed in {}: {stderr}", dir.display())]
    Failed {
        command: String,
        dir: PathBuf,
        stderr: String,
    },
}

/// Trait for the local version control operations on a cloned repository
pub trait VersionControl {
    /// Name of the checked out branch (the repository's default branch after a fresh clone).
    ///
    /// # Errors
    ///
    /// Returns an error if git cannot be run or fails.
    fn current_branch(&self, repo_dir: &Path) -> Result<String, VcsError>;

    /// # Errors
    ///
    /// Returns an error if git cannot be run or fails.
    fn set_config(&self, repo_dir: &Path, key: &str, value: &str) -> Result<(), VcsError>;

    /// Commit every working tree change with `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if git cannot be run or fails.
    fn commit_all(&self, repo_dir: &Path, message: &str) -> Result<(), VcsError>;

    /// Push `HEAD` to `remote_branch` on `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if git cannot be run or fails.
    fn push(&self, repo_dir: &Path, remote_branch: &str) -> Result<(), VcsError>;
}

/// A branch reference inside a pull request record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub name: String,
}

/// An open pull request as reported by the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequestRecord {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub head: BranchRef,
    pub base: BranchRef,
}

impl PullRequestRecord {
    /// Whether the head branch looks like one of ours: same length as `branch`
    /// and carrying the branch prefix.
    #[must_use]
    pub fn is_update_branch(&self, branch: &str) -> bool {
        self.head.name.len() == branch.len() && self.head.name.starts_with(BRANCH_PREFIX)
    }

    /// Whether title and body are byte-identical to `content`.
    #[must_use]
    pub fn has_content(&self, content: &PullRequestContent) -> bool {
        self.title == content.title && self.body.as_deref().unwrap_or_default() == content.body
    }
}

/// Payload for creating or updating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// Trait for the pull request endpoints of the directory service
pub trait PullRequestService {
    /// # Errors
    ///
    /// Returns an error if the open pull requests cannot be listed.
    fn open_pull_requests(&self, owner: &str, repo: &str) -> Result<Vec<PullRequestRecord>, DirectoryError>;

    /// # Errors
    ///
    /// Returns an error if the pull request cannot be created.
    fn create_pull_request(&self, owner: &str, repo: &str, request: &PullRequestRequest) -> Result<(), DirectoryError>;

    /// # Errors
    ///
    /// Returns an error if the pull request cannot be updated.
    fn update_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        request: &PullRequestRequest,
    ) -> Result<(), DirectoryError>;
}

/// Branch name for updates made on `date`, e.g. `actup-20240131`.
#[must_use]
pub fn branch_name(date: time::Date) -> String {
    format!(
        "{BRANCH_PREFIX}{:04}{:02}{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Commit title and pull request body for one repository's updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestContent {
    pub title: String,
    pub body: String,
}

impl PullRequestContent {
    /// Canonical text for `updates`: bullets sorted by workflow name, then step.
    #[must_use]
    pub fn compose(updates: &[&ResolvedUpdate]) -> Self {
        let mut bullets: Vec<(&str, &str, String)> = updates
            .iter()
            .map(|update| {
                let workflow = clean_workflow_name(&update.reference.workflow_name);
                let step = update.reference.step_name.as_str();
                let bullet = format!(
                    "* {workflow}: {step} ({} -> {})",
                    update.old_version(),
                    update.new_version
                );
                (workflow, step, bullet)
            })
            .collect();
        bullets.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let list = bullets
            .into_iter()
            .map(|(_, _, bullet)| bullet)
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            title: format!("Updated {} github actions.", updates.len()),
            body: format!(
                "Hi!\n\nThe following github actions have newer versions:\n\n{list}\n\nPlease review and merge.\n\nThanks!"
            ),
        }
    }
}

/// Author identity used for the update commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

/// All updates of one repository, partitioned by workflow file.
///
/// Holds indices into the update slice it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub repo_name: String,
    pub files: BTreeMap<PathBuf, Vec<usize>>,
}

impl ChangeSet {
    /// Every update index of the repository, file by file.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.files.values().flatten().copied()
    }
}

/// Group `updates` into change sets ordered by repository name.
#[must_use]
pub fn change_sets(updates: &[ResolvedUpdate]) -> Vec<ChangeSet> {
    let mut repos: BTreeMap<&str, BTreeMap<PathBuf, Vec<usize>>> = BTreeMap::new();
    for (index, update) in updates.iter().enumerate() {
        repos
            .entry(update.reference.repo_name.as_str())
            .or_default()
            .entry(update.reference.workflow_file.clone())
            .or_default()
            .push(index);
    }

    repos
        .into_iter()
        .map(|(repo_name, files)| ChangeSet {
            repo_name: repo_name.to_owned(),
            files,
        })
        .collect()
}

/// What reconciliation decided for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// An open pull request already carries exactly this content
    Skipped { number: u64 },
    /// A new pull request is to be opened
    Created,
    /// The existing update pull request is to be rewritten
    Updated { number: u64 },
    /// A collaborator failed before a decision could be made
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOutcome {
    pub repo_name: String,
    pub decision: Decision,
}

/// Where a pending push ends up on the directory service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTarget {
    Create,
    Update { number: u64 },
}

/// A committed change waiting for approval to be pushed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPush {
    pub repo_name: String,
    pub repo_dir: PathBuf,
    pub target: PushTarget,
    pub request: PullRequestRequest,
}

/// Result of reconciling all change sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// One outcome per repository, alphabetical
    pub outcomes: Vec<RepositoryOutcome>,
    /// Pushes and pull request mutations, deferred until approved
    pub pending: Vec<PendingPush>,
    /// Indices of updates committed for a created or updated pull request
    pub pushed: BTreeSet<usize>,
    /// False if any update could not be located in its workflow file
    pub patched_cleanly: bool,
}

impl Reconciliation {
    #[must_use]
    pub fn count(&self, matches: impl Fn(&Decision) -> bool) -> usize {
        self.outcomes.iter().filter(|o| matches(&o.decision)).count()
    }
}

/// Counts from executing the pending list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub failed: usize,
    /// Pending entries left alone because approval was not given
    pub withheld: usize,
}

/// Decides per repository whether to skip, create or update a pull request.
pub struct Reconciler<'a, P, V, W> {
    pub owner: &'a str,
    pub branch: String,
    pub identity: &'a CommitIdentity,
    pub pull_requests: &'a P,
    pub vcs: &'a V,
    pub patcher: &'a W,
}

impl<P, V, W> Reconciler<'_, P, V, W>
where
    P: PullRequestService,
    V: VersionControl,
    W: WorkflowPatcher,
{
    /// Patch, commit and decide for every repository touched by `updates`.
    ///
    /// Nothing is pushed and no pull request is mutated here; see [`Self::publish`].
    pub fn reconcile(&self, updates: &[ResolvedUpdate]) -> Reconciliation {
        let mut result = Reconciliation {
            patched_cleanly: true,
            ..Reconciliation::default()
        };

        for change_set in change_sets(updates) {
            if !self.patch(&change_set, updates) {
                result.patched_cleanly = false;
            }

            let decision = match self.decide(&change_set, updates) {
                Ok((decision, pending)) => {
                    if let Some(pending) = pending {
                        result.pushed.extend(change_set.indices());
                        result.pending.push(pending);
                    }
                    decision
                }
                Err(reason) => {
                    error!("{}: {reason}", change_set.repo_name);
                    Decision::Failed { reason }
                }
            };

            result.outcomes.push(RepositoryOutcome {
                repo_name: change_set.repo_name,
                decision,
            });
        }

        result
    }

    /// Patch every workflow file of the change set once.
    fn patch(&self, change_set: &ChangeSet, updates: &[ResolvedUpdate]) -> bool {
        let mut success = true;
        for (file, indices) in &change_set.files {
            let file_updates: Vec<&ResolvedUpdate> =
                indices.iter().filter_map(|&i| updates.get(i)).collect();
            match self.patcher.patch(file, &file_updates) {
                Ok(true) => {}
                Ok(false) => success = false,
                Err(e) => {
                    error!("{e}");
                    success = false;
                }
            }
        }
        success
    }

    fn decide(
        &self,
        change_set: &ChangeSet,
        updates: &[ResolvedUpdate],
    ) -> Result<(Decision, Option<PendingPush>), String> {
        let repo_updates: Vec<&ResolvedUpdate> =
            change_set.indices().filter_map(|i| updates.get(i)).collect();
        let content = PullRequestContent::compose(&repo_updates);
        let repo_name = change_set.repo_name.as_str();

        let repo_dir = repo_updates
            .first()
            .and_then(|update| update.reference.repo_dir())
            .ok_or_else(|| "cannot locate repository folder".to_owned())?
            .to_path_buf();
        info!("Repository: '{}'", repo_dir.display());

        let default_branch = self
            .vcs
            .current_branch(&repo_dir)
            .map_err(|e| e.to_string())?;
        debug!("Default branch: '{default_branch}'");

        let open = self
            .pull_requests
            .open_pull_requests(self.owner, repo_name)
            .map_err(|e| format!("could not list open pull requests: {e}"))?;
        for pr in &open {
            debug!(
                "Open pull request #{}: '{}' ({} -> {})",
                pr.number, pr.title, pr.head.name, pr.base.name
            );
        }

        let ours: Vec<&PullRequestRecord> = open
            .iter()
            .filter(|pr| pr.is_update_branch(&self.branch))
            .collect();
        if let Some(identical) = ours.iter().find(|pr| pr.has_content(&content)) {
            info!(
                "Not updating existing pull request #{}: '{}'",
                identical.number, identical.title
            );
            return Ok((
                Decision::Skipped {
                    number: identical.number,
                },
                None,
            ));
        }

        self.commit(&repo_dir, &content.title)
            .map_err(|e| e.to_string())?;

        let (decision, target) = match ours.first() {
            Some(existing) => (
                Decision::Updated {
                    number: existing.number,
                },
                PushTarget::Update {
                    number: existing.number,
                },
            ),
            None => (Decision::Created, PushTarget::Create),
        };

        let pending = PendingPush {
            repo_name: repo_name.to_owned(),
            repo_dir,
            target,
            request: PullRequestRequest {
                title: content.title,
                body: content.body,
                head: self.branch.clone(),
                base: default_branch,
            },
        };
        Ok((decision, Some(pending)))
    }

    fn commit(&self, repo_dir: &Path, title: &str) -> Result<(), VcsError> {
        debug!("Git user name: '{}'", self.identity.name);
        self.vcs.set_config(repo_dir, "user.name", &self.identity.name)?;
        debug!("Git user email: '{}'", self.identity.email);
        self.vcs.set_config(repo_dir, "user.email", &self.identity.email)?;
        self.vcs.commit_all(repo_dir, title)
    }

    /// Push and create/update pull requests, only when `approve` is set.
    pub fn publish(&self, pending: &[PendingPush], approve: bool) -> PublishSummary {
        let mut summary = PublishSummary::default();
        if !approve {
            info!("Not creating/updating pull requests: {}", pending.len());
            summary.withheld = pending.len();
            return summary;
        }

        info!("Creating/updating pull requests: {}", pending.len());
        for push in pending {
            match self.publish_one(push) {
                Ok(()) => summary.published = summary.published.saturating_add(1),
                Err(reason) => {
                    warn!("{}: {reason}", push.repo_name);
                    summary.failed = summary.failed.saturating_add(1);
                }
            }
        }
        summary
    }

    fn publish_one(&self, push: &PendingPush) -> Result<(), String> {
        self.vcs
            .push(&push.repo_dir, &push.request.head)
            .map_err(|e| e.to_string())?;

        let result = match push.target {
            PushTarget::Create => {
                info!("Creating pull request: '{}'", push.request.title);
                self.pull_requests
                    .create_pull_request(self.owner, &push.repo_name, &push.request)
            }
            PushTarget::Update { number } => {
                info!("Updating pull request #{number}: '{}'", push.request.title);
                self.pull_requests
                    .update_pull_request(self.owner, &push.repo_name, number, &push.request)
            }
        };
        result.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActionReference;

    fn update(workflow: &str, workflow_name: &str, step: &str, new_version: &str) -> ResolvedUpdate {
        let path = PathBuf::from("/scratch/api/.github/workflows").join(workflow);
        let reference = ActionReference::parse("api", &path, workflow_name, step).unwrap();
        ResolvedUpdate::new(reference, new_version)
    }

    fn pull_request(number: u64, head: &str, content: &PullRequestContent) -> PullRequestRecord {
        PullRequestRecord {
            number,
            title: content.title.clone(),
            body: Some(content.body.clone()),
            head: BranchRef { name: head.to_owned() },
            base: BranchRef { name: "main".to_owned() },
        }
    }

    #[test]
    fn branch_name_is_date_stamped() {
        let date = time::Date::from_calendar_date(2024, time::Month::January, 5).unwrap();
        assert_eq!(branch_name(date), "actup-20240105");
    }

    #[test]
    fn compose_sorts_by_workflow_then_step() {
        let release = update("release.yml", "'Release'", "actions/checkout@v3", "v4");
        let lint_go = update("ci.yml", "Lint", "actions/setup-go@v3", "v5");
        let lint_checkout = update("ci.yml", "Lint", "actions/checkout@v3", "v4");

        let content = PullRequestContent::compose(&[&release, &lint_go, &lint_checkout]);

        assert_eq!(content.title, "Updated 3 github actions.");
        let bullets: Vec<_> = content.body.lines().filter(|l| l.starts_with("* ")).collect();
        assert_eq!(
            bullets,
            vec![
                "* Lint: actions/checkout@v3 (v3 -> v4)",
                "* Lint: actions/setup-go@v3 (v3 -> v5)",
                "* Release: actions/checkout@v3 (v3 -> v4)",
            ]
        );
    }

    #[test]
    fn compose_is_independent_of_input_order() {
        let a = update("ci.yml", "CI", "actions/checkout@v3", "v4");
        let b = update("ci.yml", "CI", "actions/cache@v3", "v4");

        assert_eq!(
            PullRequestContent::compose(&[&a, &b]),
            PullRequestContent::compose(&[&b, &a])
        );
    }

    #[test]
    fn update_branch_requires_prefix_and_length() {
        let content = PullRequestContent {
            title: "t".to_owned(),
            body: "b".to_owned(),
        };
        let branch = "actup-20240105";
        assert!(pull_request(1, "actup-20231231", &content).is_update_branch(branch));
        assert!(!pull_request(2, "actup-2023123", &content).is_update_branch(branch));
        assert!(!pull_request(3, "other-20231231", &content).is_update_branch(branch));
    }

    #[test]
    fn missing_body_matches_empty_body() {
        let content = PullRequestContent {
            title: "t".to_owned(),
            body: String::new(),
        };
        let mut record = pull_request(1, "actup-20240105", &content);
        record.body = None;
        assert!(record.has_content(&content));
    }

    #[test]
    fn change_sets_group_by_repository_then_file() {
        let mut web = update("ci.yml", "CI", "actions/checkout@v3", "v4");
        web.reference.repo_name = "web".to_owned();
        web.reference.workflow_file = PathBuf::from("/scratch/web/.github/workflows/ci.yml");
        let updates = vec![
            web,
            update("release.yml", "Release", "actions/checkout@v3", "v4"),
            update("ci.yml", "CI", "actions/checkout@v3", "v4"),
            update("ci.yml", "CI", "actions/cache@v3", "v4"),
        ];

        let sets = change_sets(&updates);

        let names: Vec<_> = sets.iter().map(|s| s.repo_name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert_eq!(sets[0].files.len(), 2);
        assert_eq!(sets[0].indices().collect::<Vec<_>>(), vec![2, 3, 1]);
    }

    #[test]
    fn pull_request_record_deserializes_refs() {
        let json = r#"{"number": 7, "title": "t", "body": null,
            "head": {"ref": "actup-20240105"}, "base": {"ref": "main"}}"#;
        let record: PullRequestRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.number, 7);
        assert_eq!(record.body, None);
        assert_eq!(record.head.name, "actup-20240105");
        assert_eq!(record.base.name, "main");
    }
}
