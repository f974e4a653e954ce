use std::fmt;
use std::path::{Path, PathBuf};

/// Source repository of an action (e.g., "actions/checkout").
///
/// Built from the first two slash-delimited segments of a `uses:` target, so
/// sub-path actions like "github/codeql-action/init" map to
/// "github/codeql-action".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerRepo(String);

impl OwnerRepo {
    /// Extract the coordinate from the text before `@` of an action reference.
    ///
    /// The result is everything up to, not including, the second `/`. A leading
    /// `/` at position 0 is never counted as a separator. Targets with fewer
    /// than two separators are returned whole.
    #[must_use]
    pub fn from_target(target: &str) -> Self {
        let second_slash = target
            .char_indices()
            .skip(1)
            .filter(|&(_, c)| c == '/')
            .nth(1)
            .map(|(index, _)| index);

        let coordinate = second_slash
            .and_then(|index| target.get(..index))
            .unwrap_or(target);

        Self(coordinate.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerRepo {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A tag published by an action's source repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tag {
    pub owner_repo: OwnerRepo,
    pub name: String,
}

impl Tag {
    #[must_use]
    pub fn new(owner_repo: OwnerRepo, name: impl Into<String>) -> Self {
        Self {
            owner_repo,
            name: name.into(),
        }
    }
}

/// One `uses:` step found in a workflow file of a cloned repository.
///
/// Identity is the pair of `workflow_file` and `step_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReference {
    /// Name of the repository folder under the scratch root
    pub repo_name: String,
    /// Full path to the workflow file
    pub workflow_file: PathBuf,
    /// Display name of the workflow (top-level `name:` or file stem)
    pub workflow_name: String,
    /// Full "owner/repo[/path]@version" text, trimmed and comment-stripped
    pub step_name: String,
    pub owner_repo: OwnerRepo,
    pub old_version: String,
}

impl ActionReference {
    /// Build a reference from a `uses:` payload.
    ///
    /// Returns `None` when the payload has no `@` or nothing after it, which is
    /// the case for local actions like `./.github/actions/build`.
    #[must_use]
    pub fn parse(
        repo_name: &str,
        workflow_file: &Path,
        workflow_name: &str,
        step_name: &str,
    ) -> Option<Self> {
        let (target, version) = step_name.split_once('@')?;
        if version.is_empty() {
            return None;
        }

        Some(Self {
            repo_name: repo_name.to_owned(),
            workflow_file: workflow_file.to_path_buf(),
            workflow_name: workflow_name.to_owned(),
            step_name: step_name.to_owned(),
            owner_repo: OwnerRepo::from_target(target),
            old_version: version.to_owned(),
        })
    }

    /// The repository checkout that holds this reference's workflow file.
    ///
    /// Workflow files live at `<repo>/.github/workflows/<file>`.
    #[must_use]
    pub fn repo_dir(&self) -> Option<&Path> {
        self.workflow_file.parent()?.parent()?.parent()
    }
}

/// A reference together with the version it should move to.
///
/// `new_version` is always drawn from the tags of the reference's own
/// coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUpdate {
    pub reference: ActionReference,
    pub new_version: String,
}

impl ResolvedUpdate {
    #[must_use]
    pub fn new(reference: ActionReference, new_version: impl Into<String>) -> Self {
        Self {
            reference,
            new_version: new_version.into(),
        }
    }

    #[must_use]
    pub fn old_version(&self) -> &str {
        &self.reference.old_version
    }
}

impl fmt::Display for ResolvedUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.reference.owner_repo, self.reference.old_version, self.new_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(step_name: &str) -> Option<ActionReference> {
        ActionReference::parse(
            "service",
            Path::new("/scratch/service/.github/workflows/ci.yml"),
            "CI",
            step_name,
        )
    }

    #[test]
    fn owner_repo_keeps_first_two_segments() {
        assert_eq!(
            OwnerRepo::from_target("actions/checkout").as_str(),
            "actions/checkout"
        );
        assert_eq!(
            OwnerRepo::from_target("github/codeql-action/upload-sarif").as_str(),
            "github/codeql-action"
        );
        assert_eq!(
            OwnerRepo::from_target("owner/repo/deep/path").as_str(),
            "owner/repo"
        );
    }

    #[test]
    fn owner_repo_without_second_slash_is_whole_target() {
        assert_eq!(OwnerRepo::from_target("docker").as_str(), "docker");
        assert_eq!(OwnerRepo::from_target("/a/b").as_str(), "/a/b");
    }

    #[test]
    fn parse_splits_on_first_at() {
        let parsed = reference("actions/setup-go@v3").unwrap();
        assert_eq!(parsed.owner_repo.as_str(), "actions/setup-go");
        assert_eq!(parsed.old_version, "v3");
        assert_eq!(parsed.step_name, "actions/setup-go@v3");
    }

    #[test]
    fn parse_keeps_sub_path_coordinate() {
        let parsed = reference("github/codeql-action/init@v2.1.0").unwrap();
        assert_eq!(parsed.owner_repo.as_str(), "github/codeql-action");
        assert_eq!(parsed.old_version, "v2.1.0");
    }

    #[test]
    fn parse_rejects_missing_or_empty_version() {
        assert!(reference("./.github/actions/local").is_none());
        assert!(reference("actions/checkout@").is_none());
    }

    #[test]
    fn repo_dir_walks_up_from_workflow_file() {
        let parsed = reference("actions/checkout@v4").unwrap();
        assert_eq!(parsed.repo_dir(), Some(Path::new("/scratch/service")));
    }

    #[test]
    fn resolved_update_display() {
        let update = ResolvedUpdate::new(reference("actions/checkout@v3").unwrap(), "v4");
        assert_eq!(update.to_string(), "actions/checkout v3 -> v4");
    }
}
