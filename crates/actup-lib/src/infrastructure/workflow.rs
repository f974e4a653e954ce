use glob::glob;
use log::{debug, error, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::workflow::{extract_references, patch_content};
use crate::domain::{ActionReference, ResolvedUpdate, WorkflowError, WorkflowPatcher, WorkflowScanner};

/// Scans `<root>/<repo>/.github/workflows/*.{yml,yaml}` for every repository folder under `root`.
pub struct FileWorkflowScanner {
    root: PathBuf,
}

impl FileWorkflowScanner {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Immediate subdirectories of the scratch root, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be listed.
    pub fn repositories(&self) -> Result<Vec<PathBuf>, WorkflowError> {
        let list_error = |source| WorkflowError::ListRepositories {
            path: self.root.clone(),
            source,
        };

        let mut repos = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(list_error)? {
            let path = entry.map_err(list_error)?.path();
            if path.is_dir() {
                repos.push(path);
            }
        }
        repos.sort();
        Ok(repos)
    }

    /// Workflow files of one repository checkout, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the glob pattern is invalid.
    pub fn find_workflows(repo_dir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
        let workflows_dir = repo_dir.join(".github").join("workflows");
        if !workflows_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut workflows = Vec::new();
        for extension in ["yml", "yaml"] {
            let pattern = workflows_dir
                .join(format!("*.{extension}"))
                .to_string_lossy()
                .into_owned();

            for entry in glob(&pattern)? {
                match entry {
                    Ok(path) => workflows.push(path),
                    Err(e) => warn!("Error reading path: {e}"),
                }
            }
        }

        workflows.sort();
        Ok(workflows)
    }

    /// References of one checkout. Unreadable workflow files are logged and skipped.
    fn scan_repository(repo_dir: &Path) -> Result<Vec<ActionReference>, WorkflowError> {
        let repo_name = repo_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut references = Vec::new();
        for workflow in Self::find_workflows(repo_dir)? {
            let content = match fs::read_to_string(&workflow) {
                Ok(content) => content,
                Err(source) => {
                    let error = WorkflowError::Read {
                        path: workflow.clone(),
                        source,
                    };
                    warn!("Skipping workflow: {error}");
                    continue;
                }
            };
            let found = extract_references(&repo_name, &workflow, &content);
            debug!("{}: {} reference(s)", workflow.display(), found.len());
            references.extend(found);
        }
        Ok(references)
    }
}

impl WorkflowScanner for FileWorkflowScanner {
    /// Only an unreadable scratch root is fatal; a repository that cannot be
    /// scanned is logged and left out.
    fn scan(&self) -> Result<Vec<ActionReference>, WorkflowError> {
        let mut references = Vec::new();
        for repo_dir in self.repositories()? {
            match Self::scan_repository(&repo_dir) {
                Ok(found) => references.extend(found),
                Err(e) => warn!("Skipping repository '{}': {e}", repo_dir.display()),
            }
        }
        Ok(references)
    }
}

/// Rewrites versions in workflow files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileWorkflowPatcher;

impl WorkflowPatcher for FileWorkflowPatcher {
    fn patch(&self, file: &Path, updates: &[&ResolvedUpdate]) -> Result<bool, WorkflowError> {
        let content = fs::read_to_string(file).map_err(|source| WorkflowError::Read {
            path: file.to_path_buf(),
            source,
        })?;

        let patched = patch_content(&content, updates);
        for update in patched.missing.iter().filter_map(|&i| updates.get(i)) {
            error!(
                "Step not found in {}: '{}'",
                file.display(),
                update.reference.step_name
            );
        }
        for (update, line) in patched
            .applied
            .iter()
            .filter_map(|&(i, line)| updates.get(i).map(|u| (u, line)))
        {
            debug!(
                "{}:{}: {update}",
                file.display(),
                line.saturating_add(1)
            );
        }

        fs::write(file, &patched.content).map_err(|source| WorkflowError::Write {
            path: file.to_path_buf(),
            source,
        })?;

        Ok(patched.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_workflow(root: &Path, repo: &str, name: &str, content: &str) -> PathBuf {
        let dir = root.join(repo).join(".github").join("workflows");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn finds_yml_and_yaml() {
        let temp_dir = TempDir::new().unwrap();
        create_workflow(temp_dir.path(), "api", "ci.yml", "name: CI");
        create_workflow(temp_dir.path(), "api", "deploy.yaml", "name: Deploy");
        create_workflow(temp_dir.path(), "api", "notes.txt", "uses: a/b@v1");

        let workflows = FileWorkflowScanner::find_workflows(&temp_dir.path().join("api")).unwrap();

        assert_eq!(workflows.len(), 2);
    }

    #[test]
    fn repository_without_workflows_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("docs")).unwrap();

        let scanner = FileWorkflowScanner::new(temp_dir.path());

        assert!(scanner.scan().unwrap().is_empty());
    }

    #[test]
    fn scan_tags_references_with_repository_folder() {
        let temp_dir = TempDir::new().unwrap();
        create_workflow(
            temp_dir.path(),
            "web",
            "ci.yml",
            "name: CI\njobs:\n  b:\n    steps:\n      - uses: actions/checkout@v4\n",
        );
        create_workflow(
            temp_dir.path(),
            "api",
            "ci.yml",
            "jobs:\n  b:\n    steps:\n      - uses: actions/cache@v3\n",
        );
        fs::write(temp_dir.path().join("stray.yml"), "uses: a/b@v1").unwrap();

        let references = FileWorkflowScanner::new(temp_dir.path()).scan().unwrap();

        let found: Vec<_> = references
            .iter()
            .map(|r| (r.repo_name.as_str(), r.workflow_name.as_str(), r.step_name.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("api", "ci", "actions/cache@v3"),
                ("web", "CI", "actions/checkout@v4"),
            ]
        );
        assert_eq!(
            references[0].repo_dir(),
            Some(temp_dir.path().join("api").as_path())
        );
    }

    #[test]
    fn non_utf8_workflow_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        create_workflow(
            temp_dir.path(),
            "api",
            "ci.yml",
            "name: CI\njobs:\n  b:\n    steps:\n      - uses: actions/checkout@v3\n",
        );
        create_workflow(
            temp_dir.path(),
            "web",
            "deploy.yml",
            "jobs:\n  b:\n    steps:\n      - uses: actions/cache@v3\n",
        );
        let latin1 = temp_dir
            .path()
            .join("web")
            .join(".github")
            .join("workflows")
            .join("ci.yml");
        fs::write(
            &latin1,
            b"name: Caf\xe9\njobs:\n  b:\n    steps:\n      - uses: actions/setup-go@v4\n",
        )
        .unwrap();

        let references = FileWorkflowScanner::new(temp_dir.path()).scan().unwrap();

        let found: Vec<_> = references
            .iter()
            .map(|r| (r.repo_name.as_str(), r.step_name.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![("api", "actions/checkout@v3"), ("web", "actions/cache@v3")]
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = FileWorkflowScanner::new(&temp_dir.path().join("absent"));

        assert!(matches!(
            scanner.scan(),
            Err(WorkflowError::ListRepositories { .. })
        ));
    }

    #[test]
    fn patcher_writes_found_updates_and_reports_missing() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_workflow(
            temp_dir.path(),
            "api",
            "ci.yml",
            "steps:\n  - uses: actions/checkout@v3 # keep\n",
        );
        let found = ResolvedUpdate::new(
            ActionReference::parse("api", &path, "CI", "actions/checkout@v3").unwrap(),
            "v4",
        );
        let absent = ResolvedUpdate::new(
            ActionReference::parse("api", &path, "CI", "actions/cache@v2").unwrap(),
            "v4",
        );

        let complete = FileWorkflowPatcher.patch(&path, &[&absent, &found]).unwrap();

        assert!(!complete);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "steps:\n  - uses: actions/checkout@v4 # keep\n"
        );
    }
}
