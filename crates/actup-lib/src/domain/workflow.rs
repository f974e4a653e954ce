use std::path::{Path, PathBuf};
use thiserror::Error;

use super::{ActionReference, ResolvedUpdate};

/// Errors that can occur when working with workflow files
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to read glob pattern")]
    Glob(#[from] glob::PatternError),

    #[error("failed to list repositories in {}", path.display())]
    ListRepositories {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read workflow: {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write workflow: {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Trait for finding action references in the workflows of cloned repositories
pub trait WorkflowScanner {
    /// Scan every repository and return one reference per tag-pinned `uses:` line.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository tree or a workflow file cannot be read.
    fn scan(&self) -> Result<Vec<ActionReference>, WorkflowError>;
}

/// Trait for rewriting action versions in a workflow file
pub trait WorkflowPatcher {
    /// Apply `updates` to `file` and write it back.
    ///
    /// Returns `Ok(false)` when at least one update could not be located; the
    /// file still receives the updates that were found.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    fn patch(&self, file: &Path, updates: &[&ResolvedUpdate]) -> Result<bool, WorkflowError>;
}

const USES_PREFIX: &str = "uses: ";
const LIST_USES_PREFIX: &str = "- uses: ";
const NAME_PREFIX: &str = "name: ";

/// Extract the action target from a `uses:` line.
///
/// The line is trimmed and must start with `uses: ` or `- uses: `. Anything
/// from `#` onward is a comment. Returns the trimmed remainder, which may be
/// empty.
#[must_use]
pub fn uses_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let payload = trimmed
        .strip_prefix(USES_PREFIX)
        .or_else(|| trimmed.strip_prefix(LIST_USES_PREFIX))?;

    let without_comment = payload.split_once('#').map_or(payload, |(code, _)| code);
    Some(without_comment.trim())
}

/// Remove one pair of matching single or double quotes around `value`.
fn strip_matching_quotes(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| {
            value
                .strip_prefix(quote)
                .and_then(|inner| inner.strip_suffix(quote))
        })
        .unwrap_or(value)
}

/// Display name of a workflow: the first line starting with `name: `, or the
/// file name without extension.
#[must_use]
pub fn workflow_name(content: &str, path: &Path) -> String {
    content
        .lines()
        .find_map(|line| line.strip_prefix(NAME_PREFIX))
        .map(|name| strip_matching_quotes(name).to_owned())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

/// Normalise a workflow name for pull request text: trimmed, outer quotes removed.
#[must_use]
pub fn clean_workflow_name(name: &str) -> &str {
    strip_matching_quotes(name.trim())
}

/// Extract all tag-pinned action references from one workflow file's content.
#[must_use]
pub fn extract_references(repo_name: &str, path: &Path, content: &str) -> Vec<ActionReference> {
    let name = workflow_name(content, path);

    content
        .lines()
        .filter_map(uses_payload)
        .filter(|step_name| !step_name.is_empty())
        .filter_map(|step_name| ActionReference::parse(repo_name, path, &name, step_name))
        .collect()
}

/// Outcome of patching one workflow file's content in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedContent {
    /// The rewritten content, byte-identical outside the replaced versions
    pub content: String,
    /// 0-based line index of each update that was applied, in update order
    pub applied: Vec<(usize, usize)>,
    /// Indices into the update slice of updates that matched no line
    pub missing: Vec<usize>,
}

impl PatchedContent {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Split off the line terminator so patches never touch it.
fn split_line_ending(line: &str) -> (&str, &str) {
    let body = line
        .strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line);
    let ending = line.get(body.len()..).unwrap_or_default();
    (body, ending)
}

/// Replace `old_version` with `new_version` right after the `@` following the
/// first occurrence of `step_name` in `line`.
fn splice_version(line: &str, step_name: &str, old_version: &str, new_version: &str) -> Option<String> {
    let step_start = line.find(step_name)?;
    let after_step = line.get(step_start..)?;
    let at_offset = after_step.find('@')?;
    let version_start = step_start.checked_add(at_offset)?.checked_add(1)?;
    let version_end = version_start.checked_add(old_version.len())?;

    let prefix = line.get(..version_start)?;
    let suffix = line.get(version_end..)?;
    Some(format!("{prefix}{new_version}{suffix}"))
}

/// Apply `updates` to workflow `content`.
///
/// Each update rewrites the first line whose `uses:` payload equals its
/// `step_name` exactly. Lines already rewritten by an earlier update no longer
/// match, so repeated identical steps are patched one after another.
#[must_use]
pub fn patch_content(content: &str, updates: &[&ResolvedUpdate]) -> PatchedContent {
    let mut lines: Vec<String> = content.split_inclusive('\n').map(str::to_owned).collect();
    let mut applied = Vec::new();
    let mut missing = Vec::new();

    for (update_index, update) in updates.iter().enumerate() {
        let step_name = update.reference.step_name.as_str();

        let patched = lines.iter_mut().enumerate().find_map(|(line_index, line)| {
            let (body, ending) = split_line_ending(line);
            if uses_payload(body) != Some(step_name) {
                return None;
            }
            let replaced =
                splice_version(body, step_name, update.old_version(), &update.new_version)?;
            let rewritten = format!("{replaced}{ending}");
            *line = rewritten;
            Some(line_index)
        });

        match patched {
            Some(line_index) => applied.push((update_index, line_index)),
            None => missing.push(update_index),
        }
    }

    PatchedContent {
        content: lines.concat(),
        applied,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(step_name: &str, new_version: &str) -> ResolvedUpdate {
        let reference = ActionReference::parse(
            "service",
            Path::new("/scratch/service/.github/workflows/ci.yml"),
            "CI",
            step_name,
        )
        .unwrap();
        ResolvedUpdate::new(reference, new_version)
    }

    #[test]
    fn uses_payload_accepts_both_forms() {
        assert_eq!(
            uses_payload("      - uses: actions/checkout@v4"),
            Some("actions/checkout@v4")
        );
        assert_eq!(
            uses_payload("        uses: actions/checkout@v4"),
            Some("actions/checkout@v4")
        );
    }

    #[test]
    fn uses_payload_strips_comment() {
        assert_eq!(
            uses_payload("  - uses: actions/setup-go@v3   # pinned   "),
            Some("actions/setup-go@v3")
        );
        assert_eq!(uses_payload("  - uses: # nothing"), Some(""));
    }

    #[test]
    fn uses_payload_ignores_other_lines() {
        assert_eq!(uses_payload("  - name: uses: nope"), None);
        assert_eq!(uses_payload("  uses:actions/checkout@v4"), None);
        assert_eq!(uses_payload("  # - uses: actions/checkout@v4"), None);
    }

    #[test]
    fn workflow_name_from_top_level_key() {
        let content = "on: push\nname: \"Build and test\"\njobs: {}\n";
        assert_eq!(
            workflow_name(content, Path::new("ci.yml")),
            "Build and test"
        );
    }

    #[test]
    fn workflow_name_ignores_indented_step_names() {
        let content = "jobs:\n  build:\n    steps:\n      - name: Checkout\n";
        assert_eq!(workflow_name(content, Path::new("/x/release.yaml")), "release");
    }

    #[test]
    fn clean_workflow_name_strips_quotes() {
        assert_eq!(clean_workflow_name(" 'Lint' "), "Lint");
        assert_eq!(clean_workflow_name("\"Lint\""), "Lint");
        assert_eq!(clean_workflow_name("'Lint\""), "'Lint\"");
    }

    #[test]
    fn extract_references_skips_local_and_empty() {
        let content = "name: CI
jobs:
  build:
    steps:
      - uses: actions/checkout@v4
      - uses: ./.github/actions/local
      - uses:   # empty
      - name: Go
        uses: actions/setup-go@v3 # comment
";
        let references = extract_references("service", Path::new("/s/service/.github/workflows/ci.yml"), content);
        let steps: Vec<_> = references.iter().map(|r| r.step_name.as_str()).collect();
        assert_eq!(steps, vec!["actions/checkout@v4", "actions/setup-go@v3"]);
        assert!(references.iter().all(|r| r.workflow_name == "CI"));
    }

    #[test]
    fn patch_preserves_comment_and_indentation() {
        let content = "steps:\n      - uses: actions/setup-go@v3 # comment\n";
        let go = update("actions/setup-go@v3", "v4");

        let patched = patch_content(content, &[&go]);

        assert_eq!(
            patched.content,
            "steps:\n      - uses: actions/setup-go@v4 # comment\n"
        );
        assert!(patched.is_complete());
        assert_eq!(patched.applied, vec![(0, 1)]);
    }

    #[test]
    fn patch_preserves_crlf_and_missing_final_newline() {
        let content = "a: 1\r\n  - uses: actions/checkout@v3\r\n  - uses: actions/cache@v2";
        let checkout = update("actions/checkout@v3", "v4");
        let cache = update("actions/cache@v2", "v4");

        let patched = patch_content(content, &[&checkout, &cache]);

        assert_eq!(
            patched.content,
            "a: 1\r\n  - uses: actions/checkout@v4\r\n  - uses: actions/cache@v4"
        );
    }

    #[test]
    fn patch_requires_exact_step_name() {
        let content = "  - uses: actions/checkout@v3.1\n";
        let checkout = update("actions/checkout@v3", "v4");

        let patched = patch_content(content, &[&checkout]);

        assert_eq!(patched.content, content);
        assert_eq!(patched.missing, vec![0]);
        assert!(!patched.is_complete());
    }

    #[test]
    fn patch_continues_after_missing_update() {
        let content = "  - uses: actions/cache@v2\n";
        let absent = update("actions/checkout@v3", "v4");
        let cache = update("actions/cache@v2", "v4");

        let patched = patch_content(content, &[&absent, &cache]);

        assert_eq!(patched.content, "  - uses: actions/cache@v4\n");
        assert_eq!(patched.missing, vec![0]);
        assert_eq!(patched.applied, vec![(1, 0)]);
    }

    #[test]
    fn patch_repeated_step_hits_successive_lines() {
        let content = "  - uses: actions/checkout@v3\n  - uses: actions/checkout@v3\n";
        let first = update("actions/checkout@v3", "v4");
        let second = update("actions/checkout@v3", "v4");

        let patched = patch_content(content, &[&first, &second]);

        assert_eq!(
            patched.content,
            "  - uses: actions/checkout@v4\n  - uses: actions/checkout@v4\n"
        );
        assert_eq!(patched.applied, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn patch_sub_path_action() {
        let content = "      - uses: github/codeql-action/init@v2 # codeql\n";
        let init = update("github/codeql-action/init@v2", "v3");

        let patched = patch_content(content, &[&init]);

        assert_eq!(
            patched.content,
            "      - uses: github/codeql-action/init@v3 # codeql\n"
        );
    }
}
