use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::version;
use super::{ActionReference, OwnerRepo, ResolvedUpdate, Tag};

/// Errors reported by the repository/tag/pull request directory service
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("{operation} failed: {reason}")]
    Failed {
        operation: &'static str,
        reason: String,
    },
}

impl DirectoryError {
    #[must_use]
    pub fn failed(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            operation,
            reason: reason.into(),
        }
    }
}

/// Trait for listing the tags of an action's source repository
pub trait TagRegistry {
    /// Get all tag names of `owner_repo`, in any order.
    ///
    /// # Errors
    ///
    /// Returns an error if the tags cannot be listed.
    fn tags(&self, owner_repo: &OwnerRepo) -> Result<Vec<String>, DirectoryError>;
}

/// Numeric tags per coordinate, sorted for reproducible tie breaking.
#[derive(Debug, Default)]
pub struct TagDirectory {
    tags: BTreeMap<OwnerRepo, Vec<String>>,
}

impl TagDirectory {
    /// Build a directory from raw tags, dropping every non-numeric tag.
    #[must_use]
    pub fn from_tags(tags: impl IntoIterator<Item = Tag>) -> Self {
        let mut directory = Self::default();
        for tag in tags {
            if version::is_numeric_tag(&tag.name) {
                directory.tags.entry(tag.owner_repo).or_default().push(tag.name);
            }
        }
        for names in directory.tags.values_mut() {
            names.sort();
            names.dedup();
        }
        directory
    }

    /// Fetch tags for every coordinate through `registry`.
    ///
    /// A coordinate whose lookup fails is logged and left without tags.
    pub fn fetch<R: TagRegistry>(registry: &R, coordinates: &BTreeSet<OwnerRepo>) -> Self {
        let mut tags = Vec::new();
        for owner_repo in coordinates {
            match registry.tags(owner_repo) {
                Ok(names) => {
                    debug!("{owner_repo}: {} tag(s)", names.len());
                    tags.extend(names.into_iter().map(|name| Tag::new(owner_repo.clone(), name)));
                }
                Err(e) => warn!("Could not list tags for {owner_repo}: {e}"),
            }
        }
        Self::from_tags(tags)
    }

    /// Numeric tags known for `owner_repo`.
    #[must_use]
    pub fn tags_for(&self, owner_repo: &OwnerRepo) -> &[String] {
        self.tags.get(owner_repo).map_or(&[], Vec::as_slice)
    }

    /// Total number of numeric tags across all coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Resolve each reference against the tags of its own coordinate.
///
/// References are visited ordered by workflow file, then step name. Digest
/// pins and non-numeric versions are skipped silently.
#[must_use]
pub fn resolve_updates(references: &[ActionReference], directory: &TagDirectory) -> Vec<ResolvedUpdate> {
    let mut ordered: Vec<&ActionReference> = references.iter().collect();
    ordered.sort_by(|a, b| {
        a.workflow_file
            .cmp(&b.workflow_file)
            .then_with(|| a.step_name.cmp(&b.step_name))
    });

    ordered
        .into_iter()
        .filter_map(|reference| {
            let tags = directory.tags_for(&reference.owner_repo);
            let new_version = version::resolve(
                &reference.old_version,
                tags.iter().map(String::as_str),
            )?;
            debug!(
                "{}: {} -> {new_version}",
                reference.repo_name, reference.step_name
            );
            Some(ResolvedUpdate::new(reference.clone(), new_version))
        })
        .collect()
}

/// Distinct coordinates referenced by `references`.
#[must_use]
pub fn coordinates(references: &[ActionReference]) -> BTreeSet<OwnerRepo> {
    references.iter().map(|r| r.owner_repo.clone()).collect()
}

/// Look up tags for all referenced coordinates and resolve the updates.
pub fn find_updates<R: TagRegistry>(registry: &R, references: &[ActionReference]) -> Vec<ResolvedUpdate> {
    info!("Steps: {}", references.len());

    let coordinates = coordinates(references);
    info!("Action repositories: {}", coordinates.len());

    let directory = TagDirectory::fetch(registry, &coordinates);
    info!("Numeric tags: {}", directory.len());

    let updates = resolve_updates(references, &directory);
    info!("Steps to update: {}", updates.len());
    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    struct MapRegistry(HashMap<&'static str, Vec<&'static str>>);

    impl TagRegistry for MapRegistry {
        fn tags(&self, owner_repo: &OwnerRepo) -> Result<Vec<String>, DirectoryError> {
            self.0
                .get(owner_repo.as_str())
                .map(|tags| tags.iter().map(|t| (*t).to_owned()).collect())
                .ok_or_else(|| DirectoryError::failed("tags", "unknown repository"))
        }
    }

    fn reference(workflow: &str, step_name: &str) -> ActionReference {
        let path = Path::new("/scratch/service/.github/workflows").join(workflow);
        ActionReference::parse("service", &path, "CI", step_name).unwrap()
    }

    #[test]
    fn tag_directory_drops_non_numeric() {
        let coordinate = OwnerRepo::from("actions/checkout");
        let directory = TagDirectory::from_tags(vec![
            Tag::new(coordinate.clone(), "v4"),
            Tag::new(coordinate.clone(), "latest"),
            Tag::new(coordinate.clone(), "v5.0.0-rc1"),
            Tag::new(coordinate.clone(), "v4"),
        ]);
        assert_eq!(directory.tags_for(&coordinate), ["v4"]);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn updates_use_tags_of_same_coordinate() {
        let directory = TagDirectory::from_tags(vec![
            Tag::new(OwnerRepo::from("actions/checkout"), "v4"),
            Tag::new(OwnerRepo::from("actions/cache"), "v9"),
        ]);
        let references = vec![
            reference("ci.yml", "actions/checkout@v3"),
            reference("ci.yml", "actions/cache@v4"),
        ];

        let updates = resolve_updates(&references, &directory);

        let summary: Vec<_> = updates
            .iter()
            .map(|u| (u.reference.step_name.as_str(), u.new_version.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![("actions/cache@v4", "v9"), ("actions/checkout@v3", "v4")]
        );
    }

    #[test]
    fn updates_are_ordered_by_file_then_step() {
        let directory = TagDirectory::from_tags(vec![
            Tag::new(OwnerRepo::from("a/x"), "2"),
            Tag::new(OwnerRepo::from("b/y"), "2"),
        ]);
        let references = vec![
            reference("release.yml", "a/x@1"),
            reference("ci.yml", "b/y@1"),
            reference("ci.yml", "a/x@1"),
        ];

        let updates = resolve_updates(&references, &directory);

        let order: Vec<_> = updates
            .iter()
            .map(|u| {
                (
                    u.reference.workflow_file.file_name().unwrap().to_str().unwrap(),
                    u.reference.step_name.as_str(),
                )
            })
            .collect();
        assert_eq!(
            order,
            vec![("ci.yml", "a/x@1"), ("ci.yml", "b/y@1"), ("release.yml", "a/x@1")]
        );
    }

    #[test]
    fn find_updates_survives_registry_failure() {
        let registry = MapRegistry(HashMap::from([("actions/checkout", vec!["v3", "v4"])]));
        let references = vec![
            reference("ci.yml", "actions/checkout@v3"),
            reference("ci.yml", "unknown/action@v1"),
        ];

        let updates = find_updates(&registry, &references);

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].new_version, "v4");
    }

    #[test]
    fn find_updates_skips_digest_pins() {
        let registry = MapRegistry(HashMap::from([("actions/checkout", vec!["v3", "v4"])]));
        let references = vec![reference(
            "ci.yml",
            "actions/checkout@a81bbbf8298c0fa03ea29cdc473d45769f953675",
        )];

        assert!(find_updates(&registry, &references).is_empty());
    }
}
