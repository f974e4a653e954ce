use console::{Alignment, measure_text_width, pad_str};
use std::collections::{BTreeMap, BTreeSet};

use super::{OwnerRepo, ResolvedUpdate};

const HEADERS: [&str; 3] = ["Action", "Repos", "Steps"];

/// Per-coordinate aggregation of resolved updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsRow {
    pub owner_repo: OwnerRepo,
    /// Distinct old versions, sorted
    pub old_versions: BTreeSet<String>,
    /// New version of the first update seen for the coordinate
    pub new_version: String,
    pub repos: usize,
    pub steps: usize,
}

impl StatisticsRow {
    /// First column text, e.g. `actions/checkout (v2,v3 -> v4)`.
    #[must_use]
    pub fn label(&self) -> String {
        let old = self.old_versions.iter().cloned().collect::<Vec<_>>().join(",");
        format!("{} ({old} -> {})", self.owner_repo, self.new_version)
    }
}

/// Summary table over all resolved updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Ordered by repository count, step count, then coordinate
    pub rows: Vec<StatisticsRow>,
    pub total_repos: usize,
    pub total_steps: usize,
}

impl Statistics {
    #[must_use]
    pub fn collect(updates: &[ResolvedUpdate]) -> Self {
        let mut by_coordinate: BTreeMap<&OwnerRepo, (BTreeSet<&str>, BTreeSet<String>, &str, usize)> =
            BTreeMap::new();

        for update in updates {
            let entry = by_coordinate
                .entry(&update.reference.owner_repo)
                .or_insert_with(|| (BTreeSet::new(), BTreeSet::new(), update.new_version.as_str(), 0));
            entry.0.insert(update.reference.repo_name.as_str());
            entry.1.insert(update.old_version().to_owned());
            entry.3 = entry.3.saturating_add(1);
        }

        let mut rows: Vec<StatisticsRow> = by_coordinate
            .into_iter()
            .map(|(owner_repo, (repos, old_versions, new_version, steps))| StatisticsRow {
                owner_repo: owner_repo.clone(),
                old_versions,
                new_version: new_version.to_owned(),
                repos: repos.len(),
                steps,
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.repos, a.steps, &a.owner_repo).cmp(&(b.repos, b.steps, &b.owner_repo))
        });

        let total_repos = updates
            .iter()
            .map(|u| u.reference.repo_name.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        Self {
            rows,
            total_repos,
            total_steps: updates.len(),
        }
    }

    /// Render the table as lines, first column left aligned, counts right aligned.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let mut table: Vec<[String; 3]> = vec![HEADERS.map(str::to_owned)];
        table.extend(
            self.rows
                .iter()
                .map(|row| [row.label(), row.repos.to_string(), row.steps.to_string()]),
        );
        table.push([
            "Total".to_owned(),
            self.total_repos.to_string(),
            self.total_steps.to_string(),
        ]);

        let mut widths = [0_usize; 3];
        for row in &table {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(measure_text_width(cell));
            }
        }

        table
            .iter()
            .map(|row| {
                row.iter()
                    .zip(widths)
                    .enumerate()
                    .map(|(column, (cell, width))| {
                        let align = if column == 0 {
                            Alignment::Left
                        } else {
                            Alignment::Right
                        };
                        pad_str(cell, width.saturating_add(1), align, None).into_owned()
                    })
                    .collect::<String>()
                    .trim_end()
                    .to_owned()
            })
            .collect()
    }
}
