use log::{debug, error, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{
    Account, CloneProcess, CloneSpawner, CloneTarget, ProcessStatus, RepositoryDirectory,
    RepositoryFilter, RepositoryRecord, Selection, TaskState, Watchdog, WatchdogAction,
    authenticated_url, merge_team_repositories,
};

/// Interval between two liveness checks of the clone processes
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that can occur while selecting and cloning repositories
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("failed to delete scratch folder: {}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create scratch folder: {}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no repositories left to process after filtering")]
    NoRepositories,

    #[error("invalid clone URL pattern")]
    Pattern(#[from] regex::Error),
}

/// Delete and recreate the scratch folder.
///
/// # Errors
///
/// Returns an error if the folder cannot be removed or created.
pub fn reset_scratch(folder: &Path) -> Result<(), AcquireError> {
    match fs::remove_dir_all(folder) {
        Ok(()) => info!("Deleted folder: '{}'", folder.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            return Err(AcquireError::Remove {
                path: folder.to_path_buf(),
                source,
            });
        }
    }

    fs::create_dir_all(folder).map_err(|source| AcquireError::Create {
        path: folder.to_path_buf(),
        source,
    })
}

/// Where the candidate repositories come from
#[derive(Debug, Clone, Copy)]
pub enum RepositorySource<'a> {
    /// Every repository of the account
    Account,
    /// Union of the repositories the teams can push to
    Teams(&'a [String]),
    /// Explicitly named repositories
    Names(&'a [String]),
}

/// List candidate repositories. Failed lookups are logged and skipped.
pub fn list_repositories<D: RepositoryDirectory>(
    directory: &D,
    account: &Account,
    source: RepositorySource<'_>,
) -> Vec<RepositoryRecord> {
    match source {
        RepositorySource::Account => directory.repositories(account).unwrap_or_else(|e| {
            error!("Could not list repositories of {account}: {e}");
            Vec::new()
        }),
        RepositorySource::Teams(teams) => {
            let listings = teams
                .iter()
                .filter_map(|team| match directory.team_repositories(account, team) {
                    Ok(repos) => Some(repos),
                    Err(e) => {
                        error!("Could not list repositories of team '{team}': {e}");
                        None
                    }
                })
                .collect();
            merge_team_repositories(listings)
        }
        RepositorySource::Names(names) => names
            .iter()
            .filter_map(|name| match directory.repository(account, name) {
                Ok(repo) => Some(repo),
                Err(e) => {
                    warn!("Skipping repository '{name}': {e}");
                    None
                }
            })
            .collect(),
    }
}

/// Apply `filter` to `repos` and log how many were dropped for each reason.
///
/// # Errors
///
/// Returns [`AcquireError::Pattern`] if the clone URL pattern does not compile.
pub fn select_repositories(
    repos: &[RepositoryRecord],
    filter: &RepositoryFilter,
) -> Result<Selection, AcquireError> {
    let selection = filter.select(repos)?;
    let rejected = &selection.rejected;

    info!("Repositories: {}", selection.listed);
    info!("Archived repositories: {}", rejected.archived);
    if let Some(max) = filter.max_size_kb {
        info!("Too big repositories (> {max} KB): {}", rejected.too_big);
    }
    if filter.skip_forks {
        info!("Forked repositories: {}", rejected.forks);
    }
    info!("Excluded repositories: {}", rejected.excluded);
    info!("Invalid repository URLs: {}", rejected.invalid);
    info!("Repositories to clone: {}", selection.targets.len());

    Ok(selection)
}

/// One clone in flight.
#[derive(Debug)]
pub struct CloneTask<P> {
    pub target: CloneTarget,
    pub state: TaskState,
    process: P,
}

impl<P: CloneProcess> CloneTask<P> {
    fn new(target: CloneTarget, process: P) -> Self {
        Self {
            target,
            state: TaskState::Running,
            process,
        }
    }

    /// Re-check a running task. Returns true while it keeps running.
    fn refresh(&mut self) -> bool {
        if !self.state.is_running() {
            return false;
        }

        match self.process.poll() {
            Ok(ProcessStatus::Running) => return true,
            Ok(ProcessStatus::Exited { success }) => {
                if !success {
                    warn!("Clone failed: '{}'", self.target.clone_url);
                }
                self.state = TaskState::Exited { success };
            }
            Err(e) => {
                warn!("Lost track of clone '{}': {e}", self.target.clone_url);
                self.state = TaskState::Exited { success: false };
            }
        }
        false
    }

    fn kill(&mut self) {
        info!("Killing: '{}'", self.target.clone_url);
        if let Err(e) = self.process.kill_tree() {
            warn!("Could not kill clone '{}': {e}", self.target.clone_url);
        }
        self.state = TaskState::Killed;
    }
}

/// Number of tasks still running after refreshing each of them.
fn refresh_all<P: CloneProcess>(tasks: &mut [CloneTask<P>]) -> usize {
    tasks.iter_mut().map(CloneTask::refresh).filter(|&running| running).count()
}

/// How clones are scheduled
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Maximum number of clones running at once
    pub parallelism: usize,
    pub poll_interval: Duration,
    pub watchdog: Watchdog,
}

impl CloneOptions {
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            poll_interval: POLL_INTERVAL,
            watchdog: Watchdog::default(),
        }
    }
}

/// Final state counts of a clone run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireReport {
    pub spawn_failures: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub killed: usize,
}

impl AcquireReport {
    fn from_tasks<P>(tasks: &[CloneTask<P>], spawn_failures: usize) -> Self {
        let count = |wanted: TaskState| tasks.iter().filter(|t| t.state == wanted).count();
        Self {
            spawn_failures,
            succeeded: count(TaskState::Exited { success: true }),
            failed: count(TaskState::Exited { success: false }),
            killed: count(TaskState::Killed),
        }
    }
}

/// Clone every target into `root/<folder>` with at most `parallelism` clones
/// running at once.
///
/// Liveness is polled every `poll_interval`. Once all clones are launched the
/// watchdog reports stragglers periodically and finally kills them.
pub fn clone_all<S: CloneSpawner>(
    spawner: &S,
    root: &Path,
    targets: &[CloneTarget],
    token: Option<&str>,
    options: &CloneOptions,
) -> AcquireReport {
    let mut tasks: Vec<CloneTask<S::Process>> = Vec::with_capacity(targets.len());
    let mut spawn_failures = 0_usize;

    for (number, target) in (1_usize..).zip(targets) {
        while refresh_all(&mut tasks) >= options.parallelism {
            thread::sleep(options.poll_interval);
        }

        info!(
            "Cloning ({number}/{}): '{}'",
            targets.len(),
            target.clone_url
        );
        let url = authenticated_url(&target.clone_url, token);
        match spawner.spawn(&url, &root.join(&target.folder)) {
            Ok(process) => tasks.push(CloneTask::new(target.clone(), process)),
            Err(e) => {
                warn!("Failed to clone '{}': {e}", target.clone_url);
                spawn_failures = spawn_failures.saturating_add(1);
            }
        }
    }

    let mut watchdog = options.watchdog.clone();
    while refresh_all(&mut tasks) > 0 {
        thread::sleep(options.poll_interval);

        match watchdog.tick() {
            WatchdogAction::Wait => {}
            WatchdogAction::Report => {
                let running: Vec<&str> = tasks
                    .iter()
                    .filter(|t| t.state.is_running())
                    .map(|t| t.target.clone_url.as_str())
                    .collect();
                info!("Still running: {}", running.join(", "));
            }
            WatchdogAction::Kill => {
                for task in tasks.iter_mut().filter(|t| t.state.is_running()) {
                    task.kill();
                }
            }
        }
    }

    let report = AcquireReport::from_tasks(&tasks, spawn_failures);
    debug!("Clone report: {report:?}");
    report
}

/// Everything needed to populate the scratch folder.
#[derive(Debug, Clone)]
pub struct AcquireRequest<'a> {
    pub account: &'a Account,
    pub source: RepositorySource<'a>,
    pub filter: &'a RepositoryFilter,
    pub folder: &'a Path,
    pub token: Option<&'a str>,
    pub options: CloneOptions,
}

/// Reset the scratch folder, pick the repositories and clone them.
///
/// # Errors
///
/// Returns [`AcquireError::NoRepositories`] if nothing is left after
/// filtering, or an error if the scratch folder cannot be reset.
pub fn run<D, S>(directory: &D, spawner: &S, request: &AcquireRequest<'_>) -> Result<AcquireReport, AcquireError>
where
    D: RepositoryDirectory,
    S: CloneSpawner,
{
    reset_scratch(request.folder)?;

    let repos = list_repositories(directory, request.account, request.source);
    let selection = select_repositories(&repos, request.filter)?;
    if selection.targets.is_empty() {
        return Err(AcquireError::NoRepositories);
    }

    let report = clone_all(
        spawner,
        request.folder,
        &selection.targets,
        request.token,
        &request.options,
    );
    info!(
        "Cloned: {}, failed: {}, killed: {}, not started: {}",
        report.succeeded, report.failed, report.killed, report.spawn_failures
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_scratch_recreates_empty_folder() {
        let temp_dir = tempfile::tempdir().unwrap();
        let folder = temp_dir.path().join("scratch");
        fs::create_dir_all(folder.join("old")).unwrap();
        fs::write(folder.join("old").join("file"), "x").unwrap();

        reset_scratch(&folder).unwrap();

        assert!(folder.is_dir());
        assert_eq!(fs::read_dir(&folder).unwrap().count(), 0);
    }

    #[test]
    fn reset_scratch_creates_missing_folder() {
        let temp_dir = tempfile::tempdir().unwrap();
        let folder = temp_dir.path().join("a").join("b");

        reset_scratch(&folder).unwrap();

        assert!(folder.is_dir());
    }

    #[test]
    fn clone_options_never_zero_slots() {
        assert_eq!(CloneOptions::new(0).parallelism, 1);
    }
}
