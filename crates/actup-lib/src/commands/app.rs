use log::{info, warn};
use std::num::NonZeroUsize;
use std::thread;
use thiserror::Error;

use crate::config::Config;
use crate::domain::{
    Reconciler, RepositoryFilter, TagRegistry, WorkflowError, branch_name, default_parallelism,
};
use crate::infrastructure::{
    EXCLUDE_FILE, FileTagRegistry, FileWorkflowPatcher, FileWorkflowScanner, GitCli,
    GitCloneSpawner, GithubClient, GithubError, ListError, REPOS_FILE, TAGS_FILE, read_list,
};

use super::acquire::{self, AcquireError, AcquireRequest, CloneOptions, RepositorySource};
use super::update::{self, UpdateSummary};

/// Errors that can occur during command orchestration
#[derive(Debug, Error)]
pub enum AppError {
    /// One pull request per action was requested.
    #[error("split pull requests are not supported; all updates of a repository go into one pull request")]
    SplitPullRequestsUnsupported,

    /// Some updates could not be located in their workflow files.
    #[error("some updates could not be applied; see the log above")]
    PatchFailures,

    /// The Github client could not be initialized.
    #[error(transparent)]
    Github(#[from] GithubError),

    /// An override list could not be read.
    #[error(transparent)]
    List(#[from] ListError),

    /// The scratch folder could not be prepared or nothing was left to clone.
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    /// Workflow scanning failed.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Number of CPU threads, or 1 when it cannot be determined.
fn available_cores() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Clone the account's repositories into the scratch folder.
fn acquire(config: &Config, client: &GithubClient) -> Result<(), AppError> {
    let options = &config.options;
    let account = config.account();

    let names = read_list(&config.work_dir.join(REPOS_FILE))?;
    let exclude = match read_list(&config.work_dir.join(EXCLUDE_FILE))? {
        Some(exclude) => {
            info!("Using exclusions from {EXCLUDE_FILE}: {}", exclude.len());
            exclude
        }
        None => options.exclude.clone(),
    };

    let source = match (&names, options.teams.is_empty()) {
        (Some(names), _) => {
            info!("Using repositories from {REPOS_FILE}: {}", names.len());
            RepositorySource::Names(names)
        }
        (None, false) => RepositorySource::Teams(&options.teams),
        (None, true) => RepositorySource::Account,
    };

    let filter = RepositoryFilter {
        max_size_kb: options.max_size_kb,
        skip_forks: options.skip_forks,
        exclude,
    };

    let parallelism = options
        .parallelism
        .unwrap_or_else(|| default_parallelism(available_cores()));
    info!("Parallelism: {parallelism}");

    let request = AcquireRequest {
        account: &account,
        source,
        filter: &filter,
        folder: &options.folder,
        token: Some(config.settings.token.as_str()),
        options: CloneOptions::new(parallelism),
    };
    acquire::run(client, &GitCloneSpawner, &request)?;
    Ok(())
}

fn update_with<R: TagRegistry>(
    config: &Config,
    client: &GithubClient,
    registry: &R,
    today: time::Date,
) -> Result<UpdateSummary, AppError> {
    let options = &config.options;
    let scanner = FileWorkflowScanner::new(&options.folder);
    let git = GitCli::new(options.dry_run);
    let reconciler = Reconciler {
        owner: &config.settings.owner,
        branch: branch_name(today),
        identity: &config.settings.identity,
        pull_requests: client,
        vcs: &git,
        patcher: &FileWorkflowPatcher,
    };

    Ok(update::run(&scanner, registry, &reconciler, options.approve)?)
}

/// Run the whole pipeline: clone, scan, resolve, reconcile, publish.
///
/// `today` stamps the update branch name.
///
/// # Errors
///
/// Returns [`AppError::SplitPullRequestsUnsupported`] if split pull requests were requested.
/// Returns [`AppError::Acquire`] if no repository is left to clone.
/// Returns [`AppError::PatchFailures`] after the run if some updates could not be applied.
/// Propagates client, list and workflow errors.
pub fn run(config: &Config, today: time::Date) -> Result<(), AppError> {
    let options = &config.options;
    if options.split_prs {
        return Err(AppError::SplitPullRequestsUnsupported);
    }
    if options.dry_run {
        info!("Dry run: nothing will be pushed and no pull request will change");
    }

    let client = GithubClient::new(config.settings.token.clone(), options.dry_run)?;

    if options.skip_clone {
        info!("Using existing checkouts in '{}'", options.folder.display());
    } else {
        acquire(config, &client)?;
    }

    let summary = match FileTagRegistry::load(&config.work_dir.join(TAGS_FILE))? {
        Some(registry) => {
            info!("Using tags from {TAGS_FILE}");
            update_with(config, &client, &registry, today)?
        }
        None => update_with(config, &client, &client, today)?,
    };

    info!(
        "References: {}, updates: {}, pushed: {}",
        summary.references,
        summary.updates.len(),
        summary.reconciliation.pushed.len()
    );

    if !summary.reconciliation.patched_cleanly {
        warn!("Some steps could not be found in their workflow files");
        return Err(AppError::PatchFailures);
    }
    Ok(())
}
