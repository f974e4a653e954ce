pub mod acquisition;
pub mod action;
pub mod reconcile;
pub mod repository;
pub mod resolution;
pub mod statistics;
pub mod version;
pub mod workflow;

pub use acquisition::{
    CloneProcess, CloneSpawner, ProcessStatus, TaskState, Watchdog, WatchdogAction,
};
pub use action::{ActionReference, OwnerRepo, ResolvedUpdate, Tag};
pub use reconcile::{
    BRANCH_PREFIX, BranchRef, ChangeSet, CommitIdentity, Decision, PendingPush, PublishSummary,
    PullRequestContent, PullRequestRecord, PullRequestRequest, PullRequestService, PushTarget,
    Reconciler, Reconciliation, RepositoryOutcome, VcsError, VersionControl, branch_name,
    change_sets,
};
pub use repository::{
    Account, AccountKind, CloneTarget, CloneUrlDecoder, Rejection, RejectionCounts,
    RepositoryDirectory, RepositoryFilter, RepositoryRecord, Selection, authenticated_url,
    default_parallelism, merge_team_repositories,
};
pub use resolution::{DirectoryError, TagDirectory, TagRegistry, find_updates, resolve_updates};
pub use statistics::{Statistics, StatisticsRow};
pub use workflow::{PatchedContent, WorkflowError, WorkflowPatcher, WorkflowScanner};
