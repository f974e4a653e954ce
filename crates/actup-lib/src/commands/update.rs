use log::info;

use crate::domain::{
    Decision, PublishSummary, PullRequestService, Reconciler, Reconciliation, ResolvedUpdate,
    Statistics, TagRegistry, VersionControl, WorkflowError, WorkflowPatcher, WorkflowScanner,
    find_updates,
};

/// What one update pass found and did
#[derive(Debug, Clone)]
pub struct UpdateSummary {
    /// Number of tag-pinned references scanned
    pub references: usize,
    pub updates: Vec<ResolvedUpdate>,
    pub reconciliation: Reconciliation,
    pub published: PublishSummary,
}

/// Scan the checkouts, resolve new versions, reconcile pull requests and,
/// when `approve` is set, publish them.
///
/// # Errors
///
/// Returns an error if the scratch folder or a workflow file cannot be read.
pub fn run<S, R, P, V, W>(
    scanner: &S,
    registry: &R,
    reconciler: &Reconciler<'_, P, V, W>,
    approve: bool,
) -> Result<UpdateSummary, WorkflowError>
where
    S: WorkflowScanner,
    R: TagRegistry,
    P: PullRequestService,
    V: VersionControl,
    W: WorkflowPatcher,
{
    let references = scanner.scan()?;
    let updates = find_updates(registry, &references);

    let reconciliation = reconciler.reconcile(&updates);
    info!(
        "Pull requests: {} to create, {} to update, {} unchanged, {} failed",
        reconciliation.count(|d| *d == Decision::Created),
        reconciliation.count(|d| matches!(d, Decision::Updated { .. })),
        reconciliation.count(|d| matches!(d, Decision::Skipped { .. })),
        reconciliation.count(|d| matches!(d, Decision::Failed { .. })),
    );

    let published = reconciler.publish(&reconciliation.pending, approve);

    for line in Statistics::collect(&updates).render() {
        info!("{line}");
    }

    Ok(UpdateSummary {
        references: references.len(),
        updates,
        reconciliation,
        published,
    })
}
