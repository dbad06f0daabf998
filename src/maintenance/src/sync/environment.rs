//! Copy documents of one entity type between environments.
//!
//! Two phases: [`EnvironmentSync::plan`] compares source and target summaries
//! without writing, [`EnvironmentSync::apply`] copies what the plan marked.
//! Updates are conditional on the target token seen while planning, so a
//! document changed in the target since then is reported as a conflict and
//! left alone.

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

use super::repository::{SyncEntitySummary, SyncRepository};
use crate::error::MaintenanceError;

const PLAN_LOOKUP_CONCURRENCY: usize = 8;

/// What applying a plan item will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAction {
    /// Missing in the target.
    Create,
    /// Target is older than the source.
    Update,
    /// Both sides carry the same modification time.
    Skip,
    /// Target was modified after the source; never overwritten.
    TargetNewer,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Skip => "skip",
            SyncAction::TargetNewer => "target-newer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlanItem {
    pub source: SyncEntitySummary,
    pub target: Option<SyncEntitySummary>,
    pub action: SyncAction,
}

impl SyncPlanItem {
    fn decide(source: SyncEntitySummary, target: Option<SyncEntitySummary>) -> Self {
        let action = match &target {
            None => SyncAction::Create,
            Some(target) if source.last_modified > target.last_modified => SyncAction::Update,
            Some(target) if source.last_modified < target.last_modified => {
                SyncAction::TargetNewer
            }
            Some(_) => SyncAction::Skip,
        };
        Self {
            source,
            target,
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub entity_type: String,
    pub items: Vec<SyncPlanItem>,
}

impl SyncPlan {
    pub fn count(&self, action: SyncAction) -> usize {
        self.items.iter().filter(|item| item.action == action).count()
    }
}

/// Outcome of applying a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub target_newer: usize,
    /// Ids whose target token changed after planning.
    pub conflicts: Vec<String>,
    /// Ids that vanished from the source after planning.
    pub missing: Vec<String>,
    pub dry_run: bool,
    pub cancelled: bool,
}

/// Source and target repositories of a sync.
#[derive(Debug, Clone)]
pub struct EnvironmentSync {
    source: SyncRepository,
    target: SyncRepository,
}

impl EnvironmentSync {
    pub fn new(source: SyncRepository, target: SyncRepository) -> Self {
        Self { source, target }
    }

    /// Compare up to `take` source documents of `entity_type` with the target.
    pub async fn plan(
        &self,
        entity_type: &str,
        take: Option<usize>,
    ) -> Result<SyncPlan, MaintenanceError> {
        let summaries = self.source.get_summaries(entity_type, None, take).await?;

        let items: Vec<SyncPlanItem> = stream::iter(summaries)
            .map(|source| async move {
                let target = self.target.get_summary(&source.id).await?;
                Ok::<_, MaintenanceError>(SyncPlanItem::decide(source, target))
            })
            .buffered(PLAN_LOOKUP_CONCURRENCY)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        let plan = SyncPlan {
            entity_type: entity_type.to_string(),
            items,
        };
        tracing::info!(
            entity_type,
            create = plan.count(SyncAction::Create),
            update = plan.count(SyncAction::Update),
            skip = plan.count(SyncAction::Skip),
            target_newer = plan.count(SyncAction::TargetNewer),
            "Sync plan ready"
        );
        Ok(plan)
    }

    /// Copy every `Create` and `Update` item of `plan` to the target.
    pub async fn apply(
        &self,
        plan: &SyncPlan,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, MaintenanceError> {
        let mut report = SyncReport {
            dry_run,
            ..SyncReport::default()
        };

        for item in &plan.items {
            if cancel.is_cancelled() {
                tracing::info!(entity_type = %plan.entity_type, "Sync apply cancelled");
                report.cancelled = true;
                break;
            }

            let id = &item.source.id;
            let expected_etag = match (item.action, &item.target) {
                (SyncAction::Skip, _) => {
                    report.skipped += 1;
                    continue;
                }
                (SyncAction::TargetNewer, _) => {
                    tracing::warn!(id = %id, "Target is newer than source, not copied");
                    report.target_newer += 1;
                    continue;
                }
                (SyncAction::Update, Some(target)) => Some(target.etag.as_str()),
                (SyncAction::Update, None) | (SyncAction::Create, _) => None,
            };

            if dry_run {
                tracing::info!(id = %id, action = %item.action, "[DRY-RUN] Would copy document");
                match item.action {
                    SyncAction::Create => report.created += 1,
                    _ => report.updated += 1,
                }
                continue;
            }

            let body = match self.source.get_json_by_id(id).await {
                Ok(body) => body,
                Err(MaintenanceError::Store(common::StoreError::NotFound(_))) => {
                    tracing::warn!(id = %id, "Source document disappeared after planning");
                    report.missing.push(id.clone());
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Creates must not clobber a document that appeared after planning.
            let result = match expected_etag {
                Some(etag) => self.target.upsert_json(&body, Some(etag)).await?,
                None => self.target.create_json(&body).await?,
            };
            if result.conflict {
                report.conflicts.push(id.clone());
                continue;
            }
            match item.action {
                SyncAction::Create => report.created += 1,
                _ => report.updated += 1,
            }
        }

        tracing::info!(
            entity_type = %plan.entity_type,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            target_newer = report.target_newer,
            conflicts = report.conflicts.len(),
            dry_run,
            cancelled = report.cancelled,
            "Sync apply finished"
        );
        Ok(report)
    }
}
