//! Confirmation gate in front of whole-table deletion.

use super::DeleteReason;

/// Asked once per candidate table before it is deleted.
pub trait ConfirmationProvider: Send + Sync {
    fn confirm(&self, table_name: &str, reason: &DeleteReason) -> bool;
}

/// Approves every deletion.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ConfirmationProvider for AutoApprove {
    fn confirm(&self, table_name: &str, reason: &DeleteReason) -> bool {
        tracing::debug!(table = table_name, reason = %reason, "Deletion auto-approved");
        true
    }
}

/// Declines every deletion.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDeny;

impl ConfirmationProvider for AutoDeny {
    fn confirm(&self, table_name: &str, reason: &DeleteReason) -> bool {
        tracing::debug!(table = table_name, reason = %reason, "Deletion auto-denied");
        false
    }
}

impl<F> ConfirmationProvider for F
where
    F: Fn(&str, &DeleteReason) -> bool + Send + Sync,
{
    fn confirm(&self, table_name: &str, reason: &DeleteReason) -> bool {
        self(table_name, reason)
    }
}
