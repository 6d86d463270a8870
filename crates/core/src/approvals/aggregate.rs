use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalRecord, ApprovalStatus};
use crate::domain::expense::ExpenseStatus;
use crate::domain::rule::{ApprovalThreshold, RoutingPolicy};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTally {
    pub approved: usize,
    pub rejected: usize,
    pub pending: usize,
}

impl ApprovalTally {
    pub fn of(records: &[ApprovalRecord]) -> Self {
        records.iter().fold(Self::default(), |mut tally, record| {
            match record.status {
                ApprovalStatus::Approved => tally.approved += 1,
                ApprovalStatus::Rejected => tally.rejected += 1,
                ApprovalStatus::Pending => tally.pending += 1,
            }
            tally
        })
    }

    pub fn total(&self) -> usize {
        self.approved + self.rejected + self.pending
    }

    pub fn approval_percentage(&self) -> usize {
        ApprovalThreshold::approval_percentage(self.approved, self.total())
    }
}

/// Derives the expense status from its approval records and routing snapshot.
///
/// Priority order: never routed is Draft, any rejection is Rejected, a met
/// threshold is Approved, anything else stays Pending. The percentage is taken
/// over every record in the snapshot, including ones still gated by sequence.
pub fn aggregate_status(
    records: &[ApprovalRecord],
    routing: Option<&RoutingPolicy>,
) -> ExpenseStatus {
    let Some(routing) = routing else {
        return ExpenseStatus::Draft;
    };

    let tally = ApprovalTally::of(records);
    if tally.total() == 0 {
        return ExpenseStatus::Approved;
    }
    if tally.rejected > 0 {
        return ExpenseStatus::Rejected;
    }
    if routing.min_approval_percentage.is_met(tally.approved, tally.total()) {
        return ExpenseStatus::Approved;
    }
    ExpenseStatus::Pending
}
