use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{ApprovalRecord, ApprovalStatus};
use crate::domain::employee::EmployeeId;
use crate::domain::expense::{Expense, ExpenseStatus};

/// Why an approver cannot act on a record right now.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalActionError {
    #[error("`{approver_id}` is not an assigned approver for this expense")]
    NotAssigned { approver_id: EmployeeId },
    #[error("expense is {} and no longer accepts decisions", .status.as_str())]
    ExpenseNotPending { status: ExpenseStatus },
    #[error("approval record is already {}", .status.as_str())]
    RecordAlreadyResolved { status: ApprovalStatus },
    #[error("waiting on earlier approvers: {}", join_ids(.waiting_on))]
    AwaitingPredecessors { waiting_on: Vec<EmployeeId> },
}

fn join_ids(ids: &[EmployeeId]) -> String {
    ids.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(", ")
}

/// Returns the approver's record when they may decide it now.
///
/// Checks run in a fixed order so callers get a stable error: assignment,
/// expense state, record state, then sequential predecessors.
pub fn actionable_record<'a>(
    expense: &Expense,
    records: &'a [ApprovalRecord],
    approver_id: &EmployeeId,
) -> Result<&'a ApprovalRecord, ApprovalActionError> {
    let record = records
        .iter()
        .find(|record| &record.approver_id == approver_id)
        .ok_or_else(|| ApprovalActionError::NotAssigned { approver_id: approver_id.clone() })?;

    if expense.status != ExpenseStatus::Pending {
        return Err(ApprovalActionError::ExpenseNotPending { status: expense.status });
    }
    if !record.is_pending() {
        return Err(ApprovalActionError::RecordAlreadyResolved { status: record.status });
    }

    let sequential = expense.routing.as_ref().is_some_and(|routing| routing.sequential);
    if let (true, Some(position)) = (sequential, record.sequence) {
        let waiting_on = records
            .iter()
            .filter(|other| {
                other.sequence.is_some_and(|sequence| sequence < position)
                    && other.status != ApprovalStatus::Approved
            })
            .map(|other| other.approver_id.clone())
            .collect::<Vec<_>>();
        if !waiting_on.is_empty() {
            return Err(ApprovalActionError::AwaitingPredecessors { waiting_on });
        }
    }

    Ok(record)
}

pub fn is_actionable(expense: &Expense, records: &[ApprovalRecord], approver_id: &EmployeeId) -> bool {
    actionable_record(expense, records, approver_id).is_ok()
}
