use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::employee::EmployeeId;
use crate::domain::expense::{ExpenseId, ExpenseStatus};
use crate::domain::rule::ApprovalRuleId;

/// Outbound message emitted after a workflow change has committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    RuleChanged {
        rule_id: ApprovalRuleId,
        employee_id: EmployeeId,
        changed_by: EmployeeId,
        deleted: bool,
    },
    ExpenseSubmitted {
        expense_id: ExpenseId,
        submitted_by: EmployeeId,
        approvers: Vec<EmployeeId>,
    },
    ExpenseResolved {
        expense_id: ExpenseId,
        owner: EmployeeId,
        status: ExpenseStatus,
    },
}

impl Notification {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RuleChanged { .. } => "rule.changed",
            Self::ExpenseSubmitted { .. } => "expense.submitted",
            Self::ExpenseResolved { .. } => "expense.resolved",
        }
    }

    /// Employees who should hear about this change.
    pub fn recipients(&self) -> Vec<EmployeeId> {
        match self {
            Self::RuleChanged { employee_id, .. } => vec![employee_id.clone()],
            Self::ExpenseSubmitted { approvers, .. } => approvers.clone(),
            Self::ExpenseResolved { owner, .. } => vec![owner.clone()],
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected by receiver with status {status}")]
    Rejected { status: u16 },
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Drops every notification. Used when delivery is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotificationSender;

#[async_trait]
impl NotificationSender for NoopNotificationSender {
    async fn send(&self, _notification: &Notification) -> Result<(), NotificationError> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryNotificationSender {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotificationSender {
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationSender for InMemoryNotificationSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryNotificationSender, Notification, NotificationSender};
    use crate::domain::employee::EmployeeId;
    use crate::domain::expense::{ExpenseId, ExpenseStatus};

    #[tokio::test]
    async fn in_memory_sender_records_notifications_in_order() {
        let sender = InMemoryNotificationSender::default();
        let submitted = Notification::ExpenseSubmitted {
            expense_id: ExpenseId("EXP-1".to_owned()),
            submitted_by: EmployeeId("emp".to_owned()),
            approvers: vec![EmployeeId("a".to_owned()), EmployeeId("b".to_owned())],
        };
        let resolved = Notification::ExpenseResolved {
            expense_id: ExpenseId("EXP-1".to_owned()),
            owner: EmployeeId("emp".to_owned()),
            status: ExpenseStatus::Approved,
        };

        sender.send(&submitted).await.expect("in-memory send");
        sender.send(&resolved).await.expect("in-memory send");

        let sent = sender.sent();
        assert_eq!(sent, vec![submitted.clone(), resolved]);
        assert_eq!(submitted.recipients().len(), 2);
    }

    #[test]
    fn notification_serializes_with_type_tag() {
        let notification = Notification::ExpenseResolved {
            expense_id: ExpenseId("EXP-7".to_owned()),
            owner: EmployeeId("emp".to_owned()),
            status: ExpenseStatus::Rejected,
        };

        let json = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(json["type"], "expense_resolved");
        assert_eq!(json["status"], "rejected");
        assert_eq!(notification.event_name(), "expense.resolved");
    }
}
