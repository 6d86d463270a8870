use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::employee::EmployeeId;
use crate::domain::expense::ExpenseId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Expense,
    Approval,
    Rule,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Approval => "approval",
            Self::Rule => "rule",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "expense" => Some(Self::Expense),
            "approval" => Some(Self::Approval),
            "rule" => Some(Self::Rule),
            _ => None,
        }
    }
}

/// Append-only record of a state change, written in the same transaction as the change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub expense_id: Option<ExpenseId>,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: EmployeeId,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        expense_id: Option<ExpenseId>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: EmployeeId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            expense_id,
            event_type: event_type.into(),
            category,
            actor,
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn expense(
        expense_id: &ExpenseId,
        event_type: impl Into<String>,
        actor: &EmployeeId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            Some(expense_id.clone()),
            event_type,
            AuditCategory::Expense,
            actor.clone(),
            occurred_at,
        )
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
