use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::employee::EmployeeId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRuleId(pub String);

impl ApprovalRuleId {
    pub fn generate() -> Self {
        Self(format!("RULE-{}", Uuid::new_v4().simple()))
    }
}

/// Share of required approvers (0..=100) that resolves an expense as approved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct ApprovalThreshold(u8);

impl ApprovalThreshold {
    pub const DEFAULT: Self = Self(51);
    pub const UNANIMOUS: Self = Self(100);

    pub fn new(percentage: i64) -> Option<Self> {
        u8::try_from(percentage).ok().filter(|value| *value <= 100).map(Self)
    }

    pub fn percentage(&self) -> u8 {
        self.0
    }

    /// `approved / total * 100`, rounded half-up to a whole percentage.
    /// Never reports 100 while an approver is still outstanding.
    pub fn approval_percentage(approved: usize, total: usize) -> usize {
        if total == 0 {
            return 100;
        }
        let rounded = (approved * 200 + total) / (total * 2);
        if approved < total {
            rounded.min(99)
        } else {
            rounded
        }
    }

    /// Met when `approved / total * 100` reaches the threshold within a third of a
    /// percentage point, so 2 of 3 meets 67. A 100% threshold needs every approver.
    pub fn is_met(&self, approved: usize, total: usize) -> bool {
        if self.0 == 0 || approved >= total {
            return true;
        }
        if self.0 == 100 {
            return false;
        }
        approved * 300 + total >= usize::from(self.0) * total * 3
    }
}

impl Default for ApprovalThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for ApprovalThreshold {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
            .ok_or_else(|| format!("approval percentage {value} is outside the range 0..=100"))
    }
}

impl From<ApprovalThreshold> for u8 {
    fn from(value: ApprovalThreshold) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: ApprovalRuleId,
    pub employee_id: EmployeeId,
    pub description: String,
    pub manager_id: Option<EmployeeId>,
    pub manager_approval: bool,
    /// Ordered, duplicate-free.
    pub approvers: Vec<EmployeeId>,
    pub sequential: bool,
    pub min_approval_percentage: ApprovalThreshold,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingSource {
    Rule { rule_id: ApprovalRuleId },
    DirectoryManager,
    NoApprovers,
}

impl RoutingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule { .. } => "rule",
            Self::DirectoryManager => "directory_manager",
            Self::NoApprovers => "no_approvers",
        }
    }
}

/// Rule parameters frozen onto an expense when it is submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub source: RoutingSource,
    pub min_approval_percentage: ApprovalThreshold,
    pub sequential: bool,
}
