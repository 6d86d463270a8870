use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalRecord;
use crate::domain::employee::{Employee, EmployeeId};
use crate::domain::expense::ExpenseId;
use crate::domain::rule::{ApprovalRule, ApprovalThreshold, RoutingPolicy, RoutingSource};

/// What submission does for an employee with no approval rule on file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRulePolicy {
    /// The submitter's directory manager becomes the sole approver.
    #[default]
    DirectoryManager,
    /// The expense resolves as approved on submission.
    AutoApprove,
}

impl MissingRulePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectoryManager => "directory_manager",
            Self::AutoApprove => "auto_approve",
        }
    }
}

impl std::str::FromStr for MissingRulePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "directory_manager" | "manager" => Ok(Self::DirectoryManager),
            "auto_approve" => Ok(Self::AutoApprove),
            other => Err(format!(
                "unsupported missing rule policy `{other}` (expected directory_manager|auto_approve)"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedApprover {
    pub approver_id: EmployeeId,
    pub sequence: Option<u32>,
}

/// The approver set and policy an expense is frozen to at submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub policy: RoutingPolicy,
    pub approvers: Vec<PlannedApprover>,
}

impl RoutingPlan {
    pub fn is_empty(&self) -> bool {
        self.approvers.is_empty()
    }

    pub fn records(&self, expense_id: &ExpenseId, now: DateTime<Utc>) -> Vec<ApprovalRecord> {
        self.approvers
            .iter()
            .map(|planned| {
                ApprovalRecord::pending(
                    expense_id.clone(),
                    planned.approver_id.clone(),
                    planned.sequence,
                    now,
                )
            })
            .collect()
    }
}

pub fn plan_routing(
    submitter: &Employee,
    rule: Option<&ApprovalRule>,
    missing_rule_policy: MissingRulePolicy,
) -> RoutingPlan {
    let (source, threshold, sequential, candidates) = match rule {
        Some(rule) => {
            let manager = rule.manager_id.iter().filter(|_| rule.manager_approval);
            let candidates = manager.chain(rule.approvers.iter()).cloned().collect::<Vec<_>>();
            (
                RoutingSource::Rule { rule_id: rule.id.clone() },
                rule.min_approval_percentage,
                rule.sequential,
                candidates,
            )
        }
        None => match (missing_rule_policy, &submitter.manager_id) {
            (MissingRulePolicy::DirectoryManager, Some(manager_id)) => (
                RoutingSource::DirectoryManager,
                ApprovalThreshold::UNANIMOUS,
                false,
                vec![manager_id.clone()],
            ),
            _ => (RoutingSource::NoApprovers, ApprovalThreshold::UNANIMOUS, false, Vec::new()),
        },
    };

    // One record per approver, and never one for the submitter.
    let mut seen = HashSet::from([submitter.id.clone()]);
    let approvers = candidates
        .into_iter()
        .filter(|approver_id| seen.insert(approver_id.clone()))
        .enumerate()
        .map(|(position, approver_id)| PlannedApprover {
            approver_id,
            sequence: sequential.then_some(position as u32),
        })
        .collect::<Vec<_>>();

    let source = if approvers.is_empty() { RoutingSource::NoApprovers } else { source };

    RoutingPlan {
        policy: RoutingPolicy { source, min_approval_percentage: threshold, sequential },
        approvers,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{plan_routing, MissingRulePolicy};
    use crate::domain::employee::{Employee, EmployeeId, OrganizationId, Role};
    use crate::domain::expense::ExpenseId;
    use crate::domain::rule::{ApprovalRule, ApprovalRuleId, ApprovalThreshold, RoutingSource};

    fn id(raw: &str) -> EmployeeId {
        EmployeeId(raw.to_string())
    }

    fn submitter(manager: Option<&str>) -> Employee {
        let now = Utc::now();
        Employee {
            id: id("emp"),
            organization_id: OrganizationId("org".to_string()),
            name: "Employee".to_string(),
            email: "emp@example.com".to_string(),
            role: Role::Employee,
            manager_id: manager.map(id),
            created_at: now,
            updated_at: now,
        }
    }

    fn rule(manager_approval: bool, approvers: &[&str], sequential: bool, pct: i64) -> ApprovalRule {
        let now = Utc::now();
        ApprovalRule {
            id: ApprovalRuleId("RULE-1".to_string()),
            employee_id: id("emp"),
            description: "test".to_string(),
            manager_id: Some(id("mgr")),
            manager_approval,
            approvers: approvers.iter().map(|raw| id(raw)).collect(),
            sequential,
            min_approval_percentage: ApprovalThreshold::new(pct).expect("valid threshold"),
            created_at: now,
            updated_at: now,
        }
    }

    fn approver_ids(plan: &super::RoutingPlan) -> Vec<String> {
        plan.approvers.iter().map(|planned| planned.approver_id.0.clone()).collect()
    }

    #[test]
    fn manager_only_rule_routes_to_manager() {
        let plan = plan_routing(
            &submitter(None),
            Some(&rule(true, &[], false, 51)),
            MissingRulePolicy::default(),
        );

        assert_eq!(approver_ids(&plan), vec!["mgr"]);
        assert_eq!(plan.approvers[0].sequence, None);
        assert_eq!(
            plan.policy.source,
            RoutingSource::Rule { rule_id: ApprovalRuleId("RULE-1".to_string()) }
        );
    }

    #[test]
    fn manager_is_skipped_when_manager_approval_is_off() {
        let plan = plan_routing(
            &submitter(None),
            Some(&rule(false, &["a", "b"], false, 51)),
            MissingRulePolicy::default(),
        );

        assert_eq!(approver_ids(&plan), vec!["a", "b"]);
    }

    #[test]
    fn manager_listed_as_approver_gets_a_single_record() {
        let plan = plan_routing(
            &submitter(None),
            Some(&rule(true, &["a", "mgr", "b", "a"], true, 51)),
            MissingRulePolicy::default(),
        );

        assert_eq!(approver_ids(&plan), vec!["mgr", "a", "b"]);
        let sequences = plan.approvers.iter().map(|planned| planned.sequence).collect::<Vec<_>>();
        assert_eq!(sequences, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn submitter_never_approves_own_expense() {
        let plan = plan_routing(
            &submitter(None),
            Some(&rule(false, &["emp", "a"], false, 51)),
            MissingRulePolicy::default(),
        );

        assert_eq!(approver_ids(&plan), vec!["a"]);
    }

    #[test]
    fn missing_rule_falls_back_to_directory_manager() {
        let plan = plan_routing(&submitter(Some("boss")), None, MissingRulePolicy::DirectoryManager);

        assert_eq!(approver_ids(&plan), vec!["boss"]);
        assert_eq!(plan.policy.source, RoutingSource::DirectoryManager);
        assert_eq!(plan.policy.min_approval_percentage, ApprovalThreshold::UNANIMOUS);
    }

    #[test]
    fn missing_rule_without_manager_yields_empty_plan() {
        let plan = plan_routing(&submitter(None), None, MissingRulePolicy::DirectoryManager);

        assert!(plan.is_empty());
        assert_eq!(plan.policy.source, RoutingSource::NoApprovers);
    }

    #[test]
    fn auto_approve_policy_ignores_directory_manager() {
        let plan = plan_routing(&submitter(Some("boss")), None, MissingRulePolicy::AutoApprove);

        assert!(plan.is_empty());
    }

    #[test]
    fn rule_with_no_approvers_yields_empty_plan() {
        let plan = plan_routing(
            &submitter(None),
            Some(&rule(false, &[], false, 51)),
            MissingRulePolicy::default(),
        );

        assert!(plan.is_empty());
        assert_eq!(plan.policy.source, RoutingSource::NoApprovers);
    }

    #[test]
    fn records_are_pending_and_bound_to_the_expense() {
        let plan = plan_routing(
            &submitter(None),
            Some(&rule(true, &["a"], true, 100)),
            MissingRulePolicy::default(),
        );
        let expense_id = ExpenseId("EXP-1".to_string());

        let records = plan.records(&expense_id, Utc::now());
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.is_pending() && record.expense_id == expense_id));
        assert_eq!(records[1].sequence, Some(1));
    }

    #[test]
    fn missing_rule_policy_parses_aliases() {
        assert_eq!("manager".parse::<MissingRulePolicy>(), Ok(MissingRulePolicy::DirectoryManager));
        assert_eq!("AUTO_APPROVE".parse::<MissingRulePolicy>(), Ok(MissingRulePolicy::AutoApprove));
        assert!("escalate".parse::<MissingRulePolicy>().is_err());
    }
}
