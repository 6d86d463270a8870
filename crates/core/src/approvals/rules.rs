use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::employee::{Employee, EmployeeId, Role};
use crate::domain::rule::{ApprovalRule, ApprovalRuleId, ApprovalThreshold};

/// Rule payload as sent by an administrator, before any validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub employee_id: EmployeeId,
    pub description: String,
    #[serde(default)]
    pub manager_id: Option<EmployeeId>,
    #[serde(default)]
    pub manager_approval: bool,
    #[serde(default)]
    pub approver_ids: Vec<EmployeeId>,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub min_approval_percentage: Option<i64>,
}

impl RuleDraft {
    /// Every employee id the draft refers to, subject included.
    pub fn referenced_ids(&self) -> Vec<EmployeeId> {
        let mut ids = vec![self.employee_id.clone()];
        ids.extend(self.manager_id.iter().cloned());
        ids.extend(self.approver_ids.iter().cloned());
        ids
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RuleValidationError {
    #[error("min_approval_percentage {value} is outside the range 0..=100")]
    ThresholdOutOfRange { value: i64 },
    #[error("rule description is required")]
    MissingDescription,
    #[error("admin `{employee_id}` cannot be the subject of an approval rule")]
    AdminSubject { employee_id: EmployeeId },
    #[error("manager approval is enabled but no manager is set")]
    ManagerApprovalWithoutManager,
    #[error("employee `{employee_id}` was not found")]
    UnknownEmployee { employee_id: EmployeeId },
    #[error("employee `{employee_id}` belongs to a different organization than the rule subject")]
    CrossOrganization { employee_id: EmployeeId },
    #[error("employee `{employee_id}` cannot approve their own expenses")]
    SelfApproval { employee_id: EmployeeId },
    #[error("`{employee_id}` has role `{}` and cannot be a designated manager", .role.as_str())]
    ManagerRoleRequired { employee_id: EmployeeId, role: Role },
}

/// A draft that passed every check; approvers are deduplicated in first-seen order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRule {
    pub employee_id: EmployeeId,
    pub description: String,
    pub manager_id: Option<EmployeeId>,
    pub manager_approval: bool,
    pub approvers: Vec<EmployeeId>,
    pub sequential: bool,
    pub min_approval_percentage: ApprovalThreshold,
}

impl ValidatedRule {
    /// Builds the stored rule, keeping identity and creation time when replacing.
    pub fn into_rule(self, existing: Option<&ApprovalRule>, now: DateTime<Utc>) -> ApprovalRule {
        let (id, created_at) = existing
            .map(|rule| (rule.id.clone(), rule.created_at))
            .unwrap_or_else(|| (ApprovalRuleId::generate(), now));

        ApprovalRule {
            id,
            employee_id: self.employee_id,
            description: self.description,
            manager_id: self.manager_id,
            manager_approval: self.manager_approval,
            approvers: self.approvers,
            sequential: self.sequential,
            min_approval_percentage: self.min_approval_percentage,
            created_at,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuleValidator {
    default_threshold: ApprovalThreshold,
}

impl RuleValidator {
    pub fn new(default_threshold: ApprovalThreshold) -> Self {
        Self { default_threshold }
    }

    /// `directory` holds the employees the draft refers to; missing ids are reported as unknown.
    pub fn validate(
        &self,
        draft: RuleDraft,
        subject: &Employee,
        directory: &[Employee],
    ) -> Result<ValidatedRule, RuleValidationError> {
        let min_approval_percentage = match draft.min_approval_percentage {
            Some(value) => ApprovalThreshold::new(value)
                .ok_or(RuleValidationError::ThresholdOutOfRange { value })?,
            None => self.default_threshold,
        };

        let description = draft.description.trim().to_string();
        if description.is_empty() {
            return Err(RuleValidationError::MissingDescription);
        }

        if subject.role == Role::Admin {
            return Err(RuleValidationError::AdminSubject { employee_id: subject.id.clone() });
        }

        if draft.manager_approval && draft.manager_id.is_none() {
            return Err(RuleValidationError::ManagerApprovalWithoutManager);
        }

        if let Some(manager_id) = &draft.manager_id {
            let manager = resolve_member(subject, directory, manager_id)?;
            if !manager.role.can_manage() {
                return Err(RuleValidationError::ManagerRoleRequired {
                    employee_id: manager.id.clone(),
                    role: manager.role,
                });
            }
        }

        let mut seen = HashSet::new();
        let mut approvers = Vec::with_capacity(draft.approver_ids.len());
        for approver_id in draft.approver_ids {
            if !seen.insert(approver_id.clone()) {
                continue;
            }
            resolve_member(subject, directory, &approver_id)?;
            approvers.push(approver_id);
        }

        Ok(ValidatedRule {
            employee_id: subject.id.clone(),
            description,
            manager_id: draft.manager_id,
            manager_approval: draft.manager_approval,
            approvers,
            sequential: draft.sequential,
            min_approval_percentage,
        })
    }
}

fn resolve_member<'a>(
    subject: &Employee,
    directory: &'a [Employee],
    employee_id: &EmployeeId,
) -> Result<&'a Employee, RuleValidationError> {
    if employee_id == &subject.id {
        return Err(RuleValidationError::SelfApproval { employee_id: employee_id.clone() });
    }

    let employee = directory.iter().find(|employee| &employee.id == employee_id).ok_or_else(
        || RuleValidationError::UnknownEmployee { employee_id: employee_id.clone() },
    )?;

    if employee.organization_id != subject.organization_id {
        return Err(RuleValidationError::CrossOrganization { employee_id: employee_id.clone() });
    }

    Ok(employee)
}

/// Rule handed to a freshly provisioned account.
pub fn default_rule_for(
    employee: &Employee,
    threshold: ApprovalThreshold,
    now: DateTime<Utc>,
) -> Option<ApprovalRule> {
    let (manager_id, manager_approval) = match employee.role {
        Role::Admin => return None,
        Role::Employee => (employee.manager_id.clone(), employee.manager_id.is_some()),
        Role::Manager => (None, false),
    };

    Some(ApprovalRule {
        id: ApprovalRuleId::generate(),
        employee_id: employee.id.clone(),
        description: format!("Default approval rule for {}", employee.role.as_str()),
        manager_id,
        manager_approval,
        approvers: Vec::new(),
        sequential: false,
        min_approval_percentage: threshold,
        created_at: now,
        updated_at: now,
    })
}
