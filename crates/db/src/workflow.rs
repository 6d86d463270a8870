//! Transactional expense and approval workflow.
//!
//! Every operation takes the acting [`Principal`] explicitly and performs its own role check.
//! Mutations run inside one SQLite transaction together with their audit events; notifications
//! go out only after commit and never fail the operation.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::{info, warn};

use expensa_core::approvals::{
    actionable_record, aggregate_status, default_rule_for, is_actionable, plan_routing,
    ApprovalActionError, RuleDraft, RuleValidator,
};
use expensa_core::audit::{AuditCategory, AuditEvent};
use expensa_core::config::ApprovalConfig;
use expensa_core::domain::approval::{ApprovalAction, ApprovalRecord, ApprovalStatus};
use expensa_core::domain::employee::{Employee, EmployeeId, OrganizationId, Principal, Role};
use expensa_core::domain::expense::{
    Expense, ExpenseDraft, ExpenseId, ExpenseStatus, ReceiptRef,
};
use expensa_core::domain::rule::{ApprovalRule, ApprovalRuleId};
use expensa_core::errors::{ApplicationError, DomainError};
use expensa_core::notify::{Notification, NotificationSender};

use crate::repositories::approval::{
    insert_records, list_decided_records_for_approver, list_open_records_for_approver,
    list_records_for_expense, record_decision, count_open_records_for_organization,
};
use crate::repositories::audit::append_event;
use crate::repositories::employee::{
    count_employees_by_role, find_employee, find_employees, find_organization,
};
use crate::repositories::expense::{
    count_expenses_for_organization, find_expense, list_expenses_for_employee, mark_submitted,
    save_expense, update_status,
};
use crate::repositories::rule::{
    count_rules_for_organization, delete_rule, find_rule, find_rule_for_employee,
    list_rules_for_organization, save_rule,
};
use crate::repositories::RepositoryError;
use crate::DbPool;

/// Reference to a receipt already placed in the file store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptUpload {
    pub file_name: String,
    pub storage_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: ApprovalAction,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpenseDetail {
    pub expense: Expense,
    pub approvals: Vec<ApprovalRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub draft: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl StatusCounts {
    pub fn of(expenses: &[Expense]) -> Self {
        let mut counts = Self::default();
        for expense in expenses {
            match expense.status {
                ExpenseStatus::Draft => counts.draft += 1,
                ExpenseStatus::Pending => counts.pending += 1,
                ExpenseStatus::Approved => counts.approved += 1,
                ExpenseStatus::Rejected => counts.rejected += 1,
            }
        }
        counts
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpenseDashboard {
    pub expenses: Vec<Expense>,
    pub counts: StatusCounts,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApprovalQueueItem {
    pub expense: Expense,
    pub record: ApprovalRecord,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrganizationSummary {
    pub organization_id: OrganizationId,
    pub employees: i64,
    pub managers: i64,
    pub expenses: i64,
    pub pending_approvals: i64,
    pub rules: i64,
}

pub struct ExpenseWorkflow {
    pool: DbPool,
    notifier: Arc<dyn NotificationSender>,
    approvals: ApprovalConfig,
}

impl ExpenseWorkflow {
    pub fn new(
        pool: DbPool,
        notifier: Arc<dyn NotificationSender>,
        approvals: ApprovalConfig,
    ) -> Self {
        Self { pool, notifier, approvals }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Resolves a trusted directory identity into the principal used by every other operation.
    pub async fn principal(&self, employee_id: &EmployeeId) -> Result<Principal, ApplicationError> {
        let mut conn = self.acquire().await?;
        find_employee(&mut conn, employee_id)
            .await?
            .map(|employee| employee.principal())
            .ok_or_else(|| ApplicationError::forbidden(format!("unknown employee `{employee_id}`")))
    }

    pub async fn create_expense(
        &self,
        principal: &Principal,
        draft: ExpenseDraft,
    ) -> Result<Expense, ApplicationError> {
        if principal.role != Role::Employee {
            return Err(ApplicationError::forbidden("only employees can create expenses"));
        }

        let now = Utc::now();
        let mut tx = self.begin().await?;
        let owner = load_employee(&mut tx, &principal.employee_id).await?;
        let organization = find_organization(&mut tx, &owner.organization_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("organization", &owner.organization_id.0))?;

        let fields = draft.validate(&organization.currency)?;
        ensure_payer(&mut tx, &owner, fields.paid_by.as_ref()).await?;
        let expense = Expense::draft(ExpenseId::generate(), owner.id.clone(), fields, now);
        save_expense(&mut tx, &expense).await?;
        append_event(
            &mut tx,
            &AuditEvent::expense(&expense.id, "expense.created", &owner.id, now)
                .with_metadata("amount", expense.amount.to_string())
                .with_metadata("currency", expense.currency.clone()),
        )
        .await?;
        commit(tx).await?;

        info!(
            event_name = "expense.created",
            expense_id = %expense.id,
            actor = %principal.employee_id,
            "expense created"
        );
        Ok(expense)
    }

    pub async fn update_draft(
        &self,
        principal: &Principal,
        expense_id: &ExpenseId,
        draft: ExpenseDraft,
    ) -> Result<Expense, ApplicationError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut expense = load_expense(&mut tx, expense_id).await?;
        ensure_owner(principal, &expense)?;
        ensure_editable(&expense)?;

        let owner = load_employee(&mut tx, &expense.employee_id).await?;
        let organization = find_organization(&mut tx, &owner.organization_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("organization", &owner.organization_id.0))?;
        let fields = draft.validate(&organization.currency)?;
        ensure_payer(&mut tx, &owner, fields.paid_by.as_ref()).await?;
        expense.apply_fields(fields, now);
        save_expense(&mut tx, &expense).await?;
        append_event(
            &mut tx,
            &AuditEvent::expense(&expense.id, "expense.updated", &principal.employee_id, now),
        )
        .await?;
        commit(tx).await?;

        info!(
            event_name = "expense.updated",
            expense_id = %expense.id,
            actor = %principal.employee_id,
            "draft expense updated"
        );
        Ok(expense)
    }

    pub async fn attach_receipt(
        &self,
        principal: &Principal,
        expense_id: &ExpenseId,
        upload: ReceiptUpload,
    ) -> Result<Expense, ApplicationError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut expense = load_expense(&mut tx, expense_id).await?;
        ensure_owner(principal, &expense)?;
        ensure_editable(&expense)?;

        let receipt = ReceiptRef::new(upload.file_name, upload.storage_key)?;
        let file_name = receipt.file_name.clone();
        expense.receipt = Some(receipt);
        expense.updated_at = now;
        save_expense(&mut tx, &expense).await?;
        append_event(
            &mut tx,
            &AuditEvent::expense(&expense.id, "expense.receipt_attached", &principal.employee_id, now)
                .with_metadata("file_name", file_name),
        )
        .await?;
        commit(tx).await?;

        Ok(expense)
    }

    /// Routes a draft expense to its approvers. Submitting an expense that already left Draft
    /// returns its current state without touching it.
    pub async fn submit(
        &self,
        principal: &Principal,
        expense_id: &ExpenseId,
    ) -> Result<ExpenseDetail, ApplicationError> {
        if principal.role != Role::Employee {
            return Err(ApplicationError::forbidden("only employees can submit expenses"));
        }

        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut expense = load_expense(&mut tx, expense_id).await?;
        ensure_owner(principal, &expense)?;

        let existing = list_records_for_expense(&mut tx, expense_id).await?;
        if expense.status != ExpenseStatus::Draft || !existing.is_empty() {
            return Ok(ExpenseDetail { expense, approvals: existing });
        }

        let submitter = load_employee(&mut tx, &expense.employee_id).await?;
        let rule = find_rule_for_employee(&mut tx, &submitter.id).await?;
        let plan = plan_routing(&submitter, rule.as_ref(), self.approvals.missing_rule_policy);
        let records = plan.records(&expense.id, now);
        let status = aggregate_status(&records, Some(&plan.policy));

        expense.transition_to(status)?;
        expense.routing = Some(plan.policy.clone());
        expense.updated_at = now;

        if !mark_submitted(&mut tx, &expense, now).await? {
            drop(tx);
            return self.current_detail(expense_id).await;
        }
        insert_records(&mut tx, &records).await?;
        append_event(
            &mut tx,
            &AuditEvent::expense(&expense.id, "expense.submitted", &principal.employee_id, now)
                .with_metadata("routing_source", plan.policy.source.as_str())
                .with_metadata("approvers", records.len().to_string())
                .with_metadata("status", status.as_str()),
        )
        .await?;
        commit(tx).await?;

        info!(
            event_name = "expense.submitted",
            expense_id = %expense.id,
            actor = %principal.employee_id,
            approvers = records.len(),
            status = status.as_str(),
            "expense submitted for approval"
        );

        if !records.is_empty() {
            self.notify(Notification::ExpenseSubmitted {
                expense_id: expense.id.clone(),
                submitted_by: principal.employee_id.clone(),
                approvers: records.iter().map(|record| record.approver_id.clone()).collect(),
            });
        }
        if status.is_resolved() {
            self.notify(Notification::ExpenseResolved {
                expense_id: expense.id.clone(),
                owner: expense.employee_id.clone(),
                status,
            });
        }

        Ok(ExpenseDetail { expense, approvals: records })
    }

    pub async fn decide(
        &self,
        principal: &Principal,
        expense_id: &ExpenseId,
        decision: Decision,
    ) -> Result<ExpenseDetail, ApplicationError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut expense = load_expense(&mut tx, expense_id).await?;
        let records = list_records_for_expense(&mut tx, expense_id).await?;

        let record = actionable_record(&expense, &records, &principal.employee_id)
            .map_err(DomainError::from)?;
        let record_id = record.id.clone();
        let outcome = decision.action.outcome();
        let remarks = decision
            .remarks
            .as_deref()
            .map(str::trim)
            .filter(|remarks| !remarks.is_empty());

        if !record_decision(&mut tx, &record_id, outcome, remarks, now).await? {
            let status = list_records_for_expense(&mut tx, expense_id)
                .await?
                .into_iter()
                .find(|record| record.id == record_id)
                .map(|record| record.status)
                .unwrap_or(outcome);
            return Err(DomainError::from(ApprovalActionError::RecordAlreadyResolved { status })
                .into());
        }

        let records = list_records_for_expense(&mut tx, expense_id).await?;
        let previous = expense.status;
        let status = aggregate_status(&records, expense.routing.as_ref());
        if status != previous {
            expense.transition_to(status)?;
            expense.updated_at = now;
            if !update_status(&mut tx, &expense.id, previous, status, now).await? {
                return Err(DomainError::from(ApprovalActionError::ExpenseNotPending {
                    status: previous,
                })
                .into());
            }
        }

        let mut event = AuditEvent::new(
            Some(expense.id.clone()),
            match outcome {
                ApprovalStatus::Rejected => "approval.rejected",
                _ => "approval.approved",
            },
            AuditCategory::Approval,
            principal.employee_id.clone(),
            now,
        )
        .with_metadata("record_id", record_id.0.clone());
        if let Some(remarks) = remarks {
            event = event.with_metadata("remarks", remarks);
        }
        append_event(&mut tx, &event).await?;
        if status != previous {
            append_event(
                &mut tx,
                &AuditEvent::expense(
                    &expense.id,
                    match status {
                        ExpenseStatus::Rejected => "expense.rejected",
                        _ => "expense.approved",
                    },
                    &principal.employee_id,
                    now,
                ),
            )
            .await?;
        }
        commit(tx).await?;

        info!(
            event_name = "approval.decided",
            expense_id = %expense.id,
            actor = %principal.employee_id,
            outcome = outcome.as_str(),
            status = status.as_str(),
            "approval decision recorded"
        );

        if status != previous && status.is_resolved() {
            self.notify(Notification::ExpenseResolved {
                expense_id: expense.id.clone(),
                owner: expense.employee_id.clone(),
                status,
            });
        }

        Ok(ExpenseDetail { expense, approvals: records })
    }

    pub async fn list_expenses(
        &self,
        principal: &Principal,
    ) -> Result<ExpenseDashboard, ApplicationError> {
        let mut conn = self.acquire().await?;
        let expenses = list_expenses_for_employee(&mut conn, &principal.employee_id).await?;
        let counts = StatusCounts::of(&expenses);
        Ok(ExpenseDashboard { expenses, counts })
    }

    pub async fn expense_detail(
        &self,
        principal: &Principal,
        expense_id: &ExpenseId,
    ) -> Result<ExpenseDetail, ApplicationError> {
        let mut conn = self.acquire().await?;
        let expense = load_expense(&mut conn, expense_id).await?;
        let approvals = list_records_for_expense(&mut conn, expense_id).await?;

        let visible = if expense.employee_id == principal.employee_id
            || approvals.iter().any(|record| record.approver_id == principal.employee_id)
        {
            true
        } else if principal.is_admin() {
            let owner = load_employee(&mut conn, &expense.employee_id).await?;
            principal.same_organization(&owner)
        } else {
            false
        };
        if !visible {
            return Err(ApplicationError::forbidden("expense is not visible to this employee"));
        }

        Ok(ExpenseDetail { expense, approvals })
    }

    /// Records the principal can act on right now.
    pub async fn pending_approvals(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ApprovalQueueItem>, ApplicationError> {
        let mut conn = self.acquire().await?;
        let open = list_open_records_for_approver(&mut conn, &principal.employee_id).await?;

        let mut queue = Vec::with_capacity(open.len());
        for record in open {
            let expense = load_expense(&mut conn, &record.expense_id).await?;
            let records = list_records_for_expense(&mut conn, &record.expense_id).await?;
            if is_actionable(&expense, &records, &principal.employee_id) {
                queue.push(ApprovalQueueItem { expense, record });
            }
        }
        Ok(queue)
    }

    pub async fn approval_history(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ApprovalQueueItem>, ApplicationError> {
        let mut conn = self.acquire().await?;
        let decided = list_decided_records_for_approver(&mut conn, &principal.employee_id).await?;

        let mut history = Vec::with_capacity(decided.len());
        for record in decided {
            let expense = load_expense(&mut conn, &record.expense_id).await?;
            history.push(ApprovalQueueItem { expense, record });
        }
        Ok(history)
    }

    pub async fn save_rule(
        &self,
        principal: &Principal,
        draft: RuleDraft,
    ) -> Result<ApprovalRule, ApplicationError> {
        ensure_admin(principal)?;

        let now = Utc::now();
        let mut tx = self.begin().await?;
        let subject = load_employee(&mut tx, &draft.employee_id).await?;
        ensure_same_organization(principal, &subject)?;

        let directory = find_employees(&mut tx, &draft.referenced_ids()).await?;
        let validated = RuleValidator::new(self.approvals.default_min_approval_percentage)
            .validate(draft, &subject, &directory)?;
        let existing = find_rule_for_employee(&mut tx, &subject.id).await?;
        let rule = validated.into_rule(existing.as_ref(), now);

        save_rule(&mut tx, &rule).await?;
        append_event(
            &mut tx,
            &AuditEvent::new(
                None,
                "rule.saved",
                AuditCategory::Rule,
                principal.employee_id.clone(),
                now,
            )
            .with_metadata("rule_id", rule.id.0.clone())
            .with_metadata("employee_id", rule.employee_id.0.clone())
            .with_metadata("approvers", rule.approvers.len().to_string()),
        )
        .await?;
        commit(tx).await?;

        info!(
            event_name = "rule.saved",
            rule_id = %rule.id.0,
            employee_id = %rule.employee_id,
            actor = %principal.employee_id,
            "approval rule saved"
        );
        self.notify(Notification::RuleChanged {
            rule_id: rule.id.clone(),
            employee_id: rule.employee_id.clone(),
            changed_by: principal.employee_id.clone(),
            deleted: false,
        });

        Ok(rule)
    }

    pub async fn rule_for(
        &self,
        principal: &Principal,
        employee_id: &EmployeeId,
    ) -> Result<Option<ApprovalRule>, ApplicationError> {
        ensure_admin(principal)?;
        let mut conn = self.acquire().await?;
        let subject = load_employee(&mut conn, employee_id).await?;
        ensure_same_organization(principal, &subject)?;
        Ok(find_rule_for_employee(&mut conn, employee_id).await?)
    }

    pub async fn list_rules(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ApprovalRule>, ApplicationError> {
        ensure_admin(principal)?;
        let mut conn = self.acquire().await?;
        Ok(list_rules_for_organization(&mut conn, &principal.organization_id).await?)
    }

    pub async fn delete_rule(
        &self,
        principal: &Principal,
        rule_id: &ApprovalRuleId,
    ) -> Result<(), ApplicationError> {
        ensure_admin(principal)?;

        let now = Utc::now();
        let mut tx = self.begin().await?;
        let rule = find_rule(&mut tx, rule_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("approval rule", &rule_id.0))?;
        let subject = load_employee(&mut tx, &rule.employee_id).await?;
        ensure_same_organization(principal, &subject)?;

        if !delete_rule(&mut tx, rule_id).await? {
            return Err(ApplicationError::not_found("approval rule", &rule_id.0));
        }
        append_event(
            &mut tx,
            &AuditEvent::new(
                None,
                "rule.deleted",
                AuditCategory::Rule,
                principal.employee_id.clone(),
                now,
            )
            .with_metadata("rule_id", rule.id.0.clone())
            .with_metadata("employee_id", rule.employee_id.0.clone()),
        )
        .await?;
        commit(tx).await?;

        info!(
            event_name = "rule.deleted",
            rule_id = %rule.id.0,
            actor = %principal.employee_id,
            "approval rule deleted"
        );
        self.notify(Notification::RuleChanged {
            rule_id: rule.id,
            employee_id: rule.employee_id,
            changed_by: principal.employee_id.clone(),
            deleted: true,
        });

        Ok(())
    }

    /// Gives a newly provisioned account its default rule. An existing rule is left alone.
    pub async fn provision_default_rule(
        &self,
        employee: &Employee,
    ) -> Result<Option<ApprovalRule>, ApplicationError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        if let Some(existing) = find_rule_for_employee(&mut tx, &employee.id).await? {
            return Ok(Some(existing));
        }
        let Some(rule) =
            default_rule_for(employee, self.approvals.default_min_approval_percentage, now)
        else {
            return Ok(None);
        };

        save_rule(&mut tx, &rule).await?;
        append_event(
            &mut tx,
            &AuditEvent::new(None, "rule.provisioned", AuditCategory::Rule, employee.id.clone(), now)
                .with_metadata("rule_id", rule.id.0.clone()),
        )
        .await?;
        commit(tx).await?;

        Ok(Some(rule))
    }

    pub async fn organization_summary(
        &self,
        principal: &Principal,
    ) -> Result<OrganizationSummary, ApplicationError> {
        ensure_admin(principal)?;
        let organization_id = &principal.organization_id;
        let mut conn = self.acquire().await?;

        let admins = count_employees_by_role(&mut conn, organization_id, Role::Admin).await?;
        let managers = count_employees_by_role(&mut conn, organization_id, Role::Manager).await?;
        let employees =
            count_employees_by_role(&mut conn, organization_id, Role::Employee).await?;

        Ok(OrganizationSummary {
            organization_id: organization_id.clone(),
            employees: admins + managers + employees,
            managers,
            expenses: count_expenses_for_organization(&mut conn, organization_id).await?,
            pending_approvals: count_open_records_for_organization(&mut conn, organization_id)
                .await?,
            rules: count_rules_for_organization(&mut conn, organization_id).await?,
        })
    }

    async fn current_detail(&self, expense_id: &ExpenseId) -> Result<ExpenseDetail, ApplicationError> {
        let mut conn = self.acquire().await?;
        let expense = load_expense(&mut conn, expense_id).await?;
        let approvals = list_records_for_expense(&mut conn, expense_id).await?;
        Ok(ExpenseDetail { expense, approvals })
    }

    /// Hands delivery to a background task so a slow receiver never holds up the caller.
    fn notify(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(error) = notifier.send(&notification).await {
                warn!(
                    event_name = "notification.failed",
                    notification = notification.event_name(),
                    error = %error,
                    "notification delivery failed"
                );
            }
        });
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, ApplicationError> {
        Ok(self.pool.begin().await.map_err(RepositoryError::from)?)
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>, ApplicationError> {
        Ok(self.pool.acquire().await.map_err(RepositoryError::from)?)
    }
}

async fn commit(tx: Transaction<'static, Sqlite>) -> Result<(), ApplicationError> {
    Ok(tx.commit().await.map_err(RepositoryError::from)?)
}

async fn load_expense(
    conn: &mut SqliteConnection,
    id: &ExpenseId,
) -> Result<Expense, ApplicationError> {
    find_expense(conn, id).await?.ok_or_else(|| ApplicationError::not_found("expense", &id.0))
}

async fn load_employee(
    conn: &mut SqliteConnection,
    id: &EmployeeId,
) -> Result<Employee, ApplicationError> {
    find_employee(conn, id).await?.ok_or_else(|| ApplicationError::not_found("employee", &id.0))
}

/// The payer has to be a known employee of the expense owner's organization.
async fn ensure_payer(
    conn: &mut SqliteConnection,
    owner: &Employee,
    paid_by: Option<&EmployeeId>,
) -> Result<(), ApplicationError> {
    let Some(payer_id) = paid_by else {
        return Ok(());
    };
    match find_employee(conn, payer_id).await? {
        Some(payer) if payer.organization_id == owner.organization_id => Ok(()),
        _ => Err(DomainError::InvalidExpense(format!(
            "payer `{payer_id}` is not an employee of this organization"
        ))
        .into()),
    }
}

fn ensure_admin(principal: &Principal) -> Result<(), ApplicationError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ApplicationError::forbidden("only admins can manage approval rules"))
    }
}

fn ensure_same_organization(principal: &Principal, employee: &Employee) -> Result<(), ApplicationError> {
    if principal.same_organization(employee) {
        Ok(())
    } else {
        Err(ApplicationError::forbidden("employee belongs to another organization"))
    }
}

fn ensure_owner(principal: &Principal, expense: &Expense) -> Result<(), ApplicationError> {
    if expense.employee_id == principal.employee_id {
        Ok(())
    } else {
        Err(ApplicationError::forbidden("only the owner can change this expense"))
    }
}

fn ensure_editable(expense: &Expense) -> Result<(), ApplicationError> {
    if expense.is_editable() {
        Ok(())
    } else {
        Err(DomainError::ExpenseNotEditable { status: expense.status }.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use expensa_core::approvals::{ApprovalActionError, MissingRulePolicy, RuleDraft};
    use expensa_core::config::ApprovalConfig;
    use expensa_core::domain::approval::{ApprovalAction, ApprovalStatus};
    use expensa_core::domain::employee::{
        Employee, EmployeeId, Organization, OrganizationId, Principal, Role,
    };
    use expensa_core::domain::expense::{ExpenseCategory, ExpenseDraft, ExpenseId, ExpenseStatus};
    use expensa_core::errors::{ApplicationError, DomainError};
    use expensa_core::notify::{
        InMemoryNotificationSender, Notification, NotificationError, NotificationSender,
    };

    use super::{Decision, ExpenseWorkflow, ReceiptUpload};
    use crate::repositories::audit::list_events_for_expense;
    use crate::repositories::employee::{save_employee, save_organization};
    use crate::{connect_with_settings, migrations, DbPool};

    struct FailingSender;

    #[async_trait]
    impl NotificationSender for FailingSender {
        async fn send(&self, _notification: &Notification) -> Result<(), NotificationError> {
            Err(NotificationError::Transport("smtp down".to_string()))
        }
    }

    struct StalledSender;

    #[async_trait]
    impl NotificationSender for StalledSender {
        async fn send(&self, _notification: &Notification) -> Result<(), NotificationError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Waits for background deliveries to reach the in-memory sender.
    async fn delivered(sender: &InMemoryNotificationSender, expected: usize) -> Vec<Notification> {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let sent = sender.sent();
                if sent.len() >= expected {
                    return sent;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("notifications delivered")
    }

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let now = Utc::now();
        let mut conn = pool.acquire().await.expect("acquire");
        for (org, currency) in [("org-1", "USD"), ("org-2", "EUR")] {
            save_organization(
                &mut conn,
                &Organization {
                    id: OrganizationId(org.to_string()),
                    name: format!("Org {org}"),
                    country: "US".to_string(),
                    currency: currency.to_string(),
                    created_at: now,
                },
            )
            .await
            .expect("save organization");
        }
        for (id, org, role, manager) in [
            ("admin", "org-1", Role::Admin, None),
            ("mgr", "org-1", Role::Manager, None),
            ("a", "org-1", Role::Manager, None),
            ("b", "org-1", Role::Manager, None),
            ("c", "org-1", Role::Manager, None),
            ("emp", "org-1", Role::Employee, Some("mgr")),
            ("loner", "org-1", Role::Employee, None),
            ("outsider", "org-2", Role::Manager, None),
            ("admin-2", "org-2", Role::Admin, None),
        ] {
            save_employee(
                &mut conn,
                &Employee {
                    id: EmployeeId(id.to_string()),
                    organization_id: OrganizationId(org.to_string()),
                    name: format!("Name {id}"),
                    email: format!("{id}@example.test"),
                    role,
                    manager_id: manager.map(|raw: &str| EmployeeId(raw.to_string())),
                    created_at: now,
                    updated_at: now,
                },
            )
            .await
            .expect("save employee");
        }
        drop(conn);
        pool
    }

    fn workflow(pool: DbPool, sender: InMemoryNotificationSender) -> ExpenseWorkflow {
        ExpenseWorkflow::new(pool, Arc::new(sender), ApprovalConfig::default())
    }

    fn principal(id: &str, role: Role) -> Principal {
        Principal {
            employee_id: EmployeeId(id.to_string()),
            organization_id: OrganizationId("org-1".to_string()),
            role,
        }
    }

    fn employee() -> Principal {
        principal("emp", Role::Employee)
    }

    fn admin() -> Principal {
        principal("admin", Role::Admin)
    }

    fn expense_draft(amount: i64) -> ExpenseDraft {
        ExpenseDraft {
            description: "Client dinner".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).expect("date"),
            category: ExpenseCategory::Food,
            amount: Decimal::new(amount, 2),
            currency: None,
            remarks: Some("  with the Acme team ".to_string()),
            paid_by: None,
        }
    }

    fn rule_draft(
        manager_approval: bool,
        approvers: &[&str],
        sequential: bool,
        threshold: i64,
    ) -> RuleDraft {
        RuleDraft {
            employee_id: EmployeeId("emp".to_string()),
            description: "Field sales".to_string(),
            manager_id: Some(EmployeeId("mgr".to_string())),
            manager_approval,
            approver_ids: approvers.iter().map(|id| EmployeeId(id.to_string())).collect(),
            sequential,
            min_approval_percentage: Some(threshold),
        }
    }

    fn approve() -> Decision {
        Decision { action: ApprovalAction::Approve, remarks: None }
    }

    fn reject(remarks: &str) -> Decision {
        Decision { action: ApprovalAction::Reject, remarks: Some(remarks.to_string()) }
    }

    async fn submitted_expense(workflow: &ExpenseWorkflow) -> ExpenseId {
        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");
        workflow.submit(&employee(), &expense.id).await.expect("submit");
        expense.id
    }

    fn action_error(error: ApplicationError) -> ApprovalActionError {
        match error {
            ApplicationError::Domain(DomainError::ApprovalAction(error)) => error,
            other => panic!("expected approval action error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_expense_uses_organization_currency_and_starts_as_draft() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());

        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");

        assert_eq!(expense.status, ExpenseStatus::Draft);
        assert_eq!(expense.currency, "USD");
        assert_eq!(expense.amount, Decimal::new(4250, 2));
        assert_eq!(expense.remarks.as_deref(), Some("with the Acme team"));
        let detail = workflow.expense_detail(&employee(), &expense.id).await.expect("detail");
        assert!(detail.approvals.is_empty());
    }

    #[tokio::test]
    async fn only_employees_create_expenses() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());

        let error = workflow
            .create_expense(&principal("mgr", Role::Manager), expense_draft(100))
            .await
            .expect_err("managers cannot file expenses");
        assert!(matches!(error, ApplicationError::Forbidden(_)));
    }

    #[tokio::test]
    async fn invalid_amount_is_rejected_at_the_boundary() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());

        let error = workflow
            .create_expense(&employee(), expense_draft(0))
            .await
            .expect_err("zero amount");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidExpense(_))));
    }

    #[tokio::test]
    async fn payer_must_belong_to_the_owners_organization() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());

        let mut draft = expense_draft(4250);
        draft.paid_by = Some(EmployeeId("mgr".to_string()));
        let expense = workflow.create_expense(&employee(), draft).await.expect("create");
        assert_eq!(expense.paid_by, Some(EmployeeId("mgr".to_string())));

        let mut cross_org = expense_draft(4250);
        cross_org.paid_by = Some(EmployeeId("outsider".to_string()));
        let error = workflow
            .update_draft(&employee(), &expense.id, cross_org)
            .await
            .expect_err("payer from another organization");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidExpense(_))));

        let mut unknown = expense_draft(4250);
        unknown.paid_by = Some(EmployeeId("ghost".to_string()));
        assert!(workflow.create_expense(&employee(), unknown).await.is_err());

        let detail = workflow.expense_detail(&employee(), &expense.id).await.expect("detail");
        assert_eq!(detail.expense.paid_by, Some(EmployeeId("mgr".to_string())));
    }

    #[tokio::test]
    async fn drafts_are_editable_until_submitted() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(true, &[], false, 100)).await.expect("rule");
        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");

        let mut edit = expense_draft(9900);
        edit.category = ExpenseCategory::Travel;
        let updated = workflow.update_draft(&employee(), &expense.id, edit).await.expect("update");
        assert_eq!(updated.amount, Decimal::new(9900, 2));
        assert_eq!(updated.category, ExpenseCategory::Travel);

        let with_receipt = workflow
            .attach_receipt(
                &employee(),
                &expense.id,
                ReceiptUpload {
                    file_name: "Dinner.PDF".to_string(),
                    storage_key: "receipts/exp-1".to_string(),
                },
            )
            .await
            .expect("attach");
        assert_eq!(
            with_receipt.receipt.as_ref().map(|receipt| receipt.storage_key.as_str()),
            Some("receipts/exp-1")
        );

        let bad_receipt = workflow
            .attach_receipt(
                &employee(),
                &expense.id,
                ReceiptUpload {
                    file_name: "notes.txt".to_string(),
                    storage_key: "receipts/exp-1".to_string(),
                },
            )
            .await
            .expect_err("txt receipts are refused");
        assert!(matches!(bad_receipt, ApplicationError::Domain(DomainError::InvalidExpense(_))));

        workflow.submit(&employee(), &expense.id).await.expect("submit");
        let locked = workflow
            .update_draft(&employee(), &expense.id, expense_draft(100))
            .await
            .expect_err("pending expenses are locked");
        assert_eq!(
            locked,
            ApplicationError::Domain(DomainError::ExpenseNotEditable {
                status: ExpenseStatus::Pending
            })
        );
    }

    #[tokio::test]
    async fn only_the_owner_edits_an_expense() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");

        let error = workflow
            .update_draft(&principal("loner", Role::Employee), &expense.id, expense_draft(1))
            .await
            .expect_err("not the owner");
        assert!(matches!(error, ApplicationError::Forbidden(_)));
    }

    #[tokio::test]
    async fn manager_only_rule_routes_to_manager_and_approves() {
        let sender = InMemoryNotificationSender::default();
        let workflow = workflow(setup().await, sender.clone());
        workflow.save_rule(&admin(), rule_draft(true, &[], false, 100)).await.expect("rule");

        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");
        let detail = workflow.submit(&employee(), &expense.id).await.expect("submit");
        assert_eq!(detail.expense.status, ExpenseStatus::Pending);
        assert_eq!(detail.approvals.len(), 1);
        assert_eq!(detail.approvals[0].approver_id, EmployeeId("mgr".to_string()));

        let decided = workflow
            .decide(&principal("mgr", Role::Manager), &expense.id, approve())
            .await
            .expect("approve");
        assert_eq!(decided.expense.status, ExpenseStatus::Approved);
        assert_eq!(decided.approvals[0].status, ApprovalStatus::Approved);

        let sent = delivered(&sender, 3).await;
        assert!(sent.iter().any(|notification| matches!(
            notification,
            Notification::ExpenseResolved { status: ExpenseStatus::Approved, .. }
        )));

        let mut conn = workflow.pool().acquire().await.expect("acquire");
        let events = list_events_for_expense(&mut conn, &expense.id).await.expect("events");
        let types: Vec<&str> = events.iter().map(|event| event.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["expense.created", "expense.submitted", "approval.approved", "expense.approved"]
        );
    }

    #[tokio::test]
    async fn a_single_rejection_is_final() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(false, &["a", "b", "c"], false, 51)).await.expect("rule");
        let expense_id = submitted_expense(&workflow).await;

        let decided = workflow
            .decide(&principal("b", Role::Manager), &expense_id, reject("missing itemization"))
            .await
            .expect("reject");
        assert_eq!(decided.expense.status, ExpenseStatus::Rejected);
        let record = decided
            .approvals
            .iter()
            .find(|record| record.approver_id.0 == "b")
            .expect("b's record");
        assert_eq!(record.remarks.as_deref(), Some("missing itemization"));

        let error = workflow
            .decide(&principal("a", Role::Manager), &expense_id, approve())
            .await
            .expect_err("expense is already rejected");
        assert_eq!(
            action_error(error),
            ApprovalActionError::ExpenseNotPending { status: ExpenseStatus::Rejected }
        );

        let detail = workflow.expense_detail(&employee(), &expense_id).await.expect("detail");
        assert_eq!(detail.expense.status, ExpenseStatus::Rejected);
    }

    #[tokio::test]
    async fn threshold_resolves_before_every_approver_acts() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(false, &["a", "b", "c"], false, 67)).await.expect("rule");
        let expense_id = submitted_expense(&workflow).await;

        let after_one = workflow
            .decide(&principal("a", Role::Manager), &expense_id, approve())
            .await
            .expect("a approves");
        assert_eq!(after_one.expense.status, ExpenseStatus::Pending);

        let after_two = workflow
            .decide(&principal("c", Role::Manager), &expense_id, approve())
            .await
            .expect("c approves");
        assert_eq!(after_two.expense.status, ExpenseStatus::Approved);

        let queue = workflow
            .pending_approvals(&principal("b", Role::Manager))
            .await
            .expect("queue");
        assert!(queue.is_empty(), "resolved expenses leave the approval queue");
    }

    #[tokio::test]
    async fn sequential_rule_gates_later_approvers() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(true, &["a"], true, 100)).await.expect("rule");
        let expense_id = submitted_expense(&workflow).await;

        let a = principal("a", Role::Manager);
        assert!(workflow.pending_approvals(&a).await.expect("queue").is_empty());
        let error = workflow.decide(&a, &expense_id, approve()).await.expect_err("gated");
        assert_eq!(
            action_error(error),
            ApprovalActionError::AwaitingPredecessors {
                waiting_on: vec![EmployeeId("mgr".to_string())]
            }
        );

        let mgr = principal("mgr", Role::Manager);
        let queue = workflow.pending_approvals(&mgr).await.expect("queue");
        assert_eq!(queue.len(), 1);
        workflow.decide(&mgr, &expense_id, approve()).await.expect("manager approves");

        assert_eq!(workflow.pending_approvals(&a).await.expect("queue").len(), 1);
        let decided = workflow.decide(&a, &expense_id, approve()).await.expect("a approves");
        assert_eq!(decided.expense.status, ExpenseStatus::Approved);

        let history = workflow.approval_history(&mgr).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].record.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn resubmission_does_not_duplicate_records() {
        let sender = InMemoryNotificationSender::default();
        let workflow = workflow(setup().await, sender.clone());
        workflow.save_rule(&admin(), rule_draft(true, &["a"], false, 100)).await.expect("rule");
        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");

        let first = workflow.submit(&employee(), &expense.id).await.expect("first submit");
        let second = workflow.submit(&employee(), &expense.id).await.expect("second submit");

        assert_eq!(first.approvals.len(), 2);
        assert_eq!(second.approvals.len(), 2);
        assert_eq!(second.expense.status, ExpenseStatus::Pending);
        let submissions = delivered(&sender, 2)
            .await
            .into_iter()
            .filter(|notification| matches!(notification, Notification::ExpenseSubmitted { .. }))
            .count();
        assert_eq!(submissions, 1);
    }

    #[tokio::test]
    async fn missing_rule_falls_back_to_directory_manager() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());

        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");
        let detail = workflow.submit(&employee(), &expense.id).await.expect("submit");

        assert_eq!(detail.expense.status, ExpenseStatus::Pending);
        assert_eq!(detail.approvals.len(), 1);
        assert_eq!(detail.approvals[0].approver_id, EmployeeId("mgr".to_string()));
    }

    #[tokio::test]
    async fn zero_approvers_approve_immediately() {
        let sender = InMemoryNotificationSender::default();
        let workflow = workflow(setup().await, sender.clone());
        let loner = principal("loner", Role::Employee);

        let expense = workflow.create_expense(&loner, expense_draft(4250)).await.expect("create");
        let detail = workflow.submit(&loner, &expense.id).await.expect("submit");

        assert!(detail.approvals.is_empty());
        assert_eq!(detail.expense.status, ExpenseStatus::Approved);
        assert_eq!(
            delivered(&sender, 1).await,
            vec![Notification::ExpenseResolved {
                expense_id: expense.id,
                owner: EmployeeId("loner".to_string()),
                status: ExpenseStatus::Approved,
            }]
        );
    }

    #[tokio::test]
    async fn auto_approve_policy_skips_the_directory_manager() {
        let pool = setup().await;
        let workflow = ExpenseWorkflow::new(
            pool,
            Arc::new(InMemoryNotificationSender::default()),
            ApprovalConfig {
                missing_rule_policy: MissingRulePolicy::AutoApprove,
                ..ApprovalConfig::default()
            },
        );

        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");
        let detail = workflow.submit(&employee(), &expense.id).await.expect("submit");
        assert_eq!(detail.expense.status, ExpenseStatus::Approved);
    }

    #[tokio::test]
    async fn unassigned_employees_cannot_decide() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(true, &[], false, 100)).await.expect("rule");
        let expense_id = submitted_expense(&workflow).await;

        let error = workflow
            .decide(&principal("a", Role::Manager), &expense_id, approve())
            .await
            .expect_err("a is not assigned");
        assert!(matches!(action_error(error), ApprovalActionError::NotAssigned { .. }));
    }

    #[tokio::test]
    async fn notification_failures_do_not_fail_the_operation() {
        let workflow = ExpenseWorkflow::new(
            setup().await,
            Arc::new(FailingSender),
            ApprovalConfig::default(),
        );

        let rule = workflow.save_rule(&admin(), rule_draft(true, &[], false, 100)).await;
        assert!(rule.is_ok());
    }

    #[tokio::test]
    async fn stalled_receivers_do_not_hold_up_the_caller() {
        let workflow =
            ExpenseWorkflow::new(setup().await, Arc::new(StalledSender), ApprovalConfig::default());
        workflow.save_rule(&admin(), rule_draft(true, &[], false, 100)).await.expect("rule");
        let expense = workflow.create_expense(&employee(), expense_draft(4250)).await.expect("create");

        let detail = tokio::time::timeout(
            Duration::from_secs(5),
            workflow.submit(&employee(), &expense.id),
        )
        .await
        .expect("submit returns while delivery is still in flight")
        .expect("submit");
        assert_eq!(detail.expense.status, ExpenseStatus::Pending);
    }

    #[tokio::test]
    async fn expense_detail_visibility() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(true, &[], false, 100)).await.expect("rule");
        let expense_id = submitted_expense(&workflow).await;

        assert!(workflow.expense_detail(&principal("mgr", Role::Manager), &expense_id).await.is_ok());
        assert!(workflow.expense_detail(&admin(), &expense_id).await.is_ok());

        let stranger = workflow
            .expense_detail(&principal("loner", Role::Employee), &expense_id)
            .await
            .expect_err("unrelated employee");
        assert!(matches!(stranger, ApplicationError::Forbidden(_)));

        let mut other_admin = principal("admin-2", Role::Admin);
        other_admin.organization_id = OrganizationId("org-2".to_string());
        assert!(workflow.expense_detail(&other_admin, &expense_id).await.is_err());
    }

    #[tokio::test]
    async fn dashboard_counts_expenses_by_status() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(true, &[], false, 100)).await.expect("rule");
        submitted_expense(&workflow).await;
        workflow.create_expense(&employee(), expense_draft(100)).await.expect("draft");

        let dashboard = workflow.list_expenses(&employee()).await.expect("dashboard");
        assert_eq!(dashboard.expenses.len(), 2);
        assert_eq!(dashboard.counts.draft, 1);
        assert_eq!(dashboard.counts.pending, 1);
    }

    #[tokio::test]
    async fn rule_management_is_admin_only() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());

        let error = workflow
            .save_rule(&principal("mgr", Role::Manager), rule_draft(true, &[], false, 100))
            .await
            .expect_err("managers cannot edit rules");
        assert!(matches!(error, ApplicationError::Forbidden(_)));

        let error = workflow.list_rules(&employee()).await.expect_err("employees cannot list rules");
        assert!(matches!(error, ApplicationError::Forbidden(_)));
    }

    #[tokio::test]
    async fn rule_save_replaces_approvers_and_notifies() {
        let sender = InMemoryNotificationSender::default();
        let workflow = workflow(setup().await, sender.clone());

        let first =
            workflow.save_rule(&admin(), rule_draft(true, &["a", "b"], true, 100)).await.expect("save");
        let second =
            workflow.save_rule(&admin(), rule_draft(false, &["c", "c"], false, 51)).await.expect("save");

        assert_eq!(first.id, second.id);
        let stored = workflow
            .rule_for(&admin(), &EmployeeId("emp".to_string()))
            .await
            .expect("rule_for")
            .expect("rule exists");
        assert_eq!(stored.approvers, vec![EmployeeId("c".to_string())]);
        assert!(!stored.sequential);
        assert_eq!(workflow.list_rules(&admin()).await.expect("list").len(), 1);
        assert_eq!(delivered(&sender, 2).await.len(), 2);
    }

    #[tokio::test]
    async fn rule_validation_failures_leave_the_stored_rule_untouched() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(true, &["a"], false, 100)).await.expect("save");

        let cross_org = workflow
            .save_rule(&admin(), rule_draft(true, &["outsider"], false, 100))
            .await
            .expect_err("cross organization approver");
        assert!(matches!(cross_org, ApplicationError::Domain(DomainError::RuleValidation(_))));

        let self_approval = workflow
            .save_rule(&admin(), rule_draft(true, &["emp"], false, 100))
            .await
            .expect_err("self approval");
        assert!(matches!(self_approval, ApplicationError::Domain(DomainError::RuleValidation(_))));

        let stored = workflow
            .rule_for(&admin(), &EmployeeId("emp".to_string()))
            .await
            .expect("rule_for")
            .expect("rule exists");
        assert_eq!(stored.approvers, vec![EmployeeId("a".to_string())]);
    }

    #[tokio::test]
    async fn admins_only_see_their_own_organization() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        let mut other_admin = principal("admin-2", Role::Admin);
        other_admin.organization_id = OrganizationId("org-2".to_string());

        let error = workflow
            .save_rule(&other_admin, rule_draft(true, &[], false, 100))
            .await
            .expect_err("emp belongs to org-1");
        assert!(matches!(error, ApplicationError::Forbidden(_)));
    }

    #[tokio::test]
    async fn deleting_a_rule_restores_the_fallback() {
        let sender = InMemoryNotificationSender::default();
        let workflow = workflow(setup().await, sender.clone());
        let rule =
            workflow.save_rule(&admin(), rule_draft(false, &["a", "b"], false, 51)).await.expect("save");

        workflow.delete_rule(&admin(), &rule.id).await.expect("delete");
        assert!(workflow
            .rule_for(&admin(), &EmployeeId("emp".to_string()))
            .await
            .expect("rule_for")
            .is_none());
        assert!(delivered(&sender, 2).await.iter().any(|notification| matches!(
            notification,
            Notification::RuleChanged { deleted: true, .. }
        )));

        let missing = workflow.delete_rule(&admin(), &rule.id).await.expect_err("already gone");
        assert!(matches!(missing, ApplicationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn provisioned_defaults_follow_the_role() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        let now = Utc::now();
        let emp = Employee {
            id: EmployeeId("emp".to_string()),
            organization_id: OrganizationId("org-1".to_string()),
            name: "Name emp".to_string(),
            email: "emp@example.test".to_string(),
            role: Role::Employee,
            manager_id: Some(EmployeeId("mgr".to_string())),
            created_at: now,
            updated_at: now,
        };

        let rule = workflow.provision_default_rule(&emp).await.expect("provision").expect("rule");
        assert!(rule.manager_approval);
        assert_eq!(rule.manager_id, Some(EmployeeId("mgr".to_string())));
        assert_eq!(rule.min_approval_percentage.percentage(), 51);

        let again = workflow.provision_default_rule(&emp).await.expect("provision").expect("rule");
        assert_eq!(again.id, rule.id);

        let admin_employee = Employee { id: EmployeeId("admin".to_string()), role: Role::Admin, ..emp };
        assert!(workflow.provision_default_rule(&admin_employee).await.expect("provision").is_none());
    }

    #[tokio::test]
    async fn organization_summary_counts_the_directory() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());
        workflow.save_rule(&admin(), rule_draft(true, &[], false, 100)).await.expect("rule");
        submitted_expense(&workflow).await;

        let summary = workflow.organization_summary(&admin()).await.expect("summary");
        assert_eq!(summary.employees, 7);
        assert_eq!(summary.managers, 4);
        assert_eq!(summary.expenses, 1);
        assert_eq!(summary.pending_approvals, 1);
        assert_eq!(summary.rules, 1);
    }

    #[tokio::test]
    async fn unknown_principals_are_forbidden() {
        let workflow = workflow(setup().await, InMemoryNotificationSender::default());

        let resolved = workflow.principal(&EmployeeId("emp".to_string())).await.expect("known");
        assert_eq!(resolved.role, Role::Employee);

        let error = workflow
            .principal(&EmployeeId("ghost".to_string()))
            .await
            .expect_err("unknown employee");
        assert!(matches!(error, ApplicationError::Forbidden(_)));
    }
}
