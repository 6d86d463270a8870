pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;

pub use approvals::{
    aggregate_status, plan_routing, ApprovalActionError, MissingRulePolicy, RoutingPlan,
    RuleDraft, RuleValidationError, RuleValidator,
};
pub use domain::approval::{ApprovalAction, ApprovalRecord, ApprovalRecordId, ApprovalStatus};
pub use domain::employee::{Employee, EmployeeId, Organization, OrganizationId, Principal, Role};
pub use domain::expense::{Expense, ExpenseCategory, ExpenseDraft, ExpenseId, ExpenseStatus};
pub use domain::rule::{ApprovalRule, ApprovalRuleId, ApprovalThreshold, RoutingPolicy};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use notify::{Notification, NotificationError, NotificationSender};
