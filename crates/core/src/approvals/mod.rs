//! Approval routing and status aggregation.
//!
//! `rules` validates what an administrator configures, `routing` freezes a rule into
//! approval records at submission, `gate` decides who may act next and `aggregate`
//! derives the expense status from the recorded decisions.

pub mod aggregate;
pub mod gate;
pub mod routing;
pub mod rules;

pub use aggregate::{aggregate_status, ApprovalTally};
pub use gate::{actionable_record, is_actionable, ApprovalActionError};
pub use routing::{plan_routing, MissingRulePolicy, PlannedApprover, RoutingPlan};
pub use rules::{default_rule_for, RuleDraft, RuleValidationError, RuleValidator, ValidatedRule};
