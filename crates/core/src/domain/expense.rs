use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::employee::EmployeeId;
use crate::domain::rule::RoutingPolicy;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl ExpenseId {
    pub fn generate() -> Self {
        Self(format!("EXP-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Travel,
    Food,
    OfficeSupplies,
    #[default]
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Travel => "travel",
            Self::Food => "food",
            Self::OfficeSupplies => "office_supplies",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "travel" => Some(Self::Travel),
            "food" => Some(Self::Food),
            "office_supplies" => Some(Self::OfficeSupplies),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Reference into the external file store. Content is never read here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRef {
    pub file_name: String,
    pub storage_key: String,
}

const RECEIPT_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

impl ReceiptRef {
    pub fn new(
        file_name: impl Into<String>,
        storage_key: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let file_name = file_name.into().trim().to_string();
        let storage_key = storage_key.into().trim().to_string();

        let extension = file_name
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_ascii_lowercase())
            .unwrap_or_default();
        if !RECEIPT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(DomainError::InvalidExpense(format!(
                "receipt `{file_name}` must be one of: pdf, jpg, jpeg, png"
            )));
        }
        if storage_key.is_empty() {
            return Err(DomainError::InvalidExpense("receipt storage key is required".to_string()));
        }

        Ok(Self { file_name, storage_key })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub employee_id: EmployeeId,
    pub description: String,
    pub date: NaiveDate,
    pub category: ExpenseCategory,
    pub amount: Decimal,
    pub currency: String,
    pub remarks: Option<String>,
    /// Employee responsible for paying out the expense, if one has been named.
    #[serde(default)]
    pub paid_by: Option<EmployeeId>,
    pub status: ExpenseStatus,
    pub receipt: Option<ReceiptRef>,
    /// Policy captured at submission; `None` until the expense has been routed.
    pub routing: Option<RoutingPolicy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn draft(
        id: ExpenseId,
        employee_id: EmployeeId,
        fields: ExpenseFields,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            employee_id,
            description: fields.description,
            date: fields.date,
            category: fields.category,
            amount: fields.amount,
            currency: fields.currency,
            remarks: fields.remarks,
            paid_by: fields.paid_by,
            status: ExpenseStatus::Draft,
            receipt: None,
            routing: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_editable(&self) -> bool {
        self.status == ExpenseStatus::Draft
    }

    pub fn can_transition_to(&self, next: ExpenseStatus) -> bool {
        matches!(
            (self.status, next),
            (ExpenseStatus::Draft, ExpenseStatus::Pending)
                | (ExpenseStatus::Draft, ExpenseStatus::Approved)
                | (ExpenseStatus::Pending, ExpenseStatus::Approved)
                | (ExpenseStatus::Pending, ExpenseStatus::Rejected)
        )
    }

    pub fn transition_to(&mut self, next: ExpenseStatus) -> Result<(), DomainError> {
        if self.status == next {
            return Ok(());
        }
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidExpenseTransition { from: self.status, to: next })
    }

    pub fn apply_fields(&mut self, fields: ExpenseFields, now: DateTime<Utc>) {
        self.description = fields.description;
        self.date = fields.date;
        self.category = fields.category;
        self.amount = fields.amount;
        self.currency = fields.currency;
        self.remarks = fields.remarks;
        self.paid_by = fields.paid_by;
        self.updated_at = now;
    }
}

/// Raw expense payload as submitted by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpenseDraft {
    pub description: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub category: ExpenseCategory,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub remarks: Option<String>,
    #[serde(default)]
    pub paid_by: Option<EmployeeId>,
}

/// Expense fields after boundary validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseFields {
    pub description: String,
    pub date: NaiveDate,
    pub category: ExpenseCategory,
    pub amount: Decimal,
    pub currency: String,
    pub remarks: Option<String>,
    pub paid_by: Option<EmployeeId>,
}

impl ExpenseDraft {
    pub fn validate(self, default_currency: &str) -> Result<ExpenseFields, DomainError> {
        let description = self.description.trim().to_string();
        if description.is_empty() {
            return Err(DomainError::InvalidExpense("description is required".to_string()));
        }

        if self.amount <= Decimal::ZERO {
            return Err(DomainError::InvalidExpense(format!(
                "amount must be greater than zero (got {})",
                self.amount
            )));
        }
        if self.amount.normalize().scale() > 2 {
            return Err(DomainError::InvalidExpense(format!(
                "amount {} has more than two decimal places",
                self.amount
            )));
        }

        let currency = self
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(default_currency)
            .to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidExpense(format!(
                "currency `{currency}` must be a three-letter code"
            )));
        }

        let remarks =
            self.remarks.map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        let paid_by = self
            .paid_by
            .map(|payer| EmployeeId(payer.0.trim().to_string()))
            .filter(|payer| !payer.0.is_empty());

        Ok(ExpenseFields {
            description,
            date: self.date,
            category: self.category,
            amount: self.amount,
            currency,
            remarks,
            paid_by,
        })
    }
}
