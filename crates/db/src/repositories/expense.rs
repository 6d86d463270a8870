use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use expensa_core::domain::employee::{EmployeeId, OrganizationId};
use expensa_core::domain::expense::{
    Expense, ExpenseCategory, ExpenseId, ExpenseStatus, ReceiptRef,
};
use expensa_core::domain::rule::{ApprovalRuleId, ApprovalThreshold, RoutingPolicy, RoutingSource};

use super::{decode_error, parse_bool_flag, parse_timestamp, RepositoryError};

const EXPENSE_COLUMNS: &str = "id, employee_id, description, expense_date, category, amount, \
     currency, remarks, paid_by, status, receipt_file_name, receipt_storage_key, routing_source, \
     routing_rule_id, routing_min_approval_percentage, routing_sequential, created_at, updated_at";

pub async fn find_expense(
    conn: &mut SqliteConnection,
    id: &ExpenseId,
) -> Result<Option<Expense>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expense WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(expense_from_row).transpose()
}

/// Newest first.
pub async fn list_expenses_for_employee(
    conn: &mut SqliteConnection,
    employee_id: &EmployeeId,
) -> Result<Vec<Expense>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {EXPENSE_COLUMNS} FROM expense WHERE employee_id = ?
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(&employee_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(expense_from_row).collect()
}

pub async fn save_expense(
    conn: &mut SqliteConnection,
    expense: &Expense,
) -> Result<(), RepositoryError> {
    let routing = RoutingColumns::from(expense.routing.as_ref());

    sqlx::query(
        "INSERT INTO expense (id, employee_id, description, expense_date, category, amount,
                              currency, remarks, paid_by, status, receipt_file_name,
                              receipt_storage_key, routing_source, routing_rule_id,
                              routing_min_approval_percentage, routing_sequential, created_at,
                              updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             description = excluded.description,
             expense_date = excluded.expense_date,
             category = excluded.category,
             amount = excluded.amount,
             currency = excluded.currency,
             remarks = excluded.remarks,
             paid_by = excluded.paid_by,
             status = excluded.status,
             receipt_file_name = excluded.receipt_file_name,
             receipt_storage_key = excluded.receipt_storage_key,
             routing_source = excluded.routing_source,
             routing_rule_id = excluded.routing_rule_id,
             routing_min_approval_percentage = excluded.routing_min_approval_percentage,
             routing_sequential = excluded.routing_sequential,
             updated_at = excluded.updated_at",
    )
    .bind(&expense.id.0)
    .bind(&expense.employee_id.0)
    .bind(&expense.description)
    .bind(expense.date.to_string())
    .bind(expense.category.as_str())
    .bind(expense.amount.to_string())
    .bind(&expense.currency)
    .bind(expense.remarks.as_deref())
    .bind(expense.paid_by.as_ref().map(|payer| payer.0.as_str()))
    .bind(expense.status.as_str())
    .bind(expense.receipt.as_ref().map(|receipt| receipt.file_name.as_str()))
    .bind(expense.receipt.as_ref().map(|receipt| receipt.storage_key.as_str()))
    .bind(routing.source)
    .bind(routing.rule_id)
    .bind(routing.min_approval_percentage)
    .bind(routing.sequential)
    .bind(expense.created_at.to_rfc3339())
    .bind(expense.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Moves a draft to its submitted status and stores the routing snapshot.
///
/// Returns `false` when the expense was no longer a draft, in which case nothing changed.
pub async fn mark_submitted(
    conn: &mut SqliteConnection,
    expense: &Expense,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let routing = RoutingColumns::from(expense.routing.as_ref());

    let result = sqlx::query(
        "UPDATE expense
         SET status = ?, routing_source = ?, routing_rule_id = ?,
             routing_min_approval_percentage = ?, routing_sequential = ?, updated_at = ?
         WHERE id = ? AND status = 'draft'",
    )
    .bind(expense.status.as_str())
    .bind(routing.source)
    .bind(routing.rule_id)
    .bind(routing.min_approval_percentage)
    .bind(routing.sequential)
    .bind(now.to_rfc3339())
    .bind(&expense.id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Compare-and-set on the expense status. Returns `false` if the current status was not `from`.
pub async fn update_status(
    conn: &mut SqliteConnection,
    id: &ExpenseId,
    from: ExpenseStatus,
    to: ExpenseStatus,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result =
        sqlx::query("UPDATE expense SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .bind(from.as_str())
            .execute(&mut *conn)
            .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn count_expenses_for_organization(
    conn: &mut SqliteConnection,
    organization_id: &OrganizationId,
) -> Result<i64, RepositoryError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM expense
         JOIN employee ON employee.id = expense.employee_id
         WHERE employee.organization_id = ?",
    )
    .bind(&organization_id.0)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

struct RoutingColumns<'a> {
    source: Option<&'static str>,
    rule_id: Option<&'a str>,
    min_approval_percentage: Option<i64>,
    sequential: Option<i64>,
}

impl<'a> From<Option<&'a RoutingPolicy>> for RoutingColumns<'a> {
    fn from(routing: Option<&'a RoutingPolicy>) -> Self {
        match routing {
            Some(routing) => Self {
                source: Some(routing.source.as_str()),
                rule_id: match &routing.source {
                    RoutingSource::Rule { rule_id } => Some(rule_id.0.as_str()),
                    _ => None,
                },
                min_approval_percentage: Some(i64::from(routing.min_approval_percentage.percentage())),
                sequential: Some(i64::from(routing.sequential)),
            },
            None => Self { source: None, rule_id: None, min_approval_percentage: None, sequential: None },
        }
    }
}

fn routing_from_row(row: &SqliteRow) -> Result<Option<RoutingPolicy>, RepositoryError> {
    let source: Option<String> = row.try_get("routing_source")?;
    let Some(source) = source else {
        return Ok(None);
    };

    let source = match source.as_str() {
        "rule" => {
            let rule_id: Option<String> = row.try_get("routing_rule_id")?;
            let rule_id = rule_id.ok_or_else(|| decode_error("routing_rule_id", "NULL"))?;
            RoutingSource::Rule { rule_id: ApprovalRuleId(rule_id) }
        }
        "directory_manager" => RoutingSource::DirectoryManager,
        "no_approvers" => RoutingSource::NoApprovers,
        other => return Err(decode_error("routing_source", other)),
    };

    let percentage: Option<i64> = row.try_get("routing_min_approval_percentage")?;
    let percentage = percentage.unwrap_or(i64::from(ApprovalThreshold::UNANIMOUS.percentage()));
    let min_approval_percentage = ApprovalThreshold::new(percentage)
        .ok_or_else(|| decode_error("routing_min_approval_percentage", &percentage.to_string()))?;
    let sequential: Option<i64> = row.try_get("routing_sequential")?;

    Ok(Some(RoutingPolicy {
        source,
        min_approval_percentage,
        sequential: parse_bool_flag("routing_sequential", sequential.unwrap_or(0))?,
    }))
}

fn expense_from_row(row: &SqliteRow) -> Result<Expense, RepositoryError> {
    let date: String = row.try_get("expense_date")?;
    let category: String = row.try_get("category")?;
    let amount: String = row.try_get("amount")?;
    let status: String = row.try_get("status")?;
    let receipt_file_name: Option<String> = row.try_get("receipt_file_name")?;
    let receipt_storage_key: Option<String> = row.try_get("receipt_storage_key")?;
    let paid_by: Option<String> = row.try_get("paid_by")?;

    let receipt = match (receipt_file_name, receipt_storage_key) {
        (Some(file_name), Some(storage_key)) => Some(ReceiptRef { file_name, storage_key }),
        _ => None,
    };

    Ok(Expense {
        id: ExpenseId(row.try_get("id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        description: row.try_get("description")?,
        date: NaiveDate::from_str(&date).map_err(|_| decode_error("expense_date", &date))?,
        category: ExpenseCategory::parse(&category)
            .ok_or_else(|| decode_error("category", &category))?,
        amount: Decimal::from_str(&amount).map_err(|_| decode_error("amount", &amount))?,
        currency: row.try_get("currency")?,
        remarks: row.try_get("remarks")?,
        paid_by: paid_by.map(EmployeeId),
        status: ExpenseStatus::parse(&status).ok_or_else(|| decode_error("status", &status))?,
        receipt,
        routing: routing_from_row(row)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
