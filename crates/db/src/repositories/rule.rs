use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use expensa_core::domain::employee::{EmployeeId, OrganizationId};
use expensa_core::domain::rule::{ApprovalRule, ApprovalRuleId, ApprovalThreshold};

use super::{decode_error, parse_bool_flag, parse_timestamp, RepositoryError};

const RULE_COLUMNS: &str = "approval_rule.id, approval_rule.employee_id, approval_rule.description, \
     approval_rule.manager_id, approval_rule.manager_approval, approval_rule.sequential, \
     approval_rule.min_approval_percentage, approval_rule.created_at, approval_rule.updated_at";

pub async fn find_rule(
    conn: &mut SqliteConnection,
    id: &ApprovalRuleId,
) -> Result<Option<ApprovalRule>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rule WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(ref row) => Ok(Some(load_rule(conn, row).await?)),
        None => Ok(None),
    }
}

pub async fn find_rule_for_employee(
    conn: &mut SqliteConnection,
    employee_id: &EmployeeId,
) -> Result<Option<ApprovalRule>, RepositoryError> {
    let row =
        sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rule WHERE employee_id = ?"))
            .bind(&employee_id.0)
            .fetch_optional(&mut *conn)
            .await?;

    match row {
        Some(ref row) => Ok(Some(load_rule(conn, row).await?)),
        None => Ok(None),
    }
}

pub async fn list_rules_for_organization(
    conn: &mut SqliteConnection,
    organization_id: &OrganizationId,
) -> Result<Vec<ApprovalRule>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {RULE_COLUMNS} FROM approval_rule
         JOIN employee ON employee.id = approval_rule.employee_id
         WHERE employee.organization_id = ?
         ORDER BY approval_rule.created_at, approval_rule.id"
    ))
    .bind(&organization_id.0)
    .fetch_all(&mut *conn)
    .await?;

    let mut rules = Vec::with_capacity(rows.len());
    for row in &rows {
        rules.push(load_rule(conn, row).await?);
    }
    Ok(rules)
}

/// Upserts the rule row and replaces its approver set. Run inside a transaction.
pub async fn save_rule(
    conn: &mut SqliteConnection,
    rule: &ApprovalRule,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_rule (id, employee_id, description, manager_id, manager_approval,
                                    sequential, min_approval_percentage, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(employee_id) DO UPDATE SET
             description = excluded.description,
             manager_id = excluded.manager_id,
             manager_approval = excluded.manager_approval,
             sequential = excluded.sequential,
             min_approval_percentage = excluded.min_approval_percentage,
             updated_at = excluded.updated_at",
    )
    .bind(&rule.id.0)
    .bind(&rule.employee_id.0)
    .bind(&rule.description)
    .bind(rule.manager_id.as_ref().map(|id| id.0.as_str()))
    .bind(i64::from(rule.manager_approval))
    .bind(i64::from(rule.sequential))
    .bind(i64::from(rule.min_approval_percentage.percentage()))
    .bind(rule.created_at.to_rfc3339())
    .bind(rule.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    let stored_id = sqlx::query_scalar::<_, String>(
        "SELECT id FROM approval_rule WHERE employee_id = ?",
    )
    .bind(&rule.employee_id.0)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM approval_rule_approver WHERE rule_id = ?")
        .bind(&stored_id)
        .execute(&mut *conn)
        .await?;

    for (position, approver_id) in rule.approvers.iter().enumerate() {
        sqlx::query(
            "INSERT INTO approval_rule_approver (rule_id, approver_id, position) VALUES (?, ?, ?)",
        )
        .bind(&stored_id)
        .bind(&approver_id.0)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn delete_rule(
    conn: &mut SqliteConnection,
    id: &ApprovalRuleId,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query("DELETE FROM approval_rule WHERE id = ?")
        .bind(&id.0)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_rules_for_organization(
    conn: &mut SqliteConnection,
    organization_id: &OrganizationId,
) -> Result<i64, RepositoryError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM approval_rule
         JOIN employee ON employee.id = approval_rule.employee_id
         WHERE employee.organization_id = ?",
    )
    .bind(&organization_id.0)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

async fn load_rule(
    conn: &mut SqliteConnection,
    row: &SqliteRow,
) -> Result<ApprovalRule, RepositoryError> {
    let id: String = row.try_get("id")?;
    let manager_id: Option<String> = row.try_get("manager_id")?;
    let percentage: i64 = row.try_get("min_approval_percentage")?;

    let approvers = sqlx::query_scalar::<_, String>(
        "SELECT approver_id FROM approval_rule_approver WHERE rule_id = ? ORDER BY position",
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(EmployeeId)
    .collect();

    Ok(ApprovalRule {
        id: ApprovalRuleId(id),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        description: row.try_get("description")?,
        manager_id: manager_id.map(EmployeeId),
        manager_approval: parse_bool_flag("manager_approval", row.try_get("manager_approval")?)?,
        approvers,
        sequential: parse_bool_flag("sequential", row.try_get("sequential")?)?,
        min_approval_percentage: ApprovalThreshold::new(percentage)
            .ok_or_else(|| decode_error("min_approval_percentage", &percentage.to_string()))?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
