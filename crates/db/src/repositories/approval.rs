use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use expensa_core::domain::approval::{ApprovalRecord, ApprovalRecordId, ApprovalStatus};
use expensa_core::domain::employee::{EmployeeId, OrganizationId};
use expensa_core::domain::expense::ExpenseId;

use super::{decode_error, parse_optional_timestamp, parse_timestamp, RepositoryError};

const RECORD_COLUMNS: &str = "approval_record.id, approval_record.expense_id, \
     approval_record.approver_id, approval_record.status, approval_record.sequence, \
     approval_record.remarks, approval_record.decided_at, approval_record.created_at, \
     approval_record.updated_at";

pub async fn insert_records(
    conn: &mut SqliteConnection,
    records: &[ApprovalRecord],
) -> Result<(), RepositoryError> {
    for record in records {
        sqlx::query(
            "INSERT INTO approval_record (id, expense_id, approver_id, status, sequence, remarks,
                                          decided_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.expense_id.0)
        .bind(&record.approver_id.0)
        .bind(record.status.as_str())
        .bind(record.sequence.map(i64::from))
        .bind(record.remarks.as_deref())
        .bind(record.decided_at.map(|value| value.to_rfc3339()))
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Chain order: sequence first, then creation order.
pub async fn list_records_for_expense(
    conn: &mut SqliteConnection,
    expense_id: &ExpenseId,
) -> Result<Vec<ApprovalRecord>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM approval_record
         WHERE expense_id = ?
         ORDER BY sequence IS NULL, sequence, created_at, rowid"
    ))
    .bind(&expense_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(record_from_row).collect()
}

/// Records still awaiting this approver on expenses that are themselves pending.
pub async fn list_open_records_for_approver(
    conn: &mut SqliteConnection,
    approver_id: &EmployeeId,
) -> Result<Vec<ApprovalRecord>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM approval_record
         JOIN expense ON expense.id = approval_record.expense_id
         WHERE approval_record.approver_id = ?
           AND approval_record.status = 'pending'
           AND expense.status = 'pending'
         ORDER BY approval_record.created_at, approval_record.rowid"
    ))
    .bind(&approver_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(record_from_row).collect()
}

/// Records this approver already decided, most recent decision first.
pub async fn list_decided_records_for_approver(
    conn: &mut SqliteConnection,
    approver_id: &EmployeeId,
) -> Result<Vec<ApprovalRecord>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM approval_record
         WHERE approver_id = ? AND status != 'pending'
         ORDER BY decided_at DESC, rowid DESC"
    ))
    .bind(&approver_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(record_from_row).collect()
}

/// Writes a decision only if the record is still pending; returns whether it was applied.
pub async fn record_decision(
    conn: &mut SqliteConnection,
    id: &ApprovalRecordId,
    outcome: ApprovalStatus,
    remarks: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_record
         SET status = ?, remarks = ?, decided_at = ?, updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(outcome.as_str())
    .bind(remarks)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(&id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn count_open_records_for_organization(
    conn: &mut SqliteConnection,
    organization_id: &OrganizationId,
) -> Result<i64, RepositoryError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM approval_record
         JOIN expense ON expense.id = approval_record.expense_id
         JOIN employee ON employee.id = expense.employee_id
         WHERE employee.organization_id = ?
           AND approval_record.status = 'pending'
           AND expense.status = 'pending'",
    )
    .bind(&organization_id.0)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

fn record_from_row(row: &SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let status: String = row.try_get("status")?;
    let sequence: Option<i64> = row.try_get("sequence")?;
    let sequence = sequence
        .map(|value| u32::try_from(value).map_err(|_| decode_error("sequence", &value.to_string())))
        .transpose()?;

    Ok(ApprovalRecord {
        id: ApprovalRecordId(row.try_get("id")?),
        expense_id: ExpenseId(row.try_get("expense_id")?),
        approver_id: EmployeeId(row.try_get("approver_id")?),
        status: ApprovalStatus::parse(&status).ok_or_else(|| decode_error("status", &status))?,
        sequence,
        remarks: row.try_get("remarks")?,
        decided_at: parse_optional_timestamp("decided_at", row.try_get("decided_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use expensa_core::domain::approval::{ApprovalRecord, ApprovalStatus};
    use expensa_core::domain::employee::{
        Employee, EmployeeId, Organization, OrganizationId, Role,
    };
    use expensa_core::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};

    use super::{
        insert_records, list_open_records_for_approver, list_records_for_expense, record_decision,
    };
    use crate::repositories::employee::{save_employee, save_organization};
    use crate::repositories::expense::save_expense;
    use crate::{connect_with_settings, migrations, DbPool};

    fn id(raw: &str) -> EmployeeId {
        EmployeeId(raw.to_string())
    }

    async fn setup(expense_status: ExpenseStatus) -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let now = Utc::now();
        let mut conn = pool.acquire().await.expect("acquire");
        save_organization(
            &mut conn,
            &Organization {
                id: OrganizationId("org-1".to_string()),
                name: "Acme".to_string(),
                country: "US".to_string(),
                currency: "USD".to_string(),
                created_at: now,
            },
        )
        .await
        .expect("org");
        for raw in ["emp", "a", "b"] {
            save_employee(
                &mut conn,
                &Employee {
                    id: id(raw),
                    organization_id: OrganizationId("org-1".to_string()),
                    name: raw.to_string(),
                    email: format!("{raw}@acme.test"),
                    role: Role::Employee,
                    manager_id: None,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await
            .expect("employee");
        }
        save_expense(
            &mut conn,
            &Expense {
                id: ExpenseId("EXP-1".to_string()),
                employee_id: id("emp"),
                description: "Flight".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 2, 2).expect("valid date"),
                category: ExpenseCategory::Travel,
                amount: Decimal::new(35_000, 2),
                currency: "USD".to_string(),
                remarks: None,
                paid_by: None,
                status: expense_status,
                receipt: None,
                routing: None,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .expect("expense");
        drop(conn);
        pool
    }

    fn records() -> Vec<ApprovalRecord> {
        let now = Utc::now();
        vec![
            ApprovalRecord::pending(ExpenseId("EXP-1".to_string()), id("b"), Some(1), now),
            ApprovalRecord::pending(ExpenseId("EXP-1".to_string()), id("a"), Some(0), now),
        ]
    }

    #[tokio::test]
    async fn records_are_listed_in_chain_order() {
        let pool = setup(ExpenseStatus::Pending).await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_records(&mut conn, &records()).await.expect("insert");

        let listed = list_records_for_expense(&mut conn, &ExpenseId("EXP-1".to_string()))
            .await
            .expect("list");
        let approvers = listed.iter().map(|record| record.approver_id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(approvers, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_approver_on_same_expense_is_rejected() {
        let pool = setup(ExpenseStatus::Pending).await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_records(&mut conn, &records()).await.expect("insert");

        let duplicate = vec![ApprovalRecord::pending(
            ExpenseId("EXP-1".to_string()),
            id("a"),
            None,
            Utc::now(),
        )];
        assert!(insert_records(&mut conn, &duplicate).await.is_err());
    }

    #[tokio::test]
    async fn decision_is_written_exactly_once() {
        let pool = setup(ExpenseStatus::Pending).await;
        let mut conn = pool.acquire().await.expect("acquire");
        let records = records();
        insert_records(&mut conn, &records).await.expect("insert");

        let target = &records[1].id;
        assert!(record_decision(&mut conn, target, ApprovalStatus::Approved, Some("ok"), Utc::now())
            .await
            .expect("first decision"));
        assert!(!record_decision(&mut conn, target, ApprovalStatus::Rejected, None, Utc::now())
            .await
            .expect("second decision"));

        let listed = list_records_for_expense(&mut conn, &ExpenseId("EXP-1".to_string()))
            .await
            .expect("list");
        let decided = listed.iter().find(|record| record.id == *target).expect("decided record");
        assert_eq!(decided.status, ApprovalStatus::Approved);
        assert_eq!(decided.remarks.as_deref(), Some("ok"));
        assert!(decided.decided_at.is_some());
    }

    #[tokio::test]
    async fn open_records_skip_resolved_expenses() {
        let pool = setup(ExpenseStatus::Rejected).await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_records(&mut conn, &records()).await.expect("insert");

        let open = list_open_records_for_approver(&mut conn, &id("a")).await.expect("list");
        assert!(open.is_empty());
    }
}
