use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use expensa_core::audit::{AuditCategory, AuditEvent};
use expensa_core::domain::employee::EmployeeId;
use expensa_core::domain::expense::ExpenseId;

use super::{decode_error, parse_timestamp, RepositoryError};

pub async fn append_event(
    conn: &mut SqliteConnection,
    event: &AuditEvent,
) -> Result<(), RepositoryError> {
    let metadata_json = serde_json::to_string(&event.metadata)
        .map_err(|error| RepositoryError::Decode(format!("encode audit metadata: {error}")))?;

    sqlx::query(
        "INSERT INTO audit_event (id, expense_id, event_type, category, actor, metadata_json,
                                  occurred_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.expense_id.as_ref().map(|id| id.0.as_str()))
    .bind(&event.event_type)
    .bind(event.category.as_str())
    .bind(&event.actor.0)
    .bind(metadata_json)
    .bind(event.occurred_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn list_events_for_expense(
    conn: &mut SqliteConnection,
    expense_id: &ExpenseId,
) -> Result<Vec<AuditEvent>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, expense_id, event_type, category, actor, metadata_json, occurred_at
         FROM audit_event WHERE expense_id = ?
         ORDER BY occurred_at, rowid",
    )
    .bind(&expense_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(event_from_row).collect()
}

fn event_from_row(row: &SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category: String = row.try_get("category")?;
    let expense_id: Option<String> = row.try_get("expense_id")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let metadata = serde_json::from_str::<BTreeMap<String, String>>(&metadata_json)
        .map_err(|_| decode_error("metadata_json", &metadata_json))?;

    Ok(AuditEvent {
        event_id: row.try_get("id")?,
        expense_id: expense_id.map(ExpenseId),
        event_type: row.try_get("event_type")?,
        category: AuditCategory::parse(&category)
            .ok_or_else(|| decode_error("category", &category))?,
        actor: EmployeeId(row.try_get("actor")?),
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
