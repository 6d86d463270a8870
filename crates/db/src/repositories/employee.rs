use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use expensa_core::domain::employee::{Employee, EmployeeId, Organization, OrganizationId, Role};

use super::{decode_error, parse_timestamp, EmployeeRepository, OrganizationRepository, RepositoryError};
use crate::DbPool;

pub async fn find_organization(
    conn: &mut SqliteConnection,
    id: &OrganizationId,
) -> Result<Option<Organization>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, name, country, currency, created_at FROM organization WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(organization_from_row).transpose()
}

pub async fn save_organization(
    conn: &mut SqliteConnection,
    organization: &Organization,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO organization (id, name, country, currency, created_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             country = excluded.country,
             currency = excluded.currency",
    )
    .bind(&organization.id.0)
    .bind(&organization.name)
    .bind(&organization.country)
    .bind(&organization.currency)
    .bind(organization.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

const EMPLOYEE_COLUMNS: &str =
    "id, organization_id, name, email, role, manager_id, created_at, updated_at";

pub async fn find_employee(
    conn: &mut SqliteConnection,
    id: &EmployeeId,
) -> Result<Option<Employee>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(employee_from_row).transpose()
}

/// Loads every listed employee that exists, in no particular order.
pub async fn find_employees(
    conn: &mut SqliteConnection,
    ids: &[EmployeeId],
) -> Result<Vec<Employee>, RepositoryError> {
    let mut employees = Vec::with_capacity(ids.len());
    for id in ids {
        if employees.iter().any(|employee: &Employee| &employee.id == id) {
            continue;
        }
        if let Some(employee) = find_employee(conn, id).await? {
            employees.push(employee);
        }
    }
    Ok(employees)
}

pub async fn list_employees(
    conn: &mut SqliteConnection,
    organization_id: &OrganizationId,
) -> Result<Vec<Employee>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE organization_id = ? ORDER BY name, id"
    ))
    .bind(&organization_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(employee_from_row).collect()
}

pub async fn save_employee(
    conn: &mut SqliteConnection,
    employee: &Employee,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO employee (id, organization_id, name, email, role, manager_id,
                               created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             organization_id = excluded.organization_id,
             name = excluded.name,
             email = excluded.email,
             role = excluded.role,
             manager_id = excluded.manager_id,
             updated_at = excluded.updated_at",
    )
    .bind(&employee.id.0)
    .bind(&employee.organization_id.0)
    .bind(&employee.name)
    .bind(&employee.email)
    .bind(employee.role.as_str())
    .bind(employee.manager_id.as_ref().map(|id| id.0.as_str()))
    .bind(employee.created_at.to_rfc3339())
    .bind(employee.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn count_employees_by_role(
    conn: &mut SqliteConnection,
    organization_id: &OrganizationId,
    role: Role,
) -> Result<i64, RepositoryError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM employee WHERE organization_id = ? AND role = ?",
    )
    .bind(&organization_id.0)
    .bind(role.as_str())
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

fn organization_from_row(row: &SqliteRow) -> Result<Organization, RepositoryError> {
    Ok(Organization {
        id: OrganizationId(row.try_get("id")?),
        name: row.try_get("name")?,
        country: row.try_get("country")?,
        currency: row.try_get("currency")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn employee_from_row(row: &SqliteRow) -> Result<Employee, RepositoryError> {
    let role: String = row.try_get("role")?;
    let manager_id: Option<String> = row.try_get("manager_id")?;

    Ok(Employee {
        id: EmployeeId(row.try_get("id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: Role::parse(&role).ok_or_else(|| decode_error("role", &role))?,
        manager_id: manager_id.map(EmployeeId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub struct SqlOrganizationRepository {
    pool: DbPool,
}

impl SqlOrganizationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepository for SqlOrganizationRepository {
    async fn find_by_id(
        &self,
        id: &OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_organization(&mut conn, id).await
    }

    async fn save(&self, organization: Organization) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        save_organization(&mut conn, &organization).await
    }
}

pub struct SqlEmployeeRepository {
    pool: DbPool,
}

impl SqlEmployeeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmployeeRepository for SqlEmployeeRepository {
    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_employee(&mut conn, id).await
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        save_employee(&mut conn, &employee).await
    }

    async fn list_for_organization(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<Employee>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        list_employees(&mut conn, organization_id).await
    }
}
