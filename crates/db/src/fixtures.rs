use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use sqlx::Executor;

const SEED_ORGANIZATION_ID: &str = "org-demo";

/// Directory contract the demo seed must satisfy.
const SEED_EMPLOYEES: &[SeedEmployeeContract] = &[
    SeedEmployeeContract { id: "demo-admin", role: "admin", manager_id: None },
    SeedEmployeeContract { id: "demo-mgr-sales", role: "manager", manager_id: None },
    SeedEmployeeContract { id: "demo-mgr-finance", role: "manager", manager_id: None },
    SeedEmployeeContract { id: "demo-cfo", role: "manager", manager_id: None },
    SeedEmployeeContract {
        id: "demo-emp-alice",
        role: "employee",
        manager_id: Some("demo-mgr-sales"),
    },
    SeedEmployeeContract { id: "demo-emp-bob", role: "employee", manager_id: Some("demo-mgr-sales") },
    SeedEmployeeContract {
        id: "demo-emp-carol",
        role: "employee",
        manager_id: Some("demo-mgr-finance"),
    },
];

/// Routing scenarios covered by the seeded rules.
const SEED_RULES: &[SeedRuleContract] = &[
    SeedRuleContract {
        scenario: "manager_only",
        rule_id: "rule-demo-alice",
        employee_id: "demo-emp-alice",
        manager_approval: true,
        sequential: false,
        min_approval_percentage: 100,
        approvers: &[],
        description: "Alice: the sales manager alone approves",
    },
    SeedRuleContract {
        scenario: "sequential_chain",
        rule_id: "rule-demo-bob",
        employee_id: "demo-emp-bob",
        manager_approval: true,
        sequential: true,
        min_approval_percentage: 100,
        approvers: &["demo-mgr-finance", "demo-cfo"],
        description: "Bob: manager, then finance, then CFO",
    },
    SeedRuleContract {
        scenario: "threshold",
        rule_id: "rule-demo-carol",
        employee_id: "demo-emp-carol",
        manager_approval: false,
        sequential: false,
        min_approval_percentage: 67,
        approvers: &["demo-mgr-sales", "demo-mgr-finance", "demo-cfo"],
        description: "Carol: any two of three approvers",
    },
];

/// Demo directory and approval rules.
///
/// Seeds one organization with:
/// 1. A manager-only rule
/// 2. A sequential approval chain
/// 3. A two-of-three threshold rule
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Load the demo dataset. Loading twice leaves the data unchanged.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let scenarios_seeded = SEED_RULES
            .iter()
            .map(|rule| ScenarioSeedInfo {
                scenario: rule.scenario,
                employee_id: rule.employee_id,
                description: rule.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult {
            organization_id: SEED_ORGANIZATION_ID,
            employees_seeded: SEED_EMPLOYEES.len(),
            scenarios_seeded,
        })
    }

    /// Verify that seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let organization_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organization WHERE id = ?1)")
                .bind(SEED_ORGANIZATION_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("organization", organization_exists == 1));

        for employee in SEED_EMPLOYEES {
            let employee_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM employee
                               WHERE id = ?1 AND organization_id = ?2 AND role = ?3
                                 AND manager_id IS ?4)",
            )
            .bind(employee.id)
            .bind(SEED_ORGANIZATION_ID)
            .bind(employee.role)
            .bind(employee.manager_id)
            .fetch_one(pool)
            .await?;
            checks.push((employee.id, employee_ok == 1));
        }

        for rule in SEED_RULES {
            let rule_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM approval_rule
                               WHERE id = ?1 AND employee_id = ?2 AND manager_approval = ?3
                                 AND sequential = ?4 AND min_approval_percentage = ?5)",
            )
            .bind(rule.rule_id)
            .bind(rule.employee_id)
            .bind(i64::from(rule.manager_approval))
            .bind(i64::from(rule.sequential))
            .bind(rule.min_approval_percentage)
            .fetch_one(pool)
            .await?;
            checks.push((rule.rule_id, rule_ok == 1));

            let approvers: Vec<String> = sqlx::query_scalar(
                "SELECT approver_id FROM approval_rule_approver WHERE rule_id = ?1 ORDER BY position",
            )
            .bind(rule.rule_id)
            .fetch_all(pool)
            .await?;
            checks.push((rule.approvers_label(), string_list_matches(&approvers, rule.approvers)));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove the demo organization and everything recorded against it.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "DELETE FROM audit_event
             WHERE actor IN (SELECT id FROM employee WHERE organization_id = ?1)
                OR expense_id IN (SELECT e.id FROM expense e
                                  JOIN employee emp ON emp.id = e.employee_id
                                  WHERE emp.organization_id = ?1)",
        )
        .bind(SEED_ORGANIZATION_ID)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM organization WHERE id = ?1")
            .bind(SEED_ORGANIZATION_ID)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedEmployeeContract {
    id: &'static str,
    role: &'static str,
    manager_id: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
struct SeedRuleContract {
    scenario: &'static str,
    rule_id: &'static str,
    employee_id: &'static str,
    manager_approval: bool,
    sequential: bool,
    min_approval_percentage: i64,
    approvers: &'static [&'static str],
    description: &'static str,
}

impl SeedRuleContract {
    fn approvers_label(&self) -> &'static str {
        match self.scenario {
            "manager_only" => "rule-demo-alice-approvers",
            "sequential_chain" => "rule-demo-bob-approvers",
            _ => "rule-demo-carol-approvers",
        }
    }
}

fn string_list_matches(actual: &[String], expected: &[&str]) -> bool {
    actual.len() == expected.len() && actual.iter().zip(expected).all(|(a, b)| a == b)
}

#[derive(Debug)]
pub struct SeedResult {
    pub organization_id: &'static str,
    pub employees_seeded: usize,
    pub scenarios_seeded: Vec<ScenarioSeedInfo>,
}

#[derive(Debug)]
pub struct ScenarioSeedInfo {
    pub scenario: &'static str,
    pub employee_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
