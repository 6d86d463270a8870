use std::sync::Arc;

use crate::commands::CommandResult;
use expensa_core::config::{AppConfig, LoadOptions};
use expensa_core::domain::employee::OrganizationId;
use expensa_core::notify::NoopNotificationSender;
use expensa_db::repositories::{EmployeeRepository, SqlEmployeeRepository};
use expensa_db::{connect_with_settings, migrations, DemoSeedDataset, ExpenseWorkflow};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        // Accounts without an explicit rule get the provisioning default; admins get none.
        let workflow = ExpenseWorkflow::new(
            pool.clone(),
            Arc::new(NoopNotificationSender),
            config.approvals.clone(),
        );
        let employees = SqlEmployeeRepository::new(pool.clone())
            .list_for_organization(&OrganizationId(seed_result.organization_id.to_string()))
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let mut rules_in_place = 0usize;
        for employee in &employees {
            if workflow
                .provision_default_rule(employee)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?
                .is_some()
            {
                rules_in_place += 1;
            }
        }

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedOutput, (&'static str, String, u8)> =
            if !verification.all_present {
                Err(("seed_verification", verification_failure_message(&verification.checks), 6u8))
            } else {
                Ok(SeedOutput {
                    organization_id: seed_result.organization_id,
                    employees: seed_result.employees_seeded,
                    rules: rules_in_place,
                    scenarios: seed_result.scenarios_seeded,
                })
            };

        pool.close().await;
        run_result
    });

    match result {
        Ok(output) => {
            let scenario_lines: Vec<String> = output
                .scenarios
                .iter()
                .map(|s| format!("  - {}: {} ({})", s.scenario, s.employee_id, s.description))
                .collect();
            let message = format!(
                "demo dataset `{}` loaded: {} employees, {} approval rules\n{}",
                output.organization_id,
                output.employees,
                output.rules,
                scenario_lines.join("\n")
            );
            CommandResult::success("seed", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

struct SeedOutput {
    organization_id: &'static str,
    employees: usize,
    rules: usize,
    scenarios: Vec<expensa_db::ScenarioSeedInfo>,
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
