pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod workflow;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{DemoSeedDataset, ScenarioSeedInfo, SeedResult, VerificationResult};
pub use workflow::{
    ApprovalQueueItem, Decision, ExpenseDashboard, ExpenseDetail, ExpenseWorkflow,
    OrganizationSummary, ReceiptUpload, StatusCounts,
};
