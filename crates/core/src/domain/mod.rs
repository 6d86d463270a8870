pub mod approval;
pub mod employee;
pub mod expense;
pub mod rule;
