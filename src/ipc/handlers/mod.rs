pub mod catalog;
pub mod consistency;
pub mod core;
pub mod grading;
pub mod reports;
pub mod results;
pub mod setup;
pub mod students;
