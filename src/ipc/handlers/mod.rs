pub mod assessments;
pub mod auth;
pub mod core;
pub mod goals;
pub mod reports;
pub mod setup;
pub mod students;
