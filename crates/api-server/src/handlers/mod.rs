//! Request handlers.

pub mod follows;
pub mod health;
pub mod queries;
pub mod trading;
