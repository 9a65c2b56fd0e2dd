//! Process configuration: `.env` profiles, environment variables, datasource declarations.

pub mod loader;
pub mod types;

pub use types::*;
