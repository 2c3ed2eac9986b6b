pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use db::{create_pool, run_migrations};
pub use error::{BillingError, Result, ValidationFailure};
pub use service::{BillCalculator, BulkEditSession, CommitPolicy, MemoryBillStore, PgBillStore};
