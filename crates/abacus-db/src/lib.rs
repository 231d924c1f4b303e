//! Persistence layer for the abacus orchestrator: PostgreSQL pool
//! management, migrations, row models, and the [`Store`] contract the
//! scheduling core is written against.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
pub mod store;

pub use store::{PgStore, Store, StoreError};
