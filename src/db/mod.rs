mod from_row;
mod schema;
pub mod queries;

pub use schema::{configure_connection, init_db};

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::notify::Notifier;
use crate::payments::PaymentGateways;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    /// Configured provider gateways (absent providers report "not configured")
    pub gateways: PaymentGateways,
    pub notifier: Notifier,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| configure_connection(conn));
    Pool::builder().max_size(10).build(manager)
}
