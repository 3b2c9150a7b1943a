//! Database connection pool, migrations, and health check.
//!
//! Events and tasks are stored as JSON documents next to the columns used
//! for lookups. Every write touches a single row, so SQLite's row-level
//! atomicity is all the store relies on.

pub mod events;
pub mod tasks;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::event::BusinessEvent;

pub use events::CreateResult;
pub use tasks::InsertResult;

/// Capacity of the pending-event broadcast channel. Slow subscribers lag and
/// skip ahead; the store stays authoritative.
const PENDING_CHANNEL_CAPACITY: usize = 256;

/// Database handle. Owns the connection pool and the pending-event channel.
pub struct Db {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    pending: broadcast::Sender<BusinessEvent>,
}

impl Db {
    /// Connect to a SQLite database, creating the file if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// A private in-memory database on one pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        let (pending, _) = broadcast::channel(PENDING_CHANNEL_CAPACITY);
        Self {
            pool,
            clock: Arc::new(SystemClock),
            pending,
        }
    }

    /// Replace the time source used for event and task timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Receive every event as it is persisted at pending.
    ///
    /// Wake-up only: delivery is at-least-once per subscriber and carries no
    /// ordering guarantee across modules.
    pub fn subscribe_pending(&self) -> broadcast::Receiver<BusinessEvent> {
        self.pending.subscribe()
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Offset pagination for newest-first listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn first(limit: u32) -> Self {
        Self { limit, offset: 0 }
    }

    pub fn next(self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset + self.limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

/// Fixed-width UTC timestamp, so text order matches time order.
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
