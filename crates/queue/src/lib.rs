//! Durable conversation stream queue.
//!
//! The only channel through which accepted-but-uncommitted messages survive
//! a crash of the accepting task. Backed by the shared SQLite pool; see
//! [`stream::StreamQueue`] for the delivery contract.

pub mod error;
pub mod stream;

pub use {
    error::{Error, Result},
    stream::{StreamHandler, StreamQueue},
};

/// Run database migrations for the stream queue tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
