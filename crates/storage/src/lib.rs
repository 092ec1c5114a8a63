//! Relational persistence for the conversation engine.
//!
//! One SQLite pool backs every store. Repository functions take an explicit
//! `&mut SqliteConnection` executor, so a call site running inside
//! [`Db::with_tx`] automatically joins that transaction, while a call site
//! holding a plain pool connection runs standalone. Nested `with_tx` is not
//! supported.

pub mod conversations;
pub mod error;
pub mod messages;
pub mod participants;
pub mod types;
pub mod users;

pub use {
    error::{Error, Result},
    types::{Conversation, Message, Participant, User},
};

use {
    futures::future::BoxFuture,
    sqlx::{
        SqliteConnection, SqlitePool,
        pool::PoolConnection,
        sqlite::{Sqlite, SqlitePoolOptions},
    },
};

/// Run database migrations for the relational stores.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

/// Shared database handle: connection pool plus the ambient transaction
/// scope.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Connect with a fresh pool and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check out a connection for non-transactional repository calls.
    pub async fn acquire(&self) -> std::result::Result<PoolConnection<Sqlite>, sqlx::Error> {
        self.pool.acquire().await
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// The closure error propagates unchanged after rollback. Callers must
    /// not nest `with_tx`.
    pub async fn with_tx<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, std::result::Result<T, E>>
            + Send,
        E: From<sqlx::Error> + Send,
        T: Send,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            },
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "transaction rollback failed");
                }
                Err(e)
            },
        }
    }
}


#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::{test_support::make_db, *};

    #[tokio::test]
    async fn with_tx_commits_on_ok() {
        let db = make_db().await;
        db.with_tx::<_, Error, _>(|conn| {
            Box::pin(async move {
                users::create(conn, "+15550001", chrono::Utc::now()).await?;
                Ok(())
            })
        })
        .await
        .unwrap();

        let mut conn = db.acquire().await.unwrap();
        assert!(users::get(&mut conn, "+15550001").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn with_tx_rolls_back_on_err() {
        let db = make_db().await;
        let result = db
            .with_tx::<(), Error, _>(|conn| {
                Box::pin(async move {
                    users::create(conn, "+15550002", chrono::Utc::now()).await?;
                    Err(Error::message("abort"))
                })
            })
            .await;
        assert!(result.is_err());

        let mut conn = db.acquire().await.unwrap();
        assert!(users::get(&mut conn, "+15550002").await.unwrap().is_none());
    }
}
