//! Checkpoint Store
//!
//! This crate persists `(client, stream, shard) → sequence number` rows in a
//! relational store so a restarted archiver resumes exactly after the last
//! durably archived record.
//!
//! ## Schema
//!
//! On first use the store creates its table with idempotent DDL:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS triton_checkpoint (
//!     client  VARCHAR(255) NOT NULL,
//!     stream  VARCHAR(255) NOT NULL,
//!     shard   VARCHAR(255) NOT NULL,
//!     seq_num VARCHAR(255) NOT NULL,
//!     updated INTEGER      NOT NULL,
//!     PRIMARY KEY (client, stream, shard))
//! ```
//!
//! ## Drivers
//!
//! The database URL's scheme chooses the driver: `sqlite://` for an embedded
//! file (or `sqlite::memory:` in tests) and `postgres://` for a server.
//! Both go through the `sqlx` `Any` driver, with a single-connection pool
//! for sqlite because the embedded database has one writer.
//!
//! ## Write Protocol
//!
//! `checkpoint` runs SELECT-then-UPDATE-or-INSERT inside one transaction.
//! An UPDATE that affects zero rows after a positive SELECT violates the
//! store's invariant and rolls the transaction back. Re-checkpointing an
//! unchanged sequence number is an ordinary update.
//!
//! ## Usage
//!
//! ```ignore
//! let cp = Checkpointer::connect("archiver", "courier_activity", "sqlite://triton.db").await?;
//! cp.checkpoint(&shard, &seq).await?;
//! let resume = cp.last_sequence_number(&shard).await?; // empty when absent
//! ```

pub mod error;

use std::collections::HashMap;
use std::sync::Once;

use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::debug;
use triton_core::{SequenceNumber, ShardId};

pub use error::{Error, Result};

/// Idempotent checkpoint table DDL.
pub const CREATE_TABLE_STMT: &str = "\
CREATE TABLE IF NOT EXISTS triton_checkpoint (
    client  VARCHAR(255) NOT NULL,
    stream  VARCHAR(255) NOT NULL,
    shard   VARCHAR(255) NOT NULL,
    seq_num VARCHAR(255) NOT NULL,
    updated INTEGER      NOT NULL,
    PRIMARY KEY (client, stream, shard))";

/// Open a pool for the given database URL and ensure the table exists.
///
/// The URL scheme picks the driver. Sqlite pools are limited to one
/// connection; `sqlite::memory:` in particular is per-connection state.
pub async fn connect_pool(database_url: &str) -> Result<AnyPool> {
    static INSTALL_DRIVERS: Once = Once::new();
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

    let max_connections = if database_url.starts_with("sqlite") {
        1
    } else {
        5
    };

    let pool = AnyPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::query(CREATE_TABLE_STMT).execute(&pool).await?;

    Ok(pool)
}

/// Persists resume positions for one `(client, stream)` pair.
pub struct Checkpointer {
    client_name: String,
    stream_name: String,
    pool: AnyPool,
}

impl Checkpointer {
    /// Connect to the checkpoint database and ensure the schema exists.
    pub async fn connect(
        client_name: impl Into<String>,
        stream_name: impl Into<String>,
        database_url: &str,
    ) -> Result<Self> {
        let pool = connect_pool(database_url).await?;
        Ok(Self::from_pool(client_name, stream_name, pool))
    }

    /// Build a checkpointer over an existing pool (the table must exist).
    pub fn from_pool(
        client_name: impl Into<String>,
        stream_name: impl Into<String>,
        pool: AnyPool,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            stream_name: stream_name.into(),
            pool,
        }
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Durably store the most recent archived sequence number for a shard.
    pub async fn checkpoint(&self, shard: &ShardId, seq: &SequenceNumber) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT 1 FROM triton_checkpoint WHERE client=$1 AND stream=$2 AND shard=$3",
        )
        .bind(&self.client_name)
        .bind(&self.stream_name)
        .bind(shard.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let now = chrono::Utc::now().timestamp();

        if existing.is_some() {
            debug!(
                stream = %self.stream_name,
                shard = %shard,
                seq = %seq,
                "updating checkpoint"
            );
            let result = sqlx::query(
                "UPDATE triton_checkpoint SET seq_num=$1, updated=$2 \
                 WHERE client=$3 AND stream=$4 AND shard=$5",
            )
            .bind(seq.as_str())
            .bind(now)
            .bind(&self.client_name)
            .bind(&self.stream_name)
            .bind(shard.as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(Error::LostCheckpointRow {
                    client: self.client_name.clone(),
                    stream: self.stream_name.clone(),
                    shard: shard.clone(),
                });
            }
        } else {
            debug!(
                stream = %self.stream_name,
                shard = %shard,
                seq = %seq,
                "creating checkpoint"
            );
            sqlx::query("INSERT INTO triton_checkpoint VALUES ($1, $2, $3, $4, $5)")
                .bind(&self.client_name)
                .bind(&self.stream_name)
                .bind(shard.as_str())
                .bind(seq.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// The most recently checkpointed sequence number for a shard.
    ///
    /// A missing row is not an error; it returns the empty sequence number,
    /// which readers interpret as "no resume position".
    pub async fn last_sequence_number(&self, shard: &ShardId) -> Result<SequenceNumber> {
        let row: Option<AnyRow> = sqlx::query(
            "SELECT seq_num FROM triton_checkpoint \
             WHERE client=$1 AND stream=$2 AND shard=$3",
        )
        .bind(&self.client_name)
        .bind(&self.stream_name)
        .bind(shard.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(SequenceNumber::new(row.try_get::<String, _>(0)?)),
            None => Ok(SequenceNumber::default()),
        }
    }
}

/// Monitoring view: `"client.stream.shard.age"` → seconds since the last
/// checkpoint, for every row belonging to `client`.
pub async fn get_checkpoint_stats(pool: &AnyPool, client: &str) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT updated, stream, shard FROM triton_checkpoint WHERE client=$1")
        .bind(client)
        .fetch_all(pool)
        .await?;

    let now = chrono::Utc::now().timestamp();
    let mut stats = HashMap::new();
    for row in rows {
        let updated: i64 = row.try_get(0)?;
        let stream: String = row.try_get(1)?;
        let shard: String = row.try_get(2)?;
        stats.insert(format!("{}.{}.{}.age", client, stream, shard), now - updated);
    }

    Ok(stats)
}
