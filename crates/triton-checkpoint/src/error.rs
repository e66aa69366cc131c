//! Checkpoint Store Error Types

use thiserror::Error;
use triton_core::ShardId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("checkpoint database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// UPDATE affected zero rows after a positive existence check. The row
    /// vanished mid-transaction, which only a schema or isolation bug can
    /// cause, so the transaction is rolled back and the caller aborts.
    #[error("checkpoint row for {client}/{stream}/{shard} vanished during update")]
    LostCheckpointRow {
        client: String,
        stream: String,
        shard: ShardId,
    },
}
