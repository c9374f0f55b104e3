use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

mod in_memory;
mod persistent;

pub use in_memory::InMemoryCheckpointStorage;
pub use persistent::SledCheckpointStorage;

/// Progress markers the service keeps. Each key maps to at most one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Checkpoint {
    /// Last block whose transactions were all replayed.
    LastSyncedBlock,
    /// Index of the last replayed transaction inside the block following
    /// [`Checkpoint::LastSyncedBlock`]. `-1` when no transaction of that
    /// block has been replayed yet.
    LastSyncedTxnIndex,
    /// Last block whose events were verified against the source chain.
    LastVerifiedBlock,
}

impl Checkpoint {
    pub const ALL: [Checkpoint; 3] = [
        Checkpoint::LastSyncedBlock,
        Checkpoint::LastSyncedTxnIndex,
        Checkpoint::LastVerifiedBlock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::LastSyncedBlock => "LAST_SYNCED_BLOCK",
            Checkpoint::LastSyncedTxnIndex => "LAST_SYNCED_TXN_INDEX",
            Checkpoint::LastVerifiedBlock => "LAST_VERIFIED_BLOCK",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Malformed value stored for {checkpoint}")]
    Malformed { checkpoint: Checkpoint },
    #[error("Checkpoint storage is read-only")]
    ReadOnly,
}

#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// `None` if the checkpoint was never written.
    async fn get(&self, checkpoint: Checkpoint) -> Result<Option<i64>, CheckpointError>;

    /// Insert or overwrite the checkpoint value.
    async fn set(&self, checkpoint: Checkpoint, value: i64) -> Result<(), CheckpointError>;
}
