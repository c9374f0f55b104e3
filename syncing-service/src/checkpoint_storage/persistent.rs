use std::path::Path;

use async_trait::async_trait;

use super::{Checkpoint, CheckpointError, CheckpointStorage};

/// Checkpoints kept in a sled tree, one key per [`Checkpoint`] with the
/// value encoded as big-endian `i64`. Every write is flushed before
/// returning.
pub struct SledCheckpointStorage {
    db: sled::Db,
}

impl SledCheckpointStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    #[cfg(test)]
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStorage for SledCheckpointStorage {
    async fn get(&self, checkpoint: Checkpoint) -> Result<Option<i64>, CheckpointError> {
        let Some(value) = self.db.get(checkpoint.as_str())? else {
            return Ok(None);
        };

        let bytes = <[u8; 8]>::try_from(&value[..])
            .map_err(|_| CheckpointError::Malformed { checkpoint })?;

        Ok(Some(i64::from_be_bytes(bytes)))
    }

    async fn set(&self, checkpoint: Checkpoint, value: i64) -> Result<(), CheckpointError> {
        self.db
            .insert(checkpoint.as_str(), value.to_be_bytes().to_vec())?;
        self.db.flush_async().await?;

        log::debug!("Checkpoint {checkpoint} = {value}");

        Ok(())
    }
}
