use std::sync::Arc;

use prometheus::{IntCounter, IntGauge};
use starknet_rpc_client::{dto::Felt, Error as RpcError};
use thiserror::Error;
use utils_prometheus::{impl_metered_service, MeteredService};

use crate::{
    alert::AlertSink,
    chain::SourceChain,
    checkpoint_storage::{Checkpoint, CheckpointError, CheckpointStorage},
    replayer::{ReplayError, TransactionReplayer},
    verifier::{EventVerifier, VerifyError, VerifyReport},
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to enable fees on mirror chain: {0}")]
    FeeToggle(anyhow::Error),
    #[error("Failed to fetch latest block number: {0}")]
    LatestBlock(RpcError),
    #[error("Failed to fetch block #{block_number}: {source}")]
    FetchBlock { block_number: u64, source: RpcError },
    #[error("No transactions to process in block #{block_number}")]
    EmptyBlock { block_number: u64 },
    #[error("Error processing transaction {transaction_hash:#x} ({index}) of block #{block_number}: {source}")]
    Transaction {
        block_number: u64,
        index: usize,
        transaction_hash: Felt,
        source: ReplayError,
    },
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl SyncError {
    pub fn alert_subject(&self) -> &'static str {
        match self {
            SyncError::FeeToggle(_) => "Error setting disable fee to false",
            SyncError::EmptyBlock { .. } => "No transactions to process",
            SyncError::Transaction { .. } => "Error processing transaction",
            SyncError::LatestBlock(_) | SyncError::FetchBlock { .. } => "Error syncing block",
            SyncError::Checkpoint(_) => "Error updating last synced block in DB",
        }
    }
}

#[derive(Debug)]
pub struct SyncReport {
    pub blocks_synced: u64,
    pub transactions_replayed: usize,
    pub last_synced_block: Option<u64>,
    /// Verification problems are alerted on but do not fail the pass.
    pub verification: Result<VerifyReport, VerifyError>,
}

impl_metered_service! {
    pub struct Metrics {
        last_synced_block: IntGauge = IntGauge::new(
            "syncing_service_last_synced_block",
            "Last block fully replayed on the mirror chain",
        ),
        latest_source_block: IntGauge = IntGauge::new(
            "syncing_service_latest_source_block",
            "Latest block number reported by the source chain",
        ),
        sync_passes: IntCounter = IntCounter::new(
            "syncing_service_sync_passes",
            "Amount of started sync passes",
        ),
        failed_sync_passes: IntCounter = IntCounter::new(
            "syncing_service_failed_sync_passes",
            "Amount of sync passes aborted by an error",
        ),
    }
}

/// Drives a sync pass: replays every source block past the checkpoints in
/// order and then verifies fee events of what was replayed.
pub struct BlockSync {
    source: Arc<dyn SourceChain>,
    storage: Arc<dyn CheckpointStorage>,
    alerts: Arc<dyn AlertSink>,

    replayer: TransactionReplayer,
    verifier: EventVerifier,

    metrics: Metrics,
}

impl MeteredService for BlockSync {
    fn get_sources(&self) -> impl IntoIterator<Item = Box<dyn prometheus::core::Collector>> {
        self.metrics
            .get_sources()
            .into_iter()
            .chain(self.replayer.get_sources())
            .chain(self.verifier.get_sources())
    }
}

impl BlockSync {
    pub fn new(
        source: Arc<dyn SourceChain>,
        storage: Arc<dyn CheckpointStorage>,
        alerts: Arc<dyn AlertSink>,
        replayer: TransactionReplayer,
        verifier: EventVerifier,
    ) -> Self {
        Self {
            source,
            storage,
            alerts,

            replayer,
            verifier,

            metrics: Metrics::new(),
        }
    }

    pub fn verifier(&self) -> &EventVerifier {
        &self.verifier
    }

    /// Sync up to `until` or the latest source block, whichever is lower.
    pub async fn run(&mut self, until: Option<u64>) -> Result<SyncReport, SyncError> {
        self.metrics.sync_passes.inc();

        let result = self.sync(until).await;

        if let Err(err) = &result {
            log::error!("Sync pass failed: {err}");
            self.alerts.send(err.alert_subject(), &err.to_string());
            self.metrics.failed_sync_passes.inc();
        }

        result
    }

    async fn sync(&mut self, until: Option<u64>) -> Result<SyncReport, SyncError> {
        // Whatever mode a previous, possibly interrupted, pass left behind.
        self.replayer
            .enable_fees()
            .await
            .map_err(SyncError::FeeToggle)?;
        self.replayer.reset_nonces();

        let last_synced_block = self
            .storage
            .get(Checkpoint::LastSyncedBlock)
            .await?
            .unwrap_or(-1);
        let last_synced_txn_index = self
            .storage
            .get(Checkpoint::LastSyncedTxnIndex)
            .await?
            .unwrap_or(-1);

        let latest_block = self
            .source
            .latest_block_number()
            .await
            .map_err(SyncError::LatestBlock)?;
        self.metrics.latest_source_block.set(latest_block as i64);

        let first_block = u64::try_from(last_synced_block + 1).unwrap_or(0);
        let last_block = until.map_or(latest_block, |until| until.min(latest_block));

        log::info!(
            "Syncing blocks #{first_block}..=#{last_block}, resuming at transaction {}",
            last_synced_txn_index + 1
        );

        let mut report = SyncReport {
            blocks_synced: 0,
            transactions_replayed: 0,
            last_synced_block: u64::try_from(last_synced_block).ok(),
            verification: Ok(VerifyReport::default()),
        };

        let mut start_index = usize::try_from(last_synced_txn_index + 1).unwrap_or(0);
        for block_number in first_block..=last_block {
            log::info!("Syncing block #{block_number}");

            report.transactions_replayed +=
                self.replayer.replay_block(block_number, start_index).await?;
            start_index = 0;

            self.storage
                .set(Checkpoint::LastSyncedBlock, block_number as i64)
                .await?;
            self.storage.set(Checkpoint::LastSyncedTxnIndex, -1).await?;
            self.metrics.last_synced_block.set(block_number as i64);

            report.blocks_synced += 1;
            report.last_synced_block = Some(block_number);

            log::info!("Synced block #{block_number}");
        }

        report.verification = self.verifier.run().await;

        Ok(report)
    }
}
