use std::sync::Arc;

use futures::future;
use prometheus::{IntCounter, IntGauge};
use starknet_rpc_client::{
    dto::{Event, Felt, Transaction, TransactionKind},
    Error as RpcError,
};
use thiserror::Error;
use utils_prometheus::{impl_metered_service, MeteredService};

use crate::{
    alert::AlertSink,
    chain::{MirrorChain, SourceChain},
    checkpoint_storage::{Checkpoint, CheckpointError, CheckpointStorage},
};

/// Selector of the ERC-20 `Transfer` event.
pub const TRANSFER_EVENT_SELECTOR: Felt =
    Felt::from_hex_unchecked("0x0099cd8bde557814842a3121e8ddfd433a539b8c9f14bf31ebf108d12e6196e9");

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Events do not match in block #{block_number} for transactions {}", format_hashes(.transactions))]
    Mismatch {
        block_number: u64,
        transactions: Vec<Felt>,
    },
    #[error("Failed to fetch block #{block_number}: {source}")]
    FetchBlock { block_number: u64, source: RpcError },
    #[error("Failed to fetch transaction {transaction_hash:#x}: {source}")]
    FetchTransaction {
        transaction_hash: Felt,
        source: RpcError,
    },
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl VerifyError {
    pub fn alert_subject(&self) -> &'static str {
        match self {
            VerifyError::Mismatch { .. } => "Events do not match",
            VerifyError::FetchBlock { .. } | VerifyError::FetchTransaction { .. } => {
                "Error verifying events"
            }
            VerifyError::Checkpoint(_) => "Error updating last verified block in DB",
        }
    }
}

fn format_hashes(hashes: &[Felt]) -> String {
    hashes
        .iter()
        .map(|hash| format!("{hash:#x}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Blocks up to and including this one are never verified.
    pub skip_below: i64,
    /// Only events emitted by this contract are compared.
    pub event_contract: Felt,
    /// Only events whose first key equals this selector are compared.
    pub event_selector: Felt,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            skip_below: -1,
            event_contract: crate::ETH_FEE_TOKEN_ADDRESS,
            event_selector: TRANSFER_EVENT_SELECTOR,
        }
    }
}

/// Outcome of comparing a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Matched,
    /// The transaction pays no fee so there is nothing to compare.
    Skipped,
    Mismatched,
    /// A receipt could not be fetched. Counted as a mismatch.
    Unavailable,
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Matched | Verdict::Skipped)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub blocks_verified: u64,
    pub last_verified_block: Option<i64>,
}

impl_metered_service! {
    pub struct Metrics {
        last_verified_block: IntGauge = IntGauge::new(
            "syncing_service_last_verified_block",
            "Last block whose fee events were verified",
        ),
        verified_transactions: IntCounter = IntCounter::new(
            "syncing_service_verified_transactions",
            "Amount of transactions whose fee events were compared",
        ),
        mismatched_transactions: IntCounter = IntCounter::new(
            "syncing_service_mismatched_transactions",
            "Amount of transactions whose fee events differ between chains",
        ),
    }
}

/// Compares fee transfer events of replayed transactions between the source
/// and the mirror chain, block by block.
pub struct EventVerifier {
    source: Arc<dyn SourceChain>,
    mirror: Arc<dyn MirrorChain>,
    storage: Arc<dyn CheckpointStorage>,
    alerts: Arc<dyn AlertSink>,
    config: VerifierConfig,

    metrics: Metrics,
}

impl MeteredService for EventVerifier {
    fn get_sources(&self) -> impl IntoIterator<Item = Box<dyn prometheus::core::Collector>> {
        self.metrics.get_sources()
    }
}

impl EventVerifier {
    pub fn new(
        source: Arc<dyn SourceChain>,
        mirror: Arc<dyn MirrorChain>,
        storage: Arc<dyn CheckpointStorage>,
        alerts: Arc<dyn AlertSink>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            source,
            mirror,
            storage,
            alerts,
            config,

            metrics: Metrics::new(),
        }
    }

    /// Verify every synced block past the last verified one. Stops at the
    /// first block that does not match; that block is retried next time.
    pub async fn run(&self) -> Result<VerifyReport, VerifyError> {
        let result = self.verify_synced_blocks().await;

        if let Err(err) = &result {
            log::error!("Event verification failed: {err}");
            self.alerts.send(err.alert_subject(), &err.to_string());
        }

        result
    }

    async fn verify_synced_blocks(&self) -> Result<VerifyReport, VerifyError> {
        let Some(last_synced_block) = self.storage.get(Checkpoint::LastSyncedBlock).await? else {
            log::info!("No synced blocks to verify");
            return Ok(VerifyReport::default());
        };

        let last_verified_block = self
            .storage
            .get(Checkpoint::LastVerifiedBlock)
            .await?
            .unwrap_or(self.config.skip_below);

        let mut report = VerifyReport {
            blocks_verified: 0,
            last_verified_block: Some(last_verified_block),
        };

        // Block numbers are non-negative.
        for block_number in (last_verified_block + 1).max(0)..=last_synced_block {
            let block_number = block_number as u64;
            log::info!("Verifying events of block #{block_number}");

            let mismatched = self.verify_block(block_number).await?;
            if !mismatched.is_empty() {
                return Err(VerifyError::Mismatch {
                    block_number,
                    transactions: mismatched,
                });
            }

            self.storage
                .set(Checkpoint::LastVerifiedBlock, block_number as i64)
                .await?;
            self.metrics.last_verified_block.set(block_number as i64);

            report.blocks_verified += 1;
            report.last_verified_block = Some(block_number as i64);
        }

        Ok(report)
    }

    /// Hashes of transactions in `block_number` whose events do not match.
    pub async fn verify_block(&self, block_number: u64) -> Result<Vec<Felt>, VerifyError> {
        let block = self
            .source
            .block_with_txs(block_number)
            .await
            .map_err(|source| VerifyError::FetchBlock {
                block_number,
                source,
            })?;

        // L1 handlers carry no fee.
        let candidates: Vec<&Transaction> = block
            .transactions
            .iter()
            .filter(|tx| tx.kind() != TransactionKind::L1Handler)
            .collect();

        let verdicts =
            future::join_all(candidates.iter().map(|tx| self.verify_transaction(tx))).await;

        Ok(candidates
            .into_iter()
            .zip(verdicts)
            .filter(|(_, verdict)| !verdict.is_match())
            .map(|(tx, _)| tx.hash())
            .collect())
    }

    pub async fn verify_transaction_by_hash(
        &self,
        transaction_hash: Felt,
    ) -> Result<Verdict, VerifyError> {
        let transaction = self
            .source
            .transaction_by_hash(transaction_hash)
            .await
            .map_err(|source| VerifyError::FetchTransaction {
                transaction_hash,
                source,
            })?;

        if transaction.kind() == TransactionKind::L1Handler {
            return Ok(Verdict::Skipped);
        }

        Ok(self.verify_transaction(&transaction).await)
    }

    pub async fn verify_transaction(&self, transaction: &Transaction) -> Verdict {
        let transaction_hash = transaction.hash();

        if transaction.is_fee_exempt() {
            log::debug!("Skipping fee-less transaction {transaction_hash:#x}");
            return Verdict::Skipped;
        }

        self.metrics.verified_transactions.inc();

        let receipts = future::try_join(
            self.source.transaction_receipt(transaction_hash),
            self.mirror.transaction_receipt(transaction_hash),
        )
        .await;

        let verdict = match receipts {
            Ok((source, mirror)) if self.events_match(&source.events, &mirror.events) => {
                Verdict::Matched
            }
            Ok(_) => {
                log::warn!("Events do not match for transaction {transaction_hash:#x}");
                Verdict::Mismatched
            }
            Err(err) => {
                let message =
                    format!("Error matching events for transaction {transaction_hash:#x}: {err}");
                log::error!("{message}");
                self.alerts.send("Error matching events", &message);
                Verdict::Unavailable
            }
        };

        if !verdict.is_match() {
            self.metrics.mismatched_transactions.inc();
        }

        verdict
    }

    pub fn filter_matchable_events<'a>(&self, events: &'a [Event]) -> Vec<&'a Event> {
        filter_matchable_events(events, self.config.event_contract, self.config.event_selector)
    }

    pub fn events_match(&self, source: &[Event], mirror: &[Event]) -> bool {
        self.filter_matchable_events(source) == self.filter_matchable_events(mirror)
    }
}

/// Events emitted by `contract` whose first key is `selector`, in emission
/// order.
pub fn filter_matchable_events(events: &[Event], contract: Felt, selector: Felt) -> Vec<&Event> {
    events
        .iter()
        .filter(|event| event.from_address == contract && event.keys.first() == Some(&selector))
        .collect()
}
