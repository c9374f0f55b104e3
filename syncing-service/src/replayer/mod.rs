use std::{sync::Arc, time::Duration};

use prometheus::{IntCounter, IntGauge};
use starknet_rpc_client::{
    dto::{
        BroadcastedDeclareTransaction, BroadcastedDeployAccountTransaction,
        BroadcastedInvokeTransaction, DeclareTransaction, DeployAccountTransaction, Felt,
        FunctionCall, InvokeTransaction, L1HandlerRequest, L1HandlerTransaction, Transaction,
        TransactionKind,
    },
    utils::{calculate_contract_address, selector_from_name},
    Error as RpcError,
};
use thiserror::Error;
use tokio::time::Instant;
use utils_prometheus::{impl_metered_service, MeteredService};

use crate::{
    alert::AlertSink,
    chain::{MirrorChain, SourceChain},
    checkpoint_storage::{Checkpoint, CheckpointStorage},
    sync::SyncError,
};

pub mod fee_mode;
pub mod nonce;
pub mod retry;

use fee_mode::{FeeModeController, FeeToggle};
use nonce::NonceAllocator;
use retry::RetryPolicy;

/// Signature attached to transactions of the funding account. The mirror
/// node does not validate it.
pub const FUNDING_SIGNATURE: [Felt; 2] = [Felt::ONE, Felt::ONE];
pub const FUNDING_DECLARE_VERSION: Felt = Felt::ONE;
/// Fee allowance for L1 handler execution on the mirror chain.
pub const DEFAULT_L1_HANDLER_FEE: Felt = Felt::from_hex_unchecked("0xfffffff");
pub const DEFAULT_FUNDING_POLL_INTERVAL: Duration = Duration::from_secs(6);
pub const DEFAULT_BLOCK_TIME: Duration = Duration::from_secs(6);

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
    #[error("Max retries exceeded for transaction after {attempts} attempts: {source}")]
    RetriesExhausted { attempts: u32, source: RpcError },
    #[error("Failed to switch fee mode: {0}")]
    FeeToggle(anyhow::Error),
    #[error("Account {address:#x} was not funded within {timeout:?}")]
    FundingTimeout { address: Felt, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Sender whose transactions get locally assigned nonces and a
    /// synthetic signature.
    pub funding_address: Felt,
    /// ERC-20 contract whose balance must be positive before an account
    /// can be deployed.
    pub fee_token_address: Felt,
    /// Time the mirror chain needs to include a transaction into a block.
    pub block_time: Duration,
    pub funding_poll_interval: Duration,
    /// `None` waits for funding forever.
    pub funding_timeout: Option<Duration>,
    pub l1_handler_fee: Felt,
    pub retry: RetryPolicy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            funding_address: Felt::ONE,
            fee_token_address: crate::ETH_FEE_TOKEN_ADDRESS,
            block_time: DEFAULT_BLOCK_TIME,
            funding_poll_interval: DEFAULT_FUNDING_POLL_INTERVAL,
            funding_timeout: None,
            l1_handler_fee: DEFAULT_L1_HANDLER_FEE,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayResult {
    /// Hash of the transaction on the mirror chain. L1 handler execution may
    /// not report one.
    pub mirror_tx_hash: Option<Felt>,
}

impl_metered_service! {
    pub struct Metrics {
        last_synced_txn_index: IntGauge = IntGauge::new(
            "syncing_service_last_synced_txn_index",
            "Index of the last replayed transaction in the block being synced",
        ),
        replayed_transactions: IntCounter = IntCounter::new(
            "syncing_service_replayed_transactions",
            "Amount of transactions replayed on the mirror chain",
        ),
        hash_mismatches: IntCounter = IntCounter::new(
            "syncing_service_hash_mismatches",
            "Amount of replayed transactions whose hash differs from the source one",
        ),
        fee_mode_toggles: IntCounter = IntCounter::new(
            "syncing_service_fee_mode_toggles",
            "Amount of fee mode switches on the mirror chain",
        ),
        fees_disabled: IntGauge = IntGauge::new(
            "syncing_service_fees_disabled",
            "Whether fees are currently disabled on the mirror chain",
        ),
    }
}

/// Replays source chain transactions onto the mirror chain. Owns the state
/// that has to evolve strictly in transaction order: funding account nonces
/// and the mirror chain's fee mode.
pub struct TransactionReplayer {
    source: Arc<dyn SourceChain>,
    mirror: Arc<dyn MirrorChain>,
    storage: Arc<dyn CheckpointStorage>,
    alerts: Arc<dyn AlertSink>,

    nonces: NonceAllocator,
    fee_mode: FeeModeController,
    balance_of_selector: Felt,
    config: ReplayConfig,

    metrics: Metrics,
}

impl MeteredService for TransactionReplayer {
    fn get_sources(&self) -> impl IntoIterator<Item = Box<dyn prometheus::core::Collector>> {
        self.metrics.get_sources()
    }
}

impl TransactionReplayer {
    pub fn new(
        source: Arc<dyn SourceChain>,
        mirror: Arc<dyn MirrorChain>,
        storage: Arc<dyn CheckpointStorage>,
        alerts: Arc<dyn AlertSink>,
        fee_toggle: Arc<dyn FeeToggle>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            source,
            mirror,
            storage,
            alerts,

            nonces: NonceAllocator::new(config.funding_address),
            fee_mode: FeeModeController::new(fee_toggle),
            balance_of_selector: selector_from_name("balanceOf"),
            config,

            metrics: Metrics::new(),
        }
    }

    /// Put the mirror chain into the fee mode every sync pass starts from.
    pub async fn enable_fees(&mut self) -> anyhow::Result<()> {
        self.fee_mode.enable_fees().await?;
        self.metrics.fees_disabled.set(0);

        Ok(())
    }

    /// Drop locally counted funding nonces. A submission that failed after
    /// its nonce was handed out leaves the counter ahead of the mirror.
    pub fn reset_nonces(&mut self) {
        self.nonces.reset();
    }

    /// Replay transactions of `block_number` starting at `start_index`,
    /// recording the index of every replayed transaction. Returns the amount
    /// of replayed transactions.
    pub async fn replay_block(
        &mut self,
        block_number: u64,
        start_index: usize,
    ) -> Result<usize, SyncError> {
        let block = self
            .source
            .block_with_txs(block_number)
            .await
            .map_err(|source| SyncError::FetchBlock {
                block_number,
                source,
            })?;

        let count = block.transactions.len();
        log::info!("Found {count} transactions to process in block #{block_number}");

        if count == 0 {
            return Err(SyncError::EmptyBlock { block_number });
        }

        if start_index >= count {
            log::warn!(
                "Block #{block_number} has {count} transactions, nothing left to replay from index {start_index}"
            );
        }

        for (index, transaction) in block.transactions.iter().enumerate().skip(start_index) {
            let transaction_hash = transaction.hash();
            log::info!(
                "Processing {} transaction {transaction_hash:#x} ({index}/{count}) of block #{block_number}",
                transaction.kind().as_str(),
            );

            let result =
                self.replay_one(transaction)
                    .await
                    .map_err(|source| SyncError::Transaction {
                        block_number,
                        index,
                        transaction_hash,
                        source,
                    })?;

            self.check_hash(transaction, &result);

            self.storage
                .set(Checkpoint::LastSyncedTxnIndex, index as i64)
                .await?;
            self.metrics.last_synced_txn_index.set(index as i64);
            self.metrics.replayed_transactions.inc();

            log::info!("Completed transaction {index} of block #{block_number}");
        }

        Ok(count.saturating_sub(start_index))
    }

    pub async fn replay_one(
        &mut self,
        transaction: &Transaction,
    ) -> Result<ReplayResult, ReplayError> {
        if self
            .fee_mode
            .reconcile(transaction)
            .await
            .map_err(ReplayError::FeeToggle)?
        {
            self.metrics.fee_mode_toggles.inc();
            self.metrics
                .fees_disabled
                .set(self.fee_mode.fees_disabled() as i64);
        }

        match transaction {
            Transaction::Declare(tx) => self.declare(tx).await,
            Transaction::DeployAccount(tx) => self.deploy_account(tx).await,
            Transaction::Invoke(tx) => self.invoke(tx).await,
            Transaction::L1Handler(tx) => self.l1_handler(tx).await,
        }
    }

    async fn declare(&mut self, tx: &DeclareTransaction) -> Result<ReplayResult, ReplayError> {
        let class = self.source.class(tx.class_hash).await?;

        let request = if self.nonces.is_funding_address(tx.sender_address) {
            let nonce = self
                .nonces
                .allocate(self.mirror.as_ref(), tx.sender_address)
                .await?;

            BroadcastedDeclareTransaction {
                contract_class: class,
                version: FUNDING_DECLARE_VERSION,
                max_fee: tx.max_fee,
                signature: FUNDING_SIGNATURE.to_vec(),
                sender_address: tx.sender_address,
                nonce: Some(nonce),
                compiled_class_hash: None,
            }
        } else {
            let contract_class = if tx.is_sierra() {
                class.into_declare_envelope()
            } else {
                class
            };

            BroadcastedDeclareTransaction {
                contract_class,
                version: tx.version,
                max_fee: tx.max_fee,
                signature: tx.signature.clone(),
                sender_address: tx.sender_address,
                nonce: tx.nonce,
                compiled_class_hash: tx.compiled_class_hash,
            }
        };

        let mirror = self.mirror.as_ref();
        let hash = self
            .config
            .retry
            .submit(|| mirror.add_declare_transaction(&request))
            .await?;

        Ok(ReplayResult {
            mirror_tx_hash: Some(hash),
        })
    }

    async fn deploy_account(
        &mut self,
        tx: &DeployAccountTransaction,
    ) -> Result<ReplayResult, ReplayError> {
        if tx.max_fee != Some(Felt::ZERO) {
            let address = calculate_contract_address(
                tx.contract_address_salt,
                tx.class_hash,
                &tx.constructor_calldata,
                Felt::ZERO,
            );
            self.wait_for_funds(address).await?;
        }

        let request = BroadcastedDeployAccountTransaction {
            max_fee: tx.max_fee,
            signature: tx.signature.clone(),
            nonce: Felt::ZERO,
            contract_address_salt: tx.contract_address_salt,
            constructor_calldata: tx.constructor_calldata.clone(),
            class_hash: tx.class_hash,
            version: tx.version,
        };

        let mirror = self.mirror.as_ref();
        let hash = self
            .config
            .retry
            .submit(|| mirror.add_deploy_account_transaction(&request))
            .await?;

        // Transactions of the new account must not reach the mirror chain
        // before the account itself is included.
        tokio::time::sleep(self.config.block_time).await;

        Ok(ReplayResult {
            mirror_tx_hash: Some(hash),
        })
    }

    async fn invoke(&mut self, tx: &InvokeTransaction) -> Result<ReplayResult, ReplayError> {
        let nonce = self
            .nonces
            .resolve(self.mirror.as_ref(), tx.sender_address, tx.nonce)
            .await?;

        let request = BroadcastedInvokeTransaction {
            sender_address: tx.sender_address,
            calldata: tx.calldata.clone(),
            max_fee: tx.max_fee,
            signature: tx.signature.clone(),
            nonce,
            version: tx.version,
        };

        let mirror = self.mirror.as_ref();
        let hash = self
            .config
            .retry
            .submit(|| mirror.add_invoke_transaction(&request))
            .await?;

        Ok(ReplayResult {
            mirror_tx_hash: Some(hash),
        })
    }

    // TODO: send the message through the L1 core contract once the mirror
    // chain is connected to an L1 node, instead of consuming it directly.
    async fn l1_handler(&mut self, tx: &L1HandlerTransaction) -> Result<ReplayResult, ReplayError> {
        let request = L1HandlerRequest::from(tx);
        let fee = self.config.l1_handler_fee;

        let mirror = self.mirror.as_ref();
        let mirror_tx_hash = self
            .config
            .retry
            .submit(|| mirror.consume_l1_message(&request, fee))
            .await?;

        Ok(ReplayResult { mirror_tx_hash })
    }

    async fn wait_for_funds(&self, address: Felt) -> Result<(), ReplayError> {
        let started = Instant::now();

        loop {
            let balance = self
                .mirror
                .call(&FunctionCall {
                    contract_address: self.config.fee_token_address,
                    entry_point_selector: self.balance_of_selector,
                    calldata: vec![address],
                })
                .await?;

            // Uint256 as (low, high).
            if balance.iter().any(|limb| *limb != Felt::ZERO) {
                return Ok(());
            }

            if let Some(timeout) = self.config.funding_timeout {
                if started.elapsed() >= timeout {
                    return Err(ReplayError::FundingTimeout { address, timeout });
                }
            }

            log::warn!(
                "Can't deploy {address:#x} without funds, waiting for {:?}",
                self.config.funding_poll_interval
            );
            tokio::time::sleep(self.config.funding_poll_interval).await;
        }
    }

    fn check_hash(&self, transaction: &Transaction, result: &ReplayResult) {
        if transaction.kind() == TransactionKind::L1Handler {
            return;
        }

        let original = transaction.hash();
        if result.mirror_tx_hash == Some(original) {
            return;
        }

        let synced = result
            .mirror_tx_hash
            .map(|hash| format!("{hash:#x}"))
            .unwrap_or_else(|| "none".to_string());

        // Funding account transactions are re-signed and re-nonced, so their
        // hash differs by construction.
        if transaction
            .sender_address()
            .is_some_and(|sender| self.nonces.is_funding_address(sender))
        {
            log::debug!(
                "Funding account transaction {original:#x} replayed as {synced}, hash check skipped"
            );
            return;
        }

        let message = format!("Transaction hash mismatch, original - {original:#x}, synced - {synced}");
        log::warn!("{message}");
        self.alerts.send("Transaction hash mismatch", &message);
        self.metrics.hash_mismatches.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        checkpoint_storage::InMemoryCheckpointStorage,
        test_utils::{
            declare, deploy_account, invoke, legacy_class, l1_handler, sierra_class,
            FakeFeeToggle, FakeMirror, FakeSource, RecordingAlerts, Submitted,
        },
    };

    struct Harness {
        source: Arc<FakeSource>,
        mirror: Arc<FakeMirror>,
        storage: Arc<InMemoryCheckpointStorage>,
        alerts: Arc<RecordingAlerts>,
        toggle: Arc<FakeFeeToggle>,
        replayer: TransactionReplayer,
    }

    fn harness(config: ReplayConfig) -> Harness {
        let source = Arc::new(FakeSource::default());
        let mirror = Arc::new(FakeMirror::default());
        let storage = Arc::new(InMemoryCheckpointStorage::new());
        let alerts = Arc::new(RecordingAlerts::default());
        let toggle = Arc::new(FakeFeeToggle::default());
        let replayer = TransactionReplayer::new(
            source.clone(),
            mirror.clone(),
            storage.clone(),
            alerts.clone(),
            toggle.clone(),
            config,
        );

        Harness {
            source,
            mirror,
            storage,
            alerts,
            toggle,
            replayer,
        }
    }

    #[tokio::test]
    async fn block_is_replayed_from_start_index() {
        let mut h = harness(ReplayConfig::default());
        let sender = Felt::from(0x55_u64);
        h.source.push_block(vec![
            invoke(0x10, sender, Felt::ONE),
            invoke(0x11, sender, Felt::ONE),
            invoke(0x12, sender, Felt::ONE),
        ]);
        h.mirror.expect_hashes([Felt::from(0x11_u64), Felt::from(0x12_u64)]);

        let replayed = h.replayer.replay_block(0, 1).await.unwrap();

        assert_eq!(replayed, 2);
        let submitted: Vec<_> = h
            .mirror
            .submitted()
            .into_iter()
            .map(|submitted| match submitted {
                Submitted::Invoke(tx) => tx.nonce,
                other => panic!("unexpected submission {other:?}"),
            })
            .collect();
        assert_eq!(
            submitted,
            vec![Some(Felt::from(0x11_u64)), Some(Felt::from(0x12_u64))]
        );
        assert_eq!(
            h.storage.get(Checkpoint::LastSyncedTxnIndex).await.unwrap(),
            Some(2)
        );
        assert!(h.alerts.subjects().is_empty());
    }

    #[tokio::test]
    async fn empty_block_is_rejected() {
        let mut h = harness(ReplayConfig::default());
        h.source.push_block(vec![]);

        let err = h.replayer.replay_block(0, 0).await.unwrap_err();

        assert!(matches!(err, SyncError::EmptyBlock { block_number: 0 }));
        assert!(h.mirror.submitted().is_empty());
    }

    #[tokio::test]
    async fn failed_transaction_keeps_previous_index() {
        let mut h = harness(ReplayConfig::default());
        let sender = Felt::from(0x55_u64);
        h.source.push_block(vec![
            invoke(0x10, sender, Felt::ONE),
            invoke(0x11, sender, Felt::ONE),
        ]);
        h.mirror.expect_hashes([Felt::from(0x10_u64)]);
        h.mirror.fail_submission(1, 40);

        let err = h.replayer.replay_block(0, 0).await.unwrap_err();

        assert!(
            matches!(
                err,
                SyncError::Transaction {
                    index: 1,
                    source: ReplayError::Rpc(_),
                    ..
                }
            ),
            "{err}"
        );
        assert_eq!(
            h.storage.get(Checkpoint::LastSyncedTxnIndex).await.unwrap(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn hash_mismatch_is_alerted_but_not_fatal() {
        let mut h = harness(ReplayConfig::default());
        let sender = Felt::from(0x55_u64);
        h.source.push_block(vec![
            invoke(0x10, sender, Felt::ONE),
            l1_handler(0x11),
        ]);
        h.mirror.expect_hashes([Felt::from(0xff_u64)]);

        let replayed = h.replayer.replay_block(0, 0).await.unwrap();

        assert_eq!(replayed, 2);
        assert_eq!(h.alerts.subjects(), vec!["Transaction hash mismatch"]);
    }

    #[tokio::test]
    async fn funding_declare_gets_synthetic_signature_and_nonce() {
        let mut h = harness(ReplayConfig::default());
        let class_hash = Felt::from(0xc0_u64);
        h.source.set_class(class_hash, legacy_class());
        h.mirror.set_nonce(Felt::ONE, Felt::from(4_u64));

        for hash in [0x20, 0x21] {
            let tx = declare(hash, Felt::ONE, class_hash, Felt::ONE, Felt::ONE);
            h.replayer.replay_one(&tx).await.unwrap();
        }

        let nonces: Vec<_> = h
            .mirror
            .submitted()
            .into_iter()
            .map(|submitted| match submitted {
                Submitted::Declare(tx) => {
                    assert_eq!(tx.signature, FUNDING_SIGNATURE.to_vec());
                    assert_eq!(tx.version, FUNDING_DECLARE_VERSION);
                    assert_eq!(tx.contract_class, legacy_class());
                    tx.nonce
                }
                other => panic!("unexpected submission {other:?}"),
            })
            .collect();
        assert_eq!(
            nonces,
            vec![Some(Felt::from(4_u64)), Some(Felt::from(5_u64))]
        );
        assert_eq!(h.mirror.nonce_queries(), 1);
    }

    #[tokio::test]
    async fn regular_declare_keeps_source_fields() {
        let mut h = harness(ReplayConfig::default());
        let class_hash = Felt::from(0xc1_u64);
        let sender = Felt::from(0x77_u64);
        h.source.set_class(class_hash, sierra_class());

        let tx = declare(0x20, sender, class_hash, Felt::TWO, Felt::ONE);
        let Transaction::Declare(source_tx) = &tx else {
            unreachable!()
        };
        h.replayer.replay_one(&tx).await.unwrap();

        let [Submitted::Declare(submitted)] = &h.mirror.submitted()[..] else {
            panic!("expected a single declare");
        };
        assert_eq!(submitted.signature, source_tx.signature);
        assert_eq!(submitted.nonce, source_tx.nonce);
        assert_eq!(submitted.version, Felt::TWO);
        assert_eq!(submitted.compiled_class_hash, source_tx.compiled_class_hash);
        assert_eq!(
            submitted.contract_class.sierra_program(),
            sierra_class().sierra_program()
        );
        assert!(!submitted
            .contract_class
            .0
            .contains_key("sierra_program_debug_info"));
        assert_eq!(h.mirror.nonce_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_account_waits_for_funds_and_block_time() {
        let mut h = harness(ReplayConfig::default());
        let tx = deploy_account(0x30, Felt::from(100_u64));
        h.mirror.fund_after_queries(2);
        let started = Instant::now();

        h.replayer.replay_one(&tx).await.unwrap();

        assert_eq!(h.mirror.balance_queries(), 3);
        // Two funding polls and the block time.
        assert!(started.elapsed() >= DEFAULT_FUNDING_POLL_INTERVAL * 2 + DEFAULT_BLOCK_TIME);
        let [Submitted::DeployAccount(submitted)] = &h.mirror.submitted()[..] else {
            panic!("expected a single deploy account");
        };
        assert_eq!(submitted.nonce, Felt::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fee_less_deploy_account_does_not_check_balance() {
        let mut h = harness(ReplayConfig::default());
        let tx = deploy_account(0x30, Felt::ZERO);

        h.replayer.replay_one(&tx).await.unwrap();

        assert_eq!(h.mirror.balance_queries(), 0);
        assert_eq!(h.toggle.calls(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn funding_wait_honours_timeout() {
        let mut h = harness(ReplayConfig {
            funding_timeout: Some(Duration::from_secs(20)),
            ..Default::default()
        });
        let tx = deploy_account(0x30, Felt::from(100_u64));
        h.mirror.fund_after_queries(usize::MAX);

        let err = h.replayer.replay_one(&tx).await.unwrap_err();

        assert!(matches!(err, ReplayError::FundingTimeout { .. }), "{err}");
        assert!(h.mirror.submitted().is_empty());
    }

    #[tokio::test]
    async fn l1_handler_consumes_message_with_fixed_fee() {
        let mut h = harness(ReplayConfig::default());

        let result = h.replayer.replay_one(&l1_handler(0x40)).await.unwrap();

        assert_eq!(result.mirror_tx_hash, None);
        let [Submitted::L1Handler(_, fee)] = &h.mirror.submitted()[..] else {
            panic!("expected a single l1 handler");
        };
        assert_eq!(*fee, DEFAULT_L1_HANDLER_FEE);
        assert!(h.toggle.calls().is_empty());
    }

    #[tokio::test]
    async fn fee_toggle_failure_aborts_replay() {
        let mut h = harness(ReplayConfig::default());
        h.toggle.fail(true);

        let err = h
            .replayer
            .replay_one(&invoke(0x10, Felt::from(9_u64), Felt::ZERO))
            .await
            .unwrap_err();

        assert!(matches!(err, ReplayError::FeeToggle(_)));
        assert!(h.mirror.submitted().is_empty());
    }
}
