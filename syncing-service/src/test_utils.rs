use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use serde_json::json;
use starknet_rpc_client::{
    dto::{
        BlockWithTxs, BroadcastedDeclareTransaction, BroadcastedDeployAccountTransaction,
        BroadcastedInvokeTransaction, ContractClass, DeclareTransaction,
        DeployAccountTransaction, Event, Felt, FunctionCall, InvokeTransaction, L1HandlerRequest,
        L1HandlerTransaction, Transaction, TransactionReceipt,
    },
    Error as RpcError,
};

use crate::{
    alert::AlertSink,
    chain::{MirrorChain, SourceChain},
    checkpoint_storage::{Checkpoint, CheckpointStorage, InMemoryCheckpointStorage},
    replayer::{fee_mode::FeeToggle, ReplayConfig, TransactionReplayer},
    sync::BlockSync,
    verifier::{EventVerifier, VerifierConfig},
};

pub fn rpc_error(code: i64) -> RpcError {
    RpcError::Rpc {
        code,
        message: "error".into(),
        data: None,
    }
}

pub fn invoke(hash: u64, sender: Felt, max_fee: Felt) -> Transaction {
    Transaction::Invoke(InvokeTransaction {
        transaction_hash: Felt::from(hash),
        sender_address: sender,
        calldata: vec![Felt::from(hash), Felt::ONE],
        max_fee: Some(max_fee),
        version: Felt::ONE,
        signature: vec![Felt::from(0xaa_u64), Felt::from(hash)],
        nonce: Some(Felt::from(hash)),
    })
}

pub fn declare(hash: u64, sender: Felt, class_hash: Felt, version: Felt, max_fee: Felt) -> Transaction {
    Transaction::Declare(DeclareTransaction {
        transaction_hash: Felt::from(hash),
        class_hash,
        sender_address: sender,
        compiled_class_hash: (version == Felt::TWO).then(|| Felt::from(0xcc_u64)),
        max_fee: Some(max_fee),
        version,
        signature: vec![Felt::from(0xbb_u64), Felt::from(hash)],
        nonce: Some(Felt::from(3_u64)),
    })
}

pub fn deploy_account(hash: u64, max_fee: Felt) -> Transaction {
    Transaction::DeployAccount(DeployAccountTransaction {
        transaction_hash: Felt::from(hash),
        class_hash: Felt::from(0xc1_u64),
        contract_address_salt: Felt::from(0x5a_u64),
        constructor_calldata: vec![Felt::from(0x1234_u64)],
        max_fee: Some(max_fee),
        version: Felt::ONE,
        signature: vec![Felt::from(0xdd_u64)],
        nonce: Some(Felt::ZERO),
    })
}

pub fn l1_handler(hash: u64) -> Transaction {
    Transaction::L1Handler(L1HandlerTransaction {
        transaction_hash: Felt::from(hash),
        contract_address: Felt::from(0xb1_u64),
        entry_point_selector: Felt::from(0xe1_u64),
        calldata: vec![Felt::from(hash)],
        nonce: Some(Felt::from(hash)),
        version: Felt::ZERO,
    })
}

pub fn sierra_class() -> ContractClass {
    let value = json!({
        "sierra_program": ["0x1", "0x2", "0x3"],
        "sierra_program_debug_info": { "type_names": [] },
        "contract_class_version": "0.1.0",
        "entry_points_by_type": { "EXTERNAL": [], "L1_HANDLER": [], "CONSTRUCTOR": [] },
        "abi": [{ "type": "function", "name": "foo" }],
    });

    serde_json::from_value(value).expect("Valid class")
}

pub fn legacy_class() -> ContractClass {
    let value = json!({
        "program": "H4sIAAAAAAAA/6tWKkktLlGyUlAqS8wpTVWqBQBnH0ZLEgAAAA==",
        "entry_points_by_type": { "EXTERNAL": [], "L1_HANDLER": [], "CONSTRUCTOR": [] },
        "abi": [],
    });

    serde_json::from_value(value).expect("Valid class")
}

pub fn event(from_address: Felt, key: Felt, amount: u64) -> Event {
    Event {
        from_address,
        keys: vec![key],
        data: vec![Felt::from(amount)],
    }
}

pub fn receipt(hash: Felt, events: Vec<Event>) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: hash,
        events,
    }
}

#[derive(Default)]
struct FakeSourceInner {
    blocks: BTreeMap<u64, Vec<Transaction>>,
    receipts: HashMap<Felt, TransactionReceipt>,
    classes: HashMap<Felt, ContractClass>,
    calls: usize,
}

/// Source chain backed by in-memory blocks, numbered from zero in the order
/// they are pushed.
#[derive(Default)]
pub struct FakeSource {
    inner: Mutex<FakeSourceInner>,
}

impl FakeSource {
    pub fn push_block(&self, transactions: Vec<Transaction>) -> u64 {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        let number = inner.blocks.len() as u64;
        inner.blocks.insert(number, transactions);

        number
    }

    pub fn set_receipt(&self, receipt: TransactionReceipt) {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.receipts.insert(receipt.transaction_hash, receipt);
    }

    pub fn set_class(&self, class_hash: Felt, class: ContractClass) {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.classes.insert(class_hash, class);
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().expect("Lock poisoned").calls
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut FakeSourceInner) -> R) -> R {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.calls += 1;
        f(&mut inner)
    }
}

#[async_trait]
impl SourceChain for FakeSource {
    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        self.with_inner(|inner| inner.blocks.keys().next_back().copied())
            .ok_or_else(|| rpc_error(32))
    }

    async fn block_with_txs(&self, block_number: u64) -> Result<BlockWithTxs, RpcError> {
        self.with_inner(|inner| inner.blocks.get(&block_number).cloned())
            .map(|transactions| BlockWithTxs {
                block_number,
                transactions,
            })
            .ok_or_else(|| rpc_error(24))
    }

    async fn transaction_by_hash(&self, transaction_hash: Felt) -> Result<Transaction, RpcError> {
        self.with_inner(|inner| {
            inner
                .blocks
                .values()
                .flatten()
                .find(|tx| tx.hash() == transaction_hash)
                .cloned()
        })
        .ok_or_else(|| rpc_error(29))
    }

    async fn transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<TransactionReceipt, RpcError> {
        self.with_inner(|inner| inner.receipts.get(&transaction_hash).cloned())
            .ok_or_else(|| rpc_error(29))
    }

    async fn class(&self, class_hash: Felt) -> Result<ContractClass, RpcError> {
        self.with_inner(|inner| inner.classes.get(&class_hash).cloned())
            .ok_or_else(|| rpc_error(28))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    Declare(BroadcastedDeclareTransaction),
    DeployAccount(BroadcastedDeployAccountTransaction),
    Invoke(BroadcastedInvokeTransaction),
    L1Handler(L1HandlerRequest, Felt),
}

#[derive(Default)]
struct FakeMirrorInner {
    nonces: HashMap<Felt, Felt>,
    nonce_queries: usize,
    fund_after_queries: usize,
    balance_queries: usize,
    receipts: HashMap<Felt, TransactionReceipt>,
    receipt_queries: usize,
    hashes: VecDeque<Felt>,
    failures: HashMap<usize, i64>,
    attempts: usize,
    submitted: Vec<Submitted>,
}

/// Mirror chain recording every submission. Submissions return queued
/// hashes, falling back to `0xdead` once the queue is empty.
#[derive(Default)]
pub struct FakeMirror {
    inner: Mutex<FakeMirrorInner>,
}

impl FakeMirror {
    pub fn set_nonce(&self, address: Felt, nonce: Felt) {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.nonces.insert(address, nonce);
    }

    pub fn nonce_queries(&self) -> usize {
        self.inner.lock().expect("Lock poisoned").nonce_queries
    }

    /// Balances read zero for the first `queries` balance checks.
    pub fn fund_after_queries(&self, queries: usize) {
        self.inner.lock().expect("Lock poisoned").fund_after_queries = queries;
    }

    pub fn balance_queries(&self) -> usize {
        self.inner.lock().expect("Lock poisoned").balance_queries
    }

    pub fn set_receipt(&self, receipt: TransactionReceipt) {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.receipts.insert(receipt.transaction_hash, receipt);
    }

    pub fn receipt_queries(&self) -> usize {
        self.inner.lock().expect("Lock poisoned").receipt_queries
    }

    pub fn expect_hashes(&self, hashes: impl IntoIterator<Item = Felt>) {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.hashes.extend(hashes);
    }

    /// Fail the submission attempt with index `attempt` (counted from zero
    /// across all kinds, retries included) with an RPC error `code`.
    pub fn fail_submission(&self, attempt: usize, code: i64) {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.failures.insert(attempt, code);
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.inner.lock().expect("Lock poisoned").submitted.clone()
    }

    fn submit(&self, submitted: Submitted) -> Result<Felt, RpcError> {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        let attempt = inner.attempts;
        inner.attempts += 1;

        if let Some(code) = inner.failures.remove(&attempt) {
            return Err(rpc_error(code));
        }

        inner.submitted.push(submitted);
        Ok(inner
            .hashes
            .pop_front()
            .unwrap_or_else(|| Felt::from(0xdead_u64)))
    }
}

#[async_trait]
impl MirrorChain for FakeMirror {
    async fn add_declare_transaction(
        &self,
        transaction: &BroadcastedDeclareTransaction,
    ) -> Result<Felt, RpcError> {
        self.submit(Submitted::Declare(transaction.clone()))
    }

    async fn add_deploy_account_transaction(
        &self,
        transaction: &BroadcastedDeployAccountTransaction,
    ) -> Result<Felt, RpcError> {
        self.submit(Submitted::DeployAccount(transaction.clone()))
    }

    async fn add_invoke_transaction(
        &self,
        transaction: &BroadcastedInvokeTransaction,
    ) -> Result<Felt, RpcError> {
        self.submit(Submitted::Invoke(transaction.clone()))
    }

    async fn consume_l1_message(
        &self,
        transaction: &L1HandlerRequest,
        fee: Felt,
    ) -> Result<Option<Felt>, RpcError> {
        self.submit(Submitted::L1Handler(transaction.clone(), fee))
            .map(|_| None)
    }

    async fn nonce(&self, address: Felt) -> Result<Felt, RpcError> {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.nonce_queries += 1;

        Ok(inner.nonces.get(&address).copied().unwrap_or(Felt::ZERO))
    }

    async fn call(&self, _request: &FunctionCall) -> Result<Vec<Felt>, RpcError> {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.balance_queries += 1;

        let low = if inner.balance_queries > inner.fund_after_queries {
            Felt::from(1_000_u64)
        } else {
            Felt::ZERO
        };

        Ok(vec![low, Felt::ZERO])
    }

    async fn transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<TransactionReceipt, RpcError> {
        let mut inner = self.inner.lock().expect("Lock poisoned");
        inner.receipt_queries += 1;

        inner
            .receipts
            .get(&transaction_hash)
            .cloned()
            .ok_or_else(|| rpc_error(29))
    }
}

#[derive(Default)]
pub struct FakeFeeToggle {
    calls: Mutex<Vec<bool>>,
    fail: AtomicBool,
}

impl FakeFeeToggle {
    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().expect("Lock poisoned").clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeeToggle for FakeFeeToggle {
    async fn set_fees_disabled(&self, disabled: bool) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("Extrinsic rejected");
        }

        self.calls.lock().expect("Lock poisoned").push(disabled);

        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingAlerts {
    pub fn subjects(&self) -> Vec<String> {
        self.alerts
            .lock()
            .expect("Lock poisoned")
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }
}

impl AlertSink for RecordingAlerts {
    fn send(&self, subject: &str, message: &str) {
        self.alerts
            .lock()
            .expect("Lock poisoned")
            .push((subject.to_string(), message.to_string()));
    }
}

/// Fakes for every collaborator of a [`BlockSync`].
pub struct Fakes {
    pub source: Arc<FakeSource>,
    pub mirror: Arc<FakeMirror>,
    pub storage: Arc<InMemoryCheckpointStorage>,
    pub alerts: Arc<RecordingAlerts>,
    pub toggle: Arc<FakeFeeToggle>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            source: Arc::new(FakeSource::default()),
            mirror: Arc::new(FakeMirror::default()),
            storage: Arc::new(InMemoryCheckpointStorage::new()),
            alerts: Arc::new(RecordingAlerts::default()),
            toggle: Arc::new(FakeFeeToggle::default()),
        }
    }

    pub fn block_sync(&self) -> BlockSync {
        let replayer = TransactionReplayer::new(
            self.source.clone(),
            self.mirror.clone(),
            self.storage.clone(),
            self.alerts.clone(),
            self.toggle.clone(),
            ReplayConfig::default(),
        );
        let verifier = EventVerifier::new(
            self.source.clone(),
            self.mirror.clone(),
            self.storage.clone(),
            self.alerts.clone(),
            VerifierConfig::default(),
        );

        BlockSync::new(
            self.source.clone(),
            self.storage.clone(),
            self.alerts.clone(),
            replayer,
            verifier,
        )
    }

    pub async fn checkpoint(&self, checkpoint: Checkpoint) -> Option<i64> {
        self.storage.get(checkpoint).await.unwrap()
    }

    /// Invoke builders reuse the transaction hash as nonce.
    pub fn replayed_invokes(&self) -> Vec<Felt> {
        self.mirror
            .submitted()
            .into_iter()
            .filter_map(|submitted| match submitted {
                Submitted::Invoke(tx) => tx.nonce,
                _ => None,
            })
            .collect()
    }
}

