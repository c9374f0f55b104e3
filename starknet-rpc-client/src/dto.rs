use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use starknet_types_core::felt::Felt;

/// Declare version starting from which classes are Sierra (Cairo 1) classes.
pub const SIERRA_DECLARE_VERSION: Felt = Felt::TWO;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BlockHashAndNumber {
    pub block_hash: Felt,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockWithTxs {
    pub block_number: u64,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Declare,
    DeployAccount,
    Invoke,
    L1Handler,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Declare => "DECLARE",
            TransactionKind::DeployAccount => "DEPLOY_ACCOUNT",
            TransactionKind::Invoke => "INVOKE",
            TransactionKind::L1Handler => "L1_HANDLER",
        }
    }
}

/// Transaction as returned by `starknet_getBlockWithTxs` and
/// `starknet_getTransactionByHash`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transaction {
    Declare(DeclareTransaction),
    DeployAccount(DeployAccountTransaction),
    Invoke(InvokeTransaction),
    L1Handler(L1HandlerTransaction),
}

impl Transaction {
    pub fn hash(&self) -> Felt {
        match self {
            Transaction::Declare(tx) => tx.transaction_hash,
            Transaction::DeployAccount(tx) => tx.transaction_hash,
            Transaction::Invoke(tx) => tx.transaction_hash,
            Transaction::L1Handler(tx) => tx.transaction_hash,
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Transaction::Declare(_) => TransactionKind::Declare,
            Transaction::DeployAccount(_) => TransactionKind::DeployAccount,
            Transaction::Invoke(_) => TransactionKind::Invoke,
            Transaction::L1Handler(_) => TransactionKind::L1Handler,
        }
    }

    /// `None` for transactions that carry no max fee at all (L1 handlers).
    pub fn max_fee(&self) -> Option<Felt> {
        match self {
            Transaction::Declare(tx) => tx.max_fee,
            Transaction::DeployAccount(tx) => tx.max_fee,
            Transaction::Invoke(tx) => tx.max_fee,
            Transaction::L1Handler(_) => None,
        }
    }

    /// Transactions with an explicit zero max fee were executed with fees
    /// disabled on the source chain.
    pub fn is_fee_exempt(&self) -> bool {
        self.max_fee() == Some(Felt::ZERO)
    }

    pub fn sender_address(&self) -> Option<Felt> {
        match self {
            Transaction::Declare(tx) => Some(tx.sender_address),
            Transaction::Invoke(tx) => Some(tx.sender_address),
            Transaction::DeployAccount(_) | Transaction::L1Handler(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeclareTransaction {
    pub transaction_hash: Felt,
    pub class_hash: Felt,
    pub sender_address: Felt,
    #[serde(default)]
    pub compiled_class_hash: Option<Felt>,
    #[serde(default)]
    pub max_fee: Option<Felt>,
    pub version: Felt,
    #[serde(default)]
    pub signature: Vec<Felt>,
    #[serde(default)]
    pub nonce: Option<Felt>,
}

impl DeclareTransaction {
    /// Declares from version 2 on carry Sierra classes.
    pub fn is_sierra(&self) -> bool {
        self.version >= SIERRA_DECLARE_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeployAccountTransaction {
    pub transaction_hash: Felt,
    pub class_hash: Felt,
    pub contract_address_salt: Felt,
    #[serde(default)]
    pub constructor_calldata: Vec<Felt>,
    #[serde(default)]
    pub max_fee: Option<Felt>,
    pub version: Felt,
    #[serde(default)]
    pub signature: Vec<Felt>,
    #[serde(default)]
    pub nonce: Option<Felt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvokeTransaction {
    pub transaction_hash: Felt,
    pub sender_address: Felt,
    #[serde(default)]
    pub calldata: Vec<Felt>,
    #[serde(default)]
    pub max_fee: Option<Felt>,
    pub version: Felt,
    #[serde(default)]
    pub signature: Vec<Felt>,
    #[serde(default)]
    pub nonce: Option<Felt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct L1HandlerTransaction {
    pub transaction_hash: Felt,
    pub contract_address: Felt,
    pub entry_point_selector: Felt,
    #[serde(default)]
    pub calldata: Vec<Felt>,
    #[serde(default)]
    pub nonce: Option<Felt>,
    pub version: Felt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub from_address: Felt,
    #[serde(default)]
    pub keys: Vec<Felt>,
    #[serde(default)]
    pub data: Vec<Felt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: Felt,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Contract class as returned by `starknet_getClass`. Kept as raw JSON so
/// that the program payload is passed through to the mirror node untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractClass(pub Map<String, Value>);

impl ContractClass {
    pub fn sierra_program(&self) -> Option<&Value> {
        self.0.get("sierra_program")
    }

    /// Shape a Sierra class the way `starknet_addDeclareTransaction`
    /// expects it: debug info is dropped and the ABI is sent as a JSON
    /// string. `sierra_program` is never modified.
    pub fn into_declare_envelope(mut self) -> Self {
        self.0.remove("sierra_program_debug_info");

        if let Some(abi) = self.0.get_mut("abi") {
            if !abi.is_string() {
                *abi = Value::String(abi.to_string());
            }
        }

        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "DECLARE")]
pub struct BroadcastedDeclareTransaction {
    pub contract_class: ContractClass,
    pub version: Felt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee: Option<Felt>,
    pub signature: Vec<Felt>,
    pub sender_address: Felt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Felt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiled_class_hash: Option<Felt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "DEPLOY_ACCOUNT")]
pub struct BroadcastedDeployAccountTransaction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee: Option<Felt>,
    pub signature: Vec<Felt>,
    pub nonce: Felt,
    pub contract_address_salt: Felt,
    pub constructor_calldata: Vec<Felt>,
    pub class_hash: Felt,
    pub version: Felt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "INVOKE")]
pub struct BroadcastedInvokeTransaction {
    pub sender_address: Felt,
    pub calldata: Vec<Felt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee: Option<Felt>,
    pub signature: Vec<Felt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Felt>,
    pub version: Felt,
}

/// Payload of the mirror node's non-standard `starknet_consumeL1Message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct L1HandlerRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Felt>,
    pub contract_address: Felt,
    pub entry_point_selector: Felt,
    pub calldata: Vec<Felt>,
    pub version: Felt,
}

impl From<&L1HandlerTransaction> for L1HandlerRequest {
    fn from(tx: &L1HandlerTransaction) -> Self {
        Self {
            nonce: tx.nonce,
            contract_address: tx.contract_address,
            entry_point_selector: tx.entry_point_selector,
            calldata: tx.calldata.clone(),
            version: tx.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionCall {
    pub contract_address: Felt,
    pub entry_point_selector: Felt,
    pub calldata: Vec<Felt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub(crate) struct SubmittedTransaction {
    pub transaction_hash: Felt,
}
