use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use reqwest::{Client, ClientBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

pub mod dto;
pub mod error;
pub mod utils;

use dto::{
    BlockHashAndNumber, BlockWithTxs, BroadcastedDeclareTransaction,
    BroadcastedDeployAccountTransaction, BroadcastedInvokeTransaction, ContractClass, Felt,
    FunctionCall, L1HandlerRequest, SubmittedTransaction, Transaction, TransactionReceipt,
};
pub use error::Error;

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Block tag used for reads that must observe transactions not yet
/// included into a block.
const PENDING: &str = "pending";
const LATEST: &str = "latest";

/// Starknet JSON-RPC client over HTTP.
#[derive(Clone)]
pub struct StarknetRpc {
    client: Client,
    url: String,
    request_id: Arc<AtomicU64>,
}

impl StarknetRpc {
    pub fn new(url: &str, timeout: Option<Duration>) -> Result<Self, Error> {
        let client = ClientBuilder::new();
        let client = match timeout {
            Some(timeout) => client.timeout(timeout),
            None => client,
        };

        Ok(Self {
            client: client.build()?,
            url: url.to_string(),
            request_id: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn request<P, R>(&self, method: &str, params: P) -> Result<R, Error>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        log::debug!("RPC request #{id} {method}");

        // Nodes report JSON-RPC errors with non-2xx statuses too, so the body
        // is parsed regardless of the HTTP status.
        let text = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .text()
            .await?;
        let response: RpcResponse = serde_json::from_str(&text)?;

        if let Some(RpcErrorObject {
            code,
            message,
            data,
        }) = response.error
        {
            log::debug!("RPC request #{id} {method} failed with code {code}: {message}");
            return Err(Error::Rpc {
                code,
                message,
                data,
            });
        }

        let result = response.result.ok_or(Error::MissingResult)?;

        Ok(serde_json::from_value(result)?)
    }

    pub async fn block_hash_and_number(&self) -> Result<BlockHashAndNumber, Error> {
        self.request("starknet_blockHashAndNumber", json!([])).await
    }

    pub async fn block_with_txs(&self, block_number: u64) -> Result<BlockWithTxs, Error> {
        self.request(
            "starknet_getBlockWithTxs",
            json!({ "block_id": { "block_number": block_number } }),
        )
        .await
    }

    pub async fn transaction_by_hash(&self, transaction_hash: Felt) -> Result<Transaction, Error> {
        self.request(
            "starknet_getTransactionByHash",
            json!({ "transaction_hash": transaction_hash }),
        )
        .await
    }

    pub async fn transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<TransactionReceipt, Error> {
        self.request(
            "starknet_getTransactionReceipt",
            json!({ "transaction_hash": transaction_hash }),
        )
        .await
    }

    pub async fn class(&self, class_hash: Felt) -> Result<ContractClass, Error> {
        self.request(
            "starknet_getClass",
            json!({ "block_id": LATEST, "class_hash": class_hash }),
        )
        .await
    }

    pub async fn nonce(&self, contract_address: Felt) -> Result<Felt, Error> {
        self.request(
            "starknet_getNonce",
            json!({ "block_id": PENDING, "contract_address": contract_address }),
        )
        .await
    }

    pub async fn call(&self, request: &FunctionCall) -> Result<Vec<Felt>, Error> {
        self.request(
            "starknet_call",
            json!({ "request": request, "block_id": LATEST }),
        )
        .await
    }

    pub async fn add_declare_transaction(
        &self,
        transaction: &BroadcastedDeclareTransaction,
    ) -> Result<Felt, Error> {
        self.request::<_, SubmittedTransaction>(
            "starknet_addDeclareTransaction",
            json!({ "declare_transaction": transaction }),
        )
        .await
        .map(|submitted| submitted.transaction_hash)
    }

    pub async fn add_deploy_account_transaction(
        &self,
        transaction: &BroadcastedDeployAccountTransaction,
    ) -> Result<Felt, Error> {
        self.request::<_, SubmittedTransaction>(
            "starknet_addDeployAccountTransaction",
            json!({ "deploy_account_transaction": transaction }),
        )
        .await
        .map(|submitted| submitted.transaction_hash)
    }

    pub async fn add_invoke_transaction(
        &self,
        transaction: &BroadcastedInvokeTransaction,
    ) -> Result<Felt, Error> {
        self.request::<_, SubmittedTransaction>(
            "starknet_addInvokeTransaction",
            json!({ "invoke_transaction": transaction }),
        )
        .await
        .map(|submitted| submitted.transaction_hash)
    }

    /// Execute an L1 handler on the node as if the corresponding L1 message
    /// had been received. Returns the transaction hash if the node reports it.
    pub async fn consume_l1_message(
        &self,
        transaction: &L1HandlerRequest,
        fee: Felt,
    ) -> Result<Option<Felt>, Error> {
        let result: Value = self
            .request(
                "starknet_consumeL1Message",
                json!({ "l1_handler_transaction": transaction, "fee": fee }),
            )
            .await?;

        log::debug!("starknet_consumeL1Message result: {result}");

        Ok(result
            .get("transaction_hash")
            .cloned()
            .and_then(|hash| serde_json::from_value(hash).ok()))
    }
}
