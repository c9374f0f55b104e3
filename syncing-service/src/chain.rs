use async_trait::async_trait;
use starknet_rpc_client::{
    dto::{
        BlockWithTxs, BroadcastedDeclareTransaction, BroadcastedDeployAccountTransaction,
        BroadcastedInvokeTransaction, ContractClass, Felt, FunctionCall, L1HandlerRequest,
        Transaction, TransactionReceipt,
    },
    Error as RpcError, StarknetRpc,
};

/// Read access to the chain being mirrored.
#[async_trait]
pub trait SourceChain: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, RpcError>;

    async fn block_with_txs(&self, block_number: u64) -> Result<BlockWithTxs, RpcError>;

    async fn transaction_by_hash(&self, transaction_hash: Felt) -> Result<Transaction, RpcError>;

    async fn transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<TransactionReceipt, RpcError>;

    async fn class(&self, class_hash: Felt) -> Result<ContractClass, RpcError>;
}

/// Read-write access to the chain transactions are replayed onto.
#[async_trait]
pub trait MirrorChain: Send + Sync {
    async fn add_declare_transaction(
        &self,
        transaction: &BroadcastedDeclareTransaction,
    ) -> Result<Felt, RpcError>;

    async fn add_deploy_account_transaction(
        &self,
        transaction: &BroadcastedDeployAccountTransaction,
    ) -> Result<Felt, RpcError>;

    async fn add_invoke_transaction(
        &self,
        transaction: &BroadcastedInvokeTransaction,
    ) -> Result<Felt, RpcError>;

    async fn consume_l1_message(
        &self,
        transaction: &L1HandlerRequest,
        fee: Felt,
    ) -> Result<Option<Felt>, RpcError>;

    async fn nonce(&self, address: Felt) -> Result<Felt, RpcError>;

    async fn call(&self, request: &FunctionCall) -> Result<Vec<Felt>, RpcError>;

    async fn transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<TransactionReceipt, RpcError>;
}

#[async_trait]
impl SourceChain for StarknetRpc {
    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        Ok(self.block_hash_and_number().await?.block_number)
    }

    async fn block_with_txs(&self, block_number: u64) -> Result<BlockWithTxs, RpcError> {
        StarknetRpc::block_with_txs(self, block_number).await
    }

    async fn transaction_by_hash(&self, transaction_hash: Felt) -> Result<Transaction, RpcError> {
        StarknetRpc::transaction_by_hash(self, transaction_hash).await
    }

    async fn transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<TransactionReceipt, RpcError> {
        StarknetRpc::transaction_receipt(self, transaction_hash).await
    }

    async fn class(&self, class_hash: Felt) -> Result<ContractClass, RpcError> {
        StarknetRpc::class(self, class_hash).await
    }
}

#[async_trait]
impl MirrorChain for StarknetRpc {
    async fn add_declare_transaction(
        &self,
        transaction: &BroadcastedDeclareTransaction,
    ) -> Result<Felt, RpcError> {
        StarknetRpc::add_declare_transaction(self, transaction).await
    }

    async fn add_deploy_account_transaction(
        &self,
        transaction: &BroadcastedDeployAccountTransaction,
    ) -> Result<Felt, RpcError> {
        StarknetRpc::add_deploy_account_transaction(self, transaction).await
    }

    async fn add_invoke_transaction(
        &self,
        transaction: &BroadcastedInvokeTransaction,
    ) -> Result<Felt, RpcError> {
        StarknetRpc::add_invoke_transaction(self, transaction).await
    }

    async fn consume_l1_message(
        &self,
        transaction: &L1HandlerRequest,
        fee: Felt,
    ) -> Result<Option<Felt>, RpcError> {
        StarknetRpc::consume_l1_message(self, transaction, fee).await
    }

    async fn nonce(&self, address: Felt) -> Result<Felt, RpcError> {
        StarknetRpc::nonce(self, address).await
    }

    async fn call(&self, request: &FunctionCall) -> Result<Vec<Felt>, RpcError> {
        StarknetRpc::call(self, request).await
    }

    async fn transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<TransactionReceipt, RpcError> {
        StarknetRpc::transaction_receipt(self, transaction_hash).await
    }
}
