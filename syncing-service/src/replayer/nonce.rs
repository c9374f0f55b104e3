use std::collections::{hash_map::Entry, HashMap};

use starknet_rpc_client::{dto::Felt, Error as RpcError};

use crate::chain::MirrorChain;

/// Assigns nonces for the funding account, whose transactions are
/// synthesized by the service instead of being copied from the source
/// chain. Every other sender keeps the nonce from the source transaction.
pub struct NonceAllocator {
    funding_address: Felt,
    next_nonces: HashMap<Felt, Felt>,
}

impl NonceAllocator {
    pub fn new(funding_address: Felt) -> Self {
        Self {
            funding_address,
            next_nonces: HashMap::new(),
        }
    }

    pub fn is_funding_address(&self, address: Felt) -> bool {
        address == self.funding_address
    }

    /// Forget allocated nonces, the next allocation reads the mirror again.
    pub fn reset(&mut self) {
        self.next_nonces.clear();
    }

    /// Nonce to submit a transaction from `sender` with.
    pub async fn resolve(
        &mut self,
        mirror: &dyn MirrorChain,
        sender: Felt,
        source_nonce: Option<Felt>,
    ) -> Result<Option<Felt>, RpcError> {
        if !self.is_funding_address(sender) {
            return Ok(source_nonce);
        }

        self.allocate(mirror, sender).await.map(Some)
    }

    /// The first allocation for an address starts from the nonce the mirror
    /// chain reports; later ones count up locally.
    pub async fn allocate(
        &mut self,
        mirror: &dyn MirrorChain,
        address: Felt,
    ) -> Result<Felt, RpcError> {
        let next = match self.next_nonces.entry(address) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let nonce = mirror.nonce(address).await?;
                log::info!("Nonce of {address:#x} on mirror chain: {nonce:#x}");
                entry.insert(nonce)
            }
        };

        let nonce = *next;
        *next = nonce + Felt::ONE;

        Ok(nonce)
    }
}
