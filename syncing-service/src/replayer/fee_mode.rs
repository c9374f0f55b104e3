use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use starknet_rpc_client::dto::Transaction;
use subxt::{
    dynamic::{self, Value},
    OnlineClient, SubstrateConfig,
};

/// Administrative switch of the mirror chain's fee enforcement.
#[async_trait]
pub trait FeeToggle: Send + Sync {
    async fn set_fees_disabled(&self, disabled: bool) -> anyhow::Result<()>;
}

/// Toggles fees through the `Starknet::set_disable_fee` extrinsic of a
/// Substrate based mirror node.
pub struct SubstrateFeeToggle {
    api: OnlineClient<SubstrateConfig>,
    settle_delay: Duration,
}

impl SubstrateFeeToggle {
    pub async fn connect(url: &str, settle_delay: Duration) -> anyhow::Result<Self> {
        let api = OnlineClient::<SubstrateConfig>::from_insecure_url(url).await?;

        Ok(Self { api, settle_delay })
    }
}

#[async_trait]
impl FeeToggle for SubstrateFeeToggle {
    async fn set_fees_disabled(&self, disabled: bool) -> anyhow::Result<()> {
        log::info!("Setting disable fee to {disabled}");

        let call = dynamic::tx("Starknet", "set_disable_fee", vec![Value::bool(disabled)]);
        let hash = self.api.tx().create_unsigned(&call)?.submit().await?;

        log::debug!("set_disable_fee({disabled}) submitted in extrinsic {hash:?}");

        // The flag only takes effect once the extrinsic is included.
        tokio::time::sleep(self.settle_delay).await;

        Ok(())
    }
}

/// Keeps the mirror chain's fee mode in line with the transaction about to
/// be replayed: fee-less source transactions are replayed with fees
/// disabled, all others with fees enabled.
pub struct FeeModeController {
    toggle: Arc<dyn FeeToggle>,
    fees_disabled: bool,
}

impl FeeModeController {
    pub fn new(toggle: Arc<dyn FeeToggle>) -> Self {
        Self {
            toggle,
            fees_disabled: false,
        }
    }

    pub fn fees_disabled(&self) -> bool {
        self.fees_disabled
    }

    /// Unconditionally enable fees, regardless of the tracked mode.
    pub async fn enable_fees(&mut self) -> anyhow::Result<()> {
        self.toggle.set_fees_disabled(false).await?;
        self.fees_disabled = false;

        Ok(())
    }

    /// Returns `true` if the mode had to be switched.
    pub async fn reconcile(&mut self, transaction: &Transaction) -> anyhow::Result<bool> {
        let disable = transaction.is_fee_exempt();
        if disable == self.fees_disabled {
            return Ok(false);
        }

        self.toggle.set_fees_disabled(disable).await?;
        self.fees_disabled = disable;

        Ok(true)
    }
}
