use std::{path::PathBuf, time::Duration};

use clap::Args;
use starknet_rpc_client::dto::Felt;

pub fn parse_felt(value: &str) -> Result<Felt, String> {
    let parsed = if value.starts_with("0x") || value.starts_with("0X") {
        Felt::from_hex(value)
    } else {
        Felt::from_dec_str(value)
    };

    parsed.map_err(|e| format!("Invalid field element '{value}': {e}"))
}

#[derive(Args)]
pub struct SourceArgs {
    /// JSON-RPC endpoint of the node whose chain is mirrored
    #[arg(id = "source_rpc", long = "source-rpc", env = "RPC_URL_ORIGINAL_NODE")]
    pub url: String,
}

#[derive(Args)]
pub struct MirrorArgs {
    /// JSON-RPC endpoint of the node transactions are replayed onto
    #[arg(id = "mirror_rpc", long = "mirror-rpc", env = "RPC_URL_SYNCING_NODE")]
    pub url: String,

    /// Substrate websocket endpoint of the mirror node, used to switch its
    /// fee mode
    #[arg(
        long = "mirror-substrate-rpc",
        default_value = "ws://127.0.0.1:9944",
        env = "SUBSTRATE_URL_SYNCING_NODE"
    )]
    pub substrate_url: String,

    /// Wait after a fee mode switch for the extrinsic to be included
    #[arg(
        long = "fee-toggle-settle-delay",
        value_parser = humantime::parse_duration,
        default_value = "7s",
        env = "FEE_TOGGLE_SETTLE_DELAY"
    )]
    pub settle_delay: Duration,
}

#[derive(Args)]
pub struct RpcArgs {
    /// Timeout of a single JSON-RPC request
    #[arg(
        long = "rpc-timeout",
        value_parser = humantime::parse_duration,
        default_value = "60s",
        env = "RPC_TIMEOUT"
    )]
    pub timeout: Duration,
}

#[derive(Args)]
pub struct CheckpointStorageArgs {
    /// Path to the checkpoint database. Checkpoints are kept in memory and
    /// lost on exit if not set.
    #[arg(long = "checkpoint-storage", env = "CHECKPOINT_STORAGE_PATH")]
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Account whose transactions are re-signed and re-nonced by the service
    #[arg(
        long = "funding-address",
        value_parser = parse_felt,
        default_value = "0x1",
        env = "FUNDING_ADDRESS"
    )]
    pub funding_address: Felt,

    /// Token contract checked for a positive balance before deploying accounts
    #[arg(
        long = "fee-token-address",
        value_parser = parse_felt,
        default_value = "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7",
        env = "FEE_TOKEN_ADDRESS"
    )]
    pub fee_token_address: Felt,

    /// Block time of the mirror chain
    #[arg(
        long = "mirror-block-time",
        value_parser = humantime::parse_duration,
        default_value = "6s",
        env = "SYNCING_NODE_BLOCK_TIME"
    )]
    pub block_time: Duration,

    /// Interval between balance checks of an account waiting to be deployed
    #[arg(
        long = "funding-poll-interval",
        value_parser = humantime::parse_duration,
        default_value = "6s",
        env = "FUNDING_POLL_INTERVAL"
    )]
    pub funding_poll_interval: Duration,

    /// Give up waiting for an account to be funded after this long. Waits
    /// forever if not set.
    #[arg(
        long = "funding-timeout",
        value_parser = humantime::parse_duration,
        env = "FUNDING_TIMEOUT"
    )]
    pub funding_timeout: Option<Duration>,

    /// Fee allowance for consuming L1 messages on the mirror chain
    #[arg(
        long = "l1-handler-fee",
        value_parser = parse_felt,
        default_value = "0xfffffff",
        env = "L1_HANDLER_FEE"
    )]
    pub l1_handler_fee: Felt,

    /// Attempts to submit a transaction failing account validation
    #[arg(long = "max-attempts", default_value = "3", env = "MAX_SUBMIT_ATTEMPTS")]
    pub max_attempts: u32,

    /// Delay between submission attempts
    #[arg(
        long = "retry-delay",
        value_parser = humantime::parse_duration,
        default_value = "30s",
        env = "SUBMIT_RETRY_DELAY"
    )]
    pub retry_delay: Duration,
}

#[derive(Args)]
pub struct VerifierArgs {
    /// Blocks up to and including this one are never verified
    #[arg(
        long = "skip-verification-blocks",
        default_value = "-1",
        allow_negative_numbers = true,
        env = "SKIP_VERIFCATION_BLOCKS"
    )]
    pub skip_below: i64,

    /// Contract whose events are compared between chains
    #[arg(
        long = "event-contract",
        value_parser = parse_felt,
        default_value = "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7",
        env = "VERIFY_EVENT_CONTRACT"
    )]
    pub event_contract: Felt,

    /// First key of the events compared between chains
    #[arg(
        long = "event-selector",
        value_parser = parse_felt,
        default_value = "0x0099cd8bde557814842a3121e8ddfd433a539b8c9f14bf31ebf108d12e6196e9",
        env = "VERIFY_EVENT_SELECTOR"
    )]
    pub event_selector: Felt,
}

#[derive(Args)]
pub struct AlertArgs {
    /// Webhook receiving alerts as JSON. Alerts are only logged if not set.
    #[arg(long = "alert-webhook", env = "SYNCING_SERVICE_ALERTS_WEBHOOK")]
    pub webhook_url: Option<String>,

    /// Timeout of a single alert delivery
    #[arg(
        id = "alert_timeout",
        long = "alert-timeout",
        value_parser = humantime::parse_duration,
        default_value = "10s",
        env = "ALERT_TIMEOUT"
    )]
    pub timeout: Duration,
}

#[derive(Args)]
pub struct PrometheusArgs {
    /// Address of the prometheus endpoint
    #[arg(
        long = "prometheus-endpoint",
        default_value = "0.0.0.0:9090",
        env = "PROMETHEUS_ENDPOINT"
    )]
    pub endpoint: String,
}

#[derive(Args)]
pub struct WebServerArgs {
    /// Address the trigger server listens on
    #[arg(long = "web-server-address", default_value = "0.0.0.0:3000", env = "WEB_SERVER_ADDRESS")]
    pub address: String,

    /// Authorization token for web-server
    #[arg(long = "web-server-token", env = "WEB_SERVER_TOKEN")]
    pub token: String,

    /// Also start a sync pass on this interval
    #[arg(
        long = "sync-interval",
        value_parser = humantime::parse_duration,
        env = "SYNC_INTERVAL"
    )]
    pub sync_interval: Option<Duration>,
}
