extern crate pretty_env_logger;

use std::{net::TcpListener, sync::Arc};

use anyhow::Context;
use clap::Parser;
use pretty_env_logger::env_logger::fmt::TimestampPrecision;
use starknet_rpc_client::{dto::Felt, StarknetRpc};
use tokio::sync::mpsc;
use utils_prometheus::MetricsBuilder;

mod alert;
mod chain;
mod checkpoint_storage;
mod cli;
mod replayer;
mod server;
mod service;
mod sync;
mod verifier;

#[cfg(test)]
mod test_utils;

use alert::{AlertSink, LogAlertSink, WebhookAlertSink};
use checkpoint_storage::{
    Checkpoint, CheckpointStorage, InMemoryCheckpointStorage, SledCheckpointStorage,
};
use cli::{
    AlertArgs, ChainArgs, CheckpointStorageArgs, CheckpointsArgs, Cli, CliCommands, ServeArgs,
    SyncArgs, VerifyArgs, VerifyTransactionArgs,
};
use replayer::{fee_mode::SubstrateFeeToggle, retry::RetryPolicy, ReplayConfig, TransactionReplayer};
use sync::BlockSync;
use verifier::{EventVerifier, VerifierConfig};

/// ETH ERC-20 contract on Starknet.
pub const ETH_FEE_TOKEN_ADDRESS: Felt =
    Felt::from_hex_unchecked("0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(Some(TimestampPrecision::Seconds))
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    match cli.command {
        CliCommands::Serve(args) => serve(args).await,
        CliCommands::Sync(args) => sync_once(args).await,
        CliCommands::Verify(args) => verify(args).await,
        CliCommands::VerifyTransaction(args) => verify_transaction(args).await,
        CliCommands::Checkpoints(args) => print_checkpoints(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let ServeArgs {
        chain,
        web_server,
        prometheus,
    } = args;

    let block_sync = create_block_sync(&chain).await?;

    MetricsBuilder::new()
        .register_service(&block_sync)?
        .build()
        .run(&prometheus.endpoint)
        .await
        .with_context(|| format!("Failed to serve metrics on {}", prometheus.endpoint))?;

    let (sender, receiver) = mpsc::unbounded_channel();

    let listener = TcpListener::bind(&web_server.address)
        .with_context(|| format!("Failed to bind web server to {}", web_server.address))?;
    let server = server::create(listener, web_server.token, sender.clone())?;
    let server_handle = server.handle();
    tokio::spawn(server);

    log::info!("Listening for pass requests on {}", web_server.address);

    let scheduler = web_server
        .sync_interval
        .map(|interval| service::spawn_scheduler(sender.clone(), interval));
    // Only the server and the scheduler keep the service loop alive.
    drop(sender);

    tokio::select! {
        _ = service::run(block_sync, receiver) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            log::info!("Shutting down");
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    server_handle.stop(true).await;

    Ok(())
}

async fn sync_once(args: SyncArgs) -> anyhow::Result<()> {
    let mut block_sync = create_block_sync(&args.chain).await?;

    let report = block_sync.run(args.sync_to).await?;
    log::info!(
        "Synced {} blocks ({} transactions), last synced block {:?}",
        report.blocks_synced,
        report.transactions_replayed,
        report.last_synced_block
    );

    let verification = report.verification?;
    log::info!(
        "Verified {} blocks, last verified block {:?}",
        verification.blocks_verified,
        verification.last_verified_block
    );

    Ok(())
}

async fn verify(args: VerifyArgs) -> anyhow::Result<()> {
    let (verifier, _) = create_verifier(&args.chain)?;

    let report = verifier.run().await?;
    log::info!(
        "Verified {} blocks, last verified block {:?}",
        report.blocks_verified,
        report.last_verified_block
    );

    Ok(())
}

async fn verify_transaction(args: VerifyTransactionArgs) -> anyhow::Result<()> {
    let (verifier, _) = create_verifier(&args.chain)?;

    let verdict = verifier.verify_transaction_by_hash(args.hash).await?;
    log::info!("Transaction {:#x}: {verdict:?}", args.hash);

    if !verdict.is_match() {
        anyhow::bail!("Events of transaction {:#x} do not match", args.hash);
    }

    Ok(())
}

async fn print_checkpoints(args: CheckpointsArgs) -> anyhow::Result<()> {
    let storage = create_checkpoint_storage(&args.checkpoint_storage)?;

    for checkpoint in Checkpoint::ALL {
        match storage.get(checkpoint).await? {
            Some(value) => println!("{checkpoint} = {value}"),
            None => println!("{checkpoint} is not set"),
        }
    }

    Ok(())
}

fn create_checkpoint_storage(
    args: &CheckpointStorageArgs,
) -> anyhow::Result<Arc<dyn CheckpointStorage>> {
    Ok(match &args.path {
        Some(path) => Arc::new(
            SledCheckpointStorage::open(path)
                .with_context(|| format!("Failed to open checkpoint storage at {path:?}"))?,
        ),
        None => {
            log::warn!("No checkpoint storage path set, progress will be lost on exit");
            Arc::new(InMemoryCheckpointStorage::new())
        }
    })
}

fn create_alert_sink(args: &AlertArgs) -> anyhow::Result<Arc<dyn AlertSink>> {
    Ok(match &args.webhook_url {
        Some(url) => Arc::new(
            WebhookAlertSink::new(url.clone(), args.timeout)
                .context("Failed to create alert webhook client")?,
        ),
        None => Arc::new(LogAlertSink),
    })
}

struct Chains {
    source: Arc<StarknetRpc>,
    mirror: Arc<StarknetRpc>,
    storage: Arc<dyn CheckpointStorage>,
    alerts: Arc<dyn AlertSink>,
}

fn create_chains(args: &ChainArgs) -> anyhow::Result<Chains> {
    let timeout = Some(args.rpc.timeout);

    log::info!(
        "Replaying transactions of {} onto {}",
        args.source.url,
        args.mirror.url
    );

    Ok(Chains {
        source: Arc::new(
            StarknetRpc::new(&args.source.url, timeout).context("Failed to create source client")?,
        ),
        mirror: Arc::new(
            StarknetRpc::new(&args.mirror.url, timeout).context("Failed to create mirror client")?,
        ),
        storage: create_checkpoint_storage(&args.checkpoint_storage)?,
        alerts: create_alert_sink(&args.alert)?,
    })
}

fn verifier_config(args: &ChainArgs) -> VerifierConfig {
    VerifierConfig {
        skip_below: args.verifier.skip_below,
        event_contract: args.verifier.event_contract,
        event_selector: args.verifier.event_selector,
    }
}

fn create_verifier(args: &ChainArgs) -> anyhow::Result<(EventVerifier, Chains)> {
    let chains = create_chains(args)?;
    let verifier = EventVerifier::new(
        chains.source.clone(),
        chains.mirror.clone(),
        chains.storage.clone(),
        chains.alerts.clone(),
        verifier_config(args),
    );

    Ok((verifier, chains))
}

async fn create_block_sync(args: &ChainArgs) -> anyhow::Result<BlockSync> {
    let (verifier, chains) = create_verifier(args)?;

    let fee_toggle = SubstrateFeeToggle::connect(&args.mirror.substrate_url, args.mirror.settle_delay)
        .await
        .with_context(|| format!("Failed to connect to {}", args.mirror.substrate_url))?;

    let replay = &args.replay;
    let replayer = TransactionReplayer::new(
        chains.source.clone(),
        chains.mirror.clone(),
        chains.storage.clone(),
        chains.alerts.clone(),
        Arc::new(fee_toggle),
        ReplayConfig {
            funding_address: replay.funding_address,
            fee_token_address: replay.fee_token_address,
            block_time: replay.block_time,
            funding_poll_interval: replay.funding_poll_interval,
            funding_timeout: replay.funding_timeout,
            l1_handler_fee: replay.l1_handler_fee,
            retry: RetryPolicy {
                max_attempts: replay.max_attempts,
                delay: replay.retry_delay,
            },
        },
    );

    Ok(BlockSync::new(
        chains.source,
        chains.storage,
        chains.alerts,
        replayer,
        verifier,
    ))
}
