use clap::{Args, Parser, Subcommand};
use starknet_rpc_client::dto::Felt;

mod common;

pub use common::{
    parse_felt, AlertArgs, CheckpointStorageArgs, MirrorArgs, PrometheusArgs, ReplayArgs,
    RpcArgs, SourceArgs, VerifierArgs, WebServerArgs,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommands,
}

#[derive(Subcommand)]
pub enum CliCommands {
    /// Start the service: sync and verification passes are triggered over
    /// HTTP and, optionally, on a schedule
    Serve(ServeArgs),

    /// Run a single sync pass followed by event verification
    Sync(SyncArgs),

    /// Verify events of synced blocks
    Verify(VerifyArgs),

    /// Compare fee events of a single transaction between chains
    VerifyTransaction(VerifyTransactionArgs),

    /// Print stored checkpoints
    Checkpoints(CheckpointsArgs),
}

#[derive(Args)]
pub struct ChainArgs {
    #[clap(flatten)]
    pub source: SourceArgs,
    #[clap(flatten)]
    pub mirror: MirrorArgs,
    #[clap(flatten)]
    pub rpc: RpcArgs,
    #[clap(flatten)]
    pub checkpoint_storage: CheckpointStorageArgs,
    #[clap(flatten)]
    pub replay: ReplayArgs,
    #[clap(flatten)]
    pub verifier: VerifierArgs,
    #[clap(flatten)]
    pub alert: AlertArgs,
}

#[derive(Args)]
pub struct ServeArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,
    #[clap(flatten)]
    pub web_server: WebServerArgs,
    #[clap(flatten)]
    pub prometheus: PrometheusArgs,
}

#[derive(Args)]
pub struct SyncArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,

    /// Do not sync past this block
    #[arg(long = "sync-to")]
    pub sync_to: Option<u64>,
}

#[derive(Args)]
pub struct VerifyArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,
}

#[derive(Args)]
pub struct VerifyTransactionArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,

    /// Hash of the transaction on the source chain
    #[arg(long = "hash", value_parser = parse_felt)]
    pub hash: Felt,
}

#[derive(Args)]
pub struct CheckpointsArgs {
    #[clap(flatten)]
    pub checkpoint_storage: CheckpointStorageArgs,
}
