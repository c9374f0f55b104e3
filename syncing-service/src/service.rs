use std::time::Duration;

use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{server::PassRequest, sync::BlockSync};

/// Execute passes one after another until every request sender is gone.
/// Running them on a single task keeps passes from overlapping.
pub async fn run(mut block_sync: BlockSync, mut requests: UnboundedReceiver<PassRequest>) {
    while let Some(request) = requests.recv().await {
        log::info!("Starting {request:?}");

        // Failed passes are already logged and alerted on.
        match request {
            PassRequest::Sync { until } => {
                if let Ok(report) = block_sync.run(until).await {
                    log::info!(
                        "Sync pass finished: {} blocks, {} transactions replayed, last synced block {:?}",
                        report.blocks_synced,
                        report.transactions_replayed,
                        report.last_synced_block,
                    );

                    if let Err(err) = report.verification {
                        log::warn!("Synced blocks failed verification: {err}");
                    }
                }
            }
            PassRequest::VerifyEvents => {
                if let Ok(report) = block_sync.verifier().run().await {
                    log::info!(
                        "Verified {} blocks, last verified block {:?}",
                        report.blocks_verified,
                        report.last_verified_block
                    );
                }
            }
        }
    }

    log::info!("Pass request channel closed, stopping");
}

/// Request a full sync pass every `interval`, starting immediately.
pub fn spawn_scheduler(sender: UnboundedSender<PassRequest>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if sender.send(PassRequest::Sync { until: None }).is_err() {
                log::info!("Scheduler stopped: service loop is gone");
                return;
            }
        }
    })
}
