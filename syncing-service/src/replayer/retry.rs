use std::{future::Future, time::Duration};

use starknet_rpc_client::Error as RpcError;

use super::ReplayError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Retry policy applied to every transaction submitted to the mirror chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Run `submit` until it succeeds or fails with something other than an
    /// account validation failure. A transaction the submission depends on
    /// (for example one funding the sender) may still sit in the mempool,
    /// so validation failures are retried after a fixed delay.
    pub async fn submit<T, F, Fut>(&self, mut submit: F) -> Result<T, ReplayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match submit().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_validation_failure() => {
                    if attempts >= self.max_attempts {
                        return Err(ReplayError::RetriesExhausted {
                            attempts,
                            source: err,
                        });
                    }

                    log::warn!(
                        "Account validation failed (attempt {attempts}/{}), retrying in {:?}",
                        self.max_attempts,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => return Err(ReplayError::Rpc(err)),
            }
        }
    }
}
