//! Retry decorator for chain clients.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use capstan_core::{BlockData, BlockInfo, Result, TxData};

use crate::client::ChainClient;

/// Pause between attempts before the backoff doubling kicks in.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Wraps any [`ChainClient`] with per-attempt timeouts and exponential
/// backoff.
///
/// Attempt `k` runs under a timeout of `t₀ · 2^k`; a timed-out or
/// retryable-failed attempt is retried after a similarly doubling
/// pause, up to `max_retries` retries. Non-retryable errors propagate
/// immediately.
pub struct RetryClient<C> {
    inner: C,
    base_timeout: Duration,
    max_retries: u32,
}

impl<C> RetryClient<C> {
    /// Wrap a client.
    pub fn new(inner: C, base_timeout: Duration, max_retries: u32) -> Self {
        Self {
            inner,
            base_timeout,
            max_retries,
        }
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let attempt_timeout = self.base_timeout * 2u32.saturating_pow(attempt);
            let outcome = match tokio::time::timeout(attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(capstan_core::Error::UpstreamTimeout(format!(
                    "no response within {:?}",
                    attempt_timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let pause = RETRY_BACKOFF * 2u32.saturating_pow(attempt);
                    warn!(attempt, error = %e, "upstream call failed, retrying in {:?}", pause);
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<C: ChainClient> ChainClient for RetryClient<C> {
    async fn tip_height(&self) -> Result<u64> {
        self.retry(|| self.inner.tip_height()).await
    }

    async fn block_hash(&self, height: u64) -> Result<String> {
        self.retry(|| self.inner.block_hash(height)).await
    }

    async fn block(&self, height: u64) -> Result<BlockData> {
        self.retry(|| self.inner.block(height)).await
    }

    async fn raw_transaction(&self, txid: &str) -> Result<TxData> {
        self.retry(|| self.inner.raw_transaction(txid)).await
    }

    async fn block_info_by_hash(&self, hash: &str) -> Result<BlockInfo> {
        self.retry(|| self.inner.block_info_by_hash(hash)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use capstan_core::Error;

    /// Client that fails a set number of times before succeeding.
    struct FlakyClient {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyClient {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainClient for FlakyClient {
        async fn tip_height(&self) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Upstream("transient".into()));
            }
            Ok(42)
        }

        async fn block_hash(&self, _height: u64) -> Result<String> {
            Err(Error::NotFound("fixed".into()))
        }

        async fn block(&self, _height: u64) -> Result<BlockData> {
            Err(Error::Upstream("always down".into()))
        }

        async fn raw_transaction(&self, _txid: &str) -> Result<TxData> {
            Err(Error::Upstream("always down".into()))
        }

        async fn block_info_by_hash(&self, _hash: &str) -> Result<BlockInfo> {
            Err(Error::Upstream("always down".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let client = RetryClient::new(FlakyClient::new(2), Duration::from_secs(1), 3);
        assert_eq!(client.tip_height().await.unwrap(), 42);
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let client = RetryClient::new(FlakyClient::new(0), Duration::from_secs(1), 2);
        let result = client.block(5).await;
        assert!(matches!(result, Err(Error::Upstream(_))));
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_immediately() {
        let client = RetryClient::new(FlakyClient::new(0), Duration::from_secs(1), 5);
        let result = client.block_hash(9).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        // NotFound is not retryable, so exactly one attempt happened.
    }
}
