//! # RPC Gateway
//!
//! Ordered set of chain endpoints with failure accounting and failover.
//! A caller supplies a read operation over a provider handle; the gateway
//! iterates endpoints round-robin from a rotating start, skips endpoints that
//! are currently unhealthy, and retries whole passes with linear backoff
//! before reporting `AllProvidersFailed`.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ethers::providers::{Http, Provider};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::RpcSettings;
use crate::errors::RpcError;

//================================================================================================//
//                                          ENDPOINT                                              //
//================================================================================================//

struct Endpoint {
    masked_url: String,
    provider: Arc<Provider<Http>>,
    failure_count: AtomicU32,
    /// Milliseconds since gateway creation; 0 means "never failed".
    last_failure_ms: AtomicU64,
}

impl Endpoint {
    fn record_failure(&self, epoch: Instant) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms
            .store(epoch.elapsed().as_millis().max(1) as u64, Ordering::Relaxed);
    }

    fn clear_failures(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.last_failure_ms.store(0, Ordering::Relaxed);
    }

    fn is_skipped(&self, epoch: Instant, threshold: u32, skip_window_ms: u64) -> bool {
        if self.failure_count.load(Ordering::Relaxed) <= threshold {
            return false;
        }
        let last = self.last_failure_ms.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let now_ms = epoch.elapsed().as_millis() as u64;
        now_ms.saturating_sub(last) < skip_window_ms
    }
}

/// Mask an endpoint URL for logging: keep scheme and host, elide the path
/// (which frequently embeds an API key).
fn mask_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split('/').next().unwrap_or(rest);
            if rest.len() > host.len() {
                format!("{}://{}/…", scheme, host)
            } else {
                format!("{}://{}", scheme, host)
            }
        }
        None => "<invalid-url>".to_string(),
    }
}

//================================================================================================//
//                                           GATEWAY                                              //
//================================================================================================//

/// Failover gateway over the configured endpoint list.
pub struct RpcGateway {
    endpoints: Vec<Endpoint>,
    /// Rotating start: the last successful endpoint is tried first.
    cursor: AtomicUsize,
    settings: RpcSettings,
    epoch: Instant,
}

impl RpcGateway {
    pub fn new(settings: RpcSettings) -> Result<Self, RpcError> {
        if settings.urls.is_empty() {
            return Err(RpcError::NoEndpoints);
        }
        let mut endpoints = Vec::with_capacity(settings.urls.len());
        for url in &settings.urls {
            let provider = Provider::<Http>::try_from(url.as_str())
                .map_err(|_| RpcError::InvalidEndpoint(mask_url(url)))?;
            endpoints.push(Endpoint {
                masked_url: mask_url(url),
                provider: Arc::new(provider),
                failure_count: AtomicU32::new(0),
                last_failure_ms: AtomicU64::new(0),
            });
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            settings,
            epoch: Instant::now(),
        })
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Execute `op` against the first healthy endpoint, failing over across
    /// the list and retrying up to `max_retries` passes.
    pub async fn execute<T, F, Fut>(&self, method: &'static str, op: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<Provider<Http>>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let count = self.endpoints.len();
        let skip_window_ms = self.settings.skip_window().as_millis() as u64;
        let mut last_error = String::from("all endpoints unhealthy");

        for pass in 1..=self.settings.max_retries {
            let start = self.cursor.load(Ordering::Relaxed);
            for offset in 0..count {
                let idx = (start + offset) % count;
                let endpoint = &self.endpoints[idx];
                if endpoint.is_skipped(self.epoch, self.settings.failure_threshold, skip_window_ms)
                {
                    debug!(
                        method,
                        endpoint = %endpoint.masked_url,
                        "skipping unhealthy endpoint"
                    );
                    continue;
                }

                let attempt = timeout(self.settings.timeout(), op(endpoint.provider.clone())).await;
                match attempt {
                    Ok(Ok(value)) => {
                        endpoint.clear_failures();
                        self.cursor.store(idx, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Ok(Err(err)) => {
                        endpoint.record_failure(self.epoch);
                        last_error = err.to_string();
                        warn!(
                            method,
                            endpoint = %endpoint.masked_url,
                            error = %last_error,
                            "RPC call failed"
                        );
                    }
                    Err(_) => {
                        endpoint.record_failure(self.epoch);
                        last_error = format!("timeout after {} ms", self.settings.timeout_ms);
                        warn!(
                            method,
                            endpoint = %endpoint.masked_url,
                            timeout_ms = self.settings.timeout_ms,
                            "RPC call timed out"
                        );
                    }
                }
            }

            if pass < self.settings.max_retries {
                let backoff = self.settings.backoff_base() * pass;
                debug!(method, pass, backoff_ms = backoff.as_millis() as u64, "pass exhausted, backing off");
                sleep(backoff).await;
            }
        }

        Err(RpcError::AllProvidersFailed { last_error })
    }
}

impl std::fmt::Debug for RpcGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcGateway")
            .field(
                "endpoints",
                &self
                    .endpoints
                    .iter()
                    .map(|e| e.masked_url.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}
