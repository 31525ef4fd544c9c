// src/throttle.rs
use crate::cache::ResponseCache;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Floor between any two outbound calls, across all URLs.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(2100);
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Status and body of one upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}

/// Performs a single GET. Implementations must not retry on their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RawResponse>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RawResponse> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// Retries allowed after consecutive 429s on one request. `None` retries forever.
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: Some(DEFAULT_MAX_RATE_LIMIT_RETRIES),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub queue_length: usize,
    pub is_processing: bool,
}

struct Shared {
    cache: ResponseCache,
    queued: AtomicUsize,
    processing: AtomicBool,
}

struct QueuedRequest {
    url: String,
    enqueued_at: Instant,
    reply: oneshot::Sender<Result<Value>>,
}

/// Cloneable entry point for callers of a running [`Throttle`].
#[derive(Clone)]
pub struct ThrottleHandle {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<QueuedRequest>,
}

impl ThrottleHandle {
    /// Cached JSON for `url` if still fresh, otherwise queue a fetch and wait for it.
    #[instrument(skip(self))]
    pub async fn request(&self, url: &str) -> Result<Value> {
        if let Some(data) = self.shared.cache.get_fresh(url) {
            debug!("cache hit");
            return Ok(data);
        }

        let (reply, rx) = oneshot::channel();
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        let item = QueuedRequest {
            url: url.to_string(),
            enqueued_at: Instant::now(),
            reply,
        };
        if self.tx.send(item).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::QueueClosed);
        }

        rx.await.map_err(|_| AppError::QueueClosed)?
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            size: self.shared.cache.len(),
            queue_length: self.shared.queued.load(Ordering::SeqCst),
            is_processing: self.shared.processing.load(Ordering::SeqCst),
        }
    }
}

/// Serialized, rate-limited access to one upstream API.
///
/// Exactly one worker task consumes the queue, so at most one request is in
/// flight. The queue is unbounded.
pub struct Throttle {
    handle: ThrottleHandle,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl Throttle {
    /// Spawn the worker and cache sweep tasks. Must run inside a tokio runtime.
    pub fn start(fetcher: Arc<dyn Fetcher>, settings: ThrottleSettings) -> Self {
        let shared = Arc::new(Shared {
            cache: ResponseCache::new(CACHE_TTL),
            queued: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            shared: shared.clone(),
            fetcher,
            settings,
            last_request: None,
        };
        let worker = tokio::spawn(worker.run(rx, shutdown_rx.clone()));
        let sweeper = tokio::spawn(sweep_cache(shared.clone(), shutdown_rx));

        info!(
            min_interval_ms = MIN_REQUEST_INTERVAL.as_millis() as u64,
            cache_ttl_secs = CACHE_TTL.as_secs(),
            max_rate_limit_retries = ?settings.max_rate_limit_retries,
            "request throttle started"
        );

        Self {
            handle: ThrottleHandle { shared, tx },
            shutdown,
            worker,
            sweeper,
        }
    }

    pub fn handle(&self) -> ThrottleHandle {
        self.handle.clone()
    }

    /// Stop after the call in flight, if any, returns. A request waiting on
    /// spacing or a 429 back-off and every request still queued fail with
    /// `QueueClosed`.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for (name, task) in [("worker", self.worker), ("sweeper", self.sweeper)] {
            if let Err(e) = task.await {
                warn!("throttle {} task ended abnormally: {}", name, e);
            }
        }
        info!("request throttle stopped");
    }
}

struct Worker {
    shared: Arc<Shared>,
    fetcher: Arc<dyn Fetcher>,
    settings: ThrottleSettings,
    last_request: Option<Instant>,
}

impl Worker {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<QueuedRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let item = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            self.shared.queued.fetch_sub(1, Ordering::SeqCst);

            // an identical request queued behind the first is served from its result
            if let Some(data) = self.shared.cache.get_fresh(&item.url) {
                debug!(url = %item.url, "cache filled while queued");
                let _ = item.reply.send(Ok(data));
                continue;
            }

            self.shared.processing.store(true, Ordering::SeqCst);
            debug!(
                url = %item.url,
                queued_ms = item.enqueued_at.elapsed().as_millis() as u64,
                "processing request"
            );

            let result = self.execute(&item.url, &mut shutdown).await;

            self.shared.processing.store(false, Ordering::SeqCst);
            if item.reply.send(result).is_err() {
                debug!(url = %item.url, "caller dropped before the response arrived");
            }
        }

        rx.close();
        let mut rejected = 0usize;
        while let Ok(item) = rx.try_recv() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            let _ = item.reply.send(Err(AppError::QueueClosed));
            rejected += 1;
        }
        debug!(rejected, "throttle worker exiting");
    }

    /// Run one request to completion. A 429 retries the same URL before
    /// anything else in the queue is served. Shutdown interrupts the spacing
    /// and back-off waits but not a call already sent.
    async fn execute(
        &mut self,
        url: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Value> {
        let mut rate_limited: u32 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return Err(AppError::QueueClosed),
                _ = self.wait_for_slot() => {}
            }
            self.last_request = Some(Instant::now());

            let response = match timeout(REQUEST_TIMEOUT, self.fetcher.fetch(url)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(url, error = %e, "upstream request failed");
                    return Err(e);
                }
                Err(_) => {
                    warn!(url, "upstream request timed out");
                    return Err(AppError::Timeout(url.to_string()));
                }
            };

            if response.is_rate_limited() {
                rate_limited += 1;
                if let Some(max) = self.settings.max_rate_limit_retries {
                    if rate_limited > max {
                        warn!(url, attempts = rate_limited, "giving up after repeated 429s");
                        return Err(AppError::RateLimited {
                            url: url.to_string(),
                            attempts: rate_limited,
                        });
                    }
                }
                warn!(
                    url,
                    attempt = rate_limited,
                    backoff_secs = RATE_LIMIT_BACKOFF.as_secs(),
                    "rate limited, backing off"
                );
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        info!(url, attempts = rate_limited, "back-off abandoned on shutdown");
                        return Err(AppError::QueueClosed);
                    }
                    _ = sleep(RATE_LIMIT_BACKOFF) => {}
                }
                continue;
            }

            if !response.is_success() {
                return Err(AppError::Http {
                    status: response.status,
                    url: url.to_string(),
                });
            }

            let data: Value = serde_json::from_str(&response.body)?;
            self.shared.cache.insert(url, data.clone());
            return Ok(data);
        }
    }

    async fn wait_for_slot(&self) {
        if let Some(last) = self.last_request {
            let wait = MIN_REQUEST_INTERVAL.saturating_sub(last.elapsed());
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "spacing upstream request");
                sleep(wait).await;
            }
        }
    }
}

async fn sweep_cache(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
    // the first tick fires immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let removed = shared.cache.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = shared.cache.len(), "purged expired cache entries");
                }
            }
        }
    }
}
