use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::task::JoinHandle;

type KeyedLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Per-client-IP rate limiter.
///
/// Constructed explicitly and handed to the router through state, so every
/// router (and every test) owns its own counters. `start` spawns a task that
/// periodically drops keys whose window has fully elapsed; `stop` aborts it.
#[derive(Clone)]
pub struct IpRateLimiter {
    limiter: Arc<KeyedLimiter>,
    message: &'static str,
    pruner: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl IpRateLimiter {
    /// Allow `attempts` requests per `window_seconds`, replenished evenly.
    pub fn new(attempts: u32, window_seconds: u64, message: &'static str) -> Result<Self, AppError> {
        let attempts = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
        let period = Duration::from_millis((window_seconds.max(1) * 1000) / attempts.get() as u64);
        let quota = Quota::with_period(period)
            .ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "Rate limit window of {}s is too small for {} attempts",
                    window_seconds,
                    attempts
                ))
            })?
            .allow_burst(attempts);

        Ok(Self {
            limiter: Arc::new(RateLimiter::dashmap(quota)),
            message,
            pruner: Arc::new(Mutex::new(None)),
        })
    }

    /// Spawn the pruning task. Calling `start` twice replaces the old task.
    pub fn start(&self, prune_every: Duration) {
        let limiter = self.limiter.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(prune_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.retain_recent();
                limiter.shrink_to_fit();
                tracing::debug!(tracked_clients = limiter.len(), "Pruned rate limiter state");
            }
        });

        if let Ok(mut slot) = self.pruner.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Abort the pruning task, if running.
    pub fn stop(&self) {
        if let Ok(mut slot) = self.pruner.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.pruner
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Number of client addresses currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), AppError> {
        self.limiter.check_key(&ip).map_err(|negative| {
            let wait_time = negative.wait_time_from(DefaultClock::default().now());
            AppError::TooManyRequests(self.message.to_string(), Some(wait_time.as_secs().max(1)))
        })
    }
}

/// Resolve the caller's address: first `x-forwarded-for` hop, then
/// `x-real-ip`, then the socket peer.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .or_else(|| {
            request
                .extensions()
                .get::<axum::extract::ConnectInfo<SocketAddr>>()
                .map(|axum::extract::ConnectInfo(addr)| addr.ip())
        })
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match client_ip(&request) {
        Some(ip) => {
            limiter.check(ip)?;
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}
