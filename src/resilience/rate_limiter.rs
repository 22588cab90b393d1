use super::executor::{ActionResult, Executor};
use crate::error::{Error, ErrorContext};
use crate::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub rps: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Tokens per second. `f64::INFINITY` disables limiting.
    pub rps: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
}

impl RateLimiterConfig {
    /// One second worth of burst, at least one token.
    pub fn from_rps(rps: f64) -> Result<Self> {
        validate_rate(rps)?;
        Ok(Self {
            rps,
            burst: burst_for(rps),
        })
    }

    /// A limiter that never waits.
    pub fn unbounded() -> Self {
        Self {
            rps: f64::INFINITY,
            burst: 1.0,
        }
    }

    /// Create a new config with default values
    pub fn new() -> Self {
        Self {
            rps: 10.0,
            burst: 10.0,
        }
    }

    /// Set the maximum tokens (burst size)
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.burst = tokens as f64;
        self
    }

    /// Set the refill rate (tokens per second)
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.rps = rate;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.rps == f64::INFINITY
    }

    pub fn validate(&self) -> Result<()> {
        validate_rate(self.rps)?;
        if !self.burst.is_finite() || self.burst < 1.0 {
            return Err(Error::configuration_with_context(
                format!("burst must be a finite number >= 1, got {}", self.burst),
                ErrorContext::new()
                    .with_field_path("rate_limit.burst")
                    .with_source("rate_limiter"),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_rate(rps: f64) -> Result<()> {
    if rps.is_nan() || rps <= 0.0 {
        return Err(Error::configuration_with_context(
            format!("rate must be a positive number of calls per second, got {}", rps),
            ErrorContext::new()
                .with_field_path("rate_limit.rps")
                .with_source("rate_limiter"),
        ));
    }
    Ok(())
}

fn burst_for(rps: f64) -> f64 {
    if rps.is_finite() {
        rps.max(1.0)
    } else {
        1.0
    }
}

#[derive(Debug)]
struct State {
    rps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl State {
    fn unbounded(&self) -> bool {
        self.rps == f64::INFINITY
    }

    fn refill(&mut self) {
        let now = Instant::now();
        if self.unbounded() {
            self.last = now;
            return;
        }
        let elapsed = now.duration_since(self.last).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rps).min(self.burst);
            self.last = now;
        }
    }

    fn take(&mut self) -> bool {
        if self.unbounded() {
            return true;
        }
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn wait_time(&self) -> Duration {
        Duration::from_secs_f64(((1.0 - self.tokens) / self.rps).max(0.0))
    }
}

/// Token-bucket rate limiter, usable directly or as an [`Executor`].
///
/// - The bucket starts with a single token, so the first second cannot run above the rate
/// - The rate can be changed while callers are waiting ([`set_rate`](Self::set_rate))
/// - Waits observe an optional [`CancellationToken`] and fail with [`Error::Interrupted`]
pub struct RateLimiter {
    state: Mutex<State>,
    cancel: Option<CancellationToken>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::build(cfg))
    }

    pub fn unbounded() -> Self {
        Self::build(RateLimiterConfig::unbounded())
    }

    fn build(cfg: RateLimiterConfig) -> Self {
        let state = Mutex::new(State {
            rps: cfg.rps,
            burst: cfg.burst,
            tokens: 1.0,
            last: Instant::now(),
        });
        Self {
            state,
            cancel: None,
        }
    }

    /// Convenience for `RateLimiterConfig::from_rps`.
    pub fn from_rps(rps: f64) -> Result<Self> {
        Self::new(RateLimiterConfig::from_rps(rps)?)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Acquire one token (may sleep).
    pub async fn acquire(&self) -> Result<()> {
        loop {
            let wait_duration = {
                let mut st = self.state.lock().await;
                if st.take() {
                    return Ok(());
                }
                st.wait_time()
            };

            // Re-check after the sleep: the rate may have changed meanwhile.
            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait_duration) => {}
                        _ = token.cancelled() => {
                            return Err(Error::interrupted_with_context(
                                "waiting for a rate limiter permit",
                                ErrorContext::new().with_source("rate_limiter"),
                            ));
                        }
                    }
                }
                None => tokio::time::sleep(wait_duration).await,
            }
        }
    }

    /// Try to acquire a token without waiting, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        self.state.lock().await.take()
    }

    pub async fn rate(&self) -> f64 {
        self.state.lock().await.rps
    }

    /// Change the rate. Burst becomes one second worth of tokens at the new rate.
    pub async fn set_rate(&self, rps: f64) -> Result<()> {
        validate_rate(rps)?;
        let mut st = self.state.lock().await;
        // settle what was earned at the old rate first
        st.refill();
        let was_unbounded = st.unbounded();
        st.rps = rps;
        st.burst = burst_for(rps);
        st.tokens = if was_unbounded {
            1.0
        } else {
            st.tokens.min(st.burst)
        };
        debug!(rps, "rate limiter rate changed");
        Ok(())
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let mut st = self.state.lock().await;
        st.refill();

        let estimated_wait_ms = if !st.unbounded() && st.tokens < 1.0 {
            Some(st.wait_time().as_millis() as u64)
        } else {
            None
        };

        RateLimiterSnapshot {
            rps: st.rps,
            burst: st.burst,
            tokens: st.tokens,
            estimated_wait_ms,
        }
    }
}

impl Executor for RateLimiter {
    fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ActionResult> + Send + 'a,
    {
        Box::pin(async move {
            self.acquire().await?;
            action().await
        })
    }
}

/// A [`RateLimiter`] whose rate is read from a hook before every acquisition.
///
/// A new rate is applied only when it differs from the current one by more than 0.1%,
/// so a noisy hook does not keep resetting the bucket.
pub struct DynamicRateLimiter<H> {
    limiter: RateLimiter,
    rate_hook: H,
}

impl<H> DynamicRateLimiter<H>
where
    H: Fn() -> f64 + Send + Sync,
{
    /// Starts unbounded; the hook's first answer sets the rate.
    pub fn new(rate_hook: H) -> Self {
        Self {
            limiter: RateLimiter::unbounded(),
            rate_hook,
        }
    }

    pub fn with_config(initial: RateLimiterConfig, rate_hook: H) -> Result<Self> {
        Ok(Self {
            limiter: RateLimiter::new(initial)?,
            rate_hook,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.limiter = self.limiter.with_cancellation(token);
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Ask the hook for the current rate and apply it if it moved enough.
    pub async fn refresh_rate(&self) -> Result<()> {
        let new_rate = (self.rate_hook)();
        let old_rate = self.limiter.rate().await;
        if old_rate == 0.0 || (new_rate / old_rate - 1.0).abs() > 0.001 {
            self.limiter.set_rate(new_rate).await?;
        }
        Ok(())
    }

    pub async fn acquire(&self) -> Result<()> {
        self.refresh_rate().await?;
        self.limiter.acquire().await
    }
}

impl<H> Executor for DynamicRateLimiter<H>
where
    H: Fn() -> f64 + Send + Sync,
{
    fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ActionResult> + Send + 'a,
    {
        Box::pin(async move {
            self.acquire().await?;
            action().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_rate_limiter_config_from_rps() {
        let config = RateLimiterConfig::from_rps(10.0).unwrap();
        assert_eq!(config.rps, 10.0);
        assert_eq!(config.burst, 10.0);
    }

    #[test]
    fn test_rate_limiter_config_from_rps_low() {
        let config = RateLimiterConfig::from_rps(0.5).unwrap();
        assert_eq!(config.rps, 0.5);
        // burst should be at least 1.0
        assert_eq!(config.burst, 1.0);
    }

    #[test]
    fn test_rate_limiter_config_from_rps_invalid() {
        assert!(RateLimiterConfig::from_rps(-1.0).unwrap_err().is_configuration());
        assert!(RateLimiterConfig::from_rps(0.0).unwrap_err().is_configuration());
        assert!(RateLimiterConfig::from_rps(f64::NAN).unwrap_err().is_configuration());
        // infinity is the unbounded rate
        assert!(RateLimiterConfig::from_rps(f64::INFINITY).unwrap().is_unbounded());
    }

    #[test]
    fn test_rate_limiter_config_builder() {
        let config = RateLimiterConfig::new()
            .with_max_tokens(100)
            .with_refill_rate(50.0);
        assert_eq!(config.burst, 100.0);
        assert_eq!(config.rps, 50.0);
        assert!(config.validate().is_ok());
        assert!(RateLimiterConfig::new().with_max_tokens(0).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_starts_with_one_token() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_tokens(3)
                .with_refill_rate(1.0),
        )
        .unwrap();

        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.estimated_wait_ms, Some(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_refill_caps_at_burst() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_tokens(3)
                .with_refill_rate(100.0),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        for _ in 0..3 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);

        // 100 tokens/sec = 1 token/10ms
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::from_rps(10.0).unwrap();
        let start = Instant::now();
        for _ in 0..6 {
            limiter.acquire().await.unwrap();
        }
        // one token up front, five more at 100ms each
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(490), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(520), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_never_waits() {
        let limiter = RateLimiter::new(RateLimiterConfig::unbounded()).unwrap();
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.snapshot().await.estimated_wait_ms.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rate_is_live() {
        let limiter = RateLimiter::from_rps(1.0).unwrap();
        limiter.acquire().await.unwrap();

        limiter.set_rate(100.0).await.unwrap();
        assert_eq!(limiter.rate().await, 100.0);
        let start = Instant::now();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(20));

        assert!(limiter.set_rate(-5.0).await.unwrap_err().is_configuration());
        assert_eq!(limiter.rate().await, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let token = CancellationToken::new();
        let limiter = RateLimiter::from_rps(0.01)
            .unwrap()
            .with_cancellation(token.clone());
        limiter.acquire().await.unwrap();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let err = limiter.acquire().await.unwrap_err();
        assert!(err.is_interrupted());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_dynamic_rate_ignores_small_changes() {
        // rate is stored as bits so the hook can be changed from the test
        let rate = AtomicU64::new(50f64.to_bits());
        let limiter = DynamicRateLimiter::new(|| f64::from_bits(rate.load(Ordering::SeqCst)));

        limiter.refresh_rate().await.unwrap();
        assert_eq!(limiter.limiter().rate().await, 50.0);

        // +0.05% is noise
        rate.store(50.025f64.to_bits(), Ordering::SeqCst);
        limiter.refresh_rate().await.unwrap();
        assert_eq!(limiter.limiter().rate().await, 50.0);

        // +10% is applied
        rate.store(55.0f64.to_bits(), Ordering::SeqCst);
        limiter.refresh_rate().await.unwrap();
        assert_eq!(limiter.limiter().rate().await, 55.0);

        // a broken hook surfaces as a configuration error
        rate.store(0f64.to_bits(), Ordering::SeqCst);
        assert!(limiter.acquire().await.unwrap_err().is_configuration());
    }
}
