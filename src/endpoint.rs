//! Per-endpoint availability and health state machine
//!
//! One [`EndpointState`] exists per configured deployment. The scheduler
//! only ever reads it through [`EndpointState::available`]; every mutation
//! goes through the instance's own lock and is driven by the executor's
//! classification of a request outcome.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{Error, ErrorKind};

/// Consecutive failures before an endpoint is taken out of rotation
pub const DEFAULT_AUTO_DISABLE_THRESHOLD: u32 = 5;

/// Error messages kept per endpoint for diagnostics
pub const DEFAULT_MAX_ERROR_SAMPLES: usize = 50;

/// Mutable health data, guarded by the endpoint lock
#[derive(Debug, Default)]
struct Health
{   disabled_reason: Option<String>
  , failure_streak: u32
  , last_error: Option<Error>
  , total_requests: u64
  , total_rate_limits: u64
  , error_counts: BTreeMap<String, u64>
  , error_samples: Vec<String>
}

/// State of one backend deployment.
///
/// `C` is the opaque, already-authenticated client handle the executor
/// uses to talk to the deployment.
#[derive(Debug)]
pub struct EndpointState<C>
{   name: String
  , weight: u32
  , client: C
  , auto_disable_threshold: u32
  , max_error_samples: usize
  , epoch: Instant
  , // nanoseconds after `epoch`; only ever raised with fetch_max
    cooldown_until: AtomicU64
  , disabled: AtomicBool
  , health: Mutex<Health>
}

/// Point-in-time snapshot of an endpoint, for logging or export
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport
{   pub endpoint: String
  , pub weight: u32
  , pub disabled: bool
  , pub disabled_reason: Option<String>
  , /// Seconds left until the endpoint leaves cooldown
    pub cooldown_remaining_secs: f64
  , pub failure_streak: u32
  , pub last_error: Option<String>
  , pub total_requests: u64
  , pub total_rate_limits: u64
  , pub error_counts: BTreeMap<String, u64>
  , pub error_samples: Vec<String>
}

impl<C> EndpointState<C>
{   /// Create a new endpoint; weights below 1 are coerced to 1
    pub fn new(
      name: impl Into<String>
    , weight: i64
    , client: C
    ) -> Self
    {   let name = name.into();
        let weight = weight.clamp(1, u32::MAX as i64) as u32;
        debug!("Creating endpoint {} with weight {}", name, weight);
        EndpointState
        {   name
          , weight
          , client
          , auto_disable_threshold: DEFAULT_AUTO_DISABLE_THRESHOLD
          , max_error_samples: DEFAULT_MAX_ERROR_SAMPLES
          , epoch: Instant::now()
          , cooldown_until: AtomicU64::new(0)
          , disabled: AtomicBool::new(false)
          , health: Mutex::new(Health::default())
        }
    }

    /// Failure streak at which the endpoint disables itself.
    /// Zero turns auto-disable off.
    pub fn with_auto_disable_threshold(mut self, threshold: u32)
      -> Self
    {   self.auto_disable_threshold = threshold;
        self
    }

    /// Cap on the number of stored error samples
    pub fn with_max_error_samples(mut self, max: usize) -> Self
    {   self.max_error_samples = max;
        self
    }

    pub fn name(&self) -> &str
    {   &self.name
    }

    pub fn weight(&self) -> u32
    {   self.weight
    }

    pub fn client(&self) -> &C
    {   &self.client
    }

    pub fn is_disabled(&self) -> bool
    {   self.disabled.load(Ordering::Acquire)
    }

    pub fn disabled_reason(&self) -> Option<String>
    {   self.health.lock().disabled_reason.clone()
    }

    pub fn failure_streak(&self) -> u32
    {   self.health.lock().failure_streak
    }

    pub fn total_requests(&self) -> u64
    {   self.health.lock().total_requests
    }

    /// Instant before which the endpoint is unusable
    pub fn cooldown_until(&self) -> Instant
    {   self.epoch + Duration::from_nanos(
          self.cooldown_until.load(Ordering::Acquire)
        )
    }

    /// True if the endpoint can be used at `now`. Lock-free.
    pub fn available(&self, now: Instant) -> bool
    {   if self.is_disabled()
        {   return false;
        }
        self.offset_of(now)
          >= self.cooldown_until.load(Ordering::Acquire)
    }

    /// Reset transient error tracking after a successful call
    pub fn record_success(&self)
    {   let mut health = self.health.lock();
        health.failure_streak = 0;
        health.last_error = None;
        health.total_requests += 1;
    }

    /// Record a transient infra/timeout error and back off
    /// exponentially in the failure streak:
    /// `base_cooldown * 2^(failure_streak - 1)`
    pub fn record_transient_error(
      &self
    , err: &Error
    , base_cooldown: Duration
    )
    {   let now = Instant::now();
        let mut health = self.health.lock();
        health.failure_streak += 1;
        self.record_error(&mut health, err);

        let backoff = crate::failover::exponential_backoff(
          base_cooldown,
          health.failure_streak
        );
        self.raise_cooldown_after(now, backoff);
        debug!(
          "Endpoint {} cooling down for {:.3}s (streak {})",
          self.name,
          backoff.as_secs_f64(),
          health.failure_streak
        );

        self.maybe_auto_disable(&mut health, err);
    }

    /// Extend the cooldown to `until`; never shortens it.
    /// `err` is recorded for observability only.
    pub fn set_cooldown(&self, until: Instant, err: Option<&Error>)
    {   let mut health = self.health.lock();
        if let Some(err) = err
        {   self.record_error(&mut health, err);
            self.maybe_auto_disable(&mut health, err);
        }
        self.raise_cooldown(until);
    }

    /// Like [`set_cooldown`](Self::set_cooldown), `delay` from now.
    /// A delay past the representable range cools down indefinitely.
    pub fn cool_down_for(&self, delay: Duration, err: Option<&Error>)
    {   let now = Instant::now();
        let mut health = self.health.lock();
        if let Some(err) = err
        {   self.record_error(&mut health, err);
            self.maybe_auto_disable(&mut health, err);
        }
        self.raise_cooldown_after(now, delay);
    }

    /// Permanently take the endpoint out of rotation.
    /// The first reason sticks.
    pub fn disable(&self, reason: impl Into<String>)
    {   let mut health = self.health.lock();
        if self.is_disabled()
        {   return;
        }
        let reason = reason.into();
        info!("Endpoint {} disabled: {}", self.name, reason);
        health.disabled_reason = Some(reason);
        self.disabled.store(true, Ordering::Release);
    }

    /// Snapshot of state and error statistics
    pub fn report(&self) -> EndpointReport
    {   let health = self.health.lock();
        let remaining = self.cooldown_until()
          .saturating_duration_since(Instant::now());
        EndpointReport
        {   endpoint: self.name.clone()
          , weight: self.weight
          , disabled: self.is_disabled()
          , disabled_reason: health.disabled_reason.clone()
          , cooldown_remaining_secs: remaining.as_secs_f64()
          , failure_streak: health.failure_streak
          , last_error: health.last_error
              .as_ref()
              .map(|e| e.to_string())
          , total_requests: health.total_requests
          , total_rate_limits: health.total_rate_limits
          , error_counts: health.error_counts.clone()
          , error_samples: health.error_samples.clone()
        }
    }

    // caller holds the health lock
    fn record_error(&self, health: &mut Health, err: &Error)
    {   health.last_error = Some(err.clone());

        let key = err.category();
        *health.error_counts.entry(key.to_string()).or_insert(0)
          += 1;

        if health.error_samples.len() < self.max_error_samples
        {   health.error_samples.push(format!("{}: {}", key, err));
        }

        if err.kind() == ErrorKind::RateLimited
        {   health.total_rate_limits += 1;
        }
    }

    // caller holds the health lock
    fn maybe_auto_disable(&self, health: &mut Health, err: &Error)
    {   if self.is_disabled()
          || self.auto_disable_threshold == 0
          || health.failure_streak < self.auto_disable_threshold
        {   return;
        }
        warn!(
          "Endpoint {} auto-disabled due to repeated failures. \
           Last error: {}",
          self.name,
          err
        );
        health.disabled_reason = Some(format!(
          "Auto-disabled after {} consecutive failures; \
           last error: {}: {}",
          health.failure_streak,
          err.category(),
          err
        ));
        self.disabled.store(true, Ordering::Release);
    }

    fn raise_cooldown(&self, until: Instant)
    {   self.cooldown_until
          .fetch_max(self.offset_of(until), Ordering::AcqRel);
    }

    fn raise_cooldown_after(&self, now: Instant, delay: Duration)
    {   match now.checked_add(delay)
        {   Some(until) => self.raise_cooldown(until)
          , None => {
              self.cooldown_until.store(u64::MAX, Ordering::Release);
            }
        }
    }

    fn offset_of(&self, at: Instant) -> u64
    {   let nanos = at.saturating_duration_since(self.epoch)
          .as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }
}
