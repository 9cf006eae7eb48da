//! Retry policy and cooldown arithmetic

use std::time::Duration;
use log::debug;

/// Largest exponent applied to the base cooldown.
/// 2^20 seconds is already twelve days.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Retry policy shared by the dispatcher and the executors
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy
{   /// Attempts after which a job is surfaced as failed
    pub max_job_retry: u32
  , /// Cooldown after the first transient failure
    pub base_cooldown: Duration
  , /// Cooldown for rate limits that carry no retry hint
    pub rate_limit_cooldown: Duration
}

impl RetryPolicy
{   /// Create a new retry policy
    pub fn new(
      max_job_retry: u32
    , base_cooldown: Duration
    , rate_limit_cooldown: Duration
    ) -> Self
    {   RetryPolicy
        {   max_job_retry: max_job_retry.max(1)
          , base_cooldown
          , rate_limit_cooldown
        }
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(
          5
        , Duration::from_secs(1)
        , Duration::from_secs(15)
        )
    }
}

/// `base * 2^(streak - 1)`, saturating.
/// A streak of zero yields no backoff.
pub fn exponential_backoff(
  base: Duration
, streak: u32
) -> Duration
{   if streak == 0
    {   return Duration::ZERO;
    }
    let exponent = (streak - 1).min(MAX_BACKOFF_EXPONENT);
    let backoff = base.saturating_mul(1u32 << exponent);
    debug!(
      "Backoff for streak {}: {:.3}s",
      streak,
      backoff.as_secs_f64()
    );
    backoff
}
