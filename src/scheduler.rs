//! Weighted round-robin endpoint scheduler

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::Instant;

use crate::endpoint::EndpointState;
use crate::error::Error;

/// Ring and cursor, always read and advanced together
struct Ring<C>
{   slots: Vec<Arc<EndpointState<C>>>
  , cursor: usize
}

/// What one pass over the ring produced
enum Scan<C>
{   Found(Arc<EndpointState<C>>)
  , Wait(Duration)
  , Exhausted
}

/// Picks the next usable endpoint, each endpoint appearing in the
/// rotation as many times as its weight.
pub struct WeightedScheduler<C>
{   endpoints: Vec<Arc<EndpointState<C>>>
  , ring: Mutex<Ring<C>>
}

impl<C> WeightedScheduler<C>
{   /// Build the rotation, shuffled with the thread RNG
    pub fn new(endpoints: Vec<Arc<EndpointState<C>>>) -> Self
    {   Self::with_rng(endpoints, &mut rand::thread_rng())
    }

    /// Build the rotation, shuffled with `rng`
    pub fn with_rng<R: Rng + ?Sized>(
      endpoints: Vec<Arc<EndpointState<C>>>
    , rng: &mut R
    ) -> Self
    {   let mut slots = Vec::new();
        for ep in &endpoints
        {   for _ in 0..ep.weight()
            {   slots.push(Arc::clone(ep));
            }
        }
        slots.shuffle(rng);
        debug!(
          "Built scheduler ring of {} slots over {} endpoints",
          slots.len(),
          endpoints.len()
        );
        WeightedScheduler
        {   endpoints
          , ring: Mutex::new(Ring { slots, cursor: 0 })
        }
    }

    pub fn endpoints(&self) -> &[Arc<EndpointState<C>>]
    {   &self.endpoints
    }

    pub fn ring_len(&self) -> usize
    {   self.ring.lock().slots.len()
    }

    /// Next available endpoint. If every enabled endpoint is cooling
    /// down, sleeps until the soonest cooldown expires and tries again.
    /// Fails with [`Error::NoAvailableEndpoint`] once all are disabled.
    pub async fn next(&self) -> Result<Arc<EndpointState<C>>, Error>
    {   loop
        { match self.scan(Instant::now())
          {   Scan::Found(ep) => {
                trace!("Scheduled endpoint {}", ep.name());
                return Ok(ep);
              }
            , Scan::Wait(delay) => {
                debug!(
                  "All endpoints cooling down; waiting {:.3}s",
                  delay.as_secs_f64()
                );
                if delay.is_zero()
                {   tokio::task::yield_now().await;
                } else
                {   tokio::time::sleep(delay).await;
                }
              }
            , Scan::Exhausted => {
                return Err(Error::NoAvailableEndpoint);
              }
          }
        }
    }

    fn scan(&self, now: Instant) -> Scan<C>
    {   let mut ring = self.ring.lock();
        let n = ring.slots.len();
        let mut soonest: Option<Instant> = None;

        for _ in 0..n
        {   let idx = ring.cursor;
            ring.cursor = (ring.cursor + 1) % n;
            let ep = &ring.slots[idx];
            if ep.is_disabled()
            {   continue;
            }
            if ep.available(now)
            {   return Scan::Found(Arc::clone(ep));
            }
            let until = ep.cooldown_until();
            if soonest.map_or(true, |s| until < s)
            {   soonest = Some(until);
            }
        }

        match soonest
        {   Some(until) => Scan::Wait(
              until.saturating_duration_since(now)
            )
          , None => Scan::Exhausted
        }
    }
}
