//! Boundary between the dispatcher and whatever performs a request

use async_trait::async_trait;
use log::{error, info, warn};

use crate::endpoint::EndpointState;
use crate::error::{Error, ErrorKind};
use crate::failover::RetryPolicy;
use crate::request::{ChatMessage, RequestOptions, RequestResult};

/// Performs one chat-completion request against one endpoint.
///
/// Implementations must leave the endpoint's health updated before
/// returning; [`settle`] does that for any `Result<String, Error>`.
#[async_trait]
pub trait RequestExecutor<C>: Send + Sync
{   async fn invoke(
      &self
    , endpoint: &EndpointState<C>
    , messages: &[ChatMessage]
    , options: &RequestOptions
    ) -> RequestResult;
}

/// Apply the outcome of a call to the endpoint and classify it
/// for the dispatcher.
pub fn settle<C>(
  endpoint: &EndpointState<C>
, outcome: Result<String, Error>
, policy: &RetryPolicy
) -> RequestResult
{   let err = match outcome
    {   Ok(response) => {
          endpoint.record_success();
          return RequestResult::success(response);
        }
      , Err(err) => err
    };

    match err.kind()
    {   ErrorKind::TransientInfra => {
          endpoint.record_transient_error(
            &err,
            policy.base_cooldown
          );
          warn!(
            "{} from {}; applying transient error cooldown",
            err.category(),
            endpoint.name()
          );
          RequestResult::retryable(err)
        }
      , ErrorKind::RateLimited => {
          let hint = match &err
          {   Error::RateLimitExceeded { retry_after, .. } => {
                *retry_after
              }
            , _ => None
          };
          let delay = match hint
          {   Some(d) => {
                info!(
                  "Rate limited by {}; cooling down for {:.1}s",
                  endpoint.name(),
                  d.as_secs_f64()
                );
                d
              }
            , None => {
                warn!(
                  "Rate limited by {} without a retry hint; \
                   defaulting to {:.1}s cooldown. Error: {}",
                  endpoint.name(),
                  policy.rate_limit_cooldown.as_secs_f64(),
                  err
                );
                policy.rate_limit_cooldown
              }
          };
          endpoint.cool_down_for(delay, Some(&err));
          RequestResult::retryable(err)
        }
      , ErrorKind::AuthConfig => {
          error!(
            "{} from {}; disabling endpoint. Error: {}",
            err.category(),
            endpoint.name(),
            err
          );
          endpoint.disable(format!("{}: {}", err.category(), err));
          RequestResult::fatal(err)
        }
      , ErrorKind::MalformedRequest => {
          error!(
            "{} sent to {}; not retrying. Error: {}",
            err.category(),
            endpoint.name(),
            err
          );
          RequestResult::fatal(err)
        }
      , ErrorKind::RetriesExhausted
      | ErrorKind::NoAvailableEndpoint
      | ErrorKind::Dispatch => RequestResult::fatal(err)
    }
}
