use std::fmt;
use std::time::Duration;

/// Custom error type for blaster operations
/// Implements Clone for sending through channels and for
/// keeping the last failure on an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Request timed out
    Timeout
  , /// Transport-level HTTP failure (connect, reset, ...)
    HttpError(String)
  , /// Backend answered with a 5xx or 408
    ServerError
    {   status: u16
      , message: String
    }
  , /// Backend throttled the request
    RateLimitExceeded
    {   retry_after: Option<Duration>
      , message: String
    }
  , /// Credentials were rejected
    AuthenticationFailed(String)
  , /// Deployment does not exist or is misconfigured server side
    InvalidDeployment(String)
  , /// Backend rejected the request body
    BadRequest(String)
  , /// Messages failed local validation
    InvalidMessages(String)
  , /// Failed to parse API response
    ParseError(String)
  , /// No choices in API response
    NoChoicesInResponse
  , /// Job gave up after this many attempts
    RetriesExhausted(u32)
  , /// Every endpoint is disabled
    NoAvailableEndpoint
  , /// Dispatcher no longer accepts jobs
    DispatcherClosed
  , /// Job was dropped at shutdown without a result
    JobAbandoned
  , /// Invalid configuration
    InvalidConfiguration(String)
  , /// Generic error
    Other(String)
}

/// Closed classification of every failure the dispatcher sees.
/// All retry and endpoint-health decisions key off this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind
{   TransientInfra
  , RateLimited
  , AuthConfig
  , MalformedRequest
  , RetriesExhausted
  , NoAvailableEndpoint
  , Dispatch
}

impl Error
{   /// Classify this error
    pub fn kind(&self) -> ErrorKind
    {   match self
        {   Error::Timeout
          | Error::HttpError(_)
          | Error::ServerError { .. }
          | Error::ParseError(_)
          | Error::NoChoicesInResponse => ErrorKind::TransientInfra
          , Error::RateLimitExceeded { .. } => ErrorKind::RateLimited
          , Error::AuthenticationFailed(_)
          | Error::InvalidDeployment(_) => ErrorKind::AuthConfig
          , Error::BadRequest(_)
          | Error::InvalidMessages(_) => ErrorKind::MalformedRequest
          , Error::RetriesExhausted(_) => ErrorKind::RetriesExhausted
          , Error::NoAvailableEndpoint => ErrorKind::NoAvailableEndpoint
          , Error::DispatcherClosed
          | Error::JobAbandoned
          | Error::InvalidConfiguration(_)
          | Error::Other(_) => ErrorKind::Dispatch
        }
    }

    /// Stable category name used as the telemetry key
    pub fn category(&self) -> &'static str
    {   match self
        {   Error::Timeout => "Timeout"
          , Error::HttpError(_) => "HttpError"
          , Error::ServerError { .. } => "ServerError"
          , Error::RateLimitExceeded { .. } => "RateLimitExceeded"
          , Error::AuthenticationFailed(_) => "AuthenticationFailed"
          , Error::InvalidDeployment(_) => "InvalidDeployment"
          , Error::BadRequest(_) => "BadRequest"
          , Error::InvalidMessages(_) => "InvalidMessages"
          , Error::ParseError(_) => "ParseError"
          , Error::NoChoicesInResponse => "NoChoicesInResponse"
          , Error::RetriesExhausted(_) => "RetriesExhausted"
          , Error::NoAvailableEndpoint => "NoAvailableEndpoint"
          , Error::DispatcherClosed => "DispatcherClosed"
          , Error::JobAbandoned => "JobAbandoned"
          , Error::InvalidConfiguration(_) => "InvalidConfiguration"
          , Error::Other(_) => "Other"
        }
    }

    /// Whether the same job may be attempted again
    pub fn is_retryable(&self) -> bool
    {   matches!(
          self.kind(),
          ErrorKind::TransientInfra | ErrorKind::RateLimited
        )
    }
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::Timeout => {
              write!(f, "Request timed out")
            }
          , Error::HttpError(msg) => {
              write!(f, "HTTP error: {}", msg)
            }
          , Error::ServerError { status, message } => {
              write!(f, "Server error {}: {}", status, message)
            }
          , Error::RateLimitExceeded { retry_after, message } => {
              match retry_after
              {   Some(d) => write!(f,
                    "Rate limit exceeded, retry after {:.1}s: {}",
                    d.as_secs_f64(),
                    message
                  )
                , None => write!(f,
                    "Rate limit exceeded: {}",
                    message
                  )
              }
            }
          , Error::AuthenticationFailed(msg) => {
              write!(f, "Authentication failed: {}", msg)
            }
          , Error::InvalidDeployment(msg) => {
              write!(f, "Invalid deployment: {}", msg)
            }
          , Error::BadRequest(msg) => {
              write!(f, "Bad request: {}", msg)
            }
          , Error::InvalidMessages(msg) => {
              write!(f, "Invalid messages: {}", msg)
            }
          , Error::ParseError(msg) => {
              write!(f, "Parse error: {}", msg)
            }
          , Error::NoChoicesInResponse => {
              write!(f, "API response contained no choices")
            }
          , Error::RetriesExhausted(tries) => {
              write!(f,
                "Job deemed problematic after {} tries",
                tries
              )
            }
          , Error::NoAvailableEndpoint => {
              write!(f,
                "No available endpoints; \
                 all of them are disabled"
              )
            }
          , Error::DispatcherClosed => {
              write!(f,
                "Dispatcher has been closed and cannot be used"
              )
            }
          , Error::JobAbandoned => {
              write!(f, "Job was abandoned before completion")
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::Other(msg) => {
              write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error
{   fn from(s: String) -> Self
    {   Error::Other(s)
    }
}

impl From<&str> for Error
{   fn from(s: &str) -> Self
    {   Error::Other(s.to_string())
    }
}
