use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::DeploymentConfig;
use crate::endpoint::EndpointState;
use crate::error::Error;
use crate::executor::{settle, RequestExecutor};
use crate::failover::RetryPolicy;
use crate::request::{
  validate_messages, ChatMessage, RequestOptions, RequestResult,
};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Credential modes that need a token provider
const TOKEN_CREDENTIAL_MODES: [&str; 3]
  = ["default", "az", "interactive"];

// ===== Wire Types =====

#[derive(Debug, Serialize)]
struct AzureChatRequest<'a>
{   messages: &'a [ChatMessage]
  , #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>
  , stream: bool
}

#[derive(Debug, Deserialize)]
struct AzureChatResponse
{   choices: Vec<Choice>
}

#[derive(Debug, Deserialize)]
struct Choice
{   message: ResponseMessage
}

#[derive(Debug, Deserialize)]
struct ResponseMessage
{   #[serde(default)]
    content: Option<String>
}

#[derive(Debug, Deserialize)]
struct StreamChunk
{   #[serde(default)]
    choices: Vec<StreamChoice>
}

#[derive(Debug, Deserialize)]
struct StreamChoice
{   #[serde(default)]
    delta: Option<Delta>
}

#[derive(Debug, Deserialize)]
struct Delta
{   #[serde(default)]
    content: Option<String>
}

// ===== Client =====

/// Authenticated HTTP handle for one deployment
#[derive(Debug, Clone)]
pub struct AzureClient
{   deployment: DeploymentConfig
  , api_key: String
  , http: reqwest::Client
}

impl AzureClient
{   /// Resolve credentials and build the HTTP client
    pub fn new(deployment: &DeploymentConfig)
      -> Result<Self, Error>
    {   let api_key = resolve_api_key(
          &deployment.name,
          &deployment.api_key
        )?;
        let timeout = Duration::from_secs(
          deployment.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
        );
        let http = reqwest::Client::builder()
          .timeout(timeout)
          .build()
          .map_err(|e| {
            error!("Failed to build HTTP client: {}", e);
            Error::InvalidConfiguration(e.to_string())
          })?;
        debug!("Created Azure client for {}", deployment.name);
        Ok(AzureClient
        {   deployment: deployment.clone()
          , api_key
          , http
        })
    }

    pub fn deployment(&self) -> &DeploymentConfig
    {   &self.deployment
    }

    /// Chat completions URL for this deployment
    pub fn chat_url(&self) -> String
    {   format!(
          "{}/openai/deployments/{}/chat/completions?api-version={}",
          self.deployment.endpoint.trim_end_matches('/'),
          self.deployment.model(),
          self.deployment.api_version
        )
    }

    /// Perform one chat completion and return the content
    pub async fn chat_completion(
      &self
    , messages: &[ChatMessage]
    , options: &RequestOptions
    ) -> Result<String, Error>
    {   let request = AzureChatRequest
        {   messages
          , temperature: options.temperature
              .or(self.deployment.temperature)
          , max_completion_tokens: options.max_completion_tokens
              .or(self.deployment.max_completion_tokens)
          , stream: options.stream
        };

        trace!("Azure request to {}: {:?}", self.deployment.name, request);

        let response = self.http
          .post(self.chat_url())
          .header("api-key", &self.api_key)
          .json(&request)
          .send()
          .await
          .map_err(classify_transport_error)?;

        let status = response.status();
        trace!("Azure response status: {}", status);

        if !status.is_success()
        {   let header = |name: &str| {
              response.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            };
            let retry_after_ms = header("retry-after-ms");
            let retry_after = header("retry-after");
            let error_text = response.text().await
              .unwrap_or_else(|_|
                "Unknown error".to_string()
              );
            let hint = retry_after_ms
              .as_deref()
              .and_then(parse_millis)
              .or_else(|| parse_retry_after(
                retry_after.as_deref(),
                &error_text
              ));
            return Err(classify_status(
              status.as_u16(),
              hint,
              error_text
            ));
        }

        let body = response.text().await
          .map_err(classify_transport_error)?;

        if options.stream
        {   collect_stream(&body)
        } else
        {   parse_completion(&body)
        }
    }
}

fn resolve_api_key(name: &str, value: &str)
  -> Result<String, Error>
{   let lowered = value.to_lowercase();
    if TOKEN_CREDENTIAL_MODES.contains(&lowered.as_str())
    {   return Err(Error::InvalidConfiguration(format!(
          "deployment '{}': token credential mode '{}' \
           is not supported, supply an api key",
          name, value
        )));
    }
    if let Some(var) = value.strip_prefix("env:")
    {   info!("Using API key from ${} for deployment '{}'", var, name);
        return std::env::var(var).map_err(|_| {
          Error::InvalidConfiguration(format!(
            "deployment '{}': environment variable {} not set",
            name, var
          ))
        });
    }
    if value.is_empty()
    {   return Err(Error::InvalidConfiguration(format!(
          "deployment '{}': empty api key",
          name
        )));
    }
    Ok(value.to_string())
}

fn classify_transport_error(e: reqwest::Error) -> Error
{   if e.is_timeout()
    {   Error::Timeout
    } else
    {   Error::HttpError(e.to_string())
    }
}

/// Map a non-success HTTP status to an error
pub fn classify_status(
  status: u16
, retry_after: Option<Duration>
, message: String
) -> Error
{   match status
    {   429 => Error::RateLimitExceeded { retry_after, message }
      , 401 | 403 => Error::AuthenticationFailed(message)
      , 404 => Error::InvalidDeployment(message)
      , 408 | 500..=599 => Error::ServerError { status, message }
      , 400..=499 => Error::BadRequest(message)
      , _ => Error::ServerError { status, message }
    }
}

fn try_again_pattern() -> Option<&'static Regex>
{   static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
      .get_or_init(|| {
        Regex::new(r"(?i)try again in (\d+)\s*seconds").ok()
      })
      .as_ref()
}

/// Retry hint from a `retry-after` header value, falling back to
/// "Try again in N seconds" in the error message.
pub fn parse_retry_after(
  header: Option<&str>
, message: &str
) -> Option<Duration>
{   if let Some(value) = header
    {   if let Some(d) = value.trim().parse::<f64>().ok()
          .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
          .filter(|d| !d.is_zero())
        {   debug!("Parsed Retry-After header: {}", value);
            return Some(d);
        }
    }

    let captures = try_again_pattern()?.captures(message)?;
    let secs: u64 = captures.get(1)?.as_str().parse().ok()?;
    if secs == 0
    {   return None;
    }
    debug!("Parsed Retry-After message: {} seconds", secs);
    Some(Duration::from_secs(secs))
}

fn parse_millis(value: &str) -> Option<Duration>
{   value.trim()
      .parse::<u64>()
      .ok()
      .filter(|&ms| ms > 0)
      .map(Duration::from_millis)
}

fn parse_completion(body: &str) -> Result<String, Error>
{   let chat_response: AzureChatResponse
      = serde_json::from_str(body).map_err(|e| {
        error!("Parse error: {}", e);
        Error::ParseError(e.to_string())
      })?;

    chat_response.choices.into_iter()
      .next()
      .map(|c| c.message.content.unwrap_or_default())
      .ok_or_else(|| {
        error!("No choices in response");
        Error::NoChoicesInResponse
      })
}

/// Join the content deltas of a server-sent-events body
pub fn collect_stream(body: &str) -> Result<String, Error>
{   let mut parts = String::new();
    for line in body.lines()
    {   let data = match line.trim().strip_prefix("data:")
        {   Some(data) => data.trim()
          , None => continue
        };
        if data == "[DONE]"
        {   break;
        }
        let chunk: StreamChunk = serde_json::from_str(data)
          .map_err(|e| Error::ParseError(e.to_string()))?;
        // usage-only chunks carry no choices
        if let Some(content) = chunk.choices.into_iter()
          .next()
          .and_then(|c| c.delta)
          .and_then(|d| d.content)
        {   parts.push_str(&content);
        }
    }
    Ok(parts)
}

// ===== Executor =====

/// Executes requests through each endpoint's [`AzureClient`]
#[derive(Debug, Clone, Default)]
pub struct AzureExecutor
{   policy: RetryPolicy
}

impl AzureExecutor
{   pub fn new(policy: RetryPolicy) -> Self
    {   AzureExecutor { policy }
    }
}

#[async_trait]
impl RequestExecutor<AzureClient> for AzureExecutor
{   async fn invoke(
      &self
    , endpoint: &EndpointState<AzureClient>
    , messages: &[ChatMessage]
    , options: &RequestOptions
    ) -> RequestResult
    {   let outcome = match validate_messages(messages)
        {   Ok(()) => {
              endpoint.client()
                .chat_completion(messages, options)
                .await
            }
          , Err(e) => Err(e)
        };
        settle(endpoint, outcome, &self.policy)
    }
}
