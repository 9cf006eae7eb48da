//! Configuration for deployments and failover behavior

use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::failover::RetryPolicy;

fn default_api_version() -> String
{   "2025-01-01-preview".to_string()
}

fn default_weight() -> i64
{   1
}

fn default_strategy() -> String
{   "weighted".to_string()
}

fn default_num_workers() -> usize
{   8
}

/// One Azure OpenAI deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig
{   /// Deployment name, used in logs and reports
    pub name: String
  , /// Resource URL, e.g. https://my-resource.openai.azure.com
    pub endpoint: String
  , /// Literal API key or `env:VAR`
    pub api_key: String
  , /// Deployment/model identifier; falls back to `name`
    #[serde(default)]
    pub model: Option<String>
  , #[serde(default = "default_api_version")]
    pub api_version: String
  , /// Unused, accepted for compatibility
    #[serde(default)]
    pub rpm_limit: Option<u32>
  , /// Unused, accepted for compatibility
    #[serde(default)]
    pub tpm_limit: Option<u32>
  , /// Share of traffic relative to other deployments
    #[serde(default = "default_weight")]
    pub weight: i64
  , #[serde(default)]
    pub temperature: Option<f32>
  , #[serde(default)]
    pub max_completion_tokens: Option<u32>
  , /// Per-call timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>
}

impl DeploymentConfig
{   pub fn model(&self) -> &str
    {   self.model.as_deref().unwrap_or(&self.name)
    }
}

/// Failover configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig
{   /// Attempts before a job is surfaced as failed
    pub max_job_retry: u32
  , /// Cooldown after the first transient failure
    pub base_cooldown_secs: f64
  , /// Cooldown for rate limits without a retry hint
    pub rate_limit_cooldown_secs: f64
  , /// Consecutive failures before an endpoint is disabled (0 = never)
    pub auto_disable_threshold: u32
  , /// Error messages kept per endpoint
    pub max_error_samples: usize
}

impl Default for FailoverConfig
{   fn default() -> Self
    {   FailoverConfig
        {   max_job_retry: 5
          , base_cooldown_secs: 1.0
          , rate_limit_cooldown_secs: 15.0
          , auto_disable_threshold:
              crate::endpoint::DEFAULT_AUTO_DISABLE_THRESHOLD
          , max_error_samples:
              crate::endpoint::DEFAULT_MAX_ERROR_SAMPLES
        }
    }
}

impl FailoverConfig
{   /// Convert to the runtime retry policy
    pub fn retry_policy(&self) -> Result<RetryPolicy, Error>
    {   Ok(RetryPolicy::new(
          self.max_job_retry
        , secs("base_cooldown_secs", self.base_cooldown_secs)?
        , secs(
            "rate_limit_cooldown_secs",
            self.rate_limit_cooldown_secs
          )?
        ))
    }
}

fn secs(field: &str, value: f64) -> Result<Duration, Error>
{   Duration::try_from_secs_f64(value).map_err(|e| {
      Error::InvalidConfiguration(
        format!("{} = {}: {}", field, value, e)
      )
    })
}

/// Blaster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlasterConfig
{   /// Scheduling strategy; only "weighted" exists
    #[serde(default = "default_strategy")]
    pub strategy: String
  , pub deployments: Vec<DeploymentConfig>
  , #[serde(default = "default_num_workers")]
    pub num_workers: usize
  , #[serde(flatten)]
    pub failover: FailoverConfig
}

impl BlasterConfig
{   /// Parse a JSON config document
    pub fn from_json(json: &str) -> Result<Self, Error>
    {   let config: BlasterConfig = serde_json::from_str(json)
          .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error>
    {   let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let json = std::fs::read_to_string(path).map_err(|e| {
          Error::InvalidConfiguration(
            format!("{}: {}", path.display(), e)
          )
        })?;
        Self::from_json(&json)
    }

    /// Check everything that can be checked without the network
    pub fn validate(&self) -> Result<(), Error>
    {   if self.strategy != "weighted"
        {   return Err(Error::InvalidConfiguration(
              format!("unknown strategy '{}'", self.strategy)
            ));
        }
        if self.deployments.is_empty()
        {   return Err(Error::InvalidConfiguration(
              "at least one deployment is required".to_string()
            ));
        }
        if self.num_workers == 0
        {   return Err(Error::InvalidConfiguration(
              "num_workers must be at least 1".to_string()
            ));
        }
        self.failover.retry_policy()?;
        Ok(())
    }
}
