//! Dispatch chat-completion requests across a pool of interchangeable
//! deployments.
//!
//! ```text
//! submit ──▶ FIFO queue ──▶ worker ──▶ WeightedScheduler::next()
//!                ▲                          │ (waits out cooldowns)
//!                │                          ▼
//!             requeue ◀── retryable ── RequestExecutor::invoke()
//!                                           │
//!                         ok / fatal ───────┴──▶ JobHandle resolved
//! ```
//!
//! Each deployment is tracked by an [`EndpointState`]: exponential
//! cooldowns on transient failures, explicit cooldowns on rate limits,
//! and permanent disablement on auth/config failures or after too many
//! consecutive failures. Callers only ever see a response, or an error
//! once a job is fatal, out of retries, or every endpoint is disabled.
//!
//! ```rust,no_run
//! use blaster::{Blaster, ChatMessage, RequestOptions};
//!
//! # async fn demo() -> Result<(), blaster::Error> {
//! let blaster = Blaster::from_config_file("deployments.json", Some(24))?;
//! let text = blaster
//!   .chat_completion(
//!     vec![ChatMessage::user("Say hello")],
//!     RequestOptions::default()
//!   )
//!   .await?;
//! println!("{}", text);
//! blaster.close(true).await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod config;
pub mod endpoint;
pub mod executor;
pub mod failover;
pub mod providers;
pub mod registry;
pub mod request;
pub mod scheduler;
pub mod client;

pub use client::{Blaster, ChatReply, JobHandle};
pub use config::{BlasterConfig, DeploymentConfig, FailoverConfig};
pub use endpoint::{EndpointReport, EndpointState};
pub use error::{Error, ErrorKind};
pub use executor::{settle, RequestExecutor};
pub use failover::RetryPolicy;
pub use registry::build_endpoint_states;
pub use request::{
  validate_messages, ChatMessage, RequestOptions, RequestResult,
};
pub use scheduler::WeightedScheduler;
