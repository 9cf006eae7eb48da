#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use blaster::{
  settle, ChatMessage, EndpointState, Error, RequestExecutor,
  RequestOptions, RequestResult, RetryPolicy,
};

/// What the scripted executor does on one call
#[derive(Debug, Clone)]
pub enum Step
{   /// Run through `settle`, as a real executor would
    Outcome(Result<String, Error>)
  , /// Returned untouched
    Raw(RequestResult)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call
{   pub endpoint: String
  , pub prompt: String
}

/// Executor replaying per-endpoint scripts.
/// Prompts starting with "wait" block until `release` is called.
pub struct ScriptedExecutor
{   policy: RetryPolicy
  , scripts: Mutex<HashMap<String, VecDeque<Step>>>
  , fallback: Step
  , calls: Mutex<Vec<Call>>
  , gate: Notify
}

impl ScriptedExecutor
{   pub fn new(fallback: Step) -> Self
    {   ScriptedExecutor
        {   policy: RetryPolicy::default()
          , scripts: Mutex::new(HashMap::new())
          , fallback
          , calls: Mutex::new(Vec::new())
          , gate: Notify::new()
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self
    {   self.policy = policy;
        self
    }

    pub fn script(self, endpoint: &str, steps: Vec<Step>) -> Self
    {   self.scripts.lock()
          .insert(endpoint.to_string(), steps.into());
        self
    }

    pub fn calls(&self) -> Vec<Call>
    {   self.calls.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String>
    {   self.calls().into_iter().map(|c| c.prompt).collect()
    }

    pub fn release(&self)
    {   self.gate.notify_one();
    }
}

#[async_trait]
impl RequestExecutor<()> for ScriptedExecutor
{   async fn invoke(
      &self
    , endpoint: &EndpointState<()>
    , messages: &[ChatMessage]
    , _options: &RequestOptions
    ) -> RequestResult
    {   let prompt = messages.last()
          .and_then(|m| m.content.clone())
          .unwrap_or_default();
        self.calls.lock().push(Call
        {   endpoint: endpoint.name().to_string()
          , prompt: prompt.clone()
        });
        let step = self.scripts.lock()
          .get_mut(endpoint.name())
          .and_then(|steps| steps.pop_front())
          .unwrap_or_else(|| self.fallback.clone());

        if prompt.starts_with("wait")
        {   self.gate.notified().await;
        }

        match step
        {   Step::Outcome(outcome) => {
              settle(endpoint, outcome, &self.policy)
            }
          , Step::Raw(result) => result
        }
    }
}

pub fn endpoint(name: &str, weight: i64) -> Arc<EndpointState<()>>
{   Arc::new(EndpointState::new(name, weight, ()))
}

pub fn user(text: &str) -> Vec<ChatMessage>
{   vec![ChatMessage::user(text)]
}

pub fn ok(text: &str) -> Step
{   Step::Outcome(Ok(text.to_string()))
}

pub fn fail(err: Error) -> Step
{   Step::Outcome(Err(err))
}

pub fn rate_limited(secs: u64) -> Step
{   Step::Outcome(Err(Error::RateLimitExceeded
    {   retry_after: Some(Duration::from_secs(secs))
      , message: format!("Try again in {} seconds.", secs)
    }))
}

/// Guard against hangs; paused clocks jump straight to it
pub async fn within<F: std::future::Future>(fut: F) -> F::Output
{   match tokio::time::timeout(Duration::from_secs(600), fut).await
    {   Ok(out) => out
      , Err(_) => panic!("timed out waiting for dispatcher")
    }
}
