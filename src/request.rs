//! Unified request and result types

use serde::{Deserialize, Serialize};

/// One OpenAI-style chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<serde_json::Value>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>
}

impl ChatMessage
{   /// Plain text message with the given role
    pub fn new(
      role: impl Into<String>
    , content: impl Into<String>
    ) -> Self
    {   ChatMessage
        {   role: role.into()
          , content: Some(content.into())
          , name: None
          , tool_calls: None
          , function_call: None
          , tool_call_id: None
        }
    }

    pub fn system(content: impl Into<String>) -> Self
    {   Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self
    {   Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self
    {   Self::new("assistant", content)
    }

    /// Whether the message is well formed for its role
    pub fn is_valid(&self) -> bool
    {   let has_tool_fields = self.tool_calls.is_some()
          || self.function_call.is_some()
          || self.tool_call_id.is_some();
        match self.role.as_str()
        {   "user" | "system" | "developer" | "function" => {
              self.content.is_some() && !has_tool_fields
            }
          , "assistant" => {
              self.tool_call_id.is_none()
                && (self.content.is_some()
                  || self.tool_calls.is_some()
                  || self.function_call.is_some())
            }
          , "tool" => {
              self.content.is_some() && self.tool_call_id.is_some()
            }
          , _ => false
        }
    }
}

/// Reject message lists the backend would refuse
pub fn validate_messages(
  messages: &[ChatMessage]
) -> Result<(), crate::error::Error>
{   if messages.is_empty()
    {   return Err(crate::error::Error::InvalidMessages(
          "message list is empty".to_string()
        ));
    }
    match messages.iter().position(|m| !m.is_valid())
    {   Some(idx) => Err(crate::error::Error::InvalidMessages(
          format!(
            "message {} with role '{}' is malformed",
            idx, messages[idx].role
          )
        ))
      , None => Ok(())
    }
}

/// Per-request options, overriding deployment defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions
{   /// Request a streamed response and join the chunks
    #[serde(default)]
    pub stream: bool
  , /// Temperature for sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>
  , /// Max tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>
}

/// Classified outcome of one executor call
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult
{   /// Whether the request succeeded
    pub ok: bool
  , /// Whether the job may be attempted again
    pub retryable: bool
  , /// Response content, if successful
    pub response: Option<String>
  , /// Error encountered, if any
    pub error: Option<crate::error::Error>
}

impl RequestResult
{   pub fn success(response: impl Into<String>) -> Self
    {   RequestResult
        {   ok: true
          , retryable: false
          , response: Some(response.into())
          , error: None
        }
    }

    pub fn retryable(error: crate::error::Error) -> Self
    {   RequestResult
        {   ok: false
          , retryable: true
          , response: None
          , error: Some(error)
        }
    }

    pub fn fatal(error: crate::error::Error) -> Self
    {   RequestResult
        {   ok: false
          , retryable: false
          , response: None
          , error: Some(error)
        }
    }
}
