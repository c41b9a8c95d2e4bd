//! OpenAI-compatible chat completions client
//!
//! Works against OpenAI, OpenRouter, or a local server exposing `/v1`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::dialogue::DialogueMessage;
use crate::{Error, Result};

use super::ReplyGenerator;
use super::tools::{ToolDefinition, ToolRegistry};

/// Message as exchanged with the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn tool_result(id: &str, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(id.to_string()),
        }
    }
}

impl From<&DialogueMessage> for WireMessage {
    fn from(message: &DialogueMessage) -> Self {
        let role = match message.role {
            crate::dialogue::Role::System => "system",
            crate::dialogue::Role::User => "user",
            crate::dialogue::Role::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: Some(message.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

/// Chat completions client with an optional tool loop
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    tools: ToolRegistry,
    max_tool_rounds: usize,
}

impl ChatClient {
    /// Create a client without tools
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty
    pub fn new(base_url: &str, api_key: Option<String>, model: String) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: normalize_base_url(base_url)?,
            api_key: api_key.filter(|k| !k.is_empty()),
            model,
            tools: ToolRegistry::new(),
            max_tool_rounds: 5,
        })
    }

    /// Create a client from resolved configuration, with the built-in tools
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self::new(&config.base_url, config.api_key.clone(), config.model.clone())?
            .with_tools(ToolRegistry::with_builtins())
            .with_max_tool_rounds(config.max_tool_rounds))
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub const fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    async fn send(&self, messages: &[WireMessage], with_tools: bool) -> Result<WireMessage> {
        let definitions = self.tools.definitions();
        let offer_tools = with_tools && !definitions.is_empty();
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools: offer_tools.then_some(definitions.as_slice()),
            tool_choice: offer_tools.then_some("auto"),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = offer_tools,
            "sending chat completion"
        );

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }

        let body: ChatResponse = response.json().await?;
        first_message(body)
    }
}

fn first_message(response: ChatResponse) -> Result<WireMessage> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| Error::Llm("chat response had no choices".to_string()))
}

/// Trim the URL and make sure it ends in `/v1`
fn normalize_base_url(base_url: &str) -> Result<String> {
    let url = base_url.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(Error::Config("LLM base URL is empty".to_string()));
    }
    if url.ends_with("/v1") {
        Ok(url.to_string())
    } else {
        Ok(format!("{url}/v1"))
    }
}

#[async_trait]
impl ReplyGenerator for ChatClient {
    async fn complete(&self, history: &[DialogueMessage]) -> Result<String> {
        let messages: Vec<WireMessage> = history.iter().map(WireMessage::from).collect();
        let reply = self.send(&messages, false).await?;
        Ok(reply.content.unwrap_or_default().trim().to_string())
    }

    async fn complete_with_tools(&self, history: &[DialogueMessage]) -> Result<String> {
        if self.tools.is_empty() {
            return self.complete(history).await;
        }

        let mut messages: Vec<WireMessage> = history.iter().map(WireMessage::from).collect();
        // Repeated identical calls replay the earlier result instead of running again
        let mut results: HashMap<(String, String), String> = HashMap::new();

        for round in 0..self.max_tool_rounds {
            let reply = self.send(&messages, true).await?;
            let calls = reply.tool_calls.clone().unwrap_or_default();
            if calls.is_empty() {
                return Ok(reply.content.unwrap_or_default().trim().to_string());
            }

            tracing::debug!(round, calls = calls.len(), "model requested tools");
            messages.push(reply);

            let mut any_new = false;
            for call in &calls {
                let key = (call.function.name.clone(), call.function.arguments.clone());
                let output = if let Some(previous) = results.get(&key) {
                    previous.clone()
                } else {
                    any_new = true;
                    let output = self
                        .tools
                        .execute(&call.function.name, &call.function.arguments)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(tool = %call.function.name, error = %e, "tool failed");
                            format!("Error: {e}")
                        });
                    results.insert(key, output.clone());
                    output
                };
                messages.push(WireMessage::tool_result(&call.id, output));
            }

            if !any_new {
                break;
            }
        }

        let reply = self.send(&messages, false).await?;
        Ok(reply.content.unwrap_or_default().trim().to_string())
    }

    fn supports_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}
