//! Client for Anthropic's Messages API.
//!
//! Unlike the OpenAI-shaped providers, Claude takes system instructions in
//! a dedicated top-level `system` field rather than inline in `messages`,
//! so this client hoists any [`Role::System`] messages out before
//! converting the rest.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use llmgate_core::error::{Error, Result};
use llmgate_core::message::{Content, ContentPart, Message, Role, ToolCall, ToolDefinition};
use llmgate_core::provider::{Choice, GenerateRequest, GenerateResponse, Provider, ProviderKind, Usage};
use llmgate_core::streaming::{StreamingChoice, StreamingResponse};

use crate::utils::{HttpConfig, SseBuffer};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Client for Anthropic's Claude models.
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicClient {
    /// Build a client, defaulting to `model` or the kind's documented
    /// default when absent, and `base_url` to `api.anthropic.com` unless
    /// overridden.
    pub fn new(
        api_key: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
        model: Option<String>,
    ) -> Result<Self> {
        let client = HttpConfig {
            timeout,
            ..HttpConfig::default()
        }
        .build_client()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| ProviderKind::Anthropic.default_model().to_string()),
        })
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|e| Error::ProviderSchema(e.to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        Ok(headers)
    }

    /// Split a message list into Claude's top-level `system` string and the
    /// remaining user/assistant/tool turns.
    fn split_system_prompt(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts = Vec::new();
        let mut rest = Vec::new();
        for msg in messages {
            if msg.role == Role::System {
                system_parts.push(msg.text());
            } else {
                rest.push(msg);
            }
        }
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, rest)
    }

    fn convert_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "assistant",
                    Role::System => "user",
                };

                let content = match &msg.content {
                    Content::Text(text) => AnthropicContent::Text(text.clone()),
                    Content::Parts(parts) => AnthropicContent::Blocks(
                        parts
                            .iter()
                            .map(|part| match part {
                                ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
                                ContentPart::ToolCall { id, name, arguments } => ContentBlock::ToolUse {
                                    id: id.clone(),
                                    name: name.clone(),
                                    input: serde_json::from_str(arguments).unwrap_or(serde_json::Value::Null),
                                },
                                ContentPart::ToolResult { tool_call_id, content } => ContentBlock::ToolResult {
                                    tool_use_id: tool_call_id.clone(),
                                    content: content.clone(),
                                },
                            })
                            .collect(),
                    ),
                };

                AnthropicMessage {
                    role: role.to_string(),
                    content,
                }
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone(),
            })
            .collect()
    }

    fn build_request(&self, request: &GenerateRequest, stream: bool) -> AnthropicRequest {
        let (system, rest) = Self::split_system_prompt(&request.messages);
        AnthropicRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: Self::convert_messages(&rest),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: request.temperature,
            tools: Self::convert_tools(&request.tools),
            stream,
        }
    }

    async fn post_messages(&self, body: &AnthropicRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_head: String = response.text().await.unwrap_or_default().chars().take(500).collect();
            return Err(Error::ProviderHttp { status, body_head });
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for AnthropicClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let body = self.build_request(request, false);
        let response = self.post_messages(&body).await?;
        let wire: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::ProviderSchema(e.to_string()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in wire.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => {
                    let arguments = serde_json::to_string(&input).unwrap_or_default();
                    tool_calls.push(ToolCall::new(id, name, arguments));
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }

        let mut message = Message::assistant(text);
        message.tool_calls = tool_calls.clone();

        Ok(GenerateResponse {
            id: wire.id,
            created: 0,
            model: wire.model,
            choices: vec![Choice {
                index: 0,
                finish_reason: wire.stop_reason.unwrap_or_default(),
                message,
                tool_calls,
            }],
            usage: Usage::new(wire.usage.input_tokens, wire.usage.output_tokens),
        })
    }

    async fn generate_streaming(&self, request: &GenerateRequest) -> Result<StreamingResponse> {
        let body = self.build_request(request, true);
        let response = self.post_messages(&body).await?;
        let byte_stream = response.bytes_stream();
        Ok(StreamingResponse::from_stream(parse_anthropic_stream(byte_stream)))
    }

    async fn health_check(&self) -> Result<()> {
        let mut request = GenerateRequest::new(vec![Message::user("ping")]);
        request.max_tokens = Some(1);
        self.generate(&request).await.map(|_| ())
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    content_block: Option<ContentBlockStart>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

struct ToolState {
    id: String,
    name: String,
    input_json: String,
}

/// Parse a raw Claude SSE byte stream into [`StreamingChoice`]s,
/// reassembling a tool call's `partial_json` deltas between its
/// `content_block_start` and `content_block_stop` events.
fn parse_anthropic_stream<S>(stream: S) -> impl Stream<Item = std::result::Result<StreamingChoice, Error>>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let state = (stream, SseBuffer::new(), String::new(), None::<ToolState>);

    futures::stream::unfold(state, |(mut stream, mut byte_buffer, mut text_buffer, mut current_tool)| async move {
        loop {
            if let Some(pos) = text_buffer.find("\n\n") {
                let line = text_buffer[..pos].to_string();
                text_buffer.drain(..pos + 2);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };

                match serde_json::from_str::<StreamEvent>(data) {
                    Ok(event) => match event.event_type.as_str() {
                        "content_block_start" => {
                            if let Some(block) = event.content_block {
                                if block.block_type == "tool_use" {
                                    current_tool = Some(ToolState {
                                        id: block.id.unwrap_or_default(),
                                        name: block.name.unwrap_or_default(),
                                        input_json: String::new(),
                                    });
                                }
                            }
                        }
                        "content_block_delta" => {
                            if let Some(delta) = event.delta {
                                if let Some(text) = delta.text {
                                    if !text.is_empty() {
                                        return Some((
                                            Ok(StreamingChoice::Message(text)),
                                            (stream, byte_buffer, text_buffer, current_tool),
                                        ));
                                    }
                                }
                                if let Some(json) = delta.partial_json {
                                    if let Some(tool) = current_tool.as_mut() {
                                        tool.input_json.push_str(&json);
                                    }
                                }
                            }
                        }
                        "content_block_stop" => {
                            if let Some(tool) = current_tool.take() {
                                let call = ToolCall::new(tool.id, tool.name, tool.input_json);
                                return Some((
                                    Ok(StreamingChoice::ToolCall(call)),
                                    (stream, byte_buffer, text_buffer, None),
                                ));
                            }
                        }
                        "message_stop" => {
                            return Some((
                                Ok(StreamingChoice::Done),
                                (stream, byte_buffer, text_buffer, current_tool),
                            ));
                        }
                        _ => {}
                    },
                    Err(e) => {
                        tracing::debug!("anthropic: failed to parse SSE event: {e}");
                    }
                }
                continue;
            }

            match stream.next().await {
                Some(Ok(bytes)) => {
                    let text = byte_buffer.push_and_get_text(&bytes);
                    text_buffer.push_str(&text);
                }
                Some(Err(e)) => {
                    return Some((Err(Error::Http(e)), (stream, byte_buffer, text_buffer, current_tool)));
                }
                None => return None,
            }
        }
    })
}
