//! Client for OpenAI's chat-completions wire format, shared by OpenAI
//! itself and every OpenAI-compatible backend this gateway speaks to
//! (OpenRouter, Qwen) — they differ only in base URL and default model.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use llmgate_core::error::{Error, Result};
use llmgate_core::message::{Content, ContentPart, Message, Role, ToolCall, ToolDefinition};
use llmgate_core::provider::{Choice, GenerateRequest, GenerateResponse, Provider, ProviderKind, Usage};
use llmgate_core::streaming::{StreamingChoice, StreamingResponse};

use crate::utils::{HttpConfig, SseBuffer};

/// A client for any endpoint that speaks the OpenAI chat-completions
/// protocol.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    kind: ProviderKind,
    model: String,
}

impl OpenAiCompatClient {
    /// Build a client for `kind` against `base_url`, defaulting to the
    /// kind's documented model unless `model` is supplied.
    pub fn new(
        kind: ProviderKind,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
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
            base_url: base_url.into(),
            model: model.unwrap_or_else(|| kind.default_model().to_string()),
            kind,
        })
    }

    /// Convenience constructor for `api.openai.com`.
    pub fn openai(api_key: impl Into<String>, model: Option<String>) -> Result<Self> {
        Self::new(
            ProviderKind::OpenAi,
            api_key,
            "https://api.openai.com/v1",
            HttpConfig::default().timeout,
            model,
        )
    }

    /// Convenience constructor for OpenRouter.
    pub fn openrouter(api_key: impl Into<String>, model: Option<String>) -> Result<Self> {
        Self::new(
            ProviderKind::OpenRouter,
            api_key,
            "https://openrouter.ai/api/v1",
            HttpConfig::default().timeout,
            model,
        )
    }

    /// Convenience constructor for Qwen's OpenAI-compatible endpoint.
    pub fn qwen(api_key: impl Into<String>, model: Option<String>) -> Result<Self> {
        Self::new(
            ProviderKind::Qwen,
            api_key,
            "https://dashscope.aliyuncs.com/compatible-mode/v1",
            HttpConfig::default().timeout,
            model,
        )
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::ProviderSchema(e.to_string()))?,
        );
        Ok(headers)
    }

    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|msg| {
                let role = msg.role.as_str().to_string();
                let mut tool_call_id = None;
                let content = match &msg.content {
                    Content::Text(text) => serde_json::Value::String(text.clone()),
                    Content::Parts(parts) => {
                        let mut text_acc = String::new();
                        for part in parts {
                            match part {
                                ContentPart::Text { text } => text_acc.push_str(text),
                                ContentPart::ToolResult { tool_call_id: id, content } => {
                                    tool_call_id = Some(id.clone());
                                    text_acc = content.clone();
                                }
                                ContentPart::ToolCall { .. } => {}
                            }
                        }
                        serde_json::Value::String(text_acc)
                    }
                };

                WireMessage {
                    role,
                    content,
                    name: msg.name.clone(),
                    tool_call_id,
                    tool_calls: if msg.tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            msg.tool_calls
                                .iter()
                                .map(|tc| WireToolCall {
                                    id: tc.id.clone(),
                                    kind: "function".into(),
                                    function: WireFunctionCall {
                                        name: tc.function.name.clone(),
                                        arguments: tc.function.arguments.clone(),
                                    },
                                })
                                .collect(),
                        )
                    },
                }
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                kind: "function".into(),
                function: WireFunctionDef {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request(&self, request: &GenerateRequest, stream: bool) -> WireRequest {
        let tools = Self::convert_tools(&request.tools);
        let tool_choice = if tools.is_empty() { None } else { Some("auto".to_string()) };
        WireRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: Self::convert_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            tools,
            tool_choice,
            stream,
        }
    }

    async fn post_chat(&self, body: &WireRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.headers()?)
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
impl Provider for OpenAiCompatClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let body = self.build_request(request, false);
        let response = self.post_chat(&body).await?;
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::ProviderSchema(e.to_string()))?;

        let choices = wire
            .choices
            .into_iter()
            .map(|c| Choice {
                index: c.index,
                finish_reason: c.finish_reason.unwrap_or_default(),
                tool_calls: c
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
                    .collect(),
                message: Message::new(
                    role_from_wire(&c.message.role),
                    Content::text(c.message.content.unwrap_or_default()),
                ),
            })
            .collect();

        Ok(GenerateResponse {
            id: wire.id,
            created: wire.created,
            model: wire.model,
            choices,
            usage: Usage::new(wire.usage.prompt_tokens, wire.usage.completion_tokens),
        })
    }

    async fn generate_streaming(&self, request: &GenerateRequest) -> Result<StreamingResponse> {
        let body = self.build_request(request, true);
        let response = self.post_chat(&body).await?;
        let byte_stream = response.bytes_stream();
        Ok(StreamingResponse::from_stream(parse_sse_stream(byte_stream)))
    }

    async fn health_check(&self) -> Result<()> {
        let mut request = GenerateRequest::new(vec![Message::user("ping")]);
        request.max_tokens = Some(1);
        self.generate(&request).await.map(|_| ())
    }

    fn provider(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    created: i64,
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    index: u32,
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    role: String,
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn role_from_wire(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChunkChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Turn a raw SSE byte stream from `/chat/completions` into
/// [`StreamingChoice`]s, re-assembling tool-call argument deltas across
/// chunks before emitting each completed call.
///
/// A single `finish_reason: "tool_calls"` event can carry more than one
/// parallel tool call; completed calls are queued in `pending` and drained
/// one chunk per poll rather than only ever emitting the first.
fn parse_sse_stream<S>(stream: S) -> impl Stream<Item = std::result::Result<StreamingChoice, Error>>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let state = (
        stream,
        SseBuffer::new(),
        String::new(),
        HashMap::<usize, ToolCallAccumulator>::new(),
        std::collections::VecDeque::<ToolCall>::new(),
    );

    futures::stream::unfold(
        state,
        |(mut stream, mut byte_buffer, mut text_buffer, mut tools, mut pending)| async move {
            loop {
                if let Some(call) = pending.pop_front() {
                    return Some((
                        Ok(StreamingChoice::ToolCall(call)),
                        (stream, byte_buffer, text_buffer, tools, pending),
                    ));
                }

                if let Some(pos) = text_buffer.find("\n\n") {
                    let message = text_buffer[..pos].to_string();
                    text_buffer.drain(..pos + 2);

                    let Some(data) = message.strip_prefix("data: ") else {
                        continue;
                    };
                    if data.trim() == "[DONE]" {
                        return Some((
                            Ok(StreamingChoice::Done),
                            (stream, byte_buffer, text_buffer, tools, pending),
                        ));
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            let Some(choice) = chunk.choices.into_iter().next() else {
                                continue;
                            };

                            if let Some(content) = choice.delta.content {
                                if !content.is_empty() {
                                    return Some((
                                        Ok(StreamingChoice::Message(content)),
                                        (stream, byte_buffer, text_buffer, tools, pending),
                                    ));
                                }
                            }

                            if let Some(deltas) = choice.delta.tool_calls {
                                for delta in deltas {
                                    let index = delta.index.unwrap_or(0);
                                    let acc = tools.entry(index).or_insert(ToolCallAccumulator {
                                        id: None,
                                        name: None,
                                        arguments: String::new(),
                                    });
                                    if let Some(id) = delta.id {
                                        acc.id = Some(id);
                                    }
                                    if let Some(function) = delta.function {
                                        if let Some(name) = function.name {
                                            acc.name = Some(name);
                                        }
                                        if let Some(args) = function.arguments {
                                            acc.arguments.push_str(&args);
                                        }
                                    }
                                }
                            }

                            if choice.finish_reason.as_deref() == Some("tool_calls") {
                                let mut indices: Vec<usize> = tools.keys().copied().collect();
                                indices.sort_unstable();
                                for index in indices {
                                    if let Some(acc) = tools.remove(&index) {
                                        if let (Some(id), Some(name)) = (acc.id, acc.name) {
                                            pending.push_back(ToolCall::new(id, name, acc.arguments));
                                        }
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!("openai-compat: failed to parse SSE chunk: {e}");
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
                        return Some((
                            Err(Error::Http(e)),
                            (stream, byte_buffer, text_buffer, tools, pending),
                        ));
                    }
                    None => return None,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_text_message_to_wire_shape() {
        let messages = vec![Message::system("Be helpful"), Message::user("Hello")];
        let wire = OpenAiCompatClient::convert_messages(&messages);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
    }

    #[test]
    fn converts_tool_definition() {
        let tools = vec![ToolDefinition::new(
            "get_weather",
            "Get the weather",
            serde_json::json!({"type": "object"}),
        )];
        let wire = OpenAiCompatClient::convert_tools(&tools);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].function.name, "get_weather");
    }

    #[test]
    fn role_from_wire_defaults_to_user() {
        assert_eq!(role_from_wire("assistant"), Role::Assistant);
        assert_eq!(role_from_wire("bogus"), Role::User);
    }

    #[tokio::test]
    async fn parallel_tool_calls_in_one_finish_event_all_emit() {
        let events = [
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_0","function":{"name":"get_weather","arguments":"{\"city"}},{"index":1,"id":"call_1","function":{"name":"get_time","arguments":"{\"zone"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\":\"NYC\"}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"\":\"UTC\"}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ];
        let mut sse = String::new();
        for event in events {
            sse.push_str("data: ");
            sse.push_str(event);
            sse.push_str("\n\n");
        }
        sse.push_str("data: [DONE]\n\n");

        let byte_stream = futures::stream::iter(vec![Ok::<bytes::Bytes, reqwest::Error>(bytes::Bytes::from(
            sse.into_bytes(),
        ))]);

        let mut calls = Vec::new();
        let mut stream = Box::pin(parse_sse_stream(byte_stream));
        while let Some(item) = stream.next().await {
            match item.expect("chunk should parse") {
                StreamingChoice::ToolCall(call) => calls.push(call),
                StreamingChoice::Done => break,
                StreamingChoice::Message(_) => {}
            }
        }

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"city":"NYC"}"#);
        assert_eq!(calls[1].function.name, "get_time");
        assert_eq!(calls[1].function.arguments, r#"{"zone":"UTC"}"#);
    }
}
