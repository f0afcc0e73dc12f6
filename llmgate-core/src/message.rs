//! Neutral message types shared by every provider client.

use serde::{Deserialize, Serialize};

/// Role of a message's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// End-user message
    User,
    /// Assistant (model) message
    Assistant,
    /// Tool result message
    Tool,
}

impl Role {
    /// The wire-protocol string for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Content of a message: either plain text, or structured parts (tool
/// calls and tool results interleaved with text).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content
    Text(String),
    /// Structured content with multiple parts
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Build text content.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Concatenate all text-bearing parts into a single string.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// One part of structured message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text {
        /// The text itself
        text: String,
    },
    /// A tool call emitted by the assistant
    ToolCall {
        /// Opaque id assigned by the provider
        id: String,
        /// Name of the tool invoked
        name: String,
        /// Arguments, transported as a JSON string to preserve provider
        /// round-tripping.
        arguments: String,
    },
    /// The result of a tool call, supplied back to the model
    ToolResult {
        /// Id of the tool call this responds to
        tool_call_id: String,
        /// Result content
        content: String,
    },
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,
    /// What they said
    pub content: Content,
    /// Optional name, e.g. for distinguishing multiple tool callers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls attached to an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Free-form metadata the caller attached to this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Construct a message with the given role and content.
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            metadata: None,
        }
    }

    /// A system message.
    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    /// A user message.
    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Content::Parts(vec![ContentPart::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
            }]),
            name: None,
            tool_calls: Vec::new(),
            metadata: None,
        }
    }

    /// Attach a name to this message.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Get the plain-text rendering of this message's content.
    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// A tool call, either issued by an assistant or echoed back in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id assigned by the provider
    pub id: String,
    /// Kind tag — always `"function"` for the providers this gateway speaks to
    #[serde(default = "default_tool_call_kind")]
    pub kind: String,
    /// The function invocation
    pub function: ToolCallFunction,
}

fn default_tool_call_kind() -> String {
    "function".to_string()
}

/// The `(name, arguments)` pair inside a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Function name
    pub name: String,
    /// Arguments as a JSON-encoded string, transported as text to preserve
    /// provider round-tripping rather than parsed eagerly.
    pub arguments: String,
}

impl ToolCall {
    /// Construct a tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_tool_call_kind(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the arguments string into a typed struct.
    pub fn parse_args<T: for<'de> Deserialize<'de>>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_str(&self.function.arguments)
    }
}

/// A tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Kind tag — always `"function"` for the providers this gateway speaks to
    #[serde(default = "default_tool_call_kind")]
    pub kind: String,
    /// The function signature
    pub function: ToolFunctionDefinition,
}

/// The `(name, description, parameters)` triple inside a [`ToolDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunctionDefinition {
    /// Tool name
    pub name: String,
    /// Natural-language description shown to the model
    pub description: String,
    /// JSON-Schema-shaped parameter definition
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Build a tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: default_tool_call_kind(),
            function: ToolFunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}
