//! Lazy streaming response types.
//!
//! A streaming call returns a finite, lazily-produced sequence of chunks.
//! The sequence terminates on natural end-of-stream, cancellation, or a
//! provider error — an error is delivered as the final element and then
//! the stream closes.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::error::Error;
use crate::message::ToolCall;

/// One chunk of a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamingChoice {
    /// Incremental text content
    Message(String),
    /// A tool call, fully materialized once its arguments finish streaming
    ToolCall(ToolCall),
    /// Stream finished successfully
    Done,
}

impl StreamingChoice {
    /// Whether this chunk carries text.
    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message(_))
    }

    /// Whether this chunk is the terminal marker.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Borrow the text if this is a message chunk.
    pub fn as_message(&self) -> Option<&str> {
        match self {
            Self::Message(s) => Some(s),
            _ => None,
        }
    }
}

/// Boxed, pinned stream of chunks — the producer side is tied to whatever
/// cancellation token the caller supplied, so no hidden buffering beyond
/// one chunk happens between producer and consumer.
pub type StreamingResult = Pin<Box<dyn Stream<Item = Result<StreamingChoice, Error>> + Send>>;

/// A wrapper around a boxed chunk stream with a couple of convenience
/// methods layered on top.
pub struct StreamingResponse {
    inner: StreamingResult,
}

impl StreamingResponse {
    /// Wrap an already-boxed stream.
    pub fn new(stream: StreamingResult) -> Self {
        Self { inner: stream }
    }

    /// Box any compatible stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StreamingChoice, Error>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Drain the stream, concatenating all message chunks.
    pub async fn collect_text(mut self) -> Result<String, Error> {
        use futures::StreamExt;

        let mut result = String::new();
        while let Some(chunk) = self.inner.next().await {
            match chunk? {
                StreamingChoice::Message(text) => result.push_str(&text),
                StreamingChoice::Done => break,
                StreamingChoice::ToolCall(_) => {}
            }
        }
        Ok(result)
    }

    /// Unwrap into the underlying boxed stream.
    pub fn into_inner(self) -> StreamingResult {
        self.inner
    }
}

impl Stream for StreamingResponse {
    type Item = Result<StreamingChoice, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Builder for synthetic chunk streams, used by tests and the mock
/// provider to simulate streaming without a real HTTP round trip.
#[derive(Default)]
pub struct MockStreamBuilder {
    chunks: Vec<Result<StreamingChoice, Error>>,
}

impl MockStreamBuilder {
    /// Start an empty builder.
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Append a text chunk.
    pub fn message(mut self, text: impl Into<String>) -> Self {
        self.chunks.push(Ok(StreamingChoice::Message(text.into())));
        self
    }

    /// Append a tool-call chunk.
    pub fn tool_call(mut self, call: ToolCall) -> Self {
        self.chunks.push(Ok(StreamingChoice::ToolCall(call)));
        self
    }

    /// Append the terminal `Done` marker.
    pub fn done(mut self) -> Self {
        self.chunks.push(Ok(StreamingChoice::Done));
        self
    }

    /// Append an error as the final element (closes the stream after it).
    pub fn error(mut self, error: Error) -> Self {
        self.chunks.push(Err(error));
        self
    }

    /// Build the stream.
    pub fn build(self) -> StreamingResponse {
        StreamingResponse::from_stream(futures::stream::iter(self.chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn collects_text_across_chunks() {
        let stream = MockStreamBuilder::new()
            .message("Hello, ")
            .message("world!")
            .done()
            .build();

        let text = stream.collect_text().await.expect("collect should succeed");
        assert_eq!(text, "Hello, world!");
    }

    #[tokio::test]
    async fn iterates_chunk_by_chunk() {
        let mut stream = MockStreamBuilder::new()
            .message("a")
            .message("b")
            .done()
            .build();

        let mut seen = Vec::new();
        while let Some(chunk) = stream.next().await {
            if let Ok(StreamingChoice::Message(text)) = chunk {
                seen.push(text);
            }
        }
        assert_eq!(seen, vec!["a", "b"]);
    }
}
