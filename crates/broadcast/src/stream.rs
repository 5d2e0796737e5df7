//! Chunked response streaming.
//!
//! When streaming is enabled, each captured LLM response is decomposed into
//! a finite sequence of typed chunks (thinking segments and response
//! slices) emitted as `intermediate_response` envelopes, followed by
//! exactly one `final_answer` marker carrying the complete text.

use std::sync::Arc;

use crate::broadcaster::Broadcaster;
use crate::envelope::{session_channel, Envelope};
use tarsy_domain::now_us;

/// Response text is sliced into chunks of this many characters.
const RESPONSE_CHUNK_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Thinking(String),
    Response(String),
    FunctionCall { name: String, arguments: String },
}

impl StreamChunk {
    fn kind(&self) -> &'static str {
        match self {
            StreamChunk::Thinking(_) => "thinking",
            StreamChunk::Response(_) => "response",
            StreamChunk::FunctionCall { .. } => "function_call",
        }
    }

    fn content(&self) -> String {
        match self {
            StreamChunk::Thinking(text) | StreamChunk::Response(text) => text.clone(),
            StreamChunk::FunctionCall { name, arguments } => format!("{name}({arguments})"),
        }
    }
}

/// Decompose one response into its chunk sequence.
pub fn chunk_response(thinking: Option<&str>, response: &str) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    if let Some(thinking) = thinking {
        if !thinking.is_empty() {
            chunks.push(StreamChunk::Thinking(thinking.to_owned()));
        }
    }
    let chars: Vec<char> = response.chars().collect();
    for slice in chars.chunks(RESPONSE_CHUNK_CHARS) {
        chunks.push(StreamChunk::Response(slice.iter().collect()));
    }
    chunks
}

/// Writes chunk sequences to the session channel.
pub struct StreamingPublisher {
    broadcaster: Arc<Broadcaster>,
}

impl StreamingPublisher {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Emit every chunk as an intermediate envelope, then exactly one
    /// `final_answer` marker with the complete response text.
    pub async fn publish(
        &self,
        session_id: &str,
        request_id: &str,
        chunks: &[StreamChunk],
        final_text: &str,
    ) {
        let channel = session_channel(session_id);
        for chunk in chunks {
            let envelope = Envelope::IntermediateResponse {
                session_id: session_id.to_owned(),
                request_id: request_id.to_owned(),
                chunk_type: chunk.kind().to_owned(),
                content: chunk.content(),
                timestamp_us: now_us(),
            };
            self.broadcaster.broadcast(&channel, &envelope).await;
        }
        let envelope = Envelope::FinalAnswer {
            session_id: session_id.to_owned(),
            request_id: request_id.to_owned(),
            content: final_text.to_owned(),
            timestamp_us: now_us(),
        };
        self.broadcaster.broadcast(&channel, &envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::subscription::SubscriptionAction;
    use tokio::sync::mpsc;

    #[test]
    fn chunking_slices_long_responses() {
        let chunks = chunk_response(Some("pondering"), &"x".repeat(1100));
        assert_eq!(chunks.len(), 4); // 1 thinking + 3 response slices
        assert_eq!(chunks[0], StreamChunk::Thinking("pondering".into()));
        assert!(matches!(&chunks[1], StreamChunk::Response(s) if s.len() == 512));
        assert!(matches!(&chunks[3], StreamChunk::Response(s) if s.len() == 76));
    }

    #[test]
    fn empty_thinking_is_skipped() {
        let chunks = chunk_response(Some(""), "short");
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Response(_)));
    }

    #[tokio::test]
    async fn publish_ends_with_exactly_one_final_answer() {
        let connections = Arc::new(ConnectionManager::new());
        let (tx, mut rx) = mpsc::channel(64);
        connections.connect("viewer", tx);
        connections.handle_subscription("viewer", SubscriptionAction::Subscribe, "session_s1");
        let publisher = StreamingPublisher::new(Arc::new(Broadcaster::new(connections)));

        let chunks = chunk_response(Some("hmm"), "the answer");
        publisher.publish("s1", "req-1", &chunks, "the answer").await;

        let mut types = Vec::new();
        while let Ok(message) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&message).unwrap();
            types.push(value["type"].as_str().unwrap().to_owned());
        }
        assert_eq!(
            types,
            vec!["intermediate_response", "intermediate_response", "final_answer"]
        );
    }
}
