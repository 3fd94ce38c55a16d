use crate::ai::client::{
    CompletionError, CompletionResult, CompletionSource, Piece, SnapshotStream, WireMessage,
    prompt_messages, response_body, snapshot_stream, status_error,
};
use crate::config::OpenAiConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible chat completions endpoint.
pub struct OpenAiSource {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiSource {
    pub fn new(config: &OpenAiConfig) -> CompletionResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| CompletionError::transport(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    fn request(&self, prompt: &str, stream: bool) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: &prompt_messages(prompt),
                temperature: self.temperature,
                stream,
            });
        if stream {
            request = request.header("accept", "text/event-stream");
        }
        request
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage<'a>],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Parses the payload of one SSE `data:` event.
pub(crate) fn parse_sse_data(data: &str) -> CompletionResult<Piece> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(Piece::Skip);
    }
    if trimmed == "[DONE]" {
        return Ok(Piece::Done);
    }

    if let Ok(parsed) = serde_json::from_str::<ChatResponse>(trimmed) {
        if let Some(first) = parsed.choices.into_iter().next() {
            if let Some(delta) = first.delta
                && let Some(piece) = delta.content
            {
                return Ok(Piece::Delta(piece));
            }
            if let Some(msg) = first.message
                && let Some(content) = msg.content
            {
                return Ok(Piece::Delta(content));
            }
        }
        return Ok(Piece::Skip);
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(trimmed) {
        return Err(CompletionError::Transport(envelope.error.message));
    }

    Ok(Piece::Skip)
}

/// Line parser for an SSE body. Consecutive `data:` lines are joined until a
/// blank line closes the event.
fn sse_lines() -> impl FnMut(&str) -> CompletionResult<Piece> + Send + 'static {
    let mut data_acc: Option<String> = None;
    move |line: &str| {
        if line.is_empty() {
            return match data_acc.take() {
                Some(data) => parse_sse_data(&data),
                None => Ok(Piece::Skip),
            };
        }
        if let Some(rest) = line.strip_prefix("data:") {
            let fragment = rest.trim_start();
            match &mut data_acc {
                Some(existing) => existing.push_str(fragment),
                None => data_acc = Some(fragment.to_string()),
            }
        }
        Ok(Piece::Skip)
    }
}

#[async_trait]
impl CompletionSource for OpenAiSource {
    async fn send(&self, prompt: &str) -> CompletionResult<String> {
        let response = self.request(prompt, false).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error("OpenAI", status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| CompletionError::transport(format!("unexpected response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|msg| msg.content)
            .ok_or_else(|| CompletionError::transport("response contained no choices"))
    }

    async fn stream(&self, prompt: &str) -> CompletionResult<SnapshotStream> {
        let response = self.request(prompt, true).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI", status, &body));
        }
        Ok(snapshot_stream(response_body(response), sse_lines()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::stream;

    #[test]
    fn test_parses_sse_data() {
        assert_eq!(parse_sse_data("").unwrap(), Piece::Skip);
        assert_eq!(parse_sse_data("[DONE]").unwrap(), Piece::Done);
        assert_eq!(
            parse_sse_data(r#"{"choices":[{"delta":{"content":"hello"}}]}"#).unwrap(),
            Piece::Delta("hello".to_string())
        );
        assert_eq!(
            parse_sse_data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            Piece::Skip
        );
    }

    #[test]
    fn test_sse_error_payload_is_transport_error() {
        let err = parse_sse_data(r#"{"error":{"message":"quota exceeded"}}"#).unwrap_err();
        assert_eq!(err, CompletionError::Transport("quota exceeded".to_string()));
    }

    #[tokio::test]
    async fn test_sse_body_yields_cumulative_snapshots() {
        let raw = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"H\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"e\"}}]}\r\n\r\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let (head, tail) = raw.as_bytes().split_at(30);
        let chunks: Vec<CompletionResult<Vec<u8>>> = vec![Ok(head.to_vec()), Ok(tail.to_vec())];
        let snapshots: Vec<_> = snapshot_stream(stream::iter(chunks).boxed(), sse_lines())
            .collect()
            .await;
        assert_eq!(
            snapshots,
            vec![
                Ok("H".to_string()),
                Ok("He".to_string()),
                Ok("Hello".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_sse_event_without_trailing_blank_line_is_flushed() {
        let raw = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n".to_vec();
        let snapshots: Vec<_> = snapshot_stream(stream::iter(vec![Ok(raw)]).boxed(), sse_lines())
            .collect()
            .await;
        assert_eq!(snapshots, vec![Ok("Hi".to_string())]);
    }
}
