use crate::ai::client::{
    CompletionError, CompletionResult, CompletionSource, Piece, SnapshotStream, WireMessage,
    prompt_messages, response_body, snapshot_stream, status_error,
};
use crate::config::OllamaConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct OllamaSource {
    client: Client,
    model: String,
    endpoint: String,
    temperature: f32,
}

impl OllamaSource {
    pub fn new(config: &OllamaConfig) -> CompletionResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| CompletionError::transport(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            client,
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            temperature: config.temperature,
        })
    }

    fn request(&self, prompt: &str, stream: bool) -> reqwest::RequestBuilder {
        self.client.post(&self.endpoint).json(&OllamaChatRequest {
            model: &self.model,
            messages: &prompt_messages(prompt),
            stream,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        })
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage<'a>],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    message: Option<StreamChunkMessage>,
    done: Option<bool>,
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamChunkMessage {
    content: String,
}

/// Parses one JSONL line of an Ollama streaming reply.
pub(crate) fn parse_ollama_stream_line(line_with_ws: &str) -> CompletionResult<Piece> {
    let line = line_with_ws.trim();
    if line.is_empty() {
        return Ok(Piece::Skip);
    }
    let Ok(parsed) = serde_json::from_str::<StreamChunk>(line) else {
        return Ok(Piece::Skip);
    };
    if let Some(error) = parsed.error {
        return Err(CompletionError::Transport(error));
    }
    if parsed.done.unwrap_or(false) {
        // a closing line can still carry text; the body ends right after it
        return match parsed.message {
            Some(msg) if !msg.content.is_empty() => Ok(Piece::Delta(msg.content)),
            _ => Ok(Piece::Done),
        };
    }
    Ok(parsed
        .message
        .map(|msg| Piece::Delta(msg.content))
        .unwrap_or(Piece::Skip))
}

#[async_trait]
impl CompletionSource for OllamaSource {
    async fn send(&self, prompt: &str) -> CompletionResult<String> {
        let response = self.request(prompt, false).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            match serde_json::from_str::<OllamaChatResponse>(&body) {
                Ok(parsed) => Ok(parsed.message.map(|msg| msg.content).unwrap_or(body)),
                Err(_) => Ok(body),
            }
        } else {
            Err(status_error("Ollama", status, &body))
        }
    }

    async fn stream(&self, prompt: &str) -> CompletionResult<SnapshotStream> {
        let response = self.request(prompt, true).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", status, &body));
        }
        Ok(snapshot_stream(
            response_body(response),
            parse_ollama_stream_line,
        ))
    }
}
