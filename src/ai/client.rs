use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;

// ============================================
// Error Types
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("no network connection")]
    Offline,

    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Transport(String),
}

impl CompletionError {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport(detail.into())
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CompletionError::Timeout
        } else if err.is_connect() {
            CompletionError::Offline
        } else {
            CompletionError::Transport(err.to_string())
        }
    }
}

pub type CompletionResult<T> = Result<T, CompletionError>;

/// Progressively longer full-text snapshots of one response. Each item is the
/// whole reply so far, never a delta.
pub type SnapshotStream = BoxStream<'static, CompletionResult<String>>;

/// A remote text-generation endpoint.
///
/// Prompts are single-turn: only the latest user text is sent, never the
/// surrounding conversation.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    /// Full completion for `prompt` in one response.
    async fn send(&self, prompt: &str) -> CompletionResult<String>;

    /// Streaming completion. Dropping the returned stream abandons the request.
    async fn stream(&self, prompt: &str) -> CompletionResult<SnapshotStream>;
}

// ============================================
// Request Shape
// ============================================

pub(crate) const SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant that provides clear, accurate responses.
Only use markdown formatting when specifically needed:
- Use bullet points for lists
- Use numbered lists for steps or sequences
- Use bold for important terms or concepts
- Use code blocks for code snippets
- Use tables for structured data
Otherwise, provide responses in plain text.
Keep responses concise yet informative."#;

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct WireMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

pub(crate) fn prompt_messages(prompt: &str) -> [WireMessage<'_>; 2] {
    [
        WireMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        },
        WireMessage {
            role: "user",
            content: prompt,
        },
    ]
}

/// Maps a non-success HTTP status to the error taxonomy.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> CompletionError {
    match status.as_u16() {
        408 | 504 => CompletionError::Timeout,
        _ => CompletionError::Transport(format!("{provider} error {status}: {body}")),
    }
}

// ============================================
// Streaming Support
// ============================================

/// What one decoded line of a streaming body contributes.
#[derive(Debug, PartialEq)]
pub(crate) enum Piece {
    Delta(String),
    Done,
    Skip,
}

/// Splits a byte stream into lines. Bytes are held until a full line arrives
/// so multi-byte characters split across chunks decode correctly.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut line = String::from_utf8_lossy(raw).into_owned();
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

struct Pump<F> {
    body: BoxStream<'static, CompletionResult<Vec<u8>>>,
    lines: LineBuffer,
    ready: VecDeque<String>,
    parse: F,
    transcript: String,
    body_done: bool,
    finished: bool,
}

/// Turns a line-framed body of deltas into cumulative snapshots.
///
/// `parse` sees every line (blank ones included, which SSE needs to close an
/// event). When the body ends a final blank line is fed to flush any event
/// still open.
pub(crate) fn snapshot_stream<F>(
    body: BoxStream<'static, CompletionResult<Vec<u8>>>,
    parse: F,
) -> SnapshotStream
where
    F: FnMut(&str) -> CompletionResult<Piece> + Send + 'static,
{
    let pump = Pump {
        body,
        lines: LineBuffer::default(),
        ready: VecDeque::new(),
        parse,
        transcript: String::new(),
        body_done: false,
        finished: false,
    };

    stream::unfold(pump, |mut pump| async move {
        loop {
            if pump.finished {
                return None;
            }

            if let Some(line) = pump.ready.pop_front() {
                match (pump.parse)(&line) {
                    Ok(Piece::Delta(text)) => {
                        if text.is_empty() {
                            continue;
                        }
                        pump.transcript.push_str(&text);
                        let snapshot = pump.transcript.clone();
                        return Some((Ok(snapshot), pump));
                    }
                    Ok(Piece::Done) => return None,
                    Ok(Piece::Skip) => continue,
                    Err(err) => {
                        pump.finished = true;
                        return Some((Err(err), pump));
                    }
                }
            }

            if pump.body_done {
                return None;
            }

            match pump.body.next().await {
                Some(Ok(bytes)) => {
                    let lines = pump.lines.push(&bytes);
                    pump.ready.extend(lines);
                }
                Some(Err(err)) => {
                    pump.finished = true;
                    return Some((Err(err), pump));
                }
                None => {
                    pump.body_done = true;
                    pump.ready.extend(pump.lines.finish());
                    pump.ready.push_back(String::new());
                }
            }
        }
    })
    .boxed()
}

/// Adapts a `reqwest` body into the byte stream `snapshot_stream` consumes.
pub(crate) fn response_body(response: reqwest::Response) -> BoxStream<'static, CompletionResult<Vec<u8>>> {
    response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(CompletionError::from))
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: &[&[u8]]) -> BoxStream<'static, CompletionResult<Vec<u8>>> {
        let owned: Vec<CompletionResult<Vec<u8>>> =
            chunks.iter().map(|c| Ok(c.to_vec())).collect();
        stream::iter(owned).boxed()
    }

    fn plain_lines(line: &str) -> CompletionResult<Piece> {
        match line {
            "" => Ok(Piece::Skip),
            "END" => Ok(Piece::Done),
            "FAIL" => Err(CompletionError::transport("upstream failure")),
            other => Ok(Piece::Delta(other.to_string())),
        }
    }

    #[test]
    fn test_line_buffer_joins_split_lines() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"hel").is_empty());
        assert_eq!(buf.push(b"lo\r\nwor"), vec!["hello".to_string()]);
        assert_eq!(buf.finish(), Some("wor".to_string()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_line_buffer_keeps_multibyte_chars_across_chunks() {
        let text = "héllo\n".as_bytes();
        let mut buf = LineBuffer::default();
        assert!(buf.push(&text[..2]).is_empty());
        assert_eq!(buf.push(&text[2..]), vec!["héllo".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshots_are_cumulative() {
        let stream = snapshot_stream(body(&[b"H\n", b"e\nllo\n"]), plain_lines);
        let snapshots: Vec<_> = stream.collect().await;
        assert_eq!(
            snapshots,
            vec![Ok("H".to_string()), Ok("He".to_string()), Ok("Hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_snapshot_stream_stops_at_done() {
        let stream = snapshot_stream(body(&[b"a\nEND\nb\n"]), plain_lines);
        let snapshots: Vec<_> = stream.collect().await;
        assert_eq!(snapshots, vec![Ok("a".to_string())]);
    }

    #[tokio::test]
    async fn test_snapshot_stream_flushes_trailing_line() {
        let stream = snapshot_stream(body(&[b"a\nb"]), plain_lines);
        let snapshots: Vec<_> = stream.collect().await;
        assert_eq!(snapshots, vec![Ok("a".to_string()), Ok("ab".to_string())]);
    }

    #[tokio::test]
    async fn test_snapshot_stream_ends_after_error() {
        let stream = snapshot_stream(body(&[b"a\nFAIL\nb\n"]), plain_lines);
        let snapshots: Vec<_> = stream.collect().await;
        assert_eq!(
            snapshots,
            vec![
                Ok("a".to_string()),
                Err(CompletionError::transport("upstream failure"))
            ]
        );
    }

    #[test]
    fn test_prompt_is_single_turn() {
        let messages = prompt_messages("What is Rust?");
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1], WireMessage { role: "user", content: "What is Rust?" });
    }

    #[test]
    fn test_status_error_maps_gateway_timeout() {
        assert_eq!(
            status_error("OpenAI", reqwest::StatusCode::GATEWAY_TIMEOUT, ""),
            CompletionError::Timeout
        );
        assert!(matches!(
            status_error("OpenAI", reqwest::StatusCode::UNAUTHORIZED, "bad key"),
            CompletionError::Transport(msg) if msg.contains("401")
        ));
    }
}
