/// Completion sources for JumpChat
///
/// This module abstracts the remote text-generation endpoint behind
/// [`CompletionSource`]. Every streaming call yields cumulative snapshots: each
/// item is the whole reply so far, so consumers simply overwrite.
///
/// # Architecture
///
/// - `client` - trait, error taxonomy, and the line-framed snapshot pump
/// - `providers` - OpenAI-compatible SSE and Ollama JSONL implementations
///
/// # Usage
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use jumpchat::ai;
/// use jumpchat::config::AppConfig;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = AppConfig::from_env()?;
/// let source = ai::from_config(&config.provider)?;
/// let mut snapshots = source.stream("Hello!").await?;
/// while let Some(snapshot) = snapshots.next().await {
///     println!("{}", snapshot?);
/// }
/// # Ok(())
/// # }
/// ```
mod client;
mod providers;

pub use client::{CompletionError, CompletionResult, CompletionSource, SnapshotStream};
pub use providers::{OllamaSource, OpenAiSource, from_config};
