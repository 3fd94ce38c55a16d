use anyhow::{Context, Result};
use jumpchat::ai;
use jumpchat::config::AppConfig;
use jumpchat::history::group_by_recency;
use jumpchat::reachability::NetworkMonitor;
use jumpchat::session::{SessionEngine, SessionEvent};
use jumpchat::store::FileStore;
use jumpchat::types::{Conversation, Rating, Role};
use std::io::Write;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

const HELP: &str = "\
commands:
  /new              start a new conversation
  /list             list saved conversations
  /open N           open conversation N from /list
  /delete N         delete conversation N from /list
  /rate N up|down   rate message N of the open conversation
  /regen N          regenerate reply N of the open conversation
  /ack              clear the last error
  /quit             exit
anything else is sent as a message";

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_writer(std::io::stderr)
        .init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to read .env"),
    }

    let monitor = NetworkMonitor::shared();
    monitor.initialize(config.probe.clone());

    let store = Arc::new(FileStore::new(&config.data_dir));
    tracing::info!(data_dir = %config.data_dir.display(), "using conversation store");
    let source = ai::from_config(&config.provider)?;

    let (engine, restore) = SessionEngine::start(store, source, monitor.clone(), config.session.clone());
    if let Err(e) = restore.await {
        tracing::warn!(error = %e, "restore task failed");
    }

    let render = tokio::spawn(render(engine.clone()));
    print_transcript(&engine.active_conversation());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if !handle_line(&engine, line.trim()).await {
            break;
        }
    }

    render.abort();
    monitor.stop();
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(engine: &SessionEngine, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        None => {}
        Some("/quit") => return false,
        Some("/help") => println!("{HELP}"),
        Some("/new") => {
            engine.start_new_conversation();
            println!("-- new conversation --");
        }
        Some("/ack") => engine.acknowledge_error(),
        Some("/list") => {
            engine.load_conversations().await;
            print_registry(&engine.conversations());
        }
        Some("/open") => match pick(&engine.conversations(), parts.next()) {
            Some(conversation) => {
                engine.load_conversation(conversation).await;
                print_transcript(&engine.active_conversation());
            }
            None => println!("no such conversation; see /list"),
        },
        Some("/delete") => match pick(&engine.conversations(), parts.next()) {
            Some(conversation) => {
                engine.delete_conversation(conversation.id).await;
                println!("deleted \"{}\"", conversation.title);
            }
            None => println!("no such conversation; see /list"),
        },
        Some("/rate") => {
            let message = message_at(engine, parts.next());
            let rating = match parts.next() {
                Some("up") => Some(Rating::ThumbsUp),
                Some("down") => Some(Rating::ThumbsDown),
                _ => None,
            };
            match (message, rating) {
                (Some(id), Some(rating)) => engine.rate_message(id, rating).await,
                _ => println!("usage: /rate N up|down"),
            }
        }
        Some("/regen") => match message_at(engine, parts.next()) {
            Some(id) => {
                let engine = engine.clone();
                tokio::spawn(async move { engine.regenerate_response(id).await });
            }
            None => println!("usage: /regen N"),
        },
        Some(command) if command.starts_with('/') => println!("unknown command {command}; try /help"),
        Some(_) => {
            let engine = engine.clone();
            let text = line.to_string();
            tokio::spawn(async move { engine.send_message(&text).await });
        }
    }
    true
}

fn pick(conversations: &[Conversation], index: Option<&str>) -> Option<Conversation> {
    let index: usize = index?.parse().ok()?;
    conversations.get(index.checked_sub(1)?).cloned()
}

fn message_at(engine: &SessionEngine, index: Option<&str>) -> Option<Uuid> {
    let index: usize = index?.parse().ok()?;
    engine
        .active_conversation()
        .messages
        .get(index.checked_sub(1)?)
        .map(|msg| msg.id)
}

fn print_registry(conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("no saved conversations");
        return;
    }
    let now = OffsetDateTime::now_utc();
    let mut number = 0;
    for group in group_by_recency(conversations, now) {
        println!("{}", group.title);
        for conversation in group.conversations {
            number += 1;
            println!("  {number}. {}", conversation.title);
        }
    }
}

fn print_transcript(conversation: &Conversation) {
    println!("== {} ==", conversation.title);
    for (i, msg) in conversation.messages.iter().enumerate() {
        let who = match msg.role {
            Role::User => "you",
            Role::Assistant => "ai",
        };
        let rating = match msg.rating {
            Some(Rating::ThumbsUp) => " [+]",
            Some(Rating::ThumbsDown) => " [-]",
            None => "",
        };
        println!("{}. {who}{rating}: {}", i + 1, msg.content);
    }
}

/// Echo streaming replies as they grow, and report how each one ended.
async fn render(engine: SessionEngine) {
    let mut conversation = engine.subscribe_conversation();
    let mut events = engine.subscribe_events();
    let mut printed: Option<(Uuid, usize)> = None;

    loop {
        tokio::select! {
            changed = conversation.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = conversation.borrow_and_update().clone();
                if let Some(reply) = snapshot.messages.iter().rev().find(|m| m.is_streaming) {
                    echo(&mut printed, reply.id, &reply.content);
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::FirstToken { .. }) => {}
                Ok(SessionEvent::ResponseCompleted { message_id, .. }) => {
                    // The final snapshot may not have been echoed yet.
                    if let Some(reply) = engine.active_conversation().message(message_id) {
                        echo(&mut printed, reply.id, &reply.content);
                    }
                    println!();
                    printed = None;
                }
                Ok(SessionEvent::ResponseFailed { failure, .. }) => {
                    println!("\n[error] {failure} (/ack to dismiss)");
                    printed = None;
                }
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "render fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn echo(printed: &mut Option<(Uuid, usize)>, id: Uuid, content: &str) {
    let already = match *printed {
        Some((printed_id, len)) if printed_id == id => len,
        _ => {
            print!("ai: ");
            0
        }
    };
    if let Some(fresh) = content.get(already..) {
        print!("{fresh}");
        let _ = std::io::stdout().flush();
    }
    *printed = Some((id, content.len().max(already)));
}
