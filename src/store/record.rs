use super::StoreError;
use crate::types::{Conversation, DEFAULT_TITLE, Message, Rating, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Schema version written into every record.
pub const RECORD_VERSION: u32 = 1;

// Records written before versioning carry no tag and share the v1 layout.
fn untagged_version() -> u32 {
    1
}

#[derive(Serialize, Deserialize)]
struct ConversationRecord {
    #[serde(default = "untagged_version")]
    version: u32,
    id: Uuid,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    messages: Vec<MessageRecord>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    updated_at: Option<Value>,
}

#[derive(Serialize, Deserialize)]
struct MessageRecord {
    id: Uuid,
    content: String,
    role: Role,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    is_streaming: bool,
    #[serde(default)]
    rating: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub(super) struct LastActiveRecord {
    #[serde(default = "untagged_version")]
    pub version: u32,
    pub conversation_id: Uuid,
}

impl LastActiveRecord {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            version: RECORD_VERSION,
            conversation_id,
        }
    }
}

/// Serialize a conversation as a versioned JSON document.
pub fn encode_conversation(conversation: &Conversation) -> Result<String, StoreError> {
    let settled = conversation.settled();
    let record = ConversationRecord {
        version: RECORD_VERSION,
        id: settled.id,
        title: Some(settled.title),
        messages: settled
            .messages
            .into_iter()
            .map(|msg| {
                Ok(MessageRecord {
                    id: msg.id,
                    timestamp: Some(encode_time(msg.created_at)?),
                    content: msg.content,
                    role: msg.role,
                    is_streaming: false,
                    rating: msg.rating.map(|r| i64::from(r.as_raw())),
                })
            })
            .collect::<Result<_, StoreError>>()?,
        created_at: Some(encode_time(settled.created_at)?),
        updated_at: Some(encode_time(settled.updated_at)?),
    };
    Ok(serde_json::to_string_pretty(&record)?)
}

/// Parse a versioned document.
///
/// Missing or unreadable timestamps become `loaded_at`, a missing title
/// becomes the default title, and unknown rating values read as unrated.
/// Unknown versions and structurally broken documents are rejected with the
/// reason as the error.
pub fn decode_conversation(raw: &str, loaded_at: OffsetDateTime) -> Result<Conversation, String> {
    let record: ConversationRecord = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if record.version != RECORD_VERSION {
        return Err(format!("unsupported record version {}", record.version));
    }

    let messages = record
        .messages
        .into_iter()
        .map(|msg| Message {
            id: msg.id,
            content: msg.content,
            role: msg.role,
            created_at: decode_time(msg.timestamp.as_ref()).unwrap_or(loaded_at),
            is_streaming: false,
            rating: msg.rating.and_then(Rating::from_raw),
        })
        .collect();

    Ok(Conversation {
        id: record.id,
        title: record.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        messages,
        created_at: decode_time(record.created_at.as_ref()).unwrap_or(loaded_at),
        updated_at: decode_time(record.updated_at.as_ref()).unwrap_or(loaded_at),
    })
}

pub(super) fn decode_last_active(raw: &str) -> Result<Uuid, String> {
    let record: LastActiveRecord = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if record.version != RECORD_VERSION {
        return Err(format!("unsupported record version {}", record.version));
    }
    Ok(record.conversation_id)
}

fn encode_time(at: OffsetDateTime) -> Result<Value, StoreError> {
    at.format(&Rfc3339)
        .map(Value::String)
        .map_err(|e| StoreError::Corrupt {
            path: "timestamp".to_string(),
            reason: e.to_string(),
        })
}

fn decode_time(value: Option<&Value>) -> Option<OffsetDateTime> {
    let text = value?.as_str()?;
    OffsetDateTime::parse(text, &Rfc3339).ok()
}
