//! Registry ordering and sidebar grouping.

use crate::types::Conversation;
use std::cmp::Ordering;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Conversations sharing a recency label, newest first.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationGroup {
    pub title: String,
    pub conversations: Vec<Conversation>,
}

/// Most recently updated first. Ties fall back to id so the order is stable.
pub fn sort_by_recency(conversations: &mut [Conversation]) {
    conversations.sort_by(compare_recency);
}

pub(crate) fn compare_recency(a: &Conversation, b: &Conversation) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Human label for how long ago `updated` was, judged in `now`'s offset.
pub fn recency_label(updated: OffsetDateTime, now: OffsetDateTime) -> String {
    let updated = updated.to_offset(now.offset());
    let days = (now.date() - updated.date()).whole_days();

    match days {
        ..=0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        2..7 => format!("{days} days ago"),
        7..28 => match days / 7 {
            1 => "1 week ago".to_string(),
            weeks => format!("{weeks} weeks ago"),
        },
        _ => match whole_months_between(updated.date(), now.date()) {
            ..=1 => "1 month ago".to_string(),
            months @ 2..12 => format!("{months} months ago"),
            _ => format_date(updated.date()),
        },
    }
}

/// Bucket conversations under recency labels, keeping newest-first order
/// both across and within groups.
pub fn group_by_recency(conversations: &[Conversation], now: OffsetDateTime) -> Vec<ConversationGroup> {
    let mut sorted = conversations.to_vec();
    sort_by_recency(&mut sorted);

    let mut groups: Vec<ConversationGroup> = Vec::new();
    for conversation in sorted {
        let label = recency_label(conversation.updated_at, now);
        match groups.last_mut() {
            Some(group) if group.title == label => group.conversations.push(conversation),
            _ => groups.push(ConversationGroup {
                title: label,
                conversations: vec![conversation],
            }),
        }
    }
    groups
}

fn whole_months_between(from: Date, to: Date) -> i32 {
    let mut months = (to.year() - from.year()) * 12 + (to.month() as i32 - from.month() as i32);
    if to.day() < from.day() {
        months -= 1;
    }
    months
}

fn format_date(date: Date) -> String {
    let format = format_description!("[month repr:short] [day padding:none], [year]");
    date.format(format)
        .unwrap_or_else(|_| date.to_string())
}
