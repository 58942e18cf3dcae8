//! Cursor paging over a room's message stream.
//!
//! The cursor is a message id, nothing more. Backward pages walk from newest
//! to oldest, forward pages catch up from a last-seen id. Both ask the store
//! for one row past the limit to learn whether another page exists.

use serde::{Deserialize, Serialize};

use crate::db::{ChatMessage, ChatStore, Direction};
use crate::error::{ChatError, ChatResult};
use crate::ids::MessageId;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<MessageId>,
    pub has_more: bool,
}

impl Page {
    fn empty() -> Self {
        Page {
            messages: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Raw `cursor`/`limit` query parameters. Both are optional and `limit` is
/// taken as text so a junk value falls back to the default instead of
/// rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    pub fn cursor(&self) -> ChatResult<Option<MessageId>> {
        match self.cursor.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ChatError::InvalidRequest(format!("bad cursor {raw}"))),
        }
    }

    pub fn limit(&self) -> usize {
        clamp_limit(self.limit.as_deref().and_then(|raw| raw.trim().parse().ok()))
    }
}

/// Anything outside `[1, MAX_LIMIT]` becomes `DEFAULT_LIMIT`.
pub fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if (1..=MAX_LIMIT as i64).contains(&n) => n as usize,
        _ => DEFAULT_LIMIT,
    }
}

/// History: up to `limit` messages older than `cursor` (or the newest ones
/// without a cursor), newest first.
pub async fn page(
    store: &dyn ChatStore,
    room_id: &str,
    cursor: Option<MessageId>,
    limit: usize,
) -> ChatResult<Page> {
    let rows = store
        .query_messages(room_id, cursor, Direction::Older, limit + 1)
        .await?;
    Ok(split_page(rows, limit))
}

/// Catch-up: up to `limit` messages newer than `cursor`, oldest first.
/// Without a cursor there is nothing to catch up from.
pub async fn page_forward(
    store: &dyn ChatStore,
    room_id: &str,
    cursor: Option<MessageId>,
    limit: usize,
) -> ChatResult<Page> {
    let Some(cursor) = cursor else {
        return Ok(Page::empty());
    };
    let rows = store
        .query_messages(room_id, Some(cursor), Direction::Newer, limit + 1)
        .await?;
    Ok(split_page(rows, limit))
}

/// `rows` holds at most `limit + 1` entries; the extra one only signals that
/// another page exists and never reaches the caller.
fn split_page(mut rows: Vec<ChatMessage>, limit: usize) -> Page {
    if rows.len() <= limit {
        return Page {
            messages: rows,
            next_cursor: None,
            has_more: false,
        };
    }
    rows.truncate(limit);
    let next_cursor = rows.last().map(|m| m.id);
    Page {
        messages: rows,
        has_more: next_cursor.is_some(),
        next_cursor,
    }
}
