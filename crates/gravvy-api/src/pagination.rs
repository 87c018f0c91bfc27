use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use gravvy_db::activities::{FeedCursor, FeedPage};

use crate::error::ApiError;

/// Activity feed page size.
pub const ACTIVITY_PAGE_SIZE: usize = 100;

/// Ranked video list page size.
pub const VIDEO_PAGE_SIZE: usize = 25;

#[derive(Debug, Default, Deserialize)]
pub struct CursorQuery {
    pub cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

fn invalid_cursor() -> ApiError {
    ApiError::NotFound
}

/// Opaque cursor token: `b|<created_at>|<id>` or `a|...`, base64 encoded.
pub fn encode_cursor(cursor: &FeedCursor) -> String {
    let (dir, created_at, id) = match cursor {
        FeedCursor::Before { created_at, id } => ("b", created_at, id),
        FeedCursor::After { created_at, id } => ("a", created_at, id),
    };
    B64.encode(format!("{}|{}|{}", dir, created_at.to_rfc3339(), id))
}

pub fn decode_cursor(token: &str) -> Result<FeedCursor, ApiError> {
    let raw = B64.decode(token).map_err(|_| invalid_cursor())?;
    let raw = String::from_utf8(raw).map_err(|_| invalid_cursor())?;

    let mut parts = raw.splitn(3, '|');
    let (Some(dir), Some(ts), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid_cursor());
    };
    let created_at = DateTime::parse_from_rfc3339(ts)
        .map_err(|_| invalid_cursor())?
        .with_timezone(&Utc);
    let id: i64 = id.parse().map_err(|_| invalid_cursor())?;

    match dir {
        "b" => Ok(FeedCursor::Before { created_at, id }),
        "a" => Ok(FeedCursor::After { created_at, id }),
        _ => Err(invalid_cursor()),
    }
}

/// Links to the older (`next`) and newer (`previous`) pages around `page`.
pub fn feed_links(url: &str, page: &FeedPage) -> (Option<String>, Option<String>) {
    let link = |cursor: FeedCursor| format!("{}?cursor={}", url, encode_cursor(&cursor));

    let next = match page.rows.last() {
        Some(last) if page.has_older => Some(link(FeedCursor::Before {
            created_at: last.created_at,
            id: last.id,
        })),
        _ => None,
    };
    let previous = match page.rows.first() {
        Some(first) if page.has_newer => Some(link(FeedCursor::After {
            created_at: first.created_at,
            id: first.id,
        })),
        _ => None,
    };
    (next, previous)
}

/// 1-based page number. Anything else is a 404, as is a page past the end
/// (checked by the caller once the count is known).
pub fn page_number(query: &PageQuery) -> Result<usize, ApiError> {
    match query.page.as_deref() {
        None => Ok(1),
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(ApiError::NotFound),
        },
    }
}

/// `(next, previous)` links for page-number pagination.
pub fn page_links(url: &str, page: usize, count: usize) -> (Option<String>, Option<String>) {
    let pages = count.div_ceil(VIDEO_PAGE_SIZE).max(1);
    let next = (page < pages).then(|| format!("{}?page={}", url, page + 1));
    let previous = match page {
        1 => None,
        2 => Some(url.to_string()),
        n => Some(format!("{}?page={}", url, n - 1)),
    };
    (next, previous)
}
