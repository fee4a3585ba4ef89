use serde::{Deserialize, Serialize};

use crate::cursor::PageCursor;

/// One page of query results plus the token for the next page.
///
/// `next_cursor` is absent iff the partition has been read to the end.
/// Serialized as `{"items": [...], "pagestate": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    #[serde(rename = "pagestate", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<PageCursor>,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<PageCursor>) -> Self {
        Self { items, next_cursor }
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}
