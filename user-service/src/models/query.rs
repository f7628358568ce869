//! Caller-supplied query parameters and read results.

use serde::Serialize;

use crate::models::user::{User, UserView};
use crate::services::context::RequestContext;

/// External id value selecting the collection path.
pub const COLLECTION_SENTINEL: &str = "all";

/// Untrusted read parameters. Nothing here is interpolated into SQL
/// without passing through the sanitizer.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// External id of one user, or `"all"` for a collection query.
    pub uuid: String,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// `alive` (default), `active`, `deleted` or `all`.
    pub filter: Option<String>,
    pub ctx: RequestContext,
}

impl QueryParams {
    pub fn collection(ctx: RequestContext) -> Self {
        Self {
            uuid: COLLECTION_SENTINEL.to_string(),
            ctx,
            ..Default::default()
        }
    }

    pub fn single(uuid: impl Into<String>, ctx: RequestContext) -> Self {
        Self {
            uuid: uuid.into(),
            ctx,
            ..Default::default()
        }
    }

    pub fn is_collection(&self) -> bool {
        self.uuid == COLLECTION_SENTINEL
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: impl Into<String>) -> Self {
        self.sort_by = Some(field.into());
        self.sort_dir = Some(direction.into());
        self
    }

    pub fn with_page(mut self, page: i64, limit: i64) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Outcome of a read: one enriched user, or a page plus the total match
/// count.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReadResult {
    Item(Box<UserView>),
    Collection { items: Vec<User>, total: i64 },
}

impl ReadResult {
    pub fn into_item(self) -> Option<UserView> {
        match self {
            ReadResult::Item(view) => Some(*view),
            ReadResult::Collection { .. } => None,
        }
    }

    pub fn into_collection(self) -> Option<(Vec<User>, i64)> {
        match self {
            ReadResult::Collection { items, total } => Some((items, total)),
            ReadResult::Item(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::sample_user;

    #[test]
    fn sentinel_selects_collection() {
        assert!(QueryParams::collection(RequestContext::new()).is_collection());
        assert!(!QueryParams::single("abc", RequestContext::new()).is_collection());
        assert!(!QueryParams::single("ALL", RequestContext::new()).is_collection());
    }

    #[test]
    fn results_are_mutually_exclusive() {
        let item = ReadResult::Item(Box::new(UserView::new(sample_user())));
        assert!(item.clone().into_collection().is_none());
        assert!(item.into_item().is_some());

        let page = ReadResult::Collection {
            items: vec![sample_user()],
            total: 3,
        };
        let (items, total) = page.into_collection().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(total, 3);
    }
}
