//! Turns untrusted list parameters into safe SQL fragments.
//!
//! Identifiers (sort columns, searched columns, table names) only ever come
//! from `'static` allow-lists; caller text reaches the database exclusively
//! as bound parameters. Unrecognized input degrades to defaults instead of
//! failing.

use sqlx::{Postgres, QueryBuilder};

use crate::models::QueryParams;

/// Longest search term kept; longer input is truncated.
pub const MAX_SEARCH_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("desc") | Some("descending") => SortDirection::Desc,
            _ => SortDirection::Asc,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Lifecycle restriction applied to collection reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowFilter {
    /// Not soft-deleted.
    #[default]
    Alive,
    /// Not soft-deleted and status open.
    Active,
    /// Soft-deleted only.
    Deleted,
    /// Everything, deleted rows included.
    All,
}

impl RowFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("active") => RowFilter::Active,
            Some("deleted") => RowFilter::Deleted,
            Some("all") | Some("include_deleted") => RowFilter::All,
            _ => RowFilter::Alive,
        }
    }

    fn condition(&self) -> Option<&'static str> {
        match self {
            RowFilter::Alive => Some("deleted_at IS NULL"),
            RowFilter::Active => Some("deleted_at IS NULL AND status = 'O'"),
            RowFilter::Deleted => Some("deleted_at IS NOT NULL"),
            RowFilter::All => None,
        }
    }
}

/// Per-entity allow-lists.
#[derive(Debug, Clone, Copy)]
pub struct QuerySpec {
    /// Columns OR-ed together for free-text search.
    pub search_columns: &'static [&'static str],
    /// Columns a caller may sort by.
    pub sort_fields: &'static [&'static str],
    /// Sort column used when the caller's choice is missing or refused.
    pub default_sort: &'static str,
    /// Appended to every ORDER BY so pages are stable.
    pub tiebreaker: &'static str,
}

/// Pagination bounds, normally taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
        }
    }
}

/// Validated form of [`QueryParams`], ready to be rendered into SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedQuery {
    pattern: Option<String>,
    search_columns: &'static [&'static str],
    tiebreaker: &'static str,
    pub sort_column: &'static str,
    pub direction: SortDirection,
    pub limit: i64,
    pub offset: i64,
    pub row_filter: RowFilter,
}

/// Never fails: every parameter falls back to a safe default.
pub fn sanitize(params: &QueryParams, spec: &QuerySpec, limits: PageLimits) -> SanitizedQuery {
    let sort_column = params
        .sort_by
        .as_deref()
        .map(str::trim)
        .and_then(|wanted| {
            spec.sort_fields
                .iter()
                .find(|allowed| allowed.eq_ignore_ascii_case(wanted))
                .copied()
        })
        .unwrap_or(spec.default_sort);

    let max_limit = limits.max_limit.max(1);
    let limit = params
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(limits.default_limit)
        .clamp(1, max_limit);
    let page = params.page.filter(|p| *p >= 1).unwrap_or(1);
    let offset = (page - 1).saturating_mul(limit);

    SanitizedQuery {
        pattern: params.search.as_deref().and_then(like_pattern),
        search_columns: spec.search_columns,
        tiebreaker: spec.tiebreaker,
        sort_column,
        direction: SortDirection::parse(params.sort_dir.as_deref()),
        limit,
        offset,
        row_filter: RowFilter::parse(params.filter.as_deref()),
    }
}

/// `%term%` with LIKE metacharacters escaped, or `None` for blank input.
/// NUL bytes are dropped; PostgreSQL text cannot hold them.
fn like_pattern(raw: &str) -> Option<String> {
    let stripped: String = raw.chars().filter(|c| *c != '\0').collect();
    let term = stripped.trim();
    if term.is_empty() {
        return None;
    }

    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars().take(MAX_SEARCH_CHARS) {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    Some(pattern)
}

impl SanitizedQuery {
    pub fn search_pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Append the WHERE clause (lifecycle filter and search).
    pub fn push_filters(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        let search_columns: &[&str] = match self.pattern {
            Some(_) if !self.search_columns.is_empty() => self.search_columns,
            _ => &[],
        };
        let lifecycle = self.row_filter.condition();

        if lifecycle.is_none() && search_columns.is_empty() {
            return;
        }

        qb.push(" WHERE ");
        if let Some(condition) = lifecycle {
            qb.push("(").push(condition).push(")");
            if !search_columns.is_empty() {
                qb.push(" AND ");
            }
        }

        if let Some(pattern) = &self.pattern {
            if !search_columns.is_empty() {
                qb.push("(");
                for (i, column) in search_columns.iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    qb.push("COALESCE(")
                        .push(*column)
                        .push(", '') ILIKE ")
                        .push_bind(pattern.clone())
                        .push(" ESCAPE '\\'");
                }
                qb.push(")");
            }
        }
    }

    /// Append ORDER BY, LIMIT and OFFSET.
    pub fn push_window(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        let direction = self.direction.as_sql();
        qb.push(" ORDER BY ")
            .push(self.sort_column)
            .push(" ")
            .push(direction);
        if self.sort_column != self.tiebreaker {
            qb.push(", ").push(self.tiebreaker).push(" ").push(direction);
        }
        qb.push(" LIMIT ")
            .push_bind(self.limit)
            .push(" OFFSET ")
            .push_bind(self.offset);
    }

    /// Turn a base `SELECT ... FROM table` into the page query.
    pub fn apply<'args>(
        &self,
        mut base: QueryBuilder<'args, Postgres>,
    ) -> QueryBuilder<'args, Postgres> {
        self.push_filters(&mut base);
        self.push_window(&mut base);
        base
    }

    /// Turn a base `SELECT COUNT(*) FROM table` into the matching count query.
    pub fn apply_count<'args>(
        &self,
        mut base: QueryBuilder<'args, Postgres>,
    ) -> QueryBuilder<'args, Postgres> {
        self.push_filters(&mut base);
        base
    }
}
