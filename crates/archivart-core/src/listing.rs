//! List queries and pagination
//!
//! Admin tables share one query shape: optional search text, a sort column
//! picked from a per-table whitelist, a direction, and a page. Sort columns
//! are never interpolated from user input; only whitelisted SQL expressions
//! reach the query.

use serde::{Deserialize, Serialize};

/// Default page size
pub const DEFAULT_LIMIT: u32 = 10;
/// Largest accepted page size
pub const MAX_LIMIT: u32 = 100;
/// Page links shown around the current page
pub const WINDOW_PAGES: u32 = 5;

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending
    Asc,
    /// Descending
    #[default]
    Desc,
}

impl SortOrder {
    /// SQL keyword
    #[inline]
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Opposite direction
    #[inline]
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// Common list parameters, as received in a query string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Free-text search
    pub search: Option<String>,
    /// Requested sort key
    pub sort: Option<String>,
    /// Sort direction
    pub order: Option<SortOrder>,
    /// 1-based page
    pub page: Option<u32>,
    /// Page size
    pub limit: Option<u32>,
}

impl ListQuery {
    /// Empty query: first page, default size
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set search text
    #[inline]
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Set sort key and direction
    #[inline]
    #[must_use]
    pub fn with_sort(mut self, sort: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(sort.into());
        self.order = Some(order);
        self
    }

    /// Set page and size
    #[inline]
    #[must_use]
    pub fn with_page(mut self, page: u32, limit: u32) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    /// Effective page, at least 1
    #[inline]
    #[must_use]
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Effective page size, clamped to `1..=MAX_LIMIT`
    #[inline]
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Row offset of the page
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    /// Effective direction
    #[inline]
    #[must_use]
    pub fn order(&self) -> SortOrder {
        self.order.unwrap_or_default()
    }

    /// Trimmed search text, if any
    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// `%term%` LIKE pattern with wildcards in the term escaped by `\`
    #[must_use]
    pub fn like_pattern(&self) -> Option<String> {
        self.search_term().map(|term| {
            let escaped = term
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{escaped}%")
        })
    }

    /// Resolve the sort against a table whitelist
    #[must_use]
    pub fn sort_spec(&self, whitelist: &[(&str, &'static str)], default: &'static str) -> SortSpec {
        SortSpec::resolve(self.sort.as_deref(), self.order(), whitelist, default)
    }
}

/// Whitelisted ORDER BY clause
///
/// Whitelist expressions may carry `{dir}` and `{rev}` placeholders for
/// multi-column sorts; an expression without placeholders gets the direction
/// appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    expr: &'static str,
    order: SortOrder,
}

impl SortSpec {
    /// Map a requested key to its whitelisted expression
    ///
    /// Unknown keys fall back to `default`, which is itself an expression.
    #[must_use]
    pub fn resolve(
        requested: Option<&str>,
        order: SortOrder,
        whitelist: &[(&str, &'static str)],
        default: &'static str,
    ) -> Self {
        let expr = requested
            .and_then(|key| whitelist.iter().find(|(k, _)| *k == key))
            .map_or(default, |(_, expr)| *expr);
        Self { expr, order }
    }

    /// Render the clause body (without `ORDER BY`)
    #[must_use]
    pub fn to_sql(&self) -> String {
        if self.expr.contains("{dir}") || self.expr.contains("{rev}") {
            self.expr
                .replace("{dir}", self.order.sql())
                .replace("{rev}", self.order.reversed().sql())
        } else {
            format!("{} {}", self.expr, self.order.sql())
        }
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows on this page
    pub items: Vec<T>,
    /// Rows across all pages
    pub total: u64,
    /// 1-based page
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Page count, at least 1
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Assemble a page from a query and the total row count
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, query: &ListQuery) -> Self {
        let limit = query.limit();
        let pages = total.div_ceil(u64::from(limit)).max(1);
        Self {
            items,
            total,
            page: query.page(),
            limit,
            total_pages: u32::try_from(pages).unwrap_or(u32::MAX),
        }
    }

    /// Transform rows, keeping pagination
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }

    /// Navigation window for this page
    #[must_use]
    pub fn window(&self) -> PageWindow {
        PageWindow::new(self.page, self.total_pages, self.total, self.limit)
    }
}

/// Pagination controls for a table footer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    /// Current page
    pub current_page: u32,
    /// Page count
    pub total_pages: u32,
    /// Row count
    pub total_items: u64,
    /// 1-based index of first row shown, 0 when there are no rows
    pub start_item: u64,
    /// 1-based index of last row shown, 0 when there are no rows
    pub end_item: u64,
    /// Previous page exists
    pub has_prev: bool,
    /// Next page exists
    pub has_next: bool,
    /// First page link
    pub start_page: u32,
    /// Last page link
    pub end_page: u32,
}

impl PageWindow {
    /// Compute the window of at most [`WINDOW_PAGES`] links centred on `current`
    #[must_use]
    pub fn new(current: u32, total_pages: u32, total_items: u64, limit: u32) -> Self {
        let total_pages = total_pages.max(1);
        let current = current.clamp(1, total_pages);
        let mut start_page = current.saturating_sub(WINDOW_PAGES / 2).max(1);
        let end_page = (start_page + WINDOW_PAGES - 1).min(total_pages);
        if end_page - start_page + 1 < WINDOW_PAGES {
            start_page = (end_page + 1).saturating_sub(WINDOW_PAGES).max(1);
        }
        let (start_item, end_item) = if total_items == 0 {
            (0, 0)
        } else {
            let start = u64::from(current - 1) * u64::from(limit) + 1;
            (start.min(total_items), (u64::from(current) * u64::from(limit)).min(total_items))
        };

        Self {
            current_page: current,
            total_pages,
            total_items,
            start_item,
            end_item,
            has_prev: current > 1,
            has_next: current < total_pages,
            start_page,
            end_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const USER_SORTS: &[(&str, &str)] = &[
        ("name", "u.name"),
        ("email", "u.email"),
        ("status", "u.is_active {dir}, u.is_blocked {rev}"),
    ];

    #[test]
    fn defaults() {
        let q = ListQuery::new();
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), DEFAULT_LIMIT);
        assert_eq!(q.offset(), 0);
        assert_eq!(q.order(), SortOrder::Desc);
        assert_eq!(q.search_term(), None);
    }

    #[test]
    fn limit_and_page_are_clamped() {
        let q = ListQuery::new().with_page(0, 1000);
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), MAX_LIMIT);
        assert_eq!(ListQuery::new().with_page(3, 10).offset(), 20);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        let q = ListQuery::new().with_search("  50%_off ");
        assert_eq!(q.like_pattern().as_deref(), Some("%50\\%\\_off%"));
        assert_eq!(ListQuery::new().with_search("   ").like_pattern(), None);
    }

    #[test]
    fn sort_whitelist_and_fallback() {
        let q = ListQuery::new().with_sort("email", SortOrder::Asc);
        assert_eq!(q.sort_spec(USER_SORTS, "u.created_at").to_sql(), "u.email ASC");

        let injected = ListQuery::new().with_sort("name; DROP TABLE users", SortOrder::Asc);
        assert_eq!(
            injected.sort_spec(USER_SORTS, "u.created_at").to_sql(),
            "u.created_at ASC"
        );
    }

    #[test]
    fn multi_column_sort_placeholders() {
        let q = ListQuery::new().with_sort("status", SortOrder::Desc);
        assert_eq!(
            q.sort_spec(USER_SORTS, "u.created_at").to_sql(),
            "u.is_active DESC, u.is_blocked ASC"
        );
    }

    #[test]
    fn page_counts() {
        let q = ListQuery::new().with_page(2, 10);
        let page = Page::new(vec![1, 2, 3], 23, &q);
        assert_eq!(page.total_pages, 3);
        let empty: Page<i32> = Page::new(vec![], 0, &ListQuery::new());
        assert_eq!(empty.total_pages, 1);
        assert_eq!(page.map(|n| n * 2).items, vec![2, 4, 6]);
    }

    #[test]
    fn window_centres_on_current() {
        let w = PageWindow::new(6, 10, 100, 10);
        assert_eq!((w.start_page, w.end_page), (4, 8));
        assert_eq!((w.start_item, w.end_item), (51, 60));
        assert!(w.has_prev && w.has_next);
    }

    #[test]
    fn window_clamps_at_edges() {
        let first = PageWindow::new(1, 10, 100, 10);
        assert_eq!((first.start_page, first.end_page), (1, 5));
        assert!(!first.has_prev);

        let last = PageWindow::new(10, 10, 95, 10);
        assert_eq!((last.start_page, last.end_page), (6, 10));
        assert_eq!((last.start_item, last.end_item), (91, 95));
        assert!(!last.has_next);

        let few = PageWindow::new(2, 3, 25, 10);
        assert_eq!((few.start_page, few.end_page), (1, 3));
    }

    #[test]
    fn empty_window_shows_no_items() {
        let w = PageWindow::new(1, 0, 0, 10);
        assert_eq!((w.start_item, w.end_item), (0, 0));
        assert_eq!((w.current_page, w.total_pages), (1, 1));
        assert!(!w.has_prev && !w.has_next);
    }
}
