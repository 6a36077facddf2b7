// Pagination strategies for remote listings
//
// The invoker only talks to `Paginatable`; every descriptor's
// `PaginationStrategy` implements it.

use crate::models::{PageToken, PaginationStrategy};
use crate::validation::lookup_path;
use serde_json::Value;

pub trait Paginatable: Send + Sync {
    fn first_token(&self) -> PageToken;

    /// Page size to request given how many rows are still wanted
    fn request_size(&self, remaining: Option<usize>) -> Option<usize>;

    /// Query parameters addressing the page at `token`
    fn page_params(&self, token: &PageToken, page_size: Option<usize>) -> Vec<(String, String)>;

    /// Token of the following page, `None` once the API signals the end
    fn next_token(
        &self,
        current: &PageToken,
        body: &Value,
        rows_on_page: usize,
        page_size: Option<usize>,
    ) -> Option<PageToken>;
}

impl Paginatable for PaginationStrategy {
    fn first_token(&self) -> PageToken {
        match self {
            PaginationStrategy::None => PageToken::First,
            PaginationStrategy::Offset { .. } => PageToken::Offset(0),
            PaginationStrategy::PageNumber { first_page, .. } => PageToken::Page(*first_page),
            PaginationStrategy::Cursor { .. } => PageToken::First,
        }
    }

    fn request_size(&self, remaining: Option<usize>) -> Option<usize> {
        match self {
            PaginationStrategy::None => None,
            // Page arithmetic breaks if the size changes between pages
            PaginationStrategy::PageNumber { page_size, .. } => Some(*page_size),
            PaginationStrategy::Offset { page_size, .. } | PaginationStrategy::Cursor { page_size, .. } => {
                Some(match remaining {
                    Some(remaining) => remaining.min(*page_size).max(1),
                    None => *page_size,
                })
            }
        }
    }

    fn page_params(&self, token: &PageToken, page_size: Option<usize>) -> Vec<(String, String)> {
        let mut params = Vec::new();
        match (self, token) {
            (PaginationStrategy::None, _) => {}
            (
                PaginationStrategy::Offset {
                    limit_param,
                    offset_param,
                    ..
                },
                token,
            ) => {
                let offset = match token {
                    PageToken::Offset(offset) => *offset,
                    _ => 0,
                };
                if let Some(size) = page_size {
                    params.push((limit_param.clone(), size.to_string()));
                }
                params.push((offset_param.clone(), offset.to_string()));
            }
            (
                PaginationStrategy::PageNumber {
                    page_param,
                    size_param,
                    first_page,
                    ..
                },
                token,
            ) => {
                let page = match token {
                    PageToken::Page(page) => *page,
                    _ => *first_page,
                };
                params.push((page_param.clone(), page.to_string()));
                if let Some(size) = page_size {
                    params.push((size_param.clone(), size.to_string()));
                }
            }
            (
                PaginationStrategy::Cursor {
                    cursor_param,
                    size_param,
                    ..
                },
                token,
            ) => {
                if let Some(size) = page_size {
                    params.push((size_param.clone(), size.to_string()));
                }
                if let PageToken::Cursor(cursor) = token {
                    params.push((cursor_param.clone(), cursor.clone()));
                }
            }
        }
        params
    }

    fn next_token(
        &self,
        current: &PageToken,
        body: &Value,
        rows_on_page: usize,
        page_size: Option<usize>,
    ) -> Option<PageToken> {
        if rows_on_page == 0 {
            return None;
        }
        // A short page is the last page for size-driven strategies
        let full_page = page_size.map(|size| rows_on_page >= size).unwrap_or(false);

        match (self, current) {
            (PaginationStrategy::None, _) => None,
            (PaginationStrategy::Offset { .. }, PageToken::Offset(offset)) => {
                full_page.then(|| PageToken::Offset(offset + rows_on_page as u64))
            }
            (PaginationStrategy::Offset { .. }, _) => full_page.then(|| PageToken::Offset(rows_on_page as u64)),
            (PaginationStrategy::PageNumber { .. }, PageToken::Page(page)) => {
                full_page.then(|| PageToken::Page(page + 1))
            }
            (PaginationStrategy::PageNumber { first_page, .. }, _) => {
                full_page.then(|| PageToken::Page(first_page + 1))
            }
            (PaginationStrategy::Cursor { next_cursor_path, .. }, _) => {
                match lookup_path(body, next_cursor_path) {
                    Some(Value::String(cursor)) if !cursor.is_empty() => Some(PageToken::Cursor(cursor.clone())),
                    Some(Value::Number(n)) => Some(PageToken::Cursor(n.to_string())),
                    _ => None,
                }
            }
        }
    }
}
