//! Pagination facade shared by every listing operation.
//!
//! `page` is mandatory and must be a positive integer; anything else is a
//! request error, rejected before any entity lookup. `per_page` defaults to
//! 10 and is hard-capped at 50 regardless of what was asked for.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 50;

pub const BAD_PAGE_MESSAGE: &str = "page parameter must be positive integer";

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageRequest {
    pub fn new(page: i64) -> Self {
        Self {
            page: Some(page),
            per_page: None,
        }
    }

    pub fn with_per_page(page: i64, per_page: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }

    /// Validate and resolve to an effective `(page, per_page)` pair.
    pub fn resolve(&self) -> Result<(i64, i64)> {
        let page = match self.page {
            Some(p) if p >= 1 => p,
            _ => return Err(TrackerError::Request(BAD_PAGE_MESSAGE.to_string())),
        };

        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);

        Ok((page, per_page))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: i64,
    /// Effective value after the cap, not the requested one.
    pub per_page: i64,
    /// Matching records before pagination.
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub records: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Paginated<T> {
    pub fn new(records: Vec<T>, page: i64, per_page: i64, total: i64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        };
        Self {
            records,
            meta: PageMeta {
                page,
                per_page,
                total,
                total_pages,
            },
        }
    }
}

/// LIMIT/OFFSET for a resolved page.
pub fn to_limit_offset(page: i64, per_page: i64) -> (i64, i64) {
    (per_page, (page - 1) * per_page)
}
