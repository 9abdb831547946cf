//! Pagination for list-shaped operation responses.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default page size for paginated operations.
pub const DEFAULT_PAGE_SIZE: usize = 10;
/// Cap on page size to keep responses bounded.
pub const MAX_PAGE_SIZE: usize = 100;

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(Error::Invalid("page must be >= 1".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Invalid(format!(
                "page_size must be in 1..={MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

/// Pagination metadata returned with each page.
#[derive(Debug, Clone, Serialize)]
pub struct PageInfo {
    pub page: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub has_more: bool,
}

/// Slice one page out of a full result list.
pub fn paginate<T>(items: Vec<T>, request: PageRequest) -> Result<(Vec<T>, PageInfo)> {
    request.validate()?;

    let total_count = items.len();
    let total_pages = total_count.div_ceil(request.page_size);
    let start = (request.page - 1) * request.page_size;

    let page_items: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(request.page_size)
        .collect();

    let info = PageInfo {
        page: request.page,
        page_size: request.page_size,
        total_count,
        total_pages,
        has_more: request.page < total_pages,
    };
    Ok((page_items, info))
}
