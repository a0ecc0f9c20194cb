//! Pagination requests and descriptors.
//!
//! A [`PageDescriptor`] is computed per query from the requested window and the
//! total number of matching items. It is never cached.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A validated, zero-based page window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    size: u32,
}

impl PageRequest {
    /// Validate a raw page/size pair.
    ///
    /// `size` must be strictly positive and `page` non-negative.
    pub fn new(page: i64, size: i64) -> Result<Self, DomainError> {
        if size <= 0 {
            return Err(DomainError::validation(format!(
                "page size must be positive (got {size})"
            )));
        }
        if page < 0 {
            return Err(DomainError::validation(format!(
                "page must not be negative (got {page})"
            )));
        }

        let size = u32::try_from(size)
            .map_err(|_| DomainError::validation(format!("page size too large (got {size})")))?;
        let page = u32::try_from(page)
            .map_err(|_| DomainError::validation(format!("page too large (got {page})")))?;

        Ok(Self { page, size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Index of the first item of this window.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

/// Pagination metadata returned alongside a page slice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescriptor {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub page_size: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PageDescriptor {
    pub fn compute(request: PageRequest, total_items: u64) -> Self {
        let size = u64::from(request.size());
        let total_pages = total_items.div_ceil(size);
        let current_page = request.page();

        Self {
            current_page,
            total_pages,
            total_items,
            page_size: request.size(),
            has_next: u64::from(current_page) + 1 < total_pages,
            has_previous: current_page > 0,
        }
    }

    /// Number of items the window `[page*size, page*size+size)` holds.
    pub fn expected_len(&self) -> u64 {
        let offset = u64::from(self.current_page) * u64::from(self.page_size);
        self.total_items
            .saturating_sub(offset)
            .min(u64::from(self.page_size))
    }
}

/// A slice of results plus its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub descriptor: PageDescriptor,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, descriptor: PageDescriptor) -> Self {
        Self { items, descriptor }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            descriptor: self.descriptor,
        }
    }
}
