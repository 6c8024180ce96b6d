//! Pagination.

use serde::{Deserialize, Serialize};

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pageable {
    pub page: usize,
    pub size: usize,
}

impl Pageable {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

impl Default for Pageable {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

/// One page of results plus the total element count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Slice an already-ordered collection.
    pub fn from_ordered(all: Vec<T>, pageable: Pageable) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(pageable.offset())
            .take(pageable.size)
            .collect();
        Self {
            items,
            page: pageable.page,
            size: pageable.size,
            total,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }

    pub fn total_pages(&self) -> usize {
        if self.size == 0 {
            0
        } else {
            self.total.div_ceil(self.size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_requested_page() {
        let page = Page::from_ordered((1..=7).collect::<Vec<_>>(), Pageable::new(1, 3));
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages(), 3);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let page = Page::from_ordered(vec![1, 2], Pageable::new(5, 10));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 2);
    }
}
