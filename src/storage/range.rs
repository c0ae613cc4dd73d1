//! Page-range bookkeeping.
//!
//! A page range groups a bounded run of base pages together with the
//! tail pages that hold version history for rows that originated in
//! those base pages. The merge pass consumes this bookkeeping to decide
//! which ranges have accumulated enough history to be worth compacting.

use crate::config::{BASE_PAGES_PER_RANGE, MERGE_TAIL_PAGE_THRESHOLD};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRange {
    index: usize,
    base_page_ids: Vec<u64>,
    tail_page_ids: Vec<u64>,
}

impl PageRange {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            base_page_ids: Vec::new(),
            tail_page_ids: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn base_page_ids(&self) -> &[u64] {
        &self.base_page_ids
    }

    pub fn tail_page_ids(&self) -> &[u64] {
        &self.tail_page_ids
    }

    pub fn is_full(&self) -> bool {
        self.base_page_ids.len() >= BASE_PAGES_PER_RANGE
    }

    pub fn add_base_page(&mut self, page_id: u64) {
        debug_assert!(!self.is_full());
        self.base_page_ids.push(page_id);
    }

    /// Record that `page_id` holds tail rows for this range. Tail pages
    /// are shared across updates, so re-registration is a no-op.
    pub fn add_tail_page(&mut self, page_id: u64) {
        if self.tail_page_ids.last() != Some(&page_id) && !self.tail_page_ids.contains(&page_id) {
            self.tail_page_ids.push(page_id);
        }
    }

    pub fn merge_eligible(&self) -> bool {
        self.tail_page_ids.len() > MERGE_TAIL_PAGE_THRESHOLD
    }

    /// Called after merge has folded the range's history into fresh
    /// base pages and reclaimed the old files.
    pub fn replace_after_merge(&mut self, new_base_page_ids: Vec<u64>) {
        self.base_page_ids = new_base_page_ids;
        self.tail_page_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity() {
        let mut range = PageRange::new(0);
        for id in 0..BASE_PAGES_PER_RANGE as u64 {
            assert!(!range.is_full());
            range.add_base_page(id + 1);
        }
        assert!(range.is_full());
    }

    #[test]
    fn test_tail_registration_dedupes() {
        let mut range = PageRange::new(0);
        range.add_tail_page(1);
        range.add_tail_page(1);
        range.add_tail_page(2);
        range.add_tail_page(1);
        assert_eq!(range.tail_page_ids(), &[1, 2]);
    }

    #[test]
    fn test_merge_eligibility() {
        let mut range = PageRange::new(0);
        for id in 0..=MERGE_TAIL_PAGE_THRESHOLD as u64 {
            range.add_tail_page(id + 1);
        }
        assert!(range.merge_eligible());
        range.replace_after_merge(vec![40]);
        assert!(!range.merge_eligible());
        assert_eq!(range.base_page_ids(), &[40]);
    }
}
