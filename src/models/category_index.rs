//! Per-category secondary index over ledger rows
//!
//! Each indexed category id owns a singly-linked list threaded through row
//! indices: `head[category]` is the most recently linked row and `next[row]`
//! the row linked before it. Nothing is allocated per row beyond one slot in
//! `next`, which grows with the ledger's row capacity.

use super::ids::CategoryId;
use crate::error::{CashflowError, CashflowResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryIndex {
    head: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
}

impl CategoryIndex {
    /// Create an index covering category ids `0..max_category_id_exclusive`
    pub fn new(max_category_id_exclusive: usize, row_capacity: usize) -> Self {
        Self {
            head: vec![None; max_category_id_exclusive],
            next: vec![None; row_capacity],
        }
    }

    /// Number of category buckets
    pub fn bucket_count(&self) -> usize {
        self.head.len()
    }

    /// Whether `category` has a bucket in this index
    pub fn covers(&self, category: CategoryId) -> bool {
        category.index() < self.head.len()
    }

    /// Fail unless `category` has a bucket
    pub fn check(&self, category: CategoryId) -> CashflowResult<()> {
        if self.covers(category) {
            Ok(())
        } else {
            Err(CashflowError::Validation(format!(
                "category id {} outside indexed range 0..{}",
                category.get(),
                self.head.len()
            )))
        }
    }

    /// Make room for rows up to `row_capacity`
    pub fn grow_rows(&mut self, row_capacity: usize) {
        if row_capacity > self.next.len() {
            self.next.resize(row_capacity, None);
        }
    }

    /// Head-insert `row` into the list for `category`
    pub fn link(&mut self, row: usize, category: CategoryId) -> CashflowResult<()> {
        self.check(category)?;
        self.grow_rows(row + 1);
        let bucket = &mut self.head[category.index()];
        self.next[row] = *bucket;
        *bucket = Some(row);
        Ok(())
    }

    /// Rows linked under `category`, most recent first
    ///
    /// A category without a bucket yields nothing.
    pub fn rows(&self, category: CategoryId) -> CategoryRows<'_> {
        CategoryRows {
            index: self,
            cursor: self.head.get(category.index()).copied().flatten(),
        }
    }
}

/// Iterator over one category's row list
pub struct CategoryRows<'a> {
    index: &'a CategoryIndex,
    cursor: Option<usize>,
}

impl Iterator for CategoryRows<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let row = self.cursor?;
        self.cursor = self.index.next.get(row).copied().flatten();
        Some(row)
    }
}
