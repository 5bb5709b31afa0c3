//! Monthly ledger: one month of transactions in columnar form
//!
//! Rows are stored struct-of-arrays: one column per field, all the same length.
//! Note text is not stored per row; every note is appended to a single byte
//! arena and the row keeps an `(offset, length)` span into it. Text is decoded
//! only when a row is read.
//!
//! Rows are append-only. Editing or deleting means building a new ledger from
//! the working set.

use std::borrow::Cow;
use std::ops::ControlFlow;

use tracing::debug;

use super::category_index::CategoryIndex;
use super::ids::{CategoryId, SubCategoryId};
use super::money::Money;
use crate::error::{CashflowError, CashflowResult};

/// Smallest row capacity a ledger starts with
pub const MIN_ROW_CAPACITY: usize = 8;
/// Smallest note arena a ledger starts with
pub const MIN_NOTE_CAPACITY: usize = 128;

/// Grow by half again, always by at least one
fn grown(capacity: usize) -> usize {
    capacity + (capacity >> 1).max(1)
}

/// One month of transactions
#[derive(Debug, Clone)]
pub struct MonthlyLedger {
    year: i32,
    month: u32,

    capacity: usize,
    timestamps: Vec<i64>,
    amounts: Vec<i64>,
    category_ids: Vec<CategoryId>,
    sub_ids: Vec<SubCategoryId>,
    note_offsets: Vec<u32>,
    note_lens: Vec<u32>,

    notes: Vec<u8>,
    note_capacity: usize,

    category_index: Option<CategoryIndex>,
}

/// Borrowed view of every column, in file order
#[derive(Debug, Clone, Copy)]
pub struct LedgerColumns<'a> {
    pub timestamps: &'a [i64],
    pub amounts: &'a [i64],
    pub category_ids: &'a [CategoryId],
    pub sub_ids: &'a [SubCategoryId],
    pub note_offsets: &'a [u32],
    pub note_lens: &'a [u32],
    pub notes: &'a [u8],
}

/// Owned columns used to rebuild a ledger read from disk
#[derive(Debug, Clone, Default)]
pub struct RawColumns {
    pub timestamps: Vec<i64>,
    pub amounts: Vec<i64>,
    pub category_ids: Vec<CategoryId>,
    pub sub_ids: Vec<SubCategoryId>,
    pub note_offsets: Vec<u32>,
    pub note_lens: Vec<u32>,
    pub notes: Vec<u8>,
}

impl MonthlyLedger {
    /// Create an empty ledger for `year`/`month` (month is 1-12)
    pub fn new(year: i32, month: u32) -> CashflowResult<Self> {
        Self::with_capacity(year, month, MIN_ROW_CAPACITY, MIN_NOTE_CAPACITY)
    }

    /// Create an empty ledger with room for `rows` rows and `note_bytes` of notes
    pub fn with_capacity(
        year: i32,
        month: u32,
        rows: usize,
        note_bytes: usize,
    ) -> CashflowResult<Self> {
        validate_month(month)?;
        let capacity = rows.max(MIN_ROW_CAPACITY);
        let note_capacity = note_bytes.max(MIN_NOTE_CAPACITY);

        Ok(Self {
            year,
            month,
            capacity,
            timestamps: Vec::with_capacity(capacity),
            amounts: Vec::with_capacity(capacity),
            category_ids: Vec::with_capacity(capacity),
            sub_ids: Vec::with_capacity(capacity),
            note_offsets: Vec::with_capacity(capacity),
            note_lens: Vec::with_capacity(capacity),
            notes: Vec::with_capacity(note_capacity),
            note_capacity,
            category_index: None,
        })
    }

    /// Rebuild a ledger from columns, checking every structural invariant
    pub fn from_columns(year: i32, month: u32, columns: RawColumns) -> CashflowResult<Self> {
        validate_month(month)?;
        let rows = columns.timestamps.len();
        let lengths = [
            columns.amounts.len(),
            columns.category_ids.len(),
            columns.sub_ids.len(),
            columns.note_offsets.len(),
            columns.note_lens.len(),
        ];
        if lengths.iter().any(|&len| len != rows) {
            return Err(CashflowError::InvalidFormat(
                "column lengths disagree".into(),
            ));
        }

        let arena = columns.notes.len();
        for (row, (&off, &len)) in columns
            .note_offsets
            .iter()
            .zip(&columns.note_lens)
            .enumerate()
        {
            let end = off as usize + len as usize;
            if end > arena {
                return Err(CashflowError::InvalidFormat(format!(
                    "note of row {} spans {}..{} beyond arena of {} bytes",
                    row, off, end, arena
                )));
            }
            if std::str::from_utf8(&columns.notes[off as usize..end]).is_err() {
                return Err(CashflowError::InvalidFormat(format!(
                    "note of row {} is not valid UTF-8",
                    row
                )));
            }
        }

        let capacity = rows.max(MIN_ROW_CAPACITY);
        let note_capacity = arena.max(MIN_NOTE_CAPACITY);
        let mut ledger = Self {
            year,
            month,
            capacity,
            timestamps: columns.timestamps,
            amounts: columns.amounts,
            category_ids: columns.category_ids,
            sub_ids: columns.sub_ids,
            note_offsets: columns.note_offsets,
            note_lens: columns.note_lens,
            notes: columns.notes,
            note_capacity,
            category_index: None,
        };
        ledger.reserve_columns(capacity);
        ledger.notes.reserve_exact(note_capacity - arena);
        Ok(ledger)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Rows the columns can hold before growing
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of note text stored
    pub fn note_arena_len(&self) -> usize {
        self.notes.len()
    }

    /// Bytes the note arena can hold before growing
    pub fn note_arena_capacity(&self) -> usize {
        self.note_capacity
    }

    /// Append a row and return its index
    ///
    /// Columns grow by roughly half again when full; the note arena grows the
    /// same way until the note fits. With the category index enabled, a
    /// category id outside the indexed range is rejected and nothing is
    /// appended.
    pub fn add(
        &mut self,
        timestamp_ms: i64,
        amount_minor: i64,
        category: CategoryId,
        sub: SubCategoryId,
        note: &str,
    ) -> CashflowResult<usize> {
        if let Some(index) = &self.category_index {
            index.check(category)?;
        }

        let bytes = note.as_bytes();
        let offset = u32::try_from(self.notes.len() + bytes.len())
            .map(|_| self.notes.len() as u32)
            .map_err(|_| CashflowError::Validation("note arena exceeds 4 GiB".into()))?;

        self.ensure_row_capacity();
        if !bytes.is_empty() {
            self.ensure_note_capacity(bytes.len());
            self.notes.extend_from_slice(bytes);
        }

        let row = self.timestamps.len();
        self.timestamps.push(timestamp_ms);
        self.amounts.push(amount_minor);
        self.category_ids.push(category);
        self.sub_ids.push(sub);
        self.note_offsets.push(offset);
        self.note_lens.push(bytes.len() as u32);

        if let Some(index) = &mut self.category_index {
            index.link(row, category)?;
        }
        Ok(row)
    }

    /// Read-only view of a row
    pub fn get(&self, row: usize) -> CashflowResult<EntryView<'_>> {
        if row >= self.len() {
            return Err(CashflowError::row_not_found(row));
        }
        Ok(EntryView { ledger: self, row })
    }

    /// Views of every row in insertion order
    pub fn iter(&self) -> impl Iterator<Item = EntryView<'_>> {
        (0..self.len()).map(move |row| EntryView { ledger: self, row })
    }

    /// Visit rows in insertion order until the visitor breaks
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(EntryView<'_>) -> ControlFlow<()>,
    {
        for view in self.iter() {
            if visitor(view).is_break() {
                break;
            }
        }
    }

    /// Build the category index over existing rows
    ///
    /// Fails, leaving any previous index in place, when an existing row uses a
    /// category id at or beyond `max_category_id_exclusive`.
    pub fn enable_category_index(&mut self, max_category_id_exclusive: usize) -> CashflowResult<()> {
        let mut index = CategoryIndex::new(max_category_id_exclusive, self.capacity);
        for (row, &category) in self.category_ids.iter().enumerate() {
            index.link(row, category)?;
        }
        debug!(
            buckets = max_category_id_exclusive,
            rows = self.len(),
            "category index enabled"
        );
        self.category_index = Some(index);
        Ok(())
    }

    pub fn disable_category_index(&mut self) {
        self.category_index = None;
    }

    pub fn category_index_enabled(&self) -> bool {
        self.category_index.is_some()
    }

    /// Visit the rows of one category until the visitor breaks
    ///
    /// With the index enabled rows come most recent first and an id outside
    /// the indexed range visits nothing. Without it this is a filtered full
    /// scan in insertion order.
    pub fn for_each_by_category<F>(&self, category: CategoryId, mut visitor: F)
    where
        F: FnMut(EntryView<'_>) -> ControlFlow<()>,
    {
        match &self.category_index {
            Some(index) => {
                for row in index.rows(category) {
                    if visitor(EntryView { ledger: self, row }).is_break() {
                        break;
                    }
                }
            }
            None => {
                for view in self.iter().filter(|v| v.category_id() == category) {
                    if visitor(view).is_break() {
                        break;
                    }
                }
            }
        }
    }

    /// Row indices ordered by ascending timestamp
    ///
    /// Equal timestamps may come out in any relative order. The columns are
    /// not touched.
    pub fn sorted_indices_by_timestamp_asc(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.sort_unstable_by_key(|&row| self.timestamps[row]);
        indices
    }

    /// Sum of amounts whose timestamp lies in `[from_inclusive, to_inclusive]`
    ///
    /// The sum wraps on signed 64-bit overflow.
    pub fn sum_amount_by_time_range(&self, from_inclusive: i64, to_inclusive: i64) -> i64 {
        self.timestamps
            .iter()
            .zip(&self.amounts)
            .filter(|(ts, _)| (from_inclusive..=to_inclusive).contains(*ts))
            .fold(0i64, |sum, (_, &amount)| sum.wrapping_add(amount))
    }

    /// Borrow all columns for serialization
    pub fn columns(&self) -> LedgerColumns<'_> {
        LedgerColumns {
            timestamps: &self.timestamps,
            amounts: &self.amounts,
            category_ids: &self.category_ids,
            sub_ids: &self.sub_ids,
            note_offsets: &self.note_offsets,
            note_lens: &self.note_lens,
            notes: &self.notes,
        }
    }

    fn ensure_row_capacity(&mut self) {
        if self.len() < self.capacity {
            return;
        }
        let new_capacity = grown(self.capacity);
        self.reserve_columns(new_capacity);
        if let Some(index) = &mut self.category_index {
            index.grow_rows(new_capacity);
        }
        self.capacity = new_capacity;
    }

    fn reserve_columns(&mut self, capacity: usize) {
        let extra = capacity.saturating_sub(self.len());
        self.timestamps.reserve_exact(extra);
        self.amounts.reserve_exact(extra);
        self.category_ids.reserve_exact(extra);
        self.sub_ids.reserve_exact(extra);
        self.note_offsets.reserve_exact(extra);
        self.note_lens.reserve_exact(extra);
    }

    fn ensure_note_capacity(&mut self, more: usize) {
        let need = self.notes.len() + more;
        if need <= self.note_capacity {
            return;
        }
        let mut new_capacity = self.note_capacity;
        while new_capacity < need {
            new_capacity = grown(new_capacity);
        }
        self.notes.reserve_exact(new_capacity - self.notes.len());
        self.note_capacity = new_capacity;
    }
}

fn validate_month(month: u32) -> CashflowResult<()> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(CashflowError::Validation(format!(
            "month must be 1..12, got {}",
            month
        )))
    }
}

/// Lightweight read-only view of one ledger row
#[derive(Debug, Clone, Copy)]
pub struct EntryView<'a> {
    ledger: &'a MonthlyLedger,
    row: usize,
}

impl<'a> EntryView<'a> {
    pub fn row(&self) -> usize {
        self.row
    }

    /// Epoch milliseconds
    pub fn timestamp(&self) -> i64 {
        self.ledger.timestamps[self.row]
    }

    pub fn amount_minor(&self) -> i64 {
        self.ledger.amounts[self.row]
    }

    pub fn amount(&self) -> Money {
        Money::from_minor(self.amount_minor())
    }

    pub fn category_id(&self) -> CategoryId {
        self.ledger.category_ids[self.row]
    }

    pub fn sub_category_id(&self) -> SubCategoryId {
        self.ledger.sub_ids[self.row]
    }

    /// Note text, decoded from the arena on each call
    pub fn note(&self) -> Cow<'a, str> {
        let off = self.ledger.note_offsets[self.row] as usize;
        let len = self.ledger.note_lens[self.row] as usize;
        if len == 0 {
            return Cow::Borrowed("");
        }
        String::from_utf8_lossy(&self.ledger.notes[off..off + len])
    }
}
