//! Ledger file service
//!
//! A [`Workspace`] is the editable, name-based form of one month's ledger. The
//! service converts between it and the columnar on-disk bundle: opening
//! resolves ids to names in timestamp order, saving re-derives ids from the
//! taxonomy and writes a fresh ledger atomically.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::taxonomy::TaxonomyService;
use crate::config::Settings;
use crate::error::{CashflowError, CashflowResult};
use crate::models::{FinalTransaction, LedgerEntry, Money, MonthlyLedger, Taxonomy};
use crate::storage::codec::{self, LedgerBundle};

/// One month of entries being edited, with the taxonomy they draw names from
#[derive(Debug, Clone)]
pub struct Workspace {
    year: i32,
    month: u32,
    entries: Vec<LedgerEntry>,
    taxonomy: Taxonomy,
    path: Option<PathBuf>,
    dirty: bool,
}

impl Workspace {
    /// Empty workspace for a month, not yet bound to a file
    pub fn new(year: i32, month: u32) -> CashflowResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(CashflowError::Validation(format!(
                "month must be 1..=12, got {}",
                month
            )));
        }
        Ok(Self {
            year,
            month,
            entries: Vec::new(),
            taxonomy: Taxonomy::new(),
            path: None,
            dirty: false,
        })
    }

    /// Start from an existing taxonomy, e.g. last month's
    pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// File the workspace was opened from or last saved to
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest entry timestamp, if any
    pub fn latest_timestamp(&self) -> Option<i64> {
        self.entries.iter().map(|e| e.timestamp_ms).max()
    }

    /// Net of all entry amounts
    pub fn net(&self) -> Money {
        self.entries.iter().map(|e| e.amount).sum()
    }

    /// Append one entry, registering its names in the taxonomy
    pub fn push_entry(&mut self, entry: LedgerEntry) -> CashflowResult<usize> {
        check_names(&entry, self.entries.len())?;
        self.taxonomy
            .get_or_insert_pair(entry.category.trim(), entry.sub_category.trim())?;
        self.entries.push(entry);
        self.dirty = true;
        Ok(self.entries.len() - 1)
    }

    /// Replace the entry at `row`
    pub fn update_entry(&mut self, row: usize, entry: LedgerEntry) -> CashflowResult<()> {
        if row >= self.entries.len() {
            return Err(CashflowError::row_not_found(row));
        }
        check_names(&entry, row)?;
        self.taxonomy
            .get_or_insert_pair(entry.category.trim(), entry.sub_category.trim())?;
        self.entries[row] = entry;
        self.dirty = true;
        Ok(())
    }

    /// Remove and return the entry at `row`
    pub fn remove_entry(&mut self, row: usize) -> CashflowResult<LedgerEntry> {
        if row >= self.entries.len() {
            return Err(CashflowError::row_not_found(row));
        }
        self.dirty = true;
        Ok(self.entries.remove(row))
    }

    /// Append classified transactions
    ///
    /// Every row is checked before any is added, so a blank category or
    /// subcategory leaves the workspace unchanged.
    pub fn append_finals(&mut self, finals: Vec<FinalTransaction>) -> CashflowResult<usize> {
        let base = self.entries.len();
        let entries: Vec<LedgerEntry> = finals.into_iter().map(LedgerEntry::from).collect();
        for (offset, entry) in entries.iter().enumerate() {
            check_names(entry, base + offset)?;
        }

        let added = entries.len();
        for entry in entries {
            self.taxonomy
                .get_or_insert_pair(entry.category.trim(), entry.sub_category.trim())?;
            self.entries.push(entry);
        }
        if added > 0 {
            self.dirty = true;
        }
        debug!(added, total = self.entries.len(), "appended transactions");
        Ok(added)
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<LedgerEntry> {
        &mut self.entries
    }

    pub(crate) fn taxonomy_mut(&mut self) -> &mut Taxonomy {
        &mut self.taxonomy
    }

    /// Split borrow used by edits that rewrite entries and taxonomy together
    pub(crate) fn parts_mut(&mut self) -> (&mut Vec<LedgerEntry>, &mut Taxonomy) {
        (&mut self.entries, &mut self.taxonomy)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

fn check_names(entry: &LedgerEntry, row: usize) -> CashflowResult<()> {
    if entry.category.trim().is_empty() {
        return Err(CashflowError::Validation(format!(
            "row {} has no category",
            row
        )));
    }
    if entry.sub_category.trim().is_empty() {
        return Err(CashflowError::Validation(format!(
            "row {} ({}) has no subcategory",
            row, entry.category
        )));
    }
    Ok(())
}

/// Opens and saves ledger files
pub struct LedgerFileService<'a> {
    settings: &'a Settings,
}

impl<'a> LedgerFileService<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Open a ledger file as a workspace
    ///
    /// Entries come out in ascending timestamp order and the bundled taxonomy
    /// is kept as-is, including categories no entry uses.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> CashflowResult<Workspace> {
        let path = path.as_ref();
        let LedgerBundle { ledger, taxonomy } = codec::load_from_path(path)?;

        let mut entries = Vec::with_capacity(ledger.len());
        for row in ledger.sorted_indices_by_timestamp_asc() {
            let view = ledger.get(row)?;
            let category = taxonomy.category_name(view.category_id())?;
            let sub = taxonomy.sub_name(view.category_id(), view.sub_category_id())?;
            entries.push(LedgerEntry::new(
                view.timestamp(),
                view.amount(),
                category,
                sub,
                view.note(),
            ));
        }

        info!(
            path = %path.display(),
            year = ledger.year(),
            month = ledger.month(),
            entries = entries.len(),
            "opened ledger"
        );
        Ok(Workspace {
            year: ledger.year(),
            month: ledger.month(),
            entries,
            taxonomy,
            path: Some(path.to_path_buf()),
            dirty: false,
        })
    }

    /// Columnar snapshot of a workspace
    ///
    /// Fills an empty taxonomy from the entries' names (sorted), registers any
    /// missing names and validates the result before building the ledger. With
    /// `enable_category_index` set the returned ledger carries an index.
    pub fn build_bundle(&self, workspace: &mut Workspace) -> CashflowResult<LedgerBundle> {
        TaxonomyService::new(workspace).cover_entries()?;
        workspace.taxonomy.validate_for_save()?;

        let rows = workspace.entries.len();
        let mut ledger = MonthlyLedger::with_capacity(
            workspace.year,
            workspace.month,
            self.settings.row_capacity_for(rows),
            self.settings.note_capacity_for(rows),
        )?;
        let mut taxonomy = workspace.taxonomy.clone();
        for entry in &workspace.entries {
            let (category, sub) =
                taxonomy.get_or_insert_pair(entry.category.trim(), entry.sub_category.trim())?;
            ledger.add(
                entry.timestamp_ms,
                entry.amount.minor(),
                category,
                sub,
                &entry.note,
            )?;
        }
        if self.settings.enable_category_index {
            ledger.enable_category_index(taxonomy.category_count())?;
        }
        Ok(LedgerBundle { ledger, taxonomy })
    }

    /// Save to the workspace's current file
    pub fn save(&self, workspace: &mut Workspace) -> CashflowResult<()> {
        let path = workspace.path.clone().ok_or_else(|| {
            CashflowError::Validation("choose a file before saving".into())
        })?;
        self.write(workspace, &path)
    }

    /// Save to `path` and make it the workspace's current file
    pub fn save_as<P: AsRef<Path>>(&self, workspace: &mut Workspace, path: P) -> CashflowResult<()> {
        let path = path.as_ref().to_path_buf();
        self.write(workspace, &path)?;
        workspace.path = Some(path);
        Ok(())
    }

    fn write(&self, workspace: &mut Workspace, path: &Path) -> CashflowResult<()> {
        let bundle = self.build_bundle(workspace)?;
        codec::save_to_path(path, &bundle.ledger, &bundle.taxonomy)?;
        workspace.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::ControlFlow;
    use tempfile::TempDir;

    const T0: i64 = 1_735_689_600_000;

    fn entry(ts: i64, minor: i64, cat: &str, sub: &str, note: &str) -> LedgerEntry {
        LedgerEntry::new(ts, Money::from_minor(minor), cat, sub, note)
    }

    fn final_txn(ts: i64, cat: &str, sub: &str) -> FinalTransaction {
        FinalTransaction {
            timestamp_ms: ts,
            amount: Money::from_minor(-100),
            category: cat.into(),
            sub_category: sub.into(),
            note: String::new(),
        }
    }

    #[test]
    fn test_new_workspace_validates_month() {
        assert!(Workspace::new(2025, 0).unwrap_err().is_validation());
        let ws = Workspace::new(2025, 12).unwrap();
        assert!(ws.is_empty());
        assert!(!ws.is_dirty());
        assert!(ws.path().is_none());
    }

    #[test]
    fn test_save_as_then_open_sorts_by_time() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("2025-01.mld");
        let settings = Settings::default();
        let service = LedgerFileService::new(&settings);

        let mut ws = Workspace::new(2025, 1).unwrap();
        ws.push_entry(entry(T0 + 2000, 150_000, "Salary", "FixedIncome", "pay"))
            .unwrap();
        ws.push_entry(entry(T0, -2500, "Food", "Meal", "lunch")).unwrap();
        ws.push_entry(entry(T0 + 1000, -1200, "Drinks", "Coffee", "americano"))
            .unwrap();
        assert!(ws.is_dirty());

        service.save_as(&mut ws, &path).unwrap();
        assert!(!ws.is_dirty());
        assert_eq!(ws.path(), Some(path.as_path()));

        let opened = service.open(&path).unwrap();
        let notes: Vec<_> = opened.entries().iter().map(|e| e.note.as_str()).collect();
        assert_eq!(notes, vec!["lunch", "americano", "pay"]);
        assert_eq!(opened.net().minor(), 146_300);
        assert_eq!(opened.taxonomy(), ws.taxonomy());
        assert!(!opened.is_dirty());
    }

    #[test]
    fn test_save_without_path_fails() {
        let settings = Settings::default();
        let mut ws = Workspace::new(2025, 1).unwrap();
        ws.push_entry(entry(T0, -1, "Food", "Meal", "")).unwrap();

        let err = LedgerFileService::new(&settings).save(&mut ws).unwrap_err();
        assert!(err.is_validation());
        assert!(ws.is_dirty());
    }

    #[test]
    fn test_empty_taxonomy_is_built_sorted() {
        let settings = Settings::default();
        let mut ws = Workspace::new(2025, 1).unwrap();
        ws.entries_mut().extend([
            entry(T0, -1, "Zoo", "Ticket", ""),
            entry(T0, -1, "Food", "Snack", ""),
            entry(T0, -1, "Food", "Meal", ""),
        ]);

        let bundle = LedgerFileService::new(&settings).build_bundle(&mut ws).unwrap();
        assert_eq!(bundle.taxonomy.categories(), vec!["Food", "Zoo"]);
        assert_eq!(
            bundle.taxonomy.subcategories_of_name("Food"),
            vec!["Meal", "Snack"]
        );
        assert_eq!(bundle.ledger.len(), 3);
        assert_eq!(bundle.ledger.get(0).unwrap().category_id().get(), 1);
    }

    #[test]
    fn test_save_rejects_taxonomy_hole() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.mld");
        let settings = Settings::default();
        let mut ws = Workspace::new(2025, 1).unwrap();
        ws.push_entry(entry(T0, -1, "Food", "Meal", "")).unwrap();
        ws.taxonomy_mut().get_or_insert_category("Empty");

        let err = LedgerFileService::new(&settings)
            .save_as(&mut ws, &path)
            .unwrap_err();
        assert!(matches!(err, CashflowError::Taxonomy(_)));
        assert!(!path.exists());
        assert!(ws.path().is_none());
    }

    #[test]
    fn test_append_finals_rejects_blank_names() {
        let mut ws = Workspace::new(2025, 1).unwrap();
        let err = ws
            .append_finals(vec![final_txn(T0, "Food", "Meal"), final_txn(T0, " ", "Meal")])
            .unwrap_err();
        assert!(err.is_validation());
        assert!(ws.is_empty());
        assert!(ws.taxonomy().is_empty());

        let added = ws
            .append_finals(vec![final_txn(T0, "Food", "Meal"), final_txn(T0, "Food", "Snack")])
            .unwrap();
        assert_eq!(added, 2);
        assert!(ws.is_dirty());
        assert_eq!(ws.taxonomy().subcategories_of_name("Food"), vec!["Meal", "Snack"]);
    }

    #[test]
    fn test_update_and_remove_entries() {
        let mut ws = Workspace::new(2025, 1).unwrap();
        ws.push_entry(entry(T0, -1, "Food", "Meal", "a")).unwrap();
        ws.update_entry(0, entry(T0, -2, "Drinks", "Tea", "b")).unwrap();
        assert_eq!(ws.entries()[0].category, "Drinks");
        assert!(ws.taxonomy().find_category("Drinks").is_some());

        assert!(ws.update_entry(5, entry(T0, 0, "x", "y", "")).unwrap_err().is_not_found());
        assert_eq!(ws.remove_entry(0).unwrap().note, "b");
        assert!(ws.remove_entry(0).unwrap_err().is_not_found());
        assert_eq!(ws.latest_timestamp(), None);
    }

    #[test]
    fn test_bundle_with_category_index() {
        let settings = Settings {
            enable_category_index: true,
            ..Settings::default()
        };
        let mut ws = Workspace::new(2025, 1).unwrap();
        for (i, cat) in ["Food", "Drinks", "Food"].iter().enumerate() {
            ws.push_entry(entry(T0 + i as i64, -1, cat, "x", "")).unwrap();
        }

        let bundle = LedgerFileService::new(&settings).build_bundle(&mut ws).unwrap();
        assert!(bundle.ledger.category_index_enabled());

        let food = bundle.taxonomy.find_category("Food").unwrap();
        let mut rows = Vec::new();
        bundle.ledger.for_each_by_category(food, |v| {
            rows.push(v.row());
            ControlFlow::Continue(())
        });
        assert_eq!(rows, vec![2, 0]);

        let plain = Settings::default();
        let bundle = LedgerFileService::new(&plain).build_bundle(&mut ws).unwrap();
        assert!(!bundle.ledger.category_index_enabled());
    }
}
