//! Taxonomy service
//!
//! Keeps a workspace's taxonomy in step with its entries: registering names,
//! refusing to remove names still in use, and renaming across both.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::ledger_file::Workspace;
use crate::error::{CashflowError, CashflowResult};
use crate::models::{LedgerEntry, Taxonomy};

/// Service for category and subcategory management
pub struct TaxonomyService<'a> {
    workspace: &'a mut Workspace,
}

impl<'a> TaxonomyService<'a> {
    pub fn new(workspace: &'a mut Workspace) -> Self {
        Self { workspace }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        self.workspace.taxonomy()
    }

    /// Register a category/subcategory pair
    ///
    /// Blank names are ignored. Returns whether anything was added.
    pub fn ensure(&mut self, category: &str, sub: &str) -> CashflowResult<bool> {
        let (category, sub) = (category.trim(), sub.trim());
        if category.is_empty() || sub.is_empty() {
            return Ok(false);
        }

        let taxonomy = self.workspace.taxonomy_mut();
        let known = taxonomy
            .find_category(category)
            .and_then(|id| taxonomy.find_sub(id, sub))
            .is_some();
        if known {
            return Ok(false);
        }
        taxonomy.get_or_insert_pair(category, sub)?;
        self.workspace.mark_dirty();
        Ok(true)
    }

    /// Whether any entry uses the category
    pub fn is_category_used(&self, category: &str) -> bool {
        let category = category.trim();
        !category.is_empty()
            && self
                .workspace
                .entries()
                .iter()
                .any(|e| e.category.trim() == category)
    }

    /// Whether any entry uses the subcategory under the category
    pub fn is_sub_used(&self, category: &str, sub: &str) -> bool {
        let (category, sub) = (category.trim(), sub.trim());
        !category.is_empty()
            && !sub.is_empty()
            && self
                .workspace
                .entries()
                .iter()
                .any(|e| e.category.trim() == category && e.sub_category.trim() == sub)
    }

    /// Taxonomy holding exactly the names entries use, sorted by name
    ///
    /// Entries with a blank category or subcategory contribute nothing.
    pub fn build_from_entries(entries: &[LedgerEntry]) -> CashflowResult<Taxonomy> {
        let mut names: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for entry in entries {
            let (category, sub) = (entry.category.trim(), entry.sub_category.trim());
            if category.is_empty() || sub.is_empty() {
                continue;
            }
            names.entry(category).or_default().insert(sub);
        }

        let (categories, subs): (Vec<String>, Vec<Vec<String>>) = names
            .into_iter()
            .map(|(c, s)| (c.to_string(), s.into_iter().map(str::to_string).collect()))
            .unzip();
        Taxonomy::from_parts(categories, subs)
    }

    /// Make the taxonomy cover every entry
    ///
    /// An empty taxonomy is rebuilt from the entries first; afterwards every
    /// entry's names are registered.
    pub fn cover_entries(&mut self) -> CashflowResult<()> {
        if self.workspace.taxonomy().is_empty() {
            let built = Self::build_from_entries(self.workspace.entries())?;
            debug!(
                categories = built.category_count(),
                "built taxonomy from entries"
            );
            *self.workspace.taxonomy_mut() = built;
        }

        let (entries, taxonomy) = self.workspace.parts_mut();
        for entry in entries.iter() {
            let (category, sub) = (entry.category.trim(), entry.sub_category.trim());
            if !category.is_empty() && !sub.is_empty() {
                taxonomy.get_or_insert_pair(category, sub)?;
            }
        }
        Ok(())
    }

    /// Remove a category that no entry uses
    pub fn remove_category(&mut self, category: &str) -> CashflowResult<()> {
        let category = category.trim();
        self.require_category(category)?;
        if self.is_category_used(category) {
            return Err(CashflowError::Validation(format!(
                "category '{}' is still used by entries",
                category
            )));
        }

        let (mut names, mut subs) = self.snapshot();
        if let Some(pos) = names.iter().position(|n| n == category) {
            names.remove(pos);
            subs.remove(pos);
        }
        self.replace(names, subs)
    }

    /// Remove a subcategory that no entry uses
    pub fn remove_sub(&mut self, category: &str, sub: &str) -> CashflowResult<()> {
        let (category, sub) = (category.trim(), sub.trim());
        let pos = self.require_sub(category, sub)?;
        if self.is_sub_used(category, sub) {
            return Err(CashflowError::Validation(format!(
                "subcategory '{}/{}' is still used by entries",
                category, sub
            )));
        }

        let (names, mut subs) = self.snapshot();
        subs[pos].retain(|s| s != sub);
        self.replace(names, subs)
    }

    /// Rename a category in the taxonomy and in every entry using it
    pub fn rename_category(&mut self, from: &str, to: &str) -> CashflowResult<usize> {
        let (from, to) = (from.trim(), to.trim());
        self.require_category(from)?;
        if to.is_empty() {
            return Err(CashflowError::Validation("new category name is blank".into()));
        }
        if from == to {
            return Ok(0);
        }

        let (mut names, subs) = self.snapshot();
        for name in names.iter_mut().filter(|n| n.as_str() == from) {
            *name = to.to_string();
        }
        self.replace(names, subs)?;

        let mut renamed = 0;
        for entry in self.workspace.entries_mut().iter_mut() {
            if entry.category.trim() == from {
                entry.category = to.to_string();
                renamed += 1;
            }
        }
        debug!(from, to, entries = renamed, "renamed category");
        Ok(renamed)
    }

    /// Rename a subcategory in the taxonomy and in every entry using it
    pub fn rename_sub(&mut self, category: &str, from: &str, to: &str) -> CashflowResult<usize> {
        let (category, from, to) = (category.trim(), from.trim(), to.trim());
        let pos = self.require_sub(category, from)?;
        if to.is_empty() {
            return Err(CashflowError::Validation(
                "new subcategory name is blank".into(),
            ));
        }
        if from == to {
            return Ok(0);
        }

        let (names, mut subs) = self.snapshot();
        for sub in subs[pos].iter_mut().filter(|s| s.as_str() == from) {
            *sub = to.to_string();
        }
        self.replace(names, subs)?;

        let mut renamed = 0;
        for entry in self.workspace.entries_mut().iter_mut() {
            if entry.category.trim() == category && entry.sub_category.trim() == from {
                entry.sub_category = to.to_string();
                renamed += 1;
            }
        }
        debug!(category, from, to, entries = renamed, "renamed subcategory");
        Ok(renamed)
    }

    fn require_category(&self, category: &str) -> CashflowResult<usize> {
        self.taxonomy()
            .find_category(category)
            .map(|id| id.index())
            .ok_or_else(|| CashflowError::category_not_found(category))
    }

    fn require_sub(&self, category: &str, sub: &str) -> CashflowResult<usize> {
        let pos = self.require_category(category)?;
        let id = self
            .taxonomy()
            .find_category(category)
            .and_then(|id| self.taxonomy().find_sub(id, sub));
        match id {
            Some(_) => Ok(pos),
            None => Err(CashflowError::subcategory_not_found(format!(
                "{}/{}",
                category, sub
            ))),
        }
    }

    fn snapshot(&self) -> (Vec<String>, Vec<Vec<String>>) {
        self.taxonomy()
            .iter()
            .map(|(name, subs)| (name.to_string(), subs.to_vec()))
            .unzip()
    }

    // Duplicates introduced by a rename are rejected here and nothing changes
    fn replace(&mut self, names: Vec<String>, subs: Vec<Vec<String>>) -> CashflowResult<()> {
        let rebuilt = Taxonomy::from_parts(names, subs)?;
        *self.workspace.taxonomy_mut() = rebuilt;
        self.workspace.mark_dirty();
        Ok(())
    }
}
