//! Two-level category taxonomy
//!
//! An ordered list of category names, each owning an ordered list of
//! subcategory names. Ids are positions, so they are only meaningful together
//! with the taxonomy snapshot that produced them.
//!
//! Lookups come in two flavours: `find_*` never changes the taxonomy, while
//! `get_or_insert_*` registers a missing name and returns its new id.

use serde::{Deserialize, Serialize};

use super::ids::{CategoryId, SubCategoryId};
use crate::error::{CashflowError, CashflowResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CategoryNode {
    name: String,
    subs: Vec<String>,
}

/// Category -> subcategory name registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    categories: Vec<CategoryNode>,
}

impl Taxonomy {
    /// Create an empty taxonomy
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a taxonomy from parallel category and subcategory lists
    ///
    /// Fails when the lists differ in length or contain duplicate names.
    pub fn from_parts(categories: Vec<String>, subs: Vec<Vec<String>>) -> CashflowResult<Self> {
        if categories.len() != subs.len() {
            return Err(CashflowError::Taxonomy(format!(
                "{} categories but {} subcategory lists",
                categories.len(),
                subs.len()
            )));
        }

        let mut taxonomy = Self::new();
        for (name, sub_names) in categories.into_iter().zip(subs) {
            if taxonomy.find_category(&name).is_some() {
                return Err(CashflowError::Taxonomy(format!(
                    "duplicate category '{}'",
                    name
                )));
            }
            let mut node = CategoryNode {
                name,
                subs: Vec::with_capacity(sub_names.len()),
            };
            for sub in sub_names {
                if node.subs.contains(&sub) {
                    return Err(CashflowError::Taxonomy(format!(
                        "duplicate subcategory '{}' in category '{}'",
                        sub, node.name
                    )));
                }
                node.subs.push(sub);
            }
            taxonomy.categories.push(node);
        }

        Ok(taxonomy)
    }

    /// Build a taxonomy from `(category, [subcategories])` pairs
    pub fn from_pairs<C, S, I>(pairs: I) -> CashflowResult<Self>
    where
        C: Into<String>,
        S: Into<String>,
        I: IntoIterator<Item = (C, Vec<S>)>,
    {
        let (categories, subs): (Vec<String>, Vec<Vec<String>>) = pairs
            .into_iter()
            .map(|(c, s)| (c.into(), s.into_iter().map(Into::into).collect()))
            .unzip();
        Self::from_parts(categories, subs)
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Number of subcategories under a category
    pub fn sub_count(&self, category: CategoryId) -> CashflowResult<usize> {
        Ok(self.node(category)?.subs.len())
    }

    pub fn category_name(&self, category: CategoryId) -> CashflowResult<&str> {
        Ok(&self.node(category)?.name)
    }

    pub fn sub_name(&self, category: CategoryId, sub: SubCategoryId) -> CashflowResult<&str> {
        let node = self.node(category)?;
        node.subs
            .get(sub.index())
            .map(String::as_str)
            .ok_or_else(|| CashflowError::subcategory_not_found(format!("{}/{}", node.name, sub)))
    }

    /// Ordered snapshot of category names
    pub fn categories(&self) -> Vec<&str> {
        self.categories.iter().map(|n| n.name.as_str()).collect()
    }

    /// Ordered snapshot of the subcategories of a category
    pub fn subcategories_of(&self, category: CategoryId) -> CashflowResult<Vec<&str>> {
        Ok(self.node(category)?.subs.iter().map(String::as_str).collect())
    }

    /// Subcategories of a category looked up by name; unknown names yield nothing
    pub fn subcategories_of_name(&self, category: &str) -> Vec<&str> {
        self.find_category(category)
            .and_then(|id| self.subcategories_of(id).ok())
            .unwrap_or_default()
    }

    /// Id of an existing category, without registering anything
    pub fn find_category(&self, name: &str) -> Option<CategoryId> {
        self.categories
            .iter()
            .position(|n| n.name == name)
            .and_then(CategoryId::from_index)
    }

    /// Id of an existing subcategory, without registering anything
    pub fn find_sub(&self, category: CategoryId, name: &str) -> Option<SubCategoryId> {
        self.categories
            .get(category.index())?
            .subs
            .iter()
            .position(|s| s == name)
            .and_then(SubCategoryId::from_index)
    }

    /// Id of a category, registering it (with no subcategories) when missing
    pub fn get_or_insert_category(&mut self, name: &str) -> CategoryId {
        if let Some(id) = self.find_category(name) {
            return id;
        }
        self.categories.push(CategoryNode {
            name: name.to_string(),
            subs: Vec::new(),
        });
        CategoryId::new((self.categories.len() - 1) as u32)
    }

    /// Id of a subcategory, registering it under `category` when missing
    pub fn get_or_insert_sub(
        &mut self,
        category: CategoryId,
        name: &str,
    ) -> CashflowResult<SubCategoryId> {
        if let Some(id) = self.find_sub(category, name) {
            return Ok(id);
        }
        let node = self.node_mut(category)?;
        node.subs.push(name.to_string());
        Ok(SubCategoryId::new((node.subs.len() - 1) as u32))
    }

    /// Register a `(category, subcategory)` pair and return both ids
    pub fn get_or_insert_pair(
        &mut self,
        category: &str,
        sub: &str,
    ) -> CashflowResult<(CategoryId, SubCategoryId)> {
        let cat_id = self.get_or_insert_category(category);
        let sub_id = self.get_or_insert_sub(cat_id, sub)?;
        Ok((cat_id, sub_id))
    }

    /// Check the invariant a saved ledger depends on
    ///
    /// At least one category must exist and every category needs at least one
    /// subcategory.
    pub fn validate_for_save(&self) -> CashflowResult<()> {
        if self.categories.is_empty() {
            return Err(CashflowError::Taxonomy(
                "at least one category is required".into(),
            ));
        }
        if let Some(node) = self.categories.iter().find(|n| n.subs.is_empty()) {
            return Err(CashflowError::Taxonomy(format!(
                "category '{}' needs at least one subcategory",
                node.name
            )));
        }
        Ok(())
    }

    /// Iterate `(category name, subcategory names)` in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.categories
            .iter()
            .map(|n| (n.name.as_str(), n.subs.as_slice()))
    }

    fn node(&self, category: CategoryId) -> CashflowResult<&CategoryNode> {
        self.categories
            .get(category.index())
            .ok_or_else(|| CashflowError::category_not_found(category.to_string()))
    }

    fn node_mut(&mut self, category: CategoryId) -> CashflowResult<&mut CategoryNode> {
        self.categories
            .get_mut(category.index())
            .ok_or_else(|| CashflowError::category_not_found(category.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Taxonomy {
        Taxonomy::from_pairs([
            ("Food", vec!["Meal", "Snack"]),
            ("Drinks", vec!["Coffee", "MilkTea", "Cola"]),
            ("Salary", vec!["FixedIncome"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_parts_rejects_mismatched_lengths() {
        let err = Taxonomy::from_parts(vec!["Food".into()], vec![]).unwrap_err();
        assert!(matches!(err, CashflowError::Taxonomy(_)));
    }

    #[test]
    fn test_from_parts_rejects_duplicates() {
        let err = Taxonomy::from_pairs([("Food", vec!["Meal"]), ("Food", vec!["Snack"])])
            .unwrap_err();
        assert!(matches!(err, CashflowError::Taxonomy(_)));

        let err = Taxonomy::from_pairs([("Food", vec!["Meal", "Meal"])]).unwrap_err();
        assert!(matches!(err, CashflowError::Taxonomy(_)));
    }

    #[test]
    fn test_find_does_not_mutate() {
        let taxonomy = sample();
        assert_eq!(taxonomy.find_category("Drinks"), Some(CategoryId::new(1)));
        assert_eq!(taxonomy.find_category("Rent"), None);
        assert_eq!(
            taxonomy.find_sub(CategoryId::new(1), "Cola"),
            Some(SubCategoryId::new(2))
        );
        assert_eq!(taxonomy.find_sub(CategoryId::new(9), "Cola"), None);
        assert_eq!(taxonomy.category_count(), 3);
    }

    #[test]
    fn test_get_or_insert_is_idempotent() {
        let mut taxonomy = sample();

        let first = taxonomy.get_or_insert_category("Rent");
        let second = taxonomy.get_or_insert_category("Rent");
        assert_eq!(first, second);
        assert_eq!(first, CategoryId::new(3));
        assert_eq!(taxonomy.category_count(), 4);

        let a = taxonomy.get_or_insert_sub(first, "Monthly").unwrap();
        let b = taxonomy.get_or_insert_sub(first, "Monthly").unwrap();
        assert_eq!(a, b);
        assert_eq!(taxonomy.sub_count(first).unwrap(), 1);

        assert_eq!(
            taxonomy.get_or_insert_category("Food"),
            CategoryId::new(0)
        );
    }

    #[test]
    fn test_get_or_insert_sub_unknown_category() {
        let mut taxonomy = sample();
        let err = taxonomy
            .get_or_insert_sub(CategoryId::new(42), "x")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_names_and_snapshots() {
        let taxonomy = sample();
        assert_eq!(taxonomy.categories(), vec!["Food", "Drinks", "Salary"]);
        assert_eq!(
            taxonomy.subcategories_of(CategoryId::new(1)).unwrap(),
            vec!["Coffee", "MilkTea", "Cola"]
        );
        assert_eq!(taxonomy.subcategories_of_name("Salary"), vec!["FixedIncome"]);
        assert!(taxonomy.subcategories_of_name("Nope").is_empty());
        assert_eq!(taxonomy.category_count(), 3);
        assert_eq!(
            taxonomy
                .sub_name(CategoryId::new(0), SubCategoryId::new(1))
                .unwrap(),
            "Snack"
        );
        assert!(taxonomy
            .sub_name(CategoryId::new(0), SubCategoryId::new(5))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_validate_for_save() {
        assert!(Taxonomy::new().validate_for_save().is_err());
        assert!(sample().validate_for_save().is_ok());

        let mut taxonomy = sample();
        taxonomy.get_or_insert_category("Empty");
        let err = taxonomy.validate_for_save().unwrap_err();
        assert!(err.to_string().contains("Empty"));
    }

    proptest! {
        #[test]
        fn prop_get_or_insert_is_idempotent(
            pairs in prop::collection::vec(("[a-d]", "[x-z]"), 1..40)
        ) {
            let mut taxonomy = Taxonomy::new();
            let first: Vec<_> = pairs
                .iter()
                .map(|(c, s)| taxonomy.get_or_insert_pair(c, s).unwrap())
                .collect();
            let snapshot = taxonomy.clone();
            let second: Vec<_> = pairs
                .iter()
                .map(|(c, s)| taxonomy.get_or_insert_pair(c, s).unwrap())
                .collect();

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(&taxonomy, &snapshot);
            for ((c, s), (cat_id, sub_id)) in pairs.iter().zip(&second) {
                prop_assert_eq!(taxonomy.category_name(*cat_id).unwrap(), c.as_str());
                prop_assert_eq!(taxonomy.sub_name(*cat_id, *sub_id).unwrap(), s.as_str());
            }
        }
    }
}
