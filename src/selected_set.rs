//! The user's committed column specs
//!
//! Insertion order is column order. No two specs share a `(selector, kind)`
//! pair; specs are immutable and edited only by validate-then-replace.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::SelectionError;
use crate::extractors::{
    count, extract_table, ColumnSpec, ExtractionReport, SelectorKind, SelectorSpec, SpecId,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedSet {
    specs: Vec<SelectorSpec>,
    next_id: u64,
}

impl SelectedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `column` against the document and append it.
    pub fn add(&mut self, document: &Document, column: ColumnSpec) -> Result<SpecId, SelectionError> {
        let spec = self.admit(document, column, None)?;
        let id = spec.id;
        self.specs.push(spec);
        Ok(id)
    }

    /// Validate `column` and swap it in for `id`, keeping position and id.
    /// On error the set is unchanged.
    pub fn replace(
        &mut self,
        document: &Document,
        id: SpecId,
        column: ColumnSpec,
    ) -> Result<(), SelectionError> {
        let index = self.position(id).ok_or(SelectionError::UnknownSpec(id.0))?;
        let spec = self.admit(document, column, Some(id))?;
        self.specs[index] = spec;
        Ok(())
    }

    pub fn remove(&mut self, id: SpecId) -> Result<SelectorSpec, SelectionError> {
        let index = self.position(id).ok_or(SelectionError::UnknownSpec(id.0))?;
        Ok(self.specs.remove(index))
    }

    pub fn clear(&mut self) {
        self.specs.clear();
    }

    pub fn get(&self, id: SpecId) -> Option<&SelectorSpec> {
        self.specs.iter().find(|spec| spec.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectorSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn contains(&self, selector: &str, kind: SelectorKind) -> bool {
        self.specs
            .iter()
            .any(|spec| spec.column.selector == selector && spec.column.kind == kind)
    }

    /// Distinct column names in column order
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for spec in &self.specs {
            if !names.contains(&spec.column.column_name) {
                names.push(spec.column.column_name.clone());
            }
        }
        names
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.specs.iter().map(|spec| &spec.column)
    }

    /// Run the extraction engine over every spec. Specs whose match count no
    /// longer equals the count seen when they were added are logged, not
    /// re-validated.
    pub fn extract(&self, document: &Document) -> ExtractionReport {
        let report = extract_table(document, self.columns());
        for (spec, now) in self.specs.iter().zip(&report.match_counts) {
            if *now != spec.match_count_at_creation {
                warn!(
                    "Selector '{}' for column '{}' now matches {} elements (was {})",
                    spec.column.selector, spec.column.column_name, now, spec.match_count_at_creation
                );
            }
        }
        report
    }

    fn position(&self, id: SpecId) -> Option<usize> {
        self.specs.iter().position(|spec| spec.id == id)
    }

    fn admit(
        &mut self,
        document: &Document,
        mut column: ColumnSpec,
        replacing: Option<SpecId>,
    ) -> Result<SelectorSpec, SelectionError> {
        let matches = count(document, &column.selector, column.kind)?;
        if matches == 0 {
            return Err(SelectionError::NoMatch {
                selector: column.selector,
            });
        }

        let duplicate = self.specs.iter().any(|spec| {
            Some(spec.id) != replacing
                && spec.column.selector == column.selector
                && spec.column.kind == column.kind
        });
        if duplicate {
            return Err(SelectionError::Duplicate {
                selector: column.selector,
                kind: column.kind,
            });
        }

        if column.column_name.trim().is_empty() {
            let position = match replacing.and_then(|id| self.position(id)) {
                Some(index) => index + 1,
                None => self.specs.len() + 1,
            };
            column.column_name = format!("Column {}", position);
        }

        let shared = self
            .specs
            .iter()
            .any(|spec| Some(spec.id) != replacing && spec.column.column_name == column.column_name);
        if shared {
            warn!(
                "Column name '{}' is already in use; later selectors overwrite earlier ones in each row",
                column.column_name
            );
        }

        let id = match replacing {
            Some(id) => id,
            None => {
                let id = SpecId(self.next_id);
                self.next_id += 1;
                id
            }
        };
        debug!(
            "Admitted {} selector '{}' as column '{}' ({} matches)",
            column.kind, column.selector, column.column_name, matches
        );

        Ok(SelectorSpec {
            id,
            column,
            match_count_at_creation: matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::ScalarValue;

    const PAGE: &str = r#"
        <ul>
            <li><a href="/a">A</a><span class="qty">1</span></li>
            <li><a href="/b">B</a><span class="qty">2</span></li>
        </ul>
    "#;

    #[test]
    fn test_add_assigns_ids_and_default_names() {
        let doc = Document::parse(PAGE);
        let mut set = SelectedSet::new();
        let first = set.add(&doc, ColumnSpec::css("a", "")).unwrap();
        let second = set.add(&doc, ColumnSpec::css(".qty", "qty")).unwrap();

        assert_ne!(first, second);
        assert_eq!(set.column_names(), vec!["Column 1", "qty"]);
        assert_eq!(set.get(first).unwrap().match_count_at_creation, 2);
    }

    #[test]
    fn test_add_rejects_invalid_empty_and_duplicate() {
        let doc = Document::parse(PAGE);
        let mut set = SelectedSet::new();

        let err = set.add(&doc, ColumnSpec::css("###bad", "x")).unwrap_err();
        assert!(matches!(err, SelectionError::Invalid(_)));

        let err = set.add(&doc, ColumnSpec::css("table", "x")).unwrap_err();
        assert!(matches!(err, SelectionError::NoMatch { .. }));

        set.add(&doc, ColumnSpec::css("a", "link")).unwrap();
        let err = set.add(&doc, ColumnSpec::css("a", "again")).unwrap_err();
        assert!(matches!(err, SelectionError::Duplicate { .. }));

        // same elements, different dialect
        set.add(&doc, ColumnSpec::path("//a", "path link")).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_replace_keeps_position_and_id() {
        let doc = Document::parse(PAGE);
        let mut set = SelectedSet::new();
        let a = set.add(&doc, ColumnSpec::css("a", "link")).unwrap();
        set.add(&doc, ColumnSpec::css(".qty", "qty")).unwrap();

        set.replace(&doc, a, ColumnSpec::path("//li/a", "link")).unwrap();
        let first = set.iter().next().unwrap();
        assert_eq!(first.id, a);
        assert_eq!(first.column.kind, SelectorKind::Path);

        // replacing with itself is not a duplicate
        set.replace(&doc, a, ColumnSpec::path("//li/a", "href")).unwrap();
        assert_eq!(set.column_names(), vec!["href", "qty"]);
    }

    #[test]
    fn test_failed_replace_leaves_set_unchanged() {
        let doc = Document::parse(PAGE);
        let mut set = SelectedSet::new();
        let a = set.add(&doc, ColumnSpec::css("a", "link")).unwrap();
        let before = set.clone();

        assert!(set.replace(&doc, a, ColumnSpec::css("table", "x")).is_err());
        assert!(matches!(
            set.replace(&doc, SpecId(99), ColumnSpec::css("a", "x")),
            Err(SelectionError::UnknownSpec(99))
        ));
        assert_eq!(set, before);
    }

    #[test]
    fn test_remove_and_clear() {
        let doc = Document::parse(PAGE);
        let mut set = SelectedSet::new();
        let a = set.add(&doc, ColumnSpec::css("a", "link")).unwrap();
        set.add(&doc, ColumnSpec::css(".qty", "qty")).unwrap();

        assert_eq!(set.remove(a).unwrap().column.column_name, "link");
        assert!(set.remove(a).is_err());
        assert_eq!(set.len(), 1);

        set.clear();
        assert!(set.is_empty());
        // ids are never reused
        let b = set.add(&doc, ColumnSpec::css("a", "link")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_extract_tolerates_drift() {
        let mut doc = Document::parse(PAGE);
        let mut set = SelectedSet::new();
        set.add(&doc, ColumnSpec::css("a", "link")).unwrap();
        set.add(&doc, ColumnSpec::css(".qty", "qty")).unwrap();

        let ul = crate::extractors::evaluate(&doc, "ul", SelectorKind::Css).unwrap()[0];
        doc.append_html(ul, r#"<li><a href="/c">C</a></li>"#);

        let report = set.extract(&doc);
        assert_eq!(report.match_counts, vec![3, 2]);
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[2].get("link"), Some(&ScalarValue::from("/c")));
        assert!(!report.rows[2].contains("qty"));
    }

    #[test]
    fn test_serde_round_trip_keeps_id_counter() {
        let doc = Document::parse(PAGE);
        let mut set = SelectedSet::new();
        set.add(&doc, ColumnSpec::css("a", "link")).unwrap();

        let json = serde_json::to_string(&set).unwrap();
        let mut restored: SelectedSet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, set);
        let next = restored.add(&doc, ColumnSpec::css(".qty", "qty")).unwrap();
        assert_eq!(next, SpecId(1));
    }
}
