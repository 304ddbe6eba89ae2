//! Tabular extraction: N selectors → row-aligned records
//!
//! Row `i` holds the value of the `i`-th match of every selector that has one.
//! Selectors are not joined structurally, so rows only line up when every
//! selector matches the same repeating structure.

use serde::Serialize;
use tracing::{debug, warn};

use super::{evaluate, extract_value, ColumnSpec, Dataset, Row, SelectorKind};
use crate::document::Document;

/// A column spec whose selector failed to evaluate during extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecFailure {
    pub column_name: String,
    pub selector: String,
    pub kind: SelectorKind,
    pub error: String,
}

/// Everything one extraction pass learned about the document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionReport {
    pub rows: Dataset,
    /// Distinct column names in spec order
    pub columns: Vec<String>,
    /// Match count per spec, in spec order (0 for failed specs)
    pub match_counts: Vec<usize>,
    pub failures: Vec<SpecFailure>,
}

impl ExtractionReport {
    /// Length of the longest match list, the upper bound on `rows.len()`
    pub fn max_rows(&self) -> usize {
        self.match_counts.iter().copied().max().unwrap_or(0)
    }
}

/// Extract rows for `specs` and report match counts and failures
pub fn extract_table<'a>(
    document: &Document,
    specs: impl IntoIterator<Item = &'a ColumnSpec>,
) -> ExtractionReport {
    let mut report = ExtractionReport::default();
    let mut matches = Vec::new();

    for spec in specs {
        if !report.columns.contains(&spec.column_name) {
            report.columns.push(spec.column_name.clone());
        }

        let nodes = match evaluate(document, &spec.selector, spec.kind) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(
                    "Selector for column '{}' failed, treating as empty: {}",
                    spec.column_name, e
                );
                report.failures.push(SpecFailure {
                    column_name: spec.column_name.clone(),
                    selector: spec.selector.clone(),
                    kind: spec.kind,
                    error: e.to_string(),
                });
                Vec::new()
            }
        };

        report.match_counts.push(nodes.len());
        matches.push((spec, nodes));
    }

    let max_rows = report.max_rows();
    let mut dropped = 0;

    for index in 0..max_rows {
        let mut row = Row::new();
        for (spec, nodes) in &matches {
            // later specs sharing a column name overwrite earlier ones
            if let Some(element) = nodes.get(index).and_then(|id| document.element(*id)) {
                row.insert(&spec.column_name, extract_value(document, element));
            }
        }

        if row.has_content() {
            report.rows.push(row);
        } else {
            dropped += 1;
        }
    }

    debug!(
        "Extracted {} rows from {} specs ({} blank rows dropped)",
        report.rows.len(),
        matches.len(),
        dropped
    );
    report
}

/// Rows only; see [`extract_table`]
pub fn extract<'a>(document: &Document, specs: impl IntoIterator<Item = &'a ColumnSpec>) -> Dataset {
    extract_table(document, specs).rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::ScalarValue;

    const PRODUCTS: &str = r#"
        <html>
        <body>
            <div class="product">
                <h3 class="name">Widget</h3>
                <span class="price">9.99</span>
                <a class="more" href="/p/widget">details</a>
            </div>
            <div class="product">
                <h3 class="name">Gadget</h3>
                <span class="price">19.50</span>
                <a class="more" href="/p/gadget">details</a>
            </div>
            <div class="product">
                <h3 class="name">Gizmo</h3>
                <span class="price"></span>
            </div>
        </body>
        </html>
    "#;

    #[test]
    fn test_links_scenario() {
        let doc = Document::parse(r#"<a href="/p1">One</a><a href="/p2">Two</a>"#);
        let specs = vec![ColumnSpec::css("a", "link")];
        let rows = extract(&doc, &specs);
        assert_eq!(
            rows,
            vec![
                Row::from([("link", "/p1".into())]),
                Row::from([("link", "/p2".into())]),
            ]
        );
    }

    #[test]
    fn test_rows_are_aligned_by_index() {
        let doc = Document::parse(PRODUCTS);
        let specs = vec![
            ColumnSpec::css(".name", "name"),
            ColumnSpec::css(".price", "price"),
            ColumnSpec::path("//a[@class='more']", "url"),
        ];
        let report = extract_table(&doc, &specs);

        assert_eq!(report.match_counts, vec![3, 3, 2]);
        assert_eq!(report.columns, vec!["name", "price", "url"]);
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[1].get("price"), Some(&ScalarValue::from("19.50")));
        assert_eq!(report.rows[1].get("url"), Some(&ScalarValue::from("/p/gadget")));
        // third product has no link, so the column is absent rather than empty
        assert!(!report.rows[2].contains("url"));
        assert_eq!(report.rows[2].get("price"), Some(&ScalarValue::from("")));
    }

    #[test]
    fn test_zero_match_column_is_absent() {
        let doc = Document::parse(PRODUCTS);
        let specs = vec![
            ColumnSpec::css("table td", "missing"),
            ColumnSpec::css(".name", "name"),
        ];
        let report = extract_table(&doc, &specs);
        assert!(report.rows.len() <= 3);
        assert!(report.rows.iter().all(|row| !row.contains("missing")));
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_blank_rows_are_dropped() {
        let doc = Document::parse(
            r#"<ul><li>a</li><li>   </li><li><script>x()</script></li><li>d</li></ul>"#,
        );
        let specs = vec![ColumnSpec::css("li", "item")];
        let report = extract_table(&doc, &specs);
        assert_eq!(report.max_rows(), 4);
        assert_eq!(report.rows.len(), 2);
        assert!(report.rows.iter().all(Row::has_content));
    }

    #[test]
    fn test_unchecked_boxes_do_not_keep_rows() {
        let doc = Document::parse(
            r#"<input type="checkbox" checked><input type="checkbox"><input type="checkbox">"#,
        );
        let specs = vec![ColumnSpec::css("input", "done")];
        let rows = extract(&doc, &specs);
        assert_eq!(rows, vec![Row::from([("done", true.into())])]);
    }

    #[test]
    fn test_invalid_selector_degrades_to_empty() {
        let doc = Document::parse(PRODUCTS);
        let specs = vec![
            ColumnSpec::css("###bad", "broken"),
            ColumnSpec::css(".name", "name"),
        ];
        let report = extract_table(&doc, &specs);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].column_name, "broken");
        assert_eq!(report.match_counts, vec![0, 3]);
        assert_eq!(report.rows.len(), 3);
    }

    #[test]
    fn test_shared_column_name_later_spec_wins() {
        let doc = Document::parse(PRODUCTS);
        let specs = vec![
            ColumnSpec::css(".name", "value"),
            ColumnSpec::css(".price", "value"),
        ];
        let report = extract_table(&doc, &specs);
        assert_eq!(report.columns, vec!["value"]);
        assert_eq!(report.rows[0].get("value"), Some(&ScalarValue::from("9.99")));
        assert_eq!(report.rows[0].len(), 1);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let doc = Document::parse(PRODUCTS);
        let specs = vec![ColumnSpec::css(".name", "name"), ColumnSpec::css(".price", "price")];
        assert_eq!(extract(&doc, &specs), extract(&doc, &specs));
    }

    #[test]
    fn test_no_specs_no_rows() {
        let doc = Document::parse(PRODUCTS);
        let report = extract_table(&doc, &Vec::<ColumnSpec>::new());
        assert_eq!(report.max_rows(), 0);
        assert!(report.rows.is_empty());
    }
}
