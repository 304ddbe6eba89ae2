//! Selector synthesis, evaluation and tabular extraction
//!
//! Leaf-first: `value_extractor` turns one element into a scalar,
//! `synthesizer` derives selectors for an element, `evaluator` (with
//! `path_expr`) resolves selectors to node snapshots, and `table` zips the
//! per-selector matches into rows.

mod evaluator;
mod path_expr;
mod synthesizer;
mod table;
mod value_extractor;

pub use evaluator::*;
pub use path_expr::PathExpr;
pub use synthesizer::*;
pub use table::*;
pub use value_extractor::*;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Selector dialect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorKind {
    #[default]
    #[serde(rename = "css", alias = "CSS")]
    Css,
    /// XPath-style path expression
    #[serde(rename = "xpath", alias = "path", alias = "PATH", alias = "XPATH")]
    Path,
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorKind::Css => f.write_str("css"),
            SelectorKind::Path => f.write_str("xpath"),
        }
    }
}

/// One data column: which nodes to match and what to call the column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub selector: String,
    #[serde(default, alias = "type")]
    pub kind: SelectorKind,
    #[serde(default, alias = "name")]
    pub column_name: String,
}

impl ColumnSpec {
    pub fn css(selector: &str, column_name: &str) -> Self {
        Self {
            selector: selector.to_string(),
            kind: SelectorKind::Css,
            column_name: column_name.to_string(),
        }
    }

    pub fn path(selector: &str, column_name: &str) -> Self {
        Self {
            selector: selector.to_string(),
            kind: SelectorKind::Path,
            column_name: column_name.to_string(),
        }
    }
}

/// Opaque creation-order identifier of a selector spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecId(pub u64);

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A column spec that has been test-matched and admitted to the selected set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSpec {
    pub id: SpecId,
    #[serde(flatten)]
    pub column: ColumnSpec,
    pub match_count_at_creation: usize,
}

/// Value of one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Flag(bool),
    Text(String),
}

impl ScalarValue {
    /// Blank cells do not keep a row alive: `false` and whitespace-only text
    pub fn is_blank(&self) -> bool {
        match self {
            ScalarValue::Flag(flag) => !flag,
            ScalarValue::Text(text) => text.trim().is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(text) => Some(text),
            ScalarValue::Flag(_) => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Flag(flag) => write!(f, "{}", flag),
            ScalarValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Text(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Flag(value)
    }
}

/// Column name → value, in column order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: Vec<(String, ScalarValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cell; an existing column keeps its position and takes the new value
    pub fn insert(&mut self, column: &str, value: ScalarValue) {
        match self.cells.iter_mut().find(|(name, _)| name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column.to_string(), value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&ScalarValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn has_content(&self) -> bool {
        self.cells.iter().any(|(_, value)| !value.is_blank())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<'a, const N: usize> From<[(&'a str, ScalarValue); N]> for Row {
    fn from(cells: [(&'a str, ScalarValue); N]) -> Self {
        let mut row = Row::new();
        for (name, value) in cells {
            row.insert(name, value);
        }
        row
    }
}

fn scalar_from_json(value: serde_json::Value) -> ScalarValue {
    match value {
        serde_json::Value::Bool(flag) => ScalarValue::Flag(flag),
        serde_json::Value::String(text) => ScalarValue::Text(text),
        serde_json::Value::Null => ScalarValue::Text(String::new()),
        other => ScalarValue::Text(other.to_string()),
    }
}

struct RowVisitor;

impl<'de> Visitor<'de> for RowVisitor {
    type Value = Row;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object of column values")
    }

    // keys are read in wire order so column order survives a round trip
    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
        let mut row = Row::new();
        while let Some((name, value)) = access.next_entry::<String, serde_json::Value>()? {
            row.insert(&name, scalar_from_json(value));
        }
        Ok(row)
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RowVisitor)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Rows produced by one extraction pass
pub type Dataset = Vec<Row>;
