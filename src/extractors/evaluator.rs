//! Selector evaluation
//!
//! Results are owned `NodeId` snapshots in document order; mutating the
//! document afterwards does not change a result already handed out.

use ego_tree::NodeId;
use scraper::Selector;

use super::path_expr::PathExpr;
use super::SelectorKind;
use crate::document::Document;
use crate::error::SelectorError;

/// Evaluate `selector` against the document
pub fn evaluate(
    document: &Document,
    selector: &str,
    kind: SelectorKind,
) -> Result<Vec<NodeId>, SelectorError> {
    match kind {
        SelectorKind::Css => evaluate_css(document, selector),
        SelectorKind::Path => evaluate_path(document, selector),
    }
}

/// Number of elements `selector` currently matches
pub fn count(document: &Document, selector: &str, kind: SelectorKind) -> Result<usize, SelectorError> {
    evaluate(document, selector, kind).map(|nodes| nodes.len())
}

/// Parse without evaluating, to validate user input early
pub fn validate(selector: &str, kind: SelectorKind) -> Result<(), SelectorError> {
    match kind {
        SelectorKind::Css => parse_css(selector).map(|_| ()),
        SelectorKind::Path => PathExpr::parse(selector).map(|_| ()),
    }
}

fn parse_css(selector: &str) -> Result<Selector, SelectorError> {
    if selector.trim().is_empty() {
        return Err(SelectorError::new(SelectorKind::Css, selector, "empty selector"));
    }
    Selector::parse(selector)
        .map_err(|e| SelectorError::new(SelectorKind::Css, selector, e.to_string()))
}

fn evaluate_css(document: &Document, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
    let parsed = parse_css(selector)?;
    Ok(document.select(&parsed).map(|el| el.id()).collect())
}

fn evaluate_path(document: &Document, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
    let expr = PathExpr::parse(selector)?;
    Ok(expr.evaluate(document.tree()))
}
