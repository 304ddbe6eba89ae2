//! Selector synthesis for a chosen element
//!
//! Both generators are best effort. `css_selector` prefers short selectors and
//! stops as soon as one is unique; `path_expr` always spells out the complete
//! ancestor chain. Neither guarantees uniqueness, so callers re-check with the
//! evaluator before trusting a selector.

use ego_tree::NodeId;
use scraper::{ElementRef, Selector};

use crate::config::PickerConfig;
use crate::document::Document;

/// Derive a CSS selector for `node`
pub fn css_selector(document: &Document, node: NodeId, config: &PickerConfig) -> String {
    let Some(element) = document.element(node) else {
        return String::new();
    };

    if let Some(id) = element.value().id().filter(|id| !id.is_empty()) {
        return format!("#{}", escape_ident(id));
    }

    let classes: Vec<String> = element
        .value()
        .classes()
        .filter(|class| !config.is_marker_class(class))
        .map(escape_ident)
        .collect();
    if !classes.is_empty() {
        let class_selector = format!(".{}", classes.join("."));
        if css_match_count(document, &class_selector) == Some(1) {
            return class_selector;
        }
    }

    let mut path = String::new();
    let mut current = Some(element);
    let mut depth = 0;

    while let Some(el) = current {
        let tag = el.value().name();
        if tag == "body" || tag == "html" {
            break;
        }

        let fragment = match same_tag_position(el) {
            Some((index, count)) if count > 1 => format!("{}:nth-of-type({})", tag, index),
            _ => tag.to_string(),
        };
        path = if path.is_empty() {
            fragment
        } else {
            format!("{} > {}", fragment, path)
        };

        if css_match_count(document, &path) == Some(1) {
            return path;
        }

        depth += 1;
        if depth >= config.max_css_depth {
            break;
        }
        current = el.parent().and_then(ElementRef::wrap);
    }

    if path.is_empty() {
        // the element is body or html itself
        return element.value().name().to_string();
    }
    path
}

/// Derive an absolute path expression for `node`
pub fn path_expr(document: &Document, node: NodeId) -> String {
    let Some(element) = document.element(node) else {
        return String::new();
    };

    if let Some(id) = element.value().id().filter(|id| !id.is_empty()) {
        return format!("//*[@id={}]", quote_literal(id));
    }

    let mut steps = Vec::new();
    let mut current = Some(element);
    while let Some(el) = current {
        let tag = el.value().name();
        match same_tag_position(el) {
            Some((index, count)) if count > 1 => steps.push(format!("{}[{}]", tag, index)),
            _ => steps.push(tag.to_string()),
        }
        current = el.parent().and_then(ElementRef::wrap);
    }

    steps.reverse();
    format!("/{}", steps.join("/"))
}

/// 1-based position among same-tag element siblings, and how many there are
fn same_tag_position(element: ElementRef<'_>) -> Option<(usize, usize)> {
    let parent = element.parent()?;
    let tag = element.value().name();
    let mut index = 0;
    let mut count = 0;
    for sibling in parent.children().filter_map(ElementRef::wrap) {
        if sibling.value().name() != tag {
            continue;
        }
        count += 1;
        if sibling.id() == element.id() {
            index = count;
        }
    }
    Some((index, count))
}

fn css_match_count(document: &Document, selector: &str) -> Option<usize> {
    let selector = Selector::parse(selector).ok()?;
    Some(document.select(&selector).count())
}

/// Escape a CSS identifier; plain identifiers are returned unchanged
pub fn escape_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    for (i, ch) in ident.chars().enumerate() {
        let plain = ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || !ch.is_ascii();
        if i == 0 && ch.is_ascii_digit() {
            out.push_str(&format!("\\{:x} ", ch as u32));
        } else if ch.is_ascii_control() {
            out.push_str(&format!("\\{:x} ", ch as u32));
        } else if plain {
            out.push(ch);
        } else {
            out.push('\\');
            out.push(ch);
        }
    }
    out
}

/// Quote a string as a path-expression literal
fn quote_literal(value: &str) -> String {
    if !value.contains('"') {
        format!("\"{}\"", value)
    } else if !value.contains('\'') {
        format!("'{}'", value)
    } else {
        let parts: Vec<String> = value
            .split('"')
            .map(|part| format!("\"{}\"", part))
            .collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}
