//! Per-element value extraction
//!
//! What "the value" of an element is depends on what kind of element it is:
//! form controls report their current state, media and links report their
//! target, everything else reports its rendered text.

use scraper::{ElementRef, Selector};

use super::ScalarValue;
use crate::document::{rendered_text, Document};

/// `type` attribute of an `<input>`, reduced to what extraction cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    /// checkbox and radio report their checked state
    Toggle,
    Text,
}

/// Closed set of element categories with distinct extraction rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementCategory {
    Input(InputType),
    Select,
    TextArea,
    Image,
    Anchor,
    Other,
}

impl ElementCategory {
    pub fn of(element: &ElementRef<'_>) -> Self {
        let el = element.value();
        match el.name() {
            "input" => {
                let toggle = el.attr("type").is_some_and(|t| {
                    t.eq_ignore_ascii_case("checkbox") || t.eq_ignore_ascii_case("radio")
                });
                if toggle {
                    ElementCategory::Input(InputType::Toggle)
                } else {
                    ElementCategory::Input(InputType::Text)
                }
            }
            "select" => ElementCategory::Select,
            "textarea" => ElementCategory::TextArea,
            "img" => ElementCategory::Image,
            "a" => ElementCategory::Anchor,
            _ => ElementCategory::Other,
        }
    }
}

/// Extract the scalar value of one element. Never fails: anything missing
/// falls back to an empty string.
pub fn extract_value(document: &Document, element: ElementRef<'_>) -> ScalarValue {
    let id = element.id();
    let el = element.value();

    match ElementCategory::of(&element) {
        ElementCategory::Input(InputType::Toggle) => {
            let checked = document
                .live_checked(id)
                .unwrap_or_else(|| el.attr("checked").is_some());
            ScalarValue::Flag(checked)
        }
        ElementCategory::Input(InputType::Text) => document
            .live_value(id)
            .or_else(|| el.attr("value"))
            .unwrap_or("")
            .into(),
        ElementCategory::Select => select_value(document, element).into(),
        ElementCategory::TextArea => match document.live_value(id) {
            Some(value) => value.into(),
            None => element.text().collect::<String>().into(),
        },
        ElementCategory::Image => non_empty(el.attr("src"))
            .or_else(|| non_empty(el.attr("alt")))
            .unwrap_or("")
            .into(),
        ElementCategory::Anchor => match non_empty(el.attr("href")) {
            Some(href) => resolve_href(document, href).into(),
            None => rendered_text(element).trim().into(),
        },
        ElementCategory::Other => non_empty(el.attr("src"))
            .or_else(|| non_empty(el.attr("href")))
            .or_else(|| non_empty(el.attr("data-value")))
            .map(String::from)
            .unwrap_or_else(|| rendered_text(element).trim().to_string())
            .into(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve against the document's base URL when it has one
fn resolve_href(document: &Document, href: &str) -> String {
    let href = href.trim();
    match document.base_url() {
        Some(base) => match base.join(href) {
            Ok(absolute) => absolute.to_string(),
            Err(_) => href.to_string(),
        },
        None => href.to_string(),
    }
}

fn select_value(document: &Document, select: ElementRef<'_>) -> String {
    if let Some(value) = document.live_value(select.id()) {
        return value.to_string();
    }

    let Some(option) = selected_option(select) else {
        return String::new();
    };

    match non_empty(option.value().attr("value")) {
        Some(value) => value.to_string(),
        None => rendered_text(option).trim().to_string(),
    }
}

/// First option carrying `selected`, else the first option
fn selected_option(select: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let option_selector = Selector::parse("option").ok()?;
    let mut options = select.select(&option_selector).peekable();
    let first = *options.peek()?;
    Some(
        options
            .find(|opt| opt.value().attr("selected").is_some())
            .unwrap_or(first),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(doc: &Document, css: &str) -> ScalarValue {
        let sel = Selector::parse(css).unwrap();
        let el = doc.html().select(&sel).next().unwrap();
        extract_value(doc, el)
    }

    #[test]
    fn test_checkbox_and_radio_report_checked_state() {
        let mut doc = Document::parse(
            r#"<input type="checkbox" id="a" checked>
               <input type="RADIO" id="b">
               <input type="checkbox" id="c" checked>"#,
        );
        assert_eq!(value_of(&doc, "#a"), ScalarValue::Flag(true));
        assert_eq!(value_of(&doc, "#b"), ScalarValue::Flag(false));

        let c = doc
            .html()
            .select(&Selector::parse("#c").unwrap())
            .next()
            .unwrap()
            .id();
        doc.set_checked(c, false);
        assert_eq!(value_of(&doc, "#c"), ScalarValue::Flag(false));
    }

    #[test]
    fn test_text_input_prefers_live_value() {
        let mut doc = Document::parse(r#"<input id="q" value="default"><input id="e">"#);
        assert_eq!(value_of(&doc, "#q"), "default".into());
        assert_eq!(value_of(&doc, "#e"), "".into());

        let q = doc
            .html()
            .select(&Selector::parse("#q").unwrap())
            .next()
            .unwrap()
            .id();
        doc.set_value(q, "typed");
        assert_eq!(value_of(&doc, "#q"), "typed".into());
    }

    #[test]
    fn test_select_value_and_text_fallback() {
        let doc = Document::parse(
            r#"<select id="a"><option value="1">One</option><option value="2" selected>Two</option></select>
               <select id="b"><option>First</option><option>Second</option></select>
               <select id="c"></select>"#,
        );
        assert_eq!(value_of(&doc, "#a"), "2".into());
        assert_eq!(value_of(&doc, "#b"), "First".into());
        assert_eq!(value_of(&doc, "#c"), "".into());
    }

    #[test]
    fn test_textarea_is_not_trimmed() {
        let doc = Document::parse("<textarea id='t'>  spaced  </textarea>");
        assert_eq!(value_of(&doc, "#t"), "  spaced  ".into());
    }

    #[test]
    fn test_image_src_then_alt() {
        let doc = Document::parse(
            r#"<img id="a" src="/a.png" alt="A"><img id="b" alt="B only"><img id="c">"#,
        );
        assert_eq!(value_of(&doc, "#a"), "/a.png".into());
        assert_eq!(value_of(&doc, "#b"), "B only".into());
        assert_eq!(value_of(&doc, "#c"), "".into());
    }

    #[test]
    fn test_anchor_href_resolution() {
        let html = r#"<a id="rel" href="/p1">x</a><a id="none"> label </a>"#;
        let plain = Document::parse(html);
        assert_eq!(value_of(&plain, "#rel"), "/p1".into());
        assert_eq!(value_of(&plain, "#none"), "label".into());

        let based = Document::parse_with_base(html, "https://shop.example/list?page=2").unwrap();
        assert_eq!(value_of(&based, "#rel"), "https://shop.example/p1".into());
    }

    #[test]
    fn test_generic_element_attribute_priority() {
        let doc = Document::parse(
            r#"<div id="s" src="s.js" href="h" data-value="d">t</div>
               <div id="h" href="h" data-value="d">t</div>
               <div id="d" data-value="d">t</div>
               <div id="t">  text <script>ignored()</script> </div>"#,
        );
        assert_eq!(value_of(&doc, "#s"), "s.js".into());
        assert_eq!(value_of(&doc, "#h"), "h".into());
        assert_eq!(value_of(&doc, "#d"), "d".into());
        assert_eq!(value_of(&doc, "#t"), "text".into());
    }

    #[test]
    fn test_category_dispatch() {
        let doc = Document::parse(r#"<input type="Checkbox"><input><img><p></p>"#);
        let categories: Vec<_> = doc
            .html()
            .select(&Selector::parse("input, img, p").unwrap())
            .map(|el| ElementCategory::of(&el))
            .collect();
        assert_eq!(
            categories,
            vec![
                ElementCategory::Input(InputType::Toggle),
                ElementCategory::Input(InputType::Text),
                ElementCategory::Image,
                ElementCategory::Other,
            ]
        );
    }
}
