//! Document handle shared by the picker components
//!
//! Wraps a parsed `scraper::Html` tree together with the state a live page has
//! and a static parse does not: current form-control values, marker classes
//! applied by selection mode, and a revision counter that ticks on every
//! structural mutation (node insertion or removal).

use ego_tree::iter::Edge;
use ego_tree::{NodeId, NodeRef, Tree};
use scraper::{ElementRef, Html, Node, Selector};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use tokio::sync::watch;
use url::Url;

/// Single-threaded shared handle; the host and the selection session both hold one
pub type SharedDocument = Rc<RefCell<Document>>;

/// Tags whose text never reaches the rendered page
const NON_RENDERED: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Debug, Clone, Default)]
struct ControlState {
    value: Option<String>,
    checked: Option<bool>,
}

#[derive(Debug)]
pub struct Document {
    html: Html,
    base_url: Option<Url>,
    controls: HashMap<NodeId, ControlState>,
    decorations: HashMap<NodeId, BTreeSet<String>>,
    revision: watch::Sender<u64>,
}

impl Document {
    pub fn parse(html: &str) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            html: Html::parse_document(html),
            base_url: None,
            controls: HashMap::new(),
            decorations: HashMap::new(),
            revision,
        }
    }

    /// Parse with a page URL used to resolve relative links
    pub fn parse_with_base(html: &str, base_url: &str) -> Result<Self, url::ParseError> {
        let base = Url::parse(base_url)?;
        Ok(Self::parse(html).with_base_url(base))
    }

    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    pub fn into_shared(self) -> SharedDocument {
        Rc::new(RefCell::new(self))
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn tree(&self) -> &Tree<Node> {
        &self.html.tree
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    pub fn root_element(&self) -> Option<ElementRef<'_>> {
        self.html.tree.root().children().find_map(ElementRef::wrap)
    }

    pub fn body(&self) -> Option<ElementRef<'_>> {
        self.root_element()?
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "body")
    }

    /// Attached elements matching `selector`, in document order. Unlike
    /// `Html::select` this skips subtrees removed with [`Document::remove`].
    pub fn select<'a>(&'a self, selector: &'a Selector) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        self.html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(move |el| selector.matches(el))
    }

    /// True while the node is still reachable from the document root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let root = self.html.tree.root().id();
        match self.html.tree.get(id) {
            Some(node) if node.id() == root => true,
            Some(node) => node.ancestors().any(|a| a.id() == root),
            None => false,
        }
    }

    // Live form-control state

    pub fn set_value(&mut self, id: NodeId, value: impl Into<String>) {
        self.controls.entry(id).or_default().value = Some(value.into());
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool) {
        self.controls.entry(id).or_default().checked = Some(checked);
    }

    pub fn live_value(&self, id: NodeId) -> Option<&str> {
        self.controls.get(&id)?.value.as_deref()
    }

    pub fn live_checked(&self, id: NodeId) -> Option<bool> {
        self.controls.get(&id)?.checked
    }

    // Marker classes. These are invisible to CSS selector matching and to
    // the parsed class attribute.

    pub fn add_decoration(&mut self, id: NodeId, class: &str) -> bool {
        self.decorations
            .entry(id)
            .or_default()
            .insert(class.to_string())
    }

    pub fn remove_decoration(&mut self, id: NodeId, class: &str) -> bool {
        let Some(set) = self.decorations.get_mut(&id) else {
            return false;
        };
        let removed = set.remove(class);
        if set.is_empty() {
            self.decorations.remove(&id);
        }
        removed
    }

    /// Remove `class` from every node; returns how many nodes carried it
    pub fn clear_decoration(&mut self, class: &str) -> usize {
        let mut cleared = 0;
        self.decorations.retain(|_, set| {
            if set.remove(class) {
                cleared += 1;
            }
            !set.is_empty()
        });
        cleared
    }

    pub fn has_decoration(&self, id: NodeId, class: &str) -> bool {
        self.decorations
            .get(&id)
            .is_some_and(|set| set.contains(class))
    }

    /// Nodes currently carrying `class`, in document order
    pub fn decorated(&self, class: &str) -> Vec<NodeId> {
        self.html
            .tree
            .root()
            .descendants()
            .map(|n| n.id())
            .filter(|id| self.has_decoration(*id, class))
            .collect()
    }

    /// Parsed classes followed by marker classes
    pub fn class_list(&self, id: NodeId) -> Vec<String> {
        let mut classes: Vec<String> = self
            .element(id)
            .map(|el| el.value().classes().map(String::from).collect())
            .unwrap_or_default();
        if let Some(extra) = self.decorations.get(&id) {
            for class in extra {
                if !classes.contains(class) {
                    classes.push(class.clone());
                }
            }
        }
        classes
    }

    // Structural mutation

    /// Parse `fragment` and append its nodes as the last children of `parent`.
    /// Returns the ids of the inserted top-level element nodes.
    pub fn append_html(&mut self, parent: NodeId, fragment: &str) -> Vec<NodeId> {
        if self.html.tree.get(parent).is_none() {
            return vec![];
        }
        let inserted = self.graft_fragment(parent, fragment);
        self.bump_revision();
        inserted
    }

    /// Replace every child of `parent` with the nodes parsed from `fragment`,
    /// as one mutation. Returns the ids of the inserted top-level elements.
    pub fn replace_children(&mut self, parent: NodeId, fragment: &str) -> Vec<NodeId> {
        let Some(node) = self.html.tree.get(parent) else {
            return vec![];
        };
        let children: Vec<NodeId> = node.children().map(|c| c.id()).collect();
        for child in children {
            self.detach(child);
        }
        let inserted = self.graft_fragment(parent, fragment);
        self.bump_revision();
        inserted
    }

    /// Detach a node (and its subtree) from the document
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.html.tree.root().id() || !self.is_attached(id) {
            return false;
        }
        let removed = self.detach(id);
        if removed {
            self.bump_revision();
        }
        removed
    }

    fn detach(&mut self, id: NodeId) -> bool {
        let Some(node) = self.html.tree.get(id) else {
            return false;
        };
        let subtree: Vec<NodeId> = node.descendants().map(|n| n.id()).collect();
        for member in &subtree {
            self.controls.remove(member);
            self.decorations.remove(member);
        }
        let Some(mut node) = self.html.tree.get_mut(id) else {
            return false;
        };
        node.detach();
        true
    }

    fn graft_fragment(&mut self, parent: NodeId, fragment: &str) -> Vec<NodeId> {
        let parsed = Html::parse_fragment(fragment);
        // parse_fragment wraps content in a synthetic <html> element
        let Some(wrapper) = parsed.tree.root().children().find_map(ElementRef::wrap) else {
            return vec![];
        };

        let mut inserted = Vec::new();
        for child in wrapper.children() {
            if let Some(id) = graft(&mut self.html.tree, parent, child) {
                if child.value().is_element() {
                    inserted.push(id);
                }
            }
        }
        inserted
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver notified with the new revision after every structural mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump_revision(&mut self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

/// Copy `source` and its subtree under `parent`; returns the new root's id
fn graft(tree: &mut Tree<Node>, parent: NodeId, source: NodeRef<'_, Node>) -> Option<NodeId> {
    let root = tree.get_mut(parent)?.append(source.value().clone()).id();
    let mut pending = vec![(root, source)];
    while let Some((target, from)) = pending.pop() {
        for child in from.children() {
            let Some(mut node) = tree.get_mut(target) else {
                continue;
            };
            let id = node.append(child.value().clone()).id();
            pending.push((id, child));
        }
    }
    Some(root)
}

/// Rendered text of an element: text nodes outside script/style and friends
pub fn rendered_text(element: ElementRef<'_>) -> String {
    let hides = |node: NodeRef<'_, Node>| {
        node.id() != element.id()
            && node
                .value()
                .as_element()
                .is_some_and(|el| NON_RENDERED.contains(&el.name()))
    };

    let mut out = String::new();
    let mut hidden = 0usize;
    for edge in element.traverse() {
        match edge {
            Edge::Open(node) if hides(node) => hidden += 1,
            Edge::Open(node) => {
                if let Node::Text(text) = node.value() {
                    if hidden == 0 {
                        out.push_str(text);
                    }
                }
            }
            Edge::Close(node) if hides(node) => hidden -= 1,
            Edge::Close(_) => {}
        }
    }
    out
}
