//! Selection mode: hover highlighting, click-to-choose and mark reconciliation
//!
//! The host hit-tests pointer events and feeds the topmost node to the
//! session. Visual affordances are marker classes in the document's
//! decoration overlay: `active` on the root element while the session is on,
//! `hover` on the highlighted node, `selected` on every committed node.
//!
//! Pages that re-render drop committed marks. After a structural mutation the
//! session waits for a quiet period, then re-applies the `selected` mark to
//! whatever each committed selector matches now.

use ego_tree::NodeId;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::config::PickerConfig;
use crate::document::{rendered_text, Document, SharedDocument};
use crate::extractors::{css_selector, evaluate, path_expr, SelectorKind};

pub type SharedSession = Rc<RefCell<SelectionSession>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
}

/// Floating selector preview shown next to the pointer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoverLabel {
    pub text: String,
    pub x: f64,
    pub y: f64,
}

/// Payload of the `elementChosen` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementChosen {
    pub css_selector: String,
    pub path_expr: String,
    pub tag_name: String,
    pub text_preview: String,
}

/// Result of a click while selection mode is on
#[derive(Debug, Clone, PartialEq)]
pub struct ClickOutcome {
    /// The page must not see the click (no navigation, no handlers)
    pub prevent_default: bool,
    pub chosen: ElementChosen,
}

#[derive(Debug)]
pub struct SelectionSession {
    document: SharedDocument,
    config: PickerConfig,
    state: SessionState,
    highlighted: Option<NodeId>,
    label: Option<HoverLabel>,
    committed: Vec<String>,
    pending: Option<Instant>,
    active: watch::Sender<bool>,
}

impl SelectionSession {
    pub fn new(document: SharedDocument, config: PickerConfig) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            document,
            config,
            state: SessionState::Idle,
            highlighted: None,
            label: None,
            committed: Vec::new(),
            pending: None,
            active,
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Rc::new(RefCell::new(self))
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn config(&self) -> &PickerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn highlighted(&self) -> Option<NodeId> {
        self.highlighted
    }

    pub fn label(&self) -> Option<&HoverLabel> {
        self.label.as_ref()
    }

    /// CSS selectors of the elements clicked so far, in click order
    pub fn committed_selectors(&self) -> &[String] {
        &self.committed
    }

    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending
    }

    /// Receiver for the active flag; flips to `false` on `disable`
    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    pub fn enable(&mut self) {
        if self.is_active() {
            return;
        }
        self.state = SessionState::Active;

        let active_class = self.config.active_class();
        let mut doc = self.document.borrow_mut();
        if let Some(root) = doc.root_element().map(|el| el.id()) {
            doc.add_decoration(root, &active_class);
        }
        drop(doc);

        self.active.send_replace(true);
        info!("Selection mode enabled");
    }

    pub fn disable(&mut self) {
        if !self.is_active() {
            return;
        }
        self.state = SessionState::Idle;

        let mut doc = self.document.borrow_mut();
        for class in [
            self.config.hover_class(),
            self.config.selected_class(),
            self.config.active_class(),
        ] {
            doc.clear_decoration(&class);
        }
        drop(doc);

        self.highlighted = None;
        self.label = None;
        self.committed.clear();
        self.pending = None;
        self.active.send_replace(false);
        info!("Selection mode disabled");
    }

    /// Pointer moved over `target` at viewport position `(x, y)`
    pub fn pointer_move(&mut self, target: NodeId, x: f64, y: f64) -> Option<HoverLabel> {
        if !self.is_active() {
            return None;
        }
        let hover = self.config.hover_class();
        let mut doc = self.document.borrow_mut();
        let target = element_target(&doc, target)?;
        let tag = doc.element(target)?.value().name().to_string();

        if self.highlighted != Some(target) {
            if let Some(previous) = self.highlighted.take() {
                doc.remove_decoration(previous, &hover);
            }
        }

        if tag == "html" || tag == "body" {
            self.label = None;
            return None;
        }

        doc.add_decoration(target, &hover);
        self.highlighted = Some(target);

        let offset = self.config.label_offset;
        let label = HoverLabel {
            text: css_selector(&doc, target, &self.config),
            x: x + offset,
            y: y + offset,
        };
        self.label = Some(label.clone());
        Some(label)
    }

    pub fn pointer_leave(&mut self) {
        if let Some(previous) = self.highlighted.take() {
            let hover = self.config.hover_class();
            self.document.borrow_mut().remove_decoration(previous, &hover);
        }
        self.label = None;
    }

    /// Commit `target`: mark it selected and describe it for the host
    pub fn click(&mut self, target: NodeId) -> Option<ClickOutcome> {
        if !self.is_active() {
            return None;
        }
        let mut doc = self.document.borrow_mut();
        let target = element_target(&doc, target)?;
        let element = doc.element(target)?;

        let tag_name = element.value().name().to_string();
        let text = rendered_text(element);
        let text_preview: String = text.trim().chars().take(self.config.preview_chars).collect();
        let css = css_selector(&doc, target, &self.config);
        let path = path_expr(&doc, target);

        doc.add_decoration(target, &self.config.selected_class());
        if !self.committed.contains(&css) {
            self.committed.push(css.clone());
        }
        debug!("Element chosen: {} ({})", css, path);

        Some(ClickOutcome {
            prevent_default: true,
            chosen: ElementChosen {
                css_selector: css,
                path_expr: path,
                tag_name,
                text_preview,
            },
        })
    }

    /// Schedule reconciliation one debounce period after `now`; a later
    /// notification postpones it.
    pub fn notify_mutation(&mut self, now: Instant) {
        if self.is_active() {
            self.pending = Some(now + self.config.debounce());
        }
    }

    /// Reconcile if the debounce deadline has passed. Returns whether it ran.
    pub fn poll_reconcile(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(deadline) if now >= deadline => {
                self.pending = None;
                self.reconcile_now();
                true
            }
            _ => false,
        }
    }

    /// Re-apply the selected mark to every node matched by a committed
    /// selector. Selectors that fail or match nothing are skipped.
    pub fn reconcile_now(&mut self) -> usize {
        let selected = self.config.selected_class();
        let mut doc = self.document.borrow_mut();
        let mut marked = 0;
        for selector in &self.committed {
            let Ok(nodes) = evaluate(&doc, selector, SelectorKind::Css) else {
                continue;
            };
            for node in nodes {
                doc.add_decoration(node, &selected);
                marked += 1;
            }
        }
        debug!("Reconciled {} committed selectors ({} nodes)", self.committed.len(), marked);
        marked
    }
}

/// `target` itself when it is an element, else its nearest element ancestor
fn element_target(doc: &Document, target: NodeId) -> Option<NodeId> {
    let node = doc.tree().get(target)?;
    if node.value().is_element() {
        return Some(target);
    }
    node.ancestors()
        .find(|n| n.value().is_element())
        .map(|n| n.id())
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Debounced reconciliation task; spawn with `tokio::task::spawn_local`
/// after enabling the session. Ends when the session is disabled or the
/// document goes away.
pub async fn reconcile_loop(session: SharedSession) {
    let (mut revisions, mut active) = {
        let session = session.borrow();
        let revisions = session.document.borrow().subscribe();
        (revisions, session.subscribe_active())
    };

    loop {
        if !*active.borrow_and_update() {
            break;
        }
        let deadline = session.borrow().pending_deadline();

        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                session.borrow_mut().notify_mutation(Instant::now());
            }
            changed = active.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_until_deadline(deadline) => {
                session.borrow_mut().poll_reconcile(Instant::now());
            }
        }
    }
    debug!("Reconcile loop finished");
}
