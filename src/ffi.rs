//! FFI interface for C/C++ hosts
//!
//! The host creates one agent per page, passes bridge commands and pointer
//! events as JSON, reports page re-renders, and drains queued `elementChosen`
//! events. Reconciliation after a re-render is driven by the host calling
//! `rowpicker_agent_tick` with its own clock. Every call returns a
//! `RowpickerResult`; strings in it are owned by Rust and must be released
//! with `rowpicker_result_free`.

use serde::{Deserialize, Serialize};
use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::warn;

use crate::bridge::{check_page_allowed, BridgeEvent, ContentAgent};
use crate::config::PickerConfig;
use crate::document::Document;
use crate::extractors::{evaluate, SelectorKind};
use crate::selection::{ElementChosen, HoverLabel};

/// Result struct returned to the host.
/// Exactly one pointer is non-null; free with `rowpicker_result_free`.
#[repr(C)]
pub struct RowpickerResult {
    /// JSON payload (null-terminated)
    pub json_ptr: *mut c_char,
    /// Error message (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

/// Opaque per-page agent handle
pub struct RowpickerAgent {
    agent: ContentAgent,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
    revisions: watch::Receiver<u64>,
    /// Host time zero
    epoch: Instant,
}

impl RowpickerAgent {
    fn new(document: Document) -> Self {
        let revisions = document.subscribe();
        let (agent, events) = ContentAgent::new(document.into_shared(), PickerConfig::default());
        Self {
            agent,
            events,
            revisions,
            epoch: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PointerKind {
    Move,
    Click,
    Leave,
}

/// Pointer event already hit-tested by the host; `target` is a path expression
#[derive(Debug, Clone, Deserialize)]
struct PointerEvent {
    event: PointerKind,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MutationOp {
    Append,
    Replace,
    Remove,
}

/// Page re-render: `target` is a path expression, `html` the new fragment
#[derive(Debug, Clone, Deserialize)]
struct Mutation {
    op: MutationOp,
    target: String,
    #[serde(default)]
    html: String,
}

#[derive(Debug, Serialize)]
struct MutationReply {
    revision: u64,
    inserted: usize,
}

#[derive(Debug, Serialize)]
struct TickReply {
    reconciled: bool,
    pending: bool,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct PointerReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<HoverLabel>,
    prevent_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chosen: Option<ElementChosen>,
}

/// Create an agent for one page.
///
/// # Arguments
/// * `html_ptr` - Pointer to HTML content (UTF-8, not necessarily null-terminated)
/// * `html_len` - Length of HTML content in bytes
/// * `base_url` - Page URL (null-terminated), or null
///
/// # Returns
/// A handle to free with `rowpicker_agent_free`, or null when the HTML is not
/// UTF-8 or the page URL is not an http, https or file URL.
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `base_url` must be null or a valid null-terminated C string
#[no_mangle]
pub unsafe extern "C" fn rowpicker_agent_new(
    html_ptr: *const c_char,
    html_len: usize,
    base_url: *const c_char,
) -> *mut RowpickerAgent {
    let html = match read_html(html_ptr, html_len) {
        Ok(html) => html,
        Err(msg) => {
            warn!("{}", msg);
            return ptr::null_mut();
        }
    };

    let mut document = Document::parse(&html);
    if !base_url.is_null() {
        let url = match CStr::from_ptr(base_url).to_str() {
            Ok(url) => url,
            Err(_) => {
                warn!("Invalid UTF-8 in base URL");
                return ptr::null_mut();
            }
        };
        match check_page_allowed(url) {
            Ok(parsed) => document = document.with_base_url(parsed),
            Err(e) => {
                warn!("{}", e);
                return ptr::null_mut();
            }
        }
    }

    Box::into_raw(Box::new(RowpickerAgent::new(document)))
}

/// Handle one bridge command (`{"action": ...}`).
///
/// Command-level failures are reported inside the JSON envelope
/// (`success: false`); `error_ptr` is only used for bad arguments.
///
/// # Safety
/// - `agent` must have been returned by `rowpicker_agent_new` and not freed
/// - `command_json` must be a valid null-terminated C string
#[no_mangle]
pub unsafe extern "C" fn rowpicker_agent_handle(
    agent: *mut RowpickerAgent,
    command_json: *const c_char,
) -> RowpickerResult {
    let Some(agent) = agent.as_ref() else {
        return make_error_result("Agent is null");
    };
    let command = match read_cstr(command_json, "Command JSON") {
        Ok(s) => s,
        Err(msg) => return make_error_result(&msg),
    };

    json_result(&agent.agent.handle_json(command))
}

/// Feed a pointer event: `{"event": "move"|"click"|"leave", "target": "<path>", "x": 0, "y": 0}`
///
/// # Safety
/// Same as `rowpicker_agent_handle`
#[no_mangle]
pub unsafe extern "C" fn rowpicker_agent_pointer(
    agent: *mut RowpickerAgent,
    event_json: *const c_char,
) -> RowpickerResult {
    let Some(agent) = agent.as_ref() else {
        return make_error_result("Agent is null");
    };
    let raw = match read_cstr(event_json, "Event JSON") {
        Ok(s) => s,
        Err(msg) => return make_error_result(&msg),
    };
    let event: PointerEvent = match serde_json::from_str(raw) {
        Ok(e) => e,
        Err(e) => return make_error_result(&format!("Failed to parse pointer event: {}", e)),
    };

    if event.event == PointerKind::Leave {
        agent.agent.pointer_leave();
        return json_result(&PointerReply::default());
    }

    let Some(target) = event.target.as_deref() else {
        return make_error_result("Pointer event has no target");
    };
    let node = {
        let doc = agent.agent.document().borrow();
        match evaluate(&doc, target, SelectorKind::Path) {
            Ok(nodes) => nodes.first().copied(),
            Err(e) => return make_error_result(&e.to_string()),
        }
    };
    let Some(node) = node else {
        return make_error_result(&format!("Target '{}' matches no element", target));
    };

    let reply = match event.event {
        PointerKind::Move => PointerReply {
            label: agent.agent.pointer_move(node, event.x, event.y),
            ..Default::default()
        },
        _ => match agent.agent.click(node) {
            Some(outcome) => PointerReply {
                label: None,
                prevent_default: outcome.prevent_default,
                chosen: Some(outcome.chosen),
            },
            None => PointerReply::default(),
        },
    };
    json_result(&reply)
}

/// Apply a page re-render: `{"op": "append"|"replace"|"remove", "target": "<path>", "html": "..."}`
///
/// `append` adds `html` after the target's children, `replace` swaps the
/// target's children for `html`, `remove` detaches the target. The first
/// element matching `target` is used.
///
/// # Safety
/// Same as `rowpicker_agent_handle`
#[no_mangle]
pub unsafe extern "C" fn rowpicker_agent_mutate(
    agent: *mut RowpickerAgent,
    mutation_json: *const c_char,
) -> RowpickerResult {
    let Some(agent) = agent.as_ref() else {
        return make_error_result("Agent is null");
    };
    let raw = match read_cstr(mutation_json, "Mutation JSON") {
        Ok(s) => s,
        Err(msg) => return make_error_result(&msg),
    };
    let mutation: Mutation = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => return make_error_result(&format!("Failed to parse mutation: {}", e)),
    };

    let mut doc = agent.agent.document().borrow_mut();
    let target = match evaluate(&doc, &mutation.target, SelectorKind::Path) {
        Ok(nodes) => nodes.first().copied(),
        Err(e) => return make_error_result(&e.to_string()),
    };
    let Some(target) = target else {
        return make_error_result(&format!("Target '{}' matches no element", mutation.target));
    };

    let inserted = match mutation.op {
        MutationOp::Append => doc.append_html(target, &mutation.html).len(),
        MutationOp::Replace => doc.replace_children(target, &mutation.html).len(),
        MutationOp::Remove => {
            if !doc.remove(target) {
                return make_error_result(&format!("Target '{}' cannot be removed", mutation.target));
            }
            0
        }
    };
    json_result(&MutationReply {
        revision: doc.revision(),
        inserted,
    })
}

/// Advance reconciliation to host time `now_ms` (any monotonic millisecond
/// clock; only differences matter). Re-renders seen since the last tick
/// restart the debounce; once it has elapsed the selected marks are
/// re-applied. Replies `{"reconciled": bool, "pending": bool}`.
///
/// # Safety
/// `agent` must have been returned by `rowpicker_agent_new` and not freed
#[no_mangle]
pub unsafe extern "C" fn rowpicker_agent_tick(agent: *mut RowpickerAgent, now_ms: u64) -> RowpickerResult {
    let Some(agent) = agent.as_mut() else {
        return make_error_result("Agent is null");
    };
    let now = agent.epoch + Duration::from_millis(now_ms);

    let mut session = agent.agent.session().borrow_mut();
    if agent.revisions.has_changed().unwrap_or(false) {
        drop(agent.revisions.borrow_and_update());
        session.notify_mutation(now);
    }
    let reconciled = session.poll_reconcile(now);
    json_result(&TickReply {
        reconciled,
        pending: session.pending_deadline().is_some(),
    })
}

/// Take every queued outbound event as a JSON array
///
/// # Safety
/// `agent` must have been returned by `rowpicker_agent_new` and not freed
#[no_mangle]
pub unsafe extern "C" fn rowpicker_agent_drain_events(agent: *mut RowpickerAgent) -> RowpickerResult {
    let Some(agent) = agent.as_mut() else {
        return make_error_result("Agent is null");
    };
    let mut events = Vec::new();
    while let Ok(event) = agent.events.try_recv() {
        events.push(event);
    }
    json_result(&events)
}

/// Free a RowpickerResult
///
/// # Safety
/// - `result` must have been returned by one of the `rowpicker_agent_*` calls
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn rowpicker_result_free(result: RowpickerResult) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

/// Free an agent handle; null is ignored
///
/// # Safety
/// `agent` must have been returned by `rowpicker_agent_new` and not freed
#[no_mangle]
pub unsafe extern "C" fn rowpicker_agent_free(agent: *mut RowpickerAgent) {
    if !agent.is_null() {
        drop(Box::from_raw(agent));
    }
}

unsafe fn read_html(html_ptr: *const c_char, html_len: usize) -> Result<String, &'static str> {
    if html_ptr.is_null() || html_len == 0 {
        return Ok(String::new());
    }
    let slice = std::slice::from_raw_parts(html_ptr as *const u8, html_len);
    std::str::from_utf8(slice)
        .map(str::to_string)
        .map_err(|_| "Invalid UTF-8 in HTML content")
}

unsafe fn read_cstr<'a>(value: *const c_char, what: &str) -> Result<&'a str, String> {
    if value.is_null() {
        return Err(format!("{} is null", what));
    }
    CStr::from_ptr(value)
        .to_str()
        .map_err(|_| format!("Invalid UTF-8 in {}", what))
}

fn json_result<T: Serialize>(value: &T) -> RowpickerResult {
    match serde_json::to_string(value) {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => RowpickerResult {
                json_ptr: cstr.into_raw(),
                error_ptr: ptr::null_mut(),
            },
            Err(_) => make_error_result("Result JSON contains null bytes"),
        },
        Err(e) => make_error_result(&format!("Failed to serialize result: {}", e)),
    }
}

// Helper to create error result
fn make_error_result(msg: &str) -> RowpickerResult {
    let error_cstr = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    RowpickerResult {
        json_ptr: ptr::null_mut(),
        error_ptr: error_cstr.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const PAGE: &str = r#"<div id="x">A</div><div>B</div>"#;

    unsafe fn new_agent(html: &str, base: Option<&str>) -> *mut RowpickerAgent {
        let base = base.map(|b| CString::new(b).unwrap());
        rowpicker_agent_new(
            html.as_ptr() as *const c_char,
            html.len(),
            base.as_ref().map_or(ptr::null(), |b| b.as_ptr()),
        )
    }

    unsafe fn take_json(result: RowpickerResult) -> Value {
        assert!(result.error_ptr.is_null(), "unexpected error");
        let json = CStr::from_ptr(result.json_ptr).to_str().unwrap().to_string();
        rowpicker_result_free(result);
        serde_json::from_str(&json).unwrap()
    }

    unsafe fn take_error(result: RowpickerResult) -> String {
        assert!(result.json_ptr.is_null());
        let msg = CStr::from_ptr(result.error_ptr).to_str().unwrap().to_string();
        rowpicker_result_free(result);
        msg
    }

    unsafe fn send(agent: *mut RowpickerAgent, json: &str) -> RowpickerResult {
        let json = CString::new(json).unwrap();
        rowpicker_agent_handle(agent, json.as_ptr())
    }

    unsafe fn pointer(agent: *mut RowpickerAgent, json: &str) -> RowpickerResult {
        let json = CString::new(json).unwrap();
        rowpicker_agent_pointer(agent, json.as_ptr())
    }

    #[test]
    fn test_commands_round_trip() {
        unsafe {
            let agent = new_agent(PAGE, Some("https://shop.example/"));
            assert!(!agent.is_null());

            assert_eq!(take_json(send(agent, r#"{"action":"ping"}"#)), serde_json::json!({"success": true}));

            let reply = take_json(send(agent, "{\"action\":\"testSelector\",\"selector\":\"###bad\",\"kind\":\"css\"}"));
            assert_eq!(reply["success"], false);
            assert_eq!(reply["count"], 0);

            let reply = take_json(send(agent, "{broken"));
            assert_eq!(reply["success"], false);

            rowpicker_agent_free(agent);
        }
    }

    #[test]
    fn test_click_queues_event() {
        unsafe {
            let agent = new_agent(PAGE, None);
            take_json(send(agent, r#"{"action":"enableSelection"}"#));

            let reply = take_json(pointer(agent, r#"{"event":"move","target":"/html/body/div[2]","x":5,"y":5}"#));
            assert_eq!(reply["label"]["text"], "div:nth-of-type(2)");

            let reply = take_json(pointer(agent, r#"{"event":"click","target":"/html/body/div[2]"}"#));
            assert_eq!(reply["preventDefault"], true);
            assert_eq!(reply["chosen"]["pathExpr"], "/html/body/div[2]");

            let events = take_json(rowpicker_agent_drain_events(agent));
            assert_eq!(events.as_array().unwrap().len(), 1);
            assert_eq!(events[0]["action"], "elementChosen");
            assert_eq!(events[0]["textPreview"], "B");
            let events = take_json(rowpicker_agent_drain_events(agent));
            assert_eq!(events, serde_json::json!([]));

            take_json(pointer(agent, r#"{"event":"leave"}"#));
            rowpicker_agent_free(agent);
        }
    }

    #[test]
    fn test_argument_errors() {
        unsafe {
            assert!(take_error(send(ptr::null_mut(), r#"{"action":"ping"}"#)).contains("null"));

            let agent = new_agent(PAGE, None);
            assert!(take_error(rowpicker_agent_handle(agent, ptr::null())).contains("null"));
            assert!(take_error(pointer(agent, r#"{"event":"click"}"#)).contains("no target"));
            assert!(take_error(pointer(agent, r#"{"event":"click","target":"//table"}"#)).contains("matches no element"));
            assert!(take_error(pointer(agent, r#"{"event":"hover","target":"//div"}"#)).contains("parse"));
            rowpicker_agent_free(agent);
        }
    }

    #[test]
    fn test_disallowed_page_yields_null() {
        unsafe {
            assert!(new_agent(PAGE, Some("chrome://settings")).is_null());
            let bad = [0xffu8, 0xfe];
            assert!(rowpicker_agent_new(bad.as_ptr() as *const c_char, bad.len(), ptr::null()).is_null());
        }
    }

    unsafe fn mutate(agent: *mut RowpickerAgent, json: &str) -> RowpickerResult {
        let json = CString::new(json).unwrap();
        rowpicker_agent_mutate(agent, json.as_ptr())
    }

    unsafe fn selected(agent: *mut RowpickerAgent) -> usize {
        (*agent).agent.document().borrow().decorated("rowpicker-selected").len()
    }

    #[test]
    fn test_rerender_is_reconciled_on_host_ticks() {
        unsafe {
            let agent = new_agent(r#"<ul id="list"><li class="row">a</li></ul>"#, None);
            take_json(send(agent, r#"{"action":"enableSelection"}"#));
            let reply = take_json(pointer(agent, r#"{"event":"click","target":"//li"}"#));
            assert_eq!(reply["chosen"]["cssSelector"], ".row");
            assert_eq!(selected(agent), 1);

            let reply = take_json(mutate(
                agent,
                r#"{"op":"append","target":"//ul","html":"<li class=\"row\">b</li>"}"#,
            ));
            assert_eq!(reply, serde_json::json!({"revision": 1, "inserted": 1}));

            let tick = take_json(rowpicker_agent_tick(agent, 1000));
            assert_eq!(tick, serde_json::json!({"reconciled": false, "pending": true}));
            assert_eq!(take_json(rowpicker_agent_tick(agent, 1200))["reconciled"], false);
            assert_eq!(take_json(rowpicker_agent_tick(agent, 1300))["reconciled"], true);
            assert_eq!(selected(agent), 2);
            assert_eq!(take_json(rowpicker_agent_tick(agent, 5000))["pending"], false);

            // a full re-render of the list drops old marks; the next pass restores them
            take_json(mutate(
                agent,
                r#"{"op":"replace","target":"//ul","html":"<li class=\"row\">x</li><li>y</li>"}"#,
            ));
            assert_eq!(selected(agent), 0);
            take_json(rowpicker_agent_tick(agent, 6000));
            take_json(rowpicker_agent_tick(agent, 6300));
            assert_eq!(selected(agent), 1);

            let reply = take_json(mutate(agent, r#"{"op":"remove","target":"//li[2]"}"#));
            assert_eq!(reply["inserted"], 0);
            let reply = take_json(send(agent, r#"{"action":"testSelector","selector":"//li","kind":"xpath"}"#));
            assert_eq!(reply["count"], 1);

            rowpicker_agent_free(agent);
        }
    }

    #[test]
    fn test_mutation_errors() {
        unsafe {
            let agent = new_agent(PAGE, None);
            assert!(take_error(mutate(agent, r#"{"op":"append","target":"//table","html":"<p>"}"#))
                .contains("matches no element"));
            assert!(take_error(mutate(agent, r#"{"op":"explode","target":"//div"}"#)).contains("parse"));
            assert!(take_error(mutate(agent, r#"{"op":"remove","target":"//div["}"#)).contains("Invalid"));
            assert!(take_error(rowpicker_agent_tick(ptr::null_mut(), 0)).contains("null"));
            rowpicker_agent_free(agent);
        }
    }
}
