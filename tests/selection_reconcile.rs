use rowpicker::selection::reconcile_loop;
use rowpicker::{evaluate, Document, PickerConfig, SelectionSession, SelectorKind, SharedDocument};
use std::time::Duration;
use tokio::task::LocalSet;
use tokio::time::sleep;

const PAGE: &str = r#"<ul id="list"><li class="row">a</li></ul><p>footer</p>"#;
const SELECTED: &str = "rowpicker-selected";

fn rows(doc: &SharedDocument) -> Vec<ego_tree::NodeId> {
    evaluate(&doc.borrow(), "li.row", SelectorKind::Css).unwrap()
}

fn all_selected(doc: &SharedDocument) -> bool {
    let doc_ref = doc.borrow();
    rows(doc).iter().all(|id| doc_ref.has_decoration(*id, SELECTED))
}

#[tokio::test(start_paused = true)]
async fn test_new_rows_are_marked_after_debounce() {
    LocalSet::new()
        .run_until(async {
            let doc = Document::parse(PAGE).into_shared();
            let session = SelectionSession::new(doc.clone(), PickerConfig::default()).into_shared();
            session.borrow_mut().enable();
            let task = tokio::task::spawn_local(reconcile_loop(session.clone()));
            sleep(Duration::from_millis(1)).await;

            let first = rows(&doc)[0];
            let chosen = session.borrow_mut().click(first).unwrap().chosen;
            assert_eq!(chosen.css_selector, ".row");

            let list = evaluate(&doc.borrow(), "#list", SelectorKind::Css).unwrap()[0];
            doc.borrow_mut().append_html(list, r#"<li class="row">b</li>"#);
            sleep(Duration::from_millis(100)).await;
            assert!(!all_selected(&doc));

            // a second mutation postpones the pass
            doc.borrow_mut().append_html(list, r#"<li class="row">c</li>"#);
            sleep(Duration::from_millis(250)).await;
            assert!(!all_selected(&doc));

            sleep(Duration::from_millis(100)).await;
            assert_eq!(rows(&doc).len(), 3);
            assert!(all_selected(&doc));

            session.borrow_mut().disable();
            task.await.unwrap();
            assert!(doc.borrow().decorated(SELECTED).is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_session_stops_reconciling() {
    LocalSet::new()
        .run_until(async {
            let doc = Document::parse(PAGE).into_shared();
            let session = SelectionSession::new(doc.clone(), PickerConfig::default()).into_shared();
            session.borrow_mut().enable();
            let task = tokio::task::spawn_local(reconcile_loop(session.clone()));
            sleep(Duration::from_millis(1)).await;

            let first = rows(&doc)[0];
            session.borrow_mut().click(first).unwrap();
            let list = evaluate(&doc.borrow(), "#list", SelectorKind::Css).unwrap()[0];
            doc.borrow_mut().append_html(list, r#"<li class="row">b</li>"#);

            session.borrow_mut().disable();
            task.await.unwrap();

            sleep(Duration::from_secs(1)).await;
            assert!(doc.borrow().decorated(SELECTED).is_empty());
        })
        .await;
}
