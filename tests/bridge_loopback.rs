use async_trait::async_trait;
use rowpicker::{
    evaluate, BridgeClient, ColumnSpec, Command, ContentAgent, Document, HostBridgeError,
    LoopbackTransport, PickerConfig, Response, SelectorKind, Transport,
};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

const PAGE: &str = r#"
<html>
<body>
    <table>
        <tr><td class="name">Widget</td><td class="price">9.99</td></tr>
        <tr><td class="name">Gadget</td><td class="price">19.50</td></tr>
    </table>
</body>
</html>
"#;

fn client() -> BridgeClient<LoopbackTransport> {
    let document = Document::parse(PAGE).into_shared();
    let (agent, _events) = ContentAgent::new(document, PickerConfig::default());
    let (transport, _service) = LoopbackTransport::spawn(agent);
    BridgeClient::with_config(transport, &PickerConfig::default())
}

/// Never answers
struct SilentTransport;

#[async_trait(?Send)]
impl Transport for SilentTransport {
    async fn send(&self, _command: Command) -> Result<Response, HostBridgeError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_ping_and_selection_toggle() {
    LocalSet::new()
        .run_until(async {
            let client = client();
            client.ping().await.unwrap();
            assert_eq!(client.enable_selection().await.unwrap(), Response::Ack);
            assert_eq!(client.disable_selection().await.unwrap(), Response::Ack);
        })
        .await;
}

#[tokio::test]
async fn test_invalid_selector_reports_zero_count() {
    LocalSet::new()
        .run_until(async {
            let client = client();
            let response = client.test_selector("###bad", SelectorKind::Css).await.unwrap();
            assert!(!response.is_success());

            let envelope = serde_json::to_value(&response).unwrap();
            assert_eq!(envelope["success"], false);
            assert_eq!(envelope["count"], 0);
            assert!(envelope["error"].is_string());

            let response = client.test_selector("//td[@class='price']", SelectorKind::Path).await.unwrap();
            assert_eq!(
                response,
                Response::Tested {
                    count: 2,
                    selector: "//td[@class='price']".to_string(),
                    kind: SelectorKind::Path,
                }
            );
        })
        .await;
}

#[tokio::test]
async fn test_scrape_over_bridge() {
    LocalSet::new()
        .run_until(async {
            let client = client();
            let response = client
                .scrape(vec![
                    ColumnSpec::css(".name", "name"),
                    ColumnSpec::css(".price", "price"),
                ])
                .await
                .unwrap();

            let envelope = serde_json::to_value(&response).unwrap();
            assert_eq!(
                envelope,
                serde_json::json!({
                    "success": true,
                    "count": 2,
                    "data": [
                        {"name": "Widget", "price": "9.99"},
                        {"name": "Gadget", "price": "19.50"}
                    ]
                })
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_host_times_out() {
    let client = BridgeClient::new(SilentTransport, Duration::from_millis(5000));
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, HostBridgeError::Timeout(5000)));
}

#[tokio::test]
async fn test_stopped_agent_is_disconnected() {
    LocalSet::new()
        .run_until(async {
            let document = Document::parse(PAGE).into_shared();
            let (agent, _events) = ContentAgent::new(document, PickerConfig::default());
            let (transport, service) = LoopbackTransport::spawn(agent);
            service.abort();
            let _ = service.await;

            let client = BridgeClient::new(transport, Duration::from_secs(1));
            let err = client.ping().await.unwrap_err();
            assert!(matches!(err, HostBridgeError::Disconnected));
        })
        .await;
}

const LIST: &str = r#"<ul id="list"><li class="row">a</li></ul>"#;

#[tokio::test(start_paused = true)]
async fn test_enable_over_bridge_starts_reconciliation() {
    LocalSet::new()
        .run_until(async {
            let document = Document::parse(LIST).into_shared();
            let (agent, _events) = ContentAgent::new(document, PickerConfig::default());
            let session = agent.session().clone();
            let doc = agent.document().clone();
            let (transport, _service) = LoopbackTransport::spawn(agent);
            let client = BridgeClient::new(transport, Duration::from_secs(5));

            client.enable_selection().await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;

            let first = evaluate(&doc.borrow(), "li", SelectorKind::Css).unwrap()[0];
            session.borrow_mut().click(first).unwrap();
            let list = evaluate(&doc.borrow(), "#list", SelectorKind::Css).unwrap()[0];
            let added = doc.borrow_mut().append_html(list, r#"<li class="row">b</li>"#);

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!doc.borrow().has_decoration(added[0], "rowpicker-selected"));
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(doc.borrow().has_decoration(added[0], "rowpicker-selected"));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_selection_toggles_keep_one_reconcile_task() {
    LocalSet::new()
        .run_until(async {
            let document = Document::parse(LIST).into_shared();
            let (agent, _events) = ContentAgent::new(document, PickerConfig::default());
            let session = agent.session().clone();
            let (transport, _service) = LoopbackTransport::spawn(agent);
            let client = BridgeClient::new(transport, Duration::from_secs(5));

            for _ in 0..3 {
                client.enable_selection().await.unwrap();
                client.disable_selection().await.unwrap();
            }
            client.enable_selection().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;

            // this handle, the agent's, and the one running reconcile task
            assert_eq!(Rc::strong_count(&session), 3);

            client.disable_selection().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(Rc::strong_count(&session), 2);
        })
        .await;
}
