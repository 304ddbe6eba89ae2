//! Host bridge: JSON commands in, typed responses and events out
//!
//! Commands arrive as `{"action": "<verb>", ...}`. Every reply is an envelope
//! `{"success": bool, ...}`; on the Rust side replies are a typed
//! [`Response`] that converts to and from that envelope.

use async_trait::async_trait;
use ego_tree::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::config::PickerConfig;
use crate::document::SharedDocument;
use crate::error::HostBridgeError;
use crate::extractors::{count, extract_table, ColumnSpec, Dataset, SelectorKind};
use crate::selection::{
    reconcile_loop, ClickOutcome, ElementChosen, HoverLabel, SelectionSession, SharedSession,
};

/// Inbound command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    Ping,
    EnableSelection,
    DisableSelection,
    TestSelector {
        selector: String,
        #[serde(default, alias = "type")]
        kind: SelectorKind,
    },
    ScrapeData {
        #[serde(default)]
        elements: Vec<ColumnSpec>,
    },
}

/// Outbound, unsolicited event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BridgeEvent {
    ElementChosen(ElementChosen),
}

/// Typed reply to a [`Command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Envelope", try_from = "Envelope")]
pub enum Response {
    /// `ping`, `enableSelection`, `disableSelection`
    Ack,
    Tested {
        count: usize,
        selector: String,
        kind: SelectorKind,
    },
    TestFailed {
        error: String,
        kind: SelectorKind,
    },
    Scraped {
        data: Dataset,
    },
    ScrapeFailed {
        error: String,
    },
    /// Malformed or unknown command
    Rejected {
        error: String,
    },
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Response::Ack | Response::Tested { .. } | Response::Scraped { .. }
        )
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Response::TestFailed { error, .. }
            | Response::ScrapeFailed { error }
            | Response::Rejected { error } => Some(error),
            _ => None,
        }
    }
}

/// Wire shape shared by every reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SelectorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Dataset>,
}

impl From<Response> for Envelope {
    fn from(response: Response) -> Self {
        match response {
            Response::Ack => Envelope {
                success: true,
                ..Default::default()
            },
            Response::Tested {
                count,
                selector,
                kind,
            } => Envelope {
                success: true,
                count: Some(count),
                selector: Some(selector),
                kind: Some(kind),
                ..Default::default()
            },
            Response::TestFailed { error, kind } => Envelope {
                success: false,
                error: Some(error),
                count: Some(0),
                kind: Some(kind),
                ..Default::default()
            },
            Response::Scraped { data } => Envelope {
                success: true,
                count: Some(data.len()),
                data: Some(data),
                ..Default::default()
            },
            Response::ScrapeFailed { error } => Envelope {
                success: false,
                error: Some(error),
                data: Some(Vec::new()),
                ..Default::default()
            },
            Response::Rejected { error } => Envelope {
                success: false,
                error: Some(error),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<Envelope> for Response {
    type Error = String;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope {
            success,
            error,
            count,
            selector,
            kind,
            data,
        } = envelope;

        if success {
            return Ok(match (data, count, selector, kind) {
                (Some(data), _, _, _) => Response::Scraped { data },
                (None, Some(count), Some(selector), kind) => Response::Tested {
                    count,
                    selector,
                    kind: kind.unwrap_or_default(),
                },
                (None, None, None, None) => Response::Ack,
                _ => return Err("successful reply with an unrecognized payload".to_string()),
            });
        }

        let error = error.unwrap_or_default();
        Ok(match (data, kind) {
            (Some(_), _) => Response::ScrapeFailed { error },
            (None, Some(kind)) => Response::TestFailed { error, kind },
            (None, None) => Response::Rejected { error },
        })
    }
}

/// Only ordinary web pages (and local files) accept the content agent
pub fn check_page_allowed(url: &str) -> Result<Url, HostBridgeError> {
    let parsed = Url::parse(url).map_err(|_| HostBridgeError::DisallowedPage(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" | "file" => Ok(parsed),
        _ => Err(HostBridgeError::DisallowedPage(url.to_string())),
    }
}

/// Page-side endpoint: owns the selection session for one document
pub struct ContentAgent {
    document: SharedDocument,
    session: SharedSession,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl ContentAgent {
    /// Returns the agent and the receiving end of its event stream
    pub fn new(
        document: SharedDocument,
        config: PickerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = SelectionSession::new(document.clone(), config).into_shared();
        let agent = Self {
            document,
            session,
            events,
        };
        (agent, rx)
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn handle(&self, command: Command) -> Response {
        debug!("Handling command {:?}", command);
        match command {
            Command::Ping => Response::Ack,
            Command::EnableSelection => {
                self.session.borrow_mut().enable();
                Response::Ack
            }
            Command::DisableSelection => {
                self.session.borrow_mut().disable();
                Response::Ack
            }
            Command::TestSelector { selector, kind } => {
                let doc = self.document.borrow();
                match count(&doc, &selector, kind) {
                    Ok(count) => Response::Tested {
                        count,
                        selector,
                        kind,
                    },
                    Err(e) => Response::TestFailed {
                        error: e.to_string(),
                        kind,
                    },
                }
            }
            Command::ScrapeData { elements } => {
                let doc = self.document.borrow();
                let report = extract_table(&doc, &elements);
                // partial failures degrade to empty columns; only a total
                // failure is reported as one
                if !elements.is_empty() && report.failures.len() == elements.len() {
                    let error = report
                        .failures
                        .first()
                        .map(|f| f.error.clone())
                        .unwrap_or_default();
                    Response::ScrapeFailed { error }
                } else {
                    Response::Scraped { data: report.rows }
                }
            }
        }
    }

    /// Decode and handle one raw command
    pub fn handle_json(&self, raw: &str) -> Response {
        match serde_json::from_str::<Command>(raw) {
            Ok(command) => self.handle(command),
            Err(e) => {
                warn!("Rejected bridge message: {}", e);
                Response::Rejected {
                    error: format!("Malformed command: {}", e),
                }
            }
        }
    }

    pub fn pointer_move(&self, target: NodeId, x: f64, y: f64) -> Option<HoverLabel> {
        self.session.borrow_mut().pointer_move(target, x, y)
    }

    pub fn pointer_leave(&self) {
        self.session.borrow_mut().pointer_leave();
    }

    /// Forward a click; a chosen element is also published as an event
    pub fn click(&self, target: NodeId) -> Option<ClickOutcome> {
        let outcome = self.session.borrow_mut().click(target)?;
        if self
            .events
            .send(BridgeEvent::ElementChosen(outcome.chosen.clone()))
            .is_err()
        {
            debug!("No listener for elementChosen");
        }
        Some(outcome)
    }
}

/// Carries commands to a content agent and brings back its reply
#[async_trait(?Send)]
pub trait Transport {
    async fn send(&self, command: Command) -> Result<Response, HostBridgeError>;
}

/// Host-side caller with a bounded wait per round trip
pub struct BridgeClient<T: Transport> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> BridgeClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn with_config(transport: T, config: &PickerConfig) -> Self {
        Self::new(transport, config.bridge_timeout())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn request(&self, command: Command) -> Result<Response, HostBridgeError> {
        match tokio::time::timeout(self.timeout, self.transport.send(command)).await {
            Ok(result) => result,
            Err(_) => Err(HostBridgeError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Liveness probe
    pub async fn ping(&self) -> Result<(), HostBridgeError> {
        match self.request(Command::Ping).await? {
            Response::Ack => Ok(()),
            other => Err(HostBridgeError::Protocol(format!(
                "unexpected reply to ping: {:?}",
                other
            ))),
        }
    }

    pub async fn enable_selection(&self) -> Result<Response, HostBridgeError> {
        self.request(Command::EnableSelection).await
    }

    pub async fn disable_selection(&self) -> Result<Response, HostBridgeError> {
        self.request(Command::DisableSelection).await
    }

    pub async fn test_selector(
        &self,
        selector: &str,
        kind: SelectorKind,
    ) -> Result<Response, HostBridgeError> {
        self.request(Command::TestSelector {
            selector: selector.to_string(),
            kind,
        })
        .await
    }

    pub async fn scrape(&self, elements: Vec<ColumnSpec>) -> Result<Response, HostBridgeError> {
        self.request(Command::ScrapeData { elements }).await
    }
}

type Request = (Command, oneshot::Sender<Response>);

/// In-process transport: a `spawn_local` task services commands in order
pub struct LoopbackTransport {
    requests: mpsc::UnboundedSender<Request>,
}

impl LoopbackTransport {
    /// Start servicing `agent`. Must be called inside a `tokio::task::LocalSet`.
    pub fn spawn(agent: ContentAgent) -> (Self, JoinHandle<()>) {
        let (requests, mut rx) = mpsc::unbounded_channel::<Request>();
        let handle = tokio::task::spawn_local(async move {
            // at most one reconcile task, owned by the current enable period
            let mut reconciler: Option<JoinHandle<()>> = None;
            while let Some((command, reply)) = rx.recv().await {
                let enabling = matches!(command, Command::EnableSelection)
                    && !agent.session().borrow().is_active();
                let disabling = matches!(command, Command::DisableSelection);
                let response = agent.handle(command);
                if enabling || disabling {
                    if let Some(task) = reconciler.take() {
                        task.abort();
                    }
                }
                if enabling {
                    reconciler = Some(tokio::task::spawn_local(reconcile_loop(
                        agent.session().clone(),
                    )));
                }
                if reply.send(response).is_err() {
                    debug!("Requester went away before the reply");
                }
            }
            if let Some(task) = reconciler {
                task.abort();
            }
            debug!("Loopback transport closed");
        });
        (Self { requests }, handle)
    }
}

#[async_trait(?Send)]
impl Transport for LoopbackTransport {
    async fn send(&self, command: Command) -> Result<Response, HostBridgeError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send((command, reply))
            .map_err(|_| HostBridgeError::Disconnected)?;
        response.await.map_err(|_| HostBridgeError::MissingResponse)
    }
}
