//! Event-driven application contract.
//!
//! # Responsibilities
//! - Define the per-request scope and the typed messages exchanged over the
//!   `receive`/`send` queues
//! - Enforce the response-emission state machine on the sending side
//! - Provide the application trait the event-driven side programs against
//!
//! All header names and values, body payloads and the raw path are bytes,
//! never text. Header names are lower-case.

mod status;

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BridgeError;

pub use status::{status_line, status_phrase};

/// Connection class of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// A single HTTP request.
    Http,
    /// The server's startup/shutdown handshake.
    Lifespan,
}

/// Per-request metadata handed to an event-driven application.
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    /// HTTP version without the `HTTP/` prefix, e.g. `"1.1"`.
    pub http_version: String,
    /// Upper-case request method.
    pub method: String,
    pub scheme: String,
    /// Percent-decoded path.
    pub path: String,
    /// Undecoded path bytes, when the transport preserved them.
    pub raw_path: Option<Bytes>,
    /// Query string bytes, without the leading `?`.
    pub query_string: Bytes,
    /// Mount prefix the application lives under.
    pub root_path: String,
    /// Ordered `(name, value)` pairs; names are lower-case bytes.
    pub headers: Vec<(Bytes, Bytes)>,
    pub client: Option<(String, u16)>,
    pub server: Option<(String, u16)>,
    /// Snapshot of the originating blocking-side request mapping, when this
    /// scope was produced by the bridge. String fields only; it never holds
    /// the request's streams.
    pub environ: Option<HashMap<String, String>>,
}

impl Scope {
    /// An HTTP scope with empty defaults, for tests and embedding servers.
    pub fn http(method: &str, path: &str) -> Self {
        Self {
            kind: ScopeKind::Http,
            http_version: "1.1".to_string(),
            method: method.to_uppercase(),
            scheme: "http".to_string(),
            path: path.to_string(),
            raw_path: None,
            query_string: Bytes::new(),
            root_path: String::new(),
            headers: Vec::new(),
            client: None,
            server: None,
            environ: None,
        }
    }

    pub fn lifespan() -> Self {
        Self {
            kind: ScopeKind::Lifespan,
            ..Self::http("GET", "")
        }
    }
}

/// Messages delivered to the application over `receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// A request body chunk. `more_body: false` is terminal.
    Body { body: Bytes, more_body: bool },
    /// The peer went away, or the request is over.
    Disconnect,
    LifespanStartup,
    LifespanShutdown,
}

/// Messages the application emits over `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    /// Response status and headers. Must precede any body.
    Start {
        status: u16,
        headers: Vec<(Bytes, Bytes)>,
        trailers: bool,
    },
    /// A response body chunk. `more_body: false` closes the response.
    Body { body: Bytes, more_body: bool },
    LifespanStartupComplete,
    LifespanShutdownComplete,
}

/// An event-driven application: a task exchanging messages with the server
/// through the two handles.
#[async_trait]
pub trait AsgiApp: Send + Sync + 'static {
    async fn call(
        &self,
        scope: Scope,
        receive: AsgiReceiver,
        send: AsgiSender,
    ) -> Result<(), BridgeError>;
}

/// Where a receiver's events come from. Implemented by the bridge and by
/// embedding servers.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the request stream is exhausted.
    async fn next(&mut self) -> Result<Option<RequestEvent>, BridgeError>;
}

/// The application's `receive` handle.
pub struct AsgiReceiver {
    source: Box<dyn EventSource>,
}

impl AsgiReceiver {
    pub fn new(source: Box<dyn EventSource>) -> Self {
        Self { source }
    }

    /// A receiver that replays a fixed sequence of events, then reports
    /// disconnection. Useful in tests and single-shot servers.
    pub fn from_events(events: Vec<RequestEvent>) -> Self {
        Self::new(Box::new(ScriptedSource {
            events: events.into(),
        }))
    }

    /// Await the next request event. Stream exhaustion is reported as
    /// [`RequestEvent::Disconnect`], matching peers that hang up after the
    /// final body chunk.
    pub async fn next(&mut self) -> Result<RequestEvent, BridgeError> {
        match self.source.next().await? {
            Some(event) => Ok(event),
            None => Ok(RequestEvent::Disconnect),
        }
    }
}

struct ScriptedSource {
    events: VecDeque<RequestEvent>,
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next(&mut self) -> Result<Option<RequestEvent>, BridgeError> {
        Ok(self.events.pop_front())
    }
}

/// Where a sender's events go. Implemented by the bridge and by embedding
/// servers.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: ResponseEvent) -> Result<(), BridgeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    Pending,
    Started,
    Closed,
}

/// The application's `send` handle. Enforces the response state machine so
/// protocol violations surface to the side that committed them.
pub struct AsgiSender {
    sink: Box<dyn EventSink>,
    kind: ScopeKind,
    state: ResponseState,
}

impl AsgiSender {
    pub fn new(sink: Box<dyn EventSink>, kind: ScopeKind) -> Self {
        Self {
            sink,
            kind,
            state: ResponseState::Pending,
        }
    }

    /// A sender that collects every event into an unbounded queue. Useful in
    /// tests and single-shot servers.
    pub fn capture(
        kind: ScopeKind,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<ResponseEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self::new(Box::new(CaptureSink { tx }), kind), rx)
    }

    pub async fn send(&mut self, event: ResponseEvent) -> Result<(), BridgeError> {
        self.check(&event)?;
        self.sink.send(event).await
    }

    fn check(&mut self, event: &ResponseEvent) -> Result<(), BridgeError> {
        match (self.kind, event) {
            (ScopeKind::Lifespan, ResponseEvent::LifespanStartupComplete)
            | (ScopeKind::Lifespan, ResponseEvent::LifespanShutdownComplete) => Ok(()),
            (ScopeKind::Lifespan, _) => Err(BridgeError::protocol(
                "http response event in lifespan scope",
            )),
            (ScopeKind::Http, ResponseEvent::LifespanStartupComplete)
            | (ScopeKind::Http, ResponseEvent::LifespanShutdownComplete) => {
                Err(BridgeError::protocol("lifespan event in http scope"))
            }
            (ScopeKind::Http, ResponseEvent::Start { trailers, .. }) => match self.state {
                ResponseState::Pending => {
                    if *trailers {
                        return Err(BridgeError::protocol("response trailers not supported"));
                    }
                    self.state = ResponseState::Started;
                    Ok(())
                }
                ResponseState::Started => {
                    Err(BridgeError::protocol("duplicate response start"))
                }
                ResponseState::Closed => {
                    Err(BridgeError::protocol("response start after completion"))
                }
            },
            (ScopeKind::Http, ResponseEvent::Body { more_body, .. }) => match self.state {
                ResponseState::Pending => {
                    Err(BridgeError::protocol("response body before start"))
                }
                ResponseState::Started => {
                    if !more_body {
                        self.state = ResponseState::Closed;
                    }
                    Ok(())
                }
                ResponseState::Closed => {
                    Err(BridgeError::protocol("response body after completion"))
                }
            },
        }
    }
}

struct CaptureSink {
    tx: tokio::sync::mpsc::UnboundedSender<ResponseEvent>,
}

#[async_trait]
impl EventSink for CaptureSink {
    async fn send(&mut self, event: ResponseEvent) -> Result<(), BridgeError> {
        self.tx.send(event).map_err(|_| BridgeError::Closed)
    }
}
