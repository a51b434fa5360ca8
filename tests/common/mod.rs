//! Shared applications and harness pieces for the bridge tests.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use appbridge::asgi::{
    AsgiApp, AsgiReceiver, AsgiSender, RequestEvent, ResponseEvent, Scope,
};
use appbridge::error::BridgeError;
use appbridge::wsgi::{BodyIter, Environ, InputStream, StartResponse, WsgiApp};

/// Invoke an event-driven app with a scripted request, collecting every
/// response event it emits.
pub async fn invoke_asgi(
    app: &impl AsgiApp,
    scope: Scope,
    events: Vec<RequestEvent>,
) -> (Result<(), BridgeError>, Vec<ResponseEvent>) {
    let receiver = AsgiReceiver::from_events(events);
    let (sender, mut collected_rx) = AsgiSender::capture(scope.kind);
    let result = app.call(scope, receiver, sender).await;
    let mut collected = Vec::new();
    while let Ok(event) = collected_rx.try_recv() {
        collected.push(event);
    }
    (result, collected)
}

/// Concatenate the body bytes out of a collected response, checking the
/// start-before-body ordering along the way.
pub fn response_body(events: &[ResponseEvent]) -> Bytes {
    let mut seen_start = false;
    let mut body = Vec::new();
    for event in events {
        match event {
            ResponseEvent::Start { .. } => {
                assert!(!seen_start, "duplicate response start");
                seen_start = true;
            }
            ResponseEvent::Body { body: chunk, .. } => {
                assert!(seen_start, "body before start");
                body.extend_from_slice(chunk);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    Bytes::from(body)
}

/// The status of a collected response's start event.
pub fn response_status(events: &[ResponseEvent]) -> u16 {
    match events.first() {
        Some(ResponseEvent::Start { status, .. }) => *status,
        other => panic!("expected response start, got {other:?}"),
    }
}

/// A `start_response` recorder for driving blocking callables directly.
#[derive(Default)]
pub struct RecordingStartResponse {
    pub status: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl StartResponse for RecordingStartResponse {
    fn call(
        &mut self,
        status: &str,
        headers: &[(String, String)],
        exc_info: Option<BridgeError>,
    ) -> Result<(), BridgeError> {
        if let Some(error) = exc_info {
            return Err(error);
        }
        self.status = Some(status.to_string());
        self.headers = headers.to_vec();
        Ok(())
    }
}

/// Build an environ the way a front server would, with an in-memory body.
pub fn environ_with_body(method: &str, path: &str, body: &'static [u8]) -> Environ {
    let mut environ = Environ::new(InputStream::from_reader(Box::new(body)));
    environ.insert("REQUEST_METHOD", method);
    environ.insert("SCRIPT_NAME", "");
    environ.insert("PATH_INFO", path);
    environ.insert("QUERY_STRING", "");
    environ.insert("SERVER_PROTOCOL", "HTTP/1.1");
    environ.insert("SERVER_NAME", "testserver");
    environ.insert("SERVER_PORT", "80");
    environ.insert("wsgi.url_scheme", "http");
    if !body.is_empty() {
        environ.insert("CONTENT_LENGTH", body.len().to_string());
    }
    environ
}

/// Blocking app answering `200 OK` with a fixed body.
pub struct HelloWsgi;

impl WsgiApp for HelloWsgi {
    fn call(
        &self,
        _environ: &mut Environ,
        start_response: &mut dyn StartResponse,
    ) -> Result<BodyIter, BridgeError> {
        let output = Bytes::from_static(b"Hello World!\n");
        start_response.call(
            "200 OK",
            &[
                ("Content-Type".to_string(), "text/plain; charset=utf-8".to_string()),
                ("Content-Length".to_string(), output.len().to_string()),
            ],
            None,
        )?;
        Ok(Box::new(std::iter::once(Ok(output))))
    }
}

/// Blocking app echoing its whole request body back.
pub struct EchoWsgi;

impl WsgiApp for EchoWsgi {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut dyn StartResponse,
    ) -> Result<BodyIter, BridgeError> {
        let body = environ.input().read(None)?;
        start_response.call(
            "200 OK",
            &[
                ("Content-Type".to_string(), "text/plain; charset=utf-8".to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
            ],
            None,
        )?;
        Ok(Box::new(std::iter::once(Ok(body))))
    }
}

/// Blocking app that drains and discards its input, then answers `ok`.
pub struct DiscardWsgi;

impl WsgiApp for DiscardWsgi {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut dyn StartResponse,
    ) -> Result<BodyIter, BridgeError> {
        // Read in bounded pieces; holding the whole body would defeat the test.
        loop {
            let chunk = environ.input().read(Some(16 * 1024))?;
            if chunk.is_empty() {
                break;
            }
        }
        start_response.call("200 OK", &[], None)?;
        Ok(Box::new(std::iter::once(Ok(Bytes::from_static(b"ok")))))
    }
}

/// Blocking app that fails before producing a response.
pub struct FailingWsgi;

impl WsgiApp for FailingWsgi {
    fn call(
        &self,
        _environ: &mut Environ,
        _start_response: &mut dyn StartResponse,
    ) -> Result<BodyIter, BridgeError> {
        Err(BridgeError::app("Something went wrong"))
    }
}

/// Blocking app that calls `start_response` twice without `exc_info`.
pub struct DoubleStartWsgi;

impl WsgiApp for DoubleStartWsgi {
    fn call(
        &self,
        _environ: &mut Environ,
        start_response: &mut dyn StartResponse,
    ) -> Result<BodyIter, BridgeError> {
        start_response.call("200 OK", &[], None)?;
        start_response.call("500 Internal Server Error", &[], None)?;
        Ok(Box::new(std::iter::empty()))
    }
}

/// Blocking app that records what its input stream does after the peer
/// disconnects mid-upload.
pub struct DisconnectProbeWsgi {
    pub remainder: Arc<Mutex<Option<Bytes>>>,
    pub observed: Arc<Mutex<Option<BridgeError>>>,
}

impl WsgiApp for DisconnectProbeWsgi {
    fn call(
        &self,
        environ: &mut Environ,
        _start_response: &mut dyn StartResponse,
    ) -> Result<BodyIter, BridgeError> {
        let remainder = environ.input().read(None)?;
        *self.remainder.lock().unwrap() = Some(remainder);
        match environ.input().read(None) {
            Ok(_) => Err(BridgeError::app("expected a disconnect error")),
            Err(error) => {
                *self.observed.lock().unwrap() = Some(error.clone());
                Err(error)
            }
        }
    }
}

/// Event-driven app answering `200 OK` with a fixed body.
pub struct HelloAsgi;

#[async_trait]
impl AsgiApp for HelloAsgi {
    async fn call(
        &self,
        _scope: Scope,
        _receive: AsgiReceiver,
        mut send: AsgiSender,
    ) -> Result<(), BridgeError> {
        send.send(ResponseEvent::Start {
            status: 200,
            headers: vec![(
                Bytes::from_static(b"content-type"),
                Bytes::from_static(b"text/plain"),
            )],
            trailers: false,
        })
        .await?;
        send.send(ResponseEvent::Body {
            body: Bytes::from_static(b"Hello, world!"),
            more_body: false,
        })
        .await?;
        Ok(())
    }
}

/// Event-driven app echoing its whole request body back.
pub struct EchoAsgi;

#[async_trait]
impl AsgiApp for EchoAsgi {
    async fn call(
        &self,
        _scope: Scope,
        mut receive: AsgiReceiver,
        mut send: AsgiSender,
    ) -> Result<(), BridgeError> {
        let mut body = Vec::new();
        loop {
            match receive.next().await? {
                RequestEvent::Body {
                    body: chunk,
                    more_body,
                } => {
                    body.extend_from_slice(&chunk);
                    if !more_body {
                        break;
                    }
                }
                RequestEvent::Disconnect => break,
                other => {
                    return Err(BridgeError::protocol(format!(
                        "unexpected event: {other:?}"
                    )))
                }
            }
        }
        send.send(ResponseEvent::Start {
            status: 200,
            headers: vec![(
                Bytes::from_static(b"content-length"),
                Bytes::from(body.len().to_string().into_bytes()),
            )],
            trailers: false,
        })
        .await?;
        send.send(ResponseEvent::Body {
            body: Bytes::from(body),
            more_body: false,
        })
        .await?;
        Ok(())
    }
}

/// Event-driven app that fails before responding.
pub struct FailingAsgi;

#[async_trait]
impl AsgiApp for FailingAsgi {
    async fn call(
        &self,
        _scope: Scope,
        _receive: AsgiReceiver,
        _send: AsgiSender,
    ) -> Result<(), BridgeError> {
        Err(BridgeError::app("Something went wrong"))
    }
}
