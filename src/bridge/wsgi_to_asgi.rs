//! Present a blocking application as an event-driven one.
//!
//! # Responsibilities
//! - Assemble the blocking-side environ from the incoming scope
//! - Run the application on the bounded worker pool
//! - Pump request body messages into the worker's input stream
//! - Pump response artifacts back out as typed response messages
//! - Handle peer disconnects and the lifespan handshake
//!
//! # Design Decisions
//! - The response start is queued, not sent: the first body chunk (or
//!   iterator exhaustion) flushes it, which is what lets a later
//!   `exc_info` replace a pending start.
//! - Request and response pumps never run application code; the worker
//!   thread never touches the event loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::asgi::{
    AsgiApp, AsgiReceiver, AsgiSender, RequestEvent, ResponseEvent, Scope, ScopeKind,
};
use crate::config::{validate_wsgi_config, ValidationError, WsgiBridgeConfig};
use crate::error::BridgeError;
use crate::stream::{async_to_sync, sync_to_async, AsyncProducer, SyncProducer};
use crate::translate::{encode_latin1, environ_from_scope};
use crate::wsgi::{Environ, InputStream, StartResponse, WsgiApp};

/// How long a disconnected request waits for its worker to notice.
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Adapter invocable as an event-driven application, dispatching each HTTP
/// request to a blocking application on a worker thread.
pub struct WsgiToAsgi<A> {
    app: Arc<A>,
    workers: Arc<Semaphore>,
    send_queue_size: usize,
}

impl<A: WsgiApp> WsgiToAsgi<A> {
    pub fn new(app: A) -> Self {
        Self::from_config(app, WsgiBridgeConfig::default())
    }

    pub fn with_config(app: A, config: WsgiBridgeConfig) -> Result<Self, Vec<ValidationError>> {
        validate_wsgi_config(&config)?;
        Ok(Self::from_config(app, config))
    }

    fn from_config(app: A, config: WsgiBridgeConfig) -> Self {
        Self {
            app: Arc::new(app),
            workers: Arc::new(Semaphore::new(config.workers)),
            send_queue_size: config.send_queue_size,
        }
    }

    async fn handle_http(
        &self,
        scope: Scope,
        receive: AsgiReceiver,
        mut send: AsgiSender,
    ) -> Result<(), BridgeError> {
        let request_id = Uuid::new_v4();
        counter!("bridge_requests_total", "direction" => "wsgi_to_asgi").increment(1);
        tracing::debug!(
            request_id = %request_id,
            method = %scope.method,
            path = %scope.path,
            "dispatching request to blocking application"
        );

        let (req_tx, req_rx) = async_to_sync::<Bytes>(self.send_queue_size);
        let (resp_tx, mut resp_rx) = sync_to_async::<ResponseArtifact>(self.send_queue_size);

        let mut environ = environ_from_scope(&scope, InputStream::from_channel(req_rx));
        let mut scope = scope;
        scope.environ = Some(environ.fields().clone().into_iter().collect());
        environ.set_scope(Arc::new(scope));

        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::scheduler("worker pool closed"))?;
        let app = self.app.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_worker(app, environ, resp_tx)
        });

        let mut pump = tokio::spawn(pump_request(receive, req_tx));
        let mut pump_done = false;
        let mut disconnected = false;
        let mut started = false;
        let mut send_error: Option<BridgeError> = None;

        loop {
            tokio::select! {
                drain = &mut pump, if !pump_done => {
                    pump_done = true;
                    match drain {
                        Ok(RequestDrain::Eof) => {}
                        Ok(RequestDrain::Disconnected) => {
                            disconnected = true;
                            break;
                        }
                        Err(join_error) => {
                            tracing::warn!(
                                request_id = %request_id,
                                error = %join_error,
                                "request pump failed"
                            );
                            disconnected = true;
                            break;
                        }
                    }
                }
                artifact = resp_rx.next() => { match artifact {
                    Ok(Some(ResponseArtifact::Start { status, headers })) => {
                        let sent = send
                            .send(ResponseEvent::Start {
                                status,
                                headers,
                                trailers: false,
                            })
                            .await;
                        match sent {
                            Ok(()) => started = true,
                            Err(error) => {
                                send_error = Some(error);
                                break;
                            }
                        }
                    }
                    Ok(Some(ResponseArtifact::Chunk(body))) => {
                        let sent = send
                            .send(ResponseEvent::Body {
                                body,
                                more_body: true,
                            })
                            .await;
                        if let Err(error) = sent {
                            send_error = Some(error);
                            break;
                        }
                    }
                    Ok(None) => {
                        if started {
                            let sent = send
                                .send(ResponseEvent::Body {
                                    body: Bytes::new(),
                                    more_body: false,
                                })
                                .await;
                            if let Err(error) = sent {
                                send_error = Some(error);
                            }
                        }
                        break;
                    }
                    Err(_) => {
                        // The worker carries the authoritative error; a
                        // started response still gets its terminal message.
                        if started {
                            let _ = send
                                .send(ResponseEvent::Body {
                                    body: Bytes::new(),
                                    more_body: false,
                                })
                                .await;
                        }
                        break;
                    }
                } }
            }
        }

        if !pump_done {
            pump.abort();
        }

        if let Some(error) = send_error {
            // The event side stopped accepting messages; unwind the worker
            // the same way a disconnect would.
            drop(resp_rx);
            let _ = tokio::time::timeout(DISCONNECT_GRACE, worker).await;
            return Err(error);
        }

        if disconnected {
            counter!("bridge_disconnects_total", "direction" => "wsgi_to_asgi").increment(1);
            tracing::debug!(request_id = %request_id, "peer disconnected mid-request");
            // Stop draining so a blocked worker fails fast on its next put.
            drop(resp_rx);
            match tokio::time::timeout(DISCONNECT_GRACE, worker).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(error))) => {
                    tracing::debug!(
                        request_id = %request_id,
                        error = %error,
                        "worker unwound after disconnect"
                    );
                }
                Ok(Err(join_error)) => {
                    tracing::warn!(
                        request_id = %request_id,
                        error = %join_error,
                        "worker panicked after disconnect"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        request_id = %request_id,
                        "worker still running after disconnect grace period"
                    );
                }
            }
            return Ok(());
        }

        let worker_result = worker
            .await
            .map_err(|e| BridgeError::scheduler(format!("worker thread failed: {e}")))?;
        if let Err(error) = worker_result {
            counter!("bridge_app_errors_total", "direction" => "wsgi_to_asgi").increment(1);
            tracing::error!(
                request_id = %request_id,
                error = %error,
                response_started = started,
                "blocking application failed"
            );
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl<A: WsgiApp> AsgiApp for WsgiToAsgi<A> {
    async fn call(
        &self,
        scope: Scope,
        receive: AsgiReceiver,
        send: AsgiSender,
    ) -> Result<(), BridgeError> {
        match scope.kind {
            ScopeKind::Http => self.handle_http(scope, receive, send).await,
            ScopeKind::Lifespan => handle_lifespan(receive, send).await,
        }
    }
}

/// Acknowledge the startup/shutdown handshake without involving the
/// blocking application.
async fn handle_lifespan(
    mut receive: AsgiReceiver,
    mut send: AsgiSender,
) -> Result<(), BridgeError> {
    loop {
        match receive.next().await? {
            RequestEvent::LifespanStartup => {
                send.send(ResponseEvent::LifespanStartupComplete).await?;
            }
            RequestEvent::LifespanShutdown => {
                send.send(ResponseEvent::LifespanShutdownComplete).await?;
                return Ok(());
            }
            RequestEvent::Disconnect => return Ok(()),
            RequestEvent::Body { .. } => {
                return Err(BridgeError::protocol("http request event in lifespan scope"));
            }
        }
    }
}

enum RequestDrain {
    Eof,
    Disconnected,
}

/// Feed request body chunks into the worker's input stream until the body
/// ends or the peer goes away.
async fn pump_request(mut receive: AsgiReceiver, req_tx: AsyncProducer<Bytes>) -> RequestDrain {
    loop {
        match receive.next().await {
            Ok(RequestEvent::Body { body, more_body }) => {
                if !body.is_empty() && req_tx.put(body).await.is_err() {
                    // The worker stopped reading; the rest of the body is moot.
                    return RequestDrain::Eof;
                }
                if !more_body {
                    req_tx.close();
                    return RequestDrain::Eof;
                }
            }
            Ok(RequestEvent::Disconnect) => {
                req_tx.close_with(BridgeError::Disconnected);
                return RequestDrain::Disconnected;
            }
            Ok(_) => {
                req_tx.close_with(BridgeError::protocol("lifespan event in http scope"));
                return RequestDrain::Disconnected;
            }
            Err(error) => {
                req_tx.close_with(error);
                return RequestDrain::Disconnected;
            }
        }
    }
}

/// Artifacts crossing from the worker thread to the response pump.
enum ResponseArtifact {
    Start {
        status: u16,
        headers: Vec<(Bytes, Bytes)>,
    },
    Chunk(Bytes),
}

/// Worker-thread body: invoke the application and drain its iterator into
/// the response stream.
fn run_worker<A: WsgiApp>(
    app: Arc<A>,
    mut environ: Environ,
    resp_tx: SyncProducer<ResponseArtifact>,
) -> Result<(), BridgeError> {
    let mut starter = ResponseStarter::new(resp_tx);
    let run = (|| -> Result<(), BridgeError> {
        let iter = app.call(&mut environ, &mut starter)?;
        for chunk in iter {
            starter.write(chunk?)?;
        }
        Ok(())
    })();
    match run {
        Ok(()) => starter.finish(),
        Err(error) => {
            starter.fail(error.clone());
            Err(error)
        }
    }
}

/// The `start_response` callable handed to the blocking application.
///
/// Holds the response start until the first body chunk forces a flush.
struct ResponseStarter {
    tx: SyncProducer<ResponseArtifact>,
    pending: Option<(u16, Vec<(Bytes, Bytes)>)>,
    flushed: bool,
}

impl ResponseStarter {
    fn new(tx: SyncProducer<ResponseArtifact>) -> Self {
        Self {
            tx,
            pending: None,
            flushed: false,
        }
    }

    fn parse_status(status: &str) -> Result<u16, BridgeError> {
        let code = status.split(' ').next().unwrap_or(status);
        code.parse()
            .map_err(|_| BridgeError::protocol(format!("invalid status line {status:?}")))
    }

    fn encode_headers(headers: &[(String, String)]) -> Result<Vec<(Bytes, Bytes)>, BridgeError> {
        headers
            .iter()
            .map(|(name, value)| {
                Ok((
                    encode_latin1(&name.trim().to_ascii_lowercase())?,
                    encode_latin1(value.trim())?,
                ))
            })
            .collect()
    }

    fn flush_start(&mut self) -> Result<(), BridgeError> {
        if let Some((status, headers)) = self.pending.take() {
            self.tx.put(ResponseArtifact::Start { status, headers })?;
            self.flushed = true;
        }
        Ok(())
    }

    fn write(&mut self, chunk: Bytes) -> Result<(), BridgeError> {
        if !self.flushed && self.pending.is_none() {
            return Err(BridgeError::protocol("response body before start_response"));
        }
        self.flush_start()?;
        self.tx.put(ResponseArtifact::Chunk(chunk))
    }

    fn finish(&mut self) -> Result<(), BridgeError> {
        if !self.flushed && self.pending.is_none() {
            let error =
                BridgeError::protocol("application finished without calling start_response");
            self.tx.close_with(error.clone());
            return Err(error);
        }
        self.flush_start()?;
        self.tx.close();
        Ok(())
    }

    fn fail(&mut self, error: BridgeError) {
        self.tx.close_with(error);
    }
}

impl StartResponse for ResponseStarter {
    fn call(
        &mut self,
        status: &str,
        headers: &[(String, String)],
        exc_info: Option<BridgeError>,
    ) -> Result<(), BridgeError> {
        if let Some(error) = exc_info {
            if self.flushed {
                // Body chunks are already on the wire; re-raise in the worker.
                return Err(error);
            }
            self.pending = Some((Self::parse_status(status)?, Self::encode_headers(headers)?));
            return Ok(());
        }
        if self.flushed || self.pending.is_some() {
            return Err(BridgeError::protocol("start_response called twice"));
        }
        self.pending = Some((Self::parse_status(status)?, Self::encode_headers(headers)?));
        Ok(())
    }
}
