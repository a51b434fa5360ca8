//! Present an event-driven application as a blocking one.
//!
//! # Responsibilities
//! - Assemble the event-side scope from the caller's environ
//! - Run the application as a task on the shared scheduler
//! - Feed request body chunks on demand, paced by the task's `receive`
//! - Yield response body chunks as a blocking iterator paced by `send`
//! - Bound post-response task lifetime with `wait_time`
//!
//! # Design Decisions
//! - The demand signal travels through the same stream as response events,
//!   so the driving thread waits in exactly one place and interleaves
//!   feeding with draining.
//! - At most one demand is outstanding, so the feed push never blocks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::asgi::{
    status_line, AsgiApp, AsgiReceiver, AsgiSender, EventSink, EventSource, RequestEvent,
    ResponseEvent, ScopeKind,
};
use crate::bridge::event_loop::EventLoop;
use crate::config::{validate_asgi_config, AsgiBridgeConfig, ValidationError};
use crate::error::BridgeError;
use crate::stream::{
    async_to_sync, sync_to_async, AsyncConsumer, AsyncProducer, SyncConsumer, SyncProducer,
    TryNext,
};
use crate::translate::{decode_latin1, scope_from_environ};
use crate::wsgi::{BodyIter, Environ, InputStream, StartResponse, WsgiApp};

/// Adapter invocable as a blocking application, dispatching each request to
/// an event-driven application on a shared scheduler.
///
/// The calling thread must not itself sit on a scheduler: response pacing
/// enters the runtime through blocking waits.
pub struct AsgiToWsgi<A> {
    app: Arc<A>,
    event_loop: EventLoop,
    wait_time: Option<Duration>,
    send_queue_size: usize,
    request_chunk_size: usize,
}

impl<A: AsgiApp> AsgiToWsgi<A> {
    /// Wrap `app`, lazily starting a dedicated background scheduler.
    pub fn new(app: A) -> Self {
        Self::from_config(app, AsgiBridgeConfig::default(), EventLoop::owned())
    }

    pub fn with_config(app: A, config: AsgiBridgeConfig) -> Result<Self, Vec<ValidationError>> {
        validate_asgi_config(&config)?;
        Ok(Self::from_config(app, config, EventLoop::owned()))
    }

    /// Wrap `app` on a caller-supplied scheduler, which is never started or
    /// stopped by the adapter.
    pub fn with_handle(app: A, handle: Handle) -> Self {
        Self::from_config(app, AsgiBridgeConfig::default(), EventLoop::external(handle))
    }

    pub fn with_handle_and_config(
        app: A,
        handle: Handle,
        config: AsgiBridgeConfig,
    ) -> Result<Self, Vec<ValidationError>> {
        validate_asgi_config(&config)?;
        Ok(Self::from_config(app, config, EventLoop::external(handle)))
    }

    fn from_config(app: A, config: AsgiBridgeConfig, event_loop: EventLoop) -> Self {
        Self {
            app: Arc::new(app),
            event_loop,
            wait_time: config.wait_time(),
            send_queue_size: config.send_queue_size,
            request_chunk_size: config.request_chunk_size,
        }
    }
}

impl<A: AsgiApp> WsgiApp for AsgiToWsgi<A> {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut dyn StartResponse,
    ) -> Result<BodyIter, BridgeError> {
        let request_id = Uuid::new_v4();
        counter!("bridge_requests_total", "direction" => "asgi_to_wsgi").increment(1);

        let scope = scope_from_environ(environ);
        tracing::debug!(
            request_id = %request_id,
            method = %scope.method,
            path = %scope.path,
            "dispatching request to event-driven application"
        );
        environ.set_scope(Arc::new(scope.clone()));

        let content_length = environ.content_length();
        let input = environ.take_input();
        let handle = self.event_loop.handle()?;

        let (req_tx, req_rx) = sync_to_async::<RequestEvent>(self.send_queue_size);
        let (resp_tx, resp_rx) = async_to_sync::<DriverEvent>(self.send_queue_size);

        let receiver = AsgiReceiver::new(Box::new(DemandSource {
            rx: req_rx,
            demand: resp_tx.clone(),
        }));
        let sender = AsgiSender::new(
            Box::new(DriverSink {
                tx: resp_tx.clone(),
            }),
            ScopeKind::Http,
        );

        let app = self.app.clone();
        let task = handle.spawn(async move {
            let result = app.call(scope, receiver, sender).await;
            match &result {
                Ok(()) => resp_tx.close(),
                Err(error) => resp_tx.close_with(error.clone()),
            }
            result
        });

        let mut driver = ResponseDriver {
            request_id,
            handle,
            resp_rx,
            feeder: BodyFeeder {
                input,
                tx: Some(req_tx),
                remaining: content_length,
                chunk_size: self.request_chunk_size,
            },
            task: Some(task),
            wait_time: self.wait_time,
            state: DriverState::AwaitingStart,
            pending_error: None,
        };

        match driver.wait_for_start() {
            Ok((status, headers)) => {
                let headers: Vec<(String, String)> = headers
                    .iter()
                    .map(|(name, value)| (decode_latin1(name), decode_latin1(value)))
                    .collect();
                start_response.call(&status_line(status), &headers, None)?;
                Ok(Box::new(driver))
            }
            Err(error) => {
                counter!("bridge_app_errors_total", "direction" => "asgi_to_wsgi").increment(1);
                tracing::error!(
                    request_id = %request_id,
                    error = %error,
                    "event-driven application failed before response start"
                );
                Err(error)
            }
        }
    }
}

/// Everything the driving thread can be woken for.
enum DriverEvent {
    Response(ResponseEvent),
    /// The task's `receive` found its queue empty and wants one more chunk.
    FeedRequest,
}

/// `receive` backing: pull from the request stream, demanding a chunk from
/// the driving thread whenever the queue runs dry.
struct DemandSource {
    rx: AsyncConsumer<RequestEvent>,
    demand: AsyncProducer<DriverEvent>,
}

#[async_trait]
impl EventSource for DemandSource {
    async fn next(&mut self) -> Result<Option<RequestEvent>, BridgeError> {
        match self.rx.try_next() {
            TryNext::Item(event) => Ok(Some(event)),
            TryNext::Eof => Ok(None),
            TryNext::Failed(error) => Err(error),
            TryNext::Empty => {
                if self.demand.put(DriverEvent::FeedRequest).await.is_err() {
                    // The driving thread is gone; no more body will come.
                    return Err(BridgeError::Disconnected);
                }
                self.rx.next().await
            }
        }
    }
}

/// `send` backing: response events share the driver stream with demand
/// signals.
struct DriverSink {
    tx: AsyncProducer<DriverEvent>,
}

#[async_trait]
impl EventSink for DriverSink {
    async fn send(&mut self, event: ResponseEvent) -> Result<(), BridgeError> {
        self.tx.put(DriverEvent::Response(event)).await
    }
}

/// Reads the caller's input stream one chunk per demand, on the driving
/// thread, tracking the declared content length.
struct BodyFeeder {
    input: InputStream,
    tx: Option<SyncProducer<RequestEvent>>,
    remaining: Option<u64>,
    chunk_size: usize,
}

impl BodyFeeder {
    fn feed_one(&mut self) {
        let Some(tx) = self.tx.as_mut() else {
            return;
        };
        let want = match self.remaining {
            Some(remaining) => remaining.min(self.chunk_size as u64) as usize,
            None => self.chunk_size,
        };
        let chunk = if want == 0 {
            Bytes::new()
        } else {
            match self.input.read(Some(want)) {
                Ok(chunk) => chunk,
                Err(error) => {
                    tx.close_with(error);
                    self.tx = None;
                    return;
                }
            }
        };
        let eof = chunk.is_empty()
            || self
                .remaining
                .map_or(false, |remaining| chunk.len() as u64 >= remaining);
        if let Some(remaining) = &mut self.remaining {
            *remaining = remaining.saturating_sub(chunk.len() as u64);
        }
        let delivered = tx.put(RequestEvent::Body {
            body: chunk,
            more_body: !eof,
        });
        if eof || delivered.is_err() {
            if let Some(mut tx) = self.tx.take() {
                tx.close();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    AwaitingStart,
    Streaming,
    Finished,
}

/// Blocking response iterator: drains the driver stream, serving demand
/// signals between body chunks, and settles the task when the response
/// closes.
struct ResponseDriver {
    request_id: Uuid,
    handle: Handle,
    resp_rx: SyncConsumer<DriverEvent>,
    feeder: BodyFeeder,
    task: Option<JoinHandle<Result<(), BridgeError>>>,
    wait_time: Option<Duration>,
    state: DriverState,
    pending_error: Option<BridgeError>,
}

impl ResponseDriver {
    fn next_event(&mut self) -> Result<Option<ResponseEvent>, BridgeError> {
        loop {
            match self.resp_rx.next(None)? {
                Some(DriverEvent::FeedRequest) => self.feeder.feed_one(),
                Some(DriverEvent::Response(event)) => return Ok(Some(event)),
                None => return Ok(None),
            }
        }
    }

    fn wait_for_start(&mut self) -> Result<(u16, Vec<(Bytes, Bytes)>), BridgeError> {
        match self.next_event() {
            Ok(Some(ResponseEvent::Start {
                status, headers, ..
            })) => {
                self.state = DriverState::Streaming;
                Ok((status, headers))
            }
            Ok(Some(_)) => {
                self.state = DriverState::Finished;
                self.abort_task();
                Err(BridgeError::protocol("response body before start"))
            }
            Ok(None) => {
                self.state = DriverState::Finished;
                let error = self.finish_task().unwrap_or_else(|| {
                    BridgeError::protocol("application completed without a response")
                });
                Err(error)
            }
            Err(error) => {
                self.state = DriverState::Finished;
                let _ = self.finish_task();
                Err(error)
            }
        }
    }

    /// Join the application task, bounded by `wait_time`; on expiry the task
    /// is cancelled. Cancellation is logged, never surfaced.
    fn finish_task(&mut self) -> Option<BridgeError> {
        let task = self.task.take()?;
        let wait_time = self.wait_time;
        let joined = self.handle.block_on(async move {
            let mut task = task;
            match wait_time {
                None => Some((&mut task).await),
                Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                    Ok(result) => Some(result),
                    Err(_) => {
                        task.abort();
                        let _ = (&mut task).await;
                        None
                    }
                },
            }
        });
        match joined {
            None => {
                tracing::warn!(
                    request_id = %self.request_id,
                    "application task cancelled after wait deadline"
                );
                None
            }
            Some(Ok(Ok(()))) => None,
            Some(Ok(Err(error))) => Some(error),
            Some(Err(join_error)) => {
                if join_error.is_cancelled() {
                    tracing::debug!(
                        request_id = %self.request_id,
                        "application task cancelled"
                    );
                    None
                } else {
                    Some(BridgeError::scheduler(format!(
                        "application task panicked: {join_error}"
                    )))
                }
            }
        }
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Iterator for ResponseDriver {
    type Item = Result<Bytes, BridgeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            DriverState::Finished => return self.pending_error.take().map(Err),
            DriverState::AwaitingStart => {
                return Some(Err(BridgeError::protocol(
                    "response iterated before start",
                )));
            }
            DriverState::Streaming => {}
        }
        match self.next_event() {
            Ok(Some(ResponseEvent::Body { body, more_body })) => {
                if more_body {
                    Some(Ok(body))
                } else {
                    self.state = DriverState::Finished;
                    self.pending_error = self.finish_task();
                    if body.is_empty() {
                        self.pending_error.take().map(Err)
                    } else {
                        Some(Ok(body))
                    }
                }
            }
            Ok(Some(_)) => {
                self.state = DriverState::Finished;
                self.abort_task();
                Some(Err(BridgeError::protocol(
                    "unexpected response event after start",
                )))
            }
            Ok(None) => {
                self.state = DriverState::Finished;
                let error = self.finish_task().unwrap_or_else(|| {
                    BridgeError::protocol("response truncated before terminal body")
                });
                Some(Err(error))
            }
            Err(error) => {
                self.state = DriverState::Finished;
                let _ = self.finish_task();
                Some(Err(error))
            }
        }
    }
}

impl Drop for ResponseDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(
                request_id = %self.request_id,
                "response iterator dropped before completion"
            );
        }
    }
}
