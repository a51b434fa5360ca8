//! Integration tests for presenting an event-driven application as a
//! blocking one. The adapter is driven from plain test threads, the way a
//! front server's worker would call it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use appbridge::asgi::{AsgiApp, AsgiReceiver, AsgiSender, ResponseEvent, Scope};
use appbridge::config::AsgiBridgeConfig;
use appbridge::error::BridgeError;
use appbridge::wsgi::WsgiApp;
use appbridge::AsgiToWsgi;

mod common;
use common::*;

fn collect_body(iter: appbridge::wsgi::BodyIter) -> Vec<u8> {
    let mut body = Vec::new();
    for chunk in iter {
        body.extend_from_slice(&chunk.unwrap());
    }
    body
}

#[test]
fn get_returns_hello_world() {
    let adapter = AsgiToWsgi::new(HelloAsgi);
    let mut environ = environ_with_body("GET", "/", b"");
    let mut start_response = RecordingStartResponse::default();

    let iter = adapter.call(&mut environ, &mut start_response).unwrap();
    assert_eq!(collect_body(iter), b"Hello, world!");
    assert_eq!(start_response.status.as_deref(), Some("200 OK"));
    assert!(start_response
        .headers
        .contains(&("content-type".to_string(), "text/plain".to_string())));
}

#[test]
fn post_echoes_body_fed_on_demand() {
    // A small chunk size forces several demand/feed round trips.
    let adapter = AsgiToWsgi::with_config(
        EchoAsgi,
        AsgiBridgeConfig {
            request_chunk_size: 4,
            ..Default::default()
        },
    )
    .unwrap();
    let mut environ = environ_with_body("POST", "/", b"hi boy, hi girl");
    let mut start_response = RecordingStartResponse::default();

    let iter = adapter.call(&mut environ, &mut start_response).unwrap();
    assert_eq!(collect_body(iter), b"hi boy, hi girl");
    assert_eq!(start_response.status.as_deref(), Some("200 OK"));
}

#[test]
fn status_phrase_is_resolved() {
    struct TeapotAsgi;

    #[async_trait]
    impl AsgiApp for TeapotAsgi {
        async fn call(
            &self,
            _scope: Scope,
            _receive: AsgiReceiver,
            mut send: AsgiSender,
        ) -> Result<(), BridgeError> {
            send.send(ResponseEvent::Start {
                status: 418,
                headers: vec![],
                trailers: false,
            })
            .await?;
            send.send(ResponseEvent::Body {
                body: Bytes::new(),
                more_body: false,
            })
            .await?;
            Ok(())
        }
    }

    let adapter = AsgiToWsgi::new(TeapotAsgi);
    let mut environ = environ_with_body("GET", "/", b"");
    let mut start_response = RecordingStartResponse::default();

    let iter = adapter.call(&mut environ, &mut start_response).unwrap();
    assert!(collect_body(iter).is_empty());
    assert_eq!(start_response.status.as_deref(), Some("418 I'm a Teapot"));
}

#[test]
fn scope_is_built_from_environ() {
    struct ScopeProbe;

    #[async_trait]
    impl AsgiApp for ScopeProbe {
        async fn call(
            &self,
            scope: Scope,
            _receive: AsgiReceiver,
            mut send: AsgiSender,
        ) -> Result<(), BridgeError> {
            assert_eq!(scope.method, "GET");
            assert_eq!(scope.path, "/users");
            assert_eq!(scope.http_version, "1.1");
            assert!(scope.environ.is_some(), "environ snapshot missing");
            send.send(ResponseEvent::Start {
                status: 204,
                headers: vec![],
                trailers: false,
            })
            .await?;
            send.send(ResponseEvent::Body {
                body: Bytes::new(),
                more_body: false,
            })
            .await?;
            Ok(())
        }
    }

    let adapter = AsgiToWsgi::new(ScopeProbe);
    let mut environ = environ_with_body("GET", "/users", b"");
    let mut start_response = RecordingStartResponse::default();

    let iter = adapter.call(&mut environ, &mut start_response).unwrap();
    assert!(collect_body(iter).is_empty());
    assert_eq!(start_response.status.as_deref(), Some("204 No Content"));
    assert!(environ.scope().is_some(), "scope back-reference missing");
}

#[test]
fn pre_start_failure_reaches_the_caller() {
    let adapter = AsgiToWsgi::new(FailingAsgi);
    let mut environ = environ_with_body("GET", "/", b"");
    let mut start_response = RecordingStartResponse::default();

    match adapter.call(&mut environ, &mut start_response) {
        Err(BridgeError::App(message)) => assert!(message.contains("Something went wrong")),
        Ok(_) => panic!("expected app error, got Ok"),
        Err(other) => panic!("expected app error, got {other:?}"),
    }
    assert!(start_response.status.is_none());
}

#[test]
fn body_before_start_is_a_protocol_error() {
    struct EagerBody;

    #[async_trait]
    impl AsgiApp for EagerBody {
        async fn call(
            &self,
            _scope: Scope,
            _receive: AsgiReceiver,
            mut send: AsgiSender,
        ) -> Result<(), BridgeError> {
            send.send(ResponseEvent::Body {
                body: Bytes::from_static(b"too soon"),
                more_body: true,
            })
            .await
        }
    }

    let adapter = AsgiToWsgi::new(EagerBody);
    let mut environ = environ_with_body("GET", "/", b"");
    let mut start_response = RecordingStartResponse::default();

    match adapter.call(&mut environ, &mut start_response) {
        Err(BridgeError::Protocol(message)) => assert!(message.contains("before start")),
        Ok(_) => panic!("expected protocol violation, got Ok"),
        Err(other) => panic!("expected protocol violation, got {other:?}"),
    }
}

#[test]
fn truncated_response_surfaces_from_iterator() {
    struct Truncating;

    #[async_trait]
    impl AsgiApp for Truncating {
        async fn call(
            &self,
            _scope: Scope,
            _receive: AsgiReceiver,
            mut send: AsgiSender,
        ) -> Result<(), BridgeError> {
            send.send(ResponseEvent::Start {
                status: 200,
                headers: vec![],
                trailers: false,
            })
            .await?;
            send.send(ResponseEvent::Body {
                body: Bytes::from_static(b"partial"),
                more_body: true,
            })
            .await?;
            Ok(())
        }
    }

    let adapter = AsgiToWsgi::new(Truncating);
    let mut environ = environ_with_body("GET", "/", b"");
    let mut start_response = RecordingStartResponse::default();

    let mut iter = adapter.call(&mut environ, &mut start_response).unwrap();
    assert_eq!(&iter.next().unwrap().unwrap()[..], b"partial");
    match iter.next() {
        Some(Err(BridgeError::Protocol(message))) => {
            assert!(message.contains("truncated"), "got: {message}");
        }
        other => panic!("expected truncation error, got {other:?}"),
    }
    assert!(iter.next().is_none());
}

#[test]
fn post_response_failure_is_reraised_after_the_body() {
    struct FailsAfterBody;

    #[async_trait]
    impl AsgiApp for FailsAfterBody {
        async fn call(
            &self,
            _scope: Scope,
            _receive: AsgiReceiver,
            mut send: AsgiSender,
        ) -> Result<(), BridgeError> {
            send.send(ResponseEvent::Start {
                status: 200,
                headers: vec![],
                trailers: false,
            })
            .await?;
            send.send(ResponseEvent::Body {
                body: Bytes::from_static(b"done"),
                more_body: false,
            })
            .await?;
            Err(BridgeError::app("background work failed"))
        }
    }

    let adapter = AsgiToWsgi::new(FailsAfterBody);
    let mut environ = environ_with_body("GET", "/", b"");
    let mut start_response = RecordingStartResponse::default();

    let mut iter = adapter.call(&mut environ, &mut start_response).unwrap();
    assert_eq!(&iter.next().unwrap().unwrap()[..], b"done");
    match iter.next() {
        Some(Err(BridgeError::App(message))) => assert!(message.contains("background work")),
        other => panic!("expected app error, got {other:?}"),
    }
}

#[test]
fn wait_time_cancels_slow_background_work() {
    struct SlowFinish;

    #[async_trait]
    impl AsgiApp for SlowFinish {
        async fn call(
            &self,
            _scope: Scope,
            _receive: AsgiReceiver,
            mut send: AsgiSender,
        ) -> Result<(), BridgeError> {
            send.send(ResponseEvent::Start {
                status: 200,
                headers: vec![],
                trailers: false,
            })
            .await?;
            send.send(ResponseEvent::Body {
                body: Bytes::from_static(b"full body"),
                more_body: false,
            })
            .await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    let adapter = AsgiToWsgi::with_config(
        SlowFinish,
        AsgiBridgeConfig {
            wait_time_secs: Some(0.5),
            ..Default::default()
        },
    )
    .unwrap();
    let mut environ = environ_with_body("GET", "/", b"");
    let mut start_response = RecordingStartResponse::default();

    let started = Instant::now();
    let iter = adapter.call(&mut environ, &mut start_response).unwrap();
    assert_eq!(collect_body(iter), b"full body");
    let elapsed = started.elapsed();

    assert!(
        elapsed >= Duration::from_millis(400),
        "task should have been awaited, finished in {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(3),
        "task should have been cancelled, took {elapsed:?}"
    );
}

#[test]
fn caller_supplied_scheduler_is_used_untouched() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();

    let adapter = AsgiToWsgi::with_handle(HelloAsgi, runtime.handle().clone());
    let mut environ = environ_with_body("GET", "/", b"");
    let mut start_response = RecordingStartResponse::default();

    let iter = adapter.call(&mut environ, &mut start_response).unwrap();
    assert_eq!(collect_body(iter), b"Hello, world!");

    // The caller's runtime must survive the adapter.
    drop(adapter);
    assert_eq!(runtime.handle().block_on(async { 1 }), 1);
}

#[test]
fn two_requests_share_one_background_loop() {
    let adapter = AsgiToWsgi::new(EchoAsgi);

    for payload in [&b"first request"[..], &b"second request"[..]] {
        let mut environ = environ_with_body("POST", "/", payload);
        let mut start_response = RecordingStartResponse::default();
        let iter = adapter.call(&mut environ, &mut start_response).unwrap();
        assert_eq!(collect_body(iter), payload);
    }
}
