//! Blocking application contract.
//!
//! # Responsibilities
//! - Define the per-request environ mapping with its CGI-style keys
//! - Define the application and start-response traits the blocking side
//!   programs against
//! - Expose the request body as a blocking input stream
//!
//! The environ's string values follow the latin-1 convention: bytes
//! 0x80–0xFF travel as the code points U+0080–U+00FF.

mod input;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::asgi::Scope;
use crate::error::BridgeError;

pub use input::{InputStream, Lines};

/// Iterator of response body chunks returned by a blocking application.
pub type BodyIter = Box<dyn Iterator<Item = Result<Bytes, BridgeError>> + Send>;

/// A blocking application: called once per request on a worker thread,
/// returns the response body as an iterator of byte chunks.
pub trait WsgiApp: Send + Sync + 'static {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut dyn StartResponse,
    ) -> Result<BodyIter, BridgeError>;
}

/// The `start_response` callable handed to a blocking application.
///
/// `status` is a `"<code> <phrase>"` line; headers are ordered name/value
/// string pairs. Passing `exc_info` before any body chunk has been emitted
/// replaces the pending response start; passing it afterwards returns the
/// carried error so the application re-raises it. The classic write-callable
/// return has no supported path here: the returned iterator is the only way
/// to emit a body.
pub trait StartResponse: Send {
    fn call(
        &mut self,
        status: &str,
        headers: &[(String, String)],
        exc_info: Option<BridgeError>,
    ) -> Result<(), BridgeError>;
}

/// Destination for application-level error output, `wsgi.errors` style.
/// Lines land in the structured log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorSink;

impl ErrorSink {
    pub fn write_line(&self, line: &str) {
        tracing::error!(source = "application", "{line}");
    }
}

/// Per-request metadata mapping for the blocking contract.
///
/// String-valued CGI keys live in an ordered map; the input stream, error
/// sink and sentinels are typed fields. Keys are case-sensitive.
pub struct Environ {
    fields: BTreeMap<String, String>,
    input: InputStream,
    errors: ErrorSink,
    scope: Option<Arc<Scope>>,
}

impl Environ {
    pub fn new(input: InputStream) -> Self {
        Self {
            fields: BTreeMap::new(),
            input,
            errors: ErrorSink,
            scope: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// The request body stream, `wsgi.input`.
    pub fn input(&mut self) -> &mut InputStream {
        &mut self.input
    }

    /// Take ownership of the input stream, leaving an exhausted one behind.
    pub fn take_input(&mut self) -> InputStream {
        std::mem::replace(&mut self.input, InputStream::empty())
    }

    /// The error sink, `wsgi.errors`.
    pub fn errors(&self) -> ErrorSink {
        self.errors
    }

    /// The originating event-side scope, when this environ was produced by
    /// the bridge.
    pub fn scope(&self) -> Option<&Arc<Scope>> {
        self.scope.as_ref()
    }

    pub fn set_scope(&mut self, scope: Arc<Scope>) {
        self.scope = Some(scope);
    }

    /// Parsed `CONTENT_LENGTH`, if present and well-formed.
    pub fn content_length(&self) -> Option<u64> {
        self.get("CONTENT_LENGTH")?.trim().parse().ok()
    }

    // The contract's fixed sentinels: worker threads run concurrently in
    // one process, and an application instance serves many requests.
    pub fn multithread(&self) -> bool {
        true
    }

    pub fn multiprocess(&self) -> bool {
        false
    }

    pub fn run_once(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for Environ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environ")
            .field("fields", &self.fields)
            .field("has_scope", &self.scope.is_some())
            .finish()
    }
}
