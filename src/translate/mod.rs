//! Pure translation between the two per-request metadata mappings.
//!
//! # Responsibilities
//! - Map an event-side scope plus headers to a blocking-side environ
//! - Map a blocking-side environ back to an event-side scope
//! - Apply the header canonicalization and latin-1 byte conventions
//!
//! Both directions are pure and synchronous; neither touches the request
//! streams beyond carrying the input handle through.

use std::collections::HashMap;

use bytes::Bytes;
use percent_encoding::{percent_decode, percent_encode, AsciiSet, CONTROLS};

use crate::asgi::{Scope, ScopeKind};
use crate::error::BridgeError;
use crate::wsgi::{Environ, InputStream};

/// Bytes escaped when reconstructing an undecoded path.
const RAW_PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Decode bytes as latin-1: every byte becomes the code point of the same
/// value. Lossless for any input.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode a latin-1-convention string back to bytes. Fails on code points
/// above U+00FF, which cannot have come from a conforming peer.
pub fn encode_latin1(text: &str) -> Result<Bytes, BridgeError> {
    let mut bytes = Vec::with_capacity(text.len());
    for c in text.chars() {
        let v = c as u32;
        if v > 0xFF {
            return Err(BridgeError::protocol(format!(
                "non latin-1 character {c:?} in header or path"
            )));
        }
        bytes.push(v as u8);
    }
    Ok(Bytes::from(bytes))
}

fn encode_latin1_lossy(text: &str) -> Vec<u8> {
    match encode_latin1(text) {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => text.as_bytes().to_vec(),
    }
}

/// Build a blocking-side environ from an event-side scope.
///
/// `PATH_INFO` is the percent-decoded path relative to the scope's root
/// path; the path comes from `raw_path` when the transport preserved it,
/// else from the already-decoded `path`. Duplicate headers mapping to the
/// same environ key are joined with `", "` in arrival order.
pub fn environ_from_scope(scope: &Scope, input: InputStream) -> Environ {
    let mut environ = Environ::new(input);

    environ.insert("REQUEST_METHOD", scope.method.to_uppercase());

    let script_name = scope.root_path.clone();
    let path_bytes: Vec<u8> = match &scope.raw_path {
        Some(raw) => percent_decode(raw).collect(),
        None => scope.path.as_bytes().to_vec(),
    };
    let mut path_info = decode_latin1(&path_bytes);
    if !script_name.is_empty() {
        if let Some(rest) = path_info.strip_prefix(script_name.as_str()) {
            path_info = rest.to_string();
        }
    }
    environ.insert("SCRIPT_NAME", script_name);
    environ.insert("PATH_INFO", path_info);
    environ.insert("QUERY_STRING", decode_latin1(&scope.query_string));
    environ.insert("SERVER_PROTOCOL", format!("HTTP/{}", scope.http_version));

    let (server_name, server_port) = scope
        .server
        .clone()
        .unwrap_or_else(|| ("localhost".to_string(), 80));
    environ.insert("SERVER_NAME", server_name);
    environ.insert("SERVER_PORT", server_port.to_string());

    if let Some((address, port)) = &scope.client {
        environ.insert("REMOTE_ADDR", address.clone());
        environ.insert("REMOTE_PORT", port.to_string());
    }

    environ.insert("wsgi.url_scheme", scope.scheme.clone());

    for (name, value) in &scope.headers {
        let name = decode_latin1(name).to_ascii_lowercase();
        let key = match name.as_str() {
            "content-type" => "CONTENT_TYPE".to_string(),
            "content-length" => "CONTENT_LENGTH".to_string(),
            other => format!("HTTP_{}", other.to_ascii_uppercase().replace('-', "_")),
        };
        let value = decode_latin1(value);
        let joined = match environ.get(&key) {
            Some(previous) => format!("{previous}, {value}"),
            None => value,
        };
        environ.insert(key, joined);
    }

    environ
}

/// Build an event-side scope from a blocking-side environ.
///
/// The inverse of [`environ_from_scope`]: `HTTP_*` keys become lower-cased
/// dashed header names, `CONTENT_TYPE`/`CONTENT_LENGTH` map back to their
/// header forms, and the undecoded path is reconstructed by percent-encoding
/// `PATH_INFO`. The produced scope carries a string-field snapshot of the
/// environ.
pub fn scope_from_environ(environ: &Environ) -> Scope {
    let method = environ
        .get("REQUEST_METHOD")
        .unwrap_or("GET")
        .to_uppercase();
    let http_version = environ
        .get("SERVER_PROTOCOL")
        .and_then(|p| p.split_once('/'))
        .map(|(_, version)| version.to_string())
        .unwrap_or_else(|| "1.0".to_string());
    let scheme = environ.get("wsgi.url_scheme").unwrap_or("http").to_string();

    let path_bytes = encode_latin1_lossy(environ.get("PATH_INFO").unwrap_or(""));
    let path = String::from_utf8_lossy(&path_bytes).into_owned();
    let raw_path = percent_encode(&path_bytes, RAW_PATH_ESCAPE).to_string();

    let query_bytes = encode_latin1_lossy(environ.get("QUERY_STRING").unwrap_or(""));

    let mut headers: Vec<(Bytes, Bytes)> = Vec::new();
    for (key, value) in environ.fields() {
        let name = if key == "CONTENT_TYPE" {
            "content-type".to_string()
        } else if key == "CONTENT_LENGTH" {
            "content-length".to_string()
        } else if let Some(rest) = key.strip_prefix("HTTP_") {
            rest.to_ascii_lowercase().replace('_', "-")
        } else {
            continue;
        };
        headers.push((
            Bytes::from(name.into_bytes()),
            Bytes::from(encode_latin1_lossy(value)),
        ));
    }

    let server = environ.get("SERVER_NAME").map(|name| {
        let port = environ
            .get("SERVER_PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(80);
        (name.to_string(), port)
    });
    let client = environ.get("REMOTE_ADDR").map(|address| {
        let port = environ
            .get("REMOTE_PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(0);
        (address.to_string(), port)
    });

    let snapshot: HashMap<String, String> = environ
        .fields()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Scope {
        kind: ScopeKind::Http,
        http_version,
        method,
        scheme,
        path,
        raw_path: Some(Bytes::from(raw_path.into_bytes())),
        query_string: Bytes::from(query_bytes),
        root_path: environ.get("SCRIPT_NAME").unwrap_or("").to_string(),
        headers,
        client,
        server,
        environ: Some(snapshot),
    }
}
