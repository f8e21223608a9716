use std::borrow::Cow;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header::{self, AsHeaderName, HeaderMap, HeaderValue},
    http::request::Parts,
    Method, Request, Response, StatusCode, Uri,
};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::{
    headers::{names, HeaderTokens},
    HttpResponse, OriginCheck,
};

/// GUID appended to the client key before hashing (RFC 6455, section 1.3).
const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this crate speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// A rejected handshake.
///
/// Every validation failure produces one of these, carrying a readable message and the HTTP
/// status the client is answered with. A failed handshake is final for that request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandshakeError {
    message: Cow<'static, str>,
    status: StatusCode,
}

impl HandshakeError {
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    /// The HTTP status the handshake was rejected with.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Read-only view over the parts of a request that take part in the handshake.
///
/// The header token map is built once when the view is created and reused by every check.
#[derive(Debug)]
pub struct RequestView<'a> {
    method: &'a Method,
    host: &'a str,
    headers: &'a HeaderMap,
    tokens: HeaderTokens,
}

impl<'a> RequestView<'a> {
    pub fn new<B>(request: &'a Request<B>) -> Self {
        Self::from_components(request.method(), request.uri(), request.headers())
    }

    pub fn from_parts(parts: &'a Parts) -> Self {
        Self::from_components(&parts.method, &parts.uri, &parts.headers)
    }

    fn from_components(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| uri.authority().map(|authority| authority.as_str()))
            .unwrap_or_default();

        Self {
            method,
            host,
            headers,
            tokens: HeaderTokens::from_header_map(headers),
        }
    }

    pub fn method(&self) -> &Method {
        self.method
    }

    /// The `Host` header, falling back to the authority of the request target.
    pub fn host(&self) -> &str {
        self.host
    }

    /// First value of `name`, if present and visible ASCII.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&'a str> {
        self.headers.get(name).and_then(|h| h.to_str().ok())
    }

    pub fn headers(&self) -> &'a HeaderMap {
        self.headers
    }

    pub fn tokens(&self) -> &HeaderTokens {
        &self.tokens
    }
}

/// Runs every mandatory handshake check in order, stopping at the first failure.
///
/// On success the client's `Sec-WebSocket-Key` is returned.
pub(crate) fn validate<'a>(
    request: &RequestView<'a>,
    response_header: &HeaderMap,
    check_origin: Option<&OriginCheck>,
) -> Result<&'a str, HandshakeError> {
    if request.method() != Method::GET {
        return Err(HandshakeError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "websocket: not a websocket handshake: request method is not GET",
        ));
    }

    if response_header.contains_key(header::SEC_WEBSOCKET_EXTENSIONS) {
        return Err(HandshakeError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "websocket: application specific 'Sec-WebSocket-Extensions' headers are unsupported",
        ));
    }

    let tokens = request.tokens();

    if !tokens.contains_token(names::CONNECTION, "upgrade") {
        return Err(HandshakeError::new(
            StatusCode::BAD_REQUEST,
            "websocket: not a websocket handshake: 'upgrade' token not found in 'Connection' header",
        ));
    }

    if !tokens.contains_token(names::UPGRADE, "websocket") {
        return Err(HandshakeError::new(
            StatusCode::BAD_REQUEST,
            "websocket: not a websocket handshake: 'websocket' token not found in 'Upgrade' header",
        ));
    }

    if !tokens.contains_token(names::SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION) {
        return Err(HandshakeError::new(
            StatusCode::BAD_REQUEST,
            "websocket: unsupported version: 13 not found in 'Sec-WebSocket-Version' header",
        ));
    }

    let allowed = match check_origin {
        Some(check) => check(request),
        None => check_same_origin(request),
    };
    if !allowed {
        return Err(HandshakeError::new(
            StatusCode::FORBIDDEN,
            "websocket: 'Origin' header value not allowed",
        ));
    }

    match request.header(header::SEC_WEBSOCKET_KEY) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(HandshakeError::new(
            StatusCode::BAD_REQUEST,
            "websocket: not a websocket handshake: 'Sec-WebSocket-Key' header is missing or blank",
        )),
    }
}

/// Default origin policy.
///
/// Requests without an `Origin` header, or with an empty one, are accepted. Otherwise the
/// host of the origin URL must match the request host. An origin that is not visible ASCII
/// is rejected.
pub fn check_same_origin(request: &RequestView<'_>) -> bool {
    let origin = match request.headers().get(header::ORIGIN) {
        None => return true,
        Some(origin) if origin.is_empty() => return true,
        Some(origin) => match origin.to_str() {
            Ok(origin) => origin,
            Err(_) => return false,
        },
    };

    let Ok(url) = url::Url::parse(origin) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };

    let request_host = request.host();
    match url.port_or_known_default() {
        Some(port) => {
            let explicit = format!("{host}:{port}");
            (url.port().is_none() && host.eq_ignore_ascii_case(request_host))
                || explicit.eq_ignore_ascii_case(request_host)
        }
        None => host.eq_ignore_ascii_case(request_host),
    }
}

/// Computes the `Sec-WebSocket-Accept` value for a client key.
pub fn compute_accept_key(key: &str) -> String {
    use base64::prelude::*;
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Plain error response: the status, its reason as the body, and the supported version.
pub(crate) fn error_response(status: StatusCode) -> HttpResponse {
    let body = status.canonical_reason().unwrap_or_default();

    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::SEC_WEBSOCKET_VERSION,
        HeaderValue::from_static(WEBSOCKET_VERSION),
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    response
}
