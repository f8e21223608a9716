//! # ws-upgrade
//! Server-side WebSocket handshake negotiation (RFC 6455) on top of hyper, including
//! subprotocol selection and permessage-deflate (RFC 7692) negotiation.
//!
//! The crate turns an incoming HTTP upgrade request into either a `101 Switching Protocols`
//! response plus a future resolving to the raw transport, or an error response. It does not
//! implement WebSocket framing: the resulting [`Conn`] is a buffered byte stream carrying what
//! the handshake agreed on, ready for a frame codec to be layered on top.
//!
//! # Features
//! - `logging`: Enables debug logging for handshake negotiation and transport handoff using the
//!   `log` crate. Useful for debugging rejected handshakes.
//!
//! # Handshake
//! An [`Upgrader`] validates the request in a fixed order, stopping at the first failure:
//!
//! 1. The method must be `GET` (`405`).
//! 2. The caller must not preset `Sec-WebSocket-Extensions` (`500`).
//! 3. `Connection` must contain `upgrade` and `Upgrade` must contain `websocket` (`400`).
//! 4. `Sec-WebSocket-Version` must contain `13` (`400`).
//! 5. The origin check must pass (`403`). By default the `Origin` host must match `Host`.
//! 6. `Sec-WebSocket-Key` must be present and non-empty (`400`).
//!
//! Once validated, the subprotocol is picked following the server's preference order and
//! compression is enabled if the client offered `permessage-deflate` and the upgrader allows it.
//! Only the "no context takeover" mode is supported.
//!
//! # Server Example
//! ```rust
//! use http_body_util::Full;
//! use hyper::{body::{Bytes, Incoming}, header::HeaderMap, Request, Response};
//! use tokio::io::AsyncWriteExt;
//! use ws_upgrade::Upgrader;
//!
//! async fn server_upgrade(
//!     upgrader: &Upgrader,
//!     mut req: Request<Incoming>,
//! ) -> ws_upgrade::Result<Response<Full<Bytes>>> {
//!     let (response, fut) = match upgrader.upgrade(&mut req, &HeaderMap::new()) {
//!         Ok(accepted) => accepted,
//!         Err(rejection) => return Ok(rejection.response),
//!     };
//!
//!     tokio::spawn(async move {
//!         if let Ok(mut conn) = fut.await {
//!             // Layer a frame codec on top of `conn` here
//!             let _ = conn.shutdown().await;
//!         }
//!     });
//!
//!     Ok(response)
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod compression;
mod conn;
pub mod handshake;
pub mod headers;
pub mod subprotocol;
mod upgrade;

use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use thiserror::Error;

pub use compression::{CompressionHooks, Compressor, Decompressor};
pub use conn::{Conn, Negotiated, Role, DEFAULT_BUFFER_SIZE};
pub use handshake::{check_same_origin, compute_accept_key, HandshakeError, RequestView};
pub use headers::HeaderTokens;
pub use subprotocol::{client_subprotocols, match_subprotocol};
pub use upgrade::{
    is_websocket_upgrade, Accepted, ErrorHandler, Hijack, OriginCheck, Rejection, UpgradeFut,
    Upgrader,
};

/// Compression level used by the permessage-deflate codec.
pub type CompressionLevel = flate2::Compression;

/// Response type produced by the handshake, both on success and on rejection.
pub type HttpResponse = Response<Full<Bytes>>;

/// A result type for handshake operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur while upgrading a connection.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The request did not pass validation. Carries the status sent back to the client.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The transport handoff did not complete within the configured handshake timeout.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Returned when polling an upgrade that already completed.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Wraps standard I/O errors that may occur on the handed over transport,
    /// such as connection resets.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from the hyper HTTP library that may occur during the
    /// connection upgrade.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),
}

impl WebSocketError {
    /// HTTP status matching the error, if it came from a rejected handshake.
    pub fn status(&self) -> Option<hyper::StatusCode> {
        match self {
            Self::Handshake(err) => Some(err.status()),
            _ => None,
        }
    }
}
