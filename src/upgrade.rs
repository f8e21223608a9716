use std::{
    borrow::BorrowMut,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{future::BoxFuture, FutureExt};
use http_body_util::Full;
use hyper::{
    header::{self, HeaderMap, HeaderValue},
    upgrade::{OnUpgrade, Upgraded},
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    compression::{self, CompressionHooks, PERMESSAGE_DEFLATE_RESPONSE},
    conn::{Conn, Negotiated, Role},
    handshake::{self, compute_accept_key, HandshakeError, RequestView},
    headers::{names, HeaderTokens},
    subprotocol, CompressionLevel, HttpResponse, Result, WebSocketError,
};

/// Origin policy: returns `true` when the request origin is acceptable.
pub type OriginCheck = Arc<dyn Fn(&RequestView<'_>) -> bool + Send + Sync>;

/// Builds the response sent when a handshake is rejected.
pub type ErrorHandler =
    Arc<dyn Fn(&RequestView<'_>, StatusCode, &HandshakeError) -> HttpResponse + Send + Sync>;

/// Server-side handshake configuration.
///
/// An `Upgrader` is built once and shared by every request it negotiates: it is never
/// mutated by a negotiation, so a single instance can serve concurrent requests.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use ws_upgrade::Upgrader;
///
/// let upgrader = Upgrader::default()
///     .with_handshake_timeout(Duration::from_secs(10))
///     .with_subprotocols(["v2.chat", "v1.chat"])
///     .with_compression(true);
/// ```
#[derive(Clone, Default)]
pub struct Upgrader {
    /// Upper bound on the time spent waiting for the HTTP server to hand over the transport.
    ///
    /// Default: unbounded.
    pub handshake_timeout: Option<Duration>,

    /// Read buffer capacity of the resulting [`Conn`]. Zero selects
    /// [`DEFAULT_BUFFER_SIZE`](crate::DEFAULT_BUFFER_SIZE).
    pub read_buffer_size: usize,

    /// Write buffer capacity of the resulting [`Conn`]. Zero selects
    /// [`DEFAULT_BUFFER_SIZE`](crate::DEFAULT_BUFFER_SIZE).
    pub write_buffer_size: usize,

    /// Supported subprotocols, most preferred first.
    pub subprotocols: Vec<String>,

    /// Whether permessage-deflate should be negotiated when the client offers it.
    ///
    /// Only the "no context takeover" mode is supported, so enabling this does not
    /// guarantee the connection ends up compressed.
    pub enable_compression: bool,

    /// Level handed to the compressor constructor once compression is negotiated.
    pub compression_level: CompressionLevel,

    check_origin: Option<OriginCheck>,
    error_handler: Option<ErrorHandler>,
}

impl Upgrader {
    /// An upgrader that accepts any origin and answers rejected handshakes with a bare
    /// status and no body.
    pub fn permissive(read_buffer_size: usize, write_buffer_size: usize) -> Self {
        Self::default()
            .with_buffer_sizes(read_buffer_size, write_buffer_size)
            .with_origin_check(|_| true)
            .with_error_handler(|_, status, _| {
                let mut response = Response::new(Full::default());
                *response.status_mut() = status;
                response
            })
    }

    pub fn with_handshake_timeout(self, timeout: Duration) -> Self {
        Self {
            handshake_timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_buffer_sizes(self, read_buffer_size: usize, write_buffer_size: usize) -> Self {
        Self {
            read_buffer_size,
            write_buffer_size,
            ..self
        }
    }

    /// Sets the supported subprotocols in order of preference.
    pub fn with_subprotocols<I, S>(self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subprotocols: subprotocols.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Replaces the default same-origin policy.
    pub fn with_origin_check<F>(self, check: F) -> Self
    where
        F: Fn(&RequestView<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            check_origin: Some(Arc::new(check)),
            ..self
        }
    }

    pub fn with_compression(self, enable: bool) -> Self {
        Self {
            enable_compression: enable,
            ..self
        }
    }

    /// Enables compression and sets the level used once it is negotiated.
    pub fn with_compression_level(self, level: CompressionLevel) -> Self {
        Self {
            enable_compression: true,
            compression_level: level,
            ..self
        }
    }

    /// Takes over writing the response of rejected handshakes.
    pub fn with_error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&RequestView<'_>, StatusCode, &HandshakeError) -> HttpResponse
            + Send
            + Sync
            + 'static,
    {
        Self {
            error_handler: Some(Arc::new(handler)),
            ..self
        }
    }

    /// Validates a handshake request and negotiates its parameters.
    ///
    /// `response_header` holds headers the caller wants in the response. It must not set
    /// `Sec-WebSocket-Extensions`. A `Sec-WebSocket-Protocol` value in it is only used when
    /// no subprotocols are configured.
    ///
    /// Nothing is done to the transport here: on success the returned [`Accepted`] holds
    /// the `101 Switching Protocols` response and the negotiated parameters, and the
    /// handoff happens later through [`Accepted::into_upgrade`].
    pub fn negotiate(
        &self,
        request: &RequestView<'_>,
        response_header: &HeaderMap,
    ) -> std::result::Result<Accepted, Rejection> {
        let key = handshake::validate(request, response_header, self.check_origin.as_ref())
            .map_err(|error| self.reject(request, error))?;

        let subprotocol = subprotocol::select(request.headers(), &self.subprotocols, response_header);
        let compression = (self.enable_compression && compression::negotiate(request.tokens()))
            .then(|| CompressionHooks::no_context_takeover(self.compression_level));

        #[cfg(feature = "logging")]
        log::debug!(
            "Accepted websocket handshake from host={} subprotocol={:?} compression={}",
            request.host(),
            subprotocol,
            compression.is_some()
        );

        let negotiated = Negotiated {
            subprotocol,
            compression,
        };
        let response = switching_protocols(key, &negotiated, response_header);

        Ok(Accepted {
            response,
            negotiated,
            handshake_timeout: self.handshake_timeout,
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
        })
    }

    /// Negotiates a handshake on a hyper request.
    ///
    /// On success the returned response must be sent back to the client before the
    /// [`UpgradeFut`] can complete. A rejected request never reaches the hijack step: the
    /// transport stays with hyper.
    ///
    /// # Example
    /// ```no_run
    /// use http_body_util::Full;
    /// use hyper::{body::{Bytes, Incoming}, header::HeaderMap, Request, Response};
    /// use tokio::io::AsyncWriteExt;
    /// use ws_upgrade::Upgrader;
    ///
    /// async fn server_upgrade(
    ///     upgrader: &Upgrader,
    ///     mut req: Request<Incoming>,
    /// ) -> ws_upgrade::Result<Response<Full<Bytes>>> {
    ///     let (response, fut) = match upgrader.upgrade(&mut req, &HeaderMap::new()) {
    ///         Ok(accepted) => accepted,
    ///         Err(rejection) => return Ok(rejection.response),
    ///     };
    ///
    ///     tokio::spawn(fut.serve(|mut conn| async move {
    ///         conn.write_all(b"hello").await?;
    ///         conn.flush().await?;
    ///         ws_upgrade::Result::Ok(())
    ///     }));
    ///
    ///     Ok(response)
    /// }
    /// ```
    pub fn upgrade<B>(
        &self,
        mut request: impl BorrowMut<Request<B>>,
        response_header: &HeaderMap,
    ) -> std::result::Result<(HttpResponse, UpgradeFut), Rejection> {
        let request = request.borrow_mut();
        let accepted = self.negotiate(&RequestView::new(request), response_header)?;
        Ok(accepted.into_upgrade(hyper::upgrade::on(request)))
    }

    fn reject(&self, request: &RequestView<'_>, error: HandshakeError) -> Rejection {
        #[cfg(feature = "logging")]
        log::debug!(
            "Rejected websocket handshake status={} reason={}",
            error.status(),
            error
        );

        let response = match &self.error_handler {
            Some(handler) => handler(request, error.status(), &error),
            None => handshake::error_response(error.status()),
        };

        Rejection { error, response }
    }
}

impl std::fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgrader")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("subprotocols", &self.subprotocols)
            .field("enable_compression", &self.enable_compression)
            .field("custom_origin_check", &self.check_origin.is_some())
            .field("custom_error_handler", &self.error_handler.is_some())
            .finish()
    }
}

/// A handshake that passed validation and negotiation.
#[derive(Debug)]
pub struct Accepted {
    /// The `101 Switching Protocols` response to send to the client.
    pub response: HttpResponse,
    /// What was agreed on with the client.
    pub negotiated: Negotiated,
    handshake_timeout: Option<Duration>,
    read_buffer_size: usize,
    write_buffer_size: usize,
}

impl Accepted {
    /// Pairs the response with the transport handoff.
    pub fn into_upgrade<H: Hijack>(self, hijack: H) -> (HttpResponse, UpgradeFut<H>) {
        let fut = UpgradeFut {
            hijack: Some(hijack),
            inner: None,
            deadline: None,
            handshake_timeout: self.handshake_timeout,
            negotiated: Some(self.negotiated),
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
        };
        (self.response, fut)
    }
}

/// A handshake that failed validation, along with the response to send back.
#[derive(Debug)]
pub struct Rejection {
    pub error: HandshakeError,
    /// The error response, as built by the configured error handler if there is one.
    pub response: HttpResponse,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        self.error.status()
    }
}

impl From<Rejection> for WebSocketError {
    fn from(value: Rejection) -> Self {
        WebSocketError::Handshake(value.error)
    }
}

/// Detaches the raw transport from the HTTP server.
///
/// The returned future resolves once the server has flushed the handshake response and
/// given up the connection. From then on it never touches the transport again.
pub trait Hijack: Send + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn hijack(self) -> BoxFuture<'static, Result<Self::Io>>;
}

impl Hijack for OnUpgrade {
    type Io = TokioIo<Upgraded>;

    fn hijack(self) -> BoxFuture<'static, Result<Self::Io>> {
        async move { Ok::<_, WebSocketError>(TokioIo::new(self.await?)) }.boxed()
    }
}

/// Future that takes over the transport once the handshake response is sent, resolving to
/// a server-side [`Conn`].
///
/// The configured handshake timeout applies only while waiting for the handoff; the
/// connection itself has no deadline.
#[pin_project]
pub struct UpgradeFut<H: Hijack = OnUpgrade> {
    hijack: Option<H>,
    inner: Option<BoxFuture<'static, Result<H::Io>>>,
    #[pin]
    deadline: Option<tokio::time::Sleep>,
    handshake_timeout: Option<Duration>,
    negotiated: Option<Negotiated>,
    read_buffer_size: usize,
    write_buffer_size: usize,
}

impl<H: Hijack> UpgradeFut<H> {
    /// What was agreed on during the handshake.
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Waits for the handoff and runs `handler` with the connection.
    ///
    /// Returns whatever the handler returns. An error from the handoff itself is
    /// converted into the handler's error type.
    pub async fn serve<F, Fut, E>(self, handler: F) -> std::result::Result<(), E>
    where
        F: FnOnce(Conn<H::Io>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: From<WebSocketError>,
    {
        let conn = self.await?;
        handler(conn).await
    }
}

impl<H: Hijack> Future for UpgradeFut<H> {
    type Output = Result<Conn<H::Io>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if let Some(hijack) = this.hijack.take() {
            #[cfg(feature = "logging")]
            log::trace!("Waiting for the server to hand over the transport");

            *this.inner = Some(hijack.hijack());
            if let Some(timeout) = *this.handshake_timeout {
                this.deadline.set(Some(tokio::time::sleep(timeout)));
            }
        }

        if let Some(deadline) = this.deadline.as_mut().as_pin_mut() {
            if deadline.poll(cx).is_ready() {
                #[cfg(feature = "logging")]
                log::debug!("Handshake timed out before the transport was handed over");

                *this.inner = None;
                this.deadline.set(None);
                return Poll::Ready(Err(WebSocketError::HandshakeTimeout));
            }
        }

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(WebSocketError::ConnectionClosed));
        };

        let io = ready!(inner.poll_unpin(cx));
        *this.inner = None;
        this.deadline.set(None);
        let io = io?;

        let negotiated = this.negotiated.take().unwrap_or_default();

        #[cfg(feature = "logging")]
        log::debug!(
            "Transport handed over subprotocol={:?} compression={}",
            negotiated.subprotocol,
            negotiated.compression_enabled()
        );

        Poll::Ready(Ok(Conn::new(
            io,
            Role::Server,
            *this.read_buffer_size,
            *this.write_buffer_size,
            negotiated,
        )))
    }
}

/// Reports whether a request asks for a WebSocket upgrade.
///
/// Only the `Connection` and `Upgrade` tokens are looked at; use [`Upgrader::negotiate`] for
/// a full validation.
pub fn is_websocket_upgrade<B>(request: &Request<B>) -> bool {
    let tokens = HeaderTokens::from_header_map(request.headers());
    tokens.contains_token(names::CONNECTION, "upgrade")
        && tokens.contains_token(names::UPGRADE, "websocket")
}

fn switching_protocols(
    key: &str,
    negotiated: &Negotiated,
    response_header: &HeaderMap,
) -> HttpResponse {
    let mut response = Response::new(Full::<Bytes>::default());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(accept) = HeaderValue::from_str(&compute_accept_key(key)) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    }

    if let Some(protocol) = negotiated
        .subprotocol
        .as_deref()
        .and_then(|p| HeaderValue::from_str(p).ok())
    {
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);
    }

    if negotiated.compression_enabled() {
        headers.insert(
            header::SEC_WEBSOCKET_EXTENSIONS,
            HeaderValue::from_static(PERMESSAGE_DEFLATE_RESPONSE),
        );
    }

    // caller headers are copied last, multiple values joined with "; "
    for name in response_header.keys() {
        if name == header::SEC_WEBSOCKET_PROTOCOL {
            continue;
        }

        let values: Vec<&[u8]> = response_header
            .get_all(name)
            .iter()
            .map(HeaderValue::as_bytes)
            .collect();
        if let Ok(value) = HeaderValue::from_bytes(&values.join(&b"; "[..])) {
            headers.insert(name.clone(), value);
        }
    }

    response
}
