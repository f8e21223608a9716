use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use pin_project::pin_project;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufStream, ReadBuf};

use crate::compression::CompressionHooks;

/// Buffer capacity used when the configuration leaves a buffer size at zero.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// The role the connection is taking.
///
/// Connections produced by a handshake always take the server role: frames written on
/// them must not be masked.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Role {
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => {
                write!(f, "server")
            }
        }
    }
}

/// Parameters agreed on during the handshake.
#[derive(Debug, Clone, Default)]
pub struct Negotiated {
    /// Selected subprotocol, `None` when none was agreed on.
    pub subprotocol: Option<String>,
    /// Codec constructors, present only when permessage-deflate was negotiated.
    pub compression: Option<CompressionHooks>,
}

impl Negotiated {
    pub fn compression_enabled(&self) -> bool {
        self.compression.is_some()
    }
}

/// A transport handed over by the HTTP server after a successful handshake.
///
/// `Conn` exclusively owns the transport. It buffers reads and writes using the configured
/// sizes and carries what the handshake agreed on, but does no WebSocket framing itself:
/// it is the raw byte stream a frame codec is layered onto.
#[pin_project]
pub struct Conn<S> {
    #[pin]
    stream: BufStream<S>,
    role: Role,
    negotiated: Negotiated,
}

impl<S> Conn<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub(crate) fn new(
        stream: S,
        role: Role,
        read_buffer_size: usize,
        write_buffer_size: usize,
        negotiated: Negotiated,
    ) -> Self {
        let read_buffer_size = match read_buffer_size {
            0 => DEFAULT_BUFFER_SIZE,
            n => n,
        };
        let write_buffer_size = match write_buffer_size {
            0 => DEFAULT_BUFFER_SIZE,
            n => n,
        };

        Self {
            stream: BufStream::with_capacity(read_buffer_size, write_buffer_size, stream),
            role,
            negotiated,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    /// The subprotocol agreed on during the handshake.
    pub fn subprotocol(&self) -> Option<&str> {
        self.negotiated.subprotocol.as_deref()
    }

    /// Compression constructors, set only when permessage-deflate was negotiated.
    pub fn compression(&self) -> Option<&CompressionHooks> {
        self.negotiated.compression.as_ref()
    }

    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut S {
        self.stream.get_mut()
    }

    /// Gives the transport back.
    ///
    /// Buffered data that was not yet read or flushed is lost.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

impl<S> std::fmt::Debug for Conn<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("role", &self.role)
            .field("negotiated", &self.negotiated)
            .finish_non_exhaustive()
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncRead for Conn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().stream.poll_read(cx, buf)
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncBufRead for Conn<S> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        self.project().stream.poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        self.project().stream.consume(amt)
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncWrite for Conn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_shutdown(cx)
    }
}
