//! Accepts WebSocket handshakes on 127.0.0.1:3001 and echoes raw bytes back once upgraded.
//!
//! Try it with `websocat --binary ws://127.0.0.1:3001 --protocol v2.chat`. No framing is done on
//! the server side, so the client sees its own frames echoed back verbatim.
use std::{convert::Infallible, sync::Arc, time::Duration};

use hyper::{body::Incoming, header::HeaderMap, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use ws_upgrade::{Conn, HttpResponse, Upgrader};

async fn echo<S>(mut conn: Conn<S>) -> ws_upgrade::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    log::info!(
        "upgraded subprotocol={:?} compression={}",
        conn.subprotocol(),
        conn.negotiated().compression_enabled()
    );

    let mut buf = vec![0u8; 4096];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        conn.write_all(&buf[..n]).await?;
        conn.flush().await?;
    }

    Ok(())
}

async fn server_upgrade(
    upgrader: Arc<Upgrader>,
    mut req: Request<Incoming>,
) -> Result<HttpResponse, Infallible> {
    let (response, fut) = match upgrader.upgrade(&mut req, &HeaderMap::new()) {
        Ok(accepted) => accepted,
        Err(rejection) => {
            log::warn!("rejected handshake: {}", rejection.error);
            return Ok(rejection.response);
        }
    };

    tokio::spawn(async move {
        if let Err(err) = fut.serve(echo).await {
            log::error!("connection error: {err}");
        }
    });

    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let upgrader = Arc::new(
        Upgrader::default()
            .with_handshake_timeout(Duration::from_secs(10))
            .with_buffer_sizes(4096, 4096)
            .with_subprotocols(["v2.chat", "v1.chat"])
            .with_compression(true),
    );

    let listener = TcpListener::bind("127.0.0.1:3001").await?;
    log::info!("listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let upgrader = Arc::clone(&upgrader);

        tokio::spawn(async move {
            let service = service_fn(move |req| server_upgrade(Arc::clone(&upgrader), req));
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await
            {
                log::error!("{peer}: {err}");
            }
        });
    }
}
