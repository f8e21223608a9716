use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc};

use hyper::{body::Incoming, header::HeaderMap, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use ws_upgrade::{HttpResponse, Upgrader};

const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// Echoes every byte received on the upgraded connection.
async fn handle(
    upgrader: Arc<Upgrader>,
    mut req: Request<Incoming>,
) -> Result<HttpResponse, Infallible> {
    let (response, fut) = match upgrader.upgrade(&mut req, &HeaderMap::new()) {
        Ok(accepted) => accepted,
        Err(rejection) => return Ok(rejection.response),
    };

    tokio::spawn(fut.serve(|mut conn| async move {
        let mut buf = [0u8; 1024];
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            conn.write_all(&buf[..n]).await?;
            conn.flush().await?;
        }
        ws_upgrade::Result::Ok(())
    }));

    Ok(response)
}

async fn start_server(upgrader: Upgrader) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let upgrader = Arc::new(upgrader);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let upgrader = Arc::clone(&upgrader);
            tokio::spawn(async move {
                let service = service_fn(move |req| handle(Arc::clone(&upgrader), req));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await;
            });
        }
    });

    Ok(addr)
}

struct RawResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl RawResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Reads a response head byte by byte so nothing past it is consumed, then its body.
async fn read_response(stream: &mut TcpStream) -> anyhow::Result<RawResponse> {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await?);
    }

    let head = String::from_utf8(head)?;
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .ok_or_else(|| anyhow::anyhow!("missing status line"))?
        .parse::<u16>()?;

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_owned()))
        .collect();

    let length = match headers.get("content-length") {
        Some(length) => length.parse::<usize>()?,
        None => 0,
    };
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;

    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

fn handshake(addr: SocketAddr, extra: &[&str]) -> String {
    let mut request = format!(
        "GET /chat HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n"
    );
    for line in extra {
        request.push_str(line);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request
}

async fn send(addr: SocketAddr, request: &str) -> anyhow::Result<(TcpStream, RawResponse)> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request.as_bytes()).await?;
    let response = read_response(&mut stream).await?;
    Ok((stream, response))
}

#[tokio::test]
async fn test_upgrade_and_echo() -> anyhow::Result<()> {
    let addr = start_server(Upgrader::default()).await?;
    let (mut stream, response) = send(addr, &handshake(addr, &[])).await?;

    assert_eq!(response.status, 101);
    assert!(response.header("upgrade").unwrap().eq_ignore_ascii_case("websocket"));
    assert!(response.header("connection").unwrap().eq_ignore_ascii_case("upgrade"));
    assert_eq!(response.header("sec-websocket-accept"), Some(ACCEPT));
    assert_eq!(response.header("sec-websocket-protocol"), None);
    assert_eq!(response.header("sec-websocket-extensions"), None);

    stream.write_all(b"hello over raw bytes").await?;
    let mut echoed = [0u8; 20];
    stream.read_exact(&mut echoed).await?;
    assert_eq!(&echoed, b"hello over raw bytes");

    Ok(())
}

#[tokio::test]
async fn test_reject_post() -> anyhow::Result<()> {
    let addr = start_server(Upgrader::default()).await?;
    let request = handshake(addr, &[]).replacen("GET", "POST", 1);
    let (_, response) = send(addr, &request).await?;

    assert_eq!(response.status, 405);
    assert_eq!(response.header("sec-websocket-version"), Some("13"));
    assert_eq!(response.body, b"Method Not Allowed");
    assert_eq!(response.header("sec-websocket-accept"), None);

    Ok(())
}

#[tokio::test]
async fn test_rejected_connection_stays_http() -> anyhow::Result<()> {
    let addr = start_server(Upgrader::default()).await?;
    let request = handshake(addr, &[])
        .replace("Upgrade: websocket\r\n", "")
        .replace("Connection: Upgrade", "Connection: keep-alive");
    let (mut stream, response) = send(addr, &request).await?;
    assert_eq!(response.status, 400);
    assert_eq!(response.body, b"Bad Request");

    stream.write_all(handshake(addr, &[]).as_bytes()).await?;
    let response = read_response(&mut stream).await?;
    assert_eq!(response.status, 101);
    assert_eq!(response.header("sec-websocket-accept"), Some(ACCEPT));

    Ok(())
}

#[tokio::test]
async fn test_origin_checks() -> anyhow::Result<()> {
    let addr = start_server(Upgrader::default()).await?;

    let (_, response) = send(addr, &handshake(addr, &["Origin: http://evil.example"])).await?;
    assert_eq!(response.status, 403);

    let origin = format!("Origin: http://{addr}");
    let (_, response) = send(addr, &handshake(addr, &[&origin])).await?;
    assert_eq!(response.status, 101);

    let addr = start_server(Upgrader::permissive(1024, 1024)).await?;
    let (_, response) = send(addr, &handshake(addr, &["Origin: http://evil.example"])).await?;
    assert_eq!(response.status, 101);

    Ok(())
}

#[tokio::test]
async fn test_subprotocol_and_compression() -> anyhow::Result<()> {
    let upgrader = Upgrader::default()
        .with_subprotocols(["v2.chat", "v1.chat"])
        .with_compression(true);
    let addr = start_server(upgrader).await?;

    let request = handshake(
        addr,
        &[
            "Sec-WebSocket-Protocol: v1.chat, v2.chat",
            "Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits",
        ],
    );
    let (mut stream, response) = send(addr, &request).await?;

    assert_eq!(response.status, 101);
    assert_eq!(response.header("sec-websocket-protocol"), Some("v2.chat"));
    assert_eq!(
        response.header("sec-websocket-extensions"),
        Some("permessage-deflate; server_no_context_takeover; client_no_context_takeover")
    );

    stream.write_all(b"ping").await?;
    let mut echoed = [0u8; 4];
    stream.read_exact(&mut echoed).await?;
    assert_eq!(&echoed, b"ping");

    Ok(())
}

#[tokio::test]
async fn test_no_common_subprotocol() -> anyhow::Result<()> {
    let addr = start_server(Upgrader::default().with_subprotocols(["v2.chat"])).await?;
    let request = handshake(addr, &["Sec-WebSocket-Protocol: graphql-ws"]);
    let (_, response) = send(addr, &request).await?;

    assert_eq!(response.status, 101);
    assert_eq!(response.header("sec-websocket-protocol"), None);

    Ok(())
}
