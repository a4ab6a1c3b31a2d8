//! In-process HTTP/1.1 servers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use relaynet::socket::stream::BoxedSocket;
use relaynet::socket::tls::TlsUpgrader;
use relaynet::socket::transport::{Connection, Transport};
use relaynet::NetError;
use std::collections::HashMap;
use relaynet::RequestError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Index of the accepted connection, from 0.
    pub conn: usize,
    pub method: String,
    pub target: String,
    /// Header lines exactly as sent.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub chunked: bool,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(k, _)| k.as_str()).collect()
    }
}

type Handler = dyn Fn(&Recorded) -> String + Send + Sync;

/// Keep-alive server answering every request through `handler`. A reply
/// containing `Connection: close` ends its connection.
pub struct MockServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = Arc::clone(&requests);
        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let conn = accepted.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(serve_connection(socket, conn, handler, recorded));
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    /// Answers every request with `response`.
    pub async fn fixed(response: &'static str) -> Self {
        Self::start(move |_| response.to_string()).await
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request(&self, i: usize) -> Recorded {
        self.requests()[i].clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    conn: usize,
    handler: Arc<Handler>,
    recorded: Arc<Mutex<Vec<Recorded>>>,
) {
    let mut buf = Vec::new();
    loop {
        let Some(request) = read_request(&mut socket, &mut buf, conn).await else {
            return;
        };
        let reply = handler(&request);
        recorded.lock().unwrap().push(request);
        if socket.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
        if reply.to_ascii_lowercase().contains("connection: close") {
            let _ = socket.shutdown().await;
            return;
        }
    }
}

async fn fill<S: AsyncRead + Unpin>(socket: &mut S, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 8192];
    match socket.read(&mut chunk).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
    }
}

fn find(buf: &[u8], needle: &[u8]) -> Option<usize> {
    buf.windows(needle.len()).position(|w| w == needle)
}

/// Read one request, head and body. `None` when the peer is gone.
pub async fn read_request<S: AsyncRead + Unpin>(
    socket: &mut S,
    buf: &mut Vec<u8>,
    conn: usize,
) -> Option<Recorded> {
    let head_end = loop {
        if let Some(pos) = find(buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if !fill(socket, buf).await {
            return None;
        }
    };
    let head: Vec<u8> = buf.drain(..head_end).collect();
    let head = String::from_utf8_lossy(&head).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| l.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut request = Recorded {
        conn,
        method,
        target,
        headers,
        body: Vec::new(),
        chunked: false,
    };

    if request
        .header("Transfer-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        request.chunked = true;
        loop {
            let line_end = loop {
                if let Some(pos) = find(buf, b"\r\n") {
                    break pos;
                }
                if !fill(socket, buf).await {
                    return None;
                }
            };
            let size_line: Vec<u8> = buf.drain(..line_end + 2).collect();
            let size_text = String::from_utf8_lossy(&size_line[..line_end]).into_owned();
            let size = usize::from_str_radix(size_text.trim(), 16).ok()?;
            while buf.len() < size + 2 {
                if !fill(socket, buf).await {
                    return None;
                }
            }
            request.body.extend(buf.drain(..size));
            buf.drain(..2);
            if size == 0 {
                break;
            }
        }
    } else if let Some(length) = request.header("Content-Length") {
        let length: usize = length.trim().parse().ok()?;
        while buf.len() < length {
            if !fill(socket, buf).await {
                return None;
            }
        }
        request.body = buf.drain(..length).collect();
    }
    Some(request)
}

/// `200 OK` with a text body.
pub fn ok(body: &str) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body)
}

pub fn status(code: u16, reason: &str, extra_headers: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n{}Content-Length: 0\r\n\r\n",
        code, reason, extra_headers
    )
}

/// A forward proxy that answers `CONNECT` through `gate` and then splices
/// the client to the requested authority. Plain requests are refused.
pub struct MockProxy {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    connections: Arc<AtomicUsize>,
}

impl MockProxy {
    /// `gate` returns `None` to open the tunnel, or the reply to send.
    pub async fn start<F>(gate: F) -> Self
    where
        F: Fn(&Recorded) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(gate);

        let recorded = Arc::clone(&requests);
        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let Ok((mut client, _)) = listener.accept().await else {
                    return;
                };
                let conn = accepted.fetch_add(1, Ordering::SeqCst);
                let gate = Arc::clone(&gate);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    loop {
                        let Some(request) = read_request(&mut client, &mut buf, conn).await else {
                            return;
                        };
                        let verdict = gate(&request);
                        let target = request.target.clone();
                        let is_connect = request.method == "CONNECT";
                        recorded.lock().unwrap().push(request);
                        match verdict {
                            Some(reply) => {
                                if client.write_all(reply.as_bytes()).await.is_err() {
                                    return;
                                }
                            }
                            None if is_connect => {
                                let Ok(mut upstream) = TcpStream::connect(&target).await else {
                                    let _ = client
                                        .write_all(status(502, "Bad Gateway", "").as_bytes())
                                        .await;
                                    return;
                                };
                                if client
                                    .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                                let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                                return;
                            }
                            None => {
                                let _ = client
                                    .write_all(status(405, "Method Not Allowed", "Connection: close\r\n").as_bytes())
                                    .await;
                                return;
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Skips the handshake and records the host name it was asked to verify.
#[derive(Default)]
pub struct PassthroughTls {
    pub verified: Mutex<Vec<String>>,
}

#[async_trait]
impl TlsUpgrader for PassthroughTls {
    async fn upgrade(
        &self,
        socket: BoxedSocket,
        verify_hostname: &str,
    ) -> Result<BoxedSocket, RequestError> {
        self.verified.lock().unwrap().push(verify_hostname.to_string());
        Ok(socket)
    }
}

/// TCP transport with a fixed name table, so tests can address local
/// listeners by distinct host names.
pub struct NamedHosts {
    names: HashMap<String, SocketAddr>,
    tls: Arc<dyn TlsUpgrader>,
}

impl NamedHosts {
    pub fn new(tls: Arc<dyn TlsUpgrader>) -> Self {
        Self {
            names: HashMap::new(),
            tls,
        }
    }

    pub fn with_name(mut self, name: &str, addr: SocketAddr) -> Self {
        self.names.insert(name.to_string(), addr);
        self
    }
}

#[async_trait]
impl Transport for NamedHosts {
    async fn open(&self, host: &str, port: u16, tls: bool) -> Result<Connection, RequestError> {
        let addr = match self.names.get(host) {
            Some(addr) => *addr,
            None => format!("{}:{}", host, port)
                .parse()
                .map_err(|_| RequestError::new(NetError::NameNotResolved, host.to_string()))?,
        };
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RequestError::new(NetError::ConnectionRefused, e.to_string()))?;
        let mut socket = BoxedSocket::new(stream);
        if tls {
            socket = self.tls.upgrade(socket, host).await?;
        }
        Ok(Connection::new(socket, host, port, tls))
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
