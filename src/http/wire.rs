//! HTTP/1.1 wire codec.
//!
//! Requests are serialized by hand so header names go out exactly as they
//! were recorded; responses are parsed with `httparse`.

use crate::base::context::IoResultExt;
use crate::base::neterror::{NetError, RequestError};
use crate::http::framing::FramingDecision;
use crate::http::headers::HeaderSet;
use crate::http::request::FrozenRequest;
use crate::http::response::InboundResponse;
use crate::socket::stream::BoxedSocket;
use crate::socket::transport::Connection;
use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::trace;
use url::Url;

const MAX_HEADERS: usize = 128;
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Shape of the request-target on the request line (RFC 9112 section 3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetForm {
    /// `/path?query`, to an origin server.
    Origin,
    /// `http://host/path?query`, to a forward proxy.
    Absolute,
    /// `host:port`, for CONNECT.
    Authority,
}

/// Serialize the request line and headers, ending with the blank line.
pub fn serialize_head(frozen: &FrozenRequest, form: TargetForm) -> Result<Vec<u8>, RequestError> {
    let request = frozen.request();
    let target = match form {
        TargetForm::Origin => request.request_target(frozen.encode_query()),
        TargetForm::Absolute => request.absolute_target(frozen.encode_query()),
        TargetForm::Authority => request.origin()?.authority(),
    };

    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(request.method().as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    if !request.headers().contains("Host") {
        let host = match form {
            TargetForm::Authority => request.origin()?.authority(),
            _ => request.host_header(),
        };
        push_header(&mut head, "Host", &host)?;
    }
    for (name, value) in request.headers().iter() {
        push_header(&mut head, name, value)?;
    }
    if let Some((name, value)) = frozen.framing().header() {
        push_header(&mut head, name, &value)?;
    }
    head.extend_from_slice(b"\r\n");
    Ok(head)
}

fn push_header(head: &mut Vec<u8>, name: &str, value: &str) -> Result<(), RequestError> {
    // Validate without altering the recorded casing.
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
        RequestError::new(NetError::InvalidHeader, format!("invalid header name {:?}", name))
    })?;
    HeaderValue::from_str(value).map_err(|_| {
        RequestError::new(NetError::InvalidHeader, format!("invalid value for header {}", name))
    })?;
    head.extend_from_slice(name.as_bytes());
    head.extend_from_slice(b": ");
    head.extend_from_slice(value.as_bytes());
    head.extend_from_slice(b"\r\n");
    Ok(())
}

/// Write a frozen request, head and body, to the connection.
///
/// Bytes are counted as the body streams out; under `ContentLength` any
/// mismatch with the declared length fails with `FramingConflict`.
pub async fn write_request(
    conn: &mut Connection,
    frozen: &FrozenRequest,
    form: TargetForm,
) -> Result<(), RequestError> {
    let head = serialize_head(frozen, form)?;
    let framing = frozen.framing();
    let id = conn.id();
    let (socket, _) = conn.io();
    let mut out = BufWriter::new(socket);

    trace!(conn = id, bytes = head.len(), ?framing, "writing request head");
    out.write_all(&head).await.io_context("write request head")?;

    if framing.sends_body() {
        let mut chunks = frozen.request().body().open()?;
        let mut sent: u64 = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| {
                RequestError::new(NetError::ConnectionAborted, format!("body stream failed: {}", e))
                    .with_source(e)
            })?;
            if chunk.is_empty() {
                continue;
            }
            sent += chunk.len() as u64;
            match framing {
                FramingDecision::ContentLength(declared) if sent > declared => {
                    return Err(length_conflict(declared, sent, frozen));
                }
                FramingDecision::Chunked => {
                    out.write_all(format!("{:X}\r\n", chunk.len()).as_bytes())
                        .await
                        .io_context("write chunk size")?;
                    out.write_all(&chunk).await.io_context("write chunk")?;
                    out.write_all(b"\r\n").await.io_context("write chunk")?;
                }
                _ => out.write_all(&chunk).await.io_context("write body")?,
            }
        }
        match framing {
            FramingDecision::ContentLength(declared) if sent != declared => {
                return Err(length_conflict(declared, sent, frozen));
            }
            FramingDecision::Chunked => {
                out.write_all(b"0\r\n\r\n")
                    .await
                    .io_context("write last chunk")?;
            }
            _ => {}
        }
        trace!(conn = id, body_bytes = sent, "request body written");
    }

    out.flush().await.io_context("flush request")?;
    Ok(())
}

fn length_conflict(declared: u64, sent: u64, frozen: &FrozenRequest) -> RequestError {
    RequestError::new(
        NetError::FramingConflict,
        format!("body declared {} bytes but produced {}", declared, sent),
    )
    .with_request(frozen.request().clone())
}

/// A response as read from the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub version: Version,
    pub reason: String,
    pub headers: HeaderSet,
    pub body: Bytes,
    /// Whether the connection can carry another request.
    pub keep_alive: bool,
}

impl RawResponse {
    pub fn into_response(self, url: Url) -> InboundResponse {
        InboundResponse::new(
            self.status,
            self.version,
            self.reason,
            self.headers,
            self.body,
            url,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    None,
    Fixed(usize),
    Chunked,
    UntilClose,
}

struct ResponseHead {
    status: StatusCode,
    version: Version,
    reason: String,
    headers: HeaderSet,
}

/// Read one final response (1xx interim responses are skipped).
///
/// `method` is the method of the request being answered: HEAD responses and
/// 2xx answers to CONNECT carry no body.
pub async fn read_response(
    conn: &mut Connection,
    method: &Method,
) -> Result<RawResponse, RequestError> {
    let id = conn.id();
    let response = {
        let (socket, buf) = conn.io();
        let mut reader = WireReader { socket, buf };
        loop {
            let head = reader.read_head().await?;
            if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
                trace!(conn = id, status = head.status.as_u16(), "skipping interim response");
                continue;
            }
            let mode = body_mode(&head, method)?;
            let body = match mode {
                BodyMode::None => Bytes::new(),
                BodyMode::Fixed(n) => reader.read_fixed(n).await?,
                BodyMode::Chunked => reader.read_chunked().await?,
                BodyMode::UntilClose => reader.read_to_close().await?,
            };
            let keep_alive = mode != BodyMode::UntilClose && persistent(&head);
            break RawResponse {
                status: head.status,
                version: head.version,
                reason: head.reason,
                headers: head.headers,
                body,
                keep_alive,
            };
        }
    };
    if !response.keep_alive {
        conn.mark_closed();
    }
    trace!(
        conn = id,
        status = response.status.as_u16(),
        body_bytes = response.body.len(),
        keep_alive = response.keep_alive,
        "response read"
    );
    Ok(response)
}

fn body_mode(head: &ResponseHead, method: &Method) -> Result<BodyMode, RequestError> {
    let status = head.status;
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || (*method == Method::CONNECT && status.is_success())
    {
        return Ok(BodyMode::None);
    }

    let codings = head.headers.tokens("Transfer-Encoding");
    if let Some(last) = codings.last() {
        return Ok(if last.eq_ignore_ascii_case("chunked") {
            BodyMode::Chunked
        } else {
            BodyMode::UntilClose
        });
    }

    let mut length: Option<usize> = None;
    for value in head.headers.get_all("Content-Length") {
        for part in value.split(',') {
            let n: usize = part.trim().parse().map_err(|_| {
                RequestError::new(
                    NetError::InvalidResponse,
                    format!("invalid Content-Length {:?}", value),
                )
            })?;
            if length.is_some_and(|prev| prev != n) {
                return Err(RequestError::new(
                    NetError::InvalidResponse,
                    "conflicting Content-Length values",
                ));
            }
            length = Some(n);
        }
    }
    Ok(match length {
        Some(0) => BodyMode::None,
        Some(n) => BodyMode::Fixed(n),
        None => BodyMode::UntilClose,
    })
}

fn persistent(head: &ResponseHead) -> bool {
    if head.headers.has_token("Connection", "close") {
        return false;
    }
    match head.version {
        Version::HTTP_10 => head.headers.has_token("Connection", "keep-alive"),
        _ => true,
    }
}

struct WireReader<'a> {
    socket: &'a mut BoxedSocket,
    buf: &'a mut BytesMut,
}

impl WireReader<'_> {
    async fn fill(&mut self) -> Result<usize, RequestError> {
        self.buf.reserve(8 * 1024);
        self.socket
            .read_buf(self.buf)
            .await
            .io_context("read response")
    }

    async fn read_head(&mut self) -> Result<ResponseHead, RequestError> {
        loop {
            if !self.buf.is_empty() {
                let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let mut parsed = httparse::Response::new(&mut headers);
                match parsed.parse(&self.buf[..]) {
                    Ok(httparse::Status::Complete(len)) => {
                        let head = head_from(&parsed)?;
                        self.buf.advance(len);
                        return Ok(head);
                    }
                    Ok(httparse::Status::Partial) => {}
                    Err(httparse::Error::TooManyHeaders) => {
                        return Err(RequestError::new(
                            NetError::ResponseHeadersTooBig,
                            format!("more than {} response headers", MAX_HEADERS),
                        ))
                    }
                    Err(e) => {
                        return Err(RequestError::new(
                            NetError::InvalidHttpResponse,
                            format!("malformed response head: {}", e),
                        ))
                    }
                }
                if self.buf.len() > MAX_HEAD_BYTES {
                    return Err(RequestError::new(
                        NetError::ResponseHeadersTooBig,
                        format!("response head exceeds {} bytes", MAX_HEAD_BYTES),
                    ));
                }
            }
            if self.fill().await? == 0 {
                return Err(if self.buf.is_empty() {
                    RequestError::new(NetError::EmptyResponse, "connection closed before any response")
                } else {
                    RequestError::new(NetError::InvalidHttpResponse, "connection closed mid response head")
                });
            }
        }
    }

    async fn read_exact(&mut self, n: usize, short: NetError) -> Result<Bytes, RequestError> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(RequestError::new(
                    short,
                    format!("connection closed after {} of {} body bytes", self.buf.len(), n),
                ));
            }
        }
        Ok(self.buf.split_to(n).freeze())
    }

    async fn read_fixed(&mut self, n: usize) -> Result<Bytes, RequestError> {
        self.read_exact(n, NetError::ContentLengthMismatch).await
    }

    async fn read_line(&mut self) -> Result<Bytes, RequestError> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos).freeze();
                self.buf.advance(2);
                return Ok(line);
            }
            if self.buf.len() > MAX_LINE_BYTES {
                return Err(RequestError::new(
                    NetError::InvalidChunkedEncoding,
                    "chunk line too long",
                ));
            }
            if self.fill().await? == 0 {
                return Err(RequestError::new(
                    NetError::IncompleteChunkedEncoding,
                    "connection closed inside chunked body",
                ));
            }
        }
    }

    async fn read_chunked(&mut self) -> Result<Bytes, RequestError> {
        let mut body = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            let size = parse_chunk_size(&line)?;
            if size == 0 {
                // Trailer section, ends with an empty line.
                while !self.read_line().await?.is_empty() {}
                return Ok(body.freeze());
            }
            let data = self
                .read_exact(size, NetError::IncompleteChunkedEncoding)
                .await?;
            body.extend_from_slice(&data);
            if !self.read_line().await?.is_empty() {
                return Err(RequestError::new(
                    NetError::InvalidChunkedEncoding,
                    "chunk data not followed by CRLF",
                ));
            }
        }
    }

    async fn read_to_close(&mut self) -> Result<Bytes, RequestError> {
        while self.fill().await? > 0 {}
        Ok(self.buf.split().freeze())
    }
}

fn head_from(parsed: &httparse::Response<'_, '_>) -> Result<ResponseHead, RequestError> {
    let code = parsed.code.unwrap_or_default();
    let status = StatusCode::from_u16(code).map_err(|_| {
        RequestError::new(NetError::InvalidHttpResponse, format!("invalid status {}", code))
    })?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let mut headers = HeaderSet::new();
    for h in parsed.headers.iter() {
        headers.append(h.name, String::from_utf8_lossy(h.value).into_owned());
    }
    Ok(ResponseHead {
        status,
        version,
        reason: parsed.reason.unwrap_or_default().to_string(),
        headers,
    })
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, RequestError> {
    let invalid = || {
        RequestError::new(
            NetError::InvalidChunkedEncoding,
            format!("invalid chunk size line {:?}", String::from_utf8_lossy(line)),
        )
    };
    let text = std::str::from_utf8(line).map_err(|_| invalid())?;
    let hex = text.split(';').next().unwrap_or_default().trim();
    if hex.is_empty() {
        return Err(invalid());
    }
    usize::from_str_radix(hex, 16).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::framing::StreamingPolicy;
    use crate::http::request::OutboundRequest;
    use crate::http::requestbody::BodyDescriptor;
    use futures::stream;
    use std::io;
    use tokio::io::{duplex, DuplexStream};

    fn pipe() -> (Connection, DuplexStream) {
        let (a, b) = duplex(64 * 1024);
        (Connection::new(BoxedSocket::new(a), "example.com", 80, false), b)
    }

    async fn written(mut peer: DuplexStream, conn: Connection) -> String {
        drop(conn);
        let mut out = Vec::new();
        peer.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_head_keeps_casing_and_order() {
        let frozen = OutboundRequest::get("http://example.com/p?x=1")
            .unwrap()
            .with_header("X-Custom-Header", "one")
            .with_header("accept", "*/*")
            .with_header("x-custom-header", "two")
            .freeze(StreamingPolicy::Auto, true);
        let head = String::from_utf8(serialize_head(&frozen, TargetForm::Origin).unwrap()).unwrap();
        assert_eq!(
            head,
            "GET /p?x=1 HTTP/1.1\r\nHost: example.com\r\nX-Custom-Header: one\r\n\
             X-Custom-Header: two\r\naccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn test_connect_head() {
        let frozen = OutboundRequest::new(Method::CONNECT, "https://target.test:8443/")
            .unwrap()
            .freeze(StreamingPolicy::Never, true);
        let head = String::from_utf8(serialize_head(&frozen, TargetForm::Authority).unwrap()).unwrap();
        assert_eq!(
            head,
            "CONNECT target.test:8443 HTTP/1.1\r\nHost: target.test:8443\r\n\r\n"
        );
    }

    #[test]
    fn test_absolute_form() {
        let frozen = OutboundRequest::get("http://example.com:8080/a")
            .unwrap()
            .freeze(StreamingPolicy::Auto, true);
        let head = String::from_utf8(serialize_head(&frozen, TargetForm::Absolute).unwrap()).unwrap();
        assert!(head.starts_with("GET http://example.com:8080/a HTTP/1.1\r\nHost: example.com:8080\r\n"));
    }

    #[test]
    fn test_invalid_header_rejected_at_serialization() {
        let frozen = OutboundRequest::get("http://example.com/")
            .unwrap()
            .with_header("X-Bad", "line\r\nInjected: yes")
            .freeze(StreamingPolicy::Auto, true);
        let err = serialize_head(&frozen, TargetForm::Origin).unwrap_err();
        assert_eq!(err.code(), NetError::InvalidHeader);
    }

    #[tokio::test]
    async fn test_write_fixed_body() {
        let (mut conn, peer) = pipe();
        let frozen = OutboundRequest::post("http://example.com/policy")
            .unwrap()
            .with_body("hello")
            .freeze(StreamingPolicy::Auto, true);
        write_request(&mut conn, &frozen, TargetForm::Origin).await.unwrap();
        let text = written(peer, conn).await;
        assert!(text.contains("Content-Length: 5\r\n\r\nhello"));
        assert!(!text.contains("Transfer-Encoding"));
    }

    #[tokio::test]
    async fn test_write_chunked_body() {
        let (mut conn, peer) = pipe();
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"hel")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"lo world")),
        ];
        let frozen = OutboundRequest::post("http://example.com/")
            .unwrap()
            .with_body(BodyDescriptor::stream(stream::iter(chunks), None))
            .freeze(StreamingPolicy::Auto, true);
        write_request(&mut conn, &frozen, TargetForm::Origin).await.unwrap();
        let text = written(peer, conn).await;
        assert!(text.contains("Transfer-Encoding: chunked\r\n\r\n3\r\nhel\r\n8\r\nlo world\r\n0\r\n\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[tokio::test]
    async fn test_declared_length_mismatch_is_framing_conflict() {
        let (mut conn, _peer) = pipe();
        let chunks: Vec<io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"abc"))];
        let frozen = OutboundRequest::post("http://example.com/")
            .unwrap()
            .with_body(BodyDescriptor::stream(stream::iter(chunks), Some(10)))
            .freeze(StreamingPolicy::Auto, true);
        let err = write_request(&mut conn, &frozen, TargetForm::Origin).await.unwrap_err();
        assert_eq!(err.code(), NetError::FramingConflict);
        assert!(err.request().is_some());
    }

    #[tokio::test]
    async fn test_long_stream_stops_at_declared_length() {
        let (mut conn, _peer) = pipe();
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defgh")),
        ];
        let frozen = OutboundRequest::post("http://example.com/")
            .unwrap()
            .with_body(BodyDescriptor::stream(stream::iter(chunks), Some(4)))
            .freeze(StreamingPolicy::Auto, true);
        let err = write_request(&mut conn, &frozen, TargetForm::Origin).await.unwrap_err();
        assert_eq!(err.code(), NetError::FramingConflict);
    }

    async fn respond(raw: &'static [u8], method: Method) -> Result<(RawResponse, Connection), RequestError> {
        let (mut conn, mut peer) = pipe();
        peer.write_all(raw).await.unwrap();
        drop(peer);
        let resp = read_response(&mut conn, &method).await?;
        Ok((resp, conn))
    }

    #[tokio::test]
    async fn test_read_content_length() {
        let (resp, conn) = respond(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Server-Case: Yes\r\n\r\nhello",
            Method::GET,
        )
        .await
        .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"hello");
        assert_eq!(resp.headers.recorded_name("x-server-case"), Some("X-Server-Case"));
        assert!(resp.keep_alive);
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_read_chunked_with_trailers() {
        let (resp, _) = respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: t\r\n\r\n",
            Method::GET,
        )
        .await
        .unwrap();
        assert_eq!(&resp.body[..], b"Wikipedia");
        assert!(resp.keep_alive);
    }

    #[tokio::test]
    async fn test_read_until_close() {
        let (resp, conn) = respond(b"HTTP/1.1 200 OK\r\n\r\nstreamed", Method::GET)
            .await
            .unwrap();
        assert_eq!(&resp.body[..], b"streamed");
        assert!(!resp.keep_alive);
        assert!(!conn.is_reusable());
    }

    #[tokio::test]
    async fn test_skips_interim_responses() {
        let (resp, _) = respond(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
            Method::POST,
        )
        .await
        .unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let (resp, _) = respond(b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\n", Method::HEAD)
            .await
            .unwrap();
        assert!(resp.body.is_empty());
    }

    #[tokio::test]
    async fn test_connect_success_has_no_body() {
        let (resp, conn) = respond(
            b"HTTP/1.1 200 Connection established\r\n\r\n",
            Method::CONNECT,
        )
        .await
        .unwrap();
        assert_eq!(resp.reason, "Connection established");
        assert!(conn.into_socket().is_ok());
    }

    #[tokio::test]
    async fn test_connection_close_not_reusable() {
        let (resp, _) = respond(
            b"HTTP/1.1 401 Unauthorized\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
            Method::GET,
        )
        .await
        .unwrap();
        assert!(!resp.keep_alive);
    }

    #[tokio::test]
    async fn test_http10_defaults_to_close() {
        let (resp, _) = respond(b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok", Method::GET)
            .await
            .unwrap();
        assert_eq!(resp.version, Version::HTTP_10);
        assert!(!resp.keep_alive);
    }

    #[tokio::test]
    async fn test_empty_response() {
        let err = respond(b"", Method::GET).await.unwrap_err();
        assert_eq!(err.code(), NetError::EmptyResponse);
    }

    #[tokio::test]
    async fn test_short_body() {
        let err = respond(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc", Method::GET)
            .await
            .unwrap_err();
        assert_eq!(err.code(), NetError::ContentLengthMismatch);
    }

    #[tokio::test]
    async fn test_bad_chunk_size() {
        let err = respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n",
            Method::GET,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), NetError::InvalidChunkedEncoding);
    }

    #[tokio::test]
    async fn test_garbage_head() {
        let err = respond(b"NOT HTTP AT ALL\r\n\r\n", Method::GET).await.unwrap_err();
        assert_eq!(err.code(), NetError::InvalidHttpResponse);
    }
}
