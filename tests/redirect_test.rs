mod common;

use bytes::Bytes;
use common::{ok, status, MockServer};
use futures::stream;
use relaynet::{AuthConfig, BodyDescriptor, Client, ErrorCategory, NetError};
use std::time::Duration;

fn redirect(code: u16, location: &str) -> String {
    status(code, "Redirect", &format!("Location: {}\r\n", location))
}

#[tokio::test]
async fn test_303_becomes_get_without_body() {
    let server = MockServer::start(|req| match req.target.as_str() {
        "/submit" => redirect(303, "/result?id=7"),
        _ => ok("result"),
    })
    .await;
    let client = Client::new().unwrap();

    let response = client
        .post(server.url("/submit"))
        .header("Content-Type", "application/json")
        .header("X-Trace", "t-1")
        .body(r#"{"a":1}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "result");
    let second = server.request(1);
    assert_eq!(second.method, "GET");
    assert_eq!(second.target, "/result?id=7");
    assert!(second.body.is_empty());
    assert!(!second.has_header("Content-Length"));
    assert!(!second.has_header("Content-Type"));
    assert_eq!(second.header("X-Trace"), Some("t-1"));
}

#[tokio::test]
async fn test_303_keeps_head() {
    let server = MockServer::start(|req| match req.target.as_str() {
        "/a" => redirect(303, "/b"),
        _ => status(200, "OK", ""),
    })
    .await;
    let client = Client::new().unwrap();

    client.head(server.url("/a")).send().await.unwrap();
    assert_eq!(server.request(1).method, "HEAD");
}

#[tokio::test]
async fn test_307_resends_identical_body() {
    let server = MockServer::start(|req| match req.target.as_str() {
        "/v1/upload" => redirect(307, "/v2/upload"),
        _ => ok("stored"),
    })
    .await;
    let client = Client::new().unwrap();

    client
        .put(server.url("/v1/upload"))
        .header("Content-Type", "application/octet-stream")
        .body(vec![0u8, 1, 2, 3, 255])
        .send()
        .await
        .unwrap();

    let (first, second) = (server.request(0), server.request(1));
    assert_eq!(second.method, "PUT");
    assert_eq!(second.body, first.body);
    assert_eq!(second.body, vec![0u8, 1, 2, 3, 255]);
    assert_eq!(second.header("Content-Length"), Some("5"));
    assert_eq!(second.header("Content-Type"), Some("application/octet-stream"));
}

#[tokio::test]
async fn test_308_replays_buffered_stream() {
    let server = MockServer::start(|req| match req.target.as_str() {
        "/old" => redirect(308, "/new"),
        _ => ok(""),
    })
    .await;
    let client = Client::new().unwrap();
    let body = BodyDescriptor::replayable(
        vec![Bytes::from_static(b"part-1,"), Bytes::from_static(b"part-2")],
        None,
    );

    client.post(server.url("/old")).body(body).send().await.unwrap();

    let second = server.request(1);
    assert!(second.chunked);
    assert_eq!(second.body, b"part-1,part-2");
}

#[tokio::test]
async fn test_307_live_stream_cannot_rewind() {
    let server = MockServer::start(|req| match req.target.as_str() {
        "/old" => redirect(307, "/new"),
        _ => ok(""),
    })
    .await;
    let client = Client::new().unwrap();
    let items: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"once"))];

    let err = client
        .post(server.url("/old"))
        .body(BodyDescriptor::stream(stream::iter(items), None))
        .send()
        .await
        .unwrap_err();

    assert_eq!(err.code(), NetError::UploadStreamRewindNotSupported);
    assert_eq!(err.response().map(|r| r.status().as_u16()), Some(307));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_302_post_becomes_get() {
    let server = MockServer::start(|req| match req.target.as_str() {
        "/form" => redirect(302, "/done"),
        _ => ok(""),
    })
    .await;
    let client = Client::new().unwrap();

    client.post(server.url("/form")).body("x=1").send().await.unwrap();
    let second = server.request(1);
    assert_eq!(second.method, "GET");
    assert!(second.body.is_empty());
}

#[tokio::test]
async fn test_cross_origin_strips_credentials() {
    let target = MockServer::start(|_| ok("elsewhere")).await;
    let location = target.url("/landing");
    let origin = MockServer::start(move |req| match req.header("Authorization") {
        None => status(401, "Unauthorized", "WWW-Authenticate: Basic realm=\"r\"\r\n"),
        Some(_) => redirect(302, &location),
    })
    .await;
    let client = Client::new().unwrap();

    let response = client
        .get(origin.url("/start"))
        .header("Cookie", "session=1")
        .header("X-Keep", "yes")
        .auth(AuthConfig::basic("u", "p"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "elsewhere");
    let landed = target.request(0);
    assert!(!landed.has_header("Authorization"));
    assert!(!landed.has_header("Cookie"));
    assert_eq!(landed.header("X-Keep"), Some("yes"));
    assert_eq!(landed.header("Host"), Some(target.addr.to_string().as_str()));
}

#[tokio::test]
async fn test_redirect_limit() {
    let server = MockServer::start(|_| redirect(302, "/loop")).await;
    let client = Client::new().unwrap();

    let err = client.get(server.url("/start")).send().await.unwrap_err();

    assert_eq!(err.code(), NetError::TooManyRedirects);
    assert_eq!(err.category(), ErrorCategory::RedirectLoopOrTimeout);
    assert_eq!(err.response().map(|r| r.status().as_u16()), Some(302));
    // The first request plus five followed hops.
    assert_eq!(server.requests().len(), 6);
}

#[tokio::test]
async fn test_redirect_not_followed() {
    let server = MockServer::start(|_| redirect(301, "https://moved.example/")).await;
    let client = Client::new().unwrap();

    let response = client
        .get(server.url("/"))
        .follow_redirects(false)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 301);
    assert_eq!(response.location(), Some("https://moved.example/"));
}

#[tokio::test]
async fn test_unsafe_location_rejected() {
    let server = MockServer::start(|_| redirect(302, "file:///etc/passwd")).await;
    let client = Client::new().unwrap();

    let err = client.get(server.url("/")).send().await.unwrap_err();
    assert_eq!(err.code(), NetError::UnsafeRedirect);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hops_share_one_deadline() {
    // Every hop takes 40ms and the chain never ends.
    let server = MockServer::start(|req| {
        std::thread::sleep(Duration::from_millis(40));
        let n: u32 = req.target.trim_start_matches("/hop/").parse().unwrap_or(0);
        redirect(302, &format!("/hop/{}", n + 1))
    })
    .await;
    let client = Client::new().unwrap();

    let err = client
        .get(server.url("/hop/0"))
        .options(
            relaynet::Options::default()
                .with_max_redirects(1000)
                .with_timeout(Some(Duration::from_millis(300))),
        )
        .send()
        .await
        .unwrap_err();

    assert_eq!(err.code(), NetError::TimedOut);
    assert_eq!(err.category(), ErrorCategory::RedirectLoopOrTimeout);
    assert!(server.requests().len() < 20);
}
