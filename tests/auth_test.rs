//! Basic, Digest and NTLM against in-process origin servers.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{ok, status, MockServer, Recorded};
use relaynet::http::auth::basic;
use relaynet::http::auth::digest::DigestChallenge;
use relaynet::http::auth::ntlm::{self, AuthenticateMessage, ChallengeMessage};
use relaynet::{AuthConfig, Client, Credentials, ErrorCategory, NetError, StaticCredentials};
use std::sync::Arc;

const DIGEST_CHALLENGE: &str = r#"realm="api@test", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", qop="auth", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;
const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];

fn basic_server(user: &'static str, pass: &'static str) -> impl Fn(&Recorded) -> String + Send + Sync + 'static {
    move |req| match req.header("Authorization").and_then(basic::decode) {
        Some((u, p)) if u == user && p == pass => ok("welcome"),
        _ => status(401, "Unauthorized", "WWW-Authenticate: Basic realm=\"files\"\r\n"),
    }
}

#[tokio::test]
async fn test_basic_preemptive_single_request() {
    let server = MockServer::start(basic_server("alice", "s3cret")).await;
    let client = Client::new().unwrap();

    let response = client
        .get(server.url("/private"))
        .auth(AuthConfig::basic("alice", "s3cret").preemptive(true))
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "welcome");
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_basic_reactive_two_requests() {
    let server = MockServer::start(basic_server("alice", "s3cret")).await;
    let client = Client::new().unwrap();

    let response = client
        .post(server.url("/private"))
        .body("payload")
        .auth(AuthConfig::basic("alice", "s3cret"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].has_header("Authorization"));
    assert_eq!(requests[1].header("Authorization"), Some("Basic YWxpY2U6czNjcmV0"));
    assert_eq!(requests[1].body, b"payload");
    assert_eq!(requests[0].conn, requests[1].conn);
}

#[tokio::test]
async fn test_basic_wrong_password_fails_with_response() {
    let server = MockServer::start(basic_server("alice", "s3cret")).await;
    let client = Client::new().unwrap();

    let err = client
        .get(server.url("/private"))
        .auth(AuthConfig::basic("alice", "guess"))
        .send()
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::AuthFailed);
    assert_eq!(err.response().map(|r| r.status().as_u16()), Some(401));
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_missing_credentials_sends_nothing_more() {
    let server = MockServer::start(basic_server("alice", "s3cret")).await;
    let client = Client::new().unwrap();

    let err = client
        .get(server.url("/private"))
        .auth(AuthConfig::new(relaynet::AuthScheme::Basic))
        .send()
        .await
        .unwrap_err();

    assert_eq!(err.code(), NetError::MissingAuthCredentials);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_credentials_from_source() {
    let server = MockServer::start(basic_server("svc", "token")).await;
    let client = Client::builder()
        .credential_source(Arc::new(StaticCredentials(Credentials::new("svc", "token"))))
        .build()
        .unwrap();

    let response = client
        .get(server.url("/"))
        .auth(AuthConfig::new(relaynet::AuthScheme::Basic))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

fn digest_server(req: &Recorded) -> String {
    let challenge = DigestChallenge::parse(DIGEST_CHALLENGE).unwrap();
    match req.header("Authorization") {
        Some(auth)
            if challenge
                .verify(auth, &req.method, "Circle Of Life", Some(req.body.as_slice()))
                .unwrap_or(false) =>
        {
            ok("digest ok")
        }
        _ => status(
            401,
            "Unauthorized",
            &format!("WWW-Authenticate: Digest {}\r\n", DIGEST_CHALLENGE),
        ),
    }
}

#[tokio::test]
async fn test_digest_two_requests_then_nonce_reuse() {
    let server = MockServer::start(digest_server).await;
    let client = Client::new().unwrap();
    let auth = AuthConfig::digest("Mufasa", "Circle Of Life");

    let response = client
        .get(server.url("/dir/index.html?view=full"))
        .auth(auth.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().unwrap(), "digest ok");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let header = requests[1].header("Authorization").unwrap();
    for field in ["username=\"Mufasa\"", "realm=\"api@test\"", "uri=\"/dir/index.html?view=full\"", "response=\"", "nc=00000001"] {
        assert!(header.contains(field), "{} missing from {}", field, header);
    }

    // The cached nonce is reused with the next count: one request.
    client
        .get(server.url("/dir/other"))
        .auth(auth)
        .send()
        .await
        .unwrap();
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].header("Authorization").unwrap().contains("nc=00000002"));
}

fn ntlm_server(req: &Recorded) -> String {
    let token = req
        .header("Authorization")
        .and_then(|v| v.strip_prefix("NTLM "))
        .and_then(|t| STANDARD.decode(t).ok());
    let Some(token) = token else {
        return status(401, "Unauthorized", "WWW-Authenticate: NTLM\r\n");
    };
    match ntlm::message_type(&token) {
        Ok(1) => {
            let type2 = ChallengeMessage::new(SERVER_CHALLENGE, "CORP").to_bytes();
            status(
                401,
                "Unauthorized",
                &format!("WWW-Authenticate: NTLM {}\r\n", STANDARD.encode(type2)),
            )
        }
        Ok(3) => {
            let type3 = AuthenticateMessage::parse(&token).unwrap();
            if type3.verify_v2("Pa55w0rd", &SERVER_CHALLENGE).unwrap_or(false) {
                ok(&format!("hello {}\\{}", type3.domain, type3.user))
            } else {
                status(401, "Unauthorized", "WWW-Authenticate: NTLM\r\n")
            }
        }
        _ => status(400, "Bad Request", "Connection: close\r\n"),
    }
}

#[tokio::test]
async fn test_ntlm_three_requests_one_connection() {
    let server = MockServer::start(ntlm_server).await;
    let client = Client::new().unwrap();

    let response = client
        .get(server.url("/sharepoint"))
        .auth(AuthConfig::ntlm("alice", "Pa55w0rd").with_domain("CORP"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "hello CORP\\alice");
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(server.connections(), 1);
    assert!(requests.iter().all(|r| r.conn == requests[0].conn));
}

#[tokio::test]
async fn test_ntlm_empty_domain() {
    let server = MockServer::start(ntlm_server).await;
    let client = Client::new().unwrap();

    let response = client
        .get(server.url("/"))
        .auth(AuthConfig::ntlm("alice", "Pa55w0rd"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "hello \\alice");
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn test_ntlm_wrong_password() {
    let server = MockServer::start(ntlm_server).await;
    let client = Client::new().unwrap();

    let err = client
        .get(server.url("/"))
        .auth(AuthConfig::ntlm("alice", "nope"))
        .send()
        .await
        .unwrap_err();

    assert_eq!(err.code(), NetError::InvalidAuthCredentials);
    assert_eq!(server.requests().len(), 3);
}
