use super::*;

use tokio::io::AsyncWriteExt;

const UPGRADE_REQUEST: &str = "GET /production HTTP/1.1\r\n\
    Host: localhost:18180\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\
    Sec-WebSocket-Protocol: scmp\r\n\
    \r\n";

#[test]
fn test_parse_upgrade_request() {
    let request = Request::parse(UPGRADE_REQUEST.trim_end_matches("\r\n\r\n")).unwrap();
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/production");
    assert!(request.keep_alive);
    assert!(request.wants_websocket());
    assert_eq!(
        request.sec_websocket_key.as_deref(),
        Some("dGhlIHNhbXBsZSBub25jZQ==")
    );
    assert_eq!(request.sec_websocket_version, Some(13));
    assert!(request.offers_protocol("scmp"));
    assert!(!request.offers_protocol("scsql"));
}

#[test]
fn test_parse_connection_close() {
    let request =
        Request::parse("GET / HTTP/1.1\r\nHost: x\r\nConnection: close").unwrap();
    assert!(!request.keep_alive);
}

#[test]
fn test_http_10_defaults_to_close() {
    let request = Request::parse("GET / HTTP/1.0\r\nHost: x").unwrap();
    assert!(!request.keep_alive);
}

#[test]
fn test_parse_expect_continue() {
    let request =
        Request::parse("POST /up HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 10")
            .unwrap();
    assert!(request.expect_continue);
    assert_eq!(request.content_length, 10);
}

#[test]
fn test_malformed_request_line() {
    assert!(Request::parse("GARBAGE").is_err());
    assert!(Request::parse("GET /x HTTP/3.0\r\n").is_err());
}

// Value from RFC 6455 section 1.3
#[test]
fn test_accept_key() {
    assert_eq!(
        websocket_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
        "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
}

#[test]
fn test_upgrade_response_headers() {
    let response = upgrade_response(
        "dGhlIHNhbXBsZSBub25jZQ==",
        "scsql",
        &[("X-DB-Backend", "dummy".to_string())],
    );
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(text.contains("Sec-WebSocket-Protocol: scsql\r\n"));
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert!(text.contains("X-DB-Backend: dummy\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn test_read_from_keeps_pipelined_bytes() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        client.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();
        client.write_all(b"\x82\x80AAAA").await.unwrap(); // a masked empty frame right behind
    });

    let mut buf = Vec::new();
    let request = Request::read_from(&mut server, &mut buf)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.path, "/production");
    // Whatever followed the head must survive in the rolling buffer
    assert!(buf.starts_with(b"\x82\x80") || buf.is_empty());
}

#[tokio::test]
async fn test_read_from_clean_eof() {
    let (client, mut server) = tokio::io::duplex(64);
    drop(client);

    let mut buf = Vec::new();
    assert!(
        Request::read_from(&mut server, &mut buf)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_read_from_truncated_head() {
    let (mut client, mut server) = tokio::io::duplex(64);

    tokio::spawn(async move {
        client.write_all(b"GET / HTTP/1.1\r\nHos").await.unwrap();
    });

    let mut buf = Vec::new();
    assert!(Request::read_from(&mut server, &mut buf).await.is_err());
}
