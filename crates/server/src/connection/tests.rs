use super::*;

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use shared::log;

use crate::{
    acl::IpAcl,
    config::{Config, QueueConfig},
    queue::{Queue, worker},
};

#[test]
fn test_sanitize_rejects_traversal() {
    assert!(sanitize("../etc/passwd").is_none());
    assert!(sanitize("a/../../b").is_none());
}

#[test]
fn test_sanitize_directory_gets_index() {
    assert_eq!(sanitize("").unwrap(), PathBuf::from("index.html"));
    assert_eq!(sanitize("docs/").unwrap(), PathBuf::from("docs/index.html"));
    assert_eq!(sanitize("app.js").unwrap(), PathBuf::from("app.js"));
}

#[test]
fn test_without_query() {
    assert_eq!(without_query("/production?token=x"), "/production");
    assert_eq!(without_query("/production"), "/production");
}

// ----------------------------------------------------------------------
//  Wire level tests: a fake client on the other end of a pipe
// ----------------------------------------------------------------------

fn peer() -> SocketAddr {
    "127.0.0.1:6000".parse().unwrap()
}

fn test_config() -> Config {
    let mut config = Config::from_toml_str("").unwrap();
    config.queues.push(QueueConfig {
        name: "production".to_string(),
        groups: vec!["PICK".to_string()],
        max_payload_size: 1024,
        ..QueueConfig::default()
    });
    config
}

/// Spawns the configured queue workers and one connection under test.
fn start(config: Config, stop: &Trigger) -> DuplexStream {
    let mut queues = HashMap::new();
    for queue_config in &config.queues {
        let queue = Queue::from_config(&config, queue_config).unwrap();
        let (handle, _join) = worker::spawn(queue, IpAcl::default(), stop.clone());
        queues.insert(queue_config.name.clone(), handle);
    }
    let router = Arc::new(Router::new(config, queues));

    let (client, server) = tokio::io::duplex(1 << 20);
    tokio::spawn(handle_connection(
        server,
        peer(),
        router,
        stop.clone(),
        false,
        false,
    ));
    client
}

async fn read_http_head(stream: &mut DuplexStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mask = [0x5au8, 0xa5, 0x3c, 0xc3];
    let mut frame = vec![0x80 | opcode];
    if payload.len() < 126 {
        frame.push(0x80 | payload.len() as u8);
    } else {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

async fn recv_frame(stream: &mut DuplexStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.unwrap();
    let opcode = head[0] & 0x0f;
    let len = match head[1] & 0x7f {
        126 => {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext).await.unwrap();
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext).await.unwrap();
            u64::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    (opcode, payload)
}

async fn recv_text(stream: &mut DuplexStream) -> String {
    let (opcode, payload) = recv_frame(stream).await;
    assert_eq!(opcode, 0x2);
    String::from_utf8_lossy(&payload).to_string()
}

async fn upgrade(stream: &mut DuplexStream, path: &str, protocol: &str) -> String {
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Protocol: {}\r\n\
         \r\n",
        path, protocol
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    read_http_head(stream).await
}

#[serial_test::serial(logging)]
#[tokio::test]
async fn test_static_file_serving() {
    log::setup_logging("debug", log::LogType::Test);

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"<html>hi</html>").unwrap();

    let mut config = test_config();
    config.http.filebase = dir.path().to_string_lossy().to_string();

    let stop = Trigger::new();
    let mut client = start(config, &stop);

    client
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let head = read_http_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "got {:?}", head);
    assert!(head.contains("Content-Type: text/html\r\n"));

    let mut body = vec![0u8; 15];
    client.read_exact(&mut body).await.unwrap();
    assert_eq!(&body, b"<html>hi</html>");
    stop.trigger();
}

#[serial_test::serial(logging)]
#[tokio::test]
async fn test_static_404_without_filebase() {
    log::setup_logging("debug", log::LogType::Test);

    let stop = Trigger::new();
    let mut client = start(test_config(), &stop);

    client
        .write_all(b"GET /whatever HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let head = read_http_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 404 "), "got {:?}", head);
    stop.trigger();
}

#[serial_test::serial(logging)]
#[tokio::test]
async fn test_upgrade_unknown_queue_is_404() {
    log::setup_logging("debug", log::LogType::Test);

    let stop = Trigger::new();
    let mut client = start(test_config(), &stop);
    let head = upgrade(&mut client, "/nope", "scmp").await;
    assert!(head.starts_with("HTTP/1.1 404 "), "got {:?}", head);
    stop.trigger();
}

#[serial_test::serial(logging)]
#[tokio::test]
async fn test_upgrade_bad_version_is_400() {
    log::setup_logging("debug", log::LogType::Test);

    let stop = Trigger::new();
    let mut client = start(test_config(), &stop);
    client
        .write_all(
            b"GET /production HTTP/1.1\r\n\
              Host: x\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 8\r\n\
              \r\n",
        )
        .await
        .unwrap();
    let head = read_http_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 400 "), "got {:?}", head);
    stop.trigger();
}

#[serial_test::serial(logging)]
#[tokio::test]
async fn test_non_websocket_upgrade_is_426() {
    log::setup_logging("debug", log::LogType::Test);

    let stop = Trigger::new();
    let mut client = start(test_config(), &stop);
    client
        .write_all(b"GET /production HTTP/1.1\r\nHost: x\r\nUpgrade: h2c\r\n\r\n")
        .await
        .unwrap();
    let head = read_http_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 426 "), "got {:?}", head);
    stop.trigger();
}

// S1 on the wire: two websocket clients, one queue
#[serial_test::serial(logging)]
#[tokio::test]
async fn test_broker_hand_off() {
    log::setup_logging("debug", log::LogType::Test);

    let config = test_config();
    let stop = Trigger::new();

    // One shared worker; each client gets its own connection
    let mut queues = HashMap::new();
    let queue = Queue::from_config(&config, &config.queues[0]).unwrap();
    let (handle, _join) = worker::spawn(queue, IpAcl::default(), stop.clone());
    queues.insert("production".to_string(), handle);
    let router = Arc::new(Router::new(config, queues));

    let connect = |stop: &Trigger| {
        let (client, server) = tokio::io::duplex(1 << 20);
        tokio::spawn(handle_connection(
            server,
            peer(),
            router.clone(),
            stop.clone(),
            false,
            false,
        ));
        client
    };

    let mut a = connect(&stop);
    let head = upgrade(&mut a, "/production", "scmp").await;
    assert!(head.starts_with("HTTP/1.1 101 "), "got {:?}", head);
    assert!(head.contains("Sec-WebSocket-Protocol: scmp\r\n"));
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    a.write_all(&masked_frame(0x2, b"CONNECT\r\nName: a\r\n\r\n"))
        .await
        .unwrap();
    assert!(recv_text(&mut a).await.starts_with("CONNECTED\r\n"));
    a.write_all(&masked_frame(0x2, b"SUBSCRIBE\r\nGroup: PICK\r\n\r\n"))
        .await
        .unwrap();
    assert!(recv_text(&mut a).await.starts_with("ACK\r\n"));

    let mut b = connect(&stop);
    upgrade(&mut b, "/production", "scmp").await;
    b.write_all(&masked_frame(0x2, b"CONNECT\r\nName: b\r\n\r\n"))
        .await
        .unwrap();
    assert!(recv_text(&mut b).await.starts_with("CONNECTED\r\n"));

    b.write_all(&masked_frame(
        0x2,
        b"SEND\r\nDestination: PICK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nHELLO",
    ))
    .await
    .unwrap();

    let ack = recv_text(&mut b).await;
    assert_eq!(ack, "ACK\r\nSeq: 1\r\n\r\n");

    let message = recv_text(&mut a).await;
    assert!(message.contains("Seq: 1\r\n"));
    assert!(message.ends_with("HELLO"));

    // A ping is answered from the session outbox
    a.write_all(&masked_frame(0x9, b"hb")).await.unwrap();
    let (opcode, payload) = recv_frame(&mut a).await;
    assert_eq!(opcode, 0xa);
    assert_eq!(payload, b"hb");

    stop.trigger();
}

// S5: the database tunnel answers the transaction walk bit for bit
#[serial_test::serial(logging)]
#[tokio::test]
async fn test_database_echo() {
    log::setup_logging("debug", log::LogType::Test);

    let stop = Trigger::new();
    let mut client = start(test_config(), &stop);

    let head = upgrade(&mut client, "/db/dummy://mem", "scsql").await;
    assert!(head.starts_with("HTTP/1.1 101 "), "got {:?}", head);
    assert!(head.contains("Sec-WebSocket-Protocol: scsql\r\n"));
    assert!(head.contains("X-DB-Backend: dummy\r\n"));
    assert!(head.contains("X-DB-Prefix: \r\n"));

    client.write_all(&masked_frame(0x2, &[1])).await.unwrap();
    let (_, payload) = recv_frame(&mut client).await;
    assert_eq!(payload, vec![1, 0, b'O', b'K']);

    let mut execute = vec![4u8];
    execute.extend_from_slice(b"CREATE TABLE t(x INT)\0");
    client
        .write_all(&masked_frame(0x2, &execute))
        .await
        .unwrap();
    let (_, payload) = recv_frame(&mut client).await;
    assert_eq!(payload, vec![4, 0, b'O', b'K']);

    client.write_all(&masked_frame(0x2, &[2])).await.unwrap();
    let (_, payload) = recv_frame(&mut client).await;
    assert_eq!(payload, vec![2, 0, b'O', b'K']);

    stop.trigger();
}

#[serial_test::serial(logging)]
#[tokio::test]
async fn test_database_out_of_sequence_closes() {
    log::setup_logging("debug", log::LogType::Test);

    let stop = Trigger::new();
    let mut client = start(test_config(), &stop);
    upgrade(&mut client, "/db/dummy://", "scsql").await;

    // FETCH without an open query
    client.write_all(&masked_frame(0x2, &[9])).await.unwrap();
    let (opcode, payload) = recv_frame(&mut client).await;
    assert_eq!(opcode, 0x8);
    assert_eq!(payload, websocket::CLOSE_PROTOCOL_ERROR.to_be_bytes());

    stop.trigger();
}

#[serial_test::serial(logging)]
#[tokio::test]
async fn test_database_unavailable_is_503() {
    log::setup_logging("debug", log::LogType::Test);

    let stop = Trigger::new();
    let mut client = start(test_config(), &stop);
    let head = upgrade(&mut client, "/db/oracle://prod", "scsql").await;
    assert!(head.starts_with("HTTP/1.1 503 "), "got {:?}", head);
    stop.trigger();
}

#[serial_test::serial(logging)]
#[tokio::test]
async fn test_expect_continue_handled() {
    log::setup_logging("debug", log::LogType::Test);

    let stop = Trigger::new();
    let mut client = start(test_config(), &stop);
    client
        .write_all(
            b"GET /x HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    let interim = read_http_head(&mut client).await;
    assert!(
        interim.starts_with("HTTP/1.1 100 Continue"),
        "got {:?}",
        interim
    );
    let head = read_http_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 404 "));
    stop.trigger();
}
