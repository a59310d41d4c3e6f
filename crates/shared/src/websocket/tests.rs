use super::*;

// Client-side frame builder, used only by tests
fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mask = [0x11u8, 0x22, 0x33, 0x44];
    let mut frame = Vec::new();
    frame.push(if fin { 0x80 | opcode } else { opcode });
    if payload.len() < 126 {
        frame.push(0x80 | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

async fn decode_one(raw: Vec<u8>, max: usize) -> Result<Frame, FrameError> {
    let mut reader = FrameReader::new(max);
    let mut buf = raw;
    reader.read_message(&mut tokio::io::empty(), &mut buf).await
}

#[tokio::test]
async fn test_single_binary_frame() {
    let frame = decode_one(client_frame(true, 0x2, b"HELLO"), 1024)
        .await
        .unwrap();
    assert_eq!(frame, Frame::Binary(b"HELLO".to_vec()));
}

#[tokio::test]
async fn test_medium_length_frame() {
    let payload = vec![0xabu8; 300];
    let frame = decode_one(client_frame(true, 0x2, &payload), 4096)
        .await
        .unwrap();
    assert_eq!(frame, Frame::Binary(payload));
}

#[tokio::test]
async fn test_unmasked_frame_rejected() {
    // Server-style frame fed inbound
    let raw = encode(Opcode::Binary, b"nope");
    match decode_one(raw, 1024).await {
        Err(FrameError::Protocol(_)) => {}
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fragments_are_reassembled() {
    let mut raw = client_frame(false, 0x1, b"seis");
    raw.extend(client_frame(false, 0x0, b"comp"));
    raw.extend(client_frame(true, 0x0, b"!"));
    let frame = decode_one(raw, 1024).await.unwrap();
    assert_eq!(frame, Frame::Text(b"seiscomp!".to_vec()));
}

#[tokio::test]
async fn test_control_frame_between_fragments() {
    let mut raw = client_frame(false, 0x2, b"part");
    raw.extend(client_frame(true, 0x9, b"hb"));
    raw.extend(client_frame(true, 0x0, b"ial"));

    let mut reader = FrameReader::new(1024);
    let mut buf = raw;
    let first = reader
        .read_message(&mut tokio::io::empty(), &mut buf)
        .await
        .unwrap();
    assert_eq!(first, Frame::Ping(b"hb".to_vec()));
    let second = reader
        .read_message(&mut tokio::io::empty(), &mut buf)
        .await
        .unwrap();
    assert_eq!(second, Frame::Binary(b"partial".to_vec()));
}

#[tokio::test]
async fn test_payload_over_limit() {
    let raw = client_frame(true, 0x2, &vec![0u8; 64]);
    match decode_one(raw, 32).await {
        Err(FrameError::TooLarge { size: 64, limit: 32 }) => {}
        other => panic!("expected size error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reassembled_size_over_limit() {
    let mut raw = client_frame(false, 0x2, &vec![0u8; 24]);
    raw.extend(client_frame(true, 0x0, &vec![0u8; 24]));
    assert!(matches!(
        decode_one(raw, 32).await,
        Err(FrameError::TooLarge { .. })
    ));
}

#[tokio::test]
async fn test_continuation_without_start() {
    let raw = client_frame(true, 0x0, b"lost");
    assert!(matches!(
        decode_one(raw, 1024).await,
        Err(FrameError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_close_with_code() {
    let frame = decode_one(client_frame(true, 0x8, &1000u16.to_be_bytes()), 1024)
        .await
        .unwrap();
    assert_eq!(frame, Frame::Close(Some(CLOSE_NORMAL)));
}

#[tokio::test]
async fn test_eof_mid_frame() {
    let mut raw = client_frame(true, 0x2, b"HELLO");
    raw.truncate(4);
    assert!(matches!(
        decode_one(raw, 1024).await,
        Err(FrameError::Io(_))
    ));
}

#[test]
fn test_encode_lengths() {
    assert_eq!(encode(Opcode::Binary, b"ab")[..2], [0x82, 2]);

    let medium = encode(Opcode::Binary, &vec![0u8; 300]);
    assert_eq!(medium[1], 126);
    assert_eq!(u16::from_be_bytes([medium[2], medium[3]]), 300);

    let big = encode(Opcode::Binary, &vec![0u8; 70_000]);
    assert_eq!(big[1], 127);
}

#[test]
fn test_close_frame_carries_code() {
    let raw = close(CLOSE_PROTOCOL_ERROR);
    assert_eq!(raw, vec![0x88, 0x02, 0x03, 0xea]);
}
