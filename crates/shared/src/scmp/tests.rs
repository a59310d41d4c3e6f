use super::*;

#[test]
fn test_parse_connect() {
    let frame = b"CONNECT\r\nName: scpick\r\nQueue: production\r\nAckWindow: 5\r\n\r\n";
    let commands = Command::parse_all(frame).unwrap();
    assert_eq!(commands.len(), 1);
    let connect = &commands[0];
    assert_eq!(connect.verb, Verb::Connect);
    assert_eq!(connect.header(headers::NAME), Some("scpick"));
    assert_eq!(connect.header(headers::QUEUE), Some("production"));
    assert_eq!(connect.header(headers::ACK_WINDOW), Some("5"));
    assert!(connect.header(headers::CONTINUE_WITH).is_none());
}

#[test]
fn test_parse_send_with_payload() {
    let frame =
        b"SEND\r\nDestination: PICK\r\nContent-Type: text/xml\r\nContent-Length: 5\r\n\r\nHELLO";
    let commands = Command::parse_all(frame).unwrap();
    let send = &commands[0];
    assert_eq!(send.verb, Verb::Send);
    assert_eq!(send.header(headers::DESTINATION), Some("PICK"));
    assert_eq!(send.payload, b"HELLO");
}

#[test]
fn test_parse_two_blocks_in_one_frame() {
    let frame = b"SUBSCRIBE\r\nGroup: PICK\r\n\r\n\
                  SEND\r\nDestination: PICK\r\nContent-Length: 2\r\n\r\nhi";
    let commands = Command::parse_all(frame).unwrap();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].verb, Verb::Subscribe);
    assert_eq!(commands[1].verb, Verb::Send);
    assert_eq!(commands[1].payload, b"hi");
}

#[test]
fn test_group_header_repeats_and_lists() {
    let frame = b"SUBSCRIBE\r\nGroup: PICK, AMPLITUDE\r\nGroup: ORIGIN\r\n\r\n";
    let commands = Command::parse_all(frame).unwrap();
    let groups: Vec<&str> = commands[0].header_values(headers::GROUP).collect();
    assert_eq!(groups, vec!["PICK", "AMPLITUDE", "ORIGIN"]);
}

#[test]
fn test_unknown_verb() {
    assert!(Command::parse_all(b"HELLO\r\n\r\n").is_err());
}

#[test]
fn test_truncated_payload() {
    let frame = b"SEND\r\nDestination: G\r\nContent-Length: 10\r\n\r\nshort";
    assert!(Command::parse_all(frame).is_err());
}

#[test]
fn test_unterminated_head() {
    assert!(Command::parse_all(b"CONNECT\r\nName: x\r\n").is_err());
}

#[test]
fn test_empty_frame() {
    assert!(Command::parse_all(b"").is_err());
    assert!(Command::parse_all(b"\r\n\r\n").is_err());
}

#[test]
fn test_reply_builders_reparse() {
    // Replies use the same block grammar, so the parser cross-checks them
    let ack = ack(42);
    let text = String::from_utf8(ack).unwrap();
    assert_eq!(text, "ACK\r\nSeq: 42\r\n\r\n");

    let error = error("unknown group");
    let text = String::from_utf8(error).unwrap();
    assert_eq!(text, "ERROR\r\nContent-Length: 13\r\n\r\nunknown group");

    let message = message("scautopick", "PICK", 7, "text/xml", b"<pick/>");
    let text = String::from_utf8(message).unwrap();
    assert!(text.starts_with("MESSAGE\r\nSender: scautopick\r\n"));
    assert!(text.contains("Seq: 7\r\n"));
    assert!(text.ends_with("\r\n\r\n<pick/>"));
}

#[test]
fn test_notice_builders() {
    assert_eq!(
        String::from_utf8(enter("PICK", "scpick")).unwrap(),
        "ENTER\r\nGroup: PICK\r\nClient: scpick\r\n\r\n"
    );
    assert_eq!(
        String::from_utf8(leave("PICK", "scpick")).unwrap(),
        "LEAVE\r\nGroup: PICK\r\nClient: scpick\r\n\r\n"
    );
    assert_eq!(
        String::from_utf8(disconnected("scpick")).unwrap(),
        "DISCONNECTED\r\nClient: scpick\r\n\r\n"
    );
}
