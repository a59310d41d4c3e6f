// WebSocket related constants
pub const WS_ACCEPT_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WS_SUPPORTED_VERSION: i32 = 13;

// Sub-protocol names advertised in Sec-WebSocket-Protocol
pub const BROKER_PROTOCOL_NAME: &str = "scmp";
pub const DATABASE_PROTOCOL_NAME: &str = "scsql";

// Maximum 1 megabyte of message size
pub const DEFAULT_MAX_WS_PAYLOAD_SIZE: usize = 1024 * 1024;

// HTTP request heads larger than this are rejected outright
pub const MAX_REQUEST_HEADER_SIZE: usize = 8 * 1024;

// Channel related constants
pub const CHANNEL_SIZE: usize = 2048; // 2k messages as much on a channel buffer
