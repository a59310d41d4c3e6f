pub const VERSION: &str = "v1.0.0";

// Bind defaults
pub const DEFAULT_LISTEN_PORT: u16 = 18180;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug";
#[cfg(debug_assertions)]
pub const CONFIGFILE_PATH: &str = "scmaster.conf";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "info";
#[cfg(not(debug_assertions))]
pub const CONFIGFILE_PATH: &str = "/etc/scmaster.conf";

// A request head must arrive within this window
pub const REQUEST_TIMEOUT_MS: u64 = 5000;

// Queue worker timing
pub const QUEUE_TICK_SECS: u64 = 1;
pub const STATS_INTERVAL_SECS: u64 = 10;
// One hour of 10 second snapshots
pub const STATS_RING_SIZE: usize = 360;

// Per-subscriber flow control
pub const MAX_CLIENT_BACKLOG_BYTES: usize = 1024 * 1024;
pub const MAX_CLIENT_BACKLOG_MESSAGES: usize = 2048;

// Acknowledgement batching
pub const DEFAULT_ACK_WINDOW: u32 = 1;
pub const MAX_ACK_WINDOW: u32 = 256;

// Message retention for reconnect resume
pub const DEFAULT_RETENTION_MESSAGES: usize = 1000;
pub const DEFAULT_RETENTION_BYTES: usize = 16 * 1024 * 1024;

// Database handler limits
pub const DEFAULT_DB_IDLE_TRANSACTION_SECS: u64 = 300;
pub const DEFAULT_DB_MAX_ROWS: u64 = 1_000_000;
