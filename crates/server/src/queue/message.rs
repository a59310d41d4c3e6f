use chrono::{DateTime, Utc};

/// A message admitted into a queue, as seen by the processor chain.
#[derive(Debug, Clone)]
pub struct Message {
    /// Assigned by the queue at admission; strictly monotonic per queue.
    pub sequence: u64,
    pub sender: String,
    pub target: String,
    pub mime_type: String,
    /// Opaque to the broker; processors may replace it.
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn regular(
        sequence: u64,
        sender: &str,
        target: &str,
        mime_type: &str,
        payload: Vec<u8>,
    ) -> Message {
        Message {
            sequence,
            sender: sender.to_string(),
            target: target.to_string(),
            mime_type: mime_type.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}
