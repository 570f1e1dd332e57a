//! Per-message state and timestamps

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use uuid::Uuid;

/// Lowercase hex MD5 digest, used for body checksums and content-based
/// deduplication keys.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// A message owned by exactly one queue at a time. Mutated only by the
/// owning queue under that queue's lock.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    /// Non-empty only while in flight; regenerated on every receive.
    pub receipt_handle: String,
    pub body: String,
    pub md5_of_body: String,
    /// Opaque user attributes, carried through untouched.
    pub message_attributes: HashMap<String, String>,

    // FIFO fields
    pub deduplication_id: String,
    pub group_id: String,
    pub sequence_number: String,

    // Lifecycle timestamps
    pub sent_at: DateTime<Utc>,
    pub delay_until: DateTime<Utc>,
    /// Epoch zero at admission; `now + visibility` while in flight.
    pub visible_at: DateTime<Utc>,

    // Redelivery state
    pub receive_count: u32,
    pub first_received_at: Option<DateTime<Utc>>,
}

impl Message {
    pub(crate) fn new(
        body: String,
        message_attributes: HashMap<String, String>,
        delay_seconds: u32,
        deduplication_id: String,
        group_id: String,
        sequence_number: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: Uuid::new_v4().to_string(),
            receipt_handle: String::new(),
            md5_of_body: md5_hex(body.as_bytes()),
            body,
            message_attributes,
            deduplication_id,
            group_id,
            sequence_number,
            sent_at: now,
            delay_until: now + Duration::seconds(i64::from(delay_seconds)),
            visible_at: DateTime::UNIX_EPOCH,
            receive_count: 0,
            first_received_at: None,
        }
    }

    /// Eligible for delivery: past its delay and not in flight.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        now >= self.delay_until && now >= self.visible_at
    }

    /// Received, visibility window still open, not yet deleted.
    pub fn is_in_flight(&self, now: DateTime<Utc>) -> bool {
        now >= self.delay_until && now < self.visible_at
    }

    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        now < self.delay_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex_known_value() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_fresh_message_is_eligible() {
        let msg = Message::new(
            "body".into(),
            HashMap::new(),
            0,
            String::new(),
            String::new(),
            "1".into(),
        );
        let now = Utc::now();
        assert!(msg.is_eligible(now));
        assert!(!msg.is_in_flight(now));
        assert!(!msg.is_delayed(now));
        assert!(msg.receipt_handle.is_empty());
        assert_eq!(msg.receive_count, 0);
    }

    #[test]
    fn test_delayed_message_not_eligible() {
        let msg = Message::new(
            "body".into(),
            HashMap::new(),
            30,
            String::new(),
            String::new(),
            "1".into(),
        );
        let now = Utc::now();
        assert!(msg.is_delayed(now));
        assert!(!msg.is_eligible(now));
        assert!(!msg.is_in_flight(now));
    }
}
