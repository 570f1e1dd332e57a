//! A single queue: configuration, the ordered message sequence, FIFO
//! bookkeeping, and the background expiry timer.
//!
//! All mutations go through the queue's own lock. The registry owns the
//! name→queue map; cross-queue moves drain under the source lock, release
//! it, then append under the destination lock so two queue locks are never
//! held at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use queuestack_core::arn;

use crate::message::{md5_hex, Message};
use crate::policy::{RedriveAllowPolicy, RedrivePolicy};
use crate::registry::QueueRegistry;

/// Deduplication entries older than this are ignored by admission.
const DEDUP_WINDOW_SECS: i64 = 300;

/// Group key under which ordered-mode messages without an explicit
/// `MessageGroupId` are filed.
const DEFAULT_GROUP: &str = "default";

/// Queue configuration, fixed at creation from the attribute map.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub visibility_timeout: u32,
    pub message_retention_period: u32,
    pub maximum_message_size: usize,
    pub delay_seconds: u32,
    pub receive_wait_time: u32,
    pub max_receive_count: u32,
    pub fifo: bool,
    pub content_based_deduplication: bool,
    pub redrive_policy: Option<RedrivePolicy>,
    pub redrive_allow_policy: Option<RedriveAllowPolicy>,
    /// Every attribute as supplied at creation, unknown keys included.
    /// GetQueueAttributes echoes these verbatim.
    pub raw_attributes: HashMap<String, String>,
}

impl QueueConfig {
    fn from_attributes(name: &str, attributes: HashMap<String, String>) -> Self {
        let mut config = Self {
            visibility_timeout: 30,
            message_retention_period: 345_600, // 4 days
            maximum_message_size: 262_144,     // 256 KB
            delay_seconds: 0,
            receive_wait_time: 0,
            max_receive_count: 3,
            fifo: name.ends_with(".fifo"),
            content_based_deduplication: false,
            redrive_policy: None,
            redrive_allow_policy: None,
            raw_attributes: HashMap::new(),
        };

        for (key, value) in &attributes {
            match key.as_str() {
                "VisibilityTimeout" => {
                    if let Ok(v) = value.parse() {
                        config.visibility_timeout = v;
                    }
                }
                "MessageRetentionPeriod" => {
                    if let Ok(v) = value.parse() {
                        config.message_retention_period = v;
                    }
                }
                "MaximumMessageSize" => {
                    if let Ok(v) = value.parse() {
                        config.maximum_message_size = v;
                    }
                }
                "DelaySeconds" => {
                    if let Ok(v) = value.parse() {
                        config.delay_seconds = v;
                    }
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    if let Ok(v) = value.parse() {
                        config.receive_wait_time = v;
                    }
                }
                "MaxReceiveCount" => {
                    if let Ok(v) = value.parse::<u32>() {
                        if v > 0 {
                            config.max_receive_count = v;
                        }
                    }
                }
                "FifoQueue" => {
                    if value == "true" {
                        config.fifo = true;
                    }
                }
                "ContentBasedDeduplication" => {
                    if value == "true" {
                        config.content_based_deduplication = true;
                    }
                }
                "RedrivePolicy" => match RedrivePolicy::from_json(value) {
                    Ok(policy) => config.redrive_policy = Some(policy),
                    Err(e) => warn!(queue = %name, error = %e, "ignoring RedrivePolicy"),
                },
                "RedriveAllowPolicy" => match RedriveAllowPolicy::from_json(value) {
                    Ok(policy) => config.redrive_allow_policy = Some(policy),
                    Err(e) => warn!(queue = %name, error = %e, "ignoring RedriveAllowPolicy"),
                },
                _ => {}
            }
        }

        config.raw_attributes = attributes;
        config
    }
}

#[derive(Debug, Default)]
struct QueueState {
    /// Admission order preserved; at most one record per message ID.
    messages: VecDeque<Message>,
    /// Deduplication key → admission timestamp.
    dedup_cache: HashMap<String, DateTime<Utc>>,
    /// Strictly increases on each admission.
    sequence: u64,
}

/// One queue and everything it owns.
pub struct Queue {
    pub name: String,
    pub url: String,
    pub arn: String,
    pub config: QueueConfig,
    pub created_at: DateTime<Utc>,
    state: RwLock<QueueState>,
    shutdown: watch::Sender<bool>,
}

impl Queue {
    pub(crate) fn new(name: &str, attributes: HashMap<String, String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            url: format!("/{name}"),
            arn: arn::queue_arn(name),
            config: QueueConfig::from_attributes(name, attributes),
            created_at: Utc::now(),
            name: name.to_string(),
            state: RwLock::new(QueueState::default()),
            shutdown,
        }
    }

    /// Admit a message. For ordered-mode queues a deduplication hit within
    /// the 5-minute window returns the original message unchanged — the
    /// caller observes the original ID and sequence number.
    pub fn send(
        &self,
        body: String,
        message_attributes: HashMap<String, String>,
        delay_seconds: Option<u32>,
        deduplication_id: &str,
        group_id: &str,
    ) -> Message {
        let now = Utc::now();
        let mut state = self.state.write();

        let mut deduplication_id = deduplication_id.to_string();
        if self.config.fifo {
            if deduplication_id.is_empty() && self.config.content_based_deduplication {
                deduplication_id = md5_hex(body.as_bytes());
            }
            if !deduplication_id.is_empty() {
                state
                    .dedup_cache
                    .retain(|_, seen| now - *seen < Duration::seconds(DEDUP_WINDOW_SECS));
                if state.dedup_cache.contains_key(&deduplication_id) {
                    if let Some(original) = state
                        .messages
                        .iter()
                        .find(|m| m.deduplication_id == deduplication_id)
                    {
                        return original.clone();
                    }
                }
                state.dedup_cache.insert(deduplication_id.clone(), now);
            }
        }

        state.sequence += 1;
        let sequence_number = state.sequence.to_string();
        let delay = delay_seconds.unwrap_or(self.config.delay_seconds);

        let message = Message::new(
            body,
            message_attributes,
            delay,
            deduplication_id,
            group_id.to_string(),
            sequence_number,
        );
        state.messages.push_back(message.clone());
        message
    }

    /// Deliver up to `max` eligible messages. Standard queues deliver in
    /// admission order; ordered-mode queues deliver each group's
    /// earliest-sequence eligible message, at most one per group, groups in
    /// first-seen admission order.
    pub fn receive(&self, max: usize, visibility_timeout: u32) -> Vec<Message> {
        let now = Utc::now();
        let mut state = self.state.write();

        let mut picked = Vec::new();
        if self.config.fifo {
            let mut seen_groups: HashSet<&str> = HashSet::new();
            for (i, msg) in state.messages.iter().enumerate() {
                if picked.len() >= max {
                    break;
                }
                if !msg.is_eligible(now) {
                    continue;
                }
                let group = if msg.group_id.is_empty() {
                    DEFAULT_GROUP
                } else {
                    msg.group_id.as_str()
                };
                if seen_groups.insert(group) {
                    picked.push(i);
                }
            }
        } else {
            for (i, msg) in state.messages.iter().enumerate() {
                if picked.len() >= max {
                    break;
                }
                if msg.is_eligible(now) {
                    picked.push(i);
                }
            }
        }

        let mut received = Vec::with_capacity(picked.len());
        for i in picked {
            let msg = &mut state.messages[i];
            msg.receipt_handle = Uuid::new_v4().to_string();
            msg.visible_at = now + Duration::seconds(i64::from(visibility_timeout));
            msg.receive_count += 1;
            if msg.receive_count == 1 {
                msg.first_received_at = Some(now);
            }
            received.push(msg.clone());
        }
        received
    }

    /// Remove the message whose current receipt handle matches. Stale and
    /// unknown handles return false; a handle is valid for at most one
    /// delete.
    pub fn delete_message(&self, receipt_handle: &str) -> bool {
        if receipt_handle.is_empty() {
            return false;
        }
        let mut state = self.state.write();
        match state
            .messages
            .iter()
            .position(|m| m.receipt_handle == receipt_handle)
        {
            Some(i) => {
                state.messages.remove(i);
                true
            }
            None => false,
        }
    }

    /// Drop all messages. The deduplication cache is left alone.
    pub fn purge(&self) {
        self.state.write().messages.clear();
    }

    /// Computed counts plus configured values plus any attributes retained
    /// verbatim from creation.
    pub fn attributes(&self) -> HashMap<String, String> {
        let state = self.state.read();
        let now = Utc::now();

        let mut visible = 0usize;
        let mut not_visible = 0usize;
        let mut delayed = 0usize;
        for msg in &state.messages {
            if msg.is_delayed(now) {
                delayed += 1;
            } else if msg.is_in_flight(now) {
                not_visible += 1;
            } else {
                visible += 1;
            }
        }

        let mut attrs = self.config.raw_attributes.clone();
        attrs.insert(
            "VisibilityTimeout".into(),
            self.config.visibility_timeout.to_string(),
        );
        attrs.insert(
            "MessageRetentionPeriod".into(),
            self.config.message_retention_period.to_string(),
        );
        attrs.insert(
            "MaximumMessageSize".into(),
            self.config.maximum_message_size.to_string(),
        );
        attrs.insert("DelaySeconds".into(), self.config.delay_seconds.to_string());
        attrs.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.config.receive_wait_time.to_string(),
        );
        if self.config.fifo {
            attrs.insert("FifoQueue".into(), "true".into());
            attrs.insert(
                "ContentBasedDeduplication".into(),
                self.config.content_based_deduplication.to_string(),
            );
        }
        attrs.insert("CreatedTimestamp".into(), self.created_at.timestamp().to_string());
        attrs.insert("QueueArn".into(), self.arn.clone());
        attrs.insert("ApproximateNumberOfMessages".into(), visible.to_string());
        attrs.insert(
            "ApproximateNumberOfMessagesNotVisible".into(),
            not_visible.to_string(),
        );
        attrs.insert(
            "ApproximateNumberOfMessagesDelayed".into(),
            delayed.to_string(),
        );
        attrs
    }

    /// Clone of the current message sequence, for the admin snapshot.
    pub fn snapshot_messages(&self) -> Vec<Message> {
        self.state.read().messages.iter().cloned().collect()
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Terminate the background timer. Safe to call more than once; the
    /// task exits on the first signal.
    pub(crate) fn stop_timer(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Drain messages that are past their visibility window and have been
    /// received `limit` or more times.
    fn take_dlq_eligible(&self, limit: u32, now: DateTime<Utc>) -> Vec<Message> {
        let mut state = self.state.write();
        let mut moved = Vec::new();
        state.messages.retain(|msg| {
            if msg.is_eligible(now) && msg.receive_count >= limit {
                moved.push(msg.clone());
                false
            } else {
                true
            }
        });
        moved
    }

    /// Drain up to `max` messages from the head, for explicit redrive.
    pub(crate) fn take_front(&self, max: usize) -> Vec<Message> {
        let mut state = self.state.write();
        let n = max.min(state.messages.len());
        state.messages.drain(..n).collect()
    }

    /// Append messages arriving from another queue. Identity and body are
    /// preserved; the receipt handle is cleared, the message becomes
    /// immediately eligible, and the receive count is reset only for an
    /// explicit redrive.
    pub(crate) fn append_moved(&self, messages: Vec<Message>, reset_receive_count: bool) {
        let now = Utc::now();
        let mut state = self.state.write();
        for mut msg in messages {
            msg.receipt_handle.clear();
            msg.visible_at = DateTime::UNIX_EPOCH;
            msg.delay_until = now;
            if reset_receive_count {
                msg.receive_count = 0;
            }
            state.messages.push_back(msg);
        }
    }

    /// One timer tick: redirect poison messages to the configured
    /// dead-letter queue. A missing target leaves messages in place; the
    /// move is retried on the next tick.
    pub(crate) fn move_expired_to_dlq(&self, registry: &QueueRegistry) {
        let Some(policy) = &self.config.redrive_policy else {
            return;
        };
        let limit = if policy.max_receive_count > 0 {
            policy.max_receive_count
        } else {
            self.config.max_receive_count
        };
        let target_name = arn::queue_name_from_arn(&policy.dead_letter_target_arn);
        let Some(target) = registry.get(target_name) else {
            warn!(queue = %self.name, target = %target_name, "dead-letter target missing, will retry");
            return;
        };

        let moved = self.take_dlq_eligible(limit, Utc::now());
        if moved.is_empty() {
            return;
        }
        info!(
            queue = %self.name,
            dlq = %target.name,
            count = moved.len(),
            "moving messages to dead-letter queue"
        );
        target.append_moved(moved, false);
    }
}

/// Runs until the queue is deleted or the registry shuts down.
pub(crate) async fn run_expiry_timer(
    registry: Arc<QueueRegistry>,
    queue: Arc<Queue>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => queue.move_expired_to_dlq(&registry),
            _ = shutdown.changed() => break,
        }
    }
}
