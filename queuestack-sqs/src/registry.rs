//! Name-indexed queue registry
//!
//! Creation, deletion, lookup and cross-queue redrive. The map is sharded
//! so lookups do not block each other; create and delete are exclusive per
//! shard.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use queuestack_core::{arn, SqsError};

use crate::queue::{run_expiry_timer, Queue};

/// How many messages an explicit redrive moves when the caller does not cap
/// it.
const DEFAULT_REDRIVE_BATCH: usize = 100;

#[derive(Default)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<Queue>>,
}

impl QueueRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a queue, or return the existing one unchanged. Creating a
    /// queue starts its background expiry timer.
    pub fn create(
        self: &Arc<Self>,
        name: &str,
        attributes: HashMap<String, String>,
    ) -> Arc<Queue> {
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(slot) => {
                let queue = Arc::new(Queue::new(name, attributes));
                info!(name = %name, url = %queue.url, fifo = queue.config.fifo, "creating queue");
                slot.insert(queue.clone());
                tokio::spawn(run_expiry_timer(
                    self.clone(),
                    queue.clone(),
                    queue.subscribe_shutdown(),
                ));
                queue
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|q| q.value().clone())
    }

    /// Remove a queue and stop its timer. Returns false when the queue does
    /// not exist.
    pub fn delete(&self, name: &str) -> bool {
        match self.queues.remove(name) {
            Some((_, queue)) => {
                info!(name = %name, "deleting queue");
                queue.stop_timer();
                true
            }
            None => false,
        }
    }

    /// URLs of all queues whose name starts with `prefix` (empty prefix
    /// matches everything).
    pub fn list(&self, prefix: &str) -> Vec<String> {
        self.queues
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.value().url.clone())
            .collect()
    }

    /// Every queue, for the admin snapshot.
    pub fn all(&self) -> Vec<Arc<Queue>> {
        self.queues.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Move up to `cap` messages (0 = default batch) from the head of
    /// `source_name` to the destination's tail, resetting their delivery
    /// state. An empty destination is resolved to the queue whose
    /// dead-letter policy targets the source.
    pub fn redrive(
        &self,
        source_name: &str,
        destination: &str,
        cap: usize,
    ) -> Result<usize, SqsError> {
        let source = self
            .get(source_name)
            .ok_or_else(|| SqsError::non_existent_queue(source_name))?;

        let destination_name = if destination.is_empty() {
            self.find_redrive_source(source_name)
                .ok_or_else(|| SqsError::non_existent_queue(source_name))?
        } else {
            arn::queue_name_from_arn(destination).to_string()
        };
        let dest = self
            .get(&destination_name)
            .ok_or_else(|| SqsError::non_existent_queue(&destination_name))?;

        let cap = if cap == 0 { DEFAULT_REDRIVE_BATCH } else { cap };
        let moved = source.take_front(cap);
        let count = moved.len();
        dest.append_moved(moved, true);
        info!(
            source = %source.name,
            destination = %dest.name,
            count,
            "redrive complete"
        );
        Ok(count)
    }

    /// The queue whose dead-letter policy points at `dlq_name`.
    fn find_redrive_source(&self, dlq_name: &str) -> Option<String> {
        self.queues.iter().find_map(|entry| {
            let queue = entry.value();
            let policy = queue.config.redrive_policy.as_ref()?;
            (arn::queue_name_from_arn(&policy.dead_letter_target_arn) == dlq_name)
                .then(|| queue.name.clone())
        })
    }

    /// Stop every queue's timer. In-flight requests drain naturally.
    pub fn shutdown(&self) {
        for entry in self.queues.iter() {
            entry.value().stop_timer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use queuestack_core::ErrorKind;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn send(queue: &Queue, body: &str) {
        queue.send(body.into(), HashMap::new(), None, "", "");
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let registry = QueueRegistry::new();
        let first = registry.create("q", attrs(&[("VisibilityTimeout", "7")]));
        let second = registry.create("q", attrs(&[("VisibilityTimeout", "99")]));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config.visibility_timeout, 7);
    }

    #[tokio::test]
    async fn test_delete_is_observable_once() {
        let registry = QueueRegistry::new();
        registry.create("q", HashMap::new());
        assert!(registry.get("q").is_some());
        assert!(registry.delete("q"));
        assert!(!registry.delete("q"));
        assert!(registry.get("q").is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let registry = QueueRegistry::new();
        registry.create("jobs-high", HashMap::new());
        registry.create("jobs-low", HashMap::new());
        registry.create("events", HashMap::new());

        let mut jobs = registry.list("jobs");
        jobs.sort();
        assert_eq!(jobs, vec!["/jobs-high", "/jobs-low"]);
        assert_eq!(registry.list("").len(), 3);
        assert!(registry.list("nope").is_empty());
    }

    #[tokio::test]
    async fn test_redrive_resets_and_moves() {
        let registry = QueueRegistry::new();
        let main = registry.create("main", HashMap::new());
        let dlq = registry.create("dlq", HashMap::new());

        send(&dlq, "poison-1");
        send(&dlq, "poison-2");
        dlq.receive(10, 0);

        let moved = registry
            .redrive("dlq", "arn:aws:sqs:us-east-1:000000000000:main", 1)
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(dlq.snapshot_messages().len(), 1);

        let landed = main.snapshot_messages();
        assert_eq!(landed.len(), 1);
        assert_eq!(landed[0].body, "poison-1");
        assert_eq!(landed[0].receive_count, 0);
        assert!(landed[0].receipt_handle.is_empty());
    }

    #[tokio::test]
    async fn test_redrive_resolves_destination_from_policy() {
        let registry = QueueRegistry::new();
        let main = registry.create(
            "main",
            attrs(&[(
                "RedrivePolicy",
                r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:dlq","maxReceiveCount":3}"#,
            )]),
        );
        let dlq = registry.create("dlq", HashMap::new());
        send(&dlq, "poison");

        let moved = registry.redrive("dlq", "", 0).unwrap();
        assert_eq!(moved, 1);
        assert!(dlq.snapshot_messages().is_empty());
        assert_eq!(main.snapshot_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_redrive_unknown_source_fails() {
        let registry = QueueRegistry::new();
        let err = registry.redrive("missing", "", 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NonExistentQueue);
    }

    #[tokio::test]
    async fn test_timer_moves_poison_message_to_dlq() {
        let registry = QueueRegistry::new();
        let main = registry.create(
            "main",
            attrs(&[(
                "RedrivePolicy",
                r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:dlq","maxReceiveCount":1}"#,
            )]),
        );
        let dlq = registry.create("dlq", HashMap::new());

        send(&main, "poison");
        // Receive once with a zero visibility window: immediately expired
        // and at the receive limit.
        assert_eq!(main.receive(1, 0).len(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(main.snapshot_messages().is_empty());
        let landed = dlq.snapshot_messages();
        assert_eq!(landed.len(), 1);
        assert_eq!(landed[0].body, "poison");
        assert_eq!(landed[0].receive_count, 1);
    }

    #[tokio::test]
    async fn test_missing_dlq_leaves_message_in_place() {
        let registry = QueueRegistry::new();
        let main = registry.create(
            "main",
            attrs(&[(
                "RedrivePolicy",
                r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:nowhere","maxReceiveCount":1}"#,
            )]),
        );
        send(&main, "poison");
        main.receive(1, 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(main.snapshot_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_timers() {
        let registry = QueueRegistry::new();
        registry.create("a", HashMap::new());
        registry.create("b", HashMap::new());
        registry.shutdown();
        // Queues stay addressable; only the timers are gone.
        assert!(registry.get("a").is_some());
    }
}
