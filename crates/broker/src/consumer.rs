use std::collections::HashMap;

use chute_log::Record;
use parking_lot::Mutex;

use crate::error::{BrokerError, Result};
use crate::topic::Topic;

/// Broadcast-mode consumer bookkeeping.
///
/// Every registered consumer carries its own per-topic next-read offset, so
/// all consumers see all messages independently. State is process-local;
/// consumers that need durable positions track them on their side.
pub struct ConsumerState {
    offsets: Mutex<HashMap<String, HashMap<String, u64>>>,
}

impl ConsumerState {
    pub fn new() -> Self {
        Self {
            offsets: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, consumer_id: &str) -> Result<()> {
        let mut offsets = self.offsets.lock();
        if offsets.contains_key(consumer_id) {
            return Err(BrokerError::AlreadyRegistered(consumer_id.to_string()));
        }
        offsets.insert(consumer_id.to_string(), HashMap::new());
        Ok(())
    }

    /// Remove a consumer and its offsets. `false` if it was not registered.
    pub fn unregister(&self, consumer_id: &str) -> bool {
        self.offsets.lock().remove(consumer_id).is_some()
    }

    pub fn is_registered(&self, consumer_id: &str) -> bool {
        self.offsets.lock().contains_key(consumer_id)
    }

    /// Read up to `max_messages` records from `topic`, starting at the later
    /// of `start_offset` and the consumer's saved position, then advance the
    /// saved position past the last returned record.
    pub fn consume(
        &self,
        consumer_id: &str,
        topic: &Topic,
        start_offset: u64,
        max_messages: usize,
    ) -> Result<Vec<Record>> {
        let mut offsets = self.offsets.lock();
        let per_topic = offsets
            .get_mut(consumer_id)
            .ok_or_else(|| BrokerError::UnknownConsumer(consumer_id.to_string()))?;

        let saved = per_topic.get(topic.name()).copied().unwrap_or(0);
        let from = start_offset.max(saved);
        let records = topic.read_batch(from, max_messages)?;
        if let Some(last) = records.last() {
            per_topic.insert(topic.name().to_string(), last.offset + 1);
        }
        Ok(records)
    }

    /// Snapshot of a consumer's per-topic positions.
    pub fn offsets(&self, consumer_id: &str) -> Option<HashMap<String, u64>> {
        self.offsets.lock().get(consumer_id).cloned()
    }
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use chute_log::{Options, TopicLog};

    fn topic(dir: &TempDir) -> Topic {
        let log = TopicLog::open(dir.path().join("t"), Options::default()).unwrap();
        Topic::new("t".into(), log)
    }

    #[test]
    fn register_conflicts_and_unregister() {
        let consumers = ConsumerState::new();
        consumers.register("c1").unwrap();
        assert!(matches!(
            consumers.register("c1"),
            Err(BrokerError::AlreadyRegistered(_))
        ));
        assert!(consumers.unregister("c1"));
        assert!(!consumers.unregister("c1"));
        consumers.register("c1").unwrap();
    }

    #[test]
    fn consume_requires_registration() {
        let dir = TempDir::new().unwrap();
        let topic = topic(&dir);
        let consumers = ConsumerState::new();

        assert!(matches!(
            consumers.consume("ghost", &topic, 0, 10),
            Err(BrokerError::UnknownConsumer(_))
        ));
    }

    #[test]
    fn consumers_are_independent() {
        let dir = TempDir::new().unwrap();
        let topic = topic(&dir);
        for i in 0..5u8 {
            topic.publish(&[i + 1], false).unwrap();
        }

        let consumers = ConsumerState::new();
        consumers.register("x").unwrap();
        consumers.register("y").unwrap();

        let seen_x = consumers.consume("x", &topic, 0, 10).unwrap();
        let seen_y = consumers.consume("y", &topic, 0, 10).unwrap();
        assert_eq!(seen_x.len(), 5);
        assert_eq!(seen_y.len(), 5);

        // Both have drained the topic; polls return empty until new data.
        assert!(consumers.consume("x", &topic, 0, 10).unwrap().is_empty());
        topic.publish(b"new", false).unwrap();
        let next = consumers.consume("x", &topic, 0, 10).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].offset, 5);
    }

    #[test]
    fn start_offset_can_skip_ahead_but_not_rewind() {
        let dir = TempDir::new().unwrap();
        let topic = topic(&dir);
        for i in 0..6u8 {
            topic.publish(&[i + 1], false).unwrap();
        }

        let consumers = ConsumerState::new();
        consumers.register("c").unwrap();

        // Skip ahead explicitly.
        let batch = consumers.consume("c", &topic, 4, 10).unwrap();
        assert_eq!(batch.first().unwrap().offset, 4);

        // A lower start offset no longer rewinds the saved position.
        assert!(consumers.consume("c", &topic, 0, 10).unwrap().is_empty());
        assert_eq!(consumers.offsets("c").unwrap()["t"], 6);
    }

    #[test]
    fn batches_respect_max_messages() {
        let dir = TempDir::new().unwrap();
        let topic = topic(&dir);
        for i in 0..7u8 {
            topic.publish(&[i + 1], false).unwrap();
        }

        let consumers = ConsumerState::new();
        consumers.register("c").unwrap();
        assert_eq!(consumers.consume("c", &topic, 0, 3).unwrap().len(), 3);
        let second = consumers.consume("c", &topic, 0, 3).unwrap();
        assert_eq!(second.first().unwrap().offset, 3);
        assert_eq!(consumers.consume("c", &topic, 0, 10).unwrap().len(), 1);
    }
}
