use chute_log::{Record, TopicLog};

use crate::error::Result;

/// A named handle over one topic's log.
///
/// Topics are created by (and owned through) the
/// [`TopicRegistry`](crate::TopicRegistry); holders share them as
/// `Arc<Topic>` and never own the underlying log themselves.
pub struct Topic {
    name: String,
    log: TopicLog,
}

/// Point-in-time counters for a topic, for the outer layer to report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopicStats {
    pub next_offset: u64,
    pub oldest_offset: u64,
    pub record_count: u64,
    pub total_size: u64,
    pub segment_count: u32,
}

impl Topic {
    pub(crate) fn new(name: String, log: TopicLog) -> Self {
        Self { name, log }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a payload, optionally forcing it to stable storage before
    /// returning.
    pub fn publish(&self, payload: &[u8], require_durability: bool) -> Result<Record> {
        let record = self.log.append(payload)?;
        if require_durability {
            self.log.flush()?;
        }
        Ok(record)
    }

    pub fn read(&self, offset: u64) -> Result<Option<Record>> {
        Ok(self.log.read(offset)?)
    }

    pub fn read_batch(&self, from: u64, max: usize) -> Result<Vec<Record>> {
        Ok(self.log.read_batch(from, max)?)
    }

    pub fn stats(&self) -> TopicStats {
        TopicStats {
            next_offset: self.log.next_offset(),
            oldest_offset: self.log.oldest_offset(),
            record_count: self.log.record_count(),
            total_size: self.log.total_size(),
            segment_count: self.log.segment_count(),
        }
    }

    /// Direct access to the log, for operations the façade does not wrap
    /// (retention, close, `append_at`).
    pub fn log(&self) -> &TopicLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use chute_log::Options;

    fn topic(dir: &TempDir) -> Topic {
        let log = TopicLog::open(dir.path().join("topics").join("t"), Options::default()).unwrap();
        Topic::new("t".into(), log)
    }

    #[test]
    fn publish_and_read() {
        let dir = TempDir::new().unwrap();
        let topic = topic(&dir);

        let record = topic.publish(b"payload", false).unwrap();
        assert_eq!(record.offset, 0);
        assert_eq!(topic.read(0).unwrap().unwrap().data, b"payload");
    }

    #[test]
    fn durable_publish_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let topic = topic(&dir);
            topic.publish(b"durable", true).unwrap();
            // No close: rely on the forced flush.
        }
        let topic = topic(&dir);
        assert_eq!(topic.read(0).unwrap().unwrap().data, b"durable");
    }

    #[test]
    fn stats_reflect_appends() {
        let dir = TempDir::new().unwrap();
        let topic = topic(&dir);
        topic.publish(b"abc", false).unwrap();
        topic.publish(b"defg", false).unwrap();

        let stats = topic.stats();
        assert_eq!(stats.next_offset, 2);
        assert_eq!(stats.record_count, 2);
        assert_eq!(stats.oldest_offset, 0);
        assert_eq!(stats.segment_count, 1);
        assert_eq!(stats.total_size, (16 + 3) + (16 + 4));
    }
}
