use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chute_log::Record;
use log::{debug, info};
use parking_lot::RwLock;

use crate::error::{BrokerError, Result};
use crate::topic::Topic;

/// How long a leader may go without a successful consume before any other
/// member may take the lease.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct GroupRecord {
    members: HashSet<String>,
    leader: Option<String>,
    last_heartbeat: Instant,
    group_offset: u64,
}

impl GroupRecord {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            leader: None,
            last_heartbeat: Instant::now(),
            group_offset: 0,
        }
    }
}

/// Exclusive-mode consumer coordination.
///
/// For each (topic, group) pair at most one member, the leader, consumes at
/// a time. Leadership is an opportunistic lease: the slot is taken by
/// whichever member calls `consume` while it is empty or while the current
/// leader's heartbeat is stale. Every call re-reads the leader under the
/// group's write lock, so there is no window for split-brain delivery.
pub struct GroupState {
    heartbeat_timeout: Duration,
    groups: RwLock<HashMap<String, HashMap<String, Arc<RwLock<GroupRecord>>>>>,
}

impl GroupState {
    pub fn new() -> Self {
        Self::with_heartbeat_timeout(DEFAULT_HEARTBEAT_TIMEOUT)
    }

    pub fn with_heartbeat_timeout(heartbeat_timeout: Duration) -> Self {
        Self {
            heartbeat_timeout,
            groups: RwLock::new(HashMap::new()),
        }
    }

    fn group(&self, topic: &str, group: &str) -> Option<Arc<RwLock<GroupRecord>>> {
        self.groups.read().get(topic)?.get(group).cloned()
    }

    /// Add `consumer_id` to the group, creating the group on first join.
    pub fn join(&self, topic: &str, group: &str, consumer_id: &str) {
        let mut groups = self.groups.write();
        let record = groups
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(GroupRecord::new())))
            .clone();
        drop(groups);

        let mut record = record.write();
        if record.members.insert(consumer_id.to_string()) {
            debug!("consumer `{consumer_id}` joined group `{group}` on topic `{topic}`");
        }
    }

    /// Remove `consumer_id` from the group; a departing leader releases the
    /// lease immediately.
    pub fn leave(&self, topic: &str, group: &str, consumer_id: &str) -> Result<()> {
        let record = self
            .group(topic, group)
            .ok_or_else(|| BrokerError::UnknownGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            })?;
        let mut record = record.write();
        if !record.members.remove(consumer_id) {
            return Err(BrokerError::NotAMember {
                topic: topic.to_string(),
                group: group.to_string(),
                consumer: consumer_id.to_string(),
            });
        }
        if record.leader.as_deref() == Some(consumer_id) {
            debug!("leader `{consumer_id}` left group `{group}` on topic `{topic}`");
            record.leader = None;
        }
        Ok(())
    }

    /// Consume as `consumer_id` on behalf of the group.
    ///
    /// Non-leaders get an empty batch. A member that finds the leader slot
    /// empty, or the current lease expired, takes the lease first.
    pub fn consume(
        &self,
        topic: &Topic,
        group: &str,
        consumer_id: &str,
        max_messages: usize,
    ) -> Result<Vec<Record>> {
        let record =
            self.group(topic.name(), group)
                .ok_or_else(|| BrokerError::UnknownGroup {
                    topic: topic.name().to_string(),
                    group: group.to_string(),
                })?;
        let mut record = record.write();
        if !record.members.contains(consumer_id) {
            return Err(BrokerError::NotAMember {
                topic: topic.name().to_string(),
                group: group.to_string(),
                consumer: consumer_id.to_string(),
            });
        }

        let lease_expired = record.last_heartbeat.elapsed() >= self.heartbeat_timeout;
        if record.leader.is_none() || lease_expired {
            if let Some(old) = record.leader.as_deref() {
                if old != consumer_id {
                    info!(
                        "group `{group}` on topic `{}`: leader `{old}` timed out, \
                         `{consumer_id}` takes over",
                        topic.name(),
                    );
                }
            }
            record.leader = Some(consumer_id.to_string());
        }
        if record.leader.as_deref() != Some(consumer_id) {
            return Ok(Vec::new());
        }

        let records = topic.read_batch(record.group_offset, max_messages)?;
        if let Some(last) = records.last() {
            record.group_offset = last.offset + 1;
        }
        record.last_heartbeat = Instant::now();
        Ok(records)
    }

    /// Rewind (or advance) the group's read position.
    pub fn reset_offset(&self, topic: &str, group: &str, offset: u64) -> Result<()> {
        let record = self
            .group(topic, group)
            .ok_or_else(|| BrokerError::UnknownGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            })?;
        record.write().group_offset = offset;
        Ok(())
    }

    pub fn members(&self, topic: &str, group: &str) -> Vec<String> {
        match self.group(topic, group) {
            Some(record) => {
                let mut members: Vec<String> = record.read().members.iter().cloned().collect();
                members.sort();
                members
            }
            None => Vec::new(),
        }
    }

    pub fn leader(&self, topic: &str, group: &str) -> Option<String> {
        self.group(topic, group)?.read().leader.clone()
    }

    pub fn group_offset(&self, topic: &str, group: &str) -> Option<u64> {
        Some(self.group(topic, group)?.read().group_offset)
    }
}

impl Default for GroupState {
    fn default() -> Self {
        Self::new()
    }
}
