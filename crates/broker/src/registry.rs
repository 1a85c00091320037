use std::collections::HashMap;
use std::sync::Arc;

use chute_log::TopicLog;
use log::{debug, info};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::topic::Topic;

/// Characters a topic name may contain.
fn allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// Validate a topic name against the restricted character set.
///
/// Names become directory names on disk, so anything that could traverse or
/// alias paths is rejected outright rather than escaped.
pub fn sanitize_topic_name(raw: &str) -> Result<String> {
    let reject = |reason| {
        Err(BrokerError::InvalidTopicName {
            name: raw.to_string(),
            reason,
        })
    };
    if raw.is_empty() {
        return reject("name is empty");
    }
    if raw.len() > 255 {
        return reject("name exceeds 255 bytes");
    }
    if raw.contains('/') || raw.contains('\\') {
        return reject("path separators are not allowed");
    }
    if raw.chars().any(|c| !allowed(c)) {
        return reject("only alphanumerics, `_`, `-` and `.` are allowed");
    }
    if raw.bytes().all(|b| b == b'.') {
        return reject("name must contain more than dots");
    }
    Ok(raw.to_string())
}

/// Process-wide mapping of topic name to its one and only log.
///
/// `get_or_create` is serialized by a single mutex so that no two logs are
/// ever created for the same name; every holder of a [`Topic`] therefore
/// shares the same underlying files and locks. Creation is rare, so the
/// mutex is not a contention concern.
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Return the topic named `name`, creating its log on first reference.
    pub fn get_or_create(&self, name: &str, config: &BrokerConfig) -> Result<Arc<Topic>> {
        let name = sanitize_topic_name(name)?;
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get(&name) {
            return Ok(topic.clone());
        }

        let dir = config.data_directory.join("topics").join(&name);
        debug!("creating topic `{name}` at {}", dir.display());
        let log = TopicLog::open(dir, config.log_options())?;
        let topic = Arc::new(Topic::new(name.clone(), log));
        topics.insert(name, topic.clone());
        Ok(topic)
    }

    /// The topic named `name`, if it has been opened by this process.
    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.lock().get(name).cloned()
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every topic's log and forget the topics. Errors are reported
    /// after all topics have been attempted.
    pub fn close_all(&self) -> Result<()> {
        let mut topics = self.topics.lock();
        let mut first_err = None;
        for (name, topic) in topics.drain() {
            info!("closing topic `{name}`");
            if let Err(e) = topic.log().close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide registry instance.
pub fn registry() -> &'static TopicRegistry {
    static REGISTRY: Lazy<TopicRegistry> = Lazy::new(TopicRegistry::new);
    &REGISTRY
}
