use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// When the store forces data to stable storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FlushStrategy {
    /// Force after every append.
    Immediate,
    /// Force every N appends.
    MessageBased { messages: u64 },
    /// Force once the interval has elapsed since the last force.
    TimeBased { interval_ms: u64 },
    /// Whichever of the message or time bound trips first.
    Hybrid { messages: u64, interval_ms: u64 },
    /// Never force; the OS page cache decides. Highest loss window.
    OsControlled,
}

impl Default for FlushStrategy {
    fn default() -> Self {
        FlushStrategy::Immediate
    }
}

/// Durability configuration for one log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FlushPolicy {
    #[cfg_attr(feature = "serde", serde(rename = "flush_strategy"))]
    pub strategy: FlushStrategy,
    /// Also force file metadata (fsync rather than fdatasync semantics).
    pub force_metadata: bool,
    /// When `false`, every append forces immediately, overriding any
    /// non-immediate strategy.
    #[cfg_attr(feature = "serde", serde(rename = "enable_page_cache"))]
    pub page_cache_enabled: bool,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            strategy: FlushStrategy::default(),
            force_metadata: false,
            page_cache_enabled: true,
        }
    }
}

impl FlushPolicy {
    /// Strategies with message or time bounds must have finite, non-zero
    /// bounds.
    pub fn validate(&self) -> Result<()> {
        match self.strategy {
            FlushStrategy::MessageBased { messages: 0 } => Err(Error::InvalidFlushPolicy(
                "message_based requires messages >= 1".into(),
            )),
            FlushStrategy::TimeBased { interval_ms: 0 } => Err(Error::InvalidFlushPolicy(
                "time_based requires interval_ms >= 1".into(),
            )),
            FlushStrategy::Hybrid {
                messages,
                interval_ms,
            } if messages == 0 || interval_ms == 0 => Err(Error::InvalidFlushPolicy(
                "hybrid requires messages >= 1 and interval_ms >= 1".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Whether an append should force, given the outstanding append count and
    /// the time since the last force.
    pub(crate) fn should_flush(&self, pending: u64, since_last: Duration) -> bool {
        if !self.page_cache_enabled {
            return true;
        }
        match self.strategy {
            FlushStrategy::Immediate => true,
            FlushStrategy::MessageBased { messages } => pending >= messages,
            FlushStrategy::TimeBased { interval_ms } => {
                pending > 0 && since_last >= Duration::from_millis(interval_ms)
            }
            FlushStrategy::Hybrid {
                messages,
                interval_ms,
            } => {
                pending >= messages
                    || (pending > 0 && since_last >= Duration::from_millis(interval_ms))
            }
            FlushStrategy::OsControlled => false,
        }
    }

    /// The interval a background timer must honor, if the strategy needs one.
    pub(crate) fn timer_interval(&self) -> Option<Duration> {
        if !self.page_cache_enabled {
            // Every append already forces; no timer needed.
            return None;
        }
        match self.strategy {
            FlushStrategy::TimeBased { interval_ms }
            | FlushStrategy::Hybrid { interval_ms, .. } => {
                Some(Duration::from_millis(interval_ms))
            }
            _ => None,
        }
    }
}

/// Timer cadence for the background task: at most a quarter of the flush
/// interval, bounded by 100 ms.
pub(crate) fn timer_tick(interval: Duration) -> Duration {
    (interval / 4)
        .min(Duration::from_millis(100))
        .max(Duration::from_millis(1))
}

/// Counts appends since the last force, shared between the append path and
/// the background timer.
#[derive(Debug)]
pub(crate) struct FlushTracker {
    pending: AtomicU64,
    last_flush: Mutex<Instant>,
}

impl FlushTracker {
    pub fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
            last_flush: Mutex::new(Instant::now()),
        }
    }

    pub fn note_append(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    pub fn has_pending(&self) -> bool {
        self.pending() > 0
    }

    pub fn since_last(&self) -> Duration {
        self.last_flush.lock().elapsed()
    }

    pub fn mark_flushed(&self) {
        self.pending.store(0, Ordering::Release);
        *self.last_flush.lock() = Instant::now();
    }
}

/// Background flush task. One per log when the strategy is time-based.
///
/// The thread wakes on a fixed tick and runs the supplied flush callback.
/// Shutdown is a one-shot signal; [`Flusher::stop`] waits up to a second for
/// the acknowledgement, then abandons the thread.
pub(crate) struct Flusher {
    shutdown: Sender<()>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    pub fn spawn<F>(tick: Duration, flush: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done) = crossbeam_channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("chute-flush".into())
            .spawn(move || {
                debug!("flush task started, tick {tick:?}");
                loop {
                    match shutdown_rx.recv_timeout(tick) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => flush(),
                    }
                }
                debug!("flush task stopped");
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            shutdown,
            done,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        let _ = self.shutdown.try_send(());
        match self.done.recv_timeout(Duration::from_secs(1)) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => warn!("flush task did not acknowledge shutdown within 1s, abandoning"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn validation_rejects_zero_bounds() {
        let cases = [
            FlushStrategy::MessageBased { messages: 0 },
            FlushStrategy::TimeBased { interval_ms: 0 },
            FlushStrategy::Hybrid {
                messages: 0,
                interval_ms: 50,
            },
            FlushStrategy::Hybrid {
                messages: 10,
                interval_ms: 0,
            },
        ];
        for strategy in cases {
            let policy = FlushPolicy {
                strategy,
                ..FlushPolicy::default()
            };
            assert!(policy.validate().is_err(), "{strategy:?} should be invalid");
        }

        assert!(FlushPolicy::default().validate().is_ok());
    }

    #[test]
    fn immediate_always_flushes() {
        let policy = FlushPolicy::default();
        assert!(policy.should_flush(0, Duration::ZERO));
        assert!(policy.should_flush(1, Duration::ZERO));
    }

    #[test]
    fn message_based_counts_appends() {
        let policy = FlushPolicy {
            strategy: FlushStrategy::MessageBased { messages: 3 },
            ..FlushPolicy::default()
        };
        assert!(!policy.should_flush(2, Duration::ZERO));
        assert!(policy.should_flush(3, Duration::ZERO));
    }

    #[test]
    fn time_based_needs_pending_and_elapsed() {
        let policy = FlushPolicy {
            strategy: FlushStrategy::TimeBased { interval_ms: 50 },
            ..FlushPolicy::default()
        };
        assert!(!policy.should_flush(5, Duration::from_millis(10)));
        assert!(!policy.should_flush(0, Duration::from_millis(100)));
        assert!(policy.should_flush(1, Duration::from_millis(50)));
    }

    #[test]
    fn disabled_page_cache_overrides_strategy() {
        let policy = FlushPolicy {
            strategy: FlushStrategy::OsControlled,
            page_cache_enabled: false,
            ..FlushPolicy::default()
        };
        assert!(policy.should_flush(0, Duration::ZERO));
        assert_eq!(policy.timer_interval(), None);
    }

    #[test]
    fn timer_tick_is_bounded() {
        assert_eq!(
            timer_tick(Duration::from_millis(40)),
            Duration::from_millis(10)
        );
        assert_eq!(
            timer_tick(Duration::from_secs(10)),
            Duration::from_millis(100)
        );
        assert_eq!(timer_tick(Duration::ZERO), Duration::from_millis(1));
    }

    #[test]
    fn flusher_runs_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let flusher = Flusher::spawn(Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(60));
        flusher.stop();
        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected a few ticks, got {ticks}");
    }
}
