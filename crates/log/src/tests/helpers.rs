use tempfile::TempDir;

use crate::{Options, TopicLog};

pub fn enable_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

pub fn open_log(dir: &TempDir, opts: Options) -> TopicLog {
    TopicLog::open(dir.path(), opts).unwrap()
}

/// Options with a tiny segment size, so tests rotate after a couple of
/// appends.
pub fn small_segment_opts(max_segment_size: u64) -> Options {
    Options {
        max_segment_size,
        ..Options::default()
    }
}

/// Append `n` records of `payload_len` bytes, returning the assigned offsets.
pub fn fill_log(log: &TopicLog, n: usize, payload_len: usize) -> Vec<u64> {
    (0..n)
        .map(|i| {
            log.append(&vec![(i % 251) as u8 + 1; payload_len])
                .unwrap()
                .offset
        })
        .collect()
}
