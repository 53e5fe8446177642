// Comment cache
//
// A single instrument-wide lane of comment and log records. Consumers that
// just reset the trial may sleep on the arrival signal until the first
// record newer than the trial start shows up.

use super::ring::{Arrival, CacheMetrics, RingSet};
use super::{ReadFormat, Timestamps};
use crate::channel::MAX_COMMENT_LEN;
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommentRecord {
    timestamp: u64,
    rgba: u32,
    charset: u8,
    len: u8,
    text: [u8; MAX_COMMENT_LEN],
}

impl Default for CommentRecord {
    fn default() -> Self {
        Self {
            timestamp: 0,
            rgba: 0,
            charset: 0,
            len: 0,
            text: [0; MAX_COMMENT_LEN],
        }
    }
}

impl CommentRecord {
    fn new(timestamp: u64, rgba: u32, charset: u8, text: &str) -> Self {
        let text = truncate(text, MAX_COMMENT_LEN);
        let mut record = Self {
            timestamp,
            rgba,
            charset,
            len: text.len() as u8,
            ..Self::default()
        };
        record.text[..text.len()].copy_from_slice(text.as_bytes());
        record
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.text[..usize::from(self.len)]).into_owned()
    }
}

/// Longest prefix of `text` within `max` bytes that ends on a char boundary
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentInit {
    pub pending: usize,
    /// Set when the init call waited for a comment and none arrived
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentTrial {
    /// Most comments copied per read
    pub limit: usize,
    pub timestamps: Timestamps,
    pub rgbas: Vec<u32>,
    pub charsets: Vec<u8>,
    pub texts: Vec<String>,
}

impl CommentTrial {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

pub struct CommentCache {
    ring: RingSet<CommentRecord>,
    arrival: Arrival,
}

impl CommentCache {
    pub(crate) fn try_new(capacity: usize) -> std::result::Result<Self, TryReserveError> {
        Ok(Self {
            ring: RingSet::try_new(capacity, 1, ())?,
            arrival: Arrival::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Store a comment; text beyond the comment limit is cut off.
    /// `arrived_at` is the packet time used to wake waiters.
    pub(crate) fn write(
        &self,
        timestamp: u64,
        rgba: u32,
        charset: u8,
        text: &str,
        arrived_at: u64,
        trial_start: u64,
    ) -> bool {
        let record = CommentRecord::new(timestamp, rgba, charset, text);
        let stored = self.ring.writer().push(0, record);
        if stored && arrived_at > trial_start {
            self.arrival.notify();
        }
        stored
    }

    pub(crate) fn pending(&self) -> usize {
        self.ring.snapshot().pending(0)
    }

    /// Report pending comments, optionally sleeping up to `wait` when the
    /// cache is empty
    pub(crate) fn init(&self, wait: Option<Duration>) -> CommentInit {
        let pending = self.pending();
        match wait {
            Some(timeout) if pending == 0 => {
                let arrived = self.arrival.wait(timeout, || self.pending() > 0);
                CommentInit {
                    pending: self.pending(),
                    timed_out: !arrived,
                }
            }
            _ => CommentInit {
                pending,
                timed_out: false,
            },
        }
    }

    pub(crate) fn drain(&self, dest: &mut CommentTrial, format: &ReadFormat, advance: bool) -> usize {
        let snapshot = self.ring.snapshot();
        let records = self
            .ring
            .read(&snapshot, 0, snapshot.pending(0).min(dest.limit));
        let count = records.len();

        dest.timestamps.prepare(format, count);
        dest.rgbas.clear();
        dest.charsets.clear();
        dest.texts.clear();
        for record in records {
            dest.timestamps.push(format, record.timestamp);
            dest.rgbas.push(record.rgba);
            dest.charsets.push(record.charset);
            dest.texts.push(record.text());
        }

        if advance {
            self.ring.commit(&snapshot, &[(0, count)]);
        }
        count
    }

    pub(crate) fn reset(&self) {
        self.ring.reset();
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.ring.metrics(|_| 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ticks() -> ReadFormat {
        ReadFormat {
            double: false,
            rebase: None,
        }
    }

    #[test]
    fn test_write_and_drain() {
        let cache = CommentCache::try_new(4).unwrap();
        cache.write(10, 0xff00ff00, 0, "stimulus on", 10, 0);
        cache.write(20, 0, 1, "stimulus off", 20, 0);

        let mut trial = CommentTrial::new(cache.init(None).pending);
        assert_eq!(cache.drain(&mut trial, &ticks(), true), 2);
        assert_eq!(trial.texts, vec!["stimulus on", "stimulus off"]);
        assert_eq!(trial.rgbas, vec![0xff00ff00, 0]);
        assert_eq!(trial.charsets, vec![0, 1]);
        assert_eq!(trial.timestamps.ticks(), Some(&[10u64, 20][..]));
        assert_eq!(cache.pending(), 0);
    }

    #[test]
    fn test_long_text_is_truncated() {
        let cache = CommentCache::try_new(2).unwrap();
        let long = "é".repeat(100);
        cache.write(1, 0, 0, &long, 1, 0);

        let mut trial = CommentTrial::new(1);
        cache.drain(&mut trial, &ticks(), false);
        assert_eq!(trial.texts[0].len(), MAX_COMMENT_LEN);
        assert!(trial.texts[0].chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("abc", 8), "abc");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("aé", 2), "a");
    }

    #[test]
    fn test_init_times_out_when_empty() {
        let cache = CommentCache::try_new(2).unwrap();
        let init = cache.init(Some(Duration::from_millis(20)));
        assert_eq!(init.pending, 0);
        assert!(init.timed_out);
    }

    #[test]
    fn test_init_wakes_on_comment() {
        let cache = Arc::new(CommentCache::try_new(4).unwrap());
        let writer = cache.clone();
        let handle = thread::spawn(move || {
            for i in 0..100u64 {
                thread::sleep(Duration::from_millis(10));
                if writer.write(100 + i, 0, 0, "late", 100 + i, 50) {
                    break;
                }
            }
        });
        let init = cache.init(Some(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(!init.timed_out);
        assert_eq!(init.pending, 1);
    }
}
