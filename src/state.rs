//! Shared pipeline state.
//!
//! `SharedState` is the single-slot store between the capture/detect worker
//! (one writer) and the request handlers (many readers). A publish swaps a
//! reference-counted snapshot; a read clones the count. Readers therefore
//! always see one complete publish, keep their snapshot valid across later
//! publishes, and never block the worker beyond the swap itself.
//!
//! `MessageLog` is the bounded FIFO of human-readable status messages that
//! the gateway renders; both the worker and the startup path append to it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::clock_prefix;
use crate::detect::DetectionData;

/// Default cap on retained system messages.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 255;

/// Single most-recent-result store. Cloning shares the slot.
#[derive(Clone, Default)]
pub struct SharedState {
    current: Arc<Mutex<Option<Arc<DetectionData>>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current result as one indivisible unit.
    pub fn publish(&self, result: DetectionData) {
        let mut slot = self.current.lock().unwrap_or_else(|err| err.into_inner());
        *slot = Some(Arc::new(result));
    }

    /// Self-consistent snapshot of the current result. `None` before the
    /// first publish. Never blocks on the producer beyond the slot lock.
    pub fn read(&self) -> Option<Arc<DetectionData>> {
        self.current
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

/// Bounded FIFO of timestamped status messages. Cloning shares the log.
#[derive(Clone)]
pub struct MessageLog {
    inner: Arc<Mutex<LogInner>>,
}

struct LogInner {
    messages: VecDeque<String>,
    capacity: usize,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MESSAGE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                messages: VecDeque::with_capacity(capacity.min(64)),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Prefix a wall-clock timestamp, push to the back, evict the oldest
    /// entry once past capacity.
    pub fn append(&self, text: &str) {
        log::info!("system message: {}", text);
        let stamped = format!("{}{}", clock_prefix(), text);
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        if inner.messages.len() == inner.capacity {
            inner.messages.pop_front();
        }
        inner.messages.push_back(stamped);
    }

    /// Messages in insertion order, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .messages
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .messages
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionBox, FrameImage, Label};

    fn result_tagged(tag: u64) -> DetectionData {
        // Every field is derived from the tag so a torn read would show as
        // a mismatch between them.
        DetectionData {
            timestamp_ms: tag,
            image: Some(Arc::new(FrameImage {
                jpeg: tag.to_le_bytes().to_vec(),
                width: tag as u32,
                height: tag as u32,
            })),
            boxes: vec![DetectionBox {
                x1: tag as f32,
                y1: 0.0,
                x2: 0.0,
                y2: 0.0,
                score: 0.9,
                label: Label::new("person").unwrap(),
            }],
        }
    }

    #[test]
    fn read_before_first_publish_is_none() {
        let state = SharedState::new();
        assert!(state.read().is_none());
    }

    #[test]
    fn publish_overwrites_the_single_slot() {
        let state = SharedState::new();
        state.publish(result_tagged(1));
        state.publish(result_tagged(2));
        assert_eq!(state.read().unwrap().timestamp_ms, 2);
    }

    #[test]
    fn snapshots_outlive_later_publishes() {
        let state = SharedState::new();
        state.publish(result_tagged(1));
        let held = state.read().unwrap();
        state.publish(result_tagged(2));
        assert_eq!(held.timestamp_ms, 1);
        assert_eq!(state.read().unwrap().timestamp_ms, 2);
    }

    #[test]
    fn concurrent_reads_see_whole_publishes_only() {
        let state = SharedState::new();
        state.publish(result_tagged(0));

        let writer_state = state.clone();
        let writer = std::thread::spawn(move || {
            for tag in 1..=500u64 {
                writer_state.publish(result_tagged(tag));
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = state.read().expect("published");
                        let tag = snap.timestamp_ms;
                        let image = snap.image.as_ref().expect("image");
                        assert_eq!(image.jpeg, tag.to_le_bytes().to_vec());
                        assert_eq!(image.width as u64, tag);
                        assert_eq!(snap.boxes[0].x1 as u64, tag);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn message_log_caps_and_evicts_oldest_first() {
        let log = MessageLog::with_capacity(3);
        for i in 0..4 {
            log.append(&format!("message {}", i));
        }

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot[0].ends_with("message 1"));
        assert!(snapshot[1].ends_with("message 2"));
        assert!(snapshot[2].ends_with("message 3"));
    }

    #[test]
    fn messages_are_timestamp_prefixed() {
        let log = MessageLog::new();
        log.append("hello");
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].starts_with('['));
        assert!(snapshot[0].ends_with("] hello"));
    }

    #[test]
    fn append_and_snapshot_are_safe_across_threads() {
        let log = MessageLog::with_capacity(16);
        let writer_log = log.clone();
        let writer = std::thread::spawn(move || {
            for i in 0..200 {
                writer_log.append(&format!("m{}", i));
            }
        });

        for _ in 0..200 {
            let snapshot = log.snapshot();
            assert!(snapshot.len() <= 16);
        }
        writer.join().unwrap();
        assert_eq!(log.len(), 16);
    }
}
