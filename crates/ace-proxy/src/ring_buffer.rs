use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

struct Inner {
    chunks: VecDeque<Bytes>,
    base_index: u64,
}

/// Bounded FIFO of opaque byte chunks shared by every client reading one
/// content id. Readers hold an absolute index rather than a slice
/// position, so falling behind is detected (and recovered by skipping
/// forward) instead of panicking on a stale pointer.
///
/// The writer-faster-than-readers case is handled by simply dropping the
/// oldest chunk and advancing `base_index` — correct for live video, where
/// catching up matters more than completeness.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    writer_alive: AtomicBool,
    failed: AtomicBool,
}

/// What a read at some absolute index yielded.
pub struct ReadResult {
    pub chunks: Vec<Bytes>,
    /// The reader's next absolute index after this read.
    pub next_index: u64,
    /// `true` if the requested index was older than the oldest retained
    /// chunk; some data was silently skipped.
    pub skipped: bool,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { chunks: VecDeque::with_capacity(capacity), base_index: 0 }),
            notify: Notify::new(),
            capacity,
            writer_alive: AtomicBool::new(true),
            failed: AtomicBool::new(false),
        }
    }

    /// The absolute index a newly arriving client should start reading
    /// from: the current write head, so it sees only future data.
    pub fn head_index(&self) -> u64 {
        let guard = self.inner.lock().unwrap();
        guard.base_index + guard.chunks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().chunks.is_empty()
    }

    pub fn push(&self, chunk: Bytes) {
        let mut guard = self.inner.lock().unwrap();
        if guard.chunks.len() >= self.capacity {
            guard.chunks.pop_front();
            guard.base_index += 1;
        }
        guard.chunks.push_back(chunk);
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Returns every chunk from `from_index` (clamped to the oldest
    /// retained chunk) up to the current head.
    pub fn read_from(&self, from_index: u64) -> ReadResult {
        let guard = self.inner.lock().unwrap();
        let clamped = from_index.max(guard.base_index);
        let skipped = clamped > from_index;
        let start = (clamped - guard.base_index) as usize;
        let chunks: Vec<Bytes> = guard.chunks.iter().skip(start).cloned().collect();
        let next_index = guard.base_index + guard.chunks.len() as u64;
        ReadResult { chunks, next_index, skipped }
    }

    pub async fn wait_for_data(&self) {
        self.notify.notified().await;
    }

    pub fn mark_writer_done(&self) {
        self.writer_alive.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_writer_alive(&self) -> bool {
        self.writer_alive.load(Ordering::SeqCst)
    }

    /// Marks the stream as failed (upstream error, not a clean end); readers
    /// use this to distinguish "nothing new yet" from "never will be".
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_reader_starts_at_current_head() {
        let ring = RingBuffer::new(4);
        ring.push(Bytes::from_static(b"a"));
        assert_eq!(ring.head_index(), 1);
    }

    #[test]
    fn read_from_head_sees_subsequent_pushes() {
        let ring = RingBuffer::new(4);
        let start = ring.head_index();
        ring.push(Bytes::from_static(b"a"));
        ring.push(Bytes::from_static(b"b"));
        let result = ring.read_from(start);
        assert_eq!(result.chunks, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert!(!result.skipped);
        assert_eq!(result.next_index, 2);
    }

    #[test]
    fn falling_behind_capacity_is_clamped_and_marked_skipped() {
        let ring = RingBuffer::new(2);
        ring.push(Bytes::from_static(b"a"));
        ring.push(Bytes::from_static(b"b"));
        ring.push(Bytes::from_static(b"c"));
        let result = ring.read_from(0);
        assert!(result.skipped);
        assert_eq!(result.chunks, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
    }

    #[test]
    fn mark_failed_is_sticky_and_observable() {
        let ring = RingBuffer::new(4);
        assert!(!ring.is_failed());
        ring.mark_failed();
        assert!(ring.is_failed());
    }

    #[test]
    fn reading_at_head_with_no_new_data_is_empty() {
        let ring = RingBuffer::new(4);
        ring.push(Bytes::from_static(b"a"));
        let head = ring.head_index();
        let result = ring.read_from(head);
        assert!(result.chunks.is_empty());
        assert!(!result.skipped);
    }
}
