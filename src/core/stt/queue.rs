//! Bounded drop-oldest audio queue feeding the STT upstream.
//!
//! Microphone audio is real-time: when the upstream writer falls behind, the
//! oldest frames are the least useful, so the queue evicts from the front
//! instead of blocking the gateway reader.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    frames: VecDeque<Bytes>,
    closed: bool,
    dropped: u64,
}

/// Single-producer single-consumer frame queue with a close sentinel.
#[derive(Debug)]
pub struct AudioQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a frame, evicting the oldest when the bound is exceeded.
    /// Frames pushed after close are discarded.
    pub fn push(&self, frame: Bytes) {
        {
            let mut inner = self.inner.lock().expect("audio queue poisoned");
            if inner.closed {
                return;
            }
            if inner.frames.len() >= self.capacity {
                inner.frames.pop_front();
                inner.dropped += 1;
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Signal end-of-stream; pending frames still drain.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("audio queue poisoned");
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("audio queue poisoned").closed
    }

    /// Frames evicted so far (for diagnostics).
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("audio queue poisoned").dropped
    }

    /// Discard buffered frames (used before a reconnect so the new upstream
    /// starts with a clean slate).
    pub fn drain_pending(&self) {
        let mut inner = self.inner.lock().expect("audio queue poisoned");
        inner.frames.clear();
    }

    /// Wait for the next frame; `None` once closed and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("audio queue poisoned");
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_come_out_in_order() {
        let queue = AudioQueue::new(8);
        queue.push(Bytes::from_static(b"a"));
        queue.push(Bytes::from_static(b"b"));
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn overflow_drops_the_oldest_frame() {
        let queue = AudioQueue::new(2);
        queue.push(Bytes::from_static(b"a"));
        queue.push(Bytes::from_static(b"b"));
        queue.push(Bytes::from_static(b"c"));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(b"c"));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = AudioQueue::new(4);
        queue.push(Bytes::from_static(b"a"));
        queue.close();
        assert_eq!(queue.pop().await, Some(Bytes::from_static(b"a")));
        assert_eq!(queue.pop().await, None);
        // Pushes after close are ignored
        queue.push(Bytes::from_static(b"z"));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = std::sync::Arc::new(AudioQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(Bytes::from_static(b"x"));
        assert_eq!(consumer.await.unwrap(), Some(Bytes::from_static(b"x")));
    }
}
