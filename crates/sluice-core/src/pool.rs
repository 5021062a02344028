//! Lock-free free list of same-sized `ByteBuffer`s.
//!
//! Connections take a buffer at accept time and hand it back on close.
//! Closes happen on the event loop thread and on the reaper thread, so the
//! free list is a bounded MPMC `ArrayQueue` rather than a `Vec` behind the
//! registry lock.
//!
//! Buffers whose capacity no longer matches the pool (grown by replacement)
//! are dropped on release instead of being recycled.

use crate::buffer::ByteBuffer;

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct BufferPool {
    free: ArrayQueue<ByteBuffer>,
    buffer_size: usize,
    /// Fresh allocations (pool was empty).
    allocated: AtomicUsize,
    /// Acquisitions served from the free list.
    reused: AtomicUsize,
}

impl BufferPool {
    /// Create a pool holding at most `max_idle` idle buffers of `buffer_size`.
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            free: ArrayQueue::new(max_idle.max(1)),
            buffer_size,
            allocated: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    /// Take an empty buffer in fill mode.
    pub fn acquire(&self) -> ByteBuffer {
        match self.free.pop() {
            Some(buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                ByteBuffer::with_capacity(self.buffer_size)
            }
        }
    }

    /// Return a buffer. Content is discarded.
    pub fn release(&self, mut buf: ByteBuffer) {
        if buf.capacity() != self.buffer_size {
            return;
        }
        buf.reset_for_fill();
        // Full free list: let the buffer drop.
        let _ = self.free.push(buf);
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_release_reuses() {
        let pool = BufferPool::new(128, 4);
        let buf = pool.acquire();
        assert_eq!(buf.capacity(), 128);
        assert_eq!(pool.allocated(), 1);

        pool.release(buf);
        assert_eq!(pool.idle(), 1);

        let again = pool.acquire();
        assert_eq!(pool.reused(), 1);
        assert_eq!(again.remaining(), 0);
        assert!(!again.is_consuming());
    }

    #[test]
    fn test_release_resets_content() {
        let pool = BufferPool::new(8, 2);
        let mut buf = pool.acquire();
        buf.put_slice(b"junk");
        buf.begin_consume();
        pool.release(buf);

        let buf = pool.acquire();
        assert_eq!(buf.remaining(), 0);
        assert_eq!(buf.writable(), 8);
    }

    #[test]
    fn test_grown_buffer_not_recycled() {
        let pool = BufferPool::new(8, 2);
        let mut buf = pool.acquire();
        buf.grow(32);
        pool.release(buf);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_overflow_drops_extra() {
        let pool = BufferPool::new(8, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_concurrent_release() {
        let pool = Arc::new(BufferPool::new(16, 64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let buf = pool.acquire();
                        pool.release(buf);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.allocated() + pool.reused(), 400);
        assert!(pool.idle() <= 4);
    }
}
