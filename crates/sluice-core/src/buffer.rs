//! Byte buffer with fill / flip / consume / compact discipline.
//!
//! A `ByteBuffer` owns a fixed-size region and three cursors:
//!
//! ```text
//!   0 <= read_mark <= write_mark <= capacity
//!
//!   fill mode:     [ unread (read_mark..write_mark) | free (write_mark..cap) ]
//!   consume mode:  [ consumed | unread (read_mark..limit) | ignored ]
//! ```
//!
//! The cycle is `fill` → `begin_consume` (flip) → `consume` → `compact` or
//! `reset_for_fill`. Calling `fill` in consume mode, or `consume` in fill
//! mode, is a programming error and panics.
//!
//! The region never grows in place. `grow()` replaces the storage with a
//! larger one, carrying the unread bytes over.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};

/// Result of a single `fill` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// `n` bytes were appended at the old write mark.
    Data(usize),
    /// The source has nothing right now (non-blocking `WouldBlock`),
    /// or the buffer has no free space left.
    NotReady,
    /// The source will never produce another byte.
    EndOfStream,
}

/// Fixed-capacity byte region with explicit read/write cursors.
pub struct ByteBuffer {
    storage: Box<[u8]>,
    /// Next write offset (fill mode), or the frozen limit (consume mode).
    write_mark: usize,
    /// Next read offset.
    read_mark: usize,
    consuming: bool,
}

impl ByteBuffer {
    /// Allocate a zeroed buffer in fill mode.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            write_mark: 0,
            read_mark: 0,
            consuming: false,
        }
    }

    /// Wrap already-produced bytes as a buffer that is ready to be consumed.
    ///
    /// Used for staged responses: the whole vector is unread, and the buffer
    /// starts in consume mode.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            storage: bytes.into_boxed_slice(),
            write_mark: len,
            read_mark: 0,
            consuming: true,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn read_mark(&self) -> usize {
        self.read_mark
    }

    #[inline]
    pub fn write_mark(&self) -> usize {
        self.write_mark
    }

    #[inline]
    pub fn is_consuming(&self) -> bool {
        self.consuming
    }

    /// Bytes not yet consumed (valid in both modes).
    #[inline]
    pub fn remaining(&self) -> usize {
        self.write_mark - self.read_mark
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Free space after the write mark. Zero in consume mode.
    #[inline]
    pub fn writable(&self) -> usize {
        if self.consuming {
            0
        } else {
            self.capacity() - self.write_mark
        }
    }

    /// The unread bytes (`read_mark..write_mark`).
    #[inline]
    pub fn unread(&self) -> &[u8] {
        &self.storage[self.read_mark..self.write_mark]
    }

    /// Read as much as `source` will currently give into the free region.
    ///
    /// `Interrupted` is retried. `WouldBlock` and a full buffer both map to
    /// `Fill::NotReady`; a zero-length read into non-empty space is
    /// `Fill::EndOfStream`.
    ///
    /// # Panics
    /// If the buffer is in consume mode.
    pub fn fill<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<Fill> {
        assert!(
            !self.consuming,
            "ByteBuffer::fill called in consume mode; compact() or reset_for_fill() first"
        );
        if self.write_mark == self.capacity() {
            return Ok(Fill::NotReady);
        }
        loop {
            match source.read(&mut self.storage[self.write_mark..]) {
                Ok(0) => return Ok(Fill::EndOfStream),
                Ok(n) => {
                    self.write_mark += n;
                    return Ok(Fill::Data(n));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Fill::NotReady),
                Err(e) => return Err(e),
            }
        }
    }

    /// Copy `bytes` into the free region. Returns how many fit.
    ///
    /// # Panics
    /// If the buffer is in consume mode.
    pub fn put_slice(&mut self, bytes: &[u8]) -> usize {
        assert!(!self.consuming, "ByteBuffer::put_slice called in consume mode");
        let n = bytes.len().min(self.writable());
        self.storage[self.write_mark..self.write_mark + n].copy_from_slice(&bytes[..n]);
        self.write_mark += n;
        n
    }

    /// Flip: freeze the write mark as the limit and rewind the read mark.
    ///
    /// Any bytes still unread at the time of the flip stay readable, which
    /// makes the flip safe to call right after `compact()`.
    pub fn begin_consume(&mut self) {
        if !self.consuming {
            self.read_mark = 0;
            self.consuming = true;
        }
    }

    /// Write unread bytes to `destination`, advancing by what it accepted.
    ///
    /// Returns the number of bytes taken by the destination; `0` means it is
    /// not ready (`WouldBlock`) and the caller should wait for writability.
    ///
    /// # Panics
    /// If the buffer is in fill mode.
    pub fn consume<W: Write + ?Sized>(&mut self, destination: &mut W) -> io::Result<usize> {
        assert!(
            self.consuming,
            "ByteBuffer::consume called in fill mode; begin_consume() first"
        );
        if self.read_mark == self.write_mark {
            return Ok(0);
        }
        loop {
            match destination.write(&self.storage[self.read_mark..self.write_mark]) {
                Ok(n) => {
                    self.read_mark += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(e),
            }
        }
    }

    /// Move unread bytes to offset 0 and switch back to fill mode.
    pub fn compact(&mut self) {
        let unread = self.remaining();
        if self.read_mark > 0 {
            self.storage.copy_within(self.read_mark..self.write_mark, 0);
        }
        self.read_mark = 0;
        self.write_mark = unread;
        self.consuming = false;
    }

    /// Drop all content and return to an empty fill mode.
    pub fn reset_for_fill(&mut self) {
        self.read_mark = 0;
        self.write_mark = 0;
        self.consuming = false;
    }

    /// Replace the storage with a larger region holding the unread bytes.
    ///
    /// The result is compacted and in fill mode. A `new_capacity` that cannot
    /// hold the unread bytes is raised to fit them.
    pub fn grow(&mut self, new_capacity: usize) {
        let unread = self.remaining();
        let mut storage = vec![0u8; new_capacity.max(unread)].into_boxed_slice();
        storage[..unread].copy_from_slice(self.unread());
        self.storage = storage;
        self.read_mark = 0;
        self.write_mark = unread;
        self.consuming = false;
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("read_mark", &self.read_mark)
            .field("write_mark", &self.write_mark)
            .field("capacity", &self.capacity())
            .field("consuming", &self.consuming)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
