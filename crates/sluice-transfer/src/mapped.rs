//! Random-access reads over a large file without loading it.
//!
//! [`MappedReader`] maps the file read-only when it can (`0 < len` and the
//! `mmap` call succeeds) and otherwise reads with positional `pread`. Both
//! backings return the same bytes for the same index. The mapping is
//! released exactly once: by an explicit [`MappedReader::close`] or on drop.

use sluice_core::kwarn;

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

/// Which backing to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Map if possible, else positional reads.
    Auto,
    /// Never map.
    Positional,
}

/// The backing actually in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Mapped,
    Positional,
    Closed,
}

enum Inner {
    Mapped { ptr: NonNull<u8>, len: usize },
    Positional,
    Closed,
}

pub struct MappedReader {
    file: File,
    len: u64,
    inner: Inner,
}

// The mapping is read-only and private; shared reads are sound.
unsafe impl Send for MappedReader {}
unsafe impl Sync for MappedReader {}

impl MappedReader {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open_with(path, Strategy::Auto)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, strategy: Strategy) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let inner = match strategy {
            Strategy::Positional => Inner::Positional,
            Strategy::Auto if len == 0 || len > isize::MAX as u64 => Inner::Positional,
            Strategy::Auto => match map_file(&file, len as usize) {
                Ok(ptr) => Inner::Mapped {
                    ptr,
                    len: len as usize,
                },
                Err(e) => {
                    kwarn!("mmap {} failed ({}), using positional reads", path.display(), e);
                    Inner::Positional
                }
            },
        };

        Ok(Self { file, len, inner })
    }

    /// File length at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn backing(&self) -> Backing {
        match self.inner {
            Inner::Mapped { .. } => Backing::Mapped,
            Inner::Positional => Backing::Positional,
            Inner::Closed => Backing::Closed,
        }
    }

    /// Whether `close()` releases anything early (a mapping exists).
    pub fn releases_early(&self) -> bool {
        matches!(self.inner, Inner::Mapped { .. })
    }

    pub fn read_byte_at(&self, index: u64) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        match self.read_at(index, &mut byte)? {
            1 => Ok(byte[0]),
            _ => Err(out_of_range(index, self.len)),
        }
    }

    /// Copy up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns 0 at end of file; an `offset` past the end is `InvalidInput`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset > self.len {
            return Err(out_of_range(offset, self.len));
        }
        let n = (self.len - offset).min(buf.len() as u64) as usize;
        if n == 0 {
            return Ok(0);
        }

        match &self.inner {
            Inner::Mapped { ptr, .. } => {
                // offset + n <= len, the mapped length.
                let src = unsafe {
                    std::slice::from_raw_parts(ptr.as_ptr().add(offset as usize), n)
                };
                buf[..n].copy_from_slice(src);
                Ok(n)
            }
            Inner::Positional => {
                self.file.read_exact_at(&mut buf[..n], offset)?;
                Ok(n)
            }
            Inner::Closed => Err(io::Error::new(io::ErrorKind::Other, "reader closed")),
        }
    }

    /// Release the mapping (if any). Later reads fail; repeated calls are
    /// no-ops.
    pub fn close(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Mapped { ptr, len } => {
                let rc = unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, len) };
                if rc != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            }
            Inner::Positional | Inner::Closed => Ok(()),
        }
    }
}

impl Drop for MappedReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for MappedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedReader")
            .field("len", &self.len)
            .field("backing", &self.backing())
            .finish()
    }
}

fn map_file(file: &File, len: usize) -> io::Result<NonNull<u8>> {
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ,
            libc::MAP_PRIVATE,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr as *mut u8).ok_or_else(|| io::Error::from(io::ErrorKind::Other))
}

fn out_of_range(index: u64, len: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("index {} out of range for length {}", index, len),
    )
}
