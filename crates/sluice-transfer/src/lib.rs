//! # sluice-transfer
//!
//! Blocking bulk transfer between file descriptors.
//!
//! The [`TransferEngine`] tries a kernel-assisted direct path first and falls
//! back to copying through a reusable buffer, resuming at the byte the direct
//! path reached. Progress is reported through a [`ProgressSink`] and jobs stop
//! cooperatively on a [`CancelFlag`].
//!
//! ## Modules
//!
//! - `engine` - `TransferEngine`, `TransferOutcome`
//! - `fastpath` - `FastPath` trait, `Sendfile`, `Disabled`
//! - `progress` - `Progress`, `ProgressSink`, `ProgressTracker`
//! - `copy` - whole-file `copy_file`
//! - `mapped` - `MappedReader`, random access over mmap or positional reads
//! - `config` - `TransferConfig`
//! - `error` - `TransferError`
//!
//! ## Example
//!
//! ```ignore
//! use sluice_transfer::{copy_file, CancelFlag, Progress};
//! use std::path::Path;
//!
//! let cancel = CancelFlag::new();
//! let mut sink = |p: &Progress| eprintln!("{}", p);
//! let outcome = copy_file(Path::new("big.iso"), Path::new("/tmp/big.iso"), &mut sink, &cancel)?;
//! ```

pub mod config;
pub mod copy;
pub mod engine;
pub mod error;
pub mod fastpath;
pub mod mapped;
pub mod progress;

pub use config::TransferConfig;
pub use copy::copy_file;
pub use engine::{TransferEngine, TransferOutcome};
pub use error::{TransferError, TransferResult};
pub use fastpath::{Disabled, FastPath, Sendfile};
pub use mapped::{Backing, MappedReader, Strategy};
pub use progress::{NoProgress, Progress, ProgressSink, ProgressTracker, TransferPath};

pub use sluice_core::CancelFlag;

use std::io::{Read, Seek, Write};
use std::os::fd::AsFd;

/// [`TransferEngine::transfer`] with an engine configured from the
/// environment.
pub fn transfer<S, D, P>(
    source: &mut S,
    dest: &mut D,
    total: u64,
    sink: &mut P,
    cancel: &CancelFlag,
) -> TransferResult<TransferOutcome>
where
    S: Read + Seek + AsFd + ?Sized,
    D: Write + AsFd + ?Sized,
    P: ProgressSink + ?Sized,
{
    TransferEngine::default().transfer(source, dest, total, sink, cancel)
}
