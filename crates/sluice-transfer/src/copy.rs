//! Whole-file copy on top of the transfer engine.

use crate::engine::{TransferEngine, TransferOutcome};
use crate::error::{TransferError, TransferResult};
use crate::fastpath::FastPath;
use crate::progress::ProgressSink;

use sluice_core::{kdebug, CancelFlag};

use std::fs::{self, File};
use std::io;
use std::path::Path;

impl<F: FastPath> TransferEngine<F> {
    /// Copy `src` to `dst`, creating `dst`'s parent directories and
    /// truncating any existing `dst`.
    ///
    /// An empty source produces an empty destination and a single 100%
    /// report. On cancellation the partial destination is left in place.
    pub fn copy_file<P>(
        &mut self,
        src: &Path,
        dst: &Path,
        sink: &mut P,
        cancel: &CancelFlag,
    ) -> TransferResult<TransferOutcome>
    where
        P: ProgressSink + ?Sized,
    {
        let meta = match fs::metadata(src) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::SourceNotFound(src.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Err(TransferError::SourceIsDirectory(src.to_path_buf()));
        }

        if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut source = File::open(src)?;
        let mut dest = File::create(dst)?;
        let total = meta.len();

        kdebug!("copy {} -> {} ({} bytes)", src.display(), dst.display(), total);
        let outcome = self.transfer(&mut source, &mut dest, total, sink, cancel)?;
        if !outcome.is_cancelled() {
            dest.sync_data()
                .map_err(|e| TransferError::io(outcome.transferred(), e))?;
        }
        Ok(outcome)
    }
}

/// [`TransferEngine::copy_file`] with a default engine.
pub fn copy_file<P>(
    src: &Path,
    dst: &Path,
    sink: &mut P,
    cancel: &CancelFlag,
) -> TransferResult<TransferOutcome>
where
    P: ProgressSink + ?Sized,
{
    TransferEngine::default().copy_file(src, dst, sink, cancel)
}
