//! Append-only, file-backed output log for one job.
//!
//! One writer, any number of independent readers. Readers are
//! *tailing* readers: at the current end of file they wait for more
//! bytes rather than reporting end-of-stream, until the writer closes.
//!
//! Storage is a single file under a per-job temporary directory,
//! mirroring the original design's tempdir-backed buffer but adding
//! the polling-tail read loop that the original left to its caller.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::error::JobError;

/// Default interval a tailing reader sleeps between polls when it has
/// caught up to the writer and the writer is still open.
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Suggested chunk size for streaming reads (spec.md §4.4).
pub const LOG_CHUNK_SIZE: usize = 4096;

struct Shared {
    // Keeps the backing temp directory alive for the buffer's lifetime;
    // never read directly after construction.
    _dir: TempDir,
    path: PathBuf,
    closed: AtomicBool,
    writer_opened: AtomicBool,
}

/// An append-only output log for a single job.
#[derive(Clone)]
pub struct OutputBuffer {
    shared: Arc<Shared>,
}

/// The single writer handle for an `OutputBuffer`.
pub struct OutputWriter {
    file: File,
    shared: Arc<Shared>,
}

/// An independent, tailing reader handle for an `OutputBuffer`.
pub struct OutputReader {
    file: File,
    shared: Arc<Shared>,
}

/// Result of one tailing read attempt.
pub enum TailRead {
    /// `n` bytes were copied into the caller's buffer.
    Data(usize),
    /// The writer has closed and no further bytes remain.
    Eof,
}

impl OutputBuffer {
    /// Allocate a new buffer backed by a fresh temporary directory.
    /// Failures here are construction failures (spec.md §4.4/§7:
    /// `Exec` returns `Aborted` and no job is stored), not ordinary
    /// output I/O failures, so they map to `JobError::Construction`
    /// rather than `JobError::Io`.
    pub fn create() -> Result<Self, JobError> {
        let dir = tempfile::tempdir()
            .map_err(|e| JobError::Construction(format!("failed to create temp dir: {e}")))?;
        let path = dir.path().join("output.log");
        // Create the file up front so open_reader() never races open_writer().
        File::create(&path)
            .map_err(|e| JobError::Construction(format!("failed to create output file: {e}")))?;

        Ok(OutputBuffer {
            shared: Arc::new(Shared {
                _dir: dir,
                path,
                closed: AtomicBool::new(false),
                writer_opened: AtomicBool::new(false),
            }),
        })
    }

    /// Open the single writer handle. Fails if already opened.
    pub fn open_writer(&self) -> Result<OutputWriter, JobError> {
        if self
            .shared
            .writer_opened
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(JobError::Construction(
                "output buffer already has a writer".to_string(),
            ));
        }
        let file = OpenOptions::new()
            .append(true)
            .open(&self.shared.path)
            .map_err(JobError::Io)?;
        Ok(OutputWriter {
            file,
            shared: self.shared.clone(),
        })
    }

    /// Open an independent reader positioned at offset zero. Always succeeds.
    pub fn open_reader(&self) -> Result<OutputReader, JobError> {
        let file = File::open(&self.shared.path).map_err(JobError::Io)?;
        Ok(OutputReader {
            file,
            shared: self.shared.clone(),
        })
    }

    /// Whether the writer side has closed this buffer.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl OutputWriter {
    /// Append bytes. Never blocks on readers.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), JobError> {
        self.file.write_all(bytes).map_err(JobError::Io)?;
        self.file.flush().map_err(JobError::Io)
    }

    /// Mark end-of-stream. Idempotent.
    pub fn close(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl OutputReader {
    /// Copy up to `dst.len()` bytes starting at the reader's current
    /// offset. Returns `0` only when caught up to the writer's tail;
    /// use `is_closed_and_drained` to distinguish "still running" from
    /// "writer closed, nothing left".
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, JobError> {
        self.file.read(dst).map_err(JobError::Io)
    }

    /// True once the writer has closed and this reader has consumed
    /// every byte written before the close.
    pub fn is_closed_and_drained(&mut self) -> Result<bool, JobError> {
        if !self.shared.closed.load(Ordering::SeqCst) {
            return Ok(false);
        }
        // Peek: if a zero-length read at the current offset returns 0,
        // nothing remains.
        let mut probe = [0u8; 1];
        let n = self.file.read(&mut probe).map_err(JobError::Io)?;
        if n == 0 {
            Ok(true)
        } else {
            // Rewind the single byte we just consumed for probing.
            use std::io::{Seek, SeekFrom};
            self.file
                .seek(SeekFrom::Current(-1))
                .map_err(JobError::Io)?;
            Ok(false)
        }
    }

    /// Block (via bounded polling) until either new bytes are
    /// available or the writer has closed with nothing left to drain.
    pub fn read_tail(&mut self, dst: &mut [u8]) -> Result<TailRead, JobError> {
        loop {
            let n = self.read(dst)?;
            if n > 0 {
                return Ok(TailRead::Data(n));
            }
            if self.shared.closed.load(Ordering::SeqCst) {
                return Ok(TailRead::Eof);
            }
            std::thread::sleep(TAIL_POLL_INTERVAL);
        }
    }

    /// Release the reader. Equivalent to dropping it.
    pub fn close(self) {}
}
