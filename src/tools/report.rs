//! Run-wide reporting: per-job diagnostics and the aggregate exit status.

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared state of one run: the aggregate failure flag and the diagnostic stream.
///
/// Every job gets a reference. Lines are written with a single `write_all` under
/// the lock, so reports from concurrent jobs never interleave.
pub struct RunContext {
    failed: Mutex<bool>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl RunContext {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            failed: Mutex::new(false),
            out: Mutex::new(out),
        }
    }

    /// Diagnostics on standard error.
    pub fn stderr() -> Self {
        Self::new(Box::new(io::stderr()))
    }

    /// Emit one line atomically.
    pub fn write_line<S: AsRef<str>>(&self, text: S) {
        let mut line = String::with_capacity(text.as_ref().len() + 1);
        line.push_str(text.as_ref());
        line.push('\n');
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // Nowhere left to report a broken diagnostic stream.
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }

    /// Mark the run as failed. Never cleared.
    pub fn report_failure(&self) {
        *self.failed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Report `err` against `name` and mark the run as failed.
    pub fn fail<E: Display + ?Sized>(&self, name: &str, err: &E) {
        self.write_line(format!("{}: {}", name, err));
        self.report_failure();
    }

    pub fn failed(&self) -> bool {
        *self.failed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process exit status for the run so far.
    pub fn exit_code(&self) -> i32 {
        if self.failed() {
            1
        } else {
            0
        }
    }
}

/// In-memory diagnostic sink that stays readable after being handed to a
/// `RunContext`.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
