//! In-memory byte pipe between one producer thread and one consumer thread.
//!
//! Data travels in chunks over a bounded channel, so a fast producer blocks once
//! `depth` chunks are waiting and memory stays proportional to `depth * CHUNK_SIZE`.
//! Both ends can fail the pipe explicitly; the other end then sees that error
//! instead of a clean end of stream.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Largest chunk handed over in one packet.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Number of chunks allowed in flight before the writer blocks.
pub const CONDUIT_DEPTH: usize = 16;

/// A failure carried across the pipe. `io::Error` is not `Clone`, so keep what is
/// needed to rebuild it on the other side.
#[derive(Clone, Debug)]
struct Fault {
    kind: io::ErrorKind,
    message: String,
}

impl Fault {
    fn new(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    fn to_error(&self) -> io::Error {
        io::Error::new(self.kind, self.message.clone())
    }
}

enum Packet {
    Data(Vec<u8>),
    End,
    Fail(Fault),
}

/// State the reader leaves behind for the writer when it gives up.
#[derive(Default)]
struct Hangup {
    fault: Mutex<Option<Fault>>,
}

impl Hangup {
    fn set(&self, fault: Fault) {
        let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(fault);
    }

    fn get(&self) -> Option<Fault> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Create a connected writer/reader pair with the default depth.
pub fn conduit() -> (ConduitWriter, ConduitReader) {
    conduit_with_depth(CONDUIT_DEPTH)
}

/// Create a connected writer/reader pair holding at most `depth` chunks in flight.
pub fn conduit_with_depth(depth: usize) -> (ConduitWriter, ConduitReader) {
    let (tx, rx) = bounded(depth.max(1));
    let hangup = Arc::new(Hangup::default());
    (
        ConduitWriter {
            tx: Some(tx),
            hangup: Arc::clone(&hangup),
        },
        ConduitReader {
            rx: Some(rx),
            pending: Vec::new(),
            pos: 0,
            state: ReadState::Open,
            hangup,
        },
    )
}

/// Sending half. Must be finished with `close` or `close_with_error`; simply
/// dropping it shows up as a broken pipe on the reading side.
pub struct ConduitWriter {
    tx: Option<Sender<Packet>>,
    hangup: Arc<Hangup>,
}

impl ConduitWriter {
    /// Signal a clean end of stream.
    pub fn close(&mut self) -> io::Result<()> {
        match self.tx.take() {
            Some(tx) => tx.send(Packet::End).map_err(|_| self.hangup_error()),
            None => Ok(()),
        }
    }

    /// Abort the stream; the reader's next read returns `err`.
    pub fn close_with_error(&mut self, err: &io::Error) {
        if let Some(tx) = self.tx.take() {
            // A reader that is already gone has its own error to report.
            let _ = tx.send(Packet::Fail(Fault::new(err)));
        }
    }

    /// True once the reader has gone away, with or without an error.
    pub fn reader_hung_up(&self) -> bool {
        self.hangup.get().is_some()
    }

    fn hangup_error(&self) -> io::Error {
        match self.hangup.get() {
            Some(fault) => fault.to_error(),
            None => {
                self.hangup.set(Fault {
                    kind: io::ErrorKind::BrokenPipe,
                    message: "conduit reader closed".to_string(),
                });
                io::Error::new(io::ErrorKind::BrokenPipe, "conduit reader closed")
            }
        }
    }
}

impl Write for ConduitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(CHUNK_SIZE);
        let sent = match &self.tx {
            Some(tx) => tx.send(Packet::Data(buf[..n].to_vec())).is_ok(),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write to a closed conduit",
                ))
            }
        };
        if sent {
            Ok(n)
        } else {
            self.tx = None;
            Err(self.hangup_error())
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum ReadState {
    Open,
    Ended,
    Failed(Fault),
}

/// Receiving half.
pub struct ConduitReader {
    rx: Option<Receiver<Packet>>,
    pending: Vec<u8>,
    pos: usize,
    state: ReadState,
    hangup: Arc<Hangup>,
}

impl ConduitReader {
    /// Stop reading and make the writer's next write fail with `err`.
    pub fn close_with_error(&mut self, err: &io::Error) {
        self.hangup.set(Fault::new(err));
        self.rx = None;
    }

    /// Pull the next non-empty chunk into `pending`. Returns false at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        loop {
            match &self.state {
                ReadState::Ended => return Ok(false),
                ReadState::Failed(fault) => return Err(fault.to_error()),
                ReadState::Open => {}
            }
            let packet = match &self.rx {
                Some(rx) => rx.recv().ok(),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "read from a closed conduit",
                    ))
                }
            };
            match packet {
                Some(Packet::Data(chunk)) if chunk.is_empty() => continue,
                Some(Packet::Data(chunk)) => {
                    self.pending = chunk;
                    self.pos = 0;
                    return Ok(true);
                }
                Some(Packet::End) => self.state = ReadState::Ended,
                Some(Packet::Fail(fault)) => self.state = ReadState::Failed(fault),
                None => {
                    self.state = ReadState::Failed(Fault {
                        kind: io::ErrorKind::BrokenPipe,
                        message: "conduit writer dropped before closing".to_string(),
                    })
                }
            }
        }
    }
}

impl Read for ConduitReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.pending.len() && !self.fill()? {
            return Ok(0);
        }
        let available = &self.pending[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for ConduitReader {
    fn drop(&mut self) {
        if self.rx.is_some() && !matches!(self.state, ReadState::Ended) {
            self.hangup.set(Fault {
                kind: io::ErrorKind::BrokenPipe,
                message: "conduit reader closed".to_string(),
            });
        }
    }
}
