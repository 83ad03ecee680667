//! Couples a blocking source and a blocking sink through a conduit, with the codec
//! running strictly between them.
//!
//! - Encode: source -> encoder -> conduit -> sink (the producer thread compresses).
//! - Decode: source -> conduit -> decoder -> sink (the calling thread decompresses).
//!
//! The producer runs on a scoped thread, so it is always joined before `bridge`
//! returns, whichever side fails first.

use std::fmt::{Display, Formatter};
use std::io::{self, Read, Write};
use std::thread;

use log::{debug, trace};
use thiserror::Error;

use super::conduit::{conduit, ConduitReader, ConduitWriter, CHUNK_SIZE};
use crate::compression::codec::{decode_stream, encode_stream};

/// Which codec operation runs inside the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Compress with the given block size tier.
    Encode(u32),
    Decode,
}

/// Where in the pipe an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Reading the source.
    Read,
    /// The codec itself.
    Transform,
    /// Writing the sink.
    Write,
    /// The conduit, usually because the other side gave up.
    Conduit,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Transform => "transform",
            Stage::Write => "write",
            Stage::Conduit => "conduit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct BridgeError {
    pub stage: Stage,
    #[source]
    pub source: io::Error,
}

impl BridgeError {
    pub fn new(stage: Stage, source: io::Error) -> Self {
        Self { stage, source }
    }
}

/// Byte counts of a finished transfer, used for reporting only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferResult {
    /// Bytes that entered the codec.
    pub bytes_in: u64,
    /// Bytes that left the codec.
    pub bytes_out: u64,
}

/// Run `source` through the codec into `sink`.
pub fn bridge<R, W>(source: R, sink: W, direction: Direction) -> Result<TransferResult, BridgeError>
where
    R: Read + Send,
    W: Write,
{
    let (writer, reader) = conduit();
    thread::scope(|scope| {
        let producer = thread::Builder::new()
            .name("bridge-producer".to_string())
            .spawn_scoped(scope, move || match direction {
                Direction::Encode(level) => produce_encoded(source, writer, level),
                Direction::Decode => produce_raw(source, writer),
            })
            .map_err(|e| BridgeError::new(Stage::Conduit, e))?;

        let consumed = match direction {
            Direction::Encode(_) => consume_raw(reader, sink),
            Direction::Decode => consume_decoded(reader, sink),
        };

        let produced = producer.join().unwrap_or_else(|_| {
            Err(BridgeError::new(
                Stage::Read,
                io::Error::new(io::ErrorKind::Other, "producer thread panicked"),
            ))
        });
        let outcome = settle(direction, produced, consumed);
        debug!("bridge {:?} finished: {:?}", direction, outcome.as_ref().map_err(|e| e.stage));
        outcome
    })
}

/// Pick the terminal outcome of the two sides. A producer failure that was not
/// caused by the consumer hanging up is the root cause; otherwise the consumer's
/// error wins.
fn settle(
    direction: Direction,
    produced: Result<TransferResult, BridgeError>,
    consumed: Result<u64, BridgeError>,
) -> Result<TransferResult, BridgeError> {
    match (produced, consumed) {
        (Err(p), _) if p.stage != Stage::Conduit => Err(p),
        (_, Err(c)) => Err(c),
        (Err(p), Ok(_)) => Err(p),
        (Ok(p), Ok(written)) => Ok(match direction {
            Direction::Encode(_) => p,
            Direction::Decode => TransferResult {
                bytes_in: p.bytes_in,
                bytes_out: written,
            },
        }),
    }
}

fn read_some<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Producer for decoding: copy raw (compressed) bytes into the conduit.
fn produce_raw<R: Read>(mut source: R, mut writer: ConduitWriter) -> Result<TransferResult, BridgeError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match read_some(&mut source, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                writer.close_with_error(&e);
                return Err(BridgeError::new(Stage::Read, e));
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| BridgeError::new(Stage::Conduit, e))?;
        total += n as u64;
    }
    writer
        .close()
        .map_err(|e| BridgeError::new(Stage::Conduit, e))?;
    trace!("producer read {} raw bytes", total);
    Ok(TransferResult {
        bytes_in: total,
        bytes_out: total,
    })
}

/// Producer for encoding: compress the source straight into the conduit.
fn produce_encoded<R: Read>(
    mut source: R,
    writer: ConduitWriter,
    level: u32,
) -> Result<TransferResult, BridgeError> {
    let mut encoder = encode_stream(writer, level);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match read_some(&mut source, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                encoder.get_mut().close_with_error(&e);
                return Err(BridgeError::new(Stage::Read, e));
            }
        };
        if let Err(e) = encoder.write_all(&buf[..n]) {
            return Err(encoder_failure(encoder.get_mut(), e));
        }
    }
    if let Err(e) = encoder.try_finish() {
        return Err(encoder_failure(encoder.get_mut(), e));
    }
    let counts = TransferResult {
        bytes_in: encoder.total_in(),
        bytes_out: encoder.total_out(),
    };
    let mut writer = encoder
        .finish()
        .map_err(|e| BridgeError::new(Stage::Transform, e))?;
    writer
        .close()
        .map_err(|e| BridgeError::new(Stage::Conduit, e))?;
    Ok(counts)
}

fn encoder_failure(writer: &mut ConduitWriter, err: io::Error) -> BridgeError {
    if writer.reader_hung_up() {
        BridgeError::new(Stage::Conduit, err)
    } else {
        writer.close_with_error(&err);
        BridgeError::new(Stage::Transform, err)
    }
}

/// Consumer for encoding: copy compressed bytes from the conduit to the sink.
fn consume_raw<W: Write>(mut reader: ConduitReader, mut sink: W) -> Result<u64, BridgeError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match read_some(&mut reader, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return Err(BridgeError::new(Stage::Conduit, e)),
        };
        if let Err(e) = sink.write_all(&buf[..n]) {
            reader.close_with_error(&e);
            return Err(BridgeError::new(Stage::Write, e));
        }
        total += n as u64;
    }
    if let Err(e) = sink.flush() {
        return Err(BridgeError::new(Stage::Write, e));
    }
    Ok(total)
}

/// Consumer for decoding: run the decoder over the conduit and write the result.
fn consume_decoded<W: Write>(reader: ConduitReader, mut sink: W) -> Result<u64, BridgeError> {
    let mut decoder = decode_stream(reader);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match read_some(&mut decoder, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                decoder.get_mut().close_with_error(&e);
                return Err(BridgeError::new(Stage::Transform, e));
            }
        };
        if let Err(e) = sink.write_all(&buf[..n]) {
            decoder.get_mut().close_with_error(&e);
            return Err(BridgeError::new(Stage::Write, e));
        }
        total += n as u64;
    }
    if let Err(e) = sink.flush() {
        return Err(BridgeError::new(Stage::Write, e));
    }
    Ok(total)
}
