//! Blocking request-body stream handed to blocking applications.

use std::io::Read;

use bytes::{Bytes, BytesMut};

use crate::error::BridgeError;
use crate::stream::SyncConsumer;

const READER_CHUNK: usize = 8 * 1024;

/// The request input stream: blocking reads over whatever carries the body.
///
/// Reads return an empty chunk at end-of-stream and never fail on EOF. A
/// disconnect mid-body first drains the buffered remainder, then surfaces
/// the error exactly once; reads after that observe EOF.
///
/// All methods block and must only be called from a worker thread, never
/// from the event loop.
pub struct InputStream {
    source: Source,
    buffer: BytesMut,
    pending_error: Option<BridgeError>,
    eof: bool,
}

enum Source {
    /// Chunks arriving from the task side of the bridge.
    Channel(SyncConsumer<Bytes>),
    /// A caller-supplied blocking reader.
    Reader(Box<dyn Read + Send>),
    Empty,
}

impl InputStream {
    pub fn from_channel(consumer: SyncConsumer<Bytes>) -> Self {
        Self::with_source(Source::Channel(consumer))
    }

    pub fn from_reader(reader: Box<dyn Read + Send>) -> Self {
        Self::with_source(Source::Reader(reader))
    }

    /// A stream that is at EOF from the start.
    pub fn empty() -> Self {
        Self::with_source(Source::Empty)
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            buffer: BytesMut::new(),
            pending_error: None,
            eof: false,
        }
    }

    /// Whether another read could still return data.
    pub fn has_more(&self) -> bool {
        !self.buffer.is_empty() || !self.eof
    }

    /// Pull one chunk from the source into the buffer. Returns false at EOF.
    fn fill_once(&mut self) -> Result<bool, BridgeError> {
        match &mut self.source {
            Source::Channel(consumer) => match consumer.next(None)? {
                Some(chunk) => {
                    self.buffer.extend_from_slice(&chunk);
                    Ok(true)
                }
                None => {
                    self.eof = true;
                    Ok(false)
                }
            },
            Source::Reader(reader) => {
                let mut scratch = [0u8; READER_CHUNK];
                let n = reader
                    .read(&mut scratch)
                    .map_err(|e| BridgeError::app(format!("input read failed: {e}")))?;
                if n == 0 {
                    self.eof = true;
                    Ok(false)
                } else {
                    self.buffer.extend_from_slice(&scratch[..n]);
                    Ok(true)
                }
            }
            Source::Empty => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    /// Fill, stashing a mid-body error so the buffered remainder is served
    /// first. Returns false when no further fill is possible.
    fn fill_or_stash(&mut self) -> Result<bool, BridgeError> {
        match self.fill_once() {
            Ok(more) => Ok(more),
            Err(error) => {
                if self.buffer.is_empty() {
                    self.eof = true;
                    Err(error)
                } else {
                    self.pending_error = Some(error);
                    self.eof = true;
                    Ok(false)
                }
            }
        }
    }

    /// Surface a stashed error once the buffer has drained.
    fn check_pending(&mut self) -> Result<(), BridgeError> {
        if self.buffer.is_empty() {
            if let Some(error) = self.pending_error.take() {
                self.eof = true;
                return Err(error);
            }
        }
        Ok(())
    }

    /// Read up to `size` bytes, or everything remaining when `size` is
    /// `None`. Returns an empty chunk at EOF.
    pub fn read(&mut self, size: Option<usize>) -> Result<Bytes, BridgeError> {
        self.check_pending()?;
        loop {
            let satisfied = match size {
                Some(n) => self.buffer.len() >= n,
                None => false,
            };
            if satisfied || self.eof {
                break;
            }
            if !self.fill_or_stash()? {
                break;
            }
        }
        let take = match size {
            Some(n) => n.min(self.buffer.len()),
            None => self.buffer.len(),
        };
        Ok(self.buffer.split_to(take).freeze())
    }

    /// Read one line, up to and including the first `\n`, honoring `limit`.
    /// Returns the remaining bytes at EOF, empty once exhausted.
    pub fn readline(&mut self, limit: Option<usize>) -> Result<Bytes, BridgeError> {
        self.check_pending()?;
        loop {
            let window = match limit {
                Some(l) => l.min(self.buffer.len()),
                None => self.buffer.len(),
            };
            if let Some(index) = self.buffer[..window].iter().position(|&b| b == b'\n') {
                return Ok(self.buffer.split_to(index + 1).freeze());
            }
            if let Some(l) = limit {
                if self.buffer.len() >= l {
                    return Ok(self.buffer.split_to(l).freeze());
                }
            }
            if self.eof {
                break;
            }
            if !self.fill_or_stash()? {
                break;
            }
        }
        Ok(self.buffer.split().freeze())
    }

    /// Read all remaining lines. A `hint` bounds how many lines are read.
    pub fn readlines(&mut self, hint: Option<usize>) -> Result<Vec<Bytes>, BridgeError> {
        let mut lines = Vec::new();
        loop {
            if let Some(h) = hint {
                if lines.len() >= h {
                    break;
                }
            }
            let line = self.readline(None)?;
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }
        Ok(lines)
    }

    /// Iterate over lines, stopping at EOF.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { stream: self }
    }
}

/// Line iterator over an [`InputStream`].
pub struct Lines<'a> {
    stream: &'a mut InputStream,
}

impl Iterator for Lines<'_> {
    type Item = Result<Bytes, BridgeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.stream.readline(None) {
            Ok(line) if line.is_empty() => None,
            Ok(line) => Some(Ok(line)),
            Err(error) => Some(Err(error)),
        }
    }
}
