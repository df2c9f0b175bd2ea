//! Buffered framed byte channel used during the daemon handshake.
//!
//! The handshake is line- and NUL-framed ASCII layered over a bidirectional
//! byte stream. [`DaemonChannel`] wraps the two halves of that stream with a
//! buffered reader and an explicit write buffer: writes accumulate until
//! [`DaemonChannel::flush`] pushes them out, which callers must do before
//! blocking on any read whose response depends on a prior write.

use std::io::{self, BufReader, Read, Write};

/// Hard cap on a single framed item read from the peer.
///
/// The peer controls how many bytes it sends before a terminator; without a
/// cap a hostile client could grow the accumulation buffer without bound.
pub const MAX_BUF_SIZE: usize = 64 * 1024;

/// Errors surfaced by the framed channel primitives.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The peer closed the stream at a position where more bytes were required.
    #[error("peer closed the connection")]
    Eof,
    /// A single framed item exceeded [`MAX_BUF_SIZE`].
    #[error("peer sent more than {limit} bytes without a terminator")]
    Oversize {
        /// The cap that was exceeded.
        limit: usize,
    },
    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Buffered, framed access to the byte stream of one daemon connection.
///
/// Reads block until satisfied; writes are buffered until [`flush`] is
/// called. The read and write halves are independent, which also makes the
/// channel trivially testable against `&[u8]` and `Vec<u8>`.
///
/// [`flush`]: DaemonChannel::flush
#[derive(Debug)]
pub struct DaemonChannel<R, W> {
    reader: BufReader<R>,
    writer: W,
    write_buf: Vec<u8>,
}

impl<R: Read, W: Write> DaemonChannel<R, W> {
    /// Wraps the read and write halves of a connection.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            write_buf: Vec::new(),
        }
    }

    /// Reads a single byte, blocking until one is available.
    ///
    /// A clean close by the peer surfaces as [`ChannelError::Eof`].
    pub fn get_byte(&mut self) -> Result<u8, ChannelError> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Err(ChannelError::Eof),
                Ok(_) => return Ok(byte[0]),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(ChannelError::Io(error)),
            }
        }
    }

    /// Reads a little-endian 32-bit integer.
    pub fn get_i32_le(&mut self) -> Result<i32, ChannelError> {
        let mut bytes = [0u8; 4];
        for slot in &mut bytes {
            *slot = self.get_byte()?;
        }
        Ok(i32::from_le_bytes(bytes))
    }

    /// Buffers a single byte for the next flush.
    pub fn put_byte(&mut self, byte: u8) {
        self.write_buf.push(byte);
    }

    /// Buffers a slice of bytes for the next flush.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }

    /// Buffers a little-endian 32-bit integer for the next flush.
    pub fn put_i32_le(&mut self, value: i32) {
        self.write_buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Reads bytes up to the next LF. The LF is consumed but not returned.
    ///
    /// EOF before the terminator is an error here: every line the protocol
    /// reads is mandatory. Lines are capped at [`MAX_BUF_SIZE`].
    pub fn read_line(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut line = Vec::new();
        loop {
            let byte = self.get_byte()?;
            if byte == b'\n' {
                return Ok(line);
            }
            if line.len() >= MAX_BUF_SIZE {
                return Err(ChannelError::Oversize {
                    limit: MAX_BUF_SIZE,
                });
            }
            line.push(byte);
        }
    }

    /// Reads bytes up to the next NUL, tolerating EOF as a terminator.
    ///
    /// Upstream rsync accepts a peer that closes the stream instead of
    /// sending the final empty string of its argument list, so EOF ends the
    /// accumulation without error. A single item longer than [`MAX_BUF_SIZE`]
    /// is rejected before the buffer grows further.
    pub fn read_string_until_null_or_eof(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut bytes = Vec::new();
        loop {
            match self.get_byte() {
                Ok(0) => return Ok(bytes),
                Ok(byte) => {
                    if bytes.len() >= MAX_BUF_SIZE {
                        return Err(ChannelError::Oversize {
                            limit: MAX_BUF_SIZE,
                        });
                    }
                    bytes.push(byte);
                }
                Err(ChannelError::Eof) => return Ok(bytes),
                Err(error) => return Err(error),
            }
        }
    }

    /// Drains the write buffer into the underlying writer and flushes it.
    pub fn flush(&mut self) -> Result<(), ChannelError> {
        if !self.write_buf.is_empty() {
            self.writer.write_all(&self.write_buf)?;
            self.write_buf.clear();
        }
        self.writer.flush()?;
        Ok(())
    }
}
