use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use circbuf::CircBuf;
use log::*;
use num_traits::FromPrimitive;
use thiserror::Error;

use super::PacketType;
use super::wire::WireWriteExt;

/// Bytes taken by the length header and the type byte
pub const HEADER_LEN: usize = 5;

/// Largest frame accepted, header included
pub const MAX_FRAME_LEN: usize = 32 * 1024;

/// Size of a single socket read
pub const READ_CHUNK: usize = 16 * 1024;

/// Holds one partial frame plus one read chunk with room to spare
const BUFFER_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The stream can't be resynchronised after a bad length header
    #[error("invalid frame length {0}")]
    InvalidLength(i32),
    #[error("receive buffer error: {0}")]
    Buffer(String)
}

/// One length-prefixed, type-tagged message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub payload: Vec<u8>
}

impl Frame {
    pub fn new(kind: u8, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// `None` for type bytes this protocol doesn't define.
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.kind)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        write_frame(self.kind, &self.payload)
    }
}

/// Prepends the length header and type byte to `payload`.
pub fn write_frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    // Writing into a Vec can't fail
    let _ = buf.write_int((HEADER_LEN + payload.len()) as i32);
    buf.push(kind);
    buf.extend_from_slice(payload);
    buf
}

/// Reassembles frames from bytes arriving in arbitrary pieces.
pub struct FrameDecoder {
    received_data: CircBuf,
    /// Bytes still to come for the frame whose header was consumed
    pending_len: Option<usize>,
    ready: VecDeque<Frame>
}

impl FrameDecoder {
    pub fn new() -> Result<FrameDecoder, FrameError> {
        let received_data = CircBuf::with_capacity(BUFFER_CAPACITY)
            .map_err(|e| FrameError::Buffer(format!("{:?}", e)))?;

        Ok(FrameDecoder {
            received_data,
            pending_len: None,
            ready: VecDeque::new()
        })
    }

    /// Appends received bytes and splits off every frame they complete.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), FrameError> {
        for chunk in data.chunks(READ_CHUNK) {
            self.received_data.write_all(chunk)?;
            self.split_frames()?;
        }

        Ok(())
    }

    /// Next complete frame, `None` if more data is needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.received_data.len() + self.pending_len.map_or(0, |_| 4)
    }

    fn split_frames(&mut self) -> Result<(), FrameError> {
        loop {
            let remaining = match self.pending_len {
                Some(remaining) => remaining,
                None => {
                    if self.received_data.len() < 4 {
                        return Ok(()); // Not enough data
                    }

                    let mut header = [0u8; 4];
                    self.received_data.read_exact(&mut header)?;
                    let length = LittleEndian::read_i32(&header);
                    if length < HEADER_LEN as i32 || length as usize > MAX_FRAME_LEN {
                        return Err(FrameError::InvalidLength(length));
                    }

                    let remaining = length as usize - 4;
                    self.pending_len = Some(remaining);
                    remaining
                }
            };

            if self.received_data.len() < remaining {
                return Ok(()); // Not enough data
            }

            let mut rbuf = vec![0u8; remaining];
            self.received_data.read_exact(&mut rbuf)?;
            self.pending_len = None;

            let payload = rbuf.split_off(1);
            self.ready.push_back(Frame::new(rbuf[0], payload));
        }
    }
}

/// Lazily yields the frames of a byte stream, reading it `READ_CHUNK` bytes at a time.
///
/// Ends when the stream reports end of file. A length error ends it too,
/// after being yielded once.
pub struct FrameReader<R: Read> {
    inner: R,
    decoder: FrameDecoder,
    done: bool
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Result<FrameReader<R>, FrameError> {
        Ok(FrameReader {
            inner,
            decoder: FrameDecoder::new()?,
            done: false
        })
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Some(Ok(frame));
            }

            if self.done {
                return None;
            }

            match self.inner.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    if self.decoder.buffered() != 0 {
                        debug!("Stream ended with {} bytes of an incomplete frame", self.decoder.buffered());
                    }
                }
                Ok(len) => {
                    if let Err(e) = self.decoder.feed(&buf[..len]) {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => {
                    self.done = true;
                    return Some(Err(FrameError::Io(e)));
                }
            }
        }
    }
}
