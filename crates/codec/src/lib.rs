//! ## X Display Manager Control Protocol (XDMCP) wire codec
//!
//! XDMCP is a small, fixed-layout UDP protocol used by X terminals to
//! locate and request a session from a display manager. Every packet is a
//! 6-byte header followed by a payload whose shape is determined by the
//! opcode in that header:
//!
//! ```text
//! +----------+----------+----------+---------...
//! | version  | opcode   | length   | payload
//! | CARD16   | CARD16   | CARD16   |
//! +----------+----------+----------+---------...
//! ```
//!
//! `length` is the size in bytes of the payload that follows, not
//! including the header itself. This crate provides the primitives
//! (`CARDn`, `ARRAY8`, `ARRAY16`, `ARRAYofARRAY8`) needed to read and write
//! that payload, plus per-opcode message types built on top of them.

pub mod addr;
pub mod message;
pub mod opcode;

use std::{array::TryFromSliceError, string::FromUtf8Error};

use bytes::{BufMut, BytesMut};

pub use opcode::Opcode;

/// Header length in bytes: version + opcode + length, all CARD16.
pub const HEADER_SIZE: usize = 6;

/// Standard XDMCP protocol version.
pub const XDM_PROTOCOL_VERSION: u16 = 1;

/// Private extension version carried by MANAGED_FORWARD / GOT_MANAGED_FORWARD.
pub const MDM_XDMCP_PROTOCOL_VERSION: u16 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The buffer ran out before a primitive could be fully read.
    Truncated,
    /// An opcode in the header did not match any known value.
    UnknownOpcode(u16),
    /// An ARRAY8/ARRAY16/ARRAYofARRAY8 declared a size larger than allowed.
    ArrayTooLarge,
    /// Bytes that were expected to be ASCII/UTF-8 were not.
    InvalidText,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated xdmcp packet"),
            Self::UnknownOpcode(op) => write!(f, "unknown xdmcp opcode {op}"),
            Self::ArrayTooLarge => write!(f, "xdmcp array exceeds limit"),
            Self::InvalidText => write!(f, "invalid xdmcp text field"),
        }
    }
}

impl From<TryFromSliceError> for Error {
    fn from(_: TryFromSliceError) -> Self {
        Self::Truncated
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_: FromUtf8Error) -> Self {
        Self::InvalidText
    }
}

/// The XDMCP packet header: `{version, opcode, length}`, all network byte
/// order. `length` is the payload length following the header and is used
/// by the dispatcher to validate that decoded payloads are self-consistent
/// (see [`XdmcpBuffer::checksum`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub opcode: Opcode,
    pub length: u16,
}

impl Header {
    /// # Test
    ///
    /// ```
    /// use xdmcp_codec::{Header, Opcode};
    ///
    /// let buffer = [0x00, 0x01, 0x00, 0x02, 0x00, 0x07];
    /// let header = Header::decode(&buffer).unwrap();
    ///
    /// assert_eq!(header.version, 1);
    /// assert_eq!(header.opcode, Opcode::Query);
    /// assert_eq!(header.length, 7);
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Truncated);
        }

        let version = u16::from_be_bytes(bytes[0..2].try_into()?);
        let opcode = Opcode::try_from(u16::from_be_bytes(bytes[2..4].try_into()?))?;
        let length = u16::from_be_bytes(bytes[4..6].try_into()?);

        Ok(Self {
            version,
            opcode,
            length,
        })
    }
}

/// A growable byte buffer that doubles as a parse cursor (for decoding) and
/// a write accumulator (for encoding). All reads are bounds-checked; a read
/// past the end of the buffer returns [`Error::Truncated`] rather than
/// panicking, so a truncated or malicious datagram never crashes the
/// dispatcher.
#[derive(Default)]
pub struct XdmcpBuffer {
    bytes: BytesMut,
    pos: usize,
}

impl XdmcpBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Load `data` for reading from the start.
    pub fn load(&mut self, data: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(data);
        self.pos = 0;
    }

    /// Clear the buffer for writing from scratch.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.pos = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&[u8], Error> {
        if self.remaining() < n {
            return Err(Error::Truncated);
        }

        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_card8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn read_card16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into()?))
    }

    pub fn read_card32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into()?))
    }

    /// ARRAY8: a CARD16 byte count followed by that many bytes.
    pub fn read_array8(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.read_card16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// ARRAY16: a CARD8 element count followed by that many CARD16 words.
    pub fn read_array16(&mut self) -> Result<Vec<u16>, Error> {
        let len = self.read_card8()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_card16()?);
        }

        Ok(out)
    }

    /// ARRAYofARRAY8: a CARD8 element count followed by that many ARRAY8s.
    pub fn read_array_of_array8(&mut self) -> Result<Vec<Vec<u8>>, Error> {
        let len = self.read_card8()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_array8()?);
        }

        Ok(out)
    }

    pub fn write_card8(&mut self, value: u8) {
        self.bytes.put_u8(value);
    }

    pub fn write_card16(&mut self, value: u16) {
        self.bytes.put_u16(value);
    }

    pub fn write_card32(&mut self, value: u32) {
        self.bytes.put_u32(value);
    }

    pub fn write_array8(&mut self, data: &[u8]) {
        self.write_card16(data.len() as u16);
        self.bytes.extend_from_slice(data);
    }

    pub fn write_array16(&mut self, data: &[u16]) {
        self.write_card8(data.len() as u8);
        for value in data {
            self.write_card16(*value);
        }
    }

    pub fn write_array_of_array8<T: AsRef<[u8]>>(&mut self, data: &[T]) {
        self.write_card8(data.len() as u8);
        for item in data {
            self.write_array8(item.as_ref());
        }
    }

    /// Prepend the 6-byte header and return the finished datagram. `opcode`'s
    /// payload has already been written into `self`; this wraps it with
    /// `{version, opcode, length}` where `length` is the payload size
    /// written so far, matching §4.1's "length fields MUST equal the sum of
    /// encoded element sizes" rule by construction.
    pub fn finish(self, version: u16, opcode: Opcode) -> Vec<u8> {
        let payload_len = self.bytes.len() as u16;
        let mut framed = BytesMut::with_capacity(HEADER_SIZE + self.bytes.len());
        framed.put_u16(version);
        framed.put_u16(opcode as u16);
        framed.put_u16(payload_len);
        framed.extend_from_slice(&self.bytes);
        framed.to_vec()
    }

    /// Checksum a decode against the header's declared `length`: the number
    /// of bytes actually consumed while parsing the payload must equal it.
    /// A mismatch means the packet lied about its own size and must be
    /// dropped (§4.10.7).
    pub fn checksum(&self, expected_len: u16) -> bool {
        self.pos as u16 == expected_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array8_round_trips() {
        let mut buf = XdmcpBuffer::default();
        buf.write_array8(b"hello");

        let mut reader = XdmcpBuffer::default();
        reader.load(buf.as_slice());
        assert_eq!(reader.read_array8().unwrap(), b"hello");
    }

    #[test]
    fn array_of_array8_round_trips() {
        let mut buf = XdmcpBuffer::default();
        buf.write_array_of_array8(&[b"MIT-MAGIC-COOKIE-1".to_vec(), b"XDM-AUTHORIZATION-1".to_vec()]);

        let mut reader = XdmcpBuffer::default();
        reader.load(buf.as_slice());
        let decoded = reader.read_array_of_array8().unwrap();
        assert_eq!(decoded, vec![b"MIT-MAGIC-COOKIE-1".to_vec(), b"XDM-AUTHORIZATION-1".to_vec()]);
    }

    #[test]
    fn truncated_array_is_an_error() {
        let mut reader = XdmcpBuffer::default();
        reader.load(&[0x00, 0x05, b'h', b'i']);
        assert_eq!(reader.read_array8(), Err(Error::Truncated));
    }

    #[test]
    fn finish_frames_header_with_payload_length() {
        let mut buf = XdmcpBuffer::default();
        buf.write_card32(7);
        let framed = buf.finish(XDM_PROTOCOL_VERSION, Opcode::Refuse);

        assert_eq!(&framed[0..2], &1u16.to_be_bytes());
        assert_eq!(&framed[2..4], &(Opcode::Refuse as u16).to_be_bytes());
        assert_eq!(&framed[4..6], &4u16.to_be_bytes());
        assert_eq!(framed.len(), HEADER_SIZE + 4);
    }
}
