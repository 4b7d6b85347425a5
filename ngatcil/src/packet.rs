//! CIL packet codec
//!
//! The wire layouts come from the "Generic 2.0m Telescope, Autoguider to TCS
//! Interface Control Document". Every field is a 32-bit integer in network
//! byte order; there is no padding, so a packet is exactly the sum of its
//! field widths. Fields are converted individually rather than through any
//! whole-struct cast.

use crate::error::{CilError, CilResult};
use crate::types::{CilTimestamp, PacketClass};

/// Length of the base CIL packet: 7 x i32.
pub const CIL_BASE_PACKET_LENGTH: usize = 28;
/// Length of a status reply packet: base + 1 x i32.
pub const STATUS_REPLY_PACKET_LENGTH: usize = 32;
/// Length of an AGS command/reply packet: base + 4 x i32.
pub const AGS_PACKET_LENGTH: usize = 44;

fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn get_i32(buf: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_be_bytes(bytes)
}

/// Header common to every CIL packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CilHeader {
    pub source_id: i32,
    pub dest_id: i32,
    pub class: PacketClass,
    pub service: i32,
    pub seq_num: u32,
    pub timestamp: CilTimestamp,
}

impl CilHeader {
    /// Build a header stamped with the current wall-clock time.
    pub fn new(source_id: i32, dest_id: i32, class: PacketClass, service: i32, seq_num: u32) -> Self {
        Self {
            source_id,
            dest_id,
            class,
            service,
            seq_num,
            timestamp: CilTimestamp::now(),
        }
    }

    pub fn encode(&self) -> [u8; CIL_BASE_PACKET_LENGTH] {
        let mut buf = [0u8; CIL_BASE_PACKET_LENGTH];
        self.encode_into(&mut buf);
        buf
    }

    /// Write the header into the first 28 bytes of `buf`.
    pub(crate) fn encode_into(&self, buf: &mut [u8]) {
        put_i32(buf, 0, self.source_id);
        put_i32(buf, 4, self.dest_id);
        put_i32(buf, 8, self.class.to_i32());
        put_i32(buf, 12, self.service);
        put_i32(buf, 16, self.seq_num as i32);
        put_i32(buf, 20, self.timestamp.seconds);
        put_i32(buf, 24, self.timestamp.nanoseconds);
    }

    /// Decode a bare header packet. The length must be exactly 28 bytes;
    /// anything else is a framing error.
    pub fn decode(buf: &[u8]) -> CilResult<Self> {
        if buf.len() != CIL_BASE_PACKET_LENGTH {
            return Err(CilError::PacketLength {
                got: buf.len(),
                expected: CIL_BASE_PACKET_LENGTH,
            });
        }
        Self::decode_prefix(buf)
    }

    /// Decode the header portion of a longer packet whose length the caller
    /// has already checked.
    fn decode_prefix(buf: &[u8]) -> CilResult<Self> {
        let class_raw = get_i32(buf, 8);
        let class = PacketClass::from_i32(class_raw).ok_or(CilError::UnknownClass(class_raw))?;
        Ok(Self {
            source_id: get_i32(buf, 0),
            dest_id: get_i32(buf, 4),
            class,
            service: get_i32(buf, 12),
            seq_num: get_i32(buf, 16) as u32,
            timestamp: CilTimestamp {
                seconds: get_i32(buf, 20),
                nanoseconds: get_i32(buf, 24),
            },
        })
    }
}

/// A status reply packet: a header followed by a single status word. Sent
/// in answer to heartbeats and other bare-header commands that only want an
/// acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReplyPacket {
    pub header: CilHeader,
    pub status: i32,
}

impl StatusReplyPacket {
    pub fn encode(&self) -> [u8; STATUS_REPLY_PACKET_LENGTH] {
        let mut buf = [0u8; STATUS_REPLY_PACKET_LENGTH];
        self.header.encode_into(&mut buf);
        put_i32(&mut buf, 28, self.status);
        buf
    }

    pub fn decode(buf: &[u8]) -> CilResult<Self> {
        if buf.len() != STATUS_REPLY_PACKET_LENGTH {
            return Err(CilError::PacketLength {
                got: buf.len(),
                expected: STATUS_REPLY_PACKET_LENGTH,
            });
        }
        Ok(Self {
            header: CilHeader::decode_prefix(buf)?,
            status: get_i32(buf, 28),
        })
    }
}

/// An AGS command or reply packet. `class` distinguishes which; the params
/// are command-specific (pixel positions travel as integer millipixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgsPacket {
    pub header: CilHeader,
    pub command: i32,
    pub status: i32,
    pub param1: i32,
    pub param2: i32,
}

impl AgsPacket {
    pub fn encode(&self) -> [u8; AGS_PACKET_LENGTH] {
        let mut buf = [0u8; AGS_PACKET_LENGTH];
        self.header.encode_into(&mut buf);
        put_i32(&mut buf, 28, self.command);
        put_i32(&mut buf, 32, self.status);
        put_i32(&mut buf, 36, self.param1);
        put_i32(&mut buf, 40, self.param2);
        buf
    }

    pub fn decode(buf: &[u8]) -> CilResult<Self> {
        if buf.len() != AGS_PACKET_LENGTH {
            return Err(CilError::PacketLength {
                got: buf.len(),
                expected: AGS_PACKET_LENGTH,
            });
        }
        Ok(Self {
            header: CilHeader::decode_prefix(buf)?,
            command: get_i32(buf, 28),
            status: get_i32(buf, 32),
            param1: get_i32(buf, 36),
            param2: get_i32(buf, 40),
        })
    }
}
