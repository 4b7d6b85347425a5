//! TCS guide packet codec
//!
//! Guide packets are fixed 34-byte ASCII records sent from the autoguider to
//! the TCS once per guide frame. Layout (byte offsets):
//!
//! ```text
//!  0..8   x position:  sign byte ('0' non-negative, '-' negative) + "%07.2f"
//!  8      space
//!  9..17  y position:  same format
//! 17      space
//! 18..26  timecode:    same format, semantically overloaded (see below)
//! 26      space
//! 27      status byte: '0'..'7' (0 = most confident), 'F' or 'W'
//! 28      space
//! 29..33  checksum:    "%04d" sum of the ASCII values of bytes 0..=28
//! 33      carriage return
//! ```
//!
//! Timecode: positive means the centroid is reliable and the TCS should wait
//! that many seconds for the next packet; negative means unreliable with the
//! wait in the magnitude; zero marks the terminating packet of a guiding
//! session. There is no NUL on the wire, exactly 34 bytes.

use std::fmt;

use log::debug;

use crate::error::{CilError, CilResult};
use crate::types::ports;
use crate::udp::UdpEndpoint;

/// Exact on-wire length of a guide packet.
pub const GUIDE_PACKET_LENGTH: usize = 34;

/// Status byte meaning the autoguider failed to find a guide star.
pub const STATUS_FAILED: char = 'F';
/// Status byte meaning the guide star is too close to the window edge.
pub const STATUS_WINDOW: char = 'W';

/// Guide positions must lie in -9999.99..=9999.99 to fit the field width.
pub const POSITION_MAX: f32 = 9999.99;
/// Non-terminating timecodes must lie in 0.01..=9999.99 seconds.
pub const TIMECODE_MIN: f32 = 0.01;
pub const TIMECODE_MAX: f32 = 9999.99;

/// Number of bytes covered by the checksum (everything before its field).
const CHECKSUM_COVERAGE: usize = 29;

/// A decoded guide packet. `timecode_secs` holds the wait magnitude;
/// `terminating` and `unreliable` carry the sign/zero semantics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidePacket {
    pub x_pos: f32,
    pub y_pos: f32,
    pub terminating: bool,
    pub unreliable: bool,
    pub timecode_secs: f32,
    pub status_char: char,
}

fn valid_status(c: char) -> bool {
    matches!(c, '0'..='7') || c == STATUS_FAILED || c == STATUS_WINDOW
}

/// Format one 8-byte signed-magnitude field.
fn format_field(magnitude: f32, negative: bool) -> String {
    format!("{}{:07.2}", if negative { '-' } else { '0' }, magnitude)
}

/// Parse one 8-byte signed-magnitude field at `offset`, returning the
/// magnitude and whether the sign byte was negative.
fn parse_field(buf: &[u8], offset: usize, field: &'static str) -> CilResult<(f32, bool)> {
    let negative = match buf[offset] {
        b'0' => false,
        b'-' => true,
        _ => {
            return Err(CilError::GuideField {
                field,
                text: String::from_utf8_lossy(&buf[offset..offset + 8]).into_owned(),
            })
        }
    };
    let text = std::str::from_utf8(&buf[offset + 1..offset + 8]).map_err(|_| CilError::GuideField {
        field,
        text: String::from_utf8_lossy(&buf[offset..offset + 8]).into_owned(),
    })?;
    let magnitude = text.parse::<f32>().map_err(|_| CilError::GuideField {
        field,
        text: text.to_string(),
    })?;
    Ok((magnitude, negative))
}

fn checksum(bytes: &[u8]) -> u16 {
    bytes[..CHECKSUM_COVERAGE]
        .iter()
        .map(|&b| b as u16)
        .sum()
}

impl GuidePacket {
    /// A packet reporting a reliable centroid.
    pub fn reliable(x_pos: f32, y_pos: f32, wait_secs: f32, status_char: char) -> Self {
        Self {
            x_pos,
            y_pos,
            terminating: false,
            unreliable: false,
            timecode_secs: wait_secs,
            status_char,
        }
    }

    /// The terminating packet that closes a guiding session.
    pub fn terminating(x_pos: f32, y_pos: f32, status_char: char) -> Self {
        Self {
            x_pos,
            y_pos,
            terminating: true,
            unreliable: false,
            timecode_secs: 0.0,
            status_char,
        }
    }

    /// Render the packet as its exact 34 wire bytes.
    ///
    /// Validates position and timecode ranges and the status byte. A
    /// terminating packet always carries the all-zero timecode, whatever
    /// `timecode_secs` and `unreliable` say.
    pub fn build(&self) -> CilResult<[u8; GUIDE_PACKET_LENGTH]> {
        if self.x_pos.abs() > POSITION_MAX {
            return Err(CilError::PositionRange(self.x_pos));
        }
        if self.y_pos.abs() > POSITION_MAX {
            return Err(CilError::PositionRange(self.y_pos));
        }
        if !valid_status(self.status_char) {
            return Err(CilError::StatusChar(self.status_char));
        }
        let timecode = if self.terminating {
            format_field(0.0, false)
        } else {
            if !(TIMECODE_MIN..=TIMECODE_MAX).contains(&self.timecode_secs) {
                return Err(CilError::TimecodeRange(self.timecode_secs));
            }
            format_field(self.timecode_secs, self.unreliable)
        };

        let mut text = format!(
            "{} {} {} {} ",
            format_field(self.x_pos.abs(), self.x_pos < 0.0),
            format_field(self.y_pos.abs(), self.y_pos < 0.0),
            timecode,
            self.status_char,
        );
        // The legal field alphabet bounds the sum well below 9999, so the
        // 4-digit field never overflows.
        let sum = checksum(text.as_bytes());
        text.push_str(&format!("{:04}", sum));
        text.push('\r');

        let mut bytes = [0u8; GUIDE_PACKET_LENGTH];
        bytes.copy_from_slice(text.as_bytes());
        Ok(bytes)
    }

    /// Parse a received guide packet, enforcing the checksum.
    pub fn parse(buf: &[u8]) -> CilResult<Self> {
        if buf.len() < GUIDE_PACKET_LENGTH {
            return Err(CilError::PacketLength {
                got: buf.len(),
                expected: GUIDE_PACKET_LENGTH,
            });
        }

        let sum_text =
            std::str::from_utf8(&buf[29..33]).map_err(|_| CilError::GuideField {
                field: "checksum",
                text: String::from_utf8_lossy(&buf[29..33]).into_owned(),
            })?;
        let got = sum_text.parse::<u16>().map_err(|_| CilError::GuideField {
            field: "checksum",
            text: sum_text.to_string(),
        })?;
        let computed = checksum(buf);
        if got != computed {
            return Err(CilError::Checksum { got, computed });
        }

        let (x_mag, x_neg) = parse_field(buf, 0, "x position")?;
        let (y_mag, y_neg) = parse_field(buf, 9, "y position")?;
        let (timecode, unreliable) = parse_field(buf, 18, "timecode")?;
        let status_char = buf[27] as char;
        if !valid_status(status_char) {
            return Err(CilError::StatusChar(status_char));
        }

        Ok(Self {
            x_pos: if x_neg { -x_mag } else { x_mag },
            y_pos: if y_neg { -y_mag } else { y_mag },
            terminating: timecode == 0.0,
            unreliable,
            timecode_secs: timecode,
            status_char,
        })
    }
}

impl fmt::Display for GuidePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x={:.2} y={:.2} timecode={:.2}{}{} status='{}'",
            self.x_pos,
            self.y_pos,
            self.timecode_secs,
            if self.unreliable { " (unreliable)" } else { "" },
            if self.terminating { " (terminating)" } else { "" },
            self.status_char,
        )
    }
}

/// Open an endpoint to the default TCS guide packet port.
pub fn guide_packet_open_default() -> CilResult<UdpEndpoint> {
    UdpEndpoint::open(ports::TCS_HOST, ports::TCS_GUIDE)
}

/// Build and transmit a guide packet on `endpoint`.
pub fn guide_packet_send(endpoint: &UdpEndpoint, packet: &GuidePacket) -> CilResult<()> {
    let bytes = packet.build()?;
    debug!("guide: sending {}", packet);
    endpoint.send(&bytes)
}

/// Receive and parse one guide packet from `endpoint`.
pub fn guide_packet_recv(endpoint: &UdpEndpoint) -> CilResult<GuidePacket> {
    let bytes = endpoint.recv(GUIDE_PACKET_LENGTH)?;
    let packet = GuidePacket::parse(&bytes)?;
    debug!("guide: received {}", packet);
    Ok(packet)
}
