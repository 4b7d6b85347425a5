//! Autoguider command/reply protocol
//!
//! A small catalogue of command kinds layered on the CIL packet codec. Each
//! kind has a symmetric set of four operations: command send, command parse,
//! reply send and reply parse. Commands carry the next process-wide sequence
//! number; replies echo the sequence number parsed from the command they
//! answer, so the sender can correlate asynchronous UDP datagrams.
//!
//! Pixel positions travel as integer millipixels (float x 1000). The
//! fixed-point encoding is part of the wire contract and preserved exactly,
//! including the truncating conversion.

use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;

use crate::error::{CilError, CilResult};
use crate::packet::{AgsPacket, CilHeader};
use crate::types::{node, PacketClass, SYS_NOMINAL};
use crate::udp::UdpEndpoint;

/// Service tag carried by every autoguider command and reply packet.
pub const AGS_COMMAND_SERVICE: i32 = 0x00a8 << 16;

/// Sequence numbers wrap to 0 once they would exceed this ceiling.
pub const SEQUENCE_CEILING: u32 = 200_000_000;

/// Valid pixel coordinate range for guide-on-pixel, checked before scaling.
pub const PIXEL_MIN: f32 = 0.0;
pub const PIXEL_MAX: f32 = 1023.0;

/// Autoguider command codes, allocated above the service tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgsCommandCode {
    GuideOnBrightest,
    GuideOnPixel,
    GuideOnRank,
    GuideOff,
    StartSession,
    EndSession,
}

impl AgsCommandCode {
    pub fn to_i32(self) -> i32 {
        match self {
            AgsCommandCode::GuideOnBrightest => AGS_COMMAND_SERVICE + 1,
            AgsCommandCode::GuideOnPixel => AGS_COMMAND_SERVICE + 2,
            AgsCommandCode::GuideOnRank => AGS_COMMAND_SERVICE + 3,
            AgsCommandCode::GuideOff => AGS_COMMAND_SERVICE + 4,
            AgsCommandCode::StartSession => AGS_COMMAND_SERVICE + 5,
            AgsCommandCode::EndSession => AGS_COMMAND_SERVICE + 6,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value - AGS_COMMAND_SERVICE {
            1 => Some(AgsCommandCode::GuideOnBrightest),
            2 => Some(AgsCommandCode::GuideOnPixel),
            3 => Some(AgsCommandCode::GuideOnRank),
            4 => Some(AgsCommandCode::GuideOff),
            5 => Some(AgsCommandCode::StartSession),
            6 => Some(AgsCommandCode::EndSession),
            _ => None,
        }
    }
}

/// Monotonic command sequence counter with wrap-around at the ceiling.
pub struct SequenceCounter {
    counter: AtomicU32,
}

impl SequenceCounter {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    /// Take the next sequence number.
    pub fn next(&self) -> u32 {
        let step = |n: u32| if n + 1 > SEQUENCE_CEILING { 0 } else { n + 1 };
        self.counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(step(n)))
            .map(step)
            .unwrap_or(0)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// The counter used by every command send in this process.
static COMMAND_SEQUENCE: SequenceCounter = SequenceCounter::new();

/// Scale a pixel coordinate to integer millipixels, rejecting values outside
/// the legal CCD range. The truncating cast matches the wire contract.
pub fn to_millipixels(value: f32) -> CilResult<i32> {
    if !(PIXEL_MIN..=PIXEL_MAX).contains(&value) {
        return Err(CilError::PixelRange(value));
    }
    Ok((value * 1000.0) as i32)
}

pub fn from_millipixels(value: i32) -> f32 {
    value as f32 / 1000.0
}

fn command_packet(code: AgsCommandCode, param1: i32, param2: i32) -> AgsPacket {
    let seq = COMMAND_SEQUENCE.next();
    AgsPacket {
        header: CilHeader::new(
            node::TCS,
            node::AGS,
            PacketClass::Command,
            AGS_COMMAND_SERVICE,
            seq,
        ),
        command: code.to_i32(),
        status: SYS_NOMINAL,
        param1,
        param2,
    }
}

fn reply_packet(
    code: AgsCommandCode,
    status: i32,
    param1: i32,
    param2: i32,
    sequence_number: u32,
) -> AgsPacket {
    AgsPacket {
        header: CilHeader::new(
            node::AGS,
            node::TCS,
            PacketClass::Response,
            AGS_COMMAND_SERVICE,
            sequence_number,
        ),
        command: code.to_i32(),
        status,
        param1,
        param2,
    }
}

/// Validate class, service and command code, in that order, each mismatch
/// a distinct error.
fn expect(packet: &AgsPacket, class: PacketClass, code: AgsCommandCode) -> CilResult<()> {
    if packet.header.class != class {
        return Err(CilError::ClassMismatch {
            got: packet.header.class.to_i32(),
            expected: class.to_i32(),
        });
    }
    if packet.header.service != AGS_COMMAND_SERVICE {
        return Err(CilError::ServiceMismatch {
            got: packet.header.service,
            expected: AGS_COMMAND_SERVICE,
        });
    }
    if packet.command != code.to_i32() {
        return Err(CilError::CommandMismatch {
            got: packet.command,
            expected: code.to_i32(),
        });
    }
    Ok(())
}

/// Validate a received command packet's class and service, returning its
/// command code. Used by server-side dispatch before the per-command parse.
pub fn command_code(packet: &AgsPacket) -> CilResult<AgsCommandCode> {
    if packet.header.class != PacketClass::Command {
        return Err(CilError::ClassMismatch {
            got: packet.header.class.to_i32(),
            expected: PacketClass::Command.to_i32(),
        });
    }
    if packet.header.service != AGS_COMMAND_SERVICE {
        return Err(CilError::ServiceMismatch {
            got: packet.header.service,
            expected: AGS_COMMAND_SERVICE,
        });
    }
    AgsCommandCode::from_i32(packet.command).ok_or(CilError::CommandMismatch {
        got: packet.command,
        expected: AGS_COMMAND_SERVICE,
    })
}

fn send(endpoint: &UdpEndpoint, packet: &AgsPacket) -> CilResult<()> {
    debug!(
        "cil: sending {:?} command {:#x} seq {}",
        packet.header.class, packet.command, packet.header.seq_num
    );
    endpoint.send(&packet.encode())
}

/* -- guide on pixel -- */

/// Command the autoguider to guide on the object closest to a pixel.
/// Returns the sequence number assigned to the command.
pub fn guide_on_pixel_send(endpoint: &UdpEndpoint, pixel_x: f32, pixel_y: f32) -> CilResult<u32> {
    let packet = command_packet(
        AgsCommandCode::GuideOnPixel,
        to_millipixels(pixel_x)?,
        to_millipixels(pixel_y)?,
    );
    send(endpoint, &packet)?;
    Ok(packet.header.seq_num)
}

/// Extract `(pixel_x, pixel_y, sequence_number)` from a guide-on-pixel
/// command.
pub fn guide_on_pixel_parse(packet: &AgsPacket) -> CilResult<(f32, f32, u32)> {
    expect(packet, PacketClass::Command, AgsCommandCode::GuideOnPixel)?;
    Ok((
        from_millipixels(packet.param1),
        from_millipixels(packet.param2),
        packet.header.seq_num,
    ))
}

/// Answer a guide-on-pixel command, echoing its sequence number.
pub fn guide_on_pixel_reply_send(
    endpoint: &UdpEndpoint,
    pixel_x: f32,
    pixel_y: f32,
    status: i32,
    sequence_number: u32,
) -> CilResult<()> {
    let packet = reply_packet(
        AgsCommandCode::GuideOnPixel,
        status,
        to_millipixels(pixel_x)?,
        to_millipixels(pixel_y)?,
        sequence_number,
    );
    send(endpoint, &packet)
}

/// Extract `(pixel_x, pixel_y, status, sequence_number)` from a
/// guide-on-pixel reply.
pub fn guide_on_pixel_reply_parse(packet: &AgsPacket) -> CilResult<(f32, f32, i32, u32)> {
    expect(packet, PacketClass::Response, AgsCommandCode::GuideOnPixel)?;
    Ok((
        from_millipixels(packet.param1),
        from_millipixels(packet.param2),
        packet.status,
        packet.header.seq_num,
    ))
}

/* -- guide on brightest -- */

pub fn guide_on_brightest_send(endpoint: &UdpEndpoint) -> CilResult<u32> {
    let packet = command_packet(AgsCommandCode::GuideOnBrightest, 0, 0);
    send(endpoint, &packet)?;
    Ok(packet.header.seq_num)
}

pub fn guide_on_brightest_parse(packet: &AgsPacket) -> CilResult<u32> {
    expect(packet, PacketClass::Command, AgsCommandCode::GuideOnBrightest)?;
    Ok(packet.header.seq_num)
}

pub fn guide_on_brightest_reply_send(
    endpoint: &UdpEndpoint,
    status: i32,
    sequence_number: u32,
) -> CilResult<()> {
    let packet = reply_packet(AgsCommandCode::GuideOnBrightest, status, 0, 0, sequence_number);
    send(endpoint, &packet)
}

pub fn guide_on_brightest_reply_parse(packet: &AgsPacket) -> CilResult<(i32, u32)> {
    expect(packet, PacketClass::Response, AgsCommandCode::GuideOnBrightest)?;
    Ok((packet.status, packet.header.seq_num))
}

/* -- guide on rank -- */

pub fn guide_on_rank_send(endpoint: &UdpEndpoint, rank: i32) -> CilResult<u32> {
    let packet = command_packet(AgsCommandCode::GuideOnRank, rank, 0);
    send(endpoint, &packet)?;
    Ok(packet.header.seq_num)
}

/// Extract `(rank, sequence_number)` from a guide-on-rank command.
pub fn guide_on_rank_parse(packet: &AgsPacket) -> CilResult<(i32, u32)> {
    expect(packet, PacketClass::Command, AgsCommandCode::GuideOnRank)?;
    Ok((packet.param1, packet.header.seq_num))
}

pub fn guide_on_rank_reply_send(
    endpoint: &UdpEndpoint,
    rank: i32,
    status: i32,
    sequence_number: u32,
) -> CilResult<()> {
    let packet = reply_packet(AgsCommandCode::GuideOnRank, status, rank, 0, sequence_number);
    send(endpoint, &packet)
}

pub fn guide_on_rank_reply_parse(packet: &AgsPacket) -> CilResult<(i32, i32, u32)> {
    expect(packet, PacketClass::Response, AgsCommandCode::GuideOnRank)?;
    Ok((packet.param1, packet.status, packet.header.seq_num))
}

/* -- guide off -- */

pub fn guide_off_send(endpoint: &UdpEndpoint) -> CilResult<u32> {
    let packet = command_packet(AgsCommandCode::GuideOff, 0, 0);
    send(endpoint, &packet)?;
    Ok(packet.header.seq_num)
}

pub fn guide_off_parse(packet: &AgsPacket) -> CilResult<u32> {
    expect(packet, PacketClass::Command, AgsCommandCode::GuideOff)?;
    Ok(packet.header.seq_num)
}

pub fn guide_off_reply_send(
    endpoint: &UdpEndpoint,
    status: i32,
    sequence_number: u32,
) -> CilResult<()> {
    let packet = reply_packet(AgsCommandCode::GuideOff, status, 0, 0, sequence_number);
    send(endpoint, &packet)
}

pub fn guide_off_reply_parse(packet: &AgsPacket) -> CilResult<(i32, u32)> {
    expect(packet, PacketClass::Response, AgsCommandCode::GuideOff)?;
    Ok((packet.status, packet.header.seq_num))
}

/* -- session handshake -- */

pub fn start_session_send(endpoint: &UdpEndpoint) -> CilResult<u32> {
    let packet = command_packet(AgsCommandCode::StartSession, 0, 0);
    send(endpoint, &packet)?;
    Ok(packet.header.seq_num)
}

pub fn start_session_parse(packet: &AgsPacket) -> CilResult<u32> {
    expect(packet, PacketClass::Command, AgsCommandCode::StartSession)?;
    Ok(packet.header.seq_num)
}

pub fn start_session_reply_send(
    endpoint: &UdpEndpoint,
    status: i32,
    sequence_number: u32,
) -> CilResult<()> {
    let packet = reply_packet(AgsCommandCode::StartSession, status, 0, 0, sequence_number);
    send(endpoint, &packet)
}

pub fn start_session_reply_parse(packet: &AgsPacket) -> CilResult<(i32, u32)> {
    expect(packet, PacketClass::Response, AgsCommandCode::StartSession)?;
    Ok((packet.status, packet.header.seq_num))
}

pub fn end_session_send(endpoint: &UdpEndpoint) -> CilResult<u32> {
    let packet = command_packet(AgsCommandCode::EndSession, 0, 0);
    send(endpoint, &packet)?;
    Ok(packet.header.seq_num)
}

pub fn end_session_parse(packet: &AgsPacket) -> CilResult<u32> {
    expect(packet, PacketClass::Command, AgsCommandCode::EndSession)?;
    Ok(packet.header.seq_num)
}

pub fn end_session_reply_send(
    endpoint: &UdpEndpoint,
    status: i32,
    sequence_number: u32,
) -> CilResult<()> {
    let packet = reply_packet(AgsCommandCode::EndSession, status, 0, 0, sequence_number);
    send(endpoint, &packet)
}

pub fn end_session_reply_parse(packet: &AgsPacket) -> CilResult<(i32, u32)> {
    expect(packet, PacketClass::Response, AgsCommandCode::EndSession)?;
    Ok((packet.status, packet.header.seq_num))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CilTimestamp;

    fn pixel_command(param1: i32, param2: i32, seq: u32) -> AgsPacket {
        AgsPacket {
            header: CilHeader {
                source_id: node::TCS,
                dest_id: node::AGS,
                class: PacketClass::Command,
                service: AGS_COMMAND_SERVICE,
                seq_num: seq,
                timestamp: CilTimestamp {
                    seconds: 0,
                    nanoseconds: 0,
                },
            },
            command: AgsCommandCode::GuideOnPixel.to_i32(),
            status: SYS_NOMINAL,
            param1,
            param2,
        }
    }

    #[test]
    fn test_command_code_conversion() {
        for code in [
            AgsCommandCode::GuideOnBrightest,
            AgsCommandCode::GuideOnPixel,
            AgsCommandCode::GuideOnRank,
            AgsCommandCode::GuideOff,
            AgsCommandCode::StartSession,
            AgsCommandCode::EndSession,
        ] {
            assert_eq!(AgsCommandCode::from_i32(code.to_i32()), Some(code));
        }
        assert_eq!(AgsCommandCode::from_i32(AGS_COMMAND_SERVICE + 99), None);
    }

    #[test]
    fn test_millipixel_fidelity() {
        let encoded = to_millipixels(512.345).unwrap();
        let decoded = from_millipixels(encoded);
        assert!((decoded - 512.345).abs() < 0.001);
    }

    #[test]
    fn test_millipixel_range() {
        assert!(to_millipixels(1024.0).is_err());
        assert!(to_millipixels(-0.1).is_err());
        assert_eq!(to_millipixels(1023.0).unwrap(), 1_023_000);
        assert_eq!(to_millipixels(0.0).unwrap(), 0);
    }

    #[test]
    fn test_guide_on_pixel_scenario() {
        // param1 = param2 = 512000 millipixels, seq 7
        let packet = pixel_command(512_000, 512_000, 7);
        let (x, y, seq) = guide_on_pixel_parse(&packet).unwrap();
        assert_eq!(x, 512.0);
        assert_eq!(y, 512.0);
        assert_eq!(seq, 7);
    }

    #[test]
    fn test_parse_validation_order() {
        let mut packet = pixel_command(0, 0, 1);

        packet.header.class = PacketClass::Response;
        assert!(matches!(
            guide_on_pixel_parse(&packet).unwrap_err(),
            CilError::ClassMismatch { .. }
        ));

        packet.header.class = PacketClass::Command;
        packet.header.service = 0x1234;
        assert!(matches!(
            guide_on_pixel_parse(&packet).unwrap_err(),
            CilError::ServiceMismatch { .. }
        ));

        packet.header.service = AGS_COMMAND_SERVICE;
        packet.command = AgsCommandCode::GuideOff.to_i32();
        assert!(matches!(
            guide_on_pixel_parse(&packet).unwrap_err(),
            CilError::CommandMismatch { .. }
        ));
    }

    #[test]
    fn test_reply_echoes_sequence() {
        let packet = reply_packet(AgsCommandCode::GuideOnPixel, SYS_NOMINAL, 512_000, 256_000, 7);
        let (x, y, status, seq) = guide_on_pixel_reply_parse(&packet).unwrap();
        assert_eq!(x, 512.0);
        assert_eq!(y, 256.0);
        assert_eq!(status, SYS_NOMINAL);
        assert_eq!(seq, 7);
    }

    #[test]
    fn test_sequence_counter_increments() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn test_sequence_counter_wraps() {
        let counter = SequenceCounter {
            counter: AtomicU32::new(SEQUENCE_CEILING),
        };
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_command_code_dispatch() {
        let packet = pixel_command(0, 0, 3);
        assert_eq!(
            command_code(&packet).unwrap(),
            AgsCommandCode::GuideOnPixel
        );
    }

    #[test]
    fn test_rank_roundtrip() {
        let packet = command_packet(AgsCommandCode::GuideOnRank, 3, 0);
        let (rank, seq) = guide_on_rank_parse(&packet).unwrap();
        assert_eq!(rank, 3);
        assert_eq!(seq, packet.header.seq_num);
    }
}
