//! High-level command client
//!
//! Provides a convenient API for sending autoguider commands. Replies arrive
//! asynchronously on the reply port, not on this socket; pair this with a
//! [`crate::reply::ReplyListener`] and correlate by sequence number.

use ngatcil::command;
use ngatcil::error::CilResult;
use ngatcil::types::ports;
use ngatcil::udp::UdpEndpoint;

/// Client for the autoguider command port. Each method sends one command
/// and returns the sequence number it carried.
pub struct AgsCommandClient {
    endpoint: UdpEndpoint,
}

impl AgsCommandClient {
    /// Connect to the autoguider command port on `host`.
    pub fn connect(host: &str, port: u16) -> CilResult<Self> {
        let endpoint = UdpEndpoint::open(host, port)?;
        Ok(Self { endpoint })
    }

    /// Connect to `host` on the default command port.
    pub fn connect_default(host: &str) -> CilResult<Self> {
        Self::connect(host, ports::AGS_COMMAND)
    }

    /// Open a guiding session.
    pub fn start_session(&self) -> CilResult<u32> {
        command::start_session_send(&self.endpoint)
    }

    /// Close a guiding session.
    pub fn end_session(&self) -> CilResult<u32> {
        command::end_session_send(&self.endpoint)
    }

    /// Guide on the brightest non-saturated object in the field.
    pub fn guide_on_brightest(&self) -> CilResult<u32> {
        command::guide_on_brightest_send(&self.endpoint)
    }

    /// Guide on the object nearest the given pixel position.
    pub fn guide_on_pixel(&self, pixel_x: f32, pixel_y: f32) -> CilResult<u32> {
        command::guide_on_pixel_send(&self.endpoint, pixel_x, pixel_y)
    }

    /// Guide on the nth brightest object in the field.
    pub fn guide_on_rank(&self, rank: i32) -> CilResult<u32> {
        command::guide_on_rank_send(&self.endpoint, rank)
    }

    /// Stop guiding.
    pub fn guide_off(&self) -> CilResult<u32> {
        command::guide_off_send(&self.endpoint)
    }

    /// The underlying endpoint, for advanced use.
    pub fn endpoint(&self) -> &UdpEndpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngatcil::command::{command_code, AgsCommandCode};
    use ngatcil::packet::{AgsPacket, AGS_PACKET_LENGTH};
    use std::net::UdpSocket;

    fn recv_packet(socket: &UdpSocket) -> AgsPacket {
        let mut buf = [0u8; AGS_PACKET_LENGTH];
        let (got, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(got, AGS_PACKET_LENGTH);
        AgsPacket::decode(&buf).unwrap()
    }

    #[test]
    fn test_guide_on_pixel_reaches_server() {
        let server = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = server.local_addr().unwrap().port();

        let client = AgsCommandClient::connect("127.0.0.1", port).unwrap();
        let seq = client.guide_on_pixel(100.5, 200.25).unwrap();

        let packet = recv_packet(&server);
        assert_eq!(command_code(&packet).unwrap(), AgsCommandCode::GuideOnPixel);
        assert_eq!(packet.header.seq_num, seq);
        assert_eq!(packet.param1, 100_500);
        assert_eq!(packet.param2, 200_250);
    }

    #[test]
    fn test_commands_carry_distinct_sequences() {
        let server = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = server.local_addr().unwrap().port();

        let client = AgsCommandClient::connect("127.0.0.1", port).unwrap();
        let first = client.guide_on_brightest().unwrap();
        let second = client.guide_off().unwrap();
        assert_ne!(first, second);

        assert_eq!(recv_packet(&server).header.seq_num, first);
        assert_eq!(recv_packet(&server).header.seq_num, second);
    }

    #[test]
    fn test_pixel_range_rejected_before_send() {
        let server = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = server.local_addr().unwrap().port();

        let client = AgsCommandClient::connect("127.0.0.1", port).unwrap();
        assert!(client.guide_on_pixel(5000.0, 0.0).is_err());
    }
}
