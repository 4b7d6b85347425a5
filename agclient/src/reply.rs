//! Reply listener
//!
//! Autoguider replies arrive as separate datagrams on the TCS reply port,
//! in whatever order the autoguider produces them. The listener runs a
//! supervised UDP server that decodes each datagram and queues it on a
//! channel; callers pull replies off the channel, matching on the echoed
//! sequence number.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::warn;

use ngatcil::error::{CilError, CilResult};
use ngatcil::packet::{AgsPacket, AGS_PACKET_LENGTH};
use ngatcil::udp::UdpServer;

/// Collects reply packets from the autoguider.
pub struct ReplyListener {
    server: UdpServer,
    replies: Receiver<AgsPacket>,
}

impl ReplyListener {
    /// Bind the reply port (0 lets the OS choose) and start listening.
    pub fn start(port: u16) -> CilResult<Self> {
        let (sender, replies) = mpsc::channel();
        let server = UdpServer::start(port, AGS_PACKET_LENGTH, move |bytes, _peer| {
            let packet = AgsPacket::decode(bytes)?;
            // A closed channel just means the listener was dropped.
            let _ = sender.send(packet);
            Ok(())
        })?;
        Ok(Self { server, replies })
    }

    /// The bound reply port.
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Wait for the next reply, whatever command it answers.
    pub fn recv(&self, timeout: Duration) -> CilResult<AgsPacket> {
        self.replies.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => CilError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out waiting for reply",
            )),
            RecvTimeoutError::Disconnected => CilError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "reply listener stopped",
            )),
        })
    }

    /// Wait for the reply echoing `sequence_number`, discarding any stale
    /// replies that arrive first.
    pub fn wait_for(&self, sequence_number: u32, timeout: Duration) -> CilResult<AgsPacket> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let packet = self.recv(remaining)?;
            if packet.header.seq_num == sequence_number {
                return Ok(packet);
            }
            warn!(
                "reply listener: discarding reply seq {} while waiting for {}",
                packet.header.seq_num, sequence_number
            );
        }
    }

    /// Stop the listener thread.
    pub fn stop(&mut self) -> CilResult<()> {
        self.server.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngatcil::command;
    use ngatcil::types::SYS_NOMINAL;
    use ngatcil::udp::UdpEndpoint;

    #[test]
    fn test_wait_for_matches_sequence() {
        let listener = ReplyListener::start(0).unwrap();
        let endpoint = UdpEndpoint::open("127.0.0.1", listener.port()).unwrap();

        // A stale reply followed by the one we want.
        command::guide_off_reply_send(&endpoint, SYS_NOMINAL, 3).unwrap();
        command::guide_on_brightest_reply_send(&endpoint, SYS_NOMINAL, 4).unwrap();

        let packet = listener.wait_for(4, Duration::from_secs(2)).unwrap();
        let (status, seq) = command::guide_on_brightest_reply_parse(&packet).unwrap();
        assert_eq!(status, SYS_NOMINAL);
        assert_eq!(seq, 4);
    }

    #[test]
    fn test_recv_times_out_when_silent() {
        let listener = ReplyListener::start(0).unwrap();
        let err = listener.recv(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, CilError::Io(_)));
    }
}
