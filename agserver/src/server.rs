//! CIL command server
//!
//! Listens on the autoguider command port, dispatches on the command code
//! and answers every well-formed command with a reply to the TCS reply port.
//! Replies go out on a short-lived endpoint per command. Guide commands
//! start or replace the guide loop; guide off and end session stop it.
//! Bare-header heartbeat packets are acknowledged with a status reply sent
//! straight back to the sender.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};

use ngatcil::command::{self, command_code, AgsCommandCode};
use ngatcil::error::{CilError, CilResult};
use ngatcil::packet::{
    AgsPacket, CilHeader, StatusReplyPacket, AGS_PACKET_LENGTH, CIL_BASE_PACKET_LENGTH,
};
use ngatcil::types::{
    node, AgsState, AutoguiderConfig, PacketClass, HEARTBEAT_SERVICE, SYS_NOMINAL,
};
use ngatcil::udp::{UdpEndpoint, UdpServer};

use crate::config::constants::CCD_CENTRE_PIXEL;
use crate::guide_loop::GuideLoop;
use crate::status::StatusReporter;

struct ServerState {
    reporter: Arc<StatusReporter>,
    guide: Option<GuideLoop>,
    tcs_host: String,
    tcs_reply_port: u16,
    tcs_guide_port: u16,
    guide_interval: Duration,
}

impl ServerState {
    fn reply_endpoint(&self) -> CilResult<UdpEndpoint> {
        UdpEndpoint::open(&self.tcs_host, self.tcs_reply_port)
    }

    fn start_guiding(&mut self, x: f32, y: f32, state: AgsState) -> CilResult<()> {
        if let Some(mut old) = self.guide.take() {
            info!("replacing active guide loop");
            old.stop();
        }
        self.guide = Some(GuideLoop::start(
            self.reporter.clone(),
            &self.tcs_host,
            self.tcs_guide_port,
            self.guide_interval,
            x,
            y,
        )?);
        self.reporter.set_state(state)
    }

    fn stop_guiding(&mut self) -> CilResult<()> {
        if let Some(mut guide) = self.guide.take() {
            guide.stop();
        }
        self.reporter.set_state(AgsState::Idle)
    }

    /// Acknowledge a heartbeat with a status reply to whoever sent it.
    fn handle_heartbeat(&self, header: &CilHeader, peer: SocketAddr) -> CilResult<()> {
        debug!("heartbeat from node {} at {}", header.source_id, peer);
        let reply = StatusReplyPacket {
            header: CilHeader::new(
                node::AGS,
                header.source_id,
                PacketClass::Response,
                header.service,
                header.seq_num,
            ),
            status: SYS_NOMINAL,
        };
        let endpoint = UdpEndpoint::open_unconnected()?;
        endpoint.send_to(&peer.ip().to_string(), peer.port(), &reply.encode())
    }

    fn dispatch(&mut self, bytes: &[u8], peer: SocketAddr) -> CilResult<()> {
        if bytes.len() == CIL_BASE_PACKET_LENGTH {
            let header = CilHeader::decode(bytes)?;
            if header.class == PacketClass::Command && header.service == HEARTBEAT_SERVICE {
                return self.handle_heartbeat(&header, peer);
            }
            return Err(CilError::ServiceMismatch {
                got: header.service,
                expected: HEARTBEAT_SERVICE,
            });
        }
        let packet = AgsPacket::decode(bytes)?;
        self.handle(&packet)
    }

    fn handle(&mut self, packet: &AgsPacket) -> CilResult<()> {
        let code = command_code(packet)?;
        info!(
            "command {:?} seq {} from node {}",
            code, packet.header.seq_num, packet.header.source_id
        );
        let reply = self.reply_endpoint()?;

        match code {
            AgsCommandCode::GuideOnPixel => {
                let (x, y, seq) = command::guide_on_pixel_parse(packet)?;
                self.start_guiding(x, y, AgsState::OnPixel)?;
                command::guide_on_pixel_reply_send(&reply, x, y, SYS_NOMINAL, seq)
            }
            AgsCommandCode::GuideOnBrightest => {
                let seq = command::guide_on_brightest_parse(packet)?;
                self.start_guiding(CCD_CENTRE_PIXEL, CCD_CENTRE_PIXEL, AgsState::OnBrightest)?;
                command::guide_on_brightest_reply_send(&reply, SYS_NOMINAL, seq)
            }
            AgsCommandCode::GuideOnRank => {
                let (rank, seq) = command::guide_on_rank_parse(packet)?;
                self.start_guiding(CCD_CENTRE_PIXEL, CCD_CENTRE_PIXEL, AgsState::OnRank)?;
                command::guide_on_rank_reply_send(&reply, rank, SYS_NOMINAL, seq)
            }
            AgsCommandCode::GuideOff => {
                let seq = command::guide_off_parse(packet)?;
                self.stop_guiding()?;
                command::guide_off_reply_send(&reply, SYS_NOMINAL, seq)
            }
            AgsCommandCode::StartSession => {
                let seq = command::start_session_parse(packet)?;
                self.reporter.set_state(AgsState::Idle)?;
                command::start_session_reply_send(&reply, SYS_NOMINAL, seq)
            }
            AgsCommandCode::EndSession => {
                let seq = command::end_session_parse(packet)?;
                self.stop_guiding()?;
                command::end_session_reply_send(&reply, SYS_NOMINAL, seq)
            }
        }
    }
}

/// The running command server.
pub struct CommandServer {
    server: UdpServer,
    state: Arc<Mutex<ServerState>>,
}

impl CommandServer {
    pub fn start(config: &AutoguiderConfig, reporter: Arc<StatusReporter>) -> CilResult<Self> {
        let state = Arc::new(Mutex::new(ServerState {
            reporter,
            guide: None,
            tcs_host: config.tcs_host.clone(),
            tcs_reply_port: config.tcs_reply_port,
            tcs_guide_port: config.tcs_guide_port,
            guide_interval: config.guide_interval,
        }));
        let worker_state = state.clone();

        let server = UdpServer::start(config.command_port, AGS_PACKET_LENGTH, move |bytes, peer| {
            let mut state = worker_state
                .lock()
                .map_err(|_| CilError::Config("server state lock poisoned".to_string()))?;
            state.dispatch(bytes, peer)
        })?;

        info!("command server listening on port {}", server.port());
        Ok(Self { server, state })
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    /// Stop the listener and any guide loop it started.
    pub fn stop(&mut self) -> CilResult<()> {
        self.server.stop()?;
        match self.state.lock() {
            Ok(mut state) => state.stop_guiding(),
            Err(_) => {
                warn!("server state lock poisoned during shutdown");
                Ok(())
            }
        }
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
