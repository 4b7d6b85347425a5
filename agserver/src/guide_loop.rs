//! Simulated guide loop
//!
//! Until a camera is attached the daemon synthesises centroids: the guide
//! target plus a little uniform jitter each frame. One loop runs per guiding
//! session, sending a guide packet to the TCS every interval and refreshing
//! the centroid datums in the status table. When the loop is stopped it
//! sends the terminating guide packet before the thread exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info};
use rand::Rng;

use ngatcil::error::CilResult;
use ngatcil::guide::{guide_packet_send, GuidePacket, TIMECODE_MAX, TIMECODE_MIN};
use ngatcil::udp::UdpEndpoint;

use crate::status::StatusReporter;

/// Centroid jitter amplitude, pixels.
const JITTER_PIXELS: f32 = 0.05;
/// Synthetic stellar profile width, pixels.
const SIM_FWHM: f32 = 2.2;
/// Synthetic guide star magnitude.
const SIM_MAGNITUDE: f32 = 9.5;

pub struct GuideLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GuideLoop {
    /// Start guiding on `(target_x, target_y)`, sending packets to the TCS
    /// guide port every `interval`.
    pub fn start(
        reporter: Arc<StatusReporter>,
        tcs_host: &str,
        guide_port: u16,
        interval: Duration,
        target_x: f32,
        target_y: f32,
    ) -> CilResult<Self> {
        let endpoint = UdpEndpoint::open(tcs_host, guide_port)?;
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();

        // The TCS treats the timecode as "give up after this long", so leave
        // headroom over the actual frame interval.
        let wait_secs =
            (interval.as_secs_f32() * 2.0).clamp(TIMECODE_MIN, TIMECODE_MAX);

        let handle = thread::Builder::new()
            .name("guide-loop".to_string())
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let mut x = target_x;
                let mut y = target_y;
                while worker_running.load(Ordering::SeqCst) {
                    x = target_x + rng.gen_range(-JITTER_PIXELS..=JITTER_PIXELS);
                    y = target_y + rng.gen_range(-JITTER_PIXELS..=JITTER_PIXELS);

                    let packet = GuidePacket::reliable(x, y, wait_secs, '0');
                    if let Err(e) = guide_packet_send(&endpoint, &packet) {
                        error!("guide loop: send failed: {}", e);
                        break;
                    }
                    if let Err(e) = reporter.set_centroid(x, y, SIM_FWHM, SIM_MAGNITUDE) {
                        error!("guide loop: status update failed: {}", e);
                    }
                    thread::sleep(interval);
                }

                let terminator = GuidePacket::terminating(x, y, '0');
                if let Err(e) = guide_packet_send(&endpoint, &terminator) {
                    error!("guide loop: terminating packet failed: {}", e);
                }
                info!("guide loop finished");
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop guiding and wait for the terminating packet to go out.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("guide loop worker panicked");
            }
        }
    }
}

impl Drop for GuideLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngatcil::guide::GUIDE_PACKET_LENGTH;
    use ngatcil::types::AutoguiderConfig;
    use std::net::UdpSocket;

    fn test_reporter() -> Arc<StatusReporter> {
        let config = AutoguiderConfig {
            version: "1.0".to_string(),
            command_port: 0,
            tcs_host: "127.0.0.1".to_string(),
            tcs_reply_port: 0,
            tcs_guide_port: 0,
            sdb_host: "127.0.0.1".to_string(),
            sdb_port: 13011,
            sdb_send: false,
            guide_interval: Duration::from_millis(20),
        };
        Arc::new(StatusReporter::new(&config).unwrap())
    }

    fn recv_guide(socket: &UdpSocket) -> GuidePacket {
        let mut buf = [0u8; GUIDE_PACKET_LENGTH];
        let (got, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(got, GUIDE_PACKET_LENGTH);
        GuidePacket::parse(&buf).unwrap()
    }

    #[test]
    fn test_loop_sends_packets_then_terminates() {
        let tcs = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        tcs.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = tcs.local_addr().unwrap().port();

        let mut guide = GuideLoop::start(
            test_reporter(),
            "127.0.0.1",
            port,
            Duration::from_millis(20),
            512.0,
            256.0,
        )
        .unwrap();

        let first = recv_guide(&tcs);
        assert!(!first.terminating);
        assert!((first.x_pos - 512.0).abs() <= JITTER_PIXELS + 0.01);
        assert!((first.y_pos - 256.0).abs() <= JITTER_PIXELS + 0.01);

        guide.stop();

        // Drain until the terminating packet shows up.
        loop {
            let packet = recv_guide(&tcs);
            if packet.terminating {
                break;
            }
        }
    }

    #[test]
    fn test_centroid_datums_follow_loop() {
        let tcs = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = tcs.local_addr().unwrap().port();
        let reporter = test_reporter();

        let mut guide = GuideLoop::start(
            reporter.clone(),
            "127.0.0.1",
            port,
            Duration::from_millis(20),
            100.0,
            200.0,
        )
        .unwrap();

        // Wait for at least one frame to land in the table.
        let mut x = 0;
        for _ in 0..100 {
            x = reporter
                .table()
                .value_get(ngatcil::sdb::AgsDatumId::CentroidX)
                .unwrap();
            if x != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        guide.stop();
        assert!((99_000..=101_000).contains(&x));
    }
}
