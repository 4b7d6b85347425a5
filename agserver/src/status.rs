//! SDB status reporting
//!
//! Owns the daemon's datum table and the socket used for submissions. The
//! setters take engineering units (pixels, magnitudes, degrees Celsius) and
//! store the milli-scaled integers the SDB expects. `sweep` pushes the due
//! datums; it is a no-op when submission is disabled in the configuration.

use log::warn;

use ngatcil::command::to_millipixels;
use ngatcil::error::CilResult;
use ngatcil::sdb::{AgsDatumId, SdbOidTable};
use ngatcil::types::{AgsState, AutoguiderConfig};
use ngatcil::udp::UdpEndpoint;

use crate::config::constants::APP_VERSION_MILLI;

/// Truncating milli-unit scaling, shared by magnitudes, temperatures and
/// percentages.
fn milli(value: f32) -> i32 {
    (value * 1000.0) as i32
}

pub struct StatusReporter {
    table: SdbOidTable,
    endpoint: UdpEndpoint,
    host: String,
    port: u16,
    enabled: bool,
}

impl StatusReporter {
    pub fn new(config: &AutoguiderConfig) -> CilResult<Self> {
        let reporter = Self {
            table: SdbOidTable::new(),
            endpoint: UdpEndpoint::open_unconnected()?,
            host: config.sdb_host.clone(),
            port: config.sdb_port,
            enabled: config.sdb_send,
        };
        reporter
            .table
            .value_set(AgsDatumId::AppVersion, APP_VERSION_MILLI)?;
        reporter.set_state(AgsState::Initialising)?;
        Ok(reporter)
    }

    pub fn set_state(&self, state: AgsState) -> CilResult<()> {
        self.table.value_set(AgsDatumId::AgState, state.to_i32())
    }

    /// Record the guide window corners, in pixels.
    pub fn set_window(&self, tlx: f32, tly: f32, brx: f32, bry: f32) -> CilResult<()> {
        self.table
            .value_set(AgsDatumId::WindowTlx, to_millipixels(tlx)?)?;
        self.table
            .value_set(AgsDatumId::WindowTly, to_millipixels(tly)?)?;
        self.table
            .value_set(AgsDatumId::WindowBrx, to_millipixels(brx)?)?;
        self.table
            .value_set(AgsDatumId::WindowBry, to_millipixels(bry)?)
    }

    pub fn set_integration_time(&self, milliseconds: i32) -> CilResult<()> {
        self.table.value_set(AgsDatumId::IntTime, milliseconds)
    }

    pub fn set_frame_skip(&self, frames: i32) -> CilResult<()> {
        self.table.value_set(AgsDatumId::FrameSkip, frames)
    }

    /// Record the per-frame centroid measurement.
    pub fn set_centroid(&self, x: f32, y: f32, fwhm: f32, magnitude: f32) -> CilResult<()> {
        self.table
            .value_set(AgsDatumId::CentroidX, to_millipixels(x)?)?;
        self.table
            .value_set(AgsDatumId::CentroidY, to_millipixels(y)?)?;
        self.table.value_set(AgsDatumId::Fwhm, milli(fwhm))?;
        self.table
            .value_set(AgsDatumId::GuideMag, milli(magnitude))
    }

    pub fn set_peak_pixel(&self, counts: i32) -> CilResult<()> {
        self.table.value_set(AgsDatumId::PeakPixel, counts)
    }

    pub fn set_temperatures(&self, chip_celsius: f32, case_celsius: f32) -> CilResult<()> {
        self.table
            .value_set(AgsDatumId::AgTemp, milli(chip_celsius))?;
        self.table
            .value_set(AgsDatumId::AgCaseTemp, milli(case_celsius))
    }

    pub fn set_cooler_power(&self, percent: f32) -> CilResult<()> {
        self.table.value_set(AgsDatumId::AgPercPow, milli(percent))
    }

    pub fn set_frame_stats(&self, mean: f32, rms: f32) -> CilResult<()> {
        self.table
            .value_set(AgsDatumId::AgFrameMean, milli(mean))?;
        self.table.value_set(AgsDatumId::AgFrameRms, milli(rms))
    }

    /// Push one status sweep to the SDB, returning how many datums went out.
    /// Submission failures are logged, not fatal; the changed flags survive
    /// for the next sweep.
    pub fn sweep(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        match self.table.status_send(&self.endpoint, &self.host, self.port) {
            Ok(count) => count,
            Err(e) => {
                warn!("sdb sweep failed: {}", e);
                0
            }
        }
    }

    pub fn table(&self) -> &SdbOidTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn test_config(port: u16, send: bool) -> AutoguiderConfig {
        AutoguiderConfig {
            version: "1.0".to_string(),
            command_port: 0,
            tcs_host: "127.0.0.1".to_string(),
            tcs_reply_port: 0,
            tcs_guide_port: 0,
            sdb_host: "127.0.0.1".to_string(),
            sdb_port: port,
            sdb_send: send,
            guide_interval: std::time::Duration::from_millis(100),
        }
    }

    #[test]
    fn test_setters_store_milli_units() {
        let reporter = StatusReporter::new(&test_config(13011, false)).unwrap();
        reporter.set_centroid(512.5, 256.25, 2.5, 9.75).unwrap();

        let table = reporter.table();
        assert_eq!(table.value_get(AgsDatumId::CentroidX).unwrap(), 512_500);
        assert_eq!(table.value_get(AgsDatumId::CentroidY).unwrap(), 256_250);
        assert_eq!(table.value_get(AgsDatumId::Fwhm).unwrap(), 2_500);
        assert_eq!(table.value_get(AgsDatumId::GuideMag).unwrap(), 9_750);
    }

    #[test]
    fn test_disabled_sweep_sends_nothing() {
        let reporter = StatusReporter::new(&test_config(13011, false)).unwrap();
        assert_eq!(reporter.sweep(), 0);
    }

    #[test]
    fn test_enabled_sweep_reaches_sdb() {
        let sdb = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = sdb.local_addr().unwrap().port();

        let reporter = StatusReporter::new(&test_config(port, true)).unwrap();
        let sent = reporter.sweep();
        assert!(sent > 0);

        let mut buf = [0u8; 1024];
        let (got, _) = sdb.recv_from(&mut buf).unwrap();
        assert!(got > 0);
    }

    #[test]
    fn test_temperatures_negative() {
        let reporter = StatusReporter::new(&test_config(13011, false)).unwrap();
        reporter.set_temperatures(-20.5, 15.0).unwrap();
        let table = reporter.table();
        assert_eq!(table.value_get(AgsDatumId::AgTemp).unwrap(), -20_500);
        assert_eq!(table.value_get(AgsDatumId::AgCaseTemp).unwrap(), 15_000);
    }
}
