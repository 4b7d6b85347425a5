//! SDB status submission
//!
//! The status database (SDB) runs on the master control computer and accepts
//! datum submissions over UDP. A submission packet is a CIL header with the
//! SUBMIT_1 service code, a 32-bit element count, and one 24-byte record per
//! datum: source id, datum id, units code, a two-word timestamp and the raw
//! value. All integers are network byte order and all timestamps are relative
//! to the TTL epoch.
//!
//! The datum table lives behind a mutex so the guide loop and the command
//! server can both update it. Setting a value marks the datum changed only
//! when it differs from the cached value; the continuously-resent set is
//! marked on every set. A status sweep transmits the changed datums, nothing
//! when none are changed, and clears the changed flags only once the
//! datagram has actually been handed to the socket.

use std::sync::Mutex;

use log::{debug, info};

use crate::command::SequenceCounter;
use crate::error::{CilError, CilResult};
use crate::packet::{CilHeader, CIL_BASE_PACKET_LENGTH};
use crate::types::{node, CilTimestamp, PacketClass};
use crate::udp::UdpEndpoint;

/// SDB service code for a SUBMIT_1 submission: service package 0x000d,
/// service 1 within it.
pub const E_SDB_SUBMIT_1: i32 = (0x000d << 16) + 1;

/// On-wire length of one submitted datum record.
pub const SDB_DATUM_LENGTH: usize = 24;

/// Engineering units codes understood by the SDB, as indexed by its own
/// units table. Only the codes this stack submits are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdbUnits {
    /// Dimensionless.
    NoUnits,
    MilliCelsius,
    MilliSeconds,
    /// Process state enumeration.
    ProcState,
    MilliPercent,
    /// Authorisation state enumeration.
    AuthState,
    /// System request enumeration.
    SysRequest,
    MilliVersion,
    MilliPixels,
    MilliStarMagnitudes,
}

impl SdbUnits {
    pub fn to_i32(self) -> i32 {
        match self {
            SdbUnits::NoUnits => 2,
            SdbUnits::MilliCelsius => 6,
            SdbUnits::MilliSeconds => 16,
            SdbUnits::ProcState => 23,
            SdbUnits::MilliPercent => 27,
            SdbUnits::AuthState => 38,
            SdbUnits::SysRequest => 43,
            SdbUnits::MilliVersion => 52,
            SdbUnits::MilliPixels => 70,
            SdbUnits::MilliStarMagnitudes => 71,
        }
    }
}

/// Datum identifiers the autoguider owns in the SDB. The first four are the
/// standard process datums every node reports; the rest are autoguider
/// specific, starting at [`AgsDatumId::AgState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgsDatumId {
    ProcState,
    AuthState,
    SysRequest,
    AppVersion,
    AgState,
    WindowTlx,
    WindowTly,
    WindowBrx,
    WindowBry,
    IntTime,
    FrameSkip,
    GuideMag,
    CentroidX,
    CentroidY,
    Fwhm,
    PeakPixel,
    AgTemp,
    AgCaseTemp,
    AgPercPow,
    AgFrameMean,
    AgFrameRms,
}

/// All datum ids in table order. Index in this slice + 1 == wire id.
const ALL_DATUM_IDS: [AgsDatumId; 21] = [
    AgsDatumId::ProcState,
    AgsDatumId::AuthState,
    AgsDatumId::SysRequest,
    AgsDatumId::AppVersion,
    AgsDatumId::AgState,
    AgsDatumId::WindowTlx,
    AgsDatumId::WindowTly,
    AgsDatumId::WindowBrx,
    AgsDatumId::WindowBry,
    AgsDatumId::IntTime,
    AgsDatumId::FrameSkip,
    AgsDatumId::GuideMag,
    AgsDatumId::CentroidX,
    AgsDatumId::CentroidY,
    AgsDatumId::Fwhm,
    AgsDatumId::PeakPixel,
    AgsDatumId::AgTemp,
    AgsDatumId::AgCaseTemp,
    AgsDatumId::AgPercPow,
    AgsDatumId::AgFrameMean,
    AgsDatumId::AgFrameRms,
];

impl AgsDatumId {
    pub fn to_i32(self) -> i32 {
        self as i32 + 1
    }

    pub fn from_i32(value: i32) -> CilResult<Self> {
        let index = value - 1;
        if index < 0 || index as usize >= ALL_DATUM_IDS.len() {
            return Err(CilError::UnknownOid(value));
        }
        Ok(ALL_DATUM_IDS[index as usize])
    }

    /// The engineering units the SDB expects for this datum.
    pub fn units(self) -> SdbUnits {
        match self {
            AgsDatumId::ProcState => SdbUnits::ProcState,
            AgsDatumId::AuthState => SdbUnits::AuthState,
            AgsDatumId::SysRequest => SdbUnits::SysRequest,
            AgsDatumId::AppVersion => SdbUnits::MilliVersion,
            AgsDatumId::AgState => SdbUnits::NoUnits,
            AgsDatumId::WindowTlx
            | AgsDatumId::WindowTly
            | AgsDatumId::WindowBrx
            | AgsDatumId::WindowBry => SdbUnits::MilliPixels,
            AgsDatumId::IntTime => SdbUnits::MilliSeconds,
            AgsDatumId::FrameSkip => SdbUnits::NoUnits,
            AgsDatumId::GuideMag => SdbUnits::MilliStarMagnitudes,
            AgsDatumId::CentroidX | AgsDatumId::CentroidY | AgsDatumId::Fwhm => {
                SdbUnits::MilliPixels
            }
            AgsDatumId::PeakPixel => SdbUnits::NoUnits,
            AgsDatumId::AgTemp | AgsDatumId::AgCaseTemp => SdbUnits::MilliCelsius,
            AgsDatumId::AgPercPow => SdbUnits::MilliPercent,
            AgsDatumId::AgFrameMean | AgsDatumId::AgFrameRms => SdbUnits::NoUnits,
        }
    }

    /// Whether this datum belongs to the periodic status sweep.
    fn in_sweep(self) -> bool {
        self >= AgsDatumId::AgState && self <= AgsDatumId::AgPercPow
    }

    /// Datums marked changed on every set whether or not the value moved,
    /// so the SDB sees a continuous trace for the quantities measured every
    /// guide frame.
    fn always_resent(self) -> bool {
        matches!(
            self,
            AgsDatumId::GuideMag
                | AgsDatumId::CentroidX
                | AgsDatumId::CentroidY
                | AgsDatumId::Fwhm
                | AgsDatumId::IntTime
        )
    }
}

/// One datum ready to go on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdbSubmissionDatum {
    pub datum_id: i32,
    pub units: i32,
    pub timestamp: CilTimestamp,
    pub value: i32,
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Encode a complete SUBMIT_1 packet: header, element count, datum records.
pub fn encode_submission(seq_num: u32, datums: &[SdbSubmissionDatum]) -> Vec<u8> {
    let mut header = CilHeader::new(
        node::AGS,
        node::SDB,
        PacketClass::Command,
        E_SDB_SUBMIT_1,
        seq_num,
    );
    header.timestamp = CilTimestamp::now_ttl();

    let mut buf = Vec::with_capacity(
        CIL_BASE_PACKET_LENGTH + 4 + datums.len() * SDB_DATUM_LENGTH,
    );
    buf.extend_from_slice(&header.encode());
    put_i32(&mut buf, datums.len() as i32);
    for datum in datums {
        put_i32(&mut buf, node::AGS);
        put_i32(&mut buf, datum.datum_id);
        put_i32(&mut buf, datum.units);
        put_i32(&mut buf, datum.timestamp.seconds);
        put_i32(&mut buf, datum.timestamp.nanoseconds);
        put_i32(&mut buf, datum.value);
    }
    buf
}

#[derive(Debug, Clone, Copy)]
struct DatumEntry {
    value: i32,
    timestamp: CilTimestamp,
    changed: bool,
}

/// The autoguider's datum table, indexed by datum id.
pub struct SdbOidTable {
    entries: Mutex<Vec<DatumEntry>>,
    sequence: SequenceCounter,
}

impl SdbOidTable {
    /// Build the table with every datum stamped now. Autoguider-specific
    /// datums start out marked changed so the first sweep paints a complete
    /// picture into the SDB.
    pub fn new() -> Self {
        let now = CilTimestamp::now_ttl();
        let entries = ALL_DATUM_IDS
            .iter()
            .map(|id| DatumEntry {
                value: 0,
                timestamp: now,
                changed: *id >= AgsDatumId::AgState,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            sequence: SequenceCounter::new(),
        }
    }

    fn lock(&self) -> CilResult<std::sync::MutexGuard<'_, Vec<DatumEntry>>> {
        self.entries
            .lock()
            .map_err(|_| CilError::Config("datum table lock poisoned".to_string()))
    }

    /// Record a new value for a datum, restamping it. The entry is marked
    /// changed when the value differs from the cached one, or on every set
    /// for the continuously-resent datums.
    pub fn value_set(&self, datum: AgsDatumId, value: i32) -> CilResult<()> {
        let mut entries = self.lock()?;
        let entry = &mut entries[datum as usize];
        if value != entry.value || datum.always_resent() {
            entry.changed = true;
        }
        entry.value = value;
        entry.timestamp = CilTimestamp::now_ttl();
        debug!("sdb: {:?} = {}", datum, value);
        Ok(())
    }

    /// The current value of a datum.
    pub fn value_get(&self, datum: AgsDatumId) -> CilResult<i32> {
        let entries = self.lock()?;
        Ok(entries[datum as usize].value)
    }

    /// Snapshot the changed sweep datums due for transmission.
    fn collect_due(&self) -> CilResult<Vec<SdbSubmissionDatum>> {
        let entries = self.lock()?;
        let mut due = Vec::new();
        for (index, id) in ALL_DATUM_IDS.iter().enumerate() {
            if !id.in_sweep() {
                continue;
            }
            let entry = &entries[index];
            if entry.changed {
                due.push(SdbSubmissionDatum {
                    datum_id: id.to_i32(),
                    units: id.units().to_i32(),
                    timestamp: entry.timestamp,
                    value: entry.value,
                });
            }
        }
        Ok(due)
    }

    /// Transmit the changed datums to the SDB at `host:port`, returning how
    /// many went out. No packet is sent when nothing is changed. Changed
    /// flags are cleared only after a successful send, so a dropped
    /// submission is retried by the next sweep.
    pub fn status_send(
        &self,
        endpoint: &UdpEndpoint,
        host: &str,
        port: u16,
    ) -> CilResult<usize> {
        let due = self.collect_due()?;
        if due.is_empty() {
            return Ok(0);
        }
        let packet = encode_submission(self.sequence.next(), &due);
        endpoint.send_to(host, port, &packet)?;

        let mut entries = self.lock()?;
        for datum in &due {
            entries[(datum.datum_id - 1) as usize].changed = false;
        }
        info!("sdb: submitted {} datums to {}:{}", due.len(), host, port);
        Ok(due.len())
    }
}

impl Default for SdbOidTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_i32(buf: &[u8], offset: usize) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[offset..offset + 4]);
        i32::from_be_bytes(bytes)
    }

    #[test]
    fn test_datum_id_values() {
        assert_eq!(AgsDatumId::ProcState.to_i32(), 1);
        assert_eq!(AgsDatumId::AgState.to_i32(), 5);
        assert_eq!(AgsDatumId::GuideMag.to_i32(), 12);
        assert_eq!(AgsDatumId::AgFrameRms.to_i32(), 21);
    }

    #[test]
    fn test_datum_id_from_i32() {
        assert_eq!(AgsDatumId::from_i32(5).unwrap(), AgsDatumId::AgState);
        assert!(matches!(
            AgsDatumId::from_i32(0).unwrap_err(),
            CilError::UnknownOid(0)
        ));
        assert!(matches!(
            AgsDatumId::from_i32(22).unwrap_err(),
            CilError::UnknownOid(22)
        ));
    }

    #[test]
    fn test_units_assignment() {
        assert_eq!(AgsDatumId::CentroidX.units().to_i32(), 70);
        assert_eq!(AgsDatumId::GuideMag.units().to_i32(), 71);
        assert_eq!(AgsDatumId::AgTemp.units().to_i32(), 6);
        assert_eq!(AgsDatumId::IntTime.units().to_i32(), 16);
    }

    #[test]
    fn test_encode_submission_layout() {
        let datums = [SdbSubmissionDatum {
            datum_id: AgsDatumId::CentroidX.to_i32(),
            units: SdbUnits::MilliPixels.to_i32(),
            timestamp: CilTimestamp {
                seconds: 1000,
                nanoseconds: 2000,
            },
            value: 512_000,
        }];
        let packet = encode_submission(7, &datums);
        assert_eq!(packet.len(), CIL_BASE_PACKET_LENGTH + 4 + SDB_DATUM_LENGTH);
        // Header: source, dest, class, service, seq
        assert_eq!(get_i32(&packet, 0), node::AGS);
        assert_eq!(get_i32(&packet, 4), node::SDB);
        assert_eq!(get_i32(&packet, 8), PacketClass::Command.to_i32());
        assert_eq!(get_i32(&packet, 12), E_SDB_SUBMIT_1);
        assert_eq!(get_i32(&packet, 16), 7);
        // Element count, then the datum record
        assert_eq!(get_i32(&packet, 28), 1);
        assert_eq!(get_i32(&packet, 32), node::AGS);
        assert_eq!(get_i32(&packet, 36), 13);
        assert_eq!(get_i32(&packet, 40), 70);
        assert_eq!(get_i32(&packet, 44), 1000);
        assert_eq!(get_i32(&packet, 48), 2000);
        assert_eq!(get_i32(&packet, 52), 512_000);
    }

    #[test]
    fn test_submit_service_code() {
        assert_eq!(E_SDB_SUBMIT_1, 0x000d_0001);
    }

    #[test]
    fn test_first_sweep_includes_all_user_datums() {
        let table = SdbOidTable::new();
        let due = table.collect_due().unwrap();
        // AgState through AgPercPow inclusive.
        assert_eq!(due.len(), 15);
        assert_eq!(due[0].datum_id, AgsDatumId::AgState.to_i32());
        assert_eq!(due[due.len() - 1].datum_id, AgsDatumId::AgPercPow.to_i32());
    }

    fn clear_all_flags(table: &SdbOidTable) {
        let mut entries = table.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            entry.changed = false;
        }
    }

    #[test]
    fn test_nothing_due_when_nothing_changed() {
        let table = SdbOidTable::new();
        clear_all_flags(&table);
        assert!(table.collect_due().unwrap().is_empty());
    }

    #[test]
    fn test_always_resent_redirty_on_same_value() {
        let table = SdbOidTable::new();
        clear_all_flags(&table);
        table.value_set(AgsDatumId::CentroidX, 512_000).unwrap();
        clear_all_flags(&table);
        // Same value again: continuously-resent datums go dirty regardless.
        table.value_set(AgsDatumId::CentroidX, 512_000).unwrap();
        let due = table.collect_due().unwrap();
        let ids: Vec<i32> = due.iter().map(|d| d.datum_id).collect();
        assert_eq!(ids, vec![AgsDatumId::CentroidX.to_i32()]);
    }

    #[test]
    fn test_value_set_marks_changed() {
        let table = SdbOidTable::new();
        clear_all_flags(&table);
        table.value_set(AgsDatumId::FrameSkip, 3).unwrap();
        assert_eq!(table.value_get(AgsDatumId::FrameSkip).unwrap(), 3);
        let due = table.collect_due().unwrap();
        assert!(due
            .iter()
            .any(|d| d.datum_id == AgsDatumId::FrameSkip.to_i32() && d.value == 3));
    }

    #[test]
    fn test_same_value_marks_changed_only_once() {
        let table = SdbOidTable::new();
        clear_all_flags(&table);
        table.value_set(AgsDatumId::FrameSkip, 3).unwrap();
        clear_all_flags(&table);
        // Identical value: an ordinary datum stays clean.
        table.value_set(AgsDatumId::FrameSkip, 3).unwrap();
        assert!(table.collect_due().unwrap().is_empty());
        // A different value dirties it again.
        table.value_set(AgsDatumId::FrameSkip, 4).unwrap();
        let due = table.collect_due().unwrap();
        let ids: Vec<i32> = due.iter().map(|d| d.datum_id).collect();
        assert_eq!(ids, vec![AgsDatumId::FrameSkip.to_i32()]);
    }

    #[test]
    fn test_status_send_clears_changed_flags() {
        let receiver = std::net::UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = receiver.local_addr().unwrap().port();
        let endpoint = UdpEndpoint::open_unconnected().unwrap();

        let table = SdbOidTable::new();
        let sent = table.status_send(&endpoint, "127.0.0.1", port).unwrap();
        assert_eq!(sent, 15);

        let mut buf = [0u8; 1024];
        let (got, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(got, CIL_BASE_PACKET_LENGTH + 4 + 15 * SDB_DATUM_LENGTH);

        // Nothing changed since: the second sweep sends no packet.
        let sent = table.status_send(&endpoint, "127.0.0.1", port).unwrap();
        assert_eq!(sent, 0);

        // An unchanged value on an ordinary datum stays clean; a fresh
        // measurement on a continuously-resent one goes out again.
        table.value_set(AgsDatumId::FrameSkip, 0).unwrap();
        table.value_set(AgsDatumId::CentroidX, 0).unwrap();
        let sent = table.status_send(&endpoint, "127.0.0.1", port).unwrap();
        assert_eq!(sent, 1);
    }
}
