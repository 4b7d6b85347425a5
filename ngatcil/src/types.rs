//! Type definitions shared across the NGATCIL stack

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// CIL node identifiers carried in the source/dest fields of every packet.
///
/// Only the nodes this stack talks to are listed. The values follow the
/// telescope site's CIL address map; the SDB id is fixed by the wire traces,
/// the others are configurable at the deployment level.
pub mod node {
    /// Master control process.
    pub const MCP: i32 = 1;
    /// Continuous heartbeat process.
    pub const CHB: i32 = 2;
    /// Status database.
    pub const SDB: i32 = 10;
    /// Telescope control system.
    pub const TCS: i32 = 17;
    /// Autoguider service.
    pub const AGS: i32 = 54;
}

/// Default UDP endpoints, overridable by configuration.
pub mod ports {
    /// Port the autoguider listens on for CIL commands.
    pub const AGS_COMMAND: u16 = 13024;
    /// Port the TCS listens on for CIL command replies.
    pub const TCS_REPLY: u16 = 13021;
    /// Port the TCS listens on for guide packets.
    pub const TCS_GUIDE: u16 = 13025;
    /// Port the SDB listens on for status submissions.
    pub const SDB: u16 = 13011;
    /// Default TCS machine name.
    pub const TCS_HOST: &str = "tcc";
    /// Default SDB machine name.
    pub const SDB_HOST: &str = "mcc";
}

/// Reply status reported in the `status` field of CIL reply packets.
/// Zero is the nominal "command accepted" value.
pub const SYS_NOMINAL: i32 = 0;

/// Service tag on the bare-header heartbeat packets the continuous
/// heartbeat task sends to every node. Like the node ids, the value
/// follows the site's CIL service map.
pub const HEARTBEAT_SERVICE: i32 = 0x0042 << 16;

/// CIL packet class, distinguishing commands from the reply stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Invalid,
    Command,
    Response,
    Ack,
    Acted,
    Completed,
    Error,
}

impl PacketClass {
    pub fn to_i32(self) -> i32 {
        match self {
            PacketClass::Invalid => 0,
            PacketClass::Command => 1,
            PacketClass::Response => 2,
            PacketClass::Ack => 3,
            PacketClass::Acted => 4,
            PacketClass::Completed => 5,
            PacketClass::Error => 6,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PacketClass::Invalid),
            1 => Some(PacketClass::Command),
            2 => Some(PacketClass::Response),
            3 => Some(PacketClass::Ack),
            4 => Some(PacketClass::Acted),
            5 => Some(PacketClass::Completed),
            6 => Some(PacketClass::Error),
            _ => None,
        }
    }
}

/// Seconds between the Unix epoch and the TTL epoch (1990-01-01 UTC).
/// SDB submissions carry timestamps relative to the TTL epoch.
pub const TTL_EPOCH_OFFSET_SECS: i64 = 631_152_000;

/// Wall-clock timestamp as carried in CIL packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CilTimestamp {
    /// Seconds since the Unix epoch
    pub seconds: i32,
    /// Nanoseconds within the current second
    pub nanoseconds: i32,
}

impl CilTimestamp {
    /// Current time, Unix epoch.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: duration.as_secs() as i32,
            nanoseconds: duration.subsec_nanos() as i32,
        }
    }

    /// Current time, TTL epoch. Used for SDB submissions.
    pub fn now_ttl() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: (duration.as_secs() as i64 - TTL_EPOCH_OFFSET_SECS) as i32,
            nanoseconds: duration.subsec_nanos() as i32,
        }
    }
}

/// Autoguider state, submitted to the SDB as the AGSTATE datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgsState {
    /// Not ready to accept observing commands.
    Off,
    /// Guiding on the brightest non-saturated source.
    OnBrightest,
    /// Guiding on the brightest source in a magnitude range.
    OnRange,
    /// Guiding on the nth brightest source.
    OnRank,
    /// Guiding on the source closest to a supplied pixel.
    OnPixel,
    /// Ready to accept observing commands.
    Idle,
    /// Acquiring a guide source.
    Working,
    /// Not ready for operational use.
    Initialising,
    /// Failed to find a guide source.
    Failed,
    InteractiveWorking,
    InteractiveOn,
    /// Recoverable error.
    Error,
    NonRecoverableError,
}

impl AgsState {
    pub fn to_i32(self) -> i32 {
        match self {
            AgsState::Off => 0,
            AgsState::OnBrightest => 1,
            AgsState::OnRange => 2,
            AgsState::OnRank => 3,
            AgsState::OnPixel => 4,
            AgsState::Idle => 5,
            AgsState::Working => 6,
            AgsState::Initialising => 7,
            AgsState::Failed => 8,
            AgsState::InteractiveWorking => 9,
            AgsState::InteractiveOn => 10,
            AgsState::Error => 11,
            AgsState::NonRecoverableError => 12,
        }
    }
}

/// JSON representation of the daemon configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoguiderConfigJson {
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub server: ServerConfigJson,
    pub tcs: TcsConfigJson,
    pub sdb: SdbConfigJson,
    pub guide: GuideConfigJson,
}

/// JSON representation of the CIL command server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfigJson {
    pub port: u16,
}

/// JSON representation of where to reach the TCS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcsConfigJson {
    pub host: String,
    pub reply_port: u16,
    pub guide_port: u16,
}

/// JSON representation of where to reach the SDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdbConfigJson {
    pub host: String,
    pub port: u16,
    /// Whether status submission is enabled at all.
    pub send: bool,
}

/// JSON representation of guide loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideConfigJson {
    pub interval_ms: u32,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct AutoguiderConfig {
    pub version: String,
    pub command_port: u16,
    pub tcs_host: String,
    pub tcs_reply_port: u16,
    pub tcs_guide_port: u16,
    pub sdb_host: String,
    pub sdb_port: u16,
    pub sdb_send: bool,
    pub guide_interval: std::time::Duration,
}

impl AutoguiderConfigJson {
    pub fn to_config(&self) -> Result<AutoguiderConfig, String> {
        if self.tcs.host.is_empty() {
            return Err("Missing TCS host".to_string());
        }
        if self.sdb.host.is_empty() {
            return Err("Missing SDB host".to_string());
        }
        if self.guide.interval_ms == 0 {
            return Err("Guide interval must be non-zero".to_string());
        }

        Ok(AutoguiderConfig {
            version: self.version.clone(),
            command_port: self.server.port,
            tcs_host: self.tcs.host.clone(),
            tcs_reply_port: self.tcs.reply_port,
            tcs_guide_port: self.tcs.guide_port,
            sdb_host: self.sdb.host.clone(),
            sdb_port: self.sdb.port,
            sdb_send: self.sdb.send,
            guide_interval: std::time::Duration::from_millis(self.guide.interval_ms as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_class_conversion() {
        assert_eq!(PacketClass::Command.to_i32(), 1);
        assert_eq!(PacketClass::from_i32(2), Some(PacketClass::Response));
        assert_eq!(PacketClass::from_i32(7), None);
    }

    #[test]
    fn test_timestamp_now() {
        let ts = CilTimestamp::now();
        assert!(ts.seconds > 0);
    }

    #[test]
    fn test_ttl_timestamp_offset() {
        let unix = CilTimestamp::now();
        let ttl = CilTimestamp::now_ttl();
        let diff = unix.seconds as i64 - ttl.seconds as i64;
        // Allow for a second boundary between the two calls.
        assert!((diff - TTL_EPOCH_OFFSET_SECS).abs() <= 1);
    }
}
