//! Configuration loading for the autoguider daemon

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ngatcil::error::{CilError, CilResult};
use ngatcil::types::{AutoguiderConfig, AutoguiderConfigJson};

/// Load the daemon configuration from a JSON file.
pub fn load_config<P: AsRef<Path>>(path: P) -> CilResult<AutoguiderConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let json: AutoguiderConfigJson = serde_json::from_reader(reader)?;
    json.to_config().map_err(CilError::Config)
}

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    /// Default configuration file name.
    pub const DEFAULT_CONFIG_PATH: &str = "agserver.json";

    /// How often a status sweep is pushed to the SDB.
    pub const SDB_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

    /// Reported application version, in milli-versions (v1.00).
    pub const APP_VERSION_MILLI: i32 = 1000;

    /// Detector full-well centre used by the simulated centroid.
    pub const CCD_CENTRE_PIXEL: f32 = 511.5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let config_json = r#"{
            "version": "1.0",
            "description": "Test config",
            "server": { "port": 13024 },
            "tcs": { "host": "tcc", "reply_port": 13021, "guide_port": 13025 },
            "sdb": { "host": "mcc", "port": 13011, "send": true },
            "guide": { "interval_ms": 1000 }
        }"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_json.as_bytes()).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.command_port, 13024);
        assert_eq!(config.tcs_host, "tcc");
        assert_eq!(config.tcs_guide_port, 13025);
        assert!(config.sdb_send);
        assert_eq!(config.guide_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config_json = r#"{
            "version": "1.0",
            "server": { "port": 13024 },
            "tcs": { "host": "tcc", "reply_port": 13021, "guide_port": 13025 },
            "sdb": { "host": "mcc", "port": 13011, "send": false },
            "guide": { "interval_ms": 0 }
        }"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_json.as_bytes()).unwrap();

        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config("/no/such/agserver.json").unwrap_err();
        assert!(matches!(err, CilError::Io(_)));
    }
}
