//! Host configuration, loadable from TOML with CLI-friendly defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::graph::StreamFormat;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Instantiate units on an isolated task, mirroring out-of-process
    /// component loading.
    pub load_out_of_process: bool,

    /// Hot-plug poll interval of the MIDI service, in milliseconds.
    pub midi_poll_interval_ms: u64,

    /// Format used by the offline render endpoint.
    pub offline_sample_rate: u32,
    pub offline_channels: u16,

    /// Optional override for the bundled source loop.
    pub source_asset: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            load_out_of_process: true,
            midi_poll_interval_ms: 250,
            offline_sample_rate: 44100,
            offline_channels: 2,
            source_asset: None,
        }
    }
}

impl HostConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn midi_poll_interval(&self) -> Duration {
        Duration::from_millis(self.midi_poll_interval_ms)
    }

    pub fn offline_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.offline_sample_rate,
            channels: self.offline_channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = HostConfig::default();
        assert!(config.load_out_of_process);
        assert_eq!(config.midi_poll_interval(), Duration::from_millis(250));
        assert_eq!(config.offline_format(), StreamFormat::stereo(44100));
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: HostConfig =
            toml::from_str("midi_poll_interval_ms = 50\noffline_sample_rate = 48000").unwrap();
        assert_eq!(config.midi_poll_interval_ms, 50);
        assert_eq!(config.offline_sample_rate, 48000);
        assert!(config.load_out_of_process);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<HostConfig>("midi_pool_interval_ms = 50").is_err());
    }

    #[test]
    fn from_path_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchbay.toml");
        fs::write(&path, "load_out_of_process = false").unwrap();
        let config = HostConfig::from_path(&path).unwrap();
        assert!(!config.load_out_of_process);
        assert!(HostConfig::from_path(&dir.path().join("missing.toml")).is_err());
    }
}
