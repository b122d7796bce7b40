use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioOutput {
    /// Synthesize tones but discard them.
    #[default]
    Silent,
    /// Play through the default output device (`cpal_sink` feature).
    Device,
}

/// Process-level settings of the keep-alive daemon.
#[derive(Deserialize, Serialize, Clone, PartialEq, Debug)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub storage_path: PathBuf,

    pub heartbeat_interval_in_seconds: u64,
    pub renderer_retry_delay_in_millis: u64,

    pub volume: f32,
    pub sample_rate: u32,
    pub audio_output: AudioOutput,

    pub command_channel_boundary: usize,
    pub event_channel_boundary: usize,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("speaker-keepalive.json"),
            heartbeat_interval_in_seconds: 20,
            renderer_retry_delay_in_millis: 100,
            volume: 0.5,
            sample_rate: 48_000,
            audio_output: AudioOutput::Silent,
            command_channel_boundary: 64,
            event_channel_boundary: 64,
        }
    }
}

impl KeepAliveConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_in_seconds)
    }

    pub fn renderer_retry_delay(&self) -> Duration {
        Duration::from_millis(self.renderer_retry_delay_in_millis)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read(path).map_err(|error| {
            Error::new(
                ErrorKind::InvalidConfig,
                format!("failed to read {}: {}", path.display(), error),
            )
        })?;

        let config: KeepAliveConfig = serde_json::from_slice(&raw).map_err(|error| {
            Error::new(
                ErrorKind::InvalidConfig,
                format!("failed to parse {}: {}", path.display(), error),
            )
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.heartbeat_interval_in_seconds == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "heartbeat interval must be at least one second",
            ));
        }

        if self.sample_rate == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "sample rate must be positive",
            ));
        }

        if self.command_channel_boundary == 0 || self.event_channel_boundary == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "channel boundaries must be positive",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: KeepAliveConfig =
            serde_json::from_str(r#"{"heartbeat_interval_in_seconds": 5, "audio_output": "device"}"#)
                .unwrap();

        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.audio_output, AudioOutput::Device);
        assert_eq!(config.renderer_retry_delay(), Duration::from_millis(100));
        assert_eq!(config.sample_rate, 48_000);
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let config = KeepAliveConfig {
            heartbeat_interval_in_seconds: 0,
            ..KeepAliveConfig::default()
        };

        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidConfig);
    }
}
