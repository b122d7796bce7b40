use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_FREQUENCY: u32 = 1;
pub const MAX_FREQUENCY: u32 = 24_000;
pub const MIN_DURATION_MS: u64 = 20;
pub const MAX_DURATION_MS: u64 = 5_000;
pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 60;

/// Parameters of the keep-alive tone and how often it is emitted.
#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct ToneConfig {
    /// Tone frequency in Hz.
    pub frequency: u32,
    /// Tone length in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Minutes between two tones.
    #[serde(rename = "interval")]
    pub interval_minutes: u64,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency: 20_000,
            duration_ms: 200,
            interval_minutes: 4,
        }
    }
}

impl ToneConfig {
    pub fn new(frequency: u32, duration_ms: u64, interval_minutes: u64) -> Self {
        Self {
            frequency,
            duration_ms,
            interval_minutes,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(MIN_FREQUENCY..=MAX_FREQUENCY).contains(&self.frequency) {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                format!(
                    "frequency {} Hz outside of {}..={} Hz",
                    self.frequency, MIN_FREQUENCY, MAX_FREQUENCY
                ),
            ));
        }

        if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&self.duration_ms) {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                format!(
                    "duration {} ms outside of {}..={} ms",
                    self.duration_ms, MIN_DURATION_MS, MAX_DURATION_MS
                ),
            ));
        }

        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&self.interval_minutes) {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                format!(
                    "interval {} min outside of {}..={} min",
                    self.interval_minutes, MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES
                ),
            ));
        }

        Ok(())
    }
}

pub struct FrequencyPreset {
    pub frequency: u32,
    pub title: &'static str,
    pub description: &'static str,
}

pub static FREQUENCY_PRESETS: [FrequencyPreset; 6] = [
    FrequencyPreset {
        frequency: 20_000,
        title: "20 kHz (Recommended)",
        description: "Above human hearing range. Most effective for bypassing filters while remaining inaudible. Works with most soundbars and Bluetooth speakers.",
    },
    FrequencyPreset {
        frequency: 19_000,
        title: "19 kHz (Safe)",
        description: "Slightly lower ultrasonic frequency. Use if 20kHz is filtered by your audio chain or if you have hearing sensitivity to high frequencies.",
    },
    FrequencyPreset {
        frequency: 1_000,
        title: "1 kHz (Test)",
        description: "Audible tone for testing. You'll hear a beep - use this to verify your speaker is receiving the signal before switching to ultrasonic.",
    },
    FrequencyPreset {
        frequency: 100,
        title: "100 Hz (Sub-bass)",
        description: "Low frequency rumble. May be filtered by some speakers but often effective for subwoofers and larger speakers.",
    },
    FrequencyPreset {
        frequency: 50,
        title: "50 Hz (Mid-bass)",
        description: "Low bass frequency. Balance between effectiveness and potential audibility. Try this if ultrasonic doesn't work.",
    },
    FrequencyPreset {
        frequency: 30,
        title: "30 Hz (Low-end)",
        description: "Deep sub-bass. Good for subwoofers but may be filtered by small speakers or soundbars without subwoofer.",
    },
];

/// Preset matching `frequency`, falling back to the recommended 20 kHz one.
pub fn preset_for(frequency: u32) -> &'static FrequencyPreset {
    FREQUENCY_PRESETS
        .iter()
        .find(|preset| preset.frequency == frequency)
        .unwrap_or(&FREQUENCY_PRESETS[0])
}
