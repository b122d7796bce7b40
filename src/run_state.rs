use crate::timestamp::Timestamp;
use crate::tone_config::ToneConfig;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RunState {
    pub is_running: bool,
    pub last_ping_time: Option<Timestamp>,
}

impl RunState {
    /// `None` while stopped or before the first ping.
    pub fn next_ping_time(&self, config: &ToneConfig) -> Option<Timestamp> {
        if !self.is_running {
            return None;
        }

        self.last_ping_time
            .map(|last_ping| last_ping + config.interval())
    }

    /// A running state whose next ping is missing or not in the future.
    pub fn is_overdue(&self, config: &ToneConfig, now: Timestamp) -> bool {
        self.is_running
            && match self.next_ping_time(config) {
                Some(next_ping) => next_ping < now,
                None => true,
            }
    }
}

/// Everything the controller owns; restored as a whole and saved on mutation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ControllerState {
    pub config: ToneConfig,
    pub run: RunState,
}

impl ControllerState {
    pub fn next_ping_time(&self) -> Option<Timestamp> {
        self.run.next_ping_time(&self.config)
    }
}
