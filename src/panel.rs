//! Control panel model: what the user sees and the commands they issue.
//!
//! The countdown kept here is a display estimate only. The controller's
//! wake-up schedule is authoritative and never reads anything from the panel.

use crate::controller_client::ControllerClient;
use crate::error::Error;
use crate::message::{PanelEvent, Status};
use crate::timestamp::Timestamp;
use crate::tone_config::{self, ToneConfig};

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};

pub const BAR_COUNT: usize = 9;
pub const RESTING_BARS: [u8; BAR_COUNT] = [20, 40, 60, 80, 100, 80, 60, 40, 20];
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);
pub const VISUALIZER_TICK: Duration = Duration::from_millis(100);
/// How far ahead an overdue ping is assumed to land.
pub const OVERDUE_ESTIMATE: Duration = Duration::from_secs(5);
/// How long the test button stays in its "playing" state.
pub const TEST_BUTTON_HOLD: Duration = Duration::from_secs(1);

/// Best guess of the next ping for display, from a freshly fetched status.
pub fn estimate_next_ping(status: &Status, now: Timestamp) -> Option<Timestamp> {
    if let Some(next_ping) = status.next_ping_time {
        if next_ping > now {
            return Some(next_ping);
        }
    }

    if !status.is_running {
        return None;
    }

    match status.last_ping_time {
        Some(last_ping) => {
            let next_ping = last_ping + status.config.interval();
            if next_ping > now {
                Some(next_ping)
            } else {
                Some(now + OVERDUE_ESTIMATE)
            }
        }
        None => Some(now + status.config.interval()),
    }
}

pub fn format_remaining(remaining: Duration) -> String {
    let total_seconds = remaining.as_secs();
    format!("{}m {:02}s", total_seconds / 60, total_seconds % 60)
}

pub fn format_frequency(frequency: u32) -> String {
    if frequency >= 1_000 {
        format!("{} kHz", frequency as f64 / 1_000.0)
    } else {
        format!("{} Hz", frequency)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Badge {
    pub text: &'static str,
    pub color: &'static str,
}

impl Badge {
    pub fn for_running(is_running: bool) -> Self {
        if is_running {
            Badge {
                text: "ON",
                color: "#2ed573",
            }
        } else {
            Badge {
                text: "",
                color: "#ff4757",
            }
        }
    }
}

/// Nine amplitude bars that jitter while a tone is playing.
#[derive(Clone, Debug)]
pub struct Visualizer {
    bars: [u8; BAR_COUNT],
    active_until: Option<Instant>,
}

impl Default for Visualizer {
    fn default() -> Self {
        Self {
            bars: RESTING_BARS,
            active_until: None,
        }
    }
}

impl Visualizer {
    pub fn trigger(&mut self, now: Instant, duration: Duration) {
        self.active_until = Some(now + duration);
    }

    pub fn is_active(&self) -> bool {
        self.active_until.is_some()
    }

    pub fn bars(&self) -> [u8; BAR_COUNT] {
        self.bars
    }

    /// Randomizes the bars while active, then settles back to the arch.
    pub fn tick<R: Rng>(&mut self, now: Instant, rng: &mut R) {
        match self.active_until {
            Some(until) if now < until => {
                for bar in self.bars.iter_mut() {
                    *bar = rng.gen_range(20..=100);
                }
            }
            Some(_) => {
                self.active_until = None;
                self.bars = RESTING_BARS;
            }
            None => (),
        }
    }
}

/// Everything needed to draw the panel.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PanelView {
    pub status_text: &'static str,
    pub toggle_label: &'static str,
    pub countdown: String,
    pub bars: [u8; BAR_COUNT],
    pub badge: Badge,
    pub frequency: String,
    pub duration: String,
    pub interval: String,
    pub frequency_info: String,
    pub test_playing: bool,
}

pub struct ControlPanel {
    client: ControllerClient,
    config: ToneConfig,
    is_running: bool,
    next_ping_time: Option<Timestamp>,
    countdown: String,
    visualizer: Visualizer,
    test_playing_until: Option<Instant>,
}

impl ControlPanel {
    pub fn new(client: ControllerClient) -> Self {
        Self {
            client,
            config: ToneConfig::default(),
            is_running: false,
            next_ping_time: None,
            countdown: "Not running".to_string(),
            visualizer: Visualizer::default(),
            test_playing_until: None,
        }
    }

    /// Points the panel at a new controller, e.g. after a restart.
    pub fn reconnect(&mut self, client: ControllerClient) {
        self.client = client;
    }

    pub fn client(&self) -> &ControllerClient {
        &self.client
    }

    pub fn config(&self) -> ToneConfig {
        self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn next_ping_time(&self) -> Option<Timestamp> {
        self.next_ping_time
    }

    /// Fetches the controller's status and re-derives the display estimate.
    pub async fn open(&mut self) -> Result<(), Error> {
        let status = self.client.get_status().await?;
        self.apply_status(&status, Timestamp::now());
        self.refresh_countdown(Timestamp::now(), Instant::now());
        Ok(())
    }

    pub fn apply_status(&mut self, status: &Status, now: Timestamp) {
        self.is_running = status.is_running;
        self.config = status.config;
        self.next_ping_time = estimate_next_ping(status, now);
    }

    pub fn on_event(&mut self, event: PanelEvent, now: Instant) {
        match event {
            PanelEvent::StatusChanged {
                is_running,
                next_ping_time,
            } => {
                self.is_running = is_running;
                if !is_running {
                    self.next_ping_time = None;
                } else if next_ping_time.is_some() {
                    self.next_ping_time = next_ping_time;
                }
            }
            PanelEvent::TonePlayed { last_ping_time } => {
                self.visualizer.trigger(now, self.config.duration());
                if self.is_running {
                    self.next_ping_time = Some(last_ping_time + self.config.interval());
                }
            }
        }
    }

    /// Advances the 1 s countdown. An elapsed estimate shows "Pinging now..."
    /// and rolls over to a full interval from `wall_now`.
    pub fn refresh_countdown(&mut self, wall_now: Timestamp, now: Instant) {
        self.countdown = match (self.is_running, self.next_ping_time) {
            (true, Some(next_ping)) => match next_ping.remaining_since(wall_now) {
                Some(remaining) => format_remaining(remaining),
                None => {
                    self.visualizer.trigger(now, self.config.duration());
                    self.next_ping_time = Some(wall_now + self.config.interval());
                    "Pinging now...".to_string()
                }
            },
            _ => "Not running".to_string(),
        };
    }

    pub fn animate<R: Rng>(&mut self, now: Instant, rng: &mut R) {
        self.visualizer.tick(now, rng);
        if matches!(self.test_playing_until, Some(until) if now >= until) {
            self.test_playing_until = None;
        }
    }

    pub async fn toggle(&mut self) -> Result<(), Error> {
        if self.is_running {
            self.client.stop().await?;
            self.is_running = false;
            self.next_ping_time = None;
        } else {
            self.client.start(self.config).await?;
            self.is_running = true;
            self.next_ping_time = Some(Timestamp::now() + self.config.interval());
        }

        self.refresh_countdown(Timestamp::now(), Instant::now());
        Ok(())
    }

    pub async fn set_frequency(&mut self, frequency: u32) -> Result<(), Error> {
        let config = ToneConfig {
            frequency,
            ..self.config
        };
        self.apply_config(config).await
    }

    pub async fn set_duration(&mut self, duration_ms: u64) -> Result<(), Error> {
        let config = ToneConfig {
            duration_ms,
            ..self.config
        };
        self.apply_config(config).await
    }

    pub async fn set_interval(&mut self, interval_minutes: u64) -> Result<(), Error> {
        let config = ToneConfig {
            interval_minutes,
            ..self.config
        };
        self.apply_config(config).await
    }

    /// Adopts `config` locally and pushes it to the controller while running.
    pub async fn apply_config(&mut self, config: ToneConfig) -> Result<(), Error> {
        config.validate()?;
        self.config = config;

        if self.is_running {
            if let Some(next_ping) = self.client.update_config(config).await? {
                self.next_ping_time = Some(next_ping);
                self.refresh_countdown(Timestamp::now(), Instant::now());
            }
        }

        Ok(())
    }

    /// Returns `false` when a previous test tone is still showing as playing.
    pub async fn play_test(&mut self) -> Result<bool, Error> {
        if self.test_playing_until.is_some() {
            return Ok(false);
        }

        self.client.play_test(self.config).await?;

        let now = Instant::now();
        self.test_playing_until = Some(now + TEST_BUTTON_HOLD);
        self.visualizer.trigger(now, self.config.duration());
        Ok(true)
    }

    pub fn view(&self) -> PanelView {
        let preset = tone_config::preset_for(self.config.frequency);

        PanelView {
            status_text: if self.is_running { "Active" } else { "Inactive" },
            toggle_label: if self.is_running {
                "Stop Keep-Alive"
            } else {
                "Start Keep-Alive"
            },
            countdown: if self.is_running {
                self.countdown.clone()
            } else {
                "Not running".to_string()
            },
            bars: self.visualizer.bars(),
            badge: Badge::for_running(self.is_running),
            frequency: format_frequency(self.config.frequency),
            duration: format!("{} ms", self.config.duration_ms),
            interval: format!("{} min", self.config.interval_minutes),
            frequency_info: format!("{}: {}", preset.title, preset.description),
            test_playing: self.test_playing_until.is_some(),
        }
    }
}

/// Keeps a shared panel in sync: applies controller events as they arrive
/// and redraws the countdown and visualizer on their own ticks.
pub async fn drive(panel: Arc<Mutex<ControlPanel>>, mut events: broadcast::Receiver<PanelEvent>) {
    let mut countdown = interval(COUNTDOWN_TICK);
    countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut animation = interval(VISUALIZER_TICK);
    animation.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => panel.lock().await.on_event(event, Instant::now()),
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("panel skipped {} stale events, re-reading status", skipped);
                    if let Err(error) = panel.lock().await.open().await {
                        log::warn!("failed to refresh panel: {}", error);
                    }
                }
                Err(RecvError::Closed) => {
                    log::debug!("controller event stream closed");
                    return;
                }
            },
            _ = countdown.tick() => {
                panel
                    .lock()
                    .await
                    .refresh_countdown(Timestamp::now(), Instant::now());
            }
            _ = animation.tick() => {
                let mut panel = panel.lock().await;
                panel.animate(Instant::now(), &mut rand::thread_rng());
            }
        }
    }
}
