use crate::alarms::{AlarmFired, Alarms, KEEP_ALIVE_ALARM};
use crate::error::{Error, ErrorKind};
use crate::keep_alive_config::KeepAliveConfig;
use crate::message::{PanelEvent, RendererCommand, RendererEvent, Request, Response, Status};
use crate::renderer::RendererHandle;
use crate::run_state::ControllerState;
use crate::sink::SinkFactory;
use crate::storage::{self, Storage};
use crate::timestamp::Timestamp;
use crate::tone_config::ToneConfig;

use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{unbounded_channel, Receiver, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

pub const TEST_TONE_FREQUENCY: u32 = 1_000;
pub const TEST_TONE_DURATION_MS: u64 = 1_000;

pub enum ControllerMessage {
    Request {
        request: Request,
        reply: Option<oneshot::Sender<Response>>,
    },
    /// Tears the controller down as the host would: persisted state and
    /// registered wake-ups stay behind for the next controller to restore.
    Shutdown { done: oneshot::Sender<()> },
}

/// Owns the run state and configuration, drives the recurring wake-up and
/// asks the tone renderer to play.
///
/// A controller may be torn down at any time. Whatever it needs to carry on
/// is written to storage on every mutation and picked up again by
/// [`Controller::restore`] in the next instance.
pub struct Controller {
    state: ControllerState,
    settings: KeepAliveConfig,
    receiver: Receiver<ControllerMessage>,
    storage: Arc<dyn Storage>,
    alarms: Alarms,
    alarm_receiver: UnboundedReceiver<AlarmFired>,
    sink_factory: SinkFactory,
    renderer: Option<RendererHandle>,
    renderer_event_sender: UnboundedSender<RendererEvent>,
    renderer_events: UnboundedReceiver<RendererEvent>,
    panel_events: broadcast::Sender<PanelEvent>,
    heartbeat: Option<Interval>,
}

impl Controller {
    pub fn new(
        settings: KeepAliveConfig,
        receiver: Receiver<ControllerMessage>,
        storage: Arc<dyn Storage>,
        alarms: Alarms,
        sink_factory: SinkFactory,
        panel_events: broadcast::Sender<PanelEvent>,
    ) -> Self {
        let (alarm_sender, alarm_receiver) = unbounded_channel();
        alarms.attach(alarm_sender);

        let (renderer_event_sender, renderer_events) = unbounded_channel();

        Self {
            state: ControllerState::default(),
            settings,
            receiver,
            storage,
            alarms,
            alarm_receiver,
            sink_factory,
            renderer: None,
            renderer_event_sender,
            renderer_events,
            panel_events,
            heartbeat: None,
        }
    }

    /// Starts pinging: one tone now, then one per interval.
    ///
    /// While already running this only adopts and persists `config`; the
    /// wake-up keeps its old period until the next `update_config`.
    pub async fn start(&mut self, config: ToneConfig) -> Response {
        if let Err(error) = config.validate() {
            log::warn!("refusing to start: {}", error);
            return Response::rejected();
        }

        self.state.config = config;
        self.persist(move |storage| storage::save_config(storage, &config))
            .await;

        if self.state.run.is_running {
            log::info!("already running, adopted new config without rescheduling");
            return Response::ok();
        }

        self.state.run.is_running = true;
        self.persist(|storage| storage::save_running(storage, true))
            .await;
        self.start_heartbeat();

        self.play_tone().await;
        self.alarms.create(KEEP_ALIVE_ALARM, config.interval());

        log::info!(
            "keep-alive started: {} Hz for {} ms every {} min",
            config.frequency,
            config.duration_ms,
            config.interval_minutes
        );

        self.broadcast(PanelEvent::StatusChanged {
            is_running: true,
            next_ping_time: self.state.next_ping_time(),
        });

        Response::ok()
    }

    pub async fn stop(&mut self) -> Response {
        let was_running = self.state.run.is_running;

        self.state.run.is_running = false;
        self.heartbeat = None;
        self.persist(|storage| storage::save_running(storage, false))
            .await;

        self.alarms.clear(KEEP_ALIVE_ALARM);
        if self.renderer.take().is_some() {
            log::debug!("released tone renderer");
        }

        self.state.run.last_ping_time = None;
        self.persist(|storage| storage::save_last_ping(storage, None))
            .await;

        if was_running {
            log::info!("keep-alive stopped");
        }

        self.broadcast(PanelEvent::StatusChanged {
            is_running: false,
            next_ping_time: None,
        });

        Response::ok()
    }

    pub async fn update_config(&mut self, config: ToneConfig) -> Response {
        if let Err(error) = config.validate() {
            log::warn!("refusing config update: {}", error);
            return Response::rejected();
        }

        self.state.config = config;
        self.persist(move |storage| storage::save_config(storage, &config))
            .await;

        if self.state.run.is_running {
            self.alarms.clear(KEEP_ALIVE_ALARM);
            self.alarms.create(KEEP_ALIVE_ALARM, config.interval());

            let last_ping_time = Some(Timestamp::now());
            self.state.run.last_ping_time = last_ping_time;
            self.persist(move |storage| storage::save_last_ping(storage, last_ping_time))
                .await;
        }

        Response::Ack {
            success: true,
            next_ping_time: self.state.next_ping_time(),
        }
    }

    pub fn status(&self) -> Status {
        Status {
            is_running: self.state.run.is_running,
            config: self.state.config,
            next_ping_time: self.state.next_ping_time(),
            last_ping_time: self.state.run.last_ping_time,
        }
    }

    /// Plays the audible test tone. Leaves the run state and schedule alone.
    pub async fn play_test(&mut self, config: ToneConfig) -> Response {
        log::debug!("test tone requested while panel shows {:?}", config);

        self.send_to_renderer(RendererCommand::PlayTone {
            frequency: TEST_TONE_FREQUENCY,
            duration: TEST_TONE_DURATION_MS,
            volume: self.settings.volume,
        })
        .await;

        Response::ok()
    }

    pub async fn on_wake_up(&mut self, fired: &AlarmFired) {
        if fired.name == KEEP_ALIVE_ALARM && self.state.run.is_running {
            self.play_tone().await;
        }
    }

    pub async fn on_heartbeat(&mut self) {
        let now = Timestamp::now();
        self.persist(move |storage| storage::save_heartbeat(storage, now))
            .await;

        if self.state.run.is_running && !self.alarms.exists(KEEP_ALIVE_ALARM) {
            log::info!("keep-alive alarm lost, recreating");
            self.alarms
                .create(KEEP_ALIVE_ALARM, self.state.config.interval());
        }
    }

    /// Picks up where a previous controller left off.
    ///
    /// A ping that fell due while no controller was alive is played right
    /// away rather than skipped.
    pub async fn restore(&mut self) {
        let shared = self.storage.clone();
        let loaded = tokio::task::spawn_blocking(move || storage::load_state(shared.as_ref()))
            .await
            .unwrap_or_else(|error| {
                Err(Error::new(
                    ErrorKind::InternalFailure,
                    format!("storage task failed: {}", error),
                ))
            });

        let stored = match loaded {
            Ok(stored) => stored,
            Err(error) => {
                log::error!("failed to load persisted state: {}", error);
                return;
            }
        };

        self.state.config = stored.config;
        if !stored.run.is_running {
            return;
        }

        self.state = stored;
        self.start_heartbeat();

        if !self.alarms.exists(KEEP_ALIVE_ALARM) {
            log::info!("restoring keep-alive alarm after restart");
            self.alarms
                .create(KEEP_ALIVE_ALARM, self.state.config.interval());
        }

        if self
            .state
            .run
            .is_overdue(&self.state.config, Timestamp::now())
        {
            log::info!("missed ping during downtime, pinging now");
            self.play_tone().await;
        }
    }

    pub async fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::Start { config } => self.start(config).await,
            Request::Stop => self.stop().await,
            Request::GetStatus => Response::Status(self.status()),
            Request::UpdateConfig { config } => self.update_config(config).await,
            Request::PlayTest { config } => self.play_test(config).await,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(ControllerMessage::Request { request, reply }) => {
                        let response = self.handle(request).await;
                        if let Some(reply) = reply {
                            if reply.send(response).is_err() {
                                log::debug!("requester went away before the reply");
                            }
                        }
                    }
                    Some(ControllerMessage::Shutdown { done }) => {
                        self.teardown();
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.teardown();
                        return;
                    }
                },
                Some(fired) = self.alarm_receiver.recv() => self.on_wake_up(&fired).await,
                Some(event) = self.renderer_events.recv() => match event {
                    RendererEvent::ToneComplete => log::debug!("tone complete"),
                },
                _ = next_tick(&mut self.heartbeat) => self.on_heartbeat().await,
            }
        }
    }

    async fn play_tone(&mut self) {
        let now = Timestamp::now();
        self.state.run.last_ping_time = Some(now);

        let config = self.state.config;
        self.send_to_renderer(RendererCommand::PlayTone {
            frequency: config.frequency,
            duration: config.duration_ms,
            volume: self.settings.volume,
        })
        .await;

        self.broadcast(PanelEvent::TonePlayed {
            last_ping_time: now,
        });
        self.persist(move |storage| storage::save_last_ping(storage, Some(now)))
            .await;
    }

    async fn renderer(&mut self) -> Result<RendererHandle, Error> {
        if let Some(renderer) = &self.renderer {
            return Ok(renderer.clone());
        }

        let renderer = RendererHandle::spawn(
            self.sink_factory.clone(),
            self.renderer_event_sender.clone(),
            self.settings.command_channel_boundary,
        )
        .await?;
        self.renderer = Some(renderer.clone());
        Ok(renderer)
    }

    async fn try_send(&mut self, command: RendererCommand) -> Result<(), Error> {
        self.renderer().await?.send(command).await
    }

    /// Sends once, and once more after a short delay if the renderer went
    /// away or could not be started. A second failure drops the tone.
    async fn send_to_renderer(&mut self, command: RendererCommand) {
        if let Err(error) = self.try_send(command).await {
            log::debug!("retrying tone after failed send: {}", error);
            self.renderer = None;
            tokio::time::sleep(self.settings.renderer_retry_delay()).await;

            if let Err(error) = self.try_send(command).await {
                log::warn!("giving up on tone: {}", error);
                self.renderer = None;
            }
        }
    }

    fn broadcast(&self, event: PanelEvent) {
        if self.panel_events.send(event).is_err() {
            log::debug!("no panel listening for {:?}", event);
        }
    }

    fn start_heartbeat(&mut self) {
        if self.heartbeat.is_some() {
            return;
        }

        let period = self.settings.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
    }

    /// Runs a storage write on the blocking pool; file-backed stores do
    /// synchronous I/O. Writes are awaited one at a time, so they land in order.
    fn persist<F>(&self, write: F) -> impl Future<Output = ()>
    where
        F: FnOnce(&dyn Storage) -> Result<(), Error> + Send + 'static,
    {
        let storage = self.storage.clone();
        async move {
            match tokio::task::spawn_blocking(move || write(storage.as_ref())).await {
                Ok(Ok(_)) => {}
                Ok(Err(error)) => log::error!("failed to persist controller state: {}", error),
                Err(error) => log::error!("storage task failed: {}", error),
            }
        }
    }

    fn teardown(&mut self) {
        self.alarms.detach();
        self.heartbeat = None;
        self.renderer = None;
        log::info!("controller torn down");
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(heartbeat) => {
            heartbeat.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use crate::storage::{MemoryStorage, HEARTBEAT_KEY, LAST_PING_KEY, RUNNING_KEY};
    use crate::synth::Tone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::{channel, error::TryRecvError, Sender};

    const SAMPLE_RATE: u32 = 8_000;
    const TOLERANCE_MS: u64 = 2_000;

    struct Harness {
        controller: Controller,
        storage: Arc<MemoryStorage>,
        alarms: Alarms,
        tones: UnboundedReceiver<Tone>,
        _sender: Sender<ControllerMessage>,
        _events: broadcast::Receiver<PanelEvent>,
    }

    fn harness_with(storage: Arc<MemoryStorage>, alarms: Alarms) -> Harness {
        let (tone_sender, tones) = unbounded_channel();
        harness_with_sink(
            storage,
            alarms,
            ChannelSink::factory(SAMPLE_RATE, tone_sender),
            tones,
        )
    }

    fn harness_with_sink(
        storage: Arc<MemoryStorage>,
        alarms: Alarms,
        sink_factory: SinkFactory,
        tones: UnboundedReceiver<Tone>,
    ) -> Harness {
        let settings = KeepAliveConfig {
            renderer_retry_delay_in_millis: 10,
            ..KeepAliveConfig::default()
        };
        let (sender, receiver) = channel(8);
        let (panel_events, events) = broadcast::channel(16);

        let controller = Controller::new(
            settings,
            receiver,
            storage.clone(),
            alarms.clone(),
            sink_factory,
            panel_events,
        );

        Harness {
            controller,
            storage,
            alarms,
            tones,
            _sender: sender,
            _events: events,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryStorage::new()), Alarms::new())
    }

    fn assert_close(actual: Option<Timestamp>, expected: Timestamp) {
        let actual = actual.expect("timestamp should be set").as_millis();
        let expected = expected.as_millis();
        assert!(
            actual.abs_diff(expected) <= TOLERANCE_MS,
            "{} not within {} ms of {}",
            actual,
            TOLERANCE_MS,
            expected
        );
    }

    fn seed_running(storage: &MemoryStorage, config: ToneConfig, last_ping: Timestamp) {
        storage::save_config(storage, &config).unwrap();
        storage::save_running(storage, true).unwrap();
        storage::save_last_ping(storage, Some(last_ping)).unwrap();
    }

    fn minutes_ago(minutes: u64) -> Timestamp {
        Timestamp::from_millis(Timestamp::now().as_millis() - minutes * 60_000)
    }

    #[tokio::test]
    async fn start_plays_immediately_and_schedules_wake_up() {
        let mut harness = harness();
        let config = ToneConfig::new(20_000, 200, 4);

        let response = harness.controller.start(config).await;
        assert_eq!(response, Response::ok());

        let tone = harness.tones.recv().await.unwrap();
        assert_eq!(tone.frequency, 20_000);
        assert_eq!(tone.duration, Duration::from_millis(200));

        assert_eq!(
            harness.alarms.period(KEEP_ALIVE_ALARM),
            Some(Duration::from_secs(240))
        );

        let status = harness.controller.status();
        assert!(status.is_running);
        assert_eq!(status.config, config);
        assert_close(
            status.next_ping_time,
            Timestamp::now() + Duration::from_secs(240),
        );
        assert_eq!(
            harness.storage.get(RUNNING_KEY).unwrap(),
            Some(serde_json::Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn invalid_config_is_not_applied() {
        let mut harness = harness();

        let response = harness.controller.start(ToneConfig::new(0, 200, 4)).await;

        assert_eq!(response, Response::rejected());
        assert!(!harness.controller.status().is_running);
        assert!(!harness.alarms.exists(KEEP_ALIVE_ALARM));
    }

    #[tokio::test]
    async fn stopping_twice_leaves_the_same_state() {
        let mut harness = harness();
        harness.controller.start(ToneConfig::default()).await;

        harness.controller.stop().await;
        let after_first = harness.controller.status();
        harness.controller.stop().await;
        let after_second = harness.controller.status();

        assert_eq!(after_first, after_second);
        assert!(!after_second.is_running);
        assert_eq!(after_second.next_ping_time, None);
        assert_eq!(after_second.last_ping_time, None);
        assert!(!harness.alarms.exists(KEEP_ALIVE_ALARM));
    }

    #[tokio::test]
    async fn update_while_running_resets_the_anchor() {
        let mut harness = harness();
        harness.controller.start(ToneConfig::new(20_000, 200, 4)).await;
        harness.controller.state.run.last_ping_time = Some(minutes_ago(3));

        let response = harness
            .controller
            .update_config(ToneConfig::new(19_000, 200, 10))
            .await;

        let expected = Timestamp::now() + Duration::from_secs(600);
        match response {
            Response::Ack {
                success,
                next_ping_time,
            } => {
                assert!(success);
                assert_close(next_ping_time, expected);
            }
            other => panic!("unexpected response {:?}", other),
        }
        assert_close(harness.controller.status().next_ping_time, expected);
        assert_eq!(
            harness.alarms.period(KEEP_ALIVE_ALARM),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn update_while_stopped_only_stores_config() {
        let mut harness = harness();
        let config = ToneConfig::new(100, 500, 2);

        harness.controller.update_config(config).await;

        assert_eq!(harness.controller.status().next_ping_time, None);
        assert!(!harness.alarms.exists(KEEP_ALIVE_ALARM));
        assert_eq!(
            storage::load_state(harness.storage.as_ref()).unwrap().config,
            config
        );
    }

    #[tokio::test]
    async fn test_tone_does_not_touch_run_state() {
        let mut harness = harness();
        harness.controller.start(ToneConfig::new(20_000, 200, 4)).await;
        harness.tones.recv().await.unwrap();
        let before = harness.controller.status();

        harness
            .controller
            .play_test(ToneConfig::new(1_000, 1_000, 4))
            .await;

        let tone = harness.tones.recv().await.unwrap();
        assert_eq!(tone.frequency, TEST_TONE_FREQUENCY);
        assert_eq!(tone.samples.len(), SAMPLE_RATE as usize);
        assert_eq!(harness.controller.status(), before);
    }

    #[tokio::test]
    async fn wake_up_plays_only_while_running() {
        let mut harness = harness();
        let fired = AlarmFired {
            name: KEEP_ALIVE_ALARM.to_string(),
        };

        harness.controller.on_wake_up(&fired).await;
        assert_eq!(harness.tones.try_recv().unwrap_err(), TryRecvError::Empty);

        harness.controller.start(ToneConfig::default()).await;
        harness.tones.recv().await.unwrap();
        harness.controller.on_wake_up(&fired).await;
        assert_eq!(harness.tones.recv().await.unwrap().frequency, 20_000);
    }

    #[tokio::test]
    async fn restore_after_missed_ping_plays_exactly_once() {
        let storage = Arc::new(MemoryStorage::new());
        seed_running(&storage, ToneConfig::new(20_000, 200, 4), minutes_ago(10));
        let mut harness = harness_with(storage, Alarms::new());

        harness.controller.restore().await;

        harness.tones.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.tones.try_recv().unwrap_err(), TryRecvError::Empty);

        assert!(harness.controller.status().is_running);
        assert!(harness.alarms.exists(KEEP_ALIVE_ALARM));
        assert_close(
            harness.controller.status().last_ping_time,
            Timestamp::now(),
        );
    }

    #[tokio::test]
    async fn restore_before_due_time_does_not_play() {
        let storage = Arc::new(MemoryStorage::new());
        let last_ping = minutes_ago(1);
        seed_running(&storage, ToneConfig::new(20_000, 200, 4), last_ping);
        let mut harness = harness_with(storage, Alarms::new());

        harness.controller.restore().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.tones.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(harness.controller.status().last_ping_time, Some(last_ping));
        assert!(harness.alarms.exists(KEEP_ALIVE_ALARM));
    }

    #[tokio::test]
    async fn restore_keeps_a_surviving_alarm() {
        let storage = Arc::new(MemoryStorage::new());
        seed_running(&storage, ToneConfig::new(20_000, 200, 4), minutes_ago(1));
        let alarms = Alarms::new();
        alarms.create(KEEP_ALIVE_ALARM, Duration::from_secs(180));
        let mut harness = harness_with(storage, alarms);

        harness.controller.restore().await;

        assert_eq!(
            harness.alarms.period(KEEP_ALIVE_ALARM),
            Some(Duration::from_secs(180))
        );
    }

    #[tokio::test]
    async fn restore_replaces_an_out_of_range_stored_interval() {
        for interval in [0, u64::MAX / 2] {
            let storage = Arc::new(MemoryStorage::new());
            storage
                .set(&[(
                    storage::CONFIG_KEY,
                    serde_json::json!({"frequency": 20000, "duration": 200, "interval": interval}),
                )])
                .unwrap();
            storage::save_running(storage.as_ref(), true).unwrap();
            storage::save_last_ping(storage.as_ref(), Some(minutes_ago(1))).unwrap();
            let mut harness = harness_with(storage, Alarms::new());

            harness.controller.restore().await;
            tokio::time::sleep(Duration::from_millis(20)).await;

            let status = harness.controller.status();
            assert!(status.is_running);
            assert_eq!(status.config, ToneConfig::default());
            assert!(harness.alarms.exists(KEEP_ALIVE_ALARM));
            assert_eq!(
                harness.alarms.period(KEEP_ALIVE_ALARM),
                Some(Duration::from_secs(240))
            );
        }
    }

    #[tokio::test]
    async fn heartbeat_replaces_an_ended_alarm() {
        let mut harness = harness();
        harness.controller.start(ToneConfig::new(20_000, 200, 5)).await;
        harness.alarms.create(KEEP_ALIVE_ALARM, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;

        harness.controller.on_heartbeat().await;

        assert!(harness.alarms.exists(KEEP_ALIVE_ALARM));
        assert_eq!(
            harness.alarms.period(KEEP_ALIVE_ALARM),
            Some(Duration::from_secs(300))
        );
    }

    #[tokio::test]
    async fn restore_while_stopped_only_adopts_config() {
        let storage = Arc::new(MemoryStorage::new());
        let config = ToneConfig::new(50, 300, 9);
        storage::save_config(storage.as_ref(), &config).unwrap();
        let mut harness = harness_with(storage, Alarms::new());

        harness.controller.restore().await;

        let status = harness.controller.status();
        assert!(!status.is_running);
        assert_eq!(status.config, config);
        assert!(!harness.alarms.exists(KEEP_ALIVE_ALARM));
    }

    #[tokio::test]
    async fn heartbeat_records_liveness_and_heals_lost_alarm() {
        let mut harness = harness();
        harness.controller.start(ToneConfig::new(20_000, 200, 5)).await;
        harness.alarms.clear(KEEP_ALIVE_ALARM);

        harness.controller.on_heartbeat().await;

        assert_eq!(
            harness.alarms.period(KEEP_ALIVE_ALARM),
            Some(Duration::from_secs(300))
        );
        assert!(harness.storage.get(HEARTBEAT_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn heartbeat_while_stopped_does_not_schedule() {
        let mut harness = harness();

        harness.controller.on_heartbeat().await;

        assert!(!harness.alarms.exists(KEEP_ALIVE_ALARM));
    }

    #[tokio::test]
    async fn tone_is_retried_once_when_renderer_went_away() {
        let mut harness = harness();
        let (dead_sender, dead_receiver) = channel(1);
        drop(dead_receiver);
        harness.controller.renderer = Some(RendererHandle::from_sender(dead_sender));

        harness.controller.start(ToneConfig::default()).await;

        assert_eq!(harness.tones.recv().await.unwrap().frequency, 20_000);
        assert!(harness.storage.get(LAST_PING_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn tone_is_dropped_after_two_failed_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let factory: SinkFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::new(ErrorKind::AudioFailure, "no output device"))
        });
        let (_tone_sender, tones) = unbounded_channel();
        let mut harness =
            harness_with_sink(Arc::new(MemoryStorage::new()), Alarms::new(), factory, tones);

        let response = harness.controller.start(ToneConfig::default()).await;

        assert_eq!(response, Response::ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(harness.controller.renderer.is_none());
        assert!(harness.controller.status().is_running);
        assert!(harness.alarms.exists(KEEP_ALIVE_ALARM));
        assert!(harness.storage.get(LAST_PING_KEY).unwrap().is_some());
    }
}
