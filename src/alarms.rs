use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const KEEP_ALIVE_ALARM: &str = "keepAlive";

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AlarmFired {
    pub name: String,
}

struct Entry {
    period: Duration,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    listener: Option<UnboundedSender<AlarmFired>>,
}

/// Registry of named recurring wake-ups.
///
/// Registrations outlive whoever created them: a controller that is torn down
/// only detaches its listener, and the wake-ups keep ticking until a new
/// listener attaches or they are cleared. Firings with no listener attached
/// are dropped.
#[derive(Clone, Default)]
pub struct Alarms {
    inner: Arc<Mutex<Inner>>,
}

impl Alarms {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn attach(&self, listener: UnboundedSender<AlarmFired>) {
        self.lock().listener = Some(listener);
    }

    pub fn detach(&self) {
        self.lock().listener = None;
    }

    /// Registers `name` to fire every `period`, first after one full period.
    /// Replaces an existing registration with the same name.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(&self, name: &str, period: Duration) {
        let weak_inner = Arc::downgrade(&self.inner);
        let alarm_name = name.to_string();
        let handle = tokio::spawn(fire_periodically(weak_inner, alarm_name, period));

        let previous = self
            .lock()
            .entries
            .insert(name.to_string(), Entry { period, handle });

        if let Some(previous) = previous {
            previous.handle.abort();
        }

        log::debug!("alarm {} scheduled every {:?}", name, period);
    }

    /// Returns whether a registration was removed.
    pub fn clear(&self, name: &str) -> bool {
        match self.lock().entries.remove(name) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&self) {
        for (_, entry) in self.lock().entries.drain() {
            entry.handle.abort();
        }
    }

    pub fn period(&self, name: &str) -> Option<Duration> {
        self.lock().entries.get(name).map(|entry| entry.period)
    }

    /// A registration whose task has ended no longer counts.
    pub fn exists(&self, name: &str) -> bool {
        self.lock()
            .entries
            .get(name)
            .map(|entry| !entry.handle.is_finished())
            .unwrap_or(false)
    }
}

async fn fire_periodically(inner: Weak<Mutex<Inner>>, name: String, period: Duration) {
    if period.is_zero() {
        log::error!("alarm {} has a zero period, not scheduling", name);
        return;
    }

    let start = match Instant::now().checked_add(period) {
        Some(start) => start,
        None => {
            log::error!("alarm {} period {:?} is out of range, not scheduling", name, period);
            return;
        }
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let listener = match inner.upgrade() {
            Some(inner) => {
                let inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                inner.listener.clone()
            }
            None => return,
        };

        match listener {
            Some(listener) => {
                if listener.send(AlarmFired { name: name.clone() }).is_err() {
                    log::debug!("alarm {} fired but its listener is gone", name);
                }
            }
            None => log::debug!("alarm {} fired with no listener attached", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_each_full_period() {
        let alarms = Alarms::new();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        alarms.attach(sender);

        let started = Instant::now();
        alarms.create(KEEP_ALIVE_ALARM, Duration::from_secs(60));

        let fired = receiver.recv().await.unwrap();
        assert_eq!(fired.name, KEEP_ALIVE_ALARM);
        assert!(started.elapsed() >= Duration::from_secs(60));

        receiver.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn recreating_replaces_the_period() {
        let alarms = Alarms::new();

        alarms.create(KEEP_ALIVE_ALARM, Duration::from_secs(60));
        alarms.create(KEEP_ALIVE_ALARM, Duration::from_secs(300));

        assert_eq!(alarms.period(KEEP_ALIVE_ALARM), Some(Duration::from_secs(300)));
        assert!(alarms.clear(KEEP_ALIVE_ALARM));
        assert!(!alarms.clear(KEEP_ALIVE_ALARM));
        assert!(!alarms.exists(KEEP_ALIVE_ALARM));
    }

    #[tokio::test]
    async fn ended_registration_does_not_count() {
        let alarms = Alarms::new();

        alarms.create(KEEP_ALIVE_ALARM, Duration::ZERO);
        for _ in 0..100 {
            if !alarms.exists(KEEP_ALIVE_ALARM) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!alarms.exists(KEEP_ALIVE_ALARM));

        alarms.create(KEEP_ALIVE_ALARM, Duration::from_secs(60));
        assert!(alarms.exists(KEEP_ALIVE_ALARM));
    }

    #[tokio::test(start_paused = true)]
    async fn registration_outlives_a_detached_listener() {
        let alarms = Alarms::new();
        let (first_sender, first_receiver) = mpsc::unbounded_channel();
        alarms.attach(first_sender);
        alarms.create(KEEP_ALIVE_ALARM, Duration::from_secs(60));

        alarms.detach();
        drop(first_receiver);
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(alarms.exists(KEEP_ALIVE_ALARM));

        let (second_sender, mut second_receiver) = mpsc::unbounded_channel();
        alarms.attach(second_sender);

        assert_eq!(second_receiver.recv().await.unwrap().name, KEEP_ALIVE_ALARM);
    }
}
