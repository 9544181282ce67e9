//! Sleep/wake scheduling on the notification cache.
//!
//! While the agent has nothing to do, the relay polls the cache file that
//! an external poller maintains. New records (by dedup key) wake the
//! agent; a stale or long-missing cache force-wakes it so a dead poller
//! cannot keep it asleep forever.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use chrono::Local;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::WakeSource;
use crate::config::GlobalConfig;
use crate::files;
use crate::models::notification::NotificationRecord;
use crate::models::status::RelayStatus;
use crate::notify_format::format_notifications;
use crate::status::StatusWriter;
use crate::timer::RunTimer;

/// Message of the synthetic record raised for a stale cache.
pub const CACHE_STALE_MESSAGE: &str = "Notification cache stale \u{2014} waking to check status.";

/// Message of the synthetic record raised for a missing cache.
pub const CACHE_MISSING_MESSAGE: &str =
    "Notification cache missing \u{2014} poller may not be running.";

/// Timeout for a source acknowledgement call.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Scheduler bookkeeping that lives for the whole process.
///
/// Not persisted: after a restart every pending record wakes the agent
/// once more, which is safe.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Union of the dedup keys of every record seen so far.
    pub seen_keys: HashSet<String>,
    /// When the cache file was first found missing, reset when it returns.
    pub cache_missing_since: Option<Instant>,
}

impl SchedulerState {
    /// Record `record`'s keys; returns whether any of them was new.
    pub fn observe(&mut self, record: &NotificationRecord) -> bool {
        let keys = record.dedup_keys();
        if keys.iter().all(|key| self.seen_keys.contains(key)) {
            return false;
        }
        self.seen_keys.extend(keys);
        true
    }
}

/// Result of waiting on the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WakeResult {
    /// Whether something woke the agent before the budget ran out.
    pub woken: bool,
    /// Records that triggered the wake.
    pub notifications: Vec<NotificationRecord>,
}

/// Result of a full sleep/wake step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SleepResult {
    /// Whether the agent should be resumed.
    pub woken: bool,
    /// Message to resume it with.
    pub wake_message: String,
}

impl SleepResult {
    /// The budget ran out while asleep.
    #[must_use]
    pub fn not_woken() -> Self {
        Self::default()
    }

    /// Resume with `wake_message`.
    #[must_use]
    pub fn woken(wake_message: impl Into<String>) -> Self {
        Self {
            woken: true,
            wake_message: wake_message.into(),
        }
    }
}

/// Tells a collaborator service that a source's notifications were seen.
pub trait SourceAcknowledger: Send + Sync {
    /// Acknowledge `source` (e.g. `slack`). Failures are swallowed.
    fn acknowledge<'a>(&'a self, source: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Acknowledges sources over HTTP: `POST {base}/notifications/ack-{source}`.
#[derive(Debug, Clone)]
pub struct HttpAcknowledger {
    base_url: Option<String>,
    http: reqwest::Client,
}

impl HttpAcknowledger {
    /// Acknowledge against `base_url`; `None` disables acknowledgements.
    #[must_use]
    pub fn new(base_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(ACK_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!(%err, "falling back to default ack client");
                reqwest::Client::new()
            });
        Self { base_url, http }
    }

    /// Endpoint acknowledging `source`.
    #[must_use]
    pub fn ack_url(base_url: &str, source: &str) -> String {
        format!("{}/notifications/ack-{source}", base_url.trim_end_matches('/'))
    }
}

impl SourceAcknowledger for HttpAcknowledger {
    fn acknowledge<'a>(&'a self, source: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let Some(base) = &self.base_url else {
                return;
            };
            let url = Self::ack_url(base, source);
            match self.http.post(&url).send().await {
                Ok(resp) => debug!(source, status = %resp.status(), "source acknowledged"),
                Err(err) => debug!(source, %err, "source acknowledgement failed"),
            }
        })
    }
}

/// Polls the notification cache and decides when to wake the agent.
pub struct SleepWakeScheduler {
    cache_path: PathBuf,
    poll_interval: Duration,
    stale_after: Duration,
    timer: RunTimer,
    status: StatusWriter,
    acknowledger: Box<dyn SourceAcknowledger>,
    state: SchedulerState,
}

impl SleepWakeScheduler {
    /// Build a scheduler with the default 10 s poll and 60 s staleness.
    #[must_use]
    pub fn new(
        cache_path: impl Into<PathBuf>,
        timer: RunTimer,
        status: StatusWriter,
        acknowledger: Box<dyn SourceAcknowledger>,
    ) -> Self {
        Self {
            cache_path: cache_path.into(),
            poll_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(60),
            timer,
            status,
            acknowledger,
            state: SchedulerState::default(),
        }
    }

    /// Build a scheduler from the relay configuration.
    #[must_use]
    pub fn from_config(
        config: &GlobalConfig,
        timer: RunTimer,
        status: StatusWriter,
        acknowledger: Box<dyn SourceAcknowledger>,
    ) -> Self {
        Self::new(&config.paths.notifications_cache, timer, status, acknowledger)
            .with_poll_interval(config.timing.sleep_poll())
            .with_stale_after(config.timing.cache_stale())
    }

    /// Override the cache poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override the staleness threshold.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Path of the cache file.
    #[must_use]
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Dedup bookkeeping.
    #[must_use]
    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Read the cache and return the records not seen before.
    ///
    /// A missing or malformed cache yields nothing; elements that are not
    /// notification objects are skipped.
    pub fn check_notifications(&mut self) -> Vec<NotificationRecord> {
        let Some(raw) = files::read_lenient(&self.cache_path) else {
            return Vec::new();
        };
        let values: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(err) => {
                debug!(%err, "notification cache unreadable, treating as empty");
                return Vec::new();
            }
        };

        values
            .into_iter()
            .filter_map(|value| serde_json::from_value::<NotificationRecord>(value).ok())
            .filter(|record| self.state.observe(record))
            .collect()
    }

    /// Force-wake record for a stale or long-missing cache, if due.
    fn check_cache_liveness(&mut self) -> Option<NotificationRecord> {
        if let Some(age) = files::modified_age(&self.cache_path) {
            self.state.cache_missing_since = None;
            if age > self.stale_after {
                warn!(age_secs = age.as_secs(), "notification cache stale, force-waking");
                return Some(NotificationRecord::system(CACHE_STALE_MESSAGE));
            }
            return None;
        }

        let now = Instant::now();
        match self.state.cache_missing_since {
            None => {
                self.state.cache_missing_since = Some(now);
                None
            }
            Some(since) if now.duration_since(since) > self.stale_after => {
                warn!("notification cache missing, force-waking");
                self.state.cache_missing_since = None;
                Some(NotificationRecord::system(CACHE_MISSING_MESSAGE))
            }
            Some(_) => None,
        }
    }

    /// Poll until something should wake the agent or the budget runs out.
    pub async fn wait_for_wake(&mut self) -> WakeResult {
        self.status.set(RelayStatus::Sleeping, None, None);
        info!("sleeping, waiting for notifications");

        loop {
            let fresh = self.check_notifications();
            if !fresh.is_empty() {
                let real: Vec<NotificationRecord> = fresh
                    .into_iter()
                    .filter(|record| !record.is_sleep_timeout_reminder())
                    .collect();
                if let Some(first) = real.first() {
                    info!(kind = first.kind(), count = real.len(), "notification received");
                    return WakeResult {
                        woken: true,
                        notifications: real,
                    };
                }
                info!("sleep timeout reminder fired, staying asleep");
            }

            if let Some(record) = self.check_cache_liveness() {
                return WakeResult {
                    woken: true,
                    notifications: vec![record],
                };
            }

            if self.timer.is_expired() {
                info!("out of time while asleep");
                return WakeResult::default();
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Sleep until woken, acknowledge the sources, and build the wake
    /// message.
    pub async fn auto_sleep_and_wake(&mut self) -> SleepResult {
        if self.timer.is_expired() {
            return SleepResult::not_woken();
        }

        let wake = self.wait_for_wake().await;
        if !wake.woken {
            return SleepResult::not_woken();
        }

        let sources: BTreeSet<String> = wake
            .notifications
            .iter()
            .filter_map(|record| record.source.clone())
            .filter(|source| !source.is_empty())
            .collect();
        for source in &sources {
            self.acknowledger.acknowledge(source).await;
        }

        let mut message = format_notifications(&wake.notifications);
        message.push_str(&format!(
            "\n\nCurrent time: {}",
            Local::now().format("%H:%M:%S %Z")
        ));

        self.status.set(RelayStatus::Working, None, None);
        info!("waking agent");
        SleepResult::woken(message)
    }
}

impl WakeSource for SleepWakeScheduler {
    fn auto_sleep_and_wake(&mut self) -> Pin<Box<dyn Future<Output = SleepResult> + Send + '_>> {
        Box::pin(SleepWakeScheduler::auto_sleep_and_wake(self))
    }
}
