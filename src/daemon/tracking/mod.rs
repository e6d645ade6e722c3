//! The tracker is a single actor owning the [state::AccrualState]. Poller observations, client
//! requests, the periodic tick and shutdown are all handled one at a time in [TrackerModule::run].

pub mod reminder;
pub mod state;

use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::utils::clock::Clock;

use self::{
    reminder::BreakReminder,
    state::{AccrualState, Flush, Transition},
};

use super::{
    collection::resolver::resolve_url,
    error::TrackError,
    ipc::protocol::{Request, Response},
    storage::{
        entities::{EntityKey, SessionEntity},
        gateway::PersistenceGateway,
        sessions::SessionLog,
        settings::{Settings, SettingsStore},
    },
};

/// Input of the tracker.
#[derive(Debug)]
pub enum TrackerMessage {
    /// Active app reported by the desktop poller.
    Observed(EntityKey),
    /// Client request with the channel to answer on.
    Request(Request, oneshot::Sender<Response>),
}

/// Knobs of a tracker run.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub tick_interval: Duration,
    pub min_tracking_ms: u64,
}

pub struct TrackerModule<G: PersistenceGateway> {
    receiver: mpsc::Receiver<TrackerMessage>,
    state: AccrualState,
    gateway: G,
    settings: Settings,
    settings_store: SettingsStore,
    sessions: Option<SessionLog>,
    session: Option<SessionEntity>,
    reminder: BreakReminder,
    tick_interval: Duration,
    shutdown: CancellationToken,
    clock: Box<dyn Clock>,
}

impl<G: PersistenceGateway> TrackerModule<G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: mpsc::Receiver<TrackerMessage>,
        gateway: G,
        settings: Settings,
        settings_store: SettingsStore,
        sessions: Option<SessionLog>,
        options: TrackerOptions,
        shutdown: CancellationToken,
        clock: Box<dyn Clock>,
    ) -> Self {
        let now = clock.time();
        Self {
            receiver,
            state: AccrualState::new(now, options.min_tracking_ms),
            gateway,
            settings,
            settings_store,
            sessions,
            session: None,
            reminder: BreakReminder::new(now),
            tick_interval: options.tick_interval,
            shutdown,
            clock,
        }
    }

    /// Executes the tracker event loop. Returns after the final flush once shutdown is requested
    /// or every sender is gone.
    pub async fn run(mut self) -> Result<()> {
        self.begin_session().await;
        let mut tick_point = self.clock.instant() + self.tick_interval;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.clock.sleep_until(tick_point) => {
                    tick_point += self.tick_interval;
                    self.on_tick().instrument(info_span!("Periodic tick")).await;
                }
                message = self.receiver.recv() => match message {
                    Some(message) => self.on_message(message).await,
                    None => break,
                }
            }
        }

        self.finish().await;
        Ok(())
    }

    async fn on_message(&mut self, message: TrackerMessage) {
        debug!("Processing message {message:?}");
        match message {
            TrackerMessage::Observed(key) => {
                let at = self.clock.time();
                self.transition(Transition::EntityObserved(key, at)).await;
            }
            TrackerMessage::Request(request, reply) => {
                let response = self.on_request(request).await;
                if reply.send(response).is_err() {
                    debug!("Client left before the answer");
                }
            }
        }
    }

    async fn on_request(&mut self, request: Request) -> Response {
        let at = self.clock.time();
        match request {
            Request::GetOngoingTime => Response::ongoing(self.state.ongoing(at)),
            Request::ForceReload => match self.gateway.flush_all().await {
                Ok(()) => Response::Ack,
                Err(e) => Response::error(e),
            },
            Request::GetSettings => Response::Settings {
                settings: self.settings.clone(),
            },
            Request::UpdateSettings { patch } => {
                match self.settings_store.update(patch).await {
                    Ok(settings) => {
                        info!("Settings updated {settings:?}");
                        self.settings = settings.clone();
                        Response::Settings { settings }
                    }
                    Err(e) => {
                        error!("Failed to update settings {e:?}");
                        Response::error(e)
                    }
                }
            }
            Request::TabActivated { url } | Request::TabUpdated { url } => {
                let transition = match resolve_url(&url) {
                    Some(key) => Transition::EntityObserved(key, at),
                    None => {
                        debug!("{}", TrackError::Resolution(url));
                        Transition::Unresolved(at)
                    }
                };
                self.transition(transition).await;
                Response::Ack
            }
            Request::FocusLost => {
                self.transition(Transition::FocusLost(at)).await;
                Response::Ack
            }
            Request::FocusGained { url } => {
                match resolve_url(&url) {
                    Some(key) => self.transition(Transition::FocusGained(key, at)).await,
                    None => {
                        debug!("{}", TrackError::Resolution(url));
                        self.transition(Transition::FocusGainedUnresolved(at)).await;
                    }
                }
                Response::Ack
            }
            Request::WaitForChange => Response::error("change notifications are served by the listener"),
        }
    }

    async fn on_tick(&mut self) {
        let now = self.clock.time();
        self.transition(Transition::PeriodicTick(now)).await;
        if let Err(e) = self.gateway.flush_all().await {
            warn!("Periodic save failed: {e}");
        }
        self.update_session(now).await;

        if self.reminder.is_due(&self.settings, now) && self.settings.notifications {
            info!(
                "Break reminder: tracking for over {} minutes, take a break",
                self.settings.break_reminder_interval_minutes
            );
        }
    }

    /// Applies a transition and hands its flush to the gateway. The checkpoint has already moved
    /// when the write starts.
    async fn transition(&mut self, transition: Transition) {
        let flush = self.state.handle(transition);
        self.persist(flush).await;
    }

    async fn persist(&mut self, flush: Option<Flush>) {
        let Some(flush) = flush else {
            return;
        };
        if let Err(e) = self.gateway.add_duration(flush).await {
            error!("Interval is lost: {e}");
        }
    }

    async fn begin_session(&mut self) {
        let Some(log) = &self.sessions else {
            return;
        };
        let session = SessionEntity::started_at(self.clock.time());
        match log.begin(&session).await {
            Ok(()) => self.session = Some(session),
            Err(e) => error!("Failed to start a session record {e:?}"),
        }
    }

    async fn update_session(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let (Some(log), Some(session)) = (&self.sessions, &mut self.session) else {
            return;
        };
        session.extend_to(now);
        if let Err(e) = log.update_last(session).await {
            error!("Failed to update the session record {e:?}");
        }
    }

    async fn finish(&mut self) {
        info!("Stopping tracker");
        let now = self.clock.time();
        self.transition(Transition::Shutdown(now)).await;
        if let Err(e) = self.gateway.flush_all().await {
            error!("Final save failed: {e}");
        }
        self.update_session(now).await;
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use tempfile::{tempdir, TempDir};
    use tokio::sync::{mpsc, oneshot};
    use tokio_util::sync::CancellationToken;

    use super::{TrackerMessage, TrackerModule, TrackerOptions};
    use crate::{
        daemon::{
            ipc::protocol::{Request, Response},
            storage::{
                bucket_storage::memory::MemoryStorage,
                entities::EntityKey,
                gateway::{StorageGateway, WriteMode, DEFAULT_STORE_TIMEOUT},
                sessions::SessionLog,
                settings::{Settings, SettingsPatch, SettingsStore},
            },
            tracking::state::MIN_TRACKING_TIME_MS,
        },
        utils::{clock::TestClock, logging::TEST_LOGGING},
    };

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 9, 10, 0, 0).unwrap()
    }

    fn day() -> NaiveDate {
        start().date_naive()
    }

    struct Harness {
        sender: mpsc::Sender<TrackerMessage>,
        shutdown: CancellationToken,
        storage: Arc<MemoryStorage>,
        dir: TempDir,
    }

    fn create_tracker(
        mode: WriteMode,
        tick_seconds: u64,
        with_sessions: bool,
    ) -> Result<(TrackerModule<StorageGateway<Arc<MemoryStorage>>>, Harness)> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let storage = Arc::new(MemoryStorage::default());
        let (sender, receiver) = mpsc::channel(10);
        let shutdown = CancellationToken::new();
        let tracker = TrackerModule::new(
            receiver,
            StorageGateway::new(storage.clone(), mode, DEFAULT_STORE_TIMEOUT),
            Settings::default(),
            SettingsStore::new(dir.path().join("settings.json")),
            with_sessions.then(|| SessionLog::new(dir.path().join("sessions.jsonl"))),
            TrackerOptions {
                tick_interval: Duration::from_secs(tick_seconds),
                min_tracking_ms: MIN_TRACKING_TIME_MS,
            },
            shutdown.clone(),
            Box::new(TestClock::starting_at(start())),
        );
        Ok((
            tracker,
            Harness {
                sender,
                shutdown,
                storage,
                dir,
            },
        ))
    }

    async fn request(sender: &mpsc::Sender<TrackerMessage>, request: Request) -> Result<Response> {
        let (reply, answer) = oneshot::channel();
        sender.send(TrackerMessage::Request(request, reply)).await?;
        Ok(answer.await?)
    }

    fn tab(url: &str) -> Request {
        Request::TabActivated { url: url.into() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_tick_saves_long_visit() -> Result<()> {
        let (tracker, harness) = create_tracker(WriteMode::Immediate, 30, false)?;

        let (result, driver) = tokio::join!(tracker.run(), async {
            request(&harness.sender, tab("https://www.example.com/")).await?;
            tokio::time::sleep(Duration::from_secs(31)).await;
            // The tick at 30s already saved the first part.
            assert_eq!(harness.storage.total_for(day(), "example.com"), 30_000);
            tokio::time::sleep(Duration::from_secs(4)).await;
            request(&harness.sender, tab("https://docs.rs/")).await?;
            tokio::time::sleep(Duration::from_secs(2)).await;
            harness.shutdown.cancel();
            anyhow::Ok(())
        });
        result?;
        driver?;

        assert_eq!(harness.storage.total_for(day(), "example.com"), 35_000);
        // 2 seconds on docs.rs are below the threshold.
        assert_eq!(harness.storage.total_for(day(), "docs.rs"), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_before_stopping() -> Result<()> {
        let (tracker, harness) = create_tracker(WriteMode::Immediate, 30, false)?;

        let (result, driver) = tokio::join!(tracker.run(), async {
            request(&harness.sender, tab("https://example.com/")).await?;
            tokio::time::sleep(Duration::from_secs(7)).await;
            harness.shutdown.cancel();
            anyhow::Ok(())
        });
        result?;
        driver?;

        assert_eq!(harness.storage.total_for(day(), "example.com"), 7_000);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_navigation_within_site_is_not_saved() -> Result<()> {
        let (tracker, harness) = create_tracker(WriteMode::Immediate, 30, false)?;

        let (result, driver) = tokio::join!(tracker.run(), async {
            request(&harness.sender, tab("https://docs.rs/")).await?;
            for page in ["tokio", "serde", "chrono"] {
                tokio::time::sleep(Duration::from_secs(3)).await;
                let url = format!("https://docs.rs/{page}");
                request(&harness.sender, Request::TabUpdated { url }).await?;
            }
            tokio::time::sleep(Duration::from_secs(3)).await;
            harness.shutdown.cancel();
            anyhow::Ok(())
        });
        result?;
        driver?;

        assert_eq!(harness.storage.total_for(day(), "docs.rs"), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_ongoing_query_and_focus() -> Result<()> {
        let (tracker, harness) = create_tracker(WriteMode::Immediate, 30, false)?;

        let (result, driver) = tokio::join!(tracker.run(), async {
            request(&harness.sender, tab("https://github.com/tokio-rs")).await?;
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert_eq!(
                request(&harness.sender, Request::GetOngoingTime).await?,
                Response::Ongoing {
                    entity: EntityKey::new("github.com"),
                    ms: 0
                }
            );
            tokio::time::sleep(Duration::from_secs(9)).await;
            assert_eq!(
                request(&harness.sender, Request::GetOngoingTime).await?,
                Response::Ongoing {
                    entity: EntityKey::new("github.com"),
                    ms: 12_000
                }
            );
            request(&harness.sender, Request::FocusLost).await?;
            tokio::time::sleep(Duration::from_secs(60)).await;
            assert_eq!(
                request(&harness.sender, Request::GetOngoingTime).await?,
                Response::Ongoing { entity: None, ms: 0 }
            );
            request(
                &harness.sender,
                Request::FocusGained {
                    url: "https://github.com/".into(),
                },
            )
            .await?;
            tokio::time::sleep(Duration::from_secs(6)).await;
            harness.shutdown.cancel();
            anyhow::Ok(())
        });
        result?;
        driver?;

        assert_eq!(harness.storage.total_for(day(), "github.com"), 18_000);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_desktop_observations_are_buffered_until_tick() -> Result<()> {
        let (tracker, harness) = create_tracker(WriteMode::Batched, 10, true)?;

        let (result, driver) = tokio::join!(tracker.run(), async {
            harness
                .sender
                .send(TrackerMessage::Observed(EntityKey::new("code").unwrap()))
                .await?;
            assert_eq!(
                request(&harness.sender, Request::GetOngoingTime).await?,
                Response::Ongoing {
                    entity: EntityKey::new("code"),
                    ms: 0
                }
            );
            tokio::time::sleep(Duration::from_secs(6)).await;
            harness
                .sender
                .send(TrackerMessage::Observed(EntityKey::new("chrome").unwrap()))
                .await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            // Waiting for the tick at 10s.
            assert_eq!(harness.storage.total_for(day(), "code"), 0);
            tokio::time::sleep(Duration::from_secs(4)).await;
            assert_eq!(harness.storage.total_for(day(), "code"), 6_000);
            tokio::time::sleep(Duration::from_secs(10)).await;
            harness.shutdown.cancel();
            anyhow::Ok(())
        });
        result?;
        driver?;

        // The tick at 20s saves 14s of chrome, the last second is below the threshold.
        assert_eq!(harness.storage.total_for(day(), "chrome"), 14_000);

        let sessions = SessionLog::new(harness.dir.path().join("sessions.jsonl"))
            .read_all()
            .await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_ms, 21_000);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_failure_does_not_stop_tracking() -> Result<()> {
        let (tracker, harness) = create_tracker(WriteMode::Immediate, 30, false)?;

        let (result, driver) = tokio::join!(tracker.run(), async {
            harness.storage.set_unavailable(true);
            request(&harness.sender, tab("https://a.com/")).await?;
            tokio::time::sleep(Duration::from_secs(8)).await;
            request(&harness.sender, tab("https://b.com/")).await?;
            harness.storage.set_unavailable(false);
            tokio::time::sleep(Duration::from_secs(9)).await;
            request(&harness.sender, tab("https://c.com/")).await?;
            harness.shutdown.cancel();
            anyhow::Ok(())
        });
        result?;
        driver?;

        assert_eq!(harness.storage.total_for(day(), "a.com"), 0);
        assert_eq!(harness.storage.total_for(day(), "b.com"), 9_000);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_requests() -> Result<()> {
        let (tracker, harness) = create_tracker(WriteMode::Immediate, 30, false)?;

        let (result, driver) = tokio::join!(tracker.run(), async {
            let updated = request(
                &harness.sender,
                Request::UpdateSettings {
                    patch: SettingsPatch {
                        daily_goal_minutes: Some(60),
                        ..Default::default()
                    },
                },
            )
            .await?;
            let fetched = request(&harness.sender, Request::GetSettings).await?;
            assert_eq!(updated, fetched);
            let Response::Settings { settings } = fetched else {
                panic!("Expected settings, got {fetched:?}");
            };
            assert_eq!(settings.daily_goal_minutes, 60);
            harness.shutdown.cancel();
            anyhow::Ok(())
        });
        result?;
        driver?;

        let stored = SettingsStore::new(harness.dir.path().join("settings.json"))
            .load()
            .await?;
        assert_eq!(stored.daily_goal_minutes, 60);
        Ok(())
    }
}
