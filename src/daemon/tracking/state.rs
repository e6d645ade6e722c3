use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::daemon::{
    error::TrackError,
    storage::entities::{EntityKey, Ongoing},
};

/// Minimum dwell time. Shorter intervals are dropped to filter out quick switches.
pub const MIN_TRACKING_TIME_MS: u64 = 5000;

/// Input of [AccrualState::handle]. Every transition happens at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The active tab or app changed, or the active tab navigated.
    EntityObserved(EntityKey, DateTime<Utc>),
    /// An observation could not be resolved to an entity, so nothing is active anymore.
    Unresolved(DateTime<Utc>),
    FocusLost(DateTime<Utc>),
    FocusGained(EntityKey, DateTime<Utc>),
    /// Focus is back but the active tab doesn't resolve to an entity.
    FocusGainedUnresolved(DateTime<Utc>),
    PeriodicTick(DateTime<Utc>),
    Shutdown(DateTime<Utc>),
}

/// Time that has to be added to the bucket of `entity` for `date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    pub entity: EntityKey,
    pub ms: u64,
    pub date: NaiveDate,
}

/// Accrual state machine. Owns the single checkpoint of a tracker: which entity is active, since
/// when, and whether tracking is enabled at all.
///
/// Transitions are synchronous. The checkpoint is already moved when a [Flush] is returned, so
/// the next transition can't read the same interval again while the flush is being written.
#[derive(Debug, Clone)]
pub struct AccrualState {
    active_entity: Option<EntityKey>,
    last_activated_at: DateTime<Utc>,
    tracking_enabled: bool,
    min_tracking_ms: u64,
}

impl AccrualState {
    pub fn new(now: DateTime<Utc>, min_tracking_ms: u64) -> Self {
        Self {
            active_entity: None,
            last_activated_at: now,
            tracking_enabled: true,
            min_tracking_ms,
        }
    }

    pub fn active_entity(&self) -> Option<&EntityKey> {
        self.active_entity.as_ref()
    }

    pub fn last_activated_at(&self) -> DateTime<Utc> {
        self.last_activated_at
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking_enabled
    }

    pub fn handle(&mut self, transition: Transition) -> Option<Flush> {
        debug!("Handling {transition:?}");
        match transition {
            Transition::EntityObserved(key, at) => self.observe(key, at),
            Transition::Unresolved(at) => {
                let flush = self.flush_active(at);
                self.active_entity = None;
                flush
            }
            Transition::FocusLost(at) | Transition::Shutdown(at) => {
                let flush = self.flush_active(at);
                self.active_entity = None;
                self.tracking_enabled = false;
                flush
            }
            Transition::FocusGained(key, at) => {
                let flush = self.flush_active(at);
                info!("Focus gained on {key}");
                self.active_entity = Some(key);
                self.advance(at);
                self.tracking_enabled = true;
                flush
            }
            Transition::FocusGainedUnresolved(at) => {
                let flush = self.flush_active(at);
                self.active_entity = None;
                self.advance(at);
                self.tracking_enabled = true;
                flush
            }
            Transition::PeriodicTick(at) => {
                if !self.tracking_enabled || self.active_entity.is_none() {
                    return None;
                }
                let ms = self.elapsed_ms(at);
                if ms < self.min_tracking_ms {
                    return None;
                }
                self.close_interval(ms, at)
            }
        }
    }

    /// Time accrued so far by the active entity. Doesn't touch the checkpoint.
    pub fn ongoing(&self, at: DateTime<Utc>) -> Option<Ongoing> {
        if !self.tracking_enabled {
            return None;
        }
        let entity = self.active_entity.clone()?;
        let ms = (at - self.last_activated_at).num_milliseconds().max(0) as u64;
        Some(Ongoing {
            entity,
            ms: if ms >= self.min_tracking_ms { ms } else { 0 },
        })
    }

    fn observe(&mut self, key: EntityKey, at: DateTime<Utc>) -> Option<Flush> {
        if !self.tracking_enabled {
            debug!("Ignoring {key} while tracking is disabled");
            return None;
        }
        // Navigating within the same entity closes the interval too, short ones are dropped.
        let flush = self.flush_active(at);
        if self.active_entity.as_ref() != Some(&key) {
            info!("Active entity changed to {key}");
            self.active_entity = Some(key);
        }
        self.advance(at);
        flush
    }

    /// Closes the current interval at `at` and moves the checkpoint there. Returns the interval
    /// when it passes the threshold.
    fn flush_active(&mut self, at: DateTime<Utc>) -> Option<Flush> {
        if !self.tracking_enabled {
            return None;
        }
        if self.active_entity.is_none() {
            self.advance(at);
            return None;
        }
        let ms = self.elapsed_ms(at);
        self.close_interval(ms, at)
    }

    /// Hands out `ms` of the active entity, dated by the checkpoint, and moves the checkpoint to
    /// `at`.
    fn close_interval(&mut self, ms: u64, at: DateTime<Utc>) -> Option<Flush> {
        let entity = self.active_entity.clone()?;
        let date = self.last_activated_at.date_naive();
        self.advance(at);
        if ms >= self.min_tracking_ms {
            Some(Flush { entity, ms, date })
        } else {
            debug!("Discarding {ms}ms of {entity}, below {}ms", self.min_tracking_ms);
            None
        }
    }

    fn elapsed_ms(&self, at: DateTime<Utc>) -> u64 {
        let delta = (at - self.last_activated_at).num_milliseconds();
        if delta < 0 {
            warn!("{}", TrackError::ClockAnomaly { behind_ms: -delta });
            0
        } else {
            delta as u64
        }
    }

    /// The checkpoint never moves backwards.
    fn advance(&mut self, at: DateTime<Utc>) {
        if at > self.last_activated_at {
            self.last_activated_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

    use super::{AccrualState, Flush, Transition, MIN_TRACKING_TIME_MS};
    use crate::daemon::storage::entities::{EntityKey, Ongoing};

    fn key(v: &str) -> EntityKey {
        EntityKey::new(v).unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 9, 12, 0, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        start() + Duration::milliseconds(ms)
    }

    fn day() -> NaiveDate {
        start().date_naive()
    }

    fn flush(entity: &str, ms: u64) -> Option<Flush> {
        Some(Flush {
            entity: key(entity),
            ms,
            date: day(),
        })
    }

    fn state() -> AccrualState {
        AccrualState::new(start(), MIN_TRACKING_TIME_MS)
    }

    #[test]
    fn test_short_visit_is_dropped() {
        let mut state = state();
        assert_eq!(state.handle(Transition::EntityObserved(key("a.com"), at(0))), None);
        assert_eq!(state.handle(Transition::EntityObserved(key("b.com"), at(3000))), None);
        assert_eq!(
            state.handle(Transition::EntityObserved(key("c.com"), at(9000))),
            flush("b.com", 6000)
        );
        assert_eq!(state.last_activated_at(), at(9000));
    }

    #[test]
    fn test_tick_resets_checkpoint() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("a.com"), at(0)));

        assert_eq!(state.handle(Transition::PeriodicTick(at(30_000))), flush("a.com", 30_000));
        assert_eq!(state.last_activated_at(), at(30_000));
        assert_eq!(
            state.handle(Transition::EntityObserved(key("b.com"), at(35_000))),
            flush("a.com", 5000)
        );
    }

    #[test]
    fn test_tick_below_threshold_keeps_accruing() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("a.com"), at(0)));

        assert_eq!(state.handle(Transition::PeriodicTick(at(3000))), None);
        assert_eq!(state.last_activated_at(), at(0));
        assert_eq!(state.handle(Transition::PeriodicTick(at(6000))), flush("a.com", 6000));
    }

    #[test]
    fn test_shutdown_flushes_active_entity() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("example.com"), at(0)));

        assert_eq!(
            state.handle(Transition::Shutdown(at(7000))),
            flush("example.com", 7000)
        );
        assert_eq!(state.active_entity(), None);
        assert_eq!(state.handle(Transition::PeriodicTick(at(60_000))), None);
    }

    #[test]
    fn test_focus_lost_stops_accrual() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("a.com"), at(0)));

        assert_eq!(state.handle(Transition::FocusLost(at(10_000))), flush("a.com", 10_000));
        assert!(!state.is_tracking());
        // Switching tabs in an unfocused window doesn't start anything.
        assert_eq!(state.handle(Transition::EntityObserved(key("b.com"), at(20_000))), None);
        assert_eq!(state.handle(Transition::PeriodicTick(at(50_000))), None);
        assert_eq!(state.ongoing(at(50_000)), None);

        // Time spent away from the window is never attributed.
        assert_eq!(state.handle(Transition::FocusGained(key("b.com"), at(60_000))), None);
        assert_eq!(state.last_activated_at(), at(60_000));
        assert_eq!(
            state.handle(Transition::EntityObserved(key("c.com"), at(68_000))),
            flush("b.com", 8000)
        );
    }

    #[test]
    fn test_focus_gained_while_tracking_flushes_previous() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("a.com"), at(0)));
        assert_eq!(
            state.handle(Transition::FocusGained(key("b.com"), at(12_000))),
            flush("a.com", 12_000)
        );
        assert_eq!(state.active_entity(), Some(&key("b.com")));
    }

    #[test]
    fn test_focus_gained_on_unresolved_tab() {
        let mut state = state();
        state.handle(Transition::FocusLost(at(0)));

        assert_eq!(state.handle(Transition::FocusGainedUnresolved(at(5000))), None);
        assert!(state.is_tracking());
        assert_eq!(state.active_entity(), None);
        state.handle(Transition::EntityObserved(key("a.com"), at(9000)));
        assert_eq!(state.handle(Transition::PeriodicTick(at(15_000))), flush("a.com", 6000));
    }

    #[test]
    fn test_unresolved_observation_clears_entity() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("a.com"), at(0)));

        assert_eq!(state.handle(Transition::Unresolved(at(8000))), flush("a.com", 8000));
        assert_eq!(state.active_entity(), None);
        assert!(state.is_tracking());
        assert_eq!(state.handle(Transition::PeriodicTick(at(40_000))), None);
        // Checkpoint follows along while nothing is active.
        state.handle(Transition::EntityObserved(key("b.com"), at(40_000)));
        assert_eq!(state.handle(Transition::Shutdown(at(45_000))), flush("b.com", 5000));
    }

    #[test]
    fn test_navigation_within_entity_drops_short_intervals() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("a.com"), at(0)));

        assert_eq!(state.handle(Transition::EntityObserved(key("a.com"), at(3000))), None);
        assert_eq!(state.last_activated_at(), at(3000));
        assert_eq!(state.active_entity(), Some(&key("a.com")));
        // Both 3s intervals are below the threshold.
        assert_eq!(state.handle(Transition::EntityObserved(key("b.com"), at(6000))), None);
        assert_eq!(state.last_activated_at(), at(6000));
    }

    #[test]
    fn test_navigation_within_entity_flushes_long_intervals() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("a.com"), at(0)));

        assert_eq!(
            state.handle(Transition::EntityObserved(key("a.com"), at(7000))),
            flush("a.com", 7000)
        );
        assert_eq!(state.last_activated_at(), at(7000));
        assert_eq!(state.handle(Transition::Shutdown(at(12_000))), flush("a.com", 5000));
    }

    #[test]
    fn test_tick_reports_clock_anomaly_once() {
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::{
            layer::{Context, SubscriberExt},
            Layer,
        };

        struct WarnCounter(Arc<AtomicUsize>);

        impl<S: Subscriber> Layer<S> for WarnCounter {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                if *event.metadata().level() == Level::WARN {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        tracing::subscriber::with_default(subscriber, || {
            // Without a threshold the clamped interval goes all the way to a flush.
            let mut state = AccrualState::new(start(), 0);
            state.handle(Transition::EntityObserved(key("a.com"), at(10_000)));
            assert_eq!(state.handle(Transition::PeriodicTick(at(4000))), flush("a.com", 0));
            assert_eq!(state.last_activated_at(), at(10_000));
        });
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clock_going_backwards_is_clamped() {
        let mut state = state();
        state.handle(Transition::EntityObserved(key("a.com"), at(10_000)));

        assert_eq!(state.handle(Transition::EntityObserved(key("b.com"), at(4000))), None);
        assert_eq!(state.last_activated_at(), at(10_000));
        assert_eq!(state.handle(Transition::PeriodicTick(at(1000))), None);
        assert_eq!(
            state.handle(Transition::Shutdown(at(16_000))),
            flush("b.com", 6000)
        );
    }

    #[test]
    fn test_ongoing_is_read_only() {
        let mut state = state();
        assert_eq!(state.ongoing(at(1000)), None);
        state.handle(Transition::EntityObserved(key("a.com"), at(0)));

        assert_eq!(
            state.ongoing(at(3000)),
            Some(Ongoing {
                entity: key("a.com"),
                ms: 0
            })
        );
        assert_eq!(
            state.ongoing(at(12_000)),
            Some(Ongoing {
                entity: key("a.com"),
                ms: 12_000
            })
        );
        assert_eq!(state.last_activated_at(), at(0));
    }

    #[test]
    fn test_interval_is_dated_by_its_start() {
        let mut state = AccrualState::new(
            Utc.with_ymd_and_hms(2024, 6, 9, 23, 59, 50).unwrap(),
            MIN_TRACKING_TIME_MS,
        );
        let before_midnight = Utc.with_ymd_and_hms(2024, 6, 9, 23, 59, 50).unwrap();
        state.handle(Transition::EntityObserved(key("a.com"), before_midnight));

        let flush = state
            .handle(Transition::PeriodicTick(before_midnight + Duration::seconds(20)))
            .unwrap();
        assert_eq!(flush.date, NaiveDate::from_ymd_opt(2024, 6, 9).unwrap());
        assert_eq!(flush.ms, 20_000);
    }

    /// Sum of flushed time equals the sum of the intervals each entity was active whenever every
    /// dwell passes the threshold.
    #[test]
    fn test_accrual_is_lossless_above_threshold() {
        let dwells: [(&str, i64); 8] = [
            ("a.com", 5000),
            ("b.com", 12_345),
            ("a.com", 61_000),
            ("c.com", 5001),
            ("b.com", 7777),
            ("a.com", 30_000),
            ("c.com", 90_500),
            ("b.com", 5000),
        ];
        let mut state = state();
        let mut now = 0;
        let mut flushed = std::collections::BTreeMap::<String, u64>::new();
        let mut expected = std::collections::BTreeMap::<String, u64>::new();

        for (entity, dwell) in dwells {
            if let Some(f) = state.handle(Transition::EntityObserved(key(entity), at(now))) {
                *flushed.entry(f.entity.to_string()).or_default() += f.ms;
            }
            // Ticks in the middle of a dwell must not change the totals.
            if let Some(f) = state.handle(Transition::PeriodicTick(at(now + dwell / 2))) {
                *flushed.entry(f.entity.to_string()).or_default() += f.ms;
            }
            *expected.entry(entity.to_string()).or_default() += dwell as u64;
            now += dwell;
        }
        if let Some(f) = state.handle(Transition::Shutdown(at(now))) {
            *flushed.entry(f.entity.to_string()).or_default() += f.ms;
        }

        // Ticks split dwells; halves below the threshold are kept accruing, not dropped.
        assert_eq!(flushed, expected);
    }
}
