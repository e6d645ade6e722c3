use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::time::Instant;

/// Represents an entity responsible for providing dates across application. Every timestamp the
/// tracker attributes time with comes from here, which lets tests warp time.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;

    fn instant(&self) -> Instant;

    async fn sleep_until(&self, instant: Instant);

    /// Day the current moment belongs to. Records are kept per UTC day.
    fn today(&self) -> NaiveDate {
        self.time().date_naive()
    }
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: Instant) {
        tokio::time::sleep_until(instant).await;
    }
}

/// Clock driven by tokio's time, so `start_paused` tests move wall time together with timers.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct TestClock {
    start_time: DateTime<Utc>,
    reference: Instant,
}

#[cfg(test)]
impl TestClock {
    pub(crate) fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            reference: Instant::now(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for TestClock {
    fn time(&self) -> DateTime<Utc> {
        self.start_time
            + chrono::Duration::from_std(self.reference.elapsed()).unwrap_or_default()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: Instant) {
        tokio::time::sleep_until(instant).await;
    }
}
