use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    daemon::{
        error::TrackError, storage::entities::EntityKey, tracking::TrackerMessage,
    },
    utils::clock::Clock,
};

use super::{resolver::resolve_snapshot, snapshot::ProcessSnapshot};

/// Polls the process list and reports the foreground application guess to the tracker. Only
/// changes are reported, so a steady application keeps accruing between polls.
pub struct ActiveAppPoller {
    next: mpsc::Sender<TrackerMessage>,
    producer: Box<dyn ProcessSnapshot>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    time_provider: Box<dyn Clock>,
    current: Option<EntityKey>,
}

impl ActiveAppPoller {
    pub fn new(
        next: mpsc::Sender<TrackerMessage>,
        producer: Box<dyn ProcessSnapshot>,
        shutdown: CancellationToken,
        poll_interval: Duration,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            next,
            producer,
            shutdown,
            poll_interval,
            time_provider,
            current: None,
        }
    }

    /// Returns the active app when it differs from the last reported one.
    fn poll(&mut self) -> Result<Option<EntityKey>, TrackError> {
        let processes = self
            .producer
            .snapshot()
            .map_err(|e| TrackError::Resolution(format!("{e:#}")))?;
        let active = resolve_snapshot(&processes);
        if self.current.as_ref() == Some(&active) {
            return Ok(None);
        }
        self.current = Some(active.clone());
        Ok(Some(active))
    }

    /// Executes the polling loop.
    pub async fn run(mut self) -> Result<()> {
        let mut poll_point = self.time_provider.instant();
        loop {
            poll_point += self.poll_interval;

            match self.poll() {
                Ok(Some(active)) => {
                    info!("Active app changed to {active}");
                    self.next
                        .send(TrackerMessage::Observed(active))
                        .await
                        .inspect_err(|e| error!("Tracker is gone, stopping polling {e:?}"))?;
                }
                Ok(None) => debug!("Active app unchanged"),
                Err(e) => warn!("Skipping poll: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(poll_point) => ()
            }
        }
    }
}
