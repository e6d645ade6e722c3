use std::{collections::BTreeMap, future::Future, time::Duration};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::daemon::{error::TrackError, tracking::state::Flush};

use super::{
    bucket_storage::BucketStorage,
    entities::{DayRecord, EntityKey},
};

/// Default bound for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridges the tracker and [BucketStorage]. Adding is pure accumulation: the same flush added
/// twice is counted twice, so every interval must be handed over exactly once.
pub trait PersistenceGateway {
    fn add_duration(&mut self, flush: Flush) -> impl Future<Output = Result<(), TrackError>>;

    /// Writes out everything buffered in memory.
    fn flush_all(&mut self) -> impl Future<Output = Result<(), TrackError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Every flush is written through.
    Immediate,
    /// Flushes are summed per day and entity and written by [PersistenceGateway::flush_all].
    Batched,
}

pub struct StorageGateway<S: BucketStorage> {
    storage: S,
    mode: WriteMode,
    pending: BTreeMap<NaiveDate, DayRecord>,
    timeout: Duration,
}

impl<S: BucketStorage> StorageGateway<S> {
    pub fn new(storage: S, mode: WriteMode, timeout: Duration) -> Self {
        Self {
            storage,
            mode,
            pending: BTreeMap::new(),
            timeout,
        }
    }

    pub fn pending_ms(&self) -> u64 {
        self.pending.values().flat_map(|v| v.values()).sum()
    }

    async fn write(&self, date: NaiveDate, additions: Vec<(EntityKey, u64)>) -> Result<(), TrackError> {
        match tokio::time::timeout(self.timeout, self.storage.add_durations(date, additions)).await
        {
            Ok(Ok(record)) => {
                debug!("Day {date} now holds {} entities", record.len());
                Ok(())
            }
            Ok(Err(e)) => Err(TrackError::storage(e)),
            Err(_) => Err(TrackError::StorageUnavailable(format!(
                "write for {date} took longer than {:?}",
                self.timeout
            ))),
        }
    }
}

impl<S: BucketStorage> PersistenceGateway for StorageGateway<S> {
    async fn add_duration(&mut self, flush: Flush) -> Result<(), TrackError> {
        let Flush { entity, ms, date } = flush;
        match self.mode {
            WriteMode::Immediate => {
                info!("Saving {ms}ms for {entity} on {date}");
                self.write(date, vec![(entity, ms)]).await
            }
            WriteMode::Batched => {
                debug!("Buffering {ms}ms for {entity} on {date}");
                let total = self
                    .pending
                    .entry(date)
                    .or_default()
                    .entry(entity)
                    .or_insert(0);
                *total = total.saturating_add(ms);
                Ok(())
            }
        }
    }

    async fn flush_all(&mut self) -> Result<(), TrackError> {
        // The buffer is taken before writing. A failed day is dropped, never retried.
        let pending = std::mem::take(&mut self.pending);
        let mut failure = None;
        for (date, record) in pending {
            let additions = record.into_iter().collect::<Vec<_>>();
            info!("Saving {} buffered entities for {date}", additions.len());
            if let Err(e) = self.write(date, additions).await {
                warn!("Dropping buffered time for {date}: {e}");
                failure = Some(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }
}
