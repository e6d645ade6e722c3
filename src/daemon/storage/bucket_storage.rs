use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use fs4::tokio::AsyncFileExt;
use tokio::{fs::File, io::AsyncWriteExt, sync::broadcast};
use tracing::{debug, error};

use crate::utils::time::{date_key, parse_date_key};

use super::entities::{DayRecord, EntityKey};

const RECORD_EXTENSION: &str = "json";
const TEMPORARY_EXTENSION: &str = "json.tmp";
/// Guards every day file of the directory. Day files are replaced by rename, so they can't carry
/// the lock themselves.
const LOCK_FILE: &str = ".lock";

/// Interface for abstracting storage of daily buckets. A bucket only grows through
/// [BucketStorage::add_durations]; [BucketStorage::set_day], [BucketStorage::delete_day] and
/// [BucketStorage::clear] are the explicit overwrite paths.
pub trait BucketStorage {
    /// Retrieves the bucket of a day. A day without a file is an empty bucket.
    fn get_day(&self, date: NaiveDate) -> impl Future<Output = Result<DayRecord>> + Send;

    /// Adds durations to the bucket of a day and returns the updated bucket.
    fn add_durations(
        &self,
        date: NaiveDate,
        additions: Vec<(EntityKey, u64)>,
    ) -> impl Future<Output = Result<DayRecord>> + Send;

    fn set_day(&self, date: NaiveDate, record: DayRecord)
        -> impl Future<Output = Result<()>> + Send;

    /// All days that have a bucket, oldest first.
    fn days(&self) -> impl Future<Output = Result<Vec<NaiveDate>>> + Send;

    fn delete_day(&self, date: NaiveDate) -> impl Future<Output = Result<bool>> + Send;

    /// Removes every bucket, returning how many were removed.
    fn clear(&self) -> impl Future<Output = Result<usize>> + Send;
}

impl<T: Deref + Sync> BucketStorage for T
where
    T::Target: BucketStorage,
{
    fn get_day(&self, date: NaiveDate) -> impl Future<Output = Result<DayRecord>> + Send {
        self.deref().get_day(date)
    }

    fn add_durations(
        &self,
        date: NaiveDate,
        additions: Vec<(EntityKey, u64)>,
    ) -> impl Future<Output = Result<DayRecord>> + Send {
        self.deref().add_durations(date, additions)
    }

    fn set_day(
        &self,
        date: NaiveDate,
        record: DayRecord,
    ) -> impl Future<Output = Result<()>> + Send {
        self.deref().set_day(date, record)
    }

    fn days(&self) -> impl Future<Output = Result<Vec<NaiveDate>>> + Send {
        self.deref().days()
    }

    fn delete_day(&self, date: NaiveDate) -> impl Future<Output = Result<bool>> + Send {
        self.deref().delete_day(date)
    }

    fn clear(&self) -> impl Future<Output = Result<usize>> + Send {
        self.deref().clear()
    }
}

/// The main realization of [BucketStorage]: one JSON object per day in `record_dir`, named after
/// the date key. Writes hold an exclusive lock on [LOCK_FILE] and reads a shared one, so the CLI
/// can read while the daemon writes.
pub struct FileBucketStorage {
    record_dir: PathBuf,
    changes: broadcast::Sender<NaiveDate>,
}

impl FileBucketStorage {
    pub fn new(record_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&record_dir)?;
        let (changes, _) = broadcast::channel(16);

        Ok(Self {
            record_dir,
            changes,
        })
    }

    /// Notifies about every day whose bucket was changed through this storage.
    pub fn subscribe(&self) -> broadcast::Receiver<NaiveDate> {
        self.changes.subscribe()
    }

    pub fn change_sender(&self) -> broadcast::Sender<NaiveDate> {
        self.changes.clone()
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.record_dir
            .join(format!("{}.{RECORD_EXTENSION}", date_key(date)))
    }

    fn notify(&self, date: NaiveDate) {
        // Nobody listening is the common case.
        let _ = self.changes.send(date);
    }

    async fn lock_file(&self) -> Result<File> {
        Ok(File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.record_dir.join(LOCK_FILE))
            .await?)
    }

    async fn rewrite_with(
        &self,
        date: NaiveDate,
        update: impl FnOnce(DayRecord) -> DayRecord + Send,
    ) -> Result<DayRecord> {
        let path = self.day_path(date);
        let lock = self.lock_file().await?;

        // Semi-safe acquire-release for a file
        lock.lock_exclusive()?;
        let result = async {
            let record = update(read_day(&path).await?);
            write_day(&path, &record).await?;
            Ok(record)
        }
        .await;
        lock.unlock_async().await?;
        result
    }
}

async fn read_day(path: &Path) -> Result<DayRecord> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DayRecord::new()),
        Err(e) => Err(e)?,
    };
    parse_record(path, &content)
}

/// Replaces the day file in one step. A write cut off by a shutdown leaves only the temporary
/// file behind.
async fn write_day(path: &Path, record: &DayRecord) -> Result<()> {
    let temporary = path.with_extension(TEMPORARY_EXTENSION);
    let mut file = File::create(&temporary).await?;
    file.write_all(&serde_json::to_vec(record)?).await?;
    file.sync_data().await?;
    drop(file);
    tokio::fs::rename(&temporary, path).await?;
    Ok(())
}

/// A day file that doesn't parse is an error. Writing over it would lose the whole day.
fn parse_record(path: &Path, content: &str) -> Result<DayRecord> {
    serde_json::from_str::<DayRecord>(content).map_err(|e| {
        error!("Day file {path:?} is damaged: {e}");
        anyhow!("day file {path:?} is damaged: {e}")
    })
}

impl BucketStorage for FileBucketStorage {
    async fn get_day(&self, date: NaiveDate) -> Result<DayRecord> {
        let path = self.day_path(date);
        debug!("Reading {path:?}");

        let lock = self.lock_file().await?;
        lock.lock_shared()?;
        let result = read_day(&path).await;
        lock.unlock_async().await?;
        result
    }

    async fn add_durations(
        &self,
        date: NaiveDate,
        additions: Vec<(EntityKey, u64)>,
    ) -> Result<DayRecord> {
        let record = self
            .rewrite_with(date, move |mut record| {
                for (entity, ms) in additions {
                    let total = record.entry(entity).or_insert(0);
                    *total = total.saturating_add(ms);
                }
                record
            })
            .await?;
        self.notify(date);
        Ok(record)
    }

    async fn set_day(&self, date: NaiveDate, record: DayRecord) -> Result<()> {
        let lock = self.lock_file().await?;
        lock.lock_exclusive()?;
        let result = write_day(&self.day_path(date), &record).await;
        lock.unlock_async().await?;
        result?;
        self.notify(date);
        Ok(())
    }

    async fn days(&self) -> Result<Vec<NaiveDate>> {
        let mut entries = tokio::fs::read_dir(&self.record_dir).await?;
        let mut days = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match path
                .file_stem()
                .and_then(|v| v.to_str())
                .and_then(parse_date_key)
            {
                Some(day) => days.push(day),
                None => debug!("Skipping foreign file {path:?}"),
            }
        }
        days.sort();
        Ok(days)
    }

    async fn delete_day(&self, date: NaiveDate) -> Result<bool> {
        match tokio::fs::remove_file(self.day_path(date)).await {
            Ok(()) => {
                self.notify(date);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e)?,
        }
    }

    async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for day in self.days().await? {
            if self.delete_day(day).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-memory storage used by tests that run with a paused clock or need a failing store.
#[cfg(test)]
pub(crate) mod memory {
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex,
        },
    };

    use anyhow::{bail, Result};
    use chrono::NaiveDate;

    use super::BucketStorage;
    use crate::daemon::storage::entities::{DayRecord, EntityKey};

    #[derive(Default)]
    pub(crate) struct MemoryStorage {
        pub(crate) days: Mutex<BTreeMap<NaiveDate, DayRecord>>,
        pub(crate) unavailable: AtomicBool,
        pub(crate) writes: AtomicUsize,
    }

    impl MemoryStorage {
        pub(crate) fn with_days(days: impl IntoIterator<Item = (NaiveDate, DayRecord)>) -> Self {
            Self {
                days: Mutex::new(days.into_iter().collect()),
                ..Default::default()
            }
        }

        pub(crate) fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub(crate) fn total_for(&self, date: NaiveDate, entity: &str) -> u64 {
            self.days
                .lock()
                .unwrap()
                .get(&date)
                .and_then(|v| v.get(entity).copied())
                .unwrap_or(0)
        }

        fn check(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                bail!("memory storage switched off");
            }
            Ok(())
        }
    }

    impl BucketStorage for MemoryStorage {
        async fn get_day(&self, date: NaiveDate) -> Result<DayRecord> {
            self.check()?;
            Ok(self
                .days
                .lock()
                .unwrap()
                .get(&date)
                .cloned()
                .unwrap_or_default())
        }

        async fn add_durations(
            &self,
            date: NaiveDate,
            additions: Vec<(EntityKey, u64)>,
        ) -> Result<DayRecord> {
            self.check()?;
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut days = self.days.lock().unwrap();
            let record = days.entry(date).or_default();
            for (entity, ms) in additions {
                *record.entry(entity).or_insert(0) += ms;
            }
            Ok(record.clone())
        }

        async fn set_day(&self, date: NaiveDate, record: DayRecord) -> Result<()> {
            self.check()?;
            self.days.lock().unwrap().insert(date, record);
            Ok(())
        }

        async fn days(&self) -> Result<Vec<NaiveDate>> {
            self.check()?;
            Ok(self.days.lock().unwrap().keys().copied().collect())
        }

        async fn delete_day(&self, date: NaiveDate) -> Result<bool> {
            self.check()?;
            Ok(self.days.lock().unwrap().remove(&date).is_some())
        }

        async fn clear(&self) -> Result<usize> {
            self.check()?;
            let mut days = self.days.lock().unwrap();
            let removed = days.len();
            days.clear();
            Ok(removed)
        }
    }
}
