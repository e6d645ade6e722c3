use std::{fs::File, io::BufWriter, path::Path};

use anyhow::Result;
use chrono::{Days, NaiveDate};
use tracing::info;

use crate::{
    daemon::storage::bucket_storage::BucketStorage,
    export::{export_rows, write_csv},
    query::Aggregator,
    utils::time::DateRange,
};

/// Writes the days of `range` as CSV into `output`, or to stdout.
pub async fn export_csv(
    aggregator: &Aggregator<impl BucketStorage>,
    range: DateRange,
    output: Option<&Path>,
) -> Result<usize> {
    let days = aggregator.load_days(range).await?;
    let rows = export_rows(days);
    match output {
        Some(path) => write_csv(&rows, BufWriter::new(File::create(path)?))?,
        None => write_csv(&rows, std::io::stdout().lock())?,
    }
    Ok(rows.len())
}

/// Deletes the buckets of days older than `keep_days` days before `today`.
pub async fn delete_days_before(
    storage: &impl BucketStorage,
    today: NaiveDate,
    keep_days: u32,
) -> Result<usize> {
    let cutoff = today
        .checked_sub_days(Days::new(u64::from(keep_days)))
        .unwrap_or(NaiveDate::MIN);
    let mut deleted = 0;
    for day in storage.days().await? {
        if day >= cutoff {
            continue;
        }
        if storage.delete_day(day).await? {
            info!("Deleted records of {day}");
            deleted += 1;
        }
    }
    Ok(deleted)
}
