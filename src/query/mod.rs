//! Read side of the tracker. Every query combines the stored day buckets with the live interval
//! of the running daemon, so totals are accurate to "now" without forcing a save.

pub mod category;

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;
use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::{
    daemon::storage::{
        bucket_storage::BucketStorage,
        entities::{DayRecord, EntityKey, Ongoing},
        settings::Settings,
    },
    utils::{
        percentage::{ms_percentage, Percentage},
        time::DateRange,
    },
};

use self::category::{Category, CategoryTable};

/// How many day files are read at the same time.
const CONCURRENT_READS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayTotal {
    pub date: NaiveDate,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TodayStats {
    pub screen_time_ms: u64,
    pub goal_ms: u64,
    /// Progress towards the daily goal, at most 100%.
    pub goal_percentage: Percentage,
    pub entity_count: usize,
    pub top_entity: Option<(EntityKey, u64)>,
}

pub struct Aggregator<S> {
    storage: S,
    live: Option<(NaiveDate, Ongoing)>,
}

impl<S: BucketStorage> Aggregator<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            live: None,
        }
    }

    /// Adds the interval the daemon is accruing right now to the bucket of `date`.
    pub fn with_ongoing(mut self, date: NaiveDate, ongoing: Option<Ongoing>) -> Self {
        self.live = ongoing.filter(|v| v.ms > 0).map(|v| (date, v));
        self
    }

    async fn load_day(&self, date: NaiveDate) -> Result<DayRecord> {
        let mut record = self.storage.get_day(date).await?;
        if let Some((live_date, ongoing)) = &self.live {
            if *live_date == date {
                *record.entry(ongoing.entity.clone()).or_insert(0) += ongoing.ms;
            }
        }
        Ok(record)
    }

    /// Buckets of every day in `range`, oldest first. Missing days are empty buckets.
    pub async fn load_days(&self, range: DateRange) -> Result<Vec<(NaiveDate, DayRecord)>> {
        stream::iter(range.days())
            .map(|date| async move { self.load_day(date).await.map(|record| (date, record)) })
            .buffered(CONCURRENT_READS)
            .try_collect()
            .await
    }

    /// Every stored bucket plus the live interval.
    pub async fn load_all(&self) -> Result<BTreeMap<NaiveDate, DayRecord>> {
        let mut days = self.storage.days().await?;
        if let Some((date, _)) = &self.live {
            if !days.contains(date) {
                days.push(*date);
            }
        }
        stream::iter(days)
            .map(|date| async move { self.load_day(date).await.map(|record| (date, record)) })
            .buffered(CONCURRENT_READS)
            .try_collect()
            .await
    }

    pub async fn today_totals(&self, today: NaiveDate) -> Result<DayRecord> {
        self.load_day(today).await
    }

    /// Per-day totals of the `days` days ending with `today`, oldest first.
    pub async fn daily_series(&self, days: u32, today: NaiveDate) -> Result<Vec<DayTotal>> {
        if days == 0 {
            return Ok(vec![]);
        }
        Ok(self
            .load_days(DateRange::last_days(days, today))
            .await?
            .into_iter()
            .map(|(date, record)| DayTotal {
                date,
                total_ms: record.values().sum(),
            })
            .collect())
    }

    pub async fn range_total(&self, range: DateRange) -> Result<u64> {
        Ok(self
            .load_days(range)
            .await?
            .iter()
            .flat_map(|(_, record)| record.values())
            .sum())
    }

    pub async fn monthly_total(&self, today: NaiveDate) -> Result<u64> {
        self.range_total(DateRange::month_to_date(today)).await
    }

    /// Sum per entity over `range`.
    pub async fn entity_totals(&self, range: DateRange) -> Result<DayRecord> {
        let mut totals = DayRecord::new();
        for (_, record) in self.load_days(range).await? {
            for (entity, ms) in record {
                *totals.entry(entity).or_insert(0) += ms;
            }
        }
        Ok(totals)
    }

    /// Entities with the most time in `range`. Equal totals are ordered by key.
    pub async fn top_entities(
        &self,
        range: DateRange,
        limit: usize,
    ) -> Result<Vec<(EntityKey, u64)>> {
        Ok(rank(self.entity_totals(range).await?, limit))
    }

    pub async fn category_totals(
        &self,
        table: &CategoryTable,
        range: DateRange,
    ) -> Result<BTreeMap<Category, u64>> {
        let mut totals = BTreeMap::new();
        for (entity, ms) in self.entity_totals(range).await? {
            *totals.entry(table.lookup(&entity)).or_insert(0) += ms;
        }
        Ok(totals)
    }

    pub async fn today_stats(&self, today: NaiveDate, settings: &Settings) -> Result<TodayStats> {
        let record = self.today_totals(today).await?;
        let screen_time_ms = record.values().sum();
        let goal_ms = settings.daily_goal_ms();
        Ok(TodayStats {
            screen_time_ms,
            goal_ms,
            goal_percentage: ms_percentage(screen_time_ms, goal_ms).capped(100.),
            entity_count: record.len(),
            top_entity: rank(record, 1).into_iter().next(),
        })
    }
}

/// Descending by time, ties broken by key ascending.
pub fn rank(totals: DayRecord, limit: usize) -> Vec<(EntityKey, u64)> {
    let mut ranked = totals.into_iter().collect::<Vec<_>>();
    // The map is already ordered by key, a stable sort keeps that order for equal totals.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(limit);
    ranked
}
