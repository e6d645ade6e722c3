//! CSV export of day buckets.

use std::io::Write;

use anyhow::Result;
use chrono::NaiveDate;

use crate::{
    daemon::storage::entities::{DayRecord, EntityKey},
    query::rank,
    utils::{
        percentage::{ms_percentage, Percentage},
        time::{date_key, format_duration_ms},
    },
};

pub const CSV_HEADER: &str = "date,entity,duration_ms,formatted_duration,percentage";

#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub date: NaiveDate,
    pub entity: EntityKey,
    pub duration_ms: u64,
    /// Share of the day's total.
    pub percentage: Percentage,
}

/// One row per entity and day. Days keep their order, entities within a day go from most to
/// least time.
pub fn export_rows(days: impl IntoIterator<Item = (NaiveDate, DayRecord)>) -> Vec<CsvRow> {
    let mut rows = vec![];
    for (date, record) in days {
        let total = record.values().sum();
        let len = record.len();
        rows.extend(rank(record, len).into_iter().map(|(entity, duration_ms)| CsvRow {
            date,
            entity,
            duration_ms,
            percentage: ms_percentage(duration_ms, total),
        }));
    }
    rows
}

pub fn write_csv(rows: &[CsvRow], mut out: impl Write) -> Result<()> {
    writeln!(out, "{CSV_HEADER}")?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{}",
            date_key(row.date),
            escape(row.entity.as_str()),
            row.duration_ms,
            format_duration_ms(row.duration_ms),
            row.percentage.round(),
        )?;
    }
    out.flush()?;
    Ok(())
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
