use std::fmt::Display;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use chrono_english::parse_date_string;
use clap::{CommandFactory, ValueEnum};

use crate::utils::time::DateRange;

use super::Args;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

const DEFAULT_RANGE_DAYS: u32 = 7;

/// Range of whole days shared by the reporting commands.
#[derive(Debug, Clone, clap::Args)]
pub struct RangeArgs {
    #[arg(
        long = "start",
        short,
        help = "First day of the range. Examples are \"yesterday\", \"3 days ago\", \"15/03/2025\""
    )]
    start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "Last day of the range. Examples are \"today\", \"yesterday\", \"15/03/2025\""
    )]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

impl RangeArgs {
    /// Resolves the range against `today`. Without a start the range covers the last week.
    pub fn resolve(&self, today: NaiveDate) -> Result<DateRange> {
        let end = match &self.end_date {
            Some(end) => parse_day(end, self.date_style, "end")?,
            None => today,
        };
        let start = match &self.start_date {
            Some(start) => parse_day(start, self.date_style, "start")?,
            None => DateRange::last_days(DEFAULT_RANGE_DAYS, end).start,
        };
        Ok(DateRange::new(start, end))
    }
}

fn parse_day(value: &str, style: DateStyle, name: &str) -> Result<NaiveDate> {
    match parse_date_string(value, Utc::now(), style.into()) {
        Ok(v) => Ok(v.date_naive()),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate {name} date {e}"),
            )
            .into()),
    }
}
