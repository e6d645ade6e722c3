use std::{fmt::Write, path::Path};

use ansi_term::Style;
use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::{
    daemon::{
        ipc::{
            client::IpcClient,
            protocol::{Request, Response},
        },
        storage::{
            bucket_storage::BucketStorage,
            entities::{EntityKey, Ongoing},
            settings::Settings,
        },
    },
    query::{category::CategoryTable, rank, Aggregator, DayTotal},
    utils::{
        percentage::ms_percentage,
        time::{date_key, format_duration_ms, DateRange},
    },
};

/// Asks a running daemon to save what it buffered and returns the interval it is accruing.
/// Without a daemon only stored data is reported.
pub async fn fetch_live(app_dir: &Path) -> Option<Ongoing> {
    let mut client = match IpcClient::connect(app_dir).await {
        Ok(client) => client,
        Err(e) => {
            debug!("No live data {e:?}");
            return None;
        }
    };
    if let Err(e) = client.request(&Request::ForceReload).await {
        debug!("Daemon didn't save buffered time {e:?}");
    }
    match client.request(&Request::GetOngoingTime).await {
        Ok(Response::Ongoing {
            entity: Some(entity),
            ms,
        }) => Some(Ongoing { entity, ms }),
        Ok(other) => {
            debug!("Nothing is accruing {other:?}");
            None
        }
        Err(e) => {
            debug!("Failed to query the daemon {e:?}");
            None
        }
    }
}

pub async fn print_today(
    aggregator: &Aggregator<impl BucketStorage>,
    today: NaiveDate,
    settings: &Settings,
) -> Result<()> {
    let stats = aggregator.today_stats(today, settings).await?;
    println!("{}", Style::new().bold().paint(format!("Today ({})", date_key(today))));
    println!(
        "Screen time\t{}\t{} of the {} goal",
        format_duration_ms(stats.screen_time_ms),
        stats.goal_percentage,
        format_duration_ms(stats.goal_ms)
    );
    if let Some((entity, ms)) = &stats.top_entity {
        println!("Most used\t{}\t{entity}", format_duration_ms(*ms));
    }
    println!();
    let record = aggregator.today_totals(today).await?;
    let len = record.len();
    print!("{}", render_entities(&rank(record, len), stats.screen_time_ms));
    Ok(())
}

pub async fn print_week(
    aggregator: &Aggregator<impl BucketStorage>,
    today: NaiveDate,
    days: u32,
    settings: &Settings,
) -> Result<()> {
    let series = aggregator.daily_series(days, today).await?;
    let total = series.iter().map(|v| v.total_ms).sum::<u64>();
    let goal_ms = u64::from(settings.weekly_goal_minutes) * 60_000;
    println!("{}", Style::new().bold().paint(format!("Last {days} days")));
    print!("{}", render_series(&series));
    println!(
        "Total\t{}\t{} of the {} weekly goal",
        format_duration_ms(total),
        ms_percentage(total, goal_ms).capped(100.),
        format_duration_ms(goal_ms)
    );
    Ok(())
}

pub async fn print_month(aggregator: &Aggregator<impl BucketStorage>, today: NaiveDate) -> Result<()> {
    let total = aggregator.monthly_total(today).await?;
    let days = today.day();
    println!("{}", Style::new().bold().paint(today.format("%B %Y").to_string()));
    println!("Total\t{}", format_duration_ms(total));
    println!("Daily average\t{}", format_duration_ms(total / u64::from(days)));
    Ok(())
}

pub async fn print_top(
    aggregator: &Aggregator<impl BucketStorage>,
    range: DateRange,
    limit: usize,
) -> Result<()> {
    let total = aggregator.range_total(range).await?;
    let top = aggregator.top_entities(range, limit).await?;
    println!("{}", Style::new().bold().paint(range_title(range)));
    print!("{}", render_entities(&top, total));
    Ok(())
}

pub async fn print_categories(
    aggregator: &Aggregator<impl BucketStorage>,
    range: DateRange,
) -> Result<()> {
    let totals = aggregator.category_totals(&CategoryTable::default(), range).await?;
    let total = totals.values().sum::<u64>();
    let mut ranked = totals.into_iter().collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    println!("{}", Style::new().bold().paint(range_title(range)));
    for (category, ms) in ranked {
        println!(
            "{}\t{}\t{category}",
            ms_percentage(ms, total),
            format_duration_ms(ms)
        );
    }
    Ok(())
}

pub fn print_ongoing(ongoing: Option<&Ongoing>) {
    match ongoing {
        Some(Ongoing { entity, ms }) if *ms > 0 => {
            println!("{entity}\t{}", format_duration_ms(*ms))
        }
        Some(Ongoing { entity, .. }) => println!("{entity}\tjust started"),
        None => println!("Nothing is being tracked"),
    }
}

fn range_title(range: DateRange) -> String {
    if range.start == range.end {
        date_key(range.start)
    } else {
        format!("{} - {}", date_key(range.start), date_key(range.end))
    }
}

fn render_entities(entries: &[(EntityKey, u64)], total: u64) -> String {
    let mut out = String::new();
    for (entity, ms) in entries {
        let _ = writeln!(
            out,
            "{}\t{}\t{entity}",
            ms_percentage(*ms, total),
            format_duration_ms(*ms)
        );
    }
    out
}

const BAR_WIDTH: u64 = 30;

fn render_series(series: &[DayTotal]) -> String {
    let max = series.iter().map(|v| v.total_ms).max().unwrap_or(0);
    let mut out = String::new();
    for day in series {
        let width = if max == 0 { 0 } else { day.total_ms * BAR_WIDTH / max };
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            day.date.format("%a %d"),
            "#".repeat(width as usize),
            format_duration_ms(day.total_ms)
        );
    }
    out
}
