//! Tracks how long you spend on each website or desktop application and reports daily totals.
//! A small daemon does the tracking, the cli reads what it stored and asks it for the interval
//! that is still running.

pub mod cli;
pub mod daemon;
pub mod export;
pub mod fs;
pub mod query;
pub mod utils;
