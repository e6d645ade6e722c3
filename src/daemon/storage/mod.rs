//! Storage is organized around daily buckets.
//! The basic idea is:
//!  - There is a directory with one JSON file per UTC day, named `YYYY-MM-DD.json`.
//!  - Each file maps an entity to the milliseconds accumulated for it that day.
//!  - The tracker only ever adds to a bucket through [gateway::PersistenceGateway].
//!
//! Sessions and settings live next to the records directory.

pub mod bucket_storage;
pub mod entities;
pub mod gateway;
pub mod sessions;
pub mod settings;

/// Directory of the daily bucket files inside the application directory.
pub const RECORDS_DIR: &str = "records";
pub const SETTINGS_FILE: &str = "settings.json";
pub const SESSIONS_FILE: &str = "sessions.jsonl";
