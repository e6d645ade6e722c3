use std::{borrow::Borrow, collections::BTreeMap, fmt::Display, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the thing time is attributed to: a hostname for the browser source or a process
/// name for the desktop source. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey(Arc<str>);

impl EntityKey {
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(value.into()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityKey {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EntityKey::new(value).ok_or("entity key can't be empty")
    }
}

impl From<EntityKey> for String {
    fn from(value: EntityKey) -> Self {
        value.0.to_string()
    }
}

impl Borrow<str> for EntityKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content of a single day file: accumulated milliseconds per entity.
pub type DayRecord = BTreeMap<EntityKey, u64>;

/// Time accrued by the active entity since the last checkpoint, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ongoing {
    pub entity: EntityKey,
    pub ms: u64,
}

/// One continuous run of the desktop tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntity {
    pub date: NaiveDate,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SessionEntity {
    pub fn started_at(start: DateTime<Utc>) -> Self {
        Self {
            date: start.date_naive(),
            start,
            end: start,
            duration_ms: 0,
        }
    }

    /// Moves the end of the session forward. The end never moves before the start.
    pub fn extend_to(&mut self, end: DateTime<Utc>) {
        if end > self.end {
            self.end = end;
        }
        self.duration_ms = (self.end - self.start).num_milliseconds().max(0) as u64;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{DayRecord, EntityKey, SessionEntity};

    #[test]
    fn test_entity_key_rejects_empty() {
        assert_eq!(EntityKey::new("   "), None);
        assert_eq!(EntityKey::new(" example.com ").unwrap().as_str(), "example.com");
        assert!(serde_json::from_str::<EntityKey>("\"\"").is_err());
    }

    #[test]
    fn test_day_record_is_a_json_object() -> anyhow::Result<()> {
        let mut record = DayRecord::new();
        record.insert(EntityKey::new("github.com").unwrap(), 12_000);
        let json = serde_json::to_string(&record)?;
        assert_eq!(json, r#"{"github.com":12000}"#);
        assert_eq!(serde_json::from_str::<DayRecord>(&json)?, record);
        assert_eq!(record.get("github.com"), Some(&12_000));
        Ok(())
    }

    #[test]
    fn test_session_extend_never_goes_back() {
        let start = Utc.with_ymd_and_hms(2024, 6, 9, 10, 0, 0).unwrap();
        let mut session = SessionEntity::started_at(start);
        session.extend_to(start + Duration::seconds(30));
        session.extend_to(start + Duration::seconds(10));
        assert_eq!(session.duration_ms, 30_000);
        assert_eq!(session.end, start + Duration::seconds(30));
    }
}
