use std::{io::ErrorKind, path::PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// User preferences. Missing fields fall back to defaults so older files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub daily_goal_minutes: u32,
    pub weekly_goal_minutes: u32,
    pub break_reminder_enabled: bool,
    pub break_reminder_interval_minutes: u32,
    pub notifications: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daily_goal_minutes: 8 * 60,
            weekly_goal_minutes: 40 * 60,
            break_reminder_enabled: false,
            break_reminder_interval_minutes: 60,
            notifications: true,
        }
    }
}

/// Partial update of [Settings]. Only present fields are changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_goal_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_goal_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_reminder_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_reminder_interval_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<bool>,
}

impl Settings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        let SettingsPatch {
            daily_goal_minutes,
            weekly_goal_minutes,
            break_reminder_enabled,
            break_reminder_interval_minutes,
            notifications,
        } = patch;
        if let Some(v) = daily_goal_minutes {
            self.daily_goal_minutes = v;
        }
        if let Some(v) = weekly_goal_minutes {
            self.weekly_goal_minutes = v;
        }
        if let Some(v) = break_reminder_enabled {
            self.break_reminder_enabled = v;
        }
        if let Some(v) = break_reminder_interval_minutes {
            // A zero interval would remind on every tick.
            self.break_reminder_interval_minutes = v.max(1);
        }
        if let Some(v) = notifications {
            self.notifications = v;
        }
    }

    pub fn daily_goal_ms(&self) -> u64 {
        u64::from(self.daily_goal_minutes) * 60_000
    }
}

/// Keeps [Settings] in a JSON file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<Settings> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => Err(e)?,
        };
        match serde_json::from_str(&content) {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!("Settings file {:?} is unreadable, using defaults: {e}", self.path);
                Ok(Settings::default())
            }
        }
    }

    pub async fn save(&self, settings: &Settings) -> Result<()> {
        let buffer = serde_json::to_vec_pretty(settings)?;
        let temporary = self.path.with_extension("json.tmp");
        tokio::fs::write(&temporary, buffer).await?;
        tokio::fs::rename(&temporary, &self.path).await?;
        Ok(())
    }

    /// Loads, patches and saves settings, returning the result.
    pub async fn update(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut settings = self.load().await?;
        settings.apply(patch);
        self.save(&settings).await?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{Settings, SettingsPatch, SettingsStore};

    #[tokio::test]
    async fn test_missing_settings_are_defaults() -> Result<()> {
        let dir = tempdir()?;
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().await?, Settings::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() -> Result<()> {
        let dir = tempdir()?;
        let store = SettingsStore::new(dir.path().join("settings.json"));

        store
            .update(SettingsPatch {
                break_reminder_enabled: Some(true),
                ..Default::default()
            })
            .await?;
        let settings = store
            .update(SettingsPatch {
                daily_goal_minutes: Some(120),
                break_reminder_interval_minutes: Some(0),
                ..Default::default()
            })
            .await?;

        assert!(settings.break_reminder_enabled);
        assert_eq!(settings.daily_goal_minutes, 120);
        assert_eq!(settings.break_reminder_interval_minutes, 1);
        assert_eq!(settings.weekly_goal_minutes, 2400);
        assert_eq!(store.load().await?, settings);
        Ok(())
    }

    #[test]
    fn test_old_files_fill_in_defaults() -> Result<()> {
        let settings: Settings = serde_json::from_str(r#"{"notifications": false}"#)?;
        assert!(!settings.notifications);
        assert_eq!(settings.daily_goal_ms(), 480 * 60_000);
        Ok(())
    }
}
