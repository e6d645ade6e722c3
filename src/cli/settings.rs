use std::path::Path;

use anyhow::{bail, Result};
use clap::Subcommand;
use tracing::debug;

use crate::daemon::{
    ipc::{
        client::IpcClient,
        protocol::{Request, Response},
    },
    storage::{
        settings::{Settings, SettingsPatch, SettingsStore},
        SETTINGS_FILE,
    },
};

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    #[command(about = "Print current settings")]
    Get,
    #[command(about = "Change some of the settings. Omitted values stay as they are")]
    Set {
        #[arg(long)]
        daily_goal_minutes: Option<u32>,
        #[arg(long)]
        weekly_goal_minutes: Option<u32>,
        #[arg(long)]
        break_reminder_enabled: Option<bool>,
        #[arg(long)]
        break_reminder_interval_minutes: Option<u32>,
        #[arg(long)]
        notifications: Option<bool>,
    },
}

pub async fn process_settings_command(app_dir: &Path, command: SettingsCommand) -> Result<()> {
    let settings = match command {
        SettingsCommand::Get => load(app_dir).await?,
        SettingsCommand::Set {
            daily_goal_minutes,
            weekly_goal_minutes,
            break_reminder_enabled,
            break_reminder_interval_minutes,
            notifications,
        } => {
            update(
                app_dir,
                SettingsPatch {
                    daily_goal_minutes,
                    weekly_goal_minutes,
                    break_reminder_enabled,
                    break_reminder_interval_minutes,
                    notifications,
                },
            )
            .await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

/// Settings as the daemon sees them, or as stored when it isn't running.
pub async fn load(app_dir: &Path) -> Result<Settings> {
    if let Some(response) = ask_daemon(app_dir, Request::GetSettings).await {
        return into_settings(response);
    }
    SettingsStore::new(app_dir.join(SETTINGS_FILE)).load().await
}

/// A running daemon applies the patch itself so it picks up the change right away.
async fn update(app_dir: &Path, patch: SettingsPatch) -> Result<Settings> {
    if let Some(response) = ask_daemon(app_dir, Request::UpdateSettings { patch: patch.clone() }).await {
        return into_settings(response);
    }
    SettingsStore::new(app_dir.join(SETTINGS_FILE)).update(patch).await
}

async fn ask_daemon(app_dir: &Path, request: Request) -> Option<Response> {
    let mut client = IpcClient::connect(app_dir)
        .await
        .inspect_err(|e| debug!("Daemon is unreachable {e:?}"))
        .ok()?;
    client
        .request(&request)
        .await
        .inspect_err(|e| debug!("Daemon failed to answer {e:?}"))
        .ok()
}

fn into_settings(response: Response) -> Result<Settings> {
    match response {
        Response::Settings { settings } => Ok(settings),
        Response::Error { message } => bail!("Daemon refused: {message}"),
        other => bail!("Unexpected answer {other:?}"),
    }
}
