use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use args::{Source, TrackerConfig};
use collection::{
    poller::ActiveAppPoller,
    snapshot::{ProcessSnapshot, SystemSnapshot},
};
use ipc::server::IpcServer;
use storage::{
    bucket_storage::FileBucketStorage,
    gateway::{StorageGateway, WriteMode, DEFAULT_STORE_TIMEOUT},
    sessions::SessionLog,
    settings::SettingsStore,
    RECORDS_DIR, SESSIONS_FILE, SETTINGS_FILE,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracking::{TrackerMessage, TrackerModule, TrackerOptions};

use crate::utils::clock::{Clock, DefaultClock};

pub mod args;
pub mod collection;
pub mod error;
pub mod ipc;
pub mod shutdown;
pub mod storage;
pub mod tracking;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf, config: TrackerConfig) -> Result<()> {
    let dir = std::path::absolute(dir)?;
    std::env::set_current_dir("/")?;
    info!("Starting {:?} tracker in {dir:?}", config.source);

    let shutdown_token = CancellationToken::new();
    let (sender, receiver) = mpsc::channel::<TrackerMessage>(32);

    let storage = Arc::new(FileBucketStorage::new(dir.join(RECORDS_DIR))?);
    let server = IpcServer::bind(
        &dir,
        sender.clone(),
        storage.change_sender(),
        shutdown_token.clone(),
    )
    .await?;

    let tracker = create_tracker(&dir, storage, receiver, &config, &shutdown_token, DefaultClock).await?;

    let poller = match config.source {
        Source::Desktop => Some(create_poller(
            sender,
            SystemSnapshot::new(),
            &config,
            &shutdown_token,
            DefaultClock,
        )),
        Source::Browser => None,
    };

    let (_, tracker_result, server_result, poller_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        tracker.run(),
        server.run(),
        async {
            match poller {
                Some(poller) => poller.run().await,
                None => Ok(()),
            }
        },
    );

    if let Err(tracker_result) = tracker_result {
        error!("Tracker got an error {:?}", tracker_result);
    }

    if let Err(server_result) = server_result {
        error!("Listener got an error {:?}", server_result);
    }

    if let Err(poller_result) = poller_result {
        error!("Poller got an error {:?}", poller_result);
    }

    Ok(())
}

async fn create_tracker(
    dir: &std::path::Path,
    storage: Arc<FileBucketStorage>,
    receiver: mpsc::Receiver<TrackerMessage>,
    config: &TrackerConfig,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> Result<TrackerModule<StorageGateway<Arc<FileBucketStorage>>>> {
    let settings_store = SettingsStore::new(dir.join(SETTINGS_FILE));
    let settings = settings_store.load().await?;

    let (mode, sessions) = match config.source {
        Source::Desktop => (
            WriteMode::Batched,
            Some(SessionLog::new(dir.join(SESSIONS_FILE))),
        ),
        Source::Browser => (WriteMode::Immediate, None),
    };

    Ok(TrackerModule::new(
        receiver,
        StorageGateway::new(storage, mode, DEFAULT_STORE_TIMEOUT),
        settings,
        settings_store,
        sessions,
        TrackerOptions {
            tick_interval: config.tick_interval,
            min_tracking_ms: config.min_tracking_ms,
        },
        shutdown_token.clone(),
        Box::new(clock),
    ))
}

fn create_poller(
    sender: mpsc::Sender<TrackerMessage>,
    snapshot: impl ProcessSnapshot + 'static,
    config: &TrackerConfig,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> ActiveAppPoller {
    ActiveAppPoller::new(
        sender,
        Box::new(snapshot),
        shutdown_token.clone(),
        config.poll_interval,
        Box::new(clock),
    )
}
