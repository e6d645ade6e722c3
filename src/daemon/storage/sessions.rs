use std::{io::ErrorKind, path::PathBuf};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader},
};
use tracing::warn;

use crate::fs::operations::last_line_start;

use super::entities::SessionEntity;

/// Session log, one JSON line per tracker run. The line of the running session is the last one
/// and gets rewritten in place as the session grows.
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn open(&self) -> Result<File> {
        Ok(File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(&self.path)
            .await?)
    }

    /// Starts a new line for `session`.
    pub async fn begin(&self, session: &SessionEntity) -> Result<()> {
        let mut file = self.open().await?;
        file.lock_exclusive()?;
        let result = async {
            file.seek(std::io::SeekFrom::End(0)).await?;
            write_line(&mut file, session).await
        }
        .await;
        file.unlock_async().await?;
        result
    }

    /// Overwrites the last line with `session`.
    pub async fn update_last(&self, session: &SessionEntity) -> Result<()> {
        let mut file = self.open().await?;
        file.lock_exclusive()?;
        let result = async {
            let position = last_line_start(&mut file, &mut [0; 1024]).await?;
            file.set_len(position).await?;
            file.seek(std::io::SeekFrom::Start(position)).await?;
            write_line(&mut file, session).await
        }
        .await;
        file.unlock_async().await?;
        result
    }

    pub async fn read_all(&self) -> Result<Vec<SessionEntity>> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => Err(e)?,
        };
        let mut lines = BufReader::new(file).lines();
        let mut sessions = vec![];
        while let Some(line) = lines.next_line().await? {
            match serde_json::from_str::<SessionEntity>(&line) {
                Ok(v) => sessions.push(v),
                // ignore illegal values. Might happen after shutdowns
                Err(e) => warn!("Illegal session line {line:?} in {:?}: {e}", self.path),
            }
        }
        Ok(sessions)
    }
}

async fn write_line(file: &mut File, session: &SessionEntity) -> Result<()> {
    let mut buffer = serde_json::to_vec(session)?;
    buffer.push(b'\n');
    file.write_all(&buffer).await?;
    file.flush().await?;
    Ok(())
}
