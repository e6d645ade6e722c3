use std::{path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use super::{
    protocol::{encode_line, Request, Response},
    PORT_FILE,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection to a running daemon.
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl IpcClient {
    /// Connects to the daemon that published its port in `app_dir`.
    pub async fn connect(app_dir: &Path) -> Result<Self> {
        let port_file = app_dir.join(PORT_FILE);
        let port: u16 = tokio::fs::read_to_string(&port_file)
            .await
            .with_context(|| format!("Daemon is not running, {port_file:?} is missing"))?
            .trim()
            .parse()
            .with_context(|| format!("Invalid port in {port_file:?}"))?;

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port)))
            .await
            .context("Timed out connecting to the daemon")?
            .context("Failed to connect to the daemon")?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        self.writer.write_all(&encode_line(request)?).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            bail!("Daemon closed the connection");
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}
