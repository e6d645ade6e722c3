use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, oneshot},
};
use tokio_util::{
    bytes::BytesMut,
    codec::{Decoder, LinesCodec},
    sync::CancellationToken,
};
use tracing::{debug, error, info, warn};

use crate::daemon::tracking::TrackerMessage;

use super::{
    protocol::{decode_request, encode_line, Request, Response, MAX_REQUEST_FRAME_SIZE},
    PORT_FILE,
};

/// Accepts clients and forwards their requests to the tracker.
pub struct IpcServer {
    listener: TcpListener,
    port_file: PathBuf,
    tracker: mpsc::Sender<TrackerMessage>,
    changes: broadcast::Sender<NaiveDate>,
    shutdown: CancellationToken,
}

impl IpcServer {
    /// Binds a free loopback port and publishes it in the application directory.
    pub async fn bind(
        app_dir: &Path,
        tracker: mpsc::Sender<TrackerMessage>,
        changes: broadcast::Sender<NaiveDate>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
        let port = listener.local_addr()?.port();
        let port_file = app_dir.join(PORT_FILE);
        tokio::fs::write(&port_file, port.to_string())
            .await
            .with_context(|| format!("Failed to publish port in {port_file:?}"))?;
        info!("Listening on port {port}");

        Ok(Self {
            listener,
            port_file,
            tracker,
            changes,
            shutdown,
        })
    }

    pub fn port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    pub async fn run(self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        debug!("Client connected from {address}");
                        let client = ClientConnection {
                            tracker: self.tracker.clone(),
                            changes: self.changes.clone(),
                            shutdown: self.shutdown.clone(),
                        };
                        tokio::spawn(async move {
                            if let Err(e) = client.serve(stream).await {
                                warn!("Client connection failed {e:?}");
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept a client {e:?}"),
                }
            }
        }

        if let Err(e) = tokio::fs::remove_file(&self.port_file).await {
            warn!("Failed to remove {:?}: {e}", self.port_file);
        }
        Ok(())
    }
}

struct ClientConnection {
    tracker: mpsc::Sender<TrackerMessage>,
    changes: broadcast::Sender<NaiveDate>,
    shutdown: CancellationToken,
}

impl ClientConnection {
    async fn serve(self, mut stream: TcpStream) -> Result<()> {
        let (mut reader, mut writer) = stream.split();
        let mut codec = LinesCodec::new_with_max_length(MAX_REQUEST_FRAME_SIZE);
        let mut buffer = BytesMut::new();

        loop {
            let line = match codec.decode(&mut buffer) {
                Ok(Some(line)) => Ok(line),
                Ok(None) => {
                    let read = tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        read = reader.read_buf(&mut buffer) => read?,
                    };
                    if read == 0 {
                        debug!("Client disconnected");
                        break;
                    }
                    continue;
                }
                // The codec skips the rest of a rejected line by itself.
                Err(e) => Err(Response::error(format!("Rejected request line: {e}"))),
            };

            let response = match line.and_then(|line| decode_request(&line)) {
                Ok(request) => match self.answer(request).await {
                    Some(response) => response,
                    None => break,
                },
                Err(response) => response,
            };
            writer.write_all(&encode_line(&response)?).await?;
            writer.flush().await?;
        }
        Ok(())
    }

    /// Returns [None] when the daemon stops before the answer is ready.
    async fn answer(&self, request: Request) -> Option<Response> {
        if request == Request::WaitForChange {
            return self.wait_for_change().await;
        }

        let (reply, answer) = oneshot::channel();
        if self
            .tracker
            .send(TrackerMessage::Request(request, reply))
            .await
            .is_err()
        {
            return Some(Response::error("Tracker is not running"));
        }
        Some(
            answer
                .await
                .unwrap_or_else(|_| Response::error("Tracker stopped before answering")),
        )
    }

    async fn wait_for_change(&self) -> Option<Response> {
        let mut changes = self.changes.subscribe();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                change = changes.recv() => match change {
                    Ok(date) => return Some(Response::Changed { date }),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }
}
