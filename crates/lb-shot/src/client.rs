//! Client side of the shot protocol.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use lb_types::{ShotError, ShotResult};

use crate::protocol::{ShotReply, ShotRequest};

/// Sends one request per connection and waits for its reply. A timeout is
/// reported to the caller; the request is never retried.
#[derive(Debug, Clone)]
pub struct ShotClient {
    address: String,
    reply_timeout: Duration,
}

impl ShotClient {
    pub fn new(address: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            reply_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the artifact path from the acknowledgement.
    pub async fn send(&self, request: &ShotRequest) -> ShotResult<String> {
        let line = request.encode()?;
        let reply = tokio::time::timeout(self.reply_timeout, self.exchange(&line))
            .await
            .map_err(|_| ShotError::ReplyTimeout {
                timeout_ms: self.reply_timeout.as_millis() as u64,
            })??;

        match reply {
            ShotReply::Ack { message, artifact } => {
                debug!(trial = request.trial_number, %message, %artifact, "shot acknowledged");
                Ok(artifact)
            }
            ShotReply::Error { message } => Err(ShotError::Rejected { message }),
        }
    }

    async fn exchange(&self, line: &str) -> ShotResult<ShotReply> {
        let transport = |e: std::io::Error| ShotError::Transport {
            message: format!("{}: {e}", self.address),
        };

        let stream = TcpStream::connect(&self.address).await.map_err(transport)?;
        let (read, mut write) = stream.into_split();
        write.write_all(line.as_bytes()).await.map_err(transport)?;
        write.write_all(b"\n").await.map_err(transport)?;
        write.flush().await.map_err(transport)?;

        let mut reply = String::new();
        let n = BufReader::new(read)
            .read_line(&mut reply)
            .await
            .map_err(transport)?;
        if n == 0 {
            return Err(ShotError::Transport {
                message: format!("{} closed the connection without replying", self.address),
            });
        }
        serde_json::from_str(reply.trim()).map_err(|e| ShotError::Transport {
            message: format!("undecodable reply: {e}"),
        })
    }
}
