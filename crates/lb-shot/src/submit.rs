//! Downstream submission of compiled artifacts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use lb_types::{ShotError, ShotResult, SubmitConfig};

/// Receives artifacts once they are fully written.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, artifact: PathBuf) -> ShotResult<()>;

    fn name(&self) -> &str;
}

/// Logs each artifact and keeps the list of submitted paths.
#[derive(Debug, Default)]
pub struct LoggingSubmitter {
    submitted: Mutex<Vec<PathBuf>>,
}

impl LoggingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<PathBuf> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl Submitter for LoggingSubmitter {
    async fn submit(&self, artifact: PathBuf) -> ShotResult<()> {
        info!(artifact = %artifact.display(), "artifact ready");
        self.submitted.lock().push(artifact);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Forwards the artifact path to a queueing endpoint as one JSON line and
/// waits for a one-line reply.
#[derive(Debug, Clone)]
pub struct TcpSubmitter {
    address: String,
    timeout: Duration,
}

impl TcpSubmitter {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, artifact: &PathBuf) -> ShotResult<String> {
        let mut stream = TcpStream::connect(&self.address).await?;
        let line = serde_json::json!({ "artifact": artifact.display().to_string() }).to_string();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).await?;
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl Submitter for TcpSubmitter {
    async fn submit(&self, artifact: PathBuf) -> ShotResult<()> {
        let reply = tokio::time::timeout(self.timeout, self.exchange(&artifact))
            .await
            .map_err(|_| ShotError::Submit {
                message: format!("{} did not answer within {:?}", self.address, self.timeout),
            })?
            .map_err(|e| ShotError::Submit {
                message: e.to_string(),
            })?;
        debug!(artifact = %artifact.display(), reply = %reply, "artifact submitted");
        Ok(())
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

pub fn submitter_from_config(config: &SubmitConfig) -> Arc<dyn Submitter> {
    match config {
        SubmitConfig::Log => Arc::new(LoggingSubmitter::new()),
        SubmitConfig::Tcp { address } => Arc::new(TcpSubmitter::new(address.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_logging_submitter_records_paths() {
        let submitter = LoggingSubmitter::new();
        submitter.submit(PathBuf::from("/tmp/a.json")).await.unwrap();
        submitter.submit(PathBuf::from("/tmp/b.json")).await.unwrap();
        assert_eq!(
            submitter.submitted(),
            vec![PathBuf::from("/tmp/a.json"), PathBuf::from("/tmp/b.json")]
        );
    }

    #[tokio::test]
    async fn test_tcp_submitter_sends_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let queue = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut line = String::new();
            BufReader::new(read).read_line(&mut line).await.unwrap();
            write.write_all(b"queued\n").await.unwrap();
            line
        });

        let submitter = TcpSubmitter::new(addr.to_string());
        submitter.submit(PathBuf::from("/tmp/trial.json")).await.unwrap();
        let line = queue.await.unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["artifact"], "/tmp/trial.json");
    }

    #[tokio::test]
    async fn test_tcp_submitter_unreachable_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let submitter = TcpSubmitter::new(addr.to_string()).with_timeout(Duration::from_millis(500));
        let err = submitter.submit(PathBuf::from("/tmp/x.json")).await.unwrap_err();
        assert!(matches!(err, ShotError::Submit { .. }));
    }

    #[test]
    fn test_factory_follows_config() {
        assert_eq!(submitter_from_config(&SubmitConfig::Log).name(), "log");
        let tcp = SubmitConfig::Tcp {
            address: "127.0.0.1:1".into(),
        };
        assert_eq!(submitter_from_config(&tcp).name(), "tcp");
    }
}
