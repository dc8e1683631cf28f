//! The shot service loop.
//!
//! Connection tasks only frame request lines and queue them; the main loop
//! decodes and compiles one request at a time, so artifacts are produced in
//! arrival order and never concurrently.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use lb_types::ShotResult;

use crate::artifact::{artifact_name, best_artifact_name, ArtifactStore};
use crate::protocol::{request_line, RequestKind, ShotReply, ShotRequest, MAX_REQUEST_BYTES};
use crate::submit::Submitter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Listening,
    Compiling,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownReason {
    /// No request arrived within the idle timeout
    IdleTimeout,
    /// The shutdown future resolved (SIGINT/SIGTERM in the binary)
    Signal,
}

/// Summary returned when the service stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub handled: u64,
    pub failed: u64,
    pub reason: ShutdownReason,
}

struct PendingRequest {
    /// The framed line, or why it could not be framed.
    line: ShotResult<String>,
    reply: oneshot::Sender<ShotReply>,
}

pub struct ShotService {
    listener: TcpListener,
    idle_timeout: Duration,
    store: Arc<dyn ArtifactStore>,
    submitter: Arc<dyn Submitter>,
    state_tx: watch::Sender<ServiceState>,
}

impl ShotService {
    pub async fn bind(
        address: &str,
        idle_timeout: Duration,
        store: Arc<dyn ArtifactStore>,
        submitter: Arc<dyn Submitter>,
    ) -> ShotResult<Self> {
        let listener = TcpListener::bind(address).await?;
        let (state_tx, _) = watch::channel(ServiceState::Listening);
        info!(
            address = %listener.local_addr()?,
            idle_timeout_secs = idle_timeout.as_secs_f64(),
            submitter = submitter.name(),
            "shot service bound"
        );
        Ok(Self {
            listener,
            idle_timeout,
            store,
            submitter,
            state_tx,
        })
    }

    pub fn local_addr(&self) -> ShotResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    /// Serve until `shutdown` resolves or the idle timeout elapses. The
    /// listening socket is released before this returns.
    pub async fn run<F>(self, shutdown: F) -> ServiceStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let (request_tx, mut request_rx) = mpsc::channel::<PendingRequest>(32);
        let mut connections = JoinSet::new();
        let mut deadline = Instant::now() + self.idle_timeout;
        let mut handled = 0u64;
        let mut failed = 0u64;

        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break ShutdownReason::Signal,
                Some(pending) = request_rx.recv() => {
                    deadline = Instant::now() + self.idle_timeout;
                    self.state_tx.send_replace(ServiceState::Compiling);
                    let result = pending
                        .line
                        .and_then(|line| ShotRequest::decode(&line))
                        .and_then(|request| self.handle_request(&request));
                    let reply = match result {
                        Ok(artifact) => {
                            handled += 1;
                            ShotReply::ack(artifact.display().to_string())
                        }
                        Err(e) => {
                            failed += 1;
                            warn!(error = %e, "request failed");
                            ShotReply::error(&e)
                        }
                    };
                    let _ = pending.reply.send(reply);
                    self.state_tx.send_replace(ServiceState::Listening);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        connections.spawn(serve_connection(stream, peer, request_tx.clone()));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = tokio::time::sleep_until(deadline) => break ShutdownReason::IdleTimeout,
            }
        };

        self.state_tx.send_replace(ServiceState::ShuttingDown);
        connections.shutdown().await;
        info!(handled, failed, reason = ?reason, "shot service stopped");
        ServiceStats {
            handled,
            failed,
            reason,
        }
    }

    /// Derive the artifact, apply every substitution and record the trial.
    /// Trial artifacts are handed to the submitter without waiting for the
    /// submission to finish; best-value artifacts are only written.
    pub fn handle_request(&self, request: &ShotRequest) -> ShotResult<PathBuf> {
        let template = Path::new(&request.template);
        let name = match request.kind {
            RequestKind::Trial => artifact_name(template, request.trial_number, Local::now()),
            RequestKind::Best => best_artifact_name(template, Local::now()),
        };
        let output = Path::new(&request.output_folder).join(name);

        self.store.derive(template, &output)?;
        if let Err(e) = self.compile(&output, request) {
            self.store.discard(&output);
            return Err(e);
        }

        info!(
            kind = ?request.kind,
            trial = request.trial_number,
            session = request.session_id.as_deref().unwrap_or("-"),
            artifact = %output.display(),
            substitutions = request.substitutions.len(),
            "artifact compiled"
        );

        if request.kind == RequestKind::Trial {
            let submitter = Arc::clone(&self.submitter);
            let artifact = output.clone();
            tokio::spawn(async move {
                if let Err(e) = submitter.submit(artifact.clone()).await {
                    warn!(artifact = %artifact.display(), error = %e, "submission failed");
                }
            });
        }
        Ok(output)
    }

    fn compile(&self, output: &Path, request: &ShotRequest) -> ShotResult<()> {
        for sub in &request.substitutions {
            self.store
                .set_value(output, &sub.group, &sub.variable, sub.value)?;
        }
        self.store
            .record_trial(output, request.session_id.as_deref(), request.trial_number)
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, requests: mpsc::Sender<PendingRequest>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    // room for the longest body plus "\r\n"
    let limit = MAX_REQUEST_BYTES as u64 + 2;
    loop {
        let mut raw = Vec::new();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut raw).await;
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%peer, error = %e, "connection read failed");
                break;
            }
        }
        let oversized = !raw.ends_with(b"\n") && raw.len() as u64 == limit;

        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingRequest {
            line: request_line(&raw).map(str::to_string),
            reply: reply_tx,
        };
        if requests.send(pending).await.is_err() {
            break;
        }
        let reply = match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => break,
        };

        let mut encoded = reply.encode();
        encoded.push('\n');
        if let Err(e) = write.write_all(encoded.as_bytes()).await {
            debug!(%peer, error = %e, "connection write failed");
            break;
        }
        // the rest of an oversized line cannot be reframed
        if oversized {
            break;
        }
    }
    debug!(%peer, "connection closed");
}
