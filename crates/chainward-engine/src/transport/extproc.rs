//! gRPC `ExternalProcessor` service.
//!
//! Each proxy stream gets its own task and `StreamSession`. Every message is
//! handled on the blocking pool, so a slow policy on one stream never stalls
//! another. Responses flow back through a bounded channel in the order
//! messages arrived. A protocol violation ends the stream with
//! `FAILED_PRECONDITION`.

use std::future::Future;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use futures_util::StreamExt;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream, UnixListenerStream};
use tonic::{transport::Server, Request, Response, Status, Streaming};

use chainward_core::error::{ChainwardError, ErrorCode, Result};

use crate::app_state::AppState;
use crate::proto::external_processor_server::{ExternalProcessor, ExternalProcessorServer};
use crate::proto::{ProcessingRequest, ProcessingResponse};

use super::session::StreamSession;

const OUTBOUND_BUFFER: usize = 16;

#[derive(Clone)]
pub struct ExtProcService {
    app: AppState,
}

impl ExtProcService {
    pub fn new(app: AppState) -> Self {
        Self { app }
    }

    /// Wrapped for tonic with the configured message size limits.
    pub fn into_server(self) -> ExternalProcessorServer<Self> {
        let max = self.app.cfg().server.max_message_bytes;
        ExternalProcessorServer::new(self)
            .max_decoding_message_size(max)
            .max_encoding_message_size(max)
    }
}

#[async_trait::async_trait]
impl ExternalProcessor for ExtProcService {
    type ProcessStream = ReceiverStream<std::result::Result<ProcessingResponse, Status>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> std::result::Result<Response<Self::ProcessStream>, Status> {
        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        tokio::spawn(run_stream(self.app.clone(), inbound, tx));
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

async fn run_stream(
    app: AppState,
    mut inbound: Streaming<ProcessingRequest>,
    tx: mpsc::Sender<std::result::Result<ProcessingResponse, Status>>,
) {
    app.metrics().streams_total.inc(&[]);
    app.metrics().streams_active.inc(&[]);
    let mut session = StreamSession::new(app.clone());

    while let Some(next) = inbound.next().await {
        let req = match next {
            Ok(req) => req,
            Err(status) => {
                tracing::debug!(code = ?status.code(), "inbound stream closed with error");
                break;
            }
        };

        // policies are synchronous and may block; keep them off the async workers
        let handled = tokio::task::spawn_blocking(move || {
            let out = session.handle(req);
            (session, out)
        })
        .await;
        let out = match handled {
            Ok((s, out)) => {
                session = s;
                out
            }
            Err(e) => {
                tracing::error!(error = %e, "phase handler task failed");
                let _ = tx.send(Err(Status::internal("phase handler failed"))).await;
                break;
            }
        };

        match out {
            Ok(resp) => {
                if tx.send(Ok(resp)).await.is_err() {
                    // proxy went away
                    break;
                }
            }
            Err(e) => {
                let code = e.code();
                if code == ErrorCode::Protocol {
                    app.metrics().protocol_errors.inc(&[]);
                }
                tracing::warn!(code = code.as_str(), error = %e, "ending ext_proc stream");
                let _ = tx.send(Err(to_status(&e))).await;
                break;
            }
        }
    }

    app.metrics().streams_active.dec(&[]);
}

pub fn to_status(e: &ChainwardError) -> Status {
    match e.code() {
        ErrorCode::Protocol => Status::failed_precondition(e.to_string()),
        ErrorCode::Config => Status::invalid_argument(e.to_string()),
        _ => Status::internal(e.to_string()),
    }
}

/// Serve on the configured Unix socket until `shutdown` resolves.
pub async fn serve_uds<F>(app: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let path = app.cfg().server.socket_path.clone();
    prepare_socket_path(Path::new(&path))?;
    let listener = UnixListener::bind(&path)
        .map_err(|e| ChainwardError::Internal(format!("bind {path} failed: {e}")))?;
    tracing::info!(socket = %path, "ext_proc listening");

    let server = ExtProcService::new(app).into_server();
    let served = Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
        .await;

    // best effort; the next boot clears it anyway
    let _ = std::fs::remove_file(&path);
    served.map_err(|e| ChainwardError::Internal(format!("ext_proc server failed: {e}")))
}

/// Serve on an already-bound TCP listener. Used by tests and local runs.
pub async fn serve_tcp<F>(app: AppState, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let server = ExtProcService::new(app).into_server();
    Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .map_err(|e| ChainwardError::Internal(format!("ext_proc server failed: {e}")))
}

/// Create the parent directory and clear a stale socket. Refuses to remove
/// anything that is not a socket.
fn prepare_socket_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChainwardError::Config(format!("create {} failed: {e}", parent.display()))
            })?;
        }
    }
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            tracing::info!(socket = %path.display(), "removing stale socket");
            std::fs::remove_file(path).map_err(|e| {
                ChainwardError::Internal(format!("remove stale socket {} failed: {e}", path.display()))
            })
        }
        Ok(_) => Err(ChainwardError::Config(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ChainwardError::Internal(format!(
            "stat {} failed: {e}",
            path.display()
        ))),
    }
}
