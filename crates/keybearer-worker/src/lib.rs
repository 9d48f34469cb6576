//! keybearer-worker: runs envelope encryption off the caller's task.
//!
//! The worker owns its own [`Session`] and talks to the caller only through
//! two channels of typed messages. Key derivation runs on tokio's blocking
//! pool; progress fractions are forwarded as they happen. One request is
//! processed at a time, and the handle refuses a second submission until the
//! first has produced its terminal message. Dropping the handle stops the
//! worker once any encryption already running has finished.

use keybearer_core::types::{WorkerOp, WorkerRequest, WorkerResponse, WorkerResult};
use keybearer_crypto::{KeybearerResult, Session};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker is busy with a previous request")]
    Busy,

    #[error("worker has stopped")]
    Closed,

    #[error("{0}")]
    Task(String),
}

pub struct EncryptionWorker;

impl EncryptionWorker {
    /// Start a worker on the current tokio runtime.
    pub fn spawn() -> WorkerHandle {
        let (req_tx, req_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (resp_tx, resp_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run(Session::new(), req_rx, resp_tx));
        WorkerHandle {
            requests: req_tx,
            responses: resp_rx,
            in_flight: None,
        }
    }
}

/// Caller side of a running worker.
pub struct WorkerHandle {
    requests: mpsc::Sender<WorkerRequest>,
    responses: mpsc::Receiver<WorkerResponse>,
    in_flight: Option<WorkerOp>,
}

impl WorkerHandle {
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Send a request. Fails with [`WorkerError::Busy`] while an earlier one
    /// is still outstanding.
    pub async fn submit(&mut self, request: WorkerRequest) -> Result<(), WorkerError> {
        if self.in_flight.is_some() {
            return Err(WorkerError::Busy);
        }
        let op = request.op();
        self.requests
            .send(request)
            .await
            .map_err(|_| WorkerError::Closed)?;
        self.in_flight = Some(op);
        Ok(())
    }

    /// Next message from the worker.
    pub async fn recv(&mut self) -> Result<WorkerResponse, WorkerError> {
        let response = self.responses.recv().await.ok_or(WorkerError::Closed)?;
        if response.is_terminal() {
            self.in_flight = None;
        }
        Ok(response)
    }

    /// Submit and wait for the terminal message, passing progress to `on_progress`.
    pub async fn request<F>(&mut self, request: WorkerRequest, mut on_progress: F) -> Result<WorkerResult, WorkerError>
    where
        F: FnMut(f64),
    {
        self.submit(request).await?;
        loop {
            match self.recv().await? {
                WorkerResponse::Progress { fraction, .. } => on_progress(fraction),
                WorkerResponse::Done { result, .. } => return Ok(result),
                WorkerResponse::Failed { error, .. } => return Err(WorkerError::Task(error)),
            }
        }
    }

    pub async fn set_iterations(&mut self, iterations: u32) -> Result<(), WorkerError> {
        self.request(WorkerRequest::SetIterations { iterations }, |_| {})
            .await
            .map(|_| ())
    }

    pub async fn set_plaintext(
        &mut self,
        data: Vec<u8>,
        filename: impl Into<String>,
        mime: impl Into<String>,
    ) -> Result<(), WorkerError> {
        let request = WorkerRequest::SetPlaintext {
            data,
            filename: filename.into(),
            mime: mime.into(),
        };
        self.request(request, |_| {}).await.map(|_| ())
    }

    /// Encrypt the loaded plaintext and return the envelope JSON.
    pub async fn encrypt<F>(
        &mut self,
        passwords: Vec<String>,
        threshold: usize,
        on_progress: F,
    ) -> Result<String, WorkerError>
    where
        F: FnMut(f64),
    {
        let request = WorkerRequest::Encrypt {
            passwords,
            threshold,
            progress: true,
        };
        match self.request(request, on_progress).await? {
            WorkerResult::Envelope { json } => Ok(json),
            other => Err(WorkerError::Task(format!("unexpected result: {other:?}"))),
        }
    }
}

async fn run(
    mut session: Session,
    mut requests: mpsc::Receiver<WorkerRequest>,
    responses: mpsc::Sender<WorkerResponse>,
) {
    debug!("encryption worker started");
    while let Some(request) = requests.recv().await {
        let op = request.op();
        debug!(%op, "worker request");

        let outcome = match request {
            WorkerRequest::SetIterations { iterations } => {
                session.set_iterations(iterations).map(|_| WorkerResult::Ack)
            }
            WorkerRequest::SetPlaintext { data, filename, mime } => {
                session.set_plaintext(data, filename, mime);
                Ok(WorkerResult::Ack)
            }
            WorkerRequest::Encrypt {
                passwords,
                threshold,
                progress,
            } => {
                let reporter = progress.then(|| responses.clone());
                match encrypt_blocking(session, passwords, threshold, reporter).await {
                    Ok((returned, result)) => {
                        session = returned;
                        result.map(|json| WorkerResult::Envelope { json })
                    }
                    Err(e) => {
                        warn!("encryption task aborted: {e}");
                        let _ = responses
                            .send(WorkerResponse::Failed {
                                op,
                                error: format!("encryption task aborted: {e}"),
                            })
                            .await;
                        return;
                    }
                }
            }
        };

        let message = match outcome {
            Ok(result) => WorkerResponse::Done { op, result },
            Err(e) => WorkerResponse::Failed {
                op,
                error: e.to_string(),
            },
        };
        if responses.send(message).await.is_err() {
            break; // handle dropped
        }
    }
    debug!("encryption worker stopped");
}

/// Run one encryption on the blocking pool, handing the session back.
async fn encrypt_blocking(
    mut session: Session,
    passwords: Vec<String>,
    threshold: usize,
    reporter: Option<mpsc::Sender<WorkerResponse>>,
) -> Result<(Session, KeybearerResult<String>), tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let result = match reporter {
            Some(tx) => {
                let progress = move |fraction: f64| {
                    let _ = tx.blocking_send(WorkerResponse::Progress {
                        op: WorkerOp::Encrypt,
                        fraction,
                    });
                };
                session.encrypt_with_progress(&passwords, threshold, &progress)
            }
            None => session.encrypt_with_passwords(&passwords, threshold),
        };
        (session, result)
    })
    .await
}
