// Transport seam — executes one prepared attempt against the HTTP stack.
//
// The engine treats the transport as an opaque collaborator: it hands over a
// snapshot of the request plus a cancellation token, and receives callbacks
// (body chunks, progress, challenges, completion) as events keyed by the
// attempt's task id. Exactly one `Completed` event ends every attempt.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, AUTHORIZATION, PROXY_AUTHENTICATE, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{
    challenge_from_header, Challenge, ChallengeDisposition, ChallengeResponder, Credential,
};
use crate::config::MAX_CHALLENGE_ROUNDS;
use crate::engine::cycle::CycleKind;
use crate::error::CycleError;

/// Status line and headers of a completed exchange.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Terminal result of one transport attempt.
#[derive(Debug)]
pub enum TaskOutcome {
    Success(ResponseHead),
    Failed {
        head: Option<ResponseHead>,
        error: CycleError,
    },
}

impl TaskOutcome {
    pub fn into_parts(self) -> (Option<ResponseHead>, Option<CycleError>) {
        match self {
            TaskOutcome::Success(head) => (Some(head), None),
            TaskOutcome::Failed { head, error } => (head, Some(error)),
        }
    }
}

/// Callbacks delivered by the transport, keyed by task id and serialized
/// onto the session's delivery context.
pub enum TransportEvent {
    DataChunk {
        task_id: u64,
        chunk: Bytes,
    },
    DidSendBodyData {
        task_id: u64,
        bytes_sent: u64,
        total_sent: u64,
        total_expected: Option<u64>,
    },
    DidWriteData {
        task_id: u64,
        bytes_written: u64,
        total_written: u64,
        total_expected: Option<u64>,
    },
    DownloadFinished {
        task_id: u64,
        location: PathBuf,
    },
    Challenge {
        task_id: u64,
        challenge: Challenge,
        responder: Arc<ChallengeResponder>,
    },
    Completed {
        task_id: u64,
        outcome: TaskOutcome,
    },
}

/// Body source for an upload attempt.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Data(Bytes),
    File(PathBuf),
}

/// Everything the transport needs for one attempt.
pub struct TransportAttempt {
    pub task_id: u64,
    pub kind: CycleKind,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub upload_source: Option<UploadSource>,
    pub cancel: CancellationToken,
    pub events: UnboundedSender<TransportEvent>,
}

/// Opaque platform dependency performing HTTP exchanges. Swappable for
/// tests and embedders.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, attempt: TransportAttempt);
}

/// Production transport over a shared `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, CycleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn build_request(
        &self,
        attempt: &TransportAttempt,
        credential: Option<&Credential>,
    ) -> Result<reqwest::RequestBuilder, CycleError> {
        let mut builder = self
            .client
            .request(attempt.method.clone(), attempt.url.clone())
            .headers(attempt.headers.clone());

        if let Some(credential) = credential {
            builder = builder.header(AUTHORIZATION, credential.basic_header());
        }

        match attempt.kind {
            CycleKind::Data => {
                if !attempt.body.is_empty() {
                    builder = builder.body(attempt.body.clone());
                }
            }
            CycleKind::Upload => {
                builder = self.upload_body(attempt, builder).await?;
            }
            CycleKind::Download => {}
        }
        Ok(builder)
    }

    /// Wrap the upload source in a counting stream so send progress is
    /// reported as the body goes out.
    async fn upload_body(
        &self,
        attempt: &TransportAttempt,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, CycleError> {
        let task_id = attempt.task_id;
        let events = attempt.events.clone();

        let (stream, total_expected): (
            futures::stream::BoxStream<'static, std::io::Result<Bytes>>,
            Option<u64>,
        ) = match &attempt.upload_source {
            Some(UploadSource::Data(data)) => {
                let total = data.len() as u64;
                (
                    futures::stream::iter(vec![Ok(data.clone())]).boxed(),
                    Some(total),
                )
            }
            Some(UploadSource::File(path)) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    CycleError::Transport {
                        message: format!("cannot open upload file: {}", e),
                    }
                })?;
                let total = file.metadata().await.ok().map(|m| m.len());
                (ReaderStream::new(file).boxed(), total)
            }
            None => {
                // The cycle layer validates the source before launch.
                return Err(CycleError::Transport {
                    message: "upload cycle has no body source".to_string(),
                });
            }
        };

        let mut total_sent = 0u64;
        let counted = stream.map(move |chunk| {
            if let Ok(chunk) = &chunk {
                let sent = chunk.len() as u64;
                total_sent += sent;
                let _ = events.send(TransportEvent::DidSendBodyData {
                    task_id,
                    bytes_sent: sent,
                    total_sent,
                    total_expected,
                });
            }
            chunk
        });

        let mut builder = builder.body(reqwest::Body::wrap_stream(counted));
        if let Some(total) = total_expected {
            builder = builder.header(reqwest::header::CONTENT_LENGTH, total);
        }
        Ok(builder)
    }

    /// Issue the request, resolving authentication challenges in a bounded
    /// loop, until a deliverable response or a terminal error is reached.
    async fn run(&self, attempt: &TransportAttempt) -> TaskOutcome {
        let mut credential: Option<Credential> = None;
        let mut failure_count: u32 = 0;

        loop {
            let builder = match self.build_request(attempt, credential.as_ref()).await {
                Ok(builder) => builder,
                Err(error) => return TaskOutcome::Failed { head: None, error },
            };

            let response = tokio::select! {
                _ = attempt.cancel.cancelled() => {
                    return TaskOutcome::Failed { head: None, error: CycleError::Cancelled };
                }
                result = builder.send() => match result {
                    Ok(response) => response,
                    Err(error) => return TaskOutcome::Failed { head: None, error: error.into() },
                },
            };

            let status = response.status();
            let challenged = status == StatusCode::UNAUTHORIZED
                || status == StatusCode::PROXY_AUTHENTICATION_REQUIRED;

            if challenged && failure_count < MAX_CHALLENGE_ROUNDS {
                let header_name = if status == StatusCode::UNAUTHORIZED {
                    WWW_AUTHENTICATE
                } else {
                    PROXY_AUTHENTICATE
                };
                let header = response
                    .headers()
                    .get(header_name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let challenge = challenge_from_header(
                    status.as_u16(),
                    header.as_deref(),
                    attempt.url.host_str().unwrap_or_default(),
                    failure_count,
                );

                let (responder, disposition_rx) = ChallengeResponder::new();
                if attempt
                    .events
                    .send(TransportEvent::Challenge {
                        task_id: attempt.task_id,
                        challenge,
                        responder,
                    })
                    .is_err()
                {
                    // Session is gone; nobody can resolve the challenge.
                    return TaskOutcome::Failed {
                        head: None,
                        error: CycleError::Cancelled,
                    };
                }

                let disposition = tokio::select! {
                    _ = attempt.cancel.cancelled() => {
                        return TaskOutcome::Failed { head: None, error: CycleError::Cancelled };
                    }
                    disposition = disposition_rx => {
                        disposition.unwrap_or(ChallengeDisposition::PerformDefaultHandling)
                    }
                };

                match disposition {
                    ChallengeDisposition::UseCredential(c) => {
                        debug!("task {} re-issuing with credentials", attempt.task_id);
                        credential = Some(c);
                        failure_count += 1;
                        continue;
                    }
                    ChallengeDisposition::CancelChallenge => {
                        let head = ResponseHead {
                            status,
                            headers: response.headers().clone(),
                        };
                        return TaskOutcome::Failed {
                            head: Some(head),
                            error: CycleError::Cancelled,
                        };
                    }
                    ChallengeDisposition::PerformDefaultHandling
                    | ChallengeDisposition::RejectProtectionSpace => {
                        // Pass the challenged response through unchanged.
                    }
                }
            }

            let head = ResponseHead {
                status,
                headers: response.headers().clone(),
            };
            return match self.consume_body(attempt, response).await {
                Ok(()) => TaskOutcome::Success(head),
                Err(error) => TaskOutcome::Failed {
                    head: Some(head),
                    error,
                },
            };
        }
    }

    /// Stream the response body out as events: data chunks for data/upload
    /// cycles, a staging file plus write progress for downloads.
    async fn consume_body(
        &self,
        attempt: &TransportAttempt,
        response: reqwest::Response,
    ) -> Result<(), CycleError> {
        match attempt.kind {
            CycleKind::Data | CycleKind::Upload => {
                let mut stream = response.bytes_stream();
                loop {
                    let chunk = tokio::select! {
                        _ = attempt.cancel.cancelled() => return Err(CycleError::Cancelled),
                        chunk = stream.next() => chunk,
                    };
                    match chunk {
                        Some(Ok(chunk)) => {
                            let _ = attempt.events.send(TransportEvent::DataChunk {
                                task_id: attempt.task_id,
                                chunk,
                            });
                        }
                        Some(Err(error)) => return Err(error.into()),
                        None => return Ok(()),
                    }
                }
            }
            CycleKind::Download => {
                let total_expected = response.content_length();
                let staging = tempfile::Builder::new()
                    .prefix("http-cycles-")
                    .tempfile()
                    .map_err(|e| CycleError::Transport {
                        message: format!("cannot create staging file: {}", e),
                    })?;
                let (file, location) = staging.keep().map_err(|e| CycleError::Transport {
                    message: format!("cannot persist staging file: {}", e),
                })?;
                let mut file = tokio::fs::File::from_std(file);

                let result = self
                    .write_download(attempt, response, &mut file, total_expected)
                    .await;
                match result {
                    Ok(()) => {
                        let _ = attempt.events.send(TransportEvent::DownloadFinished {
                            task_id: attempt.task_id,
                            location: location.to_path_buf(),
                        });
                        Ok(())
                    }
                    Err(error) => {
                        if let Err(e) = tokio::fs::remove_file(&location).await {
                            warn!("cannot remove staging file: {}", e);
                        }
                        Err(error)
                    }
                }
            }
        }
    }

    async fn write_download(
        &self,
        attempt: &TransportAttempt,
        response: reqwest::Response,
        file: &mut tokio::fs::File,
        total_expected: Option<u64>,
    ) -> Result<(), CycleError> {
        let mut stream = response.bytes_stream();
        let mut total_written = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = attempt.cancel.cancelled() => return Err(CycleError::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| CycleError::Transport {
                            message: format!("cannot write staging file: {}", e),
                        })?;
                    total_written += chunk.len() as u64;
                    let _ = attempt.events.send(TransportEvent::DidWriteData {
                        task_id: attempt.task_id,
                        bytes_written: chunk.len() as u64,
                        total_written,
                        total_expected,
                    });
                }
                Some(Err(error)) => return Err(error.into()),
                None => {
                    file.flush().await.map_err(|e| CycleError::Transport {
                        message: format!("cannot flush staging file: {}", e),
                    })?;
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn perform(&self, attempt: TransportAttempt) {
        let outcome = self.run(&attempt).await;
        let _ = attempt.events.send(TransportEvent::Completed {
            task_id: attempt.task_id,
            outcome,
        });
    }
}
