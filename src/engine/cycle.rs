// One logical HTTP operation — request/response pair, task slot, retry state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use reqwest::{Method, Url};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::Authenticator;
use crate::engine::session::Session;
use crate::engine::transport::UploadSource;
use crate::error::CycleError;
use crate::message::{Request, Response};
use crate::processor::Processor;

/// What kind of transport task a cycle creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Data,
    Upload,
    Download,
}

/// Invoked exactly once per attempt sequence with the terminal outcome.
pub type CompletionHandler = Box<dyn FnOnce(Arc<Cycle>, Option<CycleError>) + Send + 'static>;

/// Upload progress: (cycle, bytes just sent, total sent, total expected).
pub type SendProgressHandler = Box<dyn Fn(&Cycle, u64, u64, Option<u64>) + Send + Sync + 'static>;

/// Download progress: (cycle, bytes just written, total written, total expected).
pub type WriteProgressHandler = Box<dyn Fn(&Cycle, u64, u64, Option<u64>) + Send + Sync + 'static>;

/// Invoked with the staging location of a finished download, before the
/// completion handler. The file belongs to the caller afterwards.
pub type DownloadFileHandler = Box<dyn Fn(&Cycle, &Path) + Send + Sync + 'static>;

/// Live transport task of a cycle.
pub(crate) struct TaskHandle {
    pub id: u64,
    pub cancel: CancellationToken,
}

/// At most one transport task exists per cycle; this slot enforces it.
pub(crate) enum TaskSlot {
    Idle,
    Preparing,
    InFlight(TaskHandle),
}

/// A single logical HTTP operation managed by a [`Session`]. Create one
/// through [`Session::build_cycle`], then `start` it; the outcome arrives
/// through the completion handler.
pub struct Cycle {
    pub(crate) session: Weak<Session>,
    // Self-handle so `&self` methods can clone the owning Arc.
    self_ref: Weak<Cycle>,
    kind: CycleKind,
    identifier: Option<String>,
    solicited: bool,
    pub(crate) request: Mutex<Request>,
    pub(crate) response: Mutex<Response>,
    pub(crate) request_processors: Option<Vec<Arc<dyn Processor>>>,
    pub(crate) response_processors: Option<Vec<Arc<dyn Processor>>>,
    pub(crate) authenticators: Option<Vec<Arc<dyn Authenticator>>>,
    data_to_upload: Option<Bytes>,
    file_to_upload: Option<PathBuf>,
    pub(crate) did_send_body_data: Option<SendProgressHandler>,
    pub(crate) did_write_data: Option<WriteProgressHandler>,
    pub(crate) download_file_handler: Option<DownloadFileHandler>,
    pub(crate) completion: Mutex<Option<CompletionHandler>>,
    pub(crate) slot: Mutex<TaskSlot>,
    retried_count: AtomicU32,
    pub(crate) explicitly_canceling: AtomicBool,
}

impl Cycle {
    pub fn kind(&self) -> CycleKind {
        self.kind
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Solicited cycles retry without limit until they succeed.
    pub fn solicited(&self) -> bool {
        self.solicited
    }

    pub fn retried_count(&self) -> u32 {
        self.retried_count.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_retried(&self) -> u32 {
        self.retried_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn explicitly_canceling(&self) -> bool {
        self.explicitly_canceling.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    pub fn request(&self) -> MutexGuard<'_, Request> {
        self.request.lock()
    }

    pub fn response(&self) -> MutexGuard<'_, Response> {
        self.response.lock()
    }

    /// Start the operation. Safe to call again while a task is live: the
    /// extra call is ignored, never creating a second task. Starting a
    /// cycle that was cancelled while queued for retry is a silent no-op.
    pub fn start(&self, handler: Option<CompletionHandler>) {
        if let Some(handler) = handler {
            *self.completion.lock() = Some(handler);
        }

        let this = match self.self_ref.upgrade() {
            Some(this) => this,
            None => return,
        };
        let session = match self.session.upgrade() {
            Some(session) => session,
            None => {
                debug!("session dropped, ignoring start");
                return;
            }
        };
        if !session.contains_cycle(&this) {
            // Cancelled while waiting for a retry, for example.
            debug!("cycle no longer registered, ignoring start");
            return;
        }
        if !session.accepts_new_tasks() {
            debug!("session no longer accepts tasks, ignoring start");
            return;
        }

        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, TaskSlot::Idle) {
                debug!("cycle already has a live task, resuming");
                return;
            }
            *slot = TaskSlot::Preparing;
        }

        tokio::spawn(async move {
            Session::launch(session, this).await;
        });
    }

    /// Stop the current attempt and start over from preparation.
    pub fn restart(&self) {
        self.reset();
        self.start(None);
    }

    /// Clear per-attempt state. A live transport task is cancelled and its
    /// remaining callbacks retired.
    pub(crate) fn reset(&self) {
        let previous = {
            let mut slot = self.slot.lock();
            std::mem::replace(&mut *slot, TaskSlot::Idle)
        };
        if let TaskSlot::InFlight(handle) = previous {
            handle.cancel.cancel();
            if let Some(session) = self.session.upgrade() {
                session.retire_task(handle.id);
            }
        }
        *self.response.lock() = Response::new();
        self.request.lock().timestamp = None;
        self.explicitly_canceling.store(false, Ordering::SeqCst);
    }

    /// Cancel the operation. An explicit cancel suppresses the completion
    /// handler; an implicit one delivers a cancellation error through it.
    pub fn cancel(&self, explicitly: bool) {
        let (this, session) = match (self.self_ref.upgrade(), self.session.upgrade()) {
            (Some(this), Some(session)) => (this, session),
            _ => return,
        };
        session.cancel_cycles(&[this], explicitly);
    }

    pub(crate) fn upload_source(&self) -> Option<UploadSource> {
        match (&self.data_to_upload, &self.file_to_upload) {
            (Some(data), None) => Some(UploadSource::Data(data.clone())),
            (None, Some(path)) => Some(UploadSource::File(path.clone())),
            _ => None,
        }
    }

    // Cycle-local override lists take precedence; otherwise the session
    // defaults apply. Resolved at the moment of use, never cached.
    pub(crate) fn resolved_request_processors(&self, session: &Session) -> Vec<Arc<dyn Processor>> {
        match &self.request_processors {
            Some(processors) => processors.clone(),
            None => session.request_processors(),
        }
    }

    pub(crate) fn resolved_response_processors(&self, session: &Session) -> Vec<Arc<dyn Processor>> {
        match &self.response_processors {
            Some(processors) => processors.clone(),
            None => session.response_processors(),
        }
    }

    pub(crate) fn resolved_authenticators(&self, session: &Session) -> Vec<Arc<dyn Authenticator>> {
        match &self.authenticators {
            Some(authenticators) => authenticators.clone(),
            None => session.authenticators(),
        }
    }
}

/// Configures and registers a [`Cycle`]. Obtained from
/// [`Session::build_cycle`].
pub struct CycleBuilder {
    session: Arc<Session>,
    url: Url,
    kind: CycleKind,
    method: Method,
    identifier: Option<String>,
    solicited: bool,
    request_object: Option<serde_json::Value>,
    request_processors: Option<Vec<Arc<dyn Processor>>>,
    response_processors: Option<Vec<Arc<dyn Processor>>>,
    authenticators: Option<Vec<Arc<dyn Authenticator>>>,
    data_to_upload: Option<Bytes>,
    file_to_upload: Option<PathBuf>,
    did_send_body_data: Option<SendProgressHandler>,
    did_write_data: Option<WriteProgressHandler>,
    download_file_handler: Option<DownloadFileHandler>,
}

impl CycleBuilder {
    pub(crate) fn new(session: Arc<Session>, url: Url) -> Self {
        Self {
            session,
            url,
            kind: CycleKind::Data,
            method: Method::GET,
            identifier: None,
            solicited: false,
            request_object: None,
            request_processors: None,
            response_processors: None,
            authenticators: None,
            data_to_upload: None,
            file_to_upload: None,
            did_send_body_data: None,
            did_write_data: None,
            download_file_handler: None,
        }
    }

    pub fn kind(mut self, kind: CycleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Register the cycle under an identifier, addressable through
    /// [`Session::cycle_for_identifier`]. Unique per session.
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn solicited(mut self, solicited: bool) -> Self {
        self.solicited = solicited;
        self
    }

    pub fn request_object(mut self, object: serde_json::Value) -> Self {
        self.request_object = Some(object);
        self
    }

    pub fn request_processors(mut self, processors: Vec<Arc<dyn Processor>>) -> Self {
        self.request_processors = Some(processors);
        self
    }

    pub fn response_processors(mut self, processors: Vec<Arc<dyn Processor>>) -> Self {
        self.response_processors = Some(processors);
        self
    }

    pub fn authenticators(mut self, authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        self.authenticators = Some(authenticators);
        self
    }

    pub fn data_to_upload(mut self, data: impl Into<Bytes>) -> Self {
        self.data_to_upload = Some(data.into());
        self
    }

    pub fn file_to_upload(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_to_upload = Some(path.into());
        self
    }

    pub fn on_send_progress(mut self, handler: SendProgressHandler) -> Self {
        self.did_send_body_data = Some(handler);
        self
    }

    pub fn on_write_progress(mut self, handler: WriteProgressHandler) -> Self {
        self.did_write_data = Some(handler);
        self
    }

    pub fn on_download_file(mut self, handler: DownloadFileHandler) -> Self {
        self.download_file_handler = Some(handler);
        self
    }

    /// Build the cycle and register it with its session.
    ///
    /// Panics if the session is invalidated, if an upload cycle does not
    /// have exactly one body source, or if a download cycle has no file
    /// handler — all programming errors, not runtime conditions.
    pub fn build(self) -> Arc<Cycle> {
        match self.kind {
            CycleKind::Upload => {
                assert!(
                    self.data_to_upload.is_some() != self.file_to_upload.is_some(),
                    "upload cycle needs exactly one of data or file source"
                );
            }
            CycleKind::Download => {
                assert!(
                    self.download_file_handler.is_some(),
                    "download cycle needs a download file handler"
                );
            }
            CycleKind::Data => {}
        }

        let mut request = Request::new(self.url, self.method);
        request.object = self.request_object;

        let cycle = Arc::new_cyclic(|self_ref| Cycle {
            session: Arc::downgrade(&self.session),
            self_ref: self_ref.clone(),
            kind: self.kind,
            identifier: self.identifier,
            solicited: self.solicited,
            request: Mutex::new(request),
            response: Mutex::new(Response::new()),
            request_processors: self.request_processors,
            response_processors: self.response_processors,
            authenticators: self.authenticators,
            data_to_upload: self.data_to_upload,
            file_to_upload: self.file_to_upload,
            did_send_body_data: self.did_send_body_data,
            did_write_data: self.did_write_data,
            download_file_handler: self.download_file_handler,
            completion: Mutex::new(None),
            slot: Mutex::new(TaskSlot::Idle),
            retried_count: AtomicU32::new(0),
            explicitly_canceling: AtomicBool::new(false),
        });

        self.session.add_cycle(Arc::clone(&cycle));
        cycle
    }
}
