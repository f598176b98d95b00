// Session — owns the transport, the live-cycle registry, and the
// completion/retry/failure state machine.
//
// All transport callbacks flow through one mpsc channel into a single
// dispatcher task (the delivery context). Routing an event to its cycle is a
// linear scan over the live list matching the current task handle; events
// from retired tasks (cancelled by a restart) are dropped, anything else
// unmatched is an internal-consistency violation and panics.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{Authenticator, ChallengeDisposition};
use crate::config::SessionConfig;
use crate::engine::cycle::{
    CompletionHandler, Cycle, CycleBuilder, CycleKind, TaskHandle, TaskSlot,
};
use crate::engine::indicator::ActivityIndicator;
use crate::engine::transport::{
    ReqwestTransport, TaskOutcome, Transport, TransportAttempt, TransportEvent,
};
use crate::error::CycleError;
use crate::processor::Processor;
use crate::query::{merge_parameters_to_url, Parameters};

/// Retry policy hook: either the built-in rule (solicited cycles always
/// retry; otherwise bounded retries on timeout/408/503) or a custom closure.
pub enum RetryDecision {
    Default,
    Custom(Box<dyn Fn(&Cycle, Option<&CycleError>) -> bool + Send + Sync>),
}

/// Status failure hook: either "status >= 400 is failure" or a custom
/// closure.
pub enum FailureDecision {
    Default,
    Custom(Box<dyn Fn(u16) -> bool + Send + Sync>),
}

/// Snapshot of the headers and query parameters a session stamps on every
/// outgoing request. Round-trips through a byte buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreservedState {
    pub headers: HashMap<String, String>,
    pub parameters: HashMap<String, Vec<String>>,
}

impl PreservedState {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CycleError> {
        serde_json::to_vec(self).map_err(|e| CycleError::Processor {
            message: format!("cannot encode preserved state: {}", e),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CycleError> {
        serde_json::from_slice(bytes).map_err(|e| CycleError::Processor {
            message: format!("cannot decode preserved state: {}", e),
        })
    }
}

const STATE_ACTIVE: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_INVALIDATED: u8 = 2;

/// Manages [`Cycle`]s over a shared transport: creates their tasks, routes
/// transport callbacks back to them, applies the retry policy, and delivers
/// each cycle's terminal outcome exactly once.
pub struct Session {
    // Self-handle so `&self` methods can clone the owning Arc.
    self_ref: Weak<Session>,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    request_processors: RwLock<Vec<Arc<dyn Processor>>>,
    response_processors: RwLock<Vec<Arc<dyn Processor>>>,
    authenticators: RwLock<Vec<Arc<dyn Authenticator>>>,
    retry_decision: RwLock<RetryDecision>,
    failure_decision: RwLock<FailureDecision>,
    cycles: Mutex<Vec<Arc<Cycle>>>,
    by_identifier: Mutex<HashMap<String, Arc<Cycle>>>,
    retired_tasks: Mutex<HashSet<u64>>,
    next_task_id: AtomicU64,
    state: AtomicU8,
    events: UnboundedSender<TransportEvent>,
    indicator: Option<Arc<ActivityIndicator>>,
    preserved_headers: Mutex<HashMap<String, String>>,
    preserved_parameters: Mutex<Parameters>,
}

/// Configures and spawns a [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
    indicator: Option<Arc<ActivityIndicator>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            transport: None,
            indicator: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Substitute the transport, e.g. for tests.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn indicator(mut self, indicator: Arc<ActivityIndicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    /// Build the session and spawn its dispatcher task. Must run inside a
    /// tokio runtime.
    pub fn build(self) -> Result<Arc<Session>, CycleError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.timeout())?),
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = Arc::new_cyclic(|self_ref| Session {
            self_ref: self_ref.clone(),
            transport,
            config: self.config,
            request_processors: RwLock::new(Vec::new()),
            response_processors: RwLock::new(Vec::new()),
            authenticators: RwLock::new(Vec::new()),
            retry_decision: RwLock::new(RetryDecision::Default),
            failure_decision: RwLock::new(FailureDecision::Default),
            cycles: Mutex::new(Vec::new()),
            by_identifier: Mutex::new(HashMap::new()),
            retired_tasks: Mutex::new(HashSet::new()),
            next_task_id: AtomicU64::new(0),
            state: AtomicU8::new(STATE_ACTIVE),
            events: events_tx,
            indicator: self.indicator,
            preserved_headers: Mutex::new(HashMap::new()),
            preserved_parameters: Mutex::new(Parameters::new()),
        });

        // The dispatcher holds only a weak reference: dropping the last
        // external handle closes the channel and ends the task.
        let weak = Arc::downgrade(&session);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(session) = weak.upgrade() else { break };
                session.handle_event(event).await;
            }
            debug!("session dispatcher stopped");
        });

        Ok(session)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session with default configuration and the production transport.
    pub fn new() -> Result<Arc<Self>, CycleError> {
        SessionBuilder::new().build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // --- default processor/authenticator lists -------------------------

    pub fn request_processors(&self) -> Vec<Arc<dyn Processor>> {
        self.request_processors.read().clone()
    }

    pub fn set_request_processors(&self, processors: Vec<Arc<dyn Processor>>) {
        *self.request_processors.write() = processors;
    }

    pub fn response_processors(&self) -> Vec<Arc<dyn Processor>> {
        self.response_processors.read().clone()
    }

    pub fn set_response_processors(&self, processors: Vec<Arc<dyn Processor>>) {
        *self.response_processors.write() = processors;
    }

    pub fn authenticators(&self) -> Vec<Arc<dyn Authenticator>> {
        self.authenticators.read().clone()
    }

    pub fn set_authenticators(&self, authenticators: Vec<Arc<dyn Authenticator>>) {
        *self.authenticators.write() = authenticators;
    }

    pub fn set_retry_decision(&self, decision: RetryDecision) {
        *self.retry_decision.write() = decision;
    }

    pub fn set_failure_decision(&self, decision: FailureDecision) {
        *self.failure_decision.write() = decision;
    }

    // --- lifecycle -----------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_ACTIVE
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_INVALIDATED
    }

    pub(crate) fn accepts_new_tasks(&self) -> bool {
        self.is_active()
    }

    /// Cancel every live cycle and refuse all further work.
    pub fn invalidate_and_cancel(&self, explicitly: bool) {
        self.state.store(STATE_INVALIDATED, Ordering::SeqCst);
        let cycles = self.cycles.lock().clone();
        self.cancel_cycles(&cycles, explicitly);
    }

    /// Refuse new work but let in-flight tasks reach natural completion.
    /// The session becomes invalidated once the last cycle finishes.
    pub fn finish_tasks_and_invalidate(&self, explicitly: bool) {
        self.state.store(STATE_DRAINING, Ordering::SeqCst);
        let empty = {
            let cycles = self.cycles.lock();
            for cycle in cycles.iter() {
                cycle.explicitly_canceling.store(explicitly, Ordering::SeqCst);
            }
            cycles.is_empty()
        };
        if empty {
            self.state.store(STATE_INVALIDATED, Ordering::SeqCst);
        }
    }

    // --- registry ------------------------------------------------------

    /// Register a cycle. Panics on an invalidated session: creating new
    /// work there is a programming error.
    pub(crate) fn add_cycle(&self, cycle: Arc<Cycle>) {
        assert!(
            self.is_active(),
            "cannot create a cycle on an invalidated session"
        );
        let mut cycles = self.cycles.lock();
        debug_assert!(
            !cycles.iter().any(|c| Arc::ptr_eq(c, &cycle)),
            "cycle registered twice"
        );
        if let Some(identifier) = cycle.identifier() {
            // Newest registration wins the identifier slot; a replaced
            // cycle stays in the live list until its cancellation settles.
            self.by_identifier
                .lock()
                .insert(identifier.to_string(), Arc::clone(&cycle));
        }
        cycles.push(cycle);
    }

    fn remove_cycle(&self, cycle: &Arc<Cycle>) {
        let drained = {
            let mut cycles = self.cycles.lock();
            if let Some(position) = cycles.iter().position(|c| Arc::ptr_eq(c, cycle)) {
                cycles.remove(position);
            }
            if let Some(identifier) = cycle.identifier() {
                let mut index = self.by_identifier.lock();
                if index.get(identifier).is_some_and(|c| Arc::ptr_eq(c, cycle)) {
                    index.remove(identifier);
                }
            }
            cycles.is_empty() && self.state.load(Ordering::SeqCst) == STATE_DRAINING
        };
        if drained {
            self.state.store(STATE_INVALIDATED, Ordering::SeqCst);
        }
    }

    pub(crate) fn contains_cycle(&self, cycle: &Arc<Cycle>) -> bool {
        self.cycles.lock().iter().any(|c| Arc::ptr_eq(c, cycle))
    }

    pub fn live_cycle_count(&self) -> usize {
        self.cycles.lock().len()
    }

    /// Look up a live cycle by its identifier.
    pub fn cycle_for_identifier(&self, identifier: &str) -> Option<Arc<Cycle>> {
        self.by_identifier.lock().get(identifier).cloned()
    }

    fn cycle_for_task(&self, task_id: u64) -> Option<Arc<Cycle>> {
        self.cycles.lock().iter().find_map(|cycle| {
            let slot = cycle.slot.lock();
            match &*slot {
                TaskSlot::InFlight(handle) if handle.id == task_id => Some(Arc::clone(cycle)),
                _ => None,
            }
        })
    }

    /// Drop further callbacks of a task whose attempt was abandoned by a
    /// restart or reset.
    pub(crate) fn retire_task(&self, task_id: u64) {
        self.retired_tasks.lock().insert(task_id);
        self.activity_decrease();
    }

    fn route(&self, task_id: u64, completing: bool) -> Option<Arc<Cycle>> {
        {
            let mut retired = self.retired_tasks.lock();
            if completing {
                if retired.remove(&task_id) {
                    return None;
                }
            } else if retired.contains(&task_id) {
                return None;
            }
        }
        match self.cycle_for_task(task_id) {
            Some(cycle) => Some(cycle),
            // A callback that matches no live task is a routing-table
            // violation, not a recoverable condition.
            None => panic!("transport callback for unknown task {}", task_id),
        }
    }

    // --- cycle construction --------------------------------------------

    /// Start configuring a new cycle for `url`.
    pub fn build_cycle(&self, url: Url) -> CycleBuilder {
        let this = self.self_ref.upgrade().expect("session alive");
        CycleBuilder::new(this, url)
    }

    /// One-shot GET: merge `parameters` into `url`, build a data cycle and
    /// start it with `handler`.
    pub fn get(
        &self,
        url: &str,
        parameters: Option<&Parameters>,
        handler: CompletionHandler,
    ) -> Result<Arc<Cycle>, CycleError> {
        let merged = match parameters {
            Some(parameters) => merge_parameters_to_url(url, parameters),
            None => url.to_string(),
        };
        let url = Url::parse(&merged).map_err(|e| CycleError::InvalidUrl {
            message: e.to_string(),
        })?;
        let cycle = self.build_cycle(url).build();
        cycle.start(Some(handler));
        Ok(cycle)
    }

    // --- preserved headers and parameters ------------------------------

    /// Header stamped verbatim on every outgoing request.
    pub fn set_preserved_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.preserved_headers.lock().insert(name.into(), value.into());
    }

    pub fn remove_preserved_header(&self, name: &str) {
        self.preserved_headers.lock().remove(name);
    }

    /// Query parameter merged into every outgoing URL.
    pub fn set_preserved_parameter(&self, name: impl Into<String>, values: Vec<String>) {
        self.preserved_parameters.lock().insert(name.into(), values);
    }

    pub fn remove_preserved_parameter(&self, name: &str) {
        self.preserved_parameters.lock().remove(name);
    }

    pub fn preserved_state(&self) -> PreservedState {
        PreservedState {
            headers: self.preserved_headers.lock().clone(),
            parameters: self.preserved_parameters.lock().clone(),
        }
    }

    pub fn restore_preserved_state(&self, state: PreservedState) {
        *self.preserved_headers.lock() = state.headers;
        *self.preserved_parameters.lock() = state.parameters;
    }

    fn apply_preserved(&self, cycle: &Cycle) {
        let headers = self.preserved_headers.lock().clone();
        let parameters = self.preserved_parameters.lock().clone();
        if headers.is_empty() && parameters.is_empty() {
            return;
        }

        let mut request = cycle.request.lock();
        for (name, value) in &headers {
            request.set_header(name, value);
        }
        if !parameters.is_empty() {
            let merged = merge_parameters_to_url(request.url.as_str(), &parameters);
            match Url::parse(&merged) {
                Ok(url) => request.url = url,
                Err(e) => warn!("preserved parameters produced an invalid URL: {}", e),
            }
        }
    }

    // --- launch path ---------------------------------------------------

    /// Prepare and dispatch one attempt of `cycle`. Runs on its own task;
    /// the slot was moved to `Preparing` by `Cycle::start`.
    pub(crate) async fn launch(session: Arc<Session>, cycle: Arc<Cycle>) {
        // Request processors run on the worker context, for data cycles
        // only: upload/download bodies do not pass through the codecs.
        let preparation: Result<(), CycleError> = if cycle.kind() == CycleKind::Data {
            let processors = cycle.resolved_request_processors(&session);
            if processors.is_empty() {
                Ok(())
            } else {
                let worker_cycle = Arc::clone(&cycle);
                tokio::task::spawn_blocking(move || {
                    let mut request = worker_cycle.request.lock();
                    for processor in &processors {
                        processor.process_request(&mut request)?;
                    }
                    Ok(())
                })
                .await
                .unwrap_or_else(|e| {
                    Err(CycleError::Processor {
                        message: format!("request processor panicked: {}", e),
                    })
                })
            }
        } else {
            Ok(())
        };

        if let Err(error) = preparation {
            {
                let mut slot = cycle.slot.lock();
                if !matches!(*slot, TaskSlot::Preparing) {
                    // Cancelled while preparing; the cancel path settled it.
                    return;
                }
                *slot = TaskSlot::Idle;
            }
            session.finish_cycle(
                &cycle,
                Some(CycleError::PreparationFailure {
                    message: error.to_string(),
                }),
            );
            return;
        }

        session.apply_preserved(&cycle);

        let task_id = session.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        {
            let mut slot = cycle.slot.lock();
            if !matches!(*slot, TaskSlot::Preparing) {
                debug!("cycle reset during preparation, abandoning launch");
                return;
            }
            *slot = TaskSlot::InFlight(TaskHandle {
                id: task_id,
                cancel: cancel.clone(),
            });
        }

        let attempt = {
            let mut request = cycle.request.lock();
            request.timestamp = Some(Utc::now());
            TransportAttempt {
                task_id,
                kind: cycle.kind(),
                url: request.url.clone(),
                method: request.method.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
                upload_source: cycle.upload_source(),
                cancel,
                events: session.events.clone(),
            }
        };

        session.activity_increase();
        debug!("task {} started: {} {}", task_id, attempt.method, attempt.url);
        let transport = Arc::clone(&session.transport);
        tokio::spawn(async move {
            transport.perform(attempt).await;
        });
    }

    // --- event dispatch ------------------------------------------------

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::DataChunk { task_id, chunk } => {
                if let Some(cycle) = self.route(task_id, false) {
                    cycle.response.lock().append_body(&chunk);
                }
            }
            TransportEvent::DidSendBodyData {
                task_id,
                bytes_sent,
                total_sent,
                total_expected,
            } => {
                if let Some(cycle) = self.route(task_id, false) {
                    if let Some(handler) = &cycle.did_send_body_data {
                        handler(&cycle, bytes_sent, total_sent, total_expected);
                    }
                }
            }
            TransportEvent::DidWriteData {
                task_id,
                bytes_written,
                total_written,
                total_expected,
            } => {
                if let Some(cycle) = self.route(task_id, false) {
                    if let Some(handler) = &cycle.did_write_data {
                        handler(&cycle, bytes_written, total_written, total_expected);
                    }
                }
            }
            TransportEvent::DownloadFinished { task_id, location } => {
                if let Some(cycle) = self.route(task_id, false) {
                    if let Some(handler) = &cycle.download_file_handler {
                        handler(&cycle, &location);
                    }
                }
            }
            TransportEvent::Challenge {
                task_id,
                challenge,
                responder,
            } => {
                match self.route(task_id, false) {
                    Some(cycle) => {
                        // Every authenticator that can handle the challenge
                        // gets to act; the single-shot responder keeps the
                        // continuation exactly-once.
                        let authenticators = cycle.resolved_authenticators(self);
                        let mut handled = 0;
                        for authenticator in &authenticators {
                            if authenticator.can_handle(&challenge) {
                                handled += 1;
                                let action = authenticator.action_for_challenge(&challenge);
                                authenticator.perform_action(
                                    action,
                                    &challenge,
                                    Arc::clone(&responder),
                                );
                            }
                        }
                        if handled == 0 {
                            responder.resolve(ChallengeDisposition::PerformDefaultHandling);
                        }
                    }
                    None => {
                        // Retired task: abandon its challenge.
                        responder.resolve(ChallengeDisposition::CancelChallenge);
                    }
                }
            }
            TransportEvent::Completed { task_id, outcome } => {
                self.handle_completion(task_id, outcome).await;
            }
        }
    }

    /// The completion decision: cancellation intercept, retry policy,
    /// status failure policy, response processors, then finish.
    async fn handle_completion(&self, task_id: u64, outcome: TaskOutcome) {
        let Some(cycle) = self.route(task_id, true) else {
            // Retired by a restart; its activity was already accounted for.
            return;
        };
        self.activity_decrease();
        {
            *cycle.slot.lock() = TaskSlot::Idle;
        }

        let (head, error) = outcome.into_parts();
        {
            let mut response = cycle.response.lock();
            if let Some(head) = head {
                response.status = Some(head.status);
                response.headers = head.headers;
            }
            response.timestamp = Some(Utc::now());
        }

        if matches!(error, Some(CycleError::Cancelled)) {
            if cycle.explicitly_canceling() {
                debug!("task {} cancelled explicitly, suppressing completion", task_id);
            } else if let Some(handler) = cycle.completion.lock().take() {
                handler(Arc::clone(&cycle), Some(CycleError::Cancelled));
            }
            self.remove_cycle(&cycle);
            return;
        }

        let status = cycle.response.lock().status_code();

        let retry = self.is_active()
            && match &*self.retry_decision.read() {
                RetryDecision::Custom(decide) => decide(&cycle, error.as_ref()),
                RetryDecision::Default => default_should_retry(
                    cycle.solicited(),
                    cycle.retried_count(),
                    self.config.max_retry_count,
                    error.as_ref(),
                    status,
                ),
            };
        if retry {
            let retried = cycle.increment_retried();
            let delay = self.config.retry_delay();
            debug!("task {} scheduling retry {} in {:?}", task_id, retried, delay);
            let cycle = Arc::clone(&cycle);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                cycle.restart();
            });
            return;
        }

        let mut terminal: Option<CycleError> = None;
        if let Some(status) = status {
            let failed = match &*self.failure_decision.read() {
                FailureDecision::Custom(decide) => decide(status),
                FailureDecision::Default => status >= 400,
            };
            if failed {
                terminal = Some(CycleError::StatusCodeSeemsToHaveErred { status });
            }
        }
        if terminal.is_none() {
            terminal = error;
        }

        if terminal.is_none() {
            let processors = cycle.resolved_response_processors(self);
            if !processors.is_empty() {
                let worker_cycle = Arc::clone(&cycle);
                terminal = tokio::task::spawn_blocking(move || {
                    let mut response = worker_cycle.response.lock();
                    for processor in &processors {
                        if let Err(error) = processor.process_response(&mut response) {
                            return Some(error);
                        }
                    }
                    None
                })
                .await
                .unwrap_or_else(|e| {
                    Some(CycleError::Processor {
                        message: format!("response processor panicked: {}", e),
                    })
                });
            }
        }

        self.finish_cycle(&cycle, terminal);
    }

    /// Deliver the terminal outcome exactly once and deregister the cycle.
    pub(crate) fn finish_cycle(&self, cycle: &Arc<Cycle>, error: Option<CycleError>) {
        let handler = cycle.completion.lock().take();
        match handler {
            Some(handler) => handler(Arc::clone(cycle), error),
            None => debug!("cycle finished without a completion handler"),
        }
        self.remove_cycle(cycle);
    }

    // --- cancellation --------------------------------------------------

    /// Cancel a batch of cycles. For in-flight tasks the transport's
    /// completion callback remains the single authority that settles
    /// delivery; cycles that never created a task are settled here.
    pub fn cancel_cycles(&self, cycles: &[Arc<Cycle>], explicitly: bool) {
        for cycle in cycles {
            cycle.explicitly_canceling.store(explicitly, Ordering::SeqCst);
            let in_flight = {
                let mut slot = cycle.slot.lock();
                match &*slot {
                    TaskSlot::InFlight(handle) => {
                        handle.cancel.cancel();
                        true
                    }
                    TaskSlot::Preparing | TaskSlot::Idle => {
                        *slot = TaskSlot::Idle;
                        false
                    }
                }
            };
            if in_flight {
                continue;
            }
            // No transport task, so no callback will arrive: settle now.
            if self.contains_cycle(cycle) {
                if !explicitly {
                    if let Some(handler) = cycle.completion.lock().take() {
                        handler(Arc::clone(cycle), Some(CycleError::Cancelled));
                    }
                }
                self.remove_cycle(cycle);
            }
        }
    }

    // --- activity bookkeeping ------------------------------------------

    fn activity_increase(&self) {
        if let Some(indicator) = &self.indicator {
            indicator.increase();
        }
    }

    fn activity_decrease(&self) {
        if let Some(indicator) = &self.indicator {
            indicator.decrease();
        }
    }
}

/// Built-in retry rule: solicited cycles always retry; otherwise retries
/// are bounded and only transport timeouts and 408/503 responses qualify.
fn default_should_retry(
    solicited: bool,
    retried_count: u32,
    max_retry_count: u32,
    error: Option<&CycleError>,
    status: Option<u16>,
) -> bool {
    if solicited {
        return true;
    }
    if retried_count > max_retry_count {
        return false;
    }
    if matches!(error, Some(CycleError::TimedOut)) {
        return true;
    }
    matches!(status, Some(408) | Some(503))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_rule() {
        // Solicited cycles ignore every bound.
        assert!(default_should_retry(true, 100, 3, None, Some(200)));
        // Bounded: stop once the count exceeds the maximum.
        assert!(default_should_retry(false, 3, 3, None, Some(503)));
        assert!(!default_should_retry(false, 4, 3, None, Some(503)));
        // Only timeouts and 408/503 qualify.
        assert!(default_should_retry(false, 0, 3, Some(&CycleError::TimedOut), None));
        assert!(default_should_retry(false, 0, 3, None, Some(408)));
        assert!(!default_should_retry(false, 0, 3, None, Some(500)));
        assert!(!default_should_retry(
            false,
            0,
            3,
            Some(&CycleError::Transport { message: "x".into() }),
            None
        ));
    }

    #[test]
    fn test_preserved_state_round_trip() {
        let mut state = PreservedState::default();
        state.headers.insert("X-Token".into(), "abc".into());
        state
            .parameters
            .insert("tag".into(), vec!["a".into(), "b".into()]);

        let bytes = state.to_bytes().unwrap();
        let restored = PreservedState::from_bytes(&bytes).unwrap();
        assert_eq!(state, restored);
    }
}
