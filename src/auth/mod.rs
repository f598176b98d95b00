// Authentication challenge resolution — action dispatch and credential handling.
//
// The transport synthesizes a challenge from a 401/407 response and hands it
// to the session, which asks every capable authenticator to act. Whatever an
// authenticator decides flows back through a single-shot responder; the
// transport then re-issues the request with credentials, passes the
// challenged response through, or abandons the attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::debug;

use crate::processor::BasicAuthProcessor;

/// Authentication scheme named by the challenge's `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeScheme {
    Basic,
    Digest,
    Ntlm,
    Other(String),
}

/// One authentication challenge, synthesized from a 401/407 response.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub scheme: ChallengeScheme,
    pub host: String,
    pub realm: Option<String>,
    /// Credential rounds already failed for this protection space within the
    /// current attempt.
    pub previous_failure_count: u32,
    pub status: u16,
}

/// What an authenticator decides to do about a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    ProvideCredentials,
    ProvideCredentialsWithInteraction,
    PerformDefaultHandling,
    RejectProtectionSpace,
    CancelConnection,
}

/// A username/password pair applied to a re-issued request.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `Authorization` header value carrying this credential.
    pub fn basic_header(&self) -> String {
        BasicAuthProcessor::header_value(&self.username, &self.password)
    }
}

/// Resolution of a challenge, consumed by the transport.
#[derive(Debug)]
pub enum ChallengeDisposition {
    UseCredential(Credential),
    PerformDefaultHandling,
    RejectProtectionSpace,
    CancelChallenge,
}

/// Single-shot continuation for one challenge. The first resolution wins;
/// later attempts are ignored and reported as such.
pub struct ChallengeResponder {
    tx: Mutex<Option<oneshot::Sender<ChallengeDisposition>>>,
}

impl ChallengeResponder {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<ChallengeDisposition>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Resolve the challenge. Returns false if it was already resolved.
    pub fn resolve(&self, disposition: ChallengeDisposition) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(disposition).is_ok(),
            None => {
                debug!("challenge already resolved, dropping duplicate disposition");
                false
            }
        }
    }
}

/// Outcome of an interactive credential prompt. Interaction can only end by
/// providing credentials or cancelling — never by requesting another
/// interaction.
#[derive(Debug)]
pub enum InteractionOutcome {
    Provide(Credential),
    Cancel,
}

/// External capability that collects credentials from a user. The
/// continuation must be invoked exactly once.
pub trait CredentialPrompt: Send + Sync {
    fn request_credentials(
        &self,
        challenge: &Challenge,
        done: Box<dyn FnOnce(InteractionOutcome) + Send>,
    );
}

/// Pluggable challenge handler. Every authenticator whose `can_handle`
/// returns true is asked to act on the challenge.
pub trait Authenticator: Send + Sync {
    fn can_handle(&self, challenge: &Challenge) -> bool;

    /// Default decision rule: provide credentials directly on the first
    /// try, ask the user once a round has failed.
    fn action_for_challenge(&self, challenge: &Challenge) -> AuthAction {
        if challenge.previous_failure_count == 0 {
            AuthAction::ProvideCredentials
        } else {
            AuthAction::ProvideCredentialsWithInteraction
        }
    }

    fn perform_action(
        &self,
        action: AuthAction,
        challenge: &Challenge,
        responder: Arc<ChallengeResponder>,
    );
}

/// Username/password authenticator for Basic challenges, with an optional
/// interactive prompt for renewing rejected credentials.
pub struct CredentialAuthenticator {
    credential: Arc<RwLock<Credential>>,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    interacting: Arc<AtomicBool>,
}

impl CredentialAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credential: Arc::new(RwLock::new(Credential::new(username, password))),
            prompt: None,
            interacting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn credential(&self) -> Credential {
        self.credential.read().clone()
    }
}

impl Authenticator for CredentialAuthenticator {
    fn can_handle(&self, challenge: &Challenge) -> bool {
        challenge.scheme == ChallengeScheme::Basic
    }

    fn perform_action(
        &self,
        action: AuthAction,
        challenge: &Challenge,
        responder: Arc<ChallengeResponder>,
    ) {
        match action {
            AuthAction::ProvideCredentials => {
                responder.resolve(ChallengeDisposition::UseCredential(self.credential()));
            }
            AuthAction::ProvideCredentialsWithInteraction => {
                // Only one interactive prompt may be active per instance; a
                // concurrent challenge is cancelled instead of queued.
                if self.interacting.swap(true, Ordering::SeqCst) {
                    debug!("already interacting, cancelling concurrent challenge");
                    responder.resolve(ChallengeDisposition::CancelChallenge);
                    return;
                }
                let prompt = match &self.prompt {
                    Some(prompt) => Arc::clone(prompt),
                    None => {
                        self.interacting.store(false, Ordering::SeqCst);
                        responder.resolve(ChallengeDisposition::CancelChallenge);
                        return;
                    }
                };

                let credential = Arc::clone(&self.credential);
                let interacting = Arc::clone(&self.interacting);
                prompt.request_credentials(
                    challenge,
                    Box::new(move |outcome| {
                        interacting.store(false, Ordering::SeqCst);
                        match outcome {
                            InteractionOutcome::Provide(c) => {
                                *credential.write() = c.clone();
                                responder.resolve(ChallengeDisposition::UseCredential(c));
                            }
                            InteractionOutcome::Cancel => {
                                responder.resolve(ChallengeDisposition::CancelChallenge);
                            }
                        }
                    }),
                );
            }
            AuthAction::PerformDefaultHandling => {
                responder.resolve(ChallengeDisposition::PerformDefaultHandling);
            }
            AuthAction::RejectProtectionSpace => {
                responder.resolve(ChallengeDisposition::RejectProtectionSpace);
            }
            AuthAction::CancelConnection => {
                responder.resolve(ChallengeDisposition::CancelChallenge);
            }
        }
    }
}

/// Build a challenge from a challenged response's `WWW-Authenticate` (or
/// `Proxy-Authenticate`) header value.
pub(crate) fn challenge_from_header(
    status: u16,
    header: Option<&str>,
    host: &str,
    previous_failure_count: u32,
) -> Challenge {
    let mut scheme = ChallengeScheme::Other(String::new());
    let mut realm = None;

    if let Some(header) = header {
        let mut parts = header.trim().splitn(2, char::is_whitespace);
        if let Some(name) = parts.next() {
            scheme = match name.to_lowercase().as_str() {
                "basic" => ChallengeScheme::Basic,
                "digest" => ChallengeScheme::Digest,
                "ntlm" => ChallengeScheme::Ntlm,
                other => ChallengeScheme::Other(other.to_string()),
            };
        }
        if let Some(rest) = parts.next() {
            // Minimal parameter scan for realm="...".
            for parameter in rest.split(',') {
                if let Some(loc) = parameter.find('=') {
                    let key = parameter[..loc].trim();
                    if key.eq_ignore_ascii_case("realm") {
                        let value = parameter[loc + 1..].trim().trim_matches('"');
                        realm = Some(value.to_string());
                    }
                }
            }
        }
    }

    Challenge {
        scheme,
        host: host.to_string(),
        realm,
        previous_failure_count,
        status,
    }
}
