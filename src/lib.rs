// Client-side HTTP orchestration: sessions managing retryable request
// cycles over a shared transport, plus RFC 6570 URI Template expansion for
// building resource URLs.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod processor;
pub mod query;
pub mod service;
pub mod template;

pub use auth::{
    AuthAction, Authenticator, Challenge, ChallengeDisposition, ChallengeResponder,
    ChallengeScheme, Credential, CredentialAuthenticator, CredentialPrompt, InteractionOutcome,
};
pub use config::SessionConfig;
pub use engine::cycle::{
    CompletionHandler, Cycle, CycleBuilder, CycleKind, DownloadFileHandler, SendProgressHandler,
    WriteProgressHandler,
};
pub use engine::indicator::ActivityIndicator;
pub use engine::session::{
    FailureDecision, PreservedState, RetryDecision, Session, SessionBuilder,
};
pub use engine::transport::{ReqwestTransport, Transport};
pub use error::CycleError;
pub use message::{Request, Response, TextEncoding};
pub use processor::{
    BasicAuthProcessor, DataProcessor, FormProcessor, JsonProcessor, Processor, ProcessorRegistry,
    TextProcessor,
};
pub use service::{ResourceOption, ResourceProfile, ResourceRequest, Service, ServiceProfile};
pub use template::{
    expand_uri_template, process_uri_template, TemplateError, TemplateValue, TemplateValues,
};
