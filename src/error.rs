//! Error types for recruiter-rm.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Responder error: {0}")]
    Responder(#[from] ResponderError),
}

/// Configuration-related errors. All of these are fatal and raised before
/// any connection is opened.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error(
        "BYPASS_OPENAI can only be used with DRY_RUN, to avoid sending emails with canned data"
    )]
    BypassRequiresDryRun,
}

/// Text-generation provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Name/company extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Completion request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("No JSON object found in completion: {raw:?}")]
    NoJsonObject { raw: String },

    #[error("Completion contained malformed JSON ({source}): {raw:?}")]
    InvalidJson {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Mail transport errors (IMAP and SMTP).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {server}: {reason}")]
    Connect { server: String, reason: String },

    #[error("Authentication failed on {server}: {reason}")]
    Auth { server: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP command {command} failed: {reason}")]
    Protocol { command: String, reason: String },

    #[error("SMTP send failed: {0}")]
    Send(String),

    #[error("Connection already closed")]
    Closed,

    #[error("Background mail task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-message failures caught at the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Could not compose reply: {0}")]
    Compose(String),

    #[error("Sending reply failed: {0}")]
    Send(#[source] TransportError),

    #[error("Reply sent but moving message to done folder failed: {0}")]
    MoveAfterSend(#[source] TransportError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
