// src/infra/errors.rs — Error types for ampsizer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SizerError {
    // Provider errors (retriable)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    // User errors
    #[error("No API key found in ${env}. Set it or pass --script for a headless run.")]
    NoApiKey { env: String },

    #[error("ngspice binary not found. Set [simulator].ngspice_bin or add ngspice to PATH.")]
    NoSimulator,

    #[error("Invalid target '{input}': {message}")]
    InvalidTarget { input: String, message: String },

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SizerError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SizerError::Provider {
                retriable: true,
                ..
            } | SizerError::RateLimited { .. }
        )
    }
}

/// Simulator could not produce a measurement for a circuit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationFailure {
    #[error("simulator exited with status {code:?}: {diagnostic}")]
    NonZeroExit {
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("expected artifact '{name}' was not produced")]
    MissingArtifact { name: String },

    #[error("simulation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("simulator unavailable: {0}")]
    Unavailable(String),
}

/// A model reply that could not be turned into a trusted structured object.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    #[error("no fenced payload or JSON object found in response")]
    NoPayload,

    #[error("payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("payload does not match the {schema} schema: {message}")]
    Schema {
        schema: &'static str,
        message: String,
    },
}

/// A proposal that cannot be realized as a candidate circuit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyFailure {
    #[error("model declined to produce a circuit: {error}{}", reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    ModelError {
        error: String,
        reason: Option<String>,
    },

    #[error("candidate circuit is empty")]
    EmptyBody,

    #[error("candidate removes all active devices")]
    RemovesActiveDevices,

    #[error("component '{0}' not found in base circuit")]
    ComponentNotFound(String),

    #[error("parameter '{param}' not found on component '{component}'")]
    ParameterNotFound { component: String, param: String },

    #[error("cannot realize {action} on '{component}': {message}")]
    Unrealizable {
        component: String,
        action: String,
        message: String,
    },

    #[error("no usable circuit text and no structured changes to fold")]
    NothingToApply,
}

/// Transport-level failure talking to the model provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryFailure {
    #[error("model query timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    /// The provider refused the request outright (bad key, 4xx, ...).
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl QueryFailure {
    /// Whether re-issuing the same query can succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, QueryFailure::Rejected(_))
    }
}

impl From<SizerError> for QueryFailure {
    fn from(e: SizerError) -> Self {
        match e {
            SizerError::RateLimited { retry_after_ms, .. } => {
                QueryFailure::RateLimited { retry_after_ms }
            }
            other if other.is_retriable() => QueryFailure::Transport(other.to_string()),
            other => QueryFailure::Rejected(other.to_string()),
        }
    }
}
