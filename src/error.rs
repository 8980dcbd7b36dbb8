use thiserror::Error;

// Failures of the fetch stage. Any of them aborts the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("portal login rejected: {0}")]
    Authentication(String),

    #[error("portal unavailable: {context}")]
    UpstreamUnavailable {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FetchError {
    pub fn upstream(context: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            context: context.into(),
            source: None,
        }
    }

    pub fn upstream_with(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::UpstreamUnavailable {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// A single send on a single channel went wrong. Recorded, never propagated
// to the other channels.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("credentials rejected: {0}")]
    Authentication(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rejected by provider (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("refused by provider: {0}")]
    Refused(String),

    #[error("could not build message: {0}")]
    InvalidMessage(String),

    #[error("all {failed} recipient(s) failed")]
    AllRecipientsFailed { failed: usize },
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        DeliveryError::Transport(e.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not found")]
    MissingVariable(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}
