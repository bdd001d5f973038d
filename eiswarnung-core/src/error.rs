use thiserror::Error;

use crate::models::ParseError;

/// Everything that can go wrong while talking to the Eiswarnung API.
#[derive(Debug, Error)]
pub enum EiswarnungError {
    /// DNS failure, refused or reset connection, or any other transport fault.
    #[error("Error occurred while communicating with the Eiswarnung API")]
    Connection(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("Timeout occurred while connecting to the Eiswarnung API")]
    ConnectionTimeout,

    /// The API rejected the request parameters (codes 300, 400, 401).
    #[error("{message} (error {code})")]
    Request { code: i64, message: String },

    /// The daily call quota is exhausted (code 402).
    #[error("{message} (error {code})")]
    Ratelimit { code: i64, message: String },

    /// The response was not JSON or did not match the expected shape.
    #[error("{message}")]
    Generic {
        message: String,
        content_type: Option<String>,
        body: Option<String>,
    },
}

impl EiswarnungError {
    /// `true` for failures that may go away when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionTimeout)
    }

    /// Envelope code carried by request and rate-limit rejections.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Request { code, .. } | Self::Ratelimit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<ParseError> for EiswarnungError {
    fn from(err: ParseError) -> Self {
        Self::Generic {
            message: format!("Unexpected response from the Eiswarnung API: {err}"),
            content_type: None,
            body: None,
        }
    }
}
