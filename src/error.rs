//! Error types shared across the bridge.
//!
//! Every failure that can surface in an SLI result message or abort a request
//! is one of these variants. Messages stay on one line and never contain
//! tokens; vendor error bodies are folded into `VendorHttp`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SliError {
    /// Event type or provider we are not responsible for.
    #[error("received unknown event type '{0}'")]
    UnknownEvent(String),

    /// No custom query and no built-in default for the requested indicator.
    #[error("unsupported SLI metric {0}")]
    UnknownSli(String),

    /// Dashboard selector is neither empty, `query`, nor a valid UUID.
    #[error("dashboard ID {0} is not a valid UUID")]
    BadDashboardId(String),

    /// The credential waterfall came up empty.
    #[error("could not find any Dynatrace-specific credential secrets")]
    NoCredentials,

    /// Connection-level failure talking to the vendor.
    #[error("Dynatrace API request failed: {0}")]
    VendorTransport(#[from] reqwest::Error),

    /// Non-200 from the vendor, with the decoded error envelope when present.
    #[error("Dynatrace API returned status code {status}: {message}")]
    VendorHttp { status: u16, message: String },

    /// The vendor answered 200 but with an empty result set.
    #[error("Dynatrace API returned no data points: {0}")]
    VendorEmpty(String),

    /// A persisted config file could not be parsed.
    #[error("could not parse {path}: {detail}")]
    ParseConfig { path: String, detail: String },

    /// A vendor response body did not match the expected shape.
    #[error("could not decode Dynatrace response: {0}")]
    ParseResponse(String),

    /// The caller abandoned the request.
    #[error("request cancelled before completion")]
    Cancelled,
}

impl SliError {
    pub fn parse_config(path: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        SliError::ParseConfig {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}
