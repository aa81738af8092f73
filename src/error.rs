// Error types for each stage of a run: configuration, month resolution,
// fetching, CSV export and mail delivery.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::month::MonthToken;

/// Missing or malformed settings. Raised while building `AppConfig`,
/// before any request is made.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to load settings")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonthError {
    #[error("'{0}' is not a YYYYMM month")]
    Malformed(String),
    #[error("month component {month} of {year} is outside 1..=12")]
    MonthOutOfRange { year: i32, month: u32 },
    #[error("invalid month range: start {start} is after end {end}")]
    InvalidRange { start: MonthToken, end: MonthToken },
}

/// Failure of a single page request. After retries are exhausted the last
/// attempt's error is returned as-is.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for {month} offset {offset} failed")]
    Transport {
        month: MonthToken,
        offset: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("ranking endpoint returned {status} for {month} offset {offset}: {body}")]
    Status {
        month: MonthToken,
        offset: u32,
        status: u16,
        body: String,
    },
    #[error("could not decode ranking page for {month} offset {offset}")]
    Decode {
        month: MonthToken,
        offset: u32,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to access {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Notification transport failure. Never retried.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid mail address '{address}'")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
    #[error("failed to read attachment {}", .path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid attachment content type: {0}")]
    ContentType(String),
    #[error("failed to build mail message")]
    Message(#[from] lettre::error::Error),
    #[error("smtp relay error")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("mail api request failed")]
    Http(#[from] reqwest::Error),
    #[error("mail api rejected the message with status {status}: {body}")]
    Api { status: u16, body: String },
}

/// Everything that can end a run.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),
    #[error(transparent)]
    Month(#[from] MonthError),
    #[error("mail transport could not be set up")]
    TransportSetup(#[source] DeliveryError),
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("artifact {} was written but delivery failed", .artifact.display())]
    Delivery {
        artifact: PathBuf,
        #[source]
        source: DeliveryError,
    },
}

pub type AppResult<T> = Result<T, AppError>;

/// Displays an error followed by each of its sources: `outer: inner: root`.
pub(crate) struct ErrorChain<'a>(pub &'a (dyn StdError + 'static));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

/// Keeps error payloads readable when an upstream returns a large body.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 400;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(MAX).collect();
    format!("{head}…")
}
