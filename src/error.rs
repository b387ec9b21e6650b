use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exit code for command lines that could not be parsed
pub const USAGE_EXIT_CODE: i32 = 64;

/// Everything that can go wrong while talking to a Jenkins server
#[derive(Debug, Error)]
pub enum Error {
    /// Connection, DNS or TLS failure. Never retried.
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("malformed crumb response {0:?}: expected `header:value`")]
    MalformedCrumb(String),

    #[error("crumb issuer unavailable (HTTP {status})")]
    CrumbUnavailable { status: u16 },

    #[error("build request for {job} was accepted without a Location header")]
    MissingLocation { job: String },

    #[error("build request for {job} was rejected (HTTP {status})")]
    BuildRejected { job: String, status: u16 },

    #[error("{url} kept answering HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("time expired waiting for job to enter the queue ({queue_url}, waited {waited:?})")]
    QueueTimeout { queue_url: String, waited: Duration },

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("no build number in {0}")]
    NoBuildNumber(String),

    #[error("profile {profile:?} not found in {}; run `jenkinson configure` first", path.display())]
    MissingProfile { profile: String, path: PathBuf },

    #[error("could not read credentials: {0}")]
    Config(#[from] config::ConfigError),

    #[error("could not write credentials to {}: {message}", path.display())]
    ConfigWrite { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this failure kind
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Transport { .. } => 2,
            Error::Decode { .. }
            | Error::MalformedCrumb(_)
            | Error::MissingLocation { .. }
            | Error::InvalidUrl { .. }
            | Error::NoBuildNumber(_) => 3,
            Error::QueueTimeout { .. } => 4,
            Error::MissingProfile { .. } | Error::Config(_) | Error::ConfigWrite { .. } => 5,
            Error::CrumbUnavailable { .. } | Error::BuildRejected { .. } | Error::Status { .. } => 6,
            Error::Io(_) => 1,
        }
    }

    pub(crate) fn transport(url: &str, err: impl ToString) -> Self {
        Error::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(url: &str, err: impl ToString) -> Self {
        Error::Decode {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_url(url: &str, source: url::ParseError) -> Self {
        Error::InvalidUrl {
            url: url.to_string(),
            source,
        }
    }
}
