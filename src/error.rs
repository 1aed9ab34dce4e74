use std::path::PathBuf;

use reqwest::StatusCode;

/// Fatal conditions. Anything here aborts the run before an artifact is moved into place.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("{source_name} at {location} is unavailable")]
    SourceUnavailable {
        source_name: &'static str,
        location: String,
        #[source]
        cause: FetchError,
    },

    #[error("access to {location} was denied ({reason})")]
    AccessDenied {
        location: String,
        reason: DenyReason,
    },

    #[error("malformed GTFS feed: {file}")]
    MalformedFeed {
        file: String,
        #[source]
        cause: FormatError,
    },

    #[error("malformed metro line source")]
    MalformedMetroSource(#[source] FormatError),

    #[error("no metro line source location is configured")]
    MissingMetroSource,

    #[error("could not write {}", .path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("could not assemble the KMZ archive")]
    Packaging(#[source] zip::result::ZipError),

    #[error("could not build the HTTP client")]
    HttpClient(#[source] reqwest::Error),

    #[error("a loader task did not complete")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn malformed_feed(file: impl Into<String>, cause: impl Into<FormatError>) -> Self {
        PipelineError::MalformedFeed {
            file: file.into(),
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoCredential,
    Rejected(StatusCode),
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::NoCredential => write!(f, "no credential configured"),
            DenyReason::Rejected(status) => write!(f, "{status}"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("request failed")]
    Http(#[from] reqwest::Error),

    #[error("server responded with {0}")]
    Status(StatusCode),

    #[error("could not read local file")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("not a readable zip archive")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid delimited text")]
    Csv(#[from] csv::Error),

    #[error("invalid XML")]
    Xml(#[from] roxmltree::Error),

    #[error("invalid GeoJSON")]
    GeoJson(#[from] geojson::Error),

    #[error("invalid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("could not read archive entry")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Structure(String),
}
