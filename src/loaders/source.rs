//! Where input bytes come from: a remote URL or the local filesystem.
use std::{fmt, path::PathBuf, time::Duration};

use reqwest::{Client, StatusCode, Url, header};
use tracing::{Instrument, info, info_span};

use crate::error::{DenyReason, FetchError, PipelineError};

#[derive(Debug, Clone, PartialEq)]
pub enum SourceLocation {
    Remote(Url),
    Local(PathBuf),
}

impl SourceLocation {
    /// `http(s)://` is fetched over the network, `file://` and anything else is a path.
    pub fn parse(location: &str) -> Self {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => SourceLocation::Remote(url),
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => SourceLocation::Local(path),
                Err(()) => SourceLocation::Local(PathBuf::from(location)),
            },
            _ => SourceLocation::Local(PathBuf::from(location)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceLocation::Remote(_))
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Remote(url) => write!(f, "{url}"),
            SourceLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

pub fn http_client(timeout: Duration) -> Result<Client, PipelineError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(PipelineError::HttpClient)
}

/// Reads the whole source into memory.
/// With a `token` the request carries a bearer credential and asks for the raw file,
/// which is what the GitHub contents API expects for private repositories.
#[tracing::instrument(err, skip(client, location, token), fields(%location))]
pub async fn fetch(
    client: &Client,
    source_name: &'static str,
    location: &SourceLocation,
    token: Option<&str>,
) -> Result<Vec<u8>, PipelineError> {
    let unavailable = |cause: FetchError| PipelineError::SourceUnavailable {
        source_name,
        location: location.to_string(),
        cause,
    };

    let bytes = match location {
        SourceLocation::Local(path) => tokio::fs::read(path)
            .instrument(info_span!("Reading local file"))
            .await
            .map_err(|e| unavailable(e.into()))?,
        SourceLocation::Remote(url) => {
            let mut request = client.get(url.clone());
            if let Some(token) = token {
                request = request
                    .bearer_auth(token)
                    .header(header::ACCEPT, "application/vnd.github.raw");
            }

            let response = request
                .send()
                .instrument(info_span!("Fetching", source_name))
                .await
                .map_err(|e| unavailable(e.into()))?;

            let status = response.status();
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                return Err(PipelineError::AccessDenied {
                    location: location.to_string(),
                    reason: DenyReason::Rejected(status),
                });
            }
            if !status.is_success() {
                return Err(unavailable(FetchError::Status(status)));
            }

            response
                .bytes()
                .instrument(info_span!("Reading body of response"))
                .await
                .map_err(|e| unavailable(e.into()))?
                .to_vec()
        }
    };

    info!("got {} bytes of {source_name}", bytes.len());

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::serve_status;

    async fn fetch_from(status_line: &'static str) -> PipelineError {
        let client = http_client(Duration::from_secs(5)).unwrap();
        let location = SourceLocation::parse(&serve_status(status_line).await);

        fetch(&client, "metro line source", &location, Some("expired-token"))
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn rejected_credential_is_access_denied() {
        for (status_line, status) in [
            ("401 Unauthorized", StatusCode::UNAUTHORIZED),
            ("403 Forbidden", StatusCode::FORBIDDEN),
        ] {
            let err = fetch_from(status_line).await;

            assert!(
                matches!(
                    err,
                    PipelineError::AccessDenied {
                        reason: DenyReason::Rejected(s),
                        ..
                    } if s == status
                ),
                "{status_line}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn not_found_is_unavailable() {
        let err = fetch_from("404 Not Found").await;

        assert!(matches!(
            err,
            PipelineError::SourceUnavailable {
                cause: FetchError::Status(StatusCode::NOT_FOUND),
                ..
            }
        ));
    }

    #[test]
    fn classifies_locations() {
        assert!(matches!(
            SourceLocation::parse("https://example.org/gtfs.zip"),
            SourceLocation::Remote(_)
        ));
        assert_eq!(
            SourceLocation::parse("data/gtfs.zip"),
            SourceLocation::Local(PathBuf::from("data/gtfs.zip"))
        );
        assert_eq!(
            SourceLocation::parse("file:///tmp/gtfs.zip"),
            SourceLocation::Local(PathBuf::from("/tmp/gtfs.zip"))
        );
    }

    #[tokio::test]
    async fn missing_local_file_is_unavailable() {
        let client = http_client(Duration::from_secs(1)).unwrap();
        let location = SourceLocation::Local(PathBuf::from("/definitely/not/here.zip"));

        let err = fetch(&client, "GTFS feed", &location, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::SourceUnavailable {
                source_name: "GTFS feed",
                cause: FetchError::Io(_),
                ..
            }
        ));
    }
}
