use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Endpoint the broker binds its listening socket to.
///
/// Unix domain sockets are the normal transport for a local bus; TCP on
/// loopback exists for platforms without Unix sockets and for tests.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum BusEndpoint {
    /// Unix domain socket bound at `path`.
    Unix { path: Utf8PathBuf },
    /// TCP socket bound at `host:port`.
    Tcp { host: String, port: u16 },
}

impl BusEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket path when this is a Unix endpoint.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_path()),
            Self::Tcp { .. } => None,
        }
    }

    /// Creates the socket's parent directory with owner-only permissions.
    ///
    /// TCP endpoints have no filesystem footprint, so this is a no-op for
    /// them.
    pub fn prepare_filesystem(&self) -> Result<(), EndpointPrepareError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .ok_or_else(|| EndpointPrepareError::NoParent {
                path: path.to_owned(),
            })?;

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        match builder.create(parent.as_std_path()) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(source) => Err(EndpointPrepareError::CreateDir {
                path: parent.to_owned(),
                source,
            }),
        }
    }
}

impl fmt::Display for BusEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for BusEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(EndpointParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| EndpointParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            other => Err(EndpointParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Errors raised while parsing a [`BusEndpoint`] from its URL form.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Input was not a valid URL.
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
    /// Scheme was neither `unix` nor `tcp`.
    #[error("unsupported endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// `unix://` URL carried no socket path.
    #[error("missing socket path in '{0}'")]
    MissingUnixPath(String),
    /// `tcp://` URL carried no host.
    #[error("missing host in '{0}'")]
    MissingHost(String),
    /// `tcp://` URL carried no port.
    #[error("missing port in '{0}'")]
    MissingPort(String),
}

/// Errors raised while preparing the endpoint's filesystem footprint.
#[derive(Debug, Error)]
pub enum EndpointPrepareError {
    /// The socket path has no parent directory to create.
    #[error("socket path '{path}' has no parent directory")]
    NoParent { path: Utf8PathBuf },
    /// Creating the parent directory failed.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("unix:///run/quay/quayd.sock", BusEndpoint::unix("/run/quay/quayd.sock"))]
    #[case("tcp://127.0.0.1:7810", BusEndpoint::tcp("127.0.0.1", 7810))]
    fn parses_valid_endpoints(#[case] input: &str, #[case] expected: BusEndpoint) {
        let parsed: BusEndpoint = input.parse().expect("endpoint should parse");
        assert_eq!(parsed, expected);
    }

    #[test]
    fn round_trips_through_display() {
        let endpoint = BusEndpoint::unix("/run/quay/quayd.sock");
        let reparsed: BusEndpoint = endpoint.to_string().parse().expect("display should reparse");
        assert_eq!(reparsed, endpoint);
    }

    #[rstest]
    #[case::bad_scheme("http://127.0.0.1:80")]
    #[case::no_port("tcp://127.0.0.1")]
    #[case::no_path("unix://")]
    fn rejects_invalid_endpoints(#[case] input: &str) {
        assert!(input.parse::<BusEndpoint>().is_err());
    }

    #[test]
    fn prepare_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("quayd.sock");
        let endpoint = BusEndpoint::unix(path.to_str().expect("utf8 path"));
        endpoint.prepare_filesystem().expect("prepare should succeed");
        assert!(path.parent().expect("parent").is_dir());
    }

    #[test]
    fn prepare_is_a_noop_for_tcp() {
        let endpoint = BusEndpoint::tcp("127.0.0.1", 0);
        endpoint.prepare_filesystem().expect("tcp needs no filesystem");
    }
}
