use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum HttpTransportErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    RequestBuild,
    HeaderName,
    HeaderValue,
    ConnectionRefused,
    Tls,
    Connect,
    Request,
    Timeout,
    BodyRead,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// and https:// URLs are supported: {0}")]
    UnsupportedScheme(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("tls setup failed: {0}")]
    TlsConfig(#[from] rustls::Error),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("http request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn transport_error_kind(&self) -> HttpTransportErrorKind {
        match self {
            Self::InvalidUrl(_) => HttpTransportErrorKind::InvalidUrl,
            Self::UnsupportedScheme(_) => HttpTransportErrorKind::UnsupportedScheme,
            Self::RequestBuild(_) => HttpTransportErrorKind::RequestBuild,
            Self::HeaderName(_) => HttpTransportErrorKind::HeaderName,
            Self::HeaderValue(_) => HttpTransportErrorKind::HeaderValue,
            Self::TlsConfig(_) => HttpTransportErrorKind::Tls,
            Self::Request(err) => classify_request_error(err),
            Self::Timeout(_) => HttpTransportErrorKind::Timeout,
            Self::BodyRead(_) => HttpTransportErrorKind::BodyRead,
        }
    }
}

/// Narrow a legacy-client error down by walking its source chain.
///
/// rustls handshake failures reach us as `io::Error`s of kind `InvalidData`
/// raised while connecting.
fn classify_request_error(err: &hyper_util::client::legacy::Error) -> HttpTransportErrorKind {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(cur) = source {
        if let Some(io) = cur.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return HttpTransportErrorKind::ConnectionRefused;
                }
                std::io::ErrorKind::TimedOut => return HttpTransportErrorKind::Timeout,
                std::io::ErrorKind::InvalidData if err.is_connect() => {
                    return HttpTransportErrorKind::Tls;
                }
                _ => {}
            }
        }
        source = cur.source();
    }

    if err.is_connect() {
        HttpTransportErrorKind::Connect
    } else {
        HttpTransportErrorKind::Request
    }
}
