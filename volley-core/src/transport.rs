use std::future::Future;

use volley_http::{HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionRefused,
    Tls,
    Connect,
    /// The request could not be built or sent (bad header, bad url).
    InvalidRequest,
    /// The exchange started but failed mid-way (reset, malformed response, body read).
    Protocol,
}

/// A request that produced no response. Iterations hitting this are failed, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
}

impl NetworkError {
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> NetworkErrorKind {
        self.kind
    }
}

impl From<HttpTransportErrorKind> for NetworkErrorKind {
    fn from(kind: HttpTransportErrorKind) -> Self {
        match kind {
            HttpTransportErrorKind::InvalidUrl
            | HttpTransportErrorKind::UnsupportedScheme
            | HttpTransportErrorKind::RequestBuild
            | HttpTransportErrorKind::HeaderName
            | HttpTransportErrorKind::HeaderValue => Self::InvalidRequest,
            HttpTransportErrorKind::ConnectionRefused => Self::ConnectionRefused,
            HttpTransportErrorKind::Tls => Self::Tls,
            HttpTransportErrorKind::Connect => Self::Connect,
            HttpTransportErrorKind::Timeout => Self::Timeout,
            HttpTransportErrorKind::Request | HttpTransportErrorKind::BodyRead => Self::Protocol,
        }
    }
}

impl From<volley_http::Error> for NetworkError {
    fn from(err: volley_http::Error) -> Self {
        Self::new(err.transport_error_kind().into(), err.to_string())
    }
}

/// Issues one request and waits for the full response.
pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, NetworkError>> + Send;
}

impl Transport for HttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        Ok(self.request(request).await?)
    }
}
