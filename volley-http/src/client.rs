use bytes::Bytes;
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::Duration;

use super::util::{has_header, host_header_value};
use super::{Error, HttpRequest, HttpResponse, Result};

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // Unreachable hosts otherwise wait out the OS connect timeout.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector(connect_timeout));

        Self::from_connector(https_connector)
    }

    /// Client that accepts any server certificate (self-signed, expired, wrong host).
    ///
    /// Handshake signatures are still checked against the presented certificate.
    pub fn insecure(connect_timeout: Option<Duration>) -> Result<Self> {
        let tls = crate::tls::insecure_client_config()?;
        let https_connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector(connect_timeout));

        Ok(Self::from_connector(https_connector))
    }

    fn from_connector(connector: HttpsConnector<HttpConnector>) -> Self {
        Self {
            inner: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    /// Sends `req` and reads the whole response body.
    ///
    /// `req.timeout` bounds the full exchange (connect, headers and body).
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let target = check_url(&req.url)?;
        let timeout = req.timeout;
        let outgoing = build_request(req, &target)?;

        let send = async {
            let response: hyper::Response<Incoming> = self.inner.request(outgoing).await?;
            let (parts, body) = response.into_parts();
            let bytes = body.collect().await?.to_bytes();
            Ok::<_, Error>((parts, bytes))
        };

        let (parts, body) = if let Some(limit) = timeout {
            tokio::time::timeout(limit, send)
                .await
                .map_err(|_| Error::Timeout(limit))??
        } else {
            send.await?
        };

        log::trace!("http {target} -> {}", parts.status);

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            headers: flatten_headers(&parts.headers),
            body,
        })
    }
}

fn http_connector(connect_timeout: Option<Duration>) -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.enforce_http(false);
    connector.set_connect_timeout(connect_timeout);
    connector
}

fn check_url(raw: &str) -> Result<url::Url> {
    let target = url::Url::parse(raw).map_err(|_| Error::InvalidUrl(raw.to_string()))?;
    match target.scheme() {
        "http" | "https" => Ok(target),
        _ => Err(Error::UnsupportedScheme(raw.to_string())),
    }
}

fn build_request(req: HttpRequest, target: &url::Url) -> Result<Request<Full<Bytes>>> {
    let uri: hyper::Uri = req
        .url
        .parse()
        .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

    let mut builder = Request::builder().method(req.method).uri(uri);
    let headers = builder
        .headers_mut()
        .ok_or_else(|| Error::InvalidUrl(req.url.clone()))?;

    if !has_header(&req.headers, "host")
        && let Some(host) = host_header_value(target)
    {
        headers.insert(http::header::HOST, HeaderValue::from_str(&host)?);
    }
    if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from(req.body.len()));
    }
    for (name, value) in &req.headers {
        headers.append(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
    }

    Ok(builder.body(Full::new(req.body))?)
}

/// One entry per header name (lowercase), repeated values joined with ", ".
fn flatten_headers(map: &HeaderMap) -> Vec<(String, String)> {
    map.keys()
        .map(|name| {
            let joined = map
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()))
                .collect::<Vec<_>>()
                .join(", ");
            (name.as_str().to_string(), joined)
        })
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .collect()
}
