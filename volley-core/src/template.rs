use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use volley_http::HttpRequest;

pub type BodyFn = dyn Fn(&IterationContext) -> Result<Bytes, RenderError> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("missing template parameter `{0}`")]
    MissingParameter(String),

    #[error("unterminated placeholder at byte {at} in `{template}`")]
    Unterminated { template: String, at: usize },

    #[error("rendered url is not an absolute http(s) url: `{0}`")]
    InvalidUrl(String),

    #[error("body build failed: {0}")]
    Body(String),
}

/// Per-iteration values visible to templates.
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub scenario: Arc<str>,
    /// Run-wide VU id (1-based).
    pub vu_id: u64,
    /// VU index within its scenario (1-based).
    pub scenario_vu: u64,
    /// Iteration count of this VU (0-based).
    pub iteration: u64,
    pub params: Arc<BTreeMap<String, String>>,
}

impl IterationContext {
    /// Resolves a placeholder name, built-ins first.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "__VU" => Some(self.vu_id.to_string()),
            "__ITER" => Some(self.iteration.to_string()),
            "__SCENARIO" => Some(self.scenario.to_string()),
            _ => self.params.get(name).cloned(),
        }
    }
}

#[derive(Clone, Default)]
pub enum BodyBuilder {
    #[default]
    Empty,
    Text(String),
    /// JSON document whose string leaves (and object keys) are templates.
    Json(serde_json::Value),
    Custom(Arc<BodyFn>),
}

impl fmt::Debug for BodyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: BodyBuilder,
    pub timeout: Option<Duration>,
}

impl RequestTemplate {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: BodyBuilder::Empty,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(http::Method::POST, url)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: BodyBuilder) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Renders and checks the url using only static parameters (no built-ins).
    pub fn resolve_url(&self, params: &BTreeMap<String, String>) -> Result<url::Url, RenderError> {
        let rendered = render_str(&self.url, |name| params.get(name).cloned())?;
        parse_http_url(&rendered)
    }
}

/// Renders `template` for one iteration. Same template and context, same request.
pub fn render(
    template: &RequestTemplate,
    ctx: &IterationContext,
) -> Result<HttpRequest, RenderError> {
    let lookup = |name: &str| ctx.lookup(name);

    let url = render_str(&template.url, lookup)?;
    parse_http_url(&url)?;

    let headers = template
        .headers
        .iter()
        .map(|(k, v)| Ok((render_str(k, lookup)?, render_str(v, lookup)?)))
        .collect::<Result<Vec<_>, RenderError>>()?;

    let body = match &template.body {
        BodyBuilder::Empty => Bytes::new(),
        BodyBuilder::Text(t) => Bytes::from(render_str(t, lookup)?),
        BodyBuilder::Json(v) => {
            let rendered = render_json(v, &lookup)?;
            let bytes =
                serde_json::to_vec(&rendered).map_err(|e| RenderError::Body(e.to_string()))?;
            Bytes::from(bytes)
        }
        BodyBuilder::Custom(f) => f(ctx)?,
    };

    Ok(HttpRequest {
        method: template.method.clone(),
        url,
        headers,
        body,
        timeout: template.timeout,
    })
}

fn parse_http_url(raw: &str) -> Result<url::Url, RenderError> {
    let parsed = url::Url::parse(raw).map_err(|_| RenderError::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(parsed),
        _ => Err(RenderError::InvalidUrl(raw.to_string())),
    }
}

/// Substitutes `${name}` placeholders. A `$` not followed by `{` is literal.
fn render_str<F>(template: &str, lookup: F) -> Result<String, RenderError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(pos) = rest.find("${") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let Some(end) = after.find('}') else {
            return Err(RenderError::Unterminated {
                template: template.to_string(),
                at: offset + pos,
            });
        };

        let name = after[..end].trim();
        let value = lookup(name).ok_or_else(|| RenderError::MissingParameter(name.to_string()))?;
        out.push_str(&value);

        let consumed = pos + 2 + end + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

fn render_json<F>(value: &serde_json::Value, lookup: &F) -> Result<serde_json::Value, RenderError>
where
    F: Fn(&str) -> Option<String>,
{
    use serde_json::Value;

    Ok(match value {
        Value::String(s) => Value::String(render_str(s, lookup)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_json(v, lookup))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(render_str(k, lookup)?, render_json(v, lookup)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(params: &[(&str, &str)]) -> IterationContext {
        IterationContext {
            scenario: Arc::from("login"),
            vu_id: 3,
            scenario_vu: 2,
            iteration: 7,
            params: Arc::new(
                params
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
        }
    }

    fn login_template() -> RequestTemplate {
        RequestTemplate::post("${BASE_URL}/auth/login")
            .with_header("Content-Type", "application/json")
            .with_header("X-Vu", "${__VU}-${__ITER}")
            .with_body(BodyBuilder::Json(serde_json::json!({
                "loginName": "${LOGIN_NAME}",
                "loginPassword": "${LOGIN_PASSWORD}",
                "attempt": 1,
            })))
    }

    #[test]
    fn renders_url_headers_and_json_body() {
        let c = ctx(&[
            ("BASE_URL", "http://127.0.0.1:8080"),
            ("LOGIN_NAME", "alice"),
            ("LOGIN_PASSWORD", "s3cret"),
        ]);
        let req = render(&login_template(), &c).unwrap_or_else(|e| panic!("render: {e}"));

        assert_eq!(req.method, http::Method::POST);
        assert_eq!(req.url, "http://127.0.0.1:8080/auth/login");
        assert_eq!(
            req.headers,
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Vu".to_string(), "3-7".to_string()),
            ]
        );

        let body: serde_json::Value =
            serde_json::from_slice(&req.body).unwrap_or_else(|e| panic!("json: {e}"));
        assert_eq!(
            body,
            serde_json::json!({"loginName": "alice", "loginPassword": "s3cret", "attempt": 1})
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let c = ctx(&[
            ("BASE_URL", "https://example.com"),
            ("LOGIN_NAME", "a"),
            ("LOGIN_PASSWORD", "b"),
        ]);
        let t = login_template();
        let a = render(&t, &c).unwrap_or_else(|e| panic!("render: {e}"));
        let b = render(&t, &c).unwrap_or_else(|e| panic!("render: {e}"));
        assert_eq!(a, b);
    }

    #[test]
    fn missing_parameter_is_reported_by_name() {
        let c = ctx(&[("BASE_URL", "http://localhost")]);
        let err = render(&login_template(), &c).err();
        assert_eq!(
            err,
            Some(RenderError::MissingParameter("LOGIN_NAME".to_string()))
        );
    }

    #[test]
    fn unterminated_placeholder() {
        let t = RequestTemplate::get("http://localhost/${oops");
        let err = render(&t, &ctx(&[])).err();
        assert!(matches!(err, Some(RenderError::Unterminated { at: 17, .. })));
    }

    #[test]
    fn dollar_without_brace_is_literal() {
        let t = RequestTemplate::post("http://localhost/x")
            .with_body(BodyBuilder::Text("cost: $5 for ${__SCENARIO}".to_string()));
        let req = render(&t, &ctx(&[])).unwrap_or_else(|e| panic!("render: {e}"));
        assert_eq!(&req.body[..], b"cost: $5 for login");
    }

    #[test]
    fn rejects_non_http_urls() {
        for url in ["ftp://localhost/file", "/auth/login", "mailto:a@b.c"] {
            let err = render(&RequestTemplate::get(url), &ctx(&[])).err();
            assert_eq!(err, Some(RenderError::InvalidUrl(url.to_string())), "{url}");
        }
    }

    #[test]
    fn custom_body_errors_propagate() {
        let t = RequestTemplate::post("http://localhost/").with_body(BodyBuilder::Custom(
            Arc::new(|c: &IterationContext| {
                if c.iteration % 2 == 0 {
                    Ok(Bytes::from_static(b"even"))
                } else {
                    Err(RenderError::Body("odd iteration".to_string()))
                }
            }),
        ));

        let err = render(&t, &ctx(&[])).err();
        assert_eq!(err, Some(RenderError::Body("odd iteration".to_string())));
    }

    #[test]
    fn resolve_url_uses_static_params_only() {
        let params: BTreeMap<String, String> =
            [("BASE_URL".to_string(), "http://localhost:1".to_string())]
                .into_iter()
                .collect();

        let ok = RequestTemplate::get("${BASE_URL}/auth/login").resolve_url(&params);
        assert_eq!(ok.map(|u| u.path().to_string()), Ok("/auth/login".to_string()));

        let builtin = RequestTemplate::get("${BASE_URL}/vu/${__VU}").resolve_url(&params);
        assert_eq!(
            builtin,
            Err(RenderError::MissingParameter("__VU".to_string()))
        );
    }
}
