use std::any::Any;
use std::fmt;
use std::ops::RangeInclusive;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::SystemTime;

use volley_http::HttpResponse;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckAssertionError {
    #[error("{0}")]
    Failed(String),

    #[error("predicate panicked: {0}")]
    Panicked(String),

    #[error("response body is not valid UTF-8")]
    NonUtf8Body,
}

pub type Predicate =
    Arc<dyn Fn(&HttpResponse) -> Result<bool, CheckAssertionError> + Send + Sync>;

/// Outcome of one named check against one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: Arc<str>,
    pub passed: bool,
    pub iteration_id: u64,
    pub timestamp: SystemTime,
    pub diagnostic: Option<String>,
}

/// Evaluates `predicate` against `response`. Never panics: an error or a panic inside the
/// predicate yields `passed = false` with a diagnostic.
pub fn check<P>(response: &HttpResponse, predicate: P, name: &str, iteration_id: u64) -> CheckResult
where
    P: Fn(&HttpResponse) -> Result<bool, CheckAssertionError>,
{
    evaluate(response, &predicate, Arc::from(name), iteration_id)
}

fn evaluate(
    response: &HttpResponse,
    predicate: &dyn Fn(&HttpResponse) -> Result<bool, CheckAssertionError>,
    name: Arc<str>,
    iteration_id: u64,
) -> CheckResult {
    let outcome = catch_unwind(AssertUnwindSafe(|| predicate(response)))
        .unwrap_or_else(|payload| Err(CheckAssertionError::Panicked(panic_message(&*payload))));

    let (passed, diagnostic) = match outcome {
        Ok(true) => (true, None),
        Ok(false) => (false, None),
        Err(err) => {
            log::debug!("check `{name}` errored: {err}");
            (false, Some(err.to_string()))
        }
    };

    CheckResult {
        name,
        passed,
        iteration_id,
        timestamp: SystemTime::now(),
        diagnostic,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A named predicate, evaluated once per iteration against the response.
#[derive(Clone)]
pub struct Check {
    name: Arc<str>,
    predicate: Predicate,
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Check {
    pub fn new<F>(name: impl Into<Arc<str>>, predicate: F) -> Self
    where
        F: Fn(&HttpResponse) -> Result<bool, CheckAssertionError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(name: impl Into<Arc<str>>, expected: u16) -> Self {
        Self::new(name, move |res| {
            if res.status == expected {
                Ok(true)
            } else {
                Err(CheckAssertionError::Failed(format!(
                    "expected status {expected}, got {}",
                    res.status
                )))
            }
        })
    }

    pub fn status_between(name: impl Into<Arc<str>>, range: RangeInclusive<u16>) -> Self {
        Self::new(name, move |res| {
            if range.contains(&res.status) {
                Ok(true)
            } else {
                Err(CheckAssertionError::Failed(format!(
                    "expected status in {}..={}, got {}",
                    range.start(),
                    range.end(),
                    res.status
                )))
            }
        })
    }

    pub fn body_contains(name: impl Into<Arc<str>>, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(name, move |res| {
            let body = res.body_utf8().ok_or(CheckAssertionError::NonUtf8Body)?;
            Ok(body.contains(needle.as_str()))
        })
    }

    pub fn header_equals(
        name: impl Into<Arc<str>>,
        header: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let header = header.into();
        let value = value.into();
        Self::new(name, move |res| match res.header(&header) {
            Some(v) => Ok(v == value),
            None => Err(CheckAssertionError::Failed(format!(
                "header `{header}` is missing"
            ))),
        })
    }

    pub fn evaluate(&self, response: &HttpResponse, iteration_id: u64) -> CheckResult {
        evaluate(response, &*self.predicate, self.name.clone(), iteration_id)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn response(status: u16, body: &'static [u8]) -> HttpResponse {
        HttpResponse {
            status,
            body: Bytes::from_static(body),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
        }
    }

    #[test]
    fn status_check_passes_and_fails_with_diagnostic() {
        let c = Check::status("HTTP status code for login is 200", 200);

        let ok = c.evaluate(&response(200, b""), 1);
        assert!(ok.passed);
        assert_eq!(ok.iteration_id, 1);
        assert_eq!(ok.diagnostic, None);
        assert_eq!(&*ok.name, "HTTP status code for login is 200");

        let bad = c.evaluate(&response(500, b""), 2);
        assert!(!bad.passed);
        assert_eq!(
            bad.diagnostic.as_deref(),
            Some("expected status 200, got 500")
        );
    }

    #[test]
    fn panicking_predicate_is_recorded_as_failure() {
        let res = check(
            &response(200, b""),
            |_| -> Result<bool, CheckAssertionError> { panic!("boom") },
            "explodes",
            9,
        );
        assert!(!res.passed);
        assert_eq!(res.diagnostic.as_deref(), Some("predicate panicked: boom"));
    }

    #[test]
    fn false_predicate_has_no_diagnostic() {
        let res = check(&response(200, b"{}"), |_| Ok(false), "nope", 0);
        assert!(!res.passed);
        assert!(res.diagnostic.is_none());
    }

    #[test]
    fn builtin_predicates() {
        let res = response(204, b"{\"token\":\"abc\"}");

        assert!(Check::status_between("2xx", 200..=299).evaluate(&res, 0).passed);
        assert!(!Check::status_between("4xx", 400..=499).evaluate(&res, 0).passed);
        assert!(Check::body_contains("token", "token").evaluate(&res, 0).passed);
        assert!(!Check::body_contains("error", "error").evaluate(&res, 0).passed);
        assert!(
            Check::header_equals("json", "Content-Type", "application/json")
                .evaluate(&res, 0)
                .passed
        );

        let missing = Check::header_equals("etag", "ETag", "x").evaluate(&res, 0);
        assert!(!missing.passed);
        assert_eq!(missing.diagnostic.as_deref(), Some("header `ETag` is missing"));
    }

    #[test]
    fn non_utf8_body_fails_body_contains() {
        let res = response(200, &[0xff, 0xfe]);
        let out = Check::body_contains("utf8", "x").evaluate(&res, 0);
        assert!(!out.passed);
        assert_eq!(
            out.diagnostic.as_deref(),
            Some("response body is not valid UTF-8")
        );
    }
}
