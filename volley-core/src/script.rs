use std::collections::BTreeMap;
use std::sync::Arc;

use crate::check::Check;
use crate::template::{RenderError, RequestTemplate};

/// What every iteration does: render one request, send it, run the checks.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub template: RequestTemplate,
    pub checks: Vec<Check>,
    /// Static template parameters (`${name}`), shared by every VU.
    pub params: Arc<BTreeMap<String, String>>,
}

impl Script {
    pub fn new(name: impl Into<String>, template: RequestTemplate) -> Self {
        Self {
            name: name.into(),
            template,
            checks: Vec::new(),
            params: Arc::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = Arc::new(params);
        self
    }

    /// Fails fast when the request url can't be resolved from the static parameters.
    pub fn preflight(&self) -> Result<url::Url, RenderError> {
        self.template.resolve_url(&self.params)
    }
}
