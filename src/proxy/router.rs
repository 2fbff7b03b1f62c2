//! Prefix-based upstream selection and path rewriting

use crate::proxy::types::*;

/// Ordered `(prefix, target)` rules with an optional catch-all target
#[derive(Clone, Debug, Default)]
pub struct PathRouter {
    rules: Vec<RouteRule>,
    default_target: Option<TargetUrl>,
}

/// Outcome of routing one request path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRoute<'a> {
    pub target: &'a TargetUrl,
    pub rewritten_path: String,
}

impl ResolvedRoute<'_> {
    /// Full upstream URL: target base followed by the rewritten path
    pub fn upstream_url(&self) -> String {
        format!(
            "{}{}",
            self.target.as_ref().trim_end_matches('/'),
            self.rewritten_path
        )
    }
}

impl PathRouter {
    pub fn new(rules: Vec<RouteRule>, default_target: Option<TargetUrl>) -> Self {
        Self {
            rules,
            default_target,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.routes.clone(), config.default_target.clone())
    }

    /// First rule whose prefix literally starts `path_and_query`, with that prefix stripped
    pub fn resolve(&self, path_and_query: &str) -> Option<ResolvedRoute<'_>> {
        self.rules
            .iter()
            .find(|rule| path_and_query.starts_with(rule.from.as_ref()))
            .map(|rule| ResolvedRoute {
                target: &rule.to,
                rewritten_path: strip_prefix(path_and_query, rule.from.as_ref()),
            })
    }

    /// Like [`resolve`](Self::resolve), falling back to the default target with the path untouched
    pub fn route(&self, path_and_query: &str) -> ProxyResult<ResolvedRoute<'_>> {
        if let Some(route) = self.resolve(path_and_query) {
            return Ok(route);
        }

        self.default_target
            .as_ref()
            .map(|target| ResolvedRoute {
                target,
                rewritten_path: path_and_query.to_string(),
            })
            .ok_or_else(|| ProxyError::RouteNotFound {
                path: path_and_query.to_string(),
            })
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

/// Remainder after the prefix, kept rooted so it can be appended to a base URL
fn strip_prefix(path_and_query: &str, prefix: &str) -> String {
    let remainder = &path_and_query[prefix.len()..];
    if remainder.is_empty() || remainder.starts_with('/') {
        remainder.to_string()
    } else {
        format!("/{remainder}")
    }
}
