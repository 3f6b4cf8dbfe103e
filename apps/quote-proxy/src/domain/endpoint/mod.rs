//! Upstream Endpoint Descriptors
//!
//! Read-only description of one upstream endpoint as resolved from the API
//! registry, plus the pure request-construction rules applied to it:
//! required-parameter validation, URL templating and header merging.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Parameters
// =============================================================================

/// Named request parameters. Ordered so that iteration is deterministic.
pub type Params = BTreeMap<String, String>;

/// Caller-supplied parameters for one proxied request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    /// Values substituted into `{name}` path placeholders.
    pub path: Params,
    /// Query-string parameters.
    pub query: Params,
    /// Caller headers forwarded upstream.
    pub headers: Params,
}

impl RequestParams {
    /// Create empty parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path parameter.
    #[must_use]
    pub fn with_path(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Add a caller header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Look up a parameter by its declared location.
    ///
    /// Header names compare case-insensitively.
    #[must_use]
    pub fn lookup(&self, name: &str, location: ParamLocation) -> Option<&str> {
        match location {
            ParamLocation::Path => self.path.get(name).map(String::as_str),
            ParamLocation::Query => self.query.get(name).map(String::as_str),
            ParamLocation::Header => self
                .headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
        }
    }
}

/// Where a required parameter must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    /// `{name}` placeholder in the path template.
    Path,
    /// Query string.
    #[default]
    Query,
    /// Request header.
    Header,
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => write!(f, "path"),
            Self::Query => write!(f, "query"),
            Self::Header => write!(f, "header"),
        }
    }
}

/// A parameter the endpoint cannot be called without.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredParam {
    /// Parameter name.
    pub name: String,
    /// Declared location.
    #[serde(rename = "in", default)]
    pub location: ParamLocation,
}

impl RequiredParam {
    /// Create a required parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, location: ParamLocation) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// A required parameter absent from its declared location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingParam {
    /// Parameter name.
    pub name: String,
    /// Where it should have been supplied.
    pub location: ParamLocation,
}

/// Request parameters failed the endpoint's presence checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required parameters: {}", describe_missing(.missing))]
pub struct ValidationError {
    /// Every missing parameter, in declaration order.
    pub missing: Vec<MissingParam>,
}

fn describe_missing(missing: &[MissingParam]) -> String {
    missing
        .iter()
        .map(|param| format!("{} ({})", param.name, param.location))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Method & Auth
// =============================================================================

/// Upstream HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Canonical method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How requests to an upstream API authenticate.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthDescriptor {
    /// No credentials.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// Bearer token.
        token: String,
    },
    /// `<header>: <value>`.
    ApiKeyHeader {
        /// Header name.
        header: String,
        /// Key value.
        value: String,
    },
    /// `?<param>=<value>` appended to the query string.
    ApiKeyQuery {
        /// Query parameter name.
        param: String,
        /// Key value.
        value: String,
    },
    /// `Authorization: Basic <credentials>`, credentials already encoded.
    Basic {
        /// Encoded credentials.
        credentials: String,
    },
}

impl fmt::Debug for AuthDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bearer { .. } => f.debug_struct("Bearer").field("token", &"[REDACTED]").finish(),
            Self::ApiKeyHeader { header, .. } => f
                .debug_struct("ApiKeyHeader")
                .field("header", header)
                .field("value", &"[REDACTED]")
                .finish(),
            Self::ApiKeyQuery { param, .. } => f
                .debug_struct("ApiKeyQuery")
                .field("param", param)
                .field("value", &"[REDACTED]")
                .finish(),
            Self::Basic { .. } => f
                .debug_struct("Basic")
                .field("credentials", &"[REDACTED]")
                .finish(),
        }
    }
}

impl AuthDescriptor {
    fn header(&self) -> Option<(String, String)> {
        match self {
            Self::Bearer { token } => Some(("Authorization".to_string(), format!("Bearer {token}"))),
            Self::ApiKeyHeader { header, value } => Some((header.clone(), value.clone())),
            Self::Basic { credentials } => {
                Some(("Authorization".to_string(), format!("Basic {credentials}")))
            }
            Self::None | Self::ApiKeyQuery { .. } => None,
        }
    }

    fn query_pair(&self) -> Option<(&str, &str)> {
        match self {
            Self::ApiKeyQuery { param, value } => Some((param, value)),
            _ => None,
        }
    }
}

// =============================================================================
// Endpoint Descriptor
// =============================================================================

/// Fully resolved upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Owning API name.
    pub api: String,
    /// Endpoint name within the API.
    pub name: String,
    /// API base URL.
    pub base_url: String,
    /// Path template with `{name}` placeholders.
    pub path: String,
    /// Upstream method.
    pub method: HttpMethod,
    /// Response cache duration; zero disables caching.
    pub cache_duration: Duration,
    /// Static headers (API-level merged with endpoint-level).
    pub headers: Params,
    /// Parameters the caller must supply.
    pub required_params: Vec<RequiredParam>,
    /// API credentials.
    pub auth: AuthDescriptor,
}

impl EndpointDescriptor {
    /// Whether responses from this endpoint are cached.
    #[must_use]
    pub const fn caches_responses(&self) -> bool {
        !self.cache_duration.is_zero()
    }

    /// Names of the `{name}` placeholders in the path template, in order.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        template_placeholders(&self.path)
    }

    /// Check that every required parameter is present at its location.
    pub fn validate(&self, params: &RequestParams) -> Result<(), ValidationError> {
        let missing: Vec<MissingParam> = self
            .required_params
            .iter()
            .filter(|param| params.lookup(&param.name, param.location).is_none())
            .map(|param| MissingParam {
                name: param.name.clone(),
                location: param.location,
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { missing })
        }
    }

    /// Build the outbound URL.
    ///
    /// Placeholders are replaced with URL-escaped path values. Query
    /// parameters follow, then the API key when the API authenticates
    /// through the query string.
    pub fn build_url(&self, params: &RequestParams) -> Result<String, ValidationError> {
        let mut url = self.base_url.trim_end_matches('/').to_string();
        if !self.path.is_empty() && !self.path.starts_with('/') {
            url.push('/');
        }

        let mut missing = Vec::new();
        let mut rest = self.path.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|offset| open + offset) else {
                break;
            };
            url.push_str(&rest[..open]);
            let name = &rest[open + 1..close];
            match params.path.get(name) {
                Some(value) => url.push_str(&urlencoding::encode(value)),
                None => missing.push(MissingParam {
                    name: name.to_string(),
                    location: ParamLocation::Path,
                }),
            }
            rest = &rest[close + 1..];
        }
        url.push_str(rest);

        if !missing.is_empty() {
            return Err(ValidationError { missing });
        }

        let pairs: Vec<String> = params
            .query
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .chain(self.auth.query_pair())
            .map(|(name, value)| {
                format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
            })
            .collect();

        if !pairs.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&pairs.join("&"));
        }

        Ok(url)
    }

    /// Merge outbound headers.
    ///
    /// Sources apply in order: static headers, caller headers, extra
    /// headers, auth header. A later source replaces an earlier header of
    /// the same name, compared case-insensitively.
    #[must_use]
    pub fn build_headers(&self, caller: &Params, extra: Option<&Params>) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::new();
        let sources = self
            .headers
            .iter()
            .chain(caller)
            .chain(extra.into_iter().flatten())
            .map(|(name, value)| (name.clone(), value.clone()))
            .chain(self.auth.header());

        for (name, value) in sources {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
            headers.push((name, value));
        }
        headers
    }
}

/// Placeholder names in a path template.
#[must_use]
pub fn template_placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|offset| open + offset) else {
            break;
        };
        let name = &rest[open + 1..close];
        if !name.is_empty() {
            names.push(name);
        }
        rest = &rest[close + 1..];
    }
    names
}

// =============================================================================
// Tests
// =============================================================================
