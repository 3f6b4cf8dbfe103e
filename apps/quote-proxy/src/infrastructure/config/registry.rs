//! Upstream API Registry
//!
//! Loads the `apis` document and resolves `api`/`endpoint` pairs into
//! [`EndpointDescriptor`]s for the proxy executor.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::application::ports::ConfigProviderPort;
use crate::domain::endpoint::{
    AuthDescriptor, EndpointDescriptor, HttpMethod, ParamLocation, Params, RequiredParam,
    template_placeholders,
};

/// One upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Scheme and host, optionally with a path prefix.
    pub base_url: String,
    /// Credentials applied to every endpoint.
    #[serde(default)]
    pub auth: AuthDescriptor,
    /// Headers sent to every endpoint.
    #[serde(default)]
    pub headers: Params,
    /// Endpoints by name.
    #[serde(default)]
    pub endpoints: IndexMap<String, EndpointConfig>,
}

/// One endpoint of an upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Path template with `{placeholder}` segments.
    pub path: String,
    /// HTTP method.
    #[serde(default)]
    pub method: HttpMethod,
    /// Response cache lifetime in milliseconds (0 = not cached).
    #[serde(default)]
    pub cache_duration_ms: u64,
    /// Endpoint headers, overriding API headers of the same name.
    #[serde(default)]
    pub headers: Params,
    /// Parameters that must be supplied by the caller.
    #[serde(default)]
    pub required_params: Vec<RequiredParam>,
}

/// All configured upstream APIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRegistry {
    /// APIs by name, in file order.
    #[serde(default)]
    pub apis: IndexMap<String, ApiConfig>,
}

impl ApiRegistry {
    /// Load the registry from a YAML (or JSON) file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read, a referenced
    /// environment variable is missing, or the document is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Load the registry from a YAML string, interpolating the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if interpolation, parsing or validation fails.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_str_with(yaml, |name| std::env::var(name).ok())
    }

    /// Load the registry from a YAML string with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if interpolation, parsing or validation fails.
    pub fn from_yaml_str_with<F>(yaml: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let interpolated = interpolate_with(yaml, lookup)?;
        let registry: Self = serde_yaml_bw::from_str(&interpolated)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Check base URLs and path placeholders.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first offending
    /// api or endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (api_name, api) in &self.apis {
            if api.base_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "api '{api_name}' has an empty base_url"
                )));
            }

            for (endpoint_name, endpoint) in &api.endpoints {
                for placeholder in template_placeholders(&endpoint.path) {
                    let declared = endpoint.required_params.iter().any(|param| {
                        param.name == placeholder && param.location == ParamLocation::Path
                    });
                    if !declared {
                        return Err(ConfigError::ValidationError(format!(
                            "{api_name}/{endpoint_name}: placeholder '{{{placeholder}}}' \
                             is not a required path parameter"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Configured API names, in file order.
    #[must_use]
    pub fn api_names(&self) -> Vec<&str> {
        self.apis.keys().map(String::as_str).collect()
    }

    fn endpoint(&self, api: &str, endpoint: &str) -> Option<(&ApiConfig, &EndpointConfig)> {
        let api_config = self.apis.get(api)?;
        let endpoint_config = api_config.endpoints.get(endpoint)?;
        Some((api_config, endpoint_config))
    }
}

impl ConfigProviderPort for ApiRegistry {
    fn resolve(&self, api: &str, endpoint: &str) -> Option<EndpointDescriptor> {
        let (api_config, endpoint_config) = self.endpoint(api, endpoint)?;

        let mut headers = api_config.headers.clone();
        for (name, value) in &endpoint_config.headers {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value.clone());
        }

        Some(EndpointDescriptor {
            api: api.to_string(),
            name: endpoint.to_string(),
            base_url: api_config.base_url.clone(),
            path: endpoint_config.path.clone(),
            method: endpoint_config.method,
            cache_duration: Duration::from_millis(endpoint_config.cache_duration_ms),
            headers,
            required_params: endpoint_config.required_params.clone(),
            auth: api_config.auth.clone(),
        })
    }

    fn has_api(&self, api: &str) -> bool {
        self.apis.contains_key(api)
    }

    fn has_endpoint(&self, api: &str, endpoint: &str) -> bool {
        self.endpoint(api, endpoint).is_some()
    }
}

/// Interpolate `${VAR}` and `${VAR:-default}` from the process environment.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` for an unset `${VAR}` without default.
pub fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate `${VAR}` and `${VAR:-default}` using `lookup`.
///
/// An empty value counts as unset. `${VAR:-}` yields an empty string.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` for an unset `${VAR}` without default.
#[allow(clippy::expect_used)] // Regex is compile-time constant
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    static ENV_VAR_REGEX: OnceLock<Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    let mut result = String::with_capacity(input.len());
    let mut last = 0;

    for cap in re.captures_iter(input) {
        let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_match.as_str();

        let value = match lookup(var_name).filter(|v| !v.is_empty()) {
            Some(v) => v,
            None => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => return Err(ConfigError::MissingEnvVar(var_name.to_string())),
            },
        };

        result.push_str(&input[last..full_match.start()]);
        result.push_str(&value);
        last = full_match.end();
    }

    result.push_str(&input[last..]);
    Ok(result)
}
