//! HTTP request DTOs and parameter mapping.

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde::Deserialize;

use crate::domain::endpoint::{EndpointDescriptor, ParamLocation, Params, RequestParams};

/// Body of `POST /api/{api}/{endpoint}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    /// Values for path template placeholders.
    #[serde(default)]
    pub path_params: Params,
    /// Query string parameters.
    #[serde(default)]
    pub query_params: Params,
    /// Caller headers forwarded upstream.
    #[serde(default)]
    pub headers: Params,
    /// Headers applied after caller headers.
    #[serde(default)]
    pub extra_headers: Option<Params>,
}

impl ProxyRequest {
    /// Split into executor parameters and extra headers.
    #[must_use]
    pub fn into_parts(self) -> (RequestParams, Option<Params>) {
        let params = RequestParams {
            path: self.path_params,
            query: self.query_params,
            headers: self.headers,
        };
        (params, self.extra_headers)
    }
}

/// Query of `GET /history/{subject}`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HistoryQuery {
    /// Inclusive lower bound, epoch milliseconds.
    pub start: Option<i64>,
    /// Inclusive upper bound, epoch milliseconds.
    pub end: Option<i64>,
}

/// Map a flat query string onto `descriptor`'s parameters.
///
/// Names matching a path placeholder become path parameters, everything
/// else stays in the query. Request headers named by required header
/// parameters are forwarded.
#[must_use]
pub fn params_from_query(
    descriptor: &EndpointDescriptor,
    query: HashMap<String, String>,
    headers: &HeaderMap,
) -> RequestParams {
    let placeholders = descriptor.placeholders();
    let mut params = RequestParams::new();

    for (name, value) in query {
        if placeholders.contains(&name.as_str()) {
            params.path.insert(name, value);
        } else {
            params.query.insert(name, value);
        }
    }

    for required in &descriptor.required_params {
        if required.location != ParamLocation::Header {
            continue;
        }
        if let Some(value) = headers
            .get(required.name.as_str())
            .and_then(|v| v.to_str().ok())
        {
            params.headers.insert(required.name.clone(), value.to_string());
        }
    }

    params
}
