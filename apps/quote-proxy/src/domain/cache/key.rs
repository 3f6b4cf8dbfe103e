//! Request fingerprints.

use serde_json::{Map, Value};

/// Separator between fingerprint components.
pub const KEY_SEPARATOR: char = ':';

/// Build the cache key for a proxied request.
///
/// Layout: `<namespace>:<endpoint>:<path params>:<query params>`, where each
/// parameter map is serialized as a JSON object with sorted keys. Map order
/// never affects the key, and JSON string escaping keeps distinct parameter
/// sets from colliding.
#[must_use]
pub fn generate_key<'a, P, Q>(
    namespace: &str,
    endpoint: &str,
    path_params: P,
    query_params: Q,
) -> String
where
    P: IntoIterator<Item = (&'a String, &'a String)>,
    Q: IntoIterator<Item = (&'a String, &'a String)>,
{
    format!(
        "{namespace}{KEY_SEPARATOR}{endpoint}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
        serialize_params(path_params),
        serialize_params(query_params),
    )
}

fn serialize_params<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let object: Map<String, Value> = params
        .into_iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    Value::Object(object).to_string()
}
