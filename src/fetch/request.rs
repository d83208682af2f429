use std::collections::HashMap;
use std::fmt;

use log::debug;
use serde_json::{Map, Value};

use crate::config::{EndpointConfig, ProviderConfig};
use crate::error::{AppError, Result};

use super::decode::value_to_string;

/// Fully resolved upstream call. The API key travels in `params` and is redacted from `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub provider: String,
    pub endpoint: String,
    pub base_url: String,
    pub path: Option<String>,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub api_key_param: String,
    pub via_relay: bool,
}

impl PreparedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn symbol(&self) -> Option<&str> {
        self.param("symbol")
    }

    /// Parameters with the API key replaced, safe to log.
    pub fn redacted_params(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(key, value)| {
                if *key == self.api_key_param {
                    (key.clone(), "<redacted>".to_string())
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect()
    }
}

impl fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("url", &self.url)
            .field("params", &self.redacted_params())
            .field("via_relay", &self.via_relay)
            .finish()
    }
}

/// Turn caller arguments into named fields.
///
/// Objects are taken as-is. Arrays and scalars are assigned positionally to the
/// endpoint's required fields, then its optional ones.
pub fn resolve_args(
    provider: &str,
    endpoint_name: &str,
    endpoint: &EndpointConfig,
    args: &Value,
) -> Result<Map<String, Value>> {
    let positional: Vec<Value> = match args {
        Value::Object(map) => return Ok(map.clone()),
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        scalar => vec![scalar.clone()],
    };

    let fields: Vec<&String> = endpoint.positional_fields().collect();
    if positional.len() > fields.len() {
        return Err(AppError::configuration(format!(
            "{provider}/{endpoint_name} accepts at most {} arguments, got {}",
            fields.len(),
            positional.len()
        )));
    }

    Ok(fields
        .into_iter()
        .zip(positional)
        .map(|(field, value)| (field.clone(), value))
        .collect())
}

/// Merge endpoint defaults under the caller's named args and check required fields.
///
/// An explicit `null` from the caller suppresses the default for that field.
pub fn merge_defaults(
    provider: &str,
    endpoint_name: &str,
    endpoint: &EndpointConfig,
    named: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut merged = endpoint.default_params.clone();
    for (key, value) in named {
        merged.insert(key.clone(), value.clone());
    }

    let missing: Vec<&str> = endpoint
        .required_fields
        .iter()
        .filter(|field| merged.get(*field).and_then(value_to_string).is_none())
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(merged)
    } else {
        Err(AppError::configuration(format!(
            "{provider}/{endpoint_name} is missing required fields: {}",
            missing.join(", ")
        )))
    }
}

pub fn prepare_request(
    provider: &ProviderConfig,
    endpoint_name: &str,
    endpoint: &EndpointConfig,
    args: &Map<String, Value>,
) -> Result<PreparedRequest> {
    let api_key = provider
        .api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            AppError::configuration(format!("API key for {} is not configured", provider.name))
        })?;

    let mut values: HashMap<String, String> = HashMap::new();
    for field in endpoint.positional_fields() {
        let Some(value) = args.get(field).and_then(value_to_string) else {
            continue;
        };
        if let Some(allowed) = endpoint.allowed_values.get(field) {
            if !allowed.iter().any(|candidate| *candidate == value) {
                debug!("Dropping {field}={value} for {}/{endpoint_name}", provider.id);
                continue;
            }
        }
        values.insert(field.clone(), value);
    }

    for key in args.keys() {
        if !endpoint.declares(key) {
            debug!("Ignoring undeclared argument {key} for {}/{endpoint_name}", provider.id);
        }
    }

    let base_url = provider.base_url.trim_end_matches('/').to_string();
    let (path, consumed) = match &endpoint.path {
        Some(template) => {
            let (rendered, consumed) = render_template(template, &values)?;
            (Some(rendered), consumed)
        }
        None => (None, Vec::new()),
    };
    let url = match &path {
        Some(path) => format!("{base_url}/{}", path.trim_start_matches('/')),
        None => base_url.clone(),
    };

    let mut params: Vec<(String, String)> = endpoint
        .static_params
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for field in endpoint.positional_fields() {
        if consumed.contains(field) {
            continue;
        }
        if let Some(value) = values.remove(field) {
            params.push((field.clone(), value));
        }
    }
    params.push((provider.api_key_param.clone(), api_key.to_string()));

    Ok(PreparedRequest {
        provider: provider.id.clone(),
        endpoint: endpoint_name.to_string(),
        base_url,
        path,
        url,
        params,
        api_key_param: provider.api_key_param.clone(),
        via_relay: provider.relay,
    })
}

/// Substitute `{field}` placeholders, returning the rendered text and the fields it used.
fn render_template(
    template: &str,
    replacements: &HashMap<String, String>,
) -> Result<(String, Vec<String>)> {
    let mut result = String::with_capacity(template.len());
    let mut consumed = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '{' {
            let mut key = String::new();
            let mut closed = false;
            while let Some(&next) = chars.peek() {
                chars.next();
                if next == '}' {
                    closed = true;
                    break;
                }
                key.push(next);
            }

            if !closed {
                return Err(AppError::configuration(format!(
                    "Unterminated placeholder in path template: {{{key}"
                )));
            }

            if key.is_empty() {
                return Err(AppError::configuration(
                    "Encountered empty placeholder `{}` in path template",
                ));
            }

            let value = replacements.get(&key).ok_or_else(|| {
                AppError::configuration(format!(
                    "No value provided for placeholder `{key}` in path template"
                ))
            })?;
            result.push_str(value);
            consumed.push(key);
        } else {
            result.push(ch);
        }
    }

    Ok((result, consumed))
}
