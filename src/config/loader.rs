use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AppError, Context, Result};

use super::{
    validator, ArgsTransform, Config, EndpointConfig, FallbackChain, FallbackStep,
    ProviderConfig, RateLimitConfig, ResponseShape,
};

/// Provider definition as loaded from `assets/providers/<slug>.json`.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub provider: ProviderConfig,
    pub fallbacks: Vec<FallbackChain>,
    #[allow(dead_code)]
    pub source: PathBuf,
}

pub fn providers_dir(root: &Path) -> PathBuf {
    root.join("assets").join("providers")
}

/// Load one provider descriptor, expanding `${VAR}` / `${VAR:-default}` placeholders.
pub fn load_provider_descriptor(root: &Path, slug: &str) -> Result<ProviderDescriptor> {
    let json_path = providers_dir(root).join(format!("{slug}.json"));

    let json = fs::read_to_string(&json_path).with_context(|| {
        format!(
            "failed to read provider config JSON at {}",
            json_path.display()
        )
    })?;

    let raw: RawProviderConfig = serde_json::from_str(&json).with_context(|| {
        format!(
            "failed to parse provider config JSON at {}",
            json_path.display()
        )
    })?;

    ensure_provider_id(&raw.id, slug, &json_path)?;

    let descriptor = raw.into_descriptor(json_path)?;
    validator::validate_provider(&descriptor.provider)?;
    Ok(descriptor)
}

/// Discover and load every provider descriptor under `assets/providers`.
pub fn load_provider_descriptors(root: &Path) -> Result<Vec<ProviderDescriptor>> {
    let dir = providers_dir(root);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut descriptors = Vec::new();
    for entry in fs::read_dir(&dir)
        .with_context(|| format!("failed to read provider config directory {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let slug = match path.file_stem().and_then(|stem| stem.to_str()) {
            Some(slug) => slug.to_string(),
            None => continue,
        };
        descriptors.push(load_provider_descriptor(root, &slug)?);
    }

    descriptors.sort_by(|a, b| a.provider.id.cmp(&b.provider.id));
    Ok(descriptors)
}

/// Assemble a full [`Config`] from the descriptors on disk; cache and queue settings keep their defaults.
pub fn load_config(root: &Path) -> Result<Config> {
    let descriptors = load_provider_descriptors(root)?;
    if descriptors.is_empty() {
        return Err(AppError::configuration(format!(
            "no provider descriptors found under {}",
            providers_dir(root).display()
        )));
    }

    let mut config = Config::default();
    for descriptor in descriptors {
        config.fallbacks.extend(descriptor.fallbacks);
        config
            .providers
            .insert(descriptor.provider.id.clone(), descriptor.provider);
    }

    validator::validate_config(&config)?;
    Ok(config)
}

/// Expand `${NAME}` and `${NAME:-default}` placeholders from the process environment.
/// Unset variables without a default expand to an empty string.
pub fn expand_env_placeholders(value: &str) -> Result<String> {
    expand_with(value, |name| std::env::var(name).ok())
}

fn expand_with<F>(value: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut body = String::new();
            let mut closed = false;
            while let Some(&next) = chars.peek() {
                chars.next();
                if next == '}' {
                    closed = true;
                    break;
                }
                body.push(next);
            }

            if !closed {
                return Err(AppError::configuration(
                    "Unterminated environment placeholder in provider config",
                ));
            }

            let (name, default) = match body.split_once(":-") {
                Some((name, default)) => (name.trim(), Some(default)),
                None => (body.trim(), None),
            };

            if name.is_empty() {
                return Err(AppError::configuration(
                    "Encountered empty environment placeholder in provider config",
                ));
            }

            match lookup(name).filter(|value| !value.is_empty()) {
                Some(value) => result.push_str(&value),
                None => result.push_str(default.unwrap_or_default()),
            }
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

fn ensure_provider_id(actual: &str, expected_slug: &str, source: &Path) -> Result<()> {
    let normalised_actual = normalise_id(actual);
    let normalised_expected = normalise_id(expected_slug);
    if normalised_actual == normalised_expected {
        Ok(())
    } else {
        Err(AppError::configuration(format!(
            "provider id mismatch in {}: expected `{}`, found `{}`",
            source.display(),
            expected_slug,
            actual
        )))
    }
}

fn normalise_id(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawProviderConfig {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    base_url: String,
    #[serde(default)]
    api_key: Option<String>,
    api_key_param: String,
    #[serde(default)]
    relay: bool,
    rate_limit: RateLimitConfig,
    endpoints: BTreeMap<String, RawEndpointConfig>,
    #[serde(default)]
    fallbacks: HashMap<String, Vec<RawFallbackStep>>,
}

impl RawProviderConfig {
    fn into_descriptor(self, source: PathBuf) -> Result<ProviderDescriptor> {
        let base_url = expand_env_placeholders(&self.base_url)?;
        let api_key = match self.api_key {
            Some(template) => {
                let expanded = expand_env_placeholders(&template)?;
                Some(expanded).filter(|key| !key.trim().is_empty())
            }
            None => None,
        };

        let endpoints = self
            .endpoints
            .into_iter()
            .map(|(key, raw)| (key, raw.into_endpoint()))
            .collect();

        let mut fallbacks: Vec<FallbackChain> = self
            .fallbacks
            .into_iter()
            .map(|(endpoint, steps)| FallbackChain {
                provider: self.id.clone(),
                endpoint,
                steps: steps.into_iter().map(RawFallbackStep::into_step).collect(),
            })
            .collect();
        fallbacks.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));

        Ok(ProviderDescriptor {
            provider: ProviderConfig {
                id: self.id,
                name: self.name,
                description: self.description,
                base_url,
                api_key,
                api_key_param: self.api_key_param,
                relay: self.relay,
                rate_limit: self.rate_limit,
                endpoints,
            },
            fallbacks,
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    static_params: BTreeMap<String, String>,
    #[serde(default)]
    required_fields: Vec<String>,
    #[serde(default)]
    optional_fields: Vec<String>,
    #[serde(default)]
    default_params: Map<String, Value>,
    #[serde(default)]
    allowed_values: BTreeMap<String, Vec<String>>,
    shape: ResponseShape,
}

impl RawEndpointConfig {
    fn into_endpoint(self) -> EndpointConfig {
        EndpointConfig {
            name: self.name,
            description: self.description,
            path: self.path.filter(|path| !path.trim().is_empty()),
            static_params: self.static_params,
            required_fields: self.required_fields,
            optional_fields: self.optional_fields,
            default_params: self.default_params,
            allowed_values: self.allowed_values,
            shape: self.shape,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFallbackStep {
    provider: String,
    endpoint: String,
    #[serde(default = "keep_args")]
    args: ArgsTransform,
}

fn keep_args() -> ArgsTransform {
    ArgsTransform::Keep
}

impl RawFallbackStep {
    fn into_step(self) -> FallbackStep {
        FallbackStep {
            provider: self.provider,
            endpoint: self.endpoint,
            args_transform: self.args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_root() -> &'static Path {
        Path::new(env!("CARGO_MANIFEST_DIR"))
    }

    #[test]
    fn loads_shipped_descriptors() {
        let descriptors = load_provider_descriptors(manifest_root()).expect("descriptors load");
        let ids: Vec<&str> = descriptors
            .iter()
            .map(|descriptor| descriptor.provider.id.as_str())
            .collect();
        assert_eq!(ids, vec!["alphaVantage", "finnhub", "indianAPI"]);
    }

    #[test]
    fn shipped_config_matches_builtin_shape() {
        let loaded = load_config(manifest_root()).expect("config loads");
        let builtin = Config::builtin();

        for (id, provider) in &builtin.providers {
            let other = loaded.provider(id).expect("provider present on disk");
            assert_eq!(other.rate_limit, provider.rate_limit, "rate limit for {id}");
            assert_eq!(
                other.endpoints.keys().collect::<Vec<_>>(),
                provider.endpoints.keys().collect::<Vec<_>>(),
                "endpoints for {id}"
            );
        }

        assert_eq!(
            loaded.fallback_chain("indianAPI", "quote"),
            builtin.fallback_chain("indianAPI", "quote")
        );
    }

    #[test]
    fn expands_placeholders_with_defaults() {
        let lookup = |name: &str| match name {
            "SET" => Some("value".to_string()),
            _ => None,
        };

        assert_eq!(expand_with("a-${SET}-b", lookup).unwrap(), "a-value-b");
        assert_eq!(
            expand_with("${MISSING:-https://example.test}", lookup).unwrap(),
            "https://example.test"
        );
        assert_eq!(expand_with("${MISSING}", lookup).unwrap(), "");
        assert!(expand_with("${UNCLOSED", lookup).is_err());
        assert!(expand_with("${}", lookup).is_err());
    }

    #[test]
    fn rejects_mismatched_id() {
        let err = ensure_provider_id("finnhub", "alpha_vantage", Path::new("alpha_vantage.json"))
            .expect_err("mismatch");
        assert!(err.to_string().contains("provider id mismatch"));
        ensure_provider_id("alphaVantage", "alpha_vantage", Path::new("x")).expect("same id");
    }
}
