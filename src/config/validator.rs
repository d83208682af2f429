use crate::error::{AppError, Result};

use super::{Config, EndpointConfig, ProviderConfig, MAX_FALLBACK_DEPTH};

/// Validate a single provider definition and surface descriptive errors.
pub fn validate_provider(provider: &ProviderConfig) -> Result<()> {
    let mut issues = Vec::new();

    validate_connection(provider, &mut issues);
    validate_rate_limit(provider, &mut issues);
    validate_endpoints(provider, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::configuration(format!(
            "provider `{}` config invalid:\n  - {}",
            provider.id,
            issues.join("\n  - ")
        )))
    }
}

/// Validate every provider plus the cross-provider fallback chains.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut issues = Vec::new();

    for provider in config.providers.values() {
        if let Err(err) = validate_provider(provider) {
            issues.push(err.to_string());
        }
    }

    for chain in &config.fallbacks {
        if config.endpoint(&chain.provider, &chain.endpoint).is_err() {
            issues.push(format!(
                "fallback chain declared for unknown endpoint {}/{}",
                chain.provider, chain.endpoint
            ));
        }

        if chain.steps.len() > MAX_FALLBACK_DEPTH {
            issues.push(format!(
                "fallback chain for {}/{} has {} steps, at most {} are evaluated",
                chain.provider,
                chain.endpoint,
                chain.steps.len(),
                MAX_FALLBACK_DEPTH
            ));
        }

        for step in &chain.steps {
            if config.endpoint(&step.provider, &step.endpoint).is_err() {
                issues.push(format!(
                    "fallback step {}/{} (from {}/{}) references an unknown endpoint",
                    step.provider, step.endpoint, chain.provider, chain.endpoint
                ));
            }
        }
    }

    if config.cache.max_entries == 0 {
        issues.push("cache.max_entries must be at least 1".to_string());
    }

    if config.cache.min_ttl_ms > config.cache.max_ttl_ms {
        issues.push(format!(
            "cache TTL bounds inverted: min {} > max {}",
            config.cache.min_ttl_ms, config.cache.max_ttl_ms
        ));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::configuration(format!(
            "invalid provider configuration:\n{}",
            issues
                .into_iter()
                .map(|issue| format!("  - {issue}"))
                .collect::<Vec<_>>()
                .join("\n")
        )))
    }
}

fn validate_connection(provider: &ProviderConfig, issues: &mut Vec<String>) {
    let base_url = provider.base_url.trim();
    if base_url.is_empty() {
        issues.push("base_url must not be empty".to_string());
    } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        issues.push(format!("base_url `{base_url}` must be an http(s) URL"));
    }

    if provider.api_key_param.trim().is_empty() {
        issues.push("api_key_param must not be empty".to_string());
    }
}

fn validate_rate_limit(provider: &ProviderConfig, issues: &mut Vec<String>) {
    if provider.rate_limit.requests == 0 {
        issues.push("rate_limit.requests must be at least 1".to_string());
    }
    if provider.rate_limit.window_ms == 0 {
        issues.push("rate_limit.window_ms must be positive".to_string());
    }
}

fn validate_endpoints(provider: &ProviderConfig, issues: &mut Vec<String>) {
    if provider.endpoints.is_empty() {
        issues.push("at least one endpoint must be declared".to_string());
        return;
    }

    for (name, endpoint) in &provider.endpoints {
        validate_endpoint(name, endpoint, issues);
    }
}

fn validate_endpoint(name: &str, endpoint: &EndpointConfig, issues: &mut Vec<String>) {
    for field in &endpoint.required_fields {
        if endpoint.optional_fields.contains(field) {
            issues.push(format!(
                "endpoint `{name}` lists `{field}` as both required and optional"
            ));
        }
    }

    for key in endpoint.default_params.keys() {
        if !endpoint.declares(key) {
            issues.push(format!(
                "endpoint `{name}` has a default for undeclared field `{key}`"
            ));
        }
    }

    for (key, values) in &endpoint.allowed_values {
        if !endpoint.declares(key) {
            issues.push(format!(
                "endpoint `{name}` restricts undeclared field `{key}`"
            ));
        }
        if values.is_empty() {
            issues.push(format!(
                "endpoint `{name}` allowed_values for `{key}` must not be empty"
            ));
        }
    }

    if let Some(path) = &endpoint.path {
        if path.starts_with('/') {
            issues.push(format!(
                "endpoint `{name}` path `{path}` must be relative to the base URL"
            ));
        }
    }
}
