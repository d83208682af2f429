use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::Result;

use super::models::NormalizedData;
use super::normalize::normalize;
use super::request::{merge_defaults, prepare_request, resolve_args, PreparedRequest};

/// Pure translation between (provider, endpoint, args) and the wire, driven by configuration.
#[derive(Clone, Copy)]
pub struct ProviderGateway<'a> {
    config: &'a Config,
}

impl<'a> ProviderGateway<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Named arguments for `args`, which may be an object, a positional array or a single value.
    pub fn resolve_args(&self, provider: &str, endpoint: &str, args: &Value) -> Result<Map<String, Value>> {
        let (_, endpoint_config) = self.config.endpoint(provider, endpoint)?;
        resolve_args(provider, endpoint, endpoint_config, args)
    }

    pub fn build_request(&self, provider: &str, endpoint: &str, args: &Value) -> Result<PreparedRequest> {
        let named = self.resolve_args(provider, endpoint, args)?;
        self.build_from_named(provider, endpoint, &named)
    }

    /// Arguments as they reach the wire: endpoint defaults merged in, suppressed fields dropped.
    pub fn effective_args(
        &self,
        provider: &str,
        endpoint: &str,
        named: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let (_, endpoint_config) = self.config.endpoint(provider, endpoint)?;
        let mut merged = merge_defaults(provider, endpoint, endpoint_config, named)?;
        merged.retain(|_, value| !value.is_null());
        Ok(merged)
    }

    pub fn build_from_named(
        &self,
        provider: &str,
        endpoint: &str,
        named: &Map<String, Value>,
    ) -> Result<PreparedRequest> {
        let (provider_config, endpoint_config) = self.config.endpoint(provider, endpoint)?;
        let merged = merge_defaults(provider, endpoint, endpoint_config, named)?;
        prepare_request(provider_config, endpoint, endpoint_config, &merged)
    }

    pub fn normalize(
        &self,
        provider: &str,
        endpoint: &str,
        raw: &Value,
        symbol_hint: Option<&str>,
    ) -> Result<Option<NormalizedData>> {
        let (_, endpoint_config) = self.config.endpoint(provider, endpoint)?;
        Ok(normalize(endpoint_config.shape, raw, symbol_hint))
    }
}
