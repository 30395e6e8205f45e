//! Payment provider directory.
//!
//! Providers are configured at startup and looked up by name during
//! initiation. A provider is either a redirect rail (buyer is sent to a
//! hosted checkout page, settlement arrives later over the webhook) or an
//! immediate rail (settles synchronously, used by test providers).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How a provider settles a payment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFlow {
    /// Buyer is redirected to a hosted checkout URL; confirmation arrives
    /// asynchronously via webhook.
    #[default]
    Redirect,
    /// Settles during the initiation call, no redirect. Test rails.
    Immediate,
}

impl ProviderFlow {
    /// Get the string representation of the flow.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::Immediate => "immediate",
        }
    }
}

/// Error returned when parsing a flow string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFlowError {
    invalid_value: String,
}

impl fmt::Display for ParseFlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid provider flow: '{}' (expected: redirect or immediate)",
            self.invalid_value
        )
    }
}

impl std::error::Error for ParseFlowError {}

impl FromStr for ProviderFlow {
    type Err = ParseFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redirect" => Ok(Self::Redirect),
            "immediate" => Ok(Self::Immediate),
            _ => Err(ParseFlowError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ProviderFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for a single payment provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier (e.g., "paydunya").
    pub name: String,
    /// Fee charged by the provider, as a percentage of the gross amount.
    pub fee_percentage: Decimal,
    /// Settlement flow for this provider.
    pub flow: ProviderFlow,
    /// Inactive providers are invisible to initiation.
    pub active: bool,
}

/// A collection of provider configurations, looked up by name.
#[derive(Clone, Debug, Default)]
pub struct ProviderDirectory {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderDirectory {
    /// Create a new empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a directory.
    #[must_use]
    pub fn builder() -> ProviderDirectoryBuilder {
        ProviderDirectoryBuilder::new()
    }

    /// Create a directory from externally loaded entries.
    #[must_use]
    pub fn from_entries(entries: Vec<ProviderConfig>) -> Self {
        let providers = entries
            .into_iter()
            .map(|config| (config.name.to_lowercase(), config))
            .collect();
        Self { providers }
    }

    /// Get a provider by name, active or not.
    ///
    /// Names are case-insensitive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(&name.to_lowercase())
    }

    /// Get a provider by name, only if it is active.
    #[must_use]
    pub fn active(&self, name: &str) -> Option<&ProviderConfig> {
        self.get(name).filter(|p| p.active)
    }

    /// Check if a provider exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(&name.to_lowercase())
    }

    /// Get the number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Iterate over all providers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProviderConfig)> {
        self.providers.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Builder for constructing a provider directory.
#[derive(Debug, Default)]
pub struct ProviderDirectoryBuilder {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderDirectoryBuilder {
    /// Create a new directory builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start defining a new provider.
    #[must_use]
    pub fn provider(self, name: &str) -> ProviderBuilder {
        ProviderBuilder {
            parent: self,
            name: name.to_string(),
            fee_percentage: Decimal::ZERO,
            flow: None,
            active: true,
        }
    }

    /// Build the directory.
    #[must_use]
    pub fn build(self) -> ProviderDirectory {
        ProviderDirectory {
            providers: self.providers,
        }
    }

    fn add_provider(mut self, config: ProviderConfig) -> Self {
        self.providers.insert(config.name.to_lowercase(), config);
        self
    }
}

/// Builder for a single provider configuration.
#[derive(Debug)]
pub struct ProviderBuilder {
    parent: ProviderDirectoryBuilder,
    name: String,
    fee_percentage: Decimal,
    flow: Option<ProviderFlow>,
    active: bool,
}

impl ProviderBuilder {
    /// Set the provider fee as a percentage of the gross amount.
    #[must_use]
    pub fn fee_percentage(mut self, pct: Decimal) -> Self {
        self.fee_percentage = pct;
        self
    }

    /// Set the settlement flow.
    #[must_use]
    pub fn flow(mut self, flow: ProviderFlow) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Mark the provider active or inactive.
    #[must_use]
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Finish defining this provider and return to the parent builder.
    ///
    /// # Panics
    ///
    /// Panics if `flow` was not set.
    #[must_use]
    pub fn done(self) -> ProviderDirectoryBuilder {
        let config = ProviderConfig {
            name: self.name,
            fee_percentage: self.fee_percentage,
            flow: self.flow.expect("flow is required for a provider"),
            active: self.active,
        };
        self.parent.add_provider(config)
    }
}
