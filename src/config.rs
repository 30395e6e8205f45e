//! Billing configuration.
//!
//! Holds the platform-level settings the payment flows need: redirect URLs,
//! the base settlement currency, and the grace window applied on payment
//! failure. Gateway credentials and HTTP tuning live with the gateway client
//! in [`crate::gateway::paydunya`].

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PaymentError;

/// Configuration for the payment flows.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    /// Currency module prices are stored in and the gateway settles in.
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    /// Days of continued access granted after a failed renewal payment.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
    /// Where the provider posts asynchronous payment notifications.
    pub callback_url: String,
    /// Where the buyer lands after a completed checkout.
    pub return_url: String,
    /// Where the buyer lands after abandoning checkout.
    pub cancel_url: String,
    /// Allowed domains for the three URLs above (empty = any HTTPS URL).
    /// This prevents open redirect vulnerabilities.
    #[serde(default)]
    pub allowed_redirect_domains: Vec<String>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
            grace_period_days: default_grace_period_days(),
            callback_url: String::new(),
            return_url: String::new(),
            cancel_url: String::new(),
            allowed_redirect_domains: Vec::new(),
        }
    }
}

fn default_base_currency() -> String {
    "XOF".to_string()
}

fn default_grace_period_days() -> i64 {
    3
}

impl BillingConfig {
    /// Create a builder for the config.
    pub fn builder() -> BillingConfigBuilder {
        BillingConfigBuilder::new()
    }

    /// Validate a redirect URL against the allowed domains.
    ///
    /// Returns an error if:
    /// - The URL is not valid
    /// - The URL is not HTTPS
    /// - The URL's domain is not in the allowed list (if list is non-empty)
    pub fn validate_redirect_url(&self, url: &str) -> crate::error::Result<()> {
        let parsed = Url::parse(url).map_err(|e| PaymentError::InvalidRedirectUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if parsed.scheme() != "https" {
            return Err(PaymentError::InvalidRedirectUrl {
                url: url.to_string(),
                reason: "must use HTTPS".to_string(),
            }
            .into());
        }

        if !self.allowed_redirect_domains.is_empty() {
            let host = parsed.host_str().ok_or_else(|| PaymentError::InvalidRedirectUrl {
                url: url.to_string(),
                reason: "must have a host".to_string(),
            })?;

            let domain_allowed = self.allowed_redirect_domains.iter().any(|allowed| {
                // Exact match or subdomain match
                host == allowed || host.ends_with(&format!(".{}", allowed))
            });

            if !domain_allowed {
                return Err(PaymentError::RedirectDomainNotAllowed {
                    domain: host.to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Builder for [`BillingConfig`].
#[must_use = "builder does nothing until you call build()"]
pub struct BillingConfigBuilder {
    config: BillingConfig,
}

impl BillingConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BillingConfig::default(),
        }
    }

    pub fn with_base_currency(mut self, currency: impl Into<String>) -> Self {
        self.config.base_currency = currency.into();
        self
    }

    pub fn with_grace_period_days(mut self, days: i64) -> Self {
        self.config.grace_period_days = days;
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.config.callback_url = url.into();
        self
    }

    pub fn with_return_url(mut self, url: impl Into<String>) -> Self {
        self.config.return_url = url.into();
        self
    }

    pub fn with_cancel_url(mut self, url: impl Into<String>) -> Self {
        self.config.cancel_url = url.into();
        self
    }

    /// Set allowed redirect domains.
    ///
    /// Only URLs matching these domains pass validation. If empty, any
    /// HTTPS URL is allowed (not recommended for production).
    pub fn allowed_redirect_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_redirect_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single allowed redirect domain.
    pub fn add_allowed_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.allowed_redirect_domains.push(domain.into());
        self
    }

    /// Validate and return the configuration.
    ///
    /// All three URLs must be present and pass redirect validation.
    pub fn build(self) -> crate::error::Result<BillingConfig> {
        for (name, url) in [
            ("callback_url", &self.config.callback_url),
            ("return_url", &self.config.return_url),
            ("cancel_url", &self.config.cancel_url),
        ] {
            if url.is_empty() {
                return Err(crate::error::TollgateError::BadRequest(format!(
                    "billing config is missing {}",
                    name
                )));
            }
            self.config.validate_redirect_url(url)?;
        }

        Ok(self.config)
    }
}

impl Default for BillingConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
