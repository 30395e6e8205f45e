//! Module catalog and currency rate table.
//!
//! Both are read-only maps built once at startup and injected wherever
//! pricing happens, so catalogs can differ per environment or tenant without
//! code changes.
//!
//! ```rust,ignore
//! use rust_decimal::Decimal;
//! use tollgate::{ModuleCatalog, FxTable};
//!
//! let catalog = ModuleCatalog::builder()
//!     .module("stock_auto")
//!         .base_price(Decimal::from(5000))
//!         .display_name("Stock automation")
//!         .done()
//!     .module("loyalty")
//!         .base_price(Decimal::from(6000))
//!         .done()
//!     .build();
//!
//! let fx = FxTable::builder()
//!     .rate("XOF", Decimal::ONE)
//!     .build();
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A collection of sellable module configurations.
#[derive(Clone, Debug, Default)]
pub struct ModuleCatalog {
    modules: HashMap<String, ModuleConfig>,
}

impl ModuleCatalog {
    /// Create a new empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a catalog.
    #[must_use]
    pub fn builder() -> ModuleCatalogBuilder {
        ModuleCatalogBuilder::new()
    }

    /// Create a catalog from externally loaded entries.
    ///
    /// Lets hosts manage the catalog in a database or config file and hand
    /// it over at startup.
    #[must_use]
    pub fn from_entries(entries: Vec<ModuleConfig>) -> Self {
        let modules = entries
            .into_iter()
            .map(|config| (config.id.clone(), config))
            .collect();
        Self { modules }
    }

    /// Get a module by id.
    #[must_use]
    pub fn get(&self, module_id: &str) -> Option<&ModuleConfig> {
        self.modules.get(module_id)
    }

    /// Get a module's base-currency price, if it is known.
    #[must_use]
    pub fn price_of(&self, module_id: &str) -> Option<Decimal> {
        self.modules.get(module_id).map(|m| m.base_price)
    }

    /// Check if a module exists.
    #[must_use]
    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    /// Get the number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Iterate over all modules.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModuleConfig)> {
        self.modules.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Configuration for a single sellable module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module identifier (e.g., "stock_auto", "loyalty").
    pub id: String,
    /// Monthly price in the platform base currency.
    pub base_price: Decimal,
    /// Display name shown on invoices and checkout pages.
    pub display_name: Option<String>,
}

impl ModuleConfig {
    /// Name suitable for display, falling back to the id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Builder for constructing a module catalog.
#[derive(Debug, Default)]
pub struct ModuleCatalogBuilder {
    modules: HashMap<String, ModuleConfig>,
}

impl ModuleCatalogBuilder {
    /// Create a new catalog builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start defining a new module.
    #[must_use]
    pub fn module(self, id: &str) -> ModuleBuilder {
        ModuleBuilder {
            parent: self,
            id: id.to_string(),
            base_price: None,
            display_name: None,
        }
    }

    /// Build the catalog.
    #[must_use]
    pub fn build(self) -> ModuleCatalog {
        ModuleCatalog {
            modules: self.modules,
        }
    }

    fn add_module(mut self, config: ModuleConfig) -> Self {
        self.modules.insert(config.id.clone(), config);
        self
    }
}

/// Builder for a single module configuration.
#[derive(Debug)]
pub struct ModuleBuilder {
    parent: ModuleCatalogBuilder,
    id: String,
    base_price: Option<Decimal>,
    display_name: Option<String>,
}

impl ModuleBuilder {
    /// Set the monthly price in the platform base currency.
    #[must_use]
    pub fn base_price(mut self, price: Decimal) -> Self {
        self.base_price = Some(price);
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    /// Finish defining this module and return to the parent builder.
    ///
    /// # Panics
    ///
    /// Panics if `base_price` was not set.
    #[must_use]
    pub fn done(self) -> ModuleCatalogBuilder {
        let config = ModuleConfig {
            id: self.id,
            base_price: self
                .base_price
                .expect("base_price is required for a module"),
            display_name: self.display_name,
        };
        self.parent.add_module(config)
    }
}

/// Static conversion rates from the base currency to display currencies.
///
/// A rate is "units of target currency per one unit of base currency". The
/// base currency itself carries a rate of exactly one.
#[derive(Clone, Debug, Default)]
pub struct FxTable {
    rates: HashMap<String, Decimal>,
}

impl FxTable {
    /// Create a new empty rate table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a rate table.
    #[must_use]
    pub fn builder() -> FxTableBuilder {
        FxTableBuilder::new()
    }

    /// Get the rate for a currency, if configured.
    ///
    /// Currency codes are case-insensitive.
    #[must_use]
    pub fn rate_for(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(&currency.to_uppercase()).copied()
    }

    /// Convert a base-currency amount into the target currency.
    #[must_use]
    pub fn convert(&self, base_amount: Decimal, currency: &str) -> Option<Decimal> {
        self.rate_for(currency).map(|rate| base_amount * rate)
    }

    /// Check if a currency is supported.
    #[must_use]
    pub fn supports(&self, currency: &str) -> bool {
        self.rates.contains_key(&currency.to_uppercase())
    }

    /// Get the number of configured currencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Check if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Builder for constructing a rate table.
#[derive(Debug, Default)]
pub struct FxTableBuilder {
    rates: HashMap<String, Decimal>,
}

impl FxTableBuilder {
    /// Create a new rate table builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a conversion rate for a currency.
    #[must_use]
    pub fn rate(mut self, currency: &str, rate: Decimal) -> Self {
        self.rates.insert(currency.to_uppercase(), rate);
        self
    }

    /// Build the rate table.
    #[must_use]
    pub fn build(self) -> FxTable {
        FxTable { rates: self.rates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_build_catalog() {
        let catalog = ModuleCatalog::builder()
            .module("stock_auto")
            .base_price(dec!(5000))
            .display_name("Stock automation")
            .done()
            .module("loyalty")
            .base_price(dec!(6000))
            .done()
            .build();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("stock_auto"));
        assert_eq!(catalog.price_of("loyalty"), Some(dec!(6000)));
        assert_eq!(catalog.price_of("unknown"), None);
    }

    #[test]
    fn test_module_label_falls_back_to_id() {
        let catalog = ModuleCatalog::builder()
            .module("stock_auto")
            .base_price(dec!(5000))
            .display_name("Stock automation")
            .done()
            .module("loyalty")
            .base_price(dec!(6000))
            .done()
            .build();

        assert_eq!(catalog.get("stock_auto").unwrap().label(), "Stock automation");
        assert_eq!(catalog.get("loyalty").unwrap().label(), "loyalty");
    }

    #[test]
    fn test_catalog_from_entries() {
        let catalog = ModuleCatalog::from_entries(vec![
            ModuleConfig {
                id: "pos".to_string(),
                base_price: dec!(3500),
                display_name: None,
            },
            ModuleConfig {
                id: "crm".to_string(),
                base_price: dec!(4500),
                display_name: Some("Customer manager".to_string()),
            },
        ]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.price_of("pos"), Some(dec!(3500)));
    }

    #[test]
    fn test_duplicate_module_id_overwrites() {
        let catalog = ModuleCatalog::builder()
            .module("pos")
            .base_price(dec!(1000))
            .done()
            .module("pos")
            .base_price(dec!(2000))
            .done()
            .build();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.price_of("pos"), Some(dec!(2000)));
    }

    #[test]
    fn test_fx_rate_lookup_is_case_insensitive() {
        let fx = FxTable::builder()
            .rate("xof", Decimal::ONE)
            .rate("GHS", dec!(0.022))
            .build();

        assert_eq!(fx.rate_for("XOF"), Some(Decimal::ONE));
        assert_eq!(fx.rate_for("ghs"), Some(dec!(0.022)));
        assert!(!fx.supports("EUR"));
    }

    #[test]
    fn test_fx_convert() {
        let fx = FxTable::builder()
            .rate("XOF", Decimal::ONE)
            .rate("GHS", dec!(0.022))
            .build();

        assert_eq!(fx.convert(dec!(11000), "XOF"), Some(dec!(11000)));
        assert_eq!(fx.convert(dec!(11000), "GHS"), Some(dec!(242.000)));
        assert_eq!(fx.convert(dec!(11000), "EUR"), None);
    }
}
