//! Pricing calculator.
//!
//! One `Pricing` value is built at startup and shared by the initiation and
//! reconciliation services, so both always price from the same catalog and
//! rate table. Quoting is pure: no I/O, safe to call repeatedly for
//! previews.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::catalog::{FxTable, ModuleCatalog};
use crate::error::PaymentError;

/// A priced checkout: what the buyer pays and what the provider keeps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Distinct module ids the quote covers, sorted.
    pub modules: Vec<String>,
    /// Total in the platform base currency. This is the amount the gateway
    /// is charged, independent of the display currency.
    pub base_amount: Decimal,
    /// Total in the requested display currency.
    pub gross: Decimal,
    /// Provider fee, rounded to 2 decimal places.
    pub fee: Decimal,
    /// Gross minus fee.
    pub net: Decimal,
    /// The display currency, uppercased.
    pub currency: String,
}

/// Prices module lists against an injected catalog and rate table.
#[derive(Clone, Debug)]
pub struct Pricing {
    catalog: ModuleCatalog,
    fx: FxTable,
}

impl Pricing {
    /// Create a pricing calculator over a catalog and rate table.
    #[must_use]
    pub fn new(catalog: ModuleCatalog, fx: FxTable) -> Self {
        Self { catalog, fx }
    }

    /// Price a module list in the given display currency.
    ///
    /// Duplicate module ids are charged once. Unknown module ids price at
    /// zero rather than failing; module catalogs evolve independently of
    /// pricing tables and a stale id must not block checkout. The fee is
    /// `gross * fee_percentage / 100` rounded half-away-from-zero to 2
    /// decimal places, and `fee + net == gross` holds exactly.
    pub fn quote(
        &self,
        module_ids: &[String],
        currency: &str,
        fee_percentage: Decimal,
    ) -> Result<PriceQuote, PaymentError> {
        let distinct: BTreeSet<&str> = module_ids.iter().map(String::as_str).collect();

        let base_amount: Decimal = distinct
            .iter()
            .map(|id| self.catalog.price_of(id).unwrap_or(Decimal::ZERO))
            .sum();

        let gross = self
            .fx
            .convert(base_amount, currency)
            .ok_or_else(|| PaymentError::CurrencyNotSupported {
                currency: currency.to_string(),
            })?;

        let fee = (gross * fee_percentage / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let net = gross - fee;

        Ok(PriceQuote {
            modules: distinct.into_iter().map(str::to_string).collect(),
            base_amount,
            gross,
            fee,
            net,
            currency: currency.to_uppercase(),
        })
    }

    /// The catalog this calculator prices from.
    #[must_use]
    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// The rate table this calculator converts with.
    #[must_use]
    pub fn fx(&self) -> &FxTable {
        &self.fx
    }
}
