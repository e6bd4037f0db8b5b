use std::collections::HashMap;

use anyhow::{bail, Context, Result};

/// An exchange-rate snapshot: one pivot (base) currency and the rate of
/// every other code against it. Installed before evaluation and treated
/// as immutable afterwards.
#[derive(Debug, Clone)]
pub struct ExchangeRates {
    base: String,
    date: Option<String>,
    rates: HashMap<String, f64>,
}

impl ExchangeRates {
    pub fn new(base: &str, rates: HashMap<String, f64>) -> Self {
        let rates = rates
            .into_iter()
            .map(|(code, rate)| (code.to_uppercase(), rate))
            .collect();
        Self {
            base: base.to_uppercase(),
            date: None,
            rates,
        }
    }

    /// Parse the snapshot shape `{"date": "...", "<base>": {"<code>": rate}}`
    /// with lowercase keys.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).context("invalid exchange-rate JSON")?;
        let obj = match value.as_object() {
            Some(o) => o,
            None => bail!("exchange-rate snapshot must be a JSON object"),
        };

        let date = obj.get("date").and_then(|d| d.as_str()).map(String::from);
        let (base, table) = obj
            .iter()
            .find(|(k, v)| k.as_str() != "date" && v.is_object())
            .context("exchange-rate snapshot has no rate table")?;

        let mut rates = HashMap::new();
        for (code, rate) in table.as_object().unwrap() {
            let rate = rate
                .as_f64()
                .with_context(|| format!("rate for {code} is not a number"))?;
            rates.insert(code.to_uppercase(), rate);
        }

        Ok(Self {
            base: base.to_uppercase(),
            date,
            rates,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }

    /// Units of `code` per one unit of the base. The base itself is 1.
    pub fn rate(&self, code: &str) -> Option<f64> {
        let code = code.to_uppercase();
        if code == self.base {
            return Some(1.0);
        }
        self.rates.get(&code).copied()
    }

    /// Convert through the pivot: identity for same codes, a single
    /// multiply or divide when one side is the base, else cross via base.
    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        if from == to {
            return Some(amount);
        }
        if from == self.base {
            return Some(amount * self.rates.get(&to)?);
        }
        if to == self.base {
            return Some(amount / self.rates.get(&from)?);
        }
        let from_rate = self.rates.get(&from)?;
        let to_rate = self.rates.get(&to)?;
        Some(amount / from_rate * to_rate)
    }
}

/// Round to a currency's minor-unit count for display. Intermediate
/// arithmetic stays unrounded.
pub fn round_to_minor_units(amount: f64, minor_units: u32) -> f64 {
    let scale = 10f64.powi(minor_units as i32);
    (amount * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> ExchangeRates {
        ExchangeRates::from_json(
            r#"{"date": "2026-08-01", "usd": {"eur": 0.85, "gbp": 0.73, "jpy": 110.0}}"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_snapshot_shape() {
        let r = rates();
        assert_eq!(r.base(), "USD");
        assert_eq!(r.date(), Some("2026-08-01"));
        assert_eq!(r.rate("EUR"), Some(0.85));
        assert_eq!(r.rate("usd"), Some(1.0));
        assert_eq!(r.rate("CHF"), None);
    }

    #[test]
    fn converts_through_pivot() {
        let r = rates();
        assert_eq!(r.convert(100.0, "USD", "EUR"), Some(85.0));
        assert_eq!(r.convert(85.0, "EUR", "USD"), Some(100.0));
        let cross = r.convert(100.0, "EUR", "GBP").unwrap();
        assert!((cross - 100.0 / 0.85 * 0.73).abs() < 1e-9);
        assert_eq!(r.convert(42.0, "EUR", "EUR"), Some(42.0));
        assert_eq!(r.convert(1.0, "EUR", "CHF"), None);
    }

    #[test]
    fn round_trip_within_minor_units() {
        let r = rates();
        let there = r.convert(123.45, "EUR", "JPY").unwrap();
        let back = r.convert(there, "JPY", "EUR").unwrap();
        assert!((back - 123.45).abs() < 1e-4);
        assert_eq!(round_to_minor_units(back, 2), 123.45);
    }

    #[test]
    fn minor_unit_rounding() {
        assert_eq!(round_to_minor_units(1.005, 2), 1.0);
        assert_eq!(round_to_minor_units(84.999999, 2), 85.0);
        assert_eq!(round_to_minor_units(110.4, 0), 110.0);
    }
}
