//! Per-instrument rounding precision.

use dashmap::DashMap;

use crate::config::Config;

/// Decimal digits used to round each instrument's averages and amplitudes.
pub struct InstrumentCatalog {
    precisions: DashMap<String, u32>,
    default_precision: u32,
}

impl InstrumentCatalog {
    pub fn new(default_precision: u32) -> Self {
        Self {
            precisions: DashMap::new(),
            default_precision,
        }
    }

    /// Seed from configured `SYM:digits` pairs.
    pub fn from_config(config: &Config) -> Self {
        let catalog = Self::new(config.default_precision);
        for (symbol, digits) in &config.instrument_precisions {
            catalog.set(symbol, *digits);
        }
        catalog
    }

    pub fn set(&self, instrument: &str, digits: u32) {
        self.precisions.insert(instrument.to_uppercase(), digits);
    }

    /// Precision for `instrument`, or the default when unknown.
    pub fn precision(&self, instrument: &str) -> u32 {
        self.precisions
            .get(&instrument.to_uppercase())
            .map(|p| *p)
            .unwrap_or(self.default_precision)
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.precisions.contains_key(&instrument.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.precisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precisions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_back_to_default() {
        let catalog = InstrumentCatalog::new(5);
        catalog.set("WTICO_USD", 3);
        assert_eq!(catalog.precision("WTICO_USD"), 3);
        assert_eq!(catalog.precision("wtico_usd"), 3);
        assert_eq!(catalog.precision("USD_CAD"), 5);
        assert!(!catalog.contains("USD_CAD"));
    }

    #[test]
    fn test_from_config() {
        let config = Config::from_lookup(|key| match key {
            "DEFAULT_PRECISION" => Some("4".to_string()),
            "INSTRUMENT_PRECISIONS" => Some("USD_JPY:3".to_string()),
            _ => None,
        });
        let catalog = InstrumentCatalog::from_config(&config);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.precision("USD_JPY"), 3);
        assert_eq!(catalog.precision("EUR_USD"), 4);
    }
}
