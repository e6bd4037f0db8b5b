pub mod currencies;
pub mod timezones;
pub mod trie;
pub mod units;

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

pub use self::currencies::CurrencyTable;
pub use self::timezones::TimezoneTable;
pub use self::trie::TrieMatch;
pub use self::units::{Conversion, DimId, Dimension, ScalarConversion, Unit, UnitId};

use self::currencies::CurrenciesFile;
use self::timezones::TimezonesFile;
use self::trie::UnitTrie;
use self::units::UnitsFile;

const DEFAULT_UNITS: &str = include_str!("units.json");
const DEFAULT_CURRENCIES: &str = include_str!("currencies.json");
const DEFAULT_TIMEZONES: &str = include_str!("timezones.json");

/// The immutable dataset snapshot a calculator evaluates against: units
/// with their dimensions and conversions, currencies, timezones, and the
/// lookup indices over them. Loaded once, shareable across threads.
pub struct DataSet {
    dimensions: Vec<Dimension>,
    units: Vec<Unit>,
    dim_index: HashMap<String, DimId>,
    unit_index: HashMap<String, UnitId>,
    unit_by_name: HashMap<String, UnitId>,
    unit_by_lower: HashMap<String, Vec<UnitId>>,
    trie: UnitTrie,
    currencies: CurrencyTable,
    timezones: TimezoneTable,
}

impl DataSet {
    /// Load from the three JSON datasets and build every index. Referential
    /// problems (unknown dimension, missing base unit) fail here, not at
    /// calculate time.
    pub fn from_json(units: &str, currencies: &str, timezones: &str) -> Result<Self> {
        let units_file: UnitsFile =
            serde_json::from_str(units).context("invalid units dataset")?;
        let currencies_file: CurrenciesFile =
            serde_json::from_str(currencies).context("invalid currencies dataset")?;
        let timezones_file: TimezonesFile =
            serde_json::from_str(timezones).context("invalid timezones dataset")?;

        let mut dim_index = HashMap::new();
        for (i, dim) in units_file.dimensions.iter().enumerate() {
            if dim_index
                .insert(dim.id.clone(), DimId(i as u32))
                .is_some()
            {
                bail!("duplicate dimension id `{}`", dim.id);
            }
        }

        let mut unit_list = Vec::with_capacity(units_file.units.len());
        let mut unit_index = HashMap::new();
        let mut unit_by_name = HashMap::new();
        let mut unit_by_lower: HashMap<String, Vec<UnitId>> = HashMap::new();
        let mut trie = UnitTrie::default();

        for def in units_file.units {
            let id = UnitId(unit_list.len() as u32);
            let dimension = *dim_index
                .get(&def.dimension)
                .with_context(|| format!("unit `{}` references unknown dimension `{}`", def.id, def.dimension))?;
            if unit_index.insert(def.id.clone(), id).is_some() {
                bail!("duplicate unit id `{}`", def.id);
            }
            for name in &def.names {
                unit_by_name.entry(name.clone()).or_insert(id);
                unit_by_lower
                    .entry(name.to_lowercase())
                    .or_default()
                    .push(id);
                trie.insert(name, id);
            }
            unit_list.push(Unit {
                id: def.id,
                names: def.names,
                dimension,
                conversion: def.conversion,
            });
        }

        let mut dimensions = Vec::with_capacity(units_file.dimensions.len());
        for def in units_file.dimensions {
            let base_unit = *unit_index.get(&def.base_unit).with_context(|| {
                format!("dimension `{}` references unknown base unit `{}`", def.id, def.base_unit)
            })?;
            if unit_list[base_unit.0 as usize].dimension != dim_index[&def.id] {
                bail!(
                    "base unit `{}` does not belong to dimension `{}`",
                    def.base_unit,
                    def.id
                );
            }
            dimensions.push(Dimension {
                id: def.id,
                name: def.name,
                base_unit,
            });
        }

        Ok(Self {
            dimensions,
            units: unit_list,
            dim_index,
            unit_index,
            unit_by_name,
            unit_by_lower,
            trie,
            currencies: CurrencyTable::build(currencies_file),
            timezones: TimezoneTable::build(timezones_file),
        })
    }

    /// The datasets embedded in the crate.
    pub fn with_defaults() -> Result<Self> {
        Self::from_json(DEFAULT_UNITS, DEFAULT_CURRENCIES, DEFAULT_TIMEZONES)
    }

    pub fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id.0 as usize]
    }

    pub fn dimension(&self, id: DimId) -> &Dimension {
        &self.dimensions[id.0 as usize]
    }

    pub fn dimension_of(&self, unit: UnitId) -> &Dimension {
        self.dimension(self.unit(unit).dimension)
    }

    pub fn base_unit_of(&self, dim: DimId) -> UnitId {
        self.dimension(dim).base_unit
    }

    pub fn unit_by_id(&self, id: &str) -> Option<UnitId> {
        self.unit_index.get(id).copied()
    }

    pub fn dim_by_id(&self, id: &str) -> Option<DimId> {
        self.dim_index.get(id).copied()
    }

    /// Case-sensitive name lookup.
    pub fn unit_by_exact_name(&self, name: &str) -> Option<UnitId> {
        self.unit_by_name.get(name).copied()
    }

    /// Case-insensitive lookup; collisions resolve in insertion order.
    pub fn unit_by_lowercase_name(&self, name: &str) -> Option<UnitId> {
        self.unit_by_lower
            .get(&name.to_lowercase())
            .and_then(|ids| ids.first())
            .copied()
    }

    /// Longest-match unit resolution from the start of `input`.
    pub fn find_longest_match(&self, input: &str) -> Option<TrieMatch> {
        self.trie.find_longest_match(input)
    }

    pub fn currencies(&self) -> &CurrencyTable {
        &self.currencies
    }

    pub fn timezones(&self) -> &TimezoneTable {
        &self.timezones
    }

    /// Resolve a unit name the way the lexer does: exact first, then
    /// case-insensitive.
    pub fn resolve_unit_name(&self, name: &str) -> Option<UnitId> {
        self.unit_by_exact_name(name)
            .or_else(|| self.unit_by_lowercase_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_and_index() {
        let data = DataSet::with_defaults().unwrap();

        let meter = data.unit_by_id("meter").unwrap();
        assert_eq!(data.unit(meter).symbol(), "m");
        assert_eq!(data.dimension_of(meter).id, "length");
        assert_eq!(data.base_unit_of(data.unit(meter).dimension), meter);

        // Property: "m" is the meter, "min" the minute, "meters" six bytes
        // of meter.
        let m = data.find_longest_match("m").unwrap();
        assert_eq!(m.unit, meter);
        let min = data.find_longest_match("min").unwrap();
        assert_eq!(min.unit, data.unit_by_id("minute").unwrap());
        assert_eq!(min.length, 3);
        let meters = data.find_longest_match("meters").unwrap();
        assert_eq!((meters.unit, meters.length), (meter, 6));
    }

    #[test]
    fn case_sensitive_name_beats_lowercase() {
        let data = DataSet::with_defaults().unwrap();
        assert_eq!(
            data.resolve_unit_name("Pm"),
            Some(data.unit_by_id("petameter").unwrap())
        );
        assert_eq!(
            data.resolve_unit_name("pm"),
            Some(data.unit_by_id("picometer").unwrap())
        );
        assert_eq!(
            data.resolve_unit_name("am"),
            Some(data.unit_by_id("attometer").unwrap())
        );
    }

    #[test]
    fn currency_tables_populated() {
        let data = DataSet::with_defaults().unwrap();
        let c = data.currencies();
        assert_eq!(c.by_code("usd").unwrap().minor_units, 2);
        assert_eq!(c.by_code("JPY").unwrap().minor_units, 0);
        assert_eq!(c.code_for_adjacent_symbol("€"), Some("EUR"));
        assert_eq!(c.code_for_adjacent_symbol("US$"), Some("USD"));
        assert_eq!(
            c.dimension_for_adjacent_symbol("$"),
            Some("currency_symbol_0024")
        );
        assert_eq!(c.code_for_spaced_symbol("Kč"), Some("CZK"));
    }

    #[test]
    fn timezone_resolution_uses_locale_country() {
        let data = DataSet::with_defaults().unwrap();
        let tz = data.timezones();
        assert!(tz.contains("utc"));
        assert_eq!(tz.resolve("CST", "CN"), Some("Asia/Shanghai"));
        assert_eq!(tz.resolve("CST", "US"), Some("America/Chicago"));
        assert_eq!(tz.resolve("IST", "IN"), Some("Asia/Kolkata"));
    }
}
