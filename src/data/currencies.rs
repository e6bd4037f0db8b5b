use std::collections::HashMap;

use serde::Deserialize;

/// Dataset schema, spec'd JSON shape.
#[derive(Debug, Deserialize)]
pub struct CurrenciesFile {
    pub unambiguous: Vec<CurrencyDef>,
    pub ambiguous: AmbiguousDefs,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyDef {
    pub code: String,
    pub minor_units: u32,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub symbol_adjacent: Vec<String>,
    #[serde(default)]
    pub symbol_spaced: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AmbiguousDefs {
    #[serde(default)]
    pub name: Vec<AmbiguousSymbol>,
    #[serde(default)]
    pub symbol_adjacent: Vec<AmbiguousSymbol>,
    #[serde(default)]
    pub symbol_spaced: Vec<AmbiguousSymbol>,
}

/// A disputed symbol (`$`, `£`, `¥`, `₩`) keyed by its synthetic
/// dimension id, e.g. `currency_symbol_0024` for U+0024.
#[derive(Debug, Clone, Deserialize)]
pub struct AmbiguousSymbol {
    pub symbol: String,
    pub dimension: String,
}

#[derive(Debug, Clone)]
pub struct Currency {
    pub code: String,
    pub minor_units: u32,
    pub names: Vec<String>,
}

/// All currency lookup tables built by the loader.
#[derive(Debug, Default)]
pub struct CurrencyTable {
    by_code: HashMap<String, Currency>,
    by_name: HashMap<String, String>,
    adjacent: HashMap<String, String>,
    spaced: HashMap<String, String>,
    adjacent_ambiguous: HashMap<String, String>,
    spaced_ambiguous: HashMap<String, String>,
    symbol_by_dimension: HashMap<String, String>,
}

pub const AMBIGUOUS_DIMENSION_PREFIX: &str = "currency_symbol_";

/// Default resolution for an ambiguous symbol dimension when a concrete
/// code is needed (conversion targets). Decodes the codepoint from the
/// dimension id.
pub fn default_code_for(dimension: &str) -> Option<&'static str> {
    let hex = dimension.strip_prefix(AMBIGUOUS_DIMENSION_PREFIX)?;
    let cp = u32::from_str_radix(hex, 16).ok()?;
    match char::from_u32(cp)? {
        '$' => Some("USD"),
        '£' => Some("GBP"),
        '¥' => Some("JPY"),
        '₩' => Some("KRW"),
        _ => None,
    }
}

impl CurrencyTable {
    pub fn build(file: CurrenciesFile) -> Self {
        let mut table = CurrencyTable::default();
        for def in file.unambiguous {
            let code = def.code.to_uppercase();
            for name in &def.names {
                table.by_name.insert(name.to_lowercase(), code.clone());
            }
            for sym in &def.symbol_adjacent {
                table.adjacent.insert(sym.clone(), code.clone());
            }
            for sym in &def.symbol_spaced {
                table.spaced.insert(sym.clone(), code.clone());
            }
            table.by_code.insert(
                code.clone(),
                Currency {
                    code,
                    minor_units: def.minor_units,
                    names: def.names,
                },
            );
        }
        for amb in file.ambiguous.symbol_adjacent {
            table
                .symbol_by_dimension
                .insert(amb.dimension.clone(), amb.symbol.clone());
            table.adjacent_ambiguous.insert(amb.symbol, amb.dimension);
        }
        for amb in file.ambiguous.symbol_spaced {
            table
                .symbol_by_dimension
                .insert(amb.dimension.clone(), amb.symbol.clone());
            table.spaced_ambiguous.insert(amb.symbol, amb.dimension);
        }
        table
    }

    /// ISO code lookup, case-insensitive.
    pub fn by_code(&self, code: &str) -> Option<&Currency> {
        self.by_code.get(&code.to_uppercase())
    }

    /// Currency name lookup ("dollars", "euro"), case-insensitive.
    pub fn code_for_name(&self, name: &str) -> Option<&str> {
        self.by_name.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Unambiguous adjacent symbol (`US$`, `€`) -> code.
    pub fn code_for_adjacent_symbol(&self, sym: &str) -> Option<&str> {
        self.adjacent.get(sym).map(String::as_str)
    }

    /// Unambiguous spaced symbol (`Kč`) -> code.
    pub fn code_for_spaced_symbol(&self, sym: &str) -> Option<&str> {
        self.spaced.get(sym).map(String::as_str)
    }

    /// Ambiguous adjacent symbol (`$`) -> synthetic dimension id.
    pub fn dimension_for_adjacent_symbol(&self, sym: &str) -> Option<&str> {
        self.adjacent_ambiguous.get(sym).map(String::as_str)
    }

    /// Ambiguous spaced symbol -> synthetic dimension id.
    pub fn dimension_for_spaced_symbol(&self, sym: &str) -> Option<&str> {
        self.spaced_ambiguous.get(sym).map(String::as_str)
    }

    /// The display symbol for a synthetic ambiguous dimension.
    pub fn symbol_for_dimension(&self, dimension: &str) -> Option<&str> {
        self.symbol_by_dimension.get(dimension).map(String::as_str)
    }

    pub fn minor_units(&self, code: &str) -> u32 {
        self.by_code(code).map(|c| c.minor_units).unwrap_or(2)
    }

    pub fn is_ambiguous_code(code: &str) -> bool {
        code.starts_with(AMBIGUOUS_DIMENSION_PREFIX)
    }

    /// Resolve a code that may be an ambiguous dimension id to a concrete
    /// ISO code.
    pub fn resolve_code<'a>(&self, code: &'a str) -> Option<&'a str> {
        if Self::is_ambiguous_code(code) {
            default_code_for(code)
        } else {
            Some(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_dimension_decodes_to_default_code() {
        assert_eq!(default_code_for("currency_symbol_0024"), Some("USD"));
        assert_eq!(default_code_for("currency_symbol_00a3"), Some("GBP"));
        assert_eq!(default_code_for("currency_symbol_00a5"), Some("JPY"));
        assert_eq!(default_code_for("currency_symbol_20a9"), Some("KRW"));
        assert_eq!(default_code_for("length"), None);
    }
}
