use std::collections::BTreeMap;

use serde::Deserialize;

/// Index into `DataSet::units`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u32);

/// Index into `DataSet::dimensions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DimId(pub u32);

/// A conversion without the variant indirection: what a single variant row
/// looks like, and what most units use directly.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScalarConversion {
    /// value_in_base = value * factor
    Linear { factor: f64 },
    /// value_in_base = value * factor + offset
    Affine { factor: f64, offset: f64 },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Conversion {
    Linear {
        factor: f64,
    },
    Affine {
        factor: f64,
        offset: f64,
    },
    /// Locale-dependent conversion; the active row is picked by the
    /// `imperial_units` setting ("us" / "uk").
    Variant {
        variants: BTreeMap<String, ScalarConversion>,
    },
}

impl Conversion {
    pub fn is_affine(&self) -> bool {
        matches!(self, Conversion::Affine { .. })
    }
}

/// Dataset schema, spec'd JSON shape.
#[derive(Debug, Deserialize)]
pub struct UnitsFile {
    pub dimensions: Vec<DimensionDef>,
    pub units: Vec<UnitDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionDef {
    pub id: String,
    pub name: String,
    pub base_unit: String,
}

#[derive(Debug, Deserialize)]
pub struct UnitDef {
    pub id: String,
    pub names: Vec<String>,
    pub dimension: String,
    pub conversion: Conversion,
}

/// Resolved dimension: name plus its single base unit.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub id: String,
    pub name: String,
    pub base_unit: UnitId,
}

/// Resolved unit with its dimension index and conversion to the
/// dimension's base.
#[derive(Debug, Clone)]
pub struct Unit {
    pub id: String,
    pub names: Vec<String>,
    pub dimension: DimId,
    pub conversion: Conversion,
}

impl Unit {
    /// Canonical display symbol: the first (shortest-form) name.
    pub fn symbol(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.id)
    }

    /// Long display name: the last singular-looking name, falling back to
    /// the id.
    pub fn long_name(&self) -> &str {
        self.names
            .iter()
            .rev()
            .find(|n| n.chars().count() > 2)
            .map(String::as_str)
            .unwrap_or_else(|| self.symbol())
    }
}
