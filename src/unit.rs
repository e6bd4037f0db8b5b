use std::collections::BTreeMap;

use crate::config::Settings;
use crate::data::{Conversion, DataSet, DimId, ScalarConversion, UnitId};
use crate::error::RuntimeError;
use crate::token::Span;

/// One factor of a derived unit: a unit raised to an integer power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTerm {
    pub unit: UnitId,
    pub exponent: i32,
}

/// A normalised product of unit powers. The empty product is
/// dimensionless; a single exponent-1 term is equivalent to that unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivedUnit {
    terms: Vec<UnitTerm>,
}

/// Dimension signature: dimension -> summed exponent. Equality of
/// signatures is what makes two values compatible for addition,
/// subtraction and comparison.
pub type Signature = BTreeMap<DimId, i32>;

impl DerivedUnit {
    pub fn dimensionless() -> Self {
        Self::default()
    }

    pub fn single(unit: UnitId) -> Self {
        Self {
            terms: vec![UnitTerm { unit, exponent: 1 }],
        }
    }

    pub fn from_terms(terms: Vec<UnitTerm>, data: &DataSet) -> Self {
        let mut du = Self { terms };
        du.normalise(data);
        du
    }

    pub fn terms(&self) -> &[UnitTerm] {
        &self.terms
    }

    pub fn is_dimensionless(&self) -> bool {
        self.terms.is_empty()
    }

    /// The unit, if this is a plain single exponent-1 unit.
    pub fn as_single(&self) -> Option<UnitId> {
        match self.terms.as_slice() {
            [UnitTerm { unit, exponent: 1 }] => Some(*unit),
            _ => None,
        }
    }

    pub fn signature(&self, data: &DataSet) -> Signature {
        let mut sig = Signature::new();
        for term in &self.terms {
            let dim = data.unit(term.unit).dimension;
            let entry = sig.entry(dim).or_insert(0);
            *entry += term.exponent;
            if *entry == 0 {
                sig.remove(&dim);
            }
        }
        sig
    }

    /// Merge equal units, drop exponent-0 terms, sort positive exponents
    /// first and then by dimension id.
    fn normalise(&mut self, data: &DataSet) {
        let mut merged: Vec<UnitTerm> = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            match merged.iter_mut().find(|t| t.unit == term.unit) {
                Some(t) => t.exponent += term.exponent,
                None => merged.push(*term),
            }
        }
        merged.retain(|t| t.exponent != 0);
        merged.sort_by(|a, b| {
            let a_neg = a.exponent < 0;
            let b_neg = b.exponent < 0;
            a_neg
                .cmp(&b_neg)
                .then_with(|| {
                    data.dimension_of(a.unit)
                        .id
                        .cmp(&data.dimension_of(b.unit).id)
                })
                .then_with(|| a.unit.cmp(&b.unit))
        });
        self.terms = merged;
    }

    pub fn multiply(&self, other: &DerivedUnit, data: &DataSet) -> DerivedUnit {
        let mut terms = self.terms.clone();
        terms.extend_from_slice(&other.terms);
        DerivedUnit::from_terms(terms, data)
    }

    pub fn divide(&self, other: &DerivedUnit, data: &DataSet) -> DerivedUnit {
        let mut terms = self.terms.clone();
        terms.extend(other.terms.iter().map(|t| UnitTerm {
            unit: t.unit,
            exponent: -t.exponent,
        }));
        DerivedUnit::from_terms(terms, data)
    }

    pub fn pow(&self, k: i32, data: &DataSet) -> DerivedUnit {
        let terms = self
            .terms
            .iter()
            .map(|t| UnitTerm {
                unit: t.unit,
                exponent: t.exponent * k,
            })
            .collect();
        DerivedUnit::from_terms(terms, data)
    }

    /// Raise to `num/den`. Accepted only when every exponent times the
    /// fraction stays integral (square root of m² is m); `None` otherwise.
    pub fn pow_rational(&self, num: i32, den: i32, data: &DataSet) -> Option<DerivedUnit> {
        if den == 0 {
            return None;
        }
        let mut terms = Vec::with_capacity(self.terms.len());
        for t in &self.terms {
            let scaled = t.exponent * num;
            if scaled % den != 0 {
                return None;
            }
            terms.push(UnitTerm {
                unit: t.unit,
                exponent: scaled / den,
            });
        }
        Some(DerivedUnit::from_terms(terms, data))
    }

    /// Swap every term for the base unit of its dimension, keeping
    /// exponents. Used for dimension-collapse checks and base arithmetic.
    pub fn in_base_units(&self, data: &DataSet) -> DerivedUnit {
        let terms = self
            .terms
            .iter()
            .map(|t| UnitTerm {
                unit: data.base_unit_of(data.unit(t.unit).dimension),
                exponent: t.exponent,
            })
            .collect();
        DerivedUnit::from_terms(terms, data)
    }
}

/// Resolve a unit's conversion to a concrete linear/affine row, picking
/// the variant selected by the `imperial_units` setting.
pub fn resolve_conversion(data: &DataSet, settings: &Settings, unit: UnitId) -> ScalarConversion {
    match &data.unit(unit).conversion {
        Conversion::Linear { factor } => ScalarConversion::Linear { factor: *factor },
        Conversion::Affine { factor, offset } => ScalarConversion::Affine {
            factor: *factor,
            offset: *offset,
        },
        Conversion::Variant { variants } => variants
            .get(settings.imperial_units.key())
            .or_else(|| variants.values().next())
            .cloned()
            .unwrap_or(ScalarConversion::Linear { factor: 1.0 }),
    }
}

/// The multiplicative factor to base, ignoring any affine offset. In
/// derived-unit (delta) contexts this is the only part that applies.
pub fn linear_factor(data: &DataSet, settings: &Settings, unit: UnitId) -> f64 {
    match resolve_conversion(data, settings, unit) {
        ScalarConversion::Linear { factor } => factor,
        ScalarConversion::Affine { factor, .. } => factor,
    }
}

pub fn is_affine(data: &DataSet, settings: &Settings, unit: UnitId) -> bool {
    matches!(
        resolve_conversion(data, settings, unit),
        ScalarConversion::Affine { .. }
    )
}

/// Value in the dimension's base unit, offset included.
pub fn to_base(data: &DataSet, settings: &Settings, value: f64, unit: UnitId) -> f64 {
    match resolve_conversion(data, settings, unit) {
        ScalarConversion::Linear { factor } => value * factor,
        ScalarConversion::Affine { factor, offset } => value * factor + offset,
    }
}

/// Value converted from the dimension's base unit, offset included.
pub fn from_base(data: &DataSet, settings: &Settings, value: f64, unit: UnitId) -> f64 {
    match resolve_conversion(data, settings, unit) {
        ScalarConversion::Linear { factor } => value / factor,
        ScalarConversion::Affine { factor, offset } => (value - offset) / factor,
    }
}

/// Single-unit conversion, affine-aware. Errors when the dimensions
/// differ.
pub fn convert_value(
    data: &DataSet,
    settings: &Settings,
    value: f64,
    from: UnitId,
    to: UnitId,
    span: Span,
) -> Result<f64, RuntimeError> {
    if data.unit(from).dimension != data.unit(to).dimension {
        return Err(RuntimeError::dimension_mismatch(
            span,
            format!(
                "cannot convert {} to {}",
                data.unit(from).symbol(),
                data.unit(to).symbol()
            ),
        ));
    }
    Ok(from_base(
        data,
        settings,
        to_base(data, settings, value, from),
        to,
    ))
}

/// Product of per-term factors to base. Affine offsets do not apply in
/// compound units.
pub fn derived_factor(data: &DataSet, settings: &Settings, du: &DerivedUnit) -> f64 {
    du.terms()
        .iter()
        .map(|t| linear_factor(data, settings, t.unit).powi(t.exponent))
        .product()
}

/// Derived-to-derived conversion. Requires equal dimension signatures.
pub fn convert_derived(
    data: &DataSet,
    settings: &Settings,
    magnitude: f64,
    from: &DerivedUnit,
    to: &DerivedUnit,
    span: Span,
) -> Result<f64, RuntimeError> {
    if from.signature(data) != to.signature(data) {
        return Err(RuntimeError::dimension_mismatch(
            span,
            "cannot convert between incompatible units",
        ));
    }
    if let (Some(f), Some(t)) = (from.as_single(), to.as_single()) {
        return convert_value(data, settings, magnitude, f, t, span);
    }
    Ok(magnitude * derived_factor(data, settings, from) / derived_factor(data, settings, to))
}

/// Split a base-unit magnitude greedily over `units`, largest factor
/// first, integer division everywhere but the final component.
pub fn split_composite(
    data: &DataSet,
    settings: &Settings,
    magnitude_in_base: f64,
    units: &[UnitId],
) -> Vec<(f64, UnitId)> {
    let mut ordered: Vec<UnitId> = units.to_vec();
    ordered.sort_by(|a, b| {
        linear_factor(data, settings, *b)
            .partial_cmp(&linear_factor(data, settings, *a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let negative = magnitude_in_base < 0.0;
    let mut remaining = magnitude_in_base.abs();
    let mut out = Vec::with_capacity(ordered.len());
    for (i, unit) in ordered.iter().enumerate() {
        let in_unit = from_base(data, settings, remaining, *unit);
        let component = if i + 1 == ordered.len() {
            in_unit
        } else {
            in_unit.trunc()
        };
        remaining -= to_base(data, settings, component, *unit);
        out.push((if negative { -component } else { component }, *unit));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataSet;

    fn setup() -> (DataSet, Settings) {
        (DataSet::with_defaults().unwrap(), Settings::default())
    }

    #[test]
    fn normalise_merges_and_drops() {
        let (data, _) = setup();
        let m = data.unit_by_id("meter").unwrap();
        let s = data.unit_by_id("second").unwrap();
        let du = DerivedUnit::from_terms(
            vec![
                UnitTerm { unit: m, exponent: 1 },
                UnitTerm { unit: s, exponent: -1 },
                UnitTerm { unit: m, exponent: 1 },
            ],
            &data,
        );
        assert_eq!(du.terms().len(), 2);
        assert_eq!(du.terms()[0], UnitTerm { unit: m, exponent: 2 });
        assert_eq!(du.terms()[1], UnitTerm { unit: s, exponent: -1 });

        let cancelled = du.multiply(&du.pow(-1, &data), &data);
        assert!(cancelled.is_dimensionless());
    }

    #[test]
    fn affine_round_trip() {
        let (data, settings) = setup();
        let c = data.unit_by_id("celsius").unwrap();
        let f = data.unit_by_id("fahrenheit").unwrap();
        let k = data.unit_by_id("kelvin").unwrap();
        let span = Span::default();

        let f_val = convert_value(&data, &settings, 100.0, c, f, span).unwrap();
        assert!((f_val - 212.0).abs() < 1e-9);
        let back = convert_value(&data, &settings, f_val, f, c, span).unwrap();
        assert!((back - 100.0).abs() < 1e-9);
        let kelvin = convert_value(&data, &settings, 0.0, c, k, span).unwrap();
        assert!((kelvin - 273.15).abs() < 1e-9);
    }

    #[test]
    fn variant_conversion_follows_setting() {
        let (data, mut settings) = setup();
        let gal = data.unit_by_id("gallon").unwrap();
        let l = data.unit_by_id("liter").unwrap();
        let span = Span::default();

        let us = convert_value(&data, &settings, 1.0, gal, l, span).unwrap();
        assert!((us - 3.785411784).abs() < 1e-9);

        settings.imperial_units = crate::config::ImperialVariant::Uk;
        let uk = convert_value(&data, &settings, 1.0, gal, l, span).unwrap();
        assert!((uk - 4.54609).abs() < 1e-9);
    }

    #[test]
    fn pow_rational_requires_integral_exponents() {
        let (data, _) = setup();
        let m = data.unit_by_id("meter").unwrap();
        let m2 = DerivedUnit::single(m).pow(2, &data);
        let root = m2.pow_rational(1, 2, &data).unwrap();
        assert_eq!(root.as_single(), Some(m));
        assert!(DerivedUnit::single(m).pow_rational(1, 2, &data).is_none());
    }

    #[test]
    fn composite_split_171_cm() {
        let (data, settings) = setup();
        let ft = data.unit_by_id("foot").unwrap();
        let inch = data.unit_by_id("inch").unwrap();
        let base = 1.71; // 171 cm in meters

        let parts = split_composite(&data, &settings, base, &[ft, inch]);
        assert_eq!(parts[0].1, ft);
        assert_eq!(parts[0].0, 5.0);
        assert!((parts[1].0 - (171.0 / 2.54 - 60.0)).abs() < 1e-9);
    }
}
