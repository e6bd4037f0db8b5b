use std::collections::HashMap;

use rand::RngCore;

use crate::ast::{BinaryOp, ConversionTarget, Expr, PostfixOp, PresentationFormat, UnaryOp};
use crate::config::Settings;
use crate::currency::ExchangeRates;
use crate::data::currencies::CurrencyTable;
use crate::data::{DataSet, UnitId};
use crate::error::RuntimeError;
use crate::functions::{self, FnCtx};
use crate::temporal::{self, DateAddResult, Duration, TimeAddResult};
use crate::token::Span;
use crate::unit::{self, DerivedUnit, UnitTerm};
use crate::value::Value;

type EResult = Result<Value, RuntimeError>;

/// What a unit-ish name attached to a value resolves to.
enum Attached {
    Unit(DerivedUnit),
    Currency(String),
}

enum TargetUnit {
    Unit(DerivedUnit),
    Currency(String),
}

/// Tree-walk evaluator for one document. Owns the variable scope; errors
/// short-circuit the line they occur on and nothing else.
pub struct Evaluator<'a> {
    data: &'a DataSet,
    settings: &'a Settings,
    rates: Option<&'a ExchangeRates>,
    rng: &'a mut dyn RngCore,
    scope: HashMap<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        data: &'a DataSet,
        settings: &'a Settings,
        rates: Option<&'a ExchangeRates>,
        rng: &'a mut dyn RngCore,
    ) -> Self {
        Self {
            data,
            settings,
            rates,
            rng,
            scope: HashMap::new(),
        }
    }

    pub fn define(&mut self, name: &str, value: Value) {
        self.scope.insert(name.to_string(), value);
    }

    pub fn scope(&self) -> &HashMap<String, Value> {
        &self.scope
    }

    pub fn eval(&mut self, expr: &Expr) -> EResult {
        match expr {
            Expr::Number { lexeme, span } => self.number_literal(lexeme, *span),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            Expr::Identifier { name, span } => self.identifier(name, *span),
            Expr::UnitRef { name, span } => match self.resolve_attached(name, *span)? {
                Attached::Unit(du) => Ok(Value::Number {
                    magnitude: 1.0,
                    unit: du,
                }),
                Attached::Currency(code) => Ok(Value::Currency { amount: 1.0, code }),
            },
            Expr::WithUnit { value, unit, span } => {
                let (inner, fmt) = self.eval(value)?.take_format();
                let magnitude = match inner {
                    Value::Number { magnitude, unit } if unit.is_dimensionless() => magnitude,
                    other => {
                        return Err(RuntimeError::dimension_mismatch(
                            *span,
                            format!("cannot attach a unit to {}", other.shape()),
                        ))
                    }
                };
                let value = match self.resolve_attached(unit, *span)? {
                    Attached::Unit(du) => Value::Number {
                        magnitude,
                        unit: du,
                    },
                    Attached::Currency(code) => Value::Currency {
                        amount: magnitude,
                        code,
                    },
                };
                Ok(value.with_format(fmt))
            }
            Expr::Composite { parts, span } => self.composite_literal(parts, *span),
            Expr::DateTimeLiteral { date, time, .. } => Ok(match (date, time) {
                (Some(d), Some(t)) => Value::DateTime(d.and_time(*t)),
                (Some(d), None) => Value::Date(*d),
                (None, Some(t)) => Value::Time(*t),
                (None, None) => Value::plain(f64::NAN),
            }),
            Expr::Unary { op, operand, span } => {
                let (v, fmt) = self.eval(operand)?.take_format();
                let out = self.unary_op(*op, v, *span)?;
                Ok(out.with_format(fmt))
            }
            Expr::Postfix { op, operand, span } => {
                let (v, _) = self.eval(operand)?.take_format();
                self.postfix_op(*op, v, *span)
            }
            Expr::Binary { op, lhs, rhs, span } => {
                let (lv, lf) = self.eval(lhs)?.take_format();
                let (rv, rf) = self.eval(rhs)?.take_format();
                let keep = matches!(
                    op,
                    BinaryOp::Add
                        | BinaryOp::Sub
                        | BinaryOp::Mul
                        | BinaryOp::Div
                        | BinaryOp::Mod
                        | BinaryOp::Pow
                        | BinaryOp::BitAnd
                        | BinaryOp::BitOr
                        | BinaryOp::BitXor
                        | BinaryOp::Shl
                        | BinaryOp::Shr
                );
                let out = self.binary_op(*op, lv, rv, *span)?;
                if keep {
                    Ok(out.with_format(lf.or(rf)))
                } else {
                    Ok(out)
                }
            }
            Expr::Call { name, args, span } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?.take_format().0);
                }
                let mut ctx = FnCtx {
                    data: self.data,
                    settings: self.settings,
                    rng: &mut *self.rng,
                };
                functions::apply(&mut ctx, name, &values, *span)
            }
            Expr::Convert {
                value,
                target,
                span,
            } => {
                let (inner, _) = self.eval(value)?.take_format();
                self.convert(inner, target, *span)
            }
            Expr::If {
                cond,
                then,
                otherwise,
                span,
            } => {
                let (c, _) = self.eval(cond)?.take_format();
                if self.truthy(&c, *span)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    // ---- literals ------------------------------------------------------

    fn number_literal(&self, lexeme: &str, span: Span) -> EResult {
        let cleaned = lexeme.replace('_', "");
        let (radix, rest, fmt) = match cleaned.get(..2) {
            Some("0b") | Some("0B") => (2, &cleaned[2..], Some(PresentationFormat::Binary)),
            Some("0o") | Some("0O") => (8, &cleaned[2..], Some(PresentationFormat::Octal)),
            Some("0x") | Some("0X") => (16, &cleaned[2..], Some(PresentationFormat::Hex)),
            _ => (10, cleaned.as_str(), None),
        };
        if radix != 10 {
            let n = i64::from_str_radix(rest, radix).map_err(|_| {
                RuntimeError::new(
                    crate::error::RuntimeErrorKind::Overflow,
                    span,
                    format!("integer literal `{lexeme}` is out of range"),
                )
            })?;
            return Ok(Value::plain(n as f64).with_format(fmt));
        }
        cleaned
            .parse::<f64>()
            .map(Value::plain)
            .map_err(|_| RuntimeError::domain(span, format!("invalid number `{lexeme}`")))
    }

    fn identifier(&self, name: &str, span: Span) -> EResult {
        if let Some(v) = self.scope.get(name) {
            return Ok(v.clone());
        }
        let constant = match name {
            "pi" => Some(std::f64::consts::PI),
            "tau" => Some(std::f64::consts::TAU),
            "e" => Some(std::f64::consts::E),
            "phi" | "golden_ratio" => Some(1.618_033_988_749_895),
            "NaN" => Some(f64::NAN),
            "Infinity" | "inf" => Some(f64::INFINITY),
            _ => None,
        };
        match constant {
            Some(c) => Ok(Value::plain(c)),
            None => Err(RuntimeError::undefined_variable(span, name)),
        }
    }

    fn resolve_attached(&self, name: &str, span: Span) -> Result<Attached, RuntimeError> {
        if CurrencyTable::is_ambiguous_code(name) {
            return Ok(Attached::Currency(name.to_string()));
        }
        if let Some(id) = self.data.resolve_unit_name(name) {
            return Ok(Attached::Unit(DerivedUnit::single(id)));
        }
        // Superscript exponent spelled into the name: m², s⁻¹.
        if let Some((prefix, exponent)) = split_superscript(name) {
            if let Some(id) = self.data.resolve_unit_name(prefix) {
                return Ok(Attached::Unit(
                    DerivedUnit::single(id).pow(exponent, self.data),
                ));
            }
        }
        if let Some(c) = self.data.currencies().by_code(name) {
            return Ok(Attached::Currency(c.code.clone()));
        }
        if let Some(code) = self.data.currencies().code_for_name(name) {
            return Ok(Attached::Currency(code.to_string()));
        }
        Err(RuntimeError::invalid_conversion(
            span,
            format!("unknown unit `{name}`"),
        ))
    }

    /// Collapse a composite literal to a single quantity in the unit of
    /// its largest component.
    fn composite_literal(&mut self, parts: &[(Expr, String)], span: Span) -> EResult {
        let mut base_total = 0.0;
        let mut largest: Option<(f64, UnitId)> = None;
        for (expr, name) in parts {
            let (v, _) = self.eval(expr)?.take_format();
            let magnitude = match v {
                Value::Number { magnitude, unit } if unit.is_dimensionless() => magnitude,
                other => {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        format!("composite component must be a number, got {}", other.shape()),
                    ))
                }
            };
            let id = self.data.resolve_unit_name(name).ok_or_else(|| {
                RuntimeError::invalid_conversion(span, format!("unknown unit `{name}`"))
            })?;
            let factor = unit::linear_factor(self.data, self.settings, id);
            base_total += unit::to_base(self.data, self.settings, magnitude, id);
            if largest.map(|(f, _)| factor > f).unwrap_or(true) {
                largest = Some((factor, id));
            }
        }
        let (_, id) = largest.expect("composite literal has at least one part");
        Ok(Value::Number {
            magnitude: unit::from_base(self.data, self.settings, base_total, id),
            unit: DerivedUnit::single(id),
        })
    }

    // ---- operators -----------------------------------------------------

    fn unary_op(&self, op: UnaryOp, v: Value, span: Span) -> EResult {
        match op {
            UnaryOp::Pos => Ok(v),
            UnaryOp::Neg => match v {
                Value::Number { magnitude, unit } => Ok(Value::Number {
                    magnitude: -magnitude,
                    unit,
                }),
                Value::Percent(p) => Ok(Value::Percent(-p)),
                Value::Currency { amount, code } => Ok(Value::Currency {
                    amount: -amount,
                    code,
                }),
                Value::Duration(d) => Ok(Value::Duration(d.negated())),
                other => Err(RuntimeError::domain(
                    span,
                    format!("cannot negate {}", other.shape()),
                )),
            },
            UnaryOp::Not => Ok(Value::Bool(!self.truthy(&v, span)?)),
            UnaryOp::BitNot => {
                let n = integer_operand(&v, span)?;
                Ok(Value::plain(!n as f64))
            }
        }
    }

    fn postfix_op(&self, op: PostfixOp, v: Value, span: Span) -> EResult {
        match op {
            PostfixOp::Factorial => match v {
                Value::Number { magnitude, unit } if unit.is_dimensionless() => {
                    Ok(Value::plain(functions::factorial(magnitude, span)?))
                }
                other => Err(RuntimeError::domain(
                    span,
                    format!("factorial expects a plain number, got {}", other.shape()),
                )),
            },
            PostfixOp::Percent => match v {
                Value::Number { magnitude, unit } if unit.is_dimensionless() => {
                    Ok(Value::Percent(magnitude))
                }
                other => Err(RuntimeError::domain(
                    span,
                    format!("`%` expects a plain number, got {}", other.shape()),
                )),
            },
        }
    }

    fn binary_op(&mut self, op: BinaryOp, l: Value, r: Value, span: Span) -> EResult {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lb = self.truthy(&l, span)?;
                let rb = self.truthy(&r, span)?;
                Ok(Value::Bool(if op == BinaryOp::And {
                    lb && rb
                } else {
                    lb || rb
                }))
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => self.compare(op, l, r, span),
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl
            | BinaryOp::Shr => self.bitwise(op, l, r, span),
            _ => self.arithmetic(op, l, r, span),
        }
    }

    /// Composite values are arithmetically the sum of their components;
    /// collapse to a quantity in the unit of the largest one.
    fn decompose(&self, v: Value) -> Value {
        let Value::Composite { components } = v else {
            return v;
        };
        let base: f64 = components
            .iter()
            .map(|(m, id)| unit::to_base(self.data, self.settings, *m, *id))
            .sum();
        let largest = components
            .iter()
            .map(|(_, id)| *id)
            .max_by(|a, b| {
                unit::linear_factor(self.data, self.settings, *a)
                    .partial_cmp(&unit::linear_factor(self.data, self.settings, *b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("composite has components");
        Value::Number {
            magnitude: unit::from_base(self.data, self.settings, base, largest),
            unit: DerivedUnit::single(largest),
        }
    }

    fn arithmetic(&mut self, op: BinaryOp, l: Value, r: Value, span: Span) -> EResult {
        use BinaryOp::*;

        let l = self.decompose(l);
        let r = self.decompose(r);

        // Temporal shapes and durations first; they do not mix with the
        // numeric tower except through time-dimension quantities.
        if l.is_temporal() || r.is_temporal() {
            return self.temporal_op(op, l, r, span);
        }
        if let (Value::Duration(_), _) | (_, Value::Duration(_)) = (&l, &r) {
            return self.duration_op(op, l, r, span);
        }

        match (l, r) {
            (
                Value::Number {
                    magnitude: m1,
                    unit: u1,
                },
                Value::Number {
                    magnitude: m2,
                    unit: u2,
                },
            ) => self.numeric_op(op, m1, u1, m2, u2, span),

            (Value::Percent(p1), Value::Percent(p2)) => match op {
                Add => Ok(Value::Percent(p1 + p2)),
                Sub => Ok(Value::Percent(p1 - p2)),
                Mul | Of => Ok(Value::Percent(p1 * p2 / 100.0)),
                Div => {
                    if p2 == 0.0 {
                        return Err(RuntimeError::division_by_zero(span));
                    }
                    Ok(Value::plain(p1 / p2))
                }
                _ => Err(type_error(op, "percentage", "percentage", span)),
            },

            // `100 + 10%` applies the percentage to the left operand.
            (Value::Number { magnitude, unit }, Value::Percent(p)) => {
                let scaled = match op {
                    Add => magnitude * (1.0 + p / 100.0),
                    Sub => magnitude * (1.0 - p / 100.0),
                    Mul | Of => magnitude * p / 100.0,
                    Div => {
                        if p == 0.0 {
                            return Err(RuntimeError::division_by_zero(span));
                        }
                        magnitude / (p / 100.0)
                    }
                    _ => return Err(type_error(op, "number", "percentage", span)),
                };
                Ok(Value::Number {
                    magnitude: scaled,
                    unit,
                })
            }

            // A leading percentage acts as its fractional value.
            (Value::Percent(p), Value::Number { magnitude, unit }) => self.numeric_op(
                op,
                p / 100.0,
                DerivedUnit::dimensionless(),
                magnitude,
                unit,
                span,
            ),

            (Value::Currency { amount, code }, Value::Percent(p)) => {
                let scaled = match op {
                    Add => amount * (1.0 + p / 100.0),
                    Sub => amount * (1.0 - p / 100.0),
                    Mul | Of => amount * p / 100.0,
                    _ => return Err(type_error(op, "currency amount", "percentage", span)),
                };
                Ok(Value::Currency {
                    amount: scaled,
                    code,
                })
            }
            (Value::Percent(p), Value::Currency { amount, code }) => match op {
                Mul | Of => Ok(Value::Currency {
                    amount: p / 100.0 * amount,
                    code,
                }),
                _ => Err(type_error(op, "percentage", "currency amount", span)),
            },

            (
                Value::Currency {
                    amount: a1,
                    code: c1,
                },
                Value::Currency {
                    amount: a2,
                    code: c2,
                },
            ) => {
                if c1 != c2 {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        format!(
                            "cannot mix {} and {} without an explicit conversion",
                            currency_display(self.data, &c1),
                            currency_display(self.data, &c2)
                        ),
                    ));
                }
                match op {
                    Add => Ok(Value::Currency {
                        amount: a1 + a2,
                        code: c1,
                    }),
                    Sub => Ok(Value::Currency {
                        amount: a1 - a2,
                        code: c1,
                    }),
                    Div => {
                        if a2 == 0.0 {
                            return Err(RuntimeError::division_by_zero(span));
                        }
                        Ok(Value::plain(a1 / a2))
                    }
                    _ => Err(type_error(op, "currency amount", "currency amount", span)),
                }
            }

            (Value::Currency { amount, code }, Value::Number { magnitude, unit })
                if unit.is_dimensionless() =>
            {
                match op {
                    Mul => Ok(Value::Currency {
                        amount: amount * magnitude,
                        code,
                    }),
                    Div => {
                        if magnitude == 0.0 {
                            return Err(RuntimeError::division_by_zero(span));
                        }
                        Ok(Value::Currency {
                            amount: amount / magnitude,
                            code,
                        })
                    }
                    // A bare number cannot be tagged with a currency.
                    Add | Sub => Err(RuntimeError::dimension_mismatch(
                        span,
                        "cannot combine a currency amount with a bare number",
                    )),
                    _ => Err(type_error(op, "currency amount", "number", span)),
                }
            }
            (Value::Number { magnitude, unit }, Value::Currency { amount, code })
                if unit.is_dimensionless() =>
            {
                match op {
                    Mul => Ok(Value::Currency {
                        amount: magnitude * amount,
                        code,
                    }),
                    Add | Sub => Err(RuntimeError::dimension_mismatch(
                        span,
                        "cannot combine a currency amount with a bare number",
                    )),
                    _ => Err(type_error(op, "number", "currency amount", span)),
                }
            }

            (l, r) => Err(type_error(op, l.shape(), r.shape(), span)),
        }
    }

    fn numeric_op(
        &self,
        op: BinaryOp,
        m1: f64,
        u1: DerivedUnit,
        m2: f64,
        u2: DerivedUnit,
        span: Span,
    ) -> EResult {
        use BinaryOp::*;
        match op {
            Add | Sub => {
                let sig1 = u1.signature(self.data);
                let sig2 = u2.signature(self.data);
                if sig1 != sig2 {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        format!(
                            "incompatible units: cannot {} {} and {}",
                            if op == Add { "add" } else { "subtract" },
                            self.describe_unit(&u1),
                            self.describe_unit(&u2)
                        ),
                    ));
                }
                // Absolute temperatures do not add; differences fall back
                // to the dimension's base unit.
                let a1 = u1
                    .as_single()
                    .is_some_and(|u| unit::is_affine(self.data, self.settings, u));
                let a2 = u2
                    .as_single()
                    .is_some_and(|u| unit::is_affine(self.data, self.settings, u));
                if a1 && a2 {
                    if op == Add {
                        return Err(RuntimeError::dimension_mismatch(
                            span,
                            "cannot add two absolute temperatures",
                        ));
                    }
                    let base = self.data.base_unit_of(
                        self.data.unit(u1.as_single().unwrap()).dimension,
                    );
                    let diff = self.quantity_to_base(m1, &u1) - self.quantity_to_base(m2, &u2);
                    return Ok(Value::Number {
                        magnitude: diff,
                        unit: DerivedUnit::single(base),
                    });
                }
                let b1 = self.quantity_to_base(m1, &u1);
                let b2 = self.quantity_to_base(m2, &u2);
                let combined = if op == Add { b1 + b2 } else { b1 - b2 };
                Ok(Value::Number {
                    magnitude: self.quantity_from_base(combined, &u1),
                    unit: u1,
                })
            }
            Mul | Of => {
                let (m2, u2) = self.align_to_left(&u1, m2, u2);
                Ok(Value::Number {
                    magnitude: m1 * m2,
                    unit: u1.multiply(&u2, self.data),
                })
            }
            Div => {
                let (m2, u2) = self.align_to_left(&u1, m2, u2);
                if m2 == 0.0 {
                    return Err(RuntimeError::division_by_zero(span));
                }
                Ok(Value::Number {
                    magnitude: m1 / m2,
                    unit: u1.divide(&u2, self.data),
                })
            }
            Mod => {
                if u1.signature(self.data) != u2.signature(self.data) {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        "modulo operands must share a dimension",
                    ));
                }
                let r = unit::convert_derived(self.data, self.settings, m2, &u2, &u1, span)?;
                if r == 0.0 {
                    return Err(RuntimeError::division_by_zero(span));
                }
                Ok(Value::Number {
                    magnitude: m1.rem_euclid(r),
                    unit: u1,
                })
            }
            Pow => {
                if !u2.is_dimensionless() {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        "exponent must be dimensionless",
                    ));
                }
                if u1.is_dimensionless() {
                    return Ok(Value::plain(m1.powf(m2)));
                }
                if m2.fract() == 0.0 && m2.abs() <= i32::MAX as f64 {
                    return Ok(Value::Number {
                        magnitude: m1.powi(m2 as i32),
                        unit: u1.pow(m2 as i32, self.data),
                    });
                }
                // Small-denominator rational exponents (unit roots) only.
                for den in 2..=6i32 {
                    let scaled = m2 * den as f64;
                    if (scaled - scaled.round()).abs() < 1e-9 {
                        if let Some(unit) =
                            u1.pow_rational(scaled.round() as i32, den, self.data)
                        {
                            return Ok(Value::Number {
                                magnitude: m1.powf(m2),
                                unit,
                            });
                        }
                    }
                }
                Err(RuntimeError::domain(
                    span,
                    "fractional power does not divide the unit's exponents",
                ))
            }
            _ => Err(type_error(op, "number", "number", span)),
        }
    }

    /// Sticky-left unit choice: express the right operand in the left
    /// operand's unit for every dimension the two sides share.
    fn align_to_left(&self, left: &DerivedUnit, m2: f64, u2: DerivedUnit) -> (f64, DerivedUnit) {
        let mut magnitude = m2;
        let mut terms = Vec::with_capacity(u2.terms().len());
        for term in u2.terms() {
            let dim = self.data.unit(term.unit).dimension;
            let preferred = left
                .terms()
                .iter()
                .find(|t| self.data.unit(t.unit).dimension == dim)
                .map(|t| t.unit);
            match preferred {
                Some(p) if p != term.unit => {
                    let from = unit::linear_factor(self.data, self.settings, term.unit);
                    let to = unit::linear_factor(self.data, self.settings, p);
                    magnitude *= (from / to).powi(term.exponent);
                    terms.push(UnitTerm {
                        unit: p,
                        exponent: term.exponent,
                    });
                }
                _ => terms.push(*term),
            }
        }
        (magnitude, DerivedUnit::from_terms(terms, self.data))
    }

    fn quantity_to_base(&self, m: f64, du: &DerivedUnit) -> f64 {
        match du.as_single() {
            Some(u) => unit::to_base(self.data, self.settings, m, u),
            None => m * unit::derived_factor(self.data, self.settings, du),
        }
    }

    fn quantity_from_base(&self, m: f64, du: &DerivedUnit) -> f64 {
        match du.as_single() {
            Some(u) => unit::from_base(self.data, self.settings, m, u),
            None => m / unit::derived_factor(self.data, self.settings, du),
        }
    }

    fn describe_unit(&self, du: &DerivedUnit) -> String {
        if du.is_dimensionless() {
            return "a plain number".to_string();
        }
        du.terms()
            .iter()
            .map(|t| {
                let sym = self.data.unit(t.unit).symbol();
                if t.exponent == 1 {
                    sym.to_string()
                } else {
                    format!("{sym}^{}", t.exponent)
                }
            })
            .collect::<Vec<_>>()
            .join("·")
    }

    fn compare(&self, op: BinaryOp, l: Value, r: Value, span: Span) -> EResult {
        use std::cmp::Ordering;
        let l = self.decompose(l);
        let r = self.decompose(r);
        let ord: Option<Ordering> = match (&l, &r) {
            (
                Value::Number {
                    magnitude: m1,
                    unit: u1,
                },
                Value::Number {
                    magnitude: m2,
                    unit: u2,
                },
            ) => {
                if u1.signature(self.data) != u2.signature(self.data) {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        "cannot compare incompatible units",
                    ));
                }
                self.quantity_to_base(*m1, u1)
                    .partial_cmp(&self.quantity_to_base(*m2, u2))
            }
            (Value::Percent(a), Value::Percent(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (
                Value::Currency {
                    amount: a1,
                    code: c1,
                },
                Value::Currency {
                    amount: a2,
                    code: c2,
                },
            ) => {
                if c1 != c2 {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        "cannot compare different currencies",
                    ));
                }
                a1.partial_cmp(a2)
            }
            (Value::Duration(a), Value::Duration(b)) => {
                a.approx_millis().partial_cmp(&b.approx_millis())
            }
            _ if l.is_temporal() && r.is_temporal() => {
                match (self.widen(&l), self.widen(&r)) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => None,
                }
            }
            _ => {
                return Err(RuntimeError::dimension_mismatch(
                    span,
                    format!("cannot compare {} and {}", l.shape(), r.shape()),
                ))
            }
        };

        let result = match (op, ord) {
            (BinaryOp::Eq, Some(o)) => o == Ordering::Equal,
            (BinaryOp::Ne, Some(o)) => o != Ordering::Equal,
            (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
            (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
            (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
            (BinaryOp::Ge, Some(o)) => o != Ordering::Less,
            // NaN comparisons: only `!=` holds.
            (BinaryOp::Ne, None) => true,
            (_, None) => false,
            (_, Some(_)) => false,
        };
        Ok(Value::Bool(result))
    }

    fn bitwise(&self, op: BinaryOp, l: Value, r: Value, span: Span) -> EResult {
        let a = integer_operand(&l, span)?;
        let b = integer_operand(&r, span)?;
        let out = match op {
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::Shl | BinaryOp::Shr => {
                if !(0..64).contains(&b) {
                    return Err(RuntimeError::new(
                        crate::error::RuntimeErrorKind::Overflow,
                        span,
                        format!("shift amount {b} out of range"),
                    ));
                }
                if op == BinaryOp::Shl {
                    a.wrapping_shl(b as u32)
                } else {
                    a >> b
                }
            }
            _ => unreachable!(),
        };
        Ok(Value::plain(out as f64))
    }

    // ---- temporal dispatch ---------------------------------------------

    fn to_duration(&self, v: &Value) -> Option<Duration> {
        match v {
            Value::Duration(d) => Some(*d),
            Value::Number { magnitude, unit } => {
                let single = unit.as_single()?;
                let u = self.data.unit(single);
                if self.data.dimension(u.dimension).id != "time" {
                    return None;
                }
                temporal::duration_from_unit(*magnitude, &u.id).or_else(|| {
                    let seconds =
                        unit::to_base(self.data, self.settings, *magnitude, single);
                    Some(Duration {
                        seconds,
                        ..Duration::default()
                    })
                })
            }
            _ => None,
        }
    }

    fn widen(&self, v: &Value) -> Option<chrono::NaiveDateTime> {
        match v {
            Value::Date(d) => Some(temporal::widen_date(*d)),
            Value::Time(t) => Some(temporal::widen_time(*t)),
            Value::DateTime(dt) => Some(*dt),
            Value::Instant(ms) => Some(temporal::datetime_from_instant(*ms)),
            Value::Zoned { date_time, zone } => Some(
                *date_time - chrono::Duration::milliseconds(temporal::zone_offset_millis(zone)),
            ),
            _ => None,
        }
    }

    fn add_duration(&self, v: &Value, dur: &Duration) -> Option<Value> {
        match v {
            Value::Date(d) => Some(match temporal::add_duration_to_date(*d, dur) {
                DateAddResult::Date(d) => Value::Date(d),
                DateAddResult::DateTime(dt) => Value::DateTime(dt),
            }),
            Value::Time(t) => Some(match temporal::add_duration_to_time(*t, dur) {
                TimeAddResult::Time(t) => Value::Time(t),
                TimeAddResult::DateTime(dt) => Value::DateTime(dt),
            }),
            Value::DateTime(dt) => {
                Some(Value::DateTime(temporal::add_duration_to_datetime(*dt, dur)))
            }
            Value::Instant(ms) => {
                let dt = temporal::datetime_from_instant(*ms);
                Some(Value::Instant(temporal::instant_from_datetime(
                    temporal::add_duration_to_datetime(dt, dur),
                )))
            }
            Value::Zoned { date_time, zone } => Some(Value::Zoned {
                date_time: temporal::add_duration_to_datetime(*date_time, dur),
                zone: zone.clone(),
            }),
            _ => None,
        }
    }

    fn temporal_op(&self, op: BinaryOp, l: Value, r: Value, span: Span) -> EResult {
        use BinaryOp::*;
        match op {
            Add => {
                // Date + Time pairs up into a date-time.
                match (&l, &r) {
                    (Value::Date(d), Value::Time(t)) | (Value::Time(t), Value::Date(d)) => {
                        return Ok(Value::DateTime(d.and_time(*t)));
                    }
                    _ => {}
                }
                if let Some(dur) = self.to_duration(&r) {
                    if let Some(out) = self.add_duration(&l, &dur) {
                        return Ok(out);
                    }
                }
                if let Some(dur) = self.to_duration(&l) {
                    if let Some(out) = self.add_duration(&r, &dur) {
                        return Ok(out);
                    }
                }
                if l.is_temporal() && r.is_temporal() {
                    return Err(RuntimeError::domain(
                        span,
                        format!("cannot add {} and {}", l.shape(), r.shape()),
                    ));
                }
                Err(type_error(op, l.shape(), r.shape(), span))
            }
            Sub => {
                if l.is_temporal() && r.is_temporal() {
                    let (a, b) = match (self.widen(&l), self.widen(&r)) {
                        (Some(a), Some(b)) => (a, b),
                        _ => return Err(type_error(op, l.shape(), r.shape(), span)),
                    };
                    return Ok(Value::Duration(temporal::datetime_diff(a, b)));
                }
                if let Some(dur) = self.to_duration(&r) {
                    if let Some(out) = self.add_duration(&l, &dur.negated()) {
                        return Ok(out);
                    }
                }
                Err(type_error(op, l.shape(), r.shape(), span))
            }
            _ => Err(type_error(op, l.shape(), r.shape(), span)),
        }
    }

    fn duration_op(&self, op: BinaryOp, l: Value, r: Value, span: Span) -> EResult {
        use BinaryOp::*;
        match (l, r) {
            (Value::Duration(a), Value::Duration(b)) => match op {
                Add => Ok(Value::Duration(a.plus(&b))),
                Sub => Ok(Value::Duration(a.plus(&b.negated()))),
                Div => {
                    let denom = b.approx_millis();
                    if denom == 0.0 {
                        return Err(RuntimeError::division_by_zero(span));
                    }
                    Ok(Value::plain(a.approx_millis() / denom))
                }
                _ => Err(type_error(op, "duration", "duration", span)),
            },
            (Value::Duration(a), Value::Number { magnitude, unit })
                if unit.is_dimensionless() =>
            {
                match op {
                    Mul => Ok(Value::Duration(a.scaled(magnitude))),
                    Div => {
                        if magnitude == 0.0 {
                            return Err(RuntimeError::division_by_zero(span));
                        }
                        Ok(Value::Duration(a.scaled(1.0 / magnitude)))
                    }
                    _ => Err(type_error(op, "duration", "number", span)),
                }
            }
            (Value::Number { magnitude, unit }, Value::Duration(a))
                if unit.is_dimensionless() && op == Mul =>
            {
                Ok(Value::Duration(a.scaled(magnitude)))
            }
            // Duration +/- time quantity, via the duration register.
            (Value::Duration(a), other) if matches!(op, Add | Sub) => {
                let Some(b) = self.to_duration(&other) else {
                    return Err(type_error(op, "duration", other.shape(), span));
                };
                let b = if op == Sub { b.negated() } else { b };
                Ok(Value::Duration(a.plus(&b)))
            }
            (other, Value::Duration(b)) if matches!(op, Add | Sub) => {
                let Some(a) = self.to_duration(&other) else {
                    return Err(type_error(op, other.shape(), "duration", span));
                };
                let b = if op == Sub { b.negated() } else { b };
                Ok(Value::Duration(a.plus(&b)))
            }
            (l, r) => Err(type_error(op, l.shape(), r.shape(), span)),
        }
    }

    fn truthy(&self, v: &Value, span: Span) -> Result<bool, RuntimeError> {
        match v {
            Value::Bool(b) => Ok(*b),
            Value::Number { magnitude, .. } => Ok(*magnitude != 0.0),
            Value::Percent(p) => Ok(*p != 0.0),
            other => Err(RuntimeError::domain(
                span,
                format!("cannot use {} as a condition", other.shape()),
            )),
        }
    }

    // ---- conversion ----------------------------------------------------

    fn convert(&mut self, value: Value, target: &ConversionTarget, span: Span) -> EResult {
        match target {
            ConversionTarget::Presentation(fmt) => self.apply_presentation(value, *fmt, span),
            ConversionTarget::Unit(expr) => {
                let target = self.resolve_target(expr, span)?;
                self.convert_to(value, target, span)
            }
            ConversionTarget::CompositeUnits(names) => {
                let mut ids = Vec::with_capacity(names.len());
                for name in names {
                    let id = self.data.resolve_unit_name(name).ok_or_else(|| {
                        RuntimeError::invalid_conversion(
                            span,
                            format!("unknown unit `{name}`"),
                        )
                    })?;
                    ids.push(id);
                }
                let same_dim = ids
                    .windows(2)
                    .all(|w| self.data.unit(w[0]).dimension == self.data.unit(w[1]).dimension);
                if !same_dim {
                    // `to N m` is a derived-unit product, not a composite.
                    let du = DerivedUnit::from_terms(
                        ids.iter()
                            .map(|id| UnitTerm {
                                unit: *id,
                                exponent: 1,
                            })
                            .collect(),
                        self.data,
                    );
                    return self.convert_to(value, TargetUnit::Unit(du), span);
                }
                let (magnitude, du) = match value {
                    Value::Number { magnitude, unit } => (magnitude, unit),
                    other => {
                        return Err(RuntimeError::invalid_conversion(
                            span,
                            format!("cannot convert {} to a composite unit", other.shape()),
                        ))
                    }
                };
                let target_sig: DerivedUnit = DerivedUnit::single(ids[0]);
                if du.signature(self.data) != target_sig.signature(self.data) {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        "cannot convert between incompatible units",
                    ));
                }
                let base = self.quantity_to_base(magnitude, &du);
                let components =
                    unit::split_composite(self.data, self.settings, base, &ids);
                Ok(Value::Composite { components })
            }
            ConversionTarget::Timezone(name) => self.to_zoned(value, name, span),
        }
    }

    fn resolve_target(&self, expr: &Expr, span: Span) -> Result<TargetUnit, RuntimeError> {
        match expr {
            Expr::UnitRef { name, span } | Expr::Identifier { name, span } => {
                match self.resolve_attached(name, *span)? {
                    Attached::Unit(du) => Ok(TargetUnit::Unit(du)),
                    Attached::Currency(code) => Ok(TargetUnit::Currency(code)),
                }
            }
            Expr::Binary { op, lhs, rhs, span } => {
                let l = self.resolve_target(lhs, *span)?;
                match op {
                    BinaryOp::Mul | BinaryOp::Div => {
                        let r = self.resolve_target(rhs, *span)?;
                        match (l, r) {
                            (TargetUnit::Unit(a), TargetUnit::Unit(b)) => {
                                Ok(TargetUnit::Unit(if *op == BinaryOp::Mul {
                                    a.multiply(&b, self.data)
                                } else {
                                    a.divide(&b, self.data)
                                }))
                            }
                            _ => Err(RuntimeError::invalid_conversion(
                                *span,
                                "currencies cannot form derived units",
                            )),
                        }
                    }
                    BinaryOp::Pow => {
                        let k = match rhs.as_ref() {
                            Expr::Number { lexeme, .. } => lexeme
                                .replace('_', "")
                                .parse::<i32>()
                                .ok(),
                            _ => None,
                        }
                        .ok_or_else(|| {
                            RuntimeError::invalid_conversion(
                                *span,
                                "unit exponent must be an integer literal",
                            )
                        })?;
                        match l {
                            TargetUnit::Unit(du) => {
                                Ok(TargetUnit::Unit(du.pow(k, self.data)))
                            }
                            TargetUnit::Currency(_) => Err(RuntimeError::invalid_conversion(
                                *span,
                                "currencies cannot form derived units",
                            )),
                        }
                    }
                    _ => Err(RuntimeError::invalid_conversion(
                        *span,
                        "invalid conversion target",
                    )),
                }
            }
            _ => Err(RuntimeError::invalid_conversion(
                span,
                "invalid conversion target",
            )),
        }
    }

    fn convert_to(&self, value: Value, target: TargetUnit, span: Span) -> EResult {
        match (value, target) {
            (Value::Number { magnitude, unit }, TargetUnit::Unit(du)) => {
                let converted = unit::convert_derived(
                    self.data,
                    self.settings,
                    magnitude,
                    &unit,
                    &du,
                    span,
                )?;
                Ok(Value::Number {
                    magnitude: converted,
                    unit: du,
                })
            }
            (Value::Composite { components }, TargetUnit::Unit(du)) => {
                let base: f64 = components
                    .iter()
                    .map(|(m, id)| unit::to_base(self.data, self.settings, *m, *id))
                    .sum();
                let magnitude = self.quantity_from_base(base, &du);
                let from_sig = components
                    .first()
                    .map(|(_, id)| DerivedUnit::single(*id).signature(self.data));
                if from_sig != Some(du.signature(self.data)) {
                    return Err(RuntimeError::dimension_mismatch(
                        span,
                        "cannot convert between incompatible units",
                    ));
                }
                Ok(Value::Number {
                    magnitude,
                    unit: du,
                })
            }
            (Value::Duration(d), TargetUnit::Unit(du)) => {
                let time_dim = self.data.dim_by_id("time");
                let sig = du.signature(self.data);
                let is_time = time_dim
                    .map(|t| sig.len() == 1 && sig.get(&t) == Some(&1))
                    .unwrap_or(false);
                if !is_time {
                    return Err(RuntimeError::invalid_conversion(
                        span,
                        "durations convert to time units only",
                    ));
                }
                let seconds = d.approx_millis() / 1000.0;
                Ok(Value::Number {
                    magnitude: self.quantity_from_base(seconds, &du),
                    unit: du,
                })
            }
            (Value::Currency { amount, code }, TargetUnit::Currency(tcode)) => {
                let from = self
                    .data
                    .currencies()
                    .resolve_code(&code)
                    .ok_or_else(|| RuntimeError::currency_unavailable(span, &code))?
                    .to_string();
                let to = self
                    .data
                    .currencies()
                    .resolve_code(&tcode)
                    .ok_or_else(|| RuntimeError::currency_unavailable(span, &tcode))?
                    .to_string();
                let rates = self.rates.ok_or_else(|| {
                    RuntimeError::currency_unavailable(span, &to)
                })?;
                let converted = rates.convert(amount, &from, &to).ok_or_else(|| {
                    RuntimeError::currency_unavailable(span, &to)
                })?;
                Ok(Value::Currency {
                    amount: converted,
                    code: to,
                })
            }
            (v, TargetUnit::Currency(code)) => Err(RuntimeError::invalid_conversion(
                span,
                format!("cannot convert {} to {}", v.shape(), code),
            )),
            (v, TargetUnit::Unit(du)) => Err(RuntimeError::invalid_conversion(
                span,
                format!("cannot convert {} to {}", v.shape(), self.describe_unit(&du)),
            )),
        }
    }

    fn apply_presentation(
        &self,
        value: Value,
        fmt: PresentationFormat,
        span: Span,
    ) -> EResult {
        use PresentationFormat::*;
        let ok = match fmt {
            Binary | Octal | Hex | Base(_) | Ordinal => match &value {
                Value::Number { magnitude, unit } => {
                    if !unit.is_dimensionless() {
                        return Err(RuntimeError::invalid_conversion(
                            span,
                            "base presentations apply to plain numbers",
                        ));
                    }
                    if !magnitude.is_finite() || magnitude.fract() != 0.0 {
                        return Err(RuntimeError::domain(
                            span,
                            "base presentations require an integer",
                        ));
                    }
                    true
                }
                _ => false,
            },
            Fraction | Scientific => matches!(
                &value,
                Value::Number { unit, .. } if unit.is_dimensionless()
            ),
            Iso8601 | Rfc9557 | Rfc2822 | Unix | UnixMillis => value.is_temporal(),
        };
        if !ok {
            return Err(RuntimeError::invalid_conversion(
                span,
                format!("cannot present {} in that format", value.shape()),
            ));
        }
        Ok(value.with_format(Some(fmt)))
    }

    fn to_zoned(&self, value: Value, name: &str, span: Span) -> EResult {
        let country = self.settings.locale_country();
        let iana = match self.data.timezones().resolve(name, &country) {
            Some(iana) => iana.to_string(),
            None if name.contains('/') => name.to_string(),
            None => {
                return Err(RuntimeError::invalid_conversion(
                    span,
                    format!("unknown timezone `{name}`"),
                ))
            }
        };
        let date_time = match &value {
            Value::Date(d) => temporal::widen_date(*d),
            Value::Time(t) => temporal::widen_time(*t),
            Value::DateTime(dt) => *dt,
            Value::Instant(ms) => temporal::datetime_from_instant(*ms),
            Value::Zoned { date_time, .. } => *date_time,
            other => {
                return Err(RuntimeError::invalid_conversion(
                    span,
                    format!("cannot convert {} to a timezone", other.shape()),
                ))
            }
        };
        Ok(Value::Zoned {
            date_time,
            zone: iana,
        })
    }
}

fn currency_display(data: &DataSet, code: &str) -> String {
    if CurrencyTable::is_ambiguous_code(code) {
        data.currencies()
            .symbol_for_dimension(code)
            .unwrap_or(code)
            .to_string()
    } else {
        code.to_string()
    }
}

fn integer_operand(v: &Value, span: Span) -> Result<i64, RuntimeError> {
    match v {
        Value::Number { magnitude, unit }
            if unit.is_dimensionless() && magnitude.fract() == 0.0 && magnitude.is_finite() =>
        {
            Ok(*magnitude as i64)
        }
        other => Err(RuntimeError::domain(
            span,
            format!("bitwise operations expect integers, got {}", other.shape()),
        )),
    }
}

fn type_error(op: BinaryOp, l: &str, r: &str, span: Span) -> RuntimeError {
    RuntimeError::domain(span, format!("cannot apply {op:?} to {l} and {r}"))
}

fn superscript_digit(c: char) -> Option<u32> {
    match c {
        '⁰' => Some(0),
        '¹' => Some(1),
        '²' => Some(2),
        '³' => Some(3),
        '⁴' => Some(4),
        '⁵' => Some(5),
        '⁶' => Some(6),
        '⁷' => Some(7),
        '⁸' => Some(8),
        '⁹' => Some(9),
        _ => None,
    }
}

/// `m²` -> ("m", 2); `s⁻¹` -> ("s", -1).
fn split_superscript(name: &str) -> Option<(&str, i32)> {
    let start = name
        .char_indices()
        .find(|(_, c)| *c == '⁻' || superscript_digit(*c).is_some())?
        .0;
    let (prefix, script) = name.split_at(start);
    if prefix.is_empty() {
        return None;
    }
    let mut chars = script.chars().peekable();
    let negative = chars.peek() == Some(&'⁻');
    if negative {
        chars.next();
    }
    let mut value: i32 = 0;
    let mut any = false;
    for c in chars {
        let d = superscript_digit(c)?;
        value = value.checked_mul(10)?.checked_add(d as i32)?;
        any = true;
    }
    if !any {
        return None;
    }
    Some((prefix, if negative { -value } else { value }))
}
