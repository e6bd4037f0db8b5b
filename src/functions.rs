use rand::{Rng, RngCore};

use crate::config::{AngleUnit, Settings};
use crate::data::DataSet;
use crate::error::RuntimeError;
use crate::token::Span;
use crate::unit::{self, DerivedUnit};
use crate::value::Value;

/// Registry entry: lowercase name plus the accepted arity range.
pub struct FunctionDef {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
}

pub const FUNCTIONS: &[FunctionDef] = &[
    FunctionDef { name: "abs", min_args: 1, max_args: 1 },
    FunctionDef { name: "sqrt", min_args: 1, max_args: 1 },
    FunctionDef { name: "cbrt", min_args: 1, max_args: 1 },
    FunctionDef { name: "exp", min_args: 1, max_args: 1 },
    FunctionDef { name: "ln", min_args: 1, max_args: 1 },
    FunctionDef { name: "log", min_args: 1, max_args: 1 },
    FunctionDef { name: "log2", min_args: 1, max_args: 1 },
    FunctionDef { name: "log10", min_args: 1, max_args: 1 },
    FunctionDef { name: "round", min_args: 1, max_args: 2 },
    FunctionDef { name: "floor", min_args: 1, max_args: 2 },
    FunctionDef { name: "ceil", min_args: 1, max_args: 2 },
    FunctionDef { name: "trunc", min_args: 1, max_args: 2 },
    FunctionDef { name: "sin", min_args: 1, max_args: 1 },
    FunctionDef { name: "cos", min_args: 1, max_args: 1 },
    FunctionDef { name: "tan", min_args: 1, max_args: 1 },
    FunctionDef { name: "asin", min_args: 1, max_args: 1 },
    FunctionDef { name: "acos", min_args: 1, max_args: 1 },
    FunctionDef { name: "atan", min_args: 1, max_args: 1 },
    FunctionDef { name: "sinh", min_args: 1, max_args: 1 },
    FunctionDef { name: "cosh", min_args: 1, max_args: 1 },
    FunctionDef { name: "tanh", min_args: 1, max_args: 1 },
    FunctionDef { name: "asinh", min_args: 1, max_args: 1 },
    FunctionDef { name: "acosh", min_args: 1, max_args: 1 },
    FunctionDef { name: "atanh", min_args: 1, max_args: 1 },
    FunctionDef { name: "fact", min_args: 1, max_args: 1 },
    FunctionDef { name: "perm", min_args: 2, max_args: 2 },
    FunctionDef { name: "comb", min_args: 2, max_args: 2 },
    FunctionDef { name: "random", min_args: 0, max_args: 3 },
];

pub fn lookup(name: &str) -> Option<&'static FunctionDef> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Evaluation context handed to every function: datasets for unit work,
/// settings for the angle convention, and the injected RNG so tests can
/// seed `random`.
pub struct FnCtx<'a> {
    pub data: &'a DataSet,
    pub settings: &'a Settings,
    pub rng: &'a mut dyn RngCore,
}

pub fn apply(
    ctx: &mut FnCtx<'_>,
    name: &str,
    args: &[Value],
    span: Span,
) -> Result<Value, RuntimeError> {
    let def = lookup(name).ok_or_else(|| {
        RuntimeError::domain(span, format!("unknown function `{name}`"))
    })?;
    if args.len() < def.min_args || args.len() > def.max_args {
        let expected = if def.min_args == def.max_args {
            format!("{}", def.min_args)
        } else {
            format!("{} to {}", def.min_args, def.max_args)
        };
        return Err(RuntimeError::domain(
            span,
            format!("{name} expects {expected} argument(s), got {}", args.len()),
        ));
    }

    match name {
        "abs" => {
            let (x, du) = quantity(&args[0], name, span)?;
            Ok(Value::Number {
                magnitude: x.abs(),
                unit: du,
            })
        }
        "sqrt" => root(ctx, &args[0], 2, span),
        "cbrt" => root(ctx, &args[0], 3, span),
        "exp" => {
            let x = scalar(&args[0], name, span)?;
            Ok(Value::plain(x.exp()))
        }
        "ln" => log_fn(&args[0], f64::ln, "ln", span),
        "log" | "log10" => log_fn(&args[0], f64::log10, name, span),
        "log2" => log_fn(&args[0], f64::log2, "log2", span),
        "round" => rounding(ctx, args, f64::round, span),
        "floor" => rounding(ctx, args, f64::floor, span),
        "ceil" => rounding(ctx, args, f64::ceil, span),
        "trunc" => rounding(ctx, args, f64::trunc, span),
        "sin" => trig(ctx, &args[0], f64::sin, span),
        "cos" => trig(ctx, &args[0], f64::cos, span),
        "tan" => trig(ctx, &args[0], f64::tan, span),
        "asin" => inverse_trig(ctx, &args[0], f64::asin, |x| x.abs() <= 1.0, "asin", span),
        "acos" => inverse_trig(ctx, &args[0], f64::acos, |x| x.abs() <= 1.0, "acos", span),
        "atan" => inverse_trig(ctx, &args[0], f64::atan, |_| true, "atan", span),
        "sinh" => {
            let x = scalar(&args[0], name, span)?;
            Ok(Value::plain(x.sinh()))
        }
        "cosh" => {
            let x = scalar(&args[0], name, span)?;
            Ok(Value::plain(x.cosh()))
        }
        "tanh" => {
            let x = scalar(&args[0], name, span)?;
            Ok(Value::plain(x.tanh()))
        }
        "asinh" => {
            let x = scalar(&args[0], name, span)?;
            Ok(Value::plain(x.asinh()))
        }
        "acosh" => {
            let x = scalar(&args[0], name, span)?;
            if x < 1.0 {
                return Err(RuntimeError::domain(span, "acosh requires x >= 1"));
            }
            Ok(Value::plain(x.acosh()))
        }
        "atanh" => {
            let x = scalar(&args[0], name, span)?;
            if x.abs() >= 1.0 {
                return Err(RuntimeError::domain(span, "atanh requires |x| < 1"));
            }
            Ok(Value::plain(x.atanh()))
        }
        "fact" => {
            let x = scalar(&args[0], name, span)?;
            Ok(Value::plain(factorial(x, span)?))
        }
        "perm" => combinatoric(args, span, |n, k| {
            let mut acc = 1.0f64;
            let mut i = n - k + 1.0;
            while i <= n {
                acc *= i;
                i += 1.0;
            }
            acc
        }),
        "comb" => combinatoric(args, span, |n, k| {
            // Multiplicative form keeps intermediates small.
            let k = k.min(n - k);
            let mut acc = 1.0f64;
            let mut i = 1.0;
            while i <= k {
                acc = acc * (n - k + i) / i;
                i += 1.0;
            }
            acc
        }),
        "random" => random(ctx, args, span),
        _ => Err(RuntimeError::domain(
            span,
            format!("unknown function `{name}`"),
        )),
    }
}

/// n! for non-negative integers; large arguments overflow to `Infinity`
/// rather than erroring.
pub fn factorial(x: f64, span: Span) -> Result<f64, RuntimeError> {
    if x < 0.0 || x.fract() != 0.0 {
        return Err(RuntimeError::domain(
            span,
            "factorial requires a non-negative integer",
        ));
    }
    if x > 170.0 {
        return Ok(f64::INFINITY);
    }
    let mut acc = 1.0f64;
    let mut i = 2.0;
    while i <= x {
        acc *= i;
        i += 1.0;
    }
    Ok(acc)
}

fn quantity(v: &Value, name: &str, span: Span) -> Result<(f64, DerivedUnit), RuntimeError> {
    match v {
        Value::Number { magnitude, unit } => Ok((*magnitude, unit.clone())),
        other => Err(RuntimeError::domain(
            span,
            format!("{name} expects a number, got {}", other.shape()),
        )),
    }
}

fn scalar(v: &Value, name: &str, span: Span) -> Result<f64, RuntimeError> {
    match v {
        Value::Number { magnitude, unit } if unit.is_dimensionless() => Ok(*magnitude),
        Value::Percent(p) => Ok(p / 100.0),
        other => Err(RuntimeError::domain(
            span,
            format!("{name} expects a plain number, got {}", other.shape()),
        )),
    }
}

fn log_fn(
    v: &Value,
    f: fn(f64) -> f64,
    name: &str,
    span: Span,
) -> Result<Value, RuntimeError> {
    let x = scalar(v, name, span)?;
    if x <= 0.0 {
        return Err(RuntimeError::domain(
            span,
            format!("{name} requires a positive argument"),
        ));
    }
    Ok(Value::plain(f(x)))
}

fn root(ctx: &FnCtx<'_>, v: &Value, degree: i32, span: Span) -> Result<Value, RuntimeError> {
    let (x, du) = quantity(v, "root", span)?;
    if degree % 2 == 0 && x < 0.0 {
        return Err(RuntimeError::domain(span, "sqrt requires x >= 0"));
    }
    let magnitude = if degree == 2 { x.sqrt() } else { x.cbrt() };
    let unit = du.pow_rational(1, degree, ctx.data).ok_or_else(|| {
        RuntimeError::domain(span, "unit exponents do not divide evenly under this root")
    })?;
    Ok(Value::Number { magnitude, unit })
}

/// `round(x)` keeps x's unit. `round(x, m)` rounds x to the nearest
/// multiple of m; the operands must share a dimension and the result takes
/// m's unit.
fn rounding(
    ctx: &FnCtx<'_>,
    args: &[Value],
    f: fn(f64) -> f64,
    span: Span,
) -> Result<Value, RuntimeError> {
    let (x, x_unit) = quantity(&args[0], "round", span)?;
    if args.len() == 1 {
        return Ok(Value::Number {
            magnitude: f(x),
            unit: x_unit,
        });
    }
    let (m, m_unit) = quantity(&args[1], "round", span)?;
    if x_unit.signature(ctx.data) != m_unit.signature(ctx.data) {
        return Err(RuntimeError::dimension_mismatch(
            span,
            "round-to-nearest operands must share a dimension",
        ));
    }
    if m == 0.0 {
        return Err(RuntimeError::division_by_zero(span));
    }
    let x_base = x * unit::derived_factor(ctx.data, ctx.settings, &x_unit);
    let m_base = m * unit::derived_factor(ctx.data, ctx.settings, &m_unit);
    Ok(Value::Number {
        magnitude: f(x_base / m_base) * m,
        unit: m_unit,
    })
}

/// Inputs with an angle dimension convert to radians; plain numbers are
/// read in the configured angle mode.
fn angle_in_radians(ctx: &FnCtx<'_>, v: &Value, span: Span) -> Result<f64, RuntimeError> {
    match v {
        Value::Number { magnitude, unit } if unit.is_dimensionless() => {
            Ok(match ctx.settings.angle_unit {
                AngleUnit::Radian => *magnitude,
                AngleUnit::Degree => magnitude.to_radians(),
            })
        }
        Value::Number { magnitude, unit } => {
            let angle_dim = ctx
                .data
                .dim_by_id("angle")
                .ok_or_else(|| RuntimeError::domain(span, "no angle dimension loaded"))?;
            let sig = unit.signature(ctx.data);
            if sig.len() == 1 && sig.get(&angle_dim) == Some(&1) {
                Ok(*magnitude * unit::derived_factor(ctx.data, ctx.settings, unit))
            } else {
                Err(RuntimeError::dimension_mismatch(
                    span,
                    "trigonometric functions expect an angle",
                ))
            }
        }
        other => Err(RuntimeError::domain(
            span,
            format!("trigonometric functions expect an angle, got {}", other.shape()),
        )),
    }
}

fn trig(
    ctx: &FnCtx<'_>,
    v: &Value,
    f: fn(f64) -> f64,
    span: Span,
) -> Result<Value, RuntimeError> {
    let radians = angle_in_radians(ctx, v, span)?;
    Ok(Value::plain(f(radians)))
}

/// Inverse trig results carry the configured angle unit.
fn inverse_trig(
    ctx: &FnCtx<'_>,
    v: &Value,
    f: fn(f64) -> f64,
    domain: fn(f64) -> bool,
    name: &str,
    span: Span,
) -> Result<Value, RuntimeError> {
    let x = scalar(v, name, span)?;
    if !domain(x) {
        return Err(RuntimeError::domain(
            span,
            format!("{name} requires |x| <= 1"),
        ));
    }
    let radians = f(x);
    let unit_id = match ctx.settings.angle_unit {
        AngleUnit::Radian => "radian",
        AngleUnit::Degree => "degree",
    };
    match ctx.data.unit_by_id(unit_id) {
        Some(unit) => {
            let magnitude = match ctx.settings.angle_unit {
                AngleUnit::Radian => radians,
                AngleUnit::Degree => radians.to_degrees(),
            };
            Ok(Value::with_single_unit(magnitude, unit))
        }
        None => Ok(Value::plain(radians)),
    }
}

fn combinatoric(
    args: &[Value],
    span: Span,
    f: fn(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    let n = scalar(&args[0], "perm", span)?;
    let k = scalar(&args[1], "perm", span)?;
    if n < 0.0 || k < 0.0 || n.fract() != 0.0 || k.fract() != 0.0 {
        return Err(RuntimeError::domain(
            span,
            "perm/comb require non-negative integers",
        ));
    }
    if k > n {
        return Err(RuntimeError::domain(span, "perm/comb require k <= n"));
    }
    Ok(Value::plain(f(n, k)))
}

/// random() -> [0,1); random(max) -> integer in [0,max); random(min,max);
/// random(min,max,step) -> uniform over min, min+step, ... below max.
fn random(ctx: &mut FnCtx<'_>, args: &[Value], span: Span) -> Result<Value, RuntimeError> {
    match args.len() {
        0 => Ok(Value::plain(ctx.rng.random::<f64>())),
        1 => {
            let max = integer_arg(&args[0], span)?;
            if max <= 0 {
                return Err(RuntimeError::domain(span, "random(max) requires max > 0"));
            }
            Ok(Value::plain(ctx.rng.random_range(0..max) as f64))
        }
        2 => {
            let min = integer_arg(&args[0], span)?;
            let max = integer_arg(&args[1], span)?;
            if min >= max {
                return Err(RuntimeError::domain(
                    span,
                    "random(min, max) requires min < max",
                ));
            }
            Ok(Value::plain(ctx.rng.random_range(min..max) as f64))
        }
        _ => {
            let min = scalar(&args[0], "random", span)?;
            let max = scalar(&args[1], "random", span)?;
            let step = scalar(&args[2], "random", span)?;
            if step <= 0.0 || min >= max {
                return Err(RuntimeError::domain(
                    span,
                    "random(min, max, step) requires min < max and step > 0",
                ));
            }
            let count = ((max - min) / step).ceil() as i64;
            let k = ctx.rng.random_range(0..count.max(1));
            Ok(Value::plain(min + k as f64 * step))
        }
    }
}

fn integer_arg(v: &Value, span: Span) -> Result<i64, RuntimeError> {
    match v {
        Value::Number { magnitude, unit }
            if unit.is_dimensionless() && magnitude.fract() == 0.0 =>
        {
            Ok(*magnitude as i64)
        }
        other => Err(RuntimeError::domain(
            span,
            format!("random expects integer bounds, got {}", other.shape()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx<'a>(
        data: &'a DataSet,
        settings: &'a Settings,
        rng: &'a mut StdRng,
    ) -> FnCtx<'a> {
        FnCtx {
            data,
            settings,
            rng,
        }
    }

    fn call(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let data = DataSet::with_defaults().unwrap();
        let settings = Settings::default();
        let mut rng = StdRng::seed_from_u64(7);
        apply(&mut ctx(&data, &settings, &mut rng), name, args, Span::default())
    }

    fn plain(x: f64) -> Value {
        Value::plain(x)
    }

    #[test]
    fn domains_are_checked() {
        assert!(call("sqrt", &[plain(-1.0)]).is_err());
        assert!(call("ln", &[plain(0.0)]).is_err());
        assert!(call("asin", &[plain(1.5)]).is_err());
        assert!(call("acosh", &[plain(0.5)]).is_err());
        assert!(call("atanh", &[plain(1.0)]).is_err());
        assert!(call("sqrt", &[plain(4.0)]).is_ok());
    }

    #[test]
    fn arity_is_checked() {
        assert!(call("sin", &[]).is_err());
        assert!(call("round", &[plain(1.0), plain(2.0), plain(3.0)]).is_err());
    }

    #[test]
    fn round_to_nearest_multiple_takes_m_unit() {
        let data = DataSet::with_defaults().unwrap();
        let m = data.unit_by_id("meter").unwrap();
        let km = data.unit_by_id("kilometer").unwrap();
        let result = call(
            "round",
            &[
                Value::with_single_unit(6200.0, m),
                Value::with_single_unit(5.0, km),
            ],
        )
        .unwrap();
        let Value::Number { magnitude, unit } = result else { panic!() };
        assert_eq!(magnitude, 5.0);
        assert_eq!(unit.as_single(), Some(km));
    }

    #[test]
    fn factorial_and_combinatorics() {
        assert_eq!(call("fact", &[plain(5.0)]).unwrap(), plain(120.0));
        assert_eq!(call("perm", &[plain(5.0), plain(2.0)]).unwrap(), plain(20.0));
        assert_eq!(call("comb", &[plain(5.0), plain(2.0)]).unwrap(), plain(10.0));
        assert!(call("comb", &[plain(2.0), plain(5.0)]).is_err());
        // Overflow saturates to Infinity rather than failing.
        let Value::Number { magnitude, .. } = call("fact", &[plain(200.0)]).unwrap() else {
            panic!()
        };
        assert!(magnitude.is_infinite());
    }

    #[test]
    fn sqrt_reduces_square_units() {
        let data = DataSet::with_defaults().unwrap();
        let m = data.unit_by_id("meter").unwrap();
        let m2 = DerivedUnit::single(m).pow(2, &data);
        let result = call(
            "sqrt",
            &[Value::Number {
                magnitude: 9.0,
                unit: m2,
            }],
        )
        .unwrap();
        let Value::Number { magnitude, unit } = result else { panic!() };
        assert_eq!(magnitude, 3.0);
        assert_eq!(unit.as_single(), Some(m));
    }

    #[test]
    fn random_is_seeded_and_bounded() {
        let data = DataSet::with_defaults().unwrap();
        let settings = Settings::default();
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let va = apply(
            &mut ctx(&data, &settings, &mut a),
            "random",
            &[plain(10.0)],
            Span::default(),
        )
        .unwrap();
        let vb = apply(
            &mut ctx(&data, &settings, &mut b),
            "random",
            &[plain(10.0)],
            Span::default(),
        )
        .unwrap();
        assert_eq!(va, vb);
        let Value::Number { magnitude, .. } = va else { panic!() };
        assert!((0.0..10.0).contains(&magnitude));
    }

    #[test]
    fn trig_honors_degree_mode() {
        let data = DataSet::with_defaults().unwrap();
        let mut settings = Settings::default();
        settings.angle_unit = AngleUnit::Degree;
        let mut rng = StdRng::seed_from_u64(0);
        let v = apply(
            &mut ctx(&data, &settings, &mut rng),
            "sin",
            &[plain(30.0)],
            Span::default(),
        )
        .unwrap();
        let Value::Number { magnitude, .. } = v else { panic!() };
        assert!((magnitude - 0.5).abs() < 1e-12);
    }
}
