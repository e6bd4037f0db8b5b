use chrono::NaiveDateTime;

use crate::ast::PresentationFormat;
use crate::config::{GroupingSize, Settings, TimeFormat, UnitDisplayStyle};
use crate::currency::round_to_minor_units;
use crate::data::currencies::CurrencyTable;
use crate::data::DataSet;
use crate::temporal::{self, Duration};
use crate::unit::DerivedUnit;
use crate::value::Value;

/// Natural-precision cap: decimals rendered before trailing zeros are
/// trimmed.
const NATURAL_DECIMALS: usize = 10;
/// Magnitudes beyond these bounds render in scientific notation.
const SCI_UPPER: f64 = 1e15;
const SCI_LOWER: f64 = 1e-9;

/// Locale-sensitive rendering of evaluated values.
pub struct Formatter<'a> {
    data: &'a DataSet,
    settings: &'a Settings,
}

impl<'a> Formatter<'a> {
    pub fn new(data: &'a DataSet, settings: &'a Settings) -> Self {
        Self { data, settings }
    }

    pub fn format(&self, value: &Value) -> String {
        match value {
            Value::Presented { value, format } => self.format_presented(value, *format),
            Value::Number { magnitude, unit } => {
                let number = self.format_number(*magnitude);
                if unit.is_dimensionless() {
                    number
                } else {
                    format!("{number} {}", self.format_unit(unit))
                }
            }
            Value::Composite { components } => components
                .iter()
                .map(|(m, id)| {
                    format!(
                        "{} {}",
                        self.format_number(*m),
                        self.data.unit(*id).symbol()
                    )
                })
                .collect::<Vec<_>>()
                .join(" "),
            Value::Percent(p) => format!("{}%", self.format_number(*p)),
            Value::Bool(b) => b.to_string(),
            Value::Date(d) => d.format(&self.settings.date_format).to_string(),
            Value::Time(t) => t.format(self.time_pattern()).to_string(),
            Value::DateTime(dt) => self.format_datetime(*dt),
            Value::Instant(ms) => {
                format!(
                    "{} UTC",
                    self.format_datetime(temporal::datetime_from_instant(*ms))
                )
            }
            Value::Zoned { date_time, zone } => {
                format!("{} {}", self.format_datetime(*date_time), zone)
            }
            Value::Duration(d) => self.format_duration(d),
            Value::Currency { amount, code } => self.format_currency(*amount, code),
        }
    }

    // ---- numbers -------------------------------------------------------

    pub fn format_number(&self, x: f64) -> String {
        if x.is_nan() {
            return "NaN".to_string();
        }
        if x.is_infinite() {
            return if x < 0.0 { "-Infinity" } else { "Infinity" }.to_string();
        }

        let decimal = if self.settings.precision >= 0 {
            format!("{:.*}", self.settings.precision as usize, x)
        } else {
            let a = x.abs();
            if a != 0.0 && (a >= SCI_UPPER || a < SCI_LOWER) {
                return scientific(x);
            }
            let mut s = format!("{:.*}", NATURAL_DECIMALS, x);
            if s.contains('.') {
                while s.ends_with('0') {
                    s.pop();
                }
                if s.ends_with('.') {
                    s.pop();
                }
            }
            s
        };
        self.localize(&decimal)
    }

    /// Apply the decimal separator and digit grouping to a plain decimal
    /// string. The fractional part is never grouped.
    fn localize(&self, decimal: &str) -> String {
        let (int_part, frac_part) = match decimal.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (decimal, None),
        };
        let grouped = self.group_digits(int_part);
        match frac_part {
            Some(f) => format!("{grouped}{}{f}", self.settings.decimal_separator),
            None => grouped,
        }
    }

    fn group_digits(&self, int_part: &str) -> String {
        let sep = &self.settings.digit_grouping_separator;
        if sep.is_empty() || self.settings.digit_grouping_size == GroupingSize::Off {
            return int_part.to_string();
        }
        let (sign, digits) = match int_part.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", int_part),
        };
        if digits.len() <= 3 {
            return int_part.to_string();
        }

        // Group sizes from the right: 3/3/3..., 3/2/2... (Indian), or 4s.
        let mut groups: Vec<&str> = Vec::new();
        let mut rest = digits;
        let mut first = true;
        loop {
            let take = match self.settings.digit_grouping_size {
                GroupingSize::Three => 3,
                GroupingSize::Four => 4,
                GroupingSize::TwoThree => {
                    if first {
                        3
                    } else {
                        2
                    }
                }
                GroupingSize::Off => unreachable!(),
            };
            if rest.len() <= take {
                groups.push(rest);
                break;
            }
            let split = rest.len() - take;
            groups.push(&rest[split..]);
            rest = &rest[..split];
            first = false;
        }
        groups.reverse();
        format!("{sign}{}", groups.join(sep))
    }

    // ---- units ---------------------------------------------------------

    fn format_unit(&self, du: &DerivedUnit) -> String {
        let name_of = |unit_id| {
            let unit = self.data.unit(unit_id);
            match self.settings.unit_display_style {
                UnitDisplayStyle::Symbol => unit.symbol().to_string(),
                UnitDisplayStyle::Name => unit.long_name().to_string(),
            }
        };

        let numerator: Vec<String> = du
            .terms()
            .iter()
            .filter(|t| t.exponent > 0)
            .map(|t| power_suffix(&name_of(t.unit), t.exponent))
            .collect();
        let denominator: Vec<&crate::unit::UnitTerm> =
            du.terms().iter().filter(|t| t.exponent < 0).collect();

        let mut out = numerator.join("·");
        if denominator.len() == 1 && !out.is_empty() && denominator[0].exponent == -1 {
            out.push('/');
            out.push_str(&name_of(denominator[0].unit));
        } else {
            for t in denominator {
                if !out.is_empty() {
                    out.push('·');
                }
                out.push_str(&power_suffix(&name_of(t.unit), t.exponent));
            }
        }
        out
    }

    fn format_currency(&self, amount: f64, code: &str) -> String {
        let rounded = if self.settings.precision >= 0 {
            amount
        } else {
            round_to_minor_units(amount, self.data.currencies().minor_units(code))
        };
        if CurrencyTable::is_ambiguous_code(code) {
            let symbol = self
                .data
                .currencies()
                .symbol_for_dimension(code)
                .unwrap_or("?");
            return format!("{symbol}{}", self.format_number(rounded));
        }
        let minor = self.data.currencies().minor_units(code);
        let text = if self.settings.precision >= 0 {
            self.format_number(rounded)
        } else {
            self.localize(&format!("{:.*}", minor as usize, rounded))
        };
        format!("{text} {code}")
    }

    // ---- temporal ------------------------------------------------------

    fn time_pattern(&self) -> &'static str {
        match self.settings.time_format {
            TimeFormat::H12 => "%I:%M %p",
            TimeFormat::H23 => "%H:%M:%S",
        }
    }

    fn format_datetime(&self, dt: NaiveDateTime) -> String {
        match &self.settings.date_time_format {
            Some(fmt) => dt.format(fmt).to_string(),
            None => format!(
                "{} {}",
                dt.format(&self.settings.date_format),
                dt.format(self.time_pattern())
            ),
        }
    }

    fn format_duration(&self, d: &Duration) -> String {
        let fields = [
            (d.years, "yr"),
            (d.months, "mo"),
            (d.weeks, "wk"),
            (d.days, "d"),
            (d.hours, "h"),
            (d.minutes, "min"),
            (d.seconds, "s"),
            (d.millis, "ms"),
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter(|(v, _)| *v != 0.0)
            .map(|(v, suffix)| format!("{} {suffix}", self.format_number(*v)))
            .collect();
        if parts.is_empty() {
            "0 s".to_string()
        } else {
            parts.join(" ")
        }
    }

    // ---- presentation formats -------------------------------------------

    fn format_presented(&self, value: &Value, fmt: PresentationFormat) -> String {
        use PresentationFormat::*;
        match fmt {
            Binary => self.based(value, 2),
            Octal => self.based(value, 8),
            Hex => self.based(value, 16),
            Base(radix) => self.based(value, radix),
            Fraction => match value {
                Value::Number { magnitude, .. } => fraction(*magnitude),
                other => self.format(other),
            },
            Scientific => match value {
                Value::Number { magnitude, .. } => scientific(*magnitude),
                other => self.format(other),
            },
            Ordinal => match value {
                Value::Number { magnitude, .. } => ordinal(*magnitude),
                other => self.format(other),
            },
            Iso8601 | Rfc9557 | Rfc2822 | Unix | UnixMillis => self.temporal_presented(value, fmt),
        }
    }

    fn based(&self, value: &Value, radix: u32) -> String {
        let Value::Number { magnitude, .. } = value else {
            return self.format(value);
        };
        let negative = *magnitude < 0.0;
        let digits = to_radix(magnitude.abs() as u128, radix);
        let prefix = match radix {
            2 => "0b",
            8 => "0o",
            16 => "0x",
            _ => "",
        };
        format!("{}{prefix}{digits}", if negative { "-" } else { "" })
    }

    fn temporal_presented(&self, value: &Value, fmt: PresentationFormat) -> String {
        let (dt, zone) = match value {
            Value::Date(d) => {
                if fmt == PresentationFormat::Iso8601 {
                    return d.format("%Y-%m-%d").to_string();
                }
                (temporal::widen_date(*d), None)
            }
            Value::Time(t) => {
                if fmt == PresentationFormat::Iso8601 {
                    return t.format("%H:%M:%S").to_string();
                }
                (temporal::widen_time(*t), None)
            }
            Value::DateTime(dt) => (*dt, None),
            Value::Instant(ms) => (temporal::datetime_from_instant(*ms), None),
            Value::Zoned { date_time, zone } => (*date_time, Some(zone.as_str())),
            other => return self.format(other),
        };
        match fmt {
            PresentationFormat::Iso8601 => {
                let base = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
                match zone {
                    Some(_) => format!("{base}+00:00"),
                    None => base,
                }
            }
            PresentationFormat::Rfc9557 => {
                let base = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
                match zone {
                    Some(z) => format!("{base}+00:00[{z}]"),
                    None => format!("{base}+00:00"),
                }
            }
            PresentationFormat::Rfc2822 => {
                format!("{} +0000", dt.format("%a, %d %b %Y %H:%M:%S"))
            }
            PresentationFormat::Unix => {
                (temporal::instant_from_datetime(dt) / 1000).to_string()
            }
            PresentationFormat::UnixMillis => temporal::instant_from_datetime(dt).to_string(),
            _ => unreachable!(),
        }
    }
}

fn power_suffix(name: &str, exponent: i32) -> String {
    if exponent == 1 {
        return name.to_string();
    }
    format!("{name}{}", superscript(exponent))
}

fn superscript(n: i32) -> String {
    const DIGITS: [char; 10] = ['⁰', '¹', '²', '³', '⁴', '⁵', '⁶', '⁷', '⁸', '⁹'];
    let mut out = String::new();
    if n < 0 {
        out.push('⁻');
    }
    let digits = n.unsigned_abs().to_string();
    for c in digits.chars() {
        out.push(DIGITS[c.to_digit(10).unwrap() as usize]);
    }
    out
}

fn scientific(x: f64) -> String {
    format!("{x:e}")
}

fn to_radix(mut n: u128, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        let d = (n % radix as u128) as u32;
        digits.push(char::from_digit(d, radix).unwrap_or('?'));
        n /= radix as u128;
    }
    digits.iter().rev().collect()
}

/// Best small rational for `x` by continued-fraction expansion.
fn fraction(x: f64) -> String {
    if !x.is_finite() {
        return scientific(x);
    }
    if x.fract() == 0.0 {
        return format!("{}", x as i64);
    }
    let negative = x < 0.0;
    let mut value = x.abs();
    let (mut p0, mut q0, mut p1, mut q1) = (0i64, 1i64, 1i64, 0i64);
    for _ in 0..40 {
        let a = value.floor() as i64;
        let p2 = a * p1 + p0;
        let q2 = a * q1 + q0;
        if q2 > 1_000_000 {
            break;
        }
        (p0, q0, p1, q1) = (p1, q1, p2, q2);
        let rem = value - a as f64;
        if rem.abs() < 1e-12 || (p1 as f64 / q1 as f64 - x.abs()).abs() < 1e-12 {
            break;
        }
        value = 1.0 / rem;
    }
    let sign = if negative { "-" } else { "" };
    format!("{sign}{p1}/{q1}")
}

fn ordinal(x: f64) -> String {
    let n = x as i64;
    let suffix = match (n.abs() % 100, n.abs() % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImperialVariant;
    use chrono::{NaiveDate, NaiveTime};

    fn fmt_with(settings: Settings, v: &Value) -> String {
        let data = DataSet::with_defaults().unwrap();
        Formatter::new(&data, &settings).format(v)
    }

    fn fmt(v: &Value) -> String {
        fmt_with(Settings::default(), v)
    }

    #[test]
    fn natural_precision_trims_zeros() {
        assert_eq!(fmt(&Value::plain(4.0)), "4");
        assert_eq!(fmt(&Value::plain(5.2)), "5.2");
        assert_eq!(fmt(&Value::plain(0.1 + 0.2)), "0.3");
        assert_eq!(fmt(&Value::plain(f64::INFINITY)), "Infinity");
    }

    #[test]
    fn fixed_precision_and_separators() {
        let mut s = Settings::default();
        s.precision = 2;
        assert_eq!(fmt_with(s.clone(), &Value::plain(1234.5)), "1,234.50");

        s.decimal_separator = ',';
        s.digit_grouping_separator = ".".to_string();
        assert_eq!(fmt_with(s, &Value::plain(1234.5)), "1.234,50");
    }

    #[test]
    fn grouping_patterns() {
        let mut s = Settings::default();
        s.digit_grouping_size = GroupingSize::TwoThree;
        assert_eq!(fmt_with(s.clone(), &Value::plain(1234567.0)), "12,34,567");
        s.digit_grouping_size = GroupingSize::Four;
        assert_eq!(fmt_with(s.clone(), &Value::plain(1234567.0)), "123,4567");
        s.digit_grouping_size = GroupingSize::Off;
        assert_eq!(fmt_with(s, &Value::plain(1234567.0)), "1234567");
    }

    #[test]
    fn scientific_beyond_threshold() {
        assert_eq!(fmt(&Value::plain(1e18)), "1e18");
        assert_eq!(fmt(&Value::plain(2.5e-12)), "2.5e-12");
    }

    #[test]
    fn unit_rendering() {
        let data = DataSet::with_defaults().unwrap();
        let settings = Settings::default();
        let km = data.unit_by_id("kilometer").unwrap();
        let h = data.unit_by_id("hour").unwrap();
        let speed = DerivedUnit::single(km).divide(&DerivedUnit::single(h), &data);
        let v = Value::Number {
            magnitude: 30.0,
            unit: speed,
        };
        assert_eq!(Formatter::new(&data, &settings).format(&v), "30 km/h");

        let m = data.unit_by_id("meter").unwrap();
        let area = DerivedUnit::single(m).pow(2, &data);
        let v = Value::Number {
            magnitude: 6.0,
            unit: area,
        };
        assert_eq!(Formatter::new(&data, &settings).format(&v), "6 m²");
    }

    #[test]
    fn currency_rendering() {
        let v = Value::Currency {
            amount: 85.0,
            code: "EUR".to_string(),
        };
        assert_eq!(fmt(&v), "85.00 EUR");

        let v = Value::Currency {
            amount: 110.4,
            code: "JPY".to_string(),
        };
        assert_eq!(fmt(&v), "110 JPY");

        let v = Value::Currency {
            amount: 100.0,
            code: "currency_symbol_0024".to_string(),
        };
        assert_eq!(fmt(&v), "$100");
    }

    #[test]
    fn date_rendering_includes_weekday() {
        let v = Value::Date(NaiveDate::from_ymd_opt(1970, 2, 28).unwrap());
        assert_eq!(fmt(&v), "1970-02-28 Sat");
    }

    #[test]
    fn time_honors_h12() {
        let mut s = Settings::default();
        s.time_format = TimeFormat::H12;
        let v = Value::Time(NaiveTime::from_hms_opt(22, 30, 0).unwrap());
        assert_eq!(fmt_with(s, &v), "10:30 PM");
    }

    #[test]
    fn presentation_formats() {
        let v = Value::plain(8.0).with_format(Some(PresentationFormat::Binary));
        assert_eq!(fmt(&v), "0b1000");
        let v = Value::plain(255.0).with_format(Some(PresentationFormat::Hex));
        assert_eq!(fmt(&v), "0xff");
        let v = Value::plain(1.25).with_format(Some(PresentationFormat::Fraction));
        assert_eq!(fmt(&v), "5/4");
        let v = Value::plain(23.0).with_format(Some(PresentationFormat::Ordinal));
        assert_eq!(fmt(&v), "23rd");
        let v = Value::plain(11.0).with_format(Some(PresentationFormat::Ordinal));
        assert_eq!(fmt(&v), "11th");
    }

    #[test]
    fn temporal_presentations() {
        let dt = NaiveDate::from_ymd_opt(1970, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let v = Value::DateTime(dt).with_format(Some(PresentationFormat::Iso8601));
        assert_eq!(fmt(&v), "1970-01-02T03:04:05");
        let v = Value::DateTime(dt).with_format(Some(PresentationFormat::Unix));
        assert_eq!(fmt(&v), "97445");
        let v = Value::Zoned {
            date_time: dt,
            zone: "Etc/UTC".to_string(),
        }
        .with_format(Some(PresentationFormat::Rfc9557));
        assert_eq!(fmt(&v), "1970-01-02T03:04:05+00:00[Etc/UTC]");
    }

    #[test]
    fn duration_rendering() {
        let d = Duration {
            days: 1.0,
            hours: 4.0,
            minutes: 30.0,
            ..Duration::default()
        };
        assert_eq!(fmt(&Value::Duration(d)), "1 d 4 h 30 min");
    }

    #[test]
    fn variant_units_do_not_affect_formatting() {
        let mut s = Settings::default();
        s.imperial_units = ImperialVariant::Uk;
        let data = DataSet::with_defaults().unwrap();
        let gal = data.unit_by_id("gallon").unwrap();
        let v = Value::with_single_unit(1.0, gal);
        assert_eq!(Formatter::new(&data, &s).format(&v), "1 gal");
    }
}
