use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::ast::PresentationFormat;
use crate::data::UnitId;
use crate::temporal::Duration;
use crate::unit::DerivedUnit;

/// Everything a line can evaluate to. Binary operations dispatch on the
/// pair of shapes; missing pairings are type errors, not panics.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number {
        magnitude: f64,
        unit: DerivedUnit,
    },
    /// Multi-component presentation of one scalar (`5 ft 7.3 in`); only
    /// produced by conversion to a composite target.
    Composite {
        components: Vec<(f64, UnitId)>,
    },
    /// `10%` — kept distinct so additive arithmetic can apply the
    /// percentage to the other operand.
    Percent(f64),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    /// Milliseconds since the Unix epoch.
    Instant(i64),
    Zoned {
        date_time: NaiveDateTime,
        zone: String,
    },
    Duration(Duration),
    Currency {
        amount: f64,
        /// ISO code, or a `currency_symbol_*` dimension id while the
        /// symbol stays ambiguous.
        code: String,
    },
    /// A value carrying a presentation override (`to binary`, `to
    /// fraction`, `to Unix`).
    Presented {
        value: Box<Value>,
        format: PresentationFormat,
    },
}

impl Value {
    pub fn plain(magnitude: f64) -> Value {
        Value::Number {
            magnitude,
            unit: DerivedUnit::dimensionless(),
        }
    }

    pub fn with_single_unit(magnitude: f64, unit: UnitId) -> Value {
        Value::Number {
            magnitude,
            unit: DerivedUnit::single(unit),
        }
    }

    /// Strip any presentation wrapper, returning the inner value and the
    /// format so operators can re-apply it to their result.
    pub fn take_format(self) -> (Value, Option<PresentationFormat>) {
        match self {
            Value::Presented { value, format } => (*value, Some(format)),
            other => (other, None),
        }
    }

    pub fn with_format(self, format: Option<PresentationFormat>) -> Value {
        match format {
            Some(format) => Value::Presented {
                value: Box::new(self),
                format,
            },
            None => self,
        }
    }

    /// Shape name for error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            Value::Number { unit, .. } if unit.is_dimensionless() => "number",
            Value::Number { .. } => "quantity",
            Value::Composite { .. } => "composite value",
            Value::Percent(_) => "percentage",
            Value::Bool(_) => "boolean",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "date-time",
            Value::Instant(_) => "instant",
            Value::Zoned { .. } => "zoned date-time",
            Value::Duration(_) => "duration",
            Value::Currency { .. } => "currency amount",
            Value::Presented { value, .. } => value.shape(),
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            Value::Date(_)
                | Value::Time(_)
                | Value::DateTime(_)
                | Value::Instant(_)
                | Value::Zoned { .. }
        )
    }
}
