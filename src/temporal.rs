use chrono::{Datelike, Duration as TimeDelta, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

pub const MS_PER_DAY: i64 = 86_400_000;
/// Fixed-length equivalents for fractional calendar fields.
pub const DAYS_PER_YEAR: f64 = 365.25;
pub const DAYS_PER_MONTH: f64 = 365.25 / 12.0;

/// Two-register duration: calendar fields (years through days) plus time
/// fields. Month and year addition is not reducible to a fixed number of
/// days, so the calendar fields stay symbolic until anchored to a date.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Duration {
    pub years: f64,
    pub months: f64,
    pub weeks: f64,
    pub days: f64,
    pub hours: f64,
    pub minutes: f64,
    pub seconds: f64,
    pub millis: f64,
}

impl Duration {
    pub fn has_date_fields(&self) -> bool {
        self.years != 0.0 || self.months != 0.0 || self.weeks != 0.0 || self.days != 0.0
    }

    pub fn has_time_fields(&self) -> bool {
        self.hours != 0.0 || self.minutes != 0.0 || self.seconds != 0.0 || self.millis != 0.0
    }

    pub fn is_zero(&self) -> bool {
        !self.has_date_fields() && !self.has_time_fields()
    }

    /// Milliseconds of the time register only.
    pub fn time_millis(&self) -> f64 {
        self.hours * 3_600_000.0 + self.minutes * 60_000.0 + self.seconds * 1_000.0 + self.millis
    }

    /// Total milliseconds with calendar fields reduced by the fixed
    /// 365.25-day equivalences. Only meaningful away from a date anchor.
    pub fn approx_millis(&self) -> f64 {
        let days = self.years * DAYS_PER_YEAR + self.months * DAYS_PER_MONTH + self.weeks * 7.0 + self.days;
        days * MS_PER_DAY as f64 + self.time_millis()
    }

    /// Decompose an exact millisecond span into the greatest time units
    /// that keep integer components (`1d 4h 30min`).
    pub fn from_millis(total: i64) -> Duration {
        let sign = if total < 0 { -1.0 } else { 1.0 };
        let mut ms = total.abs();
        let days = ms / MS_PER_DAY;
        ms %= MS_PER_DAY;
        let hours = ms / 3_600_000;
        ms %= 3_600_000;
        let minutes = ms / 60_000;
        ms %= 60_000;
        let seconds = ms / 1_000;
        ms %= 1_000;
        Duration {
            days: sign * days as f64,
            hours: sign * hours as f64,
            minutes: sign * minutes as f64,
            seconds: sign * seconds as f64,
            millis: sign * ms as f64,
            ..Duration::default()
        }
    }

    pub fn negated(&self) -> Duration {
        self.scaled(-1.0)
    }

    pub fn scaled(&self, k: f64) -> Duration {
        Duration {
            years: self.years * k,
            months: self.months * k,
            weeks: self.weeks * k,
            days: self.days * k,
            hours: self.hours * k,
            minutes: self.minutes * k,
            seconds: self.seconds * k,
            millis: self.millis * k,
        }
    }

    pub fn plus(&self, other: &Duration) -> Duration {
        Duration {
            years: self.years + other.years,
            months: self.months + other.months,
            weeks: self.weeks + other.weeks,
            days: self.days + other.days,
            hours: self.hours + other.hours,
            minutes: self.minutes + other.minutes,
            seconds: self.seconds + other.seconds,
            millis: self.millis + other.millis,
        }
    }
}

/// Map a time-dimension unit id to a duration with that single field set.
/// Units finer than a millisecond fold into the millisecond field.
pub fn duration_from_unit(magnitude: f64, unit_id: &str) -> Option<Duration> {
    let mut dur = Duration::default();
    match unit_id {
        "year" => dur.years = magnitude,
        "decade" => dur.years = magnitude * 10.0,
        "century" => dur.years = magnitude * 100.0,
        "month" => dur.months = magnitude,
        "week" => dur.weeks = magnitude,
        "day" => dur.days = magnitude,
        "hour" => dur.hours = magnitude,
        "minute" => dur.minutes = magnitude,
        "second" => dur.seconds = magnitude,
        "millisecond" => dur.millis = magnitude,
        "microsecond" => dur.millis = magnitude / 1_000.0,
        "nanosecond" => dur.millis = magnitude / 1_000_000.0,
        _ => return None,
    }
    Some(dur)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_y, next_m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_y, next_m, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(30)
}

/// Shift by whole months, clamping the day to the target month's length:
/// `Jan 31 + 1 month = Feb 28/29`, never `Mar 3`.
pub fn add_months_clamped(date: NaiveDate, months: i64) -> NaiveDate {
    let total = date.year() as i64 * 12 + date.month0() as i64 + months;
    let year = total.div_euclid(12) as i32;
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

/// Calendar addition in the fixed field order: years, months (with day
/// clamp), then weeks and days, then the time register with day overflow
/// folding back into the date.
pub fn add_duration_to_datetime(dt: NaiveDateTime, dur: &Duration) -> NaiveDateTime {
    let mut date = dt.date();

    let months_total = dur.years.trunc() as i64 * 12 + dur.months.trunc() as i64;
    if months_total != 0 {
        date = add_months_clamped(date, months_total);
    }

    let frac_days = dur.years.fract() * DAYS_PER_YEAR + dur.months.fract() * DAYS_PER_MONTH;
    let days_total = dur.weeks * 7.0 + dur.days + frac_days;
    date = date + TimeDelta::days(days_total.trunc() as i64);

    let extra_ms = days_total.fract() * MS_PER_DAY as f64 + dur.time_millis();
    date.and_time(dt.time()) + TimeDelta::milliseconds(extra_ms.round() as i64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateAddResult {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

pub fn add_duration_to_date(date: NaiveDate, dur: &Duration) -> DateAddResult {
    let midnight = NaiveTime::default();
    let dt = add_duration_to_datetime(date.and_time(midnight), dur);
    if !dur.has_time_fields() && dt.time() == midnight {
        DateAddResult::Date(dt.date())
    } else {
        DateAddResult::DateTime(dt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeAddResult {
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

/// Times wrap modulo 24h for sub-day shifts; anything larger (or any date
/// field) widens to a date-time anchored at the epoch date.
pub fn add_duration_to_time(time: NaiveTime, dur: &Duration) -> TimeAddResult {
    let delta = dur.time_millis();
    if !dur.has_date_fields() && delta.abs() < MS_PER_DAY as f64 {
        let since_midnight =
            time.signed_duration_since(NaiveTime::default()).num_milliseconds();
        let wrapped = (since_midnight + delta.round() as i64).rem_euclid(MS_PER_DAY);
        return TimeAddResult::Time(
            NaiveTime::default() + TimeDelta::milliseconds(wrapped),
        );
    }
    TimeAddResult::DateTime(add_duration_to_datetime(epoch_date().and_time(time), dur))
}

pub fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

/// Anchor used when a PlainTime is widened against a date-bearing value.
pub fn widen_time(time: NaiveTime) -> NaiveDateTime {
    epoch_date().and_time(time)
}

pub fn widen_date(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::default())
}

/// Exact difference of two date-times as a reduced duration.
pub fn datetime_diff(a: NaiveDateTime, b: NaiveDateTime) -> Duration {
    Duration::from_millis((a - b).num_milliseconds())
}

pub fn instant_from_datetime(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_millis()
}

pub fn datetime_from_instant(ms: i64) -> NaiveDateTime {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|d| d.naive_utc())
        .unwrap_or_else(|| widen_date(epoch_date()))
}

/// Offset applied when converting a zoned date-time to an instant. The
/// engine carries no offset table; every zone is UTC-equivalent. A real
/// table plugs in here.
pub fn zone_offset_millis(_iana: &str) -> i64 {
    0
}

pub fn month_from_word(word: &str) -> Option<u32> {
    let m = match word.to_lowercase().as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(m)
}

pub fn weekday_from_word(word: &str) -> Option<Weekday> {
    let d = match word.to_lowercase().as_str() {
        "mon" | "monday" => Weekday::Mon,
        "tue" | "tues" | "tuesday" => Weekday::Tue,
        "wed" | "wednesday" => Weekday::Wed,
        "thu" | "thur" | "thurs" | "thursday" => Weekday::Thu,
        "fri" | "friday" => Weekday::Fri,
        "sat" | "saturday" => Weekday::Sat,
        "sun" | "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(d)
}

/// Month or weekday word: the lexer turns these into DATETIME tokens.
pub fn is_datetime_word(word: &str) -> bool {
    month_from_word(word).is_some() || weekday_from_word(word).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_addition_clamps_day() {
        assert_eq!(add_months_clamped(date(1970, 1, 31), 1), date(1970, 2, 28));
        assert_eq!(add_months_clamped(date(2024, 1, 31), 1), date(2024, 2, 29));
        assert_eq!(add_months_clamped(date(1970, 1, 15), 1), date(1970, 2, 15));
        assert_eq!(add_months_clamped(date(1970, 12, 31), 2), date(1971, 2, 28));
        assert_eq!(add_months_clamped(date(1970, 3, 31), -1), date(1970, 2, 28));
    }

    #[test]
    fn date_plus_month_duration() {
        let dur = Duration {
            months: 1.0,
            ..Duration::default()
        };
        assert_eq!(
            add_duration_to_date(date(1970, 1, 31), &dur),
            DateAddResult::Date(date(1970, 2, 28))
        );
    }

    #[test]
    fn date_plus_time_fields_widens() {
        let dur = Duration {
            days: 1.0,
            hours: 4.0,
            minutes: 30.0,
            ..Duration::default()
        };
        let got = add_duration_to_date(date(2000, 3, 1), &dur);
        assert_eq!(
            got,
            DateAddResult::DateTime(
                date(2000, 3, 2).and_hms_opt(4, 30, 0).unwrap()
            )
        );
    }

    #[test]
    fn time_wraps_within_a_day() {
        let t = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let dur = Duration {
            hours: 2.0,
            ..Duration::default()
        };
        assert_eq!(
            add_duration_to_time(t, &dur),
            TimeAddResult::Time(NaiveTime::from_hms_opt(1, 0, 0).unwrap())
        );
    }

    #[test]
    fn duration_round_trip() {
        let a = date(2021, 2, 27).and_hms_opt(10, 15, 0).unwrap();
        let b = date(2021, 3, 2).and_hms_opt(9, 0, 30).unwrap();
        let diff = datetime_diff(b, a);
        assert_eq!(add_duration_to_datetime(a, &diff), b);
    }

    #[test]
    fn from_millis_reduces_to_largest_units() {
        let d = Duration::from_millis(MS_PER_DAY + 4 * 3_600_000 + 30 * 60_000);
        assert_eq!(d.days, 1.0);
        assert_eq!(d.hours, 4.0);
        assert_eq!(d.minutes, 30.0);
        assert_eq!(d.seconds, 0.0);
    }

    #[test]
    fn instant_conversion_is_utc() {
        let dt = date(1970, 1, 2).and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(instant_from_datetime(dt), MS_PER_DAY);
        assert_eq!(datetime_from_instant(MS_PER_DAY), dt);
    }
}
