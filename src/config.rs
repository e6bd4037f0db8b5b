use std::fs;

use directories::ProjectDirs;
use serde::Deserialize;

/// Digit grouping pattern applied to the integer part, right to left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum GroupingSize {
    /// Groups of three: `1,234,567`.
    #[serde(rename = "3")]
    Three,
    /// Indian system: last three digits, then groups of two: `12,34,567`.
    #[serde(rename = "2-3")]
    TwoThree,
    /// Groups of four: `123,4567`.
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "off")]
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitDisplayStyle {
    Symbol,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    Radian,
    Degree,
}

/// Which variant row of a `variant` unit conversion applies (US vs UK
/// gallon and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImperialVariant {
    Us,
    Uk,
}

impl ImperialVariant {
    pub fn key(&self) -> &'static str {
        match self {
            ImperialVariant::Us => "us",
            ImperialVariant::Uk => "uk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TimeFormat {
    #[serde(rename = "h12")]
    H12,
    #[serde(rename = "h23")]
    H23,
}

/// Locale and rendering settings for one calculator instance. Installed
/// once and treated as an immutable snapshot for the lifetime of the
/// instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub decimal_separator: char,
    pub digit_grouping_separator: String,
    pub digit_grouping_size: GroupingSize,
    /// Fractional digits; -1 means "natural" (trim trailing zeros).
    pub precision: i32,
    pub unit_display_style: UnitDisplayStyle,
    pub angle_unit: AngleUnit,
    pub imperial_units: ImperialVariant,
    /// chrono format string for dates.
    pub date_format: String,
    pub time_format: TimeFormat,
    /// chrono format string for date-times; composed from `date_format`
    /// and `time_format` when unset.
    pub date_time_format: Option<String>,
    /// BCP-47 tag, used for timezone territory disambiguation.
    pub user_locale: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
            digit_grouping_separator: ",".to_string(),
            digit_grouping_size: GroupingSize::Three,
            precision: -1,
            unit_display_style: UnitDisplayStyle::Symbol,
            angle_unit: AngleUnit::Radian,
            imperial_units: ImperialVariant::Us,
            date_format: "%Y-%m-%d %a".to_string(),
            time_format: TimeFormat::H23,
            date_time_format: None,
            user_locale: "en-US".to_string(),
        }
    }
}

impl Settings {
    /// CLDR territory from the locale tag: "en-US" -> "US", "de" -> "".
    pub fn locale_country(&self) -> String {
        self.user_locale
            .split(['-', '_'])
            .nth(1)
            .map(|c| c.to_uppercase())
            .unwrap_or_default()
    }
}

/// CLI-side configuration file: calculator settings plus an optional path
/// to a JSON exchange-rate snapshot.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub settings: Option<Settings>,
    pub rates_file: Option<String>,
}

/// Read `config.toml` from the platform config dir. A missing file is
/// normal and yields the defaults; a file that fails to parse is reported
/// and otherwise ignored.
pub fn load_config() -> FileConfig {
    let path = match ProjectDirs::from("", "", "reckon") {
        Some(dirs) => dirs.config_dir().join("config.toml"),
        None => return FileConfig::default(),
    };

    fs::read_to_string(&path)
        .ok()
        .and_then(|data| {
            toml::from_str(&data)
                .inspect_err(|e| {
                    eprintln!("Warning: ignoring config {}: {}", path.display(), e);
                })
                .ok()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_country_variants() {
        let mut s = Settings::default();
        assert_eq!(s.locale_country(), "US");
        s.user_locale = "de".into();
        assert_eq!(s.locale_country(), "");
        s.user_locale = "en_GB".into();
        assert_eq!(s.locale_country(), "GB");
    }

    #[test]
    fn settings_from_toml() {
        let s: Settings = toml::from_str(
            r#"
            precision = 2
            digit_grouping_size = "2-3"
            angle_unit = "degree"
            imperial_units = "uk"
            time_format = "h12"
            "#,
        )
        .unwrap();
        assert_eq!(s.precision, 2);
        assert_eq!(s.digit_grouping_size, GroupingSize::TwoThree);
        assert_eq!(s.angle_unit, AngleUnit::Degree);
        assert_eq!(s.imperial_units, ImperialVariant::Uk);
        assert_eq!(s.time_format, TimeFormat::H12);
        assert_eq!(s.decimal_separator, '.');
    }
}
