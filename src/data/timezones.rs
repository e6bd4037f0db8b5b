use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TimezonesFile {
    pub timezones: Vec<TimezoneDef>,
}

#[derive(Debug, Deserialize)]
pub struct TimezoneDef {
    pub iana: String,
    pub names: Vec<TimezoneName>,
}

#[derive(Debug, Deserialize)]
pub struct TimezoneName {
    pub name: String,
    /// CLDR territory tag: a country code, `"001"` for world, or absent.
    pub territory: Option<String>,
}

#[derive(Debug, Clone)]
struct Candidate {
    iana: String,
    territory: Option<String>,
}

/// Case-insensitive name -> candidate IANA ids, disambiguated by the user
/// locale's territory.
#[derive(Debug, Default)]
pub struct TimezoneTable {
    by_name: HashMap<String, Vec<Candidate>>,
}

impl TimezoneTable {
    pub fn build(file: TimezonesFile) -> Self {
        let mut by_name: HashMap<String, Vec<Candidate>> = HashMap::new();
        for tz in file.timezones {
            for name in tz.names {
                by_name
                    .entry(name.name.to_lowercase())
                    .or_default()
                    .push(Candidate {
                        iana: tz.iana.clone(),
                        territory: name.territory,
                    });
            }
        }
        Self { by_name }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&name.to_lowercase())
    }

    /// Resolution priority: territory == `country`, then `"001"`, then an
    /// untagged entry, then the first entry.
    pub fn resolve(&self, name: &str, country: &str) -> Option<&str> {
        let candidates = self.by_name.get(&name.to_lowercase())?;
        let pick = candidates
            .iter()
            .find(|c| {
                c.territory
                    .as_deref()
                    .is_some_and(|t| !country.is_empty() && t.eq_ignore_ascii_case(country))
            })
            .or_else(|| {
                candidates
                    .iter()
                    .find(|c| c.territory.as_deref() == Some("001"))
            })
            .or_else(|| candidates.iter().find(|c| c.territory.is_none()))
            .or_else(|| candidates.first())?;
        Some(&pick.iana)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TimezoneTable {
        let file: TimezonesFile = serde_json::from_str(
            r#"{"timezones": [
                {"iana": "America/Chicago", "names": [{"name": "CST", "territory": "US"}]},
                {"iana": "Asia/Shanghai", "names": [{"name": "CST", "territory": "CN"}]},
                {"iana": "Etc/UTC", "names": [{"name": "UTC", "territory": "001"}]}
            ]}"#,
        )
        .unwrap();
        TimezoneTable::build(file)
    }

    #[test]
    fn territory_matches_locale_country() {
        let t = table();
        assert_eq!(t.resolve("cst", "CN"), Some("Asia/Shanghai"));
        assert_eq!(t.resolve("CST", "US"), Some("America/Chicago"));
    }

    #[test]
    fn falls_back_to_first_entry() {
        let t = table();
        assert_eq!(t.resolve("CST", "DE"), Some("America/Chicago"));
        assert_eq!(t.resolve("utc", ""), Some("Etc/UTC"));
        assert_eq!(t.resolve("nope", "US"), None);
    }
}
