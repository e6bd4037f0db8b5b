//! Cross-cutting invariants: per-line isolation, conversion round trips,
//! calendar clamping, tokenizer disambiguation.

use reckon::token::TokenKind;
use reckon::{Calculator, DataSet, ExchangeRates};

fn calc() -> Calculator {
    Calculator::with_defaults().unwrap()
}

fn first(c: &mut Calculator, text: &str) -> String {
    c.calculate(text).results.remove(0).result.unwrap()
}

#[test]
fn per_line_isolation_and_error_accounting() {
    let mut c = calc();
    let out = c.calculate("1 + 1\n5 / 0\n2 + 2\nunknown_var\n3 + 3");
    let flags: Vec<bool> = out.results.iter().map(|r| r.has_error).collect();
    assert_eq!(flags, vec![false, true, false, true, false]);
    assert_eq!(out.results[0].result.as_deref(), Some("2"));
    assert_eq!(out.results[2].result.as_deref(), Some("4"));
    assert_eq!(out.results[4].result.as_deref(), Some("6"));
    assert_eq!(out.errors.runtime.len(), 2);
    assert_eq!(out.errors.lexer.len() + out.errors.parser.len(), 0);
    assert_eq!(
        out.errors.total(),
        out.results.iter().filter(|r| r.has_error).count()
    );
}

#[test]
fn unit_conversion_round_trips() {
    let mut c = calc();
    for (expr, expected) in [
        ("12 km to mi to km", "12 km"),
        ("3.5 kg to lb to kg", "3.5 kg"),
        ("100 °C to °F to °C", "100 °C"),
        ("2 gal to L to gal", "2 gal"),
    ] {
        assert_eq!(first(&mut c, expr), expected, "for {expr}");
    }
}

#[test]
fn day_clamp_law() {
    let mut c = calc();
    // d <= len(next month): plain shift.
    assert_eq!(first(&mut c, "1970 Jan 15 + 1 month"), "1970-02-15 Sun");
    // d > len(next month): clamp, never roll over.
    assert_eq!(first(&mut c, "1970 Jan 31 + 1 month"), "1970-02-28 Sat");
    assert_eq!(first(&mut c, "2024 Jan 31 + 1 month"), "2024-02-29 Thu");
    assert_eq!(first(&mut c, "1970 Mar 31 + 1 month"), "1970-04-30 Thu");
    assert_eq!(first(&mut c, "1970 Dec 31 + 2 month"), "1971-02-28 Sun");
}

#[test]
fn duration_round_trip() {
    let mut c = calc();
    let out = c.calculate(
        "start = 1970 Jan 31 10:30\nfinish = 1973 Mar 3 14:45\nstart + (finish - start)",
    );
    assert!(out.errors.is_empty(), "{:?}", out.errors);
    assert_eq!(out.results[1].result, out.results[2].result);
}

#[test]
fn currency_round_trip_within_minor_units() {
    let mut c = calc();
    c.load_exchange_rates(
        ExchangeRates::from_json(
            r#"{"date": "2026-08-01", "usd": {"eur": 0.85, "jpy": 110.0}}"#,
        )
        .unwrap(),
    );
    assert_eq!(first(&mut c, "123.45 EUR to JPY to EUR"), "123.45 EUR");
    assert_eq!(first(&mut c, "42 USD to EUR to USD"), "42.00 USD");
}

#[test]
fn longest_match_tie_breaks() {
    let data = DataSet::with_defaults().unwrap();
    let meter = data.unit_by_id("meter").unwrap();
    let minute = data.unit_by_id("minute").unwrap();

    let m = data.find_longest_match("m").unwrap();
    assert_eq!((m.unit, m.length), (meter, 1));

    let min = data.find_longest_match("min").unwrap();
    assert_eq!((min.unit, min.length), (minute, 3));

    let meters = data.find_longest_match("meters").unwrap();
    assert_eq!((meters.unit, meters.length), (meter, 6));
}

#[test]
fn am_pm_disambiguation() {
    let data = DataSet::with_defaults().unwrap();

    let toks = reckon::lexer::tokenize("10 am", &data).tokens;
    assert_eq!(toks[0].kind, TokenKind::Number);
    assert_eq!(toks[1].kind, TokenKind::DateTime);

    let toks = reckon::lexer::tokenize("10.0 am", &data).tokens;
    assert_eq!(toks[1].kind, TokenKind::Unit);

    let toks = reckon::lexer::tokenize("13 am", &data).tokens;
    assert_eq!(toks[1].kind, TokenKind::Unit);
}

#[test]
fn composite_conversion_components() {
    let mut c = calc();
    let rendered = first(&mut c, "171 cm to ft in");
    let mut parts = rendered.split_whitespace();
    assert_eq!(parts.next(), Some("5"));
    assert_eq!(parts.next(), Some("ft"));
    let inches: f64 = parts.next().unwrap().parse().unwrap();
    assert!((inches - (171.0 / 2.54 - 60.0)).abs() < 1e-6);
}

#[test]
fn base_presentation_round_trips() {
    let mut c = calc();
    for n in [0u32, 1, 7, 42, 255, 4096] {
        for base in [2u32, 8, 16] {
            let rendered = first(&mut c, &format!("{n} to base {base}"));
            let check = first(&mut c, &format!("{rendered} == {n}"));
            assert_eq!(check, "true", "{n} in base {base} was {rendered}");
        }
    }
}
