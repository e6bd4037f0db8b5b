//! End-to-end scenarios through the public `calculate` entry point.

use rand::rngs::StdRng;
use rand::SeedableRng;
use reckon::{Calculator, ExchangeRates};

fn calc() -> Calculator {
    let mut c = Calculator::with_defaults().unwrap();
    c.set_rng(StdRng::seed_from_u64(1234));
    c
}

fn calc_with_rates() -> Calculator {
    let mut c = calc();
    c.load_exchange_rates(
        ExchangeRates::from_json(
            r#"{"date": "2026-08-01", "usd": {"eur": 0.85, "gbp": 0.73, "jpy": 110.0}}"#,
        )
        .unwrap(),
    );
    c
}

fn results(c: &mut Calculator, text: &str) -> Vec<Option<String>> {
    c.calculate(text)
        .results
        .into_iter()
        .map(|r| r.result)
        .collect()
}

fn first(c: &mut Calculator, text: &str) -> String {
    results(c, text).remove(0).expect("line produced no result")
}

#[test]
fn plain_addition() {
    let mut c = calc();
    let out = c.calculate("2 + 2");
    assert_eq!(out.results[0].result.as_deref(), Some("4"));
    assert!(!out.results[0].has_error);
    assert!(out.errors.is_empty());
}

#[test]
fn unit_addition_sticks_to_left_unit() {
    let mut c = calc();
    assert_eq!(first(&mut c, "5 m + 20 cm"), "5.2 m");
}

#[test]
fn derived_unit_division() {
    let mut c = calc();
    assert_eq!(first(&mut c, "60 km / 2 h"), "30 km/h");
}

#[test]
fn calendar_addition_clamps_to_month_end() {
    let mut c = calc();
    assert_eq!(first(&mut c, "1970 Jan 31 + 1 month"), "1970-02-28 Sat");
}

#[test]
fn currency_conversion_with_minor_units() {
    let mut c = calc_with_rates();
    assert_eq!(first(&mut c, "100 USD to EUR"), "85.00 EUR");
}

#[test]
fn variables_bind_in_order() {
    let mut c = calc();
    let out = c.calculate("x = 10\ny = 20\nx + y");
    let rendered: Vec<_> = out
        .results
        .iter()
        .map(|r| r.result.as_deref().unwrap())
        .collect();
    assert_eq!(rendered, vec!["10", "20", "30"]);
}

#[test]
fn error_line_does_not_stop_the_document() {
    let mut c = calc();
    let out = c.calculate("5 / 0\n10 + 5");
    assert!(out.results[0].has_error);
    assert_eq!(out.results[1].result.as_deref(), Some("15"));
    assert!(!out.results[1].has_error);
    assert_eq!(out.errors.runtime.len(), 1);
}

#[test]
fn round_to_nearest_multiple() {
    let mut c = calc();
    assert_eq!(first(&mut c, "round(6200 m, 5 km)"), "5 km");
}

#[test]
fn trig_with_explicit_angle_unit() {
    let mut c = calc();
    assert_eq!(first(&mut c, "sin(30 deg)"), "0.5");
}

#[test]
fn bitwise_with_binary_presentation() {
    let mut c = calc();
    assert_eq!(first(&mut c, "0b1010 & 0b1100 to binary"), "0b1000");
}

#[test]
fn composite_conversion_target() {
    let mut c = calc();
    let rendered = first(&mut c, "171 cm to ft in");
    assert!(rendered.starts_with("5 ft 7.32"), "got {rendered}");
    assert!(rendered.ends_with("in"));
}

#[test]
fn headings_and_comments_pass_through() {
    let mut c = calc();
    let out = c.calculate("# Groceries\n# budget for march\n2 + 3\n");
    assert_eq!(out.results[0].result, None);
    assert_eq!(out.results[0].line_type, reckon::LineType::Heading);
    assert_eq!(out.results[2].result.as_deref(), Some("5"));
}

#[test]
fn percent_arithmetic() {
    let mut c = calc();
    assert_eq!(first(&mut c, "100 + 10%"), "110");
    assert_eq!(first(&mut c, "10% of 50"), "5");
}

#[test]
fn conditionals() {
    let mut c = calc();
    assert_eq!(first(&mut c, "if 2 > 1 then 10 else 20"), "10");
    assert_eq!(first(&mut c, "if false then 10 else 20"), "20");
}

#[test]
fn seeded_random_is_reproducible() {
    let mut a = calc();
    let mut b = calc();
    assert_eq!(
        results(&mut a, "random(100)\nrandom(100)"),
        results(&mut b, "random(100)\nrandom(100)")
    );
}

#[test]
fn ambiguous_currency_symbol_renders_as_symbol() {
    let mut c = calc();
    assert_eq!(first(&mut c, "$100 + $20"), "$120");
}

#[test]
fn ambiguous_symbol_resolves_on_conversion() {
    let mut c = calc_with_rates();
    assert_eq!(first(&mut c, "$100 to EUR"), "85.00 EUR");
}

#[test]
fn time_of_day_arithmetic() {
    let mut c = calc();
    assert_eq!(first(&mut c, "10:30 + 2 h"), "12:30:00");
}

#[test]
fn datetime_minus_datetime_is_a_duration() {
    let mut c = calc();
    assert_eq!(
        first(&mut c, "1970 Feb 2 10:30 - 1970 Feb 1 6:00"),
        "1 d 4 h 30 min"
    );
}

#[test]
fn duration_to_unit_conversion() {
    let mut c = calc();
    assert_eq!(first(&mut c, "(1970 Feb 2 - 1970 Feb 1) to hours"), "24 h");
}

#[test]
fn timezone_conversion_renders_zone() {
    let mut c = calc();
    let rendered = first(&mut c, "1970 Jan 1 12:00 to UTC");
    assert!(rendered.contains("Etc/UTC"), "got {rendered}");
}

#[test]
fn unix_presentation() {
    let mut c = calc();
    assert_eq!(first(&mut c, "1970 Jan 2 to Unix"), "86400");
}

#[test]
fn factorial_postfix_and_overflow() {
    let mut c = calc();
    assert_eq!(first(&mut c, "5!"), "120");
    assert_eq!(first(&mut c, "200!"), "Infinity");
}

#[test]
fn imperial_variant_changes_gallons() {
    let mut us = calc();
    let us_liters = first(&mut us, "1 gal to L");

    let mut settings = reckon::Settings::default();
    settings.imperial_units = reckon::config::ImperialVariant::Uk;
    let mut uk = Calculator::with_settings(settings).unwrap();
    let uk_liters = first(&mut uk, "1 gal to L");

    assert!(us_liters.starts_with("3.78"), "got {us_liters}");
    assert!(uk_liters.starts_with("4.54"), "got {uk_liters}");
}

#[test]
fn lexer_error_is_recorded_and_isolated() {
    let mut c = calc();
    let out = c.calculate("2 @ 2\n1 + 1");
    assert_eq!(out.errors.lexer.len(), 1);
    let last = out.results.last().unwrap();
    assert_eq!(last.result.as_deref(), Some("2"));
}
