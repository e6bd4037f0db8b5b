use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::ast::{Document, Line};
use crate::config::Settings;
use crate::currency::ExchangeRates;
use crate::data::DataSet;
use crate::error::ErrorBag;
use crate::eval::Evaluator;
use crate::format::Formatter;
use crate::lexer;
use crate::parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    Heading,
    Comment,
    Empty,
    Expression,
    Definition,
    PlainText,
}

/// One entry per input line. `result` is the rendered value, or the error
/// message when `has_error` is set; pass-through lines carry neither.
#[derive(Debug, Clone, PartialEq)]
pub struct LineResult {
    pub line_type: LineType,
    pub result: Option<String>,
    pub has_error: bool,
}

#[derive(Debug, Clone)]
pub struct CalcOutput {
    pub results: Vec<LineResult>,
    pub errors: ErrorBag,
}

/// Parse-only output for editor integrations: the document plus the
/// lexer/parser error buckets (runtime stays empty).
#[derive(Debug)]
pub struct ParsedDocument {
    pub document: Document,
    pub errors: ErrorBag,
}

/// The top-level calculator: immutable datasets plus settings in, one
/// result per line out. Exchange rates are installed separately because
/// they are the only configuration that changes day to day.
pub struct Calculator {
    data: Arc<DataSet>,
    settings: Settings,
    rates: Option<ExchangeRates>,
    rng: Box<dyn RngCore>,
}

impl Calculator {
    pub fn new(data: Arc<DataSet>, settings: Settings) -> Self {
        Self {
            data,
            settings,
            rates: None,
            rng: Box::new(StdRng::from_os_rng()),
        }
    }

    /// Embedded default datasets, default settings.
    pub fn with_defaults() -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(DataSet::with_defaults()?), Settings::default()))
    }

    pub fn with_settings(settings: Settings) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(DataSet::with_defaults()?), settings))
    }

    pub fn load_exchange_rates(&mut self, rates: ExchangeRates) {
        self.rates = Some(rates);
    }

    /// Swap the RNG; tests install a seeded one so `random()` becomes
    /// deterministic.
    pub fn set_rng(&mut self, rng: impl RngCore + 'static) {
        self.rng = Box::new(rng);
    }

    pub fn data(&self) -> &DataSet {
        &self.data
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Parse-only entry point for editor integration.
    pub fn parse(&self, text: &str) -> ParsedDocument {
        let lexed = lexer::tokenize(text, &self.data);
        let parsed = parser::parse(&lexed.tokens, text, &self.data);
        ParsedDocument {
            document: parsed.document,
            errors: ErrorBag {
                lexer: lexed.errors,
                parser: parsed.errors,
                runtime: Vec::new(),
            },
        }
    }

    /// Run the full pipeline. No line failure aborts the document: errors
    /// are recorded per line and bucketed by stage.
    pub fn calculate(&mut self, text: &str) -> CalcOutput {
        let lexed = lexer::tokenize(text, &self.data);
        let parsed = parser::parse(&lexed.tokens, text, &self.data);
        let mut errors = ErrorBag {
            lexer: lexed.errors,
            parser: parsed.errors,
            runtime: Vec::new(),
        };

        let formatter = Formatter::new(&self.data, &self.settings);
        let mut evaluator = Evaluator::new(
            &self.data,
            &self.settings,
            self.rates.as_ref(),
            &mut *self.rng,
        );

        let mut results = Vec::with_capacity(parsed.document.lines.len());
        for line in &parsed.document.lines {
            let result = match line {
                Line::Heading { .. } => LineResult {
                    line_type: LineType::Heading,
                    result: None,
                    has_error: false,
                },
                Line::Comment { .. } => LineResult {
                    line_type: LineType::Comment,
                    result: None,
                    has_error: false,
                },
                Line::Empty { .. } => LineResult {
                    line_type: LineType::Empty,
                    result: None,
                    has_error: false,
                },
                Line::PlainText { span, .. } => {
                    // A recovered parse failure reports on its line; prose
                    // that happened to lex has no recorded error.
                    let message = errors
                        .parser
                        .iter()
                        .find(|e| e.span.line == span.line)
                        .map(|e| e.message.clone());
                    LineResult {
                        line_type: LineType::PlainText,
                        has_error: message.is_some(),
                        result: message,
                    }
                }
                Line::Expression { expr, .. } => match evaluator.eval(expr) {
                    Ok(value) => LineResult {
                        line_type: LineType::Expression,
                        result: Some(formatter.format(&value)),
                        has_error: false,
                    },
                    Err(e) => {
                        let message = e.message.clone();
                        errors.runtime.push(e);
                        LineResult {
                            line_type: LineType::Expression,
                            result: Some(message),
                            has_error: true,
                        }
                    }
                },
                // The name binds only after the right-hand side evaluates;
                // on error any prior binding survives untouched.
                Line::Definition { name, expr, .. } => match evaluator.eval(expr) {
                    Ok(value) => {
                        let rendered = formatter.format(&value);
                        evaluator.define(name, value);
                        LineResult {
                            line_type: LineType::Definition,
                            result: Some(rendered),
                            has_error: false,
                        }
                    }
                    Err(e) => {
                        let message = e.message.clone();
                        errors.runtime.push(e);
                        LineResult {
                            line_type: LineType::Definition,
                            result: Some(message),
                            has_error: true,
                        }
                    }
                },
            };
            results.push(result);
        }

        CalcOutput { results, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> Calculator {
        Calculator::with_defaults().unwrap()
    }

    #[test]
    fn one_result_per_line() {
        let mut c = calc();
        let out = c.calculate("# Title\n2 + 2\n\nx = 1\nhello-world )\n");
        let types: Vec<_> = out.results.iter().map(|r| r.line_type).collect();
        assert_eq!(
            types,
            vec![
                LineType::Heading,
                LineType::Expression,
                LineType::Empty,
                LineType::Definition,
                LineType::PlainText,
            ]
        );
        assert_eq!(out.results[0].result, None);
        assert_eq!(out.results[1].result.as_deref(), Some("4"));
    }

    #[test]
    fn definitions_bind_in_document_order() {
        let mut c = calc();
        let out = c.calculate("x = 10\ny = 20\nx + y");
        let rendered: Vec<_> = out
            .results
            .iter()
            .map(|r| r.result.as_deref().unwrap())
            .collect();
        assert_eq!(rendered, vec!["10", "20", "30"]);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn scope_does_not_persist_across_calls() {
        let mut c = calc();
        c.calculate("x = 10");
        let out = c.calculate("x");
        assert!(out.results[0].has_error);
        assert_eq!(out.errors.runtime.len(), 1);
    }

    #[test]
    fn failed_definition_keeps_prior_binding() {
        let mut c = calc();
        let out = c.calculate("x = 5\nx = 1 / 0\nx");
        assert!(out.results[1].has_error);
        assert_eq!(out.results[2].result.as_deref(), Some("5"));
    }

    #[test]
    fn rates_install_before_evaluation() {
        let mut c = calc();
        c.load_exchange_rates(
            ExchangeRates::from_json(r#"{"date": "2026-08-01", "usd": {"eur": 0.85}}"#).unwrap(),
        );
        let out = c.calculate("100 USD to EUR");
        assert_eq!(out.results[0].result.as_deref(), Some("85.00 EUR"));
    }

    #[test]
    fn missing_rates_are_a_runtime_error() {
        let mut c = calc();
        let out = c.calculate("100 USD to EUR");
        assert!(out.results[0].has_error);
        assert_eq!(out.errors.runtime.len(), 1);
    }

    #[test]
    fn parse_only_entry_point() {
        let c = calc();
        let parsed = c.parse("2 +\n3 + 3");
        assert_eq!(parsed.errors.parser.len(), 1);
        assert!(parsed.errors.runtime.is_empty());
        assert_eq!(parsed.document.lines.len(), 2);
    }
}
