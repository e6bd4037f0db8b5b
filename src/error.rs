use thiserror::Error;

use crate::token::Span;

/// Unknown character, malformed base-prefixed literal, and friends.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct LexerError {
    pub span: Span,
    pub message: String,
}

impl LexerError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

/// Unexpected token, missing operand, unbalanced parens, incomplete
/// construct.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ParserError {
    pub span: Span,
    pub message: String,
}

impl ParserError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    UndefinedVariable,
    DimensionMismatch,
    DomainError,
    DivisionByZero,
    InvalidConversion,
    CurrencyUnavailable,
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub span: Span,
    pub kind: RuntimeErrorKind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            kind,
            message: message.into(),
        }
    }

    pub fn undefined_variable(span: Span, name: &str) -> Self {
        Self::new(
            RuntimeErrorKind::UndefinedVariable,
            span,
            format!("undefined variable `{name}`"),
        )
    }

    pub fn dimension_mismatch(span: Span, message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::DimensionMismatch, span, message)
    }

    pub fn domain(span: Span, message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::DomainError, span, message)
    }

    pub fn division_by_zero(span: Span) -> Self {
        Self::new(RuntimeErrorKind::DivisionByZero, span, "division by zero")
    }

    pub fn invalid_conversion(span: Span, message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::InvalidConversion, span, message)
    }

    pub fn currency_unavailable(span: Span, code: &str) -> Self {
        Self::new(
            RuntimeErrorKind::CurrencyUnavailable,
            span,
            format!("no exchange rate available for {code}"),
        )
    }
}

/// Errors collected while processing one document, bucketed by pipeline
/// stage. Nothing in the pipeline throws; everything lands here.
#[derive(Debug, Clone, Default)]
pub struct ErrorBag {
    pub lexer: Vec<LexerError>,
    pub parser: Vec<ParserError>,
    pub runtime: Vec<RuntimeError>,
}

impl ErrorBag {
    pub fn is_empty(&self) -> bool {
        self.lexer.is_empty() && self.parser.is_empty() && self.runtime.is_empty()
    }

    pub fn total(&self) -> usize {
        self.lexer.len() + self.parser.len() + self.runtime.len()
    }
}
