use chrono::{NaiveDate, NaiveTime};

use crate::ast::{
    BinaryOp, ConversionTarget, Document, Expr, Line, PostfixOp, PresentationFormat, UnaryOp,
};
use crate::data::DataSet;
use crate::error::ParserError;
use crate::temporal;
use crate::token::{Keyword, Span, Token, TokenKind};

type PResult<T> = Result<T, ParserError>;

#[derive(Debug)]
pub struct ParseOutput {
    pub document: Document,
    pub errors: Vec<ParserError>,
}

pub fn parse(tokens: &[Token], src: &str, data: &DataSet) -> ParseOutput {
    Parser {
        tokens,
        src,
        data,
        pos: 0,
        errors: Vec::new(),
    }
    .run()
}

/// One logical line at a time, newline-delimited. A parse failure inside a
/// line consumes to the next newline and leaves a PlainText line behind;
/// following lines are unaffected.
struct Parser<'a> {
    tokens: &'a [Token],
    src: &'a str,
    data: &'a DataSet,
    pos: usize,
    errors: Vec<ParserError>,
}

impl<'a> Parser<'a> {
    fn run(mut self) -> ParseOutput {
        let mut lines = Vec::new();
        while !self.at_eof() {
            match self.peek().kind {
                TokenKind::Newline => {
                    let span = self.peek().span;
                    self.advance();
                    lines.push(Line::Empty { span });
                }
                TokenKind::Heading => {
                    let tok = self.advance().clone();
                    let (level, text) = tok
                        .lexeme
                        .split_once(':')
                        .map(|(l, t)| (l.parse::<u8>().unwrap_or(1), t.to_string()))
                        .unwrap_or((1, tok.lexeme.clone()));
                    self.eat(TokenKind::Newline);
                    lines.push(Line::Heading {
                        level,
                        text,
                        span: tok.span,
                    });
                }
                TokenKind::Comment => {
                    let span = self.advance().span;
                    self.eat(TokenKind::Newline);
                    lines.push(Line::Comment { span });
                }
                _ => lines.push(self.parse_statement_line()),
            }
        }
        ParseOutput {
            document: Document { lines },
            errors: self.errors,
        }
    }

    fn parse_statement_line(&mut self) -> Line {
        let start = self.pos;
        let start_span = self.peek().span;

        let result = if self.peek().kind == TokenKind::Identifier
            && self.nth_kind(1) == TokenKind::Assign
        {
            let name = self.advance().lexeme.clone();
            self.advance();
            self.parse_expr().map(|expr| {
                let span = start_span.merge(expr.span());
                Line::Definition { name, expr, span }
            })
        } else {
            self.parse_expr().map(|expr| {
                let span = start_span.merge(expr.span());
                Line::Expression { expr, span }
            })
        };

        match result {
            Ok(line) => {
                if matches!(self.peek().kind, TokenKind::Newline) {
                    self.advance();
                    line
                } else if self.at_eof() {
                    line
                } else {
                    let tok = self.peek().clone();
                    self.recover_line(
                        start,
                        ParserError::new(
                            tok.span,
                            format!("unexpected `{}`", tok.lexeme),
                        ),
                    )
                }
            }
            Err(e) => self.recover_line(start, e),
        }
    }

    /// Record the error, drop the rest of the line, and surface the raw
    /// source as plain text.
    fn recover_line(&mut self, start: usize, error: ParserError) -> Line {
        self.errors.push(error);
        let start_byte = self.tokens[start].span.start;
        while !self.at_eof() && self.peek().kind != TokenKind::Newline {
            self.advance();
        }
        let end_byte = if self.at_eof() {
            self.src.len()
        } else {
            let b = self.peek().span.start;
            self.advance();
            b
        };
        let text = self.src[start_byte..end_byte].trim_end().to_string();
        Line::PlainText {
            text,
            span: self.tokens[start].span,
        }
    }

    // ---- token helpers -------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn nth_kind(&self, n: usize) -> TokenKind {
        self.nth(n).kind
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        self.eat(TokenKind::Keyword(kw))
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    fn expect_keyword(&mut self, kw: Keyword, what: &str) -> PResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            let tok = self.peek();
            Err(ParserError::new(
                tok.span,
                format!("expected `{what}`, found `{}`", tok.lexeme),
            ))
        }
    }

    // ---- expressions ---------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_if()
    }

    fn parse_if(&mut self) -> PResult<Expr> {
        if !self.check_keyword(Keyword::If) {
            return self.parse_or();
        }
        let start = self.peek().span;
        self.advance();
        let cond = self.parse_or()?;
        self.expect_keyword(Keyword::Then, "then")?;
        let then = self.parse_if()?;
        self.expect_keyword(Keyword::Else, "else")?;
        let otherwise = self.parse_if()?;
        let span = start.merge(otherwise.span());
        Ok(Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
            span,
        })
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek().kind == TokenKind::PipePipe || self.check_keyword(Keyword::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_or()?;
        while self.peek().kind == TokenKind::AmpAmp || self.check_keyword(Keyword::And) {
            self.advance();
            let rhs = self.parse_bit_or()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_xor()?;
        while self.peek().kind == TokenKind::Pipe {
            self.advance();
            let rhs = self.parse_xor()?;
            lhs = binary(BinaryOp::BitOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_and()?;
        while self.check_keyword(Keyword::Xor) {
            self.advance();
            let rhs = self.parse_bit_and()?;
            lhs = binary(BinaryOp::BitXor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.peek().kind == TokenKind::Amp {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = binary(BinaryOp::BitAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::BangEq => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_shift()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_conversion()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Shl => BinaryOp::Shl,
                TokenKind::Shr => BinaryOp::Shr,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_conversion()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_conversion(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_additive()?;
        loop {
            let is_to = self.check_keyword(Keyword::To) || self.peek().kind == TokenKind::Arrow;
            let is_in = self.check_keyword(Keyword::In) && self.starts_conversion_target(1);
            if !is_to && !is_in {
                break;
            }
            self.advance();
            let target = self.parse_conversion_target()?;
            let span = expr.span().merge(self.nth(0).span);
            expr = Expr::Convert {
                value: Box::new(expr),
                target,
                span,
            };
        }
        Ok(expr)
    }

    /// Can the token `n` ahead begin a conversion target? Used to decide
    /// whether `in` is the conversion keyword or the inch unit.
    fn starts_conversion_target(&self, n: usize) -> bool {
        match self.nth_kind(n) {
            TokenKind::Unit | TokenKind::Identifier => true,
            TokenKind::Keyword(k) => matches!(
                k,
                Keyword::Binary
                    | Keyword::Octal
                    | Keyword::Hex
                    | Keyword::Fraction
                    | Keyword::Scientific
                    | Keyword::Ordinal
                    | Keyword::Iso8601
                    | Keyword::Rfc9557
                    | Keyword::Rfc2822
                    | Keyword::Unix
                    | Keyword::Base
            ),
            _ => false,
        }
    }

    fn parse_conversion_target(&mut self) -> PResult<ConversionTarget> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Keyword(kw) => {
                let fmt = match kw {
                    Keyword::Binary => Some(PresentationFormat::Binary),
                    Keyword::Octal => Some(PresentationFormat::Octal),
                    Keyword::Hex => Some(PresentationFormat::Hex),
                    Keyword::Fraction => Some(PresentationFormat::Fraction),
                    Keyword::Scientific => Some(PresentationFormat::Scientific),
                    Keyword::Ordinal => Some(PresentationFormat::Ordinal),
                    Keyword::Iso8601 => Some(PresentationFormat::Iso8601),
                    Keyword::Rfc9557 => Some(PresentationFormat::Rfc9557),
                    Keyword::Rfc2822 => Some(PresentationFormat::Rfc2822),
                    _ => None,
                };
                if let Some(fmt) = fmt {
                    self.advance();
                    return Ok(ConversionTarget::Presentation(fmt));
                }
                if kw == Keyword::Unix {
                    self.advance();
                    let next = self.peek();
                    let millis = matches!(next.kind, TokenKind::Unit | TokenKind::Identifier)
                        && matches!(
                            next.lexeme.to_lowercase().as_str(),
                            "ms" | "millisecond" | "milliseconds"
                        );
                    if millis {
                        self.advance();
                        return Ok(ConversionTarget::Presentation(PresentationFormat::UnixMillis));
                    }
                    return Ok(ConversionTarget::Presentation(PresentationFormat::Unix));
                }
                if kw == Keyword::Base {
                    self.advance();
                    let num = self.peek().clone();
                    if num.kind != TokenKind::Number {
                        return Err(ParserError::new(num.span, "expected radix after `base`"));
                    }
                    self.advance();
                    let radix: u32 = num
                        .lexeme
                        .parse()
                        .ok()
                        .filter(|r| (2..=36).contains(r))
                        .ok_or_else(|| {
                            ParserError::new(num.span, format!("invalid radix `{}`", num.lexeme))
                        })?;
                    return Ok(ConversionTarget::Presentation(PresentationFormat::Base(radix)));
                }
                Err(ParserError::new(
                    tok.span,
                    format!("`{}` is not a conversion target", tok.lexeme),
                ))
            }
            TokenKind::Identifier => {
                // Two-word presentation names: `ISO 8601`, `RFC 9557`.
                let lower = tok.lexeme.to_lowercase();
                if self.nth_kind(1) == TokenKind::Number {
                    let pair = match (lower.as_str(), self.nth(1).lexeme.as_str()) {
                        ("iso", "8601") => Some(PresentationFormat::Iso8601),
                        ("rfc", "9557") => Some(PresentationFormat::Rfc9557),
                        ("rfc", "2822") => Some(PresentationFormat::Rfc2822),
                        _ => None,
                    };
                    if let Some(fmt) = pair {
                        self.advance();
                        self.advance();
                        return Ok(ConversionTarget::Presentation(fmt));
                    }
                }
                // Timezone name, single word or an IANA id with slashes.
                let mut name = tok.lexeme.clone();
                let mut consumed = 1;
                while self.nth_kind(consumed) == TokenKind::Slash
                    && self.nth_kind(consumed + 1) == TokenKind::Identifier
                {
                    name.push('/');
                    name.push_str(&self.nth(consumed + 1).lexeme);
                    consumed += 2;
                }
                if self.data.timezones().contains(&name) || name.contains('/') {
                    for _ in 0..consumed {
                        self.advance();
                    }
                    return Ok(ConversionTarget::Timezone(name));
                }
                Err(ParserError::new(
                    tok.span,
                    format!("unknown conversion target `{}`", tok.lexeme),
                ))
            }
            TokenKind::Unit => {
                // Two or more whitespace-separated units form a composite
                // target (`ft in`); a single unit may still open a derived
                // expression (`km/h`).
                let mut names = vec![tok.lexeme.clone()];
                let mut n = 1;
                loop {
                    match self.nth_kind(n) {
                        TokenKind::Unit => {
                            names.push(self.nth(n).lexeme.clone());
                            n += 1;
                        }
                        TokenKind::Keyword(Keyword::In) if !self.starts_conversion_target(n + 1) => {
                            names.push("in".to_string());
                            n += 1;
                        }
                        _ => break,
                    }
                }
                if names.len() >= 2 {
                    for _ in 0..n {
                        self.advance();
                    }
                    return Ok(ConversionTarget::CompositeUnits(names));
                }
                let expr = self.parse_multiplicative()?;
                Ok(ConversionTarget::Unit(Box::new(expr)))
            }
            _ => {
                let expr = self.parse_multiplicative()?;
                Ok(ConversionTarget::Unit(Box::new(expr)))
            }
        }
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                TokenKind::Keyword(Keyword::Mod) => BinaryOp::Mod,
                TokenKind::Keyword(Keyword::Per) => BinaryOp::Div,
                TokenKind::Keyword(Keyword::Of) => BinaryOp::Of,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Pos),
            TokenKind::Bang | TokenKind::Keyword(Keyword::Not) => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.peek().span;
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span());
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_postfix(true)?;
        if self.peek().kind == TokenKind::Caret {
            self.advance();
            let exponent = self.parse_unary()?;
            let span = base.span().merge(exponent.span());
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
                span,
            });
        }
        Ok(base)
    }

    /// Postfix level: factorial, percent literals, unit suffixes,
    /// composite values and juxtaposition-as-multiplication.
    fn parse_postfix(&mut self, allow_juxtaposition: bool) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Bang => {
                    let span = expr.span().merge(self.peek().span);
                    self.advance();
                    expr = Expr::Postfix {
                        op: PostfixOp::Factorial,
                        operand: Box::new(expr),
                        span,
                    };
                }
                // `%` is a percent literal only when nothing follows that
                // could be a modulo operand.
                TokenKind::Percent if !self.nth(1).starts_atom() => {
                    let span = expr.span().merge(self.peek().span);
                    self.advance();
                    expr = Expr::Postfix {
                        op: PostfixOp::Percent,
                        operand: Box::new(expr),
                        span,
                    };
                }
                TokenKind::Unit => {
                    if is_bare_number(&expr) {
                        let unit = self.advance().clone();
                        let span = expr.span().merge(unit.span);
                        expr = Expr::WithUnit {
                            value: Box::new(expr),
                            unit: unit.lexeme,
                            span,
                        };
                        expr = self.extend_composite(expr)?;
                    } else if allow_juxtaposition {
                        let rhs = self.parse_postfix(false)?;
                        expr = binary(BinaryOp::Mul, expr, rhs);
                    } else {
                        break;
                    }
                }
                // `in` as the inch unit: only when nothing that could be a
                // conversion target follows.
                TokenKind::Keyword(Keyword::In)
                    if is_bare_number(&expr) && !self.starts_conversion_target(1) =>
                {
                    let span = expr.span().merge(self.peek().span);
                    self.advance();
                    expr = Expr::WithUnit {
                        value: Box::new(expr),
                        unit: "in".to_string(),
                        span,
                    };
                }
                TokenKind::Number
                | TokenKind::Identifier
                | TokenKind::LParen
                    if allow_juxtaposition =>
                {
                    let rhs = self.parse_postfix(false)?;
                    expr = binary(BinaryOp::Mul, expr, rhs);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// After `5 ft`, greedily take `3 in`-shaped continuations of the same
    /// dimension into one composite value.
    fn extend_composite(&mut self, first: Expr) -> PResult<Expr> {
        let mut parts: Vec<(Expr, String)> = Vec::new();
        let (mut span, value, unit) = match first {
            Expr::WithUnit { value, unit, span } => (span, value, unit),
            other => return Ok(other),
        };
        let mut last_dim = match self
            .data
            .resolve_unit_name(&unit)
            .map(|u| self.data.unit(u).dimension)
        {
            Some(d) => d,
            None => {
                return Ok(Expr::WithUnit { value, unit, span });
            }
        };
        parts.push(((*value), unit));

        loop {
            if self.peek().kind != TokenKind::Number {
                break;
            }
            let unit_name = match self.nth_kind(1) {
                TokenKind::Unit => self.nth(1).lexeme.clone(),
                TokenKind::Keyword(Keyword::In) if !self.starts_conversion_target(2) => {
                    "in".to_string()
                }
                _ => break,
            };
            let dim = match self
                .data
                .resolve_unit_name(&unit_name)
                .map(|u| self.data.unit(u).dimension)
            {
                Some(d) => d,
                None => break,
            };
            if dim != last_dim {
                break;
            }
            let number = self.advance().clone();
            let unit_tok = self.advance().clone();
            span = span.merge(unit_tok.span);
            parts.push((
                Expr::Number {
                    lexeme: number.lexeme,
                    span: number.span,
                },
                unit_name,
            ));
            last_dim = dim;
        }

        if parts.len() == 1 {
            let (value, unit) = parts.pop().unwrap();
            Ok(Expr::WithUnit {
                value: Box::new(value),
                unit,
                span,
            })
        } else {
            Ok(Expr::Composite { parts, span })
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number => {
                if self.starts_datetime_run() {
                    return self.parse_datetime_literal();
                }
                self.advance();
                Ok(Expr::Number {
                    lexeme: tok.lexeme,
                    span: tok.span,
                })
            }
            TokenKind::DateTime => self.parse_datetime_literal(),
            TokenKind::Identifier => {
                if self.nth_kind(1) == TokenKind::LParen {
                    return self.parse_call();
                }
                self.advance();
                Ok(Expr::Identifier {
                    name: tok.lexeme,
                    span: tok.span,
                })
            }
            TokenKind::Unit => {
                self.advance();
                // Prefix currency: `$100`, `US$100`.
                let is_currency = self.data.currencies().by_code(&tok.lexeme).is_some()
                    || crate::data::CurrencyTable::is_ambiguous_code(&tok.lexeme);
                if is_currency && self.peek().kind == TokenKind::Number {
                    let num = self.advance().clone();
                    let span = tok.span.merge(num.span);
                    return Ok(Expr::WithUnit {
                        value: Box::new(Expr::Number {
                            lexeme: num.lexeme,
                            span: num.span,
                        }),
                        unit: tok.lexeme,
                        span,
                    });
                }
                Ok(Expr::UnitRef {
                    name: tok.lexeme,
                    span: tok.span,
                })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool {
                    value: true,
                    span: tok.span,
                })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool {
                    value: false,
                    span: tok.span,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                if !self.eat(TokenKind::RParen) {
                    return Err(ParserError::new(self.peek().span, "expected `)`"));
                }
                Ok(inner)
            }
            _ => Err(ParserError::new(
                tok.span,
                format!("unexpected `{}`", display_lexeme(&tok)),
            )),
        }
    }

    fn parse_call(&mut self) -> PResult<Expr> {
        let name_tok = self.advance().clone();
        let start = name_tok.span;
        self.advance(); // `(`
        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                args.push(self.parse_expr()?);
                if self.eat(TokenKind::Comma) {
                    continue;
                }
                break;
            }
        }
        let end = self.peek().span;
        if !self.eat(TokenKind::RParen) {
            return Err(ParserError::new(end, "expected `)` after arguments"));
        }
        Ok(Expr::Call {
            name: name_tok.lexeme.to_lowercase(),
            args,
            span: start.merge(end),
        })
    }

    // ---- date/time assembly --------------------------------------------

    /// A number opens a date/time literal when the next token is a month
    /// word or an am/pm marker.
    fn starts_datetime_run(&self) -> bool {
        if !is_plain_integer(&self.peek().lexeme) {
            return false;
        }
        let next = self.nth(1);
        next.kind == TokenKind::DateTime
            && (temporal::month_from_word(&next.lexeme).is_some() || is_am_pm(&next.lexeme))
    }

    /// Combine adjacent NUMBER/DATETIME placeholders into one date, time
    /// or date-time literal.
    fn parse_datetime_literal(&mut self) -> PResult<Expr> {
        let start_span = self.peek().span;
        let mut end_span = start_span;

        let mut month: Option<u32> = None;
        let mut time: Option<(u32, u32, u32)> = None;
        let mut pm: Option<bool> = None;
        let mut numbers: Vec<(u32, usize)> = Vec::new(); // (value, digit count)

        loop {
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::DateTime => {
                    if tok.lexeme.contains(':') {
                        if time.is_some() {
                            break;
                        }
                        time = Some(parse_time_lexeme(&tok.lexeme, tok.span)?);
                    } else if let Some(m) = temporal::month_from_word(&tok.lexeme) {
                        if month.is_some() {
                            break;
                        }
                        month = Some(m);
                    } else if is_am_pm(&tok.lexeme) {
                        if pm.is_some() {
                            break;
                        }
                        pm = Some(tok.lexeme.to_lowercase().starts_with('p'));
                    } else if temporal::weekday_from_word(&tok.lexeme).is_none() {
                        break;
                    }
                    end_span = tok.span;
                    self.advance();
                }
                TokenKind::Number if is_plain_integer(&tok.lexeme) => {
                    let next = self.nth(1);
                    let continues = month.is_some()
                        || (next.kind == TokenKind::DateTime
                            && (temporal::month_from_word(&next.lexeme).is_some()
                                || is_am_pm(&next.lexeme)));
                    if !continues || numbers.len() >= 2 {
                        break;
                    }
                    let value: u32 = tok.lexeme.replace('_', "").parse().map_err(|_| {
                        ParserError::new(tok.span, format!("invalid number `{}`", tok.lexeme))
                    })?;
                    numbers.push((value, tok.lexeme.len()));
                    end_span = tok.span;
                    self.advance();
                }
                _ => break,
            }
        }

        let span = start_span.merge(end_span);

        // An am/pm marker with no time literal claims the last number as
        // the hour.
        if pm.is_some() && time.is_none() {
            let (hour, _) = numbers.pop().ok_or_else(|| {
                ParserError::new(span, "dangling am/pm marker")
            })?;
            time = Some((hour, 0, 0));
        }

        let time = match (time, pm) {
            (Some((h, m, s)), Some(is_pm)) => {
                let h = match (h, is_pm) {
                    (12, false) => 0,
                    (h, true) if h < 12 => h + 12,
                    (h, _) => h,
                };
                Some((h, m, s))
            }
            (t, _) => t,
        };

        let date = if let Some(month) = month {
            let mut day: Option<u32> = None;
            let mut year: Option<i32> = None;
            for (value, digits) in &numbers {
                if day.is_none() && *value >= 1 && *value <= 31 && *digits <= 2 {
                    day = Some(*value);
                } else if year.is_none() {
                    year = Some(*value as i32);
                }
            }
            let day =
                day.ok_or_else(|| ParserError::new(span, "incomplete date literal"))?;
            let year = year.unwrap_or(2000);
            Some(
                NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                    ParserError::new(span, format!("invalid date {year}-{month}-{day}"))
                })?,
            )
        } else {
            None
        };

        let time = match time {
            Some((h, m, s)) => Some(NaiveTime::from_hms_opt(h, m, s).ok_or_else(|| {
                ParserError::new(span, format!("invalid time {h}:{m:02}:{s:02}"))
            })?),
            None => None,
        };

        if date.is_none() && time.is_none() {
            return Err(ParserError::new(span, "incomplete date literal"));
        }

        Ok(Expr::DateTimeLiteral { date, time, span })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span().merge(rhs.span());
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span,
    }
}

/// Unit suffixes bind to numeric literals (possibly signed), not to
/// arbitrary expressions.
fn is_bare_number(expr: &Expr) -> bool {
    match expr {
        Expr::Number { .. } => true,
        Expr::Unary {
            op: UnaryOp::Neg | UnaryOp::Pos,
            operand,
            ..
        } => is_bare_number(operand),
        _ => false,
    }
}

fn is_plain_integer(lexeme: &str) -> bool {
    !lexeme.is_empty() && lexeme.bytes().all(|b| b.is_ascii_digit() || b == b'_')
}

fn is_am_pm(lexeme: &str) -> bool {
    lexeme.eq_ignore_ascii_case("am") || lexeme.eq_ignore_ascii_case("pm")
}

fn parse_time_lexeme(lexeme: &str, span: Span) -> PResult<(u32, u32, u32)> {
    let mut parts = lexeme.split(':');
    let h: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| ParserError::new(span, "invalid time literal"))?;
    let m: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| ParserError::new(span, "invalid time literal"))?;
    let s: u32 = match parts.next() {
        Some(p) => p
            .parse()
            .map_err(|_| ParserError::new(span, "invalid time literal"))?,
        None => 0,
    };
    if h > 23 && !(h == 24 && m == 0 && s == 0) || m > 59 || s > 59 {
        return Err(ParserError::new(
            span,
            format!("invalid time literal `{lexeme}`"),
        ));
    }
    Ok((h % 24, m, s))
}

fn display_lexeme(tok: &Token) -> String {
    if tok.lexeme.is_empty() {
        match tok.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            _ => format!("{:?}", tok.kind),
        }
    } else {
        tok.lexeme.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn parse_src(src: &str) -> ParseOutput {
        let data = DataSet::with_defaults().unwrap();
        let lexed = lexer::tokenize(src, &data);
        parse(&lexed.tokens, src, &data)
    }

    fn single_expr(src: &str) -> Expr {
        let out = parse_src(src);
        assert!(out.errors.is_empty(), "errors: {:?}", out.errors);
        match &out.document.lines[0] {
            Line::Expression { expr, .. } => expr.clone(),
            other => panic!("expected expression line, got {other:?}"),
        }
    }

    #[test]
    fn precedence_add_mul() {
        let expr = single_expr("2 + 3 * 4");
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = expr else {
            panic!("expected +");
        };
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn unit_suffix_attaches_to_literal() {
        let expr = single_expr("5 m + 20 cm");
        let Expr::Binary { lhs, rhs, .. } = expr else { panic!() };
        assert!(matches!(*lhs, Expr::WithUnit { ref unit, .. } if unit == "m"));
        assert!(matches!(*rhs, Expr::WithUnit { ref unit, .. } if unit == "cm"));
    }

    #[test]
    fn composite_feet_inches() {
        let expr = single_expr("5 ft 3 in");
        let Expr::Composite { parts, .. } = expr else {
            panic!("expected composite, got {expr:?}");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1, "ft");
        assert_eq!(parts[1].1, "in");
    }

    #[test]
    fn juxtaposition_multiplies() {
        let expr = single_expr("5 N m");
        let Expr::Binary { op: BinaryOp::Mul, lhs, rhs, .. } = expr else {
            panic!("expected multiplication, got {expr:?}");
        };
        assert!(matches!(*lhs, Expr::WithUnit { ref unit, .. } if unit == "N"));
        assert!(matches!(*rhs, Expr::UnitRef { ref name, .. } if name == "m"));
    }

    #[test]
    fn conversion_targets() {
        let expr = single_expr("171 cm to ft in");
        let Expr::Convert { target, .. } = expr else { panic!() };
        assert_eq!(
            target,
            ConversionTarget::CompositeUnits(vec!["ft".into(), "in".into()])
        );

        let expr = single_expr("60 to binary");
        let Expr::Convert { target, .. } = expr else { panic!() };
        assert_eq!(
            target,
            ConversionTarget::Presentation(PresentationFormat::Binary)
        );

        let expr = single_expr("1 mi to km");
        let Expr::Convert { target, .. } = expr else { panic!() };
        assert!(matches!(target, ConversionTarget::Unit(_)));
    }

    #[test]
    fn in_keyword_doubles_as_inch() {
        let expr = single_expr("3 in");
        assert!(matches!(expr, Expr::WithUnit { ref unit, .. } if unit == "in"));

        let expr = single_expr("5 m in cm");
        assert!(matches!(expr, Expr::Convert { .. }));
    }

    #[test]
    fn date_literal_assembly() {
        let expr = single_expr("1970 Jan 31");
        let Expr::DateTimeLiteral { date, time, .. } = expr else { panic!() };
        assert_eq!(date, NaiveDate::from_ymd_opt(1970, 1, 31));
        assert_eq!(time, None);

        let expr = single_expr("10:30 pm");
        let Expr::DateTimeLiteral { date, time, .. } = expr else { panic!() };
        assert_eq!(date, None);
        assert_eq!(time, NaiveTime::from_hms_opt(22, 30, 0));

        let expr = single_expr("10 am");
        let Expr::DateTimeLiteral { time, .. } = expr else { panic!() };
        assert_eq!(time, NaiveTime::from_hms_opt(10, 0, 0));
    }

    #[test]
    fn definition_lookahead() {
        let out = parse_src("x = 10\nx + 1");
        assert!(matches!(
            out.document.lines[0],
            Line::Definition { ref name, .. } if name == "x"
        ));
        assert!(matches!(out.document.lines[1], Line::Expression { .. }));
    }

    #[test]
    fn per_line_recovery() {
        let out = parse_src("2 +\n3 + 3");
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(
            out.document.lines[0],
            Line::PlainText { ref text, .. } if text == "2 +"
        ));
        assert!(matches!(out.document.lines[1], Line::Expression { .. }));
    }

    #[test]
    fn heading_and_comment_lines() {
        let out = parse_src("# Title\n# plain heading\n");
        assert!(matches!(
            out.document.lines[0],
            Line::Heading { level: 1, ref text, .. } if text == "Title"
        ));
    }

    #[test]
    fn if_then_else_spans_line() {
        let expr = single_expr("if 1 < 2 then 3 + 1 else 4 * 2");
        let Expr::If { cond, .. } = expr else { panic!() };
        assert!(matches!(*cond, Expr::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn percent_literal_vs_modulo() {
        let expr = single_expr("10 % 3");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Mod, .. }));

        let expr = single_expr("100 + 10%");
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = expr else { panic!() };
        assert!(matches!(
            *rhs,
            Expr::Postfix { op: PostfixOp::Percent, .. }
        ));
    }

    #[test]
    fn prefix_currency_symbol() {
        let expr = single_expr("$100");
        assert!(matches!(
            expr,
            Expr::WithUnit { ref unit, .. } if unit == "currency_symbol_0024"
        ));
    }
}
