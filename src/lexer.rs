use crate::data::DataSet;
use crate::error::LexerError;
use crate::temporal;
use crate::token::{Keyword, Span, Token, TokenKind};

/// Words that evaluate to built-in constants; they must stay identifiers
/// even when a unit name would otherwise shadow them.
const CONSTANTS: &[&str] = &["pi", "tau", "e", "phi", "golden_ratio", "NaN", "Infinity", "inf"];

#[derive(Debug)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub errors: Vec<LexerError>,
}

pub fn tokenize(src: &str, data: &DataSet) -> LexOutput {
    Lexer::new(src, data).run()
}

/// Single-pass character cursor. Classification is context-sensitive:
/// digit runs may become time literals, `am`/`pm` flips between a time
/// marker and a length unit depending on the previous token, and currency
/// symbols are matched before numbers.
struct Lexer<'a> {
    src: &'a str,
    data: &'a DataSet,
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    errors: Vec<LexerError>,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '⁻'
}

fn is_superscript(c: char) -> bool {
    matches!(c, '⁰' | '¹' | '²' | '³' | '⁴' | '⁵' | '⁶' | '⁷' | '⁸' | '⁹' | '⁻')
}

/// Integer hours 1-12 (`0?[1-9]|1[0-2]`) can take an am/pm marker.
fn is_integer_hour(lexeme: &str) -> bool {
    if lexeme.is_empty() || lexeme.len() > 2 || !lexeme.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    matches!(lexeme.parse::<u32>(), Ok(1..=12))
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, data: &'a DataSet) -> Self {
        Self {
            src,
            data,
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> LexOutput {
        while let Some(c) = self.peek() {
            if c == '\n' {
                let span = Span::new(self.pos, self.pos + 1, self.line, self.column);
                self.tokens.push(Token::new(TokenKind::Newline, "\n", span));
                self.pos += 1;
                self.line += 1;
                self.column = 1;
                continue;
            }
            if c == ' ' || c == '\t' || c == '\r' {
                self.advance();
                continue;
            }
            if c == '#' {
                if self.column == 1 {
                    self.scan_heading();
                } else {
                    self.scan_comment();
                }
                continue;
            }
            self.scan_token();
        }
        let end = Span::new(self.pos, self.pos, self.line, self.column);
        self.tokens.push(Token::new(TokenKind::Eof, "", end));
        LexOutput {
            tokens: self.tokens,
            errors: self.errors,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        self.column += 1;
        Some(c)
    }

    fn span_from(&self, start: usize, start_col: u32) -> Span {
        Span::new(start, self.pos, self.line, start_col)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_to_newline(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn scan_heading(&mut self) {
        let start = self.pos;
        let start_col = self.column;
        let mut level = 0u8;
        while self.peek() == Some('#') {
            self.advance();
            level = level.saturating_add(1);
        }
        let text_start = self.pos;
        self.skip_to_newline();
        let text = self.src[text_start..self.pos].trim().to_string();
        let span = self.span_from(start, start_col);
        self.tokens.push(Token::new(
            TokenKind::Heading,
            format!("{level}:{text}"),
            span,
        ));
    }

    fn scan_comment(&mut self) {
        let start = self.pos;
        let start_col = self.column;
        self.skip_to_newline();
        let text = self.src[start..self.pos].to_string();
        let span = self.span_from(start, start_col);
        self.tokens.push(Token::new(TokenKind::Comment, text, span));
    }

    fn scan_token(&mut self) {
        if self.scan_adjacent_currency() {
            return;
        }
        let Some(c) = self.peek() else { return };
        if c.is_ascii_digit() {
            self.scan_number();
            return;
        }
        if c.is_alphabetic() || c == '_' {
            self.scan_word();
            return;
        }
        if self.scan_operator() {
            return;
        }
        // Unit names that start with a symbol character (°C, ′, ″).
        let line_rest: &str = self.rest().split('\n').next().unwrap_or("");
        if let Some(m) = self.data.find_longest_match(line_rest) {
            let start = self.pos;
            let start_col = self.column;
            let lexeme = &self.src[start..start + m.length];
            for _ in 0..lexeme.chars().count() {
                self.advance();
            }
            let span = self.span_from(start, start_col);
            self.tokens
                .push(Token::new(TokenKind::Unit, lexeme.to_string(), span));
            return;
        }

        let span = Span::new(self.pos, self.pos + c.len_utf8(), self.line, self.column);
        self.errors.push(LexerError::new(
            span,
            format!("unknown character `{c}`"),
        ));
        self.skip_to_newline();
    }

    /// Match up to four leading characters against the adjacent currency
    /// symbol tables (`US$`, `€`, `$`), longest first. Unambiguous symbols
    /// emit the canonical code, ambiguous ones their dimension id.
    fn scan_adjacent_currency(&mut self) -> bool {
        let rest = self.rest();
        for len in (1..=4).rev() {
            let candidate: String = rest.chars().take(len).collect();
            if candidate.chars().count() < len {
                continue;
            }
            let currencies = self.data.currencies();
            let replacement = currencies
                .code_for_adjacent_symbol(&candidate)
                .or_else(|| currencies.dimension_for_adjacent_symbol(&candidate));
            if let Some(replacement) = replacement {
                let replacement = replacement.to_string();
                let start = self.pos;
                let start_col = self.column;
                for _ in 0..len {
                    self.advance();
                }
                let span = self.span_from(start, start_col);
                self.tokens
                    .push(Token::new(TokenKind::Unit, replacement, span));
                return true;
            }
        }
        false
    }

    fn scan_number(&mut self) {
        let start = self.pos;
        let start_col = self.column;

        // Base-prefixed integer: 0b / 0o / 0x with the digit set checked
        // for the base.
        if self.peek() == Some('0') {
            if let Some(base_char) = self.peek_nth(1) {
                let base = match base_char {
                    'b' | 'B' => Some(2),
                    'o' | 'O' => Some(8),
                    'x' | 'X' => Some(16),
                    _ => None,
                };
                if let Some(base) = base {
                    self.advance();
                    self.advance();
                    let mut digits = 0usize;
                    let mut bad = false;
                    while let Some(c) = self.peek() {
                        if c == '_' {
                            self.advance();
                            continue;
                        }
                        if c.is_ascii_alphanumeric() {
                            if c.to_digit(base).is_some() {
                                digits += 1;
                                self.advance();
                            } else {
                                bad = true;
                                break;
                            }
                        } else {
                            break;
                        }
                    }
                    if bad || digits == 0 {
                        let span = self.span_from(start, start_col);
                        self.errors.push(LexerError::new(
                            span,
                            format!("malformed base-{base} literal"),
                        ));
                        self.skip_to_newline();
                        return;
                    }
                    let span = self.span_from(start, start_col);
                    let lexeme = self.src[start..self.pos].to_string();
                    self.tokens.push(Token::new(TokenKind::Number, lexeme, span));
                    return;
                }
            }
        }

        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
            self.advance();
        }

        let mut plain_integer = true;

        // Fractional part only when a digit follows the separator.
        if self.peek() == Some('.')
            && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit())
        {
            plain_integer = false;
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
                self.advance();
            }
        }

        // Exponent.
        if matches!(self.peek(), Some('e') | Some('E')) {
            let after = self.peek_nth(1);
            let exponent_ok = match after {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => self.peek_nth(2).is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };
            if exponent_ok {
                plain_integer = false;
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        // A digit run followed by `:digit` is a time literal, not a number.
        if plain_integer
            && self.peek() == Some(':')
            && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit())
        {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
            if self.peek() == Some(':')
                && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit())
            {
                self.advance();
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.advance();
                }
            }
            let span = self.span_from(start, start_col);
            let lexeme = self.src[start..self.pos].to_string();
            self.tokens
                .push(Token::new(TokenKind::DateTime, lexeme, span));
            return;
        }

        let span = self.span_from(start, start_col);
        let lexeme = self.src[start..self.pos].to_string();
        self.tokens.push(Token::new(TokenKind::Number, lexeme, span));
    }

    fn scan_word(&mut self) {
        let start = self.pos;
        let start_col = self.column;
        while matches!(self.peek(), Some(c) if is_word_char(c)) {
            self.advance();
        }
        let word = &self.src[start..self.pos];
        let span = self.span_from(start, start_col);
        let kind = self.classify_word(word);
        let lexeme = match kind {
            TokenKind::Unit => self.unit_lexeme(word),
            _ => word.to_string(),
        };
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    /// The 12-step priority order for alphabetic words.
    fn classify_word(&self, word: &str) -> TokenKind {
        if let Some(kw) = Keyword::from_word(word) {
            return TokenKind::Keyword(kw);
        }

        // am/pm: a time marker after an integer hour 1-12 or a time
        // literal; otherwise the atto/picometer unit.
        if word.eq_ignore_ascii_case("am") || word.eq_ignore_ascii_case("pm") {
            let prev = self.tokens.last();
            let is_marker = match prev {
                Some(t) if t.kind == TokenKind::Number => is_integer_hour(&t.lexeme),
                Some(t) if t.kind == TokenKind::DateTime => t.lexeme.contains(':'),
                _ => false,
            };
            if is_marker {
                return TokenKind::DateTime;
            }
            return TokenKind::Unit;
        }

        if temporal::is_datetime_word(word) {
            return TokenKind::DateTime;
        }

        if CONSTANTS.contains(&word) {
            return TokenKind::Identifier;
        }

        if self.data.unit_by_exact_name(word).is_some()
            || self.data.unit_by_lowercase_name(word).is_some()
        {
            return TokenKind::Unit;
        }

        // Superscript-suffixed unit: `m²`, `s⁻¹`.
        if let Some(idx) = word.char_indices().find(|(_, c)| is_superscript(*c)) {
            let prefix = &word[..idx.0];
            if !prefix.is_empty() && self.data.resolve_unit_name(prefix).is_some() {
                return TokenKind::Unit;
            }
        }

        let currencies = self.data.currencies();
        if currencies.code_for_spaced_symbol(word).is_some()
            || currencies.dimension_for_spaced_symbol(word).is_some()
            || currencies.by_code(word).is_some()
            || currencies.code_for_name(word).is_some()
        {
            return TokenKind::Unit;
        }

        if self.data.timezones().contains(word) {
            return TokenKind::Identifier;
        }

        TokenKind::Identifier
    }

    /// Substitute currency words with the canonical code (or the
    /// ambiguous dimension id); plain unit names pass through as typed.
    fn unit_lexeme(&self, word: &str) -> String {
        if self.data.unit_by_exact_name(word).is_some()
            || self.data.unit_by_lowercase_name(word).is_some()
        {
            return word.to_string();
        }
        if word.chars().any(is_superscript) {
            return word.to_string();
        }
        let currencies = self.data.currencies();
        if let Some(code) = currencies.code_for_spaced_symbol(word) {
            return code.to_string();
        }
        if let Some(dim) = currencies.dimension_for_spaced_symbol(word) {
            return dim.to_string();
        }
        if let Some(c) = currencies.by_code(word) {
            return c.code.clone();
        }
        if let Some(code) = currencies.code_for_name(word) {
            return code.to_string();
        }
        word.to_string()
    }

    fn scan_operator(&mut self) -> bool {
        let start = self.pos;
        let start_col = self.column;
        let c = match self.peek() {
            Some(c) => c,
            None => return false,
        };
        let next = self.peek_nth(1);

        let (kind, len) = match (c, next) {
            ('&', Some('&')) => (TokenKind::AmpAmp, 2),
            ('|', Some('|')) => (TokenKind::PipePipe, 2),
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::BangEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('<', Some('<')) => (TokenKind::Shl, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('>', Some('>')) => (TokenKind::Shr, 2),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) | ('×', _) | ('·', _) => (TokenKind::Star, 1),
            ('/', _) | ('÷', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('^', _) => (TokenKind::Caret, 1),
            ('!', _) => (TokenKind::Bang, 1),
            ('~', _) => (TokenKind::Tilde, 1),
            ('&', _) => (TokenKind::Amp, 1),
            ('|', _) => (TokenKind::Pipe, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('=', _) => (TokenKind::Assign, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('→', _) => (TokenKind::Arrow, 1),
            _ => return false,
        };

        for _ in 0..len {
            self.advance();
        }
        let span = self.span_from(start, start_col);
        let lexeme = self.src[start..self.pos].to_string();
        self.tokens.push(Token::new(kind, lexeme, span));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataSet;

    fn lex(src: &str) -> LexOutput {
        let data = DataSet::with_defaults().unwrap();
        tokenize(src, &data)
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn numbers_and_time_literals() {
        let out = lex("10:30 1_000 3.5e-2 0xFF");
        let toks: Vec<_> = out
            .tokens
            .iter()
            .map(|t| (t.kind, t.lexeme.as_str()))
            .collect();
        assert_eq!(
            toks,
            vec![
                (TokenKind::DateTime, "10:30"),
                (TokenKind::Number, "1_000"),
                (TokenKind::Number, "3.5e-2"),
                (TokenKind::Number, "0xFF"),
                (TokenKind::Eof, ""),
            ]
        );
        assert!(out.errors.is_empty());
    }

    #[test]
    fn am_pm_disambiguation() {
        // `10 am` is a time; hour out of range or fractional keeps the
        // attometer reading.
        let t = lex("10 am").tokens;
        assert_eq!(t[1].kind, TokenKind::DateTime);
        let t = lex("10.0 am").tokens;
        assert_eq!(t[1].kind, TokenKind::Unit);
        let t = lex("13 am").tokens;
        assert_eq!(t[1].kind, TokenKind::Unit);
        let t = lex("10:30 pm").tokens;
        assert_eq!(t[1].kind, TokenKind::DateTime);
    }

    #[test]
    fn heading_and_comment() {
        let out = lex("## Budget\n2 + 2 # trailing note\n");
        assert_eq!(out.tokens[0].kind, TokenKind::Heading);
        assert_eq!(out.tokens[0].lexeme, "2:Budget");
        let comment = out
            .tokens
            .iter()
            .find(|t| t.kind == TokenKind::Comment)
            .unwrap();
        assert!(comment.lexeme.starts_with("# trailing"));
    }

    #[test]
    fn currency_symbols() {
        let t = lex("$100").tokens;
        assert_eq!(t[0].kind, TokenKind::Unit);
        assert_eq!(t[0].lexeme, "currency_symbol_0024");
        assert_eq!(t[1].kind, TokenKind::Number);

        let t = lex("US$100").tokens;
        assert_eq!(t[0].lexeme, "USD");

        let t = lex("100 EUR").tokens;
        assert_eq!(t[1].kind, TokenKind::Unit);
        assert_eq!(t[1].lexeme, "EUR");

        let t = lex("50 dollars").tokens;
        assert_eq!(t[1].lexeme, "USD");
    }

    #[test]
    fn units_and_superscripts() {
        let t = lex("5 m² 3 s⁻¹").tokens;
        assert_eq!(t[1].kind, TokenKind::Unit);
        assert_eq!(t[1].lexeme, "m²");
        assert_eq!(t[3].kind, TokenKind::Unit);
        assert_eq!(t[3].lexeme, "s⁻¹");
    }

    #[test]
    fn degree_symbol_units() {
        let t = lex("25°C").tokens;
        assert_eq!(t[0].kind, TokenKind::Number);
        assert_eq!(t[1].kind, TokenKind::Unit);
        assert_eq!(t[1].lexeme, "°C");
    }

    #[test]
    fn month_words_are_datetime() {
        assert_eq!(
            kinds("1970 Jan 31"),
            vec![
                TokenKind::Number,
                TokenKind::DateTime,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords_and_constants() {
        let t = lex("x to km if pi").tokens;
        assert_eq!(t[0].kind, TokenKind::Identifier);
        assert_eq!(t[1].kind, TokenKind::Keyword(Keyword::To));
        assert_eq!(t[2].kind, TokenKind::Unit);
        assert_eq!(t[3].kind, TokenKind::Keyword(Keyword::If));
        assert_eq!(t[4].kind, TokenKind::Identifier);
    }

    #[test]
    fn unknown_character_recovers_on_next_line() {
        let out = lex("2 @ 2\n1 + 1\n");
        assert_eq!(out.errors.len(), 1);
        // The bad line is abandoned, the next line lexes normally.
        let after_first_newline: Vec<_> = out
            .tokens
            .iter()
            .skip_while(|t| t.kind != TokenKind::Newline)
            .skip(1)
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            after_first_newline,
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn malformed_base_literal_is_an_error() {
        let out = lex("0b102");
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.contains("base-2"));
    }
}
