use crate::kernel::errors::Error;
use crate::kernel::tree::Position;
use crate::syntax::table::SyntaxRef;

/// Token classification produced by the scanner. `LongText` is synthesized
/// by the parser when a text-delimiter pair from the syntax table opens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    Eof,
    Integer,
    Real,
    Text,
    LongText,
    Name,
    Symbol,
    Newline,
    ParOpen,
    ParClose,
    Indent,
    Unindent,
    Error,
}

/// The scanner: bytes to tokens, with indent tracking.
///
/// Scanning is simple. Numbers begin with a digit and may carry a base
/// (`16#FF`), digit grouping (`1_980_000`) and exponents (`1.31E-6`,
/// `16#FF#E2`). Names begin with a letter. Text is quote-delimited with the
/// quote doubled to escape it. Symbols are runs of punctuation, split
/// against the syntax table's known tokens; the six parenthese characters
/// always stand alone. Indentation is significant and bracketed by Indent
/// and Unindent tokens, which always balance.
pub struct Scanner {
    syntax: SyntaxRef,
    chars: Vec<char>,
    offsets: Vec<usize>,
    pos: usize,
    base: Position,
    token_start: Position,
    token_text: String,
    text_value: String,
    integer_value: i64,
    real_value: f64,
    number_base: u32,
    indent: usize,
    indents: Vec<usize>,
    pending_unindents: usize,
    checking_indent: bool,
    column: usize,
    indent_char: Option<char>,
    paren_depth: usize,
    had_space_before: bool,
    had_space_after: bool,
    errors: Vec<Error>,
}

fn is_symbol_char(c: char) -> bool {
    !c.is_alphanumeric()
        && !c.is_whitespace()
        && c != '"'
        && c != '\''
        && !"()[]{}".contains(c)
}

impl Scanner {
    pub fn new(input: &str, base: Position, syntax: SyntaxRef) -> Scanner {
        let mut chars = Vec::new();
        let mut offsets = Vec::new();
        for (offset, c) in input.char_indices() {
            chars.push(c);
            offsets.push(offset);
        }
        Scanner {
            syntax,
            chars,
            offsets,
            pos: 0,
            base,
            token_start: base,
            token_text: String::new(),
            text_value: String::new(),
            integer_value: 0,
            real_value: 0.0,
            number_base: 10,
            indent: 0,
            indents: Vec::new(),
            pending_unindents: 0,
            checking_indent: false,
            column: 0,
            indent_char: None,
            paren_depth: 0,
            had_space_before: false,
            had_space_after: false,
            errors: Vec::new(),
        }
    }

    pub fn syntax(&self) -> SyntaxRef {
        self.syntax.clone()
    }

    /// Redirect tokenization to another table; used for child syntaxes.
    pub fn set_syntax(&mut self, syntax: SyntaxRef) {
        self.syntax = syntax;
    }

    pub fn token_text(&self) -> &str {
        &self.token_text
    }

    pub fn set_token_text(&mut self, text: &str) {
        self.token_text = text.to_string();
    }

    /// The value of a Name or Symbol token.
    pub fn name_value(&self) -> &str {
        &self.token_text
    }

    pub fn text_value(&self) -> &str {
        &self.text_value
    }

    pub fn set_text_value(&mut self, value: &str) {
        self.text_value = value.to_string();
    }

    pub fn integer_value(&self) -> i64 {
        self.integer_value
    }

    pub fn real_value(&self) -> f64 {
        self.real_value
    }

    /// The base the last number was written in.
    pub fn number_base(&self) -> u32 {
        self.number_base
    }

    /// Position of the start of the current token.
    pub fn position(&self) -> Position {
        self.token_start
    }

    pub fn had_space_before(&self) -> bool {
        self.had_space_before
    }

    pub fn had_space_after(&self) -> bool {
        self.had_space_after
    }

    pub fn take_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.errors)
    }

    /// Indentation is ignored between parentheses.
    pub fn open_paren(&mut self) {
        self.paren_depth += 1;
    }

    pub fn close_paren(&mut self) {
        self.paren_depth = self.paren_depth.saturating_sub(1);
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn here(&self) -> Position {
        if self.pos < self.offsets.len() {
            self.base + self.offsets[self.pos]
        } else {
            self.base + self.offsets.last().map(|o| o + 1).unwrap_or(0)
        }
    }

    pub fn next_token(&mut self) -> TokenKind {
        self.had_space_before = false;

        if self.pending_unindents > 0 {
            self.pending_unindents -= 1;
            self.token_start = self.here();
            return TokenKind::Unindent;
        }

        // Skip blanks, tracking line starts and indentation.
        loop {
            if self.at_eof() {
                self.token_start = self.here();
                if !self.indents.is_empty() {
                    self.pending_unindents = self.indents.len();
                    self.indents.clear();
                    self.indent = 0;
                    self.pending_unindents -= 1;
                    return TokenKind::Unindent;
                }
                return TokenKind::Eof;
            }
            let c = self.chars[self.pos];
            if c == '\n' {
                self.pos += 1;
                if self.paren_depth == 0 {
                    self.checking_indent = true;
                    self.column = 0;
                }
                self.token_start = self.here();
                self.had_space_after = true;
                return TokenKind::Newline;
            }
            if c == ' ' || c == '\t' {
                if self.checking_indent && self.paren_depth == 0 {
                    match self.indent_char {
                        Some(known) if known != c => {
                            self.errors.push(Error::lexical(
                                "mixed tabs and spaces in indentation",
                                self.here(),
                            ));
                            self.indent_char = Some(c);
                        }
                        None => self.indent_char = Some(c),
                        _ => {}
                    }
                    self.column += 1;
                }
                self.had_space_before = true;
                self.pos += 1;
                continue;
            }
            if self.checking_indent {
                self.checking_indent = false;
                if self.paren_depth == 0 {
                    self.token_start = self.here();
                    if self.column > self.indent {
                        self.indents.push(self.indent);
                        self.indent = self.column;
                        return TokenKind::Indent;
                    }
                    while self.column < self.indent {
                        match self.indents.pop() {
                            Some(previous) => {
                                self.indent = previous;
                                self.pending_unindents += 1;
                            }
                            None => break,
                        }
                    }
                    if self.pending_unindents > 0 {
                        self.pending_unindents -= 1;
                        return TokenKind::Unindent;
                    }
                }
            }
            break;
        }

        self.token_start = self.here();
        let c = self.chars[self.pos];
        let kind = if c.is_ascii_digit() {
            self.scan_number()
        } else if c.is_alphabetic() {
            self.scan_name()
        } else if c == '"' || c == '\'' {
            self.scan_text()
        } else if "([{".contains(c) {
            self.pos += 1;
            self.token_text = c.to_string();
            TokenKind::ParOpen
        } else if ")]}".contains(c) {
            self.pos += 1;
            self.token_text = c.to_string();
            TokenKind::ParClose
        } else {
            self.scan_symbol()
        };

        self.had_space_after = match self.peek() {
            None => true,
            Some(next) => next.is_whitespace(),
        };
        kind
    }

    fn scan_name(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.token_text = self.chars[start..self.pos].iter().collect();
        self.text_value = self.token_text.clone();
        TokenKind::Name
    }

    fn scan_symbol(&mut self) -> TokenKind {
        let mut symbol = self.chars[self.pos].to_string();
        self.pos += 1;
        while let Some(c) = self.peek() {
            if !is_symbol_char(c) {
                break;
            }
            let mut extended = symbol.clone();
            extended.push(c);
            let known = {
                let syntax = self.syntax.borrow();
                if syntax.known_token(&extended) || syntax.known_prefix(&extended) {
                    true
                } else {
                    // A complete known symbol is not extended past itself.
                    !(syntax.known_token(&symbol) || syntax.known_prefix(&symbol))
                }
            };
            if !known {
                break;
            }
            symbol = extended;
            self.pos += 1;
        }
        self.token_text = symbol;
        self.text_value = self.token_text.clone();
        TokenKind::Symbol
    }

    fn scan_text(&mut self) -> TokenKind {
        let quote = self.chars[self.pos];
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.errors.push(Error::lexical(
                        "text does not end on the same line",
                        self.token_start,
                    ));
                    self.text_value = value;
                    self.token_text = format!("{}{}", quote, self.text_value);
                    return TokenKind::Error;
                }
                Some(c) if c == quote => {
                    if self.peek_at(1) == Some(quote) {
                        value.push(quote);
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        break;
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        self.token_text = format!("{}{}{}", quote, value, quote);
        self.text_value = value;
        TokenKind::Text
    }

    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        let mut base: u32 = 10;
        let mut integer: i64 = 0;
        let mut real: f64 = 0.0;
        let mut is_real = false;

        self.scan_digits(10, &mut integer, &mut real);

        // Base notation: 16#FF
        if self.peek() == Some('#')
            && self
                .peek_at(1)
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false)
            && self.peek_at(1) != Some('E')
        {
            if !(2..=36).contains(&(integer as i64)) {
                self.errors
                    .push(Error::lexical("invalid base for number", self.token_start));
            } else {
                base = integer as u32;
            }
            integer = 0;
            real = 0.0;
            self.pos += 1;
            self.scan_digits(base, &mut integer, &mut real);
        }

        // Fractional part.
        if self.peek() == Some('.')
            && self
                .peek_at(1)
                .and_then(|c| c.to_digit(base))
                .is_some()
        {
            self.pos += 1;
            is_real = true;
            let mut scale = 1.0f64;
            while let Some(c) = self.peek() {
                if c == '_' {
                    self.pos += 1;
                    continue;
                }
                match c.to_digit(base) {
                    Some(digit) => {
                        scale /= base as f64;
                        real += digit as f64 * scale;
                        self.pos += 1;
                    }
                    None => break,
                }
            }
        }

        // Exponent: E for base 10, #E otherwise, power of the base.
        let mut exponent: i64 = 0;
        let mut has_exponent = false;
        if base == 10 && matches!(self.peek(), Some('e') | Some('E')) {
            let mut ahead = 1;
            let mut sign = 1i64;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                if self.peek_at(1) == Some('-') {
                    sign = -1;
                }
                ahead = 2;
            }
            if self.peek_at(ahead).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.pos += ahead;
                has_exponent = true;
                let mut e: i64 = 0;
                let mut unused = 0.0;
                self.scan_digits(10, &mut e, &mut unused);
                exponent = sign * e;
            }
        } else if self.peek() == Some('#') && self.peek_at(1) == Some('E') {
            self.pos += 2;
            let mut sign = 1i64;
            if matches!(self.peek(), Some('+') | Some('-')) {
                if self.peek() == Some('-') {
                    sign = -1;
                }
                self.pos += 1;
            }
            has_exponent = true;
            let mut e: i64 = 0;
            let mut unused = 0.0;
            self.scan_digits(10, &mut e, &mut unused);
            exponent = sign * e;
        }

        // `real` mirrors the full value: integer digits plus any fraction.
        if has_exponent {
            if exponent < 0 {
                is_real = true;
            }
            let factor = (base as f64).powi(exponent.clamp(-1024, 1024) as i32);
            real *= factor;
            if !is_real {
                let mut int_factor: i64 = 1;
                for _ in 0..exponent {
                    int_factor = int_factor.wrapping_mul(base as i64);
                }
                integer = integer.wrapping_mul(int_factor);
            }
        }

        self.token_text = self.chars[start..self.pos].iter().collect();
        self.number_base = base;
        if is_real {
            self.real_value = real;
            TokenKind::Real
        } else {
            self.integer_value = integer;
            TokenKind::Integer
        }
    }

    fn scan_digits(&mut self, base: u32, integer: &mut i64, real: &mut f64) {
        while let Some(c) = self.peek() {
            if c == '_' {
                // Grouping only between digits.
                if self.peek_at(1).and_then(|d| d.to_digit(base)).is_some() {
                    self.pos += 1;
                    continue;
                }
                break;
            }
            match c.to_digit(base) {
                Some(digit) => {
                    *integer = integer.wrapping_mul(base as i64).wrapping_add(digit as i64);
                    *real = *real * base as f64 + digit as f64;
                    self.pos += 1;
                }
                None => break,
            }
        }
    }

    /// Read raw input until the closing delimiter, consuming it. The
    /// returned text includes the closing delimiter; comment and long-text
    /// handling in the parser strips it as needed. With `strip_indent`,
    /// leading indentation up to the current level is removed on each line.
    pub fn read_until(&mut self, closing: &str, strip_indent: bool) -> String {
        let closing_chars: Vec<char> = closing.chars().collect();
        let mut collected = String::new();
        loop {
            if self.at_eof() {
                self.errors.push(Error::lexical(
                    format!("missing '{}' delimiter before end of text", closing.escape_debug()),
                    self.here(),
                ));
                break;
            }
            if self.matches_here(&closing_chars) {
                self.pos += closing_chars.len();
                collected.push_str(closing);
                if closing == "\n" && self.paren_depth == 0 {
                    self.checking_indent = true;
                    self.column = 0;
                }
                break;
            }
            let c = self.chars[self.pos];
            collected.push(c);
            self.pos += 1;
            if c == '\n' && strip_indent {
                // Drop the indentation of continuation lines.
                let mut skipped = 0;
                while skipped < self.indent {
                    match self.peek() {
                        Some(' ') | Some('\t') => {
                            self.pos += 1;
                            skipped += 1;
                        }
                        _ => break,
                    }
                }
            }
        }
        collected
    }

    fn matches_here(&self, what: &[char]) -> bool {
        self.chars[self.pos..]
            .iter()
            .take(what.len())
            .eq(what.iter())
            && self.pos + what.len() <= self.chars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::table::SyntaxTable;

    fn scan_all(input: &str) -> Vec<(TokenKind, String)> {
        let syntax = SyntaxTable::arbor().expect("default syntax");
        let mut scanner = Scanner::new(input, 0, syntax);
        let mut tokens = Vec::new();
        loop {
            let kind = scanner.next_token();
            tokens.push((kind, scanner.token_text().to_string()));
            if kind == TokenKind::Eof {
                break;
            }
        }
        tokens
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        scan_all(input).into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_scan_numbers() {
        let syntax = SyntaxTable::arbor().unwrap();
        let mut scanner = Scanner::new("42 1_980_000 16#FF 2#1010 3.25 1E3", 0, syntax);
        assert_eq!(scanner.next_token(), TokenKind::Integer);
        assert_eq!(scanner.integer_value(), 42);
        assert_eq!(scanner.next_token(), TokenKind::Integer);
        assert_eq!(scanner.integer_value(), 1_980_000);
        assert_eq!(scanner.next_token(), TokenKind::Integer);
        assert_eq!(scanner.integer_value(), 255);
        assert_eq!(scanner.next_token(), TokenKind::Integer);
        assert_eq!(scanner.integer_value(), 10);
        assert_eq!(scanner.next_token(), TokenKind::Real);
        assert!((scanner.real_value() - 3.25).abs() < 1e-9);
        assert_eq!(scanner.next_token(), TokenKind::Integer);
        assert_eq!(scanner.integer_value(), 1000);
    }

    #[test]
    fn test_scan_text_with_doubled_quotes() {
        let syntax = SyntaxTable::arbor().unwrap();
        let mut scanner = Scanner::new(r#""say ""hi"" now" 'x'"#, 0, syntax);
        assert_eq!(scanner.next_token(), TokenKind::Text);
        assert_eq!(scanner.text_value(), "say \"hi\" now");
        assert_eq!(scanner.next_token(), TokenKind::Text);
        assert_eq!(scanner.text_value(), "x");
    }

    #[test]
    fn test_unterminated_text_is_an_error() {
        let syntax = SyntaxTable::arbor().unwrap();
        let mut scanner = Scanner::new("\"oops\nnext", 0, syntax);
        assert_eq!(scanner.next_token(), TokenKind::Error);
        assert!(!scanner.take_errors().is_empty());
    }

    #[test]
    fn test_space_flags() {
        let syntax = SyntaxTable::arbor().unwrap();
        let mut scanner = Scanner::new("a -b", 0, syntax);
        assert_eq!(scanner.next_token(), TokenKind::Name);
        assert_eq!(scanner.next_token(), TokenKind::Symbol);
        assert_eq!(scanner.token_text(), "-");
        assert!(scanner.had_space_before());
        assert!(!scanner.had_space_after());
    }

    #[test]
    fn test_symbols_split_against_known_tokens() {
        // With the default table, `<=` is one token and `:=` is not.
        let tokens = scan_all("a <= b");
        assert!(tokens.iter().any(|(k, t)| *k == TokenKind::Symbol && t == "<="));
        let tokens = scan_all("x : = y");
        assert!(tokens.iter().any(|(k, t)| *k == TokenKind::Symbol && t == ":"));
    }

    #[test]
    fn test_parens_stand_alone() {
        let tokens = scan_all("--((x))");
        let texts: Vec<String> = tokens.iter().map(|(_, t)| t.clone()).collect();
        assert_eq!(texts[1], "(");
        assert_eq!(texts[2], "(");
        assert_eq!(texts[4], ")");
        assert_eq!(texts[5], ")");
    }

    #[test]
    fn test_indent_tokens_balance() {
        let input = "a\n  b\n    c\nd\n";
        let kinds = kinds(input);
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        let unindents = kinds.iter().filter(|k| **k == TokenKind::Unindent).count();
        assert_eq!(indents, 2);
        assert_eq!(unindents, 2);
    }

    #[test]
    fn test_indentation_ignored_inside_parens() {
        let syntax = SyntaxTable::arbor().unwrap();
        let mut scanner = Scanner::new("(1,\n   2)", 0, syntax);
        assert_eq!(scanner.next_token(), TokenKind::ParOpen);
        scanner.open_paren();
        let mut kinds = Vec::new();
        loop {
            let kind = scanner.next_token();
            if kind == TokenKind::ParClose {
                scanner.close_paren();
            }
            if kind == TokenKind::Eof {
                break;
            }
            kinds.push(kind);
        }
        // Newlines still tokenize, but never indentation.
        assert!(!kinds.contains(&TokenKind::Indent));
        assert!(!kinds.contains(&TokenKind::Unindent));
        assert!(kinds.contains(&TokenKind::Newline));
    }
}
