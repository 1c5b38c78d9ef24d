use crate::ast::Span;
use crate::error::{LexError, LexErrorKind};
use std::fmt;

/// The different kinds of tokens the lexer produces.
#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    // == Special Tokens ==
    /// End of the input.
    Eof,
    /// A `//` or `/* */` comment. Only produced when comments are retained.
    Comment(String),

    // == Literals ==
    /// Keys, type names, namespace segments and contextual keywords
    /// such as `enum`, `schema` or `required`.
    Identifier(String),
    /// A double-quoted string with its escapes already decoded.
    String(String),
    Integer(i64),
    Float(f64),
    /// A bare `${...}` outside of a string. Holds the raw text including `${` and `}`.
    Interpolation(String),

    // == Keywords ==
    True,
    False,
    Null,
    /// `@include` or `@import`
    Include,

    // == Punctuation ==
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Equals,
    /// `::` between namespace segments
    DoubleColon,

    // == Rule operators ==
    Dot,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    EqualEqual,
    NotEqual,
    And,
    Or,
    Bang,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Eof => write!(f, "end of file"),
            TokenType::Comment(_) => write!(f, "comment"),
            TokenType::Identifier(name) => write!(f, "identifier '{name}'"),
            TokenType::String(s) => write!(f, "string \"{s}\""),
            TokenType::Integer(i) => write!(f, "integer {i}"),
            TokenType::Float(n) => write!(f, "float {n}"),
            TokenType::Interpolation(raw) => write!(f, "interpolation {raw}"),
            TokenType::True => write!(f, "'true'"),
            TokenType::False => write!(f, "'false'"),
            TokenType::Null => write!(f, "'null'"),
            TokenType::Include => write!(f, "'@include'"),
            TokenType::LBrace => write!(f, "'{{'"),
            TokenType::RBrace => write!(f, "'}}'"),
            TokenType::LBracket => write!(f, "'['"),
            TokenType::RBracket => write!(f, "']'"),
            TokenType::LParen => write!(f, "'('"),
            TokenType::RParen => write!(f, "')'"),
            TokenType::Comma => write!(f, "','"),
            TokenType::Semicolon => write!(f, "';'"),
            TokenType::Equals => write!(f, "'='"),
            TokenType::DoubleColon => write!(f, "'::'"),
            TokenType::Dot => write!(f, "'.'"),
            TokenType::Greater => write!(f, "'>'"),
            TokenType::GreaterEqual => write!(f, "'>='"),
            TokenType::Less => write!(f, "'<'"),
            TokenType::LessEqual => write!(f, "'<='"),
            TokenType::EqualEqual => write!(f, "'=='"),
            TokenType::NotEqual => write!(f, "'!='"),
            TokenType::And => write!(f, "'&&'"),
            TokenType::Or => write!(f, "'||'"),
            TokenType::Bang => write!(f, "'!'"),
        }
    }
}

/// A token with its type, source text and position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub ttype: TokenType,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
    pub pos_start: usize,
    pub pos_end: usize,
}

impl Token {
    pub fn span(&self) -> Span {
        Span::new(self.pos_start, self.pos_end, self.line, self.column)
    }
}

/// Tokenizes a complete CFGPP source text. Comments are dropped.
///
/// # Errors
/// Returns a `LexError` for the first malformed token.
pub fn tokenize(text: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(text).lex()
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    position: usize,
    line: usize,
    column: usize,
    keep_comments: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().peekable(),
            position: 0,
            line: 1,
            column: 1,
            keep_comments: false,
        }
    }

    /// Keep `Comment` tokens in the output instead of discarding them.
    #[must_use]
    pub fn with_comments(mut self, keep: bool) -> Self {
        self.keep_comments = keep;
        self
    }

    pub fn lex(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.ttype == TokenType::Eof;
            if self.keep_comments || !matches!(token.ttype, TokenType::Comment(_)) {
                tokens.push(token);
            }
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let start_pos = self.position;
        let (line, column) = (self.line, self.column);

        let ttype = if let Some(ch) = self.advance() {
            match ch {
                '{' => TokenType::LBrace,
                '}' => TokenType::RBrace,
                '[' => TokenType::LBracket,
                ']' => TokenType::RBracket,
                '(' => TokenType::LParen,
                ')' => TokenType::RParen,
                ',' => TokenType::Comma,
                ';' => TokenType::Semicolon,
                '.' => TokenType::Dot,
                '=' => self.either('=', TokenType::EqualEqual, TokenType::Equals),
                '>' => self.either('=', TokenType::GreaterEqual, TokenType::Greater),
                '<' => self.either('=', TokenType::LessEqual, TokenType::Less),
                '!' => self.either('=', TokenType::NotEqual, TokenType::Bang),
                ':' if self.peek() == Some(&':') => {
                    self.advance();
                    TokenType::DoubleColon
                }
                '&' if self.peek() == Some(&'&') => {
                    self.advance();
                    TokenType::And
                }
                '|' if self.peek() == Some(&'|') => {
                    self.advance();
                    TokenType::Or
                }
                '/' if self.peek() == Some(&'/') => self.read_line_comment(),
                '/' if self.peek() == Some(&'*') => self.read_block_comment(start_pos, line, column)?,
                '"' => self.read_string(start_pos, line, column)?,
                '@' => self.read_directive(start_pos, line, column)?,
                '$' => self.read_interpolation(start_pos, line, column)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(c),
                c if c.is_ascii_digit() => self.read_number(c, start_pos, line, column)?,
                '-' | '+' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                    self.read_number(ch, start_pos, line, column)?
                }
                c => {
                    return Err(self.error(
                        LexErrorKind::UnexpectedCharacter,
                        format!("unexpected character '{c}'"),
                        start_pos,
                        line,
                        column,
                    ))
                }
            }
        } else {
            TokenType::Eof
        };

        Ok(Token {
            ttype,
            lexeme: self.input[start_pos..self.position].to_string(),
            line,
            column,
            pos_start: start_pos,
            pos_end: self.position,
        })
    }

    fn advance(&mut self) -> Option<char> {
        let char = self.chars.next();
        if let Some(c) = char {
            self.position += c.len_utf8();
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        char
    }

    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next()
    }

    fn either(&mut self, next: char, matched: TokenType, otherwise: TokenType) -> TokenType {
        if self.peek() == Some(&next) {
            self.advance();
            matched
        } else {
            otherwise
        }
    }

    fn error(
        &self,
        kind: LexErrorKind,
        message: String,
        start: usize,
        line: usize,
        column: usize,
    ) -> LexError {
        LexError {
            kind,
            message,
            line,
            column,
            span: (start, self.position.max(start + 1) - start).into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_line_comment(&mut self) -> TokenType {
        self.advance(); // Consume the second '/'
        let mut comment_text = String::new();
        while let Some(&c) = self.peek() {
            if c == '\n' {
                break;
            }
            comment_text.push(c);
            self.advance();
        }
        TokenType::Comment(comment_text.trim().to_string())
    }

    fn read_block_comment(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<TokenType, LexError> {
        self.advance(); // Consume the '*'
        let mut comment_text = String::new();
        while let Some(c) = self.advance() {
            if c == '*' && self.peek() == Some(&'/') {
                self.advance();
                return Ok(TokenType::Comment(comment_text.trim().to_string()));
            }
            comment_text.push(c);
        }
        Err(self.error(
            LexErrorKind::UnterminatedComment,
            "unterminated block comment".to_string(),
            start,
            line,
            column,
        ))
    }

    fn read_string(&mut self, start: usize, line: usize, column: usize) -> Result<TokenType, LexError> {
        let mut value = String::new();
        while let Some(c) = self.advance() {
            match c {
                '"' => return Ok(TokenType::String(value)),
                '\\' => {
                    let escape_start = self.position - 1;
                    let (escape_line, escape_column) = (self.line, self.column - 1);
                    match self.advance() {
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some('n') => value.push('\n'),
                        Some('r') => value.push('\r'),
                        Some('t') => value.push('\t'),
                        Some(other) => {
                            return Err(self.error(
                                LexErrorKind::InvalidEscape,
                                format!("invalid escape sequence '\\{other}'"),
                                escape_start,
                                escape_line,
                                escape_column,
                            ))
                        }
                        None => break,
                    }
                }
                c => value.push(c),
            }
        }
        Err(self.error(
            LexErrorKind::UnterminatedString,
            "unterminated string literal".to_string(),
            start,
            line,
            column,
        ))
    }

    fn read_directive(&mut self, start: usize, line: usize, column: usize) -> Result<TokenType, LexError> {
        let mut name = String::new();
        while let Some(&c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match name.as_str() {
            "include" | "import" => Ok(TokenType::Include),
            _ => Err(self.error(
                LexErrorKind::UnexpectedCharacter,
                format!("unknown directive '@{name}'"),
                start,
                line,
                column,
            )),
        }
    }

    /// Reads `${...}` up to the matching closing brace; defaults may nest further references.
    fn read_interpolation(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<TokenType, LexError> {
        if self.peek() != Some(&'{') {
            return Err(self.error(
                LexErrorKind::UnexpectedCharacter,
                "expected '{' after '$'".to_string(),
                start,
                line,
                column,
            ));
        }
        self.advance();
        let mut depth = 1;
        while let Some(c) = self.advance() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(TokenType::Interpolation(
                            self.input[start..self.position].to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }
        Err(self.error(
            LexErrorKind::UnterminatedInterpolation,
            "unterminated variable reference".to_string(),
            start,
            line,
            column,
        ))
    }

    fn read_identifier(&mut self, first_char: char) -> TokenType {
        let mut ident = String::new();
        ident.push(first_char);

        while let Some(&c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match ident.as_str() {
            "true" => TokenType::True,
            "false" => TokenType::False,
            "null" => TokenType::Null,
            _ => TokenType::Identifier(ident),
        }
    }

    fn read_number(
        &mut self,
        first_char: char,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<TokenType, LexError> {
        let mut number_str = String::new();
        number_str.push(first_char);
        let mut is_float = false;

        self.read_digits(&mut number_str);

        if self.peek() == Some(&'.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            number_str.push('.');
            self.advance();
            self.read_digits(&mut number_str);
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            let mut ahead = self.chars.clone();
            ahead.next();
            let exponent_follows = match ahead.next() {
                Some('+' | '-') => ahead.next().is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if exponent_follows {
                is_float = true;
                if let Some(e) = self.advance() {
                    number_str.push(e);
                }
                if let Some(&sign @ ('+' | '-')) = self.peek() {
                    number_str.push(sign);
                    self.advance();
                }
                self.read_digits(&mut number_str);
            }
        }

        if is_float {
            return number_str.parse::<f64>().map(TokenType::Float).map_err(|_| {
                self.error(
                    LexErrorKind::UnexpectedCharacter,
                    format!("invalid number '{number_str}'"),
                    start,
                    line,
                    column,
                )
            });
        }

        number_str.parse::<i64>().map(TokenType::Integer).map_err(|_| {
            self.error(
                LexErrorKind::IntegerOutOfRange,
                format!("integer '{number_str}' does not fit in 64 bits"),
                start,
                line,
                column,
            )
        })
    }

    fn read_digits(&mut self, out: &mut String) {
        while let Some(&c) = self.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.advance();
            } else {
                break;
            }
        }
    }
}
