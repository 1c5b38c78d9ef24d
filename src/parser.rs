use crate::ast::*;
use crate::error::{Diagnostic, LexError, ParserError};
use crate::lexer::{tokenize, Token, TokenType};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// How the parser reacts to a syntax error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// The first error aborts the parse.
    #[default]
    Strict,
    /// A broken top-level entry is dropped; its siblings survive.
    Lenient,
    /// Like `Lenient`, but also recovers between properties inside a body.
    BestEffort,
}

/// Parses a token stream into a `ConfigDocument`.
///
/// In `Strict` mode the first syntax error is returned. The other modes always
/// succeed and report what they skipped as diagnostics, which are also stored
/// on the returned document.
///
/// # Errors
/// Returns a `ParserError` in `Strict` mode when the input is malformed.
pub fn parse(
    tokens: Vec<Token>,
    recovery: RecoveryMode,
) -> Result<(ConfigDocument, Vec<Diagnostic>), ParserError> {
    let mut parser = Parser::new(tokens).with_recovery(recovery);
    let mut document = parser.parse_document()?;
    let diagnostics = std::mem::take(&mut parser.diagnostics);
    document.diagnostics = diagnostics.clone();
    Ok((document, diagnostics))
}

/// A recursive descent parser for CFGPP documents and schemas.
#[derive(Debug)]
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    recovery: RecoveryMode,
    diagnostics: Vec<Diagnostic>,
    // Names of the objects currently being parsed, for diagnostic paths.
    context: Vec<String>,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map_or(true, |t| t.ttype != TokenType::Eof) {
            let (pos, line, column) = tokens
                .last()
                .map_or((0, 1, 1), |t| (t.pos_end, t.line, t.column + t.lexeme.chars().count()));
            tokens.push(Token {
                ttype: TokenType::Eof,
                lexeme: String::new(),
                line,
                column,
                pos_start: pos,
                pos_end: pos,
            });
        }
        Self {
            tokens,
            position: 0,
            recovery: RecoveryMode::Strict,
            diagnostics: Vec::new(),
            context: Vec::new(),
        }
    }

    /// Tokenizes `source` and builds a parser over the result.
    pub fn from_source(source: &str) -> Result<Self, LexError> {
        Ok(Self::new(tokenize(source)?))
    }

    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    // === Main Parsing Methods ===

    /// Document ::= { ObjectDef | EnumDef | Include }
    pub fn parse_document(&mut self) -> Result<ConfigDocument, ParserError> {
        debug!("parsing document ({} tokens, {:?})", self.tokens.len(), self.recovery);
        let mut document = ConfigDocument::new();

        loop {
            self.skip_separators();
            if self.check(&TokenType::Eof) {
                break;
            }
            let entry_start = self.position;
            match self.parse_top_level_entry() {
                Ok(node) => document.insert(node),
                Err(err) => {
                    if self.recovery == RecoveryMode::Strict {
                        return Err(err);
                    }
                    self.record(&err);
                    self.synchronize_top_level(entry_start);
                    warn!(
                        "recovered from syntax error at {}:{}: {}",
                        err.line(),
                        err.column(),
                        err
                    );
                }
            }
        }

        debug!(
            "parsed {} top-level entries with {} diagnostics",
            document.entries.len(),
            self.diagnostics.len()
        );
        Ok(document)
    }

    fn parse_top_level_entry(&mut self) -> Result<AstNode, ParserError> {
        if self.check(&TokenType::Include) {
            return self.parse_include().map(AstNode::Include);
        }
        if self.is_enum_start() {
            return self.parse_enum_def().map(AstNode::Enum);
        }
        if self.check(&TokenType::Identifier(String::new())) {
            let start = self.current_token().span();
            let type_name = self.parse_namespaced_identifier()?;
            return self.parse_object_rest(type_name, start).map(AstNode::Object);
        }
        Err(self.err_unexpected("an object definition, enum or @include"))
    }

    /// ObjectDef ::= NsIdent [ "(" ParamList ")" ] "{" Body "}"
    ///             | NsIdent "(" ParamList ")"
    ///
    /// Called with the type name already consumed.
    fn parse_object_rest(
        &mut self,
        type_name: NamespacedIdentifier,
        start: Span,
    ) -> Result<ObjectDef, ParserError> {
        let params = if self.check(&TokenType::LParen) {
            Some(self.parse_param_list()?)
        } else {
            None
        };

        let body = if self.check(&TokenType::LBrace) {
            self.context.push(type_name.to_string());
            let body = self.parse_body();
            self.context.pop();
            body?
        } else if params.is_some() {
            Vec::new()
        } else {
            return Err(self.err_unexpected(&format!("'(' or '{{' after '{type_name}'")));
        };

        Ok(ObjectDef {
            type_name,
            params: params.unwrap_or_default(),
            body,
            span: self.span_from(start),
        })
    }

    /// Body ::= "{" { Property | ObjectDef | EnumDef | Include | "," | ";" } "}"
    fn parse_body(&mut self) -> Result<Vec<AstNode>, ParserError> {
        let open = self.expect(TokenType::LBrace, "'{'")?;
        let mut body = Vec::new();

        loop {
            self.skip_separators();
            if self.match_token(TokenType::RBrace) {
                break;
            }
            if self.check(&TokenType::Eof) {
                if self.recovery == RecoveryMode::BestEffort {
                    let diagnostic = Diagnostic::error(
                        self.context_path(),
                        "unclosed object at end of file",
                        open.span(),
                    );
                    warn!("closing object opened at {}:{} at end of file", open.line, open.column);
                    self.diagnostics.push(diagnostic);
                    break;
                }
                return Err(self.err_unexpected("'}'"));
            }

            let entry_start = self.position;
            match self.parse_body_entry() {
                Ok(node) => body.push(node),
                Err(err) if self.recovery == RecoveryMode::BestEffort => {
                    self.record(&err);
                    self.synchronize_in_body(entry_start);
                    warn!(
                        "skipped malformed property at {}:{}: {}",
                        err.line(),
                        err.column(),
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(body)
    }

    /// Entry ::= Include | EnumDef | TypeRef Ident "=" Value | Ident "=" Value | ObjectDef
    fn parse_body_entry(&mut self) -> Result<AstNode, ParserError> {
        if self.check(&TokenType::Include) {
            return self.parse_include().map(AstNode::Include);
        }
        if self.is_enum_start() {
            return self.parse_enum_def().map(AstNode::Enum);
        }
        if !self.check(&TokenType::Identifier(String::new())) {
            return Err(self.err_unexpected("a property or object definition"));
        }

        let start = self.current_token().span();
        let first = self.parse_namespaced_identifier()?;

        // `Type[] name = value`
        if self.check(&TokenType::LBracket) && self.peek_is(1, &TokenType::RBracket) {
            self.advance();
            self.advance();
            let declared = TypeRef::new(first, true);
            return self.parse_property_rest(Some(declared), start).map(AstNode::Property);
        }

        match self.current_token().ttype {
            // `Type name = value`
            TokenType::Identifier(_) => {
                let declared = TypeRef::new(first, false);
                self.parse_property_rest(Some(declared), start)
                    .map(AstNode::Property)
            }
            TokenType::Equals => {
                let name = self.simple_name(first, start)?;
                self.advance();
                let value = self.parse_value()?;
                Ok(AstNode::Property(Property {
                    name,
                    declared_type: None,
                    value,
                    span: self.span_from(start),
                }))
            }
            TokenType::LParen | TokenType::LBrace => {
                self.parse_object_rest(first, start).map(AstNode::Object)
            }
            _ => Err(self.err_unexpected("'=', '(' or '{'")),
        }
    }

    /// Reads `name = value` after a declared type.
    fn parse_property_rest(
        &mut self,
        declared_type: Option<TypeRef>,
        start: Span,
    ) -> Result<Property, ParserError> {
        let (name, _) = self.expect_identifier("a property name")?;
        self.expect(TokenType::Equals, "'='")?;
        let value = self.parse_value()?;
        Ok(Property {
            name,
            declared_type,
            value,
            span: self.span_from(start),
        })
    }

    /// ParamList ::= "(" [ Param { "," Param } [ "," ] ] ")"
    pub(crate) fn parse_param_list(&mut self) -> Result<Vec<Param>, ParserError> {
        self.expect(TokenType::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenType::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
                if self.check(&TokenType::RParen) {
                    break; // Allow trailing comma
                }
            }
        }
        self.expect(TokenType::RParen, "')' or ','")?;
        Ok(params)
    }

    /// Param ::= [ TypeRef ] Ident [ "=" Value ]
    fn parse_param(&mut self) -> Result<Param, ParserError> {
        let start = self.current_token().span();
        let first = self.parse_namespaced_identifier()?;

        let (declared_type, name) =
            if self.check(&TokenType::LBracket) && self.peek_is(1, &TokenType::RBracket) {
                self.advance();
                self.advance();
                let (name, _) = self.expect_identifier("a parameter name")?;
                (Some(TypeRef::new(first, true)), name)
            } else if self.check(&TokenType::Identifier(String::new())) {
                let (name, _) = self.expect_identifier("a parameter name")?;
                (Some(TypeRef::new(first, false)), name)
            } else {
                (None, self.simple_name(first, start)?)
            };

        let default = if self.match_token(TokenType::Equals) {
            Some(self.parse_value()?)
        } else {
            None
        };

        Ok(Param {
            name,
            declared_type,
            default,
            span: self.span_from(start),
        })
    }

    /// Value ::= String | Integer | Float | true | false | null | Interpolation
    ///         | Array | NsIdent [ "(" ParamList ")" ] [ "{" Body "}" ]
    pub(crate) fn parse_value(&mut self) -> Result<ValueExpr, ParserError> {
        let token = self.current_token().clone();
        let span = token.span();

        let kind = match &token.ttype {
            TokenType::String(s) => {
                self.advance();
                if s.contains("${") {
                    interpolated_string(s).map_err(|reason| invalid_interpolation(s, reason, span))?
                } else {
                    ValueKind::Scalar(Scalar::String(s.clone()))
                }
            }
            TokenType::Integer(i) => {
                self.advance();
                ValueKind::Scalar(Scalar::Int(*i))
            }
            TokenType::Float(f) => {
                self.advance();
                ValueKind::Scalar(Scalar::Float(*f))
            }
            TokenType::True => {
                self.advance();
                ValueKind::Scalar(Scalar::Bool(true))
            }
            TokenType::False => {
                self.advance();
                ValueKind::Scalar(Scalar::Bool(false))
            }
            TokenType::Null => {
                self.advance();
                ValueKind::Scalar(Scalar::Null)
            }
            TokenType::Interpolation(raw) => {
                self.advance();
                let var = parse_var_ref(raw, true)
                    .map_err(|reason| invalid_interpolation(raw, reason, span))?;
                ValueKind::VarRef(var)
            }
            TokenType::LBracket => return self.parse_array(),
            TokenType::Identifier(_) => return self.parse_constructor(),
            _ => return Err(self.err_unexpected("a value")),
        };

        Ok(ValueExpr::new(kind, span))
    }

    /// Array ::= "[" [ Value { "," Value } [ "," ] ] "]"
    fn parse_array(&mut self) -> Result<ValueExpr, ParserError> {
        let start = self.expect(TokenType::LBracket, "'['")?.span();
        let mut values = Vec::new();
        if !self.check(&TokenType::RBracket) {
            loop {
                values.push(self.parse_value()?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
                if self.check(&TokenType::RBracket) {
                    break; // Allow trailing comma
                }
            }
        }
        self.expect(TokenType::RBracket, "']' or ','")?;
        Ok(ValueExpr::new(ValueKind::Array(values), self.span_from(start)))
    }

    /// Constructor ::= NsIdent [ "(" ParamList ")" ] [ "{" Body "}" ]   (at least one)
    fn parse_constructor(&mut self) -> Result<ValueExpr, ParserError> {
        let start = self.current_token().span();
        let type_name = self.parse_namespaced_identifier()?;

        let params = if self.check(&TokenType::LParen) {
            Some(self.parse_param_list()?)
        } else {
            None
        };
        let body = if self.check(&TokenType::LBrace) {
            self.context.push(type_name.to_string());
            let body = self.parse_body();
            self.context.pop();
            Some(body?)
        } else {
            None
        };

        if params.is_none() && body.is_none() {
            return Err(self.err_unexpected(&format!("'(' or '{{' after type name '{type_name}'")));
        }

        Ok(ValueExpr::new(
            ValueKind::Constructor(ConstructorCall {
                type_name,
                params: params.unwrap_or_default(),
                body,
            }),
            self.span_from(start),
        ))
    }

    /// EnumDef ::= "enum" ( "::" Ident | Ident ) "{" EnumProp { [ "," | ";" ] EnumProp } "}"
    /// EnumProp ::= "values" "=" "[" String { "," String } [ "," ] "]" | "default" "=" String
    pub(crate) fn parse_enum_def(&mut self) -> Result<EnumDef, ParserError> {
        let start = self.current_token().span();
        self.advance(); // `enum`
        self.match_token(TokenType::DoubleColon);
        let (name, _) = self.expect_identifier("an enum name")?;
        self.expect(TokenType::LBrace, "'{' after enum name")?;

        let mut values = None;
        let mut default = None;
        loop {
            self.skip_separators();
            if self.match_token(TokenType::RBrace) {
                break;
            }
            let (key, key_span) = self.expect_identifier("'values' or 'default'")?;
            self.expect(TokenType::Equals, "'='")?;
            match key.as_str() {
                "values" => values = Some(self.parse_enum_values()?),
                "default" => default = Some(self.expect_string("a quoted default value")?),
                other => {
                    return Err(invalid_enum(
                        &name,
                        format!("unknown enum property '{other}'"),
                        key_span,
                    ))
                }
            }
        }

        let span = self.span_from(start);
        let values = values.ok_or_else(|| invalid_enum(&name, "missing 'values' list".to_string(), span))?;
        if values.is_empty() {
            return Err(invalid_enum(&name, "'values' must not be empty".to_string(), span));
        }

        Ok(EnumDef {
            name,
            values,
            default,
            span,
        })
    }

    fn parse_enum_values(&mut self) -> Result<Vec<String>, ParserError> {
        self.expect(TokenType::LBracket, "'['")?;
        let mut values = Vec::new();
        while !self.check(&TokenType::RBracket) {
            values.push(self.expect_string("a quoted enum value")?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RBracket, "']' or ','")?;
        Ok(values)
    }

    /// Include ::= ( "@include" | "@import" ) String
    fn parse_include(&mut self) -> Result<IncludeDirective, ParserError> {
        let start = self.advance().span();
        let path = self.expect_string("a quoted path after @include")?;
        Ok(IncludeDirective {
            path,
            span: self.span_from(start),
        })
    }

    /// NsIdent ::= Ident { "::" Ident }
    pub(crate) fn parse_namespaced_identifier(&mut self) -> Result<NamespacedIdentifier, ParserError> {
        let (first, _) = self.expect_identifier("an identifier")?;
        let mut segments = vec![first];
        while self.match_token(TokenType::DoubleColon) {
            let (segment, _) = self.expect_identifier("an identifier after '::'")?;
            segments.push(segment);
        }
        Ok(NamespacedIdentifier::new(segments))
    }

    /// TypeRef ::= NsIdent [ "[" "]" ]
    pub(crate) fn parse_type_ref(&mut self) -> Result<TypeRef, ParserError> {
        let name = self.parse_namespaced_identifier()?;
        let is_array = if self.check(&TokenType::LBracket) {
            self.advance();
            self.expect(TokenType::RBracket, "']'")?;
            true
        } else {
            false
        };
        Ok(TypeRef::new(name, is_array))
    }

    // === Recovery ===

    fn record(&mut self, err: &ParserError) {
        let mut diagnostic = Diagnostic::from(err);
        diagnostic.path = self.context_path();
        self.diagnostics.push(diagnostic);
    }

    fn context_path(&self) -> String {
        self.context.join(".")
    }

    /// Skips the broken top-level entry that starts at `entry_start`: through its
    /// balanced braces, or up to the next identifier or include that starts a later line.
    fn synchronize_top_level(&mut self, entry_start: usize) {
        self.position = entry_start;
        self.context.clear();
        let start_line = self.current_token().line;
        self.advance();

        let mut depth = 0usize;
        loop {
            let token = self.current_token();
            match token.ttype {
                TokenType::Eof => return,
                TokenType::LBrace => depth += 1,
                TokenType::RBrace if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                }
                TokenType::Identifier(_) | TokenType::Include
                    if token.line > start_line && (depth == 0 || token.column == 1) =>
                {
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    /// Skips to the next property boundary inside a body: a separator at depth 0,
    /// the closing brace, or an identifier on a later line.
    fn synchronize_in_body(&mut self, entry_start: usize) {
        self.position = entry_start;
        let start_line = self.current_token().line;
        if !matches!(self.current_token().ttype, TokenType::RBrace | TokenType::Eof) {
            self.advance();
        }

        let mut depth = 0usize;
        loop {
            let token = self.current_token();
            match token.ttype {
                TokenType::Eof => return,
                TokenType::LBrace | TokenType::LBracket | TokenType::LParen => depth += 1,
                TokenType::RBrace if depth == 0 => return,
                TokenType::RBrace | TokenType::RBracket | TokenType::RParen => {
                    depth = depth.saturating_sub(1)
                }
                TokenType::Comma | TokenType::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                TokenType::Identifier(_) | TokenType::Include
                    if depth == 0 && token.line > start_line =>
                {
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    // === Tokenizer Helper Methods ===

    pub(crate) fn current_token(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn previous_token(&self) -> &Token {
        &self.tokens[self.position.saturating_sub(1).min(self.tokens.len() - 1)]
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.current_token().clone();
        if token.ttype != TokenType::Eof {
            self.position += 1;
        }
        token
    }

    pub(crate) fn check(&self, ttype: &TokenType) -> bool {
        std::mem::discriminant(&self.current_token().ttype) == std::mem::discriminant(ttype)
    }

    /// True when the current token is the identifier `word`.
    pub(crate) fn check_word(&self, word: &str) -> bool {
        matches!(&self.current_token().ttype, TokenType::Identifier(name) if name == word)
    }

    pub(crate) fn peek_is(&self, offset: usize, ttype: &TokenType) -> bool {
        self.tokens
            .get(self.position + offset)
            .is_some_and(|t| std::mem::discriminant(&t.ttype) == std::mem::discriminant(ttype))
    }

    pub(crate) fn match_token(&mut self, ttype: TokenType) -> bool {
        if self.check(&ttype) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, ttype: TokenType, expected: &str) -> Result<Token, ParserError> {
        if self.check(&ttype) {
            Ok(self.advance())
        } else {
            Err(self.err_unexpected(expected))
        }
    }

    pub(crate) fn expect_identifier(&mut self, expected: &str) -> Result<(String, Span), ParserError> {
        let token = self.current_token();
        if let TokenType::Identifier(name) = &token.ttype {
            let result = (name.clone(), token.span());
            self.advance();
            Ok(result)
        } else {
            Err(self.err_unexpected(expected))
        }
    }

    pub(crate) fn expect_string(&mut self, expected: &str) -> Result<String, ParserError> {
        let token = self.current_token();
        if let TokenType::String(s) = &token.ttype {
            let s = s.clone();
            self.advance();
            Ok(s)
        } else {
            Err(self.err_unexpected(expected))
        }
    }

    pub(crate) fn skip_separators(&mut self) {
        while self.match_token(TokenType::Comma) || self.match_token(TokenType::Semicolon) {}
    }

    /// A span from `start` to the end of the last consumed token.
    pub(crate) fn span_from(&self, start: Span) -> Span {
        start.to(self.previous_token().span())
    }

    fn is_enum_start(&self) -> bool {
        self.check_word("enum")
            && (self.peek_is(1, &TokenType::DoubleColon)
                || self.peek_is(1, &TokenType::Identifier(String::new())))
    }

    fn simple_name(&self, name: NamespacedIdentifier, start: Span) -> Result<String, ParserError> {
        if name.is_simple() {
            Ok(name.segments.into_iter().next().unwrap_or_default())
        } else {
            Err(ParserError::UnexpectedToken {
                expected: "a plain name".to_string(),
                found: format!("namespaced identifier '{name}'"),
                line: start.line,
                column: start.column,
                span: start.into(),
            })
        }
    }

    pub(crate) fn err_unexpected(&self, expected: &str) -> ParserError {
        let token = self.current_token();
        if token.ttype == TokenType::Eof {
            ParserError::UnexpectedEof {
                expected: expected.to_string(),
                line: token.line,
                column: token.column,
                span: (token.pos_start, 0).into(),
            }
        } else {
            ParserError::UnexpectedToken {
                expected: expected.to_string(),
                found: token.ttype.to_string(),
                line: token.line,
                column: token.column,
                span: token.span().into(),
            }
        }
    }
}

fn invalid_enum(name: &str, reason: String, span: Span) -> ParserError {
    ParserError::InvalidEnum {
        name: name.to_string(),
        reason,
        line: span.line,
        column: span.column,
        span: span.into(),
    }
}

fn invalid_interpolation(text: &str, reason: String, span: Span) -> ParserError {
    ParserError::InvalidInterpolation {
        text: text.to_string(),
        reason,
        line: span.line,
        column: span.column,
        span: span.into(),
    }
}

// === Interpolation ===

/// Turns a string literal containing `${` into a `VarRef` (the whole string is one
/// reference) or a `Template`.
fn interpolated_string(text: &str) -> Result<ValueKind, String> {
    Ok(template_kind(parse_template(text)?, false))
}

fn template_kind(mut parts: Vec<TemplatePart>, typed: bool) -> ValueKind {
    match parts.len() {
        0 => ValueKind::Scalar(Scalar::String(String::new())),
        1 if matches!(parts[0], TemplatePart::Var(_)) => match parts.remove(0) {
            TemplatePart::Var(mut var) => {
                var.typed = typed;
                ValueKind::VarRef(var)
            }
            TemplatePart::Literal(text) => ValueKind::Scalar(Scalar::String(text)),
        },
        _ => ValueKind::Template(parts),
    }
}

fn parse_template(text: &str) -> Result<Vec<TemplatePart>, String> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(open) = rest.find("${") {
        literal.push_str(&rest[..open]);
        let close = open
            + matching_brace(&rest[open..])
                .ok_or_else(|| "unterminated variable reference".to_string())?;
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(TemplatePart::Var(parse_var_ref(&rest[open..=close], false)?));
        rest = &rest[close + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    Ok(parts)
}

/// Byte index of the `}` closing the `${` at the start of `text`.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses `${NAME}` or `${NAME:-default}`.
pub(crate) fn parse_var_ref(raw: &str, typed: bool) -> Result<VarRef, String> {
    let inner = raw
        .strip_prefix("${")
        .and_then(|r| r.strip_suffix('}'))
        .ok_or_else(|| "expected ${...}".to_string())?;

    let (name, default_text) = match inner.find(":-") {
        Some(i) => (inner[..i].trim(), Some(&inner[i + 2..])),
        None => (inner.trim(), None),
    };

    if name.is_empty() {
        return Err("empty variable name".to_string());
    }
    let valid_name = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return Err(format!("invalid variable name '{name}'"));
    }

    let default = default_text
        .map(|text| parse_default(text, typed))
        .transpose()?
        .map(Box::new);

    Ok(VarRef {
        name: name.to_string(),
        default,
        typed,
        raw: raw.to_string(),
    })
}

fn parse_default(text: &str, typed: bool) -> Result<ValueExpr, String> {
    let trimmed = text.trim();
    let (body, quoted) = match trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
    {
        Some(unquoted) => (unquoted, true),
        None => (trimmed, false),
    };

    let kind = if body.contains("${") {
        template_kind(parse_template(body)?, typed && !quoted)
    } else if typed && !quoted {
        ValueKind::Scalar(Scalar::coerce(body))
    } else {
        ValueKind::Scalar(Scalar::String(body.to_string()))
    };
    Ok(ValueExpr::new(kind, Span::default()))
}
