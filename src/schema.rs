use crate::ast::{EnumDef, NamespacedIdentifier, Scalar, Span, TypeRef, ValueExpr, ValueKind};
use crate::error::{CfgppError, ParserError};
use crate::lexer::{tokenize, TokenType};
use crate::parser::Parser;
use crate::rules::Rule;
use log::debug;
use regex::Regex;
use std::collections::BTreeMap;

/// Bounds a field's value must respect.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.pattern.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub expected_type: TypeRef,
    pub constraints: Constraints,
    pub default: Option<ValueExpr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct SchemaDef {
    pub name: NamespacedIdentifier,
    pub required: Vec<FieldSpec>,
    pub optional: Vec<FieldSpec>,
    pub rules: Vec<Rule>,
    pub span: Span,
}

impl SchemaDef {
    /// The field spec and whether it is required.
    pub fn field(&self, name: &str) -> Option<(&FieldSpec, bool)> {
        self.required
            .iter()
            .find(|f| f.name == name)
            .map(|f| (f, true))
            .or_else(|| self.optional.iter().find(|f| f.name == name).map(|f| (f, false)))
    }
}

/// `import "path";` in a schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaImport {
    pub path: String,
    pub span: Span,
}

/// Schemas by full type name (`Database::PostgreSQL`) and enums by name.
///
/// `imports` lists the files this document imports; `parse_schema` records
/// them and `load_schema` merges their definitions in.
#[derive(Debug, Clone, Default)]
pub struct SchemaDocument {
    pub schemas: BTreeMap<String, SchemaDef>,
    pub enums: BTreeMap<String, EnumDef>,
    pub imports: Vec<SchemaImport>,
}

impl SchemaDocument {
    /// Adds the definitions of `other`, replacing any with the same name.
    pub fn merge(&mut self, other: SchemaDocument) {
        self.schemas.extend(other.schemas);
        self.enums.extend(other.enums);
    }

    pub fn schema(&self, type_name: &str) -> Option<&SchemaDef> {
        self.schemas.get(type_name)
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }
}

/// Parses schema text: imports, `schema` definitions and `enum` definitions.
/// Imports are recorded but not loaded.
///
/// # Errors
/// Returns a lexer or parser error for malformed schema text.
pub fn parse_schema(text: &str) -> Result<SchemaDocument, CfgppError> {
    let mut parser = Parser::new(tokenize(text)?);
    Ok(parser.parse_schema_document()?)
}

impl Parser {
    /// SchemaDoc ::= { Import | SchemaDef | EnumDef }
    /// Import    ::= "import" String [";"]
    pub fn parse_schema_document(&mut self) -> Result<SchemaDocument, ParserError> {
        let mut document = SchemaDocument::default();
        loop {
            self.skip_separators();
            if self.check(&TokenType::Eof) {
                break;
            }
            if self.check_word("import") {
                let start = self.advance().span();
                let path = self.expect_string("a quoted path after 'import'")?;
                document.imports.push(SchemaImport {
                    path,
                    span: self.span_from(start),
                });
            } else if self.check_word("schema") {
                let def = self.parse_schema_def()?;
                document.schemas.insert(def.name.to_string(), def);
            } else if self.check_word("enum") {
                let def = self.parse_enum_def()?;
                document.enums.insert(def.name.clone(), def);
            } else {
                return Err(self.err_unexpected("'import', 'schema' or 'enum'"));
            }
        }
        debug!(
            "parsed schema with {} type(s) and {} enum(s)",
            document.schemas.len(),
            document.enums.len()
        );
        Ok(document)
    }

    /// SchemaDef ::= "schema" NsIdent "{" { FieldDecl | Validate } "}"
    fn parse_schema_def(&mut self) -> Result<SchemaDef, ParserError> {
        let start = self.advance().span();
        let name = self.parse_namespaced_identifier()?;
        self.expect(TokenType::LBrace, "'{' after schema name")?;

        let mut required: Vec<FieldSpec> = Vec::new();
        let mut optional: Vec<FieldSpec> = Vec::new();
        let mut rules = Vec::new();
        loop {
            self.skip_separators();
            if self.match_token(TokenType::RBrace) {
                break;
            }
            if self.check_word("validate") && self.peek_is(1, &TokenType::LBrace) {
                rules.extend(self.parse_validate_block()?);
            } else if self.check_word("required") || self.check_word("optional") {
                let is_required = self.check_word("required");
                let field = self.parse_field_decl()?;
                if required.iter().chain(&optional).any(|f| f.name == field.name) {
                    return Err(invalid_schema(
                        format!("field '{}' is declared twice in schema '{name}'", field.name),
                        field.span,
                    ));
                }
                if is_required {
                    required.push(field);
                } else {
                    optional.push(field);
                }
            } else {
                return Err(self.err_unexpected("'required', 'optional' or 'validate'"));
            }
        }

        Ok(SchemaDef {
            name,
            required,
            optional,
            rules,
            span: self.span_from(start),
        })
    }

    /// FieldDecl ::= ( "required" | "optional" ) TypeRef Ident
    ///               [ "(" Constraint { "," Constraint } ")" ] [ "=" Value ]
    fn parse_field_decl(&mut self) -> Result<FieldSpec, ParserError> {
        let start = self.advance().span();
        let expected_type = self.parse_type_ref()?;
        let (name, _) = self.expect_identifier("a field name")?;

        let mut constraints = Constraints::default();
        if self.match_token(TokenType::LParen) {
            while !self.check(&TokenType::RParen) {
                self.parse_constraint(&mut constraints)?;
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::RParen, "')' or ','")?;
        }

        let default = if self.match_token(TokenType::Equals) {
            Some(self.parse_value()?)
        } else {
            None
        };

        Ok(FieldSpec {
            name,
            expected_type,
            constraints,
            default,
            span: self.span_from(start),
        })
    }

    /// Constraint ::= ( "min" | "max" | "min_length" | "max_length" | "pattern" ) "=" Value
    fn parse_constraint(&mut self, constraints: &mut Constraints) -> Result<(), ParserError> {
        let (key, key_span) = self.expect_identifier("a constraint name")?;
        self.expect(TokenType::Equals, "'='")?;
        let value = self.parse_value()?;
        let span = key_span.to(value.span);

        match key.as_str() {
            "min" => constraints.min = Some(number(&key, &value, span)?),
            "max" => constraints.max = Some(number(&key, &value, span)?),
            "min_length" => constraints.min_length = Some(length(&key, &value, span)?),
            "max_length" => constraints.max_length = Some(length(&key, &value, span)?),
            "pattern" => {
                let source = value
                    .as_str()
                    .ok_or_else(|| invalid_schema("'pattern' must be a string".to_string(), span))?;
                let regex = Regex::new(source)
                    .map_err(|e| invalid_schema(format!("invalid pattern: {e}"), span))?;
                constraints.pattern = Some(regex);
            }
            other => {
                return Err(invalid_schema(format!("unknown constraint '{other}'"), key_span));
            }
        }
        Ok(())
    }

    /// Validate ::= "validate" "{" { Rule [ ";" ] } "}"
    fn parse_validate_block(&mut self) -> Result<Vec<Rule>, ParserError> {
        self.advance(); // `validate`
        self.expect(TokenType::LBrace, "'{'")?;
        let mut rules = Vec::new();
        loop {
            self.skip_separators();
            if self.match_token(TokenType::RBrace) {
                break;
            }
            rules.push(self.parse_rule()?);
        }
        Ok(rules)
    }
}

fn number(key: &str, value: &ValueExpr, span: Span) -> Result<f64, ParserError> {
    match &value.kind {
        ValueKind::Scalar(Scalar::Int(i)) => Ok(*i as f64),
        ValueKind::Scalar(Scalar::Float(f)) => Ok(*f),
        _ => Err(invalid_schema(format!("'{key}' must be a number"), span)),
    }
}

fn length(key: &str, value: &ValueExpr, span: Span) -> Result<usize, ParserError> {
    value
        .as_int()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| invalid_schema(format!("'{key}' must be a non-negative integer"), span))
}

fn invalid_schema(message: String, span: Span) -> ParserError {
    ParserError::InvalidSchema {
        message,
        line: span.line,
        column: span.column,
        span: span.into(),
    }
}
