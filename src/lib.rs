//! Lexer, parser, include and variable resolution, and schema validation for
//! the CFGPP configuration language.
//!
//! Most callers only need [`analyze`] or [`analyze_file`], then
//! [`AnalysisResult::validate`] against a schema loaded with [`load_schema`].

pub mod api;
pub mod ast;
pub mod error;
pub mod include;
pub mod lexer;
pub mod parser;
pub mod rules;
pub mod schema;
pub mod serialization;
mod utils;
pub mod validation;
pub mod variables;

pub use api::{analyze, analyze_file, analyze_with, load_schema, AnalysisResult, Options};
pub use ast::ConfigDocument;
pub use error::{
    CfgppError, Diagnostic, IncludeError, LexError, ParserError, Severity, VariableError,
};
pub use include::{resolve_includes, IncludeResolver};
pub use lexer::{tokenize, Token, TokenType};
pub use parser::{parse, Parser, RecoveryMode};
pub use schema::{parse_schema, SchemaDocument};
pub use validation::{validate, validate_section, ValidationResult, Validator};
pub use variables::{resolve_variables, EnvLookup, ProcessEnv, VariableResolver};
