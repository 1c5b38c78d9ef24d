use crate::ast::Span;
use miette::{NamedSource, SourceSpan};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A non-fatal finding, produced by recovering parsers, the resolvers and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted location in the document (`App.database.port`), empty when unknown.
    pub path: String,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl Diagnostic {
    pub fn error(path: impl Into<String>, message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, path, message, span)
    }

    pub fn warning(path: impl Into<String>, message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, path, message, span)
    }

    fn new(severity: Severity, path: impl Into<String>, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity,
            path: path.into(),
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.severity, self.line, self.column)?;
        if !self.path.is_empty() {
            write!(f, " in {}", self.path)?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Error, Debug, miette::Diagnostic, Clone)]
pub enum CfgppError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Include(#[from] IncludeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Variable(#[from] VariableError),

    #[error("could not read {}: {message}", .path.display())]
    #[diagnostic(code(cfgpp::io))]
    Io { path: PathBuf, message: String },
}

impl CfgppError {
    pub fn line(&self) -> usize {
        match self {
            CfgppError::Lex(e) => e.line,
            CfgppError::Parser(e) => e.line(),
            CfgppError::Include(e) => e.line(),
            CfgppError::Variable(e) => e.line(),
            CfgppError::Io { .. } => 0,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            CfgppError::Lex(e) => e.column,
            CfgppError::Parser(e) => e.column(),
            CfgppError::Include(e) => e.column(),
            CfgppError::Variable(e) => e.column(),
            CfgppError::Io { .. } => 0,
        }
    }

    /// Attaches the source text so the error renders with labelled snippets.
    pub fn report(&self, name: impl AsRef<str>, source: &str) -> miette::Report {
        miette::Report::new(self.clone())
            .with_source_code(NamedSource::new(name, source.to_string()))
    }

    pub(crate) fn io(path: &Path, err: &std::io::Error) -> Self {
        CfgppError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

impl From<&CfgppError> for Diagnostic {
    fn from(err: &CfgppError) -> Self {
        let path = match err {
            CfgppError::Variable(VariableError::CircularReference { path, .. }) => path.clone(),
            _ => String::new(),
        };
        Diagnostic {
            severity: Severity::Error,
            path,
            message: err.to_string(),
            line: err.line(),
            column: err.column(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    UnterminatedString,
    InvalidEscape,
    UnterminatedComment,
    UnterminatedInterpolation,
    IntegerOutOfRange,
    UnexpectedCharacter,
}

#[derive(Error, Debug, miette::Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(
    code(cfgpp::lexer::invalid_token),
    help("The text at this position is not a valid CFGPP token.")
)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
    #[label("here")]
    pub span: SourceSpan,
}

impl From<&LexError> for Diagnostic {
    fn from(err: &LexError) -> Self {
        Diagnostic {
            severity: Severity::Error,
            path: String::new(),
            message: err.message.clone(),
            line: err.line,
            column: err.column,
        }
    }
}

#[derive(Error, Debug, miette::Diagnostic, Clone)]
pub enum ParserError {
    #[error("expected {expected}, found {found}")]
    #[diagnostic(
        code(cfgpp::parser::unexpected_token),
        help("The parser found a token it did not expect in this position.")
    )]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
        column: usize,
        #[label("expected {expected}")]
        span: SourceSpan,
    },

    #[error("unexpected end of file, expected {expected}")]
    #[diagnostic(
        code(cfgpp::parser::unexpected_eof),
        help("The file ended unexpectedly. Check for a missing closing brace or value.")
    )]
    UnexpectedEof {
        expected: String,
        line: usize,
        column: usize,
        #[label("file ended here")]
        span: SourceSpan,
    },

    #[error("invalid enum '{name}': {reason}")]
    #[diagnostic(
        code(cfgpp::parser::invalid_enum),
        help("An enum needs a non-empty `values = [...]` list of strings.")
    )]
    InvalidEnum {
        name: String,
        reason: String,
        line: usize,
        column: usize,
        #[label("in this enum")]
        span: SourceSpan,
    },

    #[error("invalid interpolation '{text}': {reason}")]
    #[diagnostic(
        code(cfgpp::parser::invalid_interpolation),
        help("Variable references look like ${{NAME}} or ${{NAME:-default}}.")
    )]
    InvalidInterpolation {
        text: String,
        reason: String,
        line: usize,
        column: usize,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("invalid schema: {message}")]
    #[diagnostic(code(cfgpp::parser::invalid_schema))]
    InvalidSchema {
        message: String,
        line: usize,
        column: usize,
        #[label("here")]
        span: SourceSpan,
    },
}

impl ParserError {
    pub fn line(&self) -> usize {
        match self {
            ParserError::UnexpectedToken { line, .. }
            | ParserError::UnexpectedEof { line, .. }
            | ParserError::InvalidEnum { line, .. }
            | ParserError::InvalidInterpolation { line, .. }
            | ParserError::InvalidSchema { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            ParserError::UnexpectedToken { column, .. }
            | ParserError::UnexpectedEof { column, .. }
            | ParserError::InvalidEnum { column, .. }
            | ParserError::InvalidInterpolation { column, .. }
            | ParserError::InvalidSchema { column, .. } => *column,
        }
    }
}

impl From<&ParserError> for Diagnostic {
    fn from(err: &ParserError) -> Self {
        Diagnostic {
            severity: Severity::Error,
            path: String::new(),
            message: err.to_string(),
            line: err.line(),
            column: err.column(),
        }
    }
}

#[derive(Error, Debug, miette::Diagnostic, Clone)]
pub enum IncludeError {
    #[error("circular include: {}", format_chain(.chain))]
    #[diagnostic(
        code(cfgpp::include::circular),
        help("Remove one of the @include directives in this chain.")
    )]
    CircularInclude {
        chain: Vec<PathBuf>,
        line: usize,
        column: usize,
    },

    #[error("included file not found: {}", .path.display())]
    #[diagnostic(
        code(cfgpp::include::missing_file),
        help("Include paths are resolved relative to the including file.")
    )]
    MissingFile {
        path: PathBuf,
        line: usize,
        column: usize,
    },

    #[error("invalid included file {}", .file.display())]
    #[diagnostic(code(cfgpp::include::invalid))]
    InvalidInclude {
        file: PathBuf,
        #[source]
        cause: Box<CfgppError>,
        line: usize,
        column: usize,
    },
}

impl IncludeError {
    pub fn line(&self) -> usize {
        match self {
            IncludeError::CircularInclude { line, .. }
            | IncludeError::MissingFile { line, .. }
            | IncludeError::InvalidInclude { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            IncludeError::CircularInclude { column, .. }
            | IncludeError::MissingFile { column, .. }
            | IncludeError::InvalidInclude { column, .. } => *column,
        }
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Error, Debug, miette::Diagnostic, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("circular variable reference {} in '{path}'", .chain.join(" -> "))]
    #[diagnostic(
        code(cfgpp::variables::circular_reference),
        help("A variable default refers back to a variable that is still being resolved.")
    )]
    CircularReference {
        chain: Vec<String>,
        path: String,
        line: usize,
        column: usize,
    },
}

impl VariableError {
    pub fn line(&self) -> usize {
        match self {
            VariableError::CircularReference { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            VariableError::CircularReference { column, .. } => *column,
        }
    }
}
