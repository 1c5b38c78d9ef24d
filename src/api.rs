use crate::ast::ConfigDocument;
use crate::error::{CfgppError, Diagnostic, IncludeError};
use crate::include::{cycle_chain, target_path, IncludeResolver, DEFAULT_EXTENSION};
use crate::lexer::tokenize;
use crate::parser::{parse, RecoveryMode};
use crate::schema::{parse_schema, SchemaDocument};
use crate::serialization::{to_value, Value};
use crate::validation::{ValidationResult, Validator};
use crate::variables::{EnvLookup, ProcessEnv, VariableResolver};
use log::debug;
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Pipeline settings. Deserializable so tools can keep them in a JSON or YAML file;
/// missing keys take their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub recovery: RecoveryMode,
    /// Appended to `@include` paths written without an extension.
    pub default_extension: String,
    pub validate_enum_defaults: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            recovery: RecoveryMode::Strict,
            default_extension: DEFAULT_EXTENSION.to_string(),
            validate_enum_defaults: true,
        }
    }
}

impl Options {
    #[must_use]
    pub fn recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    #[must_use]
    pub fn default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = extension.into();
        self
    }

    #[must_use]
    pub fn validate_enum_defaults(mut self, enabled: bool) -> Self {
        self.validate_enum_defaults = enabled;
        self
    }
}

/// The outcome of running a CFGPP document through the pipeline.
///
/// `document` has its includes spliced in and its variables resolved;
/// `unresolved_document` is the parse result before either step, for tools
/// that need to point back at what was written.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub document: ConfigDocument,
    pub unresolved_document: ConfigDocument,
    /// Everything the parser, include resolver and variable resolver reported.
    pub diagnostics: Vec<Diagnostic>,
    validate_enum_defaults: bool,
}

impl Serialize for AnalysisResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl AnalysisResult {
    /// Checks the resolved document against `schema`.
    #[must_use]
    pub fn validate(&self, schema: &SchemaDocument) -> ValidationResult {
        Validator::new(schema)
            .check_enum_defaults(self.validate_enum_defaults)
            .validate(&self.document)
    }

    /// True when no stage reported an error.
    pub fn is_clean(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(&self.document)
    }

    /// Serializes the resolved data into a pretty-printed JSON string.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// Serializes the resolved data into a YAML string.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }
}

/// Analyzes a CFGPP source string with default options and the process environment.
///
/// `file_name` is used for include resolution (relative includes are looked up
/// next to it) and for error reporting. The file itself is never read.
///
/// # Errors
/// Returns a `CfgppError` if lexing, parsing or include resolution fails.
pub fn analyze(source: &str, file_name: &str) -> Result<AnalysisResult, CfgppError> {
    analyze_with(source, file_name, &Options::default(), &ProcessEnv)
}

/// Analyzes a CFGPP source string with explicit options and variable source.
///
/// A circular variable reference fails only the property it occurs in; it is
/// reported in `diagnostics` and the property is left `Unresolved`.
///
/// # Errors
/// Returns a `CfgppError` if lexing, parsing or include resolution fails.
pub fn analyze_with(
    source: &str,
    file_name: &str,
    options: &Options,
    env: &dyn EnvLookup,
) -> Result<AnalysisResult, CfgppError> {
    debug!("analyzing {file_name} ({} bytes)", source.len());
    let (document, _) = parse(tokenize(source)?, options.recovery)?;
    let path = PathBuf::from(file_name);
    let document = document.with_source_path(&path);
    let unresolved_document = document.clone();

    let base_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let document = IncludeResolver::new()
        .recovery(options.recovery)
        .default_extension(options.default_extension.clone())
        .resolve(document, &base_dir)?;
    let document = VariableResolver::new(env)
        .isolate_cycles(true)
        .resolve_document(document)?;

    Ok(AnalysisResult {
        diagnostics: document.diagnostics.clone(),
        document,
        unresolved_document,
        validate_enum_defaults: options.validate_enum_defaults,
    })
}

/// Reads and analyzes a CFGPP file using the process environment.
///
/// # Errors
/// Returns `CfgppError::Io` if the file cannot be read, or any pipeline error.
pub fn analyze_file(path: impl AsRef<Path>, options: &Options) -> Result<AnalysisResult, CfgppError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| CfgppError::io(path, &e))?;
    analyze_with(&source, &path.to_string_lossy(), options, &ProcessEnv)
}

/// Reads and parses a schema file, merging in the definitions of every file it
/// imports. Imports are resolved relative to the importing file, in order; a
/// file's own definitions replace imported ones with the same name.
///
/// # Errors
/// Returns `CfgppError::Io` if the file cannot be read, a lex/parse error, or
/// an include error for a missing or circular import.
pub fn load_schema(path: impl AsRef<Path>) -> Result<SchemaDocument, CfgppError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| CfgppError::io(path, &e))?;
    let mut stack = Vec::new();
    if let Ok(canonical) = path.canonicalize() {
        stack.push(canonical);
    }
    let dir = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    resolve_schema_imports(parse_schema(&source)?, &dir, &mut stack)
}

fn resolve_schema_imports(
    document: SchemaDocument,
    dir: &Path,
    stack: &mut Vec<PathBuf>,
) -> Result<SchemaDocument, CfgppError> {
    let mut merged = SchemaDocument {
        imports: document.imports.clone(),
        ..SchemaDocument::default()
    };
    for import in &document.imports {
        let (line, column) = (import.span.line, import.span.column);
        let target = target_path(dir, &import.path, DEFAULT_EXTENSION);
        let canonical = target.canonicalize().map_err(|_| IncludeError::MissingFile {
            path: target.clone(),
            line,
            column,
        })?;
        if let Some(chain) = cycle_chain(stack, &canonical) {
            return Err(IncludeError::CircularInclude {
                chain,
                line,
                column,
            }
            .into());
        }

        debug!("loading schema import {}", canonical.display());
        let source = std::fs::read_to_string(&canonical).map_err(|e| CfgppError::io(&canonical, &e))?;
        let imported = parse_schema(&source).map_err(|cause| IncludeError::InvalidInclude {
            file: canonical.clone(),
            cause: Box::new(cause),
            line,
            column,
        })?;
        let parent = canonical.parent().map_or_else(|| dir.to_path_buf(), Path::to_path_buf);
        stack.push(canonical);
        let imported = resolve_schema_imports(imported, &parent, stack);
        stack.pop();
        merged.merge(imported?);
    }
    merged.merge(document);
    Ok(merged)
}
