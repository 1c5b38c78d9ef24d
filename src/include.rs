use crate::ast::{insert_entry, AstNode, ConfigDocument, IncludeDirective, ValueExpr, ValueKind};
use crate::error::{CfgppError, Diagnostic, IncludeError};
use crate::lexer::tokenize;
use crate::parser::{parse, RecoveryMode};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_EXTENSION: &str = "cfgpp";

/// Expands every `@include` in `document`, resolving paths against `base_dir`.
///
/// # Errors
/// Fails on circular includes, missing files, or included files that do not parse.
pub fn resolve_includes(
    document: ConfigDocument,
    base_dir: &Path,
) -> Result<ConfigDocument, IncludeError> {
    IncludeResolver::new().resolve(document, base_dir)
}

/// Splices included files into a document. One resolver serves one resolution.
pub struct IncludeResolver {
    recovery: RecoveryMode,
    default_extension: String,
    // Fully expanded entries of every file loaded so far, by canonical path.
    cache: HashMap<PathBuf, Vec<AstNode>>,
    // Files currently being expanded, outermost first.
    stack: Vec<PathBuf>,
    diagnostics: Vec<Diagnostic>,
}

impl Default for IncludeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IncludeResolver {
    pub fn new() -> Self {
        IncludeResolver {
            recovery: RecoveryMode::Strict,
            default_extension: DEFAULT_EXTENSION.to_string(),
            cache: HashMap::new(),
            stack: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Recovery mode used to parse included files. Outside `Strict`, a missing
    /// file is reported as a diagnostic and skipped.
    #[must_use]
    pub fn recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    /// Extension appended to include paths that have none.
    #[must_use]
    pub fn default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = extension.into();
        self
    }

    pub fn resolve(
        mut self,
        mut document: ConfigDocument,
        base_dir: &Path,
    ) -> Result<ConfigDocument, IncludeError> {
        debug!("resolving includes relative to {}", base_dir.display());
        if let Some(root) = document.source_path.as_ref().and_then(|p| p.canonicalize().ok()) {
            self.stack.push(root);
        }

        let entries = std::mem::take(&mut document.entries);
        document.entries = self.expand(entries, base_dir, true)?;
        document.diagnostics.append(&mut self.diagnostics);

        debug!("include resolution loaded {} file(s)", self.cache.len());
        Ok(document)
    }

    fn expand(
        &mut self,
        nodes: Vec<AstNode>,
        dir: &Path,
        top_level: bool,
    ) -> Result<Vec<AstNode>, IncludeError> {
        let mut out = Vec::with_capacity(nodes.len());
        let place = |out: &mut Vec<AstNode>, node: AstNode| {
            if top_level {
                insert_entry(out, node);
            } else {
                out.push(node);
            }
        };

        for node in nodes {
            match node {
                AstNode::Include(directive) => match self.load(&directive, dir) {
                    Ok(included) => {
                        for node in included {
                            place(&mut out, node);
                        }
                    }
                    Err(err @ IncludeError::MissingFile { .. })
                        if self.recovery != RecoveryMode::Strict =>
                    {
                        warn!("skipping include \"{}\": {}", directive.path, err);
                        self.diagnostics
                            .push(Diagnostic::error("", err.to_string(), directive.span));
                    }
                    Err(err) => return Err(err),
                },
                AstNode::Object(mut object) => {
                    object.body = self.expand(object.body, dir, false)?;
                    place(&mut out, AstNode::Object(object));
                }
                AstNode::Property(mut property) => {
                    self.expand_value(&mut property.value, dir)?;
                    place(&mut out, AstNode::Property(property));
                }
                node @ AstNode::Enum(_) => place(&mut out, node),
            }
        }
        Ok(out)
    }

    fn expand_value(&mut self, value: &mut ValueExpr, dir: &Path) -> Result<(), IncludeError> {
        match &mut value.kind {
            ValueKind::Constructor(call) => {
                if let Some(body) = call.body.take() {
                    call.body = Some(self.expand(body, dir, false)?);
                }
            }
            ValueKind::Array(items) => {
                for item in items {
                    self.expand_value(item, dir)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn target_path(&self, directive: &IncludeDirective, dir: &Path) -> PathBuf {
        target_path(dir, &directive.path, &self.default_extension)
    }

    fn load(&mut self, directive: &IncludeDirective, dir: &Path) -> Result<Vec<AstNode>, IncludeError> {
        let (line, column) = (directive.span.line, directive.span.column);
        let target = self.target_path(directive, dir);
        let missing = || IncludeError::MissingFile {
            path: target.clone(),
            line,
            column,
        };
        let canonical = target.canonicalize().map_err(|_| missing())?;

        if let Some(chain) = cycle_chain(&self.stack, &canonical) {
            return Err(IncludeError::CircularInclude {
                chain,
                line,
                column,
            });
        }

        if let Some(entries) = self.cache.get(&canonical) {
            debug!("include cache hit for {}", canonical.display());
            return Ok(entries.clone());
        }

        debug!("loading include {}", canonical.display());
        let source = std::fs::read_to_string(&canonical).map_err(|_| missing())?;
        let invalid = |cause: CfgppError| IncludeError::InvalidInclude {
            file: canonical.clone(),
            cause: Box::new(cause),
            line,
            column,
        };
        let tokens = tokenize(&source).map_err(|e| invalid(e.into()))?;
        let (included, diagnostics) = parse(tokens, self.recovery).map_err(|e| invalid(e.into()))?;
        for mut diagnostic in diagnostics {
            diagnostic.message = format!("{}: {}", canonical.display(), diagnostic.message);
            self.diagnostics.push(diagnostic);
        }

        let parent = canonical.parent().map_or_else(|| dir.to_path_buf(), Path::to_path_buf);
        self.stack.push(canonical.clone());
        let expanded = self.expand(included.entries, &parent, true);
        self.stack.pop();
        let expanded = expanded?;

        self.cache.insert(canonical, expanded.clone());
        Ok(expanded)
    }
}

/// `path` relative to `dir`, with `extension` added when it has none.
pub(crate) fn target_path(dir: &Path, path: &str, extension: &str) -> PathBuf {
    let mut target = dir.join(path);
    if target.extension().is_none() {
        target.set_extension(extension);
    }
    target
}

/// The chain closed by entering `target` again, from its first occurrence on
/// `stack` back to itself.
pub(crate) fn cycle_chain(stack: &[PathBuf], target: &Path) -> Option<Vec<PathBuf>> {
    let index = stack.iter().position(|p| p == target)?;
    let mut chain = stack[index..].to_vec();
    chain.push(target.to_path_buf());
    Some(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn load_root(path: &Path) -> ConfigDocument {
        let source = fs::read_to_string(path).unwrap();
        let (doc, _) = parse(tokenize(&source).unwrap(), RecoveryMode::Strict).unwrap();
        doc.with_source_path(path)
    }

    fn file_names(chain: &[PathBuf]) -> Vec<String> {
        chain
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_splices_included_entries_in_place() {
        let dir = TempDir::new().unwrap();
        write(&dir, "base.cfgpp", "Shared { level = \"info\" }\nApp { port = 1 }");
        let root = write(
            &dir,
            "main.cfgpp",
            "First { }\n@include \"base\"\nApp { port = 2 }",
        );

        let doc = resolve_includes(load_root(&root), dir.path()).unwrap();
        let names: Vec<_> = doc.entries.iter().filter_map(AstNode::entry_name).collect();
        assert_eq!(names, vec!["First", "Shared", "App"]);
        assert_eq!(doc.object("App").unwrap().property("port").unwrap().value.as_int(), Some(2));
    }

    #[test]
    fn test_include_inside_body() {
        let dir = TempDir::new().unwrap();
        write(&dir, "db.cfgpp", "Database { host = \"db\" }");
        let root = write(&dir, "main.cfgpp", "App { name = \"x\"\n @include \"db.cfgpp\" }");

        let doc = resolve_includes(load_root(&root), dir.path()).unwrap();
        let app = doc.object("App").unwrap();
        assert!(app.nested("Database").is_some());
        assert!(app.body.iter().all(|n| !matches!(n, AstNode::Include(_))));
    }

    #[test]
    fn test_nested_relative_paths() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        write(&dir, "sub/inner.cfgpp", "@include \"leaf\"");
        write(&dir, "sub/leaf.cfgpp", "Leaf { ok = true }");
        let root = write(&dir, "main.cfgpp", "@include \"sub/inner\"");

        let doc = resolve_includes(load_root(&root), dir.path()).unwrap();
        assert!(doc.object("Leaf").is_some());
    }

    #[test]
    fn test_self_include_is_circular() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "a.cfgpp", "@include \"a.cfgpp\"");

        let err = resolve_includes(load_root(&root), dir.path()).unwrap_err();
        match err {
            IncludeError::CircularInclude { chain, .. } => {
                assert_eq!(file_names(&chain), vec!["a.cfgpp", "a.cfgpp"]);
            }
            other => panic!("expected circular include, got {other:?}"),
        }
    }

    #[test]
    fn test_three_file_cycle() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "a.cfgpp", "@include \"b\"");
        write(&dir, "b.cfgpp", "@include \"c\"");
        write(&dir, "c.cfgpp", "@include \"a\"");

        let err = resolve_includes(load_root(&root), dir.path()).unwrap_err();
        let IncludeError::CircularInclude { chain, .. } = err else {
            panic!("expected circular include");
        };
        assert_eq!(file_names(&chain), vec!["a.cfgpp", "b.cfgpp", "c.cfgpp", "a.cfgpp"]);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let dir = TempDir::new().unwrap();
        write(&dir, "common.cfgpp", "Common { x = 1 }");
        write(&dir, "left.cfgpp", "@include \"common\"\nLeft { }");
        write(&dir, "right.cfgpp", "@include \"common\"\nRight { }");
        let root = write(&dir, "main.cfgpp", "@include \"left\"\n@include \"right\"");

        let doc = resolve_includes(load_root(&root), dir.path()).unwrap();
        let names: Vec<_> = doc.entries.iter().filter_map(AstNode::entry_name).collect();
        assert_eq!(names, vec!["Common", "Left", "Right"]);
    }

    #[test]
    fn test_missing_file_is_fatal_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "main.cfgpp", "@include \"nope\"\nA { }");

        let err = resolve_includes(load_root(&root), dir.path()).unwrap_err();
        assert!(matches!(err, IncludeError::MissingFile { line: 1, column: 1, .. }));
    }

    #[test]
    fn test_missing_file_is_skipped_when_lenient() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "main.cfgpp", "@include \"nope\"\nA { }");

        let doc = IncludeResolver::new()
            .recovery(RecoveryMode::Lenient)
            .resolve(load_root(&root), dir.path())
            .unwrap();
        assert!(doc.object("A").is_some());
        assert_eq!(doc.diagnostics.len(), 1);
        assert!(doc.diagnostics[0].message.contains("nope.cfgpp"));
    }

    #[test]
    fn test_invalid_included_file_is_wrapped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "bad.cfgpp", "Broken { x = }");
        let root = write(&dir, "main.cfgpp", "@include \"bad\"");

        let err = resolve_includes(load_root(&root), dir.path()).unwrap_err();
        match err {
            IncludeError::InvalidInclude { file, cause, .. } => {
                assert!(file.ends_with("bad.cfgpp"));
                assert!(matches!(*cause, CfgppError::Parser(_)));
            }
            other => panic!("expected invalid include, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_extension() {
        let dir = TempDir::new().unwrap();
        write(&dir, "base.conf", "Base { }");
        let root = write(&dir, "main.cfgpp", "@include \"base\"");

        let doc = IncludeResolver::new()
            .default_extension("conf")
            .resolve(load_root(&root), dir.path())
            .unwrap();
        assert!(doc.object("Base").is_some());
    }
}
