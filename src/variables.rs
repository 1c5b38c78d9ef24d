use crate::ast::*;
use crate::error::{Diagnostic, VariableError};
use crate::utils::join_path;
use log::{debug, trace, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::BuildHasher;

/// Where `${NAME}` values come from.
pub trait EnvLookup {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// The environment of the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<S: BuildHasher> EnvLookup for HashMap<String, String, S> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvLookup for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Resolves every variable reference in `document`.
///
/// Unset variables without a default become `Unresolved` markers with an error
/// diagnostic on the returned document.
///
/// # Errors
/// Returns `VariableError::CircularReference` if a default refers back to a
/// variable that is still being resolved.
pub fn resolve_variables(
    document: ConfigDocument,
    env: &dyn EnvLookup,
) -> Result<ConfigDocument, VariableError> {
    VariableResolver::new(env).resolve_document(document)
}

/// A remembered reference. `value` is `None` for a variable that is unset
/// with no default; `visited` holds every variable name consulted to get it.
#[derive(Debug, Clone)]
struct CachedVar {
    value: Option<Scalar>,
    visited: BTreeSet<String>,
}

/// Resolves `${...}` references on demand, remembering every result for the
/// lifetime of the resolver.
pub struct VariableResolver<'a> {
    env: &'a dyn EnvLookup,
    // Keyed by raw reference text and whether it is coerced.
    cache: HashMap<(String, bool), CachedVar>,
    // Variables whose defaults are being evaluated, outermost first.
    stack: Vec<String>,
    // Names consulted by the references currently being resolved.
    trail: Vec<String>,
    isolate_cycles: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(env: &'a dyn EnvLookup) -> Self {
        VariableResolver {
            env,
            cache: HashMap::new(),
            stack: Vec::new(),
            trail: Vec::new(),
            isolate_cycles: false,
            diagnostics: Vec::new(),
        }
    }

    /// When enabled, a circular reference fails only the property it occurs in:
    /// the property becomes an `Unresolved` marker with an error diagnostic and
    /// resolution carries on with its siblings.
    #[must_use]
    pub fn isolate_cycles(mut self, enabled: bool) -> Self {
        self.isolate_cycles = enabled;
        self
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Eagerly resolves the whole document. Unless cycles are isolated, the
    /// first circular reference aborts the pass.
    pub fn resolve_document(
        mut self,
        mut document: ConfigDocument,
    ) -> Result<ConfigDocument, VariableError> {
        debug!("resolving variables in {} entries", document.entries.len());
        let entries = std::mem::take(&mut document.entries);
        document.entries = entries
            .into_iter()
            .map(|node| self.resolve_node(node, ""))
            .collect::<Result<_, _>>()?;
        debug!(
            "variable resolution done: {} cached expression(s), {} diagnostic(s)",
            self.cache.len(),
            self.diagnostics.len()
        );
        document.diagnostics.append(&mut self.diagnostics);
        Ok(document)
    }

    /// Resolves the value at a dotted path such as `App.database.host`.
    /// Returns `Ok(None)` when the path does not name a value.
    pub fn resolve_path(
        &mut self,
        document: &ConfigDocument,
        path: &str,
    ) -> Result<Option<ValueExpr>, VariableError> {
        match document.find(path) {
            Some(NodeRef::Value(value)) => self.resolve_value(value, path).map(Some),
            _ => Ok(None),
        }
    }

    /// Returns a copy of `value` with every reference in it resolved.
    pub fn resolve_value(&mut self, value: &ValueExpr, path: &str) -> Result<ValueExpr, VariableError> {
        let kind = match &value.kind {
            ValueKind::Scalar(_) | ValueKind::Unresolved(_) => value.kind.clone(),
            ValueKind::Array(items) => ValueKind::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.resolve_value(item, &format!("{path}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            ValueKind::Constructor(call) => ValueKind::Constructor(ConstructorCall {
                type_name: call.type_name.clone(),
                params: self.resolve_params(&call.params, path)?,
                body: match &call.body {
                    Some(body) => Some(self.resolve_body(body, path)?),
                    None => None,
                },
            }),
            ValueKind::VarRef(var) => match self.resolve_var(var, path, value.span)? {
                Some(scalar) => ValueKind::Scalar(scalar),
                None => self.missing(&var.name, path, value.span),
            },
            ValueKind::Template(parts) => {
                let mut text = String::new();
                let mut unresolved = None;
                for part in parts {
                    match part {
                        TemplatePart::Literal(literal) => text.push_str(literal),
                        TemplatePart::Var(var) => match self.resolve_var(var, path, value.span)? {
                            Some(scalar) => text.push_str(&scalar.to_text()),
                            None => {
                                let marker = self.missing(&var.name, path, value.span);
                                unresolved.get_or_insert(marker);
                            }
                        },
                    }
                }
                unresolved.unwrap_or(ValueKind::Scalar(Scalar::String(text)))
            }
        };
        Ok(ValueExpr::new(kind, value.span))
    }

    fn resolve_node(&mut self, node: AstNode, parent: &str) -> Result<AstNode, VariableError> {
        Ok(match node {
            AstNode::Object(object) => {
                let path = join_path(parent, &object.name());
                AstNode::Object(ObjectDef {
                    params: self.resolve_params(&object.params, &path)?,
                    body: self.resolve_body(&object.body, &path)?,
                    ..object
                })
            }
            AstNode::Property(property) => {
                let path = join_path(parent, &property.name);
                let value = self.resolve_member(&property.value, &path)?;
                AstNode::Property(Property { value, ..property })
            }
            node @ (AstNode::Enum(_) | AstNode::Include(_)) => node,
        })
    }

    fn resolve_body(&mut self, body: &[AstNode], path: &str) -> Result<Vec<AstNode>, VariableError> {
        body.iter()
            .cloned()
            .map(|node| self.resolve_node(node, path))
            .collect()
    }

    fn resolve_params(&mut self, params: &[Param], path: &str) -> Result<Vec<Param>, VariableError> {
        params
            .iter()
            .map(|param| {
                let default = match &param.default {
                    Some(value) => {
                        Some(self.resolve_member(value, &join_path(path, &param.name))?)
                    }
                    None => None,
                };
                Ok(Param {
                    default,
                    ..param.clone()
                })
            })
            .collect()
    }

    /// Resolves the value of one property or parameter.
    fn resolve_member(&mut self, value: &ValueExpr, path: &str) -> Result<ValueExpr, VariableError> {
        match self.resolve_value(value, path) {
            Err(err @ VariableError::CircularReference { .. }) if self.isolate_cycles => {
                let VariableError::CircularReference { chain, .. } = &err;
                warn!("{err}");
                let name = chain.first().cloned().unwrap_or_default();
                self.diagnostics
                    .push(Diagnostic::error(path, err.to_string(), value.span));
                Ok(ValueExpr::new(ValueKind::Unresolved(name), value.span))
            }
            result => result,
        }
    }

    /// Looks up one reference: the environment first, then its default.
    fn resolve_var(
        &mut self,
        var: &VarRef,
        path: &str,
        span: Span,
    ) -> Result<Option<Scalar>, VariableError> {
        let mark = self.trail.len();
        let result = self.lookup_var(var, path, span, mark);
        if self.stack.is_empty() {
            self.trail.truncate(mark);
        }
        result
    }

    fn lookup_var(
        &mut self,
        var: &VarRef,
        path: &str,
        span: Span,
        mark: usize,
    ) -> Result<Option<Scalar>, VariableError> {
        if let Some(index) = self.stack.iter().position(|name| name == &var.name) {
            let mut chain = self.stack[index..].to_vec();
            chain.push(var.name.clone());
            return Err(VariableError::CircularReference {
                chain,
                path: path.to_string(),
                line: span.line,
                column: span.column,
            });
        }

        let key = (var.raw.clone(), var.typed);
        if let Some(cached) = self.cache.get(&key) {
            // An entry computed outside the current chain may hide a cycle
            // through a variable that is now on the stack.
            if !self.stack.iter().any(|name| cached.visited.contains(name)) {
                trace!("variable cache hit for {}", var.raw);
                let value = cached.value.clone();
                self.trail.extend(cached.visited.iter().cloned());
                return Ok(value);
            }
        }

        trace!("looking up variable {}", var.name);
        self.trail.push(var.name.clone());
        let resolved = match self.env.lookup(&var.name) {
            Some(text) if var.typed => Some(Scalar::coerce(&text)),
            Some(text) => Some(Scalar::String(text)),
            None => match &var.default {
                Some(default) => {
                    self.stack.push(var.name.clone());
                    let result = self.resolve_default(default, path, span);
                    self.stack.pop();
                    result?
                }
                None => None,
            },
        };

        let visited = self.trail[mark..].iter().cloned().collect();
        self.cache.insert(
            key,
            CachedVar {
                value: resolved.clone(),
                visited,
            },
        );
        Ok(resolved)
    }

    fn resolve_default(
        &mut self,
        default: &ValueExpr,
        path: &str,
        span: Span,
    ) -> Result<Option<Scalar>, VariableError> {
        match &default.kind {
            ValueKind::Scalar(scalar) => Ok(Some(scalar.clone())),
            ValueKind::VarRef(var) => self.resolve_var(var, path, span),
            ValueKind::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Literal(literal) => text.push_str(literal),
                        TemplatePart::Var(var) => match self.resolve_var(var, path, span)? {
                            Some(scalar) => text.push_str(&scalar.to_text()),
                            None => return Ok(None),
                        },
                    }
                }
                Ok(Some(Scalar::String(text)))
            }
            _ => Ok(None),
        }
    }

    fn missing(&mut self, name: &str, path: &str, span: Span) -> ValueKind {
        warn!("variable {name} is not set and has no default (at {path})");
        self.diagnostics.push(Diagnostic::error(
            path,
            format!("missing variable '{name}' with no default"),
            span,
        ));
        ValueKind::Unresolved(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::{parse, RecoveryMode};
    use std::cell::Cell;

    struct CountingEnv {
        vars: HashMap<String, String>,
        lookups: Cell<usize>,
    }

    impl CountingEnv {
        fn new(pairs: &[(&str, &str)]) -> Self {
            CountingEnv {
                vars: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                lookups: Cell::new(0),
            }
        }
    }

    impl EnvLookup for CountingEnv {
        fn lookup(&self, name: &str) -> Option<String> {
            self.lookups.set(self.lookups.get() + 1);
            self.vars.get(name).cloned()
        }
    }

    fn parse_str(source: &str) -> ConfigDocument {
        parse(tokenize(source).unwrap(), RecoveryMode::Strict).unwrap().0
    }

    fn resolve_with(source: &str, pairs: &[(&str, &str)]) -> ConfigDocument {
        resolve_variables(parse_str(source), &CountingEnv::new(pairs)).unwrap()
    }

    fn prop<'d>(doc: &'d ConfigDocument, object: &str, name: &str) -> &'d ValueExpr {
        &doc.object(object).unwrap().property(name).unwrap().value
    }

    #[test]
    fn test_default_used_when_unset() {
        let doc = resolve_with(r#"A { host = "${HOST:-localhost}" }"#, &[]);
        assert_eq!(prop(&doc, "A", "host").as_str(), Some("localhost"));
    }

    #[test]
    fn test_env_value_wins_over_default() {
        let doc = resolve_with(
            r#"A { url = "${HOST:-localhost}:${PORT:-8080}" }"#,
            &[("HOST", "prod.example.com")],
        );
        assert_eq!(prop(&doc, "A", "url").as_str(), Some("prod.example.com:8080"));
    }

    #[test]
    fn test_nested_defaults() {
        let doc = resolve_with(r#"A { v = "${A:-${B:-x}}" }"#, &[]);
        assert_eq!(prop(&doc, "A", "v").as_str(), Some("x"));

        let doc = resolve_with(r#"A { v = "${A:-${B:-x}}" }"#, &[("B", "from-b")]);
        assert_eq!(prop(&doc, "A", "v").as_str(), Some("from-b"));
    }

    #[test]
    fn test_bare_references_are_coerced() {
        let doc = resolve_with(
            "A { port = ${PORT}, on = ${ON}, ratio = ${RATIO}, name = ${NAME}, quoted = \"${PORT}\" }",
            &[("PORT", "9090"), ("ON", "true"), ("RATIO", "0.5"), ("NAME", "svc")],
        );
        assert_eq!(prop(&doc, "A", "port").as_int(), Some(9090));
        assert_eq!(prop(&doc, "A", "on").as_bool(), Some(true));
        assert_eq!(prop(&doc, "A", "ratio").as_float(), Some(0.5));
        assert_eq!(prop(&doc, "A", "name").as_str(), Some("svc"));
        assert_eq!(prop(&doc, "A", "quoted").as_str(), Some("9090"));
    }

    #[test]
    fn test_typed_default_keeps_its_type() {
        let doc = resolve_with("A { port = ${PORT:-8080}, tag = ${TAG:-\"42\"} }", &[]);
        assert_eq!(prop(&doc, "A", "port").as_int(), Some(8080));
        assert_eq!(prop(&doc, "A", "tag").as_str(), Some("42"));
    }

    #[test]
    fn test_missing_variable_leaves_marker() {
        let doc = resolve_with(r#"A { key = "${API_KEY}", other = 1 }"#, &[]);
        assert_eq!(
            prop(&doc, "A", "key").kind,
            ValueKind::Unresolved("API_KEY".to_string())
        );
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].path, "A.key");
        assert!(doc.diagnostics[0].is_error());
    }

    #[test]
    fn test_self_referential_default_is_circular() {
        let err = resolve_variables(parse_str(r#"A { v = "${X:-${X}}" }"#), &CountingEnv::new(&[]))
            .unwrap_err();
        let VariableError::CircularReference { chain, path, .. } = err;
        assert_eq!(chain, vec!["X", "X"]);
        assert_eq!(path, "A.v");
    }

    #[test]
    fn test_longer_cycle_through_defaults() {
        let err = resolve_variables(
            parse_str(r#"A { v = "${X:-${Y:-${X}}}" }"#),
            &CountingEnv::new(&[]),
        )
        .unwrap_err();
        let VariableError::CircularReference { chain, .. } = err;
        assert_eq!(chain, vec!["X", "Y", "X"]);
    }

    #[test]
    fn test_cached_default_does_not_hide_cycle() {
        let source = r#"App { a = "${X:-${Y}}", b = "${Y:-${X:-${Y}}}" }"#;
        let err = resolve_variables(parse_str(source), &CountingEnv::new(&[])).unwrap_err();
        let VariableError::CircularReference { chain, path, .. } = err;
        assert_eq!(chain, vec!["Y", "X", "Y"]);
        assert_eq!(path, "App.b");

        let mut resolver_env = HashMap::new();
        resolver_env.insert("UNRELATED".to_string(), "1".to_string());
        let doc = parse_str(source);
        let mut resolver = VariableResolver::new(&resolver_env);
        let a = resolver.resolve_path(&doc, "App.a").unwrap().unwrap();
        assert_eq!(a.kind, ValueKind::Unresolved("X".to_string()));
        assert!(resolver.resolve_path(&doc, "App.b").is_err());
    }

    #[test]
    fn test_isolated_cycle_fails_only_its_property() {
        let doc = parse_str(r#"App { bad = "${X:-${X}}", good = "ok", port = ${PORT:-80} }"#);
        let env = CountingEnv::new(&[]);
        let doc = VariableResolver::new(&env)
            .isolate_cycles(true)
            .resolve_document(doc)
            .unwrap();

        assert_eq!(prop(&doc, "App", "bad").kind, ValueKind::Unresolved("X".to_string()));
        assert_eq!(prop(&doc, "App", "good").as_str(), Some("ok"));
        assert_eq!(prop(&doc, "App", "port").as_int(), Some(80));
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].path, "App.bad");
        assert!(doc.diagnostics[0].is_error());
        assert!(doc.diagnostics[0].message.contains("X -> X"));
    }

    #[test]
    fn test_repeated_expression_is_cached() {
        let env = CountingEnv::new(&[("HOST", "h")]);
        let doc = parse_str(r#"A { a = "${HOST}", b = "${HOST}", c = "${HOST}" }"#);
        let doc = resolve_variables(doc, &env).unwrap();
        assert_eq!(prop(&doc, "A", "c").as_str(), Some("h"));
        assert_eq!(env.lookups.get(), 1);
    }

    #[test]
    fn test_lazy_resolution_fails_only_requested_value() {
        let doc = parse_str(r#"App { bad = "${X:-${X}}", good = "${Y:-fine}" }"#);
        let env = CountingEnv::new(&[]);
        let mut resolver = VariableResolver::new(&env);

        let good = resolver.resolve_path(&doc, "App.good").unwrap().unwrap();
        assert_eq!(good.as_str(), Some("fine"));
        assert!(resolver.resolve_path(&doc, "App.bad").is_err());
        assert!(resolver.resolve_path(&doc, "App.absent").unwrap().is_none());
        assert_eq!(env.lookups.get(), 2);

        assert!(resolve_variables(doc, &env).is_err());
    }

    #[test]
    fn test_resolves_params_constructors_and_arrays() {
        let doc = resolve_with(
            r#"Server(host = "${HOST:-a}") {
                hosts = ["${H1:-x}", ${N:-2}]
                db = Db(port = ${PORT:-5432}) { user = "${USER_NAME:-admin}" }
            }"#,
            &[],
        );
        let server = doc.object("Server").unwrap();
        assert_eq!(server.param("host").unwrap().default.as_ref().unwrap().as_str(), Some("a"));
        let hosts = server.property("hosts").unwrap().value.as_array().unwrap();
        assert_eq!(hosts[0].as_str(), Some("x"));
        assert_eq!(hosts[1].as_int(), Some(2));
        let db = server.property("db").unwrap().value.as_constructor().unwrap();
        assert_eq!(db.params[0].default.as_ref().unwrap().as_int(), Some(5432));
        assert_eq!(db.property("user").unwrap().value.as_str(), Some("admin"));
        assert!(doc.objects().all(|o| o.properties().all(|p| p.value.is_resolved())));
    }

    #[test]
    fn test_map_environments() {
        let mut hash = HashMap::new();
        hash.insert("A".to_string(), "1".to_string());
        let mut tree = BTreeMap::new();
        tree.insert("A".to_string(), "2".to_string());

        let from_hash = resolve_variables(parse_str("X { a = ${A} }"), &hash).unwrap();
        let from_tree = resolve_variables(parse_str("X { a = ${A} }"), &tree).unwrap();
        assert_eq!(prop(&from_hash, "X", "a").as_int(), Some(1));
        assert_eq!(prop(&from_tree, "X", "a").as_int(), Some(2));
    }

    #[test]
    fn test_process_env() {
        std::env::set_var("CFGPP_VARIABLES_TEST_VALUE", "from-process");
        let doc = resolve_variables(
            parse_str(r#"X { a = "${CFGPP_VARIABLES_TEST_VALUE}" }"#),
            &ProcessEnv,
        )
        .unwrap();
        assert_eq!(prop(&doc, "X", "a").as_str(), Some("from-process"));
    }
}
