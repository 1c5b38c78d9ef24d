use crate::ast::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write};

/// A plain data view of a document, used for JSON/YAML output and rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// Converts a whole document: objects and enums keyed by name. Includes are not data.
pub fn to_value(document: &ConfigDocument) -> Value {
    let mut map = BTreeMap::new();
    for entry in &document.entries {
        match entry {
            AstNode::Object(o) => {
                map.insert(o.name(), object_to_value(o));
            }
            AstNode::Enum(e) => {
                map.insert(e.name.clone(), enum_to_value(e));
            }
            AstNode::Property(p) => {
                map.insert(p.name.clone(), value_to_value(&p.value));
            }
            AstNode::Include(_) => {}
        }
    }
    Value::Object(map)
}

pub fn object_to_value(object: &ObjectDef) -> Value {
    members_to_value(&object.params, &object.body)
}

// Parameter defaults first, then body entries override them.
pub(crate) fn members_to_value(params: &[Param], body: &[AstNode]) -> Value {
    let mut map = BTreeMap::new();
    for param in params {
        if let Some(default) = &param.default {
            map.insert(param.name.clone(), value_to_value(default));
        }
    }
    for node in body {
        match node {
            AstNode::Property(p) => {
                map.insert(p.name.clone(), value_to_value(&p.value));
            }
            AstNode::Object(o) => {
                map.insert(o.name(), object_to_value(o));
            }
            AstNode::Enum(e) => {
                map.insert(e.name.clone(), enum_to_value(e));
            }
            AstNode::Include(_) => {}
        }
    }
    Value::Object(map)
}

fn enum_to_value(def: &EnumDef) -> Value {
    let mut map = BTreeMap::new();
    map.insert(
        "values".to_string(),
        Value::Array(def.values.iter().cloned().map(Value::String).collect()),
    );
    if let Some(default) = &def.default {
        map.insert("default".to_string(), Value::String(default.clone()));
    }
    Value::Object(map)
}

pub fn value_to_value(value: &ValueExpr) -> Value {
    match &value.kind {
        ValueKind::Scalar(s) => scalar_to_value(s),
        ValueKind::Array(items) => Value::Array(items.iter().map(value_to_value).collect()),
        ValueKind::Constructor(c) => members_to_value(&c.params, c.body()),
        // Still-unresolved references keep their source text.
        ValueKind::VarRef(var) => Value::String(var.raw.clone()),
        ValueKind::Template(parts) => Value::String(template_text(parts)),
        ValueKind::Unresolved(_) => Value::Null,
    }
}

fn scalar_to_value(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::String(s) => Value::String(s.clone()),
        Scalar::Int(i) => Value::Int(*i),
        Scalar::Float(f) => Value::Float(*f),
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Null => Value::Null,
    }
}

fn template_text(parts: &[TemplatePart]) -> String {
    parts
        .iter()
        .map(|part| match part {
            TemplatePart::Literal(text) => text.as_str(),
            TemplatePart::Var(var) => var.raw.as_str(),
        })
        .collect()
}

// === Canonical CFGPP text ===

const INDENT: &str = "    ";

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write_node(f, entry, 0)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self, 0)
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, 0)
    }
}

fn write_indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        f.write_str(INDENT)?;
    }
    Ok(())
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &AstNode, depth: usize) -> fmt::Result {
    write_indent(f, depth)?;
    match node {
        AstNode::Object(o) => {
            write!(f, "{}", o.type_name)?;
            if !o.params.is_empty() {
                write_params(f, &o.params, depth)?;
            }
            if o.body.is_empty() && !o.params.is_empty() {
                return Ok(());
            }
            f.write_char(' ')?;
            write_body(f, &o.body, depth)
        }
        AstNode::Property(p) => {
            if let Some(declared) = &p.declared_type {
                write!(f, "{declared} ")?;
            }
            write!(f, "{} = ", p.name)?;
            write_value(f, &p.value, depth)
        }
        AstNode::Enum(e) => {
            writeln!(f, "enum {} {{", e.name)?;
            write_indent(f, depth + 1)?;
            f.write_str("values = [")?;
            for (i, value) in e.values.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_string(f, value)?;
            }
            writeln!(f, "]")?;
            if let Some(default) = &e.default {
                write_indent(f, depth + 1)?;
                f.write_str("default = ")?;
                write_string(f, default)?;
                writeln!(f)?;
            }
            write_indent(f, depth)?;
            f.write_char('}')
        }
        AstNode::Include(i) => {
            f.write_str("@include ")?;
            write_string(f, &i.path)
        }
    }
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &[AstNode], depth: usize) -> fmt::Result {
    if body.is_empty() {
        return f.write_str("{}");
    }
    writeln!(f, "{{")?;
    for node in body {
        write_node(f, node, depth + 1)?;
        writeln!(f)?;
    }
    write_indent(f, depth)?;
    f.write_char('}')
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[Param], depth: usize) -> fmt::Result {
    f.write_char('(')?;
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        if let Some(declared) = &param.declared_type {
            write!(f, "{declared} ")?;
        }
        f.write_str(&param.name)?;
        if let Some(default) = &param.default {
            f.write_str(" = ")?;
            write_value(f, default, depth)?;
        }
    }
    f.write_char(')')
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &ValueExpr, depth: usize) -> fmt::Result {
    match &value.kind {
        ValueKind::Scalar(s) => write_scalar(f, s),
        ValueKind::Array(items) => {
            f.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_value(f, item, depth)?;
            }
            f.write_char(']')
        }
        ValueKind::Constructor(c) => {
            write!(f, "{}", c.type_name)?;
            match &c.body {
                None => write_params(f, &c.params, depth),
                Some(body) => {
                    if !c.params.is_empty() {
                        write_params(f, &c.params, depth)?;
                    }
                    f.write_char(' ')?;
                    write_body(f, body, depth)
                }
            }
        }
        ValueKind::VarRef(var) if var.typed => f.write_str(&var.raw),
        ValueKind::VarRef(var) => write_string(f, &var.raw),
        ValueKind::Template(parts) => write_string(f, &template_text(parts)),
        ValueKind::Unresolved(name) => write!(f, "${{{name}}}"),
    }
}

fn write_scalar(f: &mut fmt::Formatter<'_>, scalar: &Scalar) -> fmt::Result {
    match scalar {
        Scalar::String(s) => write_string(f, s),
        Scalar::Int(i) => write!(f, "{i}"),
        // Debug keeps a fractional part or exponent, so the text lexes back as a float.
        Scalar::Float(n) => write!(f, "{n:?}"),
        Scalar::Bool(b) => write!(f, "{b}"),
        Scalar::Null => f.write_str("null"),
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::{parse, RecoveryMode};
    use proptest::prelude::*;

    fn parse_str(source: &str) -> ConfigDocument {
        parse(tokenize(source).unwrap(), RecoveryMode::Strict).unwrap().0
    }

    fn assert_round_trip(source: &str) {
        let mut original = parse_str(source);
        let printed = original.to_string();
        let mut reparsed = parse_str(&printed);
        original.strip_positions();
        reparsed.strip_positions();
        assert_eq!(original, reparsed, "printed form:\n{printed}");
    }

    #[test]
    fn test_round_trip_full_syntax() {
        assert_round_trip(
            r#"
            @include "base.cfgpp"
            enum::Level { values = ["debug", "info"], default = "info" }
            Server::Http(string host = "localhost", int port = 8080, debug) {
                int[] ports = [80, 443]
                ratio = 0.5
                big = 1e300
                whole = 2.0
                name = "quote \" and \\ and\nnewline"
                env = ${HOME:-"/root"}
                url = "${HOST:-localhost}:${PORT:-8080}"
                nothing = null
                Nested { flag = false }
                db = Database::Postgres(int pool = 4) { host = "db" }
                call = Timeout()
                empty = Thing {}
            }
            Plain(x = 1)
            Empty {}
            "#,
        );
    }

    #[test]
    fn test_display_format() {
        let doc = parse_str("A(int x = 1) { name = \"n\" Inner { v = [1, 2] } }");
        let expected = "A(int x = 1) {\n    name = \"n\"\n    Inner {\n        v = [1, 2]\n    }\n}\n";
        assert_eq!(doc.to_string(), expected);
    }

    #[test]
    fn test_to_value_params_overridden_by_body() {
        let doc = parse_str("App(port = 1, host = \"h\") { port = 2, Nested { on = true } }");
        let Value::Object(root) = to_value(&doc) else {
            panic!("expected object");
        };
        let Value::Object(app) = &root["App"] else {
            panic!("expected object");
        };
        assert_eq!(app["port"], Value::Int(2));
        assert_eq!(app["host"], Value::String("h".to_string()));
        assert_eq!(
            app["Nested"],
            Value::Object(BTreeMap::from([("on".to_string(), Value::Bool(true))]))
        );
    }

    #[test]
    fn test_value_serializes_untagged() {
        let doc = parse_str("A { i = 1, f = 1.5, s = \"x\", l = [true, null] }");
        let json = serde_json::to_string(&to_value(&doc)).unwrap();
        assert_eq!(json, r#"{"A":{"f":1.5,"i":1,"l":[true,null],"s":"x"}}"#);
    }

    fn scalar_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            any::<i64>().prop_map(|i| i.to_string()),
            (-1.0e6f64..1.0e6).prop_map(|f| format!("{f:?}")),
            "[a-zA-Z0-9 _\\-\"\\\\]{0,12}".prop_map(|s| {
                let mut out = String::from("\"");
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        c => out.push(c),
                    }
                }
                out.push('"');
                out
            }),
            Just("true".to_string()),
            Just("null".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_print_then_parse_is_identity(
            names in prop::collection::btree_set(
                "[a-z][a-z0-9_]{0,6}".prop_filter("keyword", |n| !matches!(n.as_str(), "true" | "false" | "null")),
                1..6,
            ),
            values in prop::collection::vec(scalar_strategy(), 6),
        ) {
            let body: Vec<String> = names
                .iter()
                .zip(values.iter().cycle())
                .map(|(name, value)| format!("{name} = {value}"))
                .collect();
            let source = format!("Generated {{ {} }}", body.join("\n"));
            assert_round_trip(&source);
        }
    }
}
