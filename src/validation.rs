//! Checks a resolved document against a `SchemaDocument`.
//!
//! Validation never fails and never touches the document: every problem becomes
//! a `Diagnostic` and the caller decides what to do with them.

use crate::ast::*;
use crate::error::{Diagnostic, Severity};
use crate::schema::{Constraints, FieldSpec, SchemaDef, SchemaDocument};
use crate::serialization::{members_to_value, Value};
use crate::utils::join_path;
use log::debug;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// False when at least one diagnostic is an error. Warnings do not count.
    pub is_valid: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            is_valid: !diagnostics.iter().any(Diagnostic::is_error),
            diagnostics,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning)
    }
}

/// Validates every object, enum and constructor value in `document`.
pub fn validate(document: &ConfigDocument, schema: &SchemaDocument) -> ValidationResult {
    Validator::new(schema).validate(document)
}

/// Validates only the subtree at a dotted `path` such as `App.database`.
pub fn validate_section(
    document: &ConfigDocument,
    schema: &SchemaDocument,
    path: &str,
) -> ValidationResult {
    Validator::new(schema).validate_section(document, path)
}

#[derive(Debug, Clone, Copy)]
pub struct Validator<'s> {
    schema: &'s SchemaDocument,
    check_enum_defaults: bool,
}

impl<'s> Validator<'s> {
    pub fn new(schema: &'s SchemaDocument) -> Self {
        Self {
            schema,
            check_enum_defaults: true,
        }
    }

    /// Whether enum definitions in the document must have their default among their values.
    #[must_use]
    pub fn check_enum_defaults(mut self, enabled: bool) -> Self {
        self.check_enum_defaults = enabled;
        self
    }

    pub fn validate(&self, document: &ConfigDocument) -> ValidationResult {
        debug!("validating {} top-level entries", document.entries.len());
        let mut pass = Pass::new(self, document);
        for entry in &document.entries {
            match entry {
                AstNode::Object(object) => pass.check_object(object, &object.name()),
                AstNode::Enum(def) => pass.check_enum_def(def, &def.name),
                AstNode::Property(property) => pass.check_top_level_property(property),
                AstNode::Include(include) => pass.unresolved_include(include, ""),
            }
        }
        pass.finish()
    }

    pub fn validate_section(&self, document: &ConfigDocument, path: &str) -> ValidationResult {
        debug!("validating section '{path}'");
        let mut pass = Pass::new(self, document);
        match document.find(path) {
            Some(NodeRef::Object(object)) => pass.check_object(object, path),
            Some(NodeRef::Enum(def)) => pass.check_enum_def(def, path),
            Some(NodeRef::Value(value)) => pass.check_value(value, path),
            None => pass.error(path, format!("no section at path '{path}'"), Span::default()),
        }
        pass.finish()
    }
}

/// A member of an object as validation sees it: a value or a nested object.
#[derive(Clone, Copy)]
enum Member<'a> {
    Value(&'a ValueExpr),
    Object(&'a ObjectDef),
}

#[derive(Clone, Copy)]
struct Field<'a> {
    name: &'a str,
    member: Member<'a>,
    declared_type: Option<&'a TypeRef>,
    span: Span,
}

#[derive(Debug, PartialEq, Eq)]
enum TypeCheck {
    Ok,
    Mismatch,
    UnknownType,
}

/// The state of one validation run.
struct Pass<'a> {
    schema: &'a SchemaDocument,
    document: &'a ConfigDocument,
    check_enum_defaults: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Pass<'a> {
    fn new(validator: &Validator<'a>, document: &'a ConfigDocument) -> Self {
        Self {
            schema: validator.schema,
            document,
            check_enum_defaults: validator.check_enum_defaults,
            diagnostics: Vec::new(),
        }
    }

    fn finish(self) -> ValidationResult {
        let result = ValidationResult::from_diagnostics(self.diagnostics);
        debug!(
            "validation finished: {} error(s), {} warning(s)",
            result.errors().count(),
            result.warnings().count()
        );
        result
    }

    fn error(&mut self, path: &str, message: String, span: Span) {
        self.diagnostics.push(Diagnostic::error(path, message, span));
    }

    fn warning(&mut self, path: &str, message: String, span: Span) {
        self.diagnostics.push(Diagnostic::warning(path, message, span));
    }

    // === Walk ===

    fn check_object(&mut self, object: &'a ObjectDef, path: &str) {
        self.check_members(&object.type_name, &object.params, &object.body, object.span, path);
    }

    fn check_top_level_property(&mut self, property: &'a Property) {
        let field = Field {
            name: &property.name,
            member: Member::Value(&property.value),
            declared_type: property.declared_type.as_ref(),
            span: property.span,
        };
        self.check_declared_type(&field, &property.name);
        self.check_value(&property.value, &property.name);
    }

    fn check_value(&mut self, value: &'a ValueExpr, path: &str) {
        match &value.kind {
            ValueKind::Scalar(_) => {}
            ValueKind::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.check_value(item, &format!("{path}[{i}]"));
                }
            }
            ValueKind::Constructor(c) => {
                self.check_members(&c.type_name, &c.params, c.body(), value.span, path);
            }
            ValueKind::Unresolved(name) => {
                self.error(path, format!("unresolved variable '{name}'"), value.span);
            }
            ValueKind::VarRef(var) => {
                self.warning(path, format!("unresolved interpolation '{}'", var.raw), value.span);
            }
            ValueKind::Template(parts) => {
                let refs: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| match part {
                        TemplatePart::Var(var) => Some(var.raw.as_str()),
                        TemplatePart::Literal(_) => None,
                    })
                    .collect();
                self.warning(
                    path,
                    format!("unresolved interpolation '{}'", refs.join("")),
                    value.span,
                );
            }
        }
    }

    fn check_enum_def(&mut self, def: &EnumDef, path: &str) {
        if !self.check_enum_defaults {
            return;
        }
        if let Some(default) = &def.default {
            if !def.values.contains(default) {
                self.error(
                    path,
                    format!("default of enum '{}': {}", def.name, not_in(default, &def.values)),
                    def.span,
                );
            }
        }
    }

    fn unresolved_include(&mut self, include: &IncludeDirective, path: &str) {
        self.warning(path, format!("unresolved include '{}'", include.path), include.span);
    }

    // === Objects ===

    fn check_members(
        &mut self,
        type_name: &NamespacedIdentifier,
        params: &'a [Param],
        body: &'a [AstNode],
        span: Span,
        path: &str,
    ) {
        let fields = self.collect_fields(params, body, path);
        let type_key = type_name.to_string();
        let schema = self.schema;

        match schema.schema(&type_key) {
            Some(def) => self.check_against_schema(def, params, body, &fields, span, path),
            None => {
                self.warning(path, format!("no schema for type '{type_key}'"), span);
                for field in &fields {
                    let field_path = join_path(path, field.name);
                    if let (true, Some(ty), Member::Value(value)) = (
                        self.check_declared_type(field, &field_path),
                        field.declared_type,
                        field.member,
                    ) {
                        self.check_enum_membership(value, ty, &field_path);
                    }
                }
            }
        }

        for field in &fields {
            let field_path = join_path(path, field.name);
            match field.member {
                Member::Value(value) => self.check_value(value, &field_path),
                Member::Object(object) => self.check_object(object, &field_path),
            }
        }
    }

    /// Parameter defaults, then body entries in order. A body name seen twice is a duplicate.
    fn collect_fields(&mut self, params: &'a [Param], body: &'a [AstNode], path: &str) -> Vec<Field<'a>> {
        let mut fields: Vec<Field<'a>> = Vec::new();
        let place = |fields: &mut Vec<Field<'a>>, field: Field<'a>| {
            match fields.iter_mut().find(|f| f.name == field.name) {
                Some(slot) => *slot = field,
                None => fields.push(field),
            }
        };

        for param in params {
            if let Some(default) = &param.default {
                place(
                    &mut fields,
                    Field {
                        name: &param.name,
                        member: Member::Value(default),
                        declared_type: param.declared_type.as_ref(),
                        span: param.span,
                    },
                );
            }
        }

        let mut seen = HashSet::new();
        for node in body {
            let field = match node {
                AstNode::Property(p) => Field {
                    name: &p.name,
                    member: Member::Value(&p.value),
                    declared_type: p.declared_type.as_ref(),
                    span: p.span,
                },
                AstNode::Object(o) => Field {
                    name: o.type_name.last(),
                    member: Member::Object(o),
                    declared_type: None,
                    span: o.span,
                },
                AstNode::Enum(def) => {
                    self.check_enum_def(def, &join_path(path, &def.name));
                    continue;
                }
                AstNode::Include(include) => {
                    self.unresolved_include(include, path);
                    continue;
                }
            };
            if !seen.insert(field.name) {
                self.warning(
                    &join_path(path, field.name),
                    format!("duplicate field '{}'", field.name),
                    field.span,
                );
            }
            place(&mut fields, field);
        }
        fields
    }

    fn check_against_schema(
        &mut self,
        def: &SchemaDef,
        params: &'a [Param],
        body: &'a [AstNode],
        fields: &[Field<'a>],
        span: Span,
        path: &str,
    ) {
        let present = |name: &str| fields.iter().any(|f| f.name == name);

        for spec in &def.required {
            if !present(&spec.name) {
                self.error(path, format!("missing required field '{}'", spec.name), span);
            }
        }

        // Fields whose type is wrong skip the enum and constraint passes.
        let mut mismatched = HashSet::new();
        for field in fields {
            let field_path = join_path(path, field.name);
            match def.field(field.name) {
                Some((spec, required)) => {
                    if !self.check_field_type(field, spec, required, &field_path) {
                        mismatched.insert(field.name);
                    }
                }
                None => self.warning(
                    &field_path,
                    format!("unknown field '{}' for type '{}'", field.name, def.name),
                    field.span,
                ),
            }
            if !mismatched.contains(field.name) && !self.check_declared_type(field, &field_path) {
                mismatched.insert(field.name);
            }
        }

        for field in fields.iter().filter(|f| !mismatched.contains(f.name)) {
            let field_path = join_path(path, field.name);
            let Member::Value(value) = field.member else {
                continue;
            };
            let expected = def
                .field(field.name)
                .map(|(spec, _)| &spec.expected_type)
                .or(field.declared_type);
            if let Some(ty) = expected {
                self.check_enum_membership(value, ty, &field_path);
            }
        }

        for field in fields.iter().filter(|f| !mismatched.contains(f.name)) {
            if let (Some((spec, _)), Member::Value(value)) = (def.field(field.name), field.member) {
                if !spec.constraints.is_empty() {
                    self.check_constraints(field.name, value, &spec.constraints, &join_path(path, field.name));
                }
            }
        }

        if def.rules.is_empty() {
            return;
        }
        let Value::Object(values) = members_to_value(params, body) else {
            return;
        };
        for rule in &def.rules {
            match rule.check(&values) {
                Ok(true) => {}
                Ok(false) => self.error(path, format!("rule violated: {}", rule.expr), span),
                Err(e) => self.warning(path, format!("could not evaluate rule {}: {e}", rule.expr), span),
            }
        }
    }

    // === Types ===

    /// Returns false when the value does not fit the schema type.
    fn check_field_type(&mut self, field: &Field<'a>, spec: &FieldSpec, required: bool, path: &str) -> bool {
        if let Member::Value(value) = field.member {
            if !required && matches!(value.kind, ValueKind::Scalar(Scalar::Null)) {
                return true;
            }
        }
        self.report_type(field, &spec.expected_type, path)
    }

    /// Checks a `Type name = value` annotation written in the document itself.
    fn check_declared_type(&mut self, field: &Field<'a>, path: &str) -> bool {
        match field.declared_type {
            Some(ty) => self.report_type(field, ty, path),
            None => true,
        }
    }

    fn report_type(&mut self, field: &Field<'a>, ty: &TypeRef, path: &str) -> bool {
        let (check, found) = match field.member {
            Member::Value(value) => (self.type_of_value(value, ty), value.kind_name()),
            Member::Object(object) => (self.type_of_object(object, ty), "object"),
        };
        match check {
            TypeCheck::Ok => true,
            TypeCheck::Mismatch => {
                self.error(
                    path,
                    format!("field '{}' expected {ty}, found {found}", field.name),
                    field.span,
                );
                false
            }
            TypeCheck::UnknownType => {
                self.warning(path, format!("unknown type '{ty}' for field '{}'", field.name), field.span);
                true
            }
        }
    }

    fn type_of_value(&self, value: &ValueExpr, ty: &TypeRef) -> TypeCheck {
        let scalar = match &value.kind {
            // Reported separately by the walk.
            ValueKind::VarRef(_) | ValueKind::Template(_) | ValueKind::Unresolved(_) => {
                return TypeCheck::Ok
            }
            ValueKind::Array(items) if ty.is_array => {
                let element = ty.element();
                return items
                    .iter()
                    .map(|item| self.type_of_value(item, &element))
                    .find(|check| *check != TypeCheck::Ok)
                    .unwrap_or(TypeCheck::Ok);
            }
            _ if ty.is_array => return TypeCheck::Mismatch,
            ValueKind::Scalar(s) => Some(s),
            _ => None,
        };

        let name = ty.name.to_string();
        let fits = match name.as_str() {
            "any" => true,
            "string" => matches!(scalar, Some(Scalar::String(_))),
            "int" | "integer" => matches!(scalar, Some(Scalar::Int(_))),
            "float" | "double" | "number" => matches!(scalar, Some(Scalar::Int(_) | Scalar::Float(_))),
            "bool" | "boolean" => matches!(scalar, Some(Scalar::Bool(_))),
            "null" => matches!(scalar, Some(Scalar::Null)),
            "array" => matches!(value.kind, ValueKind::Array(_)),
            "object" => matches!(value.kind, ValueKind::Constructor(_)),
            _ if self.enum_values(&name).is_some() => matches!(scalar, Some(Scalar::String(_))),
            _ if self.schema.schema(&name).is_some() => {
                value.as_constructor().is_some_and(|c| c.type_name.to_string() == name)
            }
            _ => return TypeCheck::UnknownType,
        };
        if fits {
            TypeCheck::Ok
        } else {
            TypeCheck::Mismatch
        }
    }

    fn type_of_object(&self, object: &ObjectDef, ty: &TypeRef) -> TypeCheck {
        let name = ty.name.to_string();
        if ty.is_array {
            return TypeCheck::Mismatch;
        }
        match name.as_str() {
            "any" | "object" => TypeCheck::Ok,
            _ if self.schema.schema(&name).is_some() => {
                if object.name() == name {
                    TypeCheck::Ok
                } else {
                    TypeCheck::Mismatch
                }
            }
            _ if is_builtin(&name) || self.enum_values(&name).is_some() => TypeCheck::Mismatch,
            _ => TypeCheck::UnknownType,
        }
    }

    fn enum_values(&self, name: &str) -> Option<&'a [String]> {
        self.schema
            .enum_def(name)
            .or_else(|| self.document.enum_def(name))
            .map(|def| def.values.as_slice())
    }

    // === Enums and constraints ===

    fn check_enum_membership(&mut self, value: &ValueExpr, ty: &TypeRef, path: &str) {
        let Some(values) = self.enum_values(&ty.name.to_string()) else {
            return;
        };
        let items = match (&value.kind, ty.is_array) {
            (ValueKind::Array(items), true) => items.as_slice(),
            (_, false) => std::slice::from_ref(value),
            _ => return,
        };
        for item in items {
            if let Some(text) = item.as_str() {
                if !values.iter().any(|v| v == text) {
                    self.error(path, not_in(text, values), item.span);
                }
            }
        }
    }

    fn check_constraints(&mut self, name: &str, value: &ValueExpr, constraints: &Constraints, path: &str) {
        if let Some(number) = value.as_float() {
            let shown = value.as_scalar().map(Scalar::to_text).unwrap_or_default();
            if let Some(min) = constraints.min.filter(|min| number < *min) {
                self.error(path, format!("field '{name}' value {shown} is below min {min}"), value.span);
            }
            if let Some(max) = constraints.max.filter(|max| number > *max) {
                self.error(path, format!("field '{name}' value {shown} exceeds max {max}"), value.span);
            }
        }

        let length = match &value.kind {
            ValueKind::Scalar(Scalar::String(s)) => Some(s.chars().count()),
            ValueKind::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(length) = length {
            if let Some(min) = constraints.min_length.filter(|min| length < *min) {
                self.error(
                    path,
                    format!("field '{name}' length {length} is below min_length {min}"),
                    value.span,
                );
            }
            if let Some(max) = constraints.max_length.filter(|max| length > *max) {
                self.error(
                    path,
                    format!("field '{name}' length {length} exceeds max_length {max}"),
                    value.span,
                );
            }
        }

        if let (Some(pattern), Some(text)) = (&constraints.pattern, value.as_str()) {
            if !pattern.is_match(text) {
                self.error(
                    path,
                    format!("field '{name}' value {text:?} does not match pattern '{}'", pattern.as_str()),
                    value.span,
                );
            }
        }
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "string" | "int" | "integer" | "float" | "double" | "number" | "bool" | "boolean" | "null" | "array"
    )
}

/// `"pending" not in ["active","inactive"]`
fn not_in(value: &str, values: &[String]) -> String {
    let listed: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
    format!("{value:?} not in [{}]", listed.join(","))
}
