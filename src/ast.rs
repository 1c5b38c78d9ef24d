use crate::error::Diagnostic;
use miette::SourceSpan;
use std::fmt;
use std::path::PathBuf;

/// Source location of a node: a byte range for labels plus the 1-based
/// line/column of its first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// A span starting at `self` and ending where `other` ends.
    #[must_use]
    pub fn to(self, other: Span) -> Span {
        Span {
            end: other.end.max(self.start),
            ..self
        }
    }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.end.saturating_sub(span.start)).into()
    }
}

/// A `::`-separated type name such as `Database::PostgreSQL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedIdentifier {
    pub segments: Vec<String>,
}

impl NamespacedIdentifier {
    /// `segments` must be non-empty and contain no empty names; the parser
    /// only builds identifiers that satisfy this.
    pub fn new(segments: Vec<String>) -> Self {
        debug_assert!(!segments.is_empty(), "namespaced identifier without segments");
        Self { segments }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Splits `A::B::C` into its segments. Returns `None` if any segment is
    /// empty (`""`, `A::`, `::B`).
    pub fn parse(text: &str) -> Option<Self> {
        let segments: Vec<String> = text.split("::").map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self { segments })
    }

    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }

    pub fn last(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for NamespacedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("::"))
    }
}

/// A declared type: `int`, `Database::PostgreSQL`, `string[]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub name: NamespacedIdentifier,
    pub is_array: bool,
}

impl TypeRef {
    pub fn new(name: NamespacedIdentifier, is_array: bool) -> Self {
        Self { name, is_array }
    }

    pub fn simple(name: &str) -> Self {
        Self::new(NamespacedIdentifier::single(name), false)
    }

    /// The element type of an array type (`int[]` -> `int`).
    #[must_use]
    pub fn element(&self) -> TypeRef {
        TypeRef::new(self.name.clone(), false)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array {
            write!(f, "{}[]", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Param {
    pub name: String,
    pub declared_type: Option<TypeRef>,
    pub default: Option<ValueExpr>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ObjectDef {
    pub type_name: NamespacedIdentifier,
    pub params: Vec<Param>,
    pub body: Vec<AstNode>,
    pub span: Span,
}

impl ObjectDef {
    pub fn name(&self) -> String {
        self.type_name.to_string()
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.body.iter().filter_map(AstNode::as_property)
    }

    pub fn nested_objects(&self) -> impl Iterator<Item = &ObjectDef> {
        self.body.iter().filter_map(AstNode::as_object)
    }

    /// The last property with this name; later definitions shadow earlier ones.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties().filter(|p| p.name == name).last()
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn nested(&self, name: &str) -> Option<&ObjectDef> {
        self.nested_objects().filter(|o| o.name() == name).last()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Property {
    pub name: String,
    pub declared_type: Option<TypeRef>,
    pub value: ValueExpr,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
    pub default: Option<String>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct IncludeDirective {
    pub path: String,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub enum AstNode {
    Object(ObjectDef),
    Property(Property),
    Enum(EnumDef),
    Include(IncludeDirective),
}

impl AstNode {
    pub fn span(&self) -> Span {
        match self {
            AstNode::Object(o) => o.span,
            AstNode::Property(p) => p.span,
            AstNode::Enum(e) => e.span,
            AstNode::Include(i) => i.span,
        }
    }

    /// The key this node is stored under in its enclosing scope.
    /// Includes have none; they are placeholders until resolved.
    pub fn entry_name(&self) -> Option<String> {
        match self {
            AstNode::Object(o) => Some(o.name()),
            AstNode::Property(p) => Some(p.name.clone()),
            AstNode::Enum(e) => Some(e.name.clone()),
            AstNode::Include(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectDef> {
        match self {
            AstNode::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&Property> {
        match self {
            AstNode::Property(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumDef> {
        match self {
            AstNode::Enum(e) => Some(e),
            _ => None,
        }
    }

    fn strip_positions(&mut self) {
        match self {
            AstNode::Object(o) => strip_object(o),
            AstNode::Property(p) => {
                p.span = Span::default();
                p.value.strip_positions();
            }
            AstNode::Enum(e) => e.span = Span::default(),
            AstNode::Include(i) => i.span = Span::default(),
        }
    }
}

fn strip_object(object: &mut ObjectDef) {
    object.span = Span::default();
    strip_params(&mut object.params);
    for node in &mut object.body {
        node.strip_positions();
    }
}

fn strip_params(params: &mut [Param]) {
    for param in params {
        param.span = Span::default();
        if let Some(default) = &mut param.default {
            default.strip_positions();
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Scalar {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::String(_) => "string",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Bool(_) => "bool",
            Scalar::Null => "null",
        }
    }

    /// Interprets environment text the way a bare `${...}` value does.
    pub fn coerce(text: &str) -> Scalar {
        match text {
            "true" => Scalar::Bool(true),
            "false" => Scalar::Bool(false),
            "null" => Scalar::Null,
            _ => {
                if let Ok(i) = text.parse::<i64>() {
                    Scalar::Int(i)
                } else if looks_numeric(text) {
                    text.parse::<f64>()
                        .map(Scalar::Float)
                        .unwrap_or_else(|_| Scalar::String(text.to_string()))
                } else {
                    Scalar::String(text.to_string())
                }
            }
        }
    }

    /// The plain text of the scalar as it is spliced into a template.
    pub fn to_text(&self) -> String {
        match self {
            Scalar::String(s) => s.clone(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Null => "null".to_string(),
        }
    }
}

// `f64::from_str` also accepts "inf" and "NaN", which are not CFGPP numbers.
fn looks_numeric(text: &str) -> bool {
    let digits = text.trim_start_matches(['+', '-']);
    digits.starts_with(|c: char| c.is_ascii_digit())
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

#[derive(Debug, PartialEq, Clone)]
pub struct ConstructorCall {
    pub type_name: NamespacedIdentifier,
    pub params: Vec<Param>,
    pub body: Option<Vec<AstNode>>,
}

impl ConstructorCall {
    pub fn body(&self) -> &[AstNode] {
        self.body.as_deref().unwrap_or_default()
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.body()
            .iter()
            .filter_map(AstNode::as_property)
            .filter(|p| p.name == name)
            .last()
    }
}

/// A `${NAME}` or `${NAME:-default}` reference.
#[derive(Debug, PartialEq, Clone)]
pub struct VarRef {
    pub name: String,
    pub default: Option<Box<ValueExpr>>,
    /// Bare references (outside a string literal) coerce their text to a typed scalar.
    pub typed: bool,
    /// The reference as written, including `${` and `}`.
    pub raw: String,
}

#[derive(Debug, PartialEq, Clone)]
pub enum TemplatePart {
    Literal(String),
    Var(VarRef),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ValueKind {
    Scalar(Scalar),
    Array(Vec<ValueExpr>),
    Constructor(ConstructorCall),
    VarRef(VarRef),
    Template(Vec<TemplatePart>),
    /// Left behind when a variable has neither a value nor a default.
    Unresolved(String),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ValueExpr {
    pub kind: ValueKind,
    pub span: Span,
}

impl ValueExpr {
    pub fn new(kind: ValueKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn scalar(scalar: Scalar, span: Span) -> Self {
        Self::new(ValueKind::Scalar(scalar), span)
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match &self.kind {
            ValueKind::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.kind {
            ValueKind::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &self.kind {
            ValueKind::Scalar(Scalar::Float(f)) => Some(*f),
            ValueKind::Scalar(Scalar::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.kind {
            ValueKind::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ValueExpr]> {
        match &self.kind {
            ValueKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_constructor(&self) -> Option<&ConstructorCall> {
        match &self.kind {
            ValueKind::Constructor(c) => Some(c),
            _ => None,
        }
    }

    /// A short name for the shape of this value, used in messages.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ValueKind::Scalar(s) => s.type_name(),
            ValueKind::Array(_) => "array",
            ValueKind::Constructor(_) => "object",
            ValueKind::VarRef(_) => "variable reference",
            ValueKind::Template(_) => "interpolated string",
            ValueKind::Unresolved(_) => "unresolved variable",
        }
    }

    /// True once no `${...}` remains anywhere in the value.
    pub fn is_resolved(&self) -> bool {
        match &self.kind {
            ValueKind::Scalar(_) => true,
            ValueKind::Array(items) => items.iter().all(ValueExpr::is_resolved),
            ValueKind::Constructor(c) => {
                c.params
                    .iter()
                    .all(|p| p.default.as_ref().map_or(true, ValueExpr::is_resolved))
                    && c.body().iter().all(|node| match node {
                        AstNode::Property(p) => p.value.is_resolved(),
                        _ => true,
                    })
            }
            ValueKind::VarRef(_) | ValueKind::Template(_) | ValueKind::Unresolved(_) => false,
        }
    }

    pub(crate) fn strip_positions(&mut self) {
        self.span = Span::default();
        match &mut self.kind {
            ValueKind::Array(items) => items.iter_mut().for_each(ValueExpr::strip_positions),
            ValueKind::Constructor(c) => {
                strip_params(&mut c.params);
                if let Some(body) = &mut c.body {
                    body.iter_mut().for_each(AstNode::strip_positions);
                }
            }
            ValueKind::VarRef(v) => strip_var(v),
            ValueKind::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Var(v) = part {
                        strip_var(v);
                    }
                }
            }
            ValueKind::Scalar(_) | ValueKind::Unresolved(_) => {}
        }
    }
}

fn strip_var(var: &mut VarRef) {
    if let Some(default) = &mut var.default {
        default.strip_positions();
    }
}

/// What a dotted path such as `App.database.host` points at.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Object(&'a ObjectDef),
    Enum(&'a EnumDef),
    Value(&'a ValueExpr),
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct ConfigDocument {
    pub entries: Vec<AstNode>,
    pub source_path: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    /// Adds a top-level entry. A same-named entry is replaced where it stood,
    /// so the last definition wins while the first position is kept.
    pub fn insert(&mut self, node: AstNode) {
        insert_entry(&mut self.entries, node);
    }

    pub fn get(&self, name: &str) -> Option<&AstNode> {
        self.entries
            .iter()
            .find(|e| e.entry_name().as_deref() == Some(name))
    }

    pub fn object(&self, name: &str) -> Option<&ObjectDef> {
        self.get(name).and_then(AstNode::as_object)
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.get(name).and_then(AstNode::as_enum)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectDef> {
        self.entries.iter().filter_map(AstNode::as_object)
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDef> {
        self.entries.iter().filter_map(AstNode::as_enum)
    }

    pub fn includes(&self) -> impl Iterator<Item = &IncludeDirective> {
        self.entries.iter().filter_map(|e| match e {
            AstNode::Include(i) => Some(i),
            _ => None,
        })
    }

    /// Finds the node at a dotted path. Segments may carry an array index: `App.hosts[1]`.
    pub fn find(&self, path: &str) -> Option<NodeRef<'_>> {
        let mut segments = path.split('.');
        let (first, first_index) = split_index(segments.next()?);
        let mut current = match self.get(first)? {
            AstNode::Object(o) => NodeRef::Object(o),
            AstNode::Enum(e) => NodeRef::Enum(e),
            AstNode::Property(p) => NodeRef::Value(&p.value),
            AstNode::Include(_) => return None,
        };
        current = index_into(current, first_index)?;

        for segment in segments {
            let (name, index) = split_index(segment);
            let next = match current {
                NodeRef::Object(o) => lookup_member(&o.params, &o.body, name)?,
                NodeRef::Value(v) => match &v.kind {
                    ValueKind::Constructor(c) => lookup_member(&c.params, c.body(), name)?,
                    _ => return None,
                },
                NodeRef::Enum(_) => return None,
            };
            current = index_into(next, index)?;
        }
        Some(current)
    }

    /// Clears every span so documents from different sources compare structurally.
    pub fn strip_positions(&mut self) {
        for entry in &mut self.entries {
            entry.strip_positions();
        }
    }
}

pub(crate) fn insert_entry(entries: &mut Vec<AstNode>, node: AstNode) {
    let Some(name) = node.entry_name() else {
        entries.push(node);
        return;
    };
    if matches!(node, AstNode::Property(_)) {
        entries.push(node);
        return;
    }
    match entries
        .iter_mut()
        .find(|e| !matches!(e, AstNode::Property(_)) && e.entry_name().as_deref() == Some(name.as_str()))
    {
        Some(existing) => *existing = node,
        None => entries.push(node),
    }
}

fn split_index(segment: &str) -> (&str, Option<usize>) {
    if let Some(open) = segment.find('[') {
        if let Some(stripped) = segment[open + 1..].strip_suffix(']') {
            if let Ok(index) = stripped.parse() {
                return (&segment[..open], Some(index));
            }
        }
    }
    (segment, None)
}

fn index_into(node: NodeRef<'_>, index: Option<usize>) -> Option<NodeRef<'_>> {
    match index {
        None => Some(node),
        Some(i) => match node {
            NodeRef::Value(v) => v.as_array()?.get(i).map(NodeRef::Value),
            _ => None,
        },
    }
}

fn lookup_member<'a>(params: &'a [Param], body: &'a [AstNode], name: &str) -> Option<NodeRef<'a>> {
    let in_body = body.iter().rev().find_map(|node| match node {
        AstNode::Property(p) if p.name == name => Some(NodeRef::Value(&p.value)),
        // Nested objects are also addressable by the last segment of their
        // type name, which is how validation reports them.
        AstNode::Object(o) if o.name() == name || o.type_name.last() == name => {
            Some(NodeRef::Object(o))
        }
        AstNode::Enum(e) if e.name == name => Some(NodeRef::Enum(e)),
        _ => None,
    });
    in_body.or_else(|| {
        params
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.default.as_ref())
            .map(NodeRef::Value)
    })
}
