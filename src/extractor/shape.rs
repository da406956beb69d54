//! Extracted shapes and the source type declarations they are resolved from.
//!
//! Adapters emit [`TypeDecl`]s and [`ShapeSource`]s per file. Named sources
//! stay unresolved until every file of a service has been extracted; the
//! binder then resolves them with a [`ShapeResolver`] over that service's
//! [`TypeTable`].

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::manifest::Range;
use crate::models::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    String,
    Integer,
    Number,
    /// A numeric type that does not distinguish integers (TS `number`).
    Numeric,
    Boolean,
    Object,
    Array,
    Enum,
    Unknown,
}

impl std::fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeKind::String => write!(f, "string"),
            ShapeKind::Integer => write!(f, "integer"),
            ShapeKind::Number => write!(f, "number"),
            ShapeKind::Numeric => write!(f, "numeric"),
            ShapeKind::Boolean => write!(f, "boolean"),
            ShapeKind::Object => write!(f, "object"),
            ShapeKind::Array => write!(f, "array"),
            ShapeKind::Enum => write!(f, "enum"),
            ShapeKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Every member is known from a declaration or literal.
    Declared,
    /// Members may be missing (spread, map type, unresolved or truncated type).
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeEvidence {
    pub location: SourceLocation,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedShape {
    /// Wire name of the field (`[]` for array items, empty for a payload root).
    pub name: String,
    /// Source identifier when serialization metadata renames the field.
    pub declared_name: Option<String>,
    /// Named source type this shape was resolved from.
    pub type_name: Option<String>,
    pub kind: ShapeKind,
    pub format: Option<String>,
    pub unit: Option<String>,
    #[serde(skip)]
    pub range: Option<Range>,
    pub enum_values: Vec<String>,
    /// Always present when this side writes the payload.
    pub required: bool,
    /// This side rejects payloads that lack the field.
    pub validated: bool,
    pub children: Vec<ExtractedShape>,
    pub items: Option<Box<ExtractedShape>>,
    pub evidence: ShapeEvidence,
    pub confidence: Confidence,
}

impl ExtractedShape {
    pub fn new(name: impl Into<String>, kind: ShapeKind, evidence: ShapeEvidence) -> Self {
        Self {
            name: name.into(),
            declared_name: None,
            type_name: None,
            kind,
            format: None,
            unit: None,
            range: None,
            enum_values: Vec::new(),
            required: true,
            validated: false,
            children: Vec::new(),
            items: None,
            evidence,
            confidence: Confidence::Declared,
        }
    }

    pub fn child(&self, name: &str) -> Option<&ExtractedShape> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Union `other` into `self`: members present in either are kept,
    /// enum values are combined, and declared metadata fills gaps.
    pub fn merge(&mut self, other: &ExtractedShape) {
        if self.kind == ShapeKind::Unknown && other.kind != ShapeKind::Unknown {
            self.kind = other.kind;
        }
        self.type_name = self.type_name.take().or_else(|| other.type_name.clone());
        self.declared_name = self.declared_name.take().or_else(|| other.declared_name.clone());
        self.format = self.format.take().or_else(|| other.format.clone());
        self.unit = self.unit.take().or_else(|| other.unit.clone());
        self.range = self.range.or(other.range);
        self.required |= other.required;
        self.validated |= other.validated;
        if self.confidence == Confidence::Inferred && other.confidence == Confidence::Declared {
            self.confidence = Confidence::Declared;
        }

        let values: BTreeSet<String> = self
            .enum_values
            .drain(..)
            .chain(other.enum_values.iter().cloned())
            .collect();
        self.enum_values = values.into_iter().collect();

        for theirs in &other.children {
            match self.children.iter_mut().find(|c| c.name == theirs.name) {
                Some(mine) => mine.merge(theirs),
                None => self.children.push(theirs.clone()),
            }
        }
        match (&mut self.items, &other.items) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.items = Some(theirs.clone()),
            _ => {}
        }
    }
}

/// A type expression as written in source.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Scalar(ShapeKind),
    /// A scalar with a known wire format (`time.Time`, `datetime`, `UUID`).
    Formatted(ShapeKind, String),
    Named(String, Vec<TypeExpr>),
    Array(Box<TypeExpr>),
    Optional(Box<TypeExpr>),
    /// Keyed collection with no fixed members.
    Map,
    /// String-literal union (`'a' | 'b'`, `Literal["a", "b"]`).
    Literals(Vec<String>),
    Unknown,
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named(name.into(), Vec::new())
    }
}

/// Field name marking an embedded or inherited type whose members are
/// spliced into the enclosing record (Go embedding, `extends`, base classes).
pub const EMBEDDED: &str = "...";

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub wire_name: Option<String>,
    pub ty: TypeExpr,
    pub required: bool,
    pub validated: bool,
    pub format: Option<String>,
    pub unit: Option<String>,
    pub range: Option<Range>,
    pub line: usize,
    pub column: usize,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: TypeExpr, line: usize, column: usize) -> Self {
        Self {
            name: name.into(),
            wire_name: None,
            ty,
            required: true,
            validated: false,
            format: None,
            unit: None,
            range: None,
            line,
            column,
        }
    }

    pub fn wire(&self) -> &str {
        self.wire_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDeclKind {
    Record(Vec<FieldDecl>),
    Alias(TypeExpr),
    Enum(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: String,
    pub generics: Vec<String>,
    pub kind: TypeDeclKind,
    pub location: SourceLocation,
}

/// How an observation describes a payload.
#[derive(Debug, Clone)]
pub enum ShapeSource {
    /// A declared type, resolved after extraction.
    Typed { ty: TypeExpr, evidence: ShapeEvidence },
    /// A literal built at the call site.
    Literal(ExtractedShape),
}

/// Type declarations visible to one service. The first declaration of a
/// name wins; callers insert in path order.
#[derive(Debug, Default)]
pub struct TypeTable {
    decls: HashMap<String, TypeDecl>,
}

impl TypeTable {
    pub fn insert(&mut self, decl: TypeDecl) {
        self.decls.entry(decl.name.clone()).or_insert(decl);
    }

    /// Look up a possibly qualified name (`models.Order`, `dto::Order`).
    pub fn get(&self, name: &str) -> Option<&TypeDecl> {
        let bare = name.rsplit(['.', ':']).next().unwrap_or(name);
        self.decls.get(bare)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

pub struct ShapeResolver<'a> {
    table: &'a TypeTable,
    max_depth: usize,
}

impl<'a> ShapeResolver<'a> {
    pub fn new(table: &'a TypeTable, max_depth: usize) -> Self {
        Self {
            table,
            max_depth: max_depth.max(1),
        }
    }

    pub fn resolve(&self, source: &ShapeSource) -> ExtractedShape {
        match source {
            ShapeSource::Literal(shape) => shape.clone(),
            ShapeSource::Typed { ty, evidence } => {
                let mut visiting = Vec::new();
                self.walk(ty, "", evidence, &HashMap::new(), &mut visiting, 0, false)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        ty: &TypeExpr,
        name: &str,
        evidence: &ShapeEvidence,
        bindings: &HashMap<String, TypeExpr>,
        visiting: &mut Vec<String>,
        depth: usize,
        instantiated: bool,
    ) -> ExtractedShape {
        let mut shape = ExtractedShape::new(name, ShapeKind::Unknown, evidence.clone());
        match ty {
            TypeExpr::Scalar(kind) => shape.kind = *kind,
            TypeExpr::Formatted(kind, format) => {
                shape.kind = *kind;
                shape.format = Some(format.clone());
            }
            TypeExpr::Literals(values) => {
                shape.kind = ShapeKind::Enum;
                shape.enum_values = values.clone();
            }
            TypeExpr::Map | TypeExpr::Unknown => shape.confidence = Confidence::Inferred,
            TypeExpr::Array(inner) => {
                shape.kind = ShapeKind::Array;
                if depth >= self.max_depth {
                    shape.confidence = Confidence::Inferred;
                } else {
                    let item = self.walk(inner, "[]", evidence, bindings, visiting, depth + 1, instantiated);
                    shape.items = Some(Box::new(item));
                }
            }
            TypeExpr::Optional(inner) => {
                shape = self.walk(inner, name, evidence, bindings, visiting, depth, instantiated);
                shape.required = false;
                shape.validated = false;
            }
            TypeExpr::Named(type_name, args) => {
                if let Some(bound) = bindings.get(type_name) {
                    return self.walk(bound, name, evidence, &HashMap::new(), visiting, depth, true);
                }
                return self.walk_named(type_name, args, name, evidence, bindings, visiting, depth, instantiated);
            }
        }
        shape
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_named(
        &self,
        type_name: &str,
        args: &[TypeExpr],
        name: &str,
        evidence: &ShapeEvidence,
        bindings: &HashMap<String, TypeExpr>,
        visiting: &mut Vec<String>,
        depth: usize,
        instantiated: bool,
    ) -> ExtractedShape {
        let mut shape = ExtractedShape::new(name, ShapeKind::Unknown, evidence.clone());
        shape.type_name = Some(type_name.to_string());
        let Some(decl) = self.table.get(type_name) else {
            shape.confidence = Confidence::Inferred;
            return shape;
        };
        shape.type_name = Some(decl.name.clone());

        match &decl.kind {
            TypeDeclKind::Enum(values) => {
                shape.kind = ShapeKind::Enum;
                shape.enum_values = values.clone();
            }
            TypeDeclKind::Alias(target) => {
                if visiting.contains(&decl.name) {
                    shape.confidence = Confidence::Inferred;
                    return shape;
                }
                visiting.push(decl.name.clone());
                let mut inner = self.walk(target, name, evidence, bindings, visiting, depth, instantiated);
                visiting.pop();
                if inner.type_name.is_none() {
                    inner.type_name = Some(decl.name.clone());
                }
                return inner;
            }
            TypeDeclKind::Record(fields) => {
                shape.kind = ShapeKind::Object;
                if visiting.contains(&decl.name) || depth >= self.max_depth {
                    shape.confidence = Confidence::Inferred;
                    return shape;
                }
                // One level of generic instantiation; deeper parameters stay unknown.
                let frame: HashMap<String, TypeExpr> = if instantiated || args.is_empty() {
                    HashMap::new()
                } else {
                    decl.generics
                        .iter()
                        .cloned()
                        .zip(args.iter().map(|a| substitute(a, bindings)))
                        .collect()
                };
                let nested_instantiated = instantiated || !args.is_empty();

                visiting.push(decl.name.clone());
                for field in fields {
                    if field.name == EMBEDDED {
                        let base = self.walk(&field.ty, "", evidence, &frame, visiting, depth, nested_instantiated);
                        if base.kind != ShapeKind::Object || base.confidence == Confidence::Inferred {
                            shape.confidence = Confidence::Inferred;
                        }
                        for child in base.children {
                            if shape.child(&child.name).is_none() {
                                shape.children.push(child);
                            }
                        }
                        continue;
                    }
                    let field_evidence = ShapeEvidence {
                        location: SourceLocation::new(decl.location.file.clone(), field.line, field.column),
                        text: field.name.clone(),
                    };
                    let mut child = if decl.generics.contains(&field_type_root(&field.ty)) && frame.is_empty() {
                        let mut unknown = ExtractedShape::new(field.wire(), ShapeKind::Unknown, field_evidence.clone());
                        unknown.confidence = Confidence::Inferred;
                        unknown
                    } else {
                        self.walk(
                            &field.ty,
                            field.wire(),
                            &field_evidence,
                            &frame,
                            visiting,
                            depth + 1,
                            nested_instantiated,
                        )
                    };
                    child.name = field.wire().to_string();
                    child.evidence = field_evidence;
                    if field.wire() != field.name {
                        child.declared_name = Some(field.name.clone());
                    }
                    child.required = field.required && child.required;
                    child.validated = field.validated;
                    child.format = field.format.clone().or(child.format);
                    child.unit = field.unit.clone().or(child.unit);
                    child.range = field.range.or(child.range);
                    shape.children.push(child);
                }
                visiting.pop();
            }
        }
        shape
    }
}

fn field_type_root(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::Named(name, args) if args.is_empty() => name.clone(),
        TypeExpr::Optional(inner) => field_type_root(inner),
        _ => String::new(),
    }
}

fn substitute(ty: &TypeExpr, bindings: &HashMap<String, TypeExpr>) -> TypeExpr {
    match ty {
        TypeExpr::Named(name, args) if args.is_empty() => {
            bindings.get(name).cloned().unwrap_or_else(|| ty.clone())
        }
        TypeExpr::Named(name, args) => {
            TypeExpr::Named(name.clone(), args.iter().map(|a| substitute(a, bindings)).collect())
        }
        TypeExpr::Array(inner) => TypeExpr::Array(Box::new(substitute(inner, bindings))),
        TypeExpr::Optional(inner) => TypeExpr::Optional(Box::new(substitute(inner, bindings))),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: usize) -> SourceLocation {
        SourceLocation::new("types.ts", line, 1)
    }

    fn record(name: &str, generics: &[&str], fields: Vec<FieldDecl>) -> TypeDecl {
        TypeDecl {
            name: name.to_string(),
            generics: generics.iter().map(|g| g.to_string()).collect(),
            kind: TypeDeclKind::Record(fields),
            location: loc(1),
        }
    }

    fn typed(ty: TypeExpr) -> ShapeSource {
        ShapeSource::Typed {
            ty,
            evidence: ShapeEvidence {
                location: loc(10),
                text: "res.json()".to_string(),
            },
        }
    }

    #[test]
    fn test_resolves_record_with_wire_names_and_metadata() {
        let mut id = FieldDecl::new("UserID", TypeExpr::Scalar(ShapeKind::String), 2, 3);
        id.wire_name = Some("userId".to_string());
        let mut weight = FieldDecl::new("weight", TypeExpr::Scalar(ShapeKind::Integer), 3, 3);
        weight.unit = Some("grams".to_string());
        let mut table = TypeTable::default();
        table.insert(record("Parcel", &[], vec![id, weight]));

        let shape = ShapeResolver::new(&table, 8).resolve(&typed(TypeExpr::named("dto.Parcel")));
        assert_eq!(shape.kind, ShapeKind::Object);
        assert_eq!(shape.type_name.as_deref(), Some("Parcel"));
        let id = shape.child("userId").unwrap();
        assert_eq!(id.declared_name.as_deref(), Some("UserID"));
        assert_eq!(id.evidence.location.line, 2);
        assert_eq!(shape.child("weight").unwrap().unit.as_deref(), Some("grams"));
    }

    #[test]
    fn test_recursive_type_is_truncated_as_inferred() {
        let mut table = TypeTable::default();
        table.insert(record(
            "Node",
            &[],
            vec![FieldDecl::new(
                "parent",
                TypeExpr::Optional(Box::new(TypeExpr::named("Node"))),
                2,
                1,
            )],
        ));
        let shape = ShapeResolver::new(&table, 8).resolve(&typed(TypeExpr::named("Node")));
        let parent = shape.child("parent").unwrap();
        assert_eq!(parent.kind, ShapeKind::Object);
        assert_eq!(parent.confidence, Confidence::Inferred);
        assert!(!parent.required);
    }

    #[test]
    fn test_one_level_of_generic_instantiation() {
        let mut table = TypeTable::default();
        table.insert(record(
            "Page",
            &["T"],
            vec![
                FieldDecl::new("items", TypeExpr::Array(Box::new(TypeExpr::named("T"))), 2, 1),
                FieldDecl::new("total", TypeExpr::Scalar(ShapeKind::Numeric), 3, 1),
            ],
        ));
        table.insert(record(
            "Order",
            &[],
            vec![FieldDecl::new("id", TypeExpr::Scalar(ShapeKind::String), 5, 1)],
        ));
        let ty = TypeExpr::Named("Page".to_string(), vec![TypeExpr::named("Order")]);
        let shape = ShapeResolver::new(&table, 8).resolve(&typed(ty));
        let items = shape.child("items").unwrap().items.as_ref().unwrap();
        assert_eq!(items.type_name.as_deref(), Some("Order"));
        assert!(items.child("id").is_some());
    }

    #[test]
    fn test_embedded_members_are_spliced() {
        let mut table = TypeTable::default();
        table.insert(record(
            "Base",
            &[],
            vec![FieldDecl::new("id", TypeExpr::Scalar(ShapeKind::String), 2, 1)],
        ));
        table.insert(record(
            "Order",
            &[],
            vec![
                FieldDecl::new(EMBEDDED, TypeExpr::named("Base"), 5, 1),
                FieldDecl::new("total", TypeExpr::Scalar(ShapeKind::Integer), 6, 1),
                FieldDecl::new(EMBEDDED, TypeExpr::named("Elsewhere"), 7, 1),
            ],
        ));
        let shape = ShapeResolver::new(&table, 8).resolve(&typed(TypeExpr::named("Order")));
        let names: Vec<&str> = shape.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "total"]);
        assert_eq!(shape.confidence, Confidence::Inferred);
    }

    #[test]
    fn test_merge_unions_members_and_enum_values() {
        let ev = ShapeEvidence {
            location: loc(1),
            text: String::new(),
        };
        let mut a = ExtractedShape::new("", ShapeKind::Object, ev.clone());
        a.children.push(ExtractedShape::new("id", ShapeKind::String, ev.clone()));
        let mut status = ExtractedShape::new("status", ShapeKind::Enum, ev.clone());
        status.enum_values = vec!["b".to_string()];
        a.children.push(status.clone());

        let mut b = ExtractedShape::new("", ShapeKind::Object, ev.clone());
        status.enum_values = vec!["a".to_string()];
        b.children.push(status);
        b.children.push(ExtractedShape::new("note", ShapeKind::String, ev));

        a.merge(&b);
        let names: Vec<&str> = a.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "status", "note"]);
        assert_eq!(a.child("status").unwrap().enum_values, vec!["a", "b"]);
    }
}
