//! Three-way field walk: manifest schema against every supplier and reader
//! shape bound to one endpoint.
//!
//! The walk is depth-first in manifest declaration order. Per field and
//! participant the checks are first-hit-wins, in this order:
//!
//! 1. missing (suppliers only),
//! 2. type,
//! 3. enum values and casing,
//! 4. unit and format,
//! 5. strictness.
//!
//! Shared-type drift and tag mismatches are reported independently of that
//! order. Extracted fields the manifest does not declare are reported after
//! the declared ones, sorted by name.

use std::collections::BTreeSet;

use super::units::{canonical_format, canonical_unit, conversion, field_class, is_minor_currency, unit_class, ScaleOp};
use super::{fold, join_path, mentions};
use crate::binder::{Binding, PayloadKind};
use crate::extractor::evidence::{CaseTransform, EvidenceKind};
use crate::extractor::shape::{Confidence, ExtractedShape, ShapeKind};
use crate::extractor::Side;
use crate::manifest::{Contract, ContractManifest, Endpoint, FieldSchema, FieldType};
use crate::models::{Mismatch, MismatchKind, RuleId, Severity, SourceLocation};

/// Compare the request and success-response schemas of `endpoint` against
/// the production `bindings` of that endpoint.
pub fn compare_endpoint(
    manifest: &ContractManifest,
    contract: &Contract,
    endpoint: &Endpoint,
    bindings: &[&Binding],
) -> Vec<Mismatch> {
    let mut walk = Walk {
        manifest,
        contract_id: &contract.id,
        endpoint_id: endpoint.id(),
        payload: PayloadKind::Request,
        out: Vec::new(),
        drift_seen: BTreeSet::new(),
    };
    let payloads = [
        (PayloadKind::Request, endpoint.request.as_ref()),
        (PayloadKind::Response, endpoint.success_response()),
    ];
    for (payload, schema) in payloads {
        let Some(schema) = schema else {
            continue;
        };
        let nodes: Vec<Node> = bindings
            .iter()
            .filter_map(|b| {
                b.shape(payload).map(|shape| Node {
                    binding: b,
                    supplier: b.supplies(payload),
                    shape,
                })
            })
            .collect();
        if nodes.is_empty() {
            continue;
        }
        walk.payload = payload;
        walk.object(&schema.fields, &nodes, "");
    }
    walk.out
}

/// One participant's shape at the current position of the walk.
#[derive(Clone, Copy)]
struct Node<'a> {
    binding: &'a Binding,
    supplier: bool,
    shape: &'a ExtractedShape,
}

impl<'a> Node<'a> {
    fn at(self, shape: &'a ExtractedShape) -> Self {
        Node { shape, ..self }
    }

    fn describe(&self) -> String {
        self.binding.describe()
    }

    fn verb(&self) -> &'static str {
        if self.supplier {
            "sends"
        } else {
            "reads"
        }
    }

    fn location(&self) -> &'a SourceLocation {
        &self.shape.evidence.location
    }

    /// Names evidence may refer to this field by.
    fn names<'n>(&'n self, field: &'n FieldSchema) -> Vec<&'n str> {
        let mut names = vec![field.name.as_str(), self.shape.name.as_str()];
        names.extend(self.shape.declared_name.as_deref());
        names
    }
}

struct Walk<'a> {
    manifest: &'a ContractManifest,
    contract_id: &'a str,
    endpoint_id: String,
    payload: PayloadKind,
    out: Vec<Mismatch>,
    /// `(type, service, service)` pairs already reported as drifted.
    drift_seen: BTreeSet<(String, String, String)>,
}

impl<'a> Walk<'a> {
    /// Request fields belong to the request-shape rule, response fields to
    /// the response-shape rule.
    fn family(&self) -> RuleId {
        match self.payload {
            PayloadKind::Request => RuleId::RequestShape,
            PayloadKind::Response => RuleId::ResponseShape,
        }
    }

    fn finding(
        &self,
        kind: MismatchKind,
        rule_id: RuleId,
        severity: Severity,
        path: &str,
        location: &SourceLocation,
    ) -> Mismatch {
        Mismatch {
            contract_id: self.contract_id.to_string(),
            endpoint_id: self.endpoint_id.clone(),
            field_path: path.to_string(),
            kind,
            manifest_expectation: String::new(),
            observed: String::new(),
            rule_id,
            severity,
            location: location.clone(),
        }
    }

    fn object(&mut self, fields: &'a [FieldSchema], nodes: &[Node<'a>], prefix: &str) {
        self.drift(nodes, prefix);
        // An object without declared members is free-form.
        if fields.is_empty() {
            return;
        }

        let declared: BTreeSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        let mut matched: Vec<BTreeSet<&str>> = vec![BTreeSet::new(); nodes.len()];
        for field in fields {
            let path = join_path(prefix, &field.name);
            let mut found = Vec::new();
            for (i, node) in nodes.iter().enumerate() {
                match self.lookup(field, node, &declared, &path) {
                    Some(child) => {
                        matched[i].insert(child.name.as_str());
                        found.push(node.at(child));
                    }
                    None if node.supplier && field.required && node.shape.confidence == Confidence::Declared => {
                        let mut m = self.finding(MismatchKind::Missing, self.family(), Severity::Error, &path, node.location());
                        m.manifest_expectation = "required".to_string();
                        m.observed = format!("{} omits it from the {}", node.describe(), self.payload);
                        self.out.push(m);
                    }
                    None => {}
                }
            }
            self.field(field, &found, &path);
        }

        for (i, node) in nodes.iter().enumerate() {
            let mut extras: Vec<&ExtractedShape> = node
                .shape
                .children
                .iter()
                .filter(|c| !matched[i].contains(c.name.as_str()))
                .collect();
            extras.sort_by(|a, b| a.name.cmp(&b.name));
            for extra in extras {
                let severity = if !node.supplier && extra.validated {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                let path = join_path(prefix, &extra.name);
                let mut m = self.finding(MismatchKind::Extra, self.family(), severity, &path, &extra.evidence.location);
                m.manifest_expectation = "not declared".to_string();
                m.observed = if node.supplier {
                    format!("{} sends it", node.describe())
                } else if extra.validated {
                    format!("{} requires it", node.describe())
                } else {
                    format!("{} reads it", node.describe())
                };
                self.out.push(m);
            }
        }
    }

    /// The member of `node` carrying `field`: by exact wire name, else by
    /// folded name, which is a tag mismatch.
    fn lookup(
        &mut self,
        field: &FieldSchema,
        node: &Node<'a>,
        declared: &BTreeSet<&str>,
        path: &str,
    ) -> Option<&'a ExtractedShape> {
        let shape = node.shape;
        if let Some(child) = shape.child(&field.name) {
            return Some(child);
        }
        let want = fold(&field.name);
        let child = shape.children.iter().find(|c| {
            !declared.contains(c.name.as_str())
                && (fold(&c.name) == want || c.declared_name.as_deref().is_some_and(|d| fold(d) == want))
        })?;
        let mut m = self.finding(MismatchKind::Tag, RuleId::JsonTagMatch, Severity::Error, path, &child.evidence.location);
        m.manifest_expectation = format!("'{}'", field.name);
        m.observed = format!("{} {} '{}'", node.describe(), node.verb(), child.name);
        self.out.push(m);
        Some(child)
    }

    fn field(&mut self, field: &'a FieldSchema, nodes: &[Node<'a>], path: &str) {
        if nodes.is_empty() {
            return;
        }
        let mut flagged = vec![false; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            if let Some(m) = self.type_check(field, node, path).or_else(|| self.enum_check(field, node, path)) {
                self.out.push(m);
                flagged[i] = true;
            }
        }
        for (i, node) in nodes.iter().enumerate() {
            if flagged[i] {
                continue;
            }
            let found = if node.supplier {
                self.format_check(field, node, nodes, path)
            } else {
                self.unit_check(field, node, nodes, path)
                    .or_else(|| self.format_check(field, node, nodes, path))
            };
            if let Some(m) = found {
                self.out.push(m);
                flagged[i] = true;
            }
        }
        for (i, node) in nodes.iter().enumerate() {
            if flagged[i] {
                continue;
            }
            if let Some(m) = self.strictness_check(field, node, path) {
                self.out.push(m);
            }
        }

        if field.truncated {
            return;
        }
        match field.field_type {
            FieldType::Object => {
                let members: Vec<Node> = nodes
                    .iter()
                    .copied()
                    .filter(|n| n.shape.kind == ShapeKind::Object)
                    .collect();
                if !members.is_empty() {
                    self.object(&field.children, &members, path);
                }
            }
            FieldType::Array => {
                if let Some(items) = &field.items {
                    let elements: Vec<Node> = nodes
                        .iter()
                        .filter_map(|n| n.shape.items.as_deref().map(|s| n.at(s)))
                        .collect();
                    self.field(items, &elements, &join_path(path, "[]"));
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    fn type_check(&self, field: &FieldSchema, node: &Node<'a>, path: &str) -> Option<Mismatch> {
        if compatible(field, node.shape) {
            return None;
        }
        let mut m = self.finding(MismatchKind::Type, self.family(), Severity::Error, path, node.location());
        m.manifest_expectation = match &field.format {
            Some(format) => format!("{} ({format})", field.field_type),
            None => field.field_type.to_string(),
        };
        m.observed = format!("{} {} {}", node.describe(), node.verb(), node.shape.kind);
        Some(m)
    }

    fn enum_check(&self, field: &FieldSchema, node: &Node<'a>, path: &str) -> Option<Mismatch> {
        let binding = node.binding;
        let names = node.names(field);
        let declared: BTreeSet<&str> = node.shape.enum_values.iter().map(String::as_str).collect();
        let literals: BTreeSet<&str> = if node.supplier {
            BTreeSet::new()
        } else {
            binding
                .evidence
                .iter()
                .filter(|e| mentions(e, &names))
                .filter_map(|e| match &e.kind {
                    EvidenceKind::EnumLiteral(value) => Some(value.as_str()),
                    _ => None,
                })
                .collect()
        };
        if declared.is_empty() && literals.is_empty() {
            return None;
        }
        let transforms: Vec<CaseTransform> = binding
            .evidence
            .iter()
            .filter(|e| e.at_boundary() && mentions(e, &names))
            .filter_map(|e| match e.kind {
                EvidenceKind::Case(t) => Some(t),
                _ => None,
            })
            .collect();
        let forms = |value: &str| -> Vec<String> {
            std::iter::once(value.to_string())
                .chain(transforms.iter().map(|t| t.apply(value)))
                .collect()
        };

        // Suppliers must stay inside the manifest's values; readers must not
        // compare against values nobody sends.
        let checked = if node.supplier { &declared } else { &literals };
        if !field.enum_values.is_empty() {
            for &value in checked {
                if forms(value).iter().any(|v| field.enum_values.contains(v)) {
                    continue;
                }
                let mut m = match field.enum_values.iter().find(|d| d.eq_ignore_ascii_case(value)) {
                    Some(expected) => {
                        let mut m = self.finding(MismatchKind::Case, RuleId::StrictnessParity, Severity::Error, path, node.location());
                        m.manifest_expectation = format!("'{expected}'");
                        m
                    }
                    None => {
                        let mut m = self.finding(MismatchKind::Enum, RuleId::StrictnessParity, Severity::Error, path, node.location());
                        m.manifest_expectation = field.enum_values.join(", ");
                        m
                    }
                };
                m.observed = format!("{} {} '{value}'", node.describe(), node.verb());
                return Some(m);
            }
        }

        let casing = self.manifest.conventions.enum_case_for(&binding.key.service)?;
        let value = declared
            .union(&literals)
            .copied()
            .find(|&value| !forms(value).iter().any(|v| casing.matches(v)))?;
        let mut m = self.finding(MismatchKind::Case, RuleId::StrictnessParity, Severity::Error, path, node.location());
        m.manifest_expectation = format!("{casing} for {}", binding.key.service);
        m.observed = format!("{} {} '{value}'", node.describe(), node.verb());
        Some(m)
    }

    /// Reader-side unit check against every supplier (or, with none bound,
    /// against the manifest).
    fn unit_check(&self, field: &FieldSchema, node: &Node<'a>, nodes: &[Node<'a>], path: &str) -> Option<Mismatch> {
        let names = node.names(field);
        let reader_unit = node.shape.unit.as_deref().or(field.unit.as_deref())?;

        if is_minor_currency(reader_unit) {
            let evidence = &node.binding.evidence;
            let rendered = evidence
                .iter()
                .find(|e| {
                    matches!(e.kind, EvidenceKind::Render { decimals } if decimals > 0) && e.at_boundary() && mentions(e, &names)
                });
            let divided = evidence.iter().any(|e| {
                matches!(e.kind, EvidenceKind::Scale(c) if c.op == ScaleOp::Div && (c.factor - 100.0).abs() < 1e-9)
                    && e.at_boundary()
                    && mentions(e, &names)
            });
            if let Some(render) = rendered.filter(|_| !divided) {
                let mut m = self.finding(MismatchKind::Unit, RuleId::StrictnessParity, Severity::Error, path, &render.location);
                m.manifest_expectation = canonical_unit(reader_unit);
                m.observed = "cents rendered without /100 conversion".to_string();
                return Some(m);
            }
        }

        let class = field_class(field.unit.as_deref(), field.format.as_deref()).or_else(|| unit_class(reader_unit));
        let convention = class.and_then(|c| self.manifest.conventions.for_class(c));
        let mut suppliers: Vec<(Option<&str>, Option<Node>)> = nodes
            .iter()
            .filter(|n| n.supplier)
            .map(|n| (n.shape.unit.as_deref().or(convention).or(field.unit.as_deref()), Some(*n)))
            .collect();
        if suppliers.is_empty() {
            suppliers.push((convention.or(field.unit.as_deref()), None));
        }

        for (supplied, supplier) in suppliers {
            let Some(supplied) = supplied else {
                continue;
            };
            if canonical_unit(supplied) == canonical_unit(reader_unit) {
                continue;
            }
            let needed = conversion(supplied, reader_unit);
            let converted = needed.is_some_and(|needed| {
                std::iter::once(node.binding)
                    .chain(supplier.map(|s| s.binding))
                    .flat_map(|b| b.evidence.iter())
                    .any(|e| {
                        matches!(e.kind, EvidenceKind::Scale(c) if c.op == needed.op && (c.factor - needed.factor).abs() < 1e-6)
                            && e.at_boundary()
                            && mentions(e, &names)
                    })
            });
            if converted {
                continue;
            }
            let source = supplier.map_or_else(|| "the manifest".to_string(), |s| s.describe());
            let how = needed.map(|c| format!(" without {c} conversion")).unwrap_or_default();
            let mut m = self.finding(MismatchKind::Unit, RuleId::StrictnessParity, Severity::Error, path, node.location());
            m.manifest_expectation = field.unit.as_deref().map(canonical_unit).unwrap_or_default();
            m.observed = format!(
                "{source} sends {}, {} reads {}{how}",
                canonical_unit(supplied),
                node.describe(),
                canonical_unit(reader_unit)
            );
            return Some(m);
        }
        None
    }

    fn format_check(&self, field: &FieldSchema, node: &Node<'a>, nodes: &[Node<'a>], path: &str) -> Option<Mismatch> {
        let mine = node.shape.format.as_deref().filter(|f| !is_decimal_string(f))?;
        let canonical = canonical_format(mine).0;

        let mut m = self.finding(MismatchKind::Format, RuleId::StrictnessParity, Severity::Error, path, node.location());
        if let Some(declared) = &field.format {
            if canonical_format(declared).0 == canonical || is_decimal_string(declared) {
                return None;
            }
            m.manifest_expectation = declared.clone();
            m.observed = format!("{} {} {mine}", node.describe(), node.verb());
            return Some(m);
        }
        if node.supplier {
            return None;
        }
        let supplier = nodes.iter().filter(|n| n.supplier).find_map(|n| {
            let theirs = n.shape.format.as_deref().filter(|f| !is_decimal_string(f))?;
            (canonical_format(theirs).0 != canonical).then_some((n, theirs))
        })?;
        m.manifest_expectation = "one format on both sides".to_string();
        m.observed = format!(
            "{} sends {}, {} reads {mine}",
            supplier.0.describe(),
            supplier.1,
            node.describe()
        );
        Some(m)
    }

    /// Flags the data-loss direction only: readers stricter than the
    /// manifest, suppliers looser.
    fn strictness_check(&self, field: &FieldSchema, node: &Node<'a>, path: &str) -> Option<Mismatch> {
        let shape = node.shape;
        let declared = field.range.unwrap_or_default();
        let (expectation, observed) = if node.supplier {
            if let Some(range) = shape.range.filter(|r| field.range.is_some() && r.broader_than(&declared)) {
                (declared.to_string(), format!("{} may send values in {range}", node.describe()))
            } else if field.required && !shape.required {
                ("required".to_string(), format!("optional on {}", node.binding.key.side))
            } else {
                return None;
            }
        } else if let Some(range) = shape.range.filter(|r| r.narrower_than(&declared)) {
            (declared.to_string(), format!("{} accepts only {range}", node.describe()))
        } else if shape.validated && !field.required {
            let side = node.binding.key.side;
            let other = match side {
                Side::Client => Side::Server,
                Side::Server => Side::Client,
            };
            ("optional".to_string(), format!("required on {side} but optional on {other}"))
        } else if let Some(value) = field
            .enum_values
            .iter()
            .find(|v| !shape.enum_values.is_empty() && !shape.enum_values.iter().any(|s| s.eq_ignore_ascii_case(v)))
        {
            (
                field.enum_values.join(", "),
                format!("{} does not accept '{value}'", node.describe()),
            )
        } else if field.field_type == FieldType::Number && shape.kind == ShapeKind::Integer {
            ("number".to_string(), format!("{} reads it as an integer", node.describe()))
        } else {
            return None;
        };
        let mut m = self.finding(MismatchKind::Strictness, RuleId::StrictnessParity, Severity::Error, path, node.location());
        m.manifest_expectation = expectation;
        m.observed = observed;
        Some(m)
    }

    /// Same named type on two services with different members.
    fn drift(&mut self, nodes: &[Node<'a>], path: &str) {
        for (i, a) in nodes.iter().enumerate() {
            for b in &nodes[i + 1..] {
                let (sa, sb) = (&a.binding.key.service, &b.binding.key.service);
                if sa == sb {
                    continue;
                }
                let (Some(ta), Some(tb)) = (&a.shape.type_name, &b.shape.type_name) else {
                    continue;
                };
                if ta != tb
                    || a.shape.confidence != Confidence::Declared
                    || b.shape.confidence != Confidence::Declared
                {
                    continue;
                }
                let wa: BTreeSet<&str> = a.shape.children.iter().map(|c| c.name.as_str()).collect();
                let wb: BTreeSet<&str> = b.shape.children.iter().map(|c| c.name.as_str()).collect();
                if wa == wb {
                    continue;
                }
                let key = if sa < sb {
                    (ta.clone(), sa.clone(), sb.clone())
                } else {
                    (ta.clone(), sb.clone(), sa.clone())
                };
                if !self.drift_seen.insert(key) {
                    continue;
                }
                let mut parts = Vec::new();
                for (node, only) in [(a, wa.difference(&wb)), (b, wb.difference(&wa))] {
                    let only: Vec<&str> = only.copied().collect();
                    if !only.is_empty() {
                        parts.push(format!("only {} has {}", node.binding.key.service, only.join(", ")));
                    }
                }
                let field_path = if path.is_empty() { ta.clone() } else { path.to_string() };
                let mut m = self.finding(MismatchKind::Drift, RuleId::SharedTypeSync, Severity::Error, &field_path, b.location());
                m.manifest_expectation = format!("one definition of {ta}");
                m.observed = format!("{ta} differs between {sa} and {sb}: {}", parts.join("; "));
                self.out.push(m);
            }
        }
    }
}

fn is_decimal_string(format: &str) -> bool {
    matches!(canonical_format(format).0.as_str(), "decimal_string" | "decimal")
}

fn compatible(field: &FieldSchema, shape: &ExtractedShape) -> bool {
    let decimal = field.format.as_deref().is_some_and(is_decimal_string)
        || shape.format.as_deref().is_some_and(is_decimal_string);
    match (field.field_type, shape.kind) {
        (_, ShapeKind::Unknown) => true,
        (FieldType::String | FieldType::Enum, ShapeKind::String | ShapeKind::Enum) => true,
        (FieldType::String, ShapeKind::Integer | ShapeKind::Number | ShapeKind::Numeric) => decimal,
        (FieldType::Integer, ShapeKind::Integer | ShapeKind::Numeric) => true,
        (FieldType::Number, ShapeKind::Integer | ShapeKind::Number | ShapeKind::Numeric) => true,
        (FieldType::Integer | FieldType::Number, ShapeKind::String) => decimal,
        (FieldType::Boolean, ShapeKind::Boolean) => true,
        (FieldType::Object, ShapeKind::Object) => true,
        (FieldType::Array, ShapeKind::Array) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BindingKey;
    use crate::comparator::units::Conversion;
    use crate::extractor::evidence::{Evidence, EvidenceScope};
    use crate::extractor::shape::ShapeEvidence;
    use crate::models::Role;

    const MANIFEST: &str = r#"
services:
  - id: orders
    language: go
  - id: web
    language: typescript
contracts:
  - id: orders-api
    producer: orders
    consumers: [web]
    endpoints:
      - path: /orders/{id}
        method: GET
        status_codes: [200]
        response:
          fields:
            id: {type: string, required: true}
            amount: {type: integer, unit: cents, required: true}
            weight: {type: number, unit: grams, required: true}
            status: {type: enum, values: [pending, in_transit], required: true}
            note: {type: string}
conventions:
  enum_case:
    web: snake_case
"#;

    fn manifest() -> ContractManifest {
        crate::manifest::parse(MANIFEST, "contracts.yml", 8).unwrap()
    }

    fn loc(file: &str, line: usize) -> SourceLocation {
        SourceLocation::new(file, line, 1)
    }

    fn scalar(name: &str, kind: ShapeKind, file: &str, line: usize) -> ExtractedShape {
        ExtractedShape::new(
            name,
            kind,
            ShapeEvidence {
                location: loc(file, line),
                text: String::new(),
            },
        )
    }

    fn order(file: &str, children: Vec<ExtractedShape>) -> ExtractedShape {
        let mut root = scalar("", ShapeKind::Object, file, 1);
        root.type_name = Some("Order".to_string());
        root.children = children;
        root
    }

    /// A response shape matching the manifest.
    fn clean_children(file: &str) -> Vec<ExtractedShape> {
        let mut status = scalar("status", ShapeKind::Enum, file, 6);
        status.enum_values = vec!["pending".to_string(), "in_transit".to_string()];
        let mut amount = scalar("amount", ShapeKind::Integer, file, 4);
        amount.unit = Some("cents".to_string());
        let mut note = scalar("note", ShapeKind::String, file, 7);
        note.required = false;
        vec![
            scalar("id", ShapeKind::String, file, 3),
            amount,
            scalar("weight", ShapeKind::Number, file, 5),
            status,
            note,
        ]
    }

    fn binding(service: &str, side: Side, response: ExtractedShape) -> Binding {
        let role = if service == "orders" { Role::Producer } else { Role::Consumer };
        let location = response.evidence.location.clone();
        Binding {
            key: BindingKey {
                contract: "orders-api".to_string(),
                endpoint: "GET /orders/{id}".to_string(),
                service: service.to_string(),
                role,
                side,
                in_test: false,
            },
            request: None,
            response: Some(response),
            status_codes: Vec::new(),
            headers_read: Vec::new(),
            headers_written: Vec::new(),
            evidence: Vec::new(),
            location: location.clone(),
            locations: vec![location],
        }
    }

    fn evidence(kind: EvidenceKind, field: &str, file: &str, line: usize) -> Evidence {
        Evidence {
            kind,
            field: Some(field.to_string()),
            scope: EvidenceScope::Unit,
            location: loc(file, line),
            text: String::new(),
        }
    }

    fn run(bindings: &[Binding]) -> Vec<Mismatch> {
        let m = manifest();
        let contract = m.contract("orders-api").unwrap();
        let refs: Vec<&Binding> = bindings.iter().collect();
        compare_endpoint(&m, contract, &contract.endpoints[0], &refs)
    }

    #[test]
    fn test_consistent_sides_produce_nothing() {
        let server = binding("orders", Side::Server, order("orders/order.go", clean_children("orders/order.go")));
        let client = binding("web", Side::Client, order("web/api.ts", clean_children("web/api.ts")));
        let found = run(&[server, client]);
        assert!(found.is_empty(), "{found:#?}");
    }

    #[test]
    fn test_missing_required_field_from_supplier() {
        let mut children = clean_children("orders/order.go");
        children.retain(|c| c.name != "amount");
        let server = binding("orders", Side::Server, order("orders/order.go", children));
        let found = run(&[server]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MismatchKind::Missing);
        assert_eq!(found[0].rule_id, RuleId::ResponseShape);
        assert_eq!(found[0].field_path, "amount");
    }

    #[test]
    fn test_inferred_supplier_is_never_missing_fields() {
        let mut root = order("orders/order.go", Vec::new());
        root.confidence = Confidence::Inferred;
        assert!(run(&[binding("orders", Side::Server, root)]).is_empty());
    }

    #[test]
    fn test_renamed_field_is_a_tag_mismatch_not_missing() {
        let mut children = clean_children("orders/order.go");
        children[1].name = "Amount".to_string();
        let server = binding("orders", Side::Server, order("orders/order.go", children));
        let found = run(&[server]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule_id, RuleId::JsonTagMatch);
        assert_eq!(found[0].observed, "orders (server) sends 'Amount'");
    }

    #[test]
    fn test_grams_against_kilograms_without_conversion() {
        let mut server_children = clean_children("orders/order.go");
        server_children[2].unit = Some("grams".to_string());
        let mut client_children = clean_children("web/api.ts");
        client_children[2].unit = Some("kilograms".to_string());
        let server = binding("orders", Side::Server, order("orders/order.go", server_children));
        let mut client = binding("web", Side::Client, order("web/api.ts", client_children.clone()));

        let found = run(&[server.clone(), client.clone()]);
        assert_eq!(found.len(), 1, "{found:#?}");
        assert_eq!(found[0].kind, MismatchKind::Unit);
        assert_eq!(found[0].rule_id, RuleId::StrictnessParity);
        assert_eq!(found[0].field_path, "weight");
        assert!(found[0].observed.contains("without /1000 conversion"));

        client.evidence.push(evidence(
            EvidenceKind::Scale(Conversion {
                op: ScaleOp::Div,
                factor: 1000.0,
            }),
            "weight",
            "web/api.ts",
            20,
        ));
        assert!(run(&[server, client]).is_empty());
    }

    #[test]
    fn test_conversion_in_the_wrong_direction_still_flags() {
        let mut server_children = clean_children("orders/order.go");
        server_children[2].unit = Some("grams".to_string());
        let mut client_children = clean_children("web/api.ts");
        client_children[2].unit = Some("kilograms".to_string());
        let server = binding("orders", Side::Server, order("orders/order.go", server_children));
        let mut client = binding("web", Side::Client, order("web/api.ts", client_children));
        client.evidence.push(evidence(
            EvidenceKind::Scale(Conversion {
                op: ScaleOp::Mul,
                factor: 1000.0,
            }),
            "weight",
            "web/api.ts",
            20,
        ));

        let found = run(&[server, client]);
        assert_eq!(found.len(), 1, "{found:#?}");
        assert_eq!(found[0].kind, MismatchKind::Unit);
        assert!(found[0].observed.contains("without /1000 conversion"));
    }

    #[test]
    fn test_evidence_outside_the_boundary_unit_is_ignored() {
        let mut server_children = clean_children("orders/order.go");
        server_children[2].unit = Some("grams".to_string());
        let mut client_children = clean_children("web/api.ts");
        client_children[2].unit = Some("kilograms".to_string());
        client_children[3].enum_values = vec!["pending".to_string(), "IN_TRANSIT".to_string()];
        let server = binding("orders", Side::Server, order("orders/order.go", server_children));
        let mut client = binding("web", Side::Client, order("web/api.ts", client_children));
        for kind in [
            EvidenceKind::Scale(Conversion {
                op: ScaleOp::Div,
                factor: 1000.0,
            }),
            EvidenceKind::Case(CaseTransform::Lower),
        ] {
            let field = if matches!(kind, EvidenceKind::Case(_)) { "status" } else { "weight" };
            let mut elsewhere = evidence(kind, field, "web/api.ts", 40);
            elsewhere.scope = EvidenceScope::File;
            client.evidence.push(elsewhere);
        }

        let found = run(&[server, client]);
        let kinds: Vec<MismatchKind> = found.iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&MismatchKind::Unit), "{found:#?}");
        assert!(kinds.contains(&MismatchKind::Case), "{found:#?}");
    }

    #[test]
    fn test_cents_rendered_with_decimals() {
        let mut client = binding("web", Side::Client, order("web/api.ts", clean_children("web/api.ts")));
        client
            .evidence
            .push(evidence(EvidenceKind::Render { decimals: 2 }, "amount", "web/view.ts", 12));
        let found = run(&[client]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field_path, "amount");
        assert_eq!(found[0].observed, "cents rendered without /100 conversion");
        assert_eq!(found[0].location.line, 12);
    }

    #[test]
    fn test_enum_case_against_declared_casing() {
        let mut children = clean_children("web/api.ts");
        children[3].enum_values = vec!["PENDING".to_string(), "IN_TRANSIT".to_string()];
        let mut client = binding("web", Side::Client, order("web/api.ts", children));
        let found = run(&[client.clone()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MismatchKind::Case);
        assert_eq!(found[0].rule_id, RuleId::StrictnessParity);

        client
            .evidence
            .push(evidence(EvidenceKind::Case(CaseTransform::Lower), "status", "web/api.ts", 9));
        assert!(run(&[client]).is_empty());
    }

    #[test]
    fn test_supplier_enum_value_outside_manifest() {
        let mut children = clean_children("orders/order.go");
        children[3].enum_values.push("lost".to_string());
        let found = run(&[binding("orders", Side::Server, order("orders/order.go", children))]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MismatchKind::Enum);
        assert_eq!(found[0].observed, "orders (server) sends 'lost'");
    }

    #[test]
    fn test_reader_requiring_optional_field() {
        let mut children = clean_children("web/api.ts");
        children[4].validated = true;
        let found = run(&[binding("web", Side::Client, order("web/api.ts", children))]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MismatchKind::Strictness);
        assert_eq!(found[0].observed, "required on client but optional on server");
    }

    #[test]
    fn test_type_mismatch_wins_over_later_checks() {
        let mut children = clean_children("orders/order.go");
        children[1].kind = ShapeKind::String;
        children[1].unit = Some("dollars".to_string());
        let found = run(&[binding("orders", Side::Server, order("orders/order.go", children))]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MismatchKind::Type);
        assert_eq!(found[0].manifest_expectation, "integer");
    }

    #[test]
    fn test_extra_fields_sorted_and_graded() {
        let mut server_children = clean_children("orders/order.go");
        server_children.push(scalar("zone", ShapeKind::String, "orders/order.go", 9));
        server_children.push(scalar("internal", ShapeKind::String, "orders/order.go", 8));
        let mut client_children = clean_children("web/api.ts");
        let mut coupon = scalar("coupon", ShapeKind::String, "web/api.ts", 9);
        coupon.validated = true;
        client_children.push(coupon);

        let mut server_root = order("orders/order.go", server_children);
        server_root.type_name = None;
        let mut client_root = order("web/api.ts", client_children);
        client_root.type_name = None;
        let found = run(&[
            binding("orders", Side::Server, server_root),
            binding("web", Side::Client, client_root),
        ]);
        let extras: Vec<(&str, Severity)> = found
            .iter()
            .filter(|m| m.kind == MismatchKind::Extra)
            .map(|m| (m.field_path.as_str(), m.severity))
            .collect();
        assert_eq!(
            extras,
            vec![
                ("internal", Severity::Warning),
                ("zone", Severity::Warning),
                ("coupon", Severity::Error)
            ]
        );
    }

    #[test]
    fn test_shared_type_drift_is_reported_once() {
        let server = binding("orders", Side::Server, order("orders/order.go", clean_children("orders/order.go")));
        let mut client_children = clean_children("web/api.ts");
        client_children.retain(|c| c.name != "note");
        let client = binding("web", Side::Client, order("web/api.ts", client_children));
        let found = run(&[server, client]);
        assert_eq!(found.len(), 1, "{found:#?}");
        assert_eq!(found[0].rule_id, RuleId::SharedTypeSync);
        assert_eq!(found[0].field_path, "Order");
        assert!(found[0].observed.contains("only orders has note"));
    }
}
