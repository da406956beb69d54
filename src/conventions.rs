//! Cross-cutting convention checks, run once all bindings are known.
//!
//! Besides the [`Casing`] vocabulary used by the manifest's `enum_case`
//! block, this module aggregates per-service and per-manifest statistics:
//!
//! - enum casing consistency for services without a declared casing,
//! - unit consistency for quantity classes without a declared convention,
//! - completeness of webhook signature verification.

use std::collections::{BTreeMap, BTreeSet};

use crate::binder::{Binding, BindingSet, PayloadKind};
use crate::comparator::join_path;
use crate::comparator::units::{canonical_format, canonical_unit, field_class, QuantityClass};
use crate::extractor::evidence::{same_header, EvidenceKind};
use crate::extractor::shape::ExtractedShape;
use crate::extractor::Side;
use crate::manifest::{ContractManifest, FieldSchema};
use crate::models::{Mismatch, MismatchKind, Role, RuleId, Severity, SourceLocation};

// ---------------------------------------------------------------------------
// Casing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Casing {
    Snake,
    ScreamingSnake,
    Camel,
    Pascal,
    Kebab,
    Lower,
    Upper,
}

impl Casing {
    /// Casings considered when inferring a service's dominant style, in
    /// tie-break order.
    const INFERRED: [Casing; 5] = [
        Casing::Snake,
        Casing::ScreamingSnake,
        Casing::Camel,
        Casing::Pascal,
        Casing::Kebab,
    ];

    /// Parse a casing name as written in the manifest (`snake_case`,
    /// `SCREAMING_SNAKE_CASE`, `camelCase`, `kebab-case`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "snake" | "snake_case" => Some(Casing::Snake),
            "screaming_snake" | "screaming_snake_case" | "upper_snake" | "upper_snake_case" | "constant"
            | "constant_case" => Some(Casing::ScreamingSnake),
            "camel" | "camelcase" | "camel_case" | "lower_camel" | "lower_camel_case" => Some(Casing::Camel),
            "pascal" | "pascalcase" | "pascal_case" | "upper_camel" | "upper_camel_case" => Some(Casing::Pascal),
            "kebab" | "kebab_case" => Some(Casing::Kebab),
            "lower" | "lowercase" | "lower_case" => Some(Casing::Lower),
            "upper" | "uppercase" | "upper_case" => Some(Casing::Upper),
            _ => None,
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        let lower_word = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        let upper_word = |c: char| c.is_ascii_uppercase() || c.is_ascii_digit();
        match self {
            Casing::Snake => separated(value, '_', lower_word),
            Casing::ScreamingSnake => separated(value, '_', upper_word),
            Casing::Kebab => separated(value, '-', lower_word),
            Casing::Camel => {
                value.starts_with(|c: char| c.is_ascii_lowercase()) && value.chars().all(|c| c.is_ascii_alphanumeric())
            }
            Casing::Pascal => {
                value.starts_with(|c: char| c.is_ascii_uppercase()) && value.chars().all(|c| c.is_ascii_alphanumeric())
            }
            Casing::Lower => !value.is_empty() && value == value.to_lowercase(),
            Casing::Upper => !value.is_empty() && value == value.to_uppercase(),
        }
    }
}

fn separated(value: &str, separator: char, word: impl Fn(char) -> bool) -> bool {
    !value.is_empty() && value.split(separator).all(|w| !w.is_empty() && w.chars().all(&word))
}

impl std::fmt::Display for Casing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Casing::Snake => "snake_case",
            Casing::ScreamingSnake => "SCREAMING_SNAKE_CASE",
            Casing::Camel => "camelCase",
            Casing::Pascal => "PascalCase",
            Casing::Kebab => "kebab-case",
            Casing::Lower => "lowercase",
            Casing::Upper => "UPPERCASE",
        };
        f.write_str(name)
    }
}

/// The casing most of `values` follow, if it covers a strict majority.
pub fn dominant_casing<'a>(values: impl IntoIterator<Item = &'a str> + Clone) -> Option<Casing> {
    let total = values.clone().into_iter().count();
    let mut best: Option<(Casing, usize)> = None;
    for casing in Casing::INFERRED {
        let hits = values.clone().into_iter().filter(|v| casing.matches(v)).count();
        if best.map_or(true, |(_, n)| hits > n) {
            best = Some((casing, hits));
        }
    }
    best.filter(|(_, hits)| *hits > total - hits).map(|(casing, _)| casing)
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub fn analyze(manifest: &ContractManifest, bindings: &BindingSet) -> Vec<Mismatch> {
    let mut out = enum_casing(manifest, bindings);
    out.extend(unit_consistency(manifest));
    out.extend(verification_completeness(manifest, bindings));
    out
}

/// One enum value a service writes to the wire.
struct Supplied<'a> {
    value: &'a str,
    binding: &'a Binding,
    field: String,
    location: &'a SourceLocation,
}

fn enum_casing(manifest: &ContractManifest, bindings: &BindingSet) -> Vec<Mismatch> {
    let mut by_service: BTreeMap<&str, Vec<Supplied>> = BTreeMap::new();
    for binding in bindings.bindings.iter().filter(|b| !b.key.in_test) {
        if manifest.conventions.enum_case_for(&binding.key.service).is_some() {
            continue;
        }
        for payload in [PayloadKind::Request, PayloadKind::Response] {
            if !binding.supplies(payload) {
                continue;
            }
            if let Some(shape) = binding.shape(payload) {
                let values = by_service.entry(binding.key.service.as_str()).or_default();
                collect_enum_values(shape, "", binding, values);
            }
        }
    }

    let mut out = Vec::new();
    for (service, supplied) in by_service {
        let distinct: BTreeSet<&str> = supplied.iter().map(|s| s.value).collect();
        let Some(casing) = dominant_casing(distinct.iter().copied()) else {
            continue;
        };
        let mut reported = BTreeSet::new();
        for s in &supplied {
            if casing.matches(s.value) || !reported.insert(s.value) {
                continue;
            }
            out.push(Mismatch {
                contract_id: s.binding.key.contract.clone(),
                endpoint_id: s.binding.key.endpoint.clone(),
                field_path: s.field.clone(),
                kind: MismatchKind::Case,
                manifest_expectation: format!("{casing} (dominant in {service})"),
                observed: format!("'{}' sent by {}", s.value, s.binding.describe()),
                rule_id: RuleId::StrictnessParity,
                severity: Severity::Warning,
                location: s.location.clone(),
            });
        }
    }
    out
}

fn collect_enum_values<'a>(shape: &'a ExtractedShape, path: &str, binding: &'a Binding, out: &mut Vec<Supplied<'a>>) {
    for value in &shape.enum_values {
        out.push(Supplied {
            value,
            binding,
            field: path.to_string(),
            location: &shape.evidence.location,
        });
    }
    for child in &shape.children {
        collect_enum_values(child, &join_path(path, &child.name), binding, out);
    }
    if let Some(items) = &shape.items {
        collect_enum_values(items, &join_path(path, "[]"), binding, out);
    }
}

/// A manifest field carrying a unit or a classed format.
struct UnitUse {
    unit: String,
    payload: PayloadKind,
    contract: String,
    endpoint: String,
    endpoint_path: String,
    field: String,
    path: String,
}

fn unit_consistency(manifest: &ContractManifest) -> Vec<Mismatch> {
    let mut by_class: BTreeMap<QuantityClass, Vec<UnitUse>> = BTreeMap::new();
    for contract in &manifest.contracts {
        for endpoint in &contract.endpoints {
            let payloads = endpoint
                .request
                .iter()
                .map(|p| (PayloadKind::Request, p))
                .chain(endpoint.responses.values().map(|p| (PayloadKind::Response, p)));
            for (kind, payload) in payloads {
                for field in &payload.fields {
                    collect_units(field, "", &mut |field, path| {
                        let Some(class) = field_class(field.unit.as_deref(), field.format.as_deref()) else {
                            return;
                        };
                        if manifest.conventions.for_class(class).is_some() {
                            return;
                        }
                        let unit = match (&field.unit, &field.format) {
                            (Some(unit), _) => canonical_unit(unit),
                            (None, Some(format)) => canonical_format(format).0,
                            (None, None) => return,
                        };
                        by_class.entry(class).or_default().push(UnitUse {
                            unit,
                            payload: kind,
                            contract: contract.id.clone(),
                            endpoint: endpoint.id(),
                            endpoint_path: endpoint.path.clone(),
                            field: field.name.clone(),
                            path: path.to_string(),
                        });
                    });
                }
            }
        }
    }

    let mut out = Vec::new();
    for (class, uses) in by_class {
        // A body shared by several status codes is one use, not one per code.
        let mut distinct = BTreeSet::new();
        let uses: Vec<&UnitUse> = uses
            .iter()
            .filter(|u| distinct.insert((u.contract.as_str(), u.endpoint.as_str(), u.payload, u.path.as_str())))
            .collect();
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for u in &uses {
            *counts.entry(u.unit.as_str()).or_default() += 1;
        }
        if counts.len() < 2 {
            continue;
        }
        // Highest count wins; ties go to the alphabetically first unit.
        let Some(dominant) = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(unit, _)| unit.to_string())
        else {
            continue;
        };
        let mut seen = BTreeSet::new();
        for u in uses.iter().filter(|u| u.unit != dominant) {
            if !seen.insert((u.contract.as_str(), u.endpoint.as_str(), u.path.as_str())) {
                continue;
            }
            out.push(Mismatch {
                contract_id: u.contract.clone(),
                endpoint_id: u.endpoint.clone(),
                field_path: u.path.clone(),
                kind: MismatchKind::Unit,
                manifest_expectation: format!("{dominant} (most {class} fields)"),
                observed: format!("'{}' declared in {} with no {class} convention", u.unit, u.contract),
                rule_id: RuleId::StrictnessParity,
                severity: Severity::Warning,
                location: manifest.locate(&[&u.contract, &u.endpoint_path, &u.field]),
            });
        }
    }
    out
}

fn collect_units(field: &FieldSchema, parent: &str, visit: &mut impl FnMut(&FieldSchema, &str)) {
    let path = join_path(parent, &field.name);
    visit(field, &path);
    for child in &field.children {
        collect_units(child, &path, visit);
    }
    if let Some(items) = &field.items {
        if !items.children.is_empty() {
            let items_path = join_path(&path, "[]");
            for child in &items.children {
                collect_units(child, &items_path, visit);
            }
        }
    }
}

/// The consumer's inbound handler checks a signature but skips part of the
/// declared scheme.
fn verification_completeness(manifest: &ContractManifest, bindings: &BindingSet) -> Vec<Mismatch> {
    let mut out = Vec::new();
    for contract in &manifest.contracts {
        let Some(verification) = &contract.verification else {
            continue;
        };
        let handlers = bindings.for_contract(&contract.id).filter(|b| {
            !b.key.in_test && b.key.role == Role::Consumer && b.key.side == Side::Server
        });
        for handler in handlers {
            let verifies = handler.evidence.iter().any(|e| e.kind == EvidenceKind::Signature);
            if !verifies {
                continue;
            }
            let reads = |header: &str| handler.headers_read.iter().any(|h| same_header(h, header));
            let mut gaps = Vec::new();
            if !reads(&verification.header) {
                gaps.push((
                    verification.header.clone(),
                    format!("never reads the signature header {}", verification.header),
                ));
            }
            if let Some(timestamp) = &verification.timestamp_header {
                if !reads(timestamp) {
                    gaps.push((timestamp.clone(), format!("never reads the timestamp header {timestamp}")));
                }
            }
            if verification.tolerance_seconds.is_some()
                && !handler.evidence.iter().any(|e| e.kind == EvidenceKind::TimestampCheck)
            {
                gaps.push((
                    "tolerance_seconds".to_string(),
                    "never checks the timestamp against a tolerance window".to_string(),
                ));
            }
            for (field, gap) in gaps {
                out.push(Mismatch {
                    contract_id: contract.id.clone(),
                    endpoint_id: handler.key.endpoint.clone(),
                    field_path: field,
                    kind: MismatchKind::Conformance,
                    manifest_expectation: format!("{} verification", verification.method),
                    observed: format!("{} verifies a signature but {gap}", handler.describe()),
                    rule_id: RuleId::ManifestConformance,
                    severity: Severity::Warning,
                    location: handler.location.clone(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BindingKey;
    use crate::extractor::evidence::{Evidence, EvidenceScope};
    use crate::extractor::shape::{ShapeEvidence, ShapeKind};

    #[test]
    fn test_parse_accepts_common_spellings() {
        assert_eq!(Casing::parse("snake_case"), Some(Casing::Snake));
        assert_eq!(Casing::parse("SCREAMING_SNAKE_CASE"), Some(Casing::ScreamingSnake));
        assert_eq!(Casing::parse("camelCase"), Some(Casing::Camel));
        assert_eq!(Casing::parse("kebab-case"), Some(Casing::Kebab));
        assert_eq!(Casing::parse("Pascal Case"), Some(Casing::Pascal));
        assert_eq!(Casing::parse("sPoNgEcAsE"), None);
    }

    #[test]
    fn test_matches() {
        assert!(Casing::Snake.matches("in_transit"));
        assert!(!Casing::Snake.matches("IN_TRANSIT"));
        assert!(!Casing::Snake.matches("in__transit"));
        assert!(Casing::ScreamingSnake.matches("IN_TRANSIT"));
        assert!(Casing::Camel.matches("inTransit"));
        assert!(Casing::Pascal.matches("InTransit"));
        assert!(Casing::Kebab.matches("in-transit"));
        assert!(!Casing::Kebab.matches("in_transit"));
    }

    #[test]
    fn test_dominant_casing_needs_a_majority() {
        let values = ["pending", "in_transit", "delivered", "ReturnedToSender"];
        assert_eq!(dominant_casing(values.iter().copied()), Some(Casing::Snake));

        let split = ["in_transit", "InTransit"];
        assert_eq!(dominant_casing(split.iter().copied()), None);
    }

    const MANIFEST: &str = r#"
services:
  - id: shipping
    language: go
  - id: shop
    language: python
contracts:
  - id: shipping-api
    producer: shipping
    consumers: [shop]
    endpoints:
      - path: /parcels
        method: POST
        request:
          fields:
            weight: {type: integer, unit: grams}
        response:
          fields:
            billed_weight: {type: number, unit: kilograms}
  - id: labels-api
    producer: shipping
    consumers: [shop]
    endpoints:
      - path: /labels
        method: POST
        request:
          fields:
            weight: {type: integer, unit: grams}
"#;

    #[test]
    fn test_minority_unit_without_convention_is_flagged_in_manifest() {
        let manifest = crate::manifest::parse(MANIFEST, "contracts.yml", 8).unwrap();
        let found = unit_consistency(&manifest);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field_path, "billed_weight");
        assert_eq!(found[0].severity, Severity::Warning);
        assert_eq!(found[0].location.file, "contracts.yml");
        assert_eq!(found[0].location.line, 19);
    }

    #[test]
    fn test_declared_convention_disables_unit_consistency() {
        let text = format!("{MANIFEST}conventions:\n  weight: grams\n");
        let manifest = crate::manifest::parse(&text, "contracts.yml", 8).unwrap();
        assert!(unit_consistency(&manifest).is_empty());
    }
    #[test]
    fn test_shared_response_body_counts_once() {
        let text = r#"
services:
  - id: shipping
    language: go
contracts:
  - id: shipping-api
    producer: shipping
    endpoints:
      - path: /parcels
        method: POST
        status_codes: [200, 201, 202]
        response:
          fields:
            billed_weight: {type: number, unit: kilograms}
      - path: /labels
        method: POST
        request:
          fields:
            weight: {type: integer, unit: grams}
      - path: /returns
        method: POST
        request:
          fields:
            weight: {type: integer, unit: grams}
"#;
        let manifest = crate::manifest::parse(text, "contracts.yml", 8).unwrap();
        let found = unit_consistency(&manifest);
        assert_eq!(found.len(), 1, "{found:#?}");
        assert_eq!(found[0].field_path, "billed_weight");
        assert!(found[0].manifest_expectation.starts_with("grams"));
    }

    const WEBHOOK: &str = r#"
services:
  - {id: billing, language: java}
  - {id: shop, language: python}
contracts:
  - id: payment-webhook
    producer: billing
    consumers: [shop]
    direction: inbound
    verification:
      method: hmac-sha256
      header: X-Signature
      timestamp_header: X-Timestamp
      tolerance_seconds: 300
    endpoints:
      - path: /webhooks/payment
        method: POST
        request:
          fields:
            status: {type: enum, values: [pending, shipped, in_transit]}
"#;

    fn binding(service: &str, role: Role, side: Side, line: usize) -> Binding {
        let location = SourceLocation::new(&format!("{service}/handlers.py"), line, 1);
        Binding {
            key: BindingKey {
                contract: "payment-webhook".to_string(),
                endpoint: "POST /webhooks/payment".to_string(),
                service: service.to_string(),
                role,
                side,
                in_test: false,
            },
            request: None,
            response: None,
            status_codes: Vec::new(),
            headers_read: Vec::new(),
            headers_written: Vec::new(),
            evidence: Vec::new(),
            location: location.clone(),
            locations: vec![location],
        }
    }

    fn signature_check(line: usize) -> Evidence {
        Evidence {
            kind: EvidenceKind::Signature,
            field: None,
            scope: EvidenceScope::Unit,
            location: SourceLocation::new("shop/handlers.py", line, 5),
            text: "hmac.compare_digest(expected, received)".to_string(),
        }
    }

    #[test]
    fn test_partial_signature_verification_warns_per_gap() {
        let manifest = crate::manifest::parse(WEBHOOK, "contracts.yml", 8).unwrap();
        let mut handler = binding("shop", Role::Consumer, Side::Server, 12);
        handler.evidence.push(signature_check(15));
        let set = BindingSet {
            bindings: vec![handler.clone()],
            ..BindingSet::default()
        };

        let found = verification_completeness(&manifest, &set);
        let fields: Vec<&str> = found.iter().map(|m| m.field_path.as_str()).collect();
        assert_eq!(fields, vec!["X-Signature", "X-Timestamp", "tolerance_seconds"]);
        assert!(found.iter().all(|m| m.severity == Severity::Warning));
        assert!(found.iter().all(|m| m.rule_id == RuleId::ManifestConformance));
        assert_eq!(found[0].location.line, 12);

        handler.headers_read = vec!["x-signature".to_string(), "X-Timestamp".to_string()];
        handler.evidence.push(Evidence {
            kind: EvidenceKind::TimestampCheck,
            ..signature_check(16)
        });
        let set = BindingSet {
            bindings: vec![handler],
            ..BindingSet::default()
        };
        assert!(verification_completeness(&manifest, &set).is_empty());
    }

    #[test]
    fn test_handler_without_signature_check_is_left_to_the_comparator() {
        let manifest = crate::manifest::parse(WEBHOOK, "contracts.yml", 8).unwrap();
        let set = BindingSet {
            bindings: vec![binding("shop", Role::Consumer, Side::Server, 12)],
            ..BindingSet::default()
        };
        assert!(verification_completeness(&manifest, &set).is_empty());
    }

    #[test]
    fn test_enum_casing_inferred_from_supplied_values() {
        let manifest = crate::manifest::parse(WEBHOOK, "contracts.yml", 8).unwrap();
        let evidence = ShapeEvidence {
            location: SourceLocation::new("billing/Events.java", 7, 5),
            text: String::new(),
        };
        let mut status = ExtractedShape::new("status", ShapeKind::Enum, evidence.clone());
        status.enum_values = vec!["pending".to_string(), "shipped".to_string(), "IN_TRANSIT".to_string()];
        let mut body = ExtractedShape::new("", ShapeKind::Object, evidence);
        body.children = vec![status];

        let mut sender = binding("billing", Role::Producer, Side::Client, 30);
        sender.request = Some(body);
        let set = BindingSet {
            bindings: vec![sender],
            ..BindingSet::default()
        };

        let found = enum_casing(&manifest, &set);
        assert_eq!(found.len(), 1, "{found:#?}");
        assert_eq!(found[0].field_path, "status");
        assert_eq!(found[0].kind, MismatchKind::Case);
        assert_eq!(found[0].severity, Severity::Warning);
        assert!(found[0].observed.contains("'IN_TRANSIT'"));
        assert!(found[0].manifest_expectation.starts_with("snake_case"));

        let declared = format!("{WEBHOOK}conventions:\n  enum_case:\n    billing: snake_case\n");
        let manifest = crate::manifest::parse(&declared, "contracts.yml", 8).unwrap();
        assert!(enum_casing(&manifest, &set).is_empty());
    }
}
