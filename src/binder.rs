//! Endpoint binding.
//!
//! Attributes every observation to a service, matches it to exactly one
//! manifest endpoint, resolves its payload types against that service's
//! [`TypeTable`], and merges observations that share a [`BindingKey`].
//!
//! Matching priority:
//! 1. an explicit `contract-bind` annotation,
//! 2. an exact method + path match,
//! 3. a templated path match (`/orders/123` against `/orders/{id}`).
//!
//! Observations that match nothing, or more than one endpoint equally well,
//! become [`DiagnosticKind::AmbiguousBinding`] diagnostics and are left out of
//! comparison.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::extractor::evidence::{Evidence, StatusBranch};
use crate::extractor::shape::{ExtractedShape, ShapeResolver, TypeTable};
use crate::extractor::{BoundaryObservation, FileExtraction, Side};
use crate::manifest::{Contract, ContractManifest, Endpoint};
use crate::models::{Diagnostic, DiagnosticKind, Mismatch, MismatchKind, Role, RuleId, Severity, SourceLocation};

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Observations sharing a key are merged into one [`Binding`]. Test and
/// production code never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub contract: String,
    /// `METHOD path` as declared in the manifest.
    pub endpoint: String,
    pub service: String,
    pub role: Role,
    pub side: Side,
    pub in_test: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PayloadKind {
    Request,
    Response,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadKind::Request => write!(f, "request"),
            PayloadKind::Response => write!(f, "response"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub key: BindingKey,
    pub request: Option<ExtractedShape>,
    pub response: Option<ExtractedShape>,
    pub status_codes: Vec<StatusBranch>,
    pub headers_read: Vec<String>,
    pub headers_written: Vec<String>,
    pub evidence: Vec<Evidence>,
    /// First source location, in path order.
    pub location: SourceLocation,
    pub locations: Vec<SourceLocation>,
}

impl Binding {
    fn from_observation(key: BindingKey, obs: &BoundaryObservation, resolver: &ShapeResolver) -> Self {
        Self {
            key,
            request: obs.request.as_ref().map(|s| resolver.resolve(s)),
            response: obs.response.as_ref().map(|s| resolver.resolve(s)),
            status_codes: obs.status_codes.clone(),
            headers_read: obs.headers_read.clone(),
            headers_written: obs.headers_written.clone(),
            evidence: obs.evidence.clone(),
            location: obs.location.clone(),
            locations: vec![obs.location.clone()],
        }
    }

    /// Union another binding of the same key into this one.
    fn absorb(&mut self, other: Binding) {
        merge_shape(&mut self.request, other.request);
        merge_shape(&mut self.response, other.response);

        self.status_codes.extend(other.status_codes);
        self.status_codes
            .sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.location.cmp(&b.location)));
        self.status_codes.dedup_by(|b, a| a.code == b.code);

        for (mine, theirs) in [
            (&mut self.headers_read, other.headers_read),
            (&mut self.headers_written, other.headers_written),
        ] {
            mine.extend(theirs);
            mine.sort();
            mine.dedup();
        }

        // One entry per (field, kind); the most specific scope wins.
        for evidence in other.evidence {
            match self
                .evidence
                .iter_mut()
                .find(|e| e.kind == evidence.kind && e.field == evidence.field)
            {
                Some(kept) if evidence.scope > kept.scope => *kept = evidence,
                Some(_) => {}
                None => self.evidence.push(evidence),
            }
        }

        self.locations.extend(other.locations);
        self.locations.sort();
        self.locations.dedup();
        if other.location < self.location {
            self.location = other.location;
        }
    }

    /// Whether this side writes `payload`: clients write requests, servers
    /// write responses.
    pub fn supplies(&self, payload: PayloadKind) -> bool {
        matches!(
            (payload, self.key.side),
            (PayloadKind::Request, Side::Client) | (PayloadKind::Response, Side::Server)
        )
    }

    pub fn shape(&self, payload: PayloadKind) -> Option<&ExtractedShape> {
        match payload {
            PayloadKind::Request => self.request.as_ref(),
            PayloadKind::Response => self.response.as_ref(),
        }
    }

    /// `orders (server)`.
    pub fn describe(&self) -> String {
        format!("{} ({})", self.key.service, self.key.side)
    }
}

fn merge_shape(mine: &mut Option<ExtractedShape>, theirs: Option<ExtractedShape>) {
    match (mine.as_mut(), theirs) {
        (Some(shape), Some(other)) => shape.merge(&other),
        (None, Some(other)) => *mine = Some(other),
        _ => {}
    }
}

#[derive(Debug, Default)]
pub struct BindingSet {
    /// Sorted by key.
    pub bindings: Vec<Binding>,
    /// Annotations that contradict the manifest.
    pub mismatches: Vec<Mismatch>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BindingSet {
    pub fn for_contract<'a>(&'a self, contract: &'a str) -> impl Iterator<Item = &'a Binding> + 'a {
        self.bindings.iter().filter(move |b| b.key.contract == contract)
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param,
}

/// Split a path into segments. Scheme, host, query string and trailing
/// slash are dropped; `:id`, `{id}`, `${id}`, `<int:id>`, `{}` and printf
/// verbs all become [`Segment::Param`].
pub fn normalize_path(raw: &str) -> Vec<Segment> {
    let mut path = raw.trim();
    if let Some((_, rest)) = path.split_once("://") {
        path = rest.find('/').map_or("", |i| &rest[i..]);
    }
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if is_param(s) {
                Segment::Param
            } else {
                Segment::Literal(s.to_string())
            }
        })
        .collect()
}

fn is_param(segment: &str) -> bool {
    segment.starts_with(':')
        || segment.contains('{')
        || (segment.starts_with('<') && segment.ends_with('>'))
        || segment.contains('%')
        || segment == "*"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Quality {
    /// A concrete value sits where the manifest declares a parameter.
    Templated,
    Exact,
}

fn match_segments(observed: &[Segment], declared: &[Segment]) -> Option<Quality> {
    if observed.len() != declared.len() {
        return None;
    }
    let mut quality = Quality::Exact;
    for (o, d) in observed.iter().zip(declared) {
        match (o, d) {
            (Segment::Literal(a), Segment::Literal(b)) if a == b => {}
            (Segment::Param, Segment::Param) => {}
            (Segment::Literal(_), Segment::Param) => quality = Quality::Templated,
            _ => return None,
        }
    }
    Some(quality)
}

/// `METHOD path` of an annotation against a declared endpoint.
fn same_endpoint(id: &str, endpoint: &Endpoint) -> bool {
    let (method, path) = id.split_once(' ').unwrap_or(("", id));
    method.eq_ignore_ascii_case(&endpoint.method) && normalize_path(path) == normalize_path(&endpoint.path)
}

/// The role `service` plays for an observation on `side`. A service that is
/// both producer and consumer is resolved by side.
fn role_for(contract: &Contract, service: &str, side: Side) -> Option<Role> {
    let roles = contract.roles_of(service);
    match roles.as_slice() {
        [] => None,
        [role] => Some(*role),
        _ => Some(match (side, contract.server_role()) {
            (Side::Server, role) => role,
            (Side::Client, Role::Producer) => Role::Consumer,
            (Side::Client, Role::Consumer) => Role::Producer,
        }),
    }
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

enum Target<'m> {
    Bound {
        contract: &'m Contract,
        endpoint: &'m Endpoint,
        role: Role,
    },
    Conformance(Box<Mismatch>),
    Unbound(String),
}

pub struct Binder<'m> {
    manifest: &'m ContractManifest,
    /// `(path prefix, service id)`.
    roots: Vec<(String, String)>,
    max_depth: usize,
}

impl<'m> Binder<'m> {
    /// `config_roots` maps service ids to source prefixes and overrides the
    /// manifest's `root` entries.
    pub fn new(manifest: &'m ContractManifest, config_roots: &BTreeMap<String, String>, max_depth: usize) -> Self {
        let mut by_service: BTreeMap<String, String> = manifest
            .services
            .iter()
            .filter_map(|s| s.root.as_ref().map(|r| (s.id.clone(), r.clone())))
            .collect();
        by_service.extend(config_roots.iter().map(|(k, v)| (k.clone(), v.clone())));
        let roots = by_service
            .into_iter()
            .map(|(service, prefix)| (prefix.trim_start_matches("./").trim_matches('/').to_string(), service))
            .collect();
        Self {
            manifest,
            roots,
            max_depth,
        }
    }

    /// The service owning `path`: the longest configured root containing
    /// it, else a directory named after a service.
    pub fn attribute(&self, path: &str) -> Option<String> {
        let by_root = self
            .roots
            .iter()
            .filter(|(prefix, _)| prefix.is_empty() || path == prefix || path.starts_with(&format!("{prefix}/")))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, service)| service.clone());
        by_root.or_else(|| {
            let mut dirs: Vec<&str> = path.split('/').collect();
            dirs.pop();
            dirs.into_iter()
                .find(|d| self.manifest.service(d).is_some())
                .map(str::to_string)
        })
    }

    fn owner(&self, file: &FileExtraction) -> Option<String> {
        self.attribute(&file.path).or_else(|| {
            file.observations
                .iter()
                .find_map(|o| o.hint.as_ref().and_then(|h| h.service.clone()))
        })
    }

    /// Bind every observation of `files` (sorted by path).
    pub fn bind(&self, files: &[FileExtraction]) -> BindingSet {
        let owners: Vec<Option<String>> = files.iter().map(|f| self.owner(f)).collect();
        let mut tables: BTreeMap<String, TypeTable> = BTreeMap::new();
        for (file, owner) in files.iter().zip(&owners) {
            if let Some(service) = owner {
                let table = tables.entry(service.clone()).or_default();
                for decl in &file.types {
                    table.insert(decl.clone());
                }
            }
        }

        let empty = TypeTable::default();
        let mut set = BindingSet::default();
        let mut merged: BTreeMap<BindingKey, Binding> = BTreeMap::new();
        for (file, owner) in files.iter().zip(&owners) {
            let mut reported = false;
            for obs in &file.observations {
                let service = obs
                    .hint
                    .as_ref()
                    .and_then(|h| h.service.clone())
                    .or_else(|| owner.clone());
                let Some(service) = service else {
                    if !reported {
                        reported = true;
                        let message = format!("{} belongs to no declared service", file.path);
                        warn!("{message}");
                        set.diagnostics.push(ambiguous(&obs.location, message));
                    }
                    continue;
                };
                if self.manifest.service(&service).is_none() {
                    let message = format!("service '{service}' is not declared in the manifest");
                    warn!("{}: {message}", obs.location);
                    set.diagnostics.push(ambiguous(&obs.location, message));
                    continue;
                }

                match self.target(obs, &service) {
                    Target::Bound { contract, endpoint, role } => {
                        let key = BindingKey {
                            contract: contract.id.clone(),
                            endpoint: endpoint.id(),
                            service: service.clone(),
                            role,
                            side: obs.side,
                            in_test: obs.in_test,
                        };
                        debug!("{} bound to {} {} as {}", obs.location, key.contract, key.endpoint, role);
                        let resolver = ShapeResolver::new(tables.get(&service).unwrap_or(&empty), self.max_depth);
                        let binding = Binding::from_observation(key.clone(), obs, &resolver);
                        match merged.entry(key) {
                            Entry::Vacant(slot) => {
                                slot.insert(binding);
                            }
                            Entry::Occupied(mut slot) => slot.get_mut().absorb(binding),
                        }
                    }
                    Target::Conformance(mismatch) => set.mismatches.push(*mismatch),
                    Target::Unbound(message) => {
                        debug!("{}: {message}", obs.location);
                        set.diagnostics.push(ambiguous(&obs.location, message));
                    }
                }
            }
        }
        set.bindings = merged.into_values().collect();
        set
    }

    fn target(&self, obs: &BoundaryObservation, service: &str) -> Target<'m> {
        let hint = obs.hint.as_ref();
        let hinted_endpoint = hint.and_then(|h| h.endpoint.as_deref());

        if let Some(contract_id) = hint.and_then(|h| h.contract.as_deref()) {
            let Some(contract) = self.manifest.contract(contract_id) else {
                return self.conformance(
                    contract_id,
                    hinted_endpoint.unwrap_or_default(),
                    format!("contract-bind names contract '{contract_id}', which the manifest does not declare"),
                    &obs.location,
                );
            };
            let endpoint = match hinted_endpoint {
                Some(id) => match contract.endpoints.iter().find(|e| same_endpoint(id, e)) {
                    Some(endpoint) => endpoint,
                    None => {
                        return self.conformance(
                            contract_id,
                            id,
                            format!("contract '{contract_id}' declares no endpoint '{id}'"),
                            &obs.location,
                        )
                    }
                },
                None => match self.best_endpoint(&[contract], obs) {
                    Ok((_, endpoint)) => endpoint,
                    Err(message) => return Target::Unbound(message),
                },
            };
            let role = hint.and_then(|h| h.role).or_else(|| role_for(contract, service, obs.side));
            return match role {
                Some(role) => Target::Bound { contract, endpoint, role },
                None => self.conformance(
                    contract_id,
                    &endpoint.id(),
                    format!("service '{service}' is not a party to contract '{contract_id}'"),
                    &obs.location,
                ),
            };
        }

        let contracts: Vec<&'m Contract> = self
            .manifest
            .contracts
            .iter()
            .filter(|c| !c.roles_of(service).is_empty())
            .collect();

        let found = match hinted_endpoint {
            Some(id) => {
                let matches: Vec<(&'m Contract, &'m Endpoint)> = contracts
                    .iter()
                    .flat_map(|c| c.endpoints.iter().filter(|e| same_endpoint(id, e)).map(move |e| (*c, e)))
                    .collect();
                match matches.as_slice() {
                    [one] => Ok(*one),
                    [] => {
                        return self.conformance(
                            "",
                            id,
                            format!("contract-bind names endpoint '{id}', which no contract of '{service}' declares"),
                            &obs.location,
                        )
                    }
                    many => Err(ambiguity(id, many)),
                }
            }
            None => self.best_endpoint(&contracts, obs),
        };
        match found {
            Ok((contract, endpoint)) => {
                let role = hint.and_then(|h| h.role).or_else(|| role_for(contract, service, obs.side));
                match role {
                    Some(role) => Target::Bound { contract, endpoint, role },
                    None => Target::Unbound(format!("service '{service}' is not a party to contract '{}'", contract.id)),
                }
            }
            Err(message) => Target::Unbound(message),
        }
    }

    /// The single best-matching endpoint among `contracts`.
    fn best_endpoint(
        &self,
        contracts: &[&'m Contract],
        obs: &BoundaryObservation,
    ) -> Result<(&'m Contract, &'m Endpoint), String> {
        let Some(path) = obs.path.as_deref() else {
            return Err("no path could be recovered for this call site".to_string());
        };
        let method = obs.method.as_deref().unwrap_or("*");

        let mut best: Option<Quality> = None;
        let mut candidates: Vec<(&'m Contract, &'m Endpoint)> = Vec::new();
        for &contract in contracts {
            let variants = self.path_variants(contract, path);
            for endpoint in &contract.endpoints {
                if obs.method.as_deref().is_some_and(|m| !m.eq_ignore_ascii_case(&endpoint.method)) {
                    continue;
                }
                let declared = normalize_path(&endpoint.path);
                let Some(quality) = variants.iter().filter_map(|v| match_segments(v, &declared)).max() else {
                    continue;
                };
                match best {
                    Some(b) if quality < b => {}
                    Some(b) if quality == b => candidates.push((contract, endpoint)),
                    _ => {
                        best = Some(quality);
                        candidates = vec![(contract, endpoint)];
                    }
                }
            }
        }
        match candidates.as_slice() {
            [one] => Ok(*one),
            [] => Err(format!("no declared endpoint matches {method} {path}")),
            many => Err(ambiguity(&format!("{method} {path}"), many)),
        }
    }

    /// The observed path as written, without the serving service's base
    /// path, and without leading interpolations.
    fn path_variants(&self, contract: &Contract, path: &str) -> Vec<Vec<Segment>> {
        let full = normalize_path(path);
        let mut variants = vec![full.clone()];
        for id in contract.services_in(contract.server_role()) {
            let Some(base) = self.manifest.service(id).and_then(|s| s.base_path()) else {
                continue;
            };
            let base = normalize_path(&base);
            if full.len() > base.len() && full.starts_with(&base) {
                variants.push(full[base.len()..].to_vec());
            }
        }
        let lead = full.iter().take_while(|s| **s == Segment::Param).count();
        if lead > 0 {
            variants.push(full[lead..].to_vec());
        }
        variants
    }

    fn conformance(&self, contract: &str, endpoint: &str, message: String, location: &SourceLocation) -> Target<'m> {
        Target::Conformance(Box::new(Mismatch {
            contract_id: contract.to_string(),
            endpoint_id: endpoint.to_string(),
            field_path: String::new(),
            kind: MismatchKind::Conformance,
            manifest_expectation: "declared in the manifest".to_string(),
            observed: message,
            rule_id: RuleId::ManifestConformance,
            severity: Severity::Error,
            location: location.clone(),
        }))
    }
}

fn ambiguity(what: &str, candidates: &[(&Contract, &Endpoint)]) -> String {
    let names: Vec<String> = candidates
        .iter()
        .map(|(c, e)| format!("{} {}", c.id, e.id()))
        .collect();
    format!("{what} matches {}", names.join(", "))
}

fn ambiguous(location: &SourceLocation, message: String) -> Diagnostic {
    Diagnostic {
        kind: DiagnosticKind::AmbiguousBinding,
        location: location.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::shape::{
        FieldDecl, ShapeEvidence, ShapeKind, ShapeSource, TypeDecl, TypeDeclKind, TypeExpr,
    };
    use crate::extractor::evidence::{CaseTransform, EvidenceKind, EvidenceScope};
    use crate::extractor::BindingHint;
    use crate::models::Language;

    const MANIFEST: &str = r#"
services:
  - id: orders
    language: go
    base_url: https://orders.internal/v1
  - id: web
    language: typescript
contracts:
  - id: orders-api
    producer: orders
    consumers: [web]
    endpoints:
      - path: /orders/{id}
        method: GET
        status_codes: [200, 404]
        response:
          fields:
            id: {type: string, required: true}
            total_cents: {type: integer, unit: cents, required: true}
      - path: /orders
        method: POST
        status_codes: [201]
"#;

    fn manifest() -> ContractManifest {
        crate::manifest::parse(MANIFEST, "contracts.yml", 8).unwrap()
    }

    fn observation(file: &str, line: usize, side: Side, method: &str, path: &str) -> BoundaryObservation {
        let mut obs = BoundaryObservation::new(side, SourceLocation::new(file, line, 1), line * 10..line * 10 + 5);
        obs.method = Some(method.to_string());
        obs.path = Some(path.to_string());
        obs
    }

    fn file(path: &str, language: Language, observations: Vec<BoundaryObservation>) -> FileExtraction {
        FileExtraction {
            path: path.to_string(),
            language,
            is_test: false,
            types: Vec::new(),
            observations,
        }
    }

    fn typed(name: &str) -> ShapeSource {
        ShapeSource::Typed {
            ty: TypeExpr::named(name),
            evidence: ShapeEvidence {
                location: SourceLocation::new("x", 1, 1),
                text: String::new(),
            },
        }
    }

    #[test]
    fn test_normalize_path_variants() {
        let declared = normalize_path("/orders/{id}/items");
        assert_eq!(normalize_path("/orders/:id/items/"), declared);
        assert_eq!(normalize_path("https://api.example.com/orders/<int:id>/items?x=1"), declared);
        assert_eq!(normalize_path("/orders/%s/items"), declared);
        assert_eq!(match_segments(&normalize_path("/orders/{}/items"), &declared), Some(Quality::Exact));
        assert_eq!(match_segments(&normalize_path("/orders/42/items"), &declared), Some(Quality::Templated));
        assert_eq!(match_segments(&normalize_path("/orders/42"), &declared), None);
    }

    #[test]
    fn test_binds_server_and_client_with_base_path() {
        let m = manifest();
        let binder = Binder::new(&m, &BTreeMap::new(), 8);

        let mut route = observation("orders/handlers.go", 10, Side::Server, "GET", "/v1/orders/{id}");
        route.response = Some(typed("Order"));
        let mut server = file("orders/handlers.go", Language::Go, vec![route]);
        server.types.push(TypeDecl {
            name: "Order".to_string(),
            generics: Vec::new(),
            kind: TypeDeclKind::Record(vec![
                FieldDecl::new("id", TypeExpr::Scalar(ShapeKind::String), 3, 2),
                FieldDecl::new("total_cents", TypeExpr::Scalar(ShapeKind::Integer), 4, 2),
            ]),
            location: SourceLocation::new("orders/handlers.go", 2, 1),
        });
        let client = file(
            "web/src/api.ts",
            Language::TypeScript,
            vec![observation("web/src/api.ts", 4, Side::Client, "GET", "/orders/{}")],
        );

        let set = binder.bind(&[server, client]);
        assert!(set.diagnostics.is_empty(), "{:?}", set.diagnostics);
        assert_eq!(set.bindings.len(), 2);

        let producer = set.bindings.iter().find(|b| b.key.role == Role::Producer).unwrap();
        assert_eq!(producer.key.endpoint, "GET /orders/{id}");
        assert_eq!(producer.key.service, "orders");
        let response = producer.response.as_ref().unwrap();
        assert_eq!(response.type_name.as_deref(), Some("Order"));
        assert!(response.child("total_cents").is_some());

        let consumer = set.bindings.iter().find(|b| b.key.role == Role::Consumer).unwrap();
        assert_eq!(consumer.key.service, "web");
        assert!(consumer.supplies(PayloadKind::Request));
        assert!(!consumer.supplies(PayloadKind::Response));
    }

    #[test]
    fn test_same_key_observations_are_merged() {
        let m = manifest();
        let binder = Binder::new(&m, &BTreeMap::new(), 8);
        let lowered = |scope: EvidenceScope, line: usize| Evidence {
            kind: EvidenceKind::Case(CaseTransform::Lower),
            field: Some("status".to_string()),
            scope,
            location: SourceLocation::new("web/src/api.ts", line, 5),
            text: "status.toLowerCase()".to_string(),
        };
        let mut first = observation("web/src/api.ts", 4, Side::Client, "GET", "/orders/{}");
        first.evidence.push(lowered(EvidenceScope::File, 12));
        let mut second = observation("web/src/api.ts", 9, Side::Client, "GET", "/orders/17");
        second.evidence.push(lowered(EvidenceScope::Unit, 12));
        let client = file("web/src/api.ts", Language::TypeScript, vec![first, second]);

        let set = binder.bind(&[client]);
        assert_eq!(set.bindings.len(), 1);
        assert_eq!(set.bindings[0].locations.len(), 2);
        assert_eq!(set.bindings[0].location.line, 4);
        assert_eq!(set.bindings[0].evidence.len(), 1);
        assert_eq!(set.bindings[0].evidence[0].scope, EvidenceScope::Unit);
    }

    #[test]
    fn test_config_roots_override_directory_names() {
        let m = manifest();
        let roots = BTreeMap::from([("web".to_string(), "frontend/app".to_string())]);
        let binder = Binder::new(&m, &roots, 8);
        assert_eq!(binder.attribute("frontend/app/src/api.ts").as_deref(), Some("web"));
        assert_eq!(binder.attribute("services/orders/main.go").as_deref(), Some("orders"));
        assert_eq!(binder.attribute("frontend/other/x.ts"), None);
    }

    #[test]
    fn test_annotation_for_undeclared_contract_is_a_conformance_finding() {
        let m = manifest();
        let binder = Binder::new(&m, &BTreeMap::new(), 8);
        let mut obs = observation("web/src/api.ts", 4, Side::Client, "GET", "/orders/{}");
        obs.hint = Some(BindingHint {
            contract: Some("billing-api".to_string()),
            endpoint: Some("POST /charges".to_string()),
            role: None,
            service: None,
            location: SourceLocation::new("web/src/api.ts", 3, 1),
        });
        let set = binder.bind(&[file("web/src/api.ts", Language::TypeScript, vec![obs])]);
        assert!(set.bindings.is_empty());
        assert_eq!(set.mismatches.len(), 1);
        assert_eq!(set.mismatches[0].rule_id, RuleId::ManifestConformance);
        assert_eq!(set.mismatches[0].contract_id, "billing-api");
    }

    #[test]
    fn test_unattributed_and_unmatched_observations_are_diagnostics() {
        let m = manifest();
        let binder = Binder::new(&m, &BTreeMap::new(), 8);
        let stray = file(
            "scripts/seed.py",
            Language::Python,
            vec![
                observation("scripts/seed.py", 1, Side::Client, "GET", "/orders/1"),
                observation("scripts/seed.py", 2, Side::Client, "GET", "/orders/2"),
            ],
        );
        let unmatched = file(
            "web/src/api.ts",
            Language::TypeScript,
            vec![observation("web/src/api.ts", 1, Side::Client, "DELETE", "/orders/{}")],
        );
        let set = binder.bind(&[stray, unmatched]);
        assert!(set.bindings.is_empty());
        assert_eq!(set.diagnostics.len(), 2);
        assert!(set.diagnostics.iter().all(|d| d.kind == DiagnosticKind::AmbiguousBinding));
    }
}
