//! Endpoint coverage: status-code handling, dual-side tests and signature
//! verification.

use std::collections::BTreeSet;

use crate::binder::Binding;
use crate::extractor::evidence::{EvidenceKind, StatusMatch};
use crate::extractor::Side;
use crate::manifest::{Contract, ContractManifest, Endpoint};
use crate::models::{Mismatch, MismatchKind, Role, RuleId, Severity, SourceLocation};

fn status_mismatch(
    contract: &Contract,
    endpoint: &Endpoint,
    code: u16,
    severity: Severity,
    observed: String,
    location: &SourceLocation,
) -> Mismatch {
    Mismatch {
        contract_id: contract.id.clone(),
        endpoint_id: endpoint.id(),
        field_path: code.to_string(),
        kind: MismatchKind::Status,
        manifest_expectation: declared_codes(endpoint)
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        observed,
        rule_id: RuleId::StatusCodeHandling,
        severity,
        location: location.clone(),
    }
}

/// `status_codes`, else the codes with a declared body.
fn declared_codes(endpoint: &Endpoint) -> Vec<u16> {
    if endpoint.status_codes.is_empty() {
        endpoint.responses.keys().copied().collect()
    } else {
        endpoint.status_codes.clone()
    }
}

/// Every declared code needs a client branch; undeclared codes branched on
/// by clients or written by servers are warnings. `bindings` are production
/// bindings of `endpoint`.
pub fn status_codes(contract: &Contract, endpoint: &Endpoint, bindings: &[&Binding]) -> Vec<Mismatch> {
    let declared = declared_codes(endpoint);
    if declared.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();

    let clients: Vec<&Binding> = bindings.iter().copied().filter(|b| b.key.side == Side::Client).collect();
    if let Some(first) = clients.iter().map(|b| &b.location).min() {
        for &code in &declared {
            let covered = clients.iter().flat_map(|b| &b.status_codes).any(|branch| match branch.code {
                StatusMatch::Code(c) => c == code,
                StatusMatch::Success => (200..300).contains(&code),
            });
            if !covered {
                out.push(status_mismatch(
                    contract,
                    endpoint,
                    code,
                    Severity::Error,
                    format!("{code} is declared but no client branches on it"),
                    first,
                ));
            }
        }
    }

    let mut reported = BTreeSet::new();
    for binding in bindings {
        for branch in &binding.status_codes {
            let StatusMatch::Code(code) = branch.code else {
                continue;
            };
            if declared.contains(&code) || !reported.insert((binding.key.service.as_str(), binding.key.side, code)) {
                continue;
            }
            let action = match binding.key.side {
                Side::Client => "branches on",
                Side::Server => "writes",
            };
            out.push(status_mismatch(
                contract,
                endpoint,
                code,
                Severity::Warning,
                format!("{} {action} undeclared {code}", binding.describe()),
                &branch.location,
            ));
        }
    }
    out
}

/// The producer and every consumer need a test-context binding for each
/// endpoint that is bound at all.
pub fn dual_test(
    manifest: &ContractManifest,
    contract: &Contract,
    endpoint: &Endpoint,
    bindings: &[&Binding],
) -> Vec<Mismatch> {
    if bindings.is_empty() {
        return Vec::new();
    }
    let mut parties: Vec<(&str, Role)> = vec![(contract.producer.as_str(), Role::Producer)];
    for consumer in &contract.consumers {
        if !parties.iter().any(|(s, _)| *s == consumer.as_str()) {
            parties.push((consumer.as_str(), Role::Consumer));
        }
    }

    let mut out = Vec::new();
    for (service, role) in parties {
        let tested = bindings.iter().any(|b| b.key.in_test && b.key.service == service);
        if tested {
            continue;
        }
        let location = bindings
            .iter()
            .filter(|b| b.key.service == service)
            .map(|b| b.location.clone())
            .min()
            .unwrap_or_else(|| manifest.locate(&[&contract.id, &endpoint.path]));
        out.push(Mismatch {
            contract_id: contract.id.clone(),
            endpoint_id: endpoint.id(),
            field_path: String::new(),
            kind: MismatchKind::DualTest,
            manifest_expectation: "a test on both sides".to_string(),
            observed: format!("no test exercises the {role} side ({service})"),
            rule_id: RuleId::DualTest,
            severity: Severity::Error,
            location,
        });
    }
    out
}

/// Inbound handlers of a contract declaring `verification` must check a
/// signature somewhere.
pub fn verification(contract: &Contract, bindings: &[&Binding]) -> Vec<Mismatch> {
    let Some(verification) = &contract.verification else {
        return Vec::new();
    };
    let handlers: Vec<&Binding> = bindings
        .iter()
        .copied()
        .filter(|b| !b.key.in_test && b.key.role == Role::Consumer && b.key.side == Side::Server)
        .collect();
    let verified = handlers
        .iter()
        .any(|b| b.evidence.iter().any(|e| e.kind == EvidenceKind::Signature));
    let Some(handler) = handlers.iter().min_by(|a, b| a.location.cmp(&b.location)) else {
        return Vec::new();
    };
    if verified {
        return Vec::new();
    }
    vec![Mismatch {
        contract_id: contract.id.clone(),
        endpoint_id: handler.key.endpoint.clone(),
        field_path: verification.header.clone(),
        kind: MismatchKind::Conformance,
        manifest_expectation: format!("{} signature in {}", verification.method, verification.header),
        observed: format!("{} never verifies a signature", handler.describe()),
        rule_id: RuleId::ManifestConformance,
        severity: Severity::Error,
        location: handler.location.clone(),
    }]
}
