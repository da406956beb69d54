//! Contract comparison, run once per contract after binding.
//!
//! - [`fields`] — three-way walk of manifest schema, supplier shapes and
//!   reader shapes.
//! - [`coverage`] — status-code handling, dual-side tests and signature
//!   verification.
//! - [`units`] — unit and format vocabulary shared with the extractors.

pub mod coverage;
pub mod fields;
pub mod units;

use crate::binder::Binding;
use crate::extractor::evidence::Evidence;
use crate::manifest::{Contract, ContractManifest};
use crate::models::Mismatch;

/// Every finding for one contract. `bindings` are the contract's bindings,
/// test and production alike.
pub fn compare_contract(manifest: &ContractManifest, contract: &Contract, bindings: &[&Binding]) -> Vec<Mismatch> {
    let mut out = Vec::new();
    for endpoint in &contract.endpoints {
        let id = endpoint.id();
        let bound: Vec<&Binding> = bindings.iter().copied().filter(|b| b.key.endpoint == id).collect();
        let production: Vec<&Binding> = bound.iter().copied().filter(|b| !b.key.in_test).collect();

        out.extend(fields::compare_endpoint(manifest, contract, endpoint, &production));
        out.extend(coverage::status_codes(contract, endpoint, &production));
        out.extend(coverage::dual_test(manifest, contract, endpoint, &bound));
    }
    out.extend(coverage::verification(contract, bindings));
    out
}

/// `items` + `[]` → `items[]`, `order` + `id` → `order.id`.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else if name == "[]" {
        format!("{parent}[]")
    } else {
        format!("{parent}.{name}")
    }
}

/// Case- and separator-insensitive form of a name (`userId` ~ `user_id`).
pub(crate) fn fold(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Evidence attached to any of `names`. A unit-suffixed identifier
/// (`WeightGrams`) mentions its stem (`weight`).
pub(crate) fn mentions(evidence: &Evidence, names: &[&str]) -> bool {
    let Some(field) = evidence.field.as_deref().map(fold) else {
        return false;
    };
    names.iter().map(|n| fold(n)).any(|name| {
        name == field
            || (name.len() >= 4 && field.starts_with(&name))
            || (field.len() >= 4 && name.starts_with(&field))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "order"), "order");
        assert_eq!(join_path("order", "lines"), "order.lines");
        assert_eq!(join_path("order.lines", "[]"), "order.lines[]");
    }

    #[test]
    fn test_fold_ignores_case_and_separators() {
        assert_eq!(fold("userId"), fold("user_id"));
        assert_eq!(fold("User-ID"), "userid");
        assert_ne!(fold("user"), fold("users"));
    }

    #[test]
    fn test_mentions_matches_unit_suffixed_identifiers() {
        use crate::extractor::evidence::{EvidenceKind, EvidenceScope};
        use crate::models::SourceLocation;

        let evidence = Evidence {
            kind: EvidenceKind::Signature,
            field: Some("WeightGrams".to_string()),
            scope: EvidenceScope::Unit,
            location: SourceLocation::new("a.go", 1, 1),
            text: String::new(),
        };
        assert!(mentions(&evidence, &["weight"]));
        assert!(mentions(&evidence, &["weight_grams"]));
        assert!(!mentions(&evidence, &["id"]));
    }
}
