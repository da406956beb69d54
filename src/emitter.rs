//! Mismatch → Violation, with per-kind message templates, the configured
//! severity policy, and a deterministic order.

use crate::config::{apply_policy, Config};
use crate::models::{Mismatch, MismatchKind, RuleId, Violation};

/// `<contract> <METHOD> <path>: <kind template>`.
pub fn message(m: &Mismatch) -> String {
    let body = body(m);
    match (m.contract_id.is_empty(), m.endpoint_id.is_empty()) {
        (false, false) => format!("{} {}: {body}", m.contract_id, m.endpoint_id),
        (false, true) => format!("{}: {body}", m.contract_id),
        (true, false) => format!("{}: {body}", m.endpoint_id),
        (true, true) => body,
    }
}

fn body(m: &Mismatch) -> String {
    let field = &m.field_path;
    let expected = &m.manifest_expectation;
    let observed = &m.observed;
    let manifest = if expected.is_empty() {
        String::new()
    } else {
        format!(" (manifest: {expected})")
    };
    match m.kind {
        MismatchKind::Type => format!("type mismatch at '{field}': {observed}{manifest}"),
        MismatchKind::Unit => format!("unit mismatch: {observed} at '{field}'{manifest}"),
        MismatchKind::Case => format!("enum case mismatch at '{field}': {observed}, expected {expected}"),
        MismatchKind::Missing => format!("missing required field '{field}': {observed}"),
        MismatchKind::Extra => format!("undeclared field '{field}': {observed}"),
        MismatchKind::Strictness => format!("strictness mismatch at '{field}': {observed}{manifest}"),
        MismatchKind::Enum => format!("enum mismatch at '{field}': {observed}, manifest allows {expected}"),
        MismatchKind::Format => format!("format mismatch at '{field}': {observed}{manifest}"),
        MismatchKind::Drift => format!("shared type drift at '{field}': {observed}"),
        MismatchKind::Tag => format!("field name mismatch at '{field}': {observed}, manifest names it {expected}"),
        MismatchKind::Status => format!("status code {field}: {observed}{manifest}"),
        MismatchKind::DualTest => format!("missing dual-side test: {observed}"),
        MismatchKind::Conformance => format!("manifest conformance: {observed}"),
    }
}

/// Convert, apply the rule policy and the `--rule` filter, then sort by
/// (file, line, column, rule id, message) and drop duplicates.
pub fn emit(mismatches: Vec<Mismatch>, config: &Config, only: Option<RuleId>) -> Vec<Violation> {
    let mut violations: Vec<Violation> = mismatches
        .into_iter()
        .filter(|m| only.map_or(true, |rule| m.rule_id == rule))
        .filter_map(|m| {
            let severity = apply_policy(config, m.rule_id, m.severity)?;
            Some(Violation {
                rule_id: m.rule_id,
                severity,
                message: message(&m),
                file_path: m.location.file.clone(),
                start_line: m.location.line,
                start_column: m.location.column,
            })
        })
        .collect();

    violations.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then(a.start_line.cmp(&b.start_line))
            .then(a.start_column.cmp(&b.start_column))
            .then(a.rule_id.as_str().cmp(b.rule_id.as_str()))
            .then_with(|| a.message.cmp(&b.message))
    });
    violations.dedup();
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleAction;
    use crate::models::{Severity, SourceLocation};

    fn mismatch(kind: MismatchKind, rule_id: RuleId, file: &str, line: usize) -> Mismatch {
        Mismatch {
            contract_id: "orders-api".to_string(),
            endpoint_id: "GET /orders/{id}".to_string(),
            field_path: "amount".to_string(),
            kind,
            manifest_expectation: "cents".to_string(),
            observed: "cents rendered without /100 conversion".to_string(),
            rule_id,
            severity: Severity::Error,
            location: SourceLocation::new(file, line, 3),
        }
    }

    #[test]
    fn test_message_template() {
        let m = mismatch(MismatchKind::Unit, RuleId::StrictnessParity, "web/src/Order.tsx", 14);
        assert_eq!(
            message(&m),
            "orders-api GET /orders/{id}: unit mismatch: cents rendered without /100 conversion at 'amount' (manifest: cents)"
        );

        let mut contract_level = m.clone();
        contract_level.endpoint_id.clear();
        contract_level.kind = MismatchKind::Conformance;
        contract_level.observed = "shop (server) never verifies a signature".to_string();
        assert_eq!(
            message(&contract_level),
            "orders-api: manifest conformance: shop (server) never verifies a signature"
        );
    }

    #[test]
    fn test_sorted_and_deduplicated() {
        let violations = emit(
            vec![
                mismatch(MismatchKind::Unit, RuleId::StrictnessParity, "b.go", 1),
                mismatch(MismatchKind::DualTest, RuleId::DualTest, "a.go", 9),
                mismatch(MismatchKind::Unit, RuleId::StrictnessParity, "a.go", 2),
                mismatch(MismatchKind::Unit, RuleId::StrictnessParity, "a.go", 2),
            ],
            &Config::default(),
            None,
        );
        let order: Vec<(&str, usize)> = violations.iter().map(|v| (v.file_path.as_str(), v.start_line)).collect();
        assert_eq!(order, vec![("a.go", 2), ("a.go", 9), ("b.go", 1)]);
    }

    #[test]
    fn test_rule_policy_and_filter() {
        let mut config = Config::default();
        config.rules.insert("CTR-dual-test".to_string(), RuleAction::Off);
        config.rules.insert("CTR-strictness-parity".to_string(), RuleAction::Warn);
        let input = vec![
            mismatch(MismatchKind::DualTest, RuleId::DualTest, "a.go", 1),
            mismatch(MismatchKind::Unit, RuleId::StrictnessParity, "a.go", 2),
            mismatch(MismatchKind::Missing, RuleId::ResponseShape, "a.go", 3),
        ];

        let all = emit(input.clone(), &config, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].severity, Severity::Warning);
        assert_eq!(all[1].severity, Severity::Error);

        let only = emit(input, &config, Some(RuleId::ResponseShape));
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].rule_id, RuleId::ResponseShape);
    }
}
