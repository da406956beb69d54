use anyhow::{Context, Result};

use crate::engine::Report;

pub fn to_string(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to render JSON report")
}

/// Print the report on stdout.
pub fn render(report: &Report) -> Result<()> {
    println!("{}", to_string(report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Diagnostic, DiagnosticKind, RuleId, Severity, SourceLocation, Violation};

    #[test]
    fn test_report_document_shape() {
        let report = Report {
            violations: vec![Violation {
                rule_id: RuleId::StatusCodeHandling,
                severity: Severity::Error,
                message: "orders-api GET /orders/{id}: status code 404: 404 is declared but no client branches on it".to_string(),
                file_path: "web/src/api.ts".to_string(),
                start_line: 7,
                start_column: 21,
            }],
            diagnostics: vec![Diagnostic {
                kind: DiagnosticKind::SourceParse,
                location: SourceLocation::new("web/src/broken.ts", 2, 1),
                message: "unclosed '{'".to_string(),
            }],
        };
        let value: serde_json::Value = serde_json::from_str(&to_string(&report).unwrap()).unwrap();
        assert_eq!(value["violations"][0]["RuleID"], "CTR-status-code-handling");
        assert_eq!(value["violations"][0]["StartColumn"], 21);
        assert_eq!(value["diagnostics"][0]["kind"], "source_parse");
        assert_eq!(value["diagnostics"][0]["location"]["file"], "web/src/broken.ts");
    }
}
